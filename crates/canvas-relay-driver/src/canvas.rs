//! Typed handle for one remote surface.

use canvas_relay_core::options::{
    ImageSmoothingQuality, LineCap, LineJoin, PatternRepetition, TextAlign, TextBaseline,
    TextDirection,
};
use canvas_relay_core::protocol::{DomMatrix, ImageData, TextMetrics};
use canvas_relay_core::{Command, PathId, Response, SurfaceId};

use crate::error::DriverError;
use crate::server::Driver;

/// Drawing state last set through a [`Canvas2d`], kept on the driver side so
/// reading it needs no round trip.
///
/// Starts at the 2D context defaults, follows `save`/`restore`, and resets
/// when the surface is resized.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasState {
    pub line_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    pub line_dash_offset: f64,
    pub font: String,
    pub text_align: TextAlign,
    pub text_baseline: TextBaseline,
    pub direction: TextDirection,
    pub fill_style: String,
    pub stroke_style: String,
    pub shadow_blur: f64,
    pub shadow_color: String,
    pub shadow_offset_x: f64,
    pub shadow_offset_y: f64,
    pub global_alpha: f64,
    pub global_composite_operation: String,
    pub image_smoothing_enabled: bool,
    pub image_smoothing_quality: ImageSmoothingQuality,
    pub filter: Option<String>,
}

impl Default for CanvasState {
    fn default() -> Self {
        Self {
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            line_dash_offset: 0.0,
            font: "10px sans-serif".into(),
            text_align: TextAlign::Start,
            text_baseline: TextBaseline::Alphabetic,
            direction: TextDirection::Inherit,
            fill_style: "#000000".into(),
            stroke_style: "#000000".into(),
            shadow_blur: 0.0,
            shadow_color: "rgba(0, 0, 0, 0)".into(),
            shadow_offset_x: 0.0,
            shadow_offset_y: 0.0,
            global_alpha: 1.0,
            global_composite_operation: "source-over".into(),
            image_smoothing_enabled: true,
            image_smoothing_quality: ImageSmoothingQuality::Low,
            filter: None,
        }
    }
}

/// A surface living on the connected host.
///
/// Dropping the handle destroys the remote surface.
pub struct Canvas2d {
    driver: Driver,
    id: SurfaceId,
    width: u32,
    height: u32,
    state: CanvasState,
    saved: Vec<CanvasState>,
}

fn unexpected<T>(response: Response) -> Result<T, DriverError> {
    Err(DriverError::UnexpectedResponse(response.tag()))
}

impl Canvas2d {
    pub(crate) fn new(driver: Driver, id: SurfaceId, width: u32, height: u32) -> Self {
        Self {
            driver,
            id,
            width,
            height,
            state: CanvasState::default(),
            saved: Vec::new(),
        }
    }

    pub fn id(&self) -> &SurfaceId {
        &self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The drawing state as last set through this handle.
    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    /// Send any command to this surface.
    pub async fn request(&self, command: Command) -> Result<Response, DriverError> {
        self.driver.request(&self.id, command).await
    }

    /// Send a command that must answer `Success`.
    async fn run(&self, command: Command) -> Result<(), DriverError> {
        match self.request(command).await? {
            Response::Success {} => Ok(()),
            other => unexpected(other),
        }
    }

    /// Run `command` and record its effect locally once the host accepted it.
    async fn update(
        &mut self,
        command: Command,
        apply: impl FnOnce(&mut CanvasState),
    ) -> Result<(), DriverError> {
        self.run(command).await?;
        apply(&mut self.state);
        Ok(())
    }

    // Bitmap size

    /// Resize the bitmap. This clears it and resets the drawing state.
    pub async fn set_width(&mut self, width: u32) -> Result<(), DriverError> {
        self.run(Command::SetWidth { width }).await?;
        self.width = width;
        self.reset_state();
        Ok(())
    }

    pub async fn set_height(&mut self, height: u32) -> Result<(), DriverError> {
        self.run(Command::SetHeight { height }).await?;
        self.height = height;
        self.reset_state();
        Ok(())
    }

    fn reset_state(&mut self) {
        self.state = CanvasState::default();
        self.saved.clear();
    }

    // Line styles

    pub async fn set_line_width(&mut self, width: f64) -> Result<(), DriverError> {
        self.update(Command::SetLineWidth { line_width: width }, |s| {
            s.line_width = width
        })
        .await
    }

    pub async fn set_line_cap(&mut self, cap: LineCap) -> Result<(), DriverError> {
        self.update(
            Command::SetLineCap {
                line_cap: cap.as_str().to_string(),
            },
            |s| s.line_cap = cap,
        )
        .await
    }

    pub async fn set_line_join(&mut self, join: LineJoin) -> Result<(), DriverError> {
        self.update(
            Command::SetLineJoin {
                line_join: join.as_str().to_string(),
            },
            |s| s.line_join = join,
        )
        .await
    }

    pub async fn set_miter_limit(&mut self, limit: f64) -> Result<(), DriverError> {
        self.update(Command::SetMiterLimit { miter_limit: limit }, |s| {
            s.miter_limit = limit
        })
        .await
    }

    /// Returns the dash list as stored by the host.
    pub async fn set_line_dash(&self, segments: Vec<f64>) -> Result<Vec<f64>, DriverError> {
        match self.request(Command::SetLineDash { line_dash: segments }).await? {
            Response::LineDash { line_dash } => Ok(line_dash),
            other => unexpected(other),
        }
    }

    pub async fn get_line_dash(&self) -> Result<Vec<f64>, DriverError> {
        match self.request(Command::GetLineDash {}).await? {
            Response::LineDash { line_dash } => Ok(line_dash),
            other => unexpected(other),
        }
    }

    pub async fn set_line_dash_offset(&mut self, offset: f64) -> Result<(), DriverError> {
        self.update(
            Command::SetLineDashOffset {
                line_dash_offset: offset,
            },
            |s| s.line_dash_offset = offset,
        )
        .await
    }

    // Text styles

    pub async fn set_font(&mut self, font: &str) -> Result<(), DriverError> {
        self.update(
            Command::SetFont {
                font: font.to_string(),
            },
            |s| s.font = font.to_string(),
        )
        .await
    }

    pub async fn set_text_align(&mut self, align: TextAlign) -> Result<(), DriverError> {
        self.update(
            Command::SetTextAlign {
                text_align: align.as_str().to_string(),
            },
            |s| s.text_align = align,
        )
        .await
    }

    pub async fn set_text_baseline(&mut self, baseline: TextBaseline) -> Result<(), DriverError> {
        self.update(
            Command::SetTextBaseline {
                text_baseline: baseline.as_str().to_string(),
            },
            |s| s.text_baseline = baseline,
        )
        .await
    }

    pub async fn set_direction(&mut self, direction: TextDirection) -> Result<(), DriverError> {
        self.update(
            Command::SetTextDirection {
                text_direction: direction.as_str().to_string(),
            },
            |s| s.direction = direction,
        )
        .await
    }

    // Fill, stroke and compositing

    pub async fn set_fill_style(&mut self, style: &str) -> Result<(), DriverError> {
        self.update(
            Command::SetFillStyle {
                fill_style: style.to_string(),
            },
            |s| s.fill_style = style.to_string(),
        )
        .await
    }

    pub async fn set_stroke_style(&mut self, style: &str) -> Result<(), DriverError> {
        self.update(
            Command::SetStrokeStyle {
                stroke_style: style.to_string(),
            },
            |s| s.stroke_style = style.to_string(),
        )
        .await
    }

    pub async fn set_shadow_blur(&mut self, blur: f64) -> Result<(), DriverError> {
        self.update(Command::SetShadowBlur { shadow_blur: blur }, |s| {
            s.shadow_blur = blur
        })
        .await
    }

    pub async fn set_shadow_color(&mut self, color: &str) -> Result<(), DriverError> {
        self.update(
            Command::SetShadowColor {
                shadow_color: color.to_string(),
            },
            |s| s.shadow_color = color.to_string(),
        )
        .await
    }

    pub async fn set_shadow_offset(&mut self, x: f64, y: f64) -> Result<(), DriverError> {
        self.update(Command::SetShadowOffsetX { shadow_offset_x: x }, |s| {
            s.shadow_offset_x = x
        })
        .await?;
        self.update(Command::SetShadowOffsetY { shadow_offset_y: y }, |s| {
            s.shadow_offset_y = y
        })
        .await
    }

    pub async fn set_global_alpha(&mut self, alpha: f64) -> Result<(), DriverError> {
        self.update(Command::SetGlobalAlpha { global_alpha: alpha }, |s| {
            s.global_alpha = alpha
        })
        .await
    }

    pub async fn set_global_composite_operation(&mut self, operation: &str) -> Result<(), DriverError> {
        self.update(
            Command::SetGlobalCompositeOperation {
                global_composite_operation: operation.to_string(),
            },
            |s| s.global_composite_operation = operation.to_string(),
        )
        .await
    }

    pub async fn set_image_smoothing_enabled(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.update(
            Command::SetImageSmoothingEnabled {
                image_smoothing_enabled: enabled,
            },
            |s| s.image_smoothing_enabled = enabled,
        )
        .await
    }

    /// `None` falls back to `Low`.
    pub async fn set_image_smoothing_quality(
        &mut self,
        quality: Option<ImageSmoothingQuality>,
    ) -> Result<(), DriverError> {
        self.update(
            Command::SetImageSmoothingQuality {
                image_smoothing_quality: quality.map(|q| q.as_str().to_string()),
            },
            |s| s.image_smoothing_quality = quality.unwrap_or(ImageSmoothingQuality::Low),
        )
        .await
    }

    pub async fn set_filter(&mut self, filter: Option<&str>) -> Result<(), DriverError> {
        self.update(
            Command::SetFilter {
                filter: filter.map(str::to_string),
            },
            |s| s.filter = filter.map(str::to_string),
        )
        .await
    }

    // Rectangles and text

    pub async fn fill_rect(&self, x: f64, y: f64, width: f64, height: f64) -> Result<(), DriverError> {
        self.run(Command::FillRect {
            x,
            y,
            width,
            height,
        })
        .await
    }

    pub async fn stroke_rect(&self, x: f64, y: f64, width: f64, height: f64) -> Result<(), DriverError> {
        self.run(Command::StrokeRect {
            x,
            y,
            width,
            height,
        })
        .await
    }

    pub async fn clear_rect(&self, x: f64, y: f64, width: f64, height: f64) -> Result<(), DriverError> {
        self.run(Command::ClearRect {
            x,
            y,
            width,
            height,
        })
        .await
    }

    pub async fn fill_text(
        &self,
        text: &str,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    ) -> Result<(), DriverError> {
        self.run(Command::FillText {
            text: text.to_string(),
            x,
            y,
            max_width,
        })
        .await
    }

    pub async fn stroke_text(
        &self,
        text: &str,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    ) -> Result<(), DriverError> {
        self.run(Command::StrokeText {
            text: text.to_string(),
            x,
            y,
            max_width,
        })
        .await
    }

    pub async fn measure_text(&self, text: &str) -> Result<TextMetrics, DriverError> {
        match self
            .request(Command::MeasureText {
                text: text.to_string(),
            })
            .await?
        {
            Response::MeasureText { text_metrics } => Ok(text_metrics),
            other => unexpected(other),
        }
    }

    // Gradients and patterns

    /// `stops` are `(offset, color)` pairs.
    pub async fn create_linear_gradient(
        &self,
        (x0, y0): (f64, f64),
        (x1, y1): (f64, f64),
        stops: Vec<(f64, String)>,
    ) -> Result<(), DriverError> {
        self.run(Command::CreateLinearGradient {
            x0,
            y0,
            x1,
            y1,
            stops,
        })
        .await
    }

    /// Start and end circles are `(x, y, r)`.
    pub async fn create_radial_gradient(
        &self,
        (x0, y0, r0): (f64, f64, f64),
        (x1, y1, r1): (f64, f64, f64),
        stops: Vec<(f64, String)>,
    ) -> Result<(), DriverError> {
        self.run(Command::CreateRadialGradient {
            x0,
            y0,
            r0,
            x1,
            y1,
            r1,
            stops,
        })
        .await
    }

    pub async fn create_pattern(&self, url: &str, repetition: PatternRepetition) -> Result<(), DriverError> {
        self.run(Command::CreatePattern {
            url: url.to_string(),
            repetition: repetition.as_str().to_string(),
        })
        .await
    }

    // Paths. `None` targets the surface's default path.

    /// Reset the default path.
    pub async fn begin_path(&self) -> Result<(), DriverError> {
        self.run(Command::BeginPath { path_uuid: None }).await
    }

    /// Create a named path on this surface and return its id.
    pub async fn new_path(&self) -> Result<PathId, DriverError> {
        let id = PathId::new(uuid::Uuid::new_v4().to_string());
        self.run(Command::BeginPath {
            path_uuid: Some(id.clone()),
        })
        .await?;
        Ok(id)
    }

    pub async fn close_path(&self, path: Option<&PathId>) -> Result<(), DriverError> {
        self.run(Command::ClosePath {
            path_uuid: path.cloned(),
        })
        .await
    }

    pub async fn move_to(&self, path: Option<&PathId>, x: f64, y: f64) -> Result<(), DriverError> {
        self.run(Command::MoveTo {
            path_uuid: path.cloned(),
            x,
            y,
        })
        .await
    }

    pub async fn line_to(&self, path: Option<&PathId>, x: f64, y: f64) -> Result<(), DriverError> {
        self.run(Command::LineTo {
            path_uuid: path.cloned(),
            x,
            y,
        })
        .await
    }

    pub async fn bezier_curve_to(
        &self,
        path: Option<&PathId>,
        (cp1x, cp1y): (f64, f64),
        (cp2x, cp2y): (f64, f64),
        (x, y): (f64, f64),
    ) -> Result<(), DriverError> {
        self.run(Command::BezierCurveTo {
            path_uuid: path.cloned(),
            cp1x,
            cp1y,
            cp2x,
            cp2y,
            x,
            y,
        })
        .await
    }

    pub async fn quadratic_curve_to(
        &self,
        path: Option<&PathId>,
        (cpx, cpy): (f64, f64),
        (x, y): (f64, f64),
    ) -> Result<(), DriverError> {
        self.run(Command::QuadraticCurveTo {
            path_uuid: path.cloned(),
            cpx,
            cpy,
            x,
            y,
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn arc(
        &self,
        path: Option<&PathId>,
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    ) -> Result<(), DriverError> {
        self.run(Command::Arc {
            path_uuid: path.cloned(),
            x,
            y,
            radius,
            start_angle,
            end_angle,
            anticlockwise,
        })
        .await
    }

    pub async fn arc_to(
        &self,
        path: Option<&PathId>,
        (x1, y1): (f64, f64),
        (x2, y2): (f64, f64),
        radius: f64,
    ) -> Result<(), DriverError> {
        self.run(Command::ArcTo {
            path_uuid: path.cloned(),
            x1,
            y1,
            x2,
            y2,
            radius,
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn ellipse(
        &self,
        path: Option<&PathId>,
        (x, y): (f64, f64),
        (radius_x, radius_y): (f64, f64),
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    ) -> Result<(), DriverError> {
        self.run(Command::Ellipse {
            path_uuid: path.cloned(),
            x,
            y,
            radius_x,
            radius_y,
            rotation,
            start_angle,
            end_angle,
            anticlockwise,
        })
        .await
    }

    pub async fn rect(
        &self,
        path: Option<&PathId>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Result<(), DriverError> {
        self.run(Command::Rect {
            path_uuid: path.cloned(),
            x,
            y,
            width,
            height,
        })
        .await
    }

    pub async fn fill(&self, path: Option<&PathId>, is_even_odd: bool) -> Result<(), DriverError> {
        self.run(Command::Fill {
            path_uuid: path.cloned(),
            is_even_odd,
        })
        .await
    }

    pub async fn stroke(&self, path: Option<&PathId>) -> Result<(), DriverError> {
        self.run(Command::Stroke {
            path_uuid: path.cloned(),
        })
        .await
    }

    pub async fn clip(&self, path: Option<&PathId>, is_even_odd: bool) -> Result<(), DriverError> {
        self.run(Command::Clip {
            path_uuid: path.cloned(),
            is_even_odd,
        })
        .await
    }

    pub async fn is_point_in_path(
        &self,
        path: Option<&PathId>,
        x: f64,
        y: f64,
        is_even_odd: bool,
    ) -> Result<bool, DriverError> {
        match self
            .request(Command::IsPointInPath {
                path_uuid: path.cloned(),
                x,
                y,
                is_even_odd,
            })
            .await?
        {
            Response::IsPointIn { is_in } => Ok(is_in),
            other => unexpected(other),
        }
    }

    pub async fn is_point_in_stroke(&self, path: Option<&PathId>, x: f64, y: f64) -> Result<bool, DriverError> {
        match self
            .request(Command::IsPointInStroke {
                path_uuid: path.cloned(),
                x,
                y,
            })
            .await?
        {
            Response::IsPointIn { is_in } => Ok(is_in),
            other => unexpected(other),
        }
    }

    // Transforms

    pub async fn get_transform(&self) -> Result<DomMatrix, DriverError> {
        match self.request(Command::GetTransform {}).await? {
            Response::Transform { matrix } => Ok(matrix),
            other => unexpected(other),
        }
    }

    pub async fn rotate(&self, angle: f64) -> Result<(), DriverError> {
        self.run(Command::Rotate { angle }).await
    }

    pub async fn scale(&self, x: f64, y: f64) -> Result<(), DriverError> {
        self.run(Command::Scale { x, y }).await
    }

    pub async fn translate(&self, x: f64, y: f64) -> Result<(), DriverError> {
        self.run(Command::Translate { x, y }).await
    }

    /// Multiply the current transform by `[a, b, c, d, e, f]`.
    pub async fn transform(&self, matrix: DomMatrix) -> Result<(), DriverError> {
        self.run(Command::Transform { matrix }).await
    }

    pub async fn set_transform(&self, matrix: DomMatrix) -> Result<(), DriverError> {
        self.run(Command::SetTransform { matrix }).await
    }

    // Images and pixels

    /// Draw the image at `url`.
    ///
    /// `source` crops the image to `(sx, sy, width, height)`; `size` scales the
    /// destination to `(width, height)`. A crop without a size draws at the
    /// cropped size.
    pub async fn draw_image(
        &self,
        url: &str,
        source: Option<(f64, f64, f64, f64)>,
        (dx, dy): (f64, f64),
        size: Option<(f64, f64)>,
    ) -> Result<(), DriverError> {
        self.run(Command::DrawImage {
            url: url.to_string(),
            source,
            dx,
            dy,
            d_dims: size,
        })
        .await
    }

    pub async fn get_image_data(&self, sx: f64, sy: f64, sw: f64, sh: f64) -> Result<ImageData, DriverError> {
        match self.request(Command::GetImageData { sx, sy, sw, sh }).await? {
            Response::ImageData { image_data } => Ok(image_data),
            other => unexpected(other),
        }
    }

    pub async fn put_image_data(&self, image_data: ImageData, dx: f64, dy: f64) -> Result<(), DriverError> {
        self.put_image_data_dirty(image_data, dx, dy, None, None).await
    }

    /// Write only part of `image_data`. A missing position defaults to the
    /// origin and missing dimensions to the whole image.
    pub async fn put_image_data_dirty(
        &self,
        image_data: ImageData,
        dx: f64,
        dy: f64,
        dirty_pos: Option<(f64, f64)>,
        dirty_dims: Option<(f64, f64)>,
    ) -> Result<(), DriverError> {
        self.run(Command::SetImageData {
            image_data,
            dx,
            dy,
            dirty_pos,
            dirty_dims,
        })
        .await
    }

    // State stack

    pub async fn save(&mut self) -> Result<(), DriverError> {
        self.run(Command::Save {}).await?;
        self.saved.push(self.state.clone());
        Ok(())
    }

    pub async fn restore(&mut self) -> Result<(), DriverError> {
        self.run(Command::Restore {}).await?;
        if let Some(state) = self.saved.pop() {
            self.state = state;
        }
        Ok(())
    }

    /// Encode the bitmap. The host currently always answers with PNG.
    pub async fn to_data_url(&self, mime_type: &str, quality: Option<f64>) -> Result<String, DriverError> {
        match self
            .request(Command::ToDataUrl {
                mime_type: mime_type.to_string(),
                quality,
            })
            .await?
        {
            Response::DataUrl { data_url } => Ok(data_url),
            other => unexpected(other),
        }
    }
}

impl Drop for Canvas2d {
    fn drop(&mut self) {
        // Best effort: the host may already be gone.
        let _ = self
            .driver
            .send_detached(&self.id, Command::Destroy2DCanvas {});
    }
}
