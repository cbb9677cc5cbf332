//! The drawing side of canvas-relay.
//!
//! [`SurfaceBackend`] creates surfaces, and [`Surface2d`] is the 2D drawing
//! capability set the host's dispatcher drives. [`software::SoftwareBackend`]
//! implements both on top of `tiny-skia`.

pub mod font;
pub mod image;
pub mod matrix;
pub mod path;
pub mod software;
pub mod style;

use canvas_relay_core::SurfaceError;
use canvas_relay_core::config::{DEFAULT_MAX_SURFACE_PIXELS, HostConfig};
use canvas_relay_core::options::{
    ImageSmoothingQuality, LineCap, LineJoin, PatternRepetition, TextAlign, TextBaseline,
    TextDirection,
};
use canvas_relay_core::protocol::{ContextOptions, DomMatrix, ImageData, TextMetrics};

pub use matrix::Matrix;
pub use path::{Path2d, PathTarget};
pub use software::SoftwareBackend;

pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// What a backend lets the remote side allocate or read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendLimits {
    /// Largest width x height for a surface, an image data read or a decoded image.
    pub max_pixels: u64,
    /// Read `file://` image sources from the local filesystem.
    pub allow_file_images: bool,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_SURFACE_PIXELS,
            allow_file_images: false,
        }
    }
}

impl From<&HostConfig> for BackendLimits {
    fn from(config: &HostConfig) -> Self {
        Self {
            max_pixels: config.max_surface_pixels,
            allow_file_images: config.allow_file_images,
        }
    }
}

impl BackendLimits {
    /// Refuse a `width` x `height` bitmap before anything is allocated.
    pub fn check_area(&self, width: u64, height: u64) -> SurfaceResult<()> {
        match width.checked_mul(height) {
            Some(area) if area <= self.max_pixels => Ok(()),
            _ => Err(SurfaceError::TooLarge {
                width,
                height,
                max: self.max_pixels,
            }),
        }
    }
}

/// Rule deciding which regions a path encloses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

impl FillRule {
    pub fn from_even_odd(is_even_odd: bool) -> Self {
        if is_even_odd {
            Self::EvenOdd
        } else {
            Self::NonZero
        }
    }
}

/// The three forms of `drawImage`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawImageArgs {
    /// Draw at natural size with the top-left corner at `(dx, dy)`.
    At { dx: f64, dy: f64 },
    /// Draw scaled into the destination rectangle.
    Scaled { dx: f64, dy: f64, dw: f64, dh: f64 },
    /// Draw the source rectangle into the destination rectangle.
    Cropped {
        sx: f64,
        sy: f64,
        sw: f64,
        sh: f64,
        dx: f64,
        dy: f64,
        dw: f64,
        dh: f64,
    },
}

impl DrawImageArgs {
    /// Build from the optional groups carried on the wire.
    ///
    /// A source rectangle without destination dimensions draws at the source
    /// size.
    pub fn from_parts(
        source: Option<(f64, f64, f64, f64)>,
        dx: f64,
        dy: f64,
        d_dims: Option<(f64, f64)>,
    ) -> Self {
        match (source, d_dims) {
            (None, None) => Self::At { dx, dy },
            (None, Some((dw, dh))) => Self::Scaled { dx, dy, dw, dh },
            (Some((sx, sy, sw, sh)), dims) => {
                let (dw, dh) = dims.unwrap_or((sw, sh));
                Self::Cropped {
                    sx,
                    sy,
                    sw,
                    sh,
                    dx,
                    dy,
                    dw,
                    dh,
                }
            }
        }
    }
}

/// Sub-rectangle of an image to write in `putImageData`, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirtyRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DirtyRect {
    /// Fill in whichever half of the rectangle was omitted: the position
    /// defaults to the origin and the size to the whole image.
    pub fn from_parts(
        pos: Option<(f64, f64)>,
        dims: Option<(f64, f64)>,
        image: &ImageData,
    ) -> Option<Self> {
        if pos.is_none() && dims.is_none() {
            return None;
        }
        let (x, y) = pos.unwrap_or((0.0, 0.0));
        let (width, height) = dims.unwrap_or((image.width as f64, image.height as f64));
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }
}

/// Creates drawing surfaces.
pub trait SurfaceBackend: Send {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        options: &ContextOptions,
    ) -> SurfaceResult<Box<dyn Surface2d>>;
}

/// One 2D drawing surface with its own drawing state.
///
/// Coordinates are in CSS pixels. Drawing operations are affected by the
/// current transform, clip, global alpha and composite operation, except
/// [`Surface2d::put_image_data`] which writes raw pixels.
pub trait Surface2d: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Resize the bitmap. Clears its contents and resets the drawing state.
    fn set_width(&mut self, width: u32) -> SurfaceResult<()>;
    fn set_height(&mut self, height: u32) -> SurfaceResult<()>;

    // Line styles
    fn set_line_width(&mut self, width: f64) -> SurfaceResult<()>;
    fn set_line_cap(&mut self, cap: LineCap);
    fn set_line_join(&mut self, join: LineJoin);
    fn set_miter_limit(&mut self, limit: f64) -> SurfaceResult<()>;
    fn set_line_dash(&mut self, segments: Vec<f64>) -> SurfaceResult<()>;
    fn line_dash(&self) -> Vec<f64>;
    fn set_line_dash_offset(&mut self, offset: f64) -> SurfaceResult<()>;

    // Text styles
    fn set_font(&mut self, font: &str) -> SurfaceResult<()>;
    fn set_text_align(&mut self, align: TextAlign);
    fn set_text_baseline(&mut self, baseline: TextBaseline);
    fn set_direction(&mut self, direction: TextDirection);

    // Fill, stroke and compositing
    fn set_fill_style(&mut self, color: &str) -> SurfaceResult<()>;
    fn set_stroke_style(&mut self, color: &str) -> SurfaceResult<()>;
    fn set_shadow_blur(&mut self, blur: f64) -> SurfaceResult<()>;
    fn set_shadow_color(&mut self, color: &str) -> SurfaceResult<()>;
    fn set_shadow_offset_x(&mut self, offset: f64) -> SurfaceResult<()>;
    fn set_shadow_offset_y(&mut self, offset: f64) -> SurfaceResult<()>;
    fn set_global_alpha(&mut self, alpha: f64) -> SurfaceResult<()>;
    fn set_global_composite_operation(&mut self, operation: &str) -> SurfaceResult<()>;
    fn set_image_smoothing_enabled(&mut self, enabled: bool);
    fn set_image_smoothing_quality(&mut self, quality: Option<ImageSmoothingQuality>);
    fn set_filter(&mut self, filter: Option<&str>);

    /// The surface's own path, with the current transform applied to points
    /// as they are added.
    fn default_path(&mut self) -> PathTarget<'_>;
    /// Empty the default path.
    fn begin_path(&mut self);

    // Path painting. `None` means the default path.
    fn fill(&mut self, path: Option<&Path2d>, rule: FillRule) -> SurfaceResult<()>;
    fn stroke(&mut self, path: Option<&Path2d>) -> SurfaceResult<()>;
    fn clip(&mut self, path: Option<&Path2d>, rule: FillRule) -> SurfaceResult<()>;
    fn is_point_in_path(&self, path: Option<&Path2d>, x: f64, y: f64, rule: FillRule) -> bool;
    fn is_point_in_stroke(&self, path: Option<&Path2d>, x: f64, y: f64) -> bool;

    // Rectangles
    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> SurfaceResult<()>;
    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> SurfaceResult<()>;
    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> SurfaceResult<()>;

    // Text
    fn fill_text(&mut self, text: &str, x: f64, y: f64, max_width: Option<f64>)
    -> SurfaceResult<()>;
    fn stroke_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    ) -> SurfaceResult<()>;
    fn measure_text(&mut self, text: &str) -> SurfaceResult<TextMetrics>;

    // Gradients and patterns
    fn create_linear_gradient(
        &mut self,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        stops: &[(f64, String)],
    ) -> SurfaceResult<()>;
    #[allow(clippy::too_many_arguments)]
    fn create_radial_gradient(
        &mut self,
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
        stops: &[(f64, String)],
    ) -> SurfaceResult<()>;
    fn create_pattern(&mut self, url: &str, repetition: PatternRepetition) -> SurfaceResult<()>;

    // Transforms
    fn get_transform(&self) -> DomMatrix;
    fn rotate(&mut self, angle: f64);
    fn scale(&mut self, x: f64, y: f64);
    fn translate(&mut self, x: f64, y: f64);
    fn transform(&mut self, matrix: DomMatrix);
    fn set_transform(&mut self, matrix: DomMatrix);

    // Images and pixels
    fn draw_image(&mut self, url: &str, args: DrawImageArgs) -> SurfaceResult<()>;
    fn get_image_data(&self, sx: f64, sy: f64, sw: f64, sh: f64) -> SurfaceResult<ImageData>;
    fn put_image_data(
        &mut self,
        image: &ImageData,
        dx: f64,
        dy: f64,
        dirty: Option<DirtyRect>,
    ) -> SurfaceResult<()>;

    // State stack
    fn save(&mut self);
    fn restore(&mut self);

    fn to_data_url(&self, mime_type: &str, quality: Option<f64>) -> SurfaceResult<String>;
}
