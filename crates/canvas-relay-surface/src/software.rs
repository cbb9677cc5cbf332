//! A [`Surface2d`] implementation that rasterizes into a `tiny-skia` pixmap.

use std::sync::Arc;

use canvas_relay_core::SurfaceError;
use canvas_relay_core::options::{
    ImageSmoothingQuality, LineCap, LineJoin, PatternRepetition, TextAlign, TextBaseline,
    TextDirection,
};
use canvas_relay_core::protocol::{
    ContextOptions, DomMatrix, ImageData, TextMetrics, pack_pixel, unpack_pixel,
};
use tiny_skia::{
    BlendMode, ClipMask, Color, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint,
    PremultipliedColorU8,
};
use tracing::debug;

use crate::font::{FontLibrary, FontSpec, TextLayout};
use crate::image::{ImageCache, png_data_url};
use crate::matrix::Matrix;
use crate::path::{Path2d, PathTarget};
use crate::style::{self, ClipRegion, DrawingState};
use crate::{
    BackendLimits, DirtyRect, DrawImageArgs, FillRule, Surface2d, SurfaceBackend, SurfaceResult,
};

/// Creates [`SoftwareSurface`]s sharing one font library and image cache.
pub struct SoftwareBackend {
    fonts: Arc<FontLibrary>,
    images: ImageCache,
}

impl SoftwareBackend {
    /// Backend using the fonts installed on this machine.
    pub fn new() -> Self {
        Self::with_fonts(FontLibrary::with_system_fonts())
    }

    /// Backend with no fonts; text operations fail.
    pub fn without_system_fonts() -> Self {
        Self::with_fonts(FontLibrary::empty())
    }

    pub fn with_fonts(fonts: FontLibrary) -> Self {
        Self {
            fonts: Arc::new(fonts),
            images: ImageCache::default(),
        }
    }

    /// Replace the default limits. Starts a fresh image cache.
    pub fn with_limits(mut self, limits: BackendLimits) -> Self {
        self.images = ImageCache::new(limits);
        self
    }

    pub fn limits(&self) -> BackendLimits {
        self.images.limits()
    }

    /// Whether any font face is available for text commands.
    pub fn has_fonts(&self) -> bool {
        self.fonts.face_count() > 0
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceBackend for SoftwareBackend {
    fn create_surface(
        &self,
        width: u32,
        height: u32,
        options: &ContextOptions,
    ) -> SurfaceResult<Box<dyn Surface2d>> {
        let surface =
            SoftwareSurface::new(width, height, *options, self.fonts.clone(), self.images.clone())?;
        Ok(Box::new(surface))
    }
}

pub struct SoftwareSurface {
    pixmap: Pixmap,
    options: ContextOptions,
    limits: BackendLimits,
    state: DrawingState,
    stack: Vec<DrawingState>,
    path: Path2d,
    fonts: Arc<FontLibrary>,
    images: ImageCache,
}

fn allocate(
    width: u32,
    height: u32,
    options: &ContextOptions,
    limits: BackendLimits,
) -> SurfaceResult<Pixmap> {
    limits.check_area(width as u64, height as u64)?;
    let mut pixmap =
        Pixmap::new(width, height).ok_or(SurfaceError::InvalidDimensions { width, height })?;
    if !options.alpha {
        pixmap.fill(Color::BLACK);
    }
    Ok(pixmap)
}

fn skia_rule(rule: FillRule) -> tiny_skia::FillRule {
    match rule {
        FillRule::NonZero => tiny_skia::FillRule::Winding,
        FillRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
    }
}

fn finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

fn rect_path(x: f64, y: f64, width: f64, height: f64) -> Option<tiny_skia::Path> {
    let (x0, y0) = (x as f32, y as f32);
    let (x1, y1) = ((x + width) as f32, (y + height) as f32);
    let mut pb = PathBuilder::new();
    pb.move_to(x0, y0);
    pb.line_to(x1, y0);
    pb.line_to(x1, y1);
    pb.line_to(x0, y1);
    pb.close();
    pb.finish()
}

/// Turn a negative extent into a positive one anchored at the other edge.
fn normalize(origin: f64, extent: f64) -> (f64, f64) {
    if extent < 0.0 {
        (origin + extent, -extent)
    } else {
        (origin, extent)
    }
}

fn premultiply([r, g, b, a]: [u8; 4]) -> PremultipliedColorU8 {
    let scale = |v: u8| ((v as u32 * a as u32 + 127) / 255) as u8;
    PremultipliedColorU8::from_rgba(scale(r), scale(g), scale(b), a)
        .unwrap_or(PremultipliedColorU8::TRANSPARENT)
}

/// A glyph coverage mask tinted with `color`.
fn glyph_pixmap(coverage: &[u8], width: usize, height: usize, color: Color) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(width as u32, height as u32)?;
    let c = color.to_color_u8();
    for (px, cov) in pixmap.pixels_mut().iter_mut().zip(coverage) {
        let alpha = ((c.alpha() as u32 * *cov as u32 + 127) / 255) as u8;
        *px = premultiply([c.red(), c.green(), c.blue(), alpha]);
    }
    Some(pixmap)
}

impl SoftwareSurface {
    pub fn new(
        width: u32,
        height: u32,
        options: ContextOptions,
        fonts: Arc<FontLibrary>,
        images: ImageCache,
    ) -> SurfaceResult<Self> {
        let limits = images.limits();
        Ok(Self {
            pixmap: allocate(width, height, &options, limits)?,
            options,
            limits,
            state: DrawingState::default(),
            stack: Vec::new(),
            path: Path2d::new(),
            fonts,
            images,
        })
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    fn resize(&mut self, width: u32, height: u32) -> SurfaceResult<()> {
        self.pixmap = allocate(width, height, &self.options, self.limits)?;
        self.state = DrawingState::default();
        self.stack.clear();
        self.path.clear();
        Ok(())
    }

    fn fill_skia_path(&mut self, path: &tiny_skia::Path, paint: &Paint<'_>, rule: FillRule, m: Matrix) {
        if self.state.clip.is_nothing() {
            return;
        }
        self.pixmap
            .fill_path(path, paint, skia_rule(rule), m.to_skia(), self.state.clip.mask());
    }

    fn stroke_skia_path(&mut self, path: &tiny_skia::Path) {
        if self.state.clip.is_nothing() {
            return;
        }
        let paint = self.state.stroke_paint();
        let stroke = self.state.stroke();
        self.pixmap.stroke_path(
            path,
            &paint,
            &stroke,
            self.state.transform.to_skia(),
            self.state.clip.mask(),
        );
    }

    fn text_align_offset(&self, width: f64) -> f64 {
        let rtl = self.state.direction == TextDirection::Rtl;
        match self.state.text_align {
            TextAlign::Left => 0.0,
            TextAlign::Right => -width,
            TextAlign::Center => -width / 2.0,
            TextAlign::Start if rtl => -width,
            TextAlign::Start => 0.0,
            TextAlign::End if rtl => 0.0,
            TextAlign::End => -width,
        }
    }

    fn draw_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        max_width: Option<f64>,
        color: Color,
    ) -> SurfaceResult<()> {
        if !finite(&[x, y]) {
            return Ok(());
        }
        if let Some(max) = max_width {
            if !max.is_finite() || max <= 0.0 {
                return Ok(());
            }
        }
        let font = self.fonts.resolve(&self.state.font)?;
        if self.state.clip.is_nothing() {
            return Ok(());
        }

        let px = self.state.font.size_px;
        let layout = TextLayout::new(&font, text, px);
        let scale_x = match max_width {
            Some(max) if layout.width > max => max / layout.width,
            _ => 1.0,
        };
        let offset = self.text_align_offset(layout.width * scale_x);
        let shift = layout.baseline_shift(self.state.text_baseline);
        let origin = self
            .state
            .transform
            .concat(&Matrix::translation(x + offset, y + shift))
            .concat(&Matrix::scaling(scale_x, 1.0));

        for glyph in &layout.glyphs {
            let metrics = font.metrics(glyph.ch, px as f32);
            self.limits
                .check_area(metrics.width as u64, metrics.height as u64)?;
        }

        let paint = PixmapPaint {
            opacity: self.state.global_alpha as f32,
            blend_mode: self.state.composite,
            quality: FilterQuality::Bilinear,
        };
        for glyph in &layout.glyphs {
            let (metrics, coverage) = font.rasterize(glyph.ch, px as f32);
            let Some(bitmap) = glyph_pixmap(&coverage, metrics.width, metrics.height, color) else {
                continue;
            };
            let top = -(metrics.ymin as f64 + metrics.height as f64);
            let at = origin.concat(&Matrix::translation(glyph.pen_x + metrics.xmin as f64, top));
            self.pixmap.draw_pixmap(
                0,
                0,
                bitmap.as_ref(),
                &paint,
                at.to_skia(),
                self.state.clip.mask(),
            );
        }
        Ok(())
    }

    /// Source pixels covering `[x0, x1) x [y0, y1)` of `image`, rounded to whole pixels.
    fn crop(image: &Pixmap, x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Pixmap> {
        let cx = x0.round().max(0.0) as u32;
        let cy = y0.round().max(0.0) as u32;
        let cw = (x1.round() as u32).min(image.width()).saturating_sub(cx).max(1);
        let ch = (y1.round() as u32).min(image.height()).saturating_sub(cy).max(1);
        if cx >= image.width() || cy >= image.height() {
            return None;
        }
        let cw = cw.min(image.width() - cx);
        let ch = ch.min(image.height() - cy);
        let mut out = Pixmap::new(cw, ch)?;
        let src = image.pixels();
        let stride = image.width() as usize;
        for (row, dst) in out.pixels_mut().chunks_exact_mut(cw as usize).enumerate() {
            let start = (cy as usize + row) * stride + cx as usize;
            dst.copy_from_slice(&src[start..start + cw as usize]);
        }
        Some(out)
    }
}

impl Surface2d for SoftwareSurface {
    fn width(&self) -> u32 {
        self.pixmap.width()
    }

    fn height(&self) -> u32 {
        self.pixmap.height()
    }

    fn set_width(&mut self, width: u32) -> SurfaceResult<()> {
        let height = self.height();
        self.resize(width, height)
    }

    fn set_height(&mut self, height: u32) -> SurfaceResult<()> {
        let width = self.width();
        self.resize(width, height)
    }

    fn set_line_width(&mut self, width: f64) -> SurfaceResult<()> {
        self.state.line_width = style::check_number("line width", width, false)?;
        Ok(())
    }

    fn set_line_cap(&mut self, cap: LineCap) {
        self.state.line_cap = cap;
    }

    fn set_line_join(&mut self, join: LineJoin) {
        self.state.line_join = join;
    }

    fn set_miter_limit(&mut self, limit: f64) -> SurfaceResult<()> {
        self.state.miter_limit = style::check_number("miter limit", limit, false)?;
        Ok(())
    }

    fn set_line_dash(&mut self, segments: Vec<f64>) -> SurfaceResult<()> {
        style::check_line_dash(&segments)?;
        self.state.line_dash = segments;
        Ok(())
    }

    fn line_dash(&self) -> Vec<f64> {
        self.state.line_dash.clone()
    }

    fn set_line_dash_offset(&mut self, offset: f64) -> SurfaceResult<()> {
        self.state.line_dash_offset = style::check_number("line dash offset", offset, true)?;
        Ok(())
    }

    fn set_font(&mut self, font: &str) -> SurfaceResult<()> {
        self.state.font = FontSpec::parse(font)?;
        Ok(())
    }

    fn set_text_align(&mut self, align: TextAlign) {
        self.state.text_align = align;
    }

    fn set_text_baseline(&mut self, baseline: TextBaseline) {
        self.state.text_baseline = baseline;
    }

    fn set_direction(&mut self, direction: TextDirection) {
        self.state.direction = direction;
    }

    fn set_fill_style(&mut self, color: &str) -> SurfaceResult<()> {
        self.state.fill_color = style::parse_color(color)?;
        Ok(())
    }

    fn set_stroke_style(&mut self, color: &str) -> SurfaceResult<()> {
        self.state.stroke_color = style::parse_color(color)?;
        Ok(())
    }

    fn set_shadow_blur(&mut self, blur: f64) -> SurfaceResult<()> {
        self.state.shadow_blur = style::check_number("shadow blur", blur, false)?;
        Ok(())
    }

    fn set_shadow_color(&mut self, color: &str) -> SurfaceResult<()> {
        self.state.shadow_color = style::parse_color(color)?;
        Ok(())
    }

    fn set_shadow_offset_x(&mut self, offset: f64) -> SurfaceResult<()> {
        self.state.shadow_offset_x = style::check_number("shadow offset", offset, true)?;
        Ok(())
    }

    fn set_shadow_offset_y(&mut self, offset: f64) -> SurfaceResult<()> {
        self.state.shadow_offset_y = style::check_number("shadow offset", offset, true)?;
        Ok(())
    }

    fn set_global_alpha(&mut self, alpha: f64) -> SurfaceResult<()> {
        let alpha = style::check_number("global alpha", alpha, false)?;
        if alpha > 1.0 {
            return Err(SurfaceError::InvalidArgument(format!(
                "global alpha must be within [0, 1], got {alpha}"
            )));
        }
        self.state.global_alpha = alpha;
        Ok(())
    }

    fn set_global_composite_operation(&mut self, operation: &str) -> SurfaceResult<()> {
        self.state.composite = style::parse_composite(operation)?;
        Ok(())
    }

    fn set_image_smoothing_enabled(&mut self, enabled: bool) {
        self.state.image_smoothing_enabled = enabled;
    }

    fn set_image_smoothing_quality(&mut self, quality: Option<ImageSmoothingQuality>) {
        self.state.image_smoothing_quality = quality.unwrap_or(ImageSmoothingQuality::Low);
    }

    fn set_filter(&mut self, filter: Option<&str>) {
        self.state.filter = filter
            .map(str::trim)
            .filter(|f| !f.is_empty() && !f.eq_ignore_ascii_case("none"))
            .map(str::to_string);
    }

    fn default_path(&mut self) -> PathTarget<'_> {
        PathTarget::new(&mut self.path, self.state.transform)
    }

    fn begin_path(&mut self) {
        self.path.clear();
    }

    fn fill(&mut self, path: Option<&Path2d>, rule: FillRule) -> SurfaceResult<()> {
        // The default path is already in device space; named paths are not.
        let (skia_path, m) = match path {
            Some(p) => (p.to_skia(), self.state.transform),
            None => (self.path.to_skia(), Matrix::identity()),
        };
        if let Some(skia_path) = skia_path {
            let paint = self.state.fill_paint();
            self.fill_skia_path(&skia_path, &paint, rule, m);
        }
        Ok(())
    }

    fn stroke(&mut self, path: Option<&Path2d>) -> SurfaceResult<()> {
        // Stroke in user space so line width and dashes scale with the transform.
        let skia_path = match path {
            Some(p) => p.to_skia(),
            None => match self.state.transform.invert() {
                Some(inverse) => self.path.transformed(&inverse).to_skia(),
                None => None,
            },
        };
        if let Some(skia_path) = skia_path {
            self.stroke_skia_path(&skia_path);
        }
        Ok(())
    }

    fn clip(&mut self, path: Option<&Path2d>, rule: FillRule) -> SurfaceResult<()> {
        let device = match path {
            Some(p) => p.transformed(&self.state.transform),
            None => self.path.clone(),
        };
        let (width, height) = (self.width(), self.height());
        let visible = device.to_skia().filter(|p| {
            let b = p.bounds();
            b.right() > 0.0 && b.bottom() > 0.0 && b.left() < width as f32 && b.top() < height as f32
        });
        let Some(skia_path) = visible else {
            self.state.clip = ClipRegion::Nothing;
            return Ok(());
        };

        if let ClipRegion::Mask(mask) = &mut self.state.clip {
            mask.intersect_path(&skia_path, skia_rule(rule), true);
        } else if !self.state.clip.is_nothing() {
            let mut mask = ClipMask::new();
            mask.set_path(width, height, &skia_path, skia_rule(rule), true);
            self.state.clip = ClipRegion::Mask(mask);
        }
        Ok(())
    }

    fn is_point_in_path(&self, path: Option<&Path2d>, x: f64, y: f64, rule: FillRule) -> bool {
        if !finite(&[x, y]) {
            return false;
        }
        match path {
            Some(p) => p.transformed(&self.state.transform).contains(x, y, rule),
            None => self.path.contains(x, y, rule),
        }
    }

    fn is_point_in_stroke(&self, path: Option<&Path2d>, x: f64, y: f64) -> bool {
        if !finite(&[x, y]) {
            return false;
        }
        let half_width = self.state.line_width / 2.0 * self.state.transform.mean_scale();
        match path {
            Some(p) => p
                .transformed(&self.state.transform)
                .stroke_contains(x, y, half_width),
            None => self.path.stroke_contains(x, y, half_width),
        }
    }

    fn clear_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> SurfaceResult<()> {
        if !finite(&[x, y, width, height]) {
            return Ok(());
        }
        let Some(path) = rect_path(x, y, width, height) else {
            return Ok(());
        };
        let mut paint = Paint::default();
        if self.options.alpha {
            paint.blend_mode = BlendMode::Clear;
        } else {
            paint.set_color(Color::BLACK);
            paint.blend_mode = BlendMode::Source;
        }
        let m = self.state.transform;
        self.fill_skia_path(&path, &paint, FillRule::NonZero, m);
        Ok(())
    }

    fn fill_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> SurfaceResult<()> {
        if !finite(&[x, y, width, height]) {
            return Ok(());
        }
        if let Some(path) = rect_path(x, y, width, height) {
            let paint = self.state.fill_paint();
            let m = self.state.transform;
            self.fill_skia_path(&path, &paint, FillRule::NonZero, m);
        }
        Ok(())
    }

    fn stroke_rect(&mut self, x: f64, y: f64, width: f64, height: f64) -> SurfaceResult<()> {
        if !finite(&[x, y, width, height]) || (width == 0.0 && height == 0.0) {
            return Ok(());
        }
        if let Some(path) = rect_path(x, y, width, height) {
            self.stroke_skia_path(&path);
        }
        Ok(())
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, max_width: Option<f64>) -> SurfaceResult<()> {
        let color = self.state.fill_color;
        self.draw_text(text, x, y, max_width, color)
    }

    fn stroke_text(
        &mut self,
        text: &str,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    ) -> SurfaceResult<()> {
        let color = self.state.stroke_color;
        self.draw_text(text, x, y, max_width, color)
    }

    fn measure_text(&mut self, text: &str) -> SurfaceResult<TextMetrics> {
        let font = self.fonts.resolve(&self.state.font)?;
        let px = self.state.font.size_px;
        let layout = TextLayout::new(&font, text, px);
        let offset = self.text_align_offset(layout.width);
        let shift = layout.baseline_shift(self.state.text_baseline);
        Ok(layout.metrics(offset, shift, px))
    }

    fn create_linear_gradient(
        &mut self,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        stops: &[(f64, String)],
    ) -> SurfaceResult<()> {
        if !finite(&[x0, y0, x1, y1]) {
            return Err(SurfaceError::InvalidArgument(
                "gradient coordinates must be finite".into(),
            ));
        }
        style::check_gradient_stops(stops)?;
        Ok(())
    }

    fn create_radial_gradient(
        &mut self,
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
        stops: &[(f64, String)],
    ) -> SurfaceResult<()> {
        if !finite(&[x0, y0, r0, x1, y1, r1]) {
            return Err(SurfaceError::InvalidArgument(
                "gradient coordinates must be finite".into(),
            ));
        }
        if r0 < 0.0 || r1 < 0.0 {
            return Err(SurfaceError::IndexSize(format!(
                "negative gradient radius ({r0}, {r1})"
            )));
        }
        style::check_gradient_stops(stops)?;
        Ok(())
    }

    fn create_pattern(&mut self, url: &str, repetition: PatternRepetition) -> SurfaceResult<()> {
        let ready = self.images.get(url)?.is_some();
        debug!(url_len = url.len(), %repetition, ready, "Pattern validated");
        Ok(())
    }

    fn get_transform(&self) -> DomMatrix {
        self.state.transform.to_array()
    }

    fn rotate(&mut self, angle: f64) {
        if angle.is_finite() {
            self.state.transform = self.state.transform.concat(&Matrix::rotation(angle));
        }
    }

    fn scale(&mut self, x: f64, y: f64) {
        if finite(&[x, y]) {
            self.state.transform = self.state.transform.concat(&Matrix::scaling(x, y));
        }
    }

    fn translate(&mut self, x: f64, y: f64) {
        if finite(&[x, y]) {
            self.state.transform = self.state.transform.concat(&Matrix::translation(x, y));
        }
    }

    fn transform(&mut self, matrix: DomMatrix) {
        let m = Matrix::from_array(matrix);
        if m.is_finite() {
            self.state.transform = self.state.transform.concat(&m);
        }
    }

    fn set_transform(&mut self, matrix: DomMatrix) {
        let m = Matrix::from_array(matrix);
        if m.is_finite() {
            self.state.transform = m;
        }
    }

    fn draw_image(&mut self, url: &str, args: DrawImageArgs) -> SurfaceResult<()> {
        let Some(image) = self.images.get(url)? else {
            debug!("Image still loading, draw skipped");
            return Ok(());
        };
        let (iw, ih) = (image.width() as f64, image.height() as f64);
        let (sx, sy, sw, sh, dx, dy, dw, dh) = match args {
            DrawImageArgs::At { dx, dy } => (0.0, 0.0, iw, ih, dx, dy, iw, ih),
            DrawImageArgs::Scaled { dx, dy, dw, dh } => (0.0, 0.0, iw, ih, dx, dy, dw, dh),
            DrawImageArgs::Cropped {
                sx,
                sy,
                sw,
                sh,
                dx,
                dy,
                dw,
                dh,
            } => (sx, sy, sw, sh, dx, dy, dw, dh),
        };
        if !finite(&[sx, sy, sw, sh, dx, dy, dw, dh]) || self.state.clip.is_nothing() {
            return Ok(());
        }
        let (sx, sw) = normalize(sx, sw);
        let (sy, sh) = normalize(sy, sh);
        let (dx, dw) = normalize(dx, dw);
        let (dy, dh) = normalize(dy, dh);
        if sw == 0.0 || sh == 0.0 || dw == 0.0 || dh == 0.0 {
            return Ok(());
        }

        // Clip the source rectangle to the image and shrink the destination to match.
        let (x0, y0) = (sx.max(0.0), sy.max(0.0));
        let (x1, y1) = ((sx + sw).min(iw), (sy + sh).min(ih));
        if x1 <= x0 || y1 <= y0 {
            return Ok(());
        }
        let (kx, ky) = (dw / sw, dh / sh);
        let dest_x = dx + (x0 - sx) * kx;
        let dest_y = dy + (y0 - sy) * ky;

        let whole = x0 == 0.0 && y0 == 0.0 && x1 == iw && y1 == ih;
        let cropped;
        let source = if whole {
            Pixmap::as_ref(&image)
        } else {
            match Self::crop(&image, x0, y0, x1, y1) {
                Some(p) => {
                    cropped = p;
                    cropped.as_ref()
                }
                None => return Ok(()),
            }
        };

        let m = self
            .state
            .transform
            .concat(&Matrix::translation(dest_x, dest_y))
            .concat(&Matrix::scaling(
                (x1 - x0) * kx / source.width() as f64,
                (y1 - y0) * ky / source.height() as f64,
            ));
        let paint = PixmapPaint {
            opacity: self.state.global_alpha as f32,
            blend_mode: self.state.composite,
            quality: self.state.filter_quality(),
        };
        self.pixmap
            .draw_pixmap(0, 0, source, &paint, m.to_skia(), self.state.clip.mask());
        Ok(())
    }

    fn get_image_data(&self, sx: f64, sy: f64, sw: f64, sh: f64) -> SurfaceResult<ImageData> {
        if !finite(&[sx, sy, sw, sh]) {
            return Err(SurfaceError::InvalidArgument(
                "image data rectangle must be finite".into(),
            ));
        }
        if sw == 0.0 || sh == 0.0 {
            return Err(SurfaceError::IndexSize(format!(
                "source width and height must be non-zero, got {sw}x{sh}"
            )));
        }
        let (sx, sw) = normalize(sx, sw);
        let (sy, sh) = normalize(sy, sh);
        let (x0, y0) = (sx.floor() as i64, sy.floor() as i64);
        // Float to integer casts saturate, so the area check sees the real size.
        let (w, h) = (sw.ceil() as u64, sh.ceil() as u64);
        self.limits.check_area(w, h)?;
        let too_large = || SurfaceError::TooLarge {
            width: w,
            height: h,
            max: self.limits.max_pixels,
        };
        let width = u32::try_from(w).map_err(|_| too_large())?;
        let height = u32::try_from(h).map_err(|_| too_large())?;

        let (sw_px, sh_px) = (self.width() as i64, self.height() as i64);
        let pixels = self.pixmap.pixels();
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height as i64 {
            let y = y0.saturating_add(row);
            for col in 0..width as i64 {
                let x = x0.saturating_add(col);
                if x < 0 || y < 0 || x >= sw_px || y >= sh_px {
                    data.push(0);
                    continue;
                }
                let c = pixels[(y * sw_px + x) as usize].demultiply();
                let alpha = if self.options.alpha { c.alpha() } else { 255 };
                data.push(pack_pixel([c.red(), c.green(), c.blue(), alpha]));
            }
        }
        Ok(ImageData {
            data,
            width,
            height,
        })
    }

    fn put_image_data(
        &mut self,
        image: &ImageData,
        dx: f64,
        dy: f64,
        dirty: Option<DirtyRect>,
    ) -> SurfaceResult<()> {
        if image.data.len() != image.width as usize * image.height as usize {
            return Err(SurfaceError::InvalidArgument(format!(
                "image data holds {} pixels, expected {}",
                image.data.len(),
                image.width as usize * image.height as usize
            )));
        }
        if !finite(&[dx, dy]) {
            return Err(SurfaceError::InvalidArgument(
                "destination must be finite".into(),
            ));
        }

        let dirty = dirty.unwrap_or(DirtyRect {
            x: 0.0,
            y: 0.0,
            width: image.width as f64,
            height: image.height as f64,
        });
        if !finite(&[dirty.x, dirty.y, dirty.width, dirty.height]) {
            return Err(SurfaceError::InvalidArgument("dirty rectangle must be finite".into()));
        }
        let (rx, rw) = normalize(dirty.x, dirty.width);
        let (ry, rh) = normalize(dirty.y, dirty.height);
        let x_start = rx.max(0.0).floor() as i64;
        let y_start = ry.max(0.0).floor() as i64;
        let x_end = (rx + rw).min(image.width as f64).ceil() as i64;
        let y_end = (ry + rh).min(image.height as f64).ceil() as i64;

        let (ox, oy) = (dx.trunc() as i64, dy.trunc() as i64);
        let (width, height) = (self.width() as i64, self.height() as i64);
        let opaque = !self.options.alpha;
        let pixels = self.pixmap.pixels_mut();
        for iy in y_start..y_end {
            for ix in x_start..x_end {
                let (tx, ty) = (ox + ix, oy + iy);
                if tx < 0 || ty < 0 || tx >= width || ty >= height {
                    continue;
                }
                let mut rgba = unpack_pixel(image.data[(iy * image.width as i64 + ix) as usize]);
                if opaque {
                    rgba[3] = 255;
                }
                pixels[(ty * width + tx) as usize] = premultiply(rgba);
            }
        }
        Ok(())
    }

    fn save(&mut self) {
        self.stack.push(self.state.clone());
    }

    fn restore(&mut self) {
        if let Some(state) = self.stack.pop() {
            self.state = state;
        }
    }

    fn to_data_url(&self, mime_type: &str, quality: Option<f64>) -> SurfaceResult<String> {
        if !mime_type.eq_ignore_ascii_case("image/png") {
            debug!(mime_type, ?quality, "Unsupported export type, encoding PNG");
        }
        let png = self
            .pixmap
            .encode_png()
            .map_err(|e| SurfaceError::Encoding(e.to_string()))?;
        Ok(png_data_url(&png))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const RED: u32 = 0xFF00_00FF;

    fn surface(width: u32, height: u32) -> SoftwareSurface {
        surface_with(width, height, ContextOptions::default())
    }

    fn surface_with(width: u32, height: u32, options: ContextOptions) -> SoftwareSurface {
        SoftwareSurface::new(
            width,
            height,
            options,
            Arc::new(FontLibrary::empty()),
            ImageCache::default(),
        )
        .unwrap()
    }

    fn pixel(s: &SoftwareSurface, x: f64, y: f64) -> u32 {
        s.get_image_data(x, y, 1.0, 1.0).unwrap().data[0]
    }

    #[test]
    fn test_zero_size_surface_is_rejected() {
        let err = SoftwareSurface::new(
            0,
            10,
            ContextOptions::default(),
            Arc::new(FontLibrary::empty()),
            ImageCache::default(),
        )
        .err()
        .unwrap();
        assert_eq!(err, SurfaceError::InvalidDimensions { width: 0, height: 10 });
    }

    #[test]
    fn test_oversized_surface_is_refused() {
        let backend = SoftwareBackend::without_system_fonts();
        let err = backend
            .create_surface(400_000, 400_000, &ContextOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, SurfaceError::TooLarge { width: 400_000, .. }));

        let small = SoftwareBackend::without_system_fonts().with_limits(BackendLimits {
            max_pixels: 100,
            ..Default::default()
        });
        assert!(small.create_surface(10, 10, &ContextOptions::default()).is_ok());
        assert!(small.create_surface(11, 10, &ContextOptions::default()).is_err());
    }

    #[test]
    fn test_oversized_reads_and_resizes_are_refused() {
        let mut s = surface(4, 4);
        s.set_fill_style("red").unwrap();
        s.fill_rect(0.0, 0.0, 4.0, 4.0).unwrap();

        for (sw, sh) in [(1e6, 1e6), (1e30, 1.0), (-1e12, 2.0)] {
            assert!(
                matches!(s.get_image_data(0.0, 0.0, sw, sh), Err(SurfaceError::TooLarge { .. })),
                "{sw}x{sh}"
            );
        }
        assert!(matches!(s.set_width(400_000), Err(SurfaceError::TooLarge { .. })));
        assert!(matches!(s.set_height(u32::MAX), Err(SurfaceError::TooLarge { .. })));

        // A refused resize leaves the bitmap alone.
        assert_eq!((s.width(), s.height()), (4, 4));
        assert_eq!(pixel(&s, 1.0, 1.0), RED);
    }

    #[test]
    fn test_far_away_image_data_is_transparent() {
        let s = surface(4, 4);
        let image = s.get_image_data(1e300, -1e300, 2.0, 2.0).unwrap();
        assert_eq!(image.data, vec![0; 4]);
    }

    #[test]
    fn test_fill_rect_paints_pixels() {
        let mut s = surface(300, 150);
        s.set_fill_style("red").unwrap();
        s.fill_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(pixel(&s, 5.0, 5.0), RED);
        assert_eq!(pixel(&s, 50.0, 50.0), 0);
    }

    #[test]
    fn test_clear_rect_on_opaque_surface_paints_black() {
        let mut s = surface_with(
            20,
            20,
            ContextOptions {
                alpha: false,
                desynchronized: false,
            },
        );
        assert_eq!(pixel(&s, 1.0, 1.0), 0xFF00_0000);
        s.set_fill_style("white").unwrap();
        s.fill_rect(0.0, 0.0, 20.0, 20.0).unwrap();
        s.clear_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(pixel(&s, 5.0, 5.0), 0xFF00_0000);
        assert_eq!(pixel(&s, 15.0, 15.0), 0xFFFF_FFFF);
    }

    #[test]
    fn test_clear_rect_makes_transparent() {
        let mut s = surface(20, 20);
        s.fill_rect(0.0, 0.0, 20.0, 20.0).unwrap();
        s.clear_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(pixel(&s, 5.0, 5.0), 0);
        assert_eq!(pixel(&s, 15.0, 15.0), 0xFF00_0000);
    }

    #[test]
    fn test_default_path_uses_transform_at_insert_time() {
        let mut s = surface(100, 100);
        s.translate(50.0, 0.0);
        s.default_path().rect(0.0, 0.0, 10.0, 10.0);
        s.set_transform([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(s.is_point_in_path(None, 55.0, 5.0, FillRule::NonZero));
        assert!(!s.is_point_in_path(None, 5.0, 5.0, FillRule::NonZero));
    }

    #[test]
    fn test_named_path_uses_transform_at_paint_time() {
        let mut s = surface(100, 100);
        let mut named = Path2d::new();
        PathTarget::untransformed(&mut named).rect(0.0, 0.0, 10.0, 10.0);
        s.translate(50.0, 0.0);
        assert!(s.is_point_in_path(Some(&named), 55.0, 5.0, FillRule::NonZero));
        s.set_fill_style("red").unwrap();
        s.fill(Some(&named), FillRule::NonZero).unwrap();
        assert_eq!(pixel(&s, 55.0, 5.0), RED);
        assert_eq!(pixel(&s, 5.0, 5.0), 0);
    }

    #[test]
    fn test_is_point_in_stroke_tests_the_outline() {
        let mut s = surface(100, 100);
        s.default_path().rect(10.0, 10.0, 50.0, 50.0);
        s.set_line_width(4.0).unwrap();
        assert!(s.is_point_in_stroke(None, 10.0, 30.0));
        assert!(s.is_point_in_stroke(None, 11.5, 30.0));
        // Inside the fill but far from the outline.
        assert!(!s.is_point_in_stroke(None, 35.0, 35.0));
        assert!(s.is_point_in_path(None, 35.0, 35.0, FillRule::NonZero));
    }

    #[test]
    fn test_stroke_draws_outline_only() {
        let mut s = surface(100, 100);
        s.set_stroke_style("red").unwrap();
        s.set_line_width(4.0).unwrap();
        s.default_path().rect(10.0, 10.0, 50.0, 50.0);
        s.stroke(None).unwrap();
        assert_eq!(pixel(&s, 10.0, 30.0), RED);
        assert_eq!(pixel(&s, 35.0, 35.0), 0);
    }

    #[test]
    fn test_clip_restricts_painting() {
        let mut s = surface(100, 100);
        s.default_path().rect(0.0, 0.0, 50.0, 100.0);
        s.clip(None, FillRule::NonZero).unwrap();
        s.set_fill_style("red").unwrap();
        s.fill_rect(0.0, 0.0, 100.0, 100.0).unwrap();
        assert_eq!(pixel(&s, 25.0, 50.0), RED);
        assert_eq!(pixel(&s, 75.0, 50.0), 0);
    }

    #[test]
    fn test_save_restore_state_and_clip() {
        let mut s = surface(100, 100);
        s.save();
        s.set_fill_style("red").unwrap();
        s.translate(10.0, 10.0);
        s.default_path().rect(0.0, 0.0, 5.0, 5.0);
        s.clip(None, FillRule::NonZero).unwrap();
        s.restore();
        assert_eq!(s.get_transform(), [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        s.fill_rect(50.0, 50.0, 10.0, 10.0).unwrap();
        // Black fill and no clip after restore.
        assert_eq!(pixel(&s, 55.0, 55.0), 0xFF00_0000);
        // Restoring with an empty stack is a no-op.
        s.restore();
    }

    #[test]
    fn test_transform_composition() {
        let mut s = surface(10, 10);
        s.scale(2.0, 3.0);
        s.translate(1.0, 1.0);
        assert_eq!(s.get_transform(), [2.0, 0.0, 0.0, 3.0, 2.0, 3.0]);
        s.rotate(PI / 2.0);
        let [a, b, c, d, _, _] = s.get_transform();
        assert!(a.abs() < 1e-12 && (b - 3.0).abs() < 1e-12);
        assert!((c + 2.0).abs() < 1e-12 && d.abs() < 1e-12);
        s.set_transform([1.0, 0.0, 0.0, 1.0, 0.0, f64::NAN]);
        assert!((s.get_transform()[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_image_data_round_trip() {
        let mut s = surface(10, 10);
        let image = ImageData {
            data: vec![RED, 0xFF00_FF00, 0xFFFF_0000, 0xFFFF_FFFF],
            width: 2,
            height: 2,
        };
        s.put_image_data(&image, 3.0, 4.0, None).unwrap();
        assert_eq!(s.get_image_data(3.0, 4.0, 2.0, 2.0).unwrap(), image);
    }

    #[test]
    fn test_put_image_data_dirty_rect() {
        let mut s = surface(10, 10);
        let image = ImageData {
            data: vec![RED; 4],
            width: 2,
            height: 2,
        };
        let dirty = DirtyRect {
            x: 1.0,
            y: 0.0,
            width: 1.0,
            height: 2.0,
        };
        s.put_image_data(&image, 0.0, 0.0, Some(dirty)).unwrap();
        assert_eq!(pixel(&s, 0.0, 0.0), 0);
        assert_eq!(pixel(&s, 1.0, 0.0), RED);
        assert_eq!(pixel(&s, 1.0, 1.0), RED);
    }

    #[test]
    fn test_get_image_data_edges() {
        let mut s = surface(4, 4);
        s.set_fill_style("red").unwrap();
        s.fill_rect(0.0, 0.0, 4.0, 4.0).unwrap();

        let err = s.get_image_data(0.0, 0.0, 0.0, 2.0).unwrap_err();
        assert!(matches!(err, SurfaceError::IndexSize(_)));

        // Outside pixels read as transparent black.
        let data = s.get_image_data(3.0, 3.0, 2.0, 1.0).unwrap();
        assert_eq!(data.data, vec![RED, 0]);

        // Negative sizes flip the rectangle.
        let flipped = s.get_image_data(4.0, 4.0, -2.0, -2.0).unwrap();
        assert_eq!((flipped.width, flipped.height), (2, 2));
        assert!(flipped.data.iter().all(|px| *px == RED));
    }

    #[test]
    fn test_draw_image_from_data_url() {
        let mut src = Pixmap::new(2, 2).unwrap();
        src.fill(Color::from_rgba8(0, 0, 255, 255));
        let url = png_data_url(&src.encode_png().unwrap());

        let mut s = surface(20, 20);
        s.draw_image(&url, DrawImageArgs::At { dx: 5.0, dy: 5.0 }).unwrap();
        assert_eq!(pixel(&s, 5.0, 5.0), 0xFFFF_0000);
        assert_eq!(pixel(&s, 8.0, 8.0), 0);

        s.draw_image(
            &url,
            DrawImageArgs::Scaled {
                dx: 10.0,
                dy: 10.0,
                dw: 8.0,
                dh: 8.0,
            },
        )
        .unwrap();
        assert_eq!(pixel(&s, 16.0, 16.0), 0xFFFF_0000);
    }

    #[test]
    fn test_draw_image_unsupported_source() {
        let mut s = surface(10, 10);
        let err = s
            .draw_image("gopher://x", DrawImageArgs::At { dx: 0.0, dy: 0.0 })
            .unwrap_err();
        assert!(matches!(err, SurfaceError::UnsupportedSource(_)));
    }

    #[test]
    fn test_to_data_url_is_png() {
        let s = surface(3, 3);
        assert!(s.to_data_url("image/png", None).unwrap().starts_with("data:image/png;base64,"));
        assert!(s.to_data_url("image/jpeg", Some(0.5)).unwrap().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_set_width_resets_bitmap_and_state() {
        let mut s = surface(10, 10);
        s.set_fill_style("red").unwrap();
        s.fill_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        s.translate(3.0, 3.0);
        s.set_width(20).unwrap();
        assert_eq!((s.width(), s.height()), (20, 10));
        assert_eq!(pixel(&s, 5.0, 5.0), 0);
        assert_eq!(s.get_transform(), [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(matches!(
            s.set_height(0),
            Err(SurfaceError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_line_dash_is_kept_as_set() {
        let mut s = surface(10, 10);
        s.set_line_dash(vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s.line_dash(), vec![1.0, 2.0, 3.0]);
        assert!(s.set_line_dash(vec![1.0, -1.0]).is_err());
        assert_eq!(s.line_dash(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_strict_style_values() {
        let mut s = surface(10, 10);
        assert!(s.set_fill_style("blurple").is_err());
        assert!(s.set_line_width(-1.0).is_err());
        assert!(s.set_line_width(f64::INFINITY).is_err());
        assert!(s.set_global_alpha(1.5).is_err());
        assert!(s.set_global_composite_operation("sideways").is_err());
        assert!(s.set_font("enormous").is_err());
        assert!(s.set_font("bold 16px monospace").is_ok());
    }

    #[test]
    fn test_text_without_fonts_fails() {
        let mut s = surface(10, 10);
        assert!(matches!(
            s.fill_text("hi", 0.0, 5.0, None),
            Err(SurfaceError::FontUnavailable(_))
        ));
        assert!(matches!(
            s.measure_text("hi"),
            Err(SurfaceError::FontUnavailable(_))
        ));
    }

    #[test]
    fn test_gradients_validate_arguments() {
        let mut s = surface(10, 10);
        let stops = vec![(0.0, "red".to_string()), (1.0, "blue".to_string())];
        assert!(s.create_linear_gradient(0.0, 0.0, 10.0, 0.0, &stops).is_ok());
        assert!(matches!(
            s.create_radial_gradient(0.0, 0.0, -1.0, 5.0, 5.0, 5.0, &stops),
            Err(SurfaceError::IndexSize(_))
        ));
        let bad = vec![(0.5, "nope".to_string())];
        assert!(s.create_linear_gradient(0.0, 0.0, 1.0, 1.0, &bad).is_err());
    }

    #[test]
    fn test_backend_creates_independent_surfaces() {
        let backend = SoftwareBackend::without_system_fonts();
        let mut a = backend
            .create_surface(10, 10, &ContextOptions::default())
            .unwrap();
        let b = backend
            .create_surface(10, 10, &ContextOptions::default())
            .unwrap();
        a.fill_rect(0.0, 0.0, 10.0, 10.0).unwrap();
        assert_eq!(a.get_image_data(1.0, 1.0, 1.0, 1.0).unwrap().data[0], 0xFF00_0000);
        assert_eq!(b.get_image_data(1.0, 1.0, 1.0, 1.0).unwrap().data[0], 0);
    }
}
