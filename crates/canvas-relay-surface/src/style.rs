//! Drawing state and style value parsing.

use canvas_relay_core::SurfaceError;
use canvas_relay_core::options::{
    ImageSmoothingQuality, LineCap, LineJoin, TextAlign, TextBaseline, TextDirection,
};
use tiny_skia::{BlendMode, Color, FilterQuality};

use crate::SurfaceResult;
use crate::font::FontSpec;
use crate::matrix::Matrix;

/// Current clipping region.
#[derive(Clone, Default)]
pub enum ClipRegion {
    #[default]
    Unclipped,
    Mask(tiny_skia::ClipMask),
    /// The clip excludes every pixel.
    Nothing,
}

impl ClipRegion {
    pub fn mask(&self) -> Option<&tiny_skia::ClipMask> {
        match self {
            Self::Mask(mask) => Some(mask),
            _ => None,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }
}

/// Everything `save()` pushes and `restore()` pops.
#[derive(Clone)]
pub struct DrawingState {
    pub fill_color: Color,
    pub stroke_color: Color,
    pub line_width: f64,
    pub line_cap: LineCap,
    pub line_join: LineJoin,
    pub miter_limit: f64,
    pub line_dash: Vec<f64>,
    pub line_dash_offset: f64,
    pub font: FontSpec,
    pub text_align: TextAlign,
    pub text_baseline: TextBaseline,
    pub direction: TextDirection,
    pub shadow_blur: f64,
    pub shadow_color: Color,
    pub shadow_offset_x: f64,
    pub shadow_offset_y: f64,
    pub global_alpha: f64,
    pub composite: BlendMode,
    pub image_smoothing_enabled: bool,
    pub image_smoothing_quality: ImageSmoothingQuality,
    pub filter: Option<String>,
    pub transform: Matrix,
    pub clip: ClipRegion,
}

impl Default for DrawingState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            line_dash: Vec::new(),
            line_dash_offset: 0.0,
            font: FontSpec::default(),
            text_align: TextAlign::Start,
            text_baseline: TextBaseline::Alphabetic,
            direction: TextDirection::Inherit,
            shadow_blur: 0.0,
            shadow_color: Color::TRANSPARENT,
            shadow_offset_x: 0.0,
            shadow_offset_y: 0.0,
            global_alpha: 1.0,
            composite: BlendMode::SourceOver,
            image_smoothing_enabled: true,
            image_smoothing_quality: ImageSmoothingQuality::Low,
            filter: None,
            transform: Matrix::identity(),
            clip: ClipRegion::Unclipped,
        }
    }
}

impl DrawingState {
    pub fn paint_with(&self, color: Color) -> tiny_skia::Paint<'static> {
        let mut color = color;
        color.apply_opacity(self.global_alpha as f32);
        let mut paint = tiny_skia::Paint::default();
        paint.set_color(color);
        paint.anti_alias = true;
        paint.blend_mode = self.composite;
        paint
    }

    pub fn fill_paint(&self) -> tiny_skia::Paint<'static> {
        self.paint_with(self.fill_color)
    }

    pub fn stroke_paint(&self) -> tiny_skia::Paint<'static> {
        self.paint_with(self.stroke_color)
    }

    /// Stroke settings in user space. Odd-length dash lists are repeated to
    /// make them even.
    pub fn stroke(&self) -> tiny_skia::Stroke {
        let dash = if self.line_dash.is_empty() || self.line_dash.iter().all(|d| *d == 0.0) {
            None
        } else {
            let mut intervals: Vec<f32> = self.line_dash.iter().map(|d| *d as f32).collect();
            if intervals.len() % 2 == 1 {
                intervals.extend_from_within(..);
            }
            tiny_skia::StrokeDash::new(intervals, self.line_dash_offset as f32)
        };
        tiny_skia::Stroke {
            width: self.line_width as f32,
            miter_limit: self.miter_limit as f32,
            line_cap: match self.line_cap {
                LineCap::Butt => tiny_skia::LineCap::Butt,
                LineCap::Round => tiny_skia::LineCap::Round,
                LineCap::Square => tiny_skia::LineCap::Square,
            },
            line_join: match self.line_join {
                LineJoin::Miter => tiny_skia::LineJoin::Miter,
                LineJoin::Round => tiny_skia::LineJoin::Round,
                LineJoin::Bevel => tiny_skia::LineJoin::Bevel,
            },
            dash,
        }
    }

    pub fn filter_quality(&self) -> FilterQuality {
        if !self.image_smoothing_enabled {
            return FilterQuality::Nearest;
        }
        match self.image_smoothing_quality {
            ImageSmoothingQuality::Low | ImageSmoothingQuality::Medium => FilterQuality::Bilinear,
            ImageSmoothingQuality::High => FilterQuality::Bicubic,
        }
    }
}

/// Parse a CSS colour string.
pub fn parse_color(value: &str) -> SurfaceResult<Color> {
    let parsed = csscolorparser::parse(value.trim())
        .map_err(|e| SurfaceError::InvalidArgument(format!("invalid color {value:?}: {e}")))?;
    Color::from_rgba(
        parsed.r as f32,
        parsed.g as f32,
        parsed.b as f32,
        parsed.a as f32,
    )
    .ok_or_else(|| SurfaceError::InvalidArgument(format!("color out of range: {value:?}")))
}

/// Map a `globalCompositeOperation` keyword to a blend mode.
pub fn parse_composite(value: &str) -> SurfaceResult<BlendMode> {
    let mode = match value.trim().to_ascii_lowercase().as_str() {
        "source-over" => BlendMode::SourceOver,
        "source-in" => BlendMode::SourceIn,
        "source-out" => BlendMode::SourceOut,
        "source-atop" => BlendMode::SourceAtop,
        "destination-over" => BlendMode::DestinationOver,
        "destination-in" => BlendMode::DestinationIn,
        "destination-out" => BlendMode::DestinationOut,
        "destination-atop" => BlendMode::DestinationAtop,
        "lighter" => BlendMode::Plus,
        "copy" => BlendMode::Source,
        "xor" => BlendMode::Xor,
        "multiply" => BlendMode::Multiply,
        "screen" => BlendMode::Screen,
        "overlay" => BlendMode::Overlay,
        "darken" => BlendMode::Darken,
        "lighten" => BlendMode::Lighten,
        "color-dodge" => BlendMode::ColorDodge,
        "color-burn" => BlendMode::ColorBurn,
        "hard-light" => BlendMode::HardLight,
        "soft-light" => BlendMode::SoftLight,
        "difference" => BlendMode::Difference,
        "exclusion" => BlendMode::Exclusion,
        "hue" => BlendMode::Hue,
        "saturation" => BlendMode::Saturation,
        "color" => BlendMode::Color,
        "luminosity" => BlendMode::Luminosity,
        _ => {
            return Err(SurfaceError::InvalidArgument(format!(
                "unknown composite operation {value:?}"
            )));
        }
    };
    Ok(mode)
}

/// Reject NaN, infinities and (optionally) negative values.
pub fn check_number(name: &str, value: f64, allow_negative: bool) -> SurfaceResult<f64> {
    if !value.is_finite() {
        return Err(SurfaceError::InvalidArgument(format!(
            "{name} must be finite, got {value}"
        )));
    }
    if !allow_negative && value < 0.0 {
        return Err(SurfaceError::InvalidArgument(format!(
            "{name} must not be negative, got {value}"
        )));
    }
    Ok(value)
}

pub fn check_line_dash(segments: &[f64]) -> SurfaceResult<()> {
    for value in segments {
        check_number("line dash entry", *value, false)?;
    }
    Ok(())
}

/// Validate gradient color stops: offsets in `[0, 1]` and parseable colors.
pub fn check_gradient_stops(stops: &[(f64, String)]) -> SurfaceResult<Vec<tiny_skia::GradientStop>> {
    stops
        .iter()
        .map(|(offset, color)| {
            if !(0.0..=1.0).contains(offset) {
                return Err(SurfaceError::IndexSize(format!(
                    "gradient stop offset {offset} outside [0, 1]"
                )));
            }
            Ok(tiny_skia::GradientStop::new(*offset as f32, parse_color(color)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color_formats() {
        let red = parse_color("red").unwrap();
        assert_eq!(red.to_color_u8().red(), 255);
        assert_eq!(red.to_color_u8().alpha(), 255);

        let c = parse_color("#00ff0080").unwrap();
        assert_eq!(c.to_color_u8().green(), 255);
        assert_eq!(c.to_color_u8().alpha(), 128);

        let c = parse_color("rgba(0, 0, 255, 0.5)").unwrap();
        assert_eq!(c.to_color_u8().blue(), 255);

        assert!(parse_color("not-a-color").is_err());
    }

    #[test]
    fn test_parse_composite() {
        assert_eq!(parse_composite("source-over").unwrap(), BlendMode::SourceOver);
        assert_eq!(parse_composite("copy").unwrap(), BlendMode::Source);
        assert_eq!(parse_composite("lighter").unwrap(), BlendMode::Plus);
        assert!(parse_composite("sideways").is_err());
    }

    #[test]
    fn test_check_number() {
        assert!(check_number("width", 2.0, false).is_ok());
        assert!(check_number("width", -1.0, false).is_err());
        assert!(check_number("offset", -1.0, true).is_ok());
        assert!(check_number("width", f64::NAN, true).is_err());
        assert!(check_line_dash(&[1.0, -2.0]).is_err());
    }

    #[test]
    fn test_odd_dash_is_doubled_for_stroking() {
        let state = DrawingState {
            line_dash: vec![1.0, 2.0, 3.0],
            ..Default::default()
        };
        assert!(state.stroke().dash.is_some());
        assert_eq!(state.line_dash, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_gradient_stop_range() {
        assert!(check_gradient_stops(&[(0.0, "red".into()), (1.0, "blue".into())]).is_ok());
        assert!(matches!(
            check_gradient_stops(&[(1.5, "red".into())]),
            Err(SurfaceError::IndexSize(_))
        ));
    }
}
