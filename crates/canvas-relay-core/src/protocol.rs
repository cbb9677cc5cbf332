//! canvas-relay wire protocol.
//!
//! All traffic is JSON text frames over one WebSocket connection:
//!
//! ```text
//! driver -> host : { "data": { "<Tag>": {..} }, "context": <surface id>, "txn_uuid": <token> }
//! host -> driver : { "data": { "<Tag>": {..} }, "txn_uuid": <token> }
//! ```
//!
//! The correlation token is chosen by the driver and echoed verbatim; the
//! host never interprets it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Identifier of a surface session, assigned by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(pub String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of a path sub-resource, scoped to one surface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(pub String);

impl PathId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque request token. Any JSON value is accepted and echoed unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub serde_json::Value);

impl CorrelationId {
    pub fn new(token: impl Into<serde_json::Value>) -> Self {
        Self(token.into())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// Row-major 2D affine matrix `[a, b, c, d, e, f]`.
pub type DomMatrix = [f64; 6];

/// Options supplied when a surface is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    /// When false the surface is opaque and starts out black.
    #[serde(default = "default_true")]
    pub alpha: bool,
    #[serde(default)]
    pub desynchronized: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            alpha: true,
            desynchronized: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Text measurement result, using the browser's field names on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMetrics {
    pub width: f64,
    pub actual_bounding_box_left: f64,
    pub actual_bounding_box_right: f64,
    pub font_bounding_box_ascent: f64,
    pub font_bounding_box_descent: f64,
    pub actual_bounding_box_ascent: f64,
    pub actual_bounding_box_descent: f64,
    pub em_height_ascent: f64,
    pub em_height_descent: f64,
    pub hanging_baseline: f64,
    pub alphabetic_baseline: f64,
    pub ideographic_baseline: f64,
}

/// Pixel data exchanged as one packed `u32` per pixel.
///
/// Each element holds the bytes R, G, B, A in little-endian order, so opaque
/// red is `0xFF0000FF`. Pixels are stored row by row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageData {
    pub data: Vec<u32>,
    pub width: u32,
    pub height: u32,
}

impl ImageData {
    /// Pack an RGBA8 byte buffer into one element per pixel.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Self {
        let data = rgba
            .chunks_exact(4)
            .map(|px| pack_pixel([px[0], px[1], px[2], px[3]]))
            .collect();
        Self {
            data,
            width,
            height,
        }
    }

    /// Unpack into four 8-bit channels per pixel.
    pub fn to_rgba(&self) -> Vec<u8> {
        self.data.iter().flat_map(|px| unpack_pixel(*px)).collect()
    }

    /// Check that the payload holds exactly `width * height` pixels.
    pub fn validate(&self) -> Result<(), CommandError> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .unwrap_or(usize::MAX);
        if self.data.len() != expected {
            return Err(CommandError::MalformedImageData {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

pub fn pack_pixel(rgba: [u8; 4]) -> u32 {
    u32::from_le_bytes(rgba)
}

pub fn unpack_pixel(pixel: u32) -> [u8; 4] {
    pixel.to_le_bytes()
}

/// Every command the surface host understands.
///
/// Enumerated options are carried as strings and parsed by the host so that
/// out-of-range values produce a proper error instead of a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Init2DCanvas {
        #[serde(default)]
        data: ContextOptions,
        width: u32,
        height: u32,
    },
    Destroy2DCanvas {},
    MeasureText {
        text: String,
    },
    SetLineWidth {
        line_width: f64,
    },
    SetLineCap {
        line_cap: String,
    },
    SetLineJoin {
        line_join: String,
    },
    SetMiterLimit {
        miter_limit: f64,
    },
    GetLineDash {},
    SetLineDash {
        line_dash: Vec<f64>,
    },
    SetLineDashOffset {
        line_dash_offset: f64,
    },
    SetFont {
        font: String,
    },
    SetTextAlign {
        text_align: String,
    },
    SetTextBaseline {
        text_baseline: String,
    },
    SetTextDirection {
        text_direction: String,
    },
    SetFillStyle {
        fill_style: String,
    },
    SetStrokeStyle {
        stroke_style: String,
    },
    SetShadowBlur {
        shadow_blur: f64,
    },
    SetShadowColor {
        shadow_color: String,
    },
    SetShadowOffsetX {
        shadow_offset_x: f64,
    },
    SetShadowOffsetY {
        shadow_offset_y: f64,
    },
    SetGlobalAlpha {
        global_alpha: f64,
    },
    SetGlobalCompositeOperation {
        global_composite_operation: String,
    },
    SetImageSmoothingEnabled {
        image_smoothing_enabled: bool,
    },
    SetImageSmoothingQuality {
        image_smoothing_quality: Option<String>,
    },
    SetFilter {
        filter: Option<String>,
    },
    SetWidth {
        width: u32,
    },
    SetHeight {
        height: u32,
    },
    ClearRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    FillRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    StrokeRect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    FillText {
        text: String,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    },
    StrokeText {
        text: String,
        x: f64,
        y: f64,
        max_width: Option<f64>,
    },
    CreateLinearGradient {
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        stops: Vec<(f64, String)>,
    },
    CreateRadialGradient {
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
        stops: Vec<(f64, String)>,
    },
    CreatePattern {
        url: String,
        #[serde(rename = "repitition", alias = "repetition")]
        repetition: String,
    },
    BeginPath {
        path_uuid: Option<PathId>,
    },
    ClosePath {
        path_uuid: Option<PathId>,
    },
    MoveTo {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
    },
    LineTo {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
    },
    BezierCurveTo {
        path_uuid: Option<PathId>,
        cp1x: f64,
        cp1y: f64,
        cp2x: f64,
        cp2y: f64,
        x: f64,
        y: f64,
    },
    QuadraticCurveTo {
        path_uuid: Option<PathId>,
        cpx: f64,
        cpy: f64,
        x: f64,
        y: f64,
    },
    Arc {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        #[serde(default)]
        anticlockwise: bool,
    },
    ArcTo {
        path_uuid: Option<PathId>,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        radius: f64,
    },
    Ellipse {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        #[serde(default)]
        anticlockwise: bool,
    },
    Rect {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    Fill {
        path_uuid: Option<PathId>,
        #[serde(default)]
        is_even_odd: bool,
    },
    Stroke {
        path_uuid: Option<PathId>,
    },
    Clip {
        path_uuid: Option<PathId>,
        #[serde(default)]
        is_even_odd: bool,
    },
    IsPointInPath {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
        #[serde(default)]
        is_even_odd: bool,
    },
    IsPointInStroke {
        path_uuid: Option<PathId>,
        x: f64,
        y: f64,
    },
    GetTransform {},
    Rotate {
        angle: f64,
    },
    Scale {
        x: f64,
        y: f64,
    },
    Translate {
        x: f64,
        y: f64,
    },
    Transform {
        matrix: DomMatrix,
    },
    SetTransform {
        matrix: DomMatrix,
    },
    DrawImage {
        url: String,
        /// `(sx, sy, s_width, s_height)`
        source: Option<(f64, f64, f64, f64)>,
        dx: f64,
        dy: f64,
        /// `(d_width, d_height)`
        d_dims: Option<(f64, f64)>,
    },
    GetImageData {
        sx: f64,
        sy: f64,
        sw: f64,
        sh: f64,
    },
    SetImageData {
        image_data: ImageData,
        dx: f64,
        dy: f64,
        dirty_pos: Option<(f64, f64)>,
        dirty_dims: Option<(f64, f64)>,
    },
    Save {},
    Restore {},
    ToDataUrl {
        mime_type: String,
        quality: Option<f64>,
    },
}

impl Command {
    /// Decode the `data` member of an inbound frame.
    ///
    /// `data` must be an object with exactly one key, the command tag. An
    /// unrecognized tag is [`CommandError::UnknownCommand`]; a known tag with
    /// a payload of the wrong shape is [`CommandError::MalformedCommand`].
    pub fn from_value(data: serde_json::Value) -> Result<Self, CommandError> {
        let tag = match &data {
            serde_json::Value::Object(map) if map.len() == 1 => {
                map.keys().next().cloned().unwrap_or_default()
            }
            serde_json::Value::Object(map) => {
                return Err(CommandError::MalformedCommand(format!(
                    "expected exactly one command tag, found {}",
                    map.len()
                )));
            }
            other => {
                return Err(CommandError::MalformedCommand(format!(
                    "expected a tagged command object, found {other}"
                )));
            }
        };

        serde_json::from_value(data).map_err(|e| {
            // serde reports an unrecognized externally tagged variant as
            // "unknown variant `Tag`, expected one of ..."
            if e.to_string().starts_with("unknown variant") {
                CommandError::UnknownCommand(tag.clone())
            } else {
                CommandError::MalformedCommand(format!("{tag}: {e}"))
            }
        })
    }
}

/// Every response the surface host sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    JsError { message: String },
    Success {},
    MeasureText { text_metrics: TextMetrics },
    LineDash { line_dash: Vec<f64> },
    IsPointIn { is_in: bool },
    Transform { matrix: DomMatrix },
    ImageData { image_data: ImageData },
    DataUrl { data_url: String },
}

impl Response {
    pub fn success() -> Self {
        Self::Success {}
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::JsError { .. } => "JsError",
            Self::Success {} => "Success",
            Self::MeasureText { .. } => "MeasureText",
            Self::LineDash { .. } => "LineDash",
            Self::IsPointIn { .. } => "IsPointIn",
            Self::Transform { .. } => "Transform",
            Self::ImageData { .. } => "ImageData",
            Self::DataUrl { .. } => "DataUrl",
        }
    }
}

/// A command as sent by the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandFrame {
    pub data: Command,
    pub context: SurfaceId,
    pub txn_uuid: CorrelationId,
}

/// An inbound frame before its command payload has been decoded.
///
/// Decoding happens in two steps so that a bad command can still be answered
/// with an error carrying the right correlation id.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommandFrame {
    pub data: serde_json::Value,
    #[serde(default)]
    pub context: Option<SurfaceId>,
    pub txn_uuid: CorrelationId,
}

/// A response as sent by the surface host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub data: Response,
    pub txn_uuid: CorrelationId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_tagged_command() {
        let cmd = Command::from_value(json!({
            "FillRect": { "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0 }
        }))
        .unwrap();
        assert_eq!(
            cmd,
            Command::FillRect {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0
            }
        );
    }

    #[test]
    fn test_decode_empty_payload_variants() {
        assert_eq!(
            Command::from_value(json!({ "Destroy2DCanvas": {} })).unwrap(),
            Command::Destroy2DCanvas {}
        );
        assert_eq!(
            Command::from_value(json!({ "BeginPath": { "path_uuid": null } })).unwrap(),
            Command::BeginPath { path_uuid: None }
        );
        assert_eq!(
            Command::from_value(json!({ "BeginPath": {} })).unwrap(),
            Command::BeginPath { path_uuid: None }
        );
    }

    #[test]
    fn test_unknown_tag_is_unknown_command() {
        let err = Command::from_value(json!({ "Teleport": {} })).unwrap_err();
        assert!(matches!(err, CommandError::UnknownCommand(tag) if tag == "Teleport"));
    }

    #[test]
    fn test_bad_payload_is_malformed() {
        let err = Command::from_value(json!({ "FillRect": { "x": "left" } })).unwrap_err();
        assert!(matches!(err, CommandError::MalformedCommand(_)));

        let err = Command::from_value(json!({})).unwrap_err();
        assert!(matches!(err, CommandError::MalformedCommand(_)));

        let err = Command::from_value(json!("FillRect")).unwrap_err();
        assert!(matches!(err, CommandError::MalformedCommand(_)));
    }

    #[test]
    fn test_pattern_accepts_both_spellings() {
        let legacy = Command::from_value(json!({
            "CreatePattern": { "url": "data:,", "repitition": "Repeat" }
        }))
        .unwrap();
        let fixed = Command::from_value(json!({
            "CreatePattern": { "url": "data:,", "repetition": "Repeat" }
        }))
        .unwrap();
        assert_eq!(legacy, fixed);
    }

    #[test]
    fn test_init_defaults_to_alpha_surface() {
        let cmd = Command::from_value(json!({
            "Init2DCanvas": { "width": 300, "height": 150 }
        }))
        .unwrap();
        match cmd {
            Command::Init2DCanvas { data, width, height } => {
                assert!(data.alpha);
                assert_eq!((width, height), (300, 150));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_response_frame_shape() {
        let frame = ResponseFrame {
            data: Response::success(),
            txn_uuid: CorrelationId::new("t-1"),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({ "data": { "Success": {} }, "txn_uuid": "t-1" }));
    }

    #[test]
    fn test_text_metrics_use_browser_field_names() {
        let value = serde_json::to_value(TextMetrics::default()).unwrap();
        assert!(value.get("actualBoundingBoxLeft").is_some());
        assert!(value.get("fontBoundingBoxAscent").is_some());
    }

    #[test]
    fn test_image_data_packing() {
        let image = ImageData::from_rgba(2, 1, &[255, 0, 0, 255, 0, 0, 255, 128]);
        assert_eq!(image.data, vec![0xFF00_00FF, 0x80FF_0000]);
        assert_eq!(image.to_rgba(), vec![255, 0, 0, 255, 0, 0, 255, 128]);
    }

    #[test]
    fn test_image_data_validate() {
        let good = ImageData {
            data: vec![0; 6],
            width: 3,
            height: 2,
        };
        assert!(good.validate().is_ok());

        let bad = ImageData {
            data: vec![0; 5],
            width: 3,
            height: 2,
        };
        assert!(matches!(
            bad.validate(),
            Err(CommandError::MalformedImageData {
                expected: 6,
                actual: 5
            })
        ));
    }
}
