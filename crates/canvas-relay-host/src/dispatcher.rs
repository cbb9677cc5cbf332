//! Decodes inbound frames, routes each command to its surface and encodes
//! the reply.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tracing::{debug, warn};

use canvas_relay_core::options::{
    ImageSmoothingQuality, LineCap, LineJoin, PatternRepetition, TextAlign, TextBaseline,
    TextDirection,
};
use canvas_relay_core::protocol::{RawCommandFrame, ResponseFrame};
use canvas_relay_core::{Command, CommandError, Response, SurfaceError, SurfaceId};
use canvas_relay_surface::{DirtyRect, DrawImageArgs, FillRule, Surface2d, SurfaceBackend};

use crate::registry::ResourceRegistry;

/// Executes commands against the resource registry.
///
/// Frames are handled strictly one at a time, in arrival order.
pub struct Dispatcher {
    registry: ResourceRegistry,
}

impl Dispatcher {
    pub fn new(backend: Box<dyn SurfaceBackend>) -> Self {
        Self {
            registry: ResourceRegistry::new(backend),
        }
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Handle one text frame and return the encoded reply, if any.
    ///
    /// Frames that are not JSON or carry no correlation id cannot be answered
    /// and are dropped. `Destroy2DCanvas` is never answered.
    pub fn handle_frame(&mut self, text: &str) -> Option<String> {
        let frame: RawCommandFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return None;
            }
        };
        let RawCommandFrame {
            data,
            context,
            txn_uuid,
        } = frame;

        let response = self.dispatch(context, data)?;
        if let Response::JsError { message } = &response {
            debug!(txn = %txn_uuid, %message, "Command failed");
        }

        let reply = ResponseFrame {
            data: response,
            txn_uuid,
        };
        match serde_json::to_string(&reply) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "Failed to encode response");
                None
            }
        }
    }

    /// Decode and execute a command payload addressed to `context`.
    pub fn dispatch(&mut self, context: Option<SurfaceId>, data: Value) -> Option<Response> {
        let tag = command_tag(&data);
        let outcome = Command::from_value(data).and_then(|command| {
            let context = context
                .ok_or_else(|| CommandError::MalformedCommand(format!("{tag}: missing context")))?;
            debug!(surface = %context, command = %tag, "Dispatching");
            self.execute_guarded(&context, command)
        });
        match outcome {
            Ok(response) => response,
            Err(e) => Some(Response::JsError {
                message: e.to_string(),
            }),
        }
    }

    /// Run `execute`, turning a panic inside the surface into an error.
    fn execute_guarded(
        &mut self,
        context: &SurfaceId,
        command: Command,
    ) -> Result<Option<Response>, CommandError> {
        match catch_unwind(AssertUnwindSafe(|| self.execute(context, command))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(surface = %context, %reason, "Surface panicked while executing command");
                Err(SurfaceError::Panicked(reason).into())
            }
        }
    }

    fn surface(&mut self, id: &SurfaceId) -> Result<&mut dyn Surface2d, CommandError> {
        Ok(self.registry.resolve_surface(id)?.surface.as_mut())
    }

    fn execute(
        &mut self,
        id: &SurfaceId,
        command: Command,
    ) -> Result<Option<Response>, CommandError> {
        let response = match command {
            Command::Init2DCanvas {
                data,
                width,
                height,
            } => {
                self.registry
                    .create_surface(id.clone(), width, height, &data)?;
                Response::success()
            }
            Command::Destroy2DCanvas {} => {
                self.registry.destroy_surface(id);
                return Ok(None);
            }
            Command::MeasureText { text } => Response::MeasureText {
                text_metrics: self.surface(id)?.measure_text(&text)?,
            },

            // Line styles
            Command::SetLineWidth { line_width } => {
                self.surface(id)?.set_line_width(line_width)?;
                Response::success()
            }
            Command::SetLineCap { line_cap } => {
                let surface = self.surface(id)?;
                surface.set_line_cap(LineCap::parse(&line_cap)?);
                Response::success()
            }
            Command::SetLineJoin { line_join } => {
                let surface = self.surface(id)?;
                surface.set_line_join(LineJoin::parse(&line_join)?);
                Response::success()
            }
            Command::SetMiterLimit { miter_limit } => {
                self.surface(id)?.set_miter_limit(miter_limit)?;
                Response::success()
            }
            Command::GetLineDash {} => Response::LineDash {
                line_dash: self.surface(id)?.line_dash(),
            },
            Command::SetLineDash { line_dash } => {
                let surface = self.surface(id)?;
                surface.set_line_dash(line_dash)?;
                Response::LineDash {
                    line_dash: surface.line_dash(),
                }
            }
            Command::SetLineDashOffset { line_dash_offset } => {
                self.surface(id)?.set_line_dash_offset(line_dash_offset)?;
                Response::success()
            }

            // Text styles
            Command::SetFont { font } => {
                self.surface(id)?.set_font(&font)?;
                Response::success()
            }
            Command::SetTextAlign { text_align } => {
                let surface = self.surface(id)?;
                surface.set_text_align(TextAlign::parse(&text_align)?);
                Response::success()
            }
            Command::SetTextBaseline { text_baseline } => {
                let surface = self.surface(id)?;
                surface.set_text_baseline(TextBaseline::parse(&text_baseline)?);
                Response::success()
            }
            Command::SetTextDirection { text_direction } => {
                let surface = self.surface(id)?;
                surface.set_direction(TextDirection::parse(&text_direction)?);
                Response::success()
            }

            // Fill, stroke and compositing
            Command::SetFillStyle { fill_style } => {
                self.surface(id)?.set_fill_style(&fill_style)?;
                Response::success()
            }
            Command::SetStrokeStyle { stroke_style } => {
                self.surface(id)?.set_stroke_style(&stroke_style)?;
                Response::success()
            }
            Command::SetShadowBlur { shadow_blur } => {
                self.surface(id)?.set_shadow_blur(shadow_blur)?;
                Response::success()
            }
            Command::SetShadowColor { shadow_color } => {
                self.surface(id)?.set_shadow_color(&shadow_color)?;
                Response::success()
            }
            Command::SetShadowOffsetX { shadow_offset_x } => {
                self.surface(id)?.set_shadow_offset_x(shadow_offset_x)?;
                Response::success()
            }
            Command::SetShadowOffsetY { shadow_offset_y } => {
                self.surface(id)?.set_shadow_offset_y(shadow_offset_y)?;
                Response::success()
            }
            Command::SetGlobalAlpha { global_alpha } => {
                self.surface(id)?.set_global_alpha(global_alpha)?;
                Response::success()
            }
            Command::SetGlobalCompositeOperation {
                global_composite_operation,
            } => {
                self.surface(id)?
                    .set_global_composite_operation(&global_composite_operation)?;
                Response::success()
            }
            Command::SetImageSmoothingEnabled {
                image_smoothing_enabled,
            } => {
                self.surface(id)?
                    .set_image_smoothing_enabled(image_smoothing_enabled);
                Response::success()
            }
            Command::SetImageSmoothingQuality {
                image_smoothing_quality,
            } => {
                let surface = self.surface(id)?;
                let quality = image_smoothing_quality
                    .as_deref()
                    .map(ImageSmoothingQuality::parse)
                    .transpose()?;
                surface.set_image_smoothing_quality(quality);
                Response::success()
            }
            Command::SetFilter { filter } => {
                self.surface(id)?.set_filter(filter.as_deref());
                Response::success()
            }

            // Dimensions
            Command::SetWidth { width } => {
                self.surface(id)?.set_width(width)?;
                Response::success()
            }
            Command::SetHeight { height } => {
                self.surface(id)?.set_height(height)?;
                Response::success()
            }

            // Rectangles and text
            Command::ClearRect {
                x,
                y,
                width,
                height,
            } => {
                self.surface(id)?.clear_rect(x, y, width, height)?;
                Response::success()
            }
            Command::FillRect {
                x,
                y,
                width,
                height,
            } => {
                self.surface(id)?.fill_rect(x, y, width, height)?;
                Response::success()
            }
            Command::StrokeRect {
                x,
                y,
                width,
                height,
            } => {
                self.surface(id)?.stroke_rect(x, y, width, height)?;
                Response::success()
            }
            Command::FillText {
                text,
                x,
                y,
                max_width,
            } => {
                self.surface(id)?.fill_text(&text, x, y, max_width)?;
                Response::success()
            }
            Command::StrokeText {
                text,
                x,
                y,
                max_width,
            } => {
                self.surface(id)?.stroke_text(&text, x, y, max_width)?;
                Response::success()
            }

            // Gradients and patterns
            Command::CreateLinearGradient {
                x0,
                y0,
                x1,
                y1,
                stops,
            } => {
                self.surface(id)?
                    .create_linear_gradient(x0, y0, x1, y1, &stops)?;
                Response::success()
            }
            Command::CreateRadialGradient {
                x0,
                y0,
                r0,
                x1,
                y1,
                r1,
                stops,
            } => {
                self.surface(id)?
                    .create_radial_gradient(x0, y0, r0, x1, y1, r1, &stops)?;
                Response::success()
            }
            Command::CreatePattern { url, repetition } => {
                let surface = self.surface(id)?;
                surface.create_pattern(&url, PatternRepetition::parse(&repetition)?)?;
                Response::success()
            }

            // Paths
            Command::BeginPath { path_uuid } => {
                self.registry.begin_path(id, path_uuid)?;
                Response::success()
            }
            Command::ClosePath { path_uuid } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .close_path();
                Response::success()
            }
            Command::MoveTo { path_uuid, x, y } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .move_to(x, y);
                Response::success()
            }
            Command::LineTo { path_uuid, x, y } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .line_to(x, y);
                Response::success()
            }
            Command::BezierCurveTo {
                path_uuid,
                cp1x,
                cp1y,
                cp2x,
                cp2y,
                x,
                y,
            } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .bezier_curve_to(cp1x, cp1y, cp2x, cp2y, x, y);
                Response::success()
            }
            Command::QuadraticCurveTo {
                path_uuid,
                cpx,
                cpy,
                x,
                y,
            } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .quadratic_curve_to(cpx, cpy, x, y);
                Response::success()
            }
            Command::Arc {
                path_uuid,
                x,
                y,
                radius,
                start_angle,
                end_angle,
                anticlockwise,
            } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .arc(x, y, radius, start_angle, end_angle, anticlockwise)?;
                Response::success()
            }
            Command::ArcTo {
                path_uuid,
                x1,
                y1,
                x2,
                y2,
                radius,
            } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .arc_to(x1, y1, x2, y2, radius)?;
                Response::success()
            }
            Command::Ellipse {
                path_uuid,
                x,
                y,
                radius_x,
                radius_y,
                rotation,
                start_angle,
                end_angle,
                anticlockwise,
            } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .ellipse(
                        x,
                        y,
                        radius_x,
                        radius_y,
                        rotation,
                        start_angle,
                        end_angle,
                        anticlockwise,
                    )?;
                Response::success()
            }
            Command::Rect {
                path_uuid,
                x,
                y,
                width,
                height,
            } => {
                self.registry
                    .resolve_path_or_default(id, path_uuid.as_ref())?
                    .rect(x, y, width, height);
                Response::success()
            }
            Command::Fill {
                path_uuid,
                is_even_odd,
            } => {
                let (surface, path) = self
                    .registry
                    .resolve_path_optional(id, path_uuid.as_ref())?;
                surface.fill(path, FillRule::from_even_odd(is_even_odd))?;
                Response::success()
            }
            Command::Stroke { path_uuid } => {
                let (surface, path) = self
                    .registry
                    .resolve_path_optional(id, path_uuid.as_ref())?;
                surface.stroke(path)?;
                Response::success()
            }
            Command::Clip {
                path_uuid,
                is_even_odd,
            } => {
                let (surface, path) = self
                    .registry
                    .resolve_path_optional(id, path_uuid.as_ref())?;
                surface.clip(path, FillRule::from_even_odd(is_even_odd))?;
                Response::success()
            }
            Command::IsPointInPath {
                path_uuid,
                x,
                y,
                is_even_odd,
            } => {
                let (surface, path) = self
                    .registry
                    .resolve_path_optional(id, path_uuid.as_ref())?;
                Response::IsPointIn {
                    is_in: surface.is_point_in_path(path, x, y, FillRule::from_even_odd(is_even_odd)),
                }
            }
            Command::IsPointInStroke { path_uuid, x, y } => {
                let (surface, path) = self
                    .registry
                    .resolve_path_optional(id, path_uuid.as_ref())?;
                Response::IsPointIn {
                    is_in: surface.is_point_in_stroke(path, x, y),
                }
            }

            // Transforms
            Command::GetTransform {} => Response::Transform {
                matrix: self.surface(id)?.get_transform(),
            },
            Command::Rotate { angle } => {
                self.surface(id)?.rotate(angle);
                Response::success()
            }
            Command::Scale { x, y } => {
                self.surface(id)?.scale(x, y);
                Response::success()
            }
            Command::Translate { x, y } => {
                self.surface(id)?.translate(x, y);
                Response::success()
            }
            Command::Transform { matrix } => {
                self.surface(id)?.transform(matrix);
                Response::success()
            }
            Command::SetTransform { matrix } => {
                self.surface(id)?.set_transform(matrix);
                Response::success()
            }

            // Images and pixels
            Command::DrawImage {
                url,
                source,
                dx,
                dy,
                d_dims,
            } => {
                self.surface(id)?
                    .draw_image(&url, DrawImageArgs::from_parts(source, dx, dy, d_dims))?;
                Response::success()
            }
            Command::GetImageData { sx, sy, sw, sh } => Response::ImageData {
                image_data: self.surface(id)?.get_image_data(sx, sy, sw, sh)?,
            },
            Command::SetImageData {
                image_data,
                dx,
                dy,
                dirty_pos,
                dirty_dims,
            } => {
                let surface = self.surface(id)?;
                image_data.validate()?;
                let dirty = DirtyRect::from_parts(dirty_pos, dirty_dims, &image_data);
                surface.put_image_data(&image_data, dx, dy, dirty)?;
                Response::success()
            }

            // State
            Command::Save {} => {
                self.surface(id)?.save();
                Response::success()
            }
            Command::Restore {} => {
                self.surface(id)?.restore();
                Response::success()
            }
            Command::ToDataUrl { mime_type, quality } => Response::DataUrl {
                data_url: self.surface(id)?.to_data_url(&mime_type, quality)?,
            },
        };
        Ok(Some(response))
    }
}

/// The command tag of a raw payload, for logging.
fn command_tag(data: &Value) -> String {
    data.as_object()
        .and_then(|map| map.keys().next().cloned())
        .unwrap_or_else(|| "<untagged>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_relay_core::protocol::ImageData;
    use canvas_relay_surface::SoftwareBackend;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Box::new(SoftwareBackend::without_system_fonts()))
    }

    fn send(d: &mut Dispatcher, context: &str, data: Value) -> Option<Response> {
        d.dispatch(Some(SurfaceId::from(context)), data)
    }

    fn ok(d: &mut Dispatcher, context: &str, data: Value) {
        let response = send(d, context, data.clone());
        assert_eq!(
            response,
            Some(Response::success()),
            "command {data} was not successful"
        );
    }

    fn error_message(response: Option<Response>) -> String {
        match response {
            Some(Response::JsError { message }) => message,
            other => panic!("expected JsError, got {other:?}"),
        }
    }

    fn init(d: &mut Dispatcher, context: &str, width: u32, height: u32) {
        ok(
            d,
            context,
            json!({ "Init2DCanvas": { "width": width, "height": height } }),
        );
    }

    #[test]
    fn test_fill_rect_produces_red_pixel() {
        let mut d = dispatcher();
        init(&mut d, "A", 300, 150);
        ok(&mut d, "A", json!({ "SetFillStyle": { "fill_style": "red" } }));
        ok(
            &mut d,
            "A",
            json!({ "FillRect": { "x": 0.0, "y": 0.0, "width": 10.0, "height": 10.0 } }),
        );

        let response = send(
            &mut d,
            "A",
            json!({ "GetImageData": { "sx": 0.0, "sy": 0.0, "sw": 1.0, "sh": 1.0 } }),
        );
        assert_eq!(
            response,
            Some(Response::ImageData {
                image_data: ImageData {
                    data: vec![0xFF0000FF],
                    width: 1,
                    height: 1,
                }
            })
        );
    }

    #[test]
    fn test_set_line_dash_echoes_list() {
        let mut d = dispatcher();
        init(&mut d, "A", 10, 10);
        let response = send(&mut d, "A", json!({ "SetLineDash": { "line_dash": [1.0, 2.0, 3.0] } }));
        assert_eq!(
            response,
            Some(Response::LineDash {
                line_dash: vec![1.0, 2.0, 3.0]
            })
        );
        let response = send(&mut d, "A", json!({ "GetLineDash": {} }));
        assert_eq!(
            response,
            Some(Response::LineDash {
                line_dash: vec![1.0, 2.0, 3.0]
            })
        );

        let message = error_message(send(
            &mut d,
            "A",
            json!({ "SetLineDash": { "line_dash": [1.0, -2.0] } }),
        ));
        assert!(message.contains("line dash"), "{message}");
    }

    #[test]
    fn test_image_data_round_trip() {
        let mut d = dispatcher();
        init(&mut d, "A", 4, 4);
        let pixels = vec![0xFF0000FF, 0xFF00FF00, 0xFFFF0000, 0xFF000000];
        ok(
            &mut d,
            "A",
            json!({ "SetImageData": {
                "image_data": { "data": pixels, "width": 2, "height": 2 },
                "dx": 1.0, "dy": 1.0, "dirty_pos": null, "dirty_dims": null
            } }),
        );

        let response = send(
            &mut d,
            "A",
            json!({ "GetImageData": { "sx": 1.0, "sy": 1.0, "sw": 2.0, "sh": 2.0 } }),
        );
        assert_eq!(
            response,
            Some(Response::ImageData {
                image_data: ImageData {
                    data: pixels,
                    width: 2,
                    height: 2,
                }
            })
        );
    }

    #[test]
    fn test_malformed_image_data_leaves_surface_untouched() {
        let mut d = dispatcher();
        init(&mut d, "A", 2, 2);
        let message = error_message(send(
            &mut d,
            "A",
            json!({ "SetImageData": {
                "image_data": { "data": [0xFF0000FFu32, 0xFF0000FFu32, 0xFF0000FFu32], "width": 2, "height": 2 },
                "dx": 0.0, "dy": 0.0
            } }),
        ));
        assert!(message.contains("expected 4 pixels, got 3"), "{message}");

        let response = send(
            &mut d,
            "A",
            json!({ "GetImageData": { "sx": 0.0, "sy": 0.0, "sw": 2.0, "sh": 2.0 } }),
        );
        match response {
            Some(Response::ImageData { image_data }) => {
                assert!(image_data.data.iter().all(|p| *p == 0));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_every_enum_value_is_accepted_in_any_case() {
        let mut d = dispatcher();
        init(&mut d, "A", 4, 4);

        fn check(d: &mut Dispatcher, tag: &str, field: &str, values: Vec<&'static str>) {
            for value in values {
                for spelling in [value.to_string(), value.to_ascii_lowercase(), value.to_ascii_uppercase()] {
                    ok(d, "A", json!({ tag: { field: spelling } }));
                }
            }
            let message = error_message(send(d, "A", json!({ tag: { field: "Bogus" } })));
            assert!(message.contains("\"Bogus\""), "{message}");
        }

        check(&mut d, "SetLineCap", "line_cap", LineCap::all().iter().map(|v| v.as_str()).collect());
        check(&mut d, "SetLineJoin", "line_join", LineJoin::all().iter().map(|v| v.as_str()).collect());
        check(&mut d, "SetTextAlign", "text_align", TextAlign::all().iter().map(|v| v.as_str()).collect());
        check(
            &mut d,
            "SetTextBaseline",
            "text_baseline",
            TextBaseline::all().iter().map(|v| v.as_str()).collect(),
        );
        check(
            &mut d,
            "SetTextDirection",
            "text_direction",
            TextDirection::all().iter().map(|v| v.as_str()).collect(),
        );
        check(
            &mut d,
            "SetImageSmoothingQuality",
            "image_smoothing_quality",
            ImageSmoothingQuality::all().iter().map(|v| v.as_str()).collect(),
        );
        ok(
            &mut d,
            "A",
            json!({ "SetImageSmoothingQuality": { "image_smoothing_quality": null } }),
        );
    }

    #[test]
    fn test_unknown_surface_and_path() {
        let mut d = dispatcher();
        let message = error_message(send(
            &mut d,
            "nope",
            json!({ "FillRect": { "x": 0.0, "y": 0.0, "width": 1.0, "height": 1.0 } }),
        ));
        assert_eq!(message, "unknown surface: nope");

        // Surface resolution happens before option parsing.
        let message = error_message(send(&mut d, "nope", json!({ "SetLineCap": { "line_cap": "Bogus" } })));
        assert_eq!(message, "unknown surface: nope");

        init(&mut d, "A", 10, 10);
        let message = error_message(send(
            &mut d,
            "A",
            json!({ "LineTo": { "path_uuid": "ghost", "x": 1.0, "y": 1.0 } }),
        ));
        assert_eq!(message, "unknown path: ghost");
        let message = error_message(send(&mut d, "A", json!({ "Fill": { "path_uuid": "ghost" } })));
        assert_eq!(message, "unknown path: ghost");
    }

    #[test]
    fn test_destroy_is_silent_and_final() {
        let mut d = dispatcher();
        init(&mut d, "A", 10, 10);
        assert_eq!(send(&mut d, "A", json!({ "Destroy2DCanvas": {} })), None);
        assert_eq!(send(&mut d, "A", json!({ "Destroy2DCanvas": {} })), None);
        assert!(d.registry().is_empty());

        let message = error_message(send(&mut d, "A", json!({ "Save": {} })));
        assert_eq!(message, "unknown surface: A");
    }

    #[test]
    fn test_unknown_and_malformed_commands() {
        let mut d = dispatcher();
        init(&mut d, "A", 10, 10);
        let message = error_message(send(&mut d, "A", json!({ "Teleport": { "x": 1 } })));
        assert_eq!(message, "unknown command: Teleport");

        let message = error_message(send(&mut d, "A", json!({ "FillRect": { "x": "left" } })));
        assert!(message.starts_with("malformed command: FillRect"), "{message}");

        let message = error_message(d.dispatch(None, json!({ "Save": {} })));
        assert!(message.contains("missing context"), "{message}");
    }

    #[test]
    fn test_named_path_routing() {
        let mut d = dispatcher();
        init(&mut d, "A", 100, 100);
        ok(&mut d, "A", json!({ "BeginPath": { "path_uuid": "p1" } }));
        ok(
            &mut d,
            "A",
            json!({ "Rect": { "path_uuid": "p1", "x": 10.0, "y": 10.0, "width": 20.0, "height": 20.0 } }),
        );

        let inside_named = send(
            &mut d,
            "A",
            json!({ "IsPointInPath": { "path_uuid": "p1", "x": 15.0, "y": 15.0 } }),
        );
        assert_eq!(inside_named, Some(Response::IsPointIn { is_in: true }));

        // The default path was never touched.
        let inside_default = send(
            &mut d,
            "A",
            json!({ "IsPointInPath": { "path_uuid": null, "x": 15.0, "y": 15.0 } }),
        );
        assert_eq!(inside_default, Some(Response::IsPointIn { is_in: false }));

        // Stroke hit testing checks the outline, not the interior.
        ok(&mut d, "A", json!({ "SetLineWidth": { "line_width": 2.0 } }));
        let on_edge = send(
            &mut d,
            "A",
            json!({ "IsPointInStroke": { "path_uuid": "p1", "x": 10.0, "y": 20.0 } }),
        );
        assert_eq!(on_edge, Some(Response::IsPointIn { is_in: true }));
        let interior = send(
            &mut d,
            "A",
            json!({ "IsPointInStroke": { "path_uuid": "p1", "x": 20.0, "y": 20.0 } }),
        );
        assert_eq!(interior, Some(Response::IsPointIn { is_in: false }));
    }

    #[test]
    fn test_transform_commands() {
        let mut d = dispatcher();
        init(&mut d, "A", 10, 10);
        ok(&mut d, "A", json!({ "Translate": { "x": 5.0, "y": 6.0 } }));
        ok(&mut d, "A", json!({ "Scale": { "x": 2.0, "y": 3.0 } }));
        assert_eq!(
            send(&mut d, "A", json!({ "GetTransform": {} })),
            Some(Response::Transform {
                matrix: [2.0, 0.0, 0.0, 3.0, 5.0, 6.0]
            })
        );
        ok(&mut d, "A", json!({ "SetTransform": { "matrix": [1.0, 0.0, 0.0, 1.0, 0.0, 0.0] } }));
        assert_eq!(
            send(&mut d, "A", json!({ "GetTransform": {} })),
            Some(Response::Transform {
                matrix: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
            })
        );
    }

    #[test]
    fn test_measure_text_without_fonts_reports_error() {
        let mut d = dispatcher();
        init(&mut d, "A", 10, 10);
        let message = error_message(send(&mut d, "A", json!({ "MeasureText": { "text": "hi" } })));
        assert!(message.contains("no font face"), "{message}");
    }

    /// A dispatcher over the installed fonts, or `None` on machines without any.
    fn dispatcher_with_fonts() -> Option<Dispatcher> {
        let backend = SoftwareBackend::new();
        if !backend.has_fonts() {
            eprintln!("no system font faces, skipping");
            return None;
        }
        Some(Dispatcher::new(Box::new(backend)))
    }

    fn image_data(d: &mut Dispatcher, context: &str, sw: f64, sh: f64) -> Vec<u32> {
        match send(
            d,
            context,
            json!({ "GetImageData": { "sx": 0.0, "sy": 0.0, "sw": sw, "sh": sh } }),
        ) {
            Some(Response::ImageData { image_data }) => image_data.data,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_text_renders_with_a_real_face() {
        let Some(mut d) = dispatcher_with_fonts() else {
            return;
        };
        init(&mut d, "A", 200, 50);
        ok(&mut d, "A", json!({ "SetFont": { "font": "24px sans-serif" } }));

        let metrics = match send(&mut d, "A", json!({ "MeasureText": { "text": "Hello" } })) {
            Some(Response::MeasureText { text_metrics }) => text_metrics,
            other => panic!("unexpected response {other:?}"),
        };
        assert!(metrics.width > 0.0, "{metrics:?}");
        assert!(metrics.font_bounding_box_ascent > 0.0, "{metrics:?}");
        assert!(metrics.actual_bounding_box_right > metrics.actual_bounding_box_left);

        assert!(image_data(&mut d, "A", 200.0, 50.0).iter().all(|px| *px == 0));
        ok(
            &mut d,
            "A",
            json!({ "FillText": { "text": "Hello", "x": 10.0, "y": 35.0, "max_width": null } }),
        );
        let painted = image_data(&mut d, "A", 200.0, 50.0)
            .into_iter()
            .filter(|px| *px != 0)
            .count();
        assert!(painted > 20, "only {painted} pixels painted");

        init(&mut d, "B", 200, 50);
        ok(&mut d, "B", json!({ "SetStrokeStyle": { "stroke_style": "blue" } }));
        ok(
            &mut d,
            "B",
            json!({ "StrokeText": { "text": "Hi", "x": 10.0, "y": 35.0, "max_width": 40.0 } }),
        );
        assert!(image_data(&mut d, "B", 200.0, 50.0).iter().any(|px| *px != 0));
    }

    #[test]
    fn test_huge_glyphs_are_refused() {
        let Some(mut d) = dispatcher_with_fonts() else {
            return;
        };
        init(&mut d, "A", 10, 10);
        ok(&mut d, "A", json!({ "SetFont": { "font": "100000px sans-serif" } }));
        let message = error_message(send(
            &mut d,
            "A",
            json!({ "FillText": { "text": "W", "x": 0.0, "y": 5.0, "max_width": null } }),
        ));
        assert!(message.contains("exceeds"), "{message}");
    }

    #[test]
    fn test_oversized_bitmaps_are_reported_not_allocated() {
        let mut d = dispatcher();
        init(&mut d, "A", 4, 4);

        let message = error_message(send(
            &mut d,
            "A",
            json!({ "GetImageData": { "sx": 0.0, "sy": 0.0, "sw": 1e6, "sh": 1e6 } }),
        ));
        assert!(message.contains("exceeds"), "{message}");

        let message = error_message(send(
            &mut d,
            "B",
            json!({ "Init2DCanvas": { "width": 400000, "height": 400000 } }),
        ));
        assert!(message.contains("400000x400000"), "{message}");
        assert_eq!(d.registry().len(), 1);

        let message = error_message(send(&mut d, "A", json!({ "SetWidth": { "width": 100_000_000u32 } })));
        assert!(message.contains("exceeds"), "{message}");

        // The dispatcher and the surface carry on.
        assert_eq!(image_data(&mut d, "A", 4.0, 4.0).len(), 16);
    }

    #[test]
    fn test_handle_frame_echoes_correlation_id() {
        let mut d = dispatcher();
        for txn in [json!("abc"), json!(42), json!({ "seq": [1, 2] })] {
            let frame = json!({
                "data": { "Init2DCanvas": { "width": 2, "height": 2 } },
                "context": "A",
                "txn_uuid": txn,
            });
            let reply = d.handle_frame(&frame.to_string()).unwrap();
            let reply: Value = serde_json::from_str(&reply).unwrap();
            assert_eq!(reply, json!({ "data": { "Success": {} }, "txn_uuid": txn }));
        }
    }

    #[test]
    fn test_handle_frame_reports_errors_and_drops_garbage() {
        let mut d = dispatcher();
        let frame = json!({ "data": { "Save": {} }, "context": "missing", "txn_uuid": "t-9" });
        let reply: Value = serde_json::from_str(&d.handle_frame(&frame.to_string()).unwrap()).unwrap();
        assert_eq!(
            reply,
            json!({ "data": { "JsError": { "message": "unknown surface: missing" } }, "txn_uuid": "t-9" })
        );

        assert_eq!(d.handle_frame("not json"), None);
        assert_eq!(d.handle_frame(r#"{"data": {"Save": {}}, "context": "A"}"#), None);

        let destroy = json!({ "data": { "Destroy2DCanvas": {} }, "context": "A", "txn_uuid": "t-10" });
        assert_eq!(d.handle_frame(&destroy.to_string()), None);
    }

    #[test]
    fn test_data_url_and_save_restore() {
        let mut d = dispatcher();
        init(&mut d, "A", 3, 3);
        ok(&mut d, "A", json!({ "Save": {} }));
        ok(&mut d, "A", json!({ "Translate": { "x": 1.0, "y": 1.0 } }));
        ok(&mut d, "A", json!({ "Restore": {} }));
        assert_eq!(
            send(&mut d, "A", json!({ "GetTransform": {} })),
            Some(Response::Transform {
                matrix: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0]
            })
        );

        match send(
            &mut d,
            "A",
            json!({ "ToDataUrl": { "mime_type": "image/png", "quality": null } }),
        ) {
            Some(Response::DataUrl { data_url }) => {
                assert!(data_url.starts_with("data:image/png;base64,"));
            }
            other => panic!("unexpected response {other:?}"),
        }
    }
}
