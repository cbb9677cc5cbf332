//! Font selection and text layout.
//!
//! Faces are looked up in a `fontdb` database and rasterized with `fontdue`.
//! Parsed faces are cached per face id and shared by every surface of a
//! backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use canvas_relay_core::SurfaceError;
use canvas_relay_core::protocol::TextMetrics;
use fontdb::{Database, Family, Query, Stretch, Style, Weight};

use crate::SurfaceResult;

/// Base size for relative units, matching the canvas default font.
const DEFAULT_FONT_PX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontStyle {
    Normal,
    Italic,
    Oblique,
}

/// A parsed CSS `font` shorthand.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    pub style: FontStyle,
    pub weight: u16,
    pub size_px: f64,
    pub families: Vec<String>,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            style: FontStyle::Normal,
            weight: 400,
            size_px: DEFAULT_FONT_PX,
            families: vec!["sans-serif".to_string()],
        }
    }
}

impl FontSpec {
    /// Parse `[style] [variant] [weight] [stretch] size[/line-height] family[, family]*`.
    pub fn parse(value: &str) -> SurfaceResult<Self> {
        let invalid = || SurfaceError::InvalidArgument(format!("invalid font {value:?}"));
        let mut spec = FontSpec::default();
        let mut rest = value.trim();

        loop {
            let (token, tail) = match rest.split_once(char::is_whitespace) {
                Some((token, tail)) => (token, tail.trim_start()),
                None => return Err(invalid()),
            };
            let lower = token.to_ascii_lowercase();
            match lower.as_str() {
                "normal" | "small-caps" => {}
                "italic" => spec.style = FontStyle::Italic,
                "oblique" => spec.style = FontStyle::Oblique,
                "bold" => spec.weight = 700,
                "bolder" => spec.weight = 900,
                "lighter" => spec.weight = 100,
                "ultra-condensed" | "extra-condensed" | "condensed" | "semi-condensed"
                | "semi-expanded" | "expanded" | "extra-expanded" | "ultra-expanded" => {}
                _ if lower.len() == 3 && lower.ends_with("00") => {
                    spec.weight = lower.parse().map_err(|_| invalid())?;
                }
                _ => {
                    let size = lower.split('/').next().unwrap_or_default();
                    spec.size_px = parse_size(size).ok_or_else(invalid)?;
                    rest = tail;
                    break;
                }
            }
            rest = tail;
        }

        spec.families = rest
            .split(',')
            .map(|f| f.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|f| !f.is_empty())
            .collect();
        if spec.families.is_empty() {
            return Err(invalid());
        }
        Ok(spec)
    }
}

fn parse_size(token: &str) -> Option<f64> {
    let (number, scale) = if let Some(n) = token.strip_suffix("px") {
        (n, 1.0)
    } else if let Some(n) = token.strip_suffix("pt") {
        (n, 4.0 / 3.0)
    } else if let Some(n) = token.strip_suffix("rem") {
        (n, DEFAULT_FONT_PX)
    } else if let Some(n) = token.strip_suffix("em") {
        (n, DEFAULT_FONT_PX)
    } else if let Some(n) = token.strip_suffix('%') {
        (n, DEFAULT_FONT_PX / 100.0)
    } else {
        return None;
    };
    let size = number.parse::<f64>().ok()? * scale;
    (size.is_finite() && size >= 0.0).then_some(size)
}

/// Installed and registered font faces.
pub struct FontLibrary {
    db: Database,
    faces: Mutex<HashMap<fontdb::ID, Arc<fontdue::Font>>>,
}

impl FontLibrary {
    /// A library with no faces. Text operations fail until a face is added.
    pub fn empty() -> Self {
        Self {
            db: Database::new(),
            faces: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_system_fonts() -> Self {
        let mut library = Self::empty();
        library.db.load_system_fonts();
        tracing::debug!(faces = library.db.faces().len(), "Loaded system fonts");
        library
    }

    pub fn face_count(&self) -> usize {
        self.db.faces().len()
    }

    pub fn load_font_data(&mut self, data: Vec<u8>) {
        self.db.load_font_data(data);
    }

    /// Find and parse the best face for `spec`, falling back to any face.
    pub fn resolve(&self, spec: &FontSpec) -> SurfaceResult<Arc<fontdue::Font>> {
        let families: Vec<Family<'_>> = spec
            .families
            .iter()
            .map(|name| match name.to_ascii_lowercase().as_str() {
                "serif" => Family::Serif,
                "sans-serif" => Family::SansSerif,
                "monospace" => Family::Monospace,
                "cursive" => Family::Cursive,
                "fantasy" => Family::Fantasy,
                _ => Family::Name(name),
            })
            .chain(std::iter::once(Family::SansSerif))
            .collect();
        let query = Query {
            families: &families,
            weight: Weight(spec.weight),
            stretch: Stretch::Normal,
            style: match spec.style {
                FontStyle::Normal => Style::Normal,
                FontStyle::Italic => Style::Italic,
                FontStyle::Oblique => Style::Oblique,
            },
        };

        let id = self
            .db
            .query(&query)
            .or_else(|| self.db.faces().first().map(|face| face.id))
            .ok_or_else(|| SurfaceError::FontUnavailable(spec.families.join(", ")))?;

        let mut faces = self
            .faces
            .lock()
            .map_err(|_| SurfaceError::FontUnavailable("font cache poisoned".into()))?;
        if let Some(font) = faces.get(&id) {
            return Ok(font.clone());
        }

        let font = self
            .db
            .with_face_data(id, |data, index| {
                fontdue::Font::from_bytes(
                    data.to_vec(),
                    fontdue::FontSettings {
                        collection_index: index,
                        ..Default::default()
                    },
                )
            })
            .ok_or_else(|| SurfaceError::FontUnavailable(spec.families.join(", ")))?
            .map_err(|e| SurfaceError::FontUnavailable(format!("malformed font face: {e}")))?;
        let font = Arc::new(font);
        faces.insert(id, font.clone());
        Ok(font)
    }
}

/// One glyph placed on the baseline.
#[derive(Debug, Clone, Copy)]
pub struct PlacedGlyph {
    pub ch: char,
    pub pen_x: f64,
}

/// Horizontal layout of one line of text at the alphabetic baseline.
#[derive(Debug, Clone)]
pub struct TextLayout {
    pub glyphs: Vec<PlacedGlyph>,
    pub width: f64,
    pub ink_left: f64,
    pub ink_right: f64,
    pub ink_top: f64,
    pub ink_bottom: f64,
    pub ascent: f64,
    pub descent: f64,
}

impl TextLayout {
    pub fn new(font: &fontdue::Font, text: &str, px: f64) -> Self {
        let size = px as f32;
        let (ascent, descent) = font
            .horizontal_line_metrics(size)
            .map(|m| (m.ascent as f64, m.descent as f64))
            .unwrap_or((px * 0.8, -px * 0.2));

        let mut glyphs = Vec::new();
        let mut pen = 0.0f64;
        let (mut left, mut right) = (f64::MAX, f64::MIN);
        let (mut top, mut bottom) = (f64::MIN, f64::MAX);
        for ch in text.chars().filter(|c| !c.is_control()) {
            let metrics = font.metrics(ch, size);
            glyphs.push(PlacedGlyph { ch, pen_x: pen });
            if metrics.width > 0 && metrics.height > 0 {
                left = left.min(pen + metrics.xmin as f64);
                right = right.max(pen + metrics.xmin as f64 + metrics.width as f64);
                bottom = bottom.min(metrics.ymin as f64);
                top = top.max(metrics.ymin as f64 + metrics.height as f64);
            }
            pen += metrics.advance_width as f64;
        }
        if left > right {
            (left, right, top, bottom) = (0.0, 0.0, 0.0, 0.0);
        }

        Self {
            glyphs,
            width: pen,
            ink_left: left,
            ink_right: right,
            ink_top: top,
            ink_bottom: bottom,
            ascent,
            descent,
        }
    }

    /// Metrics relative to an anchor with the given alignment and baseline
    /// shifts (see [`TextLayout::baseline_shift`]).
    pub fn metrics(&self, align_offset: f64, baseline_shift: f64, size_px: f64) -> TextMetrics {
        let em = (self.ascent - self.descent).max(f64::EPSILON);
        TextMetrics {
            width: self.width,
            actual_bounding_box_left: -(self.ink_left + align_offset),
            actual_bounding_box_right: self.ink_right + align_offset,
            font_bounding_box_ascent: self.ascent - baseline_shift,
            font_bounding_box_descent: -self.descent + baseline_shift,
            actual_bounding_box_ascent: self.ink_top - baseline_shift,
            actual_bounding_box_descent: -self.ink_bottom + baseline_shift,
            em_height_ascent: size_px * self.ascent / em - baseline_shift,
            em_height_descent: size_px * -self.descent / em + baseline_shift,
            hanging_baseline: self.ascent * 0.8 - baseline_shift,
            alphabetic_baseline: -baseline_shift,
            ideographic_baseline: self.descent - baseline_shift,
        }
    }

    /// Distance the alphabetic baseline sits below the anchor for `baseline`.
    pub fn baseline_shift(&self, baseline: canvas_relay_core::options::TextBaseline) -> f64 {
        use canvas_relay_core::options::TextBaseline;
        match baseline {
            TextBaseline::Top => self.ascent,
            TextBaseline::Hanging => self.ascent * 0.8,
            TextBaseline::Middle => (self.ascent + self.descent) / 2.0,
            TextBaseline::Alphabetic => 0.0,
            TextBaseline::Ideographic | TextBaseline::Bottom => self.descent,
        }
    }
}
