//! Vector paths with canvas construction semantics.
//!
//! A [`Path2d`] stores segments in the coordinate space they were added in.
//! Construction goes through a [`PathTarget`], which carries the transform
//! applied to each point on insertion: the current transform for a surface's
//! default path, identity for a named path.

use std::f64::consts::{FRAC_PI_2, TAU};

use canvas_relay_core::SurfaceError;

use crate::matrix::Matrix;
use crate::{FillRule, SurfaceResult};

/// Curves are flattened into this many line segments for hit testing.
const CURVE_STEPS: usize = 16;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn mapped(self, m: &Matrix) -> Self {
        let (x, y) = m.map_point(self.x, self.y);
        Self { x, y }
    }

    fn near(self, other: Point) -> bool {
        (self.x - other.x).abs() < EPSILON && (self.y - other.y).abs() < EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    MoveTo(Point),
    LineTo(Point),
    QuadTo(Point, Point),
    CubicTo(Point, Point, Point),
    Close,
}

/// A flattened subpath.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    pub points: Vec<Point>,
    pub closed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path2d {
    segments: Vec<Segment>,
    subpath_start: Option<Point>,
    current: Option<Point>,
}

impl Path2d {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.subpath_start = None;
        self.current = None;
    }

    pub fn current_point(&self) -> Option<Point> {
        self.current
    }

    fn push_move(&mut self, p: Point) {
        self.segments.push(Segment::MoveTo(p));
        self.subpath_start = Some(p);
        self.current = Some(p);
    }

    fn push_line(&mut self, p: Point) {
        self.segments.push(Segment::LineTo(p));
        self.current = Some(p);
    }

    fn push_quad(&mut self, c: Point, p: Point) {
        self.segments.push(Segment::QuadTo(c, p));
        self.current = Some(p);
    }

    fn push_cubic(&mut self, c1: Point, c2: Point, p: Point) {
        self.segments.push(Segment::CubicTo(c1, c2, p));
        self.current = Some(p);
    }

    fn push_close(&mut self) {
        if self.current.is_none() {
            return;
        }
        self.segments.push(Segment::Close);
        self.current = self.subpath_start;
    }

    /// Copy of this path with every point mapped through `m`.
    pub fn transformed(&self, m: &Matrix) -> Path2d {
        let segments = self
            .segments
            .iter()
            .map(|seg| match *seg {
                Segment::MoveTo(p) => Segment::MoveTo(p.mapped(m)),
                Segment::LineTo(p) => Segment::LineTo(p.mapped(m)),
                Segment::QuadTo(c, p) => Segment::QuadTo(c.mapped(m), p.mapped(m)),
                Segment::CubicTo(c1, c2, p) => {
                    Segment::CubicTo(c1.mapped(m), c2.mapped(m), p.mapped(m))
                }
                Segment::Close => Segment::Close,
            })
            .collect();
        Path2d {
            segments,
            subpath_start: self.subpath_start.map(|p| p.mapped(m)),
            current: self.current.map(|p| p.mapped(m)),
        }
    }

    /// Convert to a `tiny-skia` path. Returns `None` when nothing would be
    /// painted.
    pub fn to_skia(&self) -> Option<tiny_skia::Path> {
        let mut pb = tiny_skia::PathBuilder::new();
        for seg in &self.segments {
            match *seg {
                Segment::MoveTo(p) => pb.move_to(p.x as f32, p.y as f32),
                Segment::LineTo(p) => pb.line_to(p.x as f32, p.y as f32),
                Segment::QuadTo(c, p) => pb.quad_to(c.x as f32, c.y as f32, p.x as f32, p.y as f32),
                Segment::CubicTo(c1, c2, p) => pb.cubic_to(
                    c1.x as f32,
                    c1.y as f32,
                    c2.x as f32,
                    c2.y as f32,
                    p.x as f32,
                    p.y as f32,
                ),
                Segment::Close => pb.close(),
            }
        }
        pb.finish()
    }

    /// Approximate the path by polylines.
    pub fn flatten(&self) -> Vec<Polyline> {
        let mut out = Vec::new();
        let mut points: Vec<Point> = Vec::new();
        let mut start: Option<Point> = None;
        let mut last: Option<Point> = None;

        fn finish(out: &mut Vec<Polyline>, points: &mut Vec<Point>, closed: bool) {
            if !points.is_empty() {
                out.push(Polyline {
                    points: std::mem::take(points),
                    closed,
                });
            }
        }

        for seg in &self.segments {
            match *seg {
                Segment::MoveTo(p) => {
                    finish(&mut out, &mut points, false);
                    points.push(p);
                    start = Some(p);
                    last = Some(p);
                }
                Segment::Close => {
                    finish(&mut out, &mut points, true);
                    last = start;
                }
                Segment::LineTo(p) => {
                    if points.is_empty() {
                        points.push(last.unwrap_or(p));
                    }
                    points.push(p);
                    last = Some(p);
                }
                Segment::QuadTo(c, p) => {
                    let p0 = match points.last().copied().or(last) {
                        Some(p0) => p0,
                        None => c,
                    };
                    if points.is_empty() {
                        points.push(p0);
                    }
                    for i in 1..=CURVE_STEPS {
                        let t = i as f64 / CURVE_STEPS as f64;
                        let mt = 1.0 - t;
                        points.push(Point::new(
                            mt * mt * p0.x + 2.0 * mt * t * c.x + t * t * p.x,
                            mt * mt * p0.y + 2.0 * mt * t * c.y + t * t * p.y,
                        ));
                    }
                    last = Some(p);
                }
                Segment::CubicTo(c1, c2, p) => {
                    let p0 = match points.last().copied().or(last) {
                        Some(p0) => p0,
                        None => c1,
                    };
                    if points.is_empty() {
                        points.push(p0);
                    }
                    for i in 1..=CURVE_STEPS {
                        let t = i as f64 / CURVE_STEPS as f64;
                        let mt = 1.0 - t;
                        let (a, b, c, d) = (mt * mt * mt, 3.0 * mt * mt * t, 3.0 * mt * t * t, t * t * t);
                        points.push(Point::new(
                            a * p0.x + b * c1.x + c * c2.x + d * p.x,
                            a * p0.y + b * c1.y + c * c2.y + d * p.y,
                        ));
                    }
                    last = Some(p);
                }
            }
        }
        finish(&mut out, &mut points, false);
        out
    }

    /// Whether the point lies inside the path. Open subpaths are treated as
    /// implicitly closed.
    pub fn contains(&self, x: f64, y: f64, rule: FillRule) -> bool {
        let mut winding = 0i32;
        for poly in self.flatten() {
            let pts = &poly.points;
            if pts.len() < 2 {
                continue;
            }
            for i in 0..pts.len() {
                let p = pts[i];
                let q = pts[(i + 1) % pts.len()];
                let side = (q.x - p.x) * (y - p.y) - (x - p.x) * (q.y - p.y);
                if p.y <= y {
                    if q.y > y && side > 0.0 {
                        winding += 1;
                    }
                } else if q.y <= y && side < 0.0 {
                    winding -= 1;
                }
            }
        }
        match rule {
            FillRule::NonZero => winding != 0,
            FillRule::EvenOdd => winding % 2 != 0,
        }
    }

    /// Whether the point is within `half_width` of the path outline.
    pub fn stroke_contains(&self, x: f64, y: f64, half_width: f64) -> bool {
        let target = Point::new(x, y);
        self.flatten().iter().any(|poly| {
            let pts = &poly.points;
            let mut edges: Vec<(Point, Point)> = pts.windows(2).map(|w| (w[0], w[1])).collect();
            if poly.closed && pts.len() > 1 {
                edges.push((pts[pts.len() - 1], pts[0]));
            }
            edges
                .into_iter()
                .any(|(a, b)| distance_to_segment(target, a, b) <= half_width)
        })
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// A path being built, plus the transform applied to incoming points.
///
/// Non-finite arguments are ignored, as a browser canvas does.
pub struct PathTarget<'a> {
    path: &'a mut Path2d,
    transform: Matrix,
}

impl<'a> PathTarget<'a> {
    pub fn new(path: &'a mut Path2d, transform: Matrix) -> Self {
        Self { path, transform }
    }

    /// A named path: points are stored as given.
    pub fn untransformed(path: &'a mut Path2d) -> Self {
        Self::new(path, Matrix::identity())
    }

    fn map(&self, x: f64, y: f64) -> Point {
        Point::new(x, y).mapped(&self.transform)
    }

    fn ensure_subpath(&mut self, x: f64, y: f64) {
        if self.path.current.is_none() {
            let p = self.map(x, y);
            self.path.push_move(p);
        }
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        if !all_finite(&[x, y]) {
            return;
        }
        let p = self.map(x, y);
        self.path.push_move(p);
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        if !all_finite(&[x, y]) {
            return;
        }
        let p = self.map(x, y);
        if self.path.current.is_none() {
            self.path.push_move(p);
        } else {
            self.path.push_line(p);
        }
    }

    pub fn quadratic_curve_to(&mut self, cpx: f64, cpy: f64, x: f64, y: f64) {
        if !all_finite(&[cpx, cpy, x, y]) {
            return;
        }
        self.ensure_subpath(cpx, cpy);
        let (c, p) = (self.map(cpx, cpy), self.map(x, y));
        self.path.push_quad(c, p);
    }

    pub fn bezier_curve_to(&mut self, cp1x: f64, cp1y: f64, cp2x: f64, cp2y: f64, x: f64, y: f64) {
        if !all_finite(&[cp1x, cp1y, cp2x, cp2y, x, y]) {
            return;
        }
        self.ensure_subpath(cp1x, cp1y);
        let (c1, c2, p) = (self.map(cp1x, cp1y), self.map(cp2x, cp2y), self.map(x, y));
        self.path.push_cubic(c1, c2, p);
    }

    pub fn close_path(&mut self) {
        self.path.push_close();
    }

    /// Closed rectangle subpath, leaving the current point at its origin.
    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64) {
        if !all_finite(&[x, y, width, height]) {
            return;
        }
        self.move_to(x, y);
        self.line_to(x + width, y);
        self.line_to(x + width, y + height);
        self.line_to(x, y + height);
        self.close_path();
        self.move_to(x, y);
    }

    pub fn arc(
        &mut self,
        x: f64,
        y: f64,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    ) -> SurfaceResult<()> {
        self.ellipse(x, y, radius, radius, 0.0, start_angle, end_angle, anticlockwise)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ellipse(
        &mut self,
        x: f64,
        y: f64,
        radius_x: f64,
        radius_y: f64,
        rotation: f64,
        start_angle: f64,
        end_angle: f64,
        anticlockwise: bool,
    ) -> SurfaceResult<()> {
        if !all_finite(&[x, y, radius_x, radius_y, rotation, start_angle, end_angle]) {
            return Ok(());
        }
        if radius_x < 0.0 || radius_y < 0.0 {
            return Err(SurfaceError::IndexSize(format!(
                "negative radius ({radius_x}, {radius_y})"
            )));
        }

        let sweep = arc_sweep(start_angle, end_angle, anticlockwise);
        let (sin_r, cos_r) = rotation.sin_cos();
        let on_ellipse = |ux: f64, uy: f64| -> (f64, f64) {
            let (px, py) = (radius_x * ux, radius_y * uy);
            (x + px * cos_r - py * sin_r, y + px * sin_r + py * cos_r)
        };

        let (sx, sy) = on_ellipse(start_angle.cos(), start_angle.sin());
        let start = self.map(sx, sy);
        match self.path.current {
            Some(current) if current.near(start) => {}
            Some(_) => self.path.push_line(start),
            None => self.path.push_move(start),
        }

        if sweep == 0.0 {
            return Ok(());
        }

        let pieces = (sweep.abs() / FRAC_PI_2).ceil().max(1.0) as usize;
        let step = sweep / pieces as f64;
        let k = 4.0 / 3.0 * (step / 4.0).tan();
        let mut a0 = start_angle;
        for _ in 0..pieces {
            let a1 = a0 + step;
            let (s0, c0) = a0.sin_cos();
            let (s1, c1) = a1.sin_cos();
            let cp1 = on_ellipse(c0 - k * s0, s0 + k * c0);
            let cp2 = on_ellipse(c1 + k * s1, s1 - k * c1);
            let end = on_ellipse(c1, s1);
            let (cp1, cp2, end) = (
                self.map(cp1.0, cp1.1),
                self.map(cp2.0, cp2.1),
                self.map(end.0, end.1),
            );
            self.path.push_cubic(cp1, cp2, end);
            a0 = a1;
        }
        Ok(())
    }

    /// Tangent arc between the current point, `(x1, y1)` and `(x2, y2)`.
    pub fn arc_to(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, radius: f64) -> SurfaceResult<()> {
        if !all_finite(&[x1, y1, x2, y2, radius]) {
            return Ok(());
        }
        if radius < 0.0 {
            return Err(SurfaceError::IndexSize(format!("negative radius {radius}")));
        }

        let Some(current) = self.path.current else {
            self.move_to(x1, y1);
            return Ok(());
        };
        // The current point is stored transformed; work in user space.
        let Some(inverse) = self.transform.invert() else {
            return Ok(());
        };
        let p0 = current.mapped(&inverse);
        let p1 = Point::new(x1, y1);
        let p2 = Point::new(x2, y2);

        let (d1x, d1y) = (p1.x - p0.x, p1.y - p0.y);
        let (d2x, d2y) = (p2.x - p1.x, p2.y - p1.y);
        let cross = d1x * d2y - d1y * d2x;
        if p0.near(p1) || p1.near(p2) || radius == 0.0 || cross.abs() < EPSILON {
            self.line_to(x1, y1);
            return Ok(());
        }

        // Unit vectors from the corner towards each neighbour.
        let len1 = (d1x * d1x + d1y * d1y).sqrt();
        let len2 = (d2x * d2x + d2y * d2y).sqrt();
        let (u1x, u1y) = (-d1x / len1, -d1y / len1);
        let (u2x, u2y) = (d2x / len2, d2y / len2);

        let cos_theta = (u1x * u2x + u1y * u2y).clamp(-1.0, 1.0);
        let half = cos_theta.acos() / 2.0;
        let tangent_dist = radius / half.tan();
        let center_dist = radius / half.sin();

        let t1 = Point::new(p1.x + u1x * tangent_dist, p1.y + u1y * tangent_dist);
        let t2 = Point::new(p1.x + u2x * tangent_dist, p1.y + u2y * tangent_dist);
        let (bx, by) = (u1x + u2x, u1y + u2y);
        let blen = (bx * bx + by * by).sqrt();
        let center = Point::new(
            p1.x + bx / blen * center_dist,
            p1.y + by / blen * center_dist,
        );

        self.line_to(t1.x, t1.y);
        let start = (t1.y - center.y).atan2(t1.x - center.x);
        let end = (t2.y - center.y).atan2(t2.x - center.x);
        self.arc(center.x, center.y, radius, start, end, cross < 0.0)
    }
}

/// Signed sweep of a canvas arc, positive meaning clockwise on screen.
fn arc_sweep(start: f64, end: f64, anticlockwise: bool) -> f64 {
    if !anticlockwise && end - start >= TAU {
        TAU
    } else if anticlockwise && start - end >= TAU {
        -TAU
    } else if anticlockwise {
        -(start - end).rem_euclid(TAU)
    } else {
        (end - start).rem_euclid(TAU)
    }
}
