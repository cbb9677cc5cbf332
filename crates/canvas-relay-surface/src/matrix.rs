use canvas_relay_core::protocol::DomMatrix;

/// 2D affine transform in canvas order.
///
/// Maps `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn from_array([a, b, c, d, e, f]: DomMatrix) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn to_array(self) -> DomMatrix {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    pub fn translation(x: f64, y: f64) -> Self {
        Self {
            e: x,
            f: y,
            ..Self::identity()
        }
    }

    pub fn scaling(x: f64, y: f64) -> Self {
        Self {
            a: x,
            d: y,
            ..Self::identity()
        }
    }

    pub fn rotation(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self * other`: the result applies `other` first, then `self`.
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv = 1.0 / det;
        Some(Matrix {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Geometric mean of the axis scale factors.
    pub fn mean_scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    pub fn to_skia(self) -> tiny_skia::Transform {
        tiny_skia::Transform::from_row(
            self.a as f32,
            self.b as f32,
            self.c as f32,
            self.d as f32,
            self.e as f32,
            self.f as f32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: (f64, f64), b: (f64, f64)) -> bool {
        (a.0 - b.0).abs() < 1e-9 && (a.1 - b.1).abs() < 1e-9
    }

    #[test]
    fn test_concat_applies_right_operand_first() {
        let m = Matrix::translation(10.0, 0.0).concat(&Matrix::scaling(2.0, 2.0));
        assert!(approx(m.map_point(1.0, 1.0), (12.0, 2.0)));

        let m = Matrix::scaling(2.0, 2.0).concat(&Matrix::translation(10.0, 0.0));
        assert!(approx(m.map_point(1.0, 1.0), (22.0, 2.0)));
    }

    #[test]
    fn test_rotation_quarter_turn() {
        let m = Matrix::rotation(std::f64::consts::FRAC_PI_2);
        assert!(approx(m.map_point(1.0, 0.0), (0.0, 1.0)));
    }

    #[test]
    fn test_invert() {
        let m = Matrix::from_array([2.0, 0.0, 0.0, 4.0, 5.0, 6.0]);
        let inv = m.invert().unwrap();
        let (x, y) = m.map_point(3.0, 7.0);
        assert!(approx(inv.map_point(x, y), (3.0, 7.0)));

        assert!(Matrix::scaling(0.0, 1.0).invert().is_none());
    }
}
