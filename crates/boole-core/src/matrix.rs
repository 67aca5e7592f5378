use std::fmt;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// 4x4 homogeneous transform
// ─────────────────────────────────────────────

/// Row-major 4x4 homogeneous transform matrix.
///
/// Element `[15]` carries the global scale factor, so an unscaled
/// transform has `1.0` there. Member matrices compose onto the
/// accumulated model-to-current transform by right multiplication.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4(pub [f64; 16]);

/// Tolerance for identity detection and equality of parsed matrices.
pub const MAT_TOL: f64 = 1.0e-9;

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4([
        1.0, 0.0, 0.0, 0.0,
        0.0, 1.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// `self * rhs`, applying `rhs` before `self`.
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let a = &self.0;
        let b = &rhs.0;
        let mut o = [0.0f64; 16];
        for i in 0..4 {
            for j in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += a[i * 4 + k] * b[k * 4 + j];
                }
                o[i * 4 + j] = sum;
            }
        }
        Mat4(o)
    }

    /// Pure translation by (x, y, z).
    pub fn translation(x: f64, y: f64, z: f64) -> Mat4 {
        let mut m = Mat4::IDENTITY;
        m.0[3] = x;
        m.0[7] = y;
        m.0[11] = z;
        m
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Mat4::IDENTITY, MAT_TOL)
    }

    pub fn approx_eq(&self, other: &Mat4, tol: f64) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Whether the rotation rows are mutually perpendicular and non-null.
    ///
    /// A transform failing this check skews the primitive it is applied
    /// to, which the downstream solid importers cannot represent; such
    /// leaves are pruned with a diagnostic rather than evaluated.
    pub fn preserves_axes(&self) -> bool {
        let m = &self.0;
        let rows = [[m[0], m[1], m[2]], [m[4], m[5], m[6]], [m[8], m[9], m[10]]];
        let mag: Vec<f64> = rows
            .iter()
            .map(|r| (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt())
            .collect();
        if mag.iter().any(|&len| len < MAT_TOL) {
            return false;
        }
        let dot = |a: &[f64; 3], b: &[f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        let pairs = [(0usize, 1usize), (0, 2), (1, 2)];
        pairs.iter().all(|&(i, j)| {
            (dot(&rows[i], &rows[j]) / (mag[i] * mag[j])).abs() < 1.0e-6
        })
    }

    /// Parse 16 whitespace-separated floats.
    pub fn parse(text: &str) -> Option<Mat4> {
        let mut vals = [0.0f64; 16];
        let mut n = 0;
        for tok in text.split_whitespace() {
            if n == 16 {
                return None;
            }
            vals[n] = tok.parse().ok()?;
            n += 1;
        }
        if n != 16 {
            return None;
        }
        Some(Mat4(vals))
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Mat4::IDENTITY
    }
}

/// 16 space-separated values, shortest exact representation per element.
impl fmt::Display for Mat4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}
