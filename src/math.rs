//! Projective 3x3 matrix helpers and the angle type used by the heuristics.
//!
//! Homographies are stored as [glam::DMat3] internally but exchanged as
//! row-major `[f64; 9]` arrays, which is how the annotation store persists them.

use glam::{DMat3, DVec3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::Point;

/// Determinant magnitude below which a matrix is treated as singular.
pub const SINGULAR_DET_EPS: f64 = 1e-10;
/// Homogeneous scale below which a projected point is at infinity.
pub const INFINITY_W_EPS: f64 = 1e-4;

/// Angle in degrees
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Degree(f64);
impl Default for Degree {
    fn default() -> Self {
        Self(0.0)
    }
}
impl Degree {
    pub fn new(deg: f64) -> Self {
        Self(deg)
    }
    pub fn from_radians(rad: f64) -> Self {
        Self(rad.to_degrees())
    }
    pub fn degrees(&self) -> f64 {
        self.0
    }
    pub fn radians(&self) -> f64 {
        self.0.to_radians()
    }

    /// Signed deviation from the nearest multiple of 90 degrees, in (-45, 45].
    pub fn axis_deviation(&self) -> Degree {
        let mut deg = self.0;
        while deg <= -45.0 {
            deg += 90.0;
        }
        while deg > 45.0 {
            deg -= 90.0;
        }
        Degree(deg)
    }
}

/// A planar projective transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography(DMat3);

impl Default for Homography {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Homography {
    pub const IDENTITY: Self = Self(DMat3::IDENTITY);

    pub fn from_mat3(m: DMat3) -> Self {
        Self(m)
    }

    pub fn from_row_major(m: [f64; 9]) -> Self {
        Self(DMat3::from_cols_array(&m).transpose())
    }

    pub fn to_row_major(&self) -> [f64; 9] {
        self.0.transpose().to_cols_array()
    }

    /// Pure translation by `(tx, ty)`.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self::from_row_major([1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0])
    }

    pub fn as_mat3(&self) -> &DMat3 {
        &self.0
    }

    pub fn determinant(&self) -> f64 {
        self.0.determinant()
    }

    /// True when the linear part mirrors the plane (`h0*h4 - h1*h3 < 0`).
    pub fn is_reflection(&self) -> bool {
        let h = self.to_row_major();
        h[0] * h[4] - h[1] * h[3] < 0.0
    }

    pub fn inverse(&self) -> Option<Self> {
        invert(self)
    }

    /// `other` applied after `self`.
    pub fn then(&self, other: &Homography) -> Self {
        multiply(other, self)
    }

    pub fn project(&self, x: f64, y: f64) -> Option<Point> {
        project(x, y, self)
    }

    pub fn abs_diff_eq(&self, other: &Homography, max_abs_diff: f64) -> bool {
        self.0.abs_diff_eq(other.0, max_abs_diff)
    }
}

impl Serialize for Homography {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_row_major().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Homography {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        <[f64; 9]>::deserialize(deserializer).map(Self::from_row_major)
    }
}

/// Inverse of `h`, or `None` when `|det(h)| < 1e-10`.
pub fn invert(h: &Homography) -> Option<Homography> {
    let det = h.0.determinant();
    if !det.is_finite() || det.abs() < SINGULAR_DET_EPS {
        return None;
    }
    Some(Homography(h.0.inverse()))
}

/// Composition "apply `h1`, then `h2`".
///
/// If `h1` maps S→A and `h2` maps A→B, the result maps S→B.
pub fn multiply(h2: &Homography, h1: &Homography) -> Homography {
    Homography(h2.0 * h1.0)
}

/// Maps `(x, y)` through `h`; `None` when the point lands at infinity.
pub fn project(x: f64, y: f64, h: &Homography) -> Option<Point> {
    let v = h.0 * DVec3::new(x, y, 1.0);
    if !v.z.is_finite() || v.z.abs() < INFINITY_W_EPS {
        return None;
    }
    Some(Point::new(v.x / v.z, v.y / v.z))
}
