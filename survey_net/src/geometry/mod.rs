//! Basic geometry primitives for network adjustment.

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

/// Coordinate axis of a survey point.
///
/// `X` and `Y` span the horizontal plane; azimuths are measured from the
/// positive X axis towards the positive Y axis. `Z` is the height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    /// All axes in unknown-vector order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Position of the axis inside `[x, y, z]` arrays.
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }

    pub fn is_horizontal(self) -> bool {
        !matches!(self, Axis::Z)
    }
}

/// Representation of a 3D point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Coordinate differences from an instrument to a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Baseline {
    /// Builds the baseline `to - from`.
    pub fn between(from: Point3, to: Point3) -> Self {
        Self {
            dx: to.x - from.x,
            dy: to.y - from.y,
            dz: to.z - from.z,
        }
    }

    /// Length of the horizontal projection.
    pub fn horizontal_length(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    /// Spatial (slope) length.
    pub fn slope_length(&self) -> f64 {
        (self.dx * self.dx + self.dy * self.dy + self.dz * self.dz).sqrt()
    }

    /// Azimuth of the horizontal projection in `[0, 2π)`.
    pub fn azimuth(&self) -> f64 {
        normalize_angle(self.dy.atan2(self.dx))
    }

    /// Angle between the zenith and the baseline in `[0, π]`.
    pub fn zenith_angle(&self) -> f64 {
        self.horizontal_length().atan2(self.dz)
    }
}

/// Maps an angle into `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs
    if a >= TAU {
        0.0
    } else {
        a
    }
}

/// Maps an angle difference into `(-π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let a = normalize_angle(angle);
    if a > PI {
        a - TAU
    } else {
        a
    }
}
