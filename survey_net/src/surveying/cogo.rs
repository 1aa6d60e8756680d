//! Basic coordinate geometry (COGO) utilities used in surveying operations.

use crate::geometry::{Baseline, Point3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Unit in which angles are exchanged with the outside world.
///
/// The engine itself always works in radians.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AngleUnit {
    Rad,
    Deg,
    /// Gradians (400 per full circle).
    #[default]
    #[serde(alias = "grad")]
    Gon,
}

impl AngleUnit {
    /// Units per radian.
    fn rho(self) -> f64 {
        match self {
            AngleUnit::Rad => 1.0,
            AngleUnit::Deg => 180.0 / PI,
            AngleUnit::Gon => 200.0 / PI,
        }
    }

    /// Converts a value expressed in this unit to radians.
    pub fn to_rad(self, angle: f64) -> f64 {
        angle / self.rho()
    }

    /// Converts radians to this unit.
    pub fn from_rad(self, angle: f64) -> f64 {
        angle * self.rho()
    }
}

impl fmt::Display for AngleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AngleUnit::Rad => "rad",
            AngleUnit::Deg => "deg",
            AngleUnit::Gon => "gon",
        };
        f.write_str(s)
    }
}

impl FromStr for AngleUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rad" => Ok(AngleUnit::Rad),
            "deg" => Ok(AngleUnit::Deg),
            "gon" | "grad" => Ok(AngleUnit::Gon),
            other => Err(format!("unknown angle unit '{other}'")),
        }
    }
}

/// Computes the azimuth in radians from point `a` to point `b`, measured from
/// the positive X axis towards the positive Y axis, in `[0, 2π)`.
pub fn bearing(a: Point3, b: Point3) -> f64 {
    Baseline::between(a, b).azimuth()
}
