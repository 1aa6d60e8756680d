//! Typed observations and instrument stations.

use crate::geometry::Axis;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObservationKind {
    /// Slope distance.
    #[serde(rename = "sd")]
    SlopeDistance,
    /// Horizontal distance.
    #[serde(rename = "hd")]
    HorizontalDistance,
    /// Height difference.
    #[serde(rename = "vd")]
    VerticalDistance,
    /// Grid azimuth from the X axis towards the Y axis.
    #[serde(rename = "a")]
    Azimuth,
    /// Horizontal circle reading, relative to the station orientation.
    #[serde(rename = "hz")]
    Direction,
    /// Zenith angle.
    #[serde(rename = "vz")]
    ZenithAngle,
    /// Vertical angle above the horizon.
    #[serde(rename = "vh")]
    VerticalAngle,
    #[serde(rename = "dx")]
    GnssDx,
    #[serde(rename = "dy")]
    GnssDy,
    #[serde(rename = "dz")]
    GnssDz,
}

impl ObservationKind {
    pub const ALL: [ObservationKind; 10] = [
        ObservationKind::SlopeDistance,
        ObservationKind::HorizontalDistance,
        ObservationKind::VerticalDistance,
        ObservationKind::Azimuth,
        ObservationKind::Direction,
        ObservationKind::ZenithAngle,
        ObservationKind::VerticalAngle,
        ObservationKind::GnssDx,
        ObservationKind::GnssDy,
        ObservationKind::GnssDz,
    ];

    /// Short code used in project files and reports.
    pub fn code(self) -> &'static str {
        match self {
            ObservationKind::SlopeDistance => "sd",
            ObservationKind::HorizontalDistance => "hd",
            ObservationKind::VerticalDistance => "vd",
            ObservationKind::Azimuth => "a",
            ObservationKind::Direction => "hz",
            ObservationKind::ZenithAngle => "vz",
            ObservationKind::VerticalAngle => "vh",
            ObservationKind::GnssDx => "dx",
            ObservationKind::GnssDy => "dy",
            ObservationKind::GnssDz => "dz",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }

    /// Value and sigma are angles.
    pub fn is_angular(self) -> bool {
        matches!(
            self,
            ObservationKind::Azimuth
                | ObservationKind::Direction
                | ObservationKind::ZenithAngle
                | ObservationKind::VerticalAngle
        )
    }

    pub fn is_gnss(self) -> bool {
        matches!(
            self,
            ObservationKind::GnssDx | ObservationKind::GnssDy | ObservationKind::GnssDz
        )
    }

    /// Coordinate components both endpoints must carry.
    pub fn required_axes(self) -> &'static [Axis] {
        match self {
            ObservationKind::SlopeDistance
            | ObservationKind::ZenithAngle
            | ObservationKind::VerticalAngle => &[Axis::X, Axis::Y, Axis::Z],
            ObservationKind::HorizontalDistance
            | ObservationKind::Azimuth
            | ObservationKind::Direction => &[Axis::X, Axis::Y],
            ObservationKind::VerticalDistance | ObservationKind::GnssDz => &[Axis::Z],
            ObservationKind::GnssDx => &[Axis::X],
            ObservationKind::GnssDy => &[Axis::Y],
        }
    }
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Instrument setup on a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub key: u32,
    pub point: String,
    #[serde(default)]
    pub instrument_height: f64,
    /// Approximate orientation of the horizontal circle in radians.
    #[serde(default)]
    pub orientation: Option<f64>,
}

impl Station {
    pub fn new(key: u32, point: impl Into<String>) -> Self {
        Self {
            key,
            point: point.into(),
            instrument_height: 0.0,
            orientation: None,
        }
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.instrument_height = height;
        self
    }

    pub fn with_orientation(mut self, orientation: f64) -> Self {
        self.orientation = Some(orientation);
        self
    }
}

/// A single measured quantity from a station to a target point.
///
/// Distances are in metres, angles in radians.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub kind: ObservationKind,
    pub station: u32,
    pub target: String,
    #[serde(default)]
    pub target_height: f64,
    pub value: f64,
    #[serde(default)]
    pub sigma: Option<f64>,
}

impl Observation {
    pub fn new(kind: ObservationKind, station: u32, target: impl Into<String>, value: f64) -> Self {
        Self {
            kind,
            station,
            target: target.into(),
            target_height: 0.0,
            value,
            sigma: None,
        }
    }

    pub fn with_sigma(mut self, sigma: f64) -> Self {
        self.sigma = Some(sigma);
        self
    }

    pub fn with_target_height(mut self, height: f64) -> Self {
        self.target_height = height;
        self
    }
}

/// GNSS baseline vector with its full covariance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnssBaseline {
    pub station: u32,
    pub target: String,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    /// Row-major 3×3 covariance of `(dx, dy, dz)`.
    pub covariance: [[f64; 3]; 3],
}
