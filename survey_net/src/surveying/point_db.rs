use crate::error::AdjustmentError;
use crate::geometry::{Axis, Point3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sigma value meaning "weight zero, excluded from the datum definition".
pub const EXCLUDED_SIGMA: f64 = -1.0;

/// Role of a point in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointRole {
    /// At least one component is a known control value.
    Control,
    /// Every component is estimated.
    Adjusted,
}

/// One coordinate component of a survey point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Known or approximate value.
    pub value: f64,
    /// Standard deviation of a control value, or [`EXCLUDED_SIGMA`].
    pub sigma: Option<f64>,
    /// Held fixed in a constrained adjustment and used as datum reference in
    /// a free adjustment.
    pub fixed: bool,
}

impl Coordinate {
    pub fn fixed(value: f64) -> Self {
        Self {
            value,
            sigma: None,
            fixed: true,
        }
    }

    pub fn approximate(value: f64) -> Self {
        Self {
            value,
            sigma: None,
            fixed: false,
        }
    }

    /// Whether the component is excluded from the datum constraints.
    pub fn is_excluded(&self) -> bool {
        self.sigma == Some(EXCLUDED_SIGMA)
    }
}

/// Representation of a survey point with per-axis coordinate components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyPoint {
    pub id: String,
    pub x: Option<Coordinate>,
    pub y: Option<Coordinate>,
    pub z: Option<Coordinate>,
}

impl SurveyPoint {
    /// Creates a point without any coordinate component.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            x: None,
            y: None,
            z: None,
        }
    }

    /// Horizontal control point.
    pub fn control(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(id)
            .with(Axis::X, Coordinate::fixed(x))
            .with(Axis::Y, Coordinate::fixed(y))
    }

    /// Three-dimensional control point.
    pub fn control3(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self::control(id, x, y).with(Axis::Z, Coordinate::fixed(z))
    }

    /// Height-only control point (benchmark).
    pub fn benchmark(id: impl Into<String>, z: f64) -> Self {
        Self::new(id).with(Axis::Z, Coordinate::fixed(z))
    }

    /// Horizontal point to be adjusted from approximate coordinates.
    pub fn unknown(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(id)
            .with(Axis::X, Coordinate::approximate(x))
            .with(Axis::Y, Coordinate::approximate(y))
    }

    /// Three-dimensional point to be adjusted.
    pub fn unknown3(id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self::unknown(id, x, y).with(Axis::Z, Coordinate::approximate(z))
    }

    /// Height-only point to be adjusted.
    pub fn unknown_height(id: impl Into<String>, z: f64) -> Self {
        Self::new(id).with(Axis::Z, Coordinate::approximate(z))
    }

    /// Sets (or replaces) one component.
    pub fn with(mut self, axis: Axis, coordinate: Coordinate) -> Self {
        *self.component_mut(axis) = Some(coordinate);
        self
    }

    /// Sets the sigma of an existing component. No-op if the component is
    /// missing.
    pub fn with_sigma(mut self, axis: Axis, sigma: f64) -> Self {
        if let Some(c) = self.component_mut(axis) {
            c.sigma = Some(sigma);
        }
        self
    }

    /// Sets the same sigma on every present component.
    pub fn with_sigmas(self, sigma: f64) -> Self {
        Axis::ALL
            .iter()
            .fold(self, |p, axis| p.with_sigma(*axis, sigma))
    }

    pub fn coordinate(&self, axis: Axis) -> Option<&Coordinate> {
        match axis {
            Axis::X => self.x.as_ref(),
            Axis::Y => self.y.as_ref(),
            Axis::Z => self.z.as_ref(),
        }
    }

    fn component_mut(&mut self, axis: Axis) -> &mut Option<Coordinate> {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }

    pub fn has_horizontal(&self) -> bool {
        self.x.is_some() && self.y.is_some()
    }

    pub fn has_height(&self) -> bool {
        self.z.is_some()
    }

    pub fn role(&self) -> PointRole {
        if Axis::ALL
            .iter()
            .filter_map(|a| self.coordinate(*a))
            .any(|c| c.fixed)
        {
            PointRole::Control
        } else {
            PointRole::Adjusted
        }
    }

    /// Approximate position; missing components read as zero.
    pub fn position(&self) -> Point3 {
        let v = |axis| self.coordinate(axis).map(|c| c.value).unwrap_or(0.0);
        Point3::new(v(Axis::X), v(Axis::Y), v(Axis::Z))
    }
}

/// Ordered collection of survey points with unique identifiers.
#[derive(Debug, Clone, Default)]
pub struct PointDatabase {
    points: Vec<SurveyPoint>,
    lookup: HashMap<String, usize>,
}

impl PointDatabase {
    /// Creates a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a survey point, rejecting duplicate identifiers and invalid
    /// sigmas.
    pub fn add_point(&mut self, point: SurveyPoint) -> Result<usize, AdjustmentError> {
        if self.lookup.contains_key(&point.id) {
            return Err(AdjustmentError::validation(format!(
                "duplicate point id '{}'",
                point.id
            )));
        }
        for axis in Axis::ALL {
            let Some(c) = point.coordinate(axis) else {
                continue;
            };
            if !c.value.is_finite() {
                return Err(AdjustmentError::validation(format!(
                    "point '{}': {} coordinate is not finite",
                    point.id,
                    axis.label()
                )));
            }
            if let Some(s) = c.sigma {
                if !(s > 0.0 || s == EXCLUDED_SIGMA) {
                    return Err(AdjustmentError::validation(format!(
                        "point '{}': sigma of {} must be positive or -1, got {s}",
                        point.id,
                        axis.label()
                    )));
                }
            }
        }
        let idx = self.points.len();
        self.lookup.insert(point.id.clone(), idx);
        self.points.push(point);
        Ok(idx)
    }

    pub fn get(&self, id: &str) -> Option<&SurveyPoint> {
        self.index_of(id).map(|i| &self.points[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SurveyPoint> {
        self.points.iter()
    }

    pub fn as_slice(&self) -> &[SurveyPoint] {
        &self.points
    }
}

impl std::ops::Index<usize> for PointDatabase {
    type Output = SurveyPoint;

    fn index(&self, idx: usize) -> &SurveyPoint {
        &self.points[idx]
    }
}
