//! Read-only outcome of an adjustment run.

use super::config::{FreeConstraintMethod, VarianceScale, WeightingMethod};
use super::datum::DatumParameter;
use super::observations::ObservationKind;
use super::point_db::PointRole;
use super::robust::RobustFunction;
use super::statistics::ErrorEllipse;
use crate::geometry::Axis;
use serde::{Deserialize, Serialize};

/// Final state of the iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Converged,
    /// The iteration budget ran out; the last solution is reported.
    MaxIterationsReached,
}

/// Settings that shaped the weights of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightingSummary {
    pub method: WeightingMethod,
    pub robust_function: Option<RobustFunction>,
    /// Tuning tuple in effect at the last reweighting. Adaptive functions
    /// report their refreshed scale constant.
    pub tuning_constants: Option<Vec<f64>>,
    pub robust_scale: Option<VarianceScale>,
    pub reference_weighting: Option<WeightingMethod>,
    pub free_constraint_method: Option<FreeConstraintMethod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounts {
    pub observations: usize,
    pub unknowns: usize,
    pub coordinate_unknowns: usize,
    pub orientation_unknowns: usize,
    pub datum_constraints: usize,
    /// Reference coordinates allowed to move in a free adjustment.
    pub movable_tie_points: usize,
    /// Coordinates held fixed in a constrained adjustment.
    pub fixed_tie_points: usize,
}

/// One coordinate component of an adjusted point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateResult {
    pub axis: Axis,
    pub approximate: f64,
    pub adjusted: f64,
    pub correction: f64,
    /// Whether the component was an unknown of the adjustment.
    pub estimated: bool,
    pub sigma: Option<f64>,
    pub normalized_correction: Option<f64>,
    /// Datum reference weight in a free adjustment.
    pub datum_weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointResult {
    pub id: String,
    pub role: PointRole,
    pub coordinates: Vec<CoordinateResult>,
    /// Axes of the rows and columns of `covariance`.
    pub covariance_axes: Vec<Axis>,
    pub covariance: Vec<Vec<f64>>,
    pub error_ellipse: Option<ErrorEllipse>,
}

impl PointResult {
    pub fn coordinate(&self, axis: Axis) -> Option<&CoordinateResult> {
        self.coordinates.iter().find(|c| c.axis == axis)
    }

    pub fn adjusted(&self, axis: Axis) -> Option<f64> {
        self.coordinate(axis).map(|c| c.adjusted)
    }

    pub fn correction(&self, axis: Axis) -> Option<f64> {
        self.coordinate(axis).map(|c| c.correction)
    }

    pub fn sigma(&self, axis: Axis) -> Option<f64> {
        self.coordinate(axis).and_then(|c| c.sigma)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationResult {
    pub index: usize,
    pub kind: ObservationKind,
    pub station: u32,
    pub from: String,
    pub target: String,
    pub observed: f64,
    pub adjusted: f64,
    pub residual: f64,
    pub sigma: Option<f64>,
    pub adjusted_sigma: f64,
    pub normalized_residual: f64,
    pub redundancy: f64,
    /// Weight used in the final solve.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationResult {
    pub station: u32,
    pub point: String,
    pub approximate: f64,
    pub adjusted: f64,
    pub sigma: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentResult {
    pub status: AdjustmentStatus,
    pub converged: bool,
    /// Number of solves. A run counts the solve that confirms the last
    /// correction vanished, so ordinary and weighted adjustments of a linear
    /// network report 2.
    pub iterations: usize,
    pub free_adjustment: bool,
    pub weighting: WeightingSummary,
    pub datum_parameters: Vec<DatumParameter>,
    /// A posteriori reference standard deviation.
    pub sigma0: f64,
    pub variance_factor: f64,
    pub degrees_of_freedom: usize,
    pub counts: NetworkCounts,
    pub points: Vec<PointResult>,
    pub observations: Vec<ObservationResult>,
    pub orientations: Vec<OrientationResult>,
    /// σ₀ after every iteration.
    pub sigma0_history: Vec<f64>,
    pub coordinate_correction_sigma: Option<f64>,
}

impl AdjustmentResult {
    pub fn point(&self, id: &str) -> Option<&PointResult> {
        self.points.iter().find(|p| p.id == id)
    }
}
