//! Surveying specific utilities: the network model and its least squares
//! adjustment.

pub mod cogo;
pub use cogo::{bearing, AngleUnit};

pub mod point_db;
pub use point_db::{Coordinate, PointDatabase, PointRole, SurveyPoint, EXCLUDED_SIGMA};

pub mod observations;
pub use observations::{GnssBaseline, Observation, ObservationKind, Station};

pub mod network;
pub use network::{CorrelatedGroup, Network};

pub mod config;
pub use config::{AdjustmentConfig, FreeConstraintMethod, VarianceScale, WeightingMethod};

pub mod robust;
pub use robust::RobustFunction;

pub mod indexer;
pub use indexer::{NetworkState, Unknown, UnknownIndex};

pub mod design;
pub use design::{DesignMatrix, DesignRow};

pub mod weights;
pub use weights::{DatumWeights, ObservationWeights, WeightBlock};

pub mod datum;
pub use datum::{datum_parameters, DatumParameter, FreeNetworkDatum};

pub mod least_squares;
pub use least_squares::{
    solver_for, CholeskySolver, InnerConstraintSolver, NormalEquationSolver, NormalEquations,
    PseudoInverseSolver, Solution,
};

pub mod statistics;
pub use statistics::{error_ellipse, ErrorEllipse};

pub mod results;
pub use results::{
    AdjustmentResult, AdjustmentStatus, CoordinateResult, NetworkCounts, ObservationResult,
    OrientationResult, PointResult, WeightingSummary,
};

pub mod adjustment;
pub use adjustment::{adjust_network, Adjustment, AdjustmentState};
