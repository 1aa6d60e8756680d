use thiserror::Error;

/// Fatal conditions that abort an adjustment run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdjustmentError {
    /// Inconsistent input: unknown references, bad sigmas or bad settings.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Ill-defined geometry for a single observation.
    #[error("degenerate geometry in observation {index} ({station} -> {target}): {reason}")]
    DegenerateGeometry {
        index: usize,
        station: String,
        target: String,
        reason: String,
    },
    /// Normal equations cannot be solved or regularized.
    #[error("singular normal equations: {0}")]
    SingularSystem(String),
    /// Not enough observations to estimate the reference variance.
    #[error(
        "insufficient redundancy: {observations} observations + {datum_constraints} datum constraints \
         do not exceed {unknowns} unknowns"
    )]
    InsufficientRedundancy {
        observations: usize,
        datum_constraints: usize,
        unknowns: usize,
    },
}

impl AdjustmentError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        AdjustmentError::Validation(msg.into())
    }

    pub(crate) fn singular(msg: impl Into<String>) -> Self {
        AdjustmentError::SingularSystem(msg.into())
    }
}
