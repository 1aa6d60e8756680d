//! Settings of one adjustment run.

use super::robust::RobustFunction;
use crate::error::AdjustmentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How observations (and datum reference points) are weighted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingMethod {
    /// Unit weights.
    Ordinary,
    /// Inverse variances.
    #[default]
    Weighted,
    /// Inverse variances scaled by a robust weight function.
    Robust,
}

/// Datum definition strategy of a free adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeConstraintMethod {
    #[default]
    InnerConstraint,
    PseudoInverse,
}

/// Scale dividing the standardized residuals before robust weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceScale {
    /// σ₀ = 1.
    APriori,
    /// σ̂₀ of the current solve.
    APosteriori,
    /// Median absolute deviation of the standardized values.
    #[default]
    Mad,
}

macro_rules! snake_case_enum_str {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self { $($ty::$variant => $name),+ })
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                    $($name => Ok($ty::$variant),)+
                    other => Err(format!("unknown value '{other}'")),
                }
            }
        }
    };
}

snake_case_enum_str!(WeightingMethod {
    Ordinary => "ordinary",
    Weighted => "weighted",
    Robust => "robust",
});

snake_case_enum_str!(FreeConstraintMethod {
    InnerConstraint => "inner_constraint",
    PseudoInverse => "pseudo_inverse",
});

snake_case_enum_str!(VarianceScale {
    APriori => "a_priori",
    APosteriori => "a_posteriori",
    Mad => "mad",
});

/// Configuration of an adjustment. Every field has a default so a partial
/// JSON object is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentConfig {
    pub free_adjustment: bool,
    pub free_constraint_method: FreeConstraintMethod,
    pub weighting_method: WeightingMethod,
    /// Weighting of the datum reference coordinates; follows
    /// `weighting_method` when unset.
    pub reference_weighting: Option<WeightingMethod>,
    pub robust_function: RobustFunction,
    /// Full tuning tuple of `robust_function`, replacing its default.
    pub tuning_constants: Option<Vec<f64>>,
    /// Overrides the first (scale) entry of the tuning tuple.
    pub tuning_constant: Option<f64>,
    pub robust_scale: VarianceScale,
    pub max_iterations: usize,
    /// Largest coordinate correction (metres) accepted as converged.
    pub convergence_tolerance: f64,
    /// Largest relative weight change accepted as converged (robust only).
    pub weight_tolerance: f64,
    /// Relative singular value threshold of the pseudo-inverse.
    pub rank_tolerance: f64,
}

impl Default for AdjustmentConfig {
    fn default() -> Self {
        Self {
            free_adjustment: false,
            free_constraint_method: FreeConstraintMethod::InnerConstraint,
            weighting_method: WeightingMethod::Weighted,
            reference_weighting: None,
            robust_function: RobustFunction::Huber,
            tuning_constants: None,
            tuning_constant: None,
            robust_scale: VarianceScale::Mad,
            max_iterations: 20,
            convergence_tolerance: 1e-5,
            weight_tolerance: 1e-3,
            rank_tolerance: 1e-10,
        }
    }
}

impl AdjustmentConfig {
    /// Tuning tuple the run starts from.
    pub fn tuning(&self) -> Vec<f64> {
        let mut k = self
            .tuning_constants
            .clone()
            .unwrap_or_else(|| self.robust_function.default_tuning().to_vec());
        if let (Some(c), Some(first)) = (self.tuning_constant, k.first_mut()) {
            *first = c;
        }
        k
    }

    pub fn reference_method(&self) -> WeightingMethod {
        self.reference_weighting.unwrap_or(self.weighting_method)
    }

    /// Whether any weights change between iterations.
    pub fn reweights(&self) -> bool {
        self.weighting_method == WeightingMethod::Robust
            || (self.free_adjustment && self.reference_method() == WeightingMethod::Robust)
    }

    pub fn validate(&self) -> Result<(), AdjustmentError> {
        self.robust_function
            .check_tuning(&self.tuning())
            .map_err(AdjustmentError::validation)?;
        if self.max_iterations == 0 {
            return Err(AdjustmentError::validation(
                "max_iterations must be at least 1",
            ));
        }
        for (name, v) in [
            ("convergence_tolerance", self.convergence_tolerance),
            ("weight_tolerance", self.weight_tolerance),
            ("rank_tolerance", self.rank_tolerance),
        ] {
            if !(v > 0.0 && v.is_finite()) {
                return Err(AdjustmentError::validation(format!(
                    "{name} must be positive, got {v}"
                )));
            }
        }
        Ok(())
    }
}
