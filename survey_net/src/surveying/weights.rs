//! Observation and datum reference weights.

use super::config::WeightingMethod;
use super::indexer::{Unknown, UnknownIndex};
use super::network::Network;
use super::robust::RobustFunction;
use crate::error::AdjustmentError;
use nalgebra::{DMatrix, DVector};

/// Diagonal block of the weight matrix covering one or more observations.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightBlock {
    /// Observation indices, ascending.
    pub rows: Vec<usize>,
    /// Weight before any robust scaling.
    pub prior: DMatrix<f64>,
    /// Weight in effect for the next solve.
    pub matrix: DMatrix<f64>,
}

/// Block diagonal observation weight matrix `P`.
#[derive(Debug, Clone)]
pub struct ObservationWeights {
    blocks: Vec<WeightBlock>,
    /// For every observation: (block, position inside the block).
    location: Vec<(usize, usize)>,
    /// Prior cofactor `(P₀⁻¹)ᵢᵢ` per observation.
    cofactors: Vec<f64>,
    factors: Vec<f64>,
}

impl ObservationWeights {
    pub fn new(network: &Network, method: WeightingMethod) -> Result<Self, AdjustmentError> {
        let n = network.observations().len();
        let mut grouped = vec![false; n];
        let mut blocks = Vec::new();
        for group in network.correlated_groups() {
            let prior = match method {
                WeightingMethod::Ordinary => DMatrix::identity(3, 3),
                WeightingMethod::Weighted | WeightingMethod::Robust => {
                    let cov = DMatrix::from_fn(3, 3, |r, c| group.covariance[(r, c)]);
                    cov.try_inverse().ok_or_else(|| {
                        AdjustmentError::validation(format!(
                            "singular baseline covariance at observations {:?}",
                            group.rows
                        ))
                    })?
                }
            };
            for r in group.rows {
                grouped[r] = true;
            }
            blocks.push(WeightBlock {
                rows: group.rows.to_vec(),
                matrix: prior.clone(),
                prior,
            });
        }
        let mut missing = 0usize;
        for (i, obs) in network.observations().iter().enumerate() {
            if grouped[i] {
                continue;
            }
            let w = match (method, obs.sigma) {
                (WeightingMethod::Ordinary, _) => 1.0,
                (_, Some(s)) => 1.0 / (s * s),
                (_, None) => {
                    missing += 1;
                    1.0
                }
            };
            let prior = DMatrix::from_element(1, 1, w);
            blocks.push(WeightBlock {
                rows: vec![i],
                matrix: prior.clone(),
                prior,
            });
        }
        if missing > 0 {
            log::warn!("{missing} observations without sigma use unit weight");
        }
        blocks.sort_by_key(|b| b.rows[0]);

        let mut location = vec![(0, 0); n];
        let mut cofactors = vec![0.0; n];
        for (b, block) in blocks.iter().enumerate() {
            let q = block.prior.clone().try_inverse().ok_or_else(|| {
                AdjustmentError::validation(format!("singular weight block at {:?}", block.rows))
            })?;
            for (k, r) in block.rows.iter().enumerate() {
                location[*r] = (b, k);
                cofactors[*r] = q[(k, k)];
            }
        }
        Ok(Self {
            blocks,
            location,
            cofactors,
            factors: vec![1.0; n],
        })
    }

    pub fn len(&self) -> usize {
        self.location.len()
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_empty()
    }

    pub fn blocks(&self) -> &[WeightBlock] {
        &self.blocks
    }

    /// Prior cofactor of observation `i`.
    pub fn prior_cofactor(&self, i: usize) -> f64 {
        self.cofactors[i]
    }

    /// Diagonal element of the current weight matrix.
    pub fn weight(&self, i: usize) -> f64 {
        let (b, k) = self.location[i];
        self.blocks[b].matrix[(k, k)]
    }

    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    /// Sets robust factors `f` so every block becomes
    /// `diag(√f)·P₀·diag(√f)`. Returns the largest relative weight change.
    pub fn rescale(&mut self, factors: &[f64]) -> f64 {
        let mut max_change = 0.0f64;
        for (old, new) in self.factors.iter().zip(factors) {
            max_change = max_change.max(relative_change(*old, *new));
        }
        self.factors.copy_from_slice(factors);
        for block in &mut self.blocks {
            let s: Vec<f64> = block.rows.iter().map(|r| factors[*r].sqrt()).collect();
            block.matrix = DMatrix::from_fn(block.rows.len(), block.rows.len(), |r, c| {
                s[r] * block.prior[(r, c)] * s[c]
            });
        }
        max_change
    }

    /// `P v`.
    pub fn apply(&self, v: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(v.len());
        for block in &self.blocks {
            for (r, row) in block.rows.iter().enumerate() {
                out[*row] = block
                    .rows
                    .iter()
                    .enumerate()
                    .map(|(c, col)| block.matrix[(r, c)] * v[*col])
                    .sum();
            }
        }
        out
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let n = self.len();
        let mut p = DMatrix::zeros(n, n);
        for block in &self.blocks {
            for (r, row) in block.rows.iter().enumerate() {
                for (c, col) in block.rows.iter().enumerate() {
                    p[(*row, *col)] = block.matrix[(r, c)];
                }
            }
        }
        p
    }
}

/// Per-unknown weights of the datum reference coordinates in a free
/// adjustment. Orientation unknowns never take part in the datum.
#[derive(Debug, Clone, PartialEq)]
pub struct DatumWeights {
    prior: DVector<f64>,
    current: DVector<f64>,
    factors: Vec<f64>,
}

impl DatumWeights {
    /// Reference components are the fixed ones; when the network holds no
    /// fixed component every coordinate is a reference. Components with
    /// sigma -1 get weight zero.
    pub fn new(network: &Network, index: &UnknownIndex, method: WeightingMethod) -> Self {
        let points = network.points();
        let any_fixed = index.iter().any(|(_, u)| match u {
            Unknown::Coordinate { point, axis } => {
                points[point].coordinate(axis).is_some_and(|c| c.fixed)
            }
            Unknown::Orientation { .. } => false,
        });
        let mut missing = 0usize;
        let prior = DVector::from_iterator(
            index.len(),
            index.iter().map(|(_, u)| {
                let Unknown::Coordinate { point, axis } = u else {
                    return 0.0;
                };
                let Some(c) = points[point].coordinate(axis) else {
                    return 0.0;
                };
                if c.is_excluded() || (any_fixed && !c.fixed) {
                    return 0.0;
                }
                match (method, c.sigma) {
                    (WeightingMethod::Ordinary, _) => 1.0,
                    (_, Some(s)) => 1.0 / (s * s),
                    (_, None) => {
                        missing += 1;
                        1.0
                    }
                }
            }),
        );
        if missing > 0 {
            log::warn!("{missing} reference coordinates without sigma use unit weight");
        }
        Self {
            current: prior.clone(),
            factors: vec![1.0; prior.len()],
            prior,
        }
    }

    pub fn weights(&self) -> &DVector<f64> {
        &self.current
    }

    pub fn prior(&self) -> &DVector<f64> {
        &self.prior
    }

    pub fn factors(&self) -> &[f64] {
        &self.factors
    }

    /// Number of unknowns with a non-zero reference weight.
    pub fn reference_count(&self) -> usize {
        self.current.iter().filter(|w| **w > 0.0).count()
    }

    /// Sets `w = w₀·f` and returns the largest relative weight change.
    pub fn rescale(&mut self, factors: &[f64]) -> f64 {
        let mut max_change = 0.0f64;
        for j in 0..self.current.len() {
            let new = self.prior[j] * factors[j];
            if self.prior[j] > 0.0 {
                max_change = max_change.max(relative_change(self.current[j], new));
            }
            self.current[j] = new;
        }
        self.factors.copy_from_slice(factors);
        max_change
    }
}

fn relative_change(old: f64, new: f64) -> f64 {
    let scale = old.abs().max(new.abs());
    if scale == 0.0 {
        0.0
    } else {
        (new - old).abs() / scale
    }
}

/// Smallest robust factor handed out. Keeps every observation in the normal
/// equations so a hard-redescending function cannot make them singular.
pub const MIN_ROBUST_FACTOR: f64 = 1e-6;

/// Robust factors for a set of standardized values. Where `u` is undefined
/// the factor from the previous iteration is kept.
pub fn robust_factors(
    function: RobustFunction,
    tuning: &[f64],
    u: &[Option<f64>],
    previous: &[f64],
) -> Vec<f64> {
    u.iter()
        .zip(previous)
        .map(|(u, prev)| match u {
            Some(u) => function.weight(*u, tuning).max(MIN_ROBUST_FACTOR),
            None => *prev,
        })
        .collect()
}

/// Rescales the first tuning constant by the weighted RMS of the defined
/// standardized values, `c = c₀·√(Σ fᵢuᵢ² / Σ fᵢ)`. Falls back to `current`
/// when that spread is degenerate.
pub fn adaptive_tuning(
    configured: &[f64],
    current: &[f64],
    u: &[Option<f64>],
    factors: &[f64],
) -> Vec<f64> {
    let (num, den) = u
        .iter()
        .zip(factors)
        .filter_map(|(u, f)| u.map(|u| (f * u * u, *f)))
        .fold((0.0, 0.0), |(n, d), (a, b)| (n + a, d + b));
    let spread = (num / den).sqrt();
    if den > 0.0 && spread.is_finite() && spread > 0.0 {
        let mut k = configured.to_vec();
        k[0] *= spread;
        k
    } else {
        current.to_vec()
    }
}
