//! Post-adjustment statistics.

use super::design::DesignMatrix;
use super::weights::ObservationWeights;
use nalgebra::{DMatrix, DVector, Matrix2, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Standard error ellipse of a horizontal position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorEllipse {
    /// Semi-major axis.
    pub a: f64,
    /// Semi-minor axis.
    pub b: f64,
    /// Direction of the semi-major axis from the X axis towards the Y axis,
    /// in `[0, π)`.
    pub phi: f64,
}

/// Error ellipse of a 2×2 `(x, y)` covariance block.
pub fn error_ellipse(cov: &Matrix2<f64>) -> ErrorEllipse {
    let eig = SymmetricEigen::new(*cov);
    let (major, minor) = if eig.eigenvalues[0] >= eig.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let v = eig.eigenvectors.column(major);
    let mut phi = v[1].atan2(v[0]).rem_euclid(PI);
    if phi >= PI {
        phi = 0.0;
    }
    ErrorEllipse {
        a: eig.eigenvalues[major].max(0.0).sqrt(),
        b: eig.eigenvalues[minor].max(0.0).sqrt(),
        phi,
    }
}

/// `v = A·Δx - l`.
pub fn residuals(design: &DesignMatrix, delta: &DVector<f64>) -> DVector<f64> {
    design.mul(delta) - &design.misclosures
}

/// `vᵗPv`.
pub fn weighted_square_sum(v: &DVector<f64>, weights: &ObservationWeights) -> f64 {
    v.dot(&weights.apply(v))
}

/// Diagonal of `A·Q·Aᵗ`.
pub fn adjusted_cofactors(design: &DesignMatrix, q: &DMatrix<f64>) -> Vec<f64> {
    design
        .rows
        .iter()
        .map(|row| quadratic_form(&row.entries, &row.entries, q))
        .collect()
}

fn quadratic_form(a: &[(usize, f64)], b: &[(usize, f64)], q: &DMatrix<f64>) -> f64 {
    let mut sum = 0.0;
    for (i, ai) in a {
        for (j, bj) in b {
            sum += ai * q[(*i, *j)] * bj;
        }
    }
    sum
}

/// Redundancy numbers below this mark an observation the adjustment cannot
/// check; its residual has no usable variance.
pub const MIN_REDUNDANCY: f64 = 1e-10;

/// Residual cofactors `q₀ᵢ·rᵢ` from the prior cofactor and the redundancy
/// number of the solve that produced the residuals. `None` where `rᵢ` is
/// below [`MIN_REDUNDANCY`].
pub fn residual_cofactors(weights: &ObservationWeights, redundancy: &[f64]) -> Vec<Option<f64>> {
    let negative = redundancy.iter().filter(|r| **r < -MIN_REDUNDANCY).count();
    if negative > 0 {
        log::warn!("{negative} negative redundancy numbers treated as uncontrolled");
    }
    redundancy
        .iter()
        .enumerate()
        .map(|(i, r)| (*r >= MIN_REDUNDANCY).then(|| weights.prior_cofactor(i) * r))
        .collect()
}

/// `u = v / (σ₀·√q)`. Undefined (`None`) where the cofactor is missing or
/// the variance vanishes, so callers decide how such rows count.
pub fn standardize(values: &[f64], cofactors: &[Option<f64>], sigma0: f64) -> Vec<Option<f64>> {
    values
        .iter()
        .zip(cofactors)
        .map(|(v, q)| {
            let s = sigma0 * (*q).filter(|q| *q > 0.0)?.sqrt();
            (s > 0.0 && s.is_finite()).then(|| v / s)
        })
        .collect()
}

/// `1.4826·median(|u|)` over the defined values; a consistent estimate of
/// the standard deviation under normal errors. `None` when no value is
/// defined or the spread collapses.
pub fn mad_scale(u: &[Option<f64>]) -> Option<f64> {
    let mut abs: Vec<f64> = u.iter().flatten().map(|u| u.abs()).collect();
    if abs.is_empty() {
        return None;
    }
    abs.sort_by(f64::total_cmp);
    let n = abs.len();
    let median = if n % 2 == 1 {
        abs[n / 2]
    } else {
        0.5 * (abs[n / 2 - 1] + abs[n / 2])
    };
    let s = 1.482_602_218_505_602 * median;
    (s.is_finite() && s > 1e-12).then_some(s)
}

/// Redundancy numbers `(Q_vv P)ᵢᵢ = 1 - (A Q Aᵗ P)ᵢᵢ` with the current weights.
pub fn redundancy_numbers(
    design: &DesignMatrix,
    q: &DMatrix<f64>,
    weights: &ObservationWeights,
) -> Vec<f64> {
    let mut r = vec![0.0; design.nrows()];
    for block in weights.blocks() {
        for (k, row_i) in block.rows.iter().enumerate() {
            let a_i = &design.rows[*row_i].entries;
            let mut aqap = 0.0;
            for (c, row_c) in block.rows.iter().enumerate() {
                let p = block.matrix[(c, k)];
                if p != 0.0 {
                    aqap += quadratic_form(a_i, &design.rows[*row_c].entries, q) * p;
                }
            }
            r[*row_i] = 1.0 - aqap;
        }
    }
    r
}
