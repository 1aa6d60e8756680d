// Normal equations and the strategies that solve them: Cholesky for
// constrained networks, inner constraints or the pseudo-inverse with an
// S-transformation for free networks.

use super::config::{AdjustmentConfig, FreeConstraintMethod};
use super::datum::FreeNetworkDatum;
use super::design::DesignMatrix;
use super::weights::ObservationWeights;
use crate::error::AdjustmentError;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SVD};

/// Smallest accepted ratio between the smallest and largest Cholesky pivot.
pub const PIVOT_TOLERANCE: f64 = 1e-14;

/// `N = AᵗPA` and `b = AᵗPl`.
#[derive(Debug, Clone)]
pub struct NormalEquations {
    pub n: DMatrix<f64>,
    pub b: DVector<f64>,
}

impl NormalEquations {
    /// Accumulates block by block in observation order.
    pub fn assemble(design: &DesignMatrix, weights: &ObservationWeights) -> Self {
        let m = design.ncols;
        let mut n = DMatrix::zeros(m, m);
        let mut b = DVector::zeros(m);
        for block in weights.blocks() {
            for (r, row_r) in block.rows.iter().enumerate() {
                let a_r = &design.rows[*row_r];
                for (c, row_c) in block.rows.iter().enumerate() {
                    let p = block.matrix[(r, c)];
                    if p == 0.0 {
                        continue;
                    }
                    let a_c = &design.rows[*row_c];
                    let l = design.misclosures[*row_c];
                    for (i, ai) in &a_r.entries {
                        for (j, aj) in &a_c.entries {
                            n[(*i, *j)] += ai * p * aj;
                        }
                        b[*i] += ai * p * l;
                    }
                }
            }
        }
        Self { n, b }
    }

    pub fn size(&self) -> usize {
        self.b.len()
    }
}

/// Corrections to the unknowns and their cofactor matrix.
#[derive(Debug, Clone)]
pub struct Solution {
    pub delta: DVector<f64>,
    /// `Q_xx`; multiplied by σ₀² it is the covariance of the unknowns.
    pub cofactor: DMatrix<f64>,
    /// Rank deficiency the solver regularized.
    pub datum_defect: usize,
}

/// Strategy for solving the normal equations.
pub trait NormalEquationSolver {
    fn name(&self) -> &'static str;

    fn solve(&self, eq: &NormalEquations) -> Result<Solution, AdjustmentError>;
}

/// Picks the solver for the configured adjustment type.
pub fn solver_for<'a>(
    config: &AdjustmentConfig,
    datum: Option<(&'a FreeNetworkDatum, &'a DVector<f64>)>,
) -> Result<Box<dyn NormalEquationSolver + 'a>, AdjustmentError> {
    match (config.free_adjustment, datum) {
        (false, _) => Ok(Box::new(CholeskySolver)),
        (true, Some((datum, weights))) => Ok(match config.free_constraint_method {
            FreeConstraintMethod::InnerConstraint => {
                Box::new(InnerConstraintSolver { datum, weights })
            }
            FreeConstraintMethod::PseudoInverse => Box::new(PseudoInverseSolver {
                datum,
                weights,
                rank_tolerance: config.rank_tolerance,
            }),
        }),
        (true, None) => Err(AdjustmentError::validation(
            "free adjustment requires a datum definition",
        )),
    }
}

/// Cholesky factorization with a pivot ratio check.
fn checked_cholesky(
    m: &DMatrix<f64>,
    what: &str,
) -> Result<Cholesky<f64, Dyn>, AdjustmentError> {
    let chol = m
        .clone()
        .cholesky()
        .ok_or_else(|| AdjustmentError::singular(format!("{what} is not positive definite")))?;
    let diag = chol.l_dirty().diagonal();
    let (mut lo, mut hi) = (f64::INFINITY, 0.0f64);
    for d in diag.iter() {
        let p = d * d;
        lo = lo.min(p);
        hi = hi.max(p);
    }
    if diag.is_empty() || hi == 0.0 || lo / hi < PIVOT_TOLERANCE {
        return Err(AdjustmentError::singular(format!(
            "{what} is numerically singular (pivot ratio {:.3e})",
            if hi > 0.0 { lo / hi } else { 0.0 }
        )));
    }
    Ok(chol)
}

/// Constrained adjustment: `N` must be regular.
#[derive(Debug, Clone, Copy, Default)]
pub struct CholeskySolver;

impl NormalEquationSolver for CholeskySolver {
    fn name(&self) -> &'static str {
        "cholesky"
    }

    fn solve(&self, eq: &NormalEquations) -> Result<Solution, AdjustmentError> {
        let chol = checked_cholesky(&eq.n, "normal matrix")?;
        Ok(Solution {
            delta: chol.solve(&eq.b),
            cofactor: chol.inverse(),
            datum_defect: 0,
        })
    }
}

/// Free adjustment regularized with `k·RᵗR`.
#[derive(Debug, Clone)]
pub struct InnerConstraintSolver<'a> {
    pub datum: &'a FreeNetworkDatum,
    pub weights: &'a DVector<f64>,
}

impl NormalEquationSolver for InnerConstraintSolver<'_> {
    fn name(&self) -> &'static str {
        "inner_constraint"
    }

    fn solve(&self, eq: &NormalEquations) -> Result<Solution, AdjustmentError> {
        let r = self.datum.constraint_matrix(self.weights);
        let rtr = r.transpose() * &r;
        let tr_rtr = rtr.trace();
        if !(tr_rtr > 0.0) {
            return Err(AdjustmentError::singular(
                "no reference coordinates carry weight in the datum",
            ));
        }
        let k = eq.n.trace() / tr_rtr;
        let k = if k > 0.0 { k } else { 1.0 };
        let m = &eq.n + rtr * k;
        let chol = checked_cholesky(&m, "regularized normal matrix")?;
        let m_inv = chol.inverse();
        Ok(Solution {
            delta: chol.solve(&eq.b),
            cofactor: &m_inv * &eq.n * &m_inv,
            datum_defect: self.datum.defect(),
        })
    }
}

/// Free adjustment by Moore-Penrose inverse, moved to the reference
/// coordinates by an S-transformation.
#[derive(Debug, Clone)]
pub struct PseudoInverseSolver<'a> {
    pub datum: &'a FreeNetworkDatum,
    pub weights: &'a DVector<f64>,
    /// Singular values below `rank_tolerance · σ_max` count as zero.
    pub rank_tolerance: f64,
}

impl NormalEquationSolver for PseudoInverseSolver<'_> {
    fn name(&self) -> &'static str {
        "pseudo_inverse"
    }

    fn solve(&self, eq: &NormalEquations) -> Result<Solution, AdjustmentError> {
        let size = eq.size();
        let (n_plus, null_space) = pseudoinverse(&eq.n, self.rank_tolerance)?;
        let defect = null_space.ncols();
        if defect != self.datum.defect() {
            log::warn!(
                "numerical rank defect {} differs from the geometric datum defect {}",
                defect,
                self.datum.defect()
            );
        }
        let x_plus = &n_plus * &eq.b;
        if defect == 0 {
            return Ok(Solution {
                delta: x_plus,
                cofactor: n_plus,
                datum_defect: 0,
            });
        }
        // S = I - G (GᵗWG)⁻¹ GᵗW
        let gtw = {
            let mut m = null_space.transpose();
            for (j, w) in self.weights.iter().enumerate() {
                m.column_mut(j).scale_mut(*w);
            }
            m
        };
        let gtwg = &gtw * &null_space;
        let chol = checked_cholesky(&gtwg, "datum reference matrix GᵗWG")?;
        let s = DMatrix::identity(size, size) - &null_space * chol.solve(&gtw);
        Ok(Solution {
            delta: &s * x_plus,
            cofactor: &s * n_plus * s.transpose(),
            datum_defect: defect,
        })
    }
}

/// Moore-Penrose inverse of a symmetric matrix and an orthonormal basis of
/// its null space.
fn pseudoinverse(
    m: &DMatrix<f64>,
    tol: f64,
) -> Result<(DMatrix<f64>, DMatrix<f64>), AdjustmentError> {
    let svd = SVD::new(m.clone(), true, true);
    let max = svd.singular_values.max();
    let threshold = tol * max;
    let u = svd
        .u
        .ok_or_else(|| AdjustmentError::singular("SVD did not return U"))?;
    let vt = svd
        .v_t
        .ok_or_else(|| AdjustmentError::singular("SVD did not return Vᵗ"))?;
    let mut s_inv = svd.singular_values.clone();
    let mut null_cols = Vec::new();
    for (i, val) in s_inv.iter_mut().enumerate() {
        if *val > threshold && max > 0.0 {
            *val = 1.0 / *val;
        } else {
            *val = 0.0;
            null_cols.push(vt.row(i).transpose());
        }
    }
    let pinv = vt.transpose() * DMatrix::from_diagonal(&s_inv) * u.transpose();
    let null_space = if null_cols.is_empty() {
        DMatrix::zeros(m.nrows(), 0)
    } else {
        DMatrix::from_columns(&null_cols)
    };
    Ok((pinv, null_space))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveying::datum::{datum_parameters, FreeNetworkDatum};
    use crate::surveying::indexer::{NetworkState, UnknownIndex};
    use crate::surveying::network::Network;
    use crate::surveying::observations::{Observation, ObservationKind, Station};
    use crate::surveying::point_db::SurveyPoint;
    use crate::surveying::config::WeightingMethod;

    #[test]
    fn pseudoinverse_of_singular_matrix() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        let (p, null) = pseudoinverse(&m, 1e-10).unwrap();
        let expected = DMatrix::from_row_slice(2, 2, &[0.25, -0.25, -0.25, 0.25]);
        assert!((p - expected).amax() < 1e-12);
        assert_eq!(null.ncols(), 1);
        assert!((null[(0, 0)].abs() - 0.5f64.sqrt()).abs() < 1e-12);
        assert!((null[(0, 0)] - null[(1, 0)]).abs() < 1e-12);
    }

    #[test]
    fn cholesky_rejects_singular() {
        let eq = NormalEquations {
            n: DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]),
            b: DVector::zeros(2),
        };
        assert!(matches!(
            CholeskySolver.solve(&eq),
            Err(AdjustmentError::SingularSystem(_))
        ));
    }

    #[test]
    fn cholesky_solves_regular() {
        let eq = NormalEquations {
            n: DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]),
            b: DVector::from_vec(vec![1.0, 2.0]),
        };
        let sol = CholeskySolver.solve(&eq).unwrap();
        assert!((&eq.n * &sol.delta - &eq.b).amax() < 1e-12);
        assert!((&eq.n * &sol.cofactor - DMatrix::identity(2, 2)).amax() < 1e-12);
    }

    /// Leveling line with three heights, a datum defect of one.
    fn leveling() -> (Network, UnknownIndex, NetworkState) {
        let mut net = Network::new();
        net.add_point(SurveyPoint::benchmark("A", 10.0)).unwrap();
        net.add_point(SurveyPoint::benchmark("B", 11.0)).unwrap();
        net.add_point(SurveyPoint::unknown_height("C", 12.0)).unwrap();
        net.add_station(Station::new(1, "A")).unwrap();
        net.add_station(Station::new(2, "B")).unwrap();
        let obs = [(1, "B", 1.01), (2, "C", 0.98), (1, "C", 2.0)];
        for (s, t, v) in obs {
            net.add_observation(
                Observation::new(ObservationKind::VerticalDistance, s, t, v).with_sigma(0.01),
            )
            .unwrap();
        }
        let index = UnknownIndex::build(&net, true);
        let state = NetworkState::initial(&net);
        (net, index, state)
    }

    #[test]
    fn free_solvers_agree() {
        let (net, index, state) = leveling();
        let design = DesignMatrix::build(&net, &index, &state).unwrap();
        let weights = ObservationWeights::new(&net, WeightingMethod::Weighted).unwrap();
        let eq = NormalEquations::assemble(&design, &weights);
        let datum = FreeNetworkDatum::new(&datum_parameters(&net, &index), &index, &state);
        assert_eq!(datum.defect(), 1);
        let w = DVector::from_vec(vec![1.0, 1.0, 0.0]);
        let ic = InnerConstraintSolver { datum: &datum, weights: &w }.solve(&eq).unwrap();
        let pi = PseudoInverseSolver {
            datum: &datum,
            weights: &w,
            rank_tolerance: 1e-10,
        }
        .solve(&eq)
        .unwrap();
        assert!((&ic.delta - &pi.delta).amax() < 1e-9);
        assert!((&ic.cofactor - &pi.cofactor).amax() < 1e-6 * ic.cofactor.amax());
        // reference heights move by opposite amounts
        assert!((ic.delta[0] + ic.delta[1]).abs() < 1e-10);
        assert_eq!(ic.datum_defect, 1);
    }

    #[test]
    fn unusable_reference_is_singular() {
        let (net, index, state) = leveling();
        let design = DesignMatrix::build(&net, &index, &state).unwrap();
        let weights = ObservationWeights::new(&net, WeightingMethod::Weighted).unwrap();
        let eq = NormalEquations::assemble(&design, &weights);
        let datum = FreeNetworkDatum::new(&datum_parameters(&net, &index), &index, &state);
        let w = DVector::zeros(3);
        let pi = PseudoInverseSolver {
            datum: &datum,
            weights: &w,
            rank_tolerance: 1e-10,
        };
        assert!(matches!(pi.solve(&eq), Err(AdjustmentError::SingularSystem(_))));
        let ic = InnerConstraintSolver { datum: &datum, weights: &w };
        assert!(matches!(ic.solve(&eq), Err(AdjustmentError::SingularSystem(_))));
    }

    #[test]
    fn assembly_matches_dense_product() {
        let (net, index, state) = leveling();
        let design = DesignMatrix::build(&net, &index, &state).unwrap();
        let weights = ObservationWeights::new(&net, WeightingMethod::Weighted).unwrap();
        let eq = NormalEquations::assemble(&design, &weights);
        let a = design.to_dense();
        let p = weights.to_dense();
        let n = a.transpose() * &p * &a;
        let b = a.transpose() * &p * &design.misclosures;
        assert!((eq.n - n).amax() < 1e-6);
        assert!((eq.b - b).amax() < 1e-6);
    }
}
