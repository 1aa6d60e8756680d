// Least squares network adjustment: relinearize, solve, update, reweight.

use super::config::{AdjustmentConfig, VarianceScale, WeightingMethod};
use super::datum::{datum_parameters, DatumParameter, FreeNetworkDatum};
use super::design::DesignMatrix;
use super::indexer::{NetworkState, Unknown, UnknownIndex};
use super::least_squares::{solver_for, NormalEquations, Solution};
use super::network::Network;
use super::observations::ObservationKind;
use super::results::{
    AdjustmentResult, AdjustmentStatus, CoordinateResult, NetworkCounts, ObservationResult,
    OrientationResult, PointResult, WeightingSummary,
};
use super::statistics::{
    adjusted_cofactors, error_ellipse, mad_scale, redundancy_numbers, residual_cofactors,
    residuals, standardize, weighted_square_sum,
};
use super::weights::{adaptive_tuning, robust_factors, DatumWeights, ObservationWeights};
use crate::error::AdjustmentError;
use crate::geometry::{normalize_angle, wrap_angle, Axis};
use nalgebra::{DVector, Matrix2};

/// Lifecycle of an adjustment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentState {
    Initialized,
    Iterating,
    Converged,
    MaxIterationsReached,
    Failed,
}

/// Everything needed to report on one solve.
#[derive(Debug, Clone)]
struct Iteration {
    design: DesignMatrix,
    solution: Solution,
    residuals: DVector<f64>,
    weights: ObservationWeights,
    datum_weights: Option<DVector<f64>>,
    sigma0: f64,
}

/// Iterative adjustment of one network with one configuration.
#[derive(Debug)]
pub struct Adjustment<'a> {
    network: &'a Network,
    config: &'a AdjustmentConfig,
    state: AdjustmentState,
    index: UnknownIndex,
    parameters: Vec<DatumParameter>,
    defect: usize,
    dof: usize,
    approximate: NetworkState,
    current: NetworkState,
    weights: ObservationWeights,
    datum_weights: Option<DatumWeights>,
    /// Robust tuning in effect for observations and for datum references.
    /// They only drift apart for adaptive functions.
    tuning: Vec<f64>,
    reference_tuning: Vec<f64>,
    sigma0_history: Vec<f64>,
}

impl<'a> Adjustment<'a> {
    /// Validates the configuration, orders the unknowns and checks the
    /// redundancy before anything is solved.
    pub fn new(network: &'a Network, config: &'a AdjustmentConfig) -> Result<Self, AdjustmentError> {
        config.validate()?;
        if network.observations().is_empty() {
            return Err(AdjustmentError::validation("network has no observations"));
        }
        let free = config.free_adjustment;
        let index = UnknownIndex::build(network, free);
        if index.is_empty() {
            return Err(AdjustmentError::validation("network has no unknowns"));
        }
        let approximate = NetworkState::initial(network);
        let (parameters, defect) = if free {
            let params = datum_parameters(network, &index);
            let datum = FreeNetworkDatum::new(&params, &index, &approximate);
            (datum.parameters.clone(), datum.defect())
        } else {
            (Vec::new(), 0)
        };
        let n_obs = network.observations().len();
        if n_obs + defect <= index.len() {
            return Err(AdjustmentError::InsufficientRedundancy {
                observations: n_obs,
                datum_constraints: defect,
                unknowns: index.len(),
            });
        }
        let dof = n_obs + defect - index.len();
        let weights = ObservationWeights::new(network, config.weighting_method)?;
        let datum_weights =
            free.then(|| DatumWeights::new(network, &index, config.reference_method()));
        Ok(Self {
            network,
            config,
            state: AdjustmentState::Initialized,
            index,
            parameters,
            defect,
            dof,
            current: approximate.clone(),
            approximate,
            weights,
            datum_weights,
            tuning: config.tuning(),
            reference_tuning: config.tuning(),
            sigma0_history: Vec::new(),
        })
    }

    pub fn state(&self) -> AdjustmentState {
        self.state
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.dof
    }

    pub fn datum_defect(&self) -> usize {
        self.defect
    }

    /// Iterates until convergence or until the budget runs out.
    pub fn run(&mut self) -> Result<AdjustmentResult, AdjustmentError> {
        match self.iterate() {
            Ok((last, iterations)) => Ok(self.build_result(&last, iterations)),
            Err(e) => {
                self.state = AdjustmentState::Failed;
                log::debug!("adjustment failed: {e}");
                Err(e)
            }
        }
    }

    fn iterate(&mut self) -> Result<(Iteration, usize), AdjustmentError> {
        let mut last = None;
        let mut iterations = 0;
        for iteration in 1..=self.config.max_iterations {
            self.state = AdjustmentState::Iterating;
            iterations = iteration;
            let outcome = self.step()?;
            let max_correction = self.max_coordinate_correction(&outcome.solution.delta);
            let weight_change = self.reweight(&outcome);
            log::debug!(
                "iteration {iteration}: sigma0 = {:.6}, max correction = {:.3e}, max weight change = {:.3e}",
                outcome.sigma0,
                max_correction,
                weight_change
            );
            last = Some(outcome);
            let weights_settled =
                !self.config.reweights() || weight_change < self.config.weight_tolerance;
            if max_correction < self.config.convergence_tolerance && weights_settled {
                self.state = AdjustmentState::Converged;
                break;
            }
        }
        if self.state != AdjustmentState::Converged {
            self.state = AdjustmentState::MaxIterationsReached;
            log::warn!(
                "adjustment stopped after {} iterations without converging",
                self.config.max_iterations
            );
        }
        let last = last.ok_or_else(|| AdjustmentError::validation("no iteration was run"))?;
        Ok((last, iterations))
    }

    /// Linearizes at the current estimate, solves and applies the corrections.
    fn step(&mut self) -> Result<Iteration, AdjustmentError> {
        let design = DesignMatrix::build(self.network, &self.index, &self.current)?;
        let eq = NormalEquations::assemble(&design, &self.weights);
        let datum = self
            .datum_weights
            .as_ref()
            .map(|_| FreeNetworkDatum::new(&self.parameters, &self.index, &self.current));
        let datum_weights = self.datum_weights.as_ref().map(|d| d.weights().clone());
        let mut solution = {
            let solver = solver_for(self.config, datum.as_ref().zip(datum_weights.as_ref()))?;
            solver.solve(&eq)?
        };
        if let (Some(datum), Some(w)) = (datum.as_ref(), datum_weights.as_ref()) {
            // the datum condition holds for the total corrections, which
            // matters once reference weights change between iterations
            let offset = DVector::from_iterator(
                self.index.len(),
                self.index
                    .iter()
                    .map(|(_, u)| {
                        let d = self.current.value(u) - self.approximate.value(u);
                        match u {
                            Unknown::Orientation { .. } => wrap_angle(d),
                            Unknown::Coordinate { .. } => d,
                        }
                    }),
            );
            let total = datum.s_transform(w, &(&offset + &solution.delta))?;
            solution.delta = total - offset;
        }
        self.current.apply(&self.index, &solution.delta);
        let v = residuals(&design, &solution.delta);
        let sigma0 = (weighted_square_sum(&v, &self.weights) / self.dof as f64).sqrt();
        self.sigma0_history.push(sigma0);
        Ok(Iteration {
            design,
            solution,
            residuals: v,
            weights: self.weights.clone(),
            datum_weights,
            sigma0,
        })
    }

    fn max_coordinate_correction(&self, delta: &DVector<f64>) -> f64 {
        self.index
            .iter()
            .filter(|(_, u)| matches!(u, Unknown::Coordinate { .. }))
            .map(|(col, _)| delta[col].abs())
            .fold(0.0, f64::max)
    }

    /// Recomputes robust weights from the priors and returns the largest
    /// relative weight change.
    ///
    /// Residuals are standardized with `q₀ᵢ·rᵢ`, the redundancy number taken
    /// under the weights of the solve. Rows with no redundancy keep their
    /// previous factor and stay out of the scale estimate.
    fn reweight(&mut self, it: &Iteration) -> f64 {
        let function = self.config.robust_function;
        let mut change = 0.0f64;
        if self.config.weighting_method == WeightingMethod::Robust {
            let r = redundancy_numbers(&it.design, &it.solution.cofactor, &it.weights);
            let qvv = residual_cofactors(&it.weights, &r);
            let u = self.rescaled(standardize(it.residuals.as_slice(), &qvv, 1.0), it.sigma0);
            let factors = robust_factors(function, &self.tuning, &u, self.weights.factors());
            if function.is_adaptive() {
                self.tuning = adaptive_tuning(&self.config.tuning(), &self.tuning, &u, &factors);
            }
            change = change.max(self.weights.rescale(&factors));
        }
        let robust_reference = self.config.reference_method() == WeightingMethod::Robust;
        if let (true, Some(dw)) = (robust_reference, self.datum_weights.as_ref()) {
            let prior = dw.prior();
            let mut totals = vec![0.0; self.index.len()];
            let mut cofactors = vec![None; self.index.len()];
            for (col, u) in self.index.iter() {
                if matches!(u, Unknown::Coordinate { .. }) && prior[col] > 0.0 {
                    totals[col] = self.current.value(u) - self.approximate.value(u);
                    cofactors[col] = Some(it.solution.cofactor[(col, col)]);
                }
            }
            let u = self.rescaled(standardize(&totals, &cofactors, 1.0), it.sigma0);
            let configured = self.config.tuning();
            if let Some(dw) = self.datum_weights.as_mut() {
                let factors = robust_factors(function, &self.reference_tuning, &u, dw.factors());
                if function.is_adaptive() {
                    self.reference_tuning =
                        adaptive_tuning(&configured, &self.reference_tuning, &u, &factors);
                }
                change = change.max(dw.rescale(&factors));
            }
        }
        change
    }

    /// Divides unit-scale standardized values by the configured variance
    /// scale.
    fn rescaled(&self, u: Vec<Option<f64>>, sigma0: f64) -> Vec<Option<f64>> {
        let posteriori = if sigma0 > 0.0 && sigma0.is_finite() {
            sigma0
        } else {
            1.0
        };
        let scale = match self.config.robust_scale {
            VarianceScale::APriori => 1.0,
            VarianceScale::APosteriori => posteriori,
            VarianceScale::Mad => mad_scale(&u).unwrap_or(posteriori),
        };
        u.into_iter().map(|u| u.map(|u| u / scale)).collect()
    }

    fn build_result(&self, it: &Iteration, iterations: usize) -> AdjustmentResult {
        let network = self.network;
        let q = &it.solution.cofactor;
        let sigma0 = it.sigma0;
        let variance = sigma0 * sigma0;
        let free = self.config.free_adjustment;

        let aqa = adjusted_cofactors(&it.design, q);
        let redundancy = redundancy_numbers(&it.design, q, &it.weights);
        let qvv = residual_cofactors(&it.weights, &redundancy);
        let normalized = standardize(it.residuals.as_slice(), &qvv, sigma0);

        let observations = network
            .observations()
            .iter()
            .enumerate()
            .map(|(i, obs)| {
                let v = it.residuals[i];
                let adjusted = match obs.kind {
                    ObservationKind::Azimuth | ObservationKind::Direction => {
                        normalize_angle(obs.value + v)
                    }
                    _ => obs.value + v,
                };
                let from = network
                    .station(obs.station)
                    .map(|s| s.point.clone())
                    .unwrap_or_default();
                ObservationResult {
                    index: i,
                    kind: obs.kind,
                    station: obs.station,
                    from,
                    target: obs.target.clone(),
                    observed: obs.value,
                    adjusted,
                    residual: v,
                    sigma: obs.sigma,
                    adjusted_sigma: sigma0 * aqa[i].max(0.0).sqrt(),
                    normalized_residual: normalized[i].unwrap_or(0.0),
                    redundancy: redundancy[i],
                    weight: it.weights.weight(i),
                }
            })
            .collect();

        let points = network
            .points()
            .iter()
            .enumerate()
            .map(|(p, point)| {
                let mut coordinates = Vec::new();
                let mut axes = Vec::new();
                let mut cols = Vec::new();
                for axis in Axis::ALL {
                    let Some(c) = point.coordinate(axis) else {
                        continue;
                    };
                    let u = Unknown::Coordinate { point: p, axis };
                    let col = self.index.coordinate(p, axis);
                    let adjusted = self.current.value(u);
                    let correction = adjusted - c.value;
                    let sigma = col.map(|j| sigma0 * q[(j, j)].max(0.0).sqrt());
                    let normalized_correction = sigma.map(|s| if s > 0.0 { correction / s } else { 0.0 });
                    let datum_weight = match (&it.datum_weights, col) {
                        (Some(w), Some(j)) => Some(w[j]),
                        _ => None,
                    };
                    if let Some(j) = col {
                        axes.push(axis);
                        cols.push(j);
                    }
                    coordinates.push(CoordinateResult {
                        axis,
                        approximate: c.value,
                        adjusted,
                        correction,
                        estimated: col.is_some(),
                        sigma,
                        normalized_correction,
                        datum_weight,
                    });
                }
                let covariance: Vec<Vec<f64>> = cols
                    .iter()
                    .map(|i| cols.iter().map(|j| variance * q[(*i, *j)]).collect())
                    .collect();
                let error_ellipse = match (
                    self.index.coordinate(p, Axis::X),
                    self.index.coordinate(p, Axis::Y),
                ) {
                    (Some(x), Some(y)) => Some(error_ellipse(&Matrix2::new(
                        variance * q[(x, x)],
                        variance * q[(x, y)],
                        variance * q[(y, x)],
                        variance * q[(y, y)],
                    ))),
                    _ => None,
                };
                PointResult {
                    id: point.id.clone(),
                    role: point.role(),
                    coordinates,
                    covariance_axes: axes,
                    covariance,
                    error_ellipse,
                }
            })
            .collect();

        let orientations = self
            .index
            .iter()
            .filter_map(|(col, u)| match u {
                Unknown::Orientation { station } => {
                    let s = &network.stations()[station];
                    Some(OrientationResult {
                        station: s.key,
                        point: s.point.clone(),
                        approximate: self.approximate.value(u),
                        adjusted: self.current.value(u),
                        sigma: sigma0 * q[(col, col)].max(0.0).sqrt(),
                    })
                }
                Unknown::Coordinate { .. } => None,
            })
            .collect();

        let movable = it
            .datum_weights
            .as_ref()
            .map(|w| w.iter().filter(|x| **x > 0.0).count())
            .unwrap_or(0);
        let fixed = if free {
            0
        } else {
            network
                .points()
                .iter()
                .flat_map(|p| Axis::ALL.into_iter().filter_map(move |a| p.coordinate(a)))
                .filter(|c| c.fixed)
                .count()
        };
        let coordinate_correction_sigma = match &it.datum_weights {
            Some(w) if movable > 0 => {
                let sum: f64 = self
                    .index
                    .iter()
                    .filter(|(_, u)| matches!(u, Unknown::Coordinate { .. }))
                    .map(|(col, u)| {
                        let d = self.current.value(u) - self.approximate.value(u);
                        w[col] * d * d
                    })
                    .sum();
                Some((sum / movable as f64).sqrt())
            }
            _ => None,
        };
        let orientation_unknowns = self.index.len() - self.index.coordinate_count();

        let robust = self.config.weighting_method == WeightingMethod::Robust
            || (free && self.config.reference_method() == WeightingMethod::Robust);
        let status = if self.state == AdjustmentState::Converged {
            AdjustmentStatus::Converged
        } else {
            AdjustmentStatus::MaxIterationsReached
        };
        log::info!(
            "adjustment {:?} after {} iterations: sigma0 = {:.5}, dof = {}, {} observations, {} unknowns",
            status,
            iterations,
            sigma0,
            self.dof,
            network.observations().len(),
            self.index.len()
        );

        AdjustmentResult {
            status,
            converged: status == AdjustmentStatus::Converged,
            iterations,
            free_adjustment: free,
            weighting: WeightingSummary {
                method: self.config.weighting_method,
                robust_function: robust.then_some(self.config.robust_function),
                tuning_constants: robust.then(|| {
                    if self.config.weighting_method == WeightingMethod::Robust {
                        self.tuning.clone()
                    } else {
                        self.reference_tuning.clone()
                    }
                }),
                robust_scale: robust.then_some(self.config.robust_scale),
                reference_weighting: free.then(|| self.config.reference_method()),
                free_constraint_method: free.then_some(self.config.free_constraint_method),
            },
            datum_parameters: self.parameters.clone(),
            sigma0,
            variance_factor: variance,
            degrees_of_freedom: self.dof,
            counts: NetworkCounts {
                observations: network.observations().len(),
                unknowns: self.index.len(),
                coordinate_unknowns: self.index.coordinate_count(),
                orientation_unknowns,
                datum_constraints: self.defect,
                movable_tie_points: movable,
                fixed_tie_points: fixed,
            },
            points,
            observations,
            orientations,
            sigma0_history: self.sigma0_history.clone(),
            coordinate_correction_sigma,
        }
    }
}

/// Adjusts `network` with `config`.
pub fn adjust_network(
    network: &Network,
    config: &AdjustmentConfig,
) -> Result<AdjustmentResult, AdjustmentError> {
    Adjustment::new(network, config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveying::observations::{Observation, Station};
    use crate::surveying::point_db::SurveyPoint;

    fn triangle() -> Network {
        let mut net = Network::new();
        net.add_point(SurveyPoint::control("A", 0.0, 0.0)).unwrap();
        net.add_point(SurveyPoint::control("B", 100.0, 0.0)).unwrap();
        net.add_point(SurveyPoint::unknown("C", 40.0, 40.0)).unwrap();
        net.add_station(Station::new(1, "A")).unwrap();
        net.add_station(Station::new(2, "B")).unwrap();
        let d = (50.0f64.powi(2) + 40.0f64.powi(2)).sqrt();
        for s in [1, 2] {
            net.add_observation(
                Observation::new(ObservationKind::HorizontalDistance, s, "C", d).with_sigma(0.01),
            )
            .unwrap();
        }
        net.add_observation(
            Observation::new(ObservationKind::Azimuth, 1, "C", 40f64.atan2(50.0)).with_sigma(1e-5),
        )
        .unwrap();
        net
    }

    #[test]
    fn simple_distance_network() {
        let net = triangle();
        let config = AdjustmentConfig::default();
        let mut adj = Adjustment::new(&net, &config).unwrap();
        assert_eq!(adj.state(), AdjustmentState::Initialized);
        assert_eq!(adj.degrees_of_freedom(), 1);
        let res = adj.run().unwrap();
        assert_eq!(adj.state(), AdjustmentState::Converged);
        let c = res.point("C").unwrap();
        assert!((c.adjusted(Axis::X).unwrap() - 50.0).abs() < 1e-6);
        assert!((c.adjusted(Axis::Y).unwrap() - 40.0).abs() < 1e-6);
        assert!(res.observations.iter().all(|o| o.residual.abs() < 1e-6));
        assert!(res.iterations > 1);
        assert_eq!(res.sigma0_history.len(), res.iterations);
    }

    #[test]
    fn failure_sets_state() {
        let mut net = triangle();
        net.add_point(SurveyPoint::unknown("D", 40.0, 0.0)).unwrap();
        // collinear distances leave the y of D undetermined
        net.add_observation(Observation::new(ObservationKind::HorizontalDistance, 1, "D", 40.0))
            .unwrap();
        net.add_observation(Observation::new(ObservationKind::HorizontalDistance, 2, "D", 60.0))
            .unwrap();
        let config = AdjustmentConfig::default();
        let mut adj = Adjustment::new(&net, &config).unwrap();
        assert!(matches!(adj.run(), Err(AdjustmentError::SingularSystem(_))));
        assert_eq!(adj.state(), AdjustmentState::Failed);
    }

    #[test]
    fn fixed_points_keep_their_values() {
        let res = adjust_network(&triangle(), &AdjustmentConfig::default()).unwrap();
        let a = res.point("A").unwrap();
        assert_eq!(a.correction(Axis::X), Some(0.0));
        assert!(a.sigma(Axis::X).is_none());
        assert!(a.error_ellipse.is_none());
        assert_eq!(res.counts.fixed_tie_points, 4);
        assert!(res.point("C").unwrap().error_ellipse.is_some());
    }
}
