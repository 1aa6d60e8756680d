//! Linearized observation equations.

use super::indexer::{NetworkState, UnknownIndex};
use super::network::Network;
use super::observations::{Observation, ObservationKind};
use crate::error::AdjustmentError;
use crate::geometry::{normalize_angle, wrap_angle, Axis, Baseline, Point3};
use nalgebra::{DMatrix, DVector};

/// Shortest baseline (metres) for which directions and distances are
/// differentiable.
const MIN_LENGTH: f64 = 1e-8;

/// Sparse row of the design matrix: `(column, partial derivative)` pairs in
/// ascending column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesignRow {
    pub entries: Vec<(usize, f64)>,
}

impl DesignRow {
    fn add(&mut self, col: usize, value: f64) {
        match self.entries.binary_search_by_key(&col, |(c, _)| *c) {
            Ok(i) => self.entries[i].1 += value,
            Err(i) => self.entries.insert(i, (col, value)),
        }
    }

    pub fn dot(&self, x: &DVector<f64>) -> f64 {
        self.entries.iter().map(|(c, v)| v * x[*c]).sum()
    }
}

/// Design matrix `A`, modeled values and misclosures `l = observed - modeled`
/// at one linearization point.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    pub rows: Vec<DesignRow>,
    pub modeled: Vec<f64>,
    pub misclosures: DVector<f64>,
    pub ncols: usize,
}

impl DesignMatrix {
    /// Linearizes every observation at `state`.
    pub fn build(
        network: &Network,
        index: &UnknownIndex,
        state: &NetworkState,
    ) -> Result<Self, AdjustmentError> {
        let n = network.observations().len();
        let mut rows = Vec::with_capacity(n);
        let mut modeled = Vec::with_capacity(n);
        let mut misclosures = DVector::zeros(n);
        for (i, obs) in network.observations().iter().enumerate() {
            let (row, value) = linearize(i, obs, network, index, state)?;
            let l = obs.value - value;
            misclosures[i] = if obs.kind.is_angular() {
                wrap_angle(l)
            } else {
                l
            };
            rows.push(row);
            modeled.push(value);
        }
        Ok(Self {
            rows,
            modeled,
            misclosures,
            ncols: index.len(),
        })
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    /// `A x`.
    pub fn mul(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.rows.len(), self.rows.iter().map(|r| r.dot(x)))
    }

    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut a = DMatrix::zeros(self.rows.len(), self.ncols);
        for (i, row) in self.rows.iter().enumerate() {
            for (c, v) in &row.entries {
                a[(i, *c)] = *v;
            }
        }
        a
    }
}

fn degenerate(index: usize, obs: &Observation, station: &str, reason: &str) -> AdjustmentError {
    AdjustmentError::DegenerateGeometry {
        index,
        station: station.to_string(),
        target: obs.target.clone(),
        reason: reason.to_string(),
    }
}

/// Modeled value and partials of one observation.
fn linearize(
    i: usize,
    obs: &Observation,
    network: &Network,
    index: &UnknownIndex,
    state: &NetworkState,
) -> Result<(DesignRow, f64), AdjustmentError> {
    let station_idx = network
        .station_index(obs.station)
        .ok_or_else(|| AdjustmentError::validation(format!("observation {i}: unknown station")))?;
    let station = &network.stations()[station_idx];
    let from = network.points().index_of(&station.point).ok_or_else(|| {
        AdjustmentError::validation(format!("observation {i}: unknown station point"))
    })?;
    let to = network.points().index_of(&obs.target).ok_or_else(|| {
        AdjustmentError::validation(format!("observation {i}: unknown target point"))
    })?;

    let s = state.positions[from];
    let t = state.positions[to];
    let b = Baseline::between(
        Point3::new(s.x, s.y, s.z + station.instrument_height),
        Point3::new(t.x, t.y, t.z + obs.target_height),
    );
    let h = b.horizontal_length();
    let fail = |reason: &str| degenerate(i, obs, &station.point, reason);

    // value and partials with respect to the target coordinates
    let (value, grad) = match obs.kind {
        ObservationKind::SlopeDistance => {
            let d = b.slope_length();
            if d < MIN_LENGTH {
                return Err(fail("zero slope distance"));
            }
            (d, [b.dx / d, b.dy / d, b.dz / d])
        }
        ObservationKind::HorizontalDistance => {
            if h < MIN_LENGTH {
                return Err(fail("zero horizontal distance"));
            }
            (h, [b.dx / h, b.dy / h, 0.0])
        }
        ObservationKind::VerticalDistance | ObservationKind::GnssDz => (b.dz, [0.0, 0.0, 1.0]),
        ObservationKind::GnssDx => (b.dx, [1.0, 0.0, 0.0]),
        ObservationKind::GnssDy => (b.dy, [0.0, 1.0, 0.0]),
        ObservationKind::Azimuth | ObservationKind::Direction => {
            if h < MIN_LENGTH {
                return Err(fail("zero horizontal distance"));
            }
            let h2 = h * h;
            let grad = [-b.dy / h2, b.dx / h2, 0.0];
            let az = b.azimuth();
            if obs.kind == ObservationKind::Direction {
                let o = state.orientations[station_idx];
                (normalize_angle(az - o), grad)
            } else {
                (az, grad)
            }
        }
        ObservationKind::ZenithAngle | ObservationKind::VerticalAngle => {
            if h < MIN_LENGTH {
                return Err(fail("zero horizontal distance"));
            }
            let s2 = h * h + b.dz * b.dz;
            let k = b.dz / (h * s2);
            let grad = [b.dx * k, b.dy * k, -h / s2];
            if obs.kind == ObservationKind::ZenithAngle {
                (b.zenith_angle(), grad)
            } else {
                (b.dz.atan2(h), [-grad[0], -grad[1], -grad[2]])
            }
        }
    };

    let mut row = DesignRow::default();
    for axis in Axis::ALL {
        let g = grad[axis.index()];
        if g == 0.0 {
            continue;
        }
        if let Some(col) = index.coordinate(to, axis) {
            row.add(col, g);
        }
        if let Some(col) = index.coordinate(from, axis) {
            row.add(col, -g);
        }
    }
    if obs.kind == ObservationKind::Direction {
        if let Some(col) = index.orientation(station_idx) {
            row.add(col, -1.0);
        }
    }
    Ok((row, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveying::observations::Station;
    use crate::surveying::point_db::SurveyPoint;

    fn net_with(obs: Vec<Observation>) -> Network {
        let mut net = Network::new();
        net.add_point(SurveyPoint::unknown3("A", 1.0, 2.0, 3.0)).unwrap();
        net.add_point(SurveyPoint::unknown3("B", 31.0, 42.0, 13.0)).unwrap();
        net.add_station(Station::new(1, "A").with_height(1.5).with_orientation(0.3))
            .unwrap();
        for o in obs {
            net.add_observation(o).unwrap();
        }
        net
    }

    /// Compares analytic partials against central differences.
    fn check_partials(kind: ObservationKind) {
        let net = net_with(vec![Observation::new(kind, 1, "B", 0.0).with_target_height(0.7)]);
        let idx = UnknownIndex::build(&net, true);
        let state = NetworkState::initial(&net);
        let a = DesignMatrix::build(&net, &idx, &state).unwrap();
        let eps = 1e-6;
        for col in 0..idx.len() {
            let mut dx = DVector::zeros(idx.len());
            dx[col] = eps;
            let mut plus = state.clone();
            plus.apply(&idx, &dx);
            let mut minus = state.clone();
            minus.apply(&idx, &(-dx));
            let fp = DesignMatrix::build(&net, &idx, &plus).unwrap().modeled[0];
            let fm = DesignMatrix::build(&net, &idx, &minus).unwrap().modeled[0];
            let numeric = wrap_angle(fp - fm) / (2.0 * eps);
            let analytic = a.to_dense()[(0, col)];
            assert!(
                (numeric - analytic).abs() < 1e-6,
                "{kind}: column {col} numeric {numeric} analytic {analytic}"
            );
        }
    }

    #[test]
    fn partials_match_finite_differences() {
        for kind in ObservationKind::ALL {
            check_partials(kind);
        }
    }

    #[test]
    fn heights_enter_vertical_models() {
        let net = net_with(vec![
            Observation::new(ObservationKind::VerticalDistance, 1, "B", 0.0).with_target_height(0.7),
        ]);
        let idx = UnknownIndex::build(&net, true);
        let state = NetworkState::initial(&net);
        let a = DesignMatrix::build(&net, &idx, &state).unwrap();
        assert!((a.modeled[0] - (13.0 + 0.7 - 3.0 - 1.5)).abs() < 1e-12);
        assert!((a.misclosures[0] + a.modeled[0]).abs() < 1e-12);
    }

    #[test]
    fn angular_misclosure_wrapped() {
        let net = net_with(vec![Observation::new(ObservationKind::Azimuth, 1, "B", 0.0)]);
        let idx = UnknownIndex::build(&net, true);
        let mut state = NetworkState::initial(&net);
        state.positions[1] = Point3::new(31.0, 1.999, 13.0);
        let a = DesignMatrix::build(&net, &idx, &state).unwrap();
        assert!(a.modeled[0] > 6.28);
        assert!(a.misclosures[0] > 0.0 && a.misclosures[0] < 1e-3);
    }

    #[test]
    fn coincident_points_are_degenerate() {
        let mut net = Network::new();
        net.add_point(SurveyPoint::control("A", 5.0, 5.0)).unwrap();
        net.add_point(SurveyPoint::unknown("B", 5.0, 5.0)).unwrap();
        net.add_station(Station::new(7, "A")).unwrap();
        net.add_observation(Observation::new(ObservationKind::HorizontalDistance, 7, "B", 1.0))
            .unwrap();
        net.add_observation(Observation::new(ObservationKind::Azimuth, 7, "B", 1.0))
            .unwrap();
        let idx = UnknownIndex::build(&net, false);
        let state = NetworkState::initial(&net);
        match DesignMatrix::build(&net, &idx, &state) {
            Err(AdjustmentError::DegenerateGeometry { index, station, target, .. }) => {
                assert_eq!(index, 0);
                assert_eq!(station, "A");
                assert_eq!(target, "B");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fixed_coordinates_have_no_column() {
        let mut net = Network::new();
        net.add_point(SurveyPoint::control("A", 0.0, 0.0)).unwrap();
        net.add_point(SurveyPoint::unknown("B", 3.0, 4.0)).unwrap();
        net.add_station(Station::new(1, "A")).unwrap();
        net.add_observation(Observation::new(ObservationKind::HorizontalDistance, 1, "B", 5.0))
            .unwrap();
        let idx = UnknownIndex::build(&net, false);
        let a = DesignMatrix::build(&net, &idx, &NetworkState::initial(&net)).unwrap();
        assert_eq!(a.rows[0].entries, vec![(0, 0.6), (1, 0.8)]);
        assert!(a.misclosures[0].abs() < 1e-12);
    }
}
