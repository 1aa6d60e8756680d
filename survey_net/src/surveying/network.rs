//! Container for the points, stations and observations of one adjustment.

use super::observations::{GnssBaseline, Observation, ObservationKind, Station};
use super::point_db::{PointDatabase, SurveyPoint};
use crate::error::AdjustmentError;
use nalgebra::Matrix3;
use std::collections::HashMap;

/// Observations that share one full covariance block.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedGroup {
    /// Indices of the dx, dy, dz observations.
    pub rows: [usize; 3],
    pub covariance: Matrix3<f64>,
}

/// A survey network ready for adjustment.
///
/// Every insertion is validated against what is already present, so points
/// have to be added before the stations standing on them and stations before
/// their observations.
#[derive(Debug, Clone, Default)]
pub struct Network {
    points: PointDatabase,
    stations: Vec<Station>,
    station_lookup: HashMap<u32, usize>,
    observations: Vec<Observation>,
    groups: Vec<CorrelatedGroup>,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_point(&mut self, point: SurveyPoint) -> Result<usize, AdjustmentError> {
        self.points.add_point(point)
    }

    pub fn add_station(&mut self, station: Station) -> Result<usize, AdjustmentError> {
        if self.station_lookup.contains_key(&station.key) {
            return Err(AdjustmentError::validation(format!(
                "duplicate station key {}",
                station.key
            )));
        }
        if self.points.get(&station.point).is_none() {
            return Err(AdjustmentError::validation(format!(
                "station {} stands on unknown point '{}'",
                station.key, station.point
            )));
        }
        if !station.instrument_height.is_finite() {
            return Err(AdjustmentError::validation(format!(
                "station {}: instrument height is not finite",
                station.key
            )));
        }
        let idx = self.stations.len();
        self.station_lookup.insert(station.key, idx);
        self.stations.push(station);
        Ok(idx)
    }

    /// Adds one uncorrelated observation and returns its index.
    pub fn add_observation(&mut self, obs: Observation) -> Result<usize, AdjustmentError> {
        let idx = self.observations.len();
        self.check_observation(idx, &obs)?;
        self.observations.push(obs);
        Ok(idx)
    }

    /// Adds the three components of a GNSS baseline as correlated
    /// observations and returns their indices.
    pub fn add_gnss_baseline(
        &mut self,
        baseline: GnssBaseline,
    ) -> Result<[usize; 3], AdjustmentError> {
        let cov = Matrix3::from_fn(|r, c| baseline.covariance[r][c]);
        if cov.iter().any(|v| !v.is_finite()) || (cov - cov.transpose()).amax() > 1e-12 * cov.amax()
        {
            return Err(AdjustmentError::validation(format!(
                "baseline {} -> {}: covariance must be finite and symmetric",
                baseline.station, baseline.target
            )));
        }
        if cov.cholesky().is_none() {
            return Err(AdjustmentError::validation(format!(
                "baseline {} -> {}: covariance is not positive definite",
                baseline.station, baseline.target
            )));
        }
        let comps = [
            (ObservationKind::GnssDx, baseline.dx, 0),
            (ObservationKind::GnssDy, baseline.dy, 1),
            (ObservationKind::GnssDz, baseline.dz, 2),
        ];
        let start = self.observations.len();
        let obs: Vec<Observation> = comps
            .iter()
            .map(|(kind, value, i)| {
                Observation::new(*kind, baseline.station, baseline.target.clone(), *value)
                    .with_sigma(cov[(*i, *i)].sqrt())
            })
            .collect();
        for (i, o) in obs.iter().enumerate() {
            self.check_observation(start + i, o)?;
        }
        self.observations.extend(obs);
        let rows = [start, start + 1, start + 2];
        self.groups.push(CorrelatedGroup {
            rows,
            covariance: cov,
        });
        Ok(rows)
    }

    fn check_observation(&self, idx: usize, obs: &Observation) -> Result<(), AdjustmentError> {
        let station = self.station(obs.station).ok_or_else(|| {
            AdjustmentError::validation(format!(
                "observation {idx}: unknown station key {}",
                obs.station
            ))
        })?;
        let target = self.points.get(&obs.target).ok_or_else(|| {
            AdjustmentError::validation(format!(
                "observation {idx}: unknown target point '{}'",
                obs.target
            ))
        })?;
        if !obs.value.is_finite() || !obs.target_height.is_finite() {
            return Err(AdjustmentError::validation(format!(
                "observation {idx}: value is not finite"
            )));
        }
        if let Some(s) = obs.sigma {
            if !(s > 0.0) || !s.is_finite() {
                return Err(AdjustmentError::validation(format!(
                    "observation {idx}: sigma must be positive, got {s}"
                )));
            }
        }
        // the station point exists, add_station checked it
        let from = self.points.get(&station.point);
        for axis in obs.kind.required_axes() {
            for (role, point) in [("station", from), ("target", Some(target))] {
                if point.and_then(|p| p.coordinate(*axis)).is_none() {
                    return Err(AdjustmentError::validation(format!(
                        "observation {idx} ({}): {role} point has no {} coordinate",
                        obs.kind,
                        axis.label()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn points(&self) -> &PointDatabase {
        &self.points
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn station(&self, key: u32) -> Option<&Station> {
        self.station_index(key).map(|i| &self.stations[i])
    }

    pub fn station_index(&self, key: u32) -> Option<usize> {
        self.station_lookup.get(&key).copied()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn correlated_groups(&self) -> &[CorrelatedGroup] {
        &self.groups
    }

    /// Whether any observation of `kind` is present.
    pub fn has_kind(&self, kind: ObservationKind) -> bool {
        self.observations.iter().any(|o| o.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Network {
        let mut net = Network::new();
        net.add_point(SurveyPoint::control("A", 0.0, 0.0)).unwrap();
        net.add_point(SurveyPoint::unknown("P", 10.0, 0.0)).unwrap();
        net.add_station(Station::new(1, "A")).unwrap();
        net
    }

    #[test]
    fn rejects_unknown_references() {
        let mut net = base();
        let bad_station = Observation::new(ObservationKind::HorizontalDistance, 9, "P", 10.0);
        assert!(matches!(
            net.add_observation(bad_station),
            Err(AdjustmentError::Validation(_))
        ));
        let bad_target = Observation::new(ObservationKind::HorizontalDistance, 1, "Q", 10.0);
        assert!(net.add_observation(bad_target).is_err());
        assert!(net.add_station(Station::new(2, "nowhere")).is_err());
        assert!(net.add_station(Station::new(1, "P")).is_err());
    }

    #[test]
    fn rejects_missing_components() {
        let mut net = base();
        let vd = Observation::new(ObservationKind::VerticalDistance, 1, "P", 1.0);
        let err = net.add_observation(vd).unwrap_err();
        assert!(err.to_string().contains("no z coordinate"));
    }

    #[test]
    fn rejects_bad_sigma() {
        let mut net = base();
        let obs = Observation::new(ObservationKind::HorizontalDistance, 1, "P", 10.0).with_sigma(0.0);
        assert!(net.add_observation(obs).is_err());
        assert!(net.observations().is_empty());
    }

    #[test]
    fn gnss_baseline_block() {
        let mut net = Network::new();
        net.add_point(SurveyPoint::control3("A", 0.0, 0.0, 0.0)).unwrap();
        net.add_point(SurveyPoint::unknown3("B", 1.0, 1.0, 1.0)).unwrap();
        net.add_station(Station::new(1, "A")).unwrap();
        let mut baseline = GnssBaseline {
            station: 1,
            target: "B".into(),
            dx: 1.0,
            dy: 1.0,
            dz: 1.0,
            covariance: [[4e-6, 1e-6, 0.0], [1e-6, 4e-6, 0.0], [0.0, 0.0, 9e-6]],
        };
        let rows = net.add_gnss_baseline(baseline.clone()).unwrap();
        assert_eq!(rows, [0, 1, 2]);
        assert_eq!(net.correlated_groups().len(), 1);
        assert!((net.observations()[2].sigma.unwrap() - 3e-3).abs() < 1e-12);

        baseline.covariance = [[1.0, 2.0, 0.0], [2.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert!(net.add_gnss_baseline(baseline).is_err());
        assert_eq!(net.observations().len(), 3);
    }
}
