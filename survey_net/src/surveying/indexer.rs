//! Ordering of the unknowns and the current estimate they describe.

use super::network::Network;
use super::observations::ObservationKind;
use crate::geometry::{normalize_angle, wrap_angle, Axis, Baseline, Point3};
use nalgebra::DVector;
use std::collections::HashMap;

/// One parameter of the adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unknown {
    /// Coordinate component of the point at this database index.
    Coordinate { point: usize, axis: Axis },
    /// Orientation of the horizontal circle of the station at this index.
    Orientation { station: usize },
}

/// Bidirectional map between unknowns and their column in the design matrix.
#[derive(Debug, Clone, Default)]
pub struct UnknownIndex {
    unknowns: Vec<Unknown>,
    coordinates: HashMap<(usize, Axis), usize>,
    orientations: HashMap<usize, usize>,
}

impl UnknownIndex {
    /// Coordinate unknowns come first in point order (x, y, z per point),
    /// followed by one orientation per station with direction observations.
    /// In a free adjustment fixed components are estimated too.
    pub fn build(network: &Network, free: bool) -> Self {
        let mut idx = Self::default();
        for (p, point) in network.points().iter().enumerate() {
            for axis in Axis::ALL {
                match point.coordinate(axis) {
                    Some(c) if free || !c.fixed => {
                        idx.push(Unknown::Coordinate { point: p, axis });
                    }
                    _ => {}
                }
            }
        }
        for (s, station) in network.stations().iter().enumerate() {
            let has_directions = network
                .observations()
                .iter()
                .any(|o| o.kind == ObservationKind::Direction && o.station == station.key);
            if has_directions {
                idx.push(Unknown::Orientation { station: s });
            }
        }
        idx
    }

    fn push(&mut self, unknown: Unknown) {
        let col = self.unknowns.len();
        match unknown {
            Unknown::Coordinate { point, axis } => {
                self.coordinates.insert((point, axis), col);
            }
            Unknown::Orientation { station } => {
                self.orientations.insert(station, col);
            }
        }
        self.unknowns.push(unknown);
    }

    pub fn coordinate(&self, point: usize, axis: Axis) -> Option<usize> {
        self.coordinates.get(&(point, axis)).copied()
    }

    pub fn orientation(&self, station: usize) -> Option<usize> {
        self.orientations.get(&station).copied()
    }

    pub fn len(&self) -> usize {
        self.unknowns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unknowns.is_empty()
    }

    pub fn coordinate_count(&self) -> usize {
        self.coordinates.len()
    }

    pub fn get(&self, col: usize) -> Unknown {
        self.unknowns[col]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Unknown)> + '_ {
        self.unknowns.iter().copied().enumerate()
    }
}

/// Current coordinates of every point and orientation of every station.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkState {
    pub positions: Vec<Point3>,
    pub orientations: Vec<f64>,
}

impl NetworkState {
    /// Approximate values of the network. Missing station orientations are
    /// taken from the circular mean of `azimuth - direction` over the
    /// station's direction observations.
    pub fn initial(network: &Network) -> Self {
        let positions: Vec<Point3> = network.points().iter().map(|p| p.position()).collect();
        let orientations = network
            .stations()
            .iter()
            .map(|station| {
                if let Some(o) = station.orientation {
                    return normalize_angle(o);
                }
                let Some(from) = network.points().index_of(&station.point) else {
                    return 0.0;
                };
                let (mut s, mut c) = (0.0, 0.0);
                for obs in network.observations() {
                    if obs.kind != ObservationKind::Direction || obs.station != station.key {
                        continue;
                    }
                    let Some(to) = network.points().index_of(&obs.target) else {
                        continue;
                    };
                    let b = Baseline::between(positions[from], positions[to]);
                    if b.horizontal_length() < 1e-8 {
                        continue;
                    }
                    let o = wrap_angle(b.azimuth() - obs.value);
                    s += o.sin();
                    c += o.cos();
                }
                if s == 0.0 && c == 0.0 {
                    0.0
                } else {
                    normalize_angle(s.atan2(c))
                }
            })
            .collect();
        Self {
            positions,
            orientations,
        }
    }

    /// Current value of an unknown.
    pub fn value(&self, unknown: Unknown) -> f64 {
        match unknown {
            Unknown::Coordinate { point, axis } => {
                let p = self.positions[point];
                match axis {
                    Axis::X => p.x,
                    Axis::Y => p.y,
                    Axis::Z => p.z,
                }
            }
            Unknown::Orientation { station } => self.orientations[station],
        }
    }

    /// Adds a correction vector ordered like `index`.
    pub fn apply(&mut self, index: &UnknownIndex, delta: &DVector<f64>) {
        for (col, unknown) in index.iter() {
            let d = delta[col];
            match unknown {
                Unknown::Coordinate { point, axis } => {
                    let p = &mut self.positions[point];
                    match axis {
                        Axis::X => p.x += d,
                        Axis::Y => p.y += d,
                        Axis::Z => p.z += d,
                    }
                }
                Unknown::Orientation { station } => {
                    self.orientations[station] = normalize_angle(self.orientations[station] + d);
                }
            }
        }
    }
}
