//! Datum defect analysis of free networks.

use super::indexer::{NetworkState, Unknown, UnknownIndex};
use super::network::Network;
use super::observations::ObservationKind as K;
use crate::error::AdjustmentError;
use crate::geometry::Axis;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Transformation parameter left undetermined by the observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumParameter {
    TranslationX,
    TranslationY,
    TranslationZ,
    /// Rotation about the vertical axis.
    Rotation,
    /// Common horizontal and vertical scale.
    Scale,
    HorizontalScale,
    VerticalScale,
}

/// Datum parameters the observation types of `network` leave free for the
/// unknowns in `index`.
pub fn datum_parameters(network: &Network, index: &UnknownIndex) -> Vec<DatumParameter> {
    let has_axis = |axis: Axis| {
        index
            .iter()
            .any(|(_, u)| matches!(u, Unknown::Coordinate { axis: a, .. } if a == axis))
    };
    let (has_x, has_y, has_z) = (has_axis(Axis::X), has_axis(Axis::Y), has_axis(Axis::Z));
    let has = |kinds: &[K]| kinds.iter().any(|k| network.has_kind(*k));

    let mut params = Vec::new();
    if has_x {
        params.push(DatumParameter::TranslationX);
    }
    if has_y {
        params.push(DatumParameter::TranslationY);
    }
    if has_z {
        params.push(DatumParameter::TranslationZ);
    }
    let horizontal = has_x && has_y;
    if horizontal && !has(&[K::Azimuth, K::GnssDx, K::GnssDy]) {
        params.push(DatumParameter::Rotation);
    }
    let h_free = horizontal
        && !has(&[
            K::SlopeDistance,
            K::HorizontalDistance,
            K::GnssDx,
            K::GnssDy,
        ]);
    let v_free = has_z && !has(&[K::SlopeDistance, K::VerticalDistance, K::GnssDz]);
    if has(&[K::ZenithAngle, K::VerticalAngle]) {
        // angles tie both scales together
        let h_needed = horizontal;
        let v_needed = has_z;
        if (h_free || !h_needed) && (v_free || !v_needed) && (h_needed || v_needed) {
            params.push(if h_needed && v_needed {
                DatumParameter::Scale
            } else if h_needed {
                DatumParameter::HorizontalScale
            } else {
                DatumParameter::VerticalScale
            });
        }
    } else {
        if h_free {
            params.push(DatumParameter::HorizontalScale);
        }
        if v_free {
            params.push(DatumParameter::VerticalScale);
        }
    }
    params
}

/// Orthonormal basis of the datum null space at one linearization point.
#[derive(Debug, Clone)]
pub struct FreeNetworkDatum {
    pub parameters: Vec<DatumParameter>,
    /// `n_unknowns × defect`, orthonormal columns.
    pub basis: DMatrix<f64>,
}

impl FreeNetworkDatum {
    pub fn new(parameters: &[DatumParameter], index: &UnknownIndex, state: &NetworkState) -> Self {
        let n = index.len();
        let centroid = centroid(index, state);
        let mut columns: Vec<(DatumParameter, DVector<f64>)> = Vec::new();
        for param in parameters {
            let col = DVector::from_iterator(
                n,
                index.iter().map(|(_, u)| null_vector_entry(*param, u, state, centroid)),
            );
            columns.push((*param, col));
        }

        // modified Gram-Schmidt, dropping columns that collapse
        let mut kept: Vec<DatumParameter> = Vec::new();
        let mut basis: Vec<DVector<f64>> = Vec::new();
        for (param, mut col) in columns {
            let norm0 = col.norm();
            if norm0 == 0.0 {
                log::warn!("datum parameter {param:?} has no effect on the unknowns");
                continue;
            }
            for _ in 0..2 {
                for q in &basis {
                    let proj = q.dot(&col);
                    col.axpy(-proj, q, 1.0);
                }
            }
            let norm = col.norm();
            if norm < 1e-10 * norm0 {
                log::warn!("datum parameter {param:?} is not independent, dropped");
                continue;
            }
            basis.push(col / norm);
            kept.push(param);
        }
        let basis = if basis.is_empty() {
            DMatrix::zeros(n, 0)
        } else {
            DMatrix::from_columns(&basis)
        };
        Self {
            parameters: kept,
            basis,
        }
    }

    pub fn defect(&self) -> usize {
        self.basis.ncols()
    }

    /// Inner constraint matrix `R = Gᵗ diag(w)`.
    pub fn constraint_matrix(&self, weights: &DVector<f64>) -> DMatrix<f64> {
        let mut r = self.basis.transpose();
        for (j, w) in weights.iter().enumerate() {
            r.column_mut(j).scale_mut(*w);
        }
        r
    }

    /// S-transformation `t - G (GᵗWG)⁻¹ GᵗW t`, removing the datum shift
    /// the weighted reference coordinates see in `t`.
    pub fn s_transform(
        &self,
        weights: &DVector<f64>,
        t: &DVector<f64>,
    ) -> Result<DVector<f64>, AdjustmentError> {
        if self.defect() == 0 {
            return Ok(t.clone());
        }
        let r = self.constraint_matrix(weights);
        let gtwg = &r * &self.basis;
        let chol = (gtwg.trace() > 0.0)
            .then(|| gtwg.cholesky())
            .flatten()
            .ok_or_else(|| {
                AdjustmentError::singular("reference coordinates do not define the datum")
            })?;
        let shift = chol.solve(&(&r * t));
        Ok(t - &self.basis * shift)
    }
}

fn centroid(index: &UnknownIndex, state: &NetworkState) -> [f64; 3] {
    let mut sum = [0.0; 3];
    let mut count = [0usize; 3];
    for (_, u) in index.iter() {
        if let Unknown::Coordinate { axis, .. } = u {
            sum[axis.index()] += state.value(u);
            count[axis.index()] += 1;
        }
    }
    let mut c = [0.0; 3];
    for i in 0..3 {
        if count[i] > 0 {
            c[i] = sum[i] / count[i] as f64;
        }
    }
    c
}

fn null_vector_entry(
    param: DatumParameter,
    unknown: Unknown,
    state: &NetworkState,
    centroid: [f64; 3],
) -> f64 {
    let (point, axis) = match unknown {
        Unknown::Coordinate { point, axis } => (point, axis),
        Unknown::Orientation { .. } => {
            return if param == DatumParameter::Rotation {
                1.0
            } else {
                0.0
            };
        }
    };
    let p = state.positions[point];
    let rel = [p.x - centroid[0], p.y - centroid[1], p.z - centroid[2]];
    match (param, axis) {
        (DatumParameter::TranslationX, Axis::X)
        | (DatumParameter::TranslationY, Axis::Y)
        | (DatumParameter::TranslationZ, Axis::Z) => 1.0,
        (DatumParameter::Rotation, Axis::X) => -rel[1],
        (DatumParameter::Rotation, Axis::Y) => rel[0],
        (DatumParameter::Scale, a) => rel[a.index()],
        (DatumParameter::HorizontalScale, a) if a.is_horizontal() => rel[a.index()],
        (DatumParameter::VerticalScale, Axis::Z) => rel[2],
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveying::observations::{Observation, Station};
    use crate::surveying::point_db::SurveyPoint;
    use DatumParameter::*;

    fn net(points: Vec<SurveyPoint>, kinds: &[K]) -> Network {
        let mut n = Network::new();
        let ids: Vec<String> = points.iter().map(|p| p.id.clone()).collect();
        for p in points {
            n.add_point(p).unwrap();
        }
        n.add_station(Station::new(1, ids[0].clone())).unwrap();
        for k in kinds {
            n.add_observation(Observation::new(*k, 1, ids[1].clone(), 1.0))
                .unwrap();
        }
        n
    }

    fn plane() -> Vec<SurveyPoint> {
        vec![
            SurveyPoint::unknown("A", 0.0, 0.0),
            SurveyPoint::unknown("B", 10.0, 0.0),
            SurveyPoint::unknown("C", 0.0, 10.0),
        ]
    }

    fn space() -> Vec<SurveyPoint> {
        vec![
            SurveyPoint::unknown3("A", 0.0, 0.0, 0.0),
            SurveyPoint::unknown3("B", 10.0, 0.0, 1.0),
            SurveyPoint::unknown3("C", 0.0, 10.0, 2.0),
        ]
    }

    fn params(points: Vec<SurveyPoint>, kinds: &[K]) -> Vec<DatumParameter> {
        let n = net(points, kinds);
        datum_parameters(&n, &UnknownIndex::build(&n, true))
    }

    #[test]
    fn trilateration_defect() {
        assert_eq!(
            params(plane(), &[K::HorizontalDistance]),
            vec![TranslationX, TranslationY, Rotation]
        );
    }

    #[test]
    fn triangulation_defect() {
        assert_eq!(
            params(plane(), &[K::Direction]),
            vec![TranslationX, TranslationY, Rotation, HorizontalScale]
        );
        assert_eq!(params(plane(), &[K::Azimuth]), vec![TranslationX, TranslationY, HorizontalScale]);
    }

    #[test]
    fn leveling_defect() {
        let pts = vec![
            SurveyPoint::unknown_height("A", 0.0),
            SurveyPoint::unknown_height("B", 1.0),
        ];
        assert_eq!(params(pts, &[K::VerticalDistance]), vec![TranslationZ]);
    }

    #[test]
    fn gnss_defect() {
        assert_eq!(
            params(space(), &[K::GnssDx, K::GnssDy, K::GnssDz]),
            vec![TranslationX, TranslationY, TranslationZ]
        );
    }

    #[test]
    fn total_station_defect() {
        assert_eq!(
            params(space(), &[K::SlopeDistance, K::Direction, K::ZenithAngle]),
            vec![TranslationX, TranslationY, TranslationZ, Rotation]
        );
        assert_eq!(
            params(space(), &[K::Direction, K::ZenithAngle]),
            vec![TranslationX, TranslationY, TranslationZ, Rotation, Scale]
        );
        assert_eq!(
            params(space(), &[K::HorizontalDistance, K::Direction]),
            vec![TranslationX, TranslationY, TranslationZ, Rotation, VerticalScale]
        );
    }

    #[test]
    fn basis_is_orthonormal_null_space() {
        let n = net(plane(), &[K::HorizontalDistance]);
        let index = UnknownIndex::build(&n, true);
        let state = NetworkState::initial(&n);
        let datum = FreeNetworkDatum::new(&datum_parameters(&n, &index), &index, &state);
        assert_eq!(datum.defect(), 3);
        let gtg = datum.basis.transpose() * &datum.basis;
        assert!((gtg - DMatrix::identity(3, 3)).amax() < 1e-12);
        // distances are invariant under every basis direction
        let a = crate::surveying::design::DesignMatrix::build(&n, &index, &state).unwrap();
        let ag = a.to_dense() * &datum.basis;
        assert!(ag.amax() < 1e-12);
    }

    #[test]
    fn excluded_weights_zero_constraint_columns() {
        let n = net(plane(), &[K::HorizontalDistance]);
        let index = UnknownIndex::build(&n, true);
        let state = NetworkState::initial(&n);
        let datum = FreeNetworkDatum::new(&datum_parameters(&n, &index), &index, &state);
        let w = DVector::from_vec(vec![1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
        let r = datum.constraint_matrix(&w);
        assert_eq!(r.shape(), (3, 6));
        assert_eq!(r.column(2).amax(), 0.0);
        assert_eq!(r.column(3).amax(), 0.0);
        assert!(r.column(0).amax() > 0.0);
    }
}
