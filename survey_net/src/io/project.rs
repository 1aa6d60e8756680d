use serde::{Deserialize, Serialize};

use crate::error::AdjustmentError;
use crate::geometry::Axis;
use crate::surveying::{
    AdjustmentConfig, AdjustmentResult, AngleUnit, Coordinate, GnssBaseline, Network, Observation,
    Station, SurveyPoint,
};

/// Point as stored in a project file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sx: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sz: Option<f64>,
    /// Components that are known control values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed: Vec<Axis>,
}

impl PointRecord {
    fn to_point(&self) -> SurveyPoint {
        let values = [(Axis::X, self.x, self.sx), (Axis::Y, self.y, self.sy), (Axis::Z, self.z, self.sz)];
        values
            .into_iter()
            .fold(SurveyPoint::new(self.id.clone()), |p, (axis, value, sigma)| {
                match value {
                    Some(v) => p.with(
                        axis,
                        Coordinate {
                            value: v,
                            sigma,
                            fixed: self.fixed.contains(&axis),
                        },
                    ),
                    None => p,
                }
            })
    }
}

/// Complete input of an adjustment run.
///
/// Angles and angular sigmas are stored in `angle_unit`, everything else in
/// metres.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectFile {
    pub angle_unit: AngleUnit,
    pub points: Vec<PointRecord>,
    pub stations: Vec<Station>,
    pub observations: Vec<Observation>,
    pub gnss_baselines: Vec<GnssBaseline>,
    pub config: AdjustmentConfig,
}

impl ProjectFile {
    /// Builds the network, converting angles to radians.
    pub fn to_network(&self) -> Result<Network, AdjustmentError> {
        let unit = self.angle_unit;
        let mut network = Network::new();
        for record in &self.points {
            network.add_point(record.to_point())?;
        }
        for station in &self.stations {
            let mut s = station.clone();
            s.orientation = s.orientation.map(|o| unit.to_rad(o));
            network.add_station(s)?;
        }
        for obs in &self.observations {
            let mut o = obs.clone();
            if o.kind.is_angular() {
                o.value = unit.to_rad(o.value);
                o.sigma = o.sigma.map(|s| unit.to_rad(s));
            }
            network.add_observation(o)?;
        }
        for baseline in &self.gnss_baselines {
            network.add_gnss_baseline(baseline.clone())?;
        }
        Ok(network)
    }

    /// Copy of the project with every point moved to its adjusted position.
    pub fn with_adjusted_coordinates(&self, result: &AdjustmentResult) -> Self {
        let mut project = self.clone();
        for record in &mut project.points {
            let Some(point) = result.point(&record.id) else {
                continue;
            };
            for (axis, value) in [
                (Axis::X, &mut record.x),
                (Axis::Y, &mut record.y),
                (Axis::Z, &mut record.z),
            ] {
                if let (Some(v), Some(adjusted)) = (value.as_mut(), point.adjusted(axis)) {
                    *v = adjusted;
                }
            }
        }
        project
    }
}

pub fn read_project_json(path: &str) -> std::io::Result<ProjectFile> {
    let contents = crate::io::read_to_string(path)?;
    let proj: ProjectFile = serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(proj)
}

pub fn write_project_json(path: &str, project: &ProjectFile) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(project).map_err(std::io::Error::other)?;
    crate::io::write_string(path, &json)
}

pub fn write_result_json(path: &str, result: &AdjustmentResult) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(result).map_err(std::io::Error::other)?;
    crate::io::write_string(path, &json)
}
