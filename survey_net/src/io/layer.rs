//! GeoJSON point layer of an adjustment result.

use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};

use crate::geometry::Axis;
use crate::surveying::{AdjustmentResult, AngleUnit, PointResult};

fn point_properties(point: &PointResult, unit: AngleUnit) -> JsonObject {
    let mut props = JsonObject::new();
    props.insert("id".into(), JsonValue::from(point.id.clone()));
    let role = serde_json::to_value(point.role).unwrap_or(JsonValue::Null);
    props.insert("role".into(), role);
    for c in &point.coordinates {
        let axis = c.axis.label();
        props.insert(axis.to_string(), JsonValue::from(c.adjusted));
        props.insert(format!("d{axis}"), JsonValue::from(c.correction));
        if let Some(s) = c.sigma {
            props.insert(format!("s{axis}"), JsonValue::from(s));
        }
        if let Some(w) = c.datum_weight {
            props.insert(format!("w{axis}"), JsonValue::from(w));
        }
    }
    if let Some(e) = point.error_ellipse {
        props.insert("ellipse_a".into(), JsonValue::from(e.a));
        props.insert("ellipse_b".into(), JsonValue::from(e.b));
        props.insert("ellipse_phi".into(), JsonValue::from(unit.from_rad(e.phi)));
    }
    props
}

/// One feature per point. Points without a horizontal position get no
/// geometry.
pub fn points_feature_collection(result: &AdjustmentResult, unit: AngleUnit) -> FeatureCollection {
    let features = result
        .points
        .iter()
        .map(|p| {
            let geometry = match (p.adjusted(Axis::X), p.adjusted(Axis::Y)) {
                (Some(x), Some(y)) => {
                    let mut coords = vec![x, y];
                    coords.extend(p.adjusted(Axis::Z));
                    Some(Geometry::new(Value::Point(coords)))
                }
                _ => None,
            };
            Feature {
                bbox: None,
                geometry,
                id: Some(Id::String(p.id.clone())),
                properties: Some(point_properties(p, unit)),
                foreign_members: None,
            }
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_points_geojson(
    path: &str,
    result: &AdjustmentResult,
    unit: AngleUnit,
) -> std::io::Result<()> {
    let geojson = GeoJson::FeatureCollection(points_feature_collection(result, unit));
    crate::io::write_string(path, &geojson.to_string())
}
