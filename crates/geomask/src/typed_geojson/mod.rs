use geojson::JsonObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    raster::{Crs, CrsKind},
    types::AttributedPolygon,
};

/// Properties for detected polygon features
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, TS, JsonSchema)]
#[ts(export)]
#[schemars(description = "Properties for detected polygon features")]
pub struct PolygonProperties {
    #[schemars(description = "Position of the feature in its collection")]
    pub id: u32,
    #[schemars(description = "Label of the mask instance the polygon was traced from")]
    pub label: u32,
    #[schemars(description = "Mean mask probability over the instance; null when unknown")]
    pub score: Option<f32>,
    #[schemars(description = "Area in square metres")]
    pub area_m2: f64,
    #[schemars(description = "Length of all rings in metres")]
    pub perimeter_m: f64,
    #[schemars(description = "Long over short side of the minimum rotated rectangle; null when the short side is zero")]
    pub elongation: Option<f64>,
    pub mbr_major_m: f64,
    pub mbr_minor_m: f64,
    #[schemars(description = "Direction of the rectangle's long side in degrees, [0, 180)")]
    pub orientation_deg: f64,
    pub compactness: f64,
    pub convexity: f64,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub hole_count: usize,
}

impl PolygonProperties {
    pub fn new(id: u32, polygon: &AttributedPolygon) -> Self {
        let attributes = &polygon.attributes;
        let score = polygon.polygon.score;
        Self {
            id,
            label: polygon.polygon.label,
            score: score.is_finite().then_some(score),
            area_m2: attributes.area_m2,
            perimeter_m: attributes.perimeter_m,
            elongation: attributes.elongation.is_finite().then_some(attributes.elongation),
            mbr_major_m: attributes.mbr_major_m,
            mbr_minor_m: attributes.mbr_minor_m,
            orientation_deg: attributes.orientation_deg,
            compactness: attributes.compactness,
            convexity: attributes.convexity,
            centroid_x: attributes.centroid_x,
            centroid_y: attributes.centroid_y,
            hole_count: attributes.hole_count,
        }
    }
}

/// The part of a stored feature's properties that survives a read-back.
/// Everything else is recomputed from the geometry.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct StoredIdentity {
    pub label: u32,
    #[serde(default)]
    pub score: Option<f32>,
}

/// Legacy GeoJSON `crs` member:
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::32610", "kind": "projected"}}`.
/// `None` for an unknown CRS.
pub fn crs_member(crs: &Crs) -> Option<serde_json::Value> {
    if crs.epsg.is_none() && crs.kind == CrsKind::Unknown {
        return None;
    }
    let mut properties = serde_json::Map::new();
    if let Some(name) = crs.urn() {
        properties.insert("name".to_string(), serde_json::Value::from(name));
    }
    properties.insert("kind".to_string(), serde_json::Value::from(crs.kind.to_string()));
    Some(serde_json::json!({
        "type": "name",
        "properties": properties
    }))
}

/// CRS from a `crs` member; an explicit `kind` wins over the one guessed from the EPSG code
pub fn crs_from_member(foreign_members: &JsonObject) -> Option<Crs> {
    let properties = foreign_members.get("crs")?.get("properties")?;
    let kind = properties
        .get("kind")
        .cloned()
        .and_then(|kind| serde_json::from_value::<CrsKind>(kind).ok());
    let named = properties
        .get("name")
        .and_then(|name| name.as_str())
        .and_then(Crs::parse_name);
    match (named, kind) {
        (Some(crs), Some(kind)) => Some(Crs { kind, ..crs }),
        (Some(crs), None) => Some(crs),
        (None, Some(kind)) => Some(Crs { epsg: None, kind }),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(crs: &Crs) -> JsonObject {
        let mut members = JsonObject::new();
        if let Some(member) = crs_member(crs) {
            members.insert("crs".to_string(), member);
        }
        members
    }

    #[test]
    fn test_crs_kind_survives_uncommon_geographic_code() {
        // ETRS89 geographic, not in the built-in list of geographic codes
        let crs = Crs::geographic(4937);
        assert_eq!(Crs::from_epsg(4937).kind, CrsKind::Projected);
        assert_eq!(crs_from_member(&members(&crs)), Some(crs));
    }

    #[test]
    fn test_legacy_member_without_kind_is_inferred() {
        let member = serde_json::json!({
            "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::4326"}}
        });
        let members = member.as_object().cloned().expect("object");
        assert_eq!(crs_from_member(&members), Some(Crs::geographic(4326)));
    }

    #[test]
    fn test_unknown_crs_has_no_member() {
        assert!(crs_member(&Crs::unknown()).is_none());
        let kind_only = Crs {
            epsg: None,
            kind: CrsKind::Geographic,
        };
        assert_eq!(crs_from_member(&members(&kind_only)), Some(kind_only));
    }

    #[test]
    fn test_stored_identity_ignores_other_properties() {
        let properties = serde_json::json!({"label": 7, "score": null, "area_m2": null});
        let identity: StoredIdentity = serde_json::from_value(properties).expect("identity");
        assert_eq!(identity, StoredIdentity { label: 7, score: None });
    }
}
