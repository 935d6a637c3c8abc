use std::path::Path;

use geo_types::Polygon;
use geojson::{Feature, FeatureCollection, Geometry, Value, feature::Id};
use tracing::{debug, warn};

use crate::{
    algorithms::attributes::attribute,
    error::Result,
    typed_geojson::{PolygonProperties, StoredIdentity, crs_from_member, crs_member},
    types::{AttributedPolygon, PolygonCollection, VectorPolygon},
};

impl PolygonCollection {
    fn foreign_members(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut foreign_members = serde_json::Map::new();
        if let Some(crs) = crs_member(&self.crs) {
            foreign_members.insert("crs".to_string(), crs);
        }
        foreign_members.insert(
            "feature_count".to_string(),
            serde_json::Value::from(self.polygons.len()),
        );
        foreign_members
    }

    fn features(&self) -> Result<Vec<Feature>> {
        self.polygons
            .iter()
            .enumerate()
            .map(|(i, polygon)| {
                let properties = serde_json::to_value(PolygonProperties::new(i as u32, polygon))?;
                Ok(Feature {
                    bbox: Some(polygon.attributes.bbox.to_vec()),
                    geometry: Some(Geometry::new(Value::from(polygon.geometry()))),
                    id: Some(Id::Number(serde_json::Number::from(polygon.label()))),
                    properties: properties.as_object().cloned(),
                    foreign_members: None,
                })
            })
            .collect()
    }

    pub fn to_geojson(&self) -> Result<FeatureCollection> {
        Ok(FeatureCollection {
            bbox: None,
            features: self.features()?,
            foreign_members: Some(self.foreign_members()),
        })
    }

    /// Export to GeoJSON and serialize to JSON string
    pub fn to_geojson_string(&self) -> Result<String> {
        let geojson = self.to_geojson()?;
        Ok(serde_json::to_string_pretty(&geojson)?)
    }

    /// Save GeoJSON to file
    pub fn save_geojson(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_geojson_string()?)?;
        debug!(path = %path.display(), features = self.len(), "wrote GeoJSON");
        Ok(())
    }

    /// Load a collection from a GeoJSON file
    pub fn from_geojson_file(path: impl AsRef<Path>) -> Result<Self> {
        let geojson_str = std::fs::read_to_string(path)?;
        Self::from_geojson_str(&geojson_str)
    }

    /// Load a collection from a GeoJSON string.
    ///
    /// Label and score come from the feature properties; attributes are
    /// recomputed from the geometry in the collection's CRS.
    pub fn from_geojson_str(geojson_str: &str) -> Result<Self> {
        let collection: FeatureCollection = geojson_str.parse()?;
        let crs = collection
            .foreign_members
            .as_ref()
            .and_then(crs_from_member)
            .unwrap_or_default();

        let mut polygons = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let Some(geometry) = feature.geometry else {
                warn!(feature = i, "skipping feature without geometry");
                continue;
            };
            let geometry = match Polygon::<f64>::try_from(geometry.value) {
                Ok(polygon) => polygon,
                Err(err) => {
                    warn!(feature = i, "skipping non-polygon feature: {err}");
                    continue;
                }
            };
            let identity = feature
                .properties
                .and_then(|p| serde_json::from_value::<StoredIdentity>(p.into()).ok());
            let (label, score) = match identity {
                Some(identity) => (identity.label, identity.score.unwrap_or(f32::NAN)),
                None => {
                    debug!(feature = i, "no stored label, numbering by position");
                    (i as u32 + 1, f32::NAN)
                }
            };

            polygons.push(AttributedPolygon {
                attributes: attribute(&geometry, &crs),
                polygon: VectorPolygon {
                    label,
                    score,
                    geometry,
                },
            });
        }
        Ok(PolygonCollection::new(polygons, crs))
    }
}
