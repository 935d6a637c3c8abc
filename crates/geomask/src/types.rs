use std::path::Path;

use geo_types::Polygon;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        attributes::{AreaSummary, GeometricAttributes},
        extraction::Instance,
    },
    error::{MaskError, Result, Stage},
    filter,
    io::geotiff::write_geotiff,
    raster::{Crs, Raster},
};

/// One vectorized instance in the raster CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPolygon {
    /// Label of the source instance
    pub label: u32,
    /// Mean mask probability over the instance
    pub score: f32,
    /// Exterior counter-clockwise, holes clockwise
    pub geometry: Polygon<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedPolygon {
    pub polygon: VectorPolygon,
    pub attributes: GeometricAttributes,
}

impl AttributedPolygon {
    pub fn label(&self) -> u32 {
        self.polygon.label
    }

    pub fn geometry(&self) -> &Polygon<f64> {
        &self.polygon.geometry
    }
}

/// Attributed polygons sharing one CRS
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolygonCollection {
    pub polygons: Vec<AttributedPolygon>,
    pub crs: Crs,
}

impl PolygonCollection {
    pub fn new(polygons: Vec<AttributedPolygon>, crs: Crs) -> Self {
        Self { polygons, crs }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AttributedPolygon> {
        self.polygons.iter()
    }

    /// New collection holding the polygons whose attributes satisfy `predicate`
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&GeometricAttributes) -> bool,
    {
        Self {
            polygons: filter::filter(&self.polygons, predicate),
            crs: self.crs,
        }
    }

    pub fn area_summary(&self) -> Option<AreaSummary> {
        AreaSummary::from_polygons(&self.polygons)
    }

    pub fn total_area(&self) -> f64 {
        self.polygons.iter().map(|p| p.attributes.area_m2).sum()
    }
}

/// Everything one detection run produces
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    /// Blended probability mask with the source transform and CRS
    pub mask: Raster,
    pub instances: Vec<Instance>,
    pub polygons: PolygonCollection,
    pub chips_processed: usize,
    /// Instances that could not be turned into a valid polygon
    pub degenerate_dropped: usize,
}

impl DetectionOutput {
    /// Write the probability mask as a single-band Float32 GeoTIFF
    pub fn save_mask(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_geotiff(path, &self.mask).map_err(|err| self.write_failure(path, err))
    }

    pub fn save_geojson(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.polygons
            .save_geojson(path)
            .map_err(|err| self.write_failure(path, err))
    }

    fn write_failure(&self, path: &Path, source: MaskError) -> MaskError {
        MaskError::RasterProcessingFailure {
            path: path.display().to_string(),
            stage: Stage::WriteOutput,
            chips_completed: self.chips_processed,
            instances_completed: self.instances.len(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;
    use image::ImageBuffer;

    #[test]
    fn test_failed_write_reports_output_stage() {
        let mask = ImageBuffer::new(4, 4);
        let output = DetectionOutput {
            mask: Raster::single_band(mask, GeoTransform::identity(), Crs::unknown())
                .expect("valid raster"),
            instances: Vec::new(),
            polygons: PolygonCollection::default(),
            chips_processed: 3,
            degenerate_dropped: 0,
        };
        let dir = tempfile::tempdir().expect("temp dir");
        let target = dir.path().join("missing").join("panels.geojson");

        let err = output.save_geojson(&target).expect_err("parent directory is missing");
        assert_eq!(err.stage(), Some(Stage::WriteOutput));
        match err {
            MaskError::RasterProcessingFailure {
                path,
                chips_completed,
                source,
                ..
            } => {
                assert!(path.ends_with("panels.geojson"));
                assert_eq!(chips_completed, 3);
                assert!(matches!(*source, MaskError::Io(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(output.save_mask(dir.path().join("missing").join("mask.tif")).is_err());
    }
}
