pub mod assembly;
pub mod attributes;
pub mod boundary;
pub mod extraction;
pub mod preprocessing;
pub mod simplification;
pub mod tiling;

pub use assembly::*;
pub use attributes::*;
pub use boundary::*;
pub use extraction::*;
pub use preprocessing::*;
pub use simplification::*;
pub use tiling::*;

use geo::{AffineOps, Orient, orient::Direction};
use geo_types::{Coord, LineString, Polygon};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    error::{MaskError, Result},
    raster::GeoTransform,
    traits::RingSimplifier,
    types::VectorPolygon,
};

/// Turns instances into polygons in the raster CRS
pub struct PolygonVectorizer {
    simplifier: Box<dyn RingSimplifier>,
    epsilon: f64,
}

impl std::fmt::Debug for PolygonVectorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolygonVectorizer")
            .field("simplifier", &self.simplifier.name())
            .field("epsilon", &self.epsilon)
            .finish()
    }
}

impl Default for PolygonVectorizer {
    fn default() -> Self {
        Self::new(DouglasPeuckerSimplifier, 0.2)
    }
}

impl PolygonVectorizer {
    pub fn new<S>(simplifier: S, epsilon: f64) -> Self
    where
        S: RingSimplifier + 'static,
    {
        Self::from_boxed(Box::new(simplifier), epsilon)
    }

    pub fn from_boxed(simplifier: Box<dyn RingSimplifier>, epsilon: f64) -> Self {
        Self {
            simplifier,
            epsilon,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn simplifier_name(&self) -> &'static str {
        self.simplifier.name()
    }

    /// Trace, refine and georeference one instance
    pub fn vectorize(&self, instance: &Instance, transform: &GeoTransform) -> Result<VectorPolygon> {
        let origin = (instance.bounds.min_col, instance.bounds.min_row);
        let rings = trace_boundaries(&instance.mask, origin).map_err(|_| {
            MaskError::DegenerateGeometry {
                label: instance.label,
                distinct_vertices: 0,
            }
        })?;

        let exterior = refine_ring(&rings.exterior, self.simplifier.as_ref(), self.epsilon);
        if exterior.len() < 3 {
            return Err(MaskError::DegenerateGeometry {
                label: instance.label,
                distinct_vertices: exterior.len(),
            });
        }

        let pixel_holes: Vec<Vec<Coord<f64>>> = rings
            .holes
            .iter()
            .map(|hole| remove_collinear(hole))
            .filter(|hole| hole.len() >= 3)
            .collect();
        let (exterior, holes) = match self.refine_holes(&pixel_holes, &exterior) {
            Some(holes) => (exterior, holes),
            None => {
                debug!(label = instance.label, "refined rings overlap, keeping the pixel outline");
                (remove_collinear(&rings.exterior), pixel_holes)
            }
        };

        let pixel_polygon = Polygon::new(
            close_ring(&exterior),
            holes.iter().map(|hole| close_ring(hole)).collect(),
        );
        let geometry = pixel_polygon
            .affine_transform(&transform.to_affine())
            .orient(Direction::Default);

        Ok(VectorPolygon {
            label: instance.label,
            score: instance.mean_probability,
            geometry,
        })
    }

    /// Refine each hole, falling back to its pixel ring, so that every hole
    /// stays inside `exterior` and clear of the holes before it. `None` when
    /// neither version of some hole fits.
    fn refine_holes(
        &self,
        holes: &[Vec<Coord<f64>>],
        exterior: &[Coord<f64>],
    ) -> Option<Vec<Vec<Coord<f64>>>> {
        let mut accepted: Vec<Vec<Coord<f64>>> = Vec::with_capacity(holes.len());
        for hole in holes {
            let refined = refine_ring(hole, self.simplifier.as_ref(), self.epsilon);
            let fitted = [refined, hole.clone()]
                .into_iter()
                .find(|candidate| hole_fits(candidate, exterior, &accepted))?;
            accepted.push(fitted);
        }
        Some(accepted)
    }

    /// Vectorize every instance in parallel, keeping label order.
    /// Degenerate instances are logged and skipped; the second value counts them.
    pub fn vectorize_all(
        &self,
        instances: &[Instance],
        transform: &GeoTransform,
    ) -> (Vec<VectorPolygon>, usize) {
        let results: Vec<Result<VectorPolygon>> = instances
            .par_iter()
            .map(|instance| self.vectorize(instance, transform))
            .collect();

        let mut polygons = Vec::with_capacity(results.len());
        let mut dropped = 0;
        for result in results {
            match result {
                Ok(polygon) => polygons.push(polygon),
                Err(err) => {
                    warn!("skipping instance: {err}");
                    dropped += 1;
                }
            }
        }
        (polygons, dropped)
    }
}

/// Vectorize one instance with Douglas-Peucker refinement at `epsilon` pixels
pub fn vectorize(instance: &Instance, transform: &GeoTransform, epsilon: f64) -> Result<VectorPolygon> {
    PolygonVectorizer::new(DouglasPeuckerSimplifier, epsilon).vectorize(instance, transform)
}

/// Number of distinct vertices of a closed ring
pub fn distinct_vertices(ring: &LineString<f64>) -> usize {
    open_ring(ring).len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::ProbabilityMask;
    use geo::{Area, Contains, Winding};
    use geo_types::Point;
    use image::Luma;
    use proptest::prelude::*;

    fn paint(mask: &mut ProbabilityMask, col: u32, row: u32, w: u32, h: u32) {
        for y in row..row + h {
            for x in col..col + w {
                mask.put_pixel(x, y, Luma([1.0]));
            }
        }
    }

    fn single_instance(mask: &ProbabilityMask) -> Instance {
        let mut instances = extract(mask, 0.5, 0.0, 1.0).expect("valid parameters");
        assert_eq!(instances.len(), 1);
        instances.remove(0)
    }

    #[test]
    fn test_rectangle_becomes_four_corners() {
        let mut mask = ProbabilityMask::new(300, 300);
        paint(&mut mask, 100, 100, 20, 10);
        let instance = single_instance(&mask);

        let transform = GeoTransform::north_up(500_000.0, 4_000_000.0, 0.5, -0.5);
        let polygon = vectorize(&instance, &transform, 0.2).expect("valid polygon");
        assert_eq!(polygon.label, 1);
        assert_eq!(distinct_vertices(polygon.geometry.exterior()), 4);
        assert!((polygon.geometry.unsigned_area() - 200.0 * 0.25).abs() < 1e-9);
        assert!(polygon.geometry.exterior().is_ccw());

        let expected_x = [500_050.0, 500_060.0];
        let expected_y = [3_999_945.0, 3_999_950.0];
        for coord in polygon.geometry.exterior().coords() {
            assert!(expected_x.contains(&coord.x));
            assert!(expected_y.contains(&coord.y));
        }
    }

    #[test]
    fn test_hole_is_kept_and_clockwise() {
        let mut mask = ProbabilityMask::new(20, 20);
        paint(&mut mask, 2, 2, 10, 10);
        for y in 5..8 {
            for x in 5..8 {
                mask.put_pixel(x, y, Luma([0.0]));
            }
        }
        let instance = single_instance(&mask);
        let polygon = vectorize(&instance, &GeoTransform::identity(), 0.2).expect("valid polygon");
        assert_eq!(polygon.geometry.interiors().len(), 1);
        assert!(polygon.geometry.interiors()[0].is_cw());
        assert!((polygon.geometry.unsigned_area() - 91.0).abs() < 1e-9);
    }

    #[test]
    fn test_rerasterized_polygon_matches_pixels() {
        let mut mask = ProbabilityMask::new(40, 40);
        paint(&mut mask, 5, 5, 12, 4);
        paint(&mut mask, 10, 9, 3, 15);
        paint(&mut mask, 13, 20, 8, 2);
        paint(&mut mask, 21, 22, 1, 1);
        let instance = single_instance(&mask);
        let polygon = vectorize(&instance, &GeoTransform::identity(), 0.2).expect("valid polygon");

        let mut inside = 0u64;
        for row in 0..40 {
            for col in 0..40 {
                let centre = Point::new(col as f64 + 0.5, row as f64 + 0.5);
                let covered = polygon.geometry.contains(&centre);
                assert_eq!(covered, instance.contains(col, row), "pixel ({col}, {row})");
                inside += covered as u64;
            }
        }
        assert_eq!(inside, instance.pixel_count);
    }

    #[test]
    fn test_vectorize_all_keeps_label_order() {
        let mut mask = ProbabilityMask::new(50, 50);
        paint(&mut mask, 1, 1, 5, 5);
        paint(&mut mask, 20, 3, 2, 8);
        paint(&mut mask, 4, 30, 10, 10);
        let instances = extract(&mask, 0.5, 0.0, 1.0).expect("valid parameters");
        let vectorizer = PolygonVectorizer::new(VisvalingamWhyattSimplifier, 0.5);
        let (polygons, dropped) = vectorizer.vectorize_all(&instances, &GeoTransform::identity());
        assert_eq!(dropped, 0);
        assert_eq!(polygons.iter().map(|p| p.label).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_no_simplifier_keeps_pixel_outline() {
        let mut mask = ProbabilityMask::new(10, 10);
        paint(&mut mask, 2, 2, 3, 3);
        mask.put_pixel(5, 4, Luma([1.0]));
        let instance = single_instance(&mask);
        let polygon = PolygonVectorizer::new(NoSimplifier, 0.0)
            .vectorize(&instance, &GeoTransform::identity())
            .expect("valid polygon");
        assert_eq!(distinct_vertices(polygon.geometry.exterior()), 6);
        assert_eq!(polygon.geometry.unsigned_area(), 10.0);
    }

    /// Mask with noisy foreground, so instances carry many small holes
    fn noisy_mask(cells: &[u8]) -> ProbabilityMask {
        ProbabilityMask::from_fn(30, 30, |x, y| {
            Luma([if cells[(y * 30 + x) as usize] < 7 { 1.0 } else { 0.0 }])
        })
    }

    /// Sample each pixel at two points and check that no point lies in two
    /// holes and that every point in a hole also lies inside the exterior
    fn assert_holes_valid(polygon: &Polygon<f64>, epsilon: f64) {
        let exterior = Polygon::new(polygon.exterior().clone(), vec![]);
        let holes: Vec<Polygon<f64>> = polygon
            .interiors()
            .iter()
            .map(|ring| Polygon::new(ring.clone(), vec![]))
            .collect();
        for row in 0..30 {
            for col in 0..30 {
                for (dx, dy) in [(0.25, 0.25), (0.75, 0.75)] {
                    let point = Point::new(col as f64 + dx, row as f64 + dy);
                    let in_holes = holes.iter().filter(|hole| hole.contains(&point)).count();
                    assert!(in_holes <= 1, "eps {epsilon}: holes overlap at {point:?}");
                    if in_holes == 1 {
                        assert!(exterior.contains(&point), "eps {epsilon}: hole leaves the exterior at {point:?}");
                    }
                }
            }
        }
        assert!(polygon.unsigned_area() <= exterior.unsigned_area() + 1e-9);
        assert!(polygon.unsigned_area() > 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_coarse_simplification_keeps_holes_valid(
            cells in proptest::collection::vec(0u8..10, 900),
        ) {
            let mask = noisy_mask(&cells);
            let instances = extract(&mask, 0.5, 0.0, 1.0).expect("valid parameters");
            for epsilon in [1.0, 2.0, 3.0] {
                for vectorizer in [
                    PolygonVectorizer::new(DouglasPeuckerSimplifier, epsilon),
                    PolygonVectorizer::new(VisvalingamWhyattSimplifier, epsilon),
                ] {
                    let (polygons, _) = vectorizer.vectorize_all(&instances, &GeoTransform::identity());
                    for polygon in &polygons {
                        assert_holes_valid(&polygon.geometry, epsilon);
                    }
                }
            }
        }
    }

    #[test]
    fn test_holes_near_each_other_survive_coarse_epsilon() {
        // two holes one pixel apart inside a thin frame
        let mut mask = ProbabilityMask::new(16, 10);
        paint(&mut mask, 1, 1, 14, 8);
        for (col, row) in [(3, 3), (4, 3), (3, 4), (4, 4), (6, 3), (7, 3), (6, 4), (7, 4), (7, 5)] {
            mask.put_pixel(col, row, Luma([0.0]));
        }
        let instance = single_instance(&mask);
        let polygon = vectorize(&instance, &GeoTransform::identity(), 3.0).expect("valid polygon");
        assert_eq!(polygon.geometry.interiors().len(), 2);
        assert_holes_valid(&polygon.geometry, 3.0);
    }
}
