use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    algorithms::preprocessing::{binarize, FOREGROUND},
    error::{MaskError, Result},
    raster::ProbabilityMask,
};

/// Pixel bounding box, `max_*` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PixelBounds {
    pub min_col: u32,
    pub min_row: u32,
    pub max_col: u32,
    pub max_row: u32,
}

impl PixelBounds {
    fn from_pixel(col: u32, row: u32) -> Self {
        Self {
            min_col: col,
            min_row: row,
            max_col: col + 1,
            max_row: row + 1,
        }
    }

    fn include(&mut self, col: u32, row: u32) {
        self.min_col = self.min_col.min(col);
        self.min_row = self.min_row.min(row);
        self.max_col = self.max_col.max(col + 1);
        self.max_row = self.max_row.max(row + 1);
    }

    pub fn width(&self) -> u32 {
        self.max_col - self.min_col
    }

    pub fn height(&self) -> u32 {
        self.max_row - self.min_row
    }

    /// Width over height of the box, always `>= 1`
    pub fn aspect_ratio(&self) -> f64 {
        let (w, h) = (self.width() as f64, self.height() as f64);
        w.max(h) / w.min(h)
    }
}

/// One connected, area-filtered detection
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// 1-based, in order of first appearance in a row-major scan
    pub label: u32,
    pub pixel_count: u64,
    pub bounds: PixelBounds,
    /// `pixel_count * pixel_area`, in squared CRS units
    pub area: f64,
    pub mean_probability: f32,
    pub max_probability: f32,
    /// Binary mask cropped to `bounds`; member pixels are [`FOREGROUND`]
    pub mask: GrayImage,
}

impl Instance {
    /// Whether raster pixel `(col, row)` belongs to this instance
    pub fn contains(&self, col: u32, row: u32) -> bool {
        col >= self.bounds.min_col
            && row >= self.bounds.min_row
            && col < self.bounds.max_col
            && row < self.bounds.max_row
            && self
                .mask
                .get_pixel(col - self.bounds.min_col, row - self.bounds.min_row)
                .0[0]
                == FOREGROUND
    }
}

#[derive(Debug)]
struct ComponentStats {
    component: u32,
    pixel_count: u64,
    bounds: PixelBounds,
    probability_sum: f64,
    max_probability: f32,
}

/// Thresholds, labels and area-filters a full-resolution mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceExtractor {
    mask_threshold: f32,
    min_object_area: f64,
    pixel_area: f64,
}

impl InstanceExtractor {
    pub fn new(mask_threshold: f32, min_object_area: f64, pixel_area: f64) -> Result<Self> {
        if !mask_threshold.is_finite() {
            return Err(MaskError::invalid_config(format!(
                "mask_threshold must be finite, got {mask_threshold}"
            )));
        }
        if !(min_object_area.is_finite() && min_object_area >= 0.0) {
            return Err(MaskError::invalid_config(format!(
                "min_object_area must be a non-negative number, got {min_object_area}"
            )));
        }
        if !(pixel_area.is_finite() && pixel_area > 0.0) {
            return Err(MaskError::invalid_config(format!(
                "pixel_area must be positive, got {pixel_area}"
            )));
        }
        Ok(Self {
            mask_threshold,
            min_object_area,
            pixel_area,
        })
    }

    /// Labels 8-connected components and keeps those covering at least `min_object_area`
    pub fn extract(&self, mask: &ProbabilityMask) -> Vec<Instance> {
        let binary = binarize(mask, self.mask_threshold);
        let labels = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

        let mut order: HashMap<u32, usize> = HashMap::new();
        let mut components: Vec<ComponentStats> = Vec::new();
        for (col, row, pixel) in labels.enumerate_pixels() {
            let component = pixel.0[0];
            if component == 0 {
                continue;
            }
            let probability = mask.get_pixel(col, row).0[0];
            let index = *order.entry(component).or_insert_with(|| {
                components.push(ComponentStats {
                    component,
                    pixel_count: 0,
                    bounds: PixelBounds::from_pixel(col, row),
                    probability_sum: 0.0,
                    max_probability: f32::NEG_INFINITY,
                });
                components.len() - 1
            });
            let stats = &mut components[index];
            stats.pixel_count += 1;
            stats.bounds.include(col, row);
            stats.probability_sum += probability as f64;
            stats.max_probability = stats.max_probability.max(probability);
        }

        let found = components.len();
        let instances: Vec<Instance> = components
            .into_iter()
            .filter(|stats| {
                let area = stats.pixel_count as f64 * self.pixel_area;
                let keep = area >= self.min_object_area;
                if !keep {
                    debug!(
                        component = stats.component,
                        pixels = stats.pixel_count,
                        area,
                        "discarding component below min_object_area"
                    );
                }
                keep
            })
            .enumerate()
            .map(|(position, stats)| {
                let bounds = stats.bounds;
                let crop = GrayImage::from_fn(bounds.width(), bounds.height(), |x, y| {
                    let component = labels
                        .get_pixel(bounds.min_col + x, bounds.min_row + y)
                        .0[0];
                    if component == stats.component {
                        Luma([FOREGROUND])
                    } else {
                        Luma([0u8])
                    }
                });
                Instance {
                    label: position as u32 + 1,
                    pixel_count: stats.pixel_count,
                    bounds,
                    area: stats.pixel_count as f64 * self.pixel_area,
                    mean_probability: (stats.probability_sum / stats.pixel_count as f64) as f32,
                    max_probability: stats.max_probability,
                    mask: crop,
                }
            })
            .collect();

        debug!(
            components = found,
            kept = instances.len(),
            "labelled connected components"
        );
        instances
    }
}

/// Binarize `full_mask` at `mask_threshold`, label 8-connected components and
/// drop those whose area is below `min_object_area`
pub fn extract(
    full_mask: &ProbabilityMask,
    mask_threshold: f32,
    min_object_area: f64,
    pixel_area: f64,
) -> Result<Vec<Instance>> {
    Ok(InstanceExtractor::new(mask_threshold, min_object_area, pixel_area)?.extract(full_mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paint(mask: &mut ProbabilityMask, col: u32, row: u32, w: u32, h: u32, value: f32) {
        for y in row..row + h {
            for x in col..col + w {
                mask.put_pixel(x, y, Luma([value]));
            }
        }
    }

    #[test]
    fn test_all_zero_mask_yields_nothing() {
        let mask = ProbabilityMask::new(50, 40);
        let instances = extract(&mask, 0.5, 0.0, 1.0).expect("valid parameters");
        assert!(instances.is_empty());
    }

    #[test]
    fn test_single_rectangle() {
        let mut mask = ProbabilityMask::new(300, 300);
        paint(&mut mask, 100, 100, 20, 10, 1.0);
        let instances = extract(&mask, 0.5, 0.0, 0.25).expect("valid parameters");
        assert_eq!(instances.len(), 1);
        let instance = &instances[0];
        assert_eq!(instance.label, 1);
        assert_eq!(instance.pixel_count, 200);
        assert_eq!(instance.area, 50.0);
        assert_eq!(
            instance.bounds,
            PixelBounds { min_col: 100, min_row: 100, max_col: 120, max_row: 110 }
        );
        assert_eq!(instance.mask.dimensions(), (20, 10));
        assert!(instance.contains(119, 109));
        assert!(!instance.contains(120, 109));
    }

    #[test]
    fn test_diagonal_neighbours_are_connected() {
        let mut mask = ProbabilityMask::new(10, 10);
        paint(&mut mask, 2, 2, 2, 2, 1.0);
        paint(&mut mask, 4, 4, 2, 2, 1.0);
        let instances = extract(&mask, 0.5, 0.0, 1.0).expect("valid parameters");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].pixel_count, 8);
    }

    #[test]
    fn test_labels_follow_row_major_first_appearance() {
        let mut mask = ProbabilityMask::new(20, 20);
        // starts lower but further left: must come second
        paint(&mut mask, 1, 10, 3, 3, 0.9);
        paint(&mut mask, 15, 2, 2, 2, 0.7);
        paint(&mut mask, 8, 5, 1, 1, 0.6);
        let instances = extract(&mask, 0.5, 0.0, 1.0).expect("valid parameters");
        let firsts: Vec<_> = instances
            .iter()
            .map(|i| (i.label, i.bounds.min_row, i.bounds.min_col))
            .collect();
        assert_eq!(firsts, vec![(1, 2, 15), (2, 5, 8), (3, 10, 1)]);
        assert!((instances[0].mean_probability - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_min_object_area_discards_and_relabels() {
        let mut mask = ProbabilityMask::new(20, 20);
        paint(&mut mask, 0, 0, 1, 1, 1.0);
        paint(&mut mask, 5, 5, 4, 4, 1.0);
        let instances = extract(&mask, 0.5, 4.0, 0.5).expect("valid parameters");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].label, 1);
        assert_eq!(instances[0].pixel_count, 16);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let mask = ProbabilityMask::new(2, 2);
        assert!(extract(&mask, f32::NAN, 0.0, 1.0).is_err());
        assert!(extract(&mask, 0.5, -1.0, 1.0).is_err());
        assert!(extract(&mask, 0.5, 0.0, 0.0).is_err());
    }

    proptest! {
        #[test]
        fn prop_extraction_is_idempotent(
            cells in proptest::collection::vec(0.0f32..1.0, 24 * 18),
            threshold in 0.1f32..0.9,
        ) {
            let mask = ProbabilityMask::from_raw(24, 18, cells).unwrap();
            let first = extract(&mask, threshold, 2.0, 1.0).unwrap();
            let second = extract(&mask, threshold, 2.0, 1.0).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
