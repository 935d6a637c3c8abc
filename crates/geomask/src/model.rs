use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::tiling::Chip,
    error::{MaskError, Result},
    raster::Band,
    traits::ChipModel,
};

/// Reads probabilities straight out of one band of the chip.
///
/// Used for rasters that already hold per-pixel scores, such as a mask
/// written by an earlier run or an external classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BandModel {
    /// Zero-based band index
    pub band: usize,
    /// Multiplier applied to every sample, e.g. `1/255` for 8-bit scores
    pub scale: f32,
}

impl Default for BandModel {
    fn default() -> Self {
        Self {
            band: 0,
            scale: 1.0,
        }
    }
}

impl BandModel {
    pub fn new(band: usize, scale: f32) -> Self {
        Self { band, scale }
    }
}

impl ChipModel for BandModel {
    fn infer(&self, chip: &Chip) -> Result<Band> {
        let band = chip.band(self.band).ok_or_else(|| MaskError::InferenceFailure {
            chip_index: chip.window.index,
            attempts: 1,
            message: format!(
                "band {} requested but the chip has {} band(s)",
                self.band,
                chip.bands.len()
            ),
        })?;
        if self.scale == 1.0 {
            return Ok(band.clone());
        }
        let mut scaled = band.clone();
        scaled.iter_mut().for_each(|value| *value *= self.scale);
        Ok(scaled)
    }

    fn name(&self) -> &str {
        "band"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::tiling::ChipWindow;
    use crate::raster::GeoTransform;
    use image::Luma;

    fn chip(bands: Vec<Band>) -> Chip {
        Chip {
            window: ChipWindow {
                index: 3,
                col_off: 0,
                row_off: 0,
                width: 2,
                height: 2,
                valid_width: 2,
                valid_height: 2,
            },
            bands,
            transform: GeoTransform::identity(),
        }
    }

    #[test]
    fn test_reads_and_scales_band() {
        let chip = chip(vec![
            Band::from_pixel(2, 2, Luma([0.0])),
            Band::from_pixel(2, 2, Luma([200.0])),
        ]);
        let model = BandModel::new(1, 1.0 / 255.0);
        let probabilities = model.infer(&chip).expect("band exists");
        assert!((probabilities.get_pixel(1, 1).0[0] - 200.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_band_is_inference_failure() {
        let chip = chip(vec![Band::new(2, 2)]);
        let result = BandModel::new(2, 1.0).infer(&chip);
        assert!(matches!(
            result,
            Err(MaskError::InferenceFailure { chip_index: 3, .. })
        ));
    }
}
