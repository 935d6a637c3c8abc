use geo_types::LineString;
use rayon::prelude::*;

use crate::{algorithms::tiling::Chip, error::Result, raster::Band};

/// Trait for detection models run over raster chips
pub trait ChipModel: Send + Sync {
    /// Per-pixel probabilities for one chip, same size as the chip
    fn infer(&self, chip: &Chip) -> Result<Band>;

    /// Infer a batch; results line up with `chips`. Runs chips in parallel by default.
    fn infer_batch(&self, chips: &[Chip]) -> Vec<Result<Band>> {
        chips.par_iter().map(|chip| self.infer(chip)).collect()
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> ChipModel for F
where
    F: Fn(&Chip) -> Result<Band> + Send + Sync,
{
    fn infer(&self, chip: &Chip) -> Result<Band> {
        self(chip)
    }

    fn name(&self) -> &str {
        "closure"
    }
}

/// Trait for ring simplification algorithms
pub trait RingSimplifier: Send + Sync {
    /// Simplify a closed ring given in pixel coordinates
    fn simplify(&self, ring: &LineString<f64>, tolerance: f64) -> LineString<f64>;

    fn name(&self) -> &'static str;
}
