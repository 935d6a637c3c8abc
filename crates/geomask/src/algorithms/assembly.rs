use rayon::prelude::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    algorithms::tiling::ChipWindow,
    error::{MaskError, Result},
    raster::{Band, ProbabilityMask, RasterExtent},
};

/// How overlapping chip masks are combined per cell.
///
/// `Max` keeps a single confident detection from being diluted by
/// low-confidence neighbours; `Average` smooths seams between chips.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlendMode {
    #[default]
    Max,
    Average,
}

/// Model output for one chip
#[derive(Debug, Clone)]
pub struct ChipMask {
    pub window: ChipWindow,
    pub probabilities: Band,
}

impl ChipMask {
    /// Pairs a probability grid with its window; sizes must match exactly
    pub fn new(window: ChipWindow, probabilities: Band) -> Result<Self> {
        if probabilities.dimensions() != (window.width, window.height) {
            return Err(MaskError::invalid_config(format!(
                "chip {} mask is {:?}, expected {}x{}",
                window.index,
                probabilities.dimensions(),
                window.width,
                window.height
            )));
        }
        Ok(Self {
            window,
            probabilities,
        })
    }
}

/// NaN counts as no detection; everything else is clamped into `[0, 1]`
fn sanitize(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Accumulates chip masks into a full-resolution mask.
///
/// Chips can be added in any order; the per-cell reduction is commutative and
/// associative, so partial assemblers can also be [merged](Self::merge).
#[derive(Debug, Clone)]
pub struct MaskAssembler {
    extent: RasterExtent,
    mode: BlendMode,
    values: Vec<f32>,
    sums: Vec<f64>,
    counts: Vec<u32>,
    chips_added: usize,
}

impl MaskAssembler {
    pub fn new(extent: RasterExtent, mode: BlendMode) -> Self {
        let cells = extent.pixel_count();
        let (values, sums, counts) = match mode {
            BlendMode::Max => (vec![0.0; cells], Vec::new(), Vec::new()),
            BlendMode::Average => (Vec::new(), vec![0.0; cells], vec![0; cells]),
        };
        Self {
            extent,
            mode,
            values,
            sums,
            counts,
            chips_added: 0,
        }
    }

    pub fn extent(&self) -> RasterExtent {
        self.extent
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }

    pub fn chips_added(&self) -> usize {
        self.chips_added
    }

    /// Blend the valid (non-padded) part of `mask` into the output
    pub fn add(&mut self, mask: &ChipMask) -> Result<()> {
        let window = &mask.window;
        if mask.probabilities.dimensions() != (window.width, window.height) {
            return Err(MaskError::invalid_config(format!(
                "chip {} mask does not match its window",
                window.index
            )));
        }
        if window.col_off + window.valid_width > self.extent.width
            || window.row_off + window.valid_height > self.extent.height
        {
            return Err(MaskError::invalid_config(format!(
                "chip {} at ({}, {}) lies outside the {}x{} raster",
                window.index,
                window.col_off,
                window.row_off,
                self.extent.width,
                self.extent.height
            )));
        }

        let source = mask.probabilities.as_raw();
        let stride = self.extent.width as usize;
        for row in 0..window.valid_height as usize {
            let src_row = &source[row * window.width as usize..][..window.valid_width as usize];
            let dst_start = (window.row_off as usize + row) * stride + window.col_off as usize;
            match self.mode {
                BlendMode::Max => {
                    let dst = &mut self.values[dst_start..dst_start + src_row.len()];
                    for (cell, &value) in dst.iter_mut().zip(src_row) {
                        *cell = cell.max(sanitize(value));
                    }
                }
                BlendMode::Average => {
                    let range = dst_start..dst_start + src_row.len();
                    for ((sum, count), &value) in self.sums[range.clone()]
                        .iter_mut()
                        .zip(&mut self.counts[range])
                        .zip(src_row)
                    {
                        *sum += sanitize(value) as f64;
                        *count += 1;
                    }
                }
            }
        }
        self.chips_added += 1;
        Ok(())
    }

    /// Combine two partial assemblies over the same extent
    pub fn merge(mut self, other: Self) -> Result<Self> {
        if self.extent != other.extent || self.mode != other.mode {
            return Err(MaskError::invalid_config(format!(
                "cannot merge {} assembly of {:?} with {} assembly of {:?}",
                self.mode, self.extent, other.mode, other.extent
            )));
        }
        match self.mode {
            BlendMode::Max => {
                for (cell, value) in self.values.iter_mut().zip(other.values) {
                    *cell = cell.max(value);
                }
            }
            BlendMode::Average => {
                for (sum, value) in self.sums.iter_mut().zip(other.sums) {
                    *sum += value;
                }
                for (count, value) in self.counts.iter_mut().zip(other.counts) {
                    *count += value;
                }
            }
        }
        self.chips_added += other.chips_added;
        Ok(self)
    }

    pub fn finish(self) -> Result<ProbabilityMask> {
        let data = match self.mode {
            BlendMode::Max => self.values,
            BlendMode::Average => self
                .sums
                .iter()
                .zip(&self.counts)
                .map(|(&sum, &count)| {
                    if count == 0 {
                        0.0
                    } else {
                        (sum / count as f64) as f32
                    }
                })
                .collect(),
        };
        ProbabilityMask::from_raw(self.extent.width, self.extent.height, data).ok_or_else(|| {
            MaskError::invalid_config("assembled buffer does not match the raster extent")
        })
    }
}

/// Assemble chip masks sequentially
pub fn assemble<I>(extent: RasterExtent, mode: BlendMode, chip_masks: I) -> Result<ProbabilityMask>
where
    I: IntoIterator<Item = ChipMask>,
{
    let mut assembler = MaskAssembler::new(extent, mode);
    for mask in chip_masks {
        assembler.add(&mask)?;
    }
    assembler.finish()
}

/// Assemble chip masks with a rayon fold/reduce over partial assemblers
pub fn assemble_parallel(
    extent: RasterExtent,
    mode: BlendMode,
    chip_masks: &[ChipMask],
) -> Result<ProbabilityMask> {
    chip_masks
        .par_iter()
        .try_fold(
            || MaskAssembler::new(extent, mode),
            |mut assembler, mask| {
                assembler.add(mask)?;
                Ok::<_, MaskError>(assembler)
            },
        )
        .try_reduce(|| MaskAssembler::new(extent, mode), MaskAssembler::merge)?
        .finish()
}
