use serde::{Deserialize, Serialize};

use crate::{
    error::{MaskError, Result},
    raster::{Band, GeoTransform, Raster},
};

/// Placement of a chip inside its parent raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChipWindow {
    /// Position in row-major sampling order
    pub index: usize,
    pub col_off: u32,
    pub row_off: u32,
    pub width: u32,
    pub height: u32,
    /// Part of the window that overlaps the raster; the rest is padding
    pub valid_width: u32,
    pub valid_height: u32,
}

impl ChipWindow {
    pub fn is_padded(&self) -> bool {
        self.valid_width < self.width || self.valid_height < self.height
    }

    /// Whether raster pixel `(col, row)` is covered by the valid part of this window
    pub fn covers(&self, col: u32, row: u32) -> bool {
        col >= self.col_off
            && row >= self.row_off
            && col < self.col_off + self.valid_width
            && row < self.row_off + self.valid_height
    }
}

/// A fixed-size model input cut from a raster
#[derive(Debug, Clone)]
pub struct Chip {
    pub window: ChipWindow,
    pub bands: Vec<Band>,
    /// Parent transform shifted to the chip origin
    pub transform: GeoTransform,
}

impl Chip {
    pub fn band(&self, index: usize) -> Option<&Band> {
        self.bands.get(index)
    }

    pub fn width(&self) -> u32 {
        self.window.width
    }

    pub fn height(&self) -> u32 {
        self.window.height
    }
}

/// Splits rasters into overlapping fixed-size chips.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSampler {
    chip_width: u32,
    chip_height: u32,
    overlap: f64,
    fill_value: f32,
}

impl TileSampler {
    /// Fails when a chip dimension is zero or `overlap` is outside `[0, 1)`
    pub fn new(chip_size: (u32, u32), overlap: f64) -> Result<Self> {
        let (chip_width, chip_height) = chip_size;
        if chip_width == 0 || chip_height == 0 {
            return Err(MaskError::invalid_config(format!(
                "chip_size must be positive, got {chip_width}x{chip_height}"
            )));
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(MaskError::invalid_config(format!(
                "overlap must be in [0, 1), got {overlap}"
            )));
        }
        Ok(Self {
            chip_width,
            chip_height,
            overlap,
            fill_value: 0.0,
        })
    }

    /// Value written into the padded part of edge chips
    pub fn with_fill_value(mut self, fill_value: f32) -> Self {
        self.fill_value = fill_value;
        self
    }

    pub fn chip_size(&self) -> (u32, u32) {
        (self.chip_width, self.chip_height)
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    pub fn fill_value(&self) -> f32 {
        self.fill_value
    }

    /// Step between consecutive chip origins, never below one pixel
    pub fn stride(&self) -> (u32, u32) {
        let step = |size: u32| ((size as f64 * (1.0 - self.overlap)).floor() as u32).max(1);
        (step(self.chip_width), step(self.chip_height))
    }

    /// Chip windows for a `width` x `height` raster in row-major order
    pub fn windows(&self, width: u32, height: u32) -> WindowIter {
        let (stride_x, stride_y) = self.stride();
        WindowIter {
            cols: axis_offsets(width, self.chip_width, stride_x),
            rows: axis_offsets(height, self.chip_height, stride_y),
            chip_width: self.chip_width,
            chip_height: self.chip_height,
            raster_width: width,
            raster_height: height,
            next: 0,
        }
    }

    pub fn chip_count(&self, width: u32, height: u32) -> usize {
        self.windows(width, height).len()
    }

    /// Lazily read chips from `raster`; every call starts a fresh sequence
    pub fn sample<'a>(&self, raster: &'a Raster) -> ChipIter<'a> {
        ChipIter {
            raster,
            windows: self.windows(raster.width(), raster.height()),
            fill_value: self.fill_value,
        }
    }
}

/// Chip origins along one axis: `0, stride, 2 * stride, ...` until a chip reaches the edge
fn axis_offsets(size: u32, chip: u32, stride: u32) -> Vec<u32> {
    let mut offsets = vec![0];
    let mut offset = 0u32;
    while offset.saturating_add(chip) < size {
        offset += stride;
        offsets.push(offset);
    }
    offsets
}

#[derive(Debug, Clone)]
pub struct WindowIter {
    cols: Vec<u32>,
    rows: Vec<u32>,
    chip_width: u32,
    chip_height: u32,
    raster_width: u32,
    raster_height: u32,
    next: usize,
}

impl Iterator for WindowIter {
    type Item = ChipWindow;

    fn next(&mut self) -> Option<ChipWindow> {
        let total = self.cols.len() * self.rows.len();
        if self.next >= total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let col_off = self.cols[index % self.cols.len()];
        let row_off = self.rows[index / self.cols.len()];
        Some(ChipWindow {
            index,
            col_off,
            row_off,
            width: self.chip_width,
            height: self.chip_height,
            valid_width: (self.raster_width - col_off).min(self.chip_width),
            valid_height: (self.raster_height - row_off).min(self.chip_height),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.cols.len() * self.rows.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WindowIter {}

/// Lazy chip reader returned by [`TileSampler::sample`]
#[derive(Debug, Clone)]
pub struct ChipIter<'a> {
    raster: &'a Raster,
    windows: WindowIter,
    fill_value: f32,
}

impl Iterator for ChipIter<'_> {
    type Item = Chip;

    fn next(&mut self) -> Option<Chip> {
        let window = self.windows.next()?;
        let bands = self.raster.read_window(
            window.col_off,
            window.row_off,
            window.width,
            window.height,
            self.fill_value,
        );
        Some(Chip {
            window,
            bands,
            transform: self.raster.transform().offset(window.col_off, window.row_off),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.windows.size_hint()
    }
}

impl ExactSizeIterator for ChipIter<'_> {}
