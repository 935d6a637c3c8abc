use image::{GrayImage, Luma};

use crate::raster::{Band, ProbabilityMask};

/// Foreground value used in binary masks
pub const FOREGROUND: u8 = 255;

/// Binarize a probability mask: a cell is kept iff its value is `>= threshold`.
/// NaN cells are never kept.
pub fn binarize(mask: &ProbabilityMask, threshold: f32) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] >= threshold {
            Luma([FOREGROUND])
        } else {
            Luma([0u8])
        }
    })
}

/// Zero out probabilities the model was not confident enough about
pub fn suppress_below(probabilities: &mut Band, confidence_threshold: f32) {
    if confidence_threshold <= 0.0 {
        return;
    }
    for value in probabilities.iter_mut() {
        if value.is_nan() || *value < confidence_threshold {
            *value = 0.0;
        }
    }
}
