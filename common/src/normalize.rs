//! Image Normalizer
//!
//! Turns an arbitrary decoded image into the fixed `(1, 224, 224, 3)` float
//! tensor the classifier expects. The fit policy is cover-then-center-crop:
//! the image is scaled with Lanczos3 until the 224x224 box is fully covered,
//! then the overflow is cropped away evenly on both sides.

use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array4, ArrayView4};

use crate::error::{PipelineError, Result};

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

/// Number of color channels in the model input.
pub const INPUT_CHANNELS: usize = 3;

/// A `(1, 224, 224, 3)` NHWC tensor with every value in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array4<f32>,
}

impl NormalizedTensor {
    /// Tensor shape as `[batch, height, width, channels]`.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Flat values in row-major NHWC order.
    pub fn as_slice(&self) -> &[f32] {
        // Built from a contiguous Vec in standard layout, never reshaped.
        self.data.as_slice().unwrap_or(&[])
    }

    pub fn into_inner(self) -> Array4<f32> {
        self.data
    }
}

/// Decode raw image bytes and normalize them.
pub fn normalize_bytes(bytes: &[u8]) -> Result<NormalizedTensor> {
    if bytes.is_empty() {
        return Err(PipelineError::Decode("empty image payload".to_string()));
    }
    let image = image::load_from_memory(bytes)?;
    Ok(normalize_image(&image))
}

/// Normalize an already decoded image.
///
/// Grayscale input is replicated into all three channels, alpha is dropped
/// without compositing, and wider sample formats are quantised to 8 bits
/// before resampling.
pub fn normalize_image(image: &DynamicImage) -> NormalizedTensor {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let fitted = rgb
        .resize_to_fill(INPUT_SIZE, INPUT_SIZE, FilterType::Lanczos3)
        .to_rgb8();

    let side = INPUT_SIZE as usize;
    let data = Array4::from_shape_fn((1, side, side, INPUT_CHANNELS), |(_, y, x, c)| {
        fitted.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    NormalizedTensor { data }
}
