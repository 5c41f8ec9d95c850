//! Two preprocessing paths, one per backbone backend.
//!
//! [`NativeTransform`] feeds the candle encoder and produces a clip in
//! `[1, C, T, S, S]` layout. [`HubProcessor`] reproduces the hub model's own
//! video processor and produces `[1, T, C, S, S]`. Both resize the short side
//! bilinearly (half-pixel centres, no antialiasing), centre-crop to `S x S`,
//! scale to `[0, 1]` and normalise with the ImageNet constants below, so for
//! equal crop and short side they agree element-wise up to float rounding.

mod hub;
mod native;

pub use hub::{HubProcessor, HubProcessorConfig};
pub use native::NativeTransform;

use {
    crate::error::{InferError, Result},
    candle_core::Tensor,
    ndarray::Array5,
};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Short side before cropping: `round(256 / 224 * target_size)`.
pub fn short_side_for(target_size: usize) -> usize {
    (256.0 / 224.0 * target_size as f64).round() as usize
}

/// Output (height, width) when the short side of `height x width` becomes
/// `short_side`; the long side is scaled and truncated.
pub fn resized_dims(height: usize, width: usize, short_side: usize) -> (usize, usize) {
    if height <= width {
        (short_side, width * short_side / height)
    } else {
        (height * short_side / width, short_side)
    }
}

/// Leading offset of a centred `crop` window inside `dim`.
pub fn crop_offset(dim: usize, crop: usize) -> usize {
    dim.saturating_sub(crop) / 2
}

/// A normalised clip ready for one of the two backends.
#[derive(Debug, Clone)]
pub enum NormalizedTensor {
    /// `[1, C, T, S, S]` on the inference device.
    Native(Tensor),
    /// `[1, T, C, S, S]` on the host.
    Hub(Array5<f32>),
}

impl NormalizedTensor {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            NormalizedTensor::Native(t) => t.dims().to_vec(),
            NormalizedTensor::Hub(a) => a.shape().to_vec(),
        }
    }

    pub fn variant(&self) -> &'static str {
        match self {
            NormalizedTensor::Native(_) => "native",
            NormalizedTensor::Hub(_) => "hub",
        }
    }

    /// (frames, height, width) regardless of layout.
    pub fn clip_dims(&self) -> Result<(usize, usize, usize)> {
        let dims = self.dims();
        if dims.len() != 5 || dims[0] != 1 {
            return Err(InferError::shape("[1, _, _, H, W] clip", dims));
        }
        let (frames, channels) = match self {
            NormalizedTensor::Native(_) => (dims[2], dims[1]),
            NormalizedTensor::Hub(_) => (dims[1], dims[2]),
        };
        if channels != 3 {
            return Err(InferError::shape("3 channels", dims));
        }
        Ok((frames, dims[3], dims[4]))
    }

    /// Values flattened in canonical `T, C, H, W` order.
    pub fn to_tchw(&self) -> Result<Vec<f32>> {
        match self {
            NormalizedTensor::Native(t) => Ok(t
                .squeeze(0)?
                .permute((1, 0, 2, 3))?
                .flatten_all()?
                .to_vec1::<f32>()?),
            NormalizedTensor::Hub(a) => Ok(a.iter().copied().collect()),
        }
    }
}
