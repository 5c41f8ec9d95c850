use {
    crate::error::{InferError, Result},
    intent_base::Tensor,
    intent_image::ImageBuffer,
};

/// A still image replicated along time, layout `[T, C, H, W]`, RGB8.
///
/// A single image is treated as a zero-motion clip. The encoder accepts it,
/// but there is no temporal signal in it.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTensor {
    tensor: Tensor<u8>,
}

impl VideoTensor {
    pub fn frames(&self) -> usize {
        self.tensor.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.tensor.shape[1]
    }

    pub fn height(&self) -> usize {
        self.tensor.shape[2]
    }

    pub fn width(&self) -> usize {
        self.tensor.shape[3]
    }

    pub fn shape(&self) -> &[usize] {
        &self.tensor.shape
    }

    /// Planar bytes of frame `t`, layout `[C, H, W]`.
    pub fn frame(&self, t: usize) -> Option<&[u8]> {
        let size = self.channels() * self.height() * self.width();
        self.tensor.data.get(t * size..(t + 1) * size)
    }

    pub fn as_tensor(&self) -> &Tensor<u8> {
        &self.tensor
    }
}

/// Stacks `frame_count` copies of `image` and reorders HWC to CHW per frame.
pub fn synthesize(image: &ImageBuffer, frame_count: usize) -> Result<VideoTensor> {
    if frame_count == 0 {
        return Err(InferError::Configuration(
            "frame_count must be at least 1".to_string(),
        ));
    }

    let (h, w, c) = (image.height(), image.width(), image.channels());
    let hwc = image.as_bytes();

    let mut chw = vec![0u8; c * h * w];
    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                chw[ch * h * w + y * w + x] = hwc[(y * w + x) * c + ch];
            }
        }
    }

    let mut data = Vec::with_capacity(frame_count * chw.len());
    for _ in 0..frame_count {
        data.extend_from_slice(&chw);
    }

    let tensor = Tensor::new(vec![frame_count, c, h, w], data)?;
    Ok(VideoTensor { tensor })
}
