use {crate::ImageError, intent_base::Tensor};

/// Decoded RGB8 pixel grid, HWC layout `[height, width, 3]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    tensor: Tensor<u8>,
}

impl ImageBuffer {
    pub const CHANNELS: usize = 3;

    /// Wrap row-major RGB bytes. Fails unless `data.len() == width * height * 3`.
    pub fn from_rgb(width: usize, height: usize, data: Vec<u8>) -> Result<Self, ImageError> {
        let tensor = Tensor::new(vec![height, width, Self::CHANNELS], data)?;
        Ok(Self { tensor })
    }

    pub fn height(&self) -> usize {
        self.tensor.shape[0]
    }

    pub fn width(&self) -> usize {
        self.tensor.shape[1]
    }

    pub fn channels(&self) -> usize {
        self.tensor.shape[2]
    }

    /// RGB triple at (`x`, `y`), or `None` outside the image.
    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let base = (y * self.width() + x) * Self::CHANNELS;
        let px = &self.tensor.data[base..base + Self::CHANNELS];
        Some([px[0], px[1], px[2]])
    }

    pub fn as_tensor(&self) -> &Tensor<u8> {
        &self.tensor
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.tensor.data
    }
}
