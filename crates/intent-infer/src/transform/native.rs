use {
    super::{IMAGENET_MEAN, IMAGENET_STD, NormalizedTensor, crop_offset, resized_dims, short_side_for},
    crate::{
        error::{InferError, Result},
        video::VideoTensor,
    },
    candle_core::{Device, Tensor},
};

/// Resize, centre-crop, `[0, 1]` scaling and per-channel normalisation for
/// the native encoder. Output layout `[1, C, T, S, S]`.
#[derive(Debug, Clone)]
pub struct NativeTransform {
    target_size: usize,
    short_side: usize,
    device: Device,
}

impl NativeTransform {
    pub fn new(target_size: usize, device: Device) -> Self {
        Self {
            target_size,
            short_side: short_side_for(target_size),
            device,
        }
    }

    /// Override the short side, e.g. to match a processor configured differently.
    pub fn with_short_side(mut self, short_side: usize) -> Result<Self> {
        if short_side < self.target_size {
            return Err(InferError::Configuration(format!(
                "short side {short_side} is smaller than crop size {}",
                self.target_size
            )));
        }
        self.short_side = short_side;
        Ok(self)
    }

    pub fn target_size(&self) -> usize {
        self.target_size
    }

    pub fn short_side(&self) -> usize {
        self.short_side
    }

    pub fn apply(&self, video: &VideoTensor) -> Result<NormalizedTensor> {
        let (frames, channels) = (video.frames(), video.channels());
        if channels != 3 {
            return Err(InferError::shape("3 channels", video.shape()));
        }
        let (in_h, in_w) = (video.height(), video.width());
        let (out_h, out_w) = resized_dims(in_h, in_w, self.short_side);
        let crop = self.target_size;
        let (off_y, off_x) = (crop_offset(out_h, crop), crop_offset(out_w, crop));

        let ys: Vec<Tap> = (off_y..off_y + crop).map(|o| Tap::new(o, in_h, out_h)).collect();
        let xs: Vec<Tap> = (off_x..off_x + crop).map(|o| Tap::new(o, in_w, out_w)).collect();

        // clip layout: channel, time, row, column
        let plane = crop * crop;
        let mut data = vec![0f32; channels * frames * plane];
        for t in 0..frames {
            let frame = video
                .frame(t)
                .ok_or_else(|| InferError::shape(format!("{frames} frames"), video.shape()))?;
            for c in 0..channels {
                let src = &frame[c * in_h * in_w..(c + 1) * in_h * in_w];
                let dst = &mut data[(c * frames + t) * plane..(c * frames + t + 1) * plane];
                for (oy, ty) in ys.iter().enumerate() {
                    let row0 = &src[ty.i0 * in_w..(ty.i0 + 1) * in_w];
                    let row1 = &src[ty.i1 * in_w..(ty.i1 + 1) * in_w];
                    for (ox, tx) in xs.iter().enumerate() {
                        let top = row0[tx.i0] as f32 * (1.0 - tx.frac) + row0[tx.i1] as f32 * tx.frac;
                        let bottom = row1[tx.i0] as f32 * (1.0 - tx.frac) + row1[tx.i1] as f32 * tx.frac;
                        dst[oy * crop + ox] = (top * (1.0 - ty.frac) + bottom * ty.frac) / 255.0;
                    }
                }
            }
        }

        let clip = Tensor::from_vec(data, (1, channels, frames, crop, crop), &self.device)?;
        let mean = Tensor::new(&IMAGENET_MEAN, &self.device)?.reshape((1, 3, 1, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, &self.device)?.reshape((1, 3, 1, 1, 1))?;
        let normalized = clip.broadcast_sub(&mean)?.broadcast_div(&std)?;
        Ok(NormalizedTensor::Native(normalized))
    }
}

/// Bilinear source taps for one output coordinate.
#[derive(Debug, Clone, Copy)]
struct Tap {
    i0: usize,
    i1: usize,
    frac: f32,
}

impl Tap {
    fn new(out: usize, in_len: usize, out_len: usize) -> Self {
        let scale = in_len as f32 / out_len as f32;
        let src = ((out as f32 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(in_len - 1);
        let i1 = (i0 + 1).min(in_len - 1);
        Self {
            i0,
            i1,
            frac: src - i0 as f32,
        }
    }
}
