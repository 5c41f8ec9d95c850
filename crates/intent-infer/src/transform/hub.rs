use {
    super::{IMAGENET_MEAN, IMAGENET_STD, NormalizedTensor, crop_offset, resized_dims, short_side_for},
    crate::{
        error::{InferError, Result},
        video::VideoTensor,
    },
    ndarray::{Array2, Array3, Array5, ArrayView2, Axis, s},
    serde::Deserialize,
    std::path::Path,
};

const CONSTANT_TOLERANCE: f32 = 1e-6;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum CropSize {
    Square(usize),
    Dims { height: usize, width: usize },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResizeSize {
    pub shortest_edge: Option<usize>,
}

fn enabled() -> bool {
    true
}

fn default_rescale() -> f32 {
    1.0 / 255.0
}

/// The hub model's `preprocessor_config.json`, reduced to the fields that
/// affect pixel values.
#[derive(Debug, Clone, Deserialize)]
pub struct HubProcessorConfig {
    pub crop_size: CropSize,
    #[serde(default)]
    pub size: Option<ResizeSize>,
    pub image_mean: [f32; 3],
    pub image_std: [f32; 3],
    #[serde(default = "default_rescale")]
    pub rescale_factor: f32,
    #[serde(default = "enabled")]
    pub do_resize: bool,
    #[serde(default = "enabled")]
    pub do_center_crop: bool,
    #[serde(default = "enabled")]
    pub do_rescale: bool,
    #[serde(default = "enabled")]
    pub do_normalize: bool,
}

impl HubProcessorConfig {
    /// A configuration equivalent to the native transform at `crop`.
    pub fn imagenet(crop: usize) -> Self {
        Self {
            crop_size: CropSize::Dims {
                height: crop,
                width: crop,
            },
            size: Some(ResizeSize {
                shortest_edge: Some(short_side_for(crop)),
            }),
            image_mean: IMAGENET_MEAN,
            image_std: IMAGENET_STD,
            rescale_factor: default_rescale(),
            do_resize: true,
            do_center_crop: true,
            do_rescale: true,
            do_normalize: true,
        }
    }
}

/// Frame-first video processor matching the hub model's own preprocessing.
///
/// Resamples with two separable passes (along rows, then along columns) on
/// host `ndarray`s. Output layout `[1, T, C, S, S]`.
#[derive(Debug, Clone)]
pub struct HubProcessor {
    crop: usize,
    short_side: usize,
    mean: [f32; 3],
    std: [f32; 3],
    rescale: f32,
}

impl HubProcessor {
    pub fn new(config: HubProcessorConfig) -> Result<Self> {
        let crop = match config.crop_size {
            CropSize::Square(side) => side,
            CropSize::Dims { height, width } if height == width => height,
            CropSize::Dims { height, width } => {
                return Err(InferError::Configuration(format!(
                    "non-square crop {height}x{width} is not supported"
                )));
            }
        };
        if crop == 0 {
            return Err(InferError::Configuration("crop size is zero".to_string()));
        }
        if !(config.do_resize && config.do_center_crop && config.do_rescale && config.do_normalize) {
            return Err(InferError::Configuration(
                "hub processor must resize, crop, rescale and normalise".to_string(),
            ));
        }
        check_constants("image_mean", &config.image_mean, &IMAGENET_MEAN)?;
        check_constants("image_std", &config.image_std, &IMAGENET_STD)?;
        if (config.rescale_factor - default_rescale()).abs() > CONSTANT_TOLERANCE {
            return Err(InferError::Configuration(format!(
                "rescale_factor {} differs from 1/255",
                config.rescale_factor
            )));
        }

        let short_side = config
            .size
            .and_then(|s| s.shortest_edge)
            .unwrap_or_else(|| short_side_for(crop));
        if short_side < crop {
            return Err(InferError::Configuration(format!(
                "shortest_edge {short_side} is smaller than crop size {crop}"
            )));
        }

        Ok(Self {
            crop,
            short_side,
            mean: config.image_mean,
            std: config.image_std,
            rescale: config.rescale_factor,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            InferError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::new(serde_json::from_str(&text)?)
    }

    pub fn crop_size(&self) -> usize {
        self.crop
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
        let (off_y, off_x) = (crop_offset(out_h, self.crop), crop_offset(out_w, self.crop));

        let col_taps = taps(in_w, out_w);
        let row_taps = taps(in_h, out_h);

        let mut out = Array5::<f32>::zeros((1, frames, channels, self.crop, self.crop));
        for t in 0..frames {
            let frame = video
                .frame(t)
                .ok_or_else(|| InferError::shape(format!("{frames} frames"), video.shape()))?;
            let pixels = Array3::from_shape_vec(
                (channels, in_h, in_w),
                frame.iter().map(|&v| v as f32 * self.rescale).collect(),
            )
            .map_err(|e| InferError::shape("[C, H, W] frame", e.to_string()))?;

            for c in 0..channels {
                let resized = resize_plane(pixels.index_axis(Axis(0), c), &row_taps, &col_taps);
                let cropped = resized.slice(s![off_y..off_y + self.crop, off_x..off_x + self.crop]);
                let normalized = cropped.mapv(|v| (v - self.mean[c]) / self.std[c]);
                out.slice_mut(s![0, t, c, .., ..]).assign(&normalized);
            }
        }

        Ok(NormalizedTensor::Hub(out))
    }
}

fn check_constants(name: &str, got: &[f32; 3], expected: &[f32; 3]) -> Result<()> {
    if got
        .iter()
        .zip(expected)
        .any(|(g, e)| (g - e).abs() > CONSTANT_TOLERANCE)
    {
        return Err(InferError::Configuration(format!(
            "{name} {got:?} drifts from {expected:?}"
        )));
    }
    Ok(())
}

/// Per output position: (low index, high index, weight of the high index).
fn taps(in_len: usize, out_len: usize) -> Vec<(usize, usize, f32)> {
    let scale = in_len as f32 / out_len as f32;
    (0..out_len)
        .map(|o| {
            let center = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
            let lo = (center.floor() as usize).min(in_len - 1);
            let hi = (lo + 1).min(in_len - 1);
            (lo, hi, center - lo as f32)
        })
        .collect()
}

fn resize_plane(
    plane: ArrayView2<'_, f32>,
    row_taps: &[(usize, usize, f32)],
    col_taps: &[(usize, usize, f32)],
) -> Array2<f32> {
    let in_h = plane.nrows();
    let mut horizontal = Array2::<f32>::zeros((in_h, col_taps.len()));
    for y in 0..in_h {
        for (x, &(lo, hi, w)) in col_taps.iter().enumerate() {
            horizontal[[y, x]] = plane[[y, lo]] * (1.0 - w) + plane[[y, hi]] * w;
        }
    }
    let mut out = Array2::<f32>::zeros((row_taps.len(), col_taps.len()));
    for (y, &(lo, hi, w)) in row_taps.iter().enumerate() {
        let blended = &horizontal.row(lo) * (1.0 - w) + &horizontal.row(hi) * w;
        out.row_mut(y).assign(&blended);
    }
    out
}
