use {
    crate::error::{InferError, Result},
    candle_core::Device,
    serde::{Deserialize, Serialize},
    std::path::PathBuf,
};

pub const DEFAULT_MODEL_NAME: &str = "facebook/vjepa2-vitg-fpc64-256";
pub const DEFAULT_LABELS_PATH: &str = "ssv2_classes.json";
const HUB_CACHE_DIR: &str = "data/hub";

/// Native video transformer hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitConfig {
    pub img_size: usize,
    pub num_frames: usize,
    pub patch_size: usize,
    pub tubelet_size: usize,
    pub in_chans: usize,
    pub embed_dim: usize,
    pub depth: usize,
    pub num_heads: usize,
    pub mlp_ratio: f64,
    pub layer_norm_eps: f64,
}

impl VitConfig {
    /// ViT-g/16 at 256px, 64 frames.
    pub fn giant() -> Self {
        Self {
            img_size: 256,
            num_frames: 64,
            patch_size: 16,
            tubelet_size: 2,
            in_chans: 3,
            embed_dim: 1408,
            depth: 40,
            num_heads: 16,
            mlp_ratio: 48.0 / 11.0,
            layer_norm_eps: 1e-6,
        }
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn mlp_hidden_dim(&self) -> usize {
        (self.embed_dim as f64 * self.mlp_ratio).round() as usize
    }

    /// Token grid as (time, height, width).
    pub fn grid(&self) -> (usize, usize, usize) {
        let side = self.img_size / self.patch_size;
        (self.num_frames / self.tubelet_size, side, side)
    }

    pub fn num_patches(&self) -> usize {
        let (t, h, w) = self.grid();
        t * h * w
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(InferError::Configuration(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        if self.patch_size == 0 || self.img_size % self.patch_size != 0 {
            return Err(InferError::Configuration(format!(
                "img_size {} is not a multiple of patch_size {}",
                self.img_size, self.patch_size
            )));
        }
        if self.tubelet_size == 0 || self.num_frames % self.tubelet_size != 0 {
            return Err(InferError::Configuration(format!(
                "num_frames {} is not a multiple of tubelet_size {}",
                self.num_frames, self.tubelet_size
            )));
        }
        Ok(())
    }
}

impl Default for VitConfig {
    fn default() -> Self {
        Self::giant()
    }
}

/// Everything the core needs to load and serve the two engines.
///
/// Supplied by the collaborator; the core never reads the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_name: String,
    /// Directory holding `model.onnx` and `preprocessor_config.json` for the
    /// hub encoder. Defaults to `data/hub/<model_name>`.
    pub hub_dir: Option<PathBuf>,
    /// Native encoder weights (safetensors). Native backend is skipped when absent.
    pub model_path: Option<PathBuf>,
    /// Classifier weights (safetensors). Random initialisation when absent.
    pub classifier_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    /// `cpu`, `cuda` or `cuda:<ordinal>`.
    pub device: String,
    pub embed_dim: usize,
    pub num_classes: usize,
    pub top_k: usize,
    pub frame_count: usize,
    pub classifier_heads: usize,
    pub classifier_depth: usize,
    pub max_unexpected_keys: usize,
    pub native: VitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL_NAME.to_string(),
            hub_dir: None,
            model_path: None,
            classifier_path: None,
            labels_path: Some(PathBuf::from(DEFAULT_LABELS_PATH)),
            device: "cpu".to_string(),
            embed_dim: 1408,
            num_classes: 174,
            top_k: 5,
            frame_count: 64,
            classifier_heads: 16,
            classifier_depth: 4,
            max_unexpected_keys: 16,
            native: VitConfig::giant(),
        }
    }
}

impl Config {
    pub fn hub_dir(&self) -> PathBuf {
        self.hub_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(HUB_CACHE_DIR).join(&self.model_name))
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame_count == 0 {
            return Err(InferError::Configuration(
                "frame_count must be at least 1".to_string(),
            ));
        }
        if self.num_classes == 0 {
            return Err(InferError::Configuration(
                "num_classes must be at least 1".to_string(),
            ));
        }
        if self.top_k == 0 || self.top_k > self.num_classes {
            return Err(InferError::Configuration(format!(
                "default top_k {} must be between 1 and num_classes {}",
                self.top_k, self.num_classes
            )));
        }
        if self.classifier_depth == 0 {
            return Err(InferError::Configuration(
                "classifier_depth must be at least 1".to_string(),
            ));
        }
        if self.classifier_heads == 0 || self.embed_dim % self.classifier_heads != 0 {
            return Err(InferError::Configuration(format!(
                "embed_dim {} is not divisible by classifier_heads {}",
                self.embed_dim, self.classifier_heads
            )));
        }
        self.native.validate()
    }

    pub fn candle_device(&self) -> Result<Device> {
        parse_device(&self.device)
    }

    pub fn cuda_ordinal(&self) -> Result<Option<usize>> {
        parse_ordinal(&self.device)
    }
}

/// Map a device identifier onto a candle device.
pub fn parse_device(name: &str) -> Result<Device> {
    match parse_ordinal(name)? {
        None => Ok(Device::Cpu),
        Some(ordinal) => cuda_device(ordinal),
    }
}

/// `None` for the CPU, the CUDA ordinal otherwise.
pub fn parse_ordinal(name: &str) -> Result<Option<usize>> {
    let name = name.trim().to_ascii_lowercase();
    if name == "cpu" {
        return Ok(None);
    }
    match name.strip_prefix("cuda") {
        Some("") => Ok(Some(0)),
        Some(rest) => rest
            .strip_prefix(':')
            .and_then(|n| n.parse::<usize>().ok())
            .map(Some)
            .ok_or_else(|| InferError::Configuration(format!("invalid device '{name}'"))),
        None => Err(InferError::Configuration(format!(
            "unknown device '{name}'"
        ))),
    }
}

#[cfg(feature = "cuda")]
fn cuda_device(ordinal: usize) -> Result<Device> {
    let device = Device::new_cuda(ordinal)?;
    if !device.is_cuda() {
        log::warn!("requested CUDA ordinal {ordinal} but device reports non-CUDA");
    }
    Ok(device)
}

#[cfg(not(feature = "cuda"))]
fn cuda_device(ordinal: usize) -> Result<Device> {
    Err(InferError::Configuration(format!(
        "cuda:{ordinal} requested but the cuda feature is not enabled"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_giant_dimensions() {
        let vit = VitConfig::giant();
        assert_eq!(vit.head_dim(), 88);
        assert_eq!(vit.mlp_hidden_dim(), 6144);
        assert_eq!(vit.grid(), (32, 16, 16));
        assert_eq!(vit.num_patches(), 8192);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(
            config.hub_dir(),
            PathBuf::from("data/hub/facebook/vjepa2-vitg-fpc64-256")
        );
    }

    #[test]
    fn test_validate_rejects_top_k_above_classes() {
        let config = Config {
            num_classes: 3,
            top_k: 5,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(InferError::Configuration(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"num_classes": 10, "top_k": 3, "device": "cpu"}"#).unwrap();
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.embed_dim, 1408);
        assert_eq!(config.model_name, DEFAULT_MODEL_NAME);
    }

    #[test]
    fn test_parse_device() {
        assert!(parse_device("CPU").unwrap().is_cpu());
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:x").is_err());
        assert_eq!(parse_ordinal("cuda").unwrap(), Some(0));
        assert_eq!(parse_ordinal(" cuda:2 ").unwrap(), Some(2));
        assert_eq!(parse_ordinal("cpu").unwrap(), None);
    }
}
