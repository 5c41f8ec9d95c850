use {
    crate::{
        config::{Config, VitConfig},
        error::{InferError, Result},
        hub::{HubEncoder, MODEL_FILE, PROCESSOR_CONFIG_FILE},
        model::VisionTransformer,
        transform::{HubProcessor, HubProcessorConfig, NativeTransform, NormalizedTensor, short_side_for},
        video::VideoTensor,
        weights::{LoadReport, load_checkpoint},
    },
    candle_core::{DType, Device, Tensor},
    candle_nn::{VarBuilder, VarMap},
    serde::Serialize,
    std::path::{Path, PathBuf},
};

/// Checkpoints bundling encoder and classifiers keep the encoder here.
const ENCODER_SECTION: &str = "encoder.";

/// Which encoder the engine runs. Fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Native,
    Hub,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Native => "native",
            Backend::Hub => "hub",
        }
    }
}

/// Encoder output, `[1, N, D]`.
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    tensor: Tensor,
}

impl FeatureTensor {
    pub fn new(tensor: Tensor) -> Result<Self> {
        match tensor.dims() {
            [1, n, d] if *n > 0 && *d > 0 => Ok(Self { tensor }),
            dims => Err(InferError::shape("[1, N, D] features", dims)),
        }
    }

    pub fn embed_dim(&self) -> usize {
        self.tensor.dims()[2]
    }

    pub fn dims(&self) -> Vec<usize> {
        self.tensor.dims().to_vec()
    }

    pub fn as_tensor(&self) -> &Tensor {
        &self.tensor
    }
}

enum Encoder {
    Native {
        model: VisionTransformer,
        transform: NativeTransform,
    },
    Hub {
        encoder: HubEncoder,
        processor: HubProcessor,
    },
}

/// Introspection snapshot of a loaded backbone.
#[derive(Debug, Clone, Serialize)]
pub struct BackboneInfo {
    pub backend: Backend,
    pub source: PathBuf,
    pub embed_dim: Option<usize>,
    pub frame_count: usize,
    pub crop_size: usize,
    pub short_side: usize,
    pub load_report: Option<LoadReport>,
}

/// Video encoder behind one `encode` contract, native or hub.
pub struct BackboneEngine {
    encoder: Encoder,
    device: Device,
    frame_count: usize,
    embed_dim: Option<usize>,
    source: PathBuf,
    load_report: Option<LoadReport>,
}

impl std::fmt::Debug for BackboneEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackboneEngine")
            .field("backend", &self.backend())
            .field("source", &self.source)
            .field("frame_count", &self.frame_count)
            .field("embed_dim", &self.embed_dim)
            .finish()
    }
}

impl BackboneEngine {
    /// Load the native encoder when its weights exist, otherwise the hub encoder.
    pub fn load(config: &Config, device: &Device) -> Result<Self> {
        let hub_dir = config.hub_dir();
        let processor = read_processor(&hub_dir)?;
        let crop = processor
            .as_ref()
            .map_or(config.native.img_size, HubProcessor::crop_size);

        let mut native_failure = None;
        if let Some(path) = config.model_path.as_deref() {
            if path.is_file() {
                match Self::load_native(config, path, crop, processor.as_ref(), device) {
                    Ok(engine) => return Ok(engine),
                    Err(err) => {
                        log::warn!("native encoder failed to load, trying hub: {err}");
                        native_failure = Some(err);
                    }
                }
            } else {
                log::info!("native weights {} not found, using hub encoder", path.display());
            }
        }

        match (Self::load_hub(config, &hub_dir, processor, crop, device), native_failure) {
            (Ok(engine), _) => Ok(engine),
            (Err(hub_err), Some(native_err)) => Err(InferError::Configuration(format!(
                "no backbone available (native encoder: {native_err}; hub encoder: {hub_err})"
            ))),
            (Err(hub_err), None) => Err(hub_err),
        }
    }

    fn load_hub(
        config: &Config,
        hub_dir: &Path,
        processor: Option<HubProcessor>,
        crop: usize,
        device: &Device,
    ) -> Result<Self> {
        let processor = match processor {
            Some(processor) => processor,
            None => {
                log::warn!(
                    "{} missing in {}, using ImageNet preprocessing at {crop}px",
                    PROCESSOR_CONFIG_FILE,
                    hub_dir.display()
                );
                HubProcessor::new(HubProcessorConfig::imagenet(crop))?
            }
        };
        let encoder = HubEncoder::load(hub_dir, config.cuda_ordinal()?)?;
        log::info!("backbone backend: hub ({})", encoder.model_path().display());
        Ok(Self {
            embed_dim: encoder.hidden_size(),
            source: encoder.model_path().to_path_buf(),
            encoder: Encoder::Hub { encoder, processor },
            device: device.clone(),
            frame_count: config.frame_count,
            load_report: None,
        })
    }

    fn load_native(
        config: &Config,
        path: &Path,
        crop: usize,
        processor: Option<&HubProcessor>,
        device: &Device,
    ) -> Result<Self> {
        let vit = VitConfig {
            num_frames: config.frame_count,
            img_size: crop,
            ..config.native.clone()
        };
        vit.validate()?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = VisionTransformer::load(vb, &vit)?;
        let report = load_checkpoint(
            &varmap,
            path,
            Some(ENCODER_SECTION),
            config.max_unexpected_keys,
            device,
        )?;

        let transform = NativeTransform::new(crop, device.clone());
        if let Some(processor) = processor.filter(|p| p.short_side() != transform.short_side()) {
            log::warn!(
                "hub processor resizes to {} but native transform uses {} (crop {crop})",
                processor.short_side(),
                short_side_for(crop)
            );
        }
        let hub_model = config.hub_dir().join(MODEL_FILE);
        if hub_model.is_file() {
            log::info!("hub encoder {} available but not used", hub_model.display());
        }
        log::info!("backbone backend: native ({})", path.display());
        let mut engine = Self::native(model, transform, device.clone())?;
        engine.source = path.to_path_buf();
        engine.load_report = Some(report);
        Ok(engine)
    }

    /// Wrap an already built native encoder.
    pub fn native(model: VisionTransformer, transform: NativeTransform, device: Device) -> Result<Self> {
        let vit = model.config();
        if transform.target_size() != vit.img_size {
            return Err(InferError::Configuration(format!(
                "transform crops to {} but the encoder expects {}",
                transform.target_size(),
                vit.img_size
            )));
        }
        let (frame_count, embed_dim) = (vit.num_frames, Some(vit.embed_dim));
        Ok(Self {
            encoder: Encoder::Native { model, transform },
            device,
            frame_count,
            embed_dim,
            source: PathBuf::new(),
            load_report: None,
        })
    }

    pub fn backend(&self) -> Backend {
        match self.encoder {
            Encoder::Native { .. } => Backend::Native,
            Encoder::Hub { .. } => Backend::Hub,
        }
    }

    /// Feature width, when known before the first forward pass.
    pub fn embed_dim(&self) -> Option<usize> {
        self.embed_dim
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn crop_size(&self) -> usize {
        match &self.encoder {
            Encoder::Native { transform, .. } => transform.target_size(),
            Encoder::Hub { processor, .. } => processor.crop_size(),
        }
    }

    pub fn short_side(&self) -> usize {
        match &self.encoder {
            Encoder::Native { transform, .. } => transform.short_side(),
            Encoder::Hub { processor, .. } => processor.short_side(),
        }
    }

    /// Normalise `video` with the transform that matches the chosen backend.
    pub fn prepare(&self, video: &VideoTensor) -> Result<NormalizedTensor> {
        match &self.encoder {
            Encoder::Native { transform, .. } => transform.apply(video),
            Encoder::Hub { processor, .. } => processor.apply(video),
        }
    }

    pub fn encode(&self, clip: &NormalizedTensor) -> Result<FeatureTensor> {
        let (frames, height, width) = clip.clip_dims()?;
        let crop = self.crop_size();
        if frames != self.frame_count || height != crop || width != crop {
            return Err(InferError::shape(
                format!("{} frames at {crop}x{crop}", self.frame_count),
                clip.dims(),
            ));
        }

        let output = match (&self.encoder, clip) {
            (Encoder::Native { model, .. }, NormalizedTensor::Native(tensor)) => model
                .forward(tensor)
                .map_err(|e| InferError::Inference(format!("native encoder failed: {e}")))?,
            (Encoder::Hub { encoder, .. }, NormalizedTensor::Hub(pixels)) => {
                encoder.encode(pixels, &self.device)?
            }
            (_, other) => {
                return Err(InferError::Shape {
                    expected: format!("{} clip", self.backend().as_str()),
                    got: format!("{} clip {:?}", other.variant(), other.dims()),
                });
            }
        };

        let features = FeatureTensor::new(output)?;
        if let Some(expected) = self.embed_dim.filter(|&d| d != features.embed_dim()) {
            return Err(InferError::shape(
                format!("embedding dimension {expected}"),
                features.dims(),
            ));
        }
        Ok(features)
    }

    pub fn info(&self) -> BackboneInfo {
        BackboneInfo {
            backend: self.backend(),
            source: self.source.clone(),
            embed_dim: self.embed_dim,
            frame_count: self.frame_count,
            crop_size: self.crop_size(),
            short_side: self.short_side(),
            load_report: self.load_report.clone(),
        }
    }
}

fn read_processor(hub_dir: &Path) -> Result<Option<HubProcessor>> {
    let path = hub_dir.join(PROCESSOR_CONFIG_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    HubProcessor::from_file(&path).map(Some)
}
