//! Process-wide holder of the two engines and their lifecycle.
//!
//! Both slots move `Unloaded -> Loading -> Ready | Failed`. The lock is only
//! held while a slot changes state or while request handlers clone the ready
//! engines out, never across a load or a forward pass.

use {
    crate::{
        backbone::BackboneEngine,
        classifier::ClassifierEngine,
        config::Config,
        error::{InferError, Result},
        result::{AnalysisResult, EngineInfo, EngineState, ModelInfo},
        video::synthesize,
    },
    candle_core::Device,
    intent_image::ImageBuffer,
    std::{
        sync::{Arc, Mutex, MutexGuard, PoisonError},
        time::Instant,
    },
};

pub const BACKBONE: &str = "backbone engine";
pub const CLASSIFIER: &str = "classifier engine";
/// Load attempts cover both engines at once.
pub const REGISTRY: &str = "model registry";

/// An encoded image as handed over by a collaborator.
#[derive(Debug, Clone, Copy)]
pub enum ImageInput<'a> {
    Bytes(&'a [u8]),
    /// Base64 text, optionally behind a `data:` URI prefix.
    Base64(&'a str),
}

impl ImageInput<'_> {
    fn decode(self) -> Result<ImageBuffer> {
        let image = match self {
            ImageInput::Bytes(bytes) => intent_image::decode_image(bytes)?,
            ImageInput::Base64(text) => intent_image::decode_base64(text)?,
        };
        Ok(image)
    }
}

/// How the registry builds its engines.
pub trait EngineLoader: Send + Sync {
    fn load_backbone(&self, config: &Config, device: &Device) -> Result<BackboneEngine>;

    fn load_classifier(
        &self,
        config: &Config,
        backbone_embed_dim: Option<usize>,
        device: &Device,
    ) -> Result<ClassifierEngine>;
}

/// Loads both engines from the paths in [`Config`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl EngineLoader for FileLoader {
    fn load_backbone(&self, config: &Config, device: &Device) -> Result<BackboneEngine> {
        BackboneEngine::load(config, device)
    }

    fn load_classifier(
        &self,
        config: &Config,
        backbone_embed_dim: Option<usize>,
        device: &Device,
    ) -> Result<ClassifierEngine> {
        ClassifierEngine::load(config, backbone_embed_dim, device)
    }
}

enum Slot<E> {
    Unloaded,
    Loading,
    Ready(Arc<E>),
    Failed(String),
}

impl<E> Slot<E> {
    fn state(&self) -> EngineState {
        match self {
            Slot::Unloaded => EngineState::Unloaded,
            Slot::Loading => EngineState::Loading,
            Slot::Ready(_) => EngineState::Ready,
            Slot::Failed(reason) => EngineState::Failed(reason.clone()),
        }
    }

    fn ready(&self) -> Option<Arc<E>> {
        match self {
            Slot::Ready(engine) => Some(Arc::clone(engine)),
            _ => None,
        }
    }

    fn is_loading(&self) -> bool {
        matches!(self, Slot::Loading)
    }

    fn settle(result: &Result<Arc<E>>, name: &str) -> Self {
        match result {
            Ok(engine) => Slot::Ready(Arc::clone(engine)),
            Err(err) => {
                log::error!("{name} failed to load: {err}");
                Slot::Failed(err.to_string())
            }
        }
    }
}

struct Slots {
    backbone: Slot<BackboneEngine>,
    classifier: Slot<ClassifierEngine>,
}

pub struct ModelRegistry {
    config: Config,
    loader: Box<dyn EngineLoader>,
    slots: Mutex<Slots>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots();
        f.debug_struct("ModelRegistry")
            .field("model_name", &self.config.model_name)
            .field("backbone", &slots.backbone.state())
            .field("classifier", &slots.classifier.state())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new(config: Config) -> Self {
        Self::with_loader(config, FileLoader)
    }

    pub fn with_loader(config: Config, loader: impl EngineLoader + 'static) -> Self {
        Self {
            config,
            loader: Box::new(loader),
            slots: Mutex::new(Slots {
                backbone: Slot::Unloaded,
                classifier: Slot::Unloaded,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Nothing panics while holding the lock, so a poisoned guard is still consistent.
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backbone_state(&self) -> EngineState {
        self.slots().backbone.state()
    }

    pub fn classifier_state(&self) -> EngineState {
        self.slots().classifier.state()
    }

    pub fn is_ready(&self) -> bool {
        let slots = self.slots();
        slots.backbone.ready().is_some() && slots.classifier.ready().is_some()
    }

    /// The one load attempt of this registry's lifetime.
    ///
    /// Later calls do not load again; they report the settled outcome. A
    /// call while loading fails with `AlreadyLoading`.
    pub fn load(&self) -> Result<()> {
        {
            let mut slots = self.slots();
            if slots.backbone.is_loading() || slots.classifier.is_loading() {
                return Err(InferError::AlreadyLoading(REGISTRY.to_string()));
            }
            if !matches!(
                (&slots.backbone, &slots.classifier),
                (Slot::Unloaded, Slot::Unloaded)
            ) {
                return Self::outcome(&slots);
            }
            slots.backbone = Slot::Loading;
            slots.classifier = Slot::Loading;
        }
        self.run_load(None)
    }

    /// Retry whichever engines are not ready. A ready backbone is kept.
    pub fn reload(&self) -> Result<()> {
        let backbone = {
            let mut slots = self.slots();
            if slots.backbone.is_loading() || slots.classifier.is_loading() {
                return Err(InferError::AlreadyLoading(REGISTRY.to_string()));
            }
            let backbone = slots.backbone.ready();
            if backbone.is_some() && slots.classifier.ready().is_some() {
                return Ok(());
            }
            if backbone.is_none() {
                slots.backbone = Slot::Loading;
            }
            slots.classifier = Slot::Loading;
            backbone
        };
        self.run_load(backbone)
    }

    fn run_load(&self, backbone: Option<Arc<BackboneEngine>>) -> Result<()> {
        let started = Instant::now();
        log::info!("loading engines for {}", self.config.model_name);

        let device = self
            .config
            .validate()
            .and_then(|_| self.config.candle_device());
        let (backbone, classifier) = match device {
            Ok(device) => {
                let backbone = match backbone {
                    Some(engine) => Ok(engine),
                    None => self
                        .loader
                        .load_backbone(&self.config, &device)
                        .map(Arc::new),
                };
                let classifier = match &backbone {
                    Ok(engine) => self
                        .loader
                        .load_classifier(&self.config, engine.embed_dim(), &device)
                        .map(Arc::new),
                    Err(_) => Err(InferError::NotReady(BACKBONE.to_string())),
                };
                (backbone, classifier)
            }
            Err(err) => {
                let reason = err.to_string();
                (Err(err), Err(InferError::Configuration(reason)))
            }
        };

        {
            let mut slots = self.slots();
            slots.backbone = Slot::settle(&backbone, BACKBONE);
            slots.classifier = Slot::settle(&classifier, CLASSIFIER);
        }

        let backbone = backbone?;
        classifier?;
        log::info!(
            "engines ready in {:.1?} (backend {})",
            started.elapsed(),
            backbone.backend().as_str()
        );
        Ok(())
    }

    fn outcome(slots: &Slots) -> Result<()> {
        if let Slot::Failed(reason) = &slots.backbone {
            return Err(InferError::NotReady(format!("{BACKBONE} ({reason})")));
        }
        if let Slot::Failed(reason) = &slots.classifier {
            return Err(InferError::NotReady(format!("{CLASSIFIER} ({reason})")));
        }
        Ok(())
    }

    fn engines(&self) -> Result<(Arc<BackboneEngine>, Arc<ClassifierEngine>)> {
        let slots = self.slots();
        let backbone = slots
            .backbone
            .ready()
            .ok_or_else(|| InferError::NotReady(BACKBONE.to_string()))?;
        let classifier = slots
            .classifier
            .ready()
            .ok_or(InferError::ClassifierNotReady)?;
        Ok((backbone, classifier))
    }

    /// Decode, encode and classify one image with the configured `top_k`.
    pub fn analyze(&self, input: ImageInput<'_>) -> Result<AnalysisResult> {
        self.analyze_top_k(input, self.config.top_k)
    }

    pub fn analyze_top_k(&self, input: ImageInput<'_>, top_k: usize) -> Result<AnalysisResult> {
        let (backbone, classifier) = self.engines()?;
        if top_k == 0 || top_k > classifier.num_classes() {
            return Err(InferError::InvalidTopK {
                top_k,
                num_classes: classifier.num_classes(),
            });
        }

        let started = Instant::now();
        let image = input.decode()?;
        let video = synthesize(&image, backbone.frame_count())?;
        let clip = backbone.prepare(&video)?;
        let prepared = started.elapsed();
        let features = backbone.encode(&clip)?;
        let encoded = started.elapsed();
        let classification = classifier.classify(&features, top_k)?;

        let result =
            AnalysisResult::from_classification(classification, backbone.backend(), features.dims());
        log::info!(
            "{}x{} image: '{}' ({:.3}) via {} in {:.1?} (prepare {:.1?}, encode {:.1?})",
            image.width(),
            image.height(),
            result.predicted_action,
            result.confidence,
            backbone.backend().as_str(),
            started.elapsed(),
            prepared,
            encoded - prepared
        );
        Ok(result)
    }

    pub fn describe_models(&self) -> ModelInfo {
        let (backbone_state, classifier_state, backbone, classifier) = {
            let slots = self.slots();
            (
                slots.backbone.state(),
                slots.classifier.state(),
                slots.backbone.ready(),
                slots.classifier.ready(),
            )
        };
        ModelInfo {
            model_name: self.config.model_name.clone(),
            device: self.config.device.clone(),
            frame_count: self.config.frame_count,
            top_k: self.config.top_k,
            backbone: EngineInfo::new(&backbone_state, backbone.map(|b| b.info())),
            classifier: EngineInfo::new(&classifier_state, classifier.map(|c| c.info())),
            config: self.config.clone(),
        }
    }
}
