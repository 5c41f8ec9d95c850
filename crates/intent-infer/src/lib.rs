//! Visual-intention inference: a still image is replicated into a clip,
//! encoded by a video transformer and classified by an attentive probe.
//!
//! [`ModelRegistry`] owns both engines and exposes the two operations
//! collaborators use, [`ModelRegistry::analyze`] and
//! [`ModelRegistry::describe_models`].

pub mod backbone;
pub mod classifier;
pub mod config;
pub mod error;
pub mod hub;
pub mod labels;
pub mod model;
pub mod registry;
pub mod result;
pub mod transform;
pub mod video;
pub mod weights;

pub use {
    backbone::{Backend, BackboneEngine, BackboneInfo, FeatureTensor},
    classifier::{
        Classification, ClassifierEngine, ClassifierInfo, INTENTION_THRESHOLD, PredictionItem,
        has_intention, rank_logits,
    },
    config::{Config, VitConfig},
    error::{Fault, InferError, Result},
    labels::{LabelMap, LabelSource},
    registry::{EngineLoader, FileLoader, ImageInput, ModelRegistry},
    result::{AnalysisResult, EngineInfo, EngineState, ModelInfo},
    transform::{HubProcessor, HubProcessorConfig, NativeTransform, NormalizedTensor},
    video::{VideoTensor, synthesize},
    weights::LoadReport,
};
