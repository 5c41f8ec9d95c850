//! Candle implementations of the video encoder and the attentive classifier.

mod layers;
mod pooler;
mod rope;
mod vit;

pub use {
    pooler::{AttentiveClassifier, ClassifierConfig},
    vit::VisionTransformer,
};
