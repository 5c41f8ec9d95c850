#![allow(dead_code)]

use {
    candle_core::{DType, Device},
    candle_nn::{VarBuilder, VarMap},
    intent_infer::{
        BackboneEngine, ClassifierEngine, Config, EngineLoader, NativeTransform, Result,
        VitConfig, model::VisionTransformer,
    },
    std::path::PathBuf,
};

pub fn tiny_vit(num_frames: usize, img_size: usize) -> VitConfig {
    VitConfig {
        img_size,
        num_frames,
        patch_size: 16,
        tubelet_size: 2,
        in_chans: 3,
        embed_dim: 16,
        depth: 1,
        num_heads: 2,
        mlp_ratio: 2.0,
        layer_norm_eps: 1e-6,
    }
}

/// Small engines, no weight or label files.
pub fn tiny_config() -> Config {
    Config {
        hub_dir: Some(temp_dir("no_hub")),
        labels_path: None,
        embed_dim: 16,
        num_classes: 10,
        top_k: 5,
        frame_count: 4,
        classifier_heads: 2,
        classifier_depth: 2,
        native: tiny_vit(4, 32),
        ..Config::default()
    }
}

/// Builds randomly initialised engines straight from `config.native`.
pub struct TinyLoader;

impl EngineLoader for TinyLoader {
    fn load_backbone(&self, config: &Config, device: &Device) -> Result<BackboneEngine> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = VisionTransformer::load(vb, &config.native)?;
        let transform = NativeTransform::new(config.native.img_size, device.clone());
        BackboneEngine::native(model, transform, device.clone())
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

pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("intent_infer_{name}_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn red_png(width: usize, height: usize) -> Vec<u8> {
    let image = intent_image::solid_color(width, height, [255, 0, 0]).unwrap();
    intent_image::encode_png(&image).unwrap()
}

/// Deterministic pseudo-random RGB bytes.
pub fn noise_rgb(width: usize, height: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..width * height * 3)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Save randomly initialised encoder weights for `vit` under `prefix`, plus
/// any `extra` entries.
pub fn save_native_weights(
    vit: &VitConfig,
    path: &std::path::Path,
    prefix: &str,
    extra: &[&str],
) -> usize {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    VisionTransformer::load(vb, vit).unwrap();
    let mut tensors: std::collections::HashMap<String, candle_core::Tensor> = varmap
        .data()
        .lock()
        .unwrap()
        .iter()
        .map(|(name, var)| (format!("{prefix}{name}"), var.as_tensor().clone()))
        .collect();
    let matched = tensors.len();
    for name in extra {
        tensors.insert(
            name.to_string(),
            candle_core::Tensor::zeros(3, DType::F32, &Device::Cpu).unwrap(),
        );
    }
    candle_core::safetensors::save(&tensors, path).unwrap();
    matched
}
