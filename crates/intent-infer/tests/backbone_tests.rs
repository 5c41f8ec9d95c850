mod common;

use {
    candle_core::{DType, Device, Tensor},
    candle_nn::{VarBuilder, VarMap},
    intent_infer::{
        Backend, BackboneEngine, Config, Fault, FeatureTensor, InferError, NativeTransform,
        NormalizedTensor, synthesize, model::VisionTransformer,
    },
    ndarray::Array5,
};

fn tiny_engine() -> BackboneEngine {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = VisionTransformer::load(vb, &common::tiny_vit(4, 32)).unwrap();
    BackboneEngine::native(model, NativeTransform::new(32, Device::Cpu), Device::Cpu).unwrap()
}

fn native_clip(frames: usize, size: usize) -> NormalizedTensor {
    NormalizedTensor::Native(
        Tensor::zeros((1, 3, frames, size, size), DType::F32, &Device::Cpu).unwrap(),
    )
}

fn assert_shape_error(result: intent_infer::Result<FeatureTensor>) {
    match result {
        Err(err @ InferError::Shape { .. }) => assert_eq!(err.fault(), Fault::Internal),
        other => panic!("expected a shape error, got {other:?}"),
    }
}

/// Tiny native settings with weights at `model_path` and an empty hub directory.
fn file_config(name: &str, model_path: Option<std::path::PathBuf>) -> Config {
    Config {
        hub_dir: Some(common::temp_dir(&format!("{name}_hub"))),
        model_path,
        max_unexpected_keys: 0,
        ..common::tiny_config()
    }
}

#[test]
fn test_encode_prepared_clip() {
    let engine = tiny_engine();
    let image = intent_image::solid_color(48, 40, [0, 128, 255]).unwrap();
    let clip = engine.prepare(&synthesize(&image, 4).unwrap()).unwrap();
    let features = engine.encode(&clip).unwrap();
    assert_eq!(features.dims(), vec![1, 8, 16]);
    assert_eq!(features.embed_dim(), 16);
}

#[test]
fn test_wrong_frame_count_is_shape_error() {
    assert_shape_error(tiny_engine().encode(&native_clip(2, 32)));
}

#[test]
fn test_wrong_resolution_is_shape_error() {
    assert_shape_error(tiny_engine().encode(&native_clip(4, 16)));
}

#[test]
fn test_hub_layout_on_native_engine_is_shape_error() {
    let clip = NormalizedTensor::Hub(Array5::zeros((1, 4, 3, 32, 32)));
    let err = tiny_engine().encode(&clip).unwrap_err();
    assert!(err.to_string().contains("hub clip"));
    assert_shape_error(Err(err));
}

#[test]
fn test_features_must_be_single_clip() {
    let batched = Tensor::zeros((2, 8, 16), DType::F32, &Device::Cpu).unwrap();
    assert_shape_error(FeatureTensor::new(batched));
    let flat = Tensor::zeros((8, 16), DType::F32, &Device::Cpu).unwrap();
    assert_shape_error(FeatureTensor::new(flat));
}

#[test]
fn test_transform_must_match_encoder_resolution() {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = VisionTransformer::load(vb, &common::tiny_vit(4, 32)).unwrap();
    assert!(matches!(
        BackboneEngine::native(model, NativeTransform::new(64, Device::Cpu), Device::Cpu),
        Err(InferError::Configuration(_))
    ));
}

#[test]
fn test_native_selected_when_weights_load() {
    let path = common::temp_dir("backbone_native").join("encoder.safetensors");
    let matched = common::save_native_weights(&common::tiny_vit(4, 32), &path, "encoder.", &[]);

    let engine = BackboneEngine::load(
        &file_config("backbone_native", Some(path.clone())),
        &Device::Cpu,
    )
    .unwrap();
    assert_eq!(engine.backend(), Backend::Native);
    assert_eq!(engine.embed_dim(), Some(16));
    let info = engine.info();
    assert_eq!(info.source, path);
    assert_eq!(info.load_report.unwrap().matched, matched);
}

#[test]
fn test_processor_crop_overrides_native_resolution() {
    let path = common::temp_dir("backbone_crop").join("encoder.safetensors");
    common::save_native_weights(&common::tiny_vit(4, 32), &path, "", &[]);
    let config = Config {
        native: common::tiny_vit(4, 64),
        ..file_config("backbone_crop", Some(path))
    };
    std::fs::write(
        config.hub_dir().join("preprocessor_config.json"),
        r#"{
            "crop_size": {"height": 32, "width": 32},
            "image_mean": [0.485, 0.456, 0.406],
            "image_std": [0.229, 0.224, 0.225]
        }"#,
    )
    .unwrap();

    let engine = BackboneEngine::load(&config, &Device::Cpu).unwrap();
    assert_eq!(engine.backend(), Backend::Native);
    assert_eq!(engine.crop_size(), 32);
    let image = intent_image::solid_color(64, 64, [9, 9, 9]).unwrap();
    let clip = engine.prepare(&synthesize(&image, 4).unwrap()).unwrap();
    assert_eq!(engine.encode(&clip).unwrap().dims(), vec![1, 8, 16]);
}

#[test]
fn test_no_weights_and_no_hub_export_fails() {
    let absent = common::temp_dir("backbone_absent").join("missing.safetensors");
    for model_path in [None, Some(absent)] {
        let err = BackboneEngine::load(&file_config("backbone_absent", model_path), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, InferError::Configuration(_)));
        assert!(err.to_string().contains("hub model not found"));
    }
}

#[test]
fn test_failed_native_load_keeps_both_causes() {
    let path = common::temp_dir("backbone_unexpected").join("encoder.safetensors");
    common::save_native_weights(
        &common::tiny_vit(4, 32),
        &path,
        "encoder.",
        &["encoder.predictor.weight"],
    );

    let err = BackboneEngine::load(
        &file_config("backbone_unexpected", Some(path)),
        &Device::Cpu,
    )
    .unwrap_err();
    assert!(matches!(err, InferError::Configuration(_)));
    let message = err.to_string();
    assert!(message.contains("native encoder"), "{message}");
    assert!(message.contains("do not fit the model"), "{message}");
    assert!(message.contains("hub model not found"), "{message}");
}
