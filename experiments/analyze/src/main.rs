use intent_base::log;
use intent_infer::{AnalysisResult, Config, ImageInput, ModelRegistry};
use std::env;
use std::path::PathBuf;

/// Overlay the `MODEL_NAME`, `HUB_DIR`, `MODEL_PATH`, `CLASSIFIER_PATH`,
/// `LABELS_PATH`, `DEVICE` and `TOP_K` environment variables on the defaults.
fn config_from_env() -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::default();
    let path = |name: &str| env::var(name).ok().map(PathBuf::from);

    if let Ok(name) = env::var("MODEL_NAME") {
        config.model_name = name;
    }
    if let Some(dir) = path("HUB_DIR") {
        config.hub_dir = Some(dir);
    }
    config.model_path = path("MODEL_PATH").or(config.model_path);
    config.classifier_path = path("CLASSIFIER_PATH").or(config.classifier_path);
    config.labels_path = path("LABELS_PATH").or(config.labels_path);
    if let Ok(device) = env::var("DEVICE") {
        config.device = device;
    }
    if let Ok(top_k) = env::var("TOP_K") {
        config.top_k = top_k.parse()?;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match env::var("LOG_DIR") {
        Ok(dir) => intent_base::init_file_logger(dir, None)?,
        Err(_) => intent_base::init_stdout_logger(None),
    }

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <image> [--describe]", args[0]);
        std::process::exit(1);
    }
    let describe = args.iter().skip(2).any(|a| a == "--describe");

    let registry = ModelRegistry::new(config_from_env()?);
    // a failed load leaves the registry up; analyze then reports not-ready
    if let Err(err) = registry.load() {
        log::error!("running degraded: {err}");
    }

    let bytes = std::fs::read(&args[1])?;
    let result = registry
        .analyze(ImageInput::Bytes(&bytes))
        .unwrap_or_else(|err| {
            log::warn!("{}: {err}", args[1]);
            AnalysisResult::failure(&err)
        });
    println!("{}", serde_json::to_string_pretty(&result)?);

    if describe {
        println!("{}", serde_json::to_string_pretty(&registry.describe_models())?);
    }
    Ok(())
}
