use {
    crate::error::{InferError, Result},
    candle_core::{Device, Tensor},
    ndarray::Array5,
    ort::{inputs, session::Session as OrtSession, value::TensorRef},
    serde::Deserialize,
    std::{
        path::{Path, PathBuf},
        sync::{Mutex, OnceLock},
    },
};

pub const MODEL_FILE: &str = "model.onnx";
pub const MODEL_CONFIG_FILE: &str = "config.json";
pub const PROCESSOR_CONFIG_FILE: &str = "preprocessor_config.json";

const PIXEL_INPUT: &str = "pixel_values_videos";
const HIDDEN_OUTPUT: &str = "last_hidden_state";

static ORT_INIT: OnceLock<()> = OnceLock::new();

fn ensure_ort_init() {
    ORT_INIT.get_or_init(|| {
        let _ = ort::init().commit();
    });
}

#[derive(Debug, Deserialize)]
struct HubModelConfig {
    hidden_size: Option<usize>,
}

/// Pretrained video encoder exported from the model hub, run through ONNX Runtime.
///
/// Expects `[1, T, C, S, S]` pixels and yields `[1, N, D]` token features.
pub struct HubEncoder {
    session: Mutex<OrtSession>,
    input_name: String,
    output_name: String,
    hidden_size: Option<usize>,
    model_path: PathBuf,
}

impl std::fmt::Debug for HubEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubEncoder")
            .field("model_path", &self.model_path)
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("hidden_size", &self.hidden_size)
            .finish()
    }
}

impl HubEncoder {
    /// Open `<dir>/model.onnx`; `cuda` selects the CUDA execution provider.
    pub fn load(dir: &Path, cuda: Option<usize>) -> Result<Self> {
        let model_path = dir.join(MODEL_FILE);
        if !model_path.is_file() {
            return Err(InferError::Configuration(format!(
                "hub model not found at {}",
                model_path.display()
            )));
        }
        ensure_ort_init();
        let session = open_session(&model_path, cuda)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|input| input.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|output| output.name().to_string())
            .collect();
        let input_name = pick(&input_names, PIXEL_INPUT)
            .ok_or_else(|| InferError::Configuration("hub model declares no inputs".to_string()))?;
        let output_name = pick(&output_names, HIDDEN_OUTPUT)
            .ok_or_else(|| InferError::Configuration("hub model declares no outputs".to_string()))?;

        let hidden_size = read_hidden_size(&dir.join(MODEL_CONFIG_FILE))?;
        log::info!(
            "hub encoder {} ready (input {input_name}, output {output_name}, hidden size {hidden_size:?})",
            model_path.display()
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            hidden_size,
            model_path,
        })
    }

    /// Feature width from `config.json`, when the export ships one.
    pub fn hidden_size(&self) -> Option<usize> {
        self.hidden_size
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn encode(&self, pixels: &Array5<f32>, device: &Device) -> Result<Tensor> {
        let input = TensorRef::from_array_view(pixels.view())
            .map_err(|e| InferError::Inference(format!("cannot wrap hub input: {e}")))?;
        // ort sessions need exclusive access to run
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferError::Inference("hub session lock poisoned".to_string()))?;
        let outputs = session
            .run(inputs![self.input_name.as_str() => input])
            .map_err(|e| InferError::Inference(format!("hub encoder failed: {e}")))?;
        let features = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| {
                InferError::Inference(format!("output '{}' is not f32: {e}", self.output_name))
            })?;
        let dims = features.shape().to_vec();
        let data: Vec<f32> = features.iter().copied().collect();
        Ok(Tensor::from_vec(data, dims, device)?)
    }
}

fn open_session(path: &Path, cuda: Option<usize>) -> Result<OrtSession> {
    let builder = OrtSession::builder()
        .map_err(|e| InferError::Onnx(format!("failed to create session builder: {e}")))?;
    let builder = match cuda {
        None => builder
            .with_execution_providers([
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| InferError::Onnx(format!("cpu execution provider: {e}")))?,
        #[cfg(feature = "cuda")]
        Some(ordinal) => builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(ordinal as i32)
                    .build(),
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| InferError::Onnx(format!("cuda:{ordinal} execution provider: {e}")))?,
        #[cfg(not(feature = "cuda"))]
        Some(ordinal) => {
            return Err(InferError::Configuration(format!(
                "cuda:{ordinal} requested but the cuda feature is not enabled"
            )));
        }
    };
    builder
        .commit_from_file(path)
        .map_err(|e| InferError::Onnx(format!("failed to load {}: {e}", path.display())))
}

fn pick(names: &[String], preferred: &str) -> Option<String> {
    names
        .iter()
        .find(|name| name.as_str() == preferred)
        .or_else(|| names.first())
        .cloned()
}

fn read_hidden_size(path: &Path) -> Result<Option<usize>> {
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)?;
    let config: HubModelConfig = serde_json::from_str(&text)?;
    Ok(config.hidden_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("intent_hub_{name}_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_model_is_configuration_error() {
        let dir = temp_dir("missing");
        assert!(matches!(
            HubEncoder::load(&dir, None),
            Err(InferError::Configuration(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_pick_prefers_named_port() {
        let names = vec!["attention_mask".to_string(), PIXEL_INPUT.to_string()];
        assert_eq!(pick(&names, PIXEL_INPUT).unwrap(), PIXEL_INPUT);
        assert_eq!(pick(&names, "other").unwrap(), "attention_mask");
        assert!(pick(&[], PIXEL_INPUT).is_none());
    }

    #[test]
    fn test_hidden_size_from_config() {
        let dir = temp_dir("config");
        let path = dir.join(MODEL_CONFIG_FILE);
        std::fs::write(&path, r#"{"hidden_size": 1408, "model_type": "vjepa2"}"#).unwrap();
        assert_eq!(read_hidden_size(&path).unwrap(), Some(1408));
        assert_eq!(read_hidden_size(&dir.join("absent.json")).unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }
}
