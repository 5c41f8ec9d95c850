use {serde::Serialize, std::fmt};

pub type Result<T> = std::result::Result<T, InferError>;

/// Who has to act on a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    /// The request itself is bad; resubmitting it unchanged will fail again.
    ClientInput,
    /// The engines are not ready yet (or failed to load); retry later.
    Readiness,
    /// A contract violation or backend failure inside the core.
    Internal,
}

#[derive(Debug)]
pub enum InferError {
    Decode(String),
    Configuration(String),
    Shape { expected: String, got: String },
    Inference(String),
    /// `top_k` outside `1..=num_classes`.
    InvalidTopK { top_k: usize, num_classes: usize },
    /// Classification requested before the classifier engine is ready.
    ClassifierNotReady,
    AlreadyLoading(String),
    NotReady(String),
    Io(String),
    Candle(String),
    Onnx(String),
}

impl InferError {
    pub fn fault(&self) -> Fault {
        match self {
            InferError::Decode(_) | InferError::InvalidTopK { .. } => Fault::ClientInput,
            InferError::ClassifierNotReady
            | InferError::AlreadyLoading(_)
            | InferError::NotReady(_) => Fault::Readiness,
            InferError::Configuration(_)
            | InferError::Shape { .. }
            | InferError::Inference(_)
            | InferError::Io(_)
            | InferError::Candle(_)
            | InferError::Onnx(_) => Fault::Internal,
        }
    }

    pub(crate) fn shape(expected: impl fmt::Display, got: impl fmt::Debug) -> Self {
        InferError::Shape {
            expected: expected.to_string(),
            got: format!("{got:?}"),
        }
    }
}

impl fmt::Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferError::Decode(msg) => write!(f, "decode error: {msg}"),
            InferError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            InferError::Shape { expected, got } => {
                write!(f, "shape error: expected {expected}, got {got}")
            }
            InferError::Inference(msg) => write!(f, "inference error: {msg}"),
            InferError::InvalidTopK { top_k, num_classes } => write!(
                f,
                "classification error: top_k {top_k} must be between 1 and {num_classes}"
            ),
            InferError::ClassifierNotReady => {
                write!(f, "classification error: classifier is not ready")
            }
            InferError::AlreadyLoading(engine) => write!(f, "{engine} is already loading"),
            InferError::NotReady(engine) => write!(f, "{engine} is not ready"),
            InferError::Io(msg) => write!(f, "io error: {msg}"),
            InferError::Candle(msg) => write!(f, "candle error: {msg}"),
            InferError::Onnx(msg) => write!(f, "onnx error: {msg}"),
        }
    }
}

impl std::error::Error for InferError {}

impl From<candle_core::Error> for InferError {
    fn from(err: candle_core::Error) -> Self {
        InferError::Candle(err.to_string())
    }
}

impl From<std::io::Error> for InferError {
    fn from(err: std::io::Error) -> Self {
        InferError::Io(err.to_string())
    }
}

impl From<intent_image::ImageError> for InferError {
    fn from(err: intent_image::ImageError) -> Self {
        InferError::Decode(err.to_string())
    }
}

impl From<intent_base::TensorError> for InferError {
    fn from(err: intent_base::TensorError) -> Self {
        InferError::Shape {
            expected: "consistent tensor shape".to_string(),
            got: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for InferError {
    fn from(err: serde_json::Error) -> Self {
        InferError::Configuration(format!("invalid json: {err}"))
    }
}

impl From<safetensors::SafeTensorError> for InferError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        InferError::Configuration(format!("invalid safetensors file: {err}"))
    }
}
