use {
    crate::{
        backbone::{Backend, BackboneInfo},
        classifier::{Classification, ClassifierInfo, PredictionItem},
        config::Config,
        error::{Fault, InferError},
    },
    serde::Serialize,
};

pub const INTENTION_TYPE: &str = "visual_action";

/// Outcome of one `analyze` call, shaped for a JSON response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub predicted_action: String,
    pub confidence: f32,
    pub has_intention: bool,
    pub intention_type: String,
    pub description: String,
    pub top_predictions: Vec<PredictionItem>,
    pub backend: Option<Backend>,
    pub features_shape: Vec<usize>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
}

impl AnalysisResult {
    pub fn from_classification(
        classification: Classification,
        backend: Backend,
        features_shape: Vec<usize>,
    ) -> Self {
        let (action, confidence) = classification
            .top()
            .map_or((String::new(), 0.0), |top| (top.action.clone(), top.confidence));
        Self {
            description: format!("V-JEPA 2 predicted action: {action}"),
            predicted_action: action,
            confidence,
            has_intention: classification.has_intention,
            intention_type: INTENTION_TYPE.to_string(),
            top_predictions: classification.predictions,
            backend: Some(backend),
            features_shape,
            success: true,
            error: None,
            fault: None,
        }
    }

    /// A `success = false` result carrying the error text and its fault class.
    pub fn failure(err: &InferError) -> Self {
        Self {
            predicted_action: String::new(),
            confidence: 0.0,
            has_intention: false,
            intention_type: INTENTION_TYPE.to_string(),
            description: String::new(),
            top_predictions: Vec::new(),
            backend: None,
            features_shape: Vec::new(),
            success: false,
            error: Some(err.to_string()),
            fault: Some(err.fault()),
        }
    }
}

/// Engine lifecycle as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Unloaded => "unloaded",
            EngineState::Loading => "loading",
            EngineState::Ready => "ready",
            EngineState::Failed(_) => "failed",
        }
    }
}

/// One engine's slot in [`ModelInfo`].
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo<T> {
    pub state: &'static str,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<T>,
}

impl<T> EngineInfo<T> {
    pub fn new(state: &EngineState, details: Option<T>) -> Self {
        Self {
            state: state.as_str(),
            loaded: *state == EngineState::Ready,
            error: match state {
                EngineState::Failed(reason) => Some(reason.clone()),
                _ => None,
            },
            details,
        }
    }
}

/// Snapshot returned by `describe_models`.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub device: String,
    pub frame_count: usize,
    pub top_k: usize,
    pub backbone: EngineInfo<BackboneInfo>,
    pub classifier: EngineInfo<ClassifierInfo>,
    pub config: Config,
}
