use {
    crate::{
        backbone::FeatureTensor,
        config::Config,
        error::{InferError, Result},
        labels::{LabelMap, LabelSource},
        model::{AttentiveClassifier, ClassifierConfig},
        weights::{LoadReport, load_checkpoint},
    },
    candle_core::{DType, Device},
    candle_nn::{VarBuilder, VarMap},
    serde::Serialize,
    std::{cmp::Ordering, path::PathBuf},
};

/// Top-1 confidence must exceed this for a prediction to count as an intention.
pub const INTENTION_THRESHOLD: f32 = 0.5;

/// Bundled evaluation checkpoints keep the first probe here.
const CLASSIFIER_SECTION: &str = "classifiers.0.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionItem {
    pub action: String,
    pub confidence: f32,
    pub class_id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    /// Best first.
    pub predictions: Vec<PredictionItem>,
    pub has_intention: bool,
}

impl Classification {
    pub fn top(&self) -> Option<&PredictionItem> {
        self.predictions.first()
    }
}

pub fn has_intention(top1_confidence: f32) -> bool {
    top1_confidence > INTENTION_THRESHOLD
}

/// Pick the `top_k` largest logits and turn them into confidences.
///
/// Ordering is by descending logit, ties going to the lower class index.
/// The softmax runs over the selected logits only, so confidences sum to one
/// across the returned items and are not calibrated over the full class set.
pub fn rank_logits(logits: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>> {
    if top_k == 0 || top_k > logits.len() {
        return Err(InferError::InvalidTopK {
            top_k,
            num_classes: logits.len(),
        });
    }
    if let Some(index) = logits.iter().position(|v| !v.is_finite()) {
        return Err(InferError::Inference(format!(
            "logit {index} is not finite ({})",
            logits[index]
        )));
    }

    let mut order: Vec<usize> = (0..logits.len()).collect();
    // stable sort keeps equal logits in index order; -0.0 and 0.0 compare equal
    order.sort_by(|&a, &b| {
        logits[b]
            .partial_cmp(&logits[a])
            .unwrap_or(Ordering::Equal)
    });
    order.truncate(top_k);

    let max = f64::from(logits[order[0]]);
    let exps: Vec<f64> = order
        .iter()
        .map(|&i| (f64::from(logits[i]) - max).exp())
        .collect();
    let total: f64 = exps.iter().sum();
    Ok(order
        .into_iter()
        .zip(exps)
        .map(|(i, e)| (i, (e / total) as f32))
        .collect())
}

/// Introspection snapshot of the classifier.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierInfo {
    pub classifier_path: Option<PathBuf>,
    pub weights_loaded: bool,
    pub embed_dim: usize,
    pub num_classes: usize,
    pub num_heads: usize,
    pub depth: usize,
    pub num_class_names: usize,
    pub labels: LabelSource,
    pub load_report: Option<LoadReport>,
}

/// Attentive probe plus the label map that names its classes.
#[derive(Debug)]
pub struct ClassifierEngine {
    model: AttentiveClassifier,
    labels: LabelMap,
    classifier_path: Option<PathBuf>,
    load_report: Option<LoadReport>,
}

impl ClassifierEngine {
    /// Build the probe for `config`, checking it against the backbone's feature width.
    pub fn load(config: &Config, backbone_embed_dim: Option<usize>, device: &Device) -> Result<Self> {
        if let Some(dim) = backbone_embed_dim.filter(|&d| d != config.embed_dim) {
            return Err(InferError::Configuration(format!(
                "classifier expects {}-dim features but the backbone produces {dim}",
                config.embed_dim
            )));
        }

        let probe = ClassifierConfig {
            embed_dim: config.embed_dim,
            num_heads: config.classifier_heads,
            depth: config.classifier_depth,
            num_classes: config.num_classes,
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = AttentiveClassifier::load(vb, probe)?;

        let (classifier_path, load_report) = match config.classifier_path.as_deref() {
            Some(path) if path.is_file() => {
                let report = load_checkpoint(
                    &varmap,
                    path,
                    Some(CLASSIFIER_SECTION),
                    config.max_unexpected_keys,
                    device,
                )?;
                (Some(path.to_path_buf()), Some(report))
            }
            other => {
                log::warn!(
                    "classifier weights {} not found, using random initialisation",
                    other.map_or("<unset>".into(), |p| p.display().to_string())
                );
                (other.map(|p| p.to_path_buf()), None)
            }
        };

        let labels = LabelMap::load(config.labels_path.as_deref(), config.num_classes)?;
        let mut engine = Self::new(model, labels)?;
        engine.classifier_path = classifier_path;
        engine.load_report = load_report;
        Ok(engine)
    }

    pub fn new(model: AttentiveClassifier, labels: LabelMap) -> Result<Self> {
        let num_classes = model.config().num_classes;
        if labels.len() != num_classes {
            return Err(InferError::Configuration(format!(
                "{} labels for {num_classes} classes",
                labels.len()
            )));
        }
        Ok(Self {
            model,
            labels,
            classifier_path: None,
            load_report: None,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.model.config().num_classes
    }

    pub fn embed_dim(&self) -> usize {
        self.model.config().embed_dim
    }

    pub fn classify(&self, features: &FeatureTensor, top_k: usize) -> Result<Classification> {
        let num_classes = self.num_classes();
        if top_k == 0 || top_k > num_classes {
            return Err(InferError::InvalidTopK { top_k, num_classes });
        }
        if features.embed_dim() != self.embed_dim() {
            return Err(InferError::shape(
                format!("[1, N, {}] features", self.embed_dim()),
                features.dims(),
            ));
        }

        let logits = self
            .model
            .forward(features.as_tensor())
            .and_then(|t| t.squeeze(0)?.to_vec1::<f32>())
            .map_err(|e| InferError::Inference(format!("classifier failed: {e}")))?;

        let predictions: Vec<PredictionItem> = rank_logits(&logits, top_k)?
            .into_iter()
            .map(|(class_id, confidence)| PredictionItem {
                action: self
                    .labels
                    .name(class_id)
                    .map_or_else(|| format!("action_{class_id}"), str::to_string),
                confidence,
                class_id,
            })
            .collect();
        let has_intention = has_intention(predictions[0].confidence);
        Ok(Classification {
            predictions,
            has_intention,
        })
    }

    pub fn info(&self) -> ClassifierInfo {
        let config = self.model.config();
        ClassifierInfo {
            classifier_path: self.classifier_path.clone(),
            weights_loaded: self.load_report.is_some(),
            embed_dim: config.embed_dim,
            num_classes: config.num_classes,
            num_heads: config.num_heads,
            depth: config.depth,
            num_class_names: self.labels.len(),
            labels: self.labels.source().clone(),
            load_report: self.load_report.clone(),
        }
    }
}
