//! Reconciling checkpoint tensors with the parameters a model declares.
//!
//! Checkpoints come from training code that wraps modules in DDP
//! (`module.`) and in backbone holders (`backbone.`), and frequently bundle
//! several models under a section prefix such as `encoder.`. Keys are
//! normalised before they are matched against the model's [`VarMap`].

use {
    crate::error::{InferError, Result},
    candle_core::{Device, Tensor, safetensors::Load},
    candle_nn::VarMap,
    memmap2::Mmap,
    safetensors::SafeTensors,
    serde::Serialize,
    std::{collections::HashMap, fs::File, path::Path},
};

const WRAPPER_PREFIXES: [&str; 2] = ["module.", "backbone."];

/// Outcome of loading a checkpoint into a model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Parameters that received checkpoint values.
    pub matched: usize,
    /// Model parameters with no checkpoint entry; they keep their initial values.
    pub missing: Vec<String>,
    /// Checkpoint entries the model does not declare, or whose shape differs.
    pub unexpected: Vec<String>,
}

/// Strip the section prefix (when given) and every wrapper prefix.
pub fn remap_key(key: &str, section: Option<&str>) -> String {
    let key = section
        .and_then(|prefix| key.strip_prefix(prefix))
        .unwrap_or(key);
    WRAPPER_PREFIXES
        .iter()
        .fold(key.to_string(), |k, prefix| k.replace(prefix, ""))
}

/// Read every tensor in a safetensors file onto `device`.
pub fn read_safetensors(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let file = File::open(path).map_err(|e| {
        InferError::Configuration(format!("cannot open {}: {e}", path.display()))
    })?;
    // SAFETY: the mapping is read-only and dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file)? };
    let tensors = SafeTensors::deserialize(&mmap)?;
    tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| -> Result<(String, Tensor)> { Ok((name, view.load(device)?)) })
        .collect()
}

/// Copy matching checkpoint tensors into `varmap` and report what was left over.
///
/// `section` is only applied when at least one key carries it, so both
/// bundled and bare checkpoints load. Fails with a configuration error when
/// more than `max_unexpected` entries cannot be placed.
pub fn load_into_varmap(
    varmap: &VarMap,
    checkpoint: HashMap<String, Tensor>,
    section: Option<&str>,
    max_unexpected: usize,
) -> Result<LoadReport> {
    let section = section.filter(|prefix| checkpoint.keys().any(|k| k.starts_with(prefix)));
    let mut remapped = HashMap::with_capacity(checkpoint.len());
    let mut unexpected = Vec::new();
    for (key, tensor) in checkpoint {
        // entries outside the section belong to another bundled model
        if section.is_some_and(|prefix| !key.starts_with(prefix)) {
            continue;
        }
        let name = remap_key(&key, section);
        if remapped.insert(name, tensor).is_some() {
            unexpected.push(key);
        }
    }

    let vars = varmap
        .data()
        .lock()
        .map_err(|_| InferError::Inference("parameter map lock poisoned".to_string()))?;
    let mut report = LoadReport::default();
    let mut updates = Vec::new();
    for (name, var) in vars.iter() {
        match remapped.remove(name) {
            Some(tensor) if tensor.dims() == var.dims() => updates.push((var, tensor)),
            Some(tensor) => {
                log::debug!(
                    "checkpoint {name} has shape {:?}, model expects {:?}",
                    tensor.dims(),
                    var.dims()
                );
                report.missing.push(name.clone());
                unexpected.push(name.clone());
            }
            None => report.missing.push(name.clone()),
        }
    }
    unexpected.extend(remapped.into_keys());
    unexpected.sort();
    report.missing.sort();
    report.unexpected = unexpected;

    if report.unexpected.len() > max_unexpected {
        return Err(InferError::Configuration(format!(
            "{} checkpoint entries do not fit the model (limit {max_unexpected}), first: {:?}",
            report.unexpected.len(),
            &report.unexpected[..report.unexpected.len().min(5)]
        )));
    }

    report.matched = updates.len();
    for (var, tensor) in updates {
        var.set(&tensor.to_dtype(var.dtype())?)?;
    }
    Ok(report)
}

/// Load `path` into `varmap` and log the outcome.
pub fn load_checkpoint(
    varmap: &VarMap,
    path: &Path,
    section: Option<&str>,
    max_unexpected: usize,
    device: &Device,
) -> Result<LoadReport> {
    let checkpoint = read_safetensors(path, device)?;
    let report = load_into_varmap(varmap, checkpoint, section, max_unexpected)?;
    log::info!(
        "{}: {} tensors loaded, {} missing, {} unexpected",
        path.display(),
        report.matched,
        report.missing.len(),
        report.unexpected.len()
    );
    if !report.missing.is_empty() {
        log::warn!("{}: parameters left at initial values: {:?}", path.display(), report.missing);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{VarBuilder, linear};

    #[test]
    fn test_remap_key() {
        assert_eq!(remap_key("module.backbone.blocks.0.norm1.weight", None), "blocks.0.norm1.weight");
        assert_eq!(
            remap_key("encoder.module.patch_embed.proj.bias", Some("encoder.")),
            "patch_embed.proj.bias"
        );
        assert_eq!(remap_key("norm.weight", Some("encoder.")), "norm.weight");
    }

    fn model(varmap: &VarMap) {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        linear(2, 3, vb.pp("head")).unwrap();
    }

    #[test]
    fn test_section_prefix_selects_one_model() {
        let varmap = VarMap::new();
        model(&varmap);
        let device = Device::Cpu;
        let checkpoint = HashMap::from([
            ("classifiers.0.module.head.weight".to_string(), Tensor::ones((3, 2), DType::F32, &device).unwrap()),
            ("classifiers.0.module.head.bias".to_string(), Tensor::ones(3, DType::F32, &device).unwrap()),
            ("classifiers.1.module.head.bias".to_string(), Tensor::zeros(3, DType::F32, &device).unwrap()),
        ]);
        let report = load_into_varmap(&varmap, checkpoint, Some("classifiers.0."), 0).unwrap();
        assert_eq!(report.matched, 2);
        assert!(report.missing.is_empty());
        assert!(report.unexpected.is_empty());

        let data = varmap.data().lock().unwrap();
        assert_eq!(data["head.bias"].as_tensor().to_vec1::<f32>().unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn test_shape_mismatch_is_unexpected() {
        let varmap = VarMap::new();
        model(&varmap);
        let device = Device::Cpu;
        let checkpoint = HashMap::from([(
            "head.bias".to_string(),
            Tensor::ones(4, DType::F32, &device).unwrap(),
        )]);
        let report = load_into_varmap(&varmap, checkpoint, None, 1).unwrap();
        assert_eq!(report.matched, 0);
        assert_eq!(report.unexpected, vec!["head.bias".to_string()]);
        assert_eq!(report.missing, vec!["head.bias".to_string(), "head.weight".to_string()]);
    }

    #[test]
    fn test_too_many_unexpected_keys_fail() {
        let varmap = VarMap::new();
        model(&varmap);
        let device = Device::Cpu;
        let checkpoint = (0..3)
            .map(|i| (format!("stray.{i}"), Tensor::zeros(1, DType::F32, &device).unwrap()))
            .collect();
        assert!(matches!(
            load_into_varmap(&varmap, checkpoint, None, 2),
            Err(InferError::Configuration(_))
        ));
    }
}
