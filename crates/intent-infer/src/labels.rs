use {
    crate::error::{InferError, Result},
    serde::Serialize,
    serde_json::Value,
    std::path::{Path, PathBuf},
};

/// Where the class names came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LabelSource {
    File { path: PathBuf },
    /// No label file; every class is called `action_<index>`.
    Synthetic,
}

/// Class index to action name, validated once at load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
    source: LabelSource,
}

fn synthetic_name(index: usize) -> String {
    format!("action_{index}")
}

impl LabelMap {
    pub fn synthetic(num_classes: usize) -> Self {
        Self {
            names: (0..num_classes).map(synthetic_name).collect(),
            source: LabelSource::Synthetic,
        }
    }

    /// Read `path`; a missing (or unset) file yields synthetic labels.
    pub fn load(path: Option<&Path>, num_classes: usize) -> Result<Self> {
        let Some(path) = path.filter(|p| p.is_file()) else {
            log::warn!(
                "label file {} not found, using synthetic action names",
                path.map_or("<unset>".into(), |p| p.display().to_string())
            );
            return Ok(Self::synthetic(num_classes));
        };
        let text = std::fs::read_to_string(path)?;
        let mut labels = Self::from_json(&text, num_classes)?;
        labels.source = LabelSource::File {
            path: path.to_path_buf(),
        };
        log::info!("loaded {} class names from {}", labels.len(), path.display());
        Ok(labels)
    }

    /// Accepts `["name", ...]`, `{"<index>": "name"}` or the inverted
    /// `{"name": "<index>"}` layout. Indices must lie in `0..num_classes`;
    /// unlisted indices get synthetic names.
    pub fn from_json(text: &str, num_classes: usize) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let pairs: Vec<(usize, String)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| Ok((index, label_text(item)?)))
                .collect::<Result<_>>()?,
            Value::Object(map) if map.keys().all(|k| parse_index(k).is_some()) => map
                .into_iter()
                .map(|(key, item)| Ok((parse_index(&key).unwrap_or_default(), label_text(item)?)))
                .collect::<Result<_>>()?,
            Value::Object(map) => map
                .into_iter()
                .map(|(name, item)| {
                    let index = match &item {
                        Value::String(s) => parse_index(s),
                        Value::Number(n) => n.as_u64().map(|n| n as usize),
                        _ => None,
                    }
                    .ok_or_else(|| {
                        InferError::Configuration(format!("label '{name}' has no class index"))
                    })?;
                    Ok((index, name))
                })
                .collect::<Result<_>>()?,
            _ => {
                return Err(InferError::Configuration(
                    "label file must be a JSON array or object".to_string(),
                ));
            }
        };

        let mut names: Vec<Option<String>> = vec![None; num_classes];
        for (index, name) in pairs {
            let slot = names.get_mut(index).ok_or_else(|| {
                InferError::Configuration(format!(
                    "label index {index} is outside 0..{num_classes}"
                ))
            })?;
            if slot.replace(name).is_some() {
                return Err(InferError::Configuration(format!(
                    "label index {index} is listed twice"
                )));
            }
        }
        let gaps = names.iter().filter(|n| n.is_none()).count();
        if gaps > 0 {
            log::warn!("{gaps} of {num_classes} classes have no label, using synthetic names");
        }
        Ok(Self {
            names: names
                .into_iter()
                .enumerate()
                .map(|(index, name)| name.unwrap_or_else(|| synthetic_name(index)))
                .collect(),
            source: LabelSource::Synthetic,
        })
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn source(&self) -> &LabelSource {
        &self.source
    }
}

fn parse_index(text: &str) -> Option<usize> {
    text.trim().parse().ok()
}

fn label_text(value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(InferError::Configuration(format!(
            "label must be a string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keyed_object_with_gap() {
        let labels = LabelMap::from_json(r#"{"0": "Pushing something", "2": "Lifting something"}"#, 3).unwrap();
        assert_eq!(labels.name(0), Some("Pushing something"));
        assert_eq!(labels.name(1), Some("action_1"));
        assert_eq!(labels.name(2), Some("Lifting something"));
        assert_eq!(labels.name(3), None);
    }

    #[test]
    fn test_name_keyed_object() {
        let labels = LabelMap::from_json(r#"{"Approaching something": "1", "Holding something": 0}"#, 2).unwrap();
        assert_eq!(labels.name(0), Some("Holding something"));
        assert_eq!(labels.name(1), Some("Approaching something"));
    }

    #[test]
    fn test_array() {
        let labels = LabelMap::from_json(r#"["a", "b"]"#, 4).unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.name(1), Some("b"));
        assert_eq!(labels.name(3), Some("action_3"));
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        assert!(matches!(
            LabelMap::from_json(r#"{"5": "x"}"#, 5),
            Err(InferError::Configuration(_))
        ));
        assert!(LabelMap::from_json(r#"["a", "b", "c"]"#, 2).is_err());
        assert!(LabelMap::from_json(r#"{"x": "not an index"}"#, 2).is_err());
        assert!(LabelMap::from_json("42", 2).is_err());
    }

    #[test]
    fn test_missing_file_is_synthetic() {
        let path = std::env::temp_dir().join("intent_labels_missing.json");
        let labels = LabelMap::load(Some(&path), 3).unwrap();
        assert_eq!(labels.source(), &LabelSource::Synthetic);
        assert_eq!(labels.name(2), Some("action_2"));
        assert_eq!(LabelMap::load(None, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_file_source_recorded() {
        let path = std::env::temp_dir().join(format!("intent_labels_{}.json", std::process::id()));
        std::fs::write(&path, r#"["first"]"#).unwrap();
        let labels = LabelMap::load(Some(&path), 2).unwrap();
        assert_eq!(labels.source(), &LabelSource::File { path: path.clone() });
        assert_eq!(labels.name(0), Some("first"));
        std::fs::remove_file(&path).ok();
    }
}
