//! Class index to label mapping read from the artifact's `config.json`.

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LabelError {
    #[error("config.json has no id2label mapping")]
    Missing,

    #[error("id2label key {0:?} is not a class index")]
    BadIndex(String),

    #[error("id2label is not contiguous: index {0} is missing")]
    Gap(usize),

    #[error("id2label maps index {0} more than once")]
    Duplicate(usize),
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    #[serde(default)]
    id2label: Option<HashMap<String, String>>,
}

/// Immutable, dense label vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new(labels: Vec<String>) -> Result<Self, LabelError> {
        if labels.is_empty() {
            return Err(LabelError::Missing);
        }
        Ok(Self { labels })
    }

    /// Build from an `id2label` map. Keys are stringified indices and must
    /// cover `0..n` exactly.
    pub fn from_id2label(id2label: &HashMap<String, String>) -> Result<Self, LabelError> {
        if id2label.is_empty() {
            return Err(LabelError::Missing);
        }

        let mut indexed: HashMap<usize, &String> = HashMap::with_capacity(id2label.len());
        for (key, label) in id2label {
            let idx: usize = key
                .trim()
                .parse()
                .map_err(|_| LabelError::BadIndex(key.clone()))?;
            if indexed.insert(idx, label).is_some() {
                return Err(LabelError::Duplicate(idx));
            }
        }

        let labels = (0..indexed.len())
            .map(|i| indexed.get(&i).map(|l| (*l).clone()).ok_or(LabelError::Gap(i)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { labels })
    }

    /// Parse the `id2label` section of a Hugging Face `config.json`.
    pub fn from_config_json(json: &str) -> anyhow::Result<Self> {
        let config: ModelConfigFile = serde_json::from_str(json)?;
        let id2label = config.id2label.ok_or(LabelError::Missing)?;
        Ok(Self::from_id2label(&id2label)?)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
