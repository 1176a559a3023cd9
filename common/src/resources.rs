//! Optional static resources: the class label set and the disease catalog.
//!
//! Both are load-or-default. A missing or malformed file is logged and
//! replaced by an empty value; it never stops a prediction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::LabelSetMismatch;

/// Parse the first existing candidate as JSON, or fall back to `T::default()`.
pub fn load_optional<T>(candidates: &[PathBuf], what: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(path) = candidates.iter().find(|path| path.is_file()) else {
        warn!(
            "{} not found (checked {:?}); continuing without it",
            what, candidates
        );
        return T::default();
    };

    match read_json(path) {
        Ok(value) => {
            info!("✓ Loaded {} from {}", what, path.display());
            value
        }
        Err(e) => {
            warn!("Ignoring {} at {}: {}", what, path.display(), e);
            T::default()
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Class names ordered by the model's class index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassLabelSet(Vec<String>);

impl ClassLabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    /// Whether every one of `classes` indices has a name.
    pub fn covers(&self, classes: usize) -> bool {
        self.0.len() >= classes
    }

    /// Mismatch against the model's output width, if any.
    pub fn check(&self, classes: usize) -> Option<LabelSetMismatch> {
        (self.0.len() != classes).then_some(LabelSetMismatch {
            labels: self.0.len(),
            classes,
        })
    }
}

impl From<Vec<&str>> for ClassLabelSet {
    fn from(labels: Vec<&str>) -> Self {
        Self(labels.into_iter().map(str::to_owned).collect())
    }
}

/// Descriptive record for one disease label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseInfo {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub prevention: Vec<String>,
}

impl DiseaseInfo {
    /// Stand-in used when the catalog has no entry for a label.
    pub fn placeholder(label: &str) -> Self {
        Self {
            name: label.to_string(),
            description: "No description available.".to_string(),
            prevention: Vec::new(),
        }
    }
}

/// Disease metadata keyed by class label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiseaseCatalog(HashMap<String, DiseaseInfo>);

impl DiseaseCatalog {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn insert(&mut self, label: impl Into<String>, info: DiseaseInfo) {
        self.0.insert(label.into(), info);
    }

    pub fn describe(&self, label: &str) -> DiseaseInfo {
        self.0
            .get(label)
            .cloned()
            .unwrap_or_else(|| DiseaseInfo::placeholder(label))
    }
}
