use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::interpret::DEFAULT_TOP_K;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "LEAF_CONFIG";

/// Config file used when `LEAF_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/leaf.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSection,
    pub labels: ResourceSection,
    pub disease_info: ResourceSection,
    pub top_k: usize,
    pub server: ServerSection,
    pub history: HistorySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    /// Artifact locations in priority order
    pub candidates: Vec<PathBuf>,
    /// ONNX Runtime intra-op threads; 0 means one per CPU
    pub intra_threads: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSection {
    pub candidates: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    pub path: PathBuf,
    pub default_limit: usize,
    pub max_limit: usize,
}

fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model: ModelSection::default(),
            labels: ResourceSection {
                candidates: paths(&[
                    "model/class_names.json",
                    "../model/class_names.json",
                    "class_names.json",
                    "notebooks/class_names.json",
                ]),
            },
            disease_info: ResourceSection {
                candidates: paths(&["app/disease_info.json", "disease_info.json"]),
            },
            top_k: DEFAULT_TOP_K,
            server: ServerSection::default(),
            history: HistorySection::default(),
        }
    }
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            candidates: paths(&[
                "model/plant_model.onnx",
                "../model/plant_model.onnx",
                "plant_model.onnx",
                "plant_disease_model.onnx",
            ]),
            intra_threads: 0,
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/history.jsonl"),
            default_limit: 10,
            max_limit: 100,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    /// Load from `LEAF_CONFIG` (or the default path); built-in defaults when the
    /// file does not exist. A file that exists but does not parse is an error.
    pub fn from_env() -> Result<(Self, Option<PathBuf>)> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        if path.is_file() {
            Ok((Self::load(&path)?, Some(path)))
        } else {
            Ok((Self::default(), None))
        }
    }

    /// Clamp a requested page size to the configured bounds.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.history.default_limit)
            .min(self.history.max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
model:
  candidates:
    - /opt/models/leaf.onnx
top_k: 5
history:
  path: /var/lib/leaf/history.jsonl
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.model.candidates, vec![PathBuf::from("/opt/models/leaf.onnx")]);
        assert_eq!(config.model.intra_threads, 0);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.history.path, PathBuf::from("/var/lib/leaf/history.jsonl"));
        assert_eq!(config.history.default_limit, 10);
        assert_eq!(config.server.bind.port(), 8000);
        assert_eq!(config.labels.candidates.len(), 4);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.yaml");
        std::fs::write(&path, "server:\n  bind: 127.0.0.1:9090\n").unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9090".parse().unwrap());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.yaml");
        std::fs::write(&path, "top_k: [not, a, number]\n").unwrap();

        assert!(AppConfig::load(&path).is_err());
    }

    #[test]
    fn test_page_limit() {
        let config = AppConfig::default();
        assert_eq!(config.page_limit(None), 10);
        assert_eq!(config.page_limit(Some(25)), 25);
        assert_eq!(config.page_limit(Some(10_000)), 100);
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/leaf.yaml");
        let config = AppConfig::load(path).unwrap();
        assert_eq!(config.top_k, 3);
        assert_eq!(config.model.candidates[0], PathBuf::from("model/plant_model.onnx"));
    }
}
