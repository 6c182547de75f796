use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::forest::ForestParams;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightsConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub forest: ForestParams,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub snapshot_path: PathBuf,
    pub training_data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("models/learning_insights.json"),
            training_data_path: PathBuf::from("ai_training_data.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl InsightsConfig {
    /// Loads `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: InsightsConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_expectations() {
        let c = InsightsConfig::default();
        assert_eq!(c.storage.snapshot_path, PathBuf::from("models/learning_insights.json"));
        assert_eq!(c.storage.training_data_path, PathBuf::from("ai_training_data.json"));
        assert_eq!(c.forest.n_estimators, 100);
        assert_eq!(c.forest.seed, 42);
        assert!(c.forest.max_depth.is_none());
        assert_eq!(c.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let toml_str = r#"
[forest]
n_estimators = 25

[storage]
snapshot_path = "/var/lib/insights/bundle.json"
"#;
        let config: InsightsConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.forest.n_estimators, 25);
        assert_eq!(config.forest.seed, 42);
        assert_eq!(config.storage.snapshot_path, PathBuf::from("/var/lib/insights/bundle.json"));
        assert_eq!(config.storage.training_data_path, PathBuf::from("ai_training_data.json"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("insights.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n\n[forest]\nmax_depth = 8\n").unwrap();

        let config = InsightsConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.forest.max_depth, Some(8));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InsightsConfig::load(Some(dir.path().join("nope.toml").as_path())).is_err());
        assert!(InsightsConfig::load(None).is_ok());
    }
}
