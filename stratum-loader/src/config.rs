//! Loader configuration

use crate::{LoadError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of a single context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Base locations searched for bare unit ids, first match wins
    #[serde(default = "default_base_paths", alias = "paths")]
    pub base_paths: Vec<String>,

    /// Units seeded as already loaded, keyed by id
    #[serde(default)]
    pub preloaded: IndexMap<String, serde_json::Value>,
}

impl ContextConfig {
    /// Context searching the given base locations
    pub fn with_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_paths: paths.into_iter().map(Into::into).collect(),
            preloaded: IndexMap::new(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            base_paths: default_base_paths(),
            preloaded: IndexMap::new(),
        }
    }
}

/// Scheduler-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Configuration of the root context
    #[serde(flatten)]
    pub root: ContextConfig,

    /// Whether a circular wait is broken by allowing one edge. When
    /// disabled, a cycle is reported as a stall instead.
    #[serde(default = "default_true")]
    pub break_cycles: bool,

    /// How many times one unit may be aborted and replayed before it is
    /// failed
    #[serde(default = "default_max_replays")]
    pub max_replays: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            root: ContextConfig::default(),
            break_cycles: default_true(),
            max_replays: default_max_replays(),
        }
    }
}

impl LoaderConfig {
    /// Root context searching the given base locations
    pub fn with_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: ContextConfig::with_paths(paths),
            ..Default::default()
        }
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| LoadError::Config {
            message: format!("Failed to parse TOML: {}", e),
        })
    }

    /// Load configuration from JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str).map_err(|e| LoadError::Config {
            message: format!("Failed to parse JSON: {}", e),
        })
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }
}

fn default_base_paths() -> Vec<String> {
    vec!["./".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_max_replays() -> u32 {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.root.base_paths, vec!["./"]);
        assert!(config.break_cycles);
        assert_eq!(config.max_replays, 64);
    }

    #[test]
    fn test_from_toml() {
        let config = LoaderConfig::from_toml(
            r#"
            base_paths = ["/a/", "/b/"]
            break_cycles = false

            [preloaded]
            system = { name = "host" }
            "#,
        )
        .unwrap();

        assert_eq!(config.root.base_paths, vec!["/a/", "/b/"]);
        assert!(!config.break_cycles);
        assert_eq!(config.max_replays, 64);
        assert_eq!(
            config.root.preloaded.get("system"),
            Some(&serde_json::json!({"name": "host"}))
        );
    }

    #[test]
    fn test_from_json_accepts_paths_alias() {
        let config = LoaderConfig::from_json(r#"{"paths": ["./lib/"]}"#).unwrap();
        assert_eq!(config.root.base_paths, vec!["./lib/"]);
    }

    #[test]
    fn test_invalid_config() {
        let result = LoaderConfig::from_toml("base_paths = 3");
        assert!(matches!(result, Err(LoadError::Config { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stratum.json");
        std::fs::write(&path, r#"{"base_paths": ["/x/"], "max_replays": 3}"#).unwrap();

        let config = LoaderConfig::load(&path).unwrap();
        assert_eq!(config.root.base_paths, vec!["/x/"]);
        assert_eq!(config.max_replays, 3);
    }
}
