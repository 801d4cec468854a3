//! Configuration handling for the Stratum CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stratum_loader::LoaderConfig;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "stratum.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

/// Load configuration from `path`, else `stratum.toml` in the working
/// directory, else defaults. Non-empty `paths` replace the configured base
/// paths.
pub fn load_config(path: Option<PathBuf>, paths: Vec<String>) -> Result<Config> {
    let mut config = match path {
        Some(path) => read_config(&path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_config(default_path)?
            } else {
                Config::default()
            }
        }
    };

    if !paths.is_empty() {
        config.loader.root.base_paths = paths;
    }
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_and_path_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stratum.toml");
        std::fs::write(
            &path,
            "base_paths = [\"/units/\"]\nbreak_cycles = false\n\n[output]\npretty = true\n",
        )
        .unwrap();

        let config = load_config(Some(path.clone()), Vec::new()).unwrap();
        assert_eq!(config.loader.root.base_paths, vec!["/units/"]);
        assert!(!config.loader.break_cycles);
        assert!(config.output.pretty);

        let config = load_config(Some(path), vec!["/other/".to_string()]).unwrap();
        assert_eq!(config.loader.root.base_paths, vec!["/other/"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_config(Some(PathBuf::from("/nonexistent/stratum.toml")), Vec::new());
        assert!(result.is_err());
    }
}
