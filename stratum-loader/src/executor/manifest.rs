//! Executor reading declarative unit manifests from the filesystem
//!
//! A manifest names its dependencies and literal exports:
//!
//! ```toml
//! [requires]
//! math = "./math"
//!
//! [exports]
//! name = "main"
//! ```

use super::{Completion, UnitBody, UnitExecutor, VehicleHandle, VehicleRequest};
use crate::scope::Scope;
use crate::value::Value;
use anyhow::Context as _;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, trace};

/// Contents of a unit manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Export name to dependency id. Each dependency's exports are stored
    /// under its name.
    #[serde(default)]
    pub requires: IndexMap<String, String>,

    /// Literal exports
    #[serde(default)]
    pub exports: IndexMap<String, serde_json::Value>,

    /// Replaces the exports entirely
    #[serde(default)]
    pub value: Option<serde_json::Value>,

    /// Fail with this message after the dependencies are loaded
    #[serde(default)]
    pub error: Option<String>,
}

impl UnitManifest {
    /// Parse a manifest, choosing JSON or TOML by file extension
    pub fn parse(path: &Path, content: &str) -> anyhow::Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(content)
                .with_context(|| format!("Failed to parse {}", path.display())),
            _ => toml::from_str(content)
                .with_context(|| format!("Failed to parse {}", path.display())),
        }
    }

    /// The body running this manifest as a unit
    pub fn into_body(self) -> UnitBody {
        Rc::new(move |scope: &Scope| {
            let exports = scope.exports();
            for (name, dependency) in &self.requires {
                let dependency = scope.require(dependency)?;
                exports.set(name.clone(), dependency);
            }
            if let Some(message) = &self.error {
                anyhow::bail!("{}", message);
            }
            for (name, value) in &self.exports {
                exports.set(name.clone(), Value::from(value.clone()));
            }
            if let Some(value) = &self.value {
                exports.replace(Value::from(value.clone()));
            }
            Ok(())
        })
    }
}

/// Executor mapping locations to manifest files.
///
/// A location `x` is served by `x` itself, `x.toml` or `x.json`, whichever
/// exists first. Relative locations are taken from `root`.
#[derive(Debug, Default)]
pub struct ManifestExecutor {
    root: Option<PathBuf>,
    vehicles: RefCell<FxHashMap<VehicleHandle, VehicleRequest>>,
    next_vehicle: Cell<u64>,
}

impl ManifestExecutor {
    /// Executor resolving relative locations against the working directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor resolving relative locations against `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    fn path_for(&self, location: &str) -> PathBuf {
        let location = location.strip_prefix("file://").unwrap_or(location);
        let path = Path::new(location);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Find and parse the manifest for `location`; `None` when no file
    /// exists
    pub fn read(&self, location: &str) -> anyhow::Result<Option<UnitManifest>> {
        let base = self.path_for(location);
        let candidates = [
            base.clone(),
            with_suffix(&base, ".toml"),
            with_suffix(&base, ".json"),
        ];

        let Some(path) = candidates.iter().find(|candidate| candidate.is_file()) else {
            trace!(location, "no manifest");
            return Ok(None);
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let manifest = UnitManifest::parse(path, &content)?;
        debug!(location, path = %path.display(), "manifest read");
        Ok(Some(manifest))
    }
}

/// `path` with `suffix` appended, keeping any dot already in the name
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

impl UnitExecutor for ManifestExecutor {
    fn create_vehicle(&self, request: &VehicleRequest) -> VehicleHandle {
        let vehicle = VehicleHandle(self.next_vehicle.get());
        self.next_vehicle.set(vehicle.0 + 1);
        self.vehicles.borrow_mut().insert(vehicle, request.clone());
        vehicle
    }

    fn start(&self, vehicle: VehicleHandle, completion: Completion) {
        let Some(request) = self.vehicles.borrow_mut().remove(&vehicle) else {
            return;
        };

        match self.read(&request.location) {
            Ok(Some(manifest)) => completion.execute(&manifest.into_body()),
            Ok(None) => completion.not_found(),
            Err(err) => completion.fail(err),
        }
    }

    fn destroy(&self, vehicle: VehicleHandle) {
        self.vehicles.borrow_mut().remove(&vehicle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_toml_and_json() {
        let toml = UnitManifest::parse(
            Path::new("a.toml"),
            "value = 3\n[requires]\nb = \"./b\"\n",
        )
        .unwrap();
        assert_eq!(toml.requires.get("b").map(String::as_str), Some("./b"));
        assert_eq!(toml.value, Some(serde_json::json!(3)));

        let json = UnitManifest::parse(Path::new("a.json"), r#"{"exports": {"x": 1}}"#).unwrap();
        assert_eq!(json.exports.get("x"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_read_tries_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("unit.json"), r#"{"value": "hi"}"#).unwrap();
        let executor = ManifestExecutor::with_root(dir.path());

        let manifest = executor.read("unit").unwrap().unwrap();
        assert_eq!(manifest.value, Some(serde_json::json!("hi")));
        assert!(executor.read("missing").unwrap().is_none());
    }

    #[test]
    fn test_dotted_locations_keep_their_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("util.v2.toml"), "value = 2").unwrap();
        std::fs::write(dir.path().join("util.toml"), "value = 1").unwrap();
        let executor = ManifestExecutor::with_root(dir.path());

        let manifest = executor.read("util.v2").unwrap().unwrap();
        assert_eq!(manifest.value, Some(serde_json::json!(2)));
    }

    #[test]
    fn test_bad_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "requires = 5").unwrap();
        let executor = ManifestExecutor::with_root(dir.path());
        assert!(executor.read("bad").is_err());
    }
}
