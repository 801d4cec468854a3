//! Command implementations

pub mod graph;
pub mod load;

use anyhow::Result;
use std::cell::RefCell;
use std::rc::Rc;
use stratum_loader::{Exports, LoadError, LoaderConfig, LoaderStats, ManifestExecutor, Scheduler};
use tracing::info;

/// A loaded batch of units
pub struct Session {
    pub scheduler: Scheduler,
    pub results: Vec<(String, std::result::Result<Exports, LoadError>)>,
    pub stats: Option<LoaderStats>,
}

impl Session {
    /// Whether every requested unit loaded
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|(_, result)| result.is_ok())
    }
}

/// Request `ids` as the initial batch, wait for quiescence and collect each
/// unit's outcome
pub fn load_batch(config: LoaderConfig, ids: &[String]) -> Result<Session> {
    let scheduler = Scheduler::new(config, Rc::new(ManifestExecutor::new()))?;

    let report = Rc::new(RefCell::new(None));
    let slot = report.clone();
    scheduler.on_quiescent(move |stats| *slot.borrow_mut() = Some(stats.clone()));

    let mut rejected = Vec::new();
    for id in ids {
        if let Err(err) = scheduler.request(id) {
            rejected.push((id.clone(), err));
        }
    }
    scheduler.mark_batch_known();

    let results = ids
        .iter()
        .map(|id| match rejected.iter().find(|(rejected, _)| rejected == id) {
            Some((_, err)) => (id.clone(), Err(err.clone())),
            None => (id.clone(), scheduler.require(id)),
        })
        .collect();

    let stats = report.borrow_mut().take();
    if let Some(stats) = &stats {
        info!(loaded = stats.loaded, failed = stats.failed, "batch settled");
    }
    Ok(Session {
        scheduler,
        results,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_batch_from_manifests() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.toml"), "[requires]\nlib = \"./lib\"\n").unwrap();
        std::fs::write(dir.path().join("lib.toml"), "[exports]\nversion = 2\n").unwrap();

        let config = LoaderConfig::with_paths([format!("{}/", dir.path().display())]);
        let ids = vec!["app".to_string(), "missing".to_string(), "".to_string()];
        let session = load_batch(config, &ids).unwrap();

        assert!(session.results[0].1.is_ok());
        assert!(session.results[1].1.as_ref().unwrap_err().is_not_found());
        assert!(matches!(session.results[2].1, Err(LoadError::InvalidId { .. })));
        assert!(!session.succeeded());

        let stats = session.stats.unwrap();
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.failed, 1);
    }
}
