//! Graph command implementation

use super::load_batch;
use anyhow::Result;
use serde::Serialize;
use stratum_loader::{LoaderConfig, UnitInfo};

#[derive(Serialize)]
struct ContextReport {
    id: usize,
    base_paths: Vec<String>,
    units: Vec<UnitInfo>,
}

/// Load `ids`, then print every unit of every context with its status,
/// location and dependencies
pub fn run(config: LoaderConfig, ids: &[String], json: bool) -> Result<bool> {
    let session = load_batch(config, ids)?;

    let reports: Vec<ContextReport> = session
        .scheduler
        .contexts()
        .iter()
        .enumerate()
        .map(|(id, context)| ContextReport {
            id,
            base_paths: context.base_paths(),
            units: context.units(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(session.succeeded());
    }

    for report in &reports {
        println!("context {} {:?}", report.id, report.base_paths);
        for unit in &report.units {
            let location = unit.location.as_deref().unwrap_or("-");
            println!("  [{}] {} ({})", unit.status, unit.id, location);
            for dependency in &unit.dependencies {
                let marker = if unit.allowed.contains(dependency) { "~>" } else { "->" };
                println!("      {} {}", marker, dependency);
            }
            if let Some(error) = &unit.error {
                println!("      ! {}", error);
            }
        }
    }
    if let Some(stats) = &session.stats {
        println!(
            "{} loaded, {} failed, {} units in {} contexts",
            stats.loaded, stats.failed, stats.units, stats.contexts
        );
    }

    Ok(session.succeeded())
}
