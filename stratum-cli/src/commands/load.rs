//! Load command implementation

use super::load_batch;
use anyhow::Result;
use stratum_loader::LoaderConfig;

/// Load `ids` and print each unit's exports as JSON. Returns whether every
/// unit loaded.
pub fn run(config: LoaderConfig, ids: &[String], pretty: bool) -> Result<bool> {
    let session = load_batch(config, ids)?;

    for (id, result) in &session.results {
        match result {
            Ok(exports) => {
                let json = exports.to_json();
                let rendered = if pretty {
                    serde_json::to_string_pretty(&json)?
                } else {
                    serde_json::to_string(&json)?
                };
                println!("{}: {}", id, rendered);
            }
            Err(err) => eprintln!("{}: error: {}", id, err),
        }
    }

    Ok(session.succeeded())
}
