//! JSON checkpoints for [`Sequential`] networks.
//!
//! Paths ending in `.gz` are gzip-compressed. Loaded networks are rebuilt
//! through [`Sequential::new`], so a hand-edited file with inconsistent
//! layer widths is rejected instead of failing later in a forward pass.

use crate::network::Sequential;
use mirage_core::io::{read_bytes_maybe_gzip, write_bytes_maybe_gzip};
use mirage_core::{Classifier, MirageError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const FORMAT: &str = "mirage-sequential";
const VERSION: u32 = 1;

#[derive(Serialize)]
struct CheckpointOut<'a> {
    format: &'a str,
    version: u32,
    network: &'a Sequential,
}

#[derive(Deserialize)]
struct CheckpointIn {
    format: String,
    version: u32,
    network: Sequential,
}

pub fn save_checkpoint(network: &Sequential, path: &Path) -> Result<()> {
    let file = CheckpointOut {
        format: FORMAT,
        version: VERSION,
        network,
    };
    let bytes = serde_json::to_vec(&file)
        .map_err(|e| MirageError::Checkpoint(format!("failed to serialize network: {e}")))?;
    write_bytes_maybe_gzip(path, &bytes)?;
    info!(
        "saved checkpoint ({} parameters) to {}",
        network.param_count(),
        path.display()
    );
    Ok(())
}

pub fn load_checkpoint(path: &Path) -> Result<Sequential> {
    let bytes = read_bytes_maybe_gzip(path)?;
    let file: CheckpointIn = serde_json::from_slice(&bytes).map_err(|e| {
        MirageError::Checkpoint(format!("failed to parse {}: {}", path.display(), e))
    })?;
    if file.format != FORMAT {
        return Err(MirageError::Checkpoint(format!(
            "{} is not a network checkpoint (format '{}')",
            path.display(),
            file.format
        )));
    }
    if file.version != VERSION {
        return Err(MirageError::Checkpoint(format!(
            "unsupported checkpoint version {} (expected {})",
            file.version, VERSION
        )));
    }

    let stored = file.network;
    let network = Sequential::new(stored.input_dim(), stored.layers().to_vec())
        .map_err(|e| MirageError::Checkpoint(format!("invalid network in {}: {}", path.display(), e)))?;
    if network.num_classes() != stored.num_classes() {
        return Err(MirageError::Checkpoint(format!(
            "{} declares {} classes but its layers produce {}",
            path.display(),
            stored.num_classes(),
            network.num_classes()
        )));
    }
    Ok(network)
}
