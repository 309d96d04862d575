//! Checkpoint export as `{ "completed": [...], "failed": { id: reason } }`

use crate::checkpoint::{CheckpointSnapshot, CheckpointStore};
use crate::HarvestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Terminal outcomes of every item, for inspection or manual retry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointExport {
    /// Completed IDs, sorted
    pub completed: Vec<String>,

    /// Failed IDs and their reasons
    pub failed: BTreeMap<String, String>,
}

impl From<&CheckpointSnapshot> for CheckpointExport {
    fn from(snapshot: &CheckpointSnapshot) -> Self {
        let mut completed: Vec<String> = snapshot.completed_ids().into_iter().collect();
        completed.sort();

        Self {
            completed,
            failed: snapshot.failures().into_iter().collect(),
        }
    }
}

/// Writes the checkpoint's terminal outcomes to a JSON file
///
/// The file is written beside its destination and renamed into place.
///
/// # Arguments
///
/// * `store` - The checkpoint to read
/// * `path` - Destination JSON file
///
/// # Returns
///
/// * `Ok(CheckpointExport)` - What was written
/// * `Err(HarvestError)` - The checkpoint could not be read or the file written
pub fn export_checkpoint(
    store: &mut dyn CheckpointStore,
    path: &Path,
) -> Result<CheckpointExport, HarvestError> {
    let export = CheckpointExport::from(&store.load()?);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_vec_pretty(&export).map_err(std::io::Error::from)?;
    let temp = path.with_extension("json.tmp");
    fs::write(&temp, json)?;
    fs::rename(&temp, path)?;

    Ok(export)
}
