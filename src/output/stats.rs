//! Statistics from the checkpoint
//!
//! Counts items per status, lists failure reasons, and reports the last run for
//! backends that track runs.

use crate::checkpoint::{CheckpointResult, CheckpointStore, RunRecord};
use crate::state::ItemStatus;
use std::collections::HashMap;

/// Failures listed in full before the output is cut short
const MAX_LISTED_FAILURES: usize = 25;

/// Checkpoint statistics summary
#[derive(Debug, Clone)]
pub struct CheckpointStatistics {
    /// Number of items with any checkpoint record
    pub total_items: u64,

    /// Count of items by status
    pub items_by_status: HashMap<ItemStatus, u64>,

    /// Failed items and their reasons, sorted by ID
    pub failures: Vec<(String, String)>,

    /// Most recent run, if the backend tracks runs
    pub latest_run: Option<RunRecord>,
}

impl CheckpointStatistics {
    pub fn count(&self, status: ItemStatus) -> u64 {
        self.items_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from a checkpoint store
///
/// # Arguments
///
/// * `store` - The checkpoint backend to read
///
/// # Returns
///
/// * `Ok(CheckpointStatistics)` - Successfully loaded statistics
/// * `Err(CheckpointError)` - The checkpoint could not be read
pub fn load_statistics(store: &mut dyn CheckpointStore) -> CheckpointResult<CheckpointStatistics> {
    let snapshot = store.load()?;

    let mut items_by_status = HashMap::new();
    for status in ItemStatus::all_states() {
        let count = snapshot.count(status) as u64;
        if count > 0 {
            items_by_status.insert(status, count);
        }
    }

    Ok(CheckpointStatistics {
        total_items: snapshot.len() as u64,
        items_by_status,
        failures: snapshot.failures(),
        latest_run: store.latest_run()?,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CheckpointStatistics) {
    println!("=== Harvest Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  Run ID: {}", run.id);
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!("  Status: {}", run.status.to_db_string());
        println!("  Config hash: {}", run.config_hash);
        println!();
    }

    println!("Items by Status:");
    let mut status_counts: Vec<_> = stats.items_by_status.iter().collect();
    status_counts.sort_by(|a, b| b.1.cmp(a.1));

    for (status, count) in status_counts {
        let percentage = if stats.total_items > 0 {
            (*count as f64 / stats.total_items as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!("  total: {}", stats.total_items);
    println!();

    let orphaned = stats.count(ItemStatus::InProgress);
    if orphaned > 0 {
        println!(
            "{} items are still in progress; the next run will retry them.\n",
            orphaned
        );
    }

    if !stats.failures.is_empty() {
        println!("Failed Items ({}):", stats.failures.len());
        for (id, reason) in stats.failures.iter().take(MAX_LISTED_FAILURES) {
            println!("  - {}: {}", id, reason);
        }
        if stats.failures.len() > MAX_LISTED_FAILURES {
            println!(
                "  ... and {} more (use --export-checkpoint for the full list)",
                stats.failures.len() - MAX_LISTED_FAILURES
            );
        }
        println!();
    }
}
