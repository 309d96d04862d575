//! Bounded-concurrency scheduler
//!
//! Loads the checkpoint, filters out finished items, and runs the rest through the
//! processor with at most `concurrency` items in flight. Each worker handles its item
//! start to finish: process, append rows, mark completed (or mark failed). Item
//! failures are recorded and the run continues; checkpoint and sink failures abort it.

use crate::checkpoint::RunStatus;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::item::{ItemError, ItemOutput, ItemProcessor, WorkItem};
use crate::sink::SinkMode;
use crate::state::ItemStatus;
use crate::HarvestError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};

/// Final counts of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items supplied by the work source, duplicates included
    pub total_items: usize,
    /// Repeated IDs dropped before dispatch
    pub duplicates: usize,
    /// Items a previous run already finished
    pub skipped: usize,
    /// Items dispatched this run
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub rows_written: u64,
    /// Items found `in_progress` from an interrupted run
    pub orphaned: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    /// Returns true if the run had nothing to do
    pub fn is_noop(&self) -> bool {
        self.attempted == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed, {} failed, {} skipped, {} duplicates, {} rows written in {:.1}s",
            self.completed,
            self.failed,
            self.skipped,
            self.duplicates,
            self.rows_written,
            self.elapsed.as_secs_f64()
        )
    }
}

/// The items a run will dispatch, after dedup and checkpoint filtering
struct DispatchPlan<T> {
    pending: Vec<WorkItem<T>>,
    total: usize,
    duplicates: usize,
    skipped: usize,
}

impl<T> DispatchPlan<T> {
    fn build(items: Vec<WorkItem<T>>, skip: &HashSet<String>) -> Self {
        let total = items.len();
        let mut seen = HashSet::with_capacity(total);
        let mut pending = Vec::with_capacity(total);
        let mut duplicates = 0;
        let mut skipped = 0;

        for item in items {
            if !seen.insert(item.id().to_string()) {
                duplicates += 1;
            } else if skip.contains(item.id()) {
                skipped += 1;
            } else {
                pending.push(item);
            }
        }

        Self {
            pending,
            total,
            duplicates,
            skipped,
        }
    }
}

/// Runs work items through a processor under a concurrency limit
pub struct Scheduler {
    ctx: PipelineContext,
}

impl Scheduler {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Processes every item not already finished according to the checkpoint
    ///
    /// # Arguments
    ///
    /// * `items` - The full work list; may contain duplicates and finished items
    /// * `processor` - Shared by all workers
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - Every dispatched item reached `completed` or `failed`
    /// * `Err(HarvestError)` - The checkpoint or the sink failed; the run was aborted
    pub async fn run<T, P>(
        &self,
        items: Vec<WorkItem<T>>,
        processor: Arc<P>,
    ) -> Result<RunSummary, HarvestError>
    where
        T: Send + Sync + 'static,
        P: ItemProcessor<T>,
    {
        let started = Instant::now();
        let settings = self.ctx.settings().clone();

        let snapshot = self
            .ctx
            .with_checkpoint(|store| {
                if !settings.skip_completed {
                    tracing::info!("Fresh run: clearing checkpoint");
                    store.reset()?;
                }
                store.load()
            })
            .await?;

        let orphaned = snapshot.orphaned_ids();
        if !orphaned.is_empty() {
            tracing::warn!(
                "{} items were left in progress by an interrupted run and will be retried",
                orphaned.len()
            );
        }

        let skip = snapshot.terminal_ids(!settings.retry_failed);
        let plan = DispatchPlan::build(items, &skip);
        if plan.duplicates > 0 {
            tracing::warn!("Ignoring {} duplicate work items", plan.duplicates);
        }

        let mut summary = RunSummary {
            total_items: plan.total,
            duplicates: plan.duplicates,
            skipped: plan.skipped,
            attempted: plan.pending.len(),
            orphaned: orphaned.len(),
            ..RunSummary::default()
        };

        if plan.pending.is_empty() {
            tracing::info!(
                "Nothing to do: all {} items already processed",
                plan.skipped
            );
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        let mode = if settings.skip_completed && snapshot.has_progress() {
            SinkMode::Append
        } else {
            SinkMode::Fresh
        };
        let columns = processor.columns();
        self.ctx
            .with_sink(|sink| sink.initialize(&columns, mode))
            .await?;

        if mode == SinkMode::Append {
            // Rows of items that never reached completed would otherwise be written twice
            let rerun: HashSet<String> = plan
                .pending
                .iter()
                .map(|item| item.id().to_string())
                .collect();
            let discarded = self
                .ctx
                .with_sink(|sink| sink.discard_items(&rerun))
                .await?;
            if discarded > 0 {
                tracing::warn!(
                    "Discarded {} output rows left by unfinished items",
                    discarded
                );
            }
        }

        let config_hash = settings.config_hash.as_deref().unwrap_or("");
        self.ctx
            .with_checkpoint(|store| store.begin_run(config_hash))
            .await?;

        tracing::info!(
            "Processing {} items ({} already done) with concurrency {}",
            plan.pending.len(),
            plan.skipped,
            settings.concurrency
        );
        self.ctx.progress().begin(plan.pending.len());

        match self.dispatch(plan.pending, processor).await {
            Ok((completed, failed)) => {
                self.ctx
                    .with_checkpoint(|store| store.finish_run(RunStatus::Completed))
                    .await?;

                summary.completed = completed;
                summary.failed = failed;
                summary.rows_written = self.ctx.rows_written().await;
                summary.elapsed = started.elapsed();
                tracing::info!("Run finished: {}", summary);
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Run aborted: {}", e);
                if let Err(finish_error) = self
                    .ctx
                    .with_checkpoint(|store| store.finish_run(RunStatus::Failed))
                    .await
                {
                    tracing::warn!("Could not record failed run: {}", finish_error);
                }
                Err(e)
            }
        }
    }

    /// Runs the pending items, admitting a new one only when a slot frees up
    ///
    /// Returns the completed and failed counts.
    async fn dispatch<T, P>(
        &self,
        pending: Vec<WorkItem<T>>,
        processor: Arc<P>,
    ) -> Result<(usize, usize), HarvestError>
    where
        T: Send + Sync + 'static,
        P: ItemProcessor<T>,
    {
        let limit = self.ctx.settings().concurrency.max(1);
        let width = processor.columns().len();
        let mut queue = pending.into_iter();
        let mut tasks: JoinSet<Result<bool, HarvestError>> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut completed = 0;
        let mut failed = 0;

        loop {
            while tasks.len() < limit {
                let Some(item) = queue.next() else {
                    break;
                };
                let id = item.id().to_string();
                let ctx = self.ctx.clone();
                let processor = processor.clone();
                let handle = tasks.spawn(async move {
                    ctx.mark_in_progress(item.id()).await;
                    let outcome = processor.process(&item).await;
                    finish_item(&ctx, item.id(), width, outcome).await
                });
                in_flight.insert(handle.id(), id);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            let result = match joined {
                Ok((task_id, result)) => {
                    in_flight.remove(&task_id);
                    result
                }
                Err(join_error) if join_error.is_cancelled() => {
                    let id = in_flight.remove(&join_error.id()).unwrap_or_default();
                    Err(HarvestError::Aborted {
                        reason: format!("worker for {} was cancelled", id),
                    })
                }
                Err(join_error) => {
                    let id = in_flight.remove(&join_error.id()).unwrap_or_default();
                    let reason = format!("processor panicked: {}", panic_message(join_error));
                    tracing::error!(item_id = %id, "{}", reason);
                    record_panic(&self.ctx, &id, &reason).await
                }
            };

            match result {
                Ok(true) => completed += 1,
                Ok(false) => failed += 1,
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok((completed, failed))
    }
}

/// Persists one item's outcome: rows then checkpoint on success, failure record otherwise
///
/// Rows must have `width` values; an item with a malformed row fails without writing
/// any of its rows. Returns whether the item completed. Errors are checkpoint or sink
/// failures.
async fn finish_item(
    ctx: &PipelineContext,
    id: &str,
    width: usize,
    outcome: Result<ItemOutput, ItemError>,
) -> Result<bool, HarvestError> {
    match outcome {
        Ok(output) => {
            if let Some(row) = output.rows.iter().find(|row| row.values.len() != width) {
                let reason = format!("row has {} values, expected {}", row.values.len(), width);
                tracing::warn!(item_id = %id, "Item failed: {}", reason);
                return record_failure(ctx, id, &reason).await;
            }
            ctx.append_rows(id, &output.rows).await?;
            ctx.mark_completed(id).await?;
            ctx.progress().record(true);
            tracing::debug!(
                item_id = %id,
                rows = output.rows.len(),
                artifacts = output.artifacts.len(),
                "Item completed"
            );
            Ok(true)
        }
        Err(error) => {
            let reason = error.to_string();
            tracing::warn!(item_id = %id, "Item failed: {}", reason);
            record_failure(ctx, id, &reason).await
        }
    }
}

async fn record_failure(
    ctx: &PipelineContext,
    id: &str,
    reason: &str,
) -> Result<bool, HarvestError> {
    ctx.mark_failed(id, reason).await?;
    ctx.progress().record(false);
    Ok(false)
}

/// Settles an item whose task panicked
///
/// A panic after the completion was recorded leaves the item completed.
async fn record_panic(
    ctx: &PipelineContext,
    id: &str,
    reason: &str,
) -> Result<bool, HarvestError> {
    let status = ctx.with_checkpoint(|store| store.status(id)).await?;
    if status == Some(ItemStatus::Completed) {
        tracing::warn!(item_id = %id, "Panicked after completing: {}", reason);
        return Ok(true);
    }
    record_failure(ctx, id, reason).await
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
