//! Job executor implementation
//!
//! This module provides the run coordinator: it prepares the destination
//! table, lists pending objects, and drives each object through
//! fetch → extract → write with bounded concurrency.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::{StreamExt as _, stream};
use indexmap::IndexMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::PipelineConfig,
    model::{ObjectRef, OutputRecord},
    progress::{EntryStatus, ProgressReporter, RunPhase},
    retry::RetryPolicy,
};

use super::{
    JobError, ObjectError, Stage, enumerate, extract, fetch, sink,
    storage::{self, objstore, warehouse},
};

/// Job executor that coordinates the store, the extractor and the warehouse.
pub struct JobExecutor<S, X, W> {
    pub store: S,
    pub extractor: X,
    pub warehouse: W,
}

/// Terminal state of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Done,
    Failed(ObjectError),
    /// Stopped before entering `Stage`.
    Cancelled(Stage),
}

impl From<ObjectError> for Outcome {
    fn from(error: ObjectError) -> Self {
        Outcome::Failed(error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub path: String,
    pub stage: Stage,
    pub reason: String,
}

/// An object stopped by cancellation before entering `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelReport {
    pub path: String,
    pub stage: Stage,
}

/// Aggregate result of a run, consumed by the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Objects found under the prefix.
    pub listed: usize,
    /// Objects excluded by the suffix filter or already processed.
    pub skipped: usize,
    pub done: usize,
    pub failed: IndexMap<Stage, usize>,
    pub failures: Vec<FailureReport>,
    pub cancelled: Vec<CancelReport>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            listed: 0,
            skipped: 0,
            done: 0,
            failed: IndexMap::new(),
            failures: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    fn record(&mut self, path: String, outcome: Outcome) {
        match outcome {
            Outcome::Done => self.done += 1,
            Outcome::Failed(error) => {
                let stage = error.stage();
                *self.failed.entry(stage).or_default() += 1;
                self.failures.push(FailureReport {
                    path: error.path().to_string(),
                    stage,
                    reason: error.to_string(),
                });
            }
            Outcome::Cancelled(stage) => self.cancelled.push(CancelReport { path, stage }),
        }
    }

    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }

    pub fn failed_at(&self, stage: Stage) -> usize {
        self.failed.get(&stage).copied().unwrap_or_default()
    }
}

/// Everything one run shares between its per-object pipelines.
struct RunContext<'a> {
    table: &'a str,
    retry: RetryPolicy,
    max_document_bytes: u64,
    reporter: &'a dyn ProgressReporter,
    cancel: CancellationToken,
}

impl RunContext<'_> {
    /// Stage boundary: refuse to enter `stage` once the run is cancelled.
    fn enter(&self, path: &str, stage: Stage) -> Result<(), Outcome> {
        if self.cancel.is_cancelled() {
            debug!(path, %stage, "cancelled at stage boundary");
            return Err(Outcome::Cancelled(stage));
        }
        let status = match stage {
            Stage::Pending => EntryStatus::Pending,
            Stage::Fetching => EntryStatus::Fetching,
            Stage::Extracting => EntryStatus::Extracting,
            Stage::Writing => EntryStatus::Writing,
            Stage::Done => EntryStatus::Done,
        };
        debug!(path, %stage, "entering stage");
        self.reporter.update_entry(path, status);
        Ok(())
    }
}

impl<S, X, W> JobExecutor<S, X, W>
where
    S: objstore::Client,
    X: storage::extract::Client,
    W: warehouse::Client,
{
    /// Create the destination table if it does not exist.
    pub async fn setup(&self, table: &str) -> Result<(), W::Error> {
        self.warehouse
            .create_table(table)
            .await
            .inspect_err(|error| error!(%error, table, "failed to create destination table"))
    }

    async fn processed_paths(&self, table: &str) -> Result<HashSet<String>, W::Error> {
        let paths = self
            .warehouse
            .processed_paths(table)
            .await
            .inspect_err(|error| error!(%error, table, "failed to fetch processed paths"))?;
        debug!(table, count = paths.len(), "loaded processed paths");
        Ok(paths)
    }

    async fn advance(&self, object: &ObjectRef, ctx: &RunContext<'_>) -> Result<(), Outcome> {
        let path = object.path.as_str();
        ctx.enter(path, Stage::Fetching)?;
        let document = fetch::fetch(&self.store, object, &ctx.retry).await?;

        ctx.enter(path, Stage::Extracting)?;
        let content = extract::extract(
            &self.extractor,
            &document,
            ctx.max_document_bytes,
            &ctx.retry,
        )
        .await?;
        drop(document);

        ctx.enter(path, Stage::Writing)?;
        let record = OutputRecord::new(object, content);
        sink::write(&self.warehouse, ctx.table, &record, &ctx.retry).await?;
        Ok(())
    }

    async fn process_object(&self, object: ObjectRef, ctx: &RunContext<'_>) -> (String, Outcome) {
        let outcome = match self.advance(&object, ctx).await {
            Ok(()) => Outcome::Done,
            Err(outcome) => outcome,
        };
        let status = match &outcome {
            Outcome::Done => {
                info!(path = object.path, "processed document");
                EntryStatus::Done
            }
            Outcome::Failed(error) => EntryStatus::Failed(error.to_string()),
            Outcome::Cancelled(_) => EntryStatus::Cancelled,
        };
        ctx.reporter.update_entry(&object.path, status);
        (object.path, outcome)
    }

    /// Execute one run. Per-object failures are collected in the summary;
    /// only table preparation, the processed-path lookup and the listing
    /// itself can fail the run.
    pub async fn run(
        &self,
        table: &str,
        config: &PipelineConfig,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, JobError<S::Error, W::Error>> {
        let mut summary = RunSummary::new(Utc::now());
        let retry = config.retry_policy();

        reporter.set_phase(RunPhase::Preparing);
        self.setup(table).await.map_err(JobError::Warehouse)?;
        let processed = if config.process_only_new {
            self.processed_paths(table)
                .await
                .map_err(JobError::Warehouse)?
        } else {
            HashSet::new()
        };

        reporter.set_phase(RunPhase::Listing);
        let objects = enumerate::list_objects(&self.store, &config.storage_prefix, &retry)
            .await
            .map_err(JobError::StoreUnavailable)?;
        summary.listed = objects.len();
        let pending = enumerate::pending(objects, &config.suffixes, |object| {
            processed.contains(&object.path)
        })
        .collect::<Vec<_>>();
        summary.skipped = summary.listed - pending.len();
        info!(
            prefix = config.storage_prefix,
            listed = summary.listed,
            pending = pending.len(),
            "enumerated objects"
        );
        reporter.register_entries(pending.iter().map(|object| object.path.clone()).collect());

        // A child token lets the run timeout stop this run without
        // cancelling the caller's token.
        let cancel = cancel.child_token();
        let timer = config.run_timeout().map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(?timeout, "run timed out, cancelling remaining documents");
                cancel.cancel();
            })
        });

        let ctx = RunContext {
            table,
            retry,
            max_document_bytes: config.max_document_bytes,
            reporter,
            cancel,
        };
        let ctx = &ctx;
        reporter.set_phase(RunPhase::Processing);
        let outcomes = stream::iter(pending)
            .map(|object| self.process_object(object, ctx))
            .buffer_unordered(config.concurrency_limit.max(1))
            .collect::<Vec<_>>()
            .await;
        if let Some(timer) = timer {
            timer.abort();
        }

        for (path, outcome) in outcomes {
            summary.record(path, outcome);
        }
        summary.finished_at = Utc::now();
        info!(
            done = summary.done,
            failed = summary.failed_total(),
            cancelled = summary.cancelled.len(),
            skipped = summary.skipped,
            "run finished"
        );
        reporter.set_phase(RunPhase::Completed);
        Ok(summary)
    }
}
