//! Build pipeline glue: wire a walk to the scheduler, then drain.
//!
//! Discovery is cheap and keeps going while at most `limit` transforms run
//! concurrently. A phase completes only after the walk has finished *and*
//! the scheduler has drained back to idle — the walk-then-drain handshake
//! that lets a dependent phase (say, rewriting markup after every asset has
//! been hashed) start from a complete picture.

use crate::scheduler::{Priority, TaskScheduler};
use serde::Serialize;
use siteforge_walk::{
    EntryKind, Exclude, WalkEntry, WalkError, WalkFs, WalkMetrics, WalkOptions, Walker,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Why a phase failed.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The discovery walk died. The set of discovered files is incomplete,
    /// so nothing in this phase can be acted on safely.
    #[error("walk failed: {0}")]
    Walk(#[from] WalkError),
}

/// Outcome of one completed phase.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PhaseReport {
    /// Metrics from the discovery walk.
    pub metrics: WalkMetrics,
    /// File tasks submitted to the scheduler.
    pub files_submitted: u64,
    /// File tasks that settled with an error. The phase itself still
    /// completes; failures are per-unit.
    pub files_failed: u64,
}

/// Drives walk phases against one scheduler.
pub struct Pipeline<C> {
    scheduler: TaskScheduler<C>,
    fs: Arc<dyn WalkFs>,
}

impl<C: Send + Sync + 'static> Pipeline<C> {
    pub fn new(scheduler: TaskScheduler<C>, fs: Arc<dyn WalkFs>) -> Self {
        Self { scheduler, fs }
    }

    /// The scheduler this pipeline submits to.
    pub fn scheduler(&self) -> &TaskScheduler<C> {
        &self.scheduler
    }

    /// Walk `root`, run `per_file` for every discovered file under the
    /// scheduler's concurrency limit, and return once every task from this
    /// phase has settled.
    pub async fn run_phase<F, Fut>(
        &self,
        root: impl Into<PathBuf>,
        exclude: Exclude,
        per_file: F,
    ) -> Result<PhaseReport, PhaseError>
    where
        F: Fn(WalkEntry, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let root = root.into();
        tracing::debug!(root = %root.display(), "phase starting");

        let per_file = Arc::new(per_file);
        let handles = Arc::new(Mutex::new(Vec::new()));
        let scheduler = self.scheduler.clone();
        let sink = Arc::clone(&handles);

        let on_entry = Box::new(move |entry: WalkEntry| {
            if entry.kind != EntryKind::File {
                return;
            }
            let per_file = Arc::clone(&per_file);
            let handle =
                scheduler.submit(Priority::Normal, move |context| per_file(entry, context));
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        });

        let walk = Walker::new(Arc::clone(&self.fs)).walk(
            root,
            WalkOptions {
                exclude,
                on_entry: Some(on_entry),
            },
        );
        let metrics = walk.done().await?;

        // Drain handshake: the phase is over only once every submitted task
        // has settled.
        self.scheduler.idle().await;

        let handles = std::mem::take(
            &mut *handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let files_submitted = handles.len() as u64;
        let mut files_failed = 0u64;
        for handle in handles {
            if let Err(err) = handle.join().await {
                files_failed += 1;
                tracing::warn!(error = %err, "file task failed");
            }
        }

        tracing::debug!(files_submitted, files_failed, "phase complete");
        Ok(PhaseReport {
            metrics,
            files_submitted,
            files_failed,
        })
    }
}
