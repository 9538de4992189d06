//! Task types: priorities, outcomes, and the settled-once result handle.

use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

/// Priority tier of a submitted task.
///
/// `High` maps to the *asap* queue, `Normal` to *ready*, `Low` to *blocked*.
/// Blocked tasks are never dispatched until [`unblock`] releases them.
///
/// [`unblock`]: super::TaskScheduler::unblock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

/// Why a task settled without a value.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task ran and returned an error. Isolated to this task; the
    /// scheduler and sibling tasks are unaffected.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
    /// The task was still queued when `stop()` cleared the queues.
    #[error("task discarded before starting")]
    Discarded,
    /// The task panicked, or its scheduler went away before it settled.
    #[error("task panicked or was dropped before settling")]
    Abandoned,
}

/// Handle that settles exactly once with a task's outcome.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, TaskError>>) -> Self {
        Self { rx }
    }

    /// Wait for the task to settle.
    pub async fn join(self) -> Result<T, TaskError> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::Abandoned),
        }
    }
}

/// What the scheduler decides to do with a queued task.
pub(crate) enum TaskFate<C> {
    /// Dispatch it with the shared context.
    Start(Arc<C>),
    /// Settle its handle with [`TaskError::Discarded`].
    Discard,
}

/// A queued task, type-erased down to its fate.
pub(crate) type StoredTask<C> = Box<dyn FnOnce(TaskFate<C>) -> BoxFuture<'static, ()> + Send>;
