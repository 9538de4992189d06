//! The scheduler core: queues, dispatch, and the lifecycle state machine.

use super::task::{Priority, StoredTask, TaskError, TaskFate, TaskHandle};
use futures::FutureExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

/// Concurrency limit used when none is given.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Lifecycle phase of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No tasks in flight, nothing dispatchable queued.
    Idle,
    /// Dispatching and/or executing tasks.
    Running,
    /// `stop()` was requested; draining tasks already in flight.
    Stopping,
    /// Drained after a stop. Terminal.
    Done,
}

/// Point-in-time snapshot of a scheduler.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedulerStatus {
    pub phase: Phase,
    pub in_flight: usize,
    pub queued_asap: usize,
    pub queued_ready: usize,
    pub queued_blocked: usize,
}

struct State<C> {
    phase: Phase,
    asap: VecDeque<StoredTask<C>>,
    ready: VecDeque<StoredTask<C>>,
    blocked: VecDeque<StoredTask<C>>,
    in_flight: usize,
    idle_waiters: Vec<oneshot::Sender<()>>,
    stop_waiters: Vec<oneshot::Sender<()>>,
    done_waiters: Vec<oneshot::Sender<()>>,
}

struct Shared<C> {
    limit: usize,
    context: Arc<C>,
    state: Mutex<State<C>>,
}

/// Bounded-concurrency task scheduler with priority tiers.
///
/// Cheap to clone; all clones share the same queues and lifecycle. The
/// context is shared by reference with every task and is caller-owned: the
/// scheduler never synchronizes access to its interior.
pub struct TaskScheduler<C = ()> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for TaskScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Send + Sync + 'static> TaskScheduler<C> {
    /// Scheduler with the default concurrency limit.
    pub fn new(context: C) -> Self {
        Self::with_concurrency(context, DEFAULT_CONCURRENCY)
    }

    /// Scheduler with an explicit concurrency limit (must be at least 1).
    pub fn with_concurrency(context: C, limit: usize) -> Self {
        assert!(limit >= 1, "concurrency limit must be at least 1");
        Self {
            shared: Arc::new(Shared {
                limit,
                context: Arc::new(context),
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    asap: VecDeque::new(),
                    ready: VecDeque::new(),
                    blocked: VecDeque::new(),
                    in_flight: 0,
                    idle_waiters: Vec::new(),
                    stop_waiters: Vec::new(),
                    done_waiters: Vec::new(),
                }),
            }),
        }
    }

    /// The shared context handed to every task.
    pub fn context(&self) -> Arc<C> {
        Arc::clone(&self.shared.context)
    }

    /// Snapshot of the current phase, in-flight count, and queue depths.
    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        SchedulerStatus {
            phase: state.phase,
            in_flight: state.in_flight,
            queued_asap: state.asap.len(),
            queued_ready: state.ready.len(),
            queued_blocked: state.blocked.len(),
        }
    }

    /// Submit a unit of work and get a handle that settles with its outcome.
    ///
    /// The task receives the shared context and runs on a fresh task of the
    /// runtime, so the submitter's stack is never blocked. Failures and
    /// panics settle only this task's handle.
    ///
    /// # Panics
    ///
    /// Submitting after [`stop`](Self::stop) is caller misuse and panics.
    pub fn submit<F, Fut, T>(&self, priority: Priority, task: F) -> TaskHandle<T>
    where
        F: FnOnce(Arc<C>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let stored: StoredTask<C> = Box::new(move |fate| match fate {
            TaskFate::Start(context) => async move {
                let outcome = AssertUnwindSafe(async move { task(context).await })
                    .catch_unwind()
                    .await;
                let outcome = match outcome {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(TaskError::Failed(err)),
                    Err(_) => Err(TaskError::Abandoned),
                };
                let _ = tx.send(outcome);
            }
            .boxed(),
            TaskFate::Discard => {
                let _ = tx.send(Err(TaskError::Discarded));
                std::future::ready(()).boxed()
            }
        });

        {
            let mut state = self.state();
            match state.phase {
                Phase::Stopping | Phase::Done => {
                    panic!("submit on a scheduler that is {:?}", state.phase)
                }
                Phase::Idle => {
                    state.phase = Phase::Running;
                    tracing::debug!("scheduler running");
                }
                Phase::Running => {}
            }
            match priority {
                Priority::High => state.asap.push_back(stored),
                Priority::Normal => state.ready.push_back(stored),
                Priority::Low => state.blocked.push_back(stored),
            }
        }
        self.pump();
        TaskHandle::new(rx)
    }

    /// Release every blocked task into the ready queue, in order, and
    /// dispatch whatever capacity allows.
    pub fn unblock(&self) {
        {
            let mut state = self.state();
            while let Some(task) = state.blocked.pop_front() {
                state.ready.push_back(task);
            }
            if state.phase == Phase::Idle && !state.ready.is_empty() {
                state.phase = Phase::Running;
            }
        }
        self.pump();
    }

    /// Stop the scheduler: no new dispatch, queued-but-unstarted tasks are
    /// discarded (their handles settle with [`TaskError::Discarded`]), and
    /// tasks already in flight run to completion. Idempotent.
    pub fn stop(&self) {
        let (discarded, stop_waiters, done_waiters) = {
            let mut state = self.state();
            if matches!(state.phase, Phase::Stopping | Phase::Done) {
                return;
            }
            state.phase = Phase::Stopping;
            let mut discarded: Vec<StoredTask<C>> = Vec::new();
            discarded.extend(state.asap.drain(..));
            discarded.extend(state.ready.drain(..));
            discarded.extend(state.blocked.drain(..));
            let stop_waiters = std::mem::take(&mut state.stop_waiters);
            let done_waiters = if state.in_flight == 0 {
                state.phase = Phase::Done;
                std::mem::take(&mut state.done_waiters)
            } else {
                Vec::new()
            };
            (discarded, stop_waiters, done_waiters)
        };

        tracing::debug!(discarded = discarded.len(), "scheduler stopping");
        for task in discarded {
            drop(task(TaskFate::Discard));
        }
        for waiter in stop_waiters {
            let _ = waiter.send(());
        }
        for waiter in done_waiters {
            let _ = waiter.send(());
        }
    }

    /// Resolves the next time the scheduler becomes idle, or immediately if
    /// it already is. One-shot: await again to be notified of the next
    /// idle transition.
    pub async fn idle(&self) {
        let rx = {
            let mut state = self.state();
            if state.phase == Phase::Idle {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.idle_waiters.push(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    /// Resolves once `stop()` has been requested (immediately if it already
    /// was).
    pub async fn stopped(&self) {
        let rx = {
            let mut state = self.state();
            if matches!(state.phase, Phase::Stopping | Phase::Done) {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.stop_waiters.push(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    /// Resolves once the scheduler has fully drained after a stop
    /// (immediately if it already has).
    pub async fn done(&self) {
        let rx = {
            let mut state = self.state();
            if state.phase == Phase::Done {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.done_waiters.push(tx);
                Some(rx)
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    fn state(&self) -> MutexGuard<'_, State<C>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Dispatch while running, under the limit, with dispatchable work.
    /// Transitions to `Idle` when both conditions die out.
    fn pump(&self) {
        loop {
            let task = {
                let mut state = self.state();
                if state.phase != Phase::Running {
                    return;
                }
                if state.in_flight >= self.shared.limit {
                    return;
                }
                let popped = if let Some(task) = state.asap.pop_front() {
                    Some(task)
                } else {
                    state.ready.pop_front()
                };
                match popped {
                    Some(task) => {
                        state.in_flight += 1;
                        task
                    }
                    None => {
                        if state.in_flight == 0 {
                            state.phase = Phase::Idle;
                            let waiters = std::mem::take(&mut state.idle_waiters);
                            drop(state);
                            tracing::debug!("scheduler idle");
                            for waiter in waiters {
                                let _ = waiter.send(());
                            }
                        }
                        return;
                    }
                }
            };

            let future = task(TaskFate::Start(Arc::clone(&self.shared.context)));
            let scheduler = self.clone();
            tokio::spawn(async move {
                future.await;
                scheduler.task_finished();
            });
        }
    }

    fn task_finished(&self) {
        let mut state = self.state();
        state.in_flight -= 1;
        match state.phase {
            Phase::Stopping => {
                if state.in_flight == 0 {
                    state.phase = Phase::Done;
                    let waiters = std::mem::take(&mut state.done_waiters);
                    drop(state);
                    tracing::debug!("scheduler done");
                    for waiter in waiters {
                        let _ = waiter.send(());
                    }
                }
            }
            Phase::Running => {
                drop(state);
                self.pump();
            }
            Phase::Idle | Phase::Done => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Context that tracks the high-water mark of concurrent tasks.
    #[derive(Default)]
    struct Probe {
        current: AtomicUsize,
        max: AtomicUsize,
    }

    impl Probe {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn in_flight_never_exceeds_limit() {
        let scheduler = TaskScheduler::with_concurrency(Probe::default(), 8);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                scheduler.submit(Priority::Normal, |probe: Arc<Probe>| async move {
                    probe.enter();
                    sleep(Duration::from_millis(10)).await;
                    probe.exit();
                    Ok(())
                })
            })
            .collect();

        scheduler.idle().await;

        for handle in handles {
            handle.join().await.unwrap();
        }
        assert!(scheduler.context().max.load(Ordering::SeqCst) <= 8);
        assert_eq!(scheduler.status().phase, Phase::Idle);
        assert_eq!(scheduler.status().in_flight, 0);
    }

    #[tokio::test]
    async fn idle_fires_only_after_all_tasks_settle() {
        let scheduler = TaskScheduler::with_concurrency(Probe::default(), 8);
        let settled = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let settled = Arc::clone(&settled);
            scheduler.submit(Priority::Normal, move |_| async move {
                sleep(Duration::from_millis(5)).await;
                settled.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        scheduler.idle().await;
        assert_eq!(settled.load(Ordering::SeqCst), 20);
    }

    /// Shared log recording task start order.
    type Log = Mutex<Vec<&'static str>>;

    #[tokio::test]
    async fn high_priority_starts_before_pending_ready_work() {
        let scheduler: TaskScheduler<Log> =
            TaskScheduler::with_concurrency(Mutex::new(Vec::new()), 1);
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let first = scheduler.submit(Priority::Normal, move |log: Arc<Log>| async move {
            log.lock().unwrap().push("first");
            let _ = gate_rx.await;
            Ok(())
        });
        let r1 = scheduler.submit(Priority::Normal, |log: Arc<Log>| async move {
            log.lock().unwrap().push("r1");
            Ok(())
        });
        let r2 = scheduler.submit(Priority::Normal, |log: Arc<Log>| async move {
            log.lock().unwrap().push("r2");
            Ok(())
        });
        let urgent = scheduler.submit(Priority::High, |log: Arc<Log>| async move {
            log.lock().unwrap().push("urgent");
            Ok(())
        });

        let _ = gate_tx.send(());
        scheduler.idle().await;

        for handle in [first, r1, r2, urgent] {
            handle.join().await.unwrap();
        }
        let order = scheduler.context().lock().unwrap().clone();
        assert_eq!(order, vec!["first", "urgent", "r1", "r2"]);
    }

    #[tokio::test]
    async fn equal_priority_starts_in_submission_order() {
        let scheduler: TaskScheduler<Log> =
            TaskScheduler::with_concurrency(Mutex::new(Vec::new()), 1);

        for label in ["a", "b", "c"] {
            scheduler.submit(Priority::Normal, move |log: Arc<Log>| async move {
                log.lock().unwrap().push(label);
                Ok(())
            });
        }
        scheduler.idle().await;

        let order = scheduler.context().lock().unwrap().clone();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn blocked_tasks_wait_for_unblock() {
        let scheduler = TaskScheduler::new(());
        let ran = Arc::new(AtomicUsize::new(0));

        let ran_in_task = Arc::clone(&ran);
        let handle = scheduler.submit(Priority::Low, move |_| async move {
            ran_in_task.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // Blocked work alone leaves the scheduler idle.
        scheduler.idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.status().queued_blocked, 1);

        scheduler.unblock();
        scheduler.idle().await;
        handle.join().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_discards_queued_tasks_and_drains() {
        let scheduler = TaskScheduler::with_concurrency((), 1);
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        let running = scheduler.submit(Priority::Normal, move |_| async move {
            let _ = gate_rx.await;
            Ok(())
        });
        let queued: Vec<_> = (0..3)
            .map(|_| scheduler.submit(Priority::Normal, |_| async move { Ok(()) }))
            .collect();
        let blocked = scheduler.submit(Priority::Low, |_| async move { Ok(()) });

        scheduler.stop();
        assert_eq!(scheduler.status().phase, Phase::Stopping);
        scheduler.stopped().await;

        for handle in queued {
            assert!(matches!(handle.join().await, Err(TaskError::Discarded)));
        }
        assert!(matches!(blocked.join().await, Err(TaskError::Discarded)));

        // The in-flight task is not interrupted; Done arrives once it ends.
        let _ = gate_tx.send(());
        scheduler.done().await;
        running.join().await.unwrap();
        assert_eq!(scheduler.status().phase, Phase::Done);
    }

    #[tokio::test]
    async fn stop_while_idle_is_done_immediately() {
        let scheduler = TaskScheduler::new(());
        scheduler.stop();
        assert_eq!(scheduler.status().phase, Phase::Done);
        scheduler.stopped().await;
        scheduler.done().await;

        // Idempotent.
        scheduler.stop();
        assert_eq!(scheduler.status().phase, Phase::Done);
    }

    #[tokio::test]
    #[should_panic(expected = "submit on a scheduler")]
    async fn submit_after_stop_panics() {
        let scheduler = TaskScheduler::new(());
        scheduler.stop();
        let _ = scheduler.submit(Priority::Normal, |_| async move { Ok(()) });
    }

    #[tokio::test]
    async fn task_failure_is_isolated() {
        let scheduler = TaskScheduler::with_concurrency((), 2);

        let failing = scheduler.submit::<_, _, ()>(Priority::Normal, |_| async move {
            anyhow::bail!("markup transform failed")
        });
        let fine = scheduler.submit(Priority::Normal, |_| async move { Ok(42) });

        assert!(matches!(failing.join().await, Err(TaskError::Failed(_))));
        assert_eq!(fine.join().await.unwrap(), 42);

        scheduler.idle().await;
        assert_eq!(scheduler.status().phase, Phase::Idle);

        // The scheduler keeps accepting work after a failure.
        let again = scheduler.submit(Priority::Normal, |_| async move { Ok(1) });
        assert_eq!(again.join().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn task_panic_is_isolated() {
        let scheduler = TaskScheduler::with_concurrency((), 2);

        let panicking = scheduler.submit(Priority::Normal, |_| async move {
            if 1 + 1 == 2 {
                panic!("boom");
            }
            Ok(())
        });
        let fine = scheduler.submit(Priority::Normal, |_| async move { Ok("ok") });

        assert!(matches!(panicking.join().await, Err(TaskError::Abandoned)));
        assert_eq!(fine.join().await.unwrap(), "ok");

        scheduler.idle().await;
        assert_eq!(scheduler.status().in_flight, 0);
    }

    #[tokio::test]
    async fn idle_rearms_for_each_cycle() {
        let scheduler = TaskScheduler::new(());

        scheduler.submit(Priority::Normal, |_| async move { Ok(()) });
        scheduler.idle().await;
        assert_eq!(scheduler.status().phase, Phase::Idle);

        scheduler.submit(Priority::Normal, |_| async move { Ok(()) });
        scheduler.idle().await;
        assert_eq!(scheduler.status().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn status_reports_queue_depths() {
        let scheduler = TaskScheduler::with_concurrency((), 1);
        let (gate_tx, gate_rx) = oneshot::channel::<()>();

        scheduler.submit(Priority::Normal, move |_| async move {
            let _ = gate_rx.await;
            Ok(())
        });
        scheduler.submit(Priority::High, |_| async move { Ok(()) });
        scheduler.submit(Priority::Normal, |_| async move { Ok(()) });
        scheduler.submit(Priority::Low, |_| async move { Ok(()) });

        let status = scheduler.status();
        assert_eq!(status.phase, Phase::Running);
        assert_eq!(status.in_flight, 1);
        assert_eq!(status.queued_asap, 1);
        assert_eq!(status.queued_ready, 1);
        assert_eq!(status.queued_blocked, 1);

        let _ = gate_tx.send(());
        scheduler.idle().await;
        assert_eq!(scheduler.status().queued_blocked, 1);
    }
}
