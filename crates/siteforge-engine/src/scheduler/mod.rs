//! Scheduler module for siteforge — bounded-concurrency task execution.
//!
//! This module provides:
//! - **TaskScheduler**: runs submitted units of work under a concurrency
//!   limit, with three priority tiers and an idle/stop/done lifecycle.
//! - **TaskHandle**: settles exactly once with a task's outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TaskScheduler                       │
//! │  asap ──┐                                                │
//! │  ready ─┼─▶ dispatch (in_flight < limit) ─▶ tokio::spawn │
//! │  blocked┘   (never auto-dispatched)                      │
//! │                                                          │
//! │  Idle ──▶ Running ──▶ Stopping ──▶ Done                  │
//! │    ▲         │                                           │
//! │    └─────────┘  (queues empty, in_flight == 0)           │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod pool;
mod task;

pub use pool::{DEFAULT_CONCURRENCY, Phase, SchedulerStatus, TaskScheduler};
pub use task::{Priority, TaskError, TaskHandle};
