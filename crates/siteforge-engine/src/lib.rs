//! siteforge-engine: the build engine core of siteforge.
//!
//! This crate provides:
//!
//! - **Scheduler**: bounded-concurrency task execution with priority tiers
//!   and an idle/stop/done lifecycle
//! - **Pipeline**: the walk-then-drain phase driver that turns discovered
//!   files into scheduled units of work
//!
//! Content transforms, CLI parsing, and output formatting are external
//! collaborators; they consume this crate through two contracts — "submit
//! this unit of work" and "here is a discovered file."

pub mod pipeline;
pub mod scheduler;

pub use pipeline::{PhaseError, PhaseReport, Pipeline};
pub use scheduler::{
    DEFAULT_CONCURRENCY, Phase, Priority, SchedulerStatus, TaskError, TaskHandle, TaskScheduler,
};

// Walker types, re-exported for embedders driving phases directly.
pub use siteforge_walk::{
    EntryKind, Exclude, FsEntryKind, Listing, LocalFs, MemoryFs, WalkEntry, WalkError, WalkFs,
    WalkHandle, WalkMetrics, WalkOptions, Walker,
};
