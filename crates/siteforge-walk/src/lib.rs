//! siteforge-walk: Cycle-safe async filesystem walking.
//!
//! Provides:
//! - **WalkFs**: a minimal read-only filesystem trait the walker traverses
//! - **LocalFs**: real-filesystem backend over `tokio::fs`
//! - **MemoryFs**: in-memory backend with symlink support, for tests and dry runs
//! - **Walker**: deterministic, duplicate-free traversal of trees that may
//!   contain symlink cycles and aliased names
//! - **Exclude**: the opaque exclusion predicate the walker consults
//! - **WalkMetrics**: counters describing one completed walk
//!
//! The walker is generic over `WalkFs`, so consumers can adapt their own
//! filesystem abstraction. Identity and cycle checks always use canonical
//! *real* paths; the caller-facing namespace is built from *virtual* paths,
//! the literal segment names traversed.
#![feature(io_error_more)]

mod exclude;
mod local;
mod memory;
mod metrics;
mod walker;

pub use exclude::Exclude;
pub use local::LocalFs;
pub use memory::{Listing, MemoryFs};
pub use metrics::WalkMetrics;
pub use walker::{EntryFn, EntryKind, WalkEntry, WalkHandle, WalkOptions, Walker};

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that terminate a walk.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The walk root does not exist or is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    /// The walk was aborted through its handle.
    #[error("walk aborted: {0}")]
    Aborted(String),
    /// A filesystem operation failed for a reason other than a concurrent
    /// removal. Concurrent removals are swallowed; everything else is fatal.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a single stat call reports, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEntryKind {
    File,
    Directory,
    Symlink,
}

/// Minimal read-only filesystem abstraction for the walker.
///
/// Implement this trait to adapt a project's filesystem layer (real FS,
/// in-memory fixture, overlay, ...) to [`Walker`].
///
/// `list_dir` may return names in any order — the walker sorts them itself,
/// so traversal order never depends on the backend's listing order.
#[async_trait]
pub trait WalkFs: Send + Sync {
    /// List the entry names in a directory.
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Stat a path without following a final-component symlink.
    async fn stat(&self, path: &Path) -> io::Result<FsEntryKind>;

    /// Resolve a symlink to its target's canonical real path.
    ///
    /// `path` must currently stat as [`FsEntryKind::Symlink`]. A dangling
    /// link reports `ErrorKind::NotFound`; a cyclic link chain reports
    /// `ErrorKind::FilesystemLoop`.
    async fn resolve_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Canonical real path of an existing path, following symlinks.
    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}
