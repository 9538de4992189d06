//! Counters describing one completed walk.

use serde::{Deserialize, Serialize};

/// A snapshot of the work a walk performed.
///
/// Created when the walk starts, mutated throughout, and returned once the
/// pending queue drains. All counters are monotonic within one walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkMetrics {
    /// Directory listings performed.
    pub directories_read: u64,
    /// Entries scanned across all listings.
    pub entries_scanned: u64,
    /// Stat calls made.
    pub stat_calls: u64,
    /// Symlink resolutions performed.
    pub symlinks_resolved: u64,
    /// Files delivered to the entry callback.
    pub files_emitted: u64,
}
