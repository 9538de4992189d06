//! The exclusion predicate the walker consults.
//!
//! The walker treats exclusion as opaque: it hands the predicate an absolute
//! real path (directories carry a trailing `/`) and skips the entry when the
//! predicate answers true. Glob matching, ignore files, and similar policies
//! live entirely on the caller's side of this seam.

use std::fmt;
use std::sync::Arc;

/// An exclusion predicate over absolute path strings.
///
/// Directories are tested with a trailing `/`, files without one. The
/// default excludes any entry whose final segment starts with a dot.
#[derive(Clone)]
pub struct Exclude(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl Exclude {
    /// Wrap an arbitrary predicate.
    pub fn new(f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Exclude entries whose final path segment starts with `.`.
    pub fn dotfiles() -> Self {
        Self::new(|path| final_segment(path).starts_with('.'))
    }

    /// Exclude nothing.
    pub fn nothing() -> Self {
        Self::new(|_| false)
    }

    /// Test a path against the predicate.
    pub fn check(&self, path: &str) -> bool {
        (self.0)(path)
    }
}

impl Default for Exclude {
    fn default() -> Self {
        Self::dotfiles()
    }
}

impl fmt::Debug for Exclude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Exclude").field(&"...").finish()
    }
}

/// Final segment of a path string, ignoring a trailing separator.
fn final_segment(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}
