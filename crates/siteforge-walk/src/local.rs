//! Local filesystem backend.
//!
//! Thin adapter over `tokio::fs`. Listings are returned in whatever order
//! the operating system yields them; the walker imposes its own ordering.

use super::{FsEntryKind, WalkFs};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Real-filesystem backend for the walker.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WalkFs for LocalFs {
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> io::Result<FsEntryKind> {
        let meta = fs::symlink_metadata(path).await?;
        if meta.file_type().is_symlink() {
            Ok(FsEntryKind::Symlink)
        } else if meta.is_dir() {
            Ok(FsEntryKind::Directory)
        } else {
            Ok(FsEntryKind::File)
        }
    }

    async fn resolve_link(&self, path: &Path) -> io::Result<PathBuf> {
        // canonicalize follows the whole chain, so one resolution lands on
        // the final target and a cyclic chain reports FilesystemLoop.
        fs::canonicalize(path).await
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path).await
    }
}
