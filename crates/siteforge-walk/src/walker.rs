//! Deterministic, cycle-safe directory traversal.
//!
//! Symlinks and hard links turn a directory tree into a graph: one resource
//! may have several names, and a link may point back up the tree. The walker
//! keeps two addresses for every entry to stay safe in that graph:
//!
//! - the **real path** — canonical, symlink-resolved, used only for identity
//!   and cycle checks;
//! - the **virtual path** — the literal segment names traversed, which stays
//!   stable no matter how many link hops were taken to reach the target.
//!
//! Entry names are sorted before processing, so the emitted sequence is
//! fully determined by the tree snapshot, never by the backend's listing
//! order.

use crate::{Exclude, FsEntryKind, WalkError, WalkFs, WalkMetrics};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Kind of a discovered entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One discovered filesystem object.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// Kind of entry.
    pub kind: EntryKind,
    /// Canonical, symlink-resolved path. Identity only.
    pub real_path: PathBuf,
    /// Logical path built from the literal names traversed, rooted at `/`.
    pub virtual_path: String,
}

/// Callback invoked for every surviving directory and file.
pub type EntryFn = Box<dyn FnMut(WalkEntry) + Send>;

/// Options for one walk.
#[derive(Default)]
pub struct WalkOptions {
    /// Exclusion predicate, consulted before any entry is descended into or
    /// emitted. Defaults to skipping dot-prefixed names.
    pub exclude: Exclude,
    /// Receiver for discovered entries. Directories are delivered before
    /// their contents are listed.
    pub on_entry: Option<EntryFn>,
}

impl fmt::Debug for WalkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkOptions")
            .field("exclude", &self.exclude)
            .field("on_entry", &self.on_entry.as_ref().map(|_| "..."))
            .finish()
    }
}

/// Handle to a walk in progress.
pub struct WalkHandle {
    task: JoinHandle<Result<WalkMetrics, WalkError>>,
    abort_tx: Mutex<Option<oneshot::Sender<String>>>,
}

impl WalkHandle {
    /// Abort the walk. `done` fails with [`WalkError::Aborted`] carrying the
    /// reason; entries already delivered are not retracted.
    pub fn abort(&self, reason: impl Into<String>) {
        let mut slot = self
            .abort_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = slot.take() {
            let _ = tx.send(reason.into());
        }
    }

    /// Wait for the walk to finish and return its final metrics.
    pub async fn done(self) -> Result<WalkMetrics, WalkError> {
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(WalkError::Aborted(format!("walk task failed: {err}"))),
        }
    }
}

/// Cycle-safe traversal over a [`WalkFs`].
#[derive(Clone)]
pub struct Walker {
    fs: Arc<dyn WalkFs>,
}

impl Walker {
    pub fn new(fs: Arc<dyn WalkFs>) -> Self {
        Self { fs }
    }

    /// Start walking at `root`, which must be a directory.
    ///
    /// The walk runs on its own task; discovery begins immediately whether
    /// or not the returned handle is awaited.
    pub fn walk(&self, root: impl Into<PathBuf>, options: WalkOptions) -> WalkHandle {
        let fs = Arc::clone(&self.fs);
        let root = root.into();
        let (abort_tx, abort_rx) = oneshot::channel::<String>();

        let task = tokio::spawn(async move {
            let walk = run_walk(fs, root, options);
            tokio::pin!(walk);
            tokio::select! {
                result = &mut walk => result,
                reason = abort_rx => match reason {
                    Ok(reason) => Err(WalkError::Aborted(reason)),
                    // Handle dropped without aborting: finish the walk.
                    Err(_) => walk.await,
                },
            }
        });

        WalkHandle {
            task,
            abort_tx: Mutex::new(Some(abort_tx)),
        }
    }
}

#[tracing::instrument(level = "debug", skip(fs, options), fields(root = %root.display()))]
async fn run_walk(
    fs: Arc<dyn WalkFs>,
    root: PathBuf,
    mut options: WalkOptions,
) -> Result<WalkMetrics, WalkError> {
    let mut metrics = WalkMetrics::default();

    let root_real = match fs.canonicalize(&root).await {
        Ok(path) => path,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(WalkError::NotADirectory(root));
        }
        Err(source) => return Err(WalkError::Io { path: root, source }),
    };
    metrics.stat_calls += 1;
    match fs.stat(&root_real).await {
        Ok(FsEntryKind::Directory) => {}
        Ok(_) => return Err(WalkError::NotADirectory(root)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(WalkError::NotADirectory(root));
        }
        Err(source) => return Err(WalkError::Io { path: root, source }),
    }

    let mut visited: HashSet<PathBuf> = HashSet::new();
    visited.insert(root_real.clone());

    let mut pending: VecDeque<(PathBuf, String)> = VecDeque::new();
    pending.push_back((root_real, String::from("/")));

    while let Some((dir_real, dir_virtual)) = pending.pop_front() {
        let mut names = match fs.list_dir(&dir_real).await {
            Ok(names) => names,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %dir_real.display(), "directory vanished mid-walk");
                continue;
            }
            Err(source) => {
                return Err(WalkError::Io {
                    path: dir_real,
                    source,
                });
            }
        };
        metrics.directories_read += 1;

        // Code-point order. Without this, a directory holding both a file
        // and a symlink to that file could surface either name first
        // depending on the backend's listing order.
        names.sort_unstable();

        'entries: for name in names {
            metrics.entries_scanned += 1;
            let virtual_path = join_virtual(&dir_virtual, &name);
            let mut real = dir_real.join(&name);

            if options.exclude.check(&path_str(&real)) {
                continue;
            }

            metrics.stat_calls += 1;
            let mut kind = match fs.stat(&real).await {
                Ok(kind) => kind,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!(path = %real.display(), "entry vanished mid-walk");
                    continue;
                }
                Err(source) => return Err(WalkError::Io { path: real, source }),
            };

            // Resolve symlinks down to a real target. Identity checks use
            // the resolved path; the virtual path keeps the literal name
            // that was encountered.
            while kind == FsEntryKind::Symlink {
                metrics.symlinks_resolved += 1;
                real = match fs.resolve_link(&real).await {
                    Ok(target) => target,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        tracing::warn!(path = %real.display(), "dangling symlink");
                        continue 'entries;
                    }
                    Err(source) => return Err(WalkError::Io { path: real, source }),
                };
                if options.exclude.check(&path_str(&real)) || visited.contains(&real) {
                    continue 'entries;
                }
                metrics.stat_calls += 1;
                kind = match fs.stat(&real).await {
                    Ok(kind) => kind,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        tracing::warn!(path = %real.display(), "symlink target vanished mid-walk");
                        continue 'entries;
                    }
                    Err(source) => return Err(WalkError::Io { path: real, source }),
                };
            }

            if kind == FsEntryKind::Directory {
                let mut with_sep = path_str(&real);
                with_sep.push('/');
                if options.exclude.check(&with_sep) {
                    continue;
                }
                if !visited.insert(real.clone()) {
                    continue;
                }
                deliver(
                    &mut options,
                    WalkEntry {
                        kind: EntryKind::Directory,
                        real_path: real.clone(),
                        virtual_path: virtual_path.clone(),
                    },
                );
                pending.push_back((real, virtual_path));
            } else {
                if !visited.insert(real.clone()) {
                    continue;
                }
                metrics.files_emitted += 1;
                deliver(
                    &mut options,
                    WalkEntry {
                        kind: EntryKind::File,
                        real_path: real,
                        virtual_path,
                    },
                );
            }
        }
    }

    tracing::debug!(
        directories = metrics.directories_read,
        files = metrics.files_emitted,
        "walk complete"
    );
    Ok(metrics)
}

fn deliver(options: &mut WalkOptions, entry: WalkEntry) {
    if let Some(on_entry) = options.on_entry.as_mut() {
        on_entry(entry);
    }
}

fn join_virtual(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
