//! In-memory filesystem implementation.
//!
//! Used for tests and dry runs. Unlike a real filesystem it hands out its
//! directory listings in a configurable order, which lets tests prove that
//! traversal order never depends on listing order.

use super::{FsEntryKind, WalkFs};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Symlink chains longer than this are treated as cycles.
const MAX_LINK_HOPS: usize = 40;

/// Order in which `list_dir` returns entry names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Listing {
    /// Ascending code-point order.
    #[default]
    Sorted,
    /// Descending code-point order.
    Reversed,
    /// Whatever order the internal map yields.
    Unsorted,
}

/// A node in the memory filesystem.
#[derive(Debug, Clone)]
enum Node {
    File,
    Directory,
    Symlink { target: PathBuf },
}

/// In-memory filesystem with symlink support.
///
/// Thread-safe via internal `RwLock`. Paths may be given absolute or
/// relative; canonical paths handed back are always absolute.
#[derive(Debug)]
pub struct MemoryFs {
    nodes: RwLock<HashMap<PathBuf, Node>>,
    listing: RwLock<Listing>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFs {
    /// Create a new filesystem containing only the root directory.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(PathBuf::new(), Node::Directory);
        Self {
            nodes: RwLock::new(nodes),
            listing: RwLock::new(Listing::default()),
        }
    }

    /// Choose the order `list_dir` returns names in.
    pub fn set_listing(&self, listing: Listing) {
        *self
            .listing
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listing;
    }

    /// Add a file, creating parent directories as needed.
    pub fn add_file(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), Node::File);
    }

    /// Add a directory, creating parent directories as needed.
    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.insert(path.as_ref(), Node::Directory);
    }

    /// Add a symlink pointing at `target`, creating parent directories as
    /// needed. Relative targets are resolved against the link's parent.
    pub fn add_symlink(&self, path: impl AsRef<Path>, target: impl Into<PathBuf>) {
        self.insert(
            path.as_ref(),
            Node::Symlink {
                target: target.into(),
            },
        );
    }

    /// Remove a node, leaving any children dangling. Tests use this to
    /// simulate a concurrent deletion mid-walk.
    pub fn remove(&self, path: impl AsRef<Path>) {
        let key = normalize(path.as_ref());
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    fn insert(&self, path: &Path, node: Node) {
        let key = normalize(path);
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        let mut parent = PathBuf::new();
        for component in key.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                parent.push(s);
                nodes.entry(parent.clone()).or_insert(Node::Directory);
            }
        }
        nodes.insert(key, node);
    }
}

/// Normalize a path: strip the root, resolve `.` and `..` lexically.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(s) => result.push(s),
        }
    }
    result
}

/// Turn a normalized relative key back into an absolute path.
fn absolute(key: &Path) -> PathBuf {
    PathBuf::from("/").join(key)
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("not found: {}", path.display()),
    )
}

/// Segment names of a path, keeping `..` for in-loop resolution.
fn segments(path: &Path) -> Vec<PathBuf> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(s) => Some(PathBuf::from(s)),
            Component::ParentDir => Some(PathBuf::from("..")),
            _ => None,
        })
        .collect()
}

/// Resolve a path to its canonical key, following symlinks component by
/// component. Chains longer than `MAX_LINK_HOPS` report `FilesystemLoop`.
fn canonical_key(nodes: &HashMap<PathBuf, Node>, path: &Path) -> io::Result<PathBuf> {
    let mut queue = segments(path);
    queue.reverse();
    let mut resolved = PathBuf::new();
    let mut hops = 0usize;

    while let Some(segment) = queue.pop() {
        if segment.as_os_str() == ".." {
            resolved.pop();
            continue;
        }
        resolved.push(&segment);
        match nodes.get(&resolved) {
            Some(Node::Symlink { target }) => {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return Err(io::Error::new(
                        io::ErrorKind::FilesystemLoop,
                        format!("too many symlink hops resolving {}", path.display()),
                    ));
                }
                let target_abs = if target.is_absolute() {
                    target.clone()
                } else {
                    resolved.pop();
                    absolute(&resolved).join(target)
                };
                queue.extend(segments(&target_abs).into_iter().rev());
                resolved = PathBuf::new();
            }
            Some(_) => {}
            None => return Err(not_found(path)),
        }
    }
    Ok(resolved)
}

#[async_trait]
impl WalkFs for MemoryFs {
    async fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let key = normalize(path);
        let nodes = self
            .nodes
            .read()
            .map_err(|_| io::Error::other("lock poisoned"))?;

        match nodes.get(&key) {
            Some(Node::Directory) => {}
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("not a directory: {}", path.display()),
                ));
            }
            None => return Err(not_found(path)),
        }

        let mut names: Vec<String> = nodes
            .keys()
            .filter(|entry| entry.parent() == Some(key.as_path()) && *entry != &key)
            .filter_map(|entry| entry.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();

        match *self
            .listing
            .read()
            .map_err(|_| io::Error::other("lock poisoned"))?
        {
            Listing::Sorted => names.sort_unstable(),
            Listing::Reversed => {
                names.sort_unstable();
                names.reverse();
            }
            Listing::Unsorted => {}
        }
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> io::Result<FsEntryKind> {
        let key = normalize(path);
        let nodes = self
            .nodes
            .read()
            .map_err(|_| io::Error::other("lock poisoned"))?;
        match nodes.get(&key) {
            Some(Node::File) => Ok(FsEntryKind::File),
            Some(Node::Directory) => Ok(FsEntryKind::Directory),
            Some(Node::Symlink { .. }) => Ok(FsEntryKind::Symlink),
            None => Err(not_found(path)),
        }
    }

    async fn resolve_link(&self, path: &Path) -> io::Result<PathBuf> {
        let key = normalize(path);
        let nodes = self
            .nodes
            .read()
            .map_err(|_| io::Error::other("lock poisoned"))?;
        let target = match nodes.get(&key) {
            Some(Node::Symlink { target }) => target.clone(),
            Some(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("not a symlink: {}", path.display()),
                ));
            }
            None => return Err(not_found(path)),
        };

        let target_abs = if target.is_absolute() {
            target
        } else {
            let mut parent = key.clone();
            parent.pop();
            absolute(&parent).join(target)
        };
        canonical_key(&nodes, &target_abs).map(|key| absolute(&key))
    }

    async fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let nodes = self
            .nodes
            .read()
            .map_err(|_| io::Error::other("lock poisoned"))?;
        canonical_key(&nodes, path).map(|key| absolute(&key))
    }
}
