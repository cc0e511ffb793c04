//! Inode management for the FUSE filesystem.
//!
//! Maps FUSE inode numbers to view paths and back, with the `nlookup`
//! reference counting the kernel expects: `lookup` increments, `readdir`
//! entries do not, `forget` decrements and evicts at zero. The root inode
//! is pre-allocated and never evicted.
//!
//! The session loop is single-threaded, so plain maps suffice.

use std::collections::HashMap;

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
struct InodeEntry {
    path: String,
    /// Lookup count for `forget()` handling. The kernel may hold an inode in
    /// its dcache long after the last open; eviction is only safe at zero.
    nlookup: u64,
}

/// Bidirectional table between inodes and view paths.
#[derive(Debug)]
pub struct InodeTable {
    by_ino: HashMap<u64, InodeEntry>,
    by_path: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    /// Creates a table with the root path pre-allocated at [`ROOT_INODE`].
    pub fn new() -> Self {
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_ino.insert(
            ROOT_INODE,
            InodeEntry {
                path: "/".to_string(),
                nlookup: 1,
            },
        );
        by_path.insert("/".to_string(), ROOT_INODE);
        InodeTable {
            by_ino,
            by_path,
            next: ROOT_INODE + 1,
        }
    }

    /// Returns the view path for an inode.
    pub fn path(&self, ino: u64) -> Option<&str> {
        self.by_ino.get(&ino).map(|e| e.path.as_str())
    }

    /// Allocates (or finds) the inode for `path` and increments its lookup
    /// count. Used by `lookup`.
    pub fn get_or_insert(&mut self, path: &str) -> u64 {
        let ino = self.peek_or_insert(path);
        if let Some(entry) = self.by_ino.get_mut(&ino) {
            entry.nlookup += 1;
        }
        ino
    }

    /// Allocates (or finds) the inode for `path` WITHOUT touching the lookup
    /// count. Per the FUSE protocol, entries surfaced through `readdir` do
    /// not acquire a lookup reference.
    pub fn peek_or_insert(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.by_ino.insert(
            ino,
            InodeEntry {
                path: path.to_string(),
                nlookup: 0,
            },
        );
        self.by_path.insert(path.to_string(), ino);
        ino
    }

    /// Decrements the lookup count by `nlookup`, evicting the inode when it
    /// reaches zero. The root inode is never evicted. Returns whether the
    /// inode was evicted.
    pub fn forget(&mut self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        let Some(entry) = self.by_ino.get_mut(&ino) else {
            return false;
        };
        entry.nlookup = entry.nlookup.saturating_sub(nlookup);
        if entry.nlookup == 0 {
            let path = entry.path.clone();
            self.by_ino.remove(&ino);
            self.by_path.remove(&path);
            true
        } else {
            false
        }
    }

    /// Number of inodes currently in the table.
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    /// Returns true if only the root inode remains.
    pub fn is_empty(&self) -> bool {
        self.by_ino.len() == 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins a directory's view path with an entry name.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// The view path of a path's parent directory.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}
