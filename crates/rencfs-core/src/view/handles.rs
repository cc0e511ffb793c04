//! Open-handle table: maps handle ids to a backing file and its per-file
//! key.
//!
//! Keys are cached per *handle*, never per path: a file modified between
//! opens must derive a fresh key on the next open (encrypt side) or fail
//! authentication (decrypt side). A path-keyed cache would serve stale keys.
//!
//! The mount loop is single-threaded by contract, so a plain `HashMap` is
//! enough; a multithreaded variant would need a lock here and per-handle
//! read serialization (the entries share their file descriptor's seek
//! position).

use std::collections::HashMap;
use std::fs::File;

use crate::crypto::keys::FileKey;

/// An open backing file together with its derived per-file key.
///
/// The key is fixed for the lifetime of the handle and consistent with the
/// file's content at open time.
#[derive(Debug)]
pub struct OpenFile {
    pub file: File,
    pub key: FileKey,
}

/// Handle table with auto-incrementing ids.
///
/// Ids start at 1; 0 is reserved for the invalid handle.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: HashMap<u64, OpenFile>,
    next_id: u64,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Inserts an open file and returns its handle id.
    pub fn insert(&mut self, open: OpenFile) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, open);
        id
    }

    pub fn get_mut(&mut self, fh: u64) -> Option<&mut OpenFile> {
        self.entries.get_mut(&fh)
    }

    /// Removes and returns the entry; dropping it closes the backing file.
    pub fn remove(&mut self, fh: u64) -> Option<OpenFile> {
        self.entries.remove(&fh)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
