//! Per-handle and per-inode state for open remote files.
//!
//! One [`OpenFile`] exists per successful open, shared by every descriptor
//! alias created from it; one [`InodeState`] exists per distinct remote
//! inode, shared by every open handle on that inode. The two maps are
//! guarded by independent reader/writer locks that are never held together;
//! an `OpenFile` keeps its inode alive through an `Arc`, so no lookup can
//! observe a handle whose inode is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use cfs_types::{HandleId, InodeId};
use parking_lot::RwLock;

/// Policy classification of an open file, derived from its basename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    BinLog,
    RedoLog,
    RelayLog,
}

const BIN_LOG_PREFIX: &str = "mysql-bin.";
const REDO_LOG_PREFIX: &str = "ib_logfile";
const RELAY_LOG_PREFIX: &str = "relay-bin.";

impl FileKind {
    /// Classify by basename prefix.
    pub fn classify(path: &str) -> FileKind {
        let name = path.rsplit('/').next().unwrap_or(path);
        if name.starts_with(BIN_LOG_PREFIX) {
            FileKind::BinLog
        } else if name.starts_with(REDO_LOG_PREFIX) {
            FileKind::RedoLog
        } else if name.starts_with(RELAY_LOG_PREFIX) {
            FileKind::RelayLog
        } else {
            FileKind::Regular
        }
    }
}

/// State shared by all open handles on one remote inode.
#[derive(Debug)]
pub struct InodeState {
    pub ino: InodeId,
    /// Open handles referencing this inode.
    open_refs: AtomicI32,
}

impl InodeState {
    fn new(ino: InodeId) -> Self {
        Self {
            ino,
            open_refs: AtomicI32::new(0),
        }
    }

    pub fn open_refs(&self) -> i32 {
        self.open_refs.load(Ordering::Acquire)
    }
}

/// State for one open remote file.
///
/// `pos` and `dup_ref` are shared by racing descriptor aliases; both are
/// atomics, giving at-least-no-corruption for concurrent updates. POSIX does
/// not promise more for a shared file offset.
#[derive(Debug)]
pub struct OpenFile {
    pub handle: HandleId,
    pub flags: i32,
    pub kind: FileKind,
    pub inode: Arc<InodeState>,
    pos: AtomicI64,
    dup_ref: AtomicI32,
}

impl OpenFile {
    pub fn pos(&self) -> i64 {
        self.pos.load(Ordering::Relaxed)
    }

    pub fn set_pos(&self, value: i64) {
        self.pos.store(value, Ordering::Relaxed);
    }

    /// Advance the offset by `delta`, returning the offset the operation
    /// started at.
    pub fn advance_pos(&self, delta: i64) -> i64 {
        self.pos.fetch_add(delta, Ordering::Relaxed)
    }

    pub fn dup_ref(&self) -> i32 {
        self.dup_ref.load(Ordering::Acquire)
    }

    /// Account one more descriptor alias.
    pub fn incr_dup(&self) {
        self.dup_ref.fetch_add(1, Ordering::AcqRel);
    }
}

/// What [`FileTable::release`] did.
#[derive(Debug)]
pub enum ReleaseOutcome {
    /// The handle is unknown.
    NotOpen,
    /// Another alias still references the handle.
    Retained,
    /// The last alias closed: the handle is out of the table and the remote
    /// side must now be flushed/closed by the caller. `inode_released` is
    /// set when this was also the inode's last open handle.
    Closed {
        file: Arc<OpenFile>,
        inode_released: bool,
    },
}

/// The fd→handle and ino→inode maps.
pub struct FileTable {
    files: RwLock<HashMap<HandleId, Arc<OpenFile>>>,
    inodes: RwLock<HashMap<InodeId, Arc<InodeState>>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            inodes: RwLock::new(HashMap::new()),
        }
    }

    /// Record a fresh open. The inode entry is created (or its refcount
    /// raised) first, then the file entry; the two locks are taken in
    /// sequence, never together.
    pub fn insert(
        &self,
        handle: HandleId,
        flags: i32,
        kind: FileKind,
        ino: InodeId,
        pos: i64,
    ) -> Arc<OpenFile> {
        let inode = {
            let mut inodes = self.inodes.write();
            let entry = inodes
                .entry(ino)
                .or_insert_with(|| Arc::new(InodeState::new(ino)));
            entry.open_refs.fetch_add(1, Ordering::AcqRel);
            entry.clone()
        };

        let file = Arc::new(OpenFile {
            handle,
            flags,
            kind,
            inode,
            pos: AtomicI64::new(pos),
            dup_ref: AtomicI32::new(1),
        });
        self.files.write().insert(handle, file.clone());
        file
    }

    pub fn get(&self, handle: HandleId) -> Option<Arc<OpenFile>> {
        self.files.read().get(&handle).cloned()
    }

    /// Drop one descriptor reference from `handle`, tearing the entry (and,
    /// for the inode's last handle, the inode entry) down when it was the
    /// last one.
    pub fn release(&self, handle: HandleId) -> ReleaseOutcome {
        let closed = {
            let mut files = self.files.write();
            let Some(file) = files.get(&handle) else {
                return ReleaseOutcome::NotOpen;
            };
            // fetch_sub returns the previous value; 1 means we were last.
            if file.dup_ref.fetch_sub(1, Ordering::AcqRel) > 1 {
                return ReleaseOutcome::Retained;
            }
            files.remove(&handle).expect("entry present under write lock")
        };

        let inode_released = {
            let mut inodes = self.inodes.write();
            let last = closed.inode.open_refs.fetch_sub(1, Ordering::AcqRel) == 1;
            if last {
                inodes.remove(&closed.inode.ino);
            }
            last
        };

        ReleaseOutcome::Closed {
            file: closed,
            inode_released,
        }
    }

    pub fn open_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn inode_count(&self) -> usize {
        self.inodes.read().len()
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}
