//! The SDK trait consumed by the bypass layer.

use cfs_types::{ClientId, HandleId, InodeId};

use crate::types::{ExtentRequest, StatInfo};

/// Operations exposed by the CFS client SDK.
///
/// All methods are blocking: the bypass layer runs on the host
/// application's own threads, inside intercepted libc calls. Methods
/// returning `i64` follow the signed convention (negative `-E` = host errno
/// `E`, non-negative = result); callers normalize through
/// `cfs_types::errno::translate` before anything reaches the application.
pub trait CfsSdk: Send + Sync {
    // ---- Session lifecycle ----

    /// Allocate a new client session.
    fn new_client(&self) -> ClientId;

    /// Set a configuration option on a not-yet-started session.
    fn set_option(&self, id: ClientId, key: &str, value: &str) -> i64;

    /// Start the session (connect to master/metadata nodes).
    fn start_client(&self, id: ClientId) -> i64;

    /// Close the session and release its resources.
    fn close_client(&self, id: ClientId);

    // ---- Path / metadata operations ----

    /// Change the session's working directory (mount-relative path).
    fn chdir(&self, id: ClientId, path: &str) -> i64;

    /// The session's working directory, if one has been established.
    fn getcwd(&self, id: ClientId) -> Option<String>;

    /// Stat a path, filling `stat` on success.
    fn getattr(&self, id: ClientId, path: &str, stat: &mut StatInfo) -> i64;

    /// Apply the attributes selected by `valid` to a path.
    fn setattr(&self, id: ClientId, path: &str, stat: &StatInfo, valid: i32) -> i64;

    /// Open (possibly creating) a file. Non-negative results are the remote
    /// handle number.
    fn open(&self, id: ClientId, path: &str, flags: i32, mode: u32) -> i64;

    /// Flush buffered writes for an open handle.
    fn flush(&self, id: ClientId, handle: HandleId) -> i64;

    /// Close an open handle.
    fn close(&self, id: ClientId, handle: HandleId);

    /// Stat a batch of inodes in one metadata round trip.
    fn batch_get_inodes(&self, id: ClientId, inodes: &[InodeId]) -> Vec<StatInfo>;

    /// Create a directory tree.
    fn mkdirs(&self, id: ClientId, path: &str, mode: u32) -> i64;

    /// Remove an empty directory.
    fn rmdir(&self, id: ClientId, path: &str) -> i64;

    /// Unlink a file.
    fn unlink(&self, id: ClientId, path: &str) -> i64;

    /// Rename an entry. `overwrite` selects replace-vs-noreplace semantics.
    fn rename(&self, id: ClientId, from: &str, to: &str, overwrite: bool) -> i64;

    /// Create a symbolic link at `link_path` pointing at `target`.
    fn symlink(&self, id: ClientId, target: &str, link_path: &str) -> i64;

    /// Create a hard link.
    fn link(&self, id: ClientId, src: &str, dst: &str) -> i64;

    // ---- Data operations ----

    /// Read up to `buf.len()` bytes at `offset`. This is the authoritative,
    /// metadata-mediated read path.
    fn read(&self, id: ClientId, handle: HandleId, buf: &mut [u8], offset: u64) -> i64;

    /// Write `buf` at `offset`.
    fn write(&self, id: ClientId, handle: HandleId, buf: &[u8], offset: u64) -> i64;

    /// Resolve extent locations covering `[offset, offset + count)`, up to
    /// `max` descriptors. Returns an empty vector when the query fails or
    /// nothing is resolved; both mean the caller cannot use the direct read
    /// path for this range.
    fn read_requests(
        &self,
        id: ClientId,
        handle: HandleId,
        count: usize,
        offset: u64,
        max: usize,
    ) -> Vec<ExtentRequest>;
}
