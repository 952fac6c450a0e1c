//! A configurable mock SDK for tests.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use cfs_types::{ClientId, HandleId, InodeId};
use parking_lot::Mutex;

use crate::client::CfsSdk;
use crate::types::{ExtentRequest, StatInfo};

type Handler<Args, Ret> = Box<dyn Fn(Args) -> Ret + Send + Sync>;

/// A mock [`CfsSdk`] whose interesting operations can be overridden with
/// closures. Without a handler installed an operation returns a success
/// default: `open` hands out sequential handle ids, status ops return `0`,
/// `read`/`write` report zero bytes, and the extent query reports no
/// coverage.
pub struct MockSdk {
    next_client: AtomicI64,
    next_handle: AtomicU64,

    pub open_handler: Mutex<Option<Handler<(String, i32, u32), i64>>>,
    pub close_handler: Mutex<Option<Handler<HandleId, ()>>>,
    pub flush_handler: Mutex<Option<Handler<HandleId, i64>>>,
    pub getattr_handler: Mutex<Option<Handler<String, (i64, StatInfo)>>>,
    pub setattr_handler: Mutex<Option<Handler<(String, i32), i64>>>,
    pub chdir_handler: Mutex<Option<Handler<String, i64>>>,
    pub getcwd_handler: Mutex<Option<Handler<(), Option<String>>>>,
    pub read_handler: Mutex<Option<Handler<(HandleId, usize, u64), (i64, Vec<u8>)>>>,
    pub write_handler: Mutex<Option<Handler<(HandleId, Vec<u8>, u64), i64>>>,
    pub read_requests_handler: Mutex<Option<Handler<(HandleId, usize, u64), Vec<ExtentRequest>>>>,
    pub mkdirs_handler: Mutex<Option<Handler<String, i64>>>,
    pub rmdir_handler: Mutex<Option<Handler<String, i64>>>,
    pub unlink_handler: Mutex<Option<Handler<String, i64>>>,
    pub rename_handler: Mutex<Option<Handler<(String, String, bool), i64>>>,
    pub symlink_handler: Mutex<Option<Handler<(String, String), i64>>>,
    pub link_handler: Mutex<Option<Handler<(String, String), i64>>>,
}

impl MockSdk {
    pub fn new() -> Self {
        Self {
            next_client: AtomicI64::new(1),
            next_handle: AtomicU64::new(1),
            open_handler: Mutex::new(None),
            close_handler: Mutex::new(None),
            flush_handler: Mutex::new(None),
            getattr_handler: Mutex::new(None),
            setattr_handler: Mutex::new(None),
            chdir_handler: Mutex::new(None),
            getcwd_handler: Mutex::new(None),
            read_handler: Mutex::new(None),
            write_handler: Mutex::new(None),
            read_requests_handler: Mutex::new(None),
            mkdirs_handler: Mutex::new(None),
            rmdir_handler: Mutex::new(None),
            unlink_handler: Mutex::new(None),
            rename_handler: Mutex::new(None),
            symlink_handler: Mutex::new(None),
            link_handler: Mutex::new(None),
        }
    }

    /// Wrap in an `Arc` for convenient sharing.
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn on_open(&self, f: impl Fn((String, i32, u32)) -> i64 + Send + Sync + 'static) {
        *self.open_handler.lock() = Some(Box::new(f));
    }

    pub fn on_close(&self, f: impl Fn(HandleId) + Send + Sync + 'static) {
        *self.close_handler.lock() = Some(Box::new(f));
    }

    pub fn on_flush(&self, f: impl Fn(HandleId) -> i64 + Send + Sync + 'static) {
        *self.flush_handler.lock() = Some(Box::new(f));
    }

    pub fn on_getattr(
        &self,
        f: impl Fn(String) -> (i64, StatInfo) + Send + Sync + 'static,
    ) {
        *self.getattr_handler.lock() = Some(Box::new(f));
    }

    pub fn on_setattr(&self, f: impl Fn((String, i32)) -> i64 + Send + Sync + 'static) {
        *self.setattr_handler.lock() = Some(Box::new(f));
    }

    pub fn on_chdir(&self, f: impl Fn(String) -> i64 + Send + Sync + 'static) {
        *self.chdir_handler.lock() = Some(Box::new(f));
    }

    pub fn on_getcwd(&self, f: impl Fn(()) -> Option<String> + Send + Sync + 'static) {
        *self.getcwd_handler.lock() = Some(Box::new(f));
    }

    pub fn on_read(
        &self,
        f: impl Fn((HandleId, usize, u64)) -> (i64, Vec<u8>) + Send + Sync + 'static,
    ) {
        *self.read_handler.lock() = Some(Box::new(f));
    }

    pub fn on_write(
        &self,
        f: impl Fn((HandleId, Vec<u8>, u64)) -> i64 + Send + Sync + 'static,
    ) {
        *self.write_handler.lock() = Some(Box::new(f));
    }

    pub fn on_read_requests(
        &self,
        f: impl Fn((HandleId, usize, u64)) -> Vec<ExtentRequest> + Send + Sync + 'static,
    ) {
        *self.read_requests_handler.lock() = Some(Box::new(f));
    }

    pub fn on_mkdirs(&self, f: impl Fn(String) -> i64 + Send + Sync + 'static) {
        *self.mkdirs_handler.lock() = Some(Box::new(f));
    }

    pub fn on_rmdir(&self, f: impl Fn(String) -> i64 + Send + Sync + 'static) {
        *self.rmdir_handler.lock() = Some(Box::new(f));
    }

    pub fn on_unlink(&self, f: impl Fn(String) -> i64 + Send + Sync + 'static) {
        *self.unlink_handler.lock() = Some(Box::new(f));
    }

    pub fn on_rename(
        &self,
        f: impl Fn((String, String, bool)) -> i64 + Send + Sync + 'static,
    ) {
        *self.rename_handler.lock() = Some(Box::new(f));
    }

    pub fn on_symlink(&self, f: impl Fn((String, String)) -> i64 + Send + Sync + 'static) {
        *self.symlink_handler.lock() = Some(Box::new(f));
    }

    pub fn on_link(&self, f: impl Fn((String, String)) -> i64 + Send + Sync + 'static) {
        *self.link_handler.lock() = Some(Box::new(f));
    }
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl CfsSdk for MockSdk {
    fn new_client(&self) -> ClientId {
        ClientId(self.next_client.fetch_add(1, Ordering::Relaxed))
    }

    fn set_option(&self, _id: ClientId, _key: &str, _value: &str) -> i64 {
        0
    }

    fn start_client(&self, _id: ClientId) -> i64 {
        0
    }

    fn close_client(&self, _id: ClientId) {}

    fn chdir(&self, _id: ClientId, path: &str) -> i64 {
        match self.chdir_handler.lock().as_ref() {
            Some(f) => f(path.to_string()),
            None => 0,
        }
    }

    fn getcwd(&self, _id: ClientId) -> Option<String> {
        match self.getcwd_handler.lock().as_ref() {
            Some(f) => f(()),
            None => Some("/".to_string()),
        }
    }

    fn getattr(&self, _id: ClientId, path: &str, stat: &mut StatInfo) -> i64 {
        match self.getattr_handler.lock().as_ref() {
            Some(f) => {
                let (re, info) = f(path.to_string());
                if re >= 0 {
                    *stat = info;
                }
                re
            }
            None => 0,
        }
    }

    fn setattr(&self, _id: ClientId, path: &str, _stat: &StatInfo, valid: i32) -> i64 {
        match self.setattr_handler.lock().as_ref() {
            Some(f) => f((path.to_string(), valid)),
            None => 0,
        }
    }

    fn open(&self, _id: ClientId, path: &str, flags: i32, mode: u32) -> i64 {
        match self.open_handler.lock().as_ref() {
            Some(f) => f((path.to_string(), flags, mode)),
            None => self.next_handle.fetch_add(1, Ordering::Relaxed) as i64,
        }
    }

    fn flush(&self, _id: ClientId, handle: HandleId) -> i64 {
        match self.flush_handler.lock().as_ref() {
            Some(f) => f(handle),
            None => 0,
        }
    }

    fn close(&self, _id: ClientId, handle: HandleId) {
        if let Some(f) = self.close_handler.lock().as_ref() {
            f(handle);
        }
    }

    fn batch_get_inodes(&self, _id: ClientId, inodes: &[InodeId]) -> Vec<StatInfo> {
        inodes
            .iter()
            .map(|ino| StatInfo {
                ino: *ino,
                ..Default::default()
            })
            .collect()
    }

    fn mkdirs(&self, _id: ClientId, path: &str, _mode: u32) -> i64 {
        match self.mkdirs_handler.lock().as_ref() {
            Some(f) => f(path.to_string()),
            None => 0,
        }
    }

    fn rmdir(&self, _id: ClientId, path: &str) -> i64 {
        match self.rmdir_handler.lock().as_ref() {
            Some(f) => f(path.to_string()),
            None => 0,
        }
    }

    fn unlink(&self, _id: ClientId, path: &str) -> i64 {
        match self.unlink_handler.lock().as_ref() {
            Some(f) => f(path.to_string()),
            None => 0,
        }
    }

    fn rename(&self, _id: ClientId, from: &str, to: &str, overwrite: bool) -> i64 {
        match self.rename_handler.lock().as_ref() {
            Some(f) => f((from.to_string(), to.to_string(), overwrite)),
            None => 0,
        }
    }

    fn symlink(&self, _id: ClientId, target: &str, link_path: &str) -> i64 {
        match self.symlink_handler.lock().as_ref() {
            Some(f) => f((target.to_string(), link_path.to_string())),
            None => 0,
        }
    }

    fn link(&self, _id: ClientId, src: &str, dst: &str) -> i64 {
        match self.link_handler.lock().as_ref() {
            Some(f) => f((src.to_string(), dst.to_string())),
            None => 0,
        }
    }

    fn read(&self, _id: ClientId, handle: HandleId, buf: &mut [u8], offset: u64) -> i64 {
        match self.read_handler.lock().as_ref() {
            Some(f) => {
                let (re, data) = f((handle, buf.len(), offset));
                if re > 0 {
                    let n = (re as usize).min(buf.len()).min(data.len());
                    buf[..n].copy_from_slice(&data[..n]);
                }
                re
            }
            None => 0,
        }
    }

    fn write(&self, _id: ClientId, handle: HandleId, buf: &[u8], offset: u64) -> i64 {
        match self.write_handler.lock().as_ref() {
            Some(f) => f((handle, buf.to_vec(), offset)),
            None => 0,
        }
    }

    fn read_requests(
        &self,
        _id: ClientId,
        handle: HandleId,
        count: usize,
        offset: u64,
        max: usize,
    ) -> Vec<ExtentRequest> {
        match self.read_requests_handler.lock().as_ref() {
            Some(f) => {
                let mut reqs = f((handle, count, offset));
                reqs.truncate(max);
                reqs
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_open_hands_out_sequential_handles() {
        let mock = MockSdk::new();
        let id = mock.new_client();
        let h1 = mock.open(id, "/a", libc::O_RDONLY, 0);
        let h2 = mock.open(id, "/b", libc::O_RDONLY, 0);
        assert!(h1 >= 0);
        assert_eq!(h2, h1 + 1);
    }

    #[test]
    fn test_open_handler_override() {
        let mock = MockSdk::new();
        mock.on_open(|(path, _, _)| {
            if path == "/missing" {
                -(libc::ENOENT as i64)
            } else {
                9
            }
        });
        let id = mock.new_client();
        assert_eq!(mock.open(id, "/missing", 0, 0), -(libc::ENOENT as i64));
        assert_eq!(mock.open(id, "/there", 0, 0), 9);
    }

    #[test]
    fn test_read_handler_fills_buffer() {
        let mock = MockSdk::new();
        mock.on_read(|(_, len, _)| (len as i64, vec![0xAB; len]));
        let id = mock.new_client();
        let mut buf = [0u8; 16];
        let re = mock.read(id, HandleId(1), &mut buf, 0);
        assert_eq!(re, 16);
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_read_requests_truncated_to_max() {
        let mock = MockSdk::new();
        mock.on_read_requests(|_| vec![ExtentRequest::default(); 5]);
        let id = mock.new_client();
        let reqs = mock.read_requests(id, HandleId(1), 4096, 0, 3);
        assert_eq!(reqs.len(), 3);
    }

    #[test]
    fn test_batch_get_inodes_echoes_ids() {
        let mock = MockSdk::new();
        let id = mock.new_client();
        let stats = mock.batch_get_inodes(id, &[InodeId(3), InodeId(9)]);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].ino, InodeId(9));
    }
}
