//! The bypass client: one context object owning every piece of routing and
//! virtualization state.
//!
//! Constructed once at process startup and shared read-only afterwards; the
//! mutable pieces (tables, caches, cwd) carry their own synchronization.
//! Intercepted calls classify their target first (by path or by
//! descriptor), and only the remote half of the decision reaches the
//! methods here; the local half never leaves libc.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use cfs_net::ConnPool;
use cfs_sdk::{CfsSdk, StatInfo};
use cfs_types::{errno::translate, ClientId, HandleId};

use crate::cache::{PageCache, PageKey, BIG_PAGE_SIZE, SMALL_PAGE_SIZE};
use crate::config::{BypassConfig, ConfigError};
use crate::fd_table::{FdTable, RegistryError};
use crate::file::{FileKind, FileTable, OpenFile, ReleaseOutcome};
use crate::path::{clean, MountScope, PathClass};
use crate::read::ReadEngine;

/// Pages kept in the small page cache.
const SMALL_PAGE_CAPACITY: usize = 4096;

/// Pages kept in the big page cache.
const BIG_PAGE_CAPACITY: usize = 256;

/// Interval between housekeeping passes.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Errors constructing a [`BypassClient`].
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sdk session start failed: errno {0}")]
    Sdk(i32),
}

/// Process position state: where the application currently sits, and
/// whether that is inside the mount scope. When `in_scope` is set, `path`
/// is the mount-stripped remote directory.
#[derive(Debug, Clone)]
pub struct CwdState {
    pub path: String,
    pub in_scope: bool,
}

pub struct BypassClient {
    scope: MountScope,
    sdk: Arc<dyn CfsSdk>,
    session: ClientId,
    fds: FdTable,
    files: FileTable,
    engine: ReadEngine,
    pool: Arc<ConnPool>,
    small_pages: PageCache,
    big_pages: PageCache,
    /// Best-effort fd → opened-path map, for diagnostics only.
    fd_paths: DashMap<i32, String>,
    cwd: Mutex<CwdState>,
    stop: Arc<AtomicBool>,
    housekeeper: Mutex<Option<JoinHandle<()>>>,
}

impl BypassClient {
    /// Build the context: validate config, start an SDK session, and launch
    /// the housekeeping thread.
    pub fn new(config: BypassConfig, sdk: Arc<dyn CfsSdk>) -> Result<Self, StartError> {
        config.validate()?;
        let scope = MountScope::new(&config.mount_point, &config.ignore_path);

        let session = sdk.new_client();
        sdk.set_option(session, "mountPoint", &config.mount_point);
        sdk.set_option(session, "logDir", &config.log_dir);
        sdk.set_option(session, "logLevel", &config.log_level);
        if !config.prof_port.is_empty() {
            sdk.set_option(session, "profPort", &config.prof_port);
        }
        let started = translate(sdk.start_client(session));
        if !started.is_ok() {
            sdk.close_client(session);
            return Err(StartError::Sdk(started.errno));
        }

        let pool = Arc::new(ConnPool::new());
        let stop = Arc::new(AtomicBool::new(false));
        let housekeeper = spawn_housekeeper(pool.clone(), stop.clone());

        let cwd = match std::env::current_dir() {
            Ok(dir) => {
                let dir = dir.to_string_lossy().into_owned();
                match scope.classify(&dir, None) {
                    PathClass::Remote(stripped) => CwdState {
                        path: stripped,
                        in_scope: true,
                    },
                    PathClass::Local => CwdState {
                        path: clean(&dir),
                        in_scope: false,
                    },
                }
            }
            Err(_) => CwdState {
                path: "/".to_string(),
                in_scope: false,
            },
        };

        info!(
            mount_point = scope.mount_point(),
            session = %session,
            "bypass client started"
        );

        Ok(Self {
            scope,
            sdk,
            session,
            fds: FdTable::new(),
            files: FileTable::new(),
            engine: ReadEngine::new(pool.clone()),
            pool,
            small_pages: PageCache::small(SMALL_PAGE_CAPACITY),
            big_pages: PageCache::big(BIG_PAGE_CAPACITY),
            fd_paths: DashMap::new(),
            cwd: Mutex::new(cwd),
            stop,
            housekeeper: Mutex::new(Some(housekeeper)),
        })
    }

    // ---- Routing ----

    /// Classify a path as the application handed it over, resolving relative
    /// paths against the current position.
    pub fn classify(&self, path: &str) -> PathClass {
        let cwd = self.cwd.lock();
        let remote_cwd = cwd.in_scope.then(|| cwd.path.clone());
        self.scope.classify(path, remote_cwd.as_deref())
    }

    /// Whether a raw descriptor routes remote.
    pub fn fd_is_remote(&self, fd: i32) -> bool {
        self.fds.is_remote(fd)
    }

    // ---- Open / close / dup ----

    /// Open a remote file. `stripped` is the mount-stripped path from
    /// classification; `original` is what the application passed, kept for
    /// kind classification and diagnostics.
    pub fn open(&self, stripped: &str, original: &str, flags: i32, mode: u32) -> i64 {
        let re = self.sdk.open(self.session, stripped, flags, mode);
        if re < 0 {
            return re;
        }
        let handle = HandleId(re as u64);

        let mut stat = StatInfo::default();
        let attr = self.sdk.getattr(self.session, stripped, &mut stat);
        if attr < 0 {
            self.sdk.close(self.session, handle);
            return attr;
        }

        let fd = match self.fds.register_direct(handle) {
            Ok(fd) => fd,
            Err(err) => {
                // Descriptor space exhaustion is a configuration bound, not
                // an I/O condition; surface it loudly before failing the call.
                error!(%handle, %err, "cannot encode remote descriptor");
                self.sdk.close(self.session, handle);
                return -(libc::EMFILE as i64);
            }
        };

        let pos = if flags & libc::O_APPEND != 0 {
            stat.size as i64
        } else {
            0
        };
        self.files
            .insert(handle, flags, FileKind::classify(original), stat.ino, pos);
        self.fd_paths.insert(fd, original.to_string());
        debug!(fd, %handle, path = original, "remote open");
        fd as i64
    }

    /// Close a remote descriptor: drop its alias entry if it is one, then
    /// release its reference on the shared handle. The remote handle is
    /// flushed and closed only when the last descriptor goes.
    pub fn close(&self, fd: i32) -> i64 {
        let Some(handle) = self.fds.resolve(fd) else {
            return -(libc::EBADF as i64);
        };
        self.fds.remove_alias(fd);
        self.fd_paths.remove(&fd);

        match self.files.release(handle) {
            ReleaseOutcome::NotOpen => -(libc::EBADF as i64),
            ReleaseOutcome::Retained => 0,
            ReleaseOutcome::Closed {
                file,
                inode_released,
            } => {
                let flushed = self.sdk.flush(self.session, handle);
                self.sdk.close(self.session, handle);
                if inode_released {
                    self.small_pages.evict_inode(file.inode.ino);
                    self.big_pages.evict_inode(file.inode.ino);
                }
                debug!(fd, %handle, "remote close");
                if flushed < 0 {
                    flushed
                } else {
                    0
                }
            }
        }
    }

    /// dup2/dup3: make `newfd` another name for `oldfd`'s handle. An
    /// already-remote `newfd` is closed first, as the native call would.
    pub fn dup(&self, oldfd: i32, newfd: i32) -> i64 {
        let Some(handle) = self.fds.resolve(oldfd) else {
            return -(libc::EBADF as i64);
        };
        let Some(file) = self.files.get(handle) else {
            // The descriptor encodes a handle the table no longer knows:
            // aliasing it would create an entry with nothing behind it.
            let err = RegistryError::NotOpen { fd: oldfd };
            debug!(%err, "dup rejected");
            return -(libc::EBADF as i64);
        };
        if oldfd == newfd {
            return newfd as i64;
        }
        if self.fds.is_remote(newfd) {
            self.close(newfd);
        }

        file.incr_dup();
        self.fds.register_alias(newfd, oldfd);
        if let Some(path) = self.fd_paths.get(&oldfd).map(|p| p.value().clone()) {
            self.fd_paths.insert(newfd, path);
        }
        newfd as i64
    }

    // ---- Data plane ----

    /// Read at the shared position, advancing it by the bytes read.
    pub fn read(&self, fd: i32, buf: &mut [u8]) -> i64 {
        let Some(file) = self.lookup(fd) else {
            return -(libc::EBADF as i64);
        };
        let offset = file.pos();
        let re = self.pread_file(&file, buf, offset as u64);
        if re > 0 {
            file.advance_pos(re);
        }
        re
    }

    /// Positional read; the shared position is untouched.
    pub fn pread(&self, fd: i32, buf: &mut [u8], offset: u64) -> i64 {
        let Some(file) = self.lookup(fd) else {
            return -(libc::EBADF as i64);
        };
        self.pread_file(&file, buf, offset)
    }

    fn pread_file(&self, file: &OpenFile, buf: &mut [u8], offset: u64) -> i64 {
        let cached = self.page_cache_for(buf.len(), offset);
        if let Some(cache) = cached {
            let key = PageKey {
                ino: file.inode.ino,
                index: offset / cache.page_size() as u64,
            };
            if cache.lookup(key, buf) {
                return buf.len() as i64;
            }
        }

        let re = self
            .engine
            .read(self.sdk.as_ref(), self.session, file.handle, buf, offset);

        if re as usize == buf.len() {
            if let Some(cache) = cached {
                let key = PageKey {
                    ino: file.inode.ino,
                    index: offset / cache.page_size() as u64,
                };
                cache.insert(key, buf);
            }
        }
        re
    }

    /// Write at the shared position, advancing it by the bytes written.
    pub fn write(&self, fd: i32, buf: &[u8]) -> i64 {
        let Some(file) = self.lookup(fd) else {
            return -(libc::EBADF as i64);
        };
        let offset = file.pos();
        let re = self.pwrite_file(&file, buf, offset as u64);
        if re > 0 {
            file.advance_pos(re);
        }
        re
    }

    /// Positional write; the shared position is untouched.
    pub fn pwrite(&self, fd: i32, buf: &[u8], offset: u64) -> i64 {
        let Some(file) = self.lookup(fd) else {
            return -(libc::EBADF as i64);
        };
        self.pwrite_file(&file, buf, offset)
    }

    fn pwrite_file(&self, file: &OpenFile, buf: &[u8], offset: u64) -> i64 {
        let re = self.sdk.write(self.session, file.handle, buf, offset);
        if re > 0 {
            self.small_pages
                .invalidate(file.inode.ino, offset, re as usize);
            self.big_pages
                .invalidate(file.inode.ino, offset, re as usize);
        }
        re
    }

    /// Reposition the shared offset.
    pub fn lseek(&self, fd: i32, offset: i64, whence: i32) -> i64 {
        let Some(file) = self.lookup(fd) else {
            return -(libc::EBADF as i64);
        };
        let target = match whence {
            libc::SEEK_SET => offset,
            libc::SEEK_CUR => file.pos() + offset,
            libc::SEEK_END => {
                let stats = self.sdk.batch_get_inodes(self.session, &[file.inode.ino]);
                match stats.first() {
                    Some(stat) => stat.size as i64 + offset,
                    None => return -(libc::EIO as i64),
                }
            }
            _ => return -(libc::EINVAL as i64),
        };
        if target < 0 {
            return -(libc::EINVAL as i64);
        }
        file.set_pos(target);
        target
    }

    /// fsync/fdatasync.
    pub fn fsync(&self, fd: i32) -> i64 {
        let Some(file) = self.lookup(fd) else {
            return -(libc::EBADF as i64);
        };
        self.sdk.flush(self.session, file.handle)
    }

    fn lookup(&self, fd: i32) -> Option<Arc<OpenFile>> {
        self.files.get(self.fds.resolve(fd)?)
    }

    // ---- Position state ----

    /// Change into a remote directory (already classified and stripped).
    pub fn chdir(&self, stripped: &str) -> i64 {
        let re = self.sdk.chdir(self.session, stripped);
        if re >= 0 {
            *self.cwd.lock() = CwdState {
                path: stripped.to_string(),
                in_scope: true,
            };
        }
        re
    }

    /// Record that the process moved to a local directory. The actual
    /// chdir syscall already happened through libc.
    pub fn set_local_cwd(&self, path: &str) {
        *self.cwd.lock() = CwdState {
            path: clean(path),
            in_scope: false,
        };
    }

    /// The full current directory when it is inside the scope, `None`
    /// otherwise (libc's answer is already right in that case).
    pub fn getcwd(&self) -> Option<String> {
        let cwd = self.cwd.lock();
        if !cwd.in_scope {
            return None;
        }
        if cwd.path == "/" {
            Some(self.scope.mount_point().to_string())
        } else {
            Some(format!("{}{}", self.scope.mount_point(), cwd.path))
        }
    }

    // ---- Metadata plane (thin forwards, stripped paths) ----

    pub fn getattr(&self, stripped: &str, stat: &mut StatInfo) -> i64 {
        self.sdk.getattr(self.session, stripped, stat)
    }

    pub fn setattr(&self, stripped: &str, stat: &StatInfo, valid: i32) -> i64 {
        self.sdk.setattr(self.session, stripped, stat, valid)
    }

    pub fn mkdirs(&self, stripped: &str, mode: u32) -> i64 {
        self.sdk.mkdirs(self.session, stripped, mode)
    }

    pub fn rmdir(&self, stripped: &str) -> i64 {
        self.sdk.rmdir(self.session, stripped)
    }

    pub fn unlink(&self, stripped: &str) -> i64 {
        self.sdk.unlink(self.session, stripped)
    }

    pub fn rename(&self, from: &str, to: &str, overwrite: bool) -> i64 {
        self.sdk.rename(self.session, from, to, overwrite)
    }

    pub fn symlink(&self, target: &str, link_path: &str) -> i64 {
        self.sdk.symlink(self.session, target, link_path)
    }

    pub fn link(&self, src: &str, dst: &str) -> i64 {
        self.sdk.link(self.session, src, dst)
    }

    // ---- Diagnostics ----

    /// The path `fd` was opened with, when still tracked. Never
    /// authoritative.
    pub fn fd_path(&self, fd: i32) -> Option<String> {
        self.fd_paths.get(&fd).map(|p| p.value().clone())
    }

    pub fn open_count(&self) -> usize {
        self.files.open_count()
    }

    /// Stop the housekeeper and close the SDK session. Runs at most once;
    /// `Drop` calls it too.
    pub fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.housekeeper.lock().take() {
            let _ = handle.join();
        }
        self.sdk.close_client(self.session);
        info!("bypass client stopped");
    }
}

impl Drop for BypassClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl BypassClient {
    /// The cache pool responsible for this request shape, if any: only
    /// whole, aligned pages are cached.
    fn page_cache_for(&self, len: usize, offset: u64) -> Option<&PageCache> {
        let cache = match len {
            SMALL_PAGE_SIZE => &self.small_pages,
            BIG_PAGE_SIZE => &self.big_pages,
            _ => return None,
        };
        (offset % len as u64 == 0).then_some(cache)
    }
}

fn spawn_housekeeper(pool: Arc<ConnPool>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("cfs-bypass-housekeeper".into())
        .spawn(move || {
            let mut last = Instant::now();
            while !stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
                if last.elapsed() >= HOUSEKEEPING_INTERVAL {
                    // Idle storage-node connections are not kept across
                    // housekeeping intervals.
                    pool.clear();
                    last = Instant::now();
                }
            }
        })
        .expect("spawn housekeeper thread")
}
