//! C ABI surface of the bypass client.
//!
//! These are the entry points the interposition layer maps libc symbols
//! onto (the symbol aliasing itself is packaging, not part of this crate).
//! Each function decides remote-vs-local, by path classification or by the
//! descriptor's reserved bit, and either drives the [`BypassClient`] or
//! forwards to the real libc implementation. Raw descriptors and errno
//! exist only here: inside the client everything is typed, and the signed
//! SDK convention is normalized through `cfs_types::errno` before any value
//! reaches the application.
//!
//! The SDK itself is a collaborator: embedders register a factory with
//! [`register_sdk`] before `cfs_bypass_start` runs (production wires the
//! real client library, tests wire a mock).

use std::ffi::CStr;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use libc::{c_char, c_int, mode_t, off_t, size_t, ssize_t};
use tracing::error;

use cfs_bypass::{BypassClient, BypassConfig, PathClass};
use cfs_sdk::CfsSdk;
use cfs_types::translate;

type SdkFactory = Box<dyn Fn() -> Arc<dyn CfsSdk> + Send + Sync>;

static SDK_FACTORY: OnceLock<SdkFactory> = OnceLock::new();
static CLIENT: OnceLock<BypassClient> = OnceLock::new();
static LOG_GUARD: OnceLock<Option<cfs_logging::WorkerGuard>> = OnceLock::new();

use cfs_logging as logging;

/// Install the SDK implementation used when the client starts. First call
/// wins; later calls are ignored.
pub fn register_sdk(factory: impl Fn() -> Arc<dyn CfsSdk> + Send + Sync + 'static) {
    let _ = SDK_FACTORY.set(Box::new(factory));
}

/// Start the bypass layer from a config file. A null `config_path` falls
/// back to the `CFS_BYPASS_CONFIG` environment override or the default
/// location. Idempotent: a started layer reports success.
///
/// Returns 0 on success, `-errno` on failure.
///
/// # Safety
/// `config_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_start(config_path: *const c_char) -> c_int {
    if CLIENT.get().is_some() {
        return 0;
    }
    let Some(factory) = SDK_FACTORY.get() else {
        return -libc::ENOSYS;
    };

    let path = match cstr(config_path) {
        Some(p) => p.to_string(),
        None => BypassConfig::resolve_path(),
    };
    let config = match BypassConfig::load(Path::new(&path)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("cfs-bypass: cannot load config {path}: {err}");
            return -libc::EINVAL;
        }
    };

    let log_config = logging::LogConfig::from_level_and_dir(&config.log_level, &config.log_dir);
    let _ = LOG_GUARD.set(logging::init_logging(&log_config));

    match BypassClient::new(config, factory()) {
        Ok(client) => {
            let _ = CLIENT.set(client);
            0
        }
        Err(err) => {
            error!(%err, "bypass client start failed");
            -libc::EIO
        }
    }
}

/// Stop the bypass layer: flush nothing new, stop housekeeping, close the
/// SDK session. Local descriptors are unaffected.
#[no_mangle]
pub extern "C" fn cfs_bypass_stop() {
    if let Some(client) = CLIENT.get() {
        client.shutdown();
    }
}

/// Whether `fd` is served by the bypass layer. Exposed for diagnostics.
#[no_mangle]
pub extern "C" fn cfs_bypass_fd_is_remote(fd: c_int) -> bool {
    CLIENT.get().is_some_and(|c| c.fd_is_remote(fd))
}

// ---------------------------------------------------------------------------
// Path-taking entry points
// ---------------------------------------------------------------------------

/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_open(
    path: *const c_char,
    flags: c_int,
    mode: mode_t,
) -> c_int {
    match classify(path) {
        Target::Remote(client, stripped, original) => {
            translate(client.open(&stripped, &original, flags, mode as u32)).apply() as c_int
        }
        Target::Local => libc::open(path, flags, mode as libc::c_uint),
    }
}

/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_unlink(path: *const c_char) -> c_int {
    match classify(path) {
        Target::Remote(client, stripped, _) => translate(client.unlink(&stripped)).apply() as c_int,
        Target::Local => libc::unlink(path),
    }
}

/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_mkdir(path: *const c_char, mode: mode_t) -> c_int {
    match classify(path) {
        Target::Remote(client, stripped, _) => {
            translate(client.mkdirs(&stripped, mode as u32)).apply() as c_int
        }
        Target::Local => libc::mkdir(path, mode),
    }
}

/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_rmdir(path: *const c_char) -> c_int {
    match classify(path) {
        Target::Remote(client, stripped, _) => translate(client.rmdir(&stripped)).apply() as c_int,
        Target::Local => libc::rmdir(path),
    }
}

/// Rename handles the mixed case conservatively: only a rename with both
/// ends remote goes to the SDK; both-local goes to libc; crossing the mount
/// boundary is EXDEV, as for any two filesystems.
///
/// # Safety
/// `from` and `to` must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_rename(from: *const c_char, to: *const c_char) -> c_int {
    match (classify(from), classify(to)) {
        (Target::Remote(client, from, _), Target::Remote(_, to, _)) => {
            translate(client.rename(&from, &to, true)).apply() as c_int
        }
        (Target::Local, Target::Local) => libc::rename(from, to),
        _ => {
            set_errno(libc::EXDEV);
            -1
        }
    }
}

/// # Safety
/// `path` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_chdir(path: *const c_char) -> c_int {
    match classify(path) {
        Target::Remote(client, stripped, _) => translate(client.chdir(&stripped)).apply() as c_int,
        Target::Local => {
            let re = libc::chdir(path);
            if re == 0 {
                if let (Some(client), Some(p)) = (CLIENT.get(), cstr(path)) {
                    client.set_local_cwd(p);
                }
            }
            re
        }
    }
}

/// # Safety
/// `buf` must be null or point to at least `size` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_getcwd(buf: *mut c_char, size: size_t) -> *mut c_char {
    let Some(cwd) = CLIENT.get().and_then(BypassClient::getcwd) else {
        return libc::getcwd(buf, size);
    };

    if buf.is_null() {
        // glibc extension: a null buffer means allocate one.
        let out = libc::malloc(cwd.len() + 1) as *mut c_char;
        if out.is_null() {
            set_errno(libc::ENOMEM);
            return std::ptr::null_mut();
        }
        std::ptr::copy_nonoverlapping(cwd.as_ptr(), out as *mut u8, cwd.len());
        *out.add(cwd.len()) = 0;
        set_errno(0);
        return out;
    }
    if size <= cwd.len() {
        set_errno(libc::ERANGE);
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(cwd.as_ptr(), buf as *mut u8, cwd.len());
    *buf.add(cwd.len()) = 0;
    set_errno(0);
    buf
}

// ---------------------------------------------------------------------------
// Descriptor-taking entry points
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn cfs_bypass_close(fd: c_int) -> c_int {
    match remote(fd) {
        Some(client) => translate(client.close(fd)).apply() as c_int,
        None => unsafe { libc::close(fd) },
    }
}

/// # Safety
/// `buf` must point to at least `count` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_read(fd: c_int, buf: *mut u8, count: size_t) -> ssize_t {
    match remote(fd) {
        Some(client) => {
            if buf.is_null() {
                set_errno(libc::EINVAL);
                return -1;
            }
            let dest = std::slice::from_raw_parts_mut(buf, count);
            translate(client.read(fd, dest)).apply() as ssize_t
        }
        None => libc::read(fd, buf as *mut libc::c_void, count),
    }
}

/// # Safety
/// `buf` must point to at least `count` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_pread(
    fd: c_int,
    buf: *mut u8,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    match remote(fd) {
        Some(client) => {
            if buf.is_null() || offset < 0 {
                set_errno(libc::EINVAL);
                return -1;
            }
            let dest = std::slice::from_raw_parts_mut(buf, count);
            translate(client.pread(fd, dest, offset as u64)).apply() as ssize_t
        }
        None => libc::pread(fd, buf as *mut libc::c_void, count, offset),
    }
}

/// # Safety
/// `buf` must point to at least `count` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_write(fd: c_int, buf: *const u8, count: size_t) -> ssize_t {
    match remote(fd) {
        Some(client) => {
            if buf.is_null() {
                set_errno(libc::EINVAL);
                return -1;
            }
            let src = std::slice::from_raw_parts(buf, count);
            translate(client.write(fd, src)).apply() as ssize_t
        }
        None => libc::write(fd, buf as *const libc::c_void, count),
    }
}

/// # Safety
/// `buf` must point to at least `count` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn cfs_bypass_pwrite(
    fd: c_int,
    buf: *const u8,
    count: size_t,
    offset: off_t,
) -> ssize_t {
    match remote(fd) {
        Some(client) => {
            if buf.is_null() || offset < 0 {
                set_errno(libc::EINVAL);
                return -1;
            }
            let src = std::slice::from_raw_parts(buf, count);
            translate(client.pwrite(fd, src, offset as u64)).apply() as ssize_t
        }
        None => libc::pwrite(fd, buf as *const libc::c_void, count, offset),
    }
}

#[no_mangle]
pub extern "C" fn cfs_bypass_lseek(fd: c_int, offset: off_t, whence: c_int) -> off_t {
    match remote(fd) {
        Some(client) => translate(client.lseek(fd, offset, whence)).apply() as off_t,
        None => unsafe { libc::lseek(fd, offset, whence) },
    }
}

#[no_mangle]
pub extern "C" fn cfs_bypass_dup2(oldfd: c_int, newfd: c_int) -> c_int {
    match remote(oldfd) {
        Some(client) => translate(client.dup(oldfd, newfd)).apply() as c_int,
        None => unsafe { libc::dup2(oldfd, newfd) },
    }
}

#[no_mangle]
pub extern "C" fn cfs_bypass_fsync(fd: c_int) -> c_int {
    match remote(fd) {
        Some(client) => translate(client.fsync(fd)).apply() as c_int,
        None => unsafe { libc::fsync(fd) },
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

enum Target {
    Remote(&'static BypassClient, String, String),
    Local,
}

/// Route a raw path pointer. A null pointer, a non-UTF-8 path, or a path
/// outside the mount scope all stay local (a path the scope cannot express
/// cannot be remote).
unsafe fn classify(path: *const c_char) -> Target {
    let (Some(client), Some(p)) = (CLIENT.get(), cstr(path)) else {
        return Target::Local;
    };
    match client.classify(p) {
        PathClass::Remote(stripped) => Target::Remote(client, stripped, p.to_string()),
        PathClass::Local => Target::Local,
    }
}

fn remote(fd: c_int) -> Option<&'static BypassClient> {
    CLIENT.get().filter(|c| c.fd_is_remote(fd))
}

unsafe fn cstr<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok()
}

fn set_errno(value: c_int) {
    // translate() is the errno authority; reuse it for the sentinel-only
    // paths so the convention lives in one place.
    if value == 0 {
        let _ = translate(0).apply();
    } else {
        let _ = translate(-(value as i64)).apply();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_sdk::MockSdk;
    use std::ffi::CString;
    use std::io::Write;

    /// The globals are process-wide, so the whole ABI is exercised in one
    /// sequence.
    #[test]
    fn test_c_abi_end_to_end() {
        let sdk = MockSdk::new();
        sdk.on_read(|(_, len, _)| (len as i64, vec![0x77; len]));
        sdk.on_open(|(path, _, _)| if path == "/missing" { -(libc::ENOENT as i64) } else { 7 });
        let sdk: Arc<dyn CfsSdk> = sdk.into_arc();
        register_sdk(move || sdk.clone());

        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("cfs-bypass.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(f, "mountPoint = \"/mnt/cfs\"").unwrap();
        drop(f);

        let c_config = CString::new(config_path.to_str().unwrap()).unwrap();
        assert_eq!(unsafe { cfs_bypass_start(c_config.as_ptr()) }, 0);
        // Idempotent.
        assert_eq!(unsafe { cfs_bypass_start(c_config.as_ptr()) }, 0);

        // Remote open through the ABI.
        let path = CString::new("/mnt/cfs/data/file").unwrap();
        let fd = unsafe { cfs_bypass_open(path.as_ptr(), libc::O_RDONLY, 0) };
        assert!(fd > 0);
        assert!(cfs_bypass_fd_is_remote(fd));

        // Remote read fills the buffer and clears errno.
        let mut buf = [0u8; 16];
        let n = unsafe { cfs_bypass_read(fd, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(n, 16);
        assert!(buf.iter().all(|&b| b == 0x77));

        // lseek repositions; errno stays clear on success.
        assert_eq!(cfs_bypass_lseek(fd, 4, libc::SEEK_SET), 4);

        // dup through the ABI, close the original, alias still remote.
        assert_eq!(cfs_bypass_dup2(fd, 5), 5);
        assert_eq!(cfs_bypass_close(fd), 0);
        assert!(cfs_bypass_fd_is_remote(5));
        assert_eq!(cfs_bypass_close(5), 0);
        assert!(!cfs_bypass_fd_is_remote(5));

        // A failing remote open reports the native convention: -1 + errno.
        let missing = CString::new("/mnt/cfs/missing").unwrap();
        let re = unsafe { cfs_bypass_open(missing.as_ptr(), libc::O_RDONLY, 0) };
        assert_eq!(re, -1);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::ENOENT)
        );

        // getcwd after a remote chdir reports the mount-joined directory.
        let remote_dir = CString::new("/mnt/cfs/data").unwrap();
        assert_eq!(unsafe { cfs_bypass_chdir(remote_dir.as_ptr()) }, 0);
        let mut cwd_buf = vec![0u8; 256];
        let got = unsafe { cfs_bypass_getcwd(cwd_buf.as_mut_ptr() as *mut c_char, cwd_buf.len()) };
        assert!(!got.is_null());
        let cwd = unsafe { CStr::from_ptr(got) }.to_str().unwrap();
        assert_eq!(cwd, "/mnt/cfs/data");

        // Undersized getcwd buffer is ERANGE, like the native call.
        let mut tiny = [0u8; 4];
        let got = unsafe { cfs_bypass_getcwd(tiny.as_mut_ptr() as *mut c_char, tiny.len()) };
        assert!(got.is_null());
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::ERANGE)
        );

        // Rename across the mount boundary cannot work: EXDEV.
        let local = CString::new("/tmp/x").unwrap();
        let re = unsafe { cfs_bypass_rename(path.as_ptr(), local.as_ptr()) };
        assert_eq!(re, -1);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::EXDEV)
        );

        cfs_bypass_stop();
    }
}
