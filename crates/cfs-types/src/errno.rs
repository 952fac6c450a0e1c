//! Translation of the SDK's signed return convention to host errno.
//!
//! Every SDK call returns a signed integer: a negative value `-E` means the
//! operation failed with host errno `E`; a non-negative value is the
//! successful result. Intercepted calls must report failures exactly as the
//! equivalent native call would, so `translate` is applied at every remote
//! call boundary, including on success: errno is cleared there so a stale
//! value from an unrelated earlier failure cannot leak into the caller's
//! observable state.

/// A normalized remote-call result: the value to hand back to the caller and
/// the errno to install alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Translated {
    /// Caller-visible return value: the raw result on success, `-1` on
    /// failure. Size-typed (`ssize_t`) results use the same sentinel.
    pub ret: i64,
    /// Errno to install: `0` on success.
    pub errno: i32,
}

impl Translated {
    /// Whether the underlying call succeeded.
    pub fn is_ok(&self) -> bool {
        self.errno == 0
    }

    /// Install `errno` on the calling thread and return the caller-visible
    /// value. Only the C ABI boundary should need this.
    pub fn apply(self) -> i64 {
        unsafe {
            *errno_location() = self.errno;
        }
        self.ret
    }
}

/// Normalize a raw SDK return value.
pub fn translate(raw: i64) -> Translated {
    if raw < 0 {
        Translated {
            ret: -1,
            errno: (-raw) as i32,
        }
    } else {
        Translated { ret: raw, errno: 0 }
    }
}

#[cfg(target_os = "linux")]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__errno_location()
}

#[cfg(target_os = "macos")]
unsafe fn errno_location() -> *mut libc::c_int {
    libc::__error()
}
