//! The descriptor registry.
//!
//! Remote files must be addressable through the same flat integer descriptor
//! space the host process already uses. A remote descriptor is the remote
//! handle id with a reserved high bit set, so routing an fd-taking call is a
//! constant-time bitmask test with no lookup and no lock. Descriptors
//! created by duplication cannot carry the bit (the caller picks the
//! integer), so they live in an explicit alias map consulted before the
//! bitmask test.

use std::collections::HashMap;

use cfs_types::HandleId;
use parking_lot::RwLock;
use thiserror::Error;

/// Reserved bit marking a descriptor as remote. Chosen below the sign bit so
/// flagged descriptors stay positive ints.
pub const FD_REMOTE_BIT: i32 = 1 << 30;

/// Errors from descriptor registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The handle id cannot be encoded below the reserved bit. This is
    /// descriptor-space exhaustion, a configuration bound that must be
    /// surfaced rather than masked.
    #[error("handle {handle} exceeds the descriptor encoding space")]
    FdSpaceExhausted { handle: HandleId },

    /// The descriptor being aliased has no open handle behind it.
    #[error("descriptor {fd} is not an open remote file")]
    NotOpen { fd: i32 },
}

/// A descriptor with its routing made explicit. Raw integers exist only at
/// the process boundary; everything inside the layer works on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualFd {
    Local(i32),
    Remote(HandleId),
}

impl VirtualFd {
    /// Decode a raw descriptor by the reserved-bit test alone (aliases are
    /// the registry's concern, not the encoding's).
    pub fn from_raw(raw: i32) -> Self {
        if raw & FD_REMOTE_BIT != 0 {
            VirtualFd::Remote(HandleId((raw & !FD_REMOTE_BIT) as u64))
        } else {
            VirtualFd::Local(raw)
        }
    }

    /// Encode back to the raw integer handed to the host process.
    pub fn into_raw(self) -> Result<i32, RegistryError> {
        match self {
            VirtualFd::Local(fd) => Ok(fd),
            VirtualFd::Remote(handle) => {
                if *handle >= FD_REMOTE_BIT as u64 {
                    Err(RegistryError::FdSpaceExhausted { handle })
                } else {
                    Ok(*handle as i32 | FD_REMOTE_BIT)
                }
            }
        }
    }
}

/// Alias map plus the bit-flag scheme.
///
/// Aliasing is exactly one level deep: registering an alias of an alias
/// flattens to the ultimate original at registration time, so resolution
/// never chases more than one indirection.
pub struct FdTable {
    aliases: RwLock<HashMap<i32, i32>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Whether `fd` routes to the remote filesystem.
    pub fn is_remote(&self, fd: i32) -> bool {
        fd & FD_REMOTE_BIT != 0 || self.aliases.read().contains_key(&fd)
    }

    /// The handle behind `fd`, following at most one alias indirection.
    pub fn resolve(&self, fd: i32) -> Option<HandleId> {
        let direct = match self.aliases.read().get(&fd) {
            Some(&original) => original,
            None => fd,
        };
        match VirtualFd::from_raw(direct) {
            VirtualFd::Remote(handle) => Some(handle),
            VirtualFd::Local(_) => None,
        }
    }

    /// Caller-visible descriptor for a freshly opened handle.
    pub fn register_direct(&self, handle: HandleId) -> Result<i32, RegistryError> {
        VirtualFd::Remote(handle).into_raw()
    }

    /// Record `new_fd` as an alias of `original_fd`. If `original_fd` is
    /// itself an alias the entry is flattened to its target, so every stored
    /// alias points at a direct remote descriptor. The caller is responsible
    /// for having verified the handle is open and for its dup_ref.
    pub fn register_alias(&self, new_fd: i32, original_fd: i32) {
        let mut aliases = self.aliases.write();
        let target = match aliases.get(&original_fd) {
            Some(&t) => t,
            None => original_fd,
        };
        aliases.insert(new_fd, target);
    }

    /// Remove an alias entry. Returns `true` if `fd` was aliased. Closing
    /// the underlying handle never touches other aliases of it.
    pub fn remove_alias(&self, fd: i32) -> bool {
        self.aliases.write().remove(&fd).is_some()
    }

    /// Number of live alias entries. Diagnostics only.
    pub fn alias_count(&self) -> usize {
        self.aliases.read().len()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_fd_roundtrip() {
        let raw = VirtualFd::Remote(HandleId(42)).into_raw().unwrap();
        assert_eq!(raw, 42 | FD_REMOTE_BIT);
        assert_eq!(VirtualFd::from_raw(raw), VirtualFd::Remote(HandleId(42)));
        assert_eq!(VirtualFd::from_raw(3), VirtualFd::Local(3));
    }

    #[test]
    fn test_encode_rejects_oversized_handle() {
        let err = VirtualFd::Remote(HandleId(FD_REMOTE_BIT as u64))
            .into_raw()
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::FdSpaceExhausted {
                handle: HandleId(FD_REMOTE_BIT as u64)
            }
        );
    }

    #[test]
    fn test_remote_fd_stays_positive() {
        let raw = VirtualFd::Remote(HandleId((FD_REMOTE_BIT - 1) as u64))
            .into_raw()
            .unwrap();
        assert!(raw > 0);
    }

    #[test]
    fn test_is_remote_bitmask_and_alias() {
        let table = FdTable::new();
        let direct = table.register_direct(HandleId(7)).unwrap();
        assert!(table.is_remote(direct));
        assert!(!table.is_remote(5));

        table.register_alias(5, direct);
        assert!(table.is_remote(5));
        assert_eq!(table.resolve(5), Some(HandleId(7)));
    }

    #[test]
    fn test_resolve_plain_local_is_none() {
        let table = FdTable::new();
        assert_eq!(table.resolve(3), None);
    }

    #[test]
    fn test_alias_of_alias_flattens() {
        let table = FdTable::new();
        let direct = table.register_direct(HandleId(9)).unwrap();
        table.register_alias(10, direct);
        table.register_alias(11, 10);

        // Both aliases point straight at the direct descriptor; removing the
        // middle one leaves the second intact.
        assert!(table.remove_alias(10));
        assert_eq!(table.resolve(11), Some(HandleId(9)));
    }

    #[test]
    fn test_remove_alias_only_removes_that_entry() {
        let table = FdTable::new();
        let direct = table.register_direct(HandleId(1)).unwrap();
        table.register_alias(20, direct);
        table.register_alias(21, direct);

        assert!(table.remove_alias(20));
        assert!(!table.remove_alias(20));
        assert!(table.is_remote(21));
        assert!(table.is_remote(direct));
        assert_eq!(table.alias_count(), 1);
    }
}
