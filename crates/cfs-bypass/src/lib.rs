//! Request routing and resource virtualization for transparent CFS access.
//!
//! Unmodified applications reach a distributed filesystem through ordinary
//! POSIX calls: every filesystem-related libc entry point is intercepted,
//! calls whose target lies under the configured mount point are redirected
//! to a CFS client session, and everything else passes through to the real
//! libc implementation. This crate is the routing core:
//!
//! - [`path`] decides, lexically, whether a path is remote or local;
//! - [`fd_table`] discriminates remote descriptors inside the host's flat
//!   integer fd space via a reserved bit plus a duplication alias map;
//! - [`file`] tracks per-handle and per-inode state shared by descriptor
//!   aliases;
//! - [`read`] serves reads directly from storage-node sockets when extent
//!   locations allow, falling back to the SDK read for correctness;
//! - [`cache`] keeps bounded LRU pools of recently read pages;
//! - [`client`] ties the pieces into one explicitly-constructed context.
//!
//! The C ABI that applications actually hit lives in the `cfs-preload`
//! crate; everything here is callable from Rust and fully testable without
//! a mounted filesystem.

pub mod cache;
pub mod client;
pub mod config;
pub mod fd_table;
pub mod file;
pub mod path;
pub mod read;

pub use client::{BypassClient, StartError};
pub use config::BypassConfig;
pub use fd_table::{FdTable, RegistryError, VirtualFd, FD_REMOTE_BIT};
pub use file::{FileKind, FileTable};
pub use path::{clean, MountScope, PathClass};
pub use read::ReadEngine;
