//! Boundary to the CFS client SDK.
//!
//! The bypass layer consumes the SDK as an opaque service: every operation
//! takes an opaque client-session id, and status-returning operations follow
//! the signed convention normalized by `cfs_types::errno` (negative `-E`
//! means host errno `E`). The [`CfsSdk`] trait is the seam; production wires
//! in the real client library, tests use [`MockSdk`].

pub mod client;
pub mod mock;
pub mod types;

pub use client::CfsSdk;
pub use mock::MockSdk;
pub use types::{ExtentRequest, StatInfo};
