//! Shared types for the CFS bypass client.
//!
//! Id newtypes used across the workspace plus the errno translation applied
//! at every remote-call boundary.

pub mod errno;
pub mod ids;
mod strong_type;

pub use errno::{translate, Translated};
pub use ids::{ClientId, ExtentId, HandleId, InodeId, PartitionId};
