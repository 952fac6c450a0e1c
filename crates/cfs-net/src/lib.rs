//! Wire protocol and connection management for direct storage-node reads.
//!
//! The bypass layer's fast read path talks to storage nodes over plain TCP,
//! bypassing the metadata service. This crate provides the read-request
//! packet codec and a keyed pool of node connections. Both are collaborators
//! of the hybrid read engine: any failure here is absorbed by the engine and
//! escalates to the authoritative SDK read, never to the application.

pub mod error;
pub mod packet;
pub mod pool;

pub use error::NetError;
pub use packet::ReadRequestPacket;
pub use pool::ConnPool;
