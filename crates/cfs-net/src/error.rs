use thiserror::Error;

/// Errors from the storage-node wire layer.
#[derive(Debug, Error)]
pub enum NetError {
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// No usable address or the connect attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// An I/O error from the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The reply header does not start with the protocol magic byte.
    #[error("invalid magic: {0:#04x}")]
    InvalidMagic(u8),

    /// The reply does not correlate with the request that was sent.
    #[error("reply mismatch: {field}")]
    ReplyMismatch { field: &'static str },

    /// The storage node reported a failure for the request.
    #[error("remote failure: code {0:#04x}")]
    RemoteFailure(u8),

    /// The reply payload is larger than the requested region.
    #[error("oversized reply: {size} bytes for a {requested}-byte request")]
    OversizedReply { size: usize, requested: usize },

    /// The reply payload checksum did not match the computed CRC32C.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_reply_mismatch() {
        let err = NetError::ReplyMismatch { field: "extent_id" };
        assert_eq!(err.to_string(), "reply mismatch: extent_id");
    }

    #[test]
    fn test_display_checksum_mismatch() {
        let err = NetError::ChecksumMismatch {
            expected: 0xAABBCCDD,
            actual: 0x11223344,
        };
        let s = err.to_string();
        assert!(s.contains("0xaabbccdd"));
        assert!(s.contains("0x11223344"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let err: NetError = io_err.into();
        assert!(matches!(err, NetError::Io(_)));
        assert!(err.to_string().contains("pipe broke"));
    }
}
