//! Id newtypes shared across the bypass client.

use crate::strong_type;

strong_type!(
    /// Opaque id of an SDK client session.
    ClientId,
    i64
);

strong_type!(
    /// Remote open-file handle number allocated by the SDK.
    ///
    /// Distinct from the host's integer file descriptor, which may alias a
    /// handle through duplication.
    HandleId,
    u64
);

strong_type!(
    /// Remote inode number.
    InodeId,
    u64
);

strong_type!(
    /// Data partition id on a storage node. Zero is the hole sentinel in
    /// extent-location descriptors.
    PartitionId,
    u64
);

strong_type!(
    /// Extent id within a data partition.
    ExtentId,
    u64
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_deref_and_from() {
        let h = HandleId(7);
        assert_eq!(*h, 7u64);
        let raw: u64 = h.into();
        assert_eq!(raw, 7);
        let back: HandleId = 7u64.into();
        assert_eq!(back, h);
    }

    #[test]
    fn test_display_debug() {
        let p = PartitionId(42);
        assert_eq!(format!("{}", p), "42");
        assert_eq!(format!("{:?}", p), "PartitionId(42)");
    }

    #[test]
    fn test_hash_distinct() {
        let mut set = HashSet::new();
        set.insert(InodeId(1));
        set.insert(InodeId(2));
        set.insert(InodeId(1));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_serde_transparent() {
        let id = ExtentId(1025);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "1025");
        let parsed: ExtentId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_default_is_zero() {
        assert_eq!(*ClientId::default(), 0);
        assert_eq!(*PartitionId::default(), 0);
    }
}
