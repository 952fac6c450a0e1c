//! Types crossing the SDK boundary.

use cfs_types::{ExtentId, InodeId, PartitionId};
use serde::{Deserialize, Serialize};

/// Inode attributes as reported by the metadata service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatInfo {
    pub ino: InodeId,
    pub size: u64,
    pub blocks: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub atime_nsec: u32,
    pub mtime_nsec: u32,
    pub ctime_nsec: u32,
    pub mode: u32,
    pub nlink: u32,
    pub blk_size: u32,
    pub uid: u32,
    pub gid: u32,
}

impl StatInfo {
    /// Whether the mode bits describe a directory.
    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }

    /// Whether the mode bits describe a regular file.
    pub fn is_regular(&self) -> bool {
        self.mode & 0o170000 == 0o100000
    }
}

/// One extent-location descriptor covering part of a read range.
///
/// Produced by the extent query for `[offset, offset + count)`. A
/// `partition_id` of zero is the hole sentinel: no physical data exists and
/// the covered region reads as zeroes. Concrete descriptors name the storage
/// node (`host`, `port`) and the physical coordinates of the data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtentRequest {
    pub partition_id: PartitionId,
    pub extent_id: ExtentId,
    /// Offset of the requested data within the extent.
    pub extent_offset: u64,
    /// Number of bytes this descriptor accounts for.
    pub size: usize,
    /// Offset of this region within the file.
    pub file_offset: u64,
    pub host: String,
    pub port: u16,
}

impl ExtentRequest {
    /// Whether this descriptor names a hole (zero-fill, no network I/O).
    pub fn is_hole(&self) -> bool {
        *self.partition_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stat_mode_bits() {
        let mut s = StatInfo::default();
        s.mode = 0o040755;
        assert!(s.is_dir());
        assert!(!s.is_regular());

        s.mode = 0o100644;
        assert!(s.is_regular());
        assert!(!s.is_dir());
    }

    #[test]
    fn test_hole_sentinel() {
        let hole = ExtentRequest {
            size: 4096,
            ..Default::default()
        };
        assert!(hole.is_hole());

        let concrete = ExtentRequest {
            partition_id: PartitionId(7),
            extent_id: ExtentId(1),
            size: 4096,
            host: "10.0.0.1".into(),
            port: 17030,
            ..Default::default()
        };
        assert!(!concrete.is_hole());
    }
}
