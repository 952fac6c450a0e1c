//! The extent read packet.
//!
//! One request/reply exchange per extent descriptor. The request carries the
//! physical coordinates of the data (partition, extent, extent-internal
//! offset) plus the requested length; the reply echoes the coordinates, and
//! its payload is the data itself, CRC32C checksummed. The reply must
//! correlate with the request on every coordinate field before its payload
//! is accepted.

use std::io::{Read, Write};

use byteorder::{ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};
use cfs_types::{ExtentId, PartitionId};

use crate::error::NetError;

/// First byte of every packet.
pub const PACKET_MAGIC: u8 = 0xCF;

/// Opcode for a streaming extent read.
pub const OP_STREAM_READ: u8 = 0x05;

/// Result code for a successful reply.
pub const RESULT_OK: u8 = 0x00;

/// Fixed size of the wire header in bytes.
///
/// magic(1) opcode(1) result(1) reserved(1) crc(4) size(4)
/// partition(8) extent(8) extent_offset(8) file_offset(8) req_id(8)
pub const PACKET_HEADER_SIZE: usize = 52;

/// A read request addressed to one extent on one storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequestPacket {
    pub partition_id: PartitionId,
    pub extent_id: ExtentId,
    pub extent_offset: u64,
    /// Requested number of bytes.
    pub size: u32,
    /// Offset of the region within the file, echoed for diagnostics.
    pub file_offset: u64,
    pub req_id: u64,
}

impl ReadRequestPacket {
    /// Build a request for the given extent coordinates with a fresh
    /// request id.
    pub fn new(
        partition_id: PartitionId,
        extent_id: ExtentId,
        extent_offset: u64,
        size: u32,
        file_offset: u64,
    ) -> Self {
        Self {
            partition_id,
            extent_id,
            extent_offset,
            size,
            file_offset,
            req_id: rand::random(),
        }
    }

    /// Serialize the request header. Read requests carry no payload; the
    /// `size` field names the number of bytes wanted back.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE);
        buf.put_u8(PACKET_MAGIC);
        buf.put_u8(OP_STREAM_READ);
        buf.put_u8(RESULT_OK);
        buf.put_u8(0); // reserved
        buf.put_u32_le(0); // crc: request payload is empty
        buf.put_u32_le(self.size);
        buf.put_u64_le(*self.partition_id);
        buf.put_u64_le(*self.extent_id);
        buf.put_u64_le(self.extent_offset);
        buf.put_u64_le(self.file_offset);
        buf.put_u64_le(self.req_id);
        buf.freeze()
    }

    /// Write the encoded request to `w`.
    pub fn send<W: Write>(&self, w: &mut W) -> Result<(), NetError> {
        w.write_all(&self.encode())?;
        w.flush()?;
        Ok(())
    }

    /// Read the reply to this request from `r`, writing the payload into the
    /// front of `dest`. Returns the number of payload bytes.
    ///
    /// The reply is rejected unless it echoes this request's id and extent
    /// coordinates, reports success, fits in `dest`, and its payload matches
    /// the advertised CRC32C.
    pub fn read_reply<R: Read>(&self, r: &mut R, dest: &mut [u8]) -> Result<usize, NetError> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        r.read_exact(&mut header)?;

        if header[0] != PACKET_MAGIC {
            return Err(NetError::InvalidMagic(header[0]));
        }
        if header[2] != RESULT_OK {
            return Err(NetError::RemoteFailure(header[2]));
        }

        let crc = LittleEndian::read_u32(&header[4..8]);
        let size = LittleEndian::read_u32(&header[8..12]) as usize;
        let partition_id = LittleEndian::read_u64(&header[12..20]);
        let extent_id = LittleEndian::read_u64(&header[20..28]);
        let extent_offset = LittleEndian::read_u64(&header[28..36]);
        let req_id = LittleEndian::read_u64(&header[44..52]);

        if req_id != self.req_id {
            return Err(NetError::ReplyMismatch { field: "req_id" });
        }
        if partition_id != *self.partition_id {
            return Err(NetError::ReplyMismatch {
                field: "partition_id",
            });
        }
        if extent_id != *self.extent_id {
            return Err(NetError::ReplyMismatch { field: "extent_id" });
        }
        if extent_offset != self.extent_offset {
            return Err(NetError::ReplyMismatch {
                field: "extent_offset",
            });
        }
        if size > dest.len() {
            return Err(NetError::OversizedReply {
                size,
                requested: dest.len(),
            });
        }

        r.read_exact(&mut dest[..size])?;

        let actual = crc32c::crc32c(&dest[..size]);
        if actual != crc {
            return Err(NetError::ChecksumMismatch {
                expected: crc,
                actual,
            });
        }

        Ok(size)
    }
}

/// Parse a request header as a storage node would.
pub fn decode_request(header: &[u8; PACKET_HEADER_SIZE]) -> Result<ReadRequestPacket, NetError> {
    if header[0] != PACKET_MAGIC {
        return Err(NetError::InvalidMagic(header[0]));
    }
    Ok(ReadRequestPacket {
        partition_id: PartitionId(LittleEndian::read_u64(&header[12..20])),
        extent_id: ExtentId(LittleEndian::read_u64(&header[20..28])),
        extent_offset: LittleEndian::read_u64(&header[28..36]),
        size: LittleEndian::read_u32(&header[8..12]),
        file_offset: LittleEndian::read_u64(&header[36..44]),
        req_id: LittleEndian::read_u64(&header[44..52]),
    })
}

/// Serialize a success reply for `req` carrying `payload`. Test servers and
/// the loopback harness use this; production replies come from real storage
/// nodes.
pub fn encode_reply(req: &ReadRequestPacket, payload: &[u8]) -> Bytes {
    encode_reply_with_result(req, payload, RESULT_OK)
}

/// Like [`encode_reply`] but with an explicit result code.
pub fn encode_reply_with_result(
    req: &ReadRequestPacket,
    payload: &[u8],
    result: u8,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + payload.len());
    buf.put_u8(PACKET_MAGIC);
    buf.put_u8(OP_STREAM_READ);
    buf.put_u8(result);
    buf.put_u8(0);
    buf.put_u32_le(crc32c::crc32c(payload));
    buf.put_u32_le(payload.len() as u32);
    buf.put_u64_le(*req.partition_id);
    buf.put_u64_le(*req.extent_id);
    buf.put_u64_le(req.extent_offset);
    buf.put_u64_le(req.file_offset);
    buf.put_u64_le(req.req_id);
    buf.put_slice(payload);
    buf.freeze()
}
