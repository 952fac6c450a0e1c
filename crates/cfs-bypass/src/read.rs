//! The hybrid read engine.
//!
//! A remote read is first attempted directly against storage-node sockets
//! using pre-resolved extent locations, skipping the metadata-service round
//! trip. The direct attempt is best-effort: any transport failure, short
//! exchange, or gap in coverage makes its result unusable, because a read
//! that returns fewer bytes than are actually available is not a valid
//! `read()` result. Whenever the direct attempt cannot account for the full
//! request, the engine falls back to the SDK's own read call, whose result
//! is final and authoritative. Direct-path errors never reach the caller;
//! a flaky storage node costs latency, not correctness.

use cfs_net::{ConnPool, NetError, ReadRequestPacket};
use cfs_sdk::{CfsSdk, ExtentRequest};
use cfs_types::{ClientId, HandleId};
use std::sync::Arc;
use tracing::debug;

/// Extent descriptors requested per direct attempt. Bounds the attempt: at
/// most this many socket exchanges happen before the engine gives up.
pub const MAX_EXTENT_REQUESTS: usize = 3;

/// Outcome of the direct attempt. `Short` never carries an error: the
/// distinction the caller may act on is only "fully accounted" vs not, so
/// absorbing transport failures is enforced by the type rather than by
/// discipline at each failure site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FastRead {
    /// Every requested byte is in the buffer.
    Complete(usize),
    /// Only a prefix (possibly empty) was satisfied; the buffer contents
    /// beyond the fallback's own result must not be trusted.
    Short(usize),
}

pub struct ReadEngine {
    pool: Arc<ConnPool>,
}

impl ReadEngine {
    pub fn new(pool: Arc<ConnPool>) -> Self {
        Self { pool }
    }

    /// Read `buf.len()` bytes at `offset`, preferring the direct path.
    /// Returns the SDK signed convention (bytes read, or `-errno`).
    pub fn read(
        &self,
        sdk: &dyn CfsSdk,
        id: ClientId,
        handle: HandleId,
        buf: &mut [u8],
        offset: u64,
    ) -> i64 {
        match self.try_direct(sdk, id, handle, buf, offset) {
            FastRead::Complete(n) => n as i64,
            FastRead::Short(n) => {
                debug!(
                    %handle,
                    offset,
                    count = buf.len(),
                    direct = n,
                    "direct read short, falling back to sdk read"
                );
                sdk.read(id, handle, buf, offset)
            }
        }
    }

    fn try_direct(
        &self,
        sdk: &dyn CfsSdk,
        id: ClientId,
        handle: HandleId,
        buf: &mut [u8],
        offset: u64,
    ) -> FastRead {
        let count = buf.len();
        let requests = sdk.read_requests(id, handle, count, offset, MAX_EXTENT_REQUESTS);

        let mut total = 0usize;
        for req in &requests {
            if req.size == 0 || total + req.size > count {
                break;
            }
            let dest = &mut buf[total..total + req.size];

            if req.is_hole() {
                dest.fill(0);
                total += req.size;
                continue;
            }

            match self.read_extent(req, dest) {
                Ok(n) => {
                    total += n;
                    if n != req.size {
                        break;
                    }
                }
                Err(err) => {
                    debug!(%handle, host = %req.host, port = req.port, %err, "direct extent read failed");
                    break;
                }
            }
        }

        if total >= count {
            FastRead::Complete(total)
        } else {
            FastRead::Short(total)
        }
    }

    /// One request/reply exchange against the extent's storage node. The
    /// connection goes back to the pool only after a fully successful
    /// exchange; on any error it is dropped, since its stream state is
    /// unknown.
    fn read_extent(&self, req: &ExtentRequest, dest: &mut [u8]) -> Result<usize, NetError> {
        let packet = ReadRequestPacket::new(
            req.partition_id,
            req.extent_id,
            req.extent_offset,
            req.size as u32,
            req.file_offset,
        );
        let mut conn = self.pool.acquire(&req.host, req.port)?;
        packet.send(&mut conn)?;
        let n = packet.read_reply(&mut conn, dest)?;
        self.pool.release(&req.host, req.port, conn);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfs_net::packet::{self, PACKET_HEADER_SIZE};
    use cfs_sdk::MockSdk;
    use cfs_types::{ExtentId, PartitionId};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-process storage node serving a fixed byte pattern: the payload
    /// byte at file offset `o` is `o as u8`. Counts served exchanges.
    /// `truncate_to` caps every reply payload to simulate short exchanges.
    fn spawn_extent_server(truncate_to: Option<usize>) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let exchanges = Arc::new(AtomicUsize::new(0));
        let counter = exchanges.clone();

        std::thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let mut header = [0u8; PACKET_HEADER_SIZE];
                    while stream.read_exact(&mut header).is_ok() {
                        let req = packet::decode_request(&header).unwrap();
                        counter.fetch_add(1, Ordering::SeqCst);

                        let mut len = req.size as usize;
                        if let Some(cap) = truncate_to {
                            len = len.min(cap);
                        }
                        let payload: Vec<u8> = (0..len)
                            .map(|i| (req.file_offset + i as u64) as u8)
                            .collect();
                        if stream
                            .write_all(&packet::encode_reply(&req, &payload))
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
        });

        (port, exchanges)
    }

    fn expected_pattern(offset: u64, len: usize) -> Vec<u8> {
        (0..len).map(|i| (offset + i as u64) as u8).collect()
    }

    fn concrete(port: u16, size: usize, file_offset: u64) -> ExtentRequest {
        ExtentRequest {
            partition_id: PartitionId(7),
            extent_id: ExtentId(1),
            extent_offset: file_offset,
            size,
            file_offset,
            host: "127.0.0.1".into(),
            port,
        }
    }

    fn engine() -> ReadEngine {
        ReadEngine::new(Arc::new(ConnPool::new()))
    }

    #[test]
    fn test_full_coverage_single_descriptor_skips_fallback() {
        let (port, exchanges) = spawn_extent_server(None);
        let sdk = MockSdk::new();
        sdk.on_read_requests(move |(_, count, offset)| vec![concrete(port, count, offset)]);
        let fallbacks = Arc::new(AtomicUsize::new(0));
        let fb = fallbacks.clone();
        sdk.on_read(move |_| {
            fb.fetch_add(1, Ordering::SeqCst);
            (0, Vec::new())
        });

        let id = sdk.new_client();
        let mut buf = vec![0u8; 4096];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);

        assert_eq!(re, 4096);
        assert_eq!(buf, expected_pattern(0, 4096));
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_short_exchange_falls_back_and_fallback_result_wins() {
        // Node answers at most 100 bytes per exchange.
        let (port, _) = spawn_extent_server(Some(100));
        let sdk = MockSdk::new();
        sdk.on_read_requests(move |(_, count, offset)| vec![concrete(port, count, offset)]);
        let fallbacks = Arc::new(AtomicUsize::new(0));
        let fb = fallbacks.clone();
        sdk.on_read(move |(_, len, _)| {
            fb.fetch_add(1, Ordering::SeqCst);
            (len as i64, vec![0xEE; len])
        });

        let id = sdk.new_client();
        let mut buf = vec![0u8; 4096];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);

        assert_eq!(re, 4096);
        assert_eq!(fallbacks.load(Ordering::SeqCst), 1);
        assert!(buf.iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_hole_descriptor_zero_fills_without_network() {
        let sdk = MockSdk::new();
        sdk.on_read_requests(|(_, count, _)| {
            vec![ExtentRequest {
                size: count,
                ..Default::default()
            }]
        });

        let id = sdk.new_client();
        let mut buf = vec![0xFFu8; 512];
        // Unroutable host on the descriptor would fail acquire; a hole must
        // never get that far.
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);

        assert_eq!(re, 512);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_hole_then_concrete_descriptor() {
        let (port, exchanges) = spawn_extent_server(None);
        let sdk = MockSdk::new();
        sdk.on_read_requests(move |(_, count, offset)| {
            let hole = count / 2;
            vec![
                ExtentRequest {
                    size: hole,
                    file_offset: offset,
                    ..Default::default()
                },
                concrete(port, count - hole, offset + hole as u64),
            ]
        });

        let id = sdk.new_client();
        let mut buf = vec![0xFFu8; 1024];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);

        assert_eq!(re, 1024);
        assert!(buf[..512].iter().all(|&b| b == 0));
        assert_eq!(&buf[512..], &expected_pattern(512, 512)[..]);
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_extent_query_falls_back() {
        let sdk = MockSdk::new();
        // Default mock: read_requests returns no coverage.
        sdk.on_read(|(_, len, _)| (len as i64, vec![0xAA; len]));

        let id = sdk.new_client();
        let mut buf = vec![0u8; 256];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);

        assert_eq!(re, 256);
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_unreachable_node_is_absorbed_and_falls_back() {
        // Nothing listens on this port.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let sdk = MockSdk::new();
        sdk.on_read_requests(move |(_, count, offset)| vec![concrete(port, count, offset)]);
        sdk.on_read(|(_, len, _)| (len as i64, vec![0xBB; len]));

        let id = sdk.new_client();
        let mut buf = vec![0u8; 128];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);

        // The transport failure is invisible; only the fallback's result
        // comes back.
        assert_eq!(re, 128);
        assert!(buf.iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn test_fallback_error_is_caller_visible() {
        let sdk = MockSdk::new();
        sdk.on_read(|_| (-(libc::EIO as i64), Vec::new()));

        let id = sdk.new_client();
        let mut buf = vec![0u8; 64];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);
        assert_eq!(re, -(libc::EIO as i64));
    }

    #[test]
    fn test_oversized_descriptor_coverage_is_rejected() {
        let sdk = MockSdk::new();
        // Descriptors claim more than was asked for; the direct path must
        // not write past the request and must defer to the fallback.
        sdk.on_read_requests(|(_, count, _)| {
            vec![ExtentRequest {
                size: count * 2,
                ..Default::default()
            }]
        });
        sdk.on_read(|(_, len, _)| (len as i64, vec![0xCC; len]));

        let id = sdk.new_client();
        let mut buf = vec![0u8; 64];
        let re = engine().read(&sdk, id, HandleId(1), &mut buf, 0);
        assert_eq!(re, 64);
        assert!(buf.iter().all(|&b| b == 0xCC));
    }

    #[test]
    fn test_connection_reused_across_reads() {
        let (port, exchanges) = spawn_extent_server(None);
        let pool = Arc::new(ConnPool::new());
        let engine = ReadEngine::new(pool.clone());
        let sdk = MockSdk::new();
        sdk.on_read_requests(move |(_, count, offset)| vec![concrete(port, count, offset)]);

        let id = sdk.new_client();
        let mut buf = vec![0u8; 256];
        assert_eq!(engine.read(&sdk, id, HandleId(1), &mut buf, 0), 256);
        assert_eq!(pool.idle_count("127.0.0.1", port), 1);
        assert_eq!(engine.read(&sdk, id, HandleId(1), &mut buf, 256), 256);
        assert_eq!(pool.idle_count("127.0.0.1", port), 1);
        assert_eq!(exchanges.load(Ordering::SeqCst), 2);
    }
}
