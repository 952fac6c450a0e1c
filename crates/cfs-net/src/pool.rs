//! Keyed pool of storage-node connections.
//!
//! Connections are checked out by `(host, port)`, used for one
//! request/reply exchange, and returned with [`ConnPool::release`] only if
//! the exchange succeeded. A connection suspected unhealthy is simply
//! dropped instead of released, so the pool never re-hands-out a socket
//! whose stream state is unknown.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::NetError;

/// Idle connections kept per node before further releases are dropped.
const DEFAULT_MAX_IDLE_PER_NODE: usize = 8;

/// Default connect / read / write timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnPool {
    idle: Mutex<HashMap<(String, u16), Vec<TcpStream>>>,
    max_idle_per_node: usize,
    timeout: Duration,
}

impl ConnPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_IDLE_PER_NODE, DEFAULT_TIMEOUT)
    }

    pub fn with_limits(max_idle_per_node: usize, timeout: Duration) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            max_idle_per_node,
            timeout,
        }
    }

    /// Check out a connection to `host:port`, reusing an idle one when
    /// available.
    pub fn acquire(&self, host: &str, port: u16) -> Result<TcpStream, NetError> {
        if let Some(conn) = self
            .idle
            .lock()
            .get_mut(&(host.to_string(), port))
            .and_then(Vec::pop)
        {
            return Ok(conn);
        }

        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| NetError::ConnectFailed(format!("{host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| NetError::ConnectFailed(format!("{host}:{port}: no address")))?;

        let conn = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| NetError::ConnectFailed(format!("{host}:{port}: {e}")))?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        conn.set_nodelay(true)?;
        debug!(host, port, "new storage node connection");
        Ok(conn)
    }

    /// Return a healthy connection. Dropped silently once the per-node idle
    /// limit is reached.
    pub fn release(&self, host: &str, port: u16, conn: TcpStream) {
        let mut idle = self.idle.lock();
        let slot = idle.entry((host.to_string(), port)).or_default();
        if slot.len() < self.max_idle_per_node {
            slot.push(conn);
        }
    }

    /// Number of idle connections for a node. Diagnostics only.
    pub fn idle_count(&self, host: &str, port: u16) -> usize {
        self.idle
            .lock()
            .get(&(host.to_string(), port))
            .map_or(0, Vec::len)
    }

    /// Drop all idle connections.
    pub fn clear(&self) {
        self.idle.lock().clear();
    }
}

impl Default for ConnPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    fn echo_listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_acquire_connects_and_release_reuses() {
        let (listener, port) = echo_listener();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                // keep sockets open so the pool can reuse them
                std::mem::forget(stream);
            }
        });

        let pool = ConnPool::new();
        let conn = pool.acquire("127.0.0.1", port).unwrap();
        assert_eq!(pool.idle_count("127.0.0.1", port), 0);

        pool.release("127.0.0.1", port, conn);
        assert_eq!(pool.idle_count("127.0.0.1", port), 1);

        let _conn = pool.acquire("127.0.0.1", port).unwrap();
        assert_eq!(pool.idle_count("127.0.0.1", port), 0);
    }

    #[test]
    fn test_idle_limit_drops_excess() {
        let (listener, port) = echo_listener();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                std::mem::forget(stream);
            }
        });

        let pool = ConnPool::with_limits(1, DEFAULT_TIMEOUT);
        let a = pool.acquire("127.0.0.1", port).unwrap();
        let b = pool.acquire("127.0.0.1", port).unwrap();
        pool.release("127.0.0.1", port, a);
        pool.release("127.0.0.1", port, b);
        assert_eq!(pool.idle_count("127.0.0.1", port), 1);
    }

    #[test]
    fn test_acquire_refused_port_fails() {
        // Bind then immediately drop to get a port nothing listens on.
        let (listener, port) = echo_listener();
        drop(listener);

        let pool = ConnPool::with_limits(4, Duration::from_millis(200));
        let result = pool.acquire("127.0.0.1", port);
        assert!(matches!(result, Err(NetError::ConnectFailed(_))));
    }

    #[test]
    fn test_pooled_connection_is_usable() {
        let (listener, port) = echo_listener();
        std::thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                std::thread::spawn(move || {
                    let mut buf = [0u8; 4];
                    if stream.read_exact(&mut buf).is_ok() {
                        let _ = stream.write_all(&buf);
                    }
                });
            }
        });

        let pool = ConnPool::new();
        let mut conn = pool.acquire("127.0.0.1", port).unwrap();
        conn.write_all(b"ping").unwrap();
        let mut reply = [0u8; 4];
        conn.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"ping");
        pool.release("127.0.0.1", port, conn);
    }
}
