//! In-memory base connection for driving [`UnstableConn`] without sockets.
//!
//! [`UnstableConn`]: flake::UnstableConn

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use flake::Conn;

/// Loopback connection: reads return what was written, EOF when drained.
#[derive(Debug, Default)]
pub struct MemoryConn {
    buffer: VecDeque<u8>,
    closed: bool,
    closes: Arc<AtomicU64>,
}

impl MemoryConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every effective close into `counter`
    pub fn with_close_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.closes = counter;
        self
    }

    /// Queue bytes for the next reads
    pub fn with_input(mut self, input: &[u8]) -> Self {
        self.buffer.extend(input);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Read for MemoryConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory conn closed"));
        }
        let n = buf.len().min(self.buffer.len());
        for (dst, src) in buf.iter_mut().zip(self.buffer.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MemoryConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory conn closed"));
        }
        self.buffer.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Conn for MemoryConn {
    fn close(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback() {
        let mut conn = MemoryConn::new();
        conn.write_all(b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(conn.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(conn.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_close_counts_once() {
        let counter = Arc::new(AtomicU64::new(0));
        let mut conn = MemoryConn::new().with_close_counter(counter.clone());
        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(conn.write(b"x").is_err());
        assert!(conn.read(&mut [0u8; 1]).is_err());
    }
}
