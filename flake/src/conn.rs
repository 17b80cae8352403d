//! Base connections and listeners.
//!
//! [`Conn`] is the physical stream a transport performs I/O on and the unit
//! the fault injector wraps. Closing is idempotent, and I/O on a closed
//! connection fails with `NotConnected` instead of reporting EOF, so an
//! injected close surfaces exactly like a dead socket.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use tracing::trace;

use crate::unstable::UnstableConn;

/// A bidirectional byte stream the transport layer reads and writes.
pub trait Conn: Read + Write + Send + fmt::Debug {
    /// Close the connection. Closing an already closed connection is a no-op.
    fn close(&mut self) -> io::Result<()>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Capability check used by the fault injector to avoid wrapping its own
    /// wrapper. Only [`UnstableConn`] returns `Some`.
    fn as_unstable_mut(&mut self) -> Option<&mut UnstableConn> {
        None
    }
}

/// Source of base connections.
pub trait Listener: Send + fmt::Debug {
    fn accept(&self) -> io::Result<Box<dyn Conn>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "use of closed connection")
}

/// TCP stream as a [`Conn`]
#[derive(Debug)]
pub struct TcpConn {
    stream: Option<TcpStream>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl TcpConn {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream: Some(stream), local, peer })
    }

    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Self::new(TcpStream::connect(addr)?)
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(closed_error)
    }
}

impl Read for TcpConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for TcpConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl Conn for TcpConn {
    fn close(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        trace!(peer = %self.peer, "closing tcp connection");
        // The peer may already have reset the socket.
        match stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.peer)
    }
}

/// TCP listener producing [`TcpConn`]s
#[derive(Debug)]
pub struct TcpBaseListener {
    inner: TcpListener,
}

impl TcpBaseListener {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Ok(Self { inner: TcpListener::bind(addr)? })
    }

    pub fn from_std(inner: TcpListener) -> Self {
        Self { inner }
    }
}

impl Listener for TcpBaseListener {
    fn accept(&self) -> io::Result<Box<dyn Conn>> {
        let (stream, _addr) = self.inner.accept()?;
        Ok(Box::new(TcpConn::new(stream)?))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pair() -> (TcpConn, TcpConn) {
        let listener = TcpBaseListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpConn::connect(addr).unwrap());
        let server = TcpConn::new(listener.inner.accept().unwrap().0).unwrap();
        (server, client.join().unwrap())
    }

    #[test]
    fn test_tcp_conn_round_trip() {
        let (mut server, mut client) = pair();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(server.peer_addr().unwrap(), client.local_addr().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut server, _client) = pair();
        server.close().unwrap();
        server.close().unwrap();
        assert!(server.is_closed());
    }

    #[test]
    fn test_io_after_close_is_an_error() {
        let (mut server, _client) = pair();
        server.close().unwrap();

        let err = server.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        let err = server.read(&mut [0u8; 1]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_peer_sees_eof_after_close() {
        let (mut server, mut client) = pair();
        server.close().unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }
}
