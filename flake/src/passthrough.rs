//! Passthrough transport.
//!
//! Implements the transport contract with no handshake, no encryption and
//! no reconnection: a session is its accepted base connection. It applies
//! the installed rewriter before every physical read and write, which is the
//! most demanding cadence a real transport can use, so the harness can be
//! run and tested without one.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use tracing::warn;

use crate::conn::{closed_error, Conn, Listener};
use crate::transport::{
    BaseRewriter, ListenerFactory, Transport, TransportConfig, TransportConn, TransportListener,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTransport;

impl Transport for PassthroughTransport {
    type Listener = PassthroughListener;

    fn listen(
        &self,
        config: &TransportConfig,
        factory: ListenerFactory,
    ) -> io::Result<Self::Listener> {
        if config.enable_crypt {
            warn!("passthrough transport does not encrypt; enable_crypt is ignored");
        }
        let inner = factory()?;
        Ok(PassthroughListener { inner })
    }
}

#[derive(Debug)]
pub struct PassthroughListener {
    inner: Box<dyn Listener>,
}

impl TransportListener for PassthroughListener {
    type Conn = PassthroughConn;

    fn accept(&self) -> io::Result<Self::Conn> {
        self.inner.accept().map(PassthroughConn::new)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

pub struct PassthroughConn {
    base: Option<Box<dyn Conn>>,
    rewriter: Option<BaseRewriter>,
    closed: bool,
}

impl PassthroughConn {
    pub fn new(base: Box<dyn Conn>) -> Self {
        Self { base: Some(base), rewriter: None, closed: false }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current base after running it through the rewriter
    fn base_for_io(&mut self) -> io::Result<&mut Box<dyn Conn>> {
        if self.closed {
            return Err(closed_error());
        }
        let mut base = self.base.take().ok_or_else(closed_error)?;
        if let Some(rewrite) = self.rewriter.as_mut() {
            base = rewrite(base);
        }
        Ok(self.base.insert(base))
    }
}

impl fmt::Debug for PassthroughConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughConn")
            .field("base", &self.base)
            .field("rewriter", &self.rewriter.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Read for PassthroughConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.base_for_io()?.read(buf)
    }
}

impl Write for PassthroughConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.base_for_io()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.base_for_io()?.flush()
    }
}

impl TransportConn for PassthroughConn {
    fn wrap_base_for_test(&mut self, rewriter: BaseRewriter) {
        self.rewriter = Some(rewriter);
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.base.as_mut() {
            Some(base) => base.close(),
            None => Ok(()),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.base.as_ref().ok_or_else(closed_error)?.peer_addr()
    }
}
