//! Transport layer contract.
//!
//! The harness drives a reconnecting, optionally encrypted stream transport
//! through these traits. The transport owns handshake, encryption and
//! reconnection; the harness only supplies the listener factory and, for
//! unstable variants, a [`BaseRewriter`] that the transport applies to its
//! physical connection before I/O.
//!
//! ```text
//! Transport::listen(config, factory)
//!   ↓
//! TransportListener::accept()
//!   ↓
//! TransportConn::wrap_base_for_test(rewriter)   (unstable variants only)
//!   ↓
//! read / write  →  rewriter(base)  →  base.read / base.write
//! ```

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::conn::{Conn, Listener};

/// Replaces the base connection a transport connection performs I/O on.
///
/// Called with the current base; whatever it returns becomes the new base.
/// Implementations must be idempotent since the transport may call it
/// before every physical read or write.
pub type BaseRewriter = Box<dyn FnMut(Box<dyn Conn>) -> Box<dyn Conn> + Send>;

/// Produces the physical listener a transport accepts on
pub type ListenerFactory = Arc<dyn Fn() -> io::Result<Box<dyn Listener>> + Send + Sync>;

/// Settings handed to the transport layer when listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub enable_crypt: bool,
    pub handshake_timeout: Duration,
    pub rewriter_buffer_size: usize,
    pub reconn_wait_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enable_crypt: false,
            handshake_timeout: Duration::from_secs(5),
            rewriter_buffer_size: 1024,
            reconn_wait_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl TransportConfig {
    pub fn with_crypt(mut self, enable: bool) -> Self {
        self.enable_crypt = enable;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_rewriter_buffer_size(mut self, size: usize) -> Self {
        self.rewriter_buffer_size = size;
        self
    }

    pub fn with_reconn_wait_timeout(mut self, timeout: Duration) -> Self {
        self.reconn_wait_timeout = timeout;
        self
    }
}

/// A stream transport that can listen through a caller-supplied factory.
pub trait Transport: Send + Sync + 'static {
    type Listener: TransportListener;

    /// Start listening. The transport calls `factory` for the physical
    /// listener and layers its own session handling on top.
    fn listen(
        &self,
        config: &TransportConfig,
        factory: ListenerFactory,
    ) -> io::Result<Self::Listener>;
}

pub trait TransportListener: Send + 'static {
    type Conn: TransportConn;

    /// Block until a session is established
    fn accept(&self) -> io::Result<Self::Conn>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// A logical session. Its identity survives base connection swaps.
pub trait TransportConn: Read + Write + Send + 'static {
    /// Install `rewriter` as the live-swap hook for this session's base
    /// connection. Replaces any previously installed hook.
    fn wrap_base_for_test(&mut self, rewriter: BaseRewriter);

    /// Close the session. Must be idempotent.
    fn close(&mut self) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_harness_settings() {
        let config = TransportConfig::default();
        assert!(!config.enable_crypt);
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.rewriter_buffer_size, 1024);
        assert_eq!(config.reconn_wait_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::default()
            .with_crypt(true)
            .with_handshake_timeout(Duration::from_millis(10))
            .with_rewriter_buffer_size(64)
            .with_reconn_wait_timeout(Duration::from_secs(1));
        assert!(config.enable_crypt);
        assert_eq!(config.handshake_timeout, Duration::from_millis(10));
        assert_eq!(config.rewriter_buffer_size, 64);
        assert_eq!(config.reconn_wait_timeout, Duration::from_secs(1));
    }
}
