//! Variant servers: one echo service per (encryption × instability) setting.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, info_span, warn};

use crate::conn::{Listener, TcpBaseListener};
use crate::constants::ECHO_BUFFER_SIZE;
use crate::error::{FlakeError, Result};
use crate::fault::{FaultSource, FaultStats};
use crate::transport::{
    BaseRewriter, ListenerFactory, Transport, TransportConfig, TransportConn, TransportListener,
};
use crate::unstable::{FaultInjector, UnstableListener};

/// One configuration point of the harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantConfig {
    pub enable_crypt: bool,
    pub unstable: bool,
    pub port: u16,
}

impl VariantConfig {
    pub fn new(port: u16) -> Self {
        Self { enable_crypt: false, unstable: false, port }
    }

    pub fn with_crypt(mut self, enable: bool) -> Self {
        self.enable_crypt = enable;
        self
    }

    pub fn with_unstable(mut self, unstable: bool) -> Self {
        self.unstable = unstable;
        self
    }

    /// The four canonical variants on sequential ports from `base_port`:
    /// stable, stable+crypt, unstable, unstable+crypt. A base of `0` gives
    /// every variant an ephemeral port.
    pub fn canonical(base_port: u16) -> Result<[Self; 4]> {
        if base_port != 0 && base_port.checked_add(3).is_none() {
            return Err(FlakeError::config(format!(
                "base port {base_port} leaves no room for four sequential ports"
            )));
        }
        let port = |offset: u16| if base_port == 0 { 0 } else { base_port + offset };
        Ok([
            Self::new(port(0)),
            Self::new(port(1)).with_crypt(true),
            Self::new(port(2)).with_unstable(true),
            Self::new(port(3)).with_unstable(true).with_crypt(true),
        ])
    }
}

impl fmt::Display for VariantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}:{}",
            if self.unstable { "unstable" } else { "stable" },
            if self.enable_crypt { "crypt" } else { "plain" },
            self.port
        )
    }
}

/// Echo service bound to one [`VariantConfig`]
pub struct VariantServer<T: Transport> {
    config: VariantConfig,
    listener: T::Listener,
    injector: FaultInjector,
}

impl<T: Transport> VariantServer<T> {
    /// Listen through `transport` on `host:port`.
    ///
    /// The physical listener is wrapped in an [`UnstableListener`] with
    /// injection off; unstable variants switch it on per connection through
    /// the live-swap hook.
    pub fn bind(
        transport: &T,
        host: &str,
        config: VariantConfig,
        transport_config: &TransportConfig,
        source: Arc<dyn FaultSource>,
    ) -> Result<Self> {
        let injector =
            FaultInjector::new(config.unstable, source).with_stats(Arc::new(FaultStats::new()));
        let accept_injector = injector.enabled(false);
        let addr = format!("{host}:{}", config.port);

        let factory: ListenerFactory = Arc::new(move || -> io::Result<Box<dyn Listener>> {
            let inner = TcpBaseListener::bind(addr.as_str())?;
            Ok(Box::new(UnstableListener::with_injector(Box::new(inner), accept_injector.clone())))
        });

        let transport_config = transport_config.clone().with_crypt(config.enable_crypt);
        let listener = transport
            .listen(&transport_config, factory)
            .map_err(|source| FlakeError::Listen { port: config.port, source })?;

        match listener.local_addr() {
            Ok(addr) => info!(variant = %config, %addr, "server start"),
            Err(e) => warn!(variant = %config, error = %e, "server start, local address unknown"),
        }

        Ok(Self { config, listener, injector })
    }

    pub fn config(&self) -> VariantConfig {
        self.config
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Fault counters for all connections of this variant
    pub fn stats(&self) -> Arc<FaultStats> {
        self.injector.stats().clone()
    }

    /// Accept loop. Each session gets its own thread; returns only when the
    /// listener fails, which is fatal for the variant.
    pub fn serve(self) -> Result<()> {
        let port = self.config.port;
        loop {
            let conn = self
                .listener
                .accept()
                .map_err(|source| FlakeError::Accept { port, source })?;

            let peer = conn.peer_addr().ok();
            info!(variant = %self.config, ?peer, "new client");

            let rewriter = self.config.unstable.then(|| self.injector.rewriter());
            let span = info_span!("conn", variant = %self.config, ?peer);
            let spawned = thread::Builder::new()
                .name(format!("flake-conn-{port}"))
                .spawn(move || {
                    let _guard = span.enter();
                    echo(conn, rewriter);
                });
            if let Err(e) = spawned {
                warn!(variant = %self.config, error = %e, "failed to spawn connection thread");
            }
        }
    }
}

/// Echo loop for one session. Any read or write error, injected or not,
/// ends the session; retrying is the transport's job.
pub fn echo<C: TransportConn>(mut conn: C, rewriter: Option<BaseRewriter>) {
    if let Some(rewriter) = rewriter {
        conn.wrap_base_for_test(rewriter);
    }

    let mut buf = [0u8; ECHO_BUFFER_SIZE];
    let mut echoed = 0u64;
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) => {
                debug!("peer closed");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "read failed");
                break;
            }
        };
        if let Err(e) = conn.write_all(&buf[..n]) {
            debug!(error = %e, "write failed");
            break;
        }
        echoed += n as u64;
    }

    if let Err(e) = conn.close() {
        debug!(error = %e, "close failed");
    }
    info!(echoed, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::ThreadRngSource;
    use crate::passthrough::PassthroughTransport;
    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn start(config: VariantConfig) -> SocketAddr {
        let server = VariantServer::bind(
            &PassthroughTransport,
            "127.0.0.1",
            config,
            &TransportConfig::default(),
            Arc::new(ThreadRngSource),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        thread::spawn(move || server.serve());
        addr
    }

    #[test]
    fn test_canonical_variants() {
        let variants = VariantConfig::canonical(10010).unwrap();
        let ports: Vec<u16> = variants.iter().map(|v| v.port).collect();
        assert_eq!(ports, vec![10010, 10011, 10012, 10013]);
        assert_eq!(variants[0], VariantConfig::new(10010));
        assert!(variants[1].enable_crypt && !variants[1].unstable);
        assert!(!variants[2].enable_crypt && variants[2].unstable);
        assert!(variants[3].enable_crypt && variants[3].unstable);
        assert_eq!(variants[3].to_string(), "unstable/crypt:10013");
    }

    #[test]
    fn test_canonical_ephemeral_ports() {
        assert!(VariantConfig::canonical(0).unwrap().iter().all(|v| v.port == 0));
    }

    #[test]
    fn test_canonical_rejects_port_overflow() {
        assert_eq!(VariantConfig::canonical(65532).unwrap()[3].port, 65535);
        assert!(matches!(VariantConfig::canonical(65533), Err(FlakeError::InvalidConfig { .. })));
        assert!(VariantConfig::canonical(u16::MAX).is_err());
    }

    #[test]
    fn test_stable_variant_echoes_ping() {
        let addr = start(VariantConfig::new(0));
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_server_keeps_accepting_after_client_leaves() {
        let addr = start(VariantConfig::new(0).with_crypt(true));
        for round in 0..3u8 {
            let mut client = TcpStream::connect(addr).unwrap();
            client.write_all(&[round]).unwrap();
            let mut buf = [0u8; 1];
            client.read_exact(&mut buf).unwrap();
            assert_eq!(buf[0], round);
        }
    }

    #[test]
    fn test_bind_conflict_is_listen_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let result = VariantServer::bind(
            &PassthroughTransport,
            "127.0.0.1",
            VariantConfig::new(port),
            &TransportConfig::default(),
            Arc::new(ThreadRngSource),
        );
        match result {
            Err(FlakeError::Listen { port: p, .. }) => assert_eq!(p, port),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("bind on a taken port succeeded"),
        }
    }
}
