//! Fault-injecting connections and listeners.
//!
//! [`UnstableConn`] closes its base connection at random before a read or
//! write and then performs the operation anyway, so the caller sees the
//! base's real error. [`FaultInjector::install`] is the one way a base
//! becomes unstable: the accept-time [`UnstableListener`] and the
//! transport's live-swap hook ([`FaultInjector::rewriter`]) both go
//! through it, which keeps a connection wrapped at most once.

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use crate::conn::{closed_error, Conn, Listener};
use crate::fault::{FaultPolicy, FaultSource, FaultStats, IoOp, ThreadRngSource};
use crate::transport::BaseRewriter;

/// Fault settings shared by every connection of one variant
#[derive(Debug, Clone)]
pub struct FaultInjector {
    enable: bool,
    policy: FaultPolicy,
    source: Arc<dyn FaultSource>,
    stats: Arc<FaultStats>,
}

impl FaultInjector {
    pub fn new(enable: bool, source: Arc<dyn FaultSource>) -> Self {
        Self {
            enable,
            policy: FaultPolicy::default(),
            source,
            stats: Arc::new(FaultStats::new()),
        }
    }

    /// Pass-through injector drawing from the thread RNG
    pub fn disabled() -> Self {
        Self::new(false, Arc::new(ThreadRngSource))
    }

    pub fn with_policy(mut self, policy: FaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_stats(mut self, stats: Arc<FaultStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Same source, policy and stats with a different enable flag
    pub fn enabled(&self, enable: bool) -> Self {
        Self { enable, ..self.clone() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enable
    }

    pub fn policy(&self) -> &FaultPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &Arc<FaultStats> {
        &self.stats
    }

    /// Install fault injection on `base`, idempotently.
    ///
    /// A base that already is an [`UnstableConn`] is returned as the same
    /// box, now drawing from this injector's source, policy and stats with
    /// its enable flag; anything else is adopted by a new wrapper.
    pub fn install(&self, mut base: Box<dyn Conn>) -> Box<dyn Conn> {
        if let Some(unstable) = base.as_unstable_mut() {
            unstable.injector = self.clone();
            return base;
        }
        Box::new(UnstableConn::adopt(base, self.clone()))
    }

    /// Live-swap hook for [`TransportConn::wrap_base_for_test`].
    ///
    /// [`TransportConn::wrap_base_for_test`]: crate::transport::TransportConn::wrap_base_for_test
    pub fn rewriter(&self) -> BaseRewriter {
        let injector = self.clone();
        Box::new(move |base| injector.install(base))
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Connection that closes its base at random before I/O.
///
/// Driven by one thread at a time; the only shared state is the injector's
/// fault source and counters.
#[derive(Debug)]
pub struct UnstableConn {
    base: Option<Box<dyn Conn>>,
    injector: FaultInjector,
}

impl UnstableConn {
    /// Wrapper with no base yet. I/O fails with `NotConnected` until a base
    /// is adopted.
    pub fn new(injector: FaultInjector) -> Self {
        Self { base: None, injector }
    }

    pub fn adopt(base: Box<dyn Conn>, injector: FaultInjector) -> Self {
        Self { base: Some(base), injector }
    }

    /// Replace the delegate, returning the previous one
    pub fn set_base(&mut self, base: Box<dyn Conn>) -> Option<Box<dyn Conn>> {
        self.base.replace(base)
    }

    pub fn has_base(&self) -> bool {
        self.base.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.injector.enable
    }

    pub fn set_enabled(&mut self, enable: bool) {
        self.injector.enable = enable;
    }

    pub fn stats(&self) -> &Arc<FaultStats> {
        &self.injector.stats
    }

    fn maybe_inject(&mut self, op: IoOp) {
        if !self.injector.enable {
            return;
        }
        let fault = self.injector.policy.should_fault(&*self.injector.source, op);
        self.injector.stats.record(op, fault);
        if !fault {
            return;
        }
        if let Some(base) = self.base.as_mut() {
            debug!(%op, "injected fault: closing base connection");
            if let Err(e) = base.close() {
                debug!(%op, error = %e, "base close failed during fault injection");
            }
        }
    }

    fn base(&mut self) -> io::Result<&mut Box<dyn Conn>> {
        self.base.as_mut().ok_or_else(closed_error)
    }
}

impl Read for UnstableConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.maybe_inject(IoOp::Read);
        self.base()?.read(buf)
    }
}

impl Write for UnstableConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.maybe_inject(IoOp::Write);
        self.base()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.base()?.flush()
    }
}

impl Conn for UnstableConn {
    fn close(&mut self) -> io::Result<()> {
        match self.base.as_mut() {
            Some(base) => base.close(),
            None => Ok(()),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.base.as_ref().ok_or_else(closed_error)?.local_addr()
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.base.as_ref().ok_or_else(closed_error)?.peer_addr()
    }

    fn as_unstable_mut(&mut self) -> Option<&mut UnstableConn> {
        Some(self)
    }
}

/// Listener whose accepted connections pass through a [`FaultInjector`].
///
/// The injector is disabled unless one is supplied with
/// [`UnstableListener::with_injector`]; variants enable injection through
/// the live-swap hook instead.
#[derive(Debug)]
pub struct UnstableListener {
    inner: Box<dyn Listener>,
    injector: FaultInjector,
}

impl UnstableListener {
    pub fn new(inner: Box<dyn Listener>) -> Self {
        Self::with_injector(inner, FaultInjector::disabled())
    }

    pub fn with_injector(inner: Box<dyn Listener>, injector: FaultInjector) -> Self {
        Self { inner, injector }
    }
}

impl Listener for UnstableListener {
    fn accept(&self) -> io::Result<Box<dyn Conn>> {
        let conn = self.inner.accept()?;
        Ok(self.injector.install(conn))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultStatsSnapshot, SeededSource};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};

    const ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9);

    /// In-memory base: reads drain `input`, writes append to `output`.
    #[derive(Debug, Default)]
    struct ScriptedConn {
        input: VecDeque<u8>,
        output: Vec<u8>,
        closed: bool,
    }

    impl ScriptedConn {
        fn with_input(data: &[u8]) -> Self {
            Self { input: data.iter().copied().collect(), ..Default::default() }
        }
    }

    impl Read for ScriptedConn {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.closed {
                return Err(closed_error());
            }
            let n = buf.len().min(self.input.len());
            for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedConn {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.closed {
                return Err(closed_error());
            }
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Conn for ScriptedConn {
        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(ADDR)
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(ADDR)
        }
    }

    #[derive(Debug)]
    struct Always(u32);

    impl FaultSource for Always {
        fn draw(&self, _bound: u32) -> u32 {
            self.0
        }
    }

    fn injector(enable: bool, draw: u32) -> FaultInjector {
        FaultInjector::new(enable, Arc::new(Always(draw)))
    }

    #[test]
    fn test_disabled_is_pass_through() {
        // draw 0 would fault every call if injection were on
        let mut direct = ScriptedConn::with_input(b"hello world");
        let mut wrapped = UnstableConn::adopt(
            Box::new(ScriptedConn::with_input(b"hello world")),
            injector(false, 0),
        );

        let mut a = [0u8; 5];
        let mut b = [0u8; 5];
        assert_eq!(direct.read(&mut a).unwrap(), wrapped.read(&mut b).unwrap());
        assert_eq!(a, b);
        assert_eq!(direct.write(b"abc").unwrap(), wrapped.write(b"abc").unwrap());

        direct.close().unwrap();
        wrapped.close().unwrap();
        let direct_err = direct.write(b"x").unwrap_err();
        let wrapped_err = wrapped.write(b"x").unwrap_err();
        assert_eq!(direct_err.kind(), wrapped_err.kind());
        assert_eq!(wrapped.stats().snapshot().writes, 0);
    }

    #[test]
    fn test_write_fault_closes_base_then_writes() {
        let mut conn = UnstableConn::adopt(Box::new(ScriptedConn::default()), injector(true, 499));
        let err = conn.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let snap = conn.stats().snapshot();
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.write_faults, 1);
    }

    #[test]
    fn test_read_threshold_is_lower_than_write() {
        // 100..500 faults writes but not reads
        let mut conn = UnstableConn::adopt(
            Box::new(ScriptedConn::with_input(b"abc")),
            injector(true, 250),
        );
        let mut buf = [0u8; 3];
        assert_eq!(conn.read(&mut buf).unwrap(), 3);
        assert!(conn.write(b"abc").is_err());
    }

    #[test]
    fn test_no_base_is_not_connected() {
        let mut conn = UnstableConn::new(injector(true, 9_999));
        assert_eq!(conn.read(&mut [0u8; 1]).unwrap_err().kind(), io::ErrorKind::NotConnected);
        assert!(conn.peer_addr().is_err());
        conn.close().unwrap();
    }

    #[test]
    fn test_set_base_replaces_delegate() {
        let mut conn = UnstableConn::new(injector(true, 9_999));
        assert!(conn.set_base(Box::new(ScriptedConn::default())).is_none());
        assert!(conn.has_base());
        conn.write_all(b"ok").unwrap();
        let old = conn.set_base(Box::new(ScriptedConn::default()));
        assert!(old.is_some());
    }

    #[test]
    fn test_install_is_idempotent() {
        let injector = injector(true, 9_999);
        let first = injector.install(Box::new(ScriptedConn::default()));
        let first_ptr = &*first as *const dyn Conn as *const ();

        let second = injector.install(first);
        let second_ptr = &*second as *const dyn Conn as *const ();
        assert_eq!(first_ptr, second_ptr);

        let mut third = injector.install(second);
        let unstable = third.as_unstable_mut().unwrap();
        assert!(unstable.has_base());
        // the delegate is the scripted base, not another wrapper
        assert!(unstable.base.as_mut().unwrap().as_unstable_mut().is_none());
    }

    #[test]
    fn test_rewriter_enables_accept_time_wrapper() {
        let accepted = FaultInjector::disabled().install(Box::new(ScriptedConn::default()));
        let mut rewrite = injector(true, 0).rewriter();

        let mut swapped = rewrite(accepted);
        let unstable = swapped.as_unstable_mut().unwrap();
        assert!(unstable.is_enabled());
        assert!(unstable.base.as_mut().unwrap().as_unstable_mut().is_none());
        assert!(swapped.write(b"x").is_err());
    }

    #[test]
    fn test_install_adopts_hook_source_and_stats() {
        let accept_stats = Arc::new(FaultStats::new());
        let accept =
            FaultInjector::new(true, Arc::new(Always(9_999))).with_stats(accept_stats.clone());
        let accepted = accept.install(Box::new(ScriptedConn::default()));

        let hook_stats = Arc::new(FaultStats::new());
        let hook = injector(true, 0).with_stats(hook_stats.clone());
        let mut swapped = hook.install(accepted);

        // draw 0 faults every write; the accept-time source never would
        assert!(swapped.write(b"x").is_err());
        assert_eq!(hook_stats.snapshot().write_faults, 1);
        assert_eq!(accept_stats.snapshot(), FaultStatsSnapshot::default());
    }

    #[test]
    fn test_double_close() {
        let mut conn = UnstableConn::adopt(Box::new(ScriptedConn::default()), injector(false, 0));
        conn.close().unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn test_seeded_write_fault_rate() {
        let stats = Arc::new(FaultStats::new());
        let injector = FaultInjector::new(true, Arc::new(SeededSource::new(7)))
            .with_stats(stats.clone());
        let mut conn = UnstableConn::adopt(Box::new(ScriptedConn::default()), injector);

        for _ in 0..20_000 {
            if conn.write(b"x").is_err() {
                conn.set_base(Box::new(ScriptedConn::default()));
            }
        }
        let snap = stats.snapshot();
        assert_eq!(snap.writes, 20_000);
        assert!((snap.write_fault_rate() - 0.05).abs() < 0.01, "rate {}", snap.write_fault_rate());
    }

    #[derive(Debug)]
    struct OneConn(Mutex<Option<Box<dyn Conn>>>);

    impl Listener for OneConn {
        fn accept(&self) -> io::Result<Box<dyn Conn>> {
            self.0
                .lock()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "listener closed"))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(ADDR)
        }
    }

    #[test]
    fn test_listener_wraps_disabled_and_propagates_errors() {
        let base: Box<dyn Conn> = Box::new(ScriptedConn::default());
        let inner = OneConn(Mutex::new(Some(base)));
        let listener = UnstableListener::new(Box::new(inner));

        let mut conn = listener.accept().unwrap();
        let unstable = conn.as_unstable_mut().unwrap();
        assert!(!unstable.is_enabled());

        let err = listener.accept().unwrap_err();
        assert_eq!(err.to_string(), "listener closed");
    }
}
