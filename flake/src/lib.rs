//! # flake
//!
//! Fault-injecting echo server for exercising reconnecting stream transports.
//!
//! The harness runs four echo variants, one per combination of
//! encryption on/off and instability on/off. Unstable variants wrap each
//! session's physical connection in an [`UnstableConn`] that forcibly
//! closes it on a small fraction of reads and writes, so the transport
//! under test has to reconnect and resume.
//!
//! ## Components
//!
//! - **UnstableConn / UnstableListener** - Probabilistic connection killer
//! - **FaultPolicy / FaultSource** - Fault thresholds and randomness
//! - **Transport** - Contract the transport under test implements
//! - **VariantServer** - Echo service for one variant
//! - **Harness** - Runs all variants until shutdown
//!
//! ```rust,no_run
//! use flake::{Harness, HarnessConfig, PassthroughTransport};
//!
//! let (tx, rx) = crossbeam_channel::bounded(1);
//! let running = Harness::new(PassthroughTransport, HarnessConfig::default()).start().unwrap();
//! # drop(tx);
//! running.wait(&rx).unwrap();
//! ```

pub mod conn;
pub mod constants;
pub mod error;
pub mod fault;
pub mod harness;
pub mod passthrough;
pub mod server;
pub mod transport;
pub mod unstable;

pub use conn::{Conn, Listener, TcpBaseListener, TcpConn};
pub use error::{FlakeError, Result};
pub use fault::{
    FaultPolicy, FaultSource, FaultStats, FaultStatsSnapshot, IoOp, SeededSource, ThreadRngSource,
};
pub use harness::{Harness, HarnessConfig, RunningHarness, RunningVariant};
pub use passthrough::{PassthroughConn, PassthroughListener, PassthroughTransport};
pub use server::{echo, VariantConfig, VariantServer};
pub use transport::{
    BaseRewriter, ListenerFactory, Transport, TransportConfig, TransportConn, TransportListener,
};
pub use unstable::{FaultInjector, UnstableConn, UnstableListener};
