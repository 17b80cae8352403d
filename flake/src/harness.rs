//! Harness driver: runs every variant concurrently until told to stop.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{select, unbounded, Receiver};
use tracing::{error, info};

use crate::constants::{DEFAULT_BASE_PORT, DEFAULT_HOST};
use crate::error::{FlakeError, Result};
use crate::fault::{FaultSource, FaultStats, FaultStatsSnapshot, ThreadRngSource};
use crate::server::{VariantConfig, VariantServer};
use crate::transport::{Transport, TransportConfig};

/// Configuration for a harness run
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub host: String,
    /// First port of the canonical variants; `0` binds each ephemerally
    pub base_port: u16,
    /// Explicit variant list; `None` runs the canonical four on `base_port`
    pub variants: Option<Vec<VariantConfig>>,
    pub transport: TransportConfig,
    pub source: Arc<dyn FaultSource>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            base_port: DEFAULT_BASE_PORT,
            variants: None,
            transport: TransportConfig::default(),
            source: Arc::new(ThreadRngSource),
        }
    }
}

impl HarnessConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Canonical variants on sequential ports from `base_port`
    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self.variants = None;
        self
    }

    pub fn with_variants(mut self, variants: Vec<VariantConfig>) -> Self {
        self.variants = Some(variants);
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_fault_source(mut self, source: Arc<dyn FaultSource>) -> Self {
        self.source = source;
        self
    }

    /// The variants this config runs, in start order
    pub fn variants(&self) -> Result<Vec<VariantConfig>> {
        match &self.variants {
            Some(variants) => Ok(variants.clone()),
            None => Ok(VariantConfig::canonical(self.base_port)?.to_vec()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let variants = self.variants()?;
        if variants.is_empty() {
            return Err(FlakeError::config("no variants configured"));
        }
        let mut ports = HashSet::new();
        for variant in &variants {
            if variant.port != 0 && !ports.insert(variant.port) {
                return Err(FlakeError::config(format!(
                    "port {} used by more than one variant",
                    variant.port
                )));
            }
        }
        Ok(())
    }
}

/// A variant that is accepting connections
#[derive(Debug, Clone)]
pub struct RunningVariant {
    pub config: VariantConfig,
    pub addr: SocketAddr,
    stats: Arc<FaultStats>,
}

impl RunningVariant {
    pub fn stats(&self) -> FaultStatsSnapshot {
        self.stats.snapshot()
    }
}

pub struct Harness<T: Transport> {
    transport: T,
    config: HarnessConfig,
}

impl<T: Transport> Harness<T> {
    pub fn new(transport: T, config: HarnessConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Bind every variant, then serve each on its own thread.
    ///
    /// All listeners are bound before any accept loop starts, so when one
    /// variant cannot listen the ones already bound are dropped and their
    /// ports released before the error is returned.
    pub fn start(&self) -> Result<RunningHarness> {
        self.config.validate()?;
        let configs = self.config.variants()?;

        let mut servers = Vec::with_capacity(configs.len());
        let mut variants = Vec::with_capacity(configs.len());
        for &config in &configs {
            let bound = VariantServer::bind(
                &self.transport,
                &self.config.host,
                config,
                &self.config.transport,
                self.config.source.clone(),
            )
            .and_then(|server| {
                let addr = server
                    .local_addr()
                    .map_err(|source| FlakeError::Listen { port: config.port, source })?;
                Ok((server, addr))
            });
            let (server, addr) = match bound {
                Ok(bound) => bound,
                Err(e) => {
                    error!(variant = %config, error = %e, "variant failed to start");
                    return Err(e);
                }
            };
            variants.push(RunningVariant { config, addr, stats: server.stats() });
            servers.push(server);
        }

        let (tx, rx) = unbounded();
        for server in servers {
            let tx = tx.clone();
            let port = server.config().port;
            thread::Builder::new()
                .name(format!("flake-variant-{port}"))
                .spawn(move || {
                    let failure = match server.serve() {
                        Err(e) => e,
                        Ok(()) => FlakeError::VariantExited { port },
                    };
                    let _ = tx.send(failure);
                })?;
        }

        Ok(RunningHarness { variants, events: rx })
    }

    /// Start, then block until `shutdown` fires or a variant fails.
    pub fn run(&self, shutdown: &Receiver<()>) -> Result<()> {
        self.start()?.wait(shutdown)
    }
}

/// Handle to a started harness
#[derive(Debug)]
pub struct RunningHarness {
    variants: Vec<RunningVariant>,
    events: Receiver<FlakeError>,
}

impl RunningHarness {
    pub fn variants(&self) -> &[RunningVariant] {
        &self.variants
    }

    /// Address of the first variant matching both flags
    pub fn addr(&self, unstable: bool, enable_crypt: bool) -> Option<SocketAddr> {
        self.variants
            .iter()
            .find(|v| v.config.unstable == unstable && v.config.enable_crypt == enable_crypt)
            .map(|v| v.addr)
    }

    /// Block until `shutdown` receives (or disconnects) or a variant fails.
    ///
    /// Variant threads are not joined; in-flight connections end with the
    /// process.
    pub fn wait(self, shutdown: &Receiver<()>) -> Result<()> {
        let result = select! {
            recv(shutdown) -> _ => {
                info!("test server killed");
                Ok(())
            }
            recv(self.events) -> failure => match failure {
                Ok(e) => Err(e),
                Err(_) => Err(FlakeError::VariantExited { port: 0 }),
            },
        };
        for variant in &self.variants {
            let stats = variant.stats();
            info!(
                variant = %variant.config,
                reads = stats.reads,
                writes = stats.writes,
                read_faults = stats.read_faults,
                write_faults = stats.write_faults,
                "variant fault summary"
            );
        }
        if let Err(e) = &result {
            error!(error = %e, "harness stopped on variant failure");
        }
        result
    }
}
