//! Stress testing utilities for long echo runs against a variant.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

use crate::client::EchoClient;

/// Configuration for stress tests
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Upper bound on wall time
    pub duration: Duration,
    /// Concurrent echo clients
    pub clients: usize,
    /// Bytes per exchange
    pub payload_size: usize,
    /// Exchanges per client (0 = until `duration` elapses)
    pub exchanges: u64,
    /// Log progress every interval
    pub report_interval: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(10),
            clients: 1,
            payload_size: 1,
            exchanges: 0,
            report_interval: Duration::from_secs(1),
        }
    }
}

impl StressConfig {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration: Duration::from_secs(duration_secs),
            ..Default::default()
        }
    }

    pub fn with_clients(mut self, n: usize) -> Self {
        self.clients = n;
        self
    }

    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = size;
        self
    }

    pub fn with_exchanges(mut self, n: u64) -> Self {
        self.exchanges = n;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }
}

/// Metrics collected during a stress run
#[derive(Debug, Clone, Default)]
pub struct StressMetrics {
    pub exchanges_sent: u64,
    pub exchanges_echoed: u64,
    pub bytes_echoed: u64,
    pub closures: u64,
    pub reconnects: u64,
    pub mismatches: u64,
    pub errors: u64,
    pub duration: Duration,
    pub peak_rate: f64,
}

impl StressMetrics {
    pub fn echo_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.exchanges_echoed as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Fraction of exchanges that needed at least one reconnect
    pub fn closure_rate(&self) -> f64 {
        if self.exchanges_sent > 0 {
            self.closures as f64 / self.exchanges_sent as f64
        } else {
            0.0
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors == 0 && self.mismatches == 0 && self.exchanges_echoed == self.exchanges_sent
    }
}

/// Shared counters for stress testing
#[derive(Debug)]
pub struct StressCounters {
    pub sent: AtomicU64,
    pub echoed: AtomicU64,
    pub bytes_echoed: AtomicU64,
    pub closures: AtomicU64,
    pub reconnects: AtomicU64,
    pub mismatches: AtomicU64,
    pub errors: AtomicU64,
    pub running: AtomicBool,
}

impl StressCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_send(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_echo(&self, bytes: usize, matched: bool) {
        self.echoed.fetch_add(1, Ordering::Relaxed);
        self.bytes_echoed.fetch_add(bytes as u64, Ordering::Relaxed);
        if !matched {
            self.mismatches.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reconnects(&self, closures: u64, reconnects: u64) {
        self.closures.fetch_add(closures, Ordering::Relaxed);
        self.reconnects.fetch_add(reconnects, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StressMetrics {
        StressMetrics {
            exchanges_sent: self.sent.load(Ordering::Relaxed),
            exchanges_echoed: self.echoed.load(Ordering::Relaxed),
            bytes_echoed: self.bytes_echoed.load(Ordering::Relaxed),
            closures: self.closures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            mismatches: self.mismatches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            duration: Duration::ZERO,
            peak_rate: 0.0,
        }
    }
}

impl Default for StressCounters {
    fn default() -> Self {
        Self {
            sent: AtomicU64::new(0),
            echoed: AtomicU64::new(0),
            bytes_echoed: AtomicU64::new(0),
            closures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }
    }
}

/// Runner for stress tests with progress reporting
pub struct StressRunner {
    config: StressConfig,
    counters: Arc<StressCounters>,
}

impl StressRunner {
    pub fn new(config: StressConfig) -> Self {
        Self {
            config,
            counters: StressCounters::new(),
        }
    }

    pub fn counters(&self) -> Arc<StressCounters> {
        self.counters.clone()
    }

    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Run `test_fn` while a reporter thread logs progress. The counters
    /// stop once `duration` elapses or `test_fn` returns.
    pub fn run_with_progress<F>(&self, test_fn: F) -> StressMetrics
    where
        F: FnOnce(Arc<StressCounters>),
    {
        let start = Instant::now();
        let counters = self.counters.clone();
        let duration = self.config.duration;
        let report_interval = self.config.report_interval;

        let report_counters = counters.clone();
        let reporter = thread::spawn(move || {
            let mut last_echoed = 0u64;
            let mut peak_rate = 0.0f64;
            let mut next_report = start + report_interval;

            while report_counters.is_running() {
                thread::sleep(Duration::from_millis(10));
                let elapsed = start.elapsed();
                if elapsed >= duration {
                    report_counters.stop();
                    break;
                }
                if Instant::now() < next_report {
                    continue;
                }
                next_report += report_interval;

                let snapshot = report_counters.snapshot();
                let rate = (snapshot.exchanges_echoed - last_echoed) as f64
                    / report_interval.as_secs_f64();
                peak_rate = peak_rate.max(rate);
                last_echoed = snapshot.exchanges_echoed;

                info!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    sent = snapshot.exchanges_sent,
                    echoed = snapshot.exchanges_echoed,
                    rate,
                    closures = snapshot.closures,
                    errors = snapshot.errors,
                    "stress progress"
                );
            }

            peak_rate
        });

        test_fn(counters.clone());

        counters.stop();
        let peak_rate = reporter.join().unwrap_or(0.0);

        let mut metrics = counters.snapshot();
        metrics.duration = start.elapsed();
        metrics.peak_rate = peak_rate;
        metrics
    }

    /// Drive `clients` reconnecting echo clients against `addr`, verifying
    /// every echoed payload.
    pub fn run_echo_clients(&self, addr: SocketAddr) -> StressMetrics {
        let config = self.config.clone();
        self.run_with_progress(move |counters| {
            let handles: Vec<_> = (0..config.clients)
                .map(|id| {
                    let counters = counters.clone();
                    let config = config.clone();
                    thread::spawn(move || echo_client_loop(id, addr, &config, &counters))
                })
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    counters.record_error();
                }
            }
        })
    }
}

fn echo_client_loop(id: usize, addr: SocketAddr, config: &StressConfig, counters: &StressCounters) {
    let mut client = match EchoClient::connect(addr) {
        Ok(client) => client,
        Err(e) => {
            warn!(client = id, error = %e, "stress client failed to connect");
            counters.record_error();
            return;
        }
    };
    let mut rng = rand::thread_rng();
    let mut payload = vec![0u8; config.payload_size];
    let mut done = 0u64;

    while counters.is_running() && (config.exchanges == 0 || done < config.exchanges) {
        rng.fill(payload.as_mut_slice());
        counters.record_send();

        let (closures, reconnects) = (client.closures(), client.reconnects());
        let result = client.echo_with_reconnect(&payload);
        counters.record_reconnects(client.closures() - closures, client.reconnects() - reconnects);

        match result {
            Ok(echoed) => counters.record_echo(echoed.len(), echoed == payload),
            Err(e) => {
                warn!(client = id, error = %e, "echo failed after retries");
                counters.record_error();
                break;
            }
        }
        done += 1;
    }
    client.close();
}

/// Print a summary of stress test results
pub fn print_summary(metrics: &StressMetrics) {
    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║                    ECHO STRESS RESULTS                       ║");
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    eprintln!(
        "║  Duration:        {:>10.2}s                                ║",
        metrics.duration.as_secs_f64()
    );
    eprintln!(
        "║  Exchanges Sent:  {:>10}                                  ║",
        metrics.exchanges_sent
    );
    eprintln!(
        "║  Exchanges Echoed:{:>10}                                  ║",
        metrics.exchanges_echoed
    );
    eprintln!("║  Echo Rate:       {:>10.0} ex/s                           ║", metrics.echo_rate());
    eprintln!("║  Peak Rate:       {:>10.0} ex/s                           ║", metrics.peak_rate);
    eprintln!("║  Closures:        {:>10}                                  ║", metrics.closures);
    eprintln!("║  Reconnects:      {:>10}                                  ║", metrics.reconnects);
    eprintln!(
        "║  Closure Rate:    {:>10.4}%                               ║",
        metrics.closure_rate() * 100.0
    );
    eprintln!("║  Mismatches:      {:>10}                                  ║", metrics.mismatches);
    eprintln!("║  Errors:          {:>10}                                  ║", metrics.errors);
    eprintln!("╚══════════════════════════════════════════════════════════════╝");

    if metrics.errors > 0 || metrics.mismatches > 0 {
        eprintln!(
            "\n❌ FAILED: {} errors, {} mismatched echoes",
            metrics.errors,
            metrics.mismatches
        );
    } else if metrics.closures == 0 {
        eprintln!("\n⚠️  WARNING: no connection closures observed");
    } else {
        eprintln!("\n✅ PASSED: {} closures survived", metrics.closures);
    }
}
