//! Fault decisions and fault counters.
//!
//! Every fault-injecting connection draws from one [`FaultSource`] shared
//! across all connection threads, so implementations must be `Sync`.
//! Production runs use [`ThreadRngSource`]; tests that need exact
//! reproducibility use [`SeededSource`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::{FAULT_SCALE, READ_FAULT_THRESHOLD, WRITE_FAULT_THRESHOLD};
use crate::error::{FlakeError, Result};

/// Uniform random integers for fault decisions
pub trait FaultSource: Send + Sync + fmt::Debug {
    /// Uniform integer in `[0, bound)`. A zero bound yields 0.
    fn draw(&self, bound: u32) -> u32;
}

/// Thread-local RNG per draw, no contention between connections
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl FaultSource for ThreadRngSource {
    fn draw(&self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Single seeded generator behind a mutex.
///
/// Deterministic only when draws happen in a deterministic order, e.g. one
/// connection driven from one thread.
#[derive(Debug)]
pub struct SeededSource {
    seed: u64,
    rng: Mutex<StdRng>,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl FaultSource for SeededSource {
    fn draw(&self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        self.rng.lock().gen_range(0..bound)
    }
}

/// Which side of the connection a fault is drawn for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Per-operation fault thresholds out of `scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultPolicy {
    pub scale: u32,
    pub write_threshold: u32,
    pub read_threshold: u32,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            scale: FAULT_SCALE,
            write_threshold: WRITE_FAULT_THRESHOLD,
            read_threshold: READ_FAULT_THRESHOLD,
        }
    }
}

impl FaultPolicy {
    pub fn with_write_threshold(mut self, threshold: u32) -> Self {
        self.write_threshold = threshold;
        self
    }

    pub fn with_read_threshold(mut self, threshold: u32) -> Self {
        self.read_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.scale == 0 {
            return Err(FlakeError::config("fault scale must be non-zero"));
        }
        if self.write_threshold > self.scale || self.read_threshold > self.scale {
            return Err(FlakeError::config(format!(
                "fault thresholds (write {}, read {}) exceed scale {}",
                self.write_threshold, self.read_threshold, self.scale
            )));
        }
        Ok(())
    }

    pub fn threshold(&self, op: IoOp) -> u32 {
        match op {
            IoOp::Read => self.read_threshold,
            IoOp::Write => self.write_threshold,
        }
    }

    /// Expected fraction of `op` calls that trigger a fault
    pub fn rate(&self, op: IoOp) -> f64 {
        if self.scale == 0 {
            return 0.0;
        }
        self.threshold(op) as f64 / self.scale as f64
    }

    /// One draw from `source`; true when the base should be closed
    pub fn should_fault(&self, source: &dyn FaultSource, op: IoOp) -> bool {
        source.draw(self.scale) < self.threshold(op)
    }
}

/// Operation and fault counters for fault-injecting connections
#[derive(Debug, Default)]
pub struct FaultStats {
    reads: AtomicU64,
    writes: AtomicU64,
    read_faults: AtomicU64,
    write_faults: AtomicU64,
}

impl FaultStats {
    pub const fn new() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            read_faults: AtomicU64::new(0),
            write_faults: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, op: IoOp, faulted: bool) {
        let (ops, faults) = match op {
            IoOp::Read => (&self.reads, &self.read_faults),
            IoOp::Write => (&self.writes, &self.write_faults),
        };
        ops.fetch_add(1, Ordering::Relaxed);
        if faulted {
            faults.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> FaultStatsSnapshot {
        FaultStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            read_faults: self.read_faults.load(Ordering::Relaxed),
            write_faults: self.write_faults.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.read_faults.store(0, Ordering::Relaxed);
        self.write_faults.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub read_faults: u64,
    pub write_faults: u64,
}

impl FaultStatsSnapshot {
    pub fn faults(&self) -> u64 {
        self.read_faults + self.write_faults
    }

    pub fn read_fault_rate(&self) -> f64 {
        ratio(self.read_faults, self.reads)
    }

    pub fn write_fault_rate(&self) -> f64 {
        ratio(self.write_faults, self.writes)
    }
}

fn ratio(n: u64, d: u64) -> f64 {
    if d == 0 {
        0.0
    } else {
        n as f64 / d as f64
    }
}
