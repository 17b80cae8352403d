//! # flake-test-support
//!
//! Testing infrastructure for flake.
//!
//! ## Components
//!
//! - **EchoClient** - Echo client that reconnects after injected closures
//! - **MemoryConn** - In-memory base connection for fault-rate tests
//! - **StressRunner** - Long echo runs with progress and summary

pub mod client;
pub mod mem;
pub mod stress;

pub use client::EchoClient;
pub use mem::MemoryConn;
pub use stress::{print_summary, StressConfig, StressCounters, StressMetrics, StressRunner};
