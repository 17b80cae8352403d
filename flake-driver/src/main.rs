//! Flake test server - runs the four echo variants until SIGINT/SIGTERM.
//!
//! Usage: flake-driver
//! Log level via RUST_LOG (default: info)

mod pidfile;

use anyhow::Context;
use crossbeam_channel::bounded;
use flake::constants::PID_FILE_NAME;
use flake::{Harness, HarnessConfig, PassthroughTransport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::pidfile::PidFile;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        error!(error = %format!("{e:#}"), "test server failed");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("installing signal handler")?;

    let config = HarnessConfig::default();
    for variant in config.variants()? {
        info!(%variant, "configured variant");
    }

    let harness = Harness::new(PassthroughTransport, config);
    let running = harness.start().context("starting variants")?;
    let _pid_file = PidFile::create_unless_init(PID_FILE_NAME)?;

    running.wait(&shutdown_rx)?;
    Ok(())
}
