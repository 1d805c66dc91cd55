//! Tracing subscriber setup for the `ragline` binary.
//!
//! Logs go to stderr so that command output on stdout stays clean.
//! `RUST_LOG` overrides the level chosen by `--verbose`.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) -> Result<()> {
    let default_level = if verbose { "ragline=debug,ragline_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))
}
