//! Distributed camera relay
//!
//! Runs either end of a distributed camera link over TCP sessions:
//! - `sink`: a synthetic camera that streams NV12 frames when asked to capture
//! - `source`: registers the remote camera with a local host, captures for a
//!   while and reports how many frames reached the HAL stream

mod config;
mod sink;
mod source;

use anyhow::Result;
use clap::Parser;
use config::{Cli, RelayConfig, Role};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let config = RelayConfig::from(Cli::parse());

    // Initialize logging, RUST_LOG overrides the level
    let level = if config.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(role = ?config.role, dh_id = %config.dh_id, "dcamera relay starting");
    match config.role {
        Role::Sink => sink::run(config).await,
        Role::Source => source::run(config).await,
    }
}
