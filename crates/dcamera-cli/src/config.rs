//! Relay command line

use clap::{Args, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dcamera-relay")]
#[command(about = "Distributed camera relay over TCP sessions")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Own a synthetic camera and stream frames on request
    Sink {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Expose the remote camera to a local HAL client and capture for a while
    Source {
        #[command(flatten)]
        link: LinkArgs,

        /// Capture length in seconds
        #[arg(long, default_value = "5")]
        duration: u64,
    },
}

/// Endpoint and stream settings shared by both ends
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Peer address
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Control session port
    #[arg(long, default_value = "19800")]
    pub control_port: u16,

    /// Continuous frame port
    #[arg(long, default_value = "19801")]
    pub continuous_port: u16,

    /// Snapshot frame port
    #[arg(long, default_value = "19802")]
    pub snapshot_port: u16,

    /// Hardware id of the camera
    #[arg(long, default_value = "camera_0")]
    pub dh_id: String,

    /// Frame width in pixels
    #[arg(long, default_value = "640", value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Frame height in pixels
    #[arg(long, default_value = "480", value_parser = clap::value_parser!(u32).range(1..))]
    pub height: u32,

    /// Frame rate
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..))]
    pub fps: u32,
}

/// Which end of the link this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the camera and streams frames on request
    Sink,
    /// Exposes the remote camera to local HAL clients
    Source,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub role: Role,
    pub host: String,
    pub control_port: u16,
    pub continuous_port: u16,
    pub snapshot_port: u16,
    pub dh_id: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// How long the source keeps its capture running
    pub duration: Duration,
    pub verbose: bool,
}

impl RelayConfig {
    pub fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.control_port)
    }

    pub fn continuous_addr(&self) -> String {
        format!("{}:{}", self.host, self.continuous_port)
    }

    pub fn snapshot_addr(&self) -> String {
        format!("{}:{}", self.host, self.snapshot_port)
    }

    fn from_link(role: Role, link: LinkArgs, duration: Duration, verbose: bool) -> Self {
        Self {
            role,
            host: link.host,
            control_port: link.control_port,
            continuous_port: link.continuous_port,
            snapshot_port: link.snapshot_port,
            dh_id: link.dh_id,
            width: link.width,
            height: link.height,
            fps: link.fps,
            duration,
            verbose,
        }
    }
}

impl From<Cli> for RelayConfig {
    fn from(cli: Cli) -> Self {
        match cli.command {
            // The sink runs until the peer goes away
            Commands::Sink { link } => {
                Self::from_link(Role::Sink, link, Duration::ZERO, cli.verbose)
            }
            Commands::Source { link, duration } => Self::from_link(
                Role::Source,
                link,
                Duration::from_secs(duration),
                cli.verbose,
            ),
        }
    }
}
