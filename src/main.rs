//! call-app - Terminal-Client für Anrufe und Chat über einen Socket.IO-Relay

use anyhow::{Context, Result};
use call_app::call_engine::NegotiationStrategy;
use call_app::config::{AppConfig, IceTransportPolicy};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "call-app")]
#[command(about = "Peer-to-peer audio/video calls and chat over a relay", long_about = None)]
struct Cli {
    /// Identity to join the relay with
    #[arg(short, long)]
    name: String,

    /// Relay URL (overrides config and SIGNALING_URL)
    #[arg(short, long)]
    server: Option<String>,

    /// Path to a config file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Negotiation strategy: trickle or single-shot
    #[arg(long)]
    negotiation: Option<NegotiationStrategy>,

    /// Only use TURN relay candidates
    #[arg(long)]
    relay_only: bool,

    /// Start without camera
    #[arg(long)]
    no_video: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    call_app::init_tracing();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(server) = cli.server {
        config.signaling.url = server;
    }
    if let Some(negotiation) = cli.negotiation {
        config.call.negotiation = negotiation;
    }
    if cli.relay_only {
        config.ice.transport_policy = IceTransportPolicy::Relay;
    }
    if cli.no_video {
        config.media.video = false;
    }
    config.validate().context("Invalid configuration")?;

    let identity = cli.name.trim().to_string();
    anyhow::ensure!(!identity.is_empty(), "--name must not be empty");

    tracing::info!(
        "Starting as '{}' (relay {}, {:?})",
        identity,
        config.signaling.url,
        config.call.negotiation
    );

    call_app::app::run(config, identity).await
}
