//! Sender node
//!
//! Records ADPCM from the codec and streams it to the configured peer.
//! There is no Linux SPI/GPIO backend for the VS1053 driver yet, so this
//! binary runs on [`SimulatedCodec`], which produces silent blocks.
//!
//! Usage: `sender [config.toml] [peer-addr]`

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshnet_audio::{
    audio::TxPipeline, codec::SimulatedCodec, config::AppConfig, network::UdpLink,
};

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    match path {
        Some(path) => {
            AppConfig::load(Path::new(path)).with_context(|| format!("loading config {}", path))
        }
        None => AppConfig::load_or_default().context("loading default config"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting meshnet audio sender");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = load_config(args.first().map(String::as_str))?;

    if let Some(peer) = args.get(1) {
        config.network.peer = Some(peer.parse().context("invalid peer address")?);
    }
    let peer = config
        .network
        .peer
        .context("no peer address; set network.peer or pass it as the second argument")?;

    // Send from an ephemeral port so a receiver can share the host
    let mut network = config.network.clone();
    network.udp_port = 0;
    let link = UdpLink::bind(&network)?;

    tracing::info!(
        "Streaming {}Hz/{} ch IMA ADPCM to {}",
        config.audio.sample_rate,
        config.audio.channels,
        peer
    );

    let codec = SimulatedCodec::new();
    let mut pipeline = TxPipeline::init(codec, link, config.audio, config.tx)?;
    pipeline.start()?;

    tracing::info!("Press Ctrl+C to stop");

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = stats_interval.tick() => {
                let stats = pipeline.get_stats();
                tracing::info!(
                    "TX stats: {} blocks, {} packets sent, {} blocks dropped, {} discarded, ring {}/{}",
                    stats.blocks_produced,
                    stats.packets_sent,
                    stats.blocks_dropped,
                    stats.packets_discarded,
                    stats.buffer_fill,
                    stats.buffer_capacity
                );
            }
        }
    }

    tracing::info!("Shutting down");
    tokio::task::block_in_place(|| pipeline.stop())?;

    let stats = pipeline.get_stats();
    tracing::info!(
        "Sent {} packets ({} send errors)",
        stats.packets_sent,
        stats.send_errors
    );
    Ok(())
}
