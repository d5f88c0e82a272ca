//! Receiver node
//!
//! Listens for ADPCM packets and plays them through the codec. Like the
//! sender, it drives [`SimulatedCodec`] until a VS1053 bus backend exists.
//!
//! Usage: `receiver [config.toml]`

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshnet_audio::{
    audio::RxPipeline,
    codec::SimulatedCodec,
    config::AppConfig,
    network::{RecvStatus, UdpLink},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting meshnet audio receiver");

    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load(Path::new(&path))
            .with_context(|| format!("loading config {}", path))?,
        None => AppConfig::load_or_default().context("loading default config")?,
    };

    let link = UdpLink::bind(&config.network)?;
    let recv_timeout = config.network.recv_timeout();

    let codec = SimulatedCodec::new();
    let mut pipeline = RxPipeline::init(codec, link, config.audio, config.rx)?;
    pipeline.start()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();

    // The receive path is synchronous; keep it off the async workers
    let receive_loop = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut last_stats_time = Instant::now();

        while !shutdown_flag.load(Ordering::Relaxed) {
            match pipeline.poll_network(recv_timeout) {
                Ok(RecvStatus::Received(_)) | Ok(RecvStatus::TimedOut) => {}
                Err(e) => {
                    tracing::warn!("Receive error: {}", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
            }

            // Periodic stats
            if last_stats_time.elapsed() >= Duration::from_secs(5) {
                last_stats_time = Instant::now();

                let stats = pipeline.get_stats();
                tracing::info!(
                    "RX stats: {} received, {} dropped, {} rejected, {} underruns, jitter queue {}/{}",
                    stats.packets_received,
                    stats.packets_dropped,
                    stats.packets_rejected,
                    stats.underruns,
                    stats.buffer_fill,
                    stats.buffer_capacity
                );
            }
        }

        pipeline.stop()?;
        Ok(())
    });

    tracing::info!("Listening on {} - press Ctrl+C to stop", config.network.bind_addr());
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    shutdown.store(true, Ordering::Relaxed);
    receive_loop.await??;

    Ok(())
}
