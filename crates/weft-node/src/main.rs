//! # Weft Node
//!
//! Standalone mesh node: listens for peerings, dials configured peers,
//! and taps configured topic prefixes into the log.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! weft-node
//!
//! # Run with a config file in the working directory
//! cat > weft.toml <<EOF
//! port = 4040
//! [[peers]]
//! host = "collector.example"
//! port = 4040
//! retry_secs = 10
//! EOF
//! weft-node
//!
//! # Run with environment variables
//! WEFT_PORT=4040 WEFT_HOST=0.0.0.0 weft-node
//! ```

mod config;
mod metrics;

use anyhow::Result;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft_data::{wire, Filter, Topic};
use weft_endpoint::{Endpoint, Event, PeerStatus};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weft=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Weft node on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    // Bring the endpoint up
    let endpoint = Endpoint::new(config.endpoint.to_endpoint_config());
    let port = endpoint.listen(&config.host, config.port).await?;
    tracing::info!(endpoint = %endpoint.id(), port, "node is up");

    for peer in &config.peers {
        tracing::info!(host = %peer.host, port = peer.port, "dialing peer");
        endpoint
            .peer_nosync(peer.host.clone(), peer.port, peer.retry())
            .await?;
    }

    spawn_status_logger(&endpoint);
    start_tap(&endpoint, &config.subscribe.topics).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    endpoint.shutdown().await;

    Ok(())
}

/// Log every status bus event and keep the peer gauge current.
fn spawn_status_logger(endpoint: &Endpoint) {
    let mut status = endpoint.status_subscriber(true);
    let endpoint = endpoint.clone();
    tokio::spawn(async move {
        while let Some(event) = status.recv().await {
            match event {
                Event::Status(status) => {
                    metrics::record_status_event(&status.code.to_string());
                    tracing::info!(code = %status.code, "{}", status.message);
                    if let Ok(peers) = endpoint.peers().await {
                        let active = peers
                            .iter()
                            .filter(|p| p.status == PeerStatus::Peered)
                            .count();
                        metrics::set_active_peers(active);
                    }
                }
                Event::Error(error) => {
                    metrics::record_error(&error.code.to_string());
                    tracing::warn!(code = %error.code, "{}", error.message);
                }
            }
        }
    });
}

/// Subscribe to the configured prefixes and drain them into the log.
async fn start_tap(endpoint: &Endpoint, topics: &[String]) -> Result<()> {
    if topics.is_empty() {
        return Ok(());
    }
    let filter = topics
        .iter()
        .map(|t| t.parse::<Topic>())
        .collect::<Result<Filter, _>>()
        .map_err(|e| anyhow::anyhow!("bad subscribe topic: {e}"))?;
    tracing::info!(filter = %filter, "tapping");

    let sub = endpoint.subscribe(filter).await?;
    tokio::task::spawn_blocking(move || {
        // Blocking drain loop; ends when the endpoint closes the queue.
        while sub.wait() {
            let start = Instant::now();
            for message in sub.pop_batch(64) {
                metrics::record_message(wire::encode(&message.value).len(), "inbound");
                tracing::info!(topic = %message.topic, "received: {}", message.value);
            }
            metrics::record_delivery_latency(start.elapsed().as_secs_f64());
        }
    });
    Ok(())
}
