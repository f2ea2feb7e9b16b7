use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_control::{
    actors::{GatewayHandle, StorageHandle, gateway::GatewayActor},
    config::{Config, read_config_file},
    storage,
    transport::{MqttTransport, spawn_alert_listener},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const ALERT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("fleet_control", LevelFilter::DEBUG),
        ("fleet_gateway", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.file)?;
    config.apply_env_overrides();

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let topics = config.topics();
    let catalog = config.catalog()?;
    if catalog.is_empty() {
        warn!("no machines configured, every uplink will be dropped");
    }

    let storage_config = config.storage.clone().unwrap_or_default();
    let backend = storage::open(&storage_config).await?;
    let storage = StorageHandle::spawn(backend, storage_config.retention_days());
    match storage.health_check().await {
        Ok(status) => debug!("storage: {status}"),
        Err(e) => warn!("storage health check failed: {e}"),
    }

    let (transport, inbound_rx) = MqttTransport::connect(
        &config.broker,
        &config.client_id("gateway"),
        GatewayActor::subscriptions(&topics),
    )
    .await
    .context("could not reach the broker")?;

    let (alert_tx, alert_rx) = mpsc::channel(ALERT_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (side_channel, listener) =
        spawn_alert_listener(config.side_channel.bind, alert_tx, shutdown_rx)
            .await
            .with_context(|| format!("could not bind {}", config.side_channel.bind))?;

    let gateway = GatewayHandle::spawn(
        topics.clone(),
        catalog,
        Arc::new(transport.publisher()),
        storage.clone(),
        inbound_rx,
        alert_rx,
    );

    info!(
        "gateway running for group {}, alerts on {side_channel}",
        topics.group_id()
    );

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for ctrl-c")?;
    info!("shutting down");

    if let Some(stats) = gateway.get_stats().await {
        debug!("gateway stats: {stats:?}");
    }
    gateway.shutdown().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = listener.await {
        error!("alert listener failed: {e}");
    }

    if let Err(e) = storage.flush().await {
        warn!("final flush failed: {e}");
    }
    storage.shutdown().await;
    transport.disconnect().await;

    Ok(())
}
