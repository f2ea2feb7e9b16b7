use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_control::{
    actors::{DecisionHandle, decision::DecisionActor},
    config::{Config, read_config_file},
    transport::MqttTransport,
};
use tracing::{debug, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

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
        ("fleet_decision", LevelFilter::TRACE),
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
    let policy = config.policy();

    let (transport, inbound_rx) = MqttTransport::connect(
        &config.broker,
        &config.client_id("decision"),
        DecisionActor::subscriptions(&topics),
    )
    .await
    .context("could not reach the broker")?;

    let decision = DecisionHandle::spawn(
        topics.clone(),
        policy,
        Arc::new(transport.publisher()),
        inbound_rx,
    );

    info!("decision engine running for group {}", topics.group_id());

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for ctrl-c")?;
    info!("shutting down");

    if let Some(stats) = decision.get_stats().await {
        debug!("decision stats: {stats:?}");
    }
    decision.shutdown().await;
    transport.disconnect().await;

    Ok(())
}
