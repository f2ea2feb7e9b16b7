use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_control::{
    actors::{AlarmHandle, alarm::AlarmActor},
    config::{Config, read_config_file},
    transport::{MqttTransport, UdpAlertSender},
};
use tracing::{info, level_filters::LevelFilter, trace};
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
        ("fleet_alarm", LevelFilter::TRACE),
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

    let sender = UdpAlertSender::bind(config.side_channel.target)
        .await
        .context("could not open the side-channel socket")?;
    info!("alerts go to {}", sender.target());

    let (transport, inbound_rx) = MqttTransport::connect(
        &config.broker,
        &config.client_id("alarm"),
        AlarmActor::subscriptions(&topics),
    )
    .await
    .context("could not reach the broker")?;

    let alarm = AlarmHandle::spawn(topics.clone(), config.alarm, Arc::new(sender), inbound_rx);

    info!(
        "alarm detector running for group {}: {} commands in {}s",
        topics.group_id(),
        config.alarm.threshold_count,
        config.alarm.window_seconds
    );

    tokio::signal::ctrl_c()
        .await
        .context("could not listen for ctrl-c")?;
    info!("shutting down");

    alarm.shutdown().await;
    transport.disconnect().await;

    Ok(())
}
