//! Integration tests for the UDP alert side channel
//!
//! Alarm detector -> UDP datagram -> gateway listener -> alert downlink.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use fleet_control::Parameter;
use fleet_control::actors::alarm::AlarmActor;
use fleet_control::actors::gateway::GatewayActor;
use fleet_control::actors::messages::ControlCommand;
use fleet_control::actors::{AlarmHandle, GatewayHandle, StorageHandle};
use fleet_control::config::AlarmConfig;
use fleet_control::storage::MemoryBackend;
use fleet_control::topics::{DownlinkKind, Topics};
use fleet_control::transport::{MemoryBus, Publisher, UdpAlertSender, spawn_alert_listener};
use pretty_assertions::assert_eq;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::helpers::*;

struct Gateway {
    bus: MemoryBus,
    topics: Topics,
    side_channel: SocketAddr,
    _gateway: GatewayHandle,
    _shutdown: watch::Sender<bool>,
}

/// A gateway with its side-channel listener on an ephemeral port
async fn spawn_gateway() -> Gateway {
    let bus = MemoryBus::new();
    let topics = Topics::new(GROUP);
    let storage = StorageHandle::spawn(Box::new(MemoryBackend::new()), None);

    let (alert_tx, alert_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (side_channel, _listener) =
        spawn_alert_listener("127.0.0.1:0".parse().unwrap(), alert_tx, shutdown_rx)
            .await
            .unwrap();

    let gateway = GatewayHandle::spawn(
        topics.clone(),
        create_test_catalog(),
        Arc::new(bus.clone()),
        storage,
        bus.subscribe(GatewayActor::subscriptions(&topics)),
        alert_rx,
    );

    Gateway {
        bus,
        topics,
        side_channel,
        _gateway: gateway,
        _shutdown: shutdown_tx,
    }
}

#[tokio::test]
async fn test_alarm_alert_reaches_alert_downlink() {
    let gw = spawn_gateway().await;

    let sender = UdpAlertSender::bind(gw.side_channel).await.unwrap();
    let _alarm = AlarmHandle::spawn(
        gw.topics.clone(),
        AlarmConfig::default(),
        Arc::new(sender),
        gw.bus.subscribe(AlarmActor::subscriptions(&gw.topics)),
    );

    for _ in 0..5 {
        let command = ControlCommand {
            machine_id: "M2".to_string(),
            modify_param: Parameter::OilPressure,
            adjustment: 1.0,
            timestamp: Utc::now(),
        };
        gw.bus
            .publish(
                &gw.topics.control_commands(),
                serde_json::to_vec(&command).unwrap(),
            )
            .await
            .unwrap();
    }

    let alert_topic = gw.topics.downlink("M2", DownlinkKind::Alert);
    assert!(wait_until(|| !gw.bus.published_on(&alert_topic).is_empty()).await);
    assert_eq!(frames_on(&gw.bus, &alert_topic), vec!["0x02 0x01 0x01"]);

    // 1 bar = 14.5 psi on the wire
    let actuator_topic = gw.topics.downlink("M2", DownlinkKind::Actuator);
    assert!(wait_until(|| gw.bus.published_on(&actuator_topic).len() == 5).await);
    assert_eq!(frames_on(&gw.bus, &actuator_topic)[0], "0x01 0x01 0x04 0x0F");
}

#[tokio::test]
async fn test_foreign_datagram_with_naive_timestamp_is_forwarded() {
    let gw = spawn_gateway().await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let datagram = br#"{"machine_id": "M1", "level": "CRITICAL", "reason": "high number of control alarms", "timestamp": "2025-03-01T10:00:00.123456"}"#;
    socket.send_to(datagram, gw.side_channel).await.unwrap();

    let alert_topic = gw.topics.downlink("M1", DownlinkKind::Alert);
    assert!(wait_until(|| !gw.bus.published_on(&alert_topic).is_empty()).await);
    assert_eq!(frames_on(&gw.bus, &alert_topic), vec!["0x02 0x01 0x01"]);
}

#[tokio::test]
async fn test_malformed_datagram_does_not_stop_listener() {
    let gw = spawn_gateway().await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket
        .send_to(b"{\"machine_id\": \"M1\"}", gw.side_channel)
        .await
        .unwrap();
    socket
        .send_to(
            br#"{"machine_id": "M1", "level": "CRITICAL", "reason": "no reason", "timestamp": "2025-03-01T10:00:00Z"}"#,
            gw.side_channel,
        )
        .await
        .unwrap();
    socket
        .send_to(
            br#"{"machine_id": "M2", "level": "CRITICAL", "reason": "high number of control alarms", "timestamp": "2025-03-01T10:00:00Z"}"#,
            gw.side_channel,
        )
        .await
        .unwrap();

    let alert_topic = gw.topics.downlink("M2", DownlinkKind::Alert);
    assert!(wait_until(|| !gw.bus.published_on(&alert_topic).is_empty()).await);
    assert!(
        gw.bus
            .published_on(&gw.topics.downlink("M1", DownlinkKind::Alert))
            .is_empty()
    );
}
