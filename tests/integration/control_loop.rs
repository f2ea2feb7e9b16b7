//! End-to-end tests for the control loop
//!
//! Uplink -> gateway -> decision -> gateway -> actuator downlink, with the alarm detector
//! listening on the same command topic.

use fleet_control::actors::messages::{ControlCommand, MachineDataMessage};
use fleet_control::transport::Publisher;
use fleet_control::Parameter;
use pretty_assertions::assert_eq;

use crate::helpers::*;

#[tokio::test]
async fn test_hot_metric_machine_is_cooled() {
    let p = Pipeline::spawn().await;

    p.bus
        .publish(&p.topics.uplink("M1"), metric_uplink(110.0))
        .await
        .unwrap();

    assert!(wait_until(|| !p.actuator_frames("M1").is_empty()).await);
    assert_eq!(p.actuator_frames("M1"), vec!["0x01 0x01 0x03 0xF6"]);

    let commands: Vec<ControlCommand> = p
        .bus
        .published_on(&p.topics.control_commands())
        .iter()
        .map(|payload| serde_json::from_slice(payload).unwrap())
        .collect();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].modify_param, Parameter::CoolantTemp);
    assert_eq!(commands[0].adjustment, -10.0);
}

#[tokio::test]
async fn test_hot_imperial_machine_gets_fahrenheit_adjustment() {
    let p = Pipeline::spawn().await;

    // 230 °F = 110 °C
    p.bus
        .publish(&p.topics.uplink("M2"), imperial_uplink(230.0))
        .await
        .unwrap();

    assert!(wait_until(|| !p.actuator_frames("M2").is_empty()).await);
    // -10 °C goes out as 14 °F
    assert_eq!(p.actuator_frames("M2"), vec!["0x01 0x01 0x03 0x0E"]);

    let forwarded: MachineDataMessage =
        serde_json::from_slice(&p.bus.published_on(&p.topics.machine_data())[0]).unwrap();
    assert_eq!(forwarded.sensor_data.coolant_temp, 110.0);
    assert_eq!(forwarded.sensor_data.oil_pressure, 3.0);
}

#[tokio::test]
async fn test_healthy_machine_gets_no_commands() {
    let p = Pipeline::spawn().await;

    p.bus
        .publish(&p.topics.uplink("M1"), metric_uplink(97.0))
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            p.decision
                .get_stats()
                .await
                .is_some_and(|stats| stats.readings_evaluated == 1)
        })
        .await
    );

    assert!(p.bus.published_on(&p.topics.control_commands()).is_empty());
    assert!(p.actuator_frames("M1").is_empty());
}

#[tokio::test]
async fn test_idle_machine_is_neither_forwarded_nor_evaluated() {
    let p = Pipeline::spawn().await;

    p.bus
        .publish(&p.topics.uplink("M1"), idle_uplink())
        .await
        .unwrap();

    assert!(
        eventually(|| async {
            p.gateway
                .get_stats()
                .await
                .is_some_and(|stats| stats.idle_suppressed == 1)
        })
        .await
    );

    // The uplink is the only message on the bus
    assert_eq!(p.bus.published().len(), 1);
    assert_eq!(p.decision.get_stats().await.unwrap().readings_evaluated, 0);

    p.storage.flush().await.unwrap();
    assert_eq!(p.storage.latest_machine_data("M1", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_repeated_corrections_raise_one_alert() {
    let p = Pipeline::spawn().await;

    for _ in 0..5 {
        p.bus
            .publish(&p.topics.uplink("M1"), metric_uplink(110.0))
            .await
            .unwrap();
    }

    assert!(wait_until(|| !p.alert_frames("M1").is_empty()).await);
    assert_eq!(p.alert_frames("M1"), vec!["0x02 0x01 0x01"]);
    assert!(wait_until(|| p.actuator_frames("M1").len() == 5).await);

    // Sixth correction lands in the cooldown
    p.bus
        .publish(&p.topics.uplink("M1"), metric_uplink(110.0))
        .await
        .unwrap();
    assert!(wait_until(|| p.actuator_frames("M1").len() == 6).await);

    assert!(
        eventually(|| async {
            p.alarm
                .get_state("M1")
                .await
                .is_some_and(|state| state.cooling_down && state.alerts_raised == 1)
        })
        .await
    );
    assert_eq!(p.alert_frames("M1").len(), 1);

    p.storage.flush().await.unwrap();
    assert_eq!(p.storage.latest_controls("M1", 10).await.unwrap().len(), 6);
    assert_eq!(p.storage.latest_alerts("M1", 10).await.unwrap().len(), 1);
}
