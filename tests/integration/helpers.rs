//! Helper functions for integration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_control::actors::alarm::AlarmActor;
use fleet_control::actors::decision::DecisionActor;
use fleet_control::actors::gateway::GatewayActor;
use fleet_control::actors::messages::DownlinkEnvelope;
use fleet_control::actors::{AlarmHandle, DecisionHandle, GatewayHandle, StorageHandle};
use fleet_control::config::AlarmConfig;
use fleet_control::policy::{HealthyRange, Policy};
use fleet_control::storage::{MemoryBackend, StorageBackend};
use fleet_control::topics::{DownlinkKind, Topics};
use fleet_control::transport::{MemoryBus, UdpAlertSender, spawn_alert_listener};
use fleet_control::units::{
    ConsumptionUnit, MachineCatalog, MachineSpec, PressureUnit, TemperatureUnit, VoltageUnit,
};
use fleet_control::Parameter;
use tokio::sync::{mpsc, watch};

pub const GROUP: &str = "19";

pub fn create_test_catalog() -> MachineCatalog {
    MachineCatalog::new(HashMap::from([
        (
            "A23X".to_string(),
            MachineSpec {
                machine_id: "M1".to_string(),
                temp_unit: TemperatureUnit::Celsius,
                oil_unit: PressureUnit::Bar,
                batt_unit: VoltageUnit::Volt,
                consumption_unit: ConsumptionUnit::LitersPerHour,
            },
        ),
        (
            "B47Y".to_string(),
            MachineSpec {
                machine_id: "M2".to_string(),
                temp_unit: TemperatureUnit::Fahrenheit,
                oil_unit: PressureUnit::Psi,
                batt_unit: VoltageUnit::Millivolt,
                consumption_unit: ConsumptionUnit::GallonsPerHour,
            },
        ),
    ]))
    .unwrap()
}

/// Coolant and oil pressure only, so a hot reading yields exactly one command
pub fn create_test_policy() -> Policy {
    Policy::new([
        (
            Parameter::CoolantTemp,
            HealthyRange {
                low: 90.0,
                high: 105.0,
                ideal: 97.0,
            },
        ),
        (
            Parameter::OilPressure,
            HealthyRange {
                low: 2.5,
                high: 5.0,
                ideal: 3.5,
            },
        ),
    ])
}

fn uplink_json(
    machine_id: &str,
    machine_type: &str,
    values: [f64; 5],
) -> Vec<u8> {
    let [rpm, coolant, oil, battery, consumption] = values;

    serde_json::to_vec(&serde_json::json!({
        "end_device_ids": { "machine_id": machine_id },
        "uplink_message": {
            "decoded_payload": {
                "machine_type": machine_type,
                "rpm": rpm,
                "coolant_temperature": coolant,
                "oil_pressure": oil,
                "battery_potential": battery,
                "consumption": consumption
            },
            "rx_metadata": [ { "rssi": -85, "snr": -15.2 } ]
        }
    }))
    .unwrap()
}

/// M1 reading in metric units with the given coolant temperature (°C)
pub fn metric_uplink(coolant_c: f64) -> Vec<u8> {
    uplink_json("M1", "A23X", [1100.0, coolant_c, 3.0, 12.8, 25.0])
}

/// M2 reading in imperial units with the given coolant temperature (°F)
pub fn imperial_uplink(coolant_f: f64) -> Vec<u8> {
    uplink_json("M2", "B47Y", [1100.0, coolant_f, 43.5, 13000.0, 6.6])
}

/// A machine that is switched off
pub fn idle_uplink() -> Vec<u8> {
    uplink_json("M1", "A23X", [0.0, 20.0, 0.0, 0.0, 0.0])
}

/// Frame strings pushed on `topic`, in order
pub fn frames_on(bus: &MemoryBus, topic: &str) -> Vec<String> {
    bus.published_on(topic)
        .iter()
        .flat_map(|payload| {
            let envelope: DownlinkEnvelope = serde_json::from_slice(payload).unwrap();
            envelope
                .downlinks
                .into_iter()
                .map(|downlink| downlink.frm_payload)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Poll `condition` until it holds or two seconds have passed
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// All three services wired on one in-process bus, alerts over a real UDP socket
pub struct Pipeline {
    pub bus: MemoryBus,
    pub topics: Topics,
    pub gateway: GatewayHandle,
    pub decision: DecisionHandle,
    pub alarm: AlarmHandle,
    pub storage: StorageHandle,
    _shutdown: watch::Sender<bool>,
}

impl Pipeline {
    pub async fn spawn() -> Self {
        Self::spawn_with_backend(Box::new(MemoryBackend::new())).await
    }

    pub async fn spawn_with_backend(backend: Box<dyn StorageBackend>) -> Self {
        let bus = MemoryBus::new();
        let topics = Topics::new(GROUP);
        let storage = StorageHandle::spawn(backend, None);

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
            storage.clone(),
            bus.subscribe(GatewayActor::subscriptions(&topics)),
            alert_rx,
        );

        let decision = DecisionHandle::spawn(
            topics.clone(),
            create_test_policy(),
            Arc::new(bus.clone()),
            bus.subscribe(DecisionActor::subscriptions(&topics)),
        );

        let sender = UdpAlertSender::bind(side_channel).await.unwrap();
        let alarm = AlarmHandle::spawn(
            topics.clone(),
            AlarmConfig::default(),
            Arc::new(sender),
            bus.subscribe(AlarmActor::subscriptions(&topics)),
        );

        Self {
            bus,
            topics,
            gateway,
            decision,
            alarm,
            storage,
            _shutdown: shutdown_tx,
        }
    }

    pub fn actuator_frames(&self, machine_id: &str) -> Vec<String> {
        frames_on(
            &self.bus,
            &self.topics.downlink(machine_id, DownlinkKind::Actuator),
        )
    }

    pub fn alert_frames(&self, machine_id: &str) -> Vec<String> {
        frames_on(
            &self.bus,
            &self.topics.downlink(machine_id, DownlinkKind::Alert),
        )
    }
}

/// Async variant of [`wait_until`]
pub async fn eventually<F, Fut>(condition: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
