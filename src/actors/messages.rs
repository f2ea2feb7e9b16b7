//! Message types for actor communication
//!
//! Two kinds of messages live here:
//!
//! 1. **Wire messages**: the JSON bodies exchanged over the pub/sub transport and the UDP side
//!    channel. Each topic has exactly one schema and anything that doesn't match is rejected.
//! 2. **Commands**: request/response messages sent to a specific actor via mpsc, with oneshot
//!    channels for replies.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::oneshot;

use crate::codec::AlertReason;
use crate::{Parameter, RadioMetadata, RawTelemetry, StandardizedTelemetry};

/// Wire timestamps are RFC 3339. Offset-less ISO 8601 timestamps, as emitted by older fleet
/// components, are accepted and read as UTC.
pub mod timestamp {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;

        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }

        raw.parse::<NaiveDateTime>()
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Uplink (TTN envelope)
// ============================================================================

/// Raw uplink as delivered by the network server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkMessage {
    pub end_device_ids: EndDeviceIds,
    pub uplink_message: UplinkPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndDeviceIds {
    pub machine_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UplinkPayload {
    pub decoded_payload: DecodedPayload,
    pub rx_metadata: Vec<RxMetadata>,
}

/// Sensor values in the machine's native units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedPayload {
    pub machine_type: String,
    pub rpm: f64,
    pub coolant_temperature: f64,
    pub oil_pressure: f64,
    pub battery_potential: f64,
    pub consumption: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RxMetadata {
    pub rssi: f64,
    pub snr: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_rssi: Option<f64>,
}

impl UplinkMessage {
    /// Flatten the envelope. Only the first gateway's radio metadata is kept.
    pub fn into_raw(self) -> Result<RawTelemetry, String> {
        let radio = self
            .uplink_message
            .rx_metadata
            .first()
            .ok_or_else(|| "rx_metadata is empty".to_string())?;

        let radio_metadata = RadioMetadata {
            rssi: radio.rssi,
            snr: radio.snr,
            channel_rssi: radio.channel_rssi.unwrap_or(radio.rssi),
        };

        let payload = self.uplink_message.decoded_payload;
        Ok(RawTelemetry {
            machine_id: self.end_device_ids.machine_id,
            machine_type: payload.machine_type,
            rpm: payload.rpm,
            coolant_temperature: payload.coolant_temperature,
            oil_pressure: payload.oil_pressure,
            battery_potential: payload.battery_potential,
            consumption: payload.consumption,
            radio_metadata,
        })
    }
}

// ============================================================================
// Internal topics
// ============================================================================

/// Standardized telemetry forwarded from the gateway to the decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineDataMessage {
    pub machine_id: String,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub sensor_data: StandardizedTelemetry,
}

/// Corrective command, adjustment in canonical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlCommand {
    pub machine_id: String,
    pub modify_param: Parameter,
    pub adjustment: f64,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Critical,
}

/// Alert raised by the alarm-rate detector, carried over the UDP side channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalAlert {
    pub machine_id: String,
    pub level: AlertLevel,
    pub reason: AlertReason,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
}

impl CriticalAlert {
    pub fn new(machine_id: impl Into<String>, reason: AlertReason) -> Self {
        Self {
            machine_id: machine_id.into(),
            level: AlertLevel::Critical,
            reason,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Downlink
// ============================================================================

pub const DOWNLINK_F_PORT: u8 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkEnvelope {
    pub downlinks: Vec<Downlink>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Downlink {
    pub frm_payload: String,
    pub f_port: u8,
    pub priority: String,
}

impl DownlinkEnvelope {
    /// A single normal-priority downlink on the command port
    pub fn single(frm_payload: impl Into<String>) -> Self {
        Self {
            downlinks: vec![Downlink {
                frm_payload: frm_payload.into(),
                f_port: DOWNLINK_F_PORT,
                priority: "NORMAL".to_string(),
            }],
        }
    }
}

// ============================================================================
// Actor commands
// ============================================================================

/// Commands that can be sent to the GatewayActor
#[derive(Debug)]
pub enum GatewayCommand {
    GetStats {
        respond_to: oneshot::Sender<GatewayStats>,
    },

    /// Gracefully shut down the gateway
    Shutdown,
}

/// Counters kept by the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub uplinks_received: u64,
    pub telemetry_forwarded: u64,
    /// All-zero readings that were persisted but not forwarded
    pub idle_suppressed: u64,
    pub commands_encoded: u64,
    pub alerts_encoded: u64,
    pub dropped: u64,
}

/// Commands that can be sent to the DecisionActor
#[derive(Debug)]
pub enum DecisionCommand {
    GetStats {
        respond_to: oneshot::Sender<DecisionStats>,
    },

    Shutdown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionStats {
    pub readings_evaluated: u64,
    pub commands_emitted: u64,
    pub dropped: u64,
}

/// Commands that can be sent to the AlarmActor
#[derive(Debug)]
pub enum AlarmCommand {
    /// Get the current window and phase for a machine
    GetState {
        machine_id: String,
        respond_to: oneshot::Sender<Option<AlarmState>>,
    },

    /// Sent by the actor's own cooldown timers
    CooldownExpired { machine_id: String, generation: u64 },

    /// Gracefully shut down the alarm actor
    Shutdown,
}

/// Snapshot of one machine's alarm state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmState {
    pub machine_id: String,

    /// Anomalies currently counted in the sliding window
    pub window_len: usize,

    pub cooling_down: bool,

    /// Alerts raised for this machine since startup
    pub alerts_raised: u64,
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    /// Manually flush write buffer to storage
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    /// Get storage statistics
    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    LatestMachineData {
        machine_id: String,
        limit: usize,
        respond_to: oneshot::Sender<anyhow::Result<Vec<crate::storage::MachineDataRow>>>,
    },

    /// Machine data within a time range, oldest first
    MachineDataRange {
        query: crate::storage::QueryRange,
        respond_to: oneshot::Sender<anyhow::Result<Vec<crate::storage::MachineDataRow>>>,
    },

    LatestControls {
        machine_id: String,
        limit: usize,
        respond_to: oneshot::Sender<anyhow::Result<Vec<crate::storage::ControlRow>>>,
    },

    LatestAlerts {
        machine_id: String,
        limit: usize,
        respond_to: oneshot::Sender<anyhow::Result<Vec<crate::storage::AlertRow>>>,
    },

    HealthCheck {
        respond_to: oneshot::Sender<anyhow::Result<String>>,
    },

    /// Gracefully shut down the storage actor, flushing pending records first
    Shutdown,
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Records handed to the backend
    pub records_written: u64,

    /// Records waiting in the write buffer
    pub buffer_size: usize,

    /// Number of flush operations performed
    pub flush_count: u64,

    /// Records lost to backend errors or a full queue
    pub records_dropped: u64,

    /// Backend description
    pub backend: String,
}
