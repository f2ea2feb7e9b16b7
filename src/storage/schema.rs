//! Audit record definitions
//!
//! Three record kinds are persisted, one per measurement of the fleet's time-series layout:
//!
//! | table             | tags                     | fields                                          |
//! |-------------------|--------------------------|-------------------------------------------------|
//! | `machine_data`    | machine_id, machine_type | standardized sensor values, rssi, snr, channel_rssi |
//! | `machine_control` | machine_id               | modify_param, adjustment (canonical units)      |
//! | `machine_alerts`  | machine_id               | reason                                          |
//!
//! Every record is stamped with the time the gateway received the message, not the sender's
//! timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actors::messages::{ControlCommand, CriticalAlert};
use crate::codec::AlertReason;
use crate::{Parameter, RadioMetadata, StandardizedTelemetry};

/// One uplink: standardized values plus the radio metadata of the first gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDataRow {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub machine_type: String,
    pub rpm: f64,
    pub coolant_temp: f64,
    pub oil_pressure: f64,
    pub battery_potential: f64,
    pub consumption: f64,
    pub rssi: f64,
    pub snr: f64,
    pub channel_rssi: f64,
}

impl MachineDataRow {
    pub fn new(
        machine_id: impl Into<String>,
        telemetry: &StandardizedTelemetry,
        radio: &RadioMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp,
            machine_id: machine_id.into(),
            machine_type: telemetry.machine_type.clone(),
            rpm: telemetry.rpm,
            coolant_temp: telemetry.coolant_temp,
            oil_pressure: telemetry.oil_pressure,
            battery_potential: telemetry.battery_potential,
            consumption: telemetry.consumption,
            rssi: radio.rssi,
            snr: radio.snr,
            channel_rssi: radio.channel_rssi,
        }
    }
}

/// A control command as it arrived, before unit conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRow {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub modify_param: Parameter,
    pub adjustment: f64,
}

impl ControlRow {
    pub fn from_command(command: &ControlCommand, received_at: DateTime<Utc>) -> Self {
        Self {
            timestamp: received_at,
            machine_id: command.machine_id.clone(),
            modify_param: command.modify_param,
            adjustment: command.adjustment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub timestamp: DateTime<Utc>,
    pub machine_id: String,
    pub reason: AlertReason,
}

impl AlertRow {
    pub fn from_alert(alert: &CriticalAlert, received_at: DateTime<Utc>) -> Self {
        Self {
            timestamp: received_at,
            machine_id: alert.machine_id.clone(),
            reason: alert.reason,
        }
    }
}

/// Any record the gateway persists
#[derive(Debug, Clone, PartialEq)]
pub enum AuditRecord {
    MachineData(MachineDataRow),
    Control(ControlRow),
    Alert(AlertRow),
}

impl AuditRecord {
    pub fn machine_id(&self) -> &str {
        match self {
            AuditRecord::MachineData(row) => &row.machine_id,
            AuditRecord::Control(row) => &row.machine_id,
            AuditRecord::Alert(row) => &row.machine_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditRecord::MachineData(row) => row.timestamp,
            AuditRecord::Control(row) => row.timestamp,
            AuditRecord::Alert(row) => row.timestamp,
        }
    }
}

/// Records of a batch split by table
#[derive(Debug, Default)]
pub struct RecordBatch {
    pub machine_data: Vec<MachineDataRow>,
    pub controls: Vec<ControlRow>,
    pub alerts: Vec<AlertRow>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.machine_data.len() + self.controls.len() + self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<AuditRecord> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = AuditRecord>>(iter: I) -> Self {
        let mut batch = RecordBatch::default();
        for record in iter {
            match record {
                AuditRecord::MachineData(row) => batch.machine_data.push(row),
                AuditRecord::Control(row) => batch.controls.push(row),
                AuditRecord::Alert(row) => batch.alerts.push(row),
            }
        }
        batch
    }
}
