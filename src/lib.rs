pub mod actors;
pub mod codec;
pub mod config;
pub mod error;
pub mod policy;
pub mod storage;
pub mod topics;
pub mod transport;
pub mod units;
pub mod util;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Radio link quality reported alongside an uplink
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadioMetadata {
    pub rssi: f64,
    pub snr: f64,
    pub channel_rssi: f64,
}

/// One reading from a machine, in the machine's native units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetry {
    pub machine_id: String,
    pub machine_type: String,
    pub rpm: f64,
    pub coolant_temperature: f64,
    pub oil_pressure: f64,
    pub battery_potential: f64,
    pub consumption: f64,
    pub radio_metadata: RadioMetadata,
}

impl RawTelemetry {
    /// rpm, battery and consumption all read exactly zero as reported.
    ///
    /// Decided on native values; a small reading can round to zero once standardized.
    pub fn is_idle(&self) -> bool {
        self.rpm == 0.0 && self.battery_potential == 0.0 && self.consumption == 0.0
    }
}

/// A reading converted to canonical units (°C, bar, V, l/h)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StandardizedTelemetry {
    pub machine_type: String,
    pub rpm: f64,
    pub coolant_temp: f64,
    pub oil_pressure: f64,
    pub battery_potential: f64,
    pub consumption: f64,
}

impl StandardizedTelemetry {
    pub fn value(&self, parameter: Parameter) -> f64 {
        match parameter {
            Parameter::Rpm => self.rpm,
            Parameter::Consumption => self.consumption,
            Parameter::CoolantTemp => self.coolant_temp,
            Parameter::OilPressure => self.oil_pressure,
            Parameter::BatteryPotential => self.battery_potential,
        }
    }

    /// All of rpm, battery and consumption read zero.
    ///
    /// Such a machine is still initialising or powered down and must not reach the decision
    /// engine.
    pub fn is_idle(&self) -> bool {
        self.rpm == 0.0 && self.battery_potential == 0.0 && self.consumption == 0.0
    }
}

/// A machine parameter that policy can evaluate and commands can modify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Rpm,
    CoolantTemp,
    OilPressure,
    BatteryPotential,
    Consumption,
}

impl Parameter {
    /// Evaluation order, matching the field order of the telemetry payload
    pub const ALL: [Parameter; 5] = [
        Parameter::Rpm,
        Parameter::CoolantTemp,
        Parameter::OilPressure,
        Parameter::BatteryPotential,
        Parameter::Consumption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Rpm => "rpm",
            Parameter::CoolantTemp => "coolant_temp",
            Parameter::OilPressure => "oil_pressure",
            Parameter::BatteryPotential => "battery_potential",
            Parameter::Consumption => "consumption",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Parameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parameter::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown parameter: {s}"))
    }
}

/// Round to two decimal places, the precision used for stored and forwarded values
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
