//! Unit standardization
//!
//! Machines report in their own units. Everything downstream of the gateway (policy, commands,
//! storage) works in one canonical unit per quantity:
//!
//! | quantity    | canonical | alternative | canonical → native |
//! |-------------|-----------|-------------|--------------------|
//! | temperature | °C        | °F          | v * 9/5 + 32       |
//! | oil pressure| bar       | psi         | v / 0.0689476      |
//! | battery     | V         | mV          | v * 1000           |
//! | consumption | l/h       | gal/h       | v / 3.78541        |
//!
//! rpm is unit-less. Conversions here are exact; rounding to two decimals happens only in
//! [`MachineCatalog::standardize`], which produces values for storage and forwarding.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Parameter, RawTelemetry, StandardizedTelemetry, round2};

const PSI_TO_BAR: f64 = 0.0689476;
const GALLON_TO_LITER: f64 = 3.78541;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnitError {
    #[error("unknown machine id: {0}")]
    UnknownMachine(String),

    #[error("unknown machine type: {0}")]
    UnknownMachineType(String),
}

/// Physical quantity with an alternative native unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    Temperature,
    OilPressure,
    Battery,
    Consumption,
}

impl Parameter {
    /// The quantity this parameter is measured in, `None` for rpm
    pub fn quantity(&self) -> Option<Quantity> {
        match self {
            Parameter::Rpm => None,
            Parameter::CoolantTemp => Some(Quantity::Temperature),
            Parameter::OilPressure => Some(Quantity::OilPressure),
            Parameter::BatteryPotential => Some(Quantity::Battery),
            Parameter::Consumption => Some(Quantity::Consumption),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnit {
    #[serde(rename = "°C")]
    Celsius,
    #[serde(rename = "°F")]
    Fahrenheit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PressureUnit {
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "psi")]
    Psi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoltageUnit {
    #[serde(rename = "V")]
    Volt,
    #[serde(rename = "mV")]
    Millivolt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumptionUnit {
    #[serde(rename = "l/h")]
    LitersPerHour,
    #[serde(rename = "gal/h")]
    GallonsPerHour,
}

/// Reference data for one machine type
///
/// Field names follow the fleet's `all_machines.json` layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub machine_id: String,
    pub temp_unit: TemperatureUnit,
    pub oil_unit: PressureUnit,
    pub batt_unit: VoltageUnit,
    pub consumption_unit: ConsumptionUnit,
}

impl MachineSpec {
    /// Convert a native reading to canonical units
    pub fn to_canonical(&self, quantity: Quantity, value: f64) -> f64 {
        match quantity {
            Quantity::Temperature => match self.temp_unit {
                TemperatureUnit::Celsius => value,
                TemperatureUnit::Fahrenheit => (value - 32.0) * 5.0 / 9.0,
            },
            Quantity::OilPressure => match self.oil_unit {
                PressureUnit::Bar => value,
                PressureUnit::Psi => value * PSI_TO_BAR,
            },
            Quantity::Battery => match self.batt_unit {
                VoltageUnit::Volt => value,
                VoltageUnit::Millivolt => value / 1000.0,
            },
            Quantity::Consumption => match self.consumption_unit {
                ConsumptionUnit::LitersPerHour => value,
                ConsumptionUnit::GallonsPerHour => value * GALLON_TO_LITER,
            },
        }
    }

    /// Convert a canonical value back to this machine's native units
    pub fn to_native(&self, quantity: Quantity, value: f64) -> f64 {
        match quantity {
            Quantity::Temperature => match self.temp_unit {
                TemperatureUnit::Celsius => value,
                TemperatureUnit::Fahrenheit => value * 9.0 / 5.0 + 32.0,
            },
            Quantity::OilPressure => match self.oil_unit {
                PressureUnit::Bar => value,
                PressureUnit::Psi => value / PSI_TO_BAR,
            },
            Quantity::Battery => match self.batt_unit {
                VoltageUnit::Volt => value,
                VoltageUnit::Millivolt => value * 1000.0,
            },
            Quantity::Consumption => match self.consumption_unit {
                ConsumptionUnit::LitersPerHour => value,
                ConsumptionUnit::GallonsPerHour => value / GALLON_TO_LITER,
            },
        }
    }
}

/// All machine specs, indexed by machine type and by machine id
#[derive(Debug, Clone, Default)]
pub struct MachineCatalog {
    by_type: HashMap<String, MachineSpec>,
    type_by_id: HashMap<String, String>,
}

impl MachineCatalog {
    /// Build the catalog from the machine-type keyed specs.
    ///
    /// Fails if two machine types claim the same machine id, since id lookups would be ambiguous.
    pub fn new(specs: HashMap<String, MachineSpec>) -> anyhow::Result<Self> {
        let mut type_by_id = HashMap::with_capacity(specs.len());

        for (machine_type, spec) in &specs {
            if let Some(previous) = type_by_id.insert(spec.machine_id.clone(), machine_type.clone())
            {
                anyhow::bail!(
                    "machine id {} is used by both {previous} and {machine_type}",
                    spec.machine_id
                );
            }
        }

        Ok(Self {
            by_type: specs,
            type_by_id,
        })
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    pub fn by_type(&self, machine_type: &str) -> Option<&MachineSpec> {
        self.by_type.get(machine_type)
    }

    pub fn by_machine_id(&self, machine_id: &str) -> Option<&MachineSpec> {
        self.type_by_id
            .get(machine_id)
            .and_then(|machine_type| self.by_type.get(machine_type))
    }

    /// Convert a raw reading to canonical units, rounded to two decimals
    pub fn standardize(&self, raw: &RawTelemetry) -> Result<StandardizedTelemetry, UnitError> {
        let spec = self
            .by_type(&raw.machine_type)
            .ok_or_else(|| UnitError::UnknownMachineType(raw.machine_type.clone()))?;

        Ok(StandardizedTelemetry {
            machine_type: raw.machine_type.clone(),
            rpm: round2(raw.rpm),
            coolant_temp: round2(spec.to_canonical(Quantity::Temperature, raw.coolant_temperature)),
            oil_pressure: round2(spec.to_canonical(Quantity::OilPressure, raw.oil_pressure)),
            battery_potential: round2(spec.to_canonical(Quantity::Battery, raw.battery_potential)),
            consumption: round2(spec.to_canonical(Quantity::Consumption, raw.consumption)),
        })
    }

    /// Convert a canonical value to the native units of `machine_id`
    pub fn destandardize(
        &self,
        machine_id: &str,
        value: f64,
        quantity: Quantity,
    ) -> Result<f64, UnitError> {
        let spec = self
            .by_machine_id(machine_id)
            .ok_or_else(|| UnitError::UnknownMachine(machine_id.to_string()))?;

        Ok(spec.to_native(quantity, value))
    }
}
