//! Healthy-range policy and corrective adjustments

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Parameter, StandardizedTelemetry, round2};

/// Acceptable band for one parameter and the value corrections steer towards
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthyRange {
    pub low: f64,
    pub high: f64,
    pub ideal: f64,
}

impl HealthyRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

impl Parameter {
    /// Largest correction, in canonical units, a single command may request
    pub fn adjustment_bounds(&self) -> (f64, f64) {
        match self {
            Parameter::Rpm => (-128.0, 127.0),
            Parameter::CoolantTemp => (-10.0, 10.0),
            Parameter::OilPressure => (-2.0, 2.0),
            Parameter::BatteryPotential => (-1.0, 1.0),
            Parameter::Consumption => (-5.0, 5.0),
        }
    }
}

/// One out-of-range parameter and the adjustment that brings it back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub param: Parameter,
    pub adjustment: f64,
}

/// The complete set of healthy ranges, in canonical units
#[derive(Debug, Clone, Default)]
pub struct Policy {
    ranges: BTreeMap<Parameter, HealthyRange>,
}

impl Policy {
    pub fn new(ranges: impl IntoIterator<Item = (Parameter, HealthyRange)>) -> Self {
        Self {
            ranges: ranges.into_iter().collect(),
        }
    }

    /// Build from the externally supplied, name-keyed ranges. Names that don't match a
    /// telemetry field are skipped with a warning.
    pub fn from_ranges(ranges: &HashMap<String, HealthyRange>) -> Self {
        let mut policy = BTreeMap::new();

        for (name, range) in ranges {
            match name.parse::<Parameter>() {
                Ok(param) => {
                    if range.low > range.high {
                        warn!("healthy range for {name} has low > high, it will always fire");
                    }
                    policy.insert(param, *range);
                }
                Err(_) => warn!("ignoring healthy range for unknown parameter {name}"),
            }
        }

        Self { ranges: policy }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn range(&self, param: Parameter) -> Option<&HealthyRange> {
        self.ranges.get(&param)
    }

    /// Corrections for every out-of-range parameter, in parameter order
    pub fn evaluate(&self, telemetry: &StandardizedTelemetry) -> Vec<Correction> {
        self.ranges
            .iter()
            .filter_map(|(&param, range)| {
                let value = telemetry.value(param);
                if range.contains(value) {
                    return None;
                }

                Some(Correction {
                    param,
                    adjustment: corrective_adjustment(param, range, value),
                })
            })
            .collect()
    }
}

/// `ideal - value`, clamped to the parameter's bounds and rounded to two decimals
pub fn corrective_adjustment(param: Parameter, range: &HealthyRange, value: f64) -> f64 {
    let (low, high) = param.adjustment_bounds();
    round2((range.ideal - value).clamp(low, high))
}
