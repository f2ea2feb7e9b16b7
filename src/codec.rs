//! Downlink frame codec
//!
//! Frames are fixed-width byte sequences rendered on the wire as space-separated `0xNN` tokens
//! (uppercase hex, two digits):
//!
//! ```text
//! control  0x01 0x01 <param code> <signed adjustment>
//! alert    0x02 0x01 <reason code>
//! ```
//!
//! The adjustment byte is two's complement: `-6` travels as `0xFA`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Parameter;

pub const CONTROL_MARKER: u8 = 0x01;
pub const ALERT_MARKER: u8 = 0x02;
pub const MODIFY_MARKER: u8 = 0x01;
pub const ALERT_LEVEL_MARKER: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("adjustment {0} does not fit in a signed byte")]
    AdjustmentOutOfRange(i64),

    #[error("unknown parameter code 0x{0:02X}")]
    UnknownParamCode(u8),

    #[error("unknown alert reason code 0x{0:02X}")]
    UnknownReasonCode(u8),
}

impl Parameter {
    /// Wire code of this parameter in a control frame
    pub fn code(&self) -> u8 {
        match self {
            Parameter::Rpm => 0x01,
            Parameter::Consumption => 0x02,
            Parameter::CoolantTemp => 0x03,
            Parameter::OilPressure => 0x04,
            Parameter::BatteryPotential => 0x05,
        }
    }

    pub fn from_code(code: u8) -> Option<Parameter> {
        Parameter::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// Why a critical alert was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertReason {
    #[serde(rename = "high number of control alarms")]
    HighControlAlarmRate,
}

impl AlertReason {
    pub const ALL: [AlertReason; 1] = [AlertReason::HighControlAlarmRate];

    pub fn code(&self) -> u8 {
        match self {
            AlertReason::HighControlAlarmRate => 0x01,
        }
    }

    pub fn from_code(code: u8) -> Option<AlertReason> {
        AlertReason::ALL.into_iter().find(|r| r.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::HighControlAlarmRate => "high number of control alarms",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded downlink frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkFrame {
    Control { param: Parameter, adjustment: i8 },
    Alert { reason: AlertReason },
}

impl DownlinkFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            DownlinkFrame::Control { param, adjustment } => vec![
                CONTROL_MARKER,
                MODIFY_MARKER,
                param.code(),
                adjustment as u8,
            ],
            DownlinkFrame::Alert { reason } => {
                vec![ALERT_MARKER, ALERT_LEVEL_MARKER, reason.code()]
            }
        }
    }
}

impl fmt::Display for DownlinkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens = self
            .to_bytes()
            .iter()
            .map(|byte| format!("0x{byte:02X}"))
            .collect::<Vec<_>>();
        f.write_str(&tokens.join(" "))
    }
}

impl FromStr for DownlinkFrame {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s)
    }
}

/// Encode a control command. Adjustments outside `[-128, 127]` are rejected, never wrapped.
pub fn encode_command(param: Parameter, adjustment: i64) -> Result<DownlinkFrame, FrameError> {
    let adjustment =
        i8::try_from(adjustment).map_err(|_| FrameError::AdjustmentOutOfRange(adjustment))?;
    Ok(DownlinkFrame::Control { param, adjustment })
}

pub fn encode_alert(reason: AlertReason) -> DownlinkFrame {
    DownlinkFrame::Alert { reason }
}

/// Decode either frame kind
pub fn decode(frame: &str) -> Result<DownlinkFrame, FrameError> {
    let bytes = parse_tokens(frame)?;

    match bytes.as_slice() {
        [CONTROL_MARKER, MODIFY_MARKER, code, value] => {
            let param = Parameter::from_code(*code).ok_or(FrameError::UnknownParamCode(*code))?;
            Ok(DownlinkFrame::Control {
                param,
                adjustment: *value as i8,
            })
        }
        [ALERT_MARKER, ALERT_LEVEL_MARKER, code] => {
            let reason =
                AlertReason::from_code(*code).ok_or(FrameError::UnknownReasonCode(*code))?;
            Ok(DownlinkFrame::Alert { reason })
        }
        [CONTROL_MARKER, ..] | [ALERT_MARKER, ..] => Err(FrameError::MalformedFrame(format!(
            "unexpected markers or token count in {frame:?}"
        ))),
        _ => Err(FrameError::MalformedFrame(format!(
            "unknown frame kind in {frame:?}"
        ))),
    }
}

/// Decode a frame received on the actuator downlink
pub fn decode_control(frame: &str) -> Result<(Parameter, i8), FrameError> {
    match decode(frame)? {
        DownlinkFrame::Control { param, adjustment } => Ok((param, adjustment)),
        DownlinkFrame::Alert { .. } => Err(FrameError::MalformedFrame(
            "expected a control frame, got an alert".to_string(),
        )),
    }
}

/// Decode a frame received on the alert downlink
pub fn decode_alert(frame: &str) -> Result<AlertReason, FrameError> {
    match decode(frame)? {
        DownlinkFrame::Alert { reason } => Ok(reason),
        DownlinkFrame::Control { .. } => Err(FrameError::MalformedFrame(
            "expected an alert frame, got a control frame".to_string(),
        )),
    }
}

fn parse_tokens(frame: &str) -> Result<Vec<u8>, FrameError> {
    frame
        .split_whitespace()
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .ok_or_else(|| FrameError::MalformedFrame(format!("token {token:?} lacks 0x")))?;

            if digits.is_empty() || digits.len() > 2 {
                return Err(FrameError::MalformedFrame(format!(
                    "token {token:?} is not a single byte"
                )));
            }

            u8::from_str_radix(digits, 16)
                .map_err(|_| FrameError::MalformedFrame(format!("token {token:?} is not hex")))
        })
        .collect()
}
