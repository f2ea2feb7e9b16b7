//! Error taxonomy for the control loop
//!
//! Every failure in the loop is observable only through logs. Handlers convert whatever went
//! wrong into a [`LoopError`] and log it at the call site; nothing is surfaced interactively.
//!
//! | Variant                | Handling                                              |
//! |------------------------|-------------------------------------------------------|
//! | `MalformedMessage`     | logged, message dropped, no retry                     |
//! | `UnknownMachine`       | logged as error, command dropped (no default unit)    |
//! | `TransportUnavailable` | fatal at startup, reconnect handled by the transport  |
//! | `StorageWriteFailure`  | logged and swallowed, never blocks forwarding         |
//! | `Frame`                | decode side: frame ignored, machine state unchanged   |

use thiserror::Error;
use tracing::{error, warn};

use crate::codec::FrameError;
use crate::storage::StorageError;
use crate::transport::TransportError;
use crate::units::UnitError;

/// Result alias used by the message handlers
pub type LoopResult<T> = Result<T, LoopError>;

#[derive(Debug, Error)]
pub enum LoopError {
    /// Body doesn't parse or a required field is missing
    #[error("malformed message on {topic}: {reason}")]
    MalformedMessage { topic: String, reason: String },

    /// No machine spec matches the given machine id or machine type
    #[error("unknown machine: {0}")]
    UnknownMachine(String),

    /// Broker or socket could not be reached
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[from] TransportError),

    #[error("storage write failed: {0}")]
    StorageWriteFailure(#[from] StorageError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

impl LoopError {
    pub fn malformed(topic: impl Into<String>, reason: impl ToString) -> Self {
        LoopError::MalformedMessage {
            topic: topic.into(),
            reason: reason.to_string(),
        }
    }

    /// Log at the level this kind of failure calls for
    pub fn log(&self) {
        match self {
            LoopError::MalformedMessage { .. } => warn!("dropping message: {self}"),
            LoopError::UnknownMachine(_) => error!("dropping command: {self}"),
            LoopError::StorageWriteFailure(_) => warn!("{self}"),
            LoopError::TransportUnavailable(_) | LoopError::Frame(_) => error!("{self}"),
        }
    }
}

impl From<UnitError> for LoopError {
    fn from(err: UnitError) -> Self {
        match err {
            UnitError::UnknownMachine(id) => LoopError::UnknownMachine(id),
            UnitError::UnknownMachineType(code) => {
                LoopError::UnknownMachine(format!("machine type {code}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_unit_error_maps_to_unknown_machine() {
        let err: LoopError = UnitError::UnknownMachine("M9".to_string()).into();
        assert_matches!(err, LoopError::UnknownMachine(ref id) if id == "M9");

        let err: LoopError = UnitError::UnknownMachineType("Z00".to_string()).into();
        assert_eq!(err.to_string(), "unknown machine: machine type Z00");
    }

    #[test]
    fn test_malformed_display() {
        let err = LoopError::malformed("19/internal/machine_data", "missing field `sensor_data`");
        assert_eq!(
            err.to_string(),
            "malformed message on 19/internal/machine_data: missing field `sensor_data`"
        );
    }
}
