//! Bridge error taxonomy.
//!
//! - `SchemaError` - malformed command fields (programmer error)
//! - `TransportError` - bus send/receive failure (best effort)
//! - `BridgeError` - everything a facade call can fail with

use crate::config::ConfigError;
use crate::protocol::enums::AxisState;
use crate::protocol::fault::FaultCode;
use crate::protocol::schema::Command;
use std::time::Duration;
use thiserror::Error;

/// Encoding / decoding failures against the message schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    /// A required signal was not supplied.
    #[error("{command}: missing field {field}")]
    MissingField {
        /// Message being encoded.
        command: Command,
        /// Missing signal name.
        field: &'static str,
    },

    /// A field was supplied that the message does not carry.
    #[error("{command}: unknown field {field}")]
    UnknownField {
        /// Message being encoded.
        command: Command,
        /// Offending name.
        field: String,
    },

    /// Value not representable in the signal's wire type.
    #[error("{command}: field {field} out of range ({value})")]
    OutOfRange {
        /// Message being encoded.
        command: Command,
        /// Signal name.
        field: &'static str,
        /// Rejected physical value.
        value: f64,
    },

    /// Payload shorter than the schema requires.
    #[error("{command}: payload length {len} does not match schema")]
    PayloadLength {
        /// Message kind.
        command: Command,
        /// Actual length.
        len: usize,
    },

    /// Identifier not present in the schema table.
    #[error("unknown frame id 0x{0:03X}")]
    UnknownFrame(u16),
}

/// Bus-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Frame could not be sent.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed for a reason other than timeout.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Bus (re)initialisation failed.
    #[error("bus initialisation failed: {0}")]
    InitFailed(String),

    /// The peer end of the bus is gone.
    #[error("bus closed")]
    Closed,
}

/// Errors returned by bridge operations.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Malformed command fields.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Bus failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The actuator never confirmed the requested state.
    #[error("actuator did not reach {requested} within {waited:?}")]
    StateTimeout {
        /// State that was requested.
        requested: AxisState,
        /// How long the bridge waited.
        waited: Duration,
    },

    /// Nonzero error or disarm code reported by the actuator.
    #[error("actuator fault: {0}")]
    ActuatorFault(FaultCode),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Required telemetry has not been received yet.
    #[error("no telemetry: {0}")]
    NoTelemetry(&'static str),

    /// Operation not offered by this transport.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

impl BridgeError {
    /// Symbolic reason string reported to callers.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Schema(_) => "SchemaError",
            Self::Transport(_) => "TransportError",
            Self::StateTimeout { .. } => "StateTimeout",
            Self::ActuatorFault(_) => "ActuatorFault",
            Self::Configuration(_) => "ConfigurationError",
            Self::NoTelemetry(_) => "NoTelemetry",
            Self::Unsupported(_) => "Unsupported",
        }
    }
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
