//! Prelude module for common re-exports.
//!
//! ```rust
//! use odrive_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    Calibration, ConfigError, ConfigLoader, ConnectionType, DriveStyle, LogLevel, MotorConfig,
    ResolvedConfig,
};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{BridgeError, BridgeResult, SchemaError, TransportError};

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::protocol::{
    decode, encode, encode_request, AxisState, CanFrame, Command, ControlMode, Decoded, FaultCode,
    Fields, InputMode, NodeAddress,
};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{GOAL_TOLERANCE, MINUTE_TO_SECOND};
