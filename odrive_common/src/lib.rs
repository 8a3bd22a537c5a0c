//! ODrive Common Library
//!
//! Shared protocol, configuration and error types for the ODrive motor
//! bridge.
//!
//! # Module Structure
//!
//! - [`protocol`] - CANSimple frames, message schema and mode codes
//! - [`config`] - Motor configuration loading and calibration resolution
//! - [`error`] - Error taxonomy shared by every bridge layer
//! - [`consts`] - Timing and physical defaults
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use odrive_common::prelude::*;
//!
//! let node = NodeAddress::new(3).unwrap();
//! let fields = Fields::new().with("Axis_Requested_State", f64::from(AxisState::Idle.code()));
//! let frame = encode(node, Command::SetAxisState, &fields).unwrap();
//! assert_eq!(frame.id(), 0x67);
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod protocol;
