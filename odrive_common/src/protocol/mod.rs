//! CANSimple wire protocol.
//!
//! - [`frame`] - 11-bit identifiers, node addresses and raw frames
//! - [`schema`] - message table and field encode / decode
//! - [`enums`] - axis state, control mode and input mode codes
//! - [`fault`] - error / disarm bit names

pub mod enums;
pub mod fault;
pub mod frame;
pub mod schema;

pub use enums::{AxisState, ControlMode, InputMode};
pub use fault::FaultCode;
pub use frame::{CanFrame, NodeAddress};
pub use schema::{decode, encode, encode_request, Command, Decoded, Fields};
