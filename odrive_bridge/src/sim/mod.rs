//! Simulated actuator.
//!
//! - [`SimulatedAxis`] - axis physics, usable directly as an
//!   [`AxisHandle`](crate::actuator::AxisHandle)
//! - [`SimulatedNode`] - the same axis answering frames on a bus

pub mod axis;
pub mod node;

pub use axis::{SimParams, SimulatedAxis};
pub use node::{ReceivedCommand, SimNodeOptions, SimulatedNode};
