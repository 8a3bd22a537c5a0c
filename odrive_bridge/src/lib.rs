//! # ODrive Bridge Library
//!
//! Drives an ODrive actuator over a shared CAN bus (or a direct handle) and
//! exposes a small motor operation set.
//!
//! # Module Structure
//!
//! - [`bus`] - Bus transport, shared bus handle and telemetry dispatch
//! - [`telemetry`] - Per-axis telemetry cache
//! - [`actuator`] - Capability interface with bus and direct variants
//! - [`state_machine`] - State requests with confirmed waits
//! - [`planner`] - Motion Planner, goal and zero offset
//! - [`monitor`] - Goal Tracker and Fault Monitor threads
//! - [`motor`] - Motor Facade
//! - [`sim`] - Simulated actuator for the demo binary and tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  OdriveMotor ──► MotionPlanner ──► AxisStateMachine           │
//! │      │               ▲    │                                   │
//! │      │   GoalTracker ┤    ▼                                   │
//! │      │  FaultMonitor ┘  Actuator (CanAxis | DirectAxis)       │
//! │      │                    │                 ▲                 │
//! │      ▼                    ▼                 │                 │
//! │  Capabilities        BusHandle ──listener──► TelemetryCache   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod actuator;
pub mod bus;
pub mod monitor;
pub mod motor;
pub mod planner;
pub mod sim;
pub mod state_machine;
pub mod telemetry;

pub use motor::{Capabilities, MotorStatus, OdriveMotor, Transport};
