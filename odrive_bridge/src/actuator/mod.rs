//! Actuator capability interface.
//!
//! The Motion Planner, the state machine and the monitors talk to an axis only
//! through [`Actuator`]. Two variants exist:
//!
//! - [`CanAxis`] - frames on a shared, node-addressed bus
//! - [`DirectAxis`] - a property-style handle (USB / serial)
//!
//! # Error Contract
//!
//! Send paths return `BridgeError::Transport` on bus failure and
//! `BridgeError::Schema` on malformed fields. Callers that treat sends as best
//! effort pass results through [`best_effort`].

pub mod can;
pub mod direct;

pub use can::CanAxis;
pub use direct::{AxisHandle, DirectAxis};

use crate::telemetry::Telemetry;
use odrive_common::error::{BridgeError, BridgeResult};
use odrive_common::protocol::{AxisState, ControlMode, InputMode, NodeAddress};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// Poll period of the default [`Actuator::wait_for`].
pub const TELEMETRY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A setpoint in the unit of its control mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setpoint {
    /// Absolute raw position (rev).
    Position(f64),
    /// Velocity (rev/s).
    Velocity(f64),
    /// Torque (Nm).
    Torque(f64),
}

/// Capability interface over one axis.
pub trait Actuator: Send + Sync {
    /// Identifier for logging (e.g. "node 3").
    fn name(&self) -> String;

    /// Request an axis state. Does not wait.
    fn request_state(&self, state: AxisState) -> BridgeResult<()>;

    /// Select control loop and input shaping together.
    fn set_controller_mode(&self, control: ControlMode, input: InputMode) -> BridgeResult<()>;

    /// Controller velocity limit (rev/s) and current limit (A).
    fn set_limits(&self, velocity_limit: f64, current_limit: f64) -> BridgeResult<()>;

    /// Trajectory planner velocity limit (rev/s).
    fn set_trajectory_velocity_limit(&self, limit: f64) -> BridgeResult<()>;

    /// Trajectory planner acceleration and deceleration limits (rev/s²).
    fn set_trajectory_accel_limits(&self, accel: f64, decel: f64) -> BridgeResult<()>;

    /// Send a setpoint.
    fn set_setpoint(&self, setpoint: Setpoint) -> BridgeResult<()>;

    /// Clear active errors.
    fn clear_errors(&self) -> BridgeResult<()>;

    /// Ask for fresh error, current and encoder telemetry.
    fn refresh(&self) -> BridgeResult<()>;

    /// Latest telemetry. Never blocks on the transport.
    fn telemetry(&self) -> Telemetry;

    /// Block until `predicate` holds on the telemetry or `timeout` elapses.
    fn wait_for(&self, predicate: &dyn Fn(&Telemetry) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if predicate(&self.telemetry()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(TELEMETRY_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Whether absolute encoder telemetry is independently observable.
    fn position_reporting(&self) -> bool;

    /// Re-initialise the transport at a new bitrate.
    fn set_bitrate(&self, _bitrate: u32) -> BridgeResult<()> {
        Err(BridgeError::Unsupported("bitrate change"))
    }

    /// Reassign the actuator's node address.
    fn set_node_address(&self, _node: NodeAddress) -> BridgeResult<()> {
        Err(BridgeError::Unsupported("node address change"))
    }
}

/// Log and swallow transport failures; everything else propagates.
pub fn best_effort(what: &str, result: BridgeResult<()>) -> BridgeResult<()> {
    match result {
        Err(BridgeError::Transport(e)) => {
            warn!("{} not sent: {}", what, e);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odrive_common::error::TransportError;

    #[test]
    fn test_best_effort_swallows_transport_only() {
        let sent = best_effort("stop", Err(TransportError::SendFailed("bus off".into()).into()));
        assert!(sent.is_ok());

        let fatal = best_effort("stop", Err(BridgeError::Unsupported("x")));
        assert!(matches!(fatal, Err(BridgeError::Unsupported(_))));
    }
}
