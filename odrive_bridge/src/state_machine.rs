//! Axis State Machine.
//!
//! `UNDEFINED → IDLE ⇄ CLOSED_LOOP_CONTROL → ERROR → IDLE`
//!
//! The actuator owns its state; the bridge only requests a state and observes
//! the reported one. ERROR is not a wire state: it is derived from a nonzero
//! heartbeat error while the actuator reports any state.

use crate::actuator::Actuator;
use crate::telemetry::Telemetry;
use odrive_common::error::{BridgeError, BridgeResult};
use odrive_common::protocol::AxisState;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Coarse state as seen by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisPhase {
    /// No heartbeat yet, or the actuator reports UNDEFINED.
    Undefined,
    /// Axis reports IDLE.
    Idle,
    /// Axis reports CLOSED_LOOP_CONTROL.
    ClosedLoopControl,
    /// Heartbeat carries a nonzero error.
    Error,
    /// Calibration or another startup procedure is running.
    Transitional,
}

impl AxisPhase {
    /// Derive the phase from telemetry.
    pub fn from_telemetry(telemetry: &Telemetry) -> Self {
        match telemetry.heartbeat {
            None => Self::Undefined,
            Some(hb) if hb.axis_error != 0 => Self::Error,
            Some(hb) => match hb.axis_state {
                AxisState::Undefined => Self::Undefined,
                AxisState::Idle => Self::Idle,
                AxisState::ClosedLoopControl => Self::ClosedLoopControl,
                _ => Self::Transitional,
            },
        }
    }
}

impl fmt::Display for AxisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "UNDEFINED",
            Self::Idle => "IDLE",
            Self::ClosedLoopControl => "CLOSED_LOOP_CONTROL",
            Self::Error => "ERROR",
            Self::Transitional => "TRANSITIONAL",
        };
        f.write_str(name)
    }
}

/// Requests and confirms axis states over an [`Actuator`].
pub struct AxisStateMachine {
    actuator: Arc<dyn Actuator>,
}

impl AxisStateMachine {
    /// State machine over `actuator`.
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    /// Send a state request. Does not block.
    pub fn request_state(&self, state: AxisState) -> BridgeResult<()> {
        debug!("{}: requesting {}", self.actuator.name(), state);
        self.actuator.request_state(state)
    }

    /// Last reported state; never blocks.
    pub fn current_state(&self) -> Option<AxisState> {
        self.actuator.telemetry().axis_state()
    }

    /// Current [`AxisPhase`].
    pub fn phase(&self) -> AxisPhase {
        AxisPhase::from_telemetry(&self.actuator.telemetry())
    }

    /// Block until telemetry reports `state` or `timeout` elapses.
    ///
    /// On timeout IDLE is requested before returning
    /// [`BridgeError::StateTimeout`], so the actuator is never left in an
    /// unconfirmed transition.
    pub fn wait_for_state(&self, state: AxisState, timeout: Duration) -> BridgeResult<()> {
        let start = Instant::now();
        if self.actuator.wait_for(&|t: &Telemetry| t.axis_state() == Some(state), timeout) {
            debug!("{}: reached {} after {:?}", self.actuator.name(), state, start.elapsed());
            return Ok(());
        }

        warn!(
            "{}: {} not confirmed within {:?}, returning to IDLE",
            self.actuator.name(),
            state,
            timeout
        );
        if let Err(e) = self.actuator.request_state(AxisState::Idle) {
            warn!("{}: IDLE request after timeout failed: {}", self.actuator.name(), e);
        }
        Err(BridgeError::StateTimeout { requested: state, waited: start.elapsed() })
    }

    /// Request `state` and wait for confirmation.
    pub fn enter(&self, state: AxisState, timeout: Duration) -> BridgeResult<()> {
        crate::actuator::best_effort("state request", self.request_state(state))?;
        self.wait_for_state(state, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Heartbeat;

    fn with_heartbeat(axis_error: u32, axis_state: AxisState) -> Telemetry {
        Telemetry {
            heartbeat: Some(Heartbeat { axis_error, axis_state, procedure_result: 0, trajectory_done: true }),
            ..Telemetry::default()
        }
    }

    #[test]
    fn test_phase_from_telemetry() {
        assert_eq!(AxisPhase::from_telemetry(&Telemetry::default()), AxisPhase::Undefined);
        assert_eq!(AxisPhase::from_telemetry(&with_heartbeat(0, AxisState::Idle)), AxisPhase::Idle);
        assert_eq!(
            AxisPhase::from_telemetry(&with_heartbeat(0, AxisState::ClosedLoopControl)),
            AxisPhase::ClosedLoopControl
        );
        assert_eq!(
            AxisPhase::from_telemetry(&with_heartbeat(0x40, AxisState::ClosedLoopControl)),
            AxisPhase::Error
        );
        assert_eq!(
            AxisPhase::from_telemetry(&with_heartbeat(0, AxisState::MotorCalibration)),
            AxisPhase::Transitional
        );
        assert_eq!(AxisPhase::Error.to_string(), "ERROR");
    }
}
