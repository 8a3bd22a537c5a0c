//! Direct-handle axis (USB / serial style).
//!
//! The handle exposes actuator properties directly; there is no shared bus,
//! no node address and no inbound telemetry stream. Telemetry is read from
//! the handle on demand.

use super::{Actuator, Setpoint};
use crate::telemetry::{CurrentReport, EncoderEstimate, ErrorReport, Heartbeat, Telemetry};
use odrive_common::error::{BridgeResult, TransportError};
use odrive_common::protocol::{AxisState, ControlMode, InputMode};
use parking_lot::Mutex;
use std::time::Instant;
use tracing::debug;

/// Property access to one axis.
pub trait AxisHandle: Send {
    /// Reported axis state.
    fn current_state(&mut self) -> Result<AxisState, TransportError>;
    /// Write `requested_state`.
    fn request_state(&mut self, state: AxisState) -> Result<(), TransportError>;
    /// Write control and input mode.
    fn set_controller_mode(&mut self, control: ControlMode, input: InputMode) -> Result<(), TransportError>;
    /// Write controller velocity and current limits.
    fn set_limits(&mut self, velocity_limit: f64, current_limit: f64) -> Result<(), TransportError>;
    /// Write the trajectory velocity limit.
    fn set_trajectory_velocity_limit(&mut self, limit: f64) -> Result<(), TransportError>;
    /// Write trajectory acceleration and deceleration limits.
    fn set_trajectory_accel_limits(&mut self, accel: f64, decel: f64) -> Result<(), TransportError>;
    /// Write `input_pos`, `input_vel` or `input_torque`.
    fn set_input(&mut self, setpoint: Setpoint) -> Result<(), TransportError>;
    /// Raw position (rev) and velocity (rev/s).
    fn encoder(&mut self) -> Result<(f64, f64), TransportError>;
    /// Axis error, active errors, disarm reason.
    fn errors(&mut self) -> Result<(u32, u32, u32), TransportError>;
    /// Iq setpoint and measurement (A).
    fn iq(&mut self) -> Result<(f64, f64), TransportError>;
    /// Clear errors.
    fn clear_errors(&mut self) -> Result<(), TransportError>;
}

/// An axis reached through an [`AxisHandle`].
pub struct DirectAxis {
    name: String,
    handle: Mutex<Box<dyn AxisHandle>>,
}

impl DirectAxis {
    /// Wrap `handle`; `name` is used in logs.
    pub fn new(name: impl Into<String>, handle: Box<dyn AxisHandle>) -> Self {
        Self { name: name.into(), handle: Mutex::new(handle) }
    }

    fn read(handle: &mut dyn AxisHandle) -> Result<Telemetry, TransportError> {
        let state = handle.current_state()?;
        let (position, velocity) = handle.encoder()?;
        let (axis_error, active_errors, disarm_reason) = handle.errors()?;
        let (setpoint, measured) = handle.iq()?;
        Ok(Telemetry {
            heartbeat: Some(Heartbeat {
                axis_error,
                axis_state: state,
                procedure_result: 0,
                trajectory_done: velocity == 0.0,
            }),
            encoder: Some(EncoderEstimate { position, velocity }),
            errors: Some(ErrorReport { active_errors, disarm_reason }),
            current: Some(CurrentReport { setpoint, measured }),
            bus_power: None,
            updated_at: Some(Instant::now()),
        })
    }
}

impl Actuator for DirectAxis {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn request_state(&self, state: AxisState) -> BridgeResult<()> {
        Ok(self.handle.lock().request_state(state)?)
    }

    fn set_controller_mode(&self, control: ControlMode, input: InputMode) -> BridgeResult<()> {
        Ok(self.handle.lock().set_controller_mode(control, input)?)
    }

    fn set_limits(&self, velocity_limit: f64, current_limit: f64) -> BridgeResult<()> {
        Ok(self.handle.lock().set_limits(velocity_limit, current_limit)?)
    }

    fn set_trajectory_velocity_limit(&self, limit: f64) -> BridgeResult<()> {
        Ok(self.handle.lock().set_trajectory_velocity_limit(limit)?)
    }

    fn set_trajectory_accel_limits(&self, accel: f64, decel: f64) -> BridgeResult<()> {
        Ok(self.handle.lock().set_trajectory_accel_limits(accel, decel)?)
    }

    fn set_setpoint(&self, setpoint: Setpoint) -> BridgeResult<()> {
        Ok(self.handle.lock().set_input(setpoint)?)
    }

    fn clear_errors(&self) -> BridgeResult<()> {
        Ok(self.handle.lock().clear_errors()?)
    }

    fn refresh(&self) -> BridgeResult<()> {
        Ok(())
    }

    fn telemetry(&self) -> Telemetry {
        let mut handle = self.handle.lock();
        match Self::read(&mut **handle) {
            Ok(telemetry) => telemetry,
            Err(e) => {
                debug!("{}: telemetry read failed: {}", self.name, e);
                Telemetry::default()
            }
        }
    }

    fn position_reporting(&self) -> bool {
        false
    }
}
