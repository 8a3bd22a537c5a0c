//! Simulated actuator axis.
//!
//! Physics are advanced lazily: every access first integrates up to "now" in
//! fixed sub-steps, so no thread is needed to keep the model moving.

use crate::actuator::{AxisHandle, Setpoint};
use odrive_common::error::TransportError;
use odrive_common::protocol::{AxisState, ControlMode, FaultCode, InputMode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Integration sub-step.
const SIM_STEP: Duration = Duration::from_millis(1);

/// Longest gap integrated in one catch-up.
const MAX_CATCH_UP: Duration = Duration::from_secs(10);

/// Distance (rev) under which a position move snaps to its target.
const SNAP_DISTANCE: f64 = 1e-4;

/// Physical parameters of the simulated axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimParams {
    /// Nm per A.
    pub torque_constant: f64,
    /// rev/s per Nm of torque setpoint in torque control.
    pub torque_to_velocity: f64,
    /// Trajectory velocity limit before any is configured (rev/s).
    pub default_traj_velocity: f64,
    /// Trajectory acceleration before any is configured (rev/s²).
    pub default_traj_accel: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            torque_constant: 1.0,
            torque_to_velocity: 0.1,
            default_traj_velocity: 2.0,
            default_traj_accel: 10.0,
        }
    }
}

#[derive(Debug)]
struct AxisModel {
    params: SimParams,
    state: AxisState,
    control_mode: ControlMode,
    input_mode: InputMode,
    position: f64,
    velocity: f64,
    input_pos: f64,
    input_vel: f64,
    input_torque: f64,
    velocity_limit: f64,
    current_limit: f64,
    traj_velocity: f64,
    traj_accel: f64,
    traj_decel: f64,
    axis_error: u32,
    active_errors: u32,
    disarm_reason: u32,
    frozen: bool,
    ignore_state_requests: bool,
    last_update: Instant,
}

impl AxisModel {
    fn new(params: SimParams) -> Self {
        Self {
            params,
            state: AxisState::Idle,
            control_mode: ControlMode::Position,
            input_mode: InputMode::Passthrough,
            position: 0.0,
            velocity: 0.0,
            input_pos: 0.0,
            input_vel: 0.0,
            input_torque: 0.0,
            velocity_limit: f64::INFINITY,
            current_limit: f64::INFINITY,
            traj_velocity: params.default_traj_velocity,
            traj_accel: params.default_traj_accel,
            traj_decel: params.default_traj_accel,
            axis_error: 0,
            active_errors: 0,
            disarm_reason: 0,
            frozen: false,
            ignore_state_requests: false,
            last_update: Instant::now(),
        }
    }

    fn advance_to(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).min(MAX_CATCH_UP);
        self.last_update = now;

        let step = SIM_STEP.as_secs_f64();
        let mut remaining = elapsed.as_secs_f64();
        while remaining > 0.0 {
            let dt = remaining.min(step);
            self.step(dt);
            remaining -= dt;
        }
    }

    fn step(&mut self, dt: f64) {
        if self.state != AxisState::ClosedLoopControl || self.frozen {
            self.velocity = 0.0;
            return;
        }

        match self.control_mode {
            ControlMode::Position => self.step_position(dt),
            ControlMode::Velocity => {
                self.velocity = self.input_vel.clamp(-self.velocity_limit, self.velocity_limit);
                self.position += self.velocity * dt;
            }
            ControlMode::Torque => {
                let torque = self.input_torque.clamp(-self.torque_limit(), self.torque_limit());
                self.velocity = (torque * self.params.torque_to_velocity)
                    .clamp(-self.velocity_limit, self.velocity_limit);
                self.position += self.velocity * dt;
            }
            ControlMode::Voltage => self.velocity = 0.0,
        }
    }

    fn step_position(&mut self, dt: f64) {
        let error = self.input_pos - self.position;
        if error.abs() < SNAP_DISTANCE && self.velocity.abs() < self.traj_decel * dt * 2.0 {
            self.position = self.input_pos;
            self.velocity = 0.0;
            return;
        }

        if self.input_mode != InputMode::TrapTraj {
            self.position = self.input_pos;
            self.velocity = 0.0;
            return;
        }

        let max_vel = self.traj_velocity.min(self.velocity_limit).max(f64::EPSILON);
        let stopping = self.velocity * self.velocity / (2.0 * self.traj_decel);
        let desired = if error.abs() <= stopping {
            error.signum() * (2.0 * self.traj_decel * error.abs()).sqrt().min(max_vel)
        } else {
            error.signum() * max_vel
        };

        let max_change = self.traj_accel.max(self.traj_decel) * dt;
        self.velocity += (desired - self.velocity).clamp(-max_change, max_change);
        self.velocity = self.velocity.clamp(-max_vel, max_vel);
        self.position += self.velocity * dt;
    }

    fn torque_limit(&self) -> f64 {
        self.current_limit * self.params.torque_constant
    }

    fn iq_setpoint(&self) -> f64 {
        if self.state == AxisState::ClosedLoopControl && self.control_mode == ControlMode::Torque {
            self.input_torque.clamp(-self.torque_limit(), self.torque_limit()) / self.params.torque_constant
        } else {
            0.0
        }
    }

    fn request_state(&mut self, state: AxisState) {
        if self.ignore_state_requests {
            debug!("sim: ignoring request for {}", state);
            return;
        }
        match state {
            AxisState::ClosedLoopControl if self.axis_error != 0 => {
                debug!("sim: refusing {} with error 0x{:08X}", state, self.axis_error);
            }
            AxisState::ClosedLoopControl => {
                // Arming holds the current position.
                self.input_pos = self.position;
                self.state = state;
            }
            _ => {
                self.state = AxisState::Idle;
                self.velocity = 0.0;
            }
        }
    }
}

/// Cheaply clonable handle to one simulated axis.
#[derive(Debug, Clone)]
pub struct SimulatedAxis {
    model: Arc<Mutex<AxisModel>>,
}

impl Default for SimulatedAxis {
    fn default() -> Self {
        Self::new(SimParams::default())
    }
}

impl SimulatedAxis {
    /// Idle axis at position 0 with `params`.
    pub fn new(params: SimParams) -> Self {
        Self { model: Arc::new(Mutex::new(AxisModel::new(params))) }
    }

    fn with<R>(&self, f: impl FnOnce(&mut AxisModel) -> R) -> R {
        let mut model = self.model.lock();
        model.advance_to(Instant::now());
        f(&mut model)
    }

    /// Reported state.
    pub fn state(&self) -> AxisState {
        self.with(|m| m.state)
    }

    /// Raw position (rev).
    pub fn position(&self) -> f64 {
        self.with(|m| m.position)
    }

    /// Velocity (rev/s).
    pub fn velocity(&self) -> f64 {
        self.with(|m| m.velocity)
    }

    /// Place the rotor at `position` without motion.
    pub fn set_position(&self, position: f64) {
        self.with(|m| {
            m.position = position;
            m.input_pos = position;
            m.velocity = 0.0;
        });
    }

    /// Freeze motion: setpoints are accepted but the rotor does not move.
    pub fn set_frozen(&self, frozen: bool) {
        self.with(|m| m.frozen = frozen);
    }

    /// Ignore every state request (a hung actuator).
    pub fn set_ignore_state_requests(&self, ignore: bool) {
        self.with(|m| m.ignore_state_requests = ignore);
    }

    /// Raise a fault: the axis disarms to IDLE.
    pub fn inject_fault(&self, fault: FaultCode) {
        self.with(|m| {
            m.axis_error |= fault.bits();
            m.active_errors |= fault.bits();
            m.disarm_reason = fault.bits();
            m.state = AxisState::Idle;
            m.velocity = 0.0;
        });
        debug!("sim: injected fault {}", fault);
    }

    /// Error words: axis error, active errors, disarm reason.
    pub fn error_codes(&self) -> (u32, u32, u32) {
        self.with(|m| (m.axis_error, m.active_errors, m.disarm_reason))
    }

    /// Control and input mode.
    pub fn modes(&self) -> (ControlMode, InputMode) {
        self.with(|m| (m.control_mode, m.input_mode))
    }

    /// Position setpoint (rev).
    pub fn input_position(&self) -> f64 {
        self.with(|m| m.input_pos)
    }

    /// Iq setpoint and measured current (A).
    pub fn iq(&self) -> (f64, f64) {
        self.with(|m| {
            let iq = m.iq_setpoint();
            (iq, iq)
        })
    }

    /// Whether the trajectory is finished.
    pub fn trajectory_done(&self) -> bool {
        self.with(|m| m.velocity == 0.0)
    }

    /// Request an axis state; CLOSED_LOOP_CONTROL is refused while an error is set.
    pub fn request_state(&self, state: AxisState) {
        self.with(|m| m.request_state(state));
    }

    /// Select control and input mode.
    pub fn set_controller_mode(&self, control: ControlMode, input: InputMode) {
        self.with(|m| {
            m.control_mode = control;
            m.input_mode = input;
        });
    }

    /// Controller velocity limit (rev/s) and current limit (A).
    pub fn set_limits(&self, velocity_limit: f64, current_limit: f64) {
        self.with(|m| {
            m.velocity_limit = velocity_limit;
            m.current_limit = current_limit;
        });
    }

    /// Trajectory velocity limit (rev/s).
    pub fn set_trajectory_velocity_limit(&self, limit: f64) {
        self.with(|m| m.traj_velocity = limit);
    }

    /// Trajectory acceleration and deceleration (rev/s²).
    pub fn set_trajectory_accel_limits(&self, accel: f64, decel: f64) {
        self.with(|m| {
            m.traj_accel = accel.max(f64::EPSILON);
            m.traj_decel = decel.max(f64::EPSILON);
        });
    }

    /// Apply a position, velocity or torque setpoint.
    pub fn set_input(&self, setpoint: Setpoint) {
        trace!("sim: input {:?}", setpoint);
        self.with(|m| match setpoint {
            Setpoint::Position(pos) => m.input_pos = pos,
            Setpoint::Velocity(vel) => m.input_vel = vel,
            Setpoint::Torque(torque) => m.input_torque = torque,
        });
    }

    /// Clear every error word.
    pub fn clear_errors(&self) {
        self.with(|m| {
            m.axis_error = 0;
            m.active_errors = 0;
            m.disarm_reason = 0;
        });
    }
}

impl AxisHandle for SimulatedAxis {
    fn current_state(&mut self) -> Result<AxisState, TransportError> {
        Ok(self.state())
    }

    fn request_state(&mut self, state: AxisState) -> Result<(), TransportError> {
        SimulatedAxis::request_state(self, state);
        Ok(())
    }

    fn set_controller_mode(&mut self, control: ControlMode, input: InputMode) -> Result<(), TransportError> {
        SimulatedAxis::set_controller_mode(self, control, input);
        Ok(())
    }

    fn set_limits(&mut self, velocity_limit: f64, current_limit: f64) -> Result<(), TransportError> {
        SimulatedAxis::set_limits(self, velocity_limit, current_limit);
        Ok(())
    }

    fn set_trajectory_velocity_limit(&mut self, limit: f64) -> Result<(), TransportError> {
        SimulatedAxis::set_trajectory_velocity_limit(self, limit);
        Ok(())
    }

    fn set_trajectory_accel_limits(&mut self, accel: f64, decel: f64) -> Result<(), TransportError> {
        SimulatedAxis::set_trajectory_accel_limits(self, accel, decel);
        Ok(())
    }

    fn set_input(&mut self, setpoint: Setpoint) -> Result<(), TransportError> {
        SimulatedAxis::set_input(self, setpoint);
        Ok(())
    }

    fn encoder(&mut self) -> Result<(f64, f64), TransportError> {
        Ok(self.with(|m| (m.position, m.velocity)))
    }

    fn errors(&mut self) -> Result<(u32, u32, u32), TransportError> {
        Ok(self.error_codes())
    }

    fn iq(&mut self) -> Result<(f64, f64), TransportError> {
        Ok(SimulatedAxis::iq(self))
    }

    fn clear_errors(&mut self) -> Result<(), TransportError> {
        SimulatedAxis::clear_errors(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_arming_holds_position() {
        let axis = SimulatedAxis::default();
        axis.set_position(10.0);
        axis.set_controller_mode(ControlMode::Position, InputMode::TrapTraj);
        axis.request_state(AxisState::ClosedLoopControl);
        assert_eq!(axis.state(), AxisState::ClosedLoopControl);
        assert_eq!(axis.input_position(), 10.0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(axis.position(), 10.0);
    }

    #[test]
    fn test_trap_traj_reaches_target() {
        let axis = SimulatedAxis::default();
        axis.set_controller_mode(ControlMode::Position, InputMode::TrapTraj);
        axis.set_trajectory_velocity_limit(20.0);
        axis.set_trajectory_accel_limits(200.0, 200.0);
        axis.request_state(AxisState::ClosedLoopControl);
        axis.set_input(Setpoint::Position(1.0));

        thread::sleep(Duration::from_millis(400));
        assert!((axis.position() - 1.0).abs() < 1e-3, "position {}", axis.position());
        assert!(axis.trajectory_done());
    }

    #[test]
    fn test_fault_disarms_and_blocks_arming() {
        let axis = SimulatedAxis::default();
        axis.request_state(AxisState::ClosedLoopControl);
        axis.inject_fault(FaultCode::DC_BUS_OVER_VOLTAGE);
        assert_eq!(axis.state(), AxisState::Idle);

        axis.request_state(AxisState::ClosedLoopControl);
        assert_eq!(axis.state(), AxisState::Idle);

        axis.clear_errors();
        axis.request_state(AxisState::ClosedLoopControl);
        assert_eq!(axis.state(), AxisState::ClosedLoopControl);
    }

    #[test]
    fn test_torque_mode_reports_iq() {
        let axis = SimulatedAxis::default();
        axis.set_limits(10.0, 60.0);
        axis.set_controller_mode(ControlMode::Torque, InputMode::Passthrough);
        axis.request_state(AxisState::ClosedLoopControl);
        axis.set_input(Setpoint::Torque(30.0));
        assert_eq!(axis.iq().0, 30.0);
    }
}
