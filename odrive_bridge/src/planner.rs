//! Motion Planner.
//!
//! Turns motion requests into mode, limit and setpoint commands, and owns the
//! shared motion state: the in-flight [`MotionGoal`], the zero offset and the
//! last commanded power.
//!
//! # Coordinates
//!
//! `reported = raw - offset`. Goals are stored in raw coordinates, the same
//! frame the actuator's position setpoint uses.
//!
//! # Locking
//!
//! Foreground operations are serialized by a command lock held for the whole
//! call, including the state wait. Monitors never block on it: the Goal
//! Tracker only `try_lock`s it and skips the tick while a command is in
//! flight. The motion state is held just long enough to read or update it,
//! never across a send.
//!
//! Every [`stop`](MotionPlanner::stop) bumps a stop counter. A command that
//! waited for CLOSED_LOOP_CONTROL checks the counter before it arms its
//! setpoint, so a stop from the Fault Monitor during the wait is not undone.

use crate::actuator::{best_effort, Actuator, Setpoint};
use crate::state_machine::AxisStateMachine;
use crate::telemetry::Telemetry;
use odrive_common::config::{Calibration, DriveStyle, ResolvedConfig};
use odrive_common::consts::{GOAL_TOLERANCE, MINUTE_TO_SECOND};
use odrive_common::error::{BridgeError, BridgeResult, SchemaError};
use odrive_common::protocol::{AxisState, Command, ControlMode, InputMode};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// In-flight position goal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MotionGoal {
    /// Target in raw actuator coordinates (rev).
    pub target_position: f64,
    /// Whether the Goal Tracker should still watch for arrival.
    pub active: bool,
}

/// Settings the planner converts requests with.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerSettings {
    /// Power-to-setpoint conversion.
    pub calibration: Calibration,
    /// Whether power maps to torque or velocity.
    pub drive_style: DriveStyle,
    /// Speed at full power in velocity style (rpm).
    pub max_rpm: f64,
    /// Floor for the controller velocity limit on moves (rev/s).
    pub velocity_limit: f64,
    /// Trajectory acceleration and deceleration (rev/s²).
    pub trap_accel_limit: f64,
    /// Ceiling on every state confirmation wait.
    pub state_timeout: Duration,
}

impl From<&ResolvedConfig> for PlannerSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            calibration: config.calibration,
            drive_style: config.drive_style,
            max_rpm: config.max_rpm,
            velocity_limit: config.velocity_limit,
            trap_accel_limit: config.trap_accel_limit,
            state_timeout: config.state_timeout,
        }
    }
}

#[derive(Debug, Default)]
struct MotionState {
    goal: MotionGoal,
    offset: f64,
    commanded_power: f64,
    stops: u64,
}

/// Motion Planner over one actuator.
pub struct MotionPlanner {
    actuator: Arc<dyn Actuator>,
    states: AxisStateMachine,
    settings: RwLock<PlannerSettings>,
    motion: Mutex<MotionState>,
    command_lock: Mutex<()>,
}

impl MotionPlanner {
    /// Planner over `actuator` with `settings`.
    pub fn new(actuator: Arc<dyn Actuator>, settings: PlannerSettings) -> Self {
        Self {
            states: AxisStateMachine::new(Arc::clone(&actuator)),
            actuator,
            settings: RwLock::new(settings),
            motion: Mutex::new(MotionState::default()),
            command_lock: Mutex::new(()),
        }
    }

    /// The actuator this planner drives.
    pub fn actuator(&self) -> &Arc<dyn Actuator> {
        &self.actuator
    }

    /// State machine over the same actuator.
    pub fn states(&self) -> &AxisStateMachine {
        &self.states
    }

    /// Current settings.
    pub fn settings(&self) -> PlannerSettings {
        self.settings.read().clone()
    }

    /// Replace settings; takes effect on the next operation.
    pub fn update_settings(&self, settings: PlannerSettings) {
        let _cmd = self.command_lock.lock();
        *self.settings.write() = settings;
    }

    /// Drive with normalized power in `[-1, 1]`.
    ///
    /// Out-of-range values are clamped. The setpoint is sent only after
    /// CLOSED_LOOP_CONTROL is confirmed.
    pub fn set_power(&self, power: f64) -> BridgeResult<()> {
        if !power.is_finite() {
            return Err(SchemaError::OutOfRange {
                command: Command::SetInputTorque,
                field: "Input_Torque",
                value: power,
            }
            .into());
        }
        let _cmd = self.command_lock.lock();
        let settings = self.settings();
        let power = power.clamp(-1.0, 1.0);

        let (control, setpoint) = match settings.drive_style {
            DriveStyle::Torque => (
                ControlMode::Torque,
                Setpoint::Torque(
                    power * settings.calibration.current_limit * settings.calibration.torque_constant,
                ),
            ),
            DriveStyle::Velocity => (
                ControlMode::Velocity,
                Setpoint::Velocity(power * settings.max_rpm / MINUTE_TO_SECOND),
            ),
        };

        let stops = self.clear_goal();
        best_effort(
            "controller mode",
            self.actuator.set_controller_mode(control, InputMode::Passthrough),
        )?;
        self.states.enter(AxisState::ClosedLoopControl, settings.state_timeout)?;
        if !self.still_armed(stops) {
            return Ok(());
        }
        best_effort("power setpoint", self.actuator.set_setpoint(setpoint))?;

        self.motion.lock().commanded_power = power;
        info!("{}: power {:.3} -> {:?}", self.actuator.name(), power, setpoint);
        Ok(())
    }

    /// Move `revolutions` turns in the direction of `rpm`, or spin
    /// continuously at `rpm` when `revolutions` is zero.
    pub fn go_for(&self, rpm: f64, revolutions: f64) -> BridgeResult<()> {
        let _cmd = self.command_lock.lock();
        self.go_for_locked(rpm, revolutions)
    }

    fn go_for_locked(&self, rpm: f64, revolutions: f64) -> BridgeResult<()> {
        for (field, value) in [("Input_Vel", rpm), ("Input_Pos", revolutions)] {
            if !value.is_finite() {
                let command = if field == "Input_Vel" { Command::SetInputVelocity } else { Command::SetInputPosition };
                return Err(SchemaError::OutOfRange { command, field, value }.into());
            }
        }

        let settings = self.settings();
        let rps = rpm / MINUTE_TO_SECOND;

        // A new move replaces whatever goal was in flight.
        let stops = self.clear_goal();

        if revolutions == 0.0 {
            best_effort(
                "controller mode",
                self.actuator.set_controller_mode(ControlMode::Velocity, InputMode::Passthrough),
            )?;
            self.states.enter(AxisState::ClosedLoopControl, settings.state_timeout)?;
            if !self.still_armed(stops) {
                return Ok(());
            }
            best_effort("velocity setpoint", self.actuator.set_setpoint(Setpoint::Velocity(rps)))?;
            info!("{}: spinning at {} rpm", self.actuator.name(), rpm);
            return Ok(());
        }

        if rpm == 0.0 {
            warn!(
                "{}: go_for with 0 rpm and {} revolutions, stopping instead",
                self.actuator.name(),
                revolutions
            );
            return self.stop();
        }

        let speed = rps.abs();
        best_effort(
            "controller mode",
            self.actuator.set_controller_mode(ControlMode::Position, InputMode::TrapTraj),
        )?;
        best_effort(
            "limits",
            self.actuator.set_limits(
                settings.velocity_limit.max(speed),
                settings.calibration.current_limit,
            ),
        )?;
        best_effort("trajectory velocity", self.actuator.set_trajectory_velocity_limit(speed))?;
        best_effort(
            "trajectory acceleration",
            self.actuator
                .set_trajectory_accel_limits(settings.trap_accel_limit, settings.trap_accel_limit),
        )?;
        self.states.enter(AxisState::ClosedLoopControl, settings.state_timeout)?;

        let raw = self.fresh_raw_position(settings.state_timeout)?;
        // Input_Pos travels as f32; track the value the actuator will hold.
        let target = f64::from((raw + rpm.signum() * revolutions) as f32);

        {
            let mut motion = self.motion.lock();
            if motion.stops != stops {
                warn!("{}: stopped while arming, move dropped", self.actuator.name());
                return Ok(());
            }
            motion.goal = MotionGoal { target_position: target, active: true };
        }
        if let Err(e) = best_effort("position setpoint", self.actuator.set_setpoint(Setpoint::Position(target))) {
            self.clear_goal();
            return Err(e);
        }
        info!(
            "{}: moving {} rev at {} rpm, raw {:.4} -> {:.4}",
            self.actuator.name(),
            rpm.signum() * revolutions,
            rpm.abs(),
            raw,
            target
        );
        Ok(())
    }

    /// Move to `target` in reported coordinates at `|rpm|`.
    ///
    /// Already within [`GOAL_TOLERANCE`] of the target: nothing is sent.
    pub fn go_to(&self, rpm: f64, target: f64) -> BridgeResult<()> {
        let _cmd = self.command_lock.lock();
        let settings = self.settings();
        let current = self.fresh_raw_position(settings.state_timeout)? - self.offset();
        let delta = target - current;

        if delta.abs() < GOAL_TOLERANCE {
            debug!("{}: already at {:.4}", self.actuator.name(), target);
            return Ok(());
        }
        // Direction comes from `delta`; `rpm` only sets the speed.
        self.go_for_locked(rpm.abs(), delta)
    }

    /// Request IDLE and drop any goal.
    pub fn stop(&self) -> BridgeResult<()> {
        {
            let mut motion = self.motion.lock();
            motion.goal.active = false;
            motion.commanded_power = 0.0;
            motion.stops = motion.stops.wrapping_add(1);
        }
        best_effort("stop", self.states.request_state(AxisState::Idle))
    }

    /// Make the current position read as zero.
    pub fn reset_zero_position(&self) -> BridgeResult<()> {
        let _cmd = self.command_lock.lock();
        let raw = self.fresh_raw_position(self.settings().state_timeout)?;
        let mut motion = self.motion.lock();
        motion.offset = raw;
        info!("{}: zero offset set to {:.4}", self.actuator.name(), raw);
        Ok(())
    }

    /// Reported position from cached telemetry. Never blocks.
    pub fn position(&self) -> BridgeResult<f64> {
        Ok(self.raw_position()? - self.offset())
    }

    /// Raw position from cached telemetry. Never blocks.
    pub fn raw_position(&self) -> BridgeResult<f64> {
        self.actuator
            .telemetry()
            .raw_position()
            .ok_or(BridgeError::NoTelemetry("encoder estimate"))
    }

    /// Current zero offset.
    pub fn offset(&self) -> f64 {
        self.motion.lock().offset
    }

    /// Current goal.
    pub fn goal(&self) -> MotionGoal {
        self.motion.lock().goal
    }

    /// Last normalized power sent by [`set_power`](Self::set_power).
    pub fn commanded_power(&self) -> f64 {
        self.motion.lock().commanded_power
    }

    /// Stop if the active goal has been reached.
    ///
    /// Skipped while a foreground command holds the command lock, so a goal
    /// being replaced is never stopped by a stale check. The IDLE request is
    /// sent after the motion lock is released. Returns whether a stop was
    /// issued.
    pub fn stop_if_arrived(&self, tolerance: f64) -> bool {
        // A foreground command owns the axis until it returns.
        let Some(_cmd) = self.command_lock.try_lock() else {
            return false;
        };
        let Ok(raw) = self.raw_position() else {
            return false;
        };
        let target = {
            let mut motion = self.motion.lock();
            if !motion.goal.active || (raw - motion.goal.target_position).abs() >= tolerance {
                return false;
            }
            motion.goal.active = false;
            motion.commanded_power = 0.0;
            motion.goal.target_position
        };
        info!("{}: goal {:.4} reached ({:.4}), stopping", self.actuator.name(), target, raw);
        if let Err(e) = self.states.request_state(AxisState::Idle) {
            warn!("{}: stop on arrival not sent: {}", self.actuator.name(), e);
        }
        true
    }

    /// Drop any goal; returns the stop counter seen.
    fn clear_goal(&self) -> u64 {
        let mut motion = self.motion.lock();
        motion.goal.active = false;
        motion.stops
    }

    /// Whether no stop happened since `stops` was read.
    fn still_armed(&self, stops: u64) -> bool {
        let current = self.motion.lock().stops;
        if current != stops {
            warn!("{}: stopped while arming, setpoint dropped", self.actuator.name());
        }
        current == stops
    }

    fn fresh_raw_position(&self, timeout: Duration) -> BridgeResult<f64> {
        if let Ok(raw) = self.raw_position() {
            return Ok(raw);
        }
        best_effort("telemetry request", self.actuator.refresh())?;
        if self.actuator.wait_for(&|t: &Telemetry| t.encoder.is_some(), timeout) {
            self.raw_position()
        } else {
            Err(BridgeError::NoTelemetry("encoder estimate"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{EncoderEstimate, Heartbeat};
    use std::sync::{mpsc, Weak};
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        State(AxisState),
        Setpoint(Setpoint),
        Confirmed,
    }

    type Hook = Box<dyn FnMut(&Event) + Send>;

    /// Actuator that applies state requests instantly and reports back through
    /// a hook, so tests can act at exact points of a command.
    struct ScriptedAxis {
        state: Mutex<AxisState>,
        position: Mutex<f64>,
        events: Mutex<Vec<Event>>,
        hook: Mutex<Option<Hook>>,
    }

    impl ScriptedAxis {
        fn new(position: f64) -> Self {
            Self {
                state: Mutex::new(AxisState::Idle),
                position: Mutex::new(position),
                events: Mutex::new(Vec::new()),
                hook: Mutex::new(None),
            }
        }

        fn set_hook(&self, hook: impl FnMut(&Event) + Send + 'static) {
            *self.hook.lock() = Some(Box::new(hook));
        }

        fn set_position(&self, position: f64) {
            *self.position.lock() = position;
        }

        fn state(&self) -> AxisState {
            *self.state.lock()
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }

        fn fire(&self, event: Event) {
            self.events.lock().push(event.clone());
            // Taken out so the hook may call back into the planner.
            let hook = self.hook.lock().take();
            if let Some(mut hook) = hook {
                hook(&event);
                let mut slot = self.hook.lock();
                if slot.is_none() {
                    *slot = Some(hook);
                }
            }
        }
    }

    impl Actuator for ScriptedAxis {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        fn request_state(&self, state: AxisState) -> BridgeResult<()> {
            *self.state.lock() = state;
            self.fire(Event::State(state));
            Ok(())
        }

        fn set_controller_mode(&self, _control: ControlMode, _input: InputMode) -> BridgeResult<()> {
            Ok(())
        }

        fn set_limits(&self, _velocity_limit: f64, _current_limit: f64) -> BridgeResult<()> {
            Ok(())
        }

        fn set_trajectory_velocity_limit(&self, _limit: f64) -> BridgeResult<()> {
            Ok(())
        }

        fn set_trajectory_accel_limits(&self, _accel: f64, _decel: f64) -> BridgeResult<()> {
            Ok(())
        }

        fn set_setpoint(&self, setpoint: Setpoint) -> BridgeResult<()> {
            self.fire(Event::Setpoint(setpoint));
            Ok(())
        }

        fn clear_errors(&self) -> BridgeResult<()> {
            Ok(())
        }

        fn refresh(&self) -> BridgeResult<()> {
            Ok(())
        }

        fn telemetry(&self) -> Telemetry {
            Telemetry {
                heartbeat: Some(Heartbeat {
                    axis_error: 0,
                    axis_state: self.state(),
                    procedure_result: 0,
                    trajectory_done: true,
                }),
                encoder: Some(EncoderEstimate { position: *self.position.lock(), velocity: 0.0 }),
                ..Telemetry::default()
            }
        }

        fn wait_for(&self, predicate: &dyn Fn(&Telemetry) -> bool, _timeout: Duration) -> bool {
            let confirmed = predicate(&self.telemetry());
            if confirmed {
                self.fire(Event::Confirmed);
            }
            confirmed
        }

        fn position_reporting(&self) -> bool {
            true
        }
    }

    fn settings() -> PlannerSettings {
        PlannerSettings {
            calibration: Calibration { torque_constant: 1.0, current_limit: 60.0 },
            drive_style: DriveStyle::Torque,
            max_rpm: 600.0,
            velocity_limit: 10.0,
            trap_accel_limit: 10.0,
            state_timeout: Duration::from_secs(1),
        }
    }

    fn rig(position: f64) -> (Arc<ScriptedAxis>, Arc<MotionPlanner>) {
        let axis = Arc::new(ScriptedAxis::new(position));
        let planner = Arc::new(MotionPlanner::new(Arc::clone(&axis) as Arc<dyn Actuator>, settings()));
        (axis, planner)
    }

    fn stop_on_confirm(axis: &ScriptedAxis, planner: &Arc<MotionPlanner>) {
        let planner: Weak<MotionPlanner> = Arc::downgrade(planner);
        axis.set_hook(move |event| {
            if *event == Event::Confirmed {
                if let Some(planner) = planner.upgrade() {
                    planner.stop().unwrap();
                }
            }
        });
    }

    fn setpoints(axis: &ScriptedAxis) -> Vec<Setpoint> {
        axis.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Setpoint(sp) => Some(sp),
                _ => None,
            })
            .collect()
    }

    /// Whether another thread can take the motion lock right now.
    fn motion_lock_free(planner: &Arc<MotionPlanner>) -> bool {
        let (tx, rx) = mpsc::channel();
        let planner = Arc::clone(planner);
        thread::spawn(move || {
            let _ = tx.send(planner.goal());
        });
        rx.recv_timeout(Duration::from_secs(1)).is_ok()
    }

    #[test]
    fn test_target_matches_wire_precision() {
        let (axis, planner) = rig(300_000.0);

        planner.go_for(600.0, 1.015).unwrap();

        let goal = planner.goal();
        let expected = f64::from(300_001.015_f32);
        assert!(goal.active);
        assert_eq!(goal.target_position, expected);
        assert_eq!(setpoints(&axis), vec![Setpoint::Position(expected)]);

        // The actuator settles on the f32 setpoint; that must count as arrival.
        axis.set_position(expected);
        assert!(planner.stop_if_arrived(GOAL_TOLERANCE));
        assert!(!planner.goal().active);
        assert_eq!(axis.state(), AxisState::Idle);
    }

    #[test]
    fn test_stop_while_arming_drops_move() {
        let (axis, planner) = rig(5.0);
        stop_on_confirm(&axis, &planner);

        planner.go_for(60.0, 2.0).unwrap();

        assert!(!planner.goal().active);
        assert_eq!(axis.state(), AxisState::Idle);
        assert!(setpoints(&axis).is_empty());
    }

    #[test]
    fn test_stop_while_arming_drops_power() {
        let (axis, planner) = rig(0.0);
        stop_on_confirm(&axis, &planner);

        planner.set_power(0.5).unwrap();

        assert_eq!(planner.commanded_power(), 0.0);
        assert_eq!(axis.state(), AxisState::Idle);
        assert!(setpoints(&axis).is_empty());
    }

    #[test]
    fn test_arrival_stop_sent_outside_motion_lock() {
        let (axis, planner) = rig(0.0);
        planner.go_for(60.0, 1.0).unwrap();
        axis.set_position(1.0);

        let (tx, rx) = mpsc::channel();
        let weak = Arc::downgrade(&planner);
        axis.set_hook(move |event| {
            if *event == Event::State(AxisState::Idle) {
                if let Some(planner) = weak.upgrade() {
                    tx.send(motion_lock_free(&planner)).unwrap();
                }
            }
        });

        assert!(planner.stop_if_arrived(GOAL_TOLERANCE));
        assert_eq!(rx.try_recv(), Ok(true));
    }
}
