//! Motor Facade.
//!
//! The only component the host framework calls into. Construction validates
//! configuration, builds the actuator variant selected by `connection_type`
//! and starts the background monitors; dropping the motor stops them.

use crate::actuator::{best_effort, Actuator, AxisHandle, CanAxis, DirectAxis};
use crate::bus::BusHandle;
use crate::monitor::{FaultMonitor, GoalTracker, Monitors};
use crate::planner::{MotionGoal, MotionPlanner, PlannerSettings};
use crate::state_machine::AxisPhase;
use odrive_common::config::{ConfigError, ConnectionType, MotorConfig, ResolvedConfig};
use odrive_common::error::BridgeResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// How the actuator is reached.
pub enum Transport {
    /// Shared node-addressed bus.
    Bus(BusHandle),
    /// Direct property handle.
    Direct(Box<dyn AxisHandle>),
}

/// What this motor can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Absolute encoder telemetry is independently observable.
    pub position_reporting: bool,
}

/// Snapshot for status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotorStatus {
    /// Actuator name used in logs.
    pub name: String,
    /// Coarse state from the latest heartbeat.
    pub phase: AxisPhase,
    /// Reported position (rev), offset applied.
    pub position: Option<f64>,
    /// Raw encoder position (rev).
    pub raw_position: Option<f64>,
    /// Zero offset (rev).
    pub offset: f64,
    /// Current goal.
    pub goal: MotionGoal,
    /// Whether the axis is armed.
    pub powered: bool,
    /// Normalized power, see [`OdriveMotor::is_powered`].
    pub power: f64,
    /// Whether the axis is outside IDLE / UNDEFINED.
    pub moving: bool,
    /// Symbolic fault names, `NONE` when clear.
    pub fault: String,
    /// DC bus voltage (V), when reported.
    pub bus_voltage: Option<f64>,
}

/// Motor bridge over one actuator.
pub struct OdriveMotor {
    config: Mutex<ResolvedConfig>,
    planner: Arc<MotionPlanner>,
    goal_tracker: GoalTracker,
    fault_monitor: FaultMonitor,
    monitors: Mutex<Option<Monitors>>,
}

impl OdriveMotor {
    /// Validate `config` and connect through `transport`.
    ///
    /// # Errors
    /// `BridgeError::Configuration` for an invalid config or a transport that
    /// does not match `connection_type`.
    pub fn new(config: &MotorConfig, transport: Transport) -> BridgeResult<Self> {
        let resolved = config.resolve()?;

        let actuator: Arc<dyn Actuator> = match (resolved.connection_type, transport) {
            (ConnectionType::Canbus, Transport::Bus(bus)) => {
                info!(
                    "Connecting to {} on '{}' ({} bit/s)",
                    resolved.bus.node,
                    bus.name(),
                    resolved.bus.baud_rate
                );
                Arc::new(CanAxis::new(bus, resolved.bus.node))
            }
            (ConnectionType::Direct, Transport::Direct(handle)) => {
                info!("Connecting to direct actuator handle");
                Arc::new(DirectAxis::new("direct", handle))
            }
            (expected, _) => {
                return Err(ConfigError::ValidationError(format!(
                    "connection_type {expected:?} does not match the supplied transport"
                ))
                .into());
            }
        };

        Ok(Self::with_actuator(resolved, actuator))
    }

    /// Build over an already constructed actuator.
    pub fn with_actuator(config: ResolvedConfig, actuator: Arc<dyn Actuator>) -> Self {
        let planner = Arc::new(MotionPlanner::new(actuator, PlannerSettings::from(&config)));
        let monitors = Monitors::spawn(&planner, config.monitor_interval);

        Self {
            goal_tracker: GoalTracker::new(Arc::clone(&planner)),
            fault_monitor: FaultMonitor::new(Arc::clone(&planner)),
            planner,
            config: Mutex::new(config),
            monitors: Mutex::new(Some(monitors)),
        }
    }

    /// Drive with normalized power in `[-1, 1]`.
    pub fn set_power(&self, power: f64) -> BridgeResult<()> {
        self.planner.set_power(power)
    }

    /// Move `revolutions` turns in the direction of `rpm`; spin when zero.
    pub fn go_for(&self, rpm: f64, revolutions: f64) -> BridgeResult<()> {
        self.planner.go_for(rpm, revolutions)
    }

    /// Move to an absolute reported position.
    pub fn go_to(&self, rpm: f64, position: f64) -> BridgeResult<()> {
        self.planner.go_to(rpm, position)
    }

    /// Request IDLE and drop any goal.
    pub fn stop(&self) -> BridgeResult<()> {
        self.planner.stop()
    }

    /// Make the current position read as zero.
    pub fn reset_zero_position(&self) -> BridgeResult<()> {
        self.planner.reset_zero_position()
    }

    /// Reported position (rev) from the latest telemetry.
    pub fn get_position(&self) -> BridgeResult<f64> {
        self.planner.position()
    }

    /// Whether the axis is armed, and its normalized power.
    pub fn is_powered(&self) -> (bool, f64) {
        let actuator = self.planner.actuator();
        if let Err(e) = best_effort("telemetry request", actuator.refresh()) {
            warn!("{}: telemetry request failed: {}", actuator.name(), e);
        }

        let telemetry = actuator.telemetry();
        let powered = telemetry.axis_state().is_some_and(|state| state.is_powered());
        if !powered {
            return (false, 0.0);
        }

        let current_limit = self.planner.settings().calibration.current_limit;
        let power = telemetry
            .current
            .map_or_else(|| self.planner.commanded_power(), |iq| iq.setpoint / current_limit);
        (true, power)
    }

    /// Whether the axis is in any state other than IDLE / UNDEFINED.
    pub fn is_moving(&self) -> bool {
        self.planner
            .states()
            .current_state()
            .is_some_and(|state| state.is_powered())
    }

    /// What this motor can report.
    pub fn get_capabilities(&self) -> Capabilities {
        Capabilities { position_reporting: self.planner.actuator().position_reporting() }
    }

    /// Apply a new configuration.
    ///
    /// A bitrate change re-initialises the bus; a node change sends the
    /// reassignment before the new address is used. On error, the stored
    /// config keeps whatever bus changes were already applied.
    pub fn reconfigure(&self, config: &MotorConfig) -> BridgeResult<()> {
        let new = config.resolve()?;
        let mut current = self.config.lock();
        if new.connection_type != current.connection_type {
            return Err(ConfigError::ValidationError(
                "connection_type cannot change on reconfigure".to_string(),
            )
            .into());
        }

        // Each bus change is recorded as soon as it is applied, so a failure
        // part way leaves the stored config matching the bus.
        let actuator = self.planner.actuator();
        if new.connection_type == ConnectionType::Canbus {
            if new.bus.baud_rate != current.bus.baud_rate {
                actuator.set_bitrate(new.bus.baud_rate)?;
                current.bus.baud_rate = new.bus.baud_rate;
            }
            if new.bus.node != current.bus.node {
                actuator.set_node_address(new.bus.node)?;
                current.bus.node = new.bus.node;
            }
        }

        self.planner.update_settings(PlannerSettings::from(&new));

        if new.monitor_interval != current.monitor_interval {
            let mut monitors = self.monitors.lock();
            if let Some(old) = monitors.take() {
                old.shutdown();
                *monitors = Some(Monitors::spawn(&self.planner, new.monitor_interval));
            }
        }

        info!("{}: reconfigured", actuator.name());
        *current = new;
        Ok(())
    }

    /// Status snapshot.
    pub fn status(&self) -> MotorStatus {
        let actuator = self.planner.actuator();
        let telemetry = actuator.telemetry();
        let (powered, power) = self.is_powered();
        MotorStatus {
            name: actuator.name(),
            phase: self.planner.states().phase(),
            position: self.planner.position().ok(),
            raw_position: telemetry.raw_position(),
            offset: self.planner.offset(),
            goal: self.planner.goal(),
            powered,
            power,
            moving: self.is_moving(),
            fault: telemetry.fault().symbolic(),
            bus_voltage: telemetry.bus_power.map(|p| p.voltage),
        }
    }

    /// Current validated configuration.
    pub fn config(&self) -> ResolvedConfig {
        self.config.lock().clone()
    }

    /// The planner shared with the monitors.
    pub fn planner(&self) -> &Arc<MotionPlanner> {
        &self.planner
    }

    /// Goal Tracker; `tick()` can be driven directly.
    pub fn goal_tracker(&self) -> &GoalTracker {
        &self.goal_tracker
    }

    /// Fault Monitor; `tick()` can be driven directly.
    pub fn fault_monitor(&self) -> &FaultMonitor {
        &self.fault_monitor
    }

    /// Stop the monitors and, if a goal was in flight, the axis.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        let Some(monitors) = self.monitors.lock().take() else {
            return;
        };
        monitors.shutdown();

        if self.planner.goal().active {
            if let Err(e) = self.planner.stop() {
                warn!("Final stop failed: {}", e);
            }
        }
        info!("{}: shut down", self.planner.actuator().name());
    }
}

impl Drop for OdriveMotor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
