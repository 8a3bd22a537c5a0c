//! Simulated bus node.
//!
//! Sits on the far end of a bus and behaves like one actuator: applies the
//! commands addressed to it, answers remote requests and emits periodic
//! heartbeat and encoder frames. Every frame it accepts is recorded.

use super::axis::SimulatedAxis;
use crate::actuator::Setpoint;
use crate::bus::CanBus;
use odrive_common::consts::BUS_RECV_SLICE;
use odrive_common::error::{SchemaError, TransportError};
use odrive_common::protocol::{
    decode, encode, AxisState, CanFrame, Command, ControlMode, Decoded, Fields, InputMode,
    NodeAddress,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Simulated DC bus voltage (V).
const SIM_BUS_VOLTAGE: f64 = 24.0;

/// Emission periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimNodeOptions {
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// Encoder estimate period.
    pub encoder_interval: Duration,
}

impl Default for SimNodeOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(100),
            encoder_interval: Duration::from_millis(20),
        }
    }
}

/// A frame the node accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedCommand {
    /// Message kind.
    pub command: Command,
    /// Decoded fields (empty for requests).
    pub fields: Fields,
    /// Remote request rather than a command.
    pub remote: bool,
}

struct NodeShared {
    bus: Arc<dyn CanBus>,
    axis: SimulatedAxis,
    node: AtomicU8,
    received: Mutex<Vec<ReceivedCommand>>,
    running: AtomicBool,
}

/// One simulated actuator answering on a bus.
pub struct SimulatedNode {
    shared: Arc<NodeShared>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedNode {
    /// Start answering as `node` on `bus`.
    pub fn spawn(bus: Arc<dyn CanBus>, node: NodeAddress, axis: SimulatedAxis, options: SimNodeOptions) -> Self {
        let shared = Arc::new(NodeShared {
            bus,
            axis,
            node: AtomicU8::new(node.get()),
            received: Mutex::new(Vec::new()),
            running: AtomicBool::new(true),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || run(&shared, options))
        };

        info!("Simulated actuator answering as {}", node);
        Self { shared, thread: Some(thread) }
    }

    /// The simulated axis.
    pub fn axis(&self) -> &SimulatedAxis {
        &self.shared.axis
    }

    /// Address the node currently answers on.
    pub fn node(&self) -> NodeAddress {
        NodeAddress::from_masked(self.shared.node.load(Ordering::Acquire))
    }

    /// Every frame accepted so far.
    pub fn received(&self) -> Vec<ReceivedCommand> {
        self.shared.received.lock().clone()
    }

    /// Accepted commands, requests excluded.
    pub fn commands(&self) -> Vec<ReceivedCommand> {
        self.shared.received.lock().iter().filter(|r| !r.remote).cloned().collect()
    }

    /// Forget recorded frames.
    pub fn clear_received(&self) {
        self.shared.received.lock().clear();
    }

    /// Stop answering and join the thread.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Simulated node thread panicked");
            }
        }
    }
}

impl Drop for SimulatedNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &NodeShared, options: SimNodeOptions) {
    let mut next_heartbeat = Instant::now();
    let mut next_encoder = Instant::now();

    while shared.running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= next_heartbeat {
            shared.emit(Command::Heartbeat);
            next_heartbeat = now + options.heartbeat_interval;
        }
        if now >= next_encoder {
            shared.emit(Command::GetEncoderEstimates);
            next_encoder = now + options.encoder_interval;
        }

        let wait = next_heartbeat
            .min(next_encoder)
            .saturating_duration_since(Instant::now())
            .min(BUS_RECV_SLICE);
        match shared.bus.recv(wait) {
            Ok(Some(frame)) => shared.handle(&frame),
            Ok(None) => {}
            Err(TransportError::Closed) => break,
            Err(e) => debug!("sim: receive failed: {}", e),
        }
    }
}

impl NodeShared {
    fn node(&self) -> NodeAddress {
        NodeAddress::from_masked(self.node.load(Ordering::Acquire))
    }

    fn handle(&self, frame: &CanFrame) {
        if frame.node() != self.node().get() {
            return;
        }
        let decoded = match decode(frame) {
            Ok(decoded) => decoded,
            Err(SchemaError::UnknownFrame(id)) => {
                trace!("sim: unknown frame 0x{:03X}", id);
                return;
            }
            Err(e) => {
                debug!("sim: undecodable frame: {}", e);
                return;
            }
        };

        self.received.lock().push(ReceivedCommand {
            command: decoded.command,
            fields: decoded.fields.clone(),
            remote: decoded.remote,
        });

        if decoded.remote {
            self.emit(decoded.command);
        } else {
            self.apply(&decoded);
        }
    }

    fn apply(&self, decoded: &Decoded) {
        let axis = &self.axis;
        let f = &decoded.fields;
        let get = |name: &str| f.get(name).unwrap_or_default();

        match decoded.command {
            Command::SetAxisState => {
                axis.request_state(AxisState::from_code(get("Axis_Requested_State") as u8));
                self.emit(Command::Heartbeat);
            }
            Command::SetControllerMode => {
                let control = ControlMode::from_code(get("Control_Mode") as u32);
                let input = InputMode::from_code(get("Input_Mode") as u32);
                if let (Some(control), Some(input)) = (control, input) {
                    axis.set_controller_mode(control, input);
                }
            }
            Command::SetInputPosition => axis.set_input(Setpoint::Position(get("Input_Pos"))),
            Command::SetInputVelocity => axis.set_input(Setpoint::Velocity(get("Input_Vel"))),
            Command::SetInputTorque => axis.set_input(Setpoint::Torque(get("Input_Torque"))),
            Command::SetVelocityLimit => axis.set_limits(get("Velocity_Limit"), get("Current_Limit")),
            Command::SetTrajectoryVelocityLimit => axis.set_trajectory_velocity_limit(get("Traj_Vel_Limit")),
            Command::SetTrajectoryAccelLimits => {
                axis.set_trajectory_accel_limits(get("Traj_Accel_Limit"), get("Traj_Decel_Limit"))
            }
            Command::ClearErrors => {
                axis.clear_errors();
                self.emit(Command::Heartbeat);
            }
            Command::SetNodeAddress => {
                let new = get("Axis_Node_ID") as u8;
                match NodeAddress::new(new) {
                    Some(node) => {
                        info!("sim: node address {} -> {}", self.node(), node);
                        self.node.store(node.get(), Ordering::Release);
                    }
                    None => warn!("sim: rejecting node address {}", new),
                }
            }
            _ => {}
        }
    }

    fn emit(&self, command: Command) {
        let axis = &self.axis;
        let fields = match command {
            Command::Heartbeat => {
                let (axis_error, _, _) = axis.error_codes();
                Fields::new()
                    .with("Axis_Error", f64::from(axis_error))
                    .with("Axis_State", f64::from(axis.state().code()))
                    .with("Procedure_Result", 0.0)
                    .with("Trajectory_Done_Flag", if axis.trajectory_done() { 1.0 } else { 0.0 })
            }
            Command::GetEncoderEstimates => Fields::new()
                .with("Pos_Estimate", axis.position())
                .with("Vel_Estimate", axis.velocity()),
            Command::GetError => {
                let (_, active, disarm) = axis.error_codes();
                Fields::new()
                    .with("Active_Errors", f64::from(active))
                    .with("Disarm_Reason", f64::from(disarm))
            }
            Command::GetIq => {
                let (setpoint, measured) = axis.iq();
                Fields::new().with("Iq_Setpoint", setpoint).with("Iq_Measured", measured)
            }
            Command::GetBusVoltageCurrent => {
                let (iq, _) = axis.iq();
                Fields::new()
                    .with("Bus_Voltage", SIM_BUS_VOLTAGE)
                    .with("Bus_Current", iq.abs() * 0.1)
            }
            _ => return,
        };

        match encode(self.node(), command, &fields) {
            Ok(frame) => {
                if let Err(e) = self.bus.send(&frame) {
                    debug!("sim: {} not sent: {}", command, e);
                }
            }
            Err(e) => debug!("sim: cannot encode {}: {}", command, e),
        }
    }
}
