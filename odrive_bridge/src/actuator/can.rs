//! Bus-addressed axis.

use super::{Actuator, Setpoint};
use crate::bus::{BusHandle, Subscription};
use crate::telemetry::{Telemetry, TelemetryCache};
use odrive_common::error::BridgeResult;
use odrive_common::protocol::{
    encode, encode_request, AxisState, Command, ControlMode, Fields, InputMode, NodeAddress,
};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One axis reached through `(node << 5) | command` frames.
pub struct CanAxis {
    bus: BusHandle,
    node: Arc<AtomicU8>,
    cache: Arc<TelemetryCache>,
    _subscription: Subscription,
}

impl CanAxis {
    /// Subscribe to `node`'s telemetry on `bus`.
    pub fn new(bus: BusHandle, node: NodeAddress) -> Self {
        let node = Arc::new(AtomicU8::new(node.get()));
        let cache = Arc::new(TelemetryCache::new());
        let subscription = bus.subscribe(Arc::clone(&node), Arc::clone(&cache));
        Self { bus, node, cache, _subscription: subscription }
    }

    /// Current node address.
    pub fn node(&self) -> NodeAddress {
        NodeAddress::from_masked(self.node.load(Ordering::Acquire))
    }

    fn send(&self, command: Command, fields: Fields) -> BridgeResult<()> {
        let frame = encode(self.node(), command, &fields)?;
        debug!("{} <- {} {:?}", self.node(), command, fields);
        self.bus.send(&frame)?;
        Ok(())
    }

    fn request(&self, command: Command) -> BridgeResult<()> {
        self.bus.send(&encode_request(self.node(), command))?;
        Ok(())
    }
}

impl Actuator for CanAxis {
    fn name(&self) -> String {
        self.node().to_string()
    }

    fn request_state(&self, state: AxisState) -> BridgeResult<()> {
        self.send(
            Command::SetAxisState,
            Fields::new().with("Axis_Requested_State", f64::from(state.code())),
        )
    }

    fn set_controller_mode(&self, control: ControlMode, input: InputMode) -> BridgeResult<()> {
        self.send(
            Command::SetControllerMode,
            Fields::new()
                .with("Control_Mode", f64::from(control as u8))
                .with("Input_Mode", f64::from(input as u8)),
        )
    }

    fn set_limits(&self, velocity_limit: f64, current_limit: f64) -> BridgeResult<()> {
        self.send(
            Command::SetVelocityLimit,
            Fields::new()
                .with("Velocity_Limit", velocity_limit)
                .with("Current_Limit", current_limit),
        )
    }

    fn set_trajectory_velocity_limit(&self, limit: f64) -> BridgeResult<()> {
        self.send(Command::SetTrajectoryVelocityLimit, Fields::new().with("Traj_Vel_Limit", limit))
    }

    fn set_trajectory_accel_limits(&self, accel: f64, decel: f64) -> BridgeResult<()> {
        self.send(
            Command::SetTrajectoryAccelLimits,
            Fields::new()
                .with("Traj_Accel_Limit", accel)
                .with("Traj_Decel_Limit", decel),
        )
    }

    fn set_setpoint(&self, setpoint: Setpoint) -> BridgeResult<()> {
        match setpoint {
            Setpoint::Position(pos) => self.send(
                Command::SetInputPosition,
                Fields::new()
                    .with("Input_Pos", pos)
                    .with("Vel_FF", 0.0)
                    .with("Torque_FF", 0.0),
            ),
            Setpoint::Velocity(vel) => self.send(
                Command::SetInputVelocity,
                Fields::new().with("Input_Vel", vel).with("Input_Torque_FF", 0.0),
            ),
            Setpoint::Torque(torque) => {
                self.send(Command::SetInputTorque, Fields::new().with("Input_Torque", torque))
            }
        }
    }

    fn clear_errors(&self) -> BridgeResult<()> {
        self.send(Command::ClearErrors, Fields::new())?;
        self.cache.invalidate_errors();
        Ok(())
    }

    fn refresh(&self) -> BridgeResult<()> {
        self.request(Command::GetEncoderEstimates)?;
        self.request(Command::GetError)?;
        self.request(Command::GetIq)
    }

    fn telemetry(&self) -> Telemetry {
        self.cache.snapshot()
    }

    fn wait_for(&self, predicate: &dyn Fn(&Telemetry) -> bool, timeout: Duration) -> bool {
        self.cache.wait_for(predicate, timeout)
    }

    fn position_reporting(&self) -> bool {
        true
    }

    fn set_bitrate(&self, bitrate: u32) -> BridgeResult<()> {
        self.bus.set_bitrate(bitrate)?;
        // The first frame after a bus reset may be dropped.
        if let Err(e) = self.send(Command::ClearErrors, Fields::new()) {
            debug!("Primer frame after bus reset not sent: {}", e);
        }
        Ok(())
    }

    fn set_node_address(&self, node: NodeAddress) -> BridgeResult<()> {
        let old = self.node();
        self.send(Command::SetNodeAddress, Fields::new().with("Axis_Node_ID", f64::from(node.get())))?;
        self.node.store(node.get(), Ordering::Release);
        self.cache.update(|t| *t = Telemetry::default());
        info!("Axis reassigned from {} to {}", old, node);
        Ok(())
    }
}
