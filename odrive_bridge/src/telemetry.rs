//! Telemetry cache.
//!
//! Inbound frames are folded into one [`Telemetry`] snapshot per axis.
//! Reads never block; [`TelemetryCache::wait_for`] is the only blocking
//! path and always has a deadline.

use odrive_common::protocol::{AxisState, Command, Decoded, FaultCode};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Last `Heartbeat` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Heartbeat {
    /// `Axis_Error` bits.
    pub axis_error: u32,
    /// Reported axis state.
    pub axis_state: AxisState,
    /// Result of the last procedure (calibration etc.).
    pub procedure_result: u8,
    /// Trapezoidal trajectory finished.
    pub trajectory_done: bool,
}

/// Last `Get_Encoder_Estimates` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderEstimate {
    /// Raw position in revolutions (no zero offset applied).
    pub position: f64,
    /// Velocity in rev/s.
    pub velocity: f64,
}

/// Last `Get_Error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    /// Currently active error bits.
    pub active_errors: u32,
    /// Reason for the last disarm.
    pub disarm_reason: u32,
}

/// Last `Get_Iq` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentReport {
    /// Commanded Iq (A).
    pub setpoint: f64,
    /// Measured Iq (A).
    pub measured: f64,
}

/// Last `Get_Bus_Voltage_Current` frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusPower {
    /// DC bus voltage (V).
    pub voltage: f64,
    /// DC bus current (A).
    pub current: f64,
}

/// Everything known about one axis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    /// Latest heartbeat.
    pub heartbeat: Option<Heartbeat>,
    /// Latest encoder estimate.
    pub encoder: Option<EncoderEstimate>,
    /// Latest polled error words; cleared with the errors.
    pub errors: Option<ErrorReport>,
    /// Latest Iq report.
    pub current: Option<CurrentReport>,
    /// Latest bus voltage and current.
    pub bus_power: Option<BusPower>,
    /// When any field last changed.
    pub updated_at: Option<Instant>,
}

impl Telemetry {
    /// Fold a decoded frame in. Returns `false` for frames that carry no
    /// telemetry (commands from other bus participants, requests).
    pub fn apply(&mut self, decoded: &Decoded) -> bool {
        if decoded.remote {
            return false;
        }
        let f = &decoded.fields;
        let get = |name: &str| f.get(name).unwrap_or_default();

        match decoded.command {
            Command::Heartbeat => {
                self.heartbeat = Some(Heartbeat {
                    axis_error: get("Axis_Error") as u32,
                    axis_state: AxisState::from_code(get("Axis_State") as u8),
                    procedure_result: get("Procedure_Result") as u8,
                    trajectory_done: get("Trajectory_Done_Flag") != 0.0,
                });
            }
            Command::GetEncoderEstimates => {
                self.encoder = Some(EncoderEstimate {
                    position: get("Pos_Estimate"),
                    velocity: get("Vel_Estimate"),
                });
            }
            Command::GetError => {
                self.errors = Some(ErrorReport {
                    active_errors: get("Active_Errors") as u32,
                    disarm_reason: get("Disarm_Reason") as u32,
                });
            }
            Command::GetIq => {
                self.current = Some(CurrentReport {
                    setpoint: get("Iq_Setpoint"),
                    measured: get("Iq_Measured"),
                });
            }
            Command::GetBusVoltageCurrent => {
                self.bus_power = Some(BusPower {
                    voltage: get("Bus_Voltage"),
                    current: get("Bus_Current"),
                });
            }
            _ => return false,
        }

        self.updated_at = Some(Instant::now());
        true
    }

    /// Last reported axis state.
    pub fn axis_state(&self) -> Option<AxisState> {
        self.heartbeat.map(|hb| hb.axis_state)
    }

    /// Last raw position estimate.
    pub fn raw_position(&self) -> Option<f64> {
        self.encoder.map(|enc| enc.position)
    }

    /// Union of heartbeat error, active errors and disarm reason.
    pub fn fault(&self) -> FaultCode {
        let mut raw = self.heartbeat.map_or(0, |hb| hb.axis_error);
        if let Some(report) = self.errors {
            raw |= report.active_errors | report.disarm_reason;
        }
        FaultCode::from_raw(raw)
    }

    /// Drop error state after a clear request; the next report re-raises
    /// anything that persisted.
    pub fn invalidate_errors(&mut self) {
        self.errors = None;
        if let Some(hb) = self.heartbeat.as_mut() {
            hb.axis_error = 0;
        }
    }
}

/// Shared per-axis telemetry with change notification.
#[derive(Debug, Default)]
pub struct TelemetryCache {
    state: Mutex<Telemetry>,
    changed: Condvar,
}

impl TelemetryCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current telemetry.
    pub fn snapshot(&self) -> Telemetry {
        self.state.lock().clone()
    }

    /// Fold a decoded frame in and wake waiters.
    pub fn apply(&self, decoded: &Decoded) {
        if self.state.lock().apply(decoded) {
            self.changed.notify_all();
        }
    }

    /// Mutate in place and wake waiters.
    pub fn update(&self, f: impl FnOnce(&mut Telemetry)) {
        f(&mut *self.state.lock());
        self.changed.notify_all();
    }

    /// See [`Telemetry::invalidate_errors`].
    pub fn invalidate_errors(&self) {
        self.state.lock().invalidate_errors();
    }

    /// Block until `predicate` holds or `timeout` elapses.
    ///
    /// Returns whether the predicate held.
    pub fn wait_for(&self, predicate: impl Fn(&Telemetry) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.state.lock();
        while !predicate(&*guard) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut guard, deadline).timed_out() {
                        return predicate(&*guard);
                    }
                }
                None => self.changed.wait(&mut guard),
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odrive_common::protocol::Fields;
    use std::sync::Arc;
    use std::thread;

    fn decoded(command: Command, fields: Fields) -> Decoded {
        Decoded { node: 3, command, fields, remote: false }
    }

    fn heartbeat(error: u32, state: AxisState) -> Decoded {
        decoded(
            Command::Heartbeat,
            Fields::new()
                .with("Axis_Error", f64::from(error))
                .with("Axis_State", f64::from(state.code()))
                .with("Procedure_Result", 0.0)
                .with("Trajectory_Done_Flag", 0.0),
        )
    }

    #[test]
    fn test_apply_telemetry() {
        let mut t = Telemetry::default();
        assert!(t.apply(&heartbeat(0, AxisState::Idle)));
        assert!(t.apply(&decoded(
            Command::GetEncoderEstimates,
            Fields::new().with("Pos_Estimate", 10.0).with("Vel_Estimate", 0.5),
        )));
        assert_eq!(t.axis_state(), Some(AxisState::Idle));
        assert_eq!(t.raw_position(), Some(10.0));
        assert!(t.fault().is_empty());
    }

    #[test]
    fn test_commands_are_not_telemetry() {
        let mut t = Telemetry::default();
        let cmd = decoded(Command::SetInputTorque, Fields::new().with("Input_Torque", 1.0));
        assert!(!t.apply(&cmd));
        assert!(t.updated_at.is_none());
    }

    #[test]
    fn test_fault_union_and_invalidate() {
        let mut t = Telemetry::default();
        t.apply(&heartbeat(0x1, AxisState::Idle));
        t.apply(&decoded(
            Command::GetError,
            Fields::new().with("Active_Errors", 0.0).with("Disarm_Reason", 0x1000 as f64),
        ));
        assert_eq!(t.fault().bits(), 0x1001);

        t.invalidate_errors();
        assert!(t.fault().is_empty());
        assert_eq!(t.axis_state(), Some(AxisState::Idle));
    }

    #[test]
    fn test_wait_for_wakes_on_update() {
        let cache = Arc::new(TelemetryCache::new());
        let writer = Arc::clone(&cache);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.apply(&heartbeat(0, AxisState::ClosedLoopControl));
        });

        assert!(cache.wait_for(
            |t| t.axis_state() == Some(AxisState::ClosedLoopControl),
            Duration::from_secs(2)
        ));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_for_times_out() {
        let cache = TelemetryCache::new();
        assert!(!cache.wait_for(|t| t.heartbeat.is_some(), Duration::from_millis(30)));
    }
}
