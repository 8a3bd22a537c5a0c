//! Bridge-wide constants.
//!
//! Timing defaults for the background monitors and the state-confirmation
//! path, plus the physical defaults used when no calibration is available.

use std::time::Duration;

/// Canonical service name (used for logging spans).
pub const BRIDGE_SERVICE_NAME: &str = "odrive_bridge";

/// Seconds per minute, for rpm ↔ rev/s conversion.
pub const MINUTE_TO_SECOND: f64 = 60.0;

/// Default polling interval of the Goal Tracker and Fault Monitor.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Ceiling for `wait_for_state` before the axis is forced back to IDLE.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum position error (revolutions) considered "arrived".
///
/// Shared by the Goal Tracker and by `go_to`'s already-arrived check.
pub const GOAL_TOLERANCE: f64 = 0.01;

/// Default bus bitrate in bits per second.
pub const DEFAULT_BAUD_RATE: u32 = 250_000;

/// Default motor torque constant (Nm/A) when no calibration is resolvable.
pub const DEFAULT_TORQUE_CONSTANT: f64 = 1.0;

/// Default soft current limit (A) when no calibration is resolvable.
pub const DEFAULT_CURRENT_SOFT_MAX: f64 = 60.0;

/// Default controller velocity limit (rev/s) for trajectory moves.
pub const DEFAULT_VELOCITY_LIMIT: f64 = 10.0;

/// Default trapezoidal acceleration/deceleration limit (rev/s²).
pub const DEFAULT_TRAP_ACCEL_LIMIT: f64 = 10.0;

/// Default maximum rpm used by the velocity drive style.
pub const DEFAULT_MAX_RPM: f64 = 600.0;

/// How long the bus listener blocks on a single receive before re-checking
/// its stop flag.
pub const BUS_RECV_SLICE: Duration = Duration::from_millis(20);
