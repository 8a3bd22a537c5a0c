//! Actuator enumerations carried on the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis state as reported in the heartbeat and requested via `SetAxisState`.
///
/// Owned by the actuator; the bridge only requests and observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisState {
    /// State not yet known.
    Undefined,
    /// Motor disarmed.
    Idle,
    /// Startup sequence running.
    StartupSequence,
    /// Motor + encoder calibration.
    FullCalibrationSequence,
    /// Motor calibration only.
    MotorCalibration,
    /// Encoder index search.
    EncoderIndexSearch,
    /// Encoder offset calibration.
    EncoderOffsetCalibration,
    /// Armed and following setpoints.
    ClosedLoopControl,
    /// Open-loop spin.
    LockinSpin,
    /// Encoder direction find.
    EncoderDirFind,
    /// Homing sequence.
    Homing,
    /// Hall polarity calibration.
    EncoderHallPolarityCalibration,
    /// Hall phase calibration.
    EncoderHallPhaseCalibration,
    /// Value this bridge does not know.
    Unknown(u8),
}

impl AxisState {
    /// Wire value.
    pub const fn code(self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Idle => 1,
            Self::StartupSequence => 2,
            Self::FullCalibrationSequence => 3,
            Self::MotorCalibration => 4,
            Self::EncoderIndexSearch => 6,
            Self::EncoderOffsetCalibration => 7,
            Self::ClosedLoopControl => 8,
            Self::LockinSpin => 9,
            Self::EncoderDirFind => 10,
            Self::Homing => 11,
            Self::EncoderHallPolarityCalibration => 12,
            Self::EncoderHallPhaseCalibration => 13,
            Self::Unknown(code) => code,
        }
    }

    /// Decode a wire value.
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Undefined,
            1 => Self::Idle,
            2 => Self::StartupSequence,
            3 => Self::FullCalibrationSequence,
            4 => Self::MotorCalibration,
            6 => Self::EncoderIndexSearch,
            7 => Self::EncoderOffsetCalibration,
            8 => Self::ClosedLoopControl,
            9 => Self::LockinSpin,
            10 => Self::EncoderDirFind,
            11 => Self::Homing,
            12 => Self::EncoderHallPolarityCalibration,
            13 => Self::EncoderHallPhaseCalibration,
            other => Self::Unknown(other),
        }
    }

    /// Whether the motor is energised in this state.
    pub const fn is_powered(self) -> bool {
        !matches!(self, Self::Undefined | Self::Idle)
    }
}

impl fmt::Display for AxisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("UNDEFINED"),
            Self::Idle => f.write_str("IDLE"),
            Self::ClosedLoopControl => f.write_str("CLOSED_LOOP_CONTROL"),
            Self::Unknown(code) => write!(f, "UNKNOWN({code})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Controller loop selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ControlMode {
    /// Voltage control.
    Voltage = 0,
    /// Torque control.
    Torque = 1,
    /// Velocity control.
    Velocity = 2,
    /// Position control.
    Position = 3,
}

impl ControlMode {
    /// Decode a wire value.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Voltage),
            1 => Some(Self::Torque),
            2 => Some(Self::Velocity),
            3 => Some(Self::Position),
            _ => None,
        }
    }
}

/// Input shaping applied to setpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InputMode {
    /// Inputs ignored.
    Inactive = 0,
    /// Setpoints applied unchanged.
    Passthrough = 1,
    /// Velocity ramp.
    VelRamp = 2,
    /// Second-order position filter.
    PosFilter = 3,
    /// Mixed channels.
    MixChannels = 4,
    /// Trapezoidal trajectory planner.
    TrapTraj = 5,
    /// Torque ramp.
    TorqueRamp = 6,
    /// Mirror another axis.
    Mirror = 7,
    /// Tuning mode.
    Tuning = 8,
}

impl InputMode {
    /// Decode a wire value.
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Inactive),
            1 => Some(Self::Passthrough),
            2 => Some(Self::VelRamp),
            3 => Some(Self::PosFilter),
            4 => Some(Self::MixChannels),
            5 => Some(Self::TrapTraj),
            6 => Some(Self::TorqueRamp),
            7 => Some(Self::Mirror),
            8 => Some(Self::Tuning),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_state_codes_round_trip() {
        for code in 0..=14u8 {
            assert_eq!(AxisState::from_code(code).code(), code);
        }
        assert_eq!(AxisState::from_code(5), AxisState::Unknown(5));
    }

    #[test]
    fn powered_states() {
        assert!(!AxisState::Idle.is_powered());
        assert!(!AxisState::Undefined.is_powered());
        assert!(AxisState::ClosedLoopControl.is_powered());
    }

    #[test]
    fn mode_codes() {
        assert_eq!(ControlMode::from_code(3), Some(ControlMode::Position));
        assert_eq!(InputMode::from_code(5), Some(InputMode::TrapTraj));
        assert_eq!(InputMode::from_code(42), None);
        assert_eq!(ControlMode::Velocity as u8, 2);
    }
}
