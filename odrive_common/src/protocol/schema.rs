//! Fixed message schema and codec.
//!
//! Maps each command to its numeric id, payload length and signal layout
//! (byte offset, wire type, physical scale). Encoding and decoding are pure
//! functions over [`MESSAGES`]; there is no shared mutable state.

use super::frame::{CanFrame, NodeAddress, COMMAND_MASK, MAX_PAYLOAD};
use crate::error::SchemaError;
use std::collections::BTreeMap;
use std::fmt;

/// Commands and telemetry messages understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    /// Periodic state + error report.
    Heartbeat,
    /// Emergency stop.
    Estop,
    /// Active errors and disarm reason.
    GetError,
    /// Reassign the node address.
    SetNodeAddress,
    /// Request an axis state.
    SetAxisState,
    /// Position / velocity estimates.
    GetEncoderEstimates,
    /// Control mode + input mode.
    SetControllerMode,
    /// Absolute position setpoint.
    SetInputPosition,
    /// Velocity setpoint.
    SetInputVelocity,
    /// Torque setpoint.
    SetInputTorque,
    /// Controller velocity limit and current limit.
    SetVelocityLimit,
    /// Trajectory planner velocity limit.
    SetTrajectoryVelocityLimit,
    /// Trajectory planner acceleration / deceleration limits.
    SetTrajectoryAccelLimits,
    /// Iq setpoint and measurement.
    GetIq,
    /// DC bus voltage and current.
    GetBusVoltageCurrent,
    /// Clear active errors.
    ClearErrors,
}

impl Command {
    /// Schema entry for this command.
    pub fn definition(self) -> &'static MessageDef {
        // Every variant has exactly one entry in MESSAGES.
        MESSAGES
            .iter()
            .find(|def| def.command == self)
            .unwrap_or(&MESSAGES[0])
    }

    /// Numeric command id (low 5 identifier bits).
    #[inline]
    pub fn id(self) -> u8 {
        self.definition().id
    }

    /// Look up the command carried by a command id.
    pub fn from_id(id: u8) -> Option<Self> {
        MESSAGES.iter().find(|def| def.id == id).map(|def| def.command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.definition().name)
    }
}

/// Wire representation of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    /// Unsigned byte.
    U8,
    /// Little-endian u32.
    U32,
    /// Little-endian i16.
    I16,
    /// Little-endian IEEE-754 single.
    F32,
}

impl WireType {
    const fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::U32 | Self::F32 => 4,
        }
    }
}

/// One field inside a message payload.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    /// Field name.
    pub name: &'static str,
    /// Byte offset in the payload.
    pub offset: usize,
    /// Wire type.
    pub wire: WireType,
    /// `physical = raw * scale`.
    pub scale: f64,
}

const fn signal(name: &'static str, offset: usize, wire: WireType) -> Signal {
    Signal { name, offset, wire, scale: 1.0 }
}

const fn scaled(name: &'static str, offset: usize, wire: WireType, scale: f64) -> Signal {
    Signal { name, offset, wire, scale }
}

/// Schema entry for one message.
#[derive(Debug)]
pub struct MessageDef {
    /// Command this entry describes.
    pub command: Command,
    /// Symbolic message name.
    pub name: &'static str,
    /// Command id.
    pub id: u8,
    /// Payload length in bytes.
    pub dlc: usize,
    /// Signal layout.
    pub signals: &'static [Signal],
}

impl MessageDef {
    /// Find a signal by name.
    pub fn signal(&self, name: &str) -> Option<&'static Signal> {
        self.signals.iter().find(|s| s.name == name)
    }
}

use WireType::{F32, I16, U32, U8};

/// The schema table.
pub static MESSAGES: [MessageDef; 16] = [
    MessageDef {
        command: Command::Heartbeat,
        name: "Heartbeat",
        id: 0x01,
        dlc: 8,
        signals: &[
            signal("Axis_Error", 0, U32),
            signal("Axis_State", 4, U8),
            signal("Procedure_Result", 5, U8),
            signal("Trajectory_Done_Flag", 6, U8),
        ],
    },
    MessageDef { command: Command::Estop, name: "Estop", id: 0x02, dlc: 0, signals: &[] },
    MessageDef {
        command: Command::GetError,
        name: "Get_Error",
        id: 0x03,
        dlc: 8,
        signals: &[signal("Active_Errors", 0, U32), signal("Disarm_Reason", 4, U32)],
    },
    MessageDef {
        command: Command::SetNodeAddress,
        name: "Set_Axis_Node_ID",
        id: 0x06,
        dlc: 8,
        signals: &[signal("Axis_Node_ID", 0, U32)],
    },
    MessageDef {
        command: Command::SetAxisState,
        name: "Set_Axis_State",
        id: 0x07,
        dlc: 8,
        signals: &[signal("Axis_Requested_State", 0, U32)],
    },
    MessageDef {
        command: Command::GetEncoderEstimates,
        name: "Get_Encoder_Estimates",
        id: 0x09,
        dlc: 8,
        signals: &[signal("Pos_Estimate", 0, F32), signal("Vel_Estimate", 4, F32)],
    },
    MessageDef {
        command: Command::SetControllerMode,
        name: "Set_Controller_Mode",
        id: 0x0B,
        dlc: 8,
        signals: &[signal("Control_Mode", 0, U32), signal("Input_Mode", 4, U32)],
    },
    MessageDef {
        command: Command::SetInputPosition,
        name: "Set_Input_Pos",
        id: 0x0C,
        dlc: 8,
        signals: &[
            signal("Input_Pos", 0, F32),
            scaled("Vel_FF", 4, I16, 0.001),
            scaled("Torque_FF", 6, I16, 0.001),
        ],
    },
    MessageDef {
        command: Command::SetInputVelocity,
        name: "Set_Input_Vel",
        id: 0x0D,
        dlc: 8,
        signals: &[signal("Input_Vel", 0, F32), signal("Input_Torque_FF", 4, F32)],
    },
    MessageDef {
        command: Command::SetInputTorque,
        name: "Set_Input_Torque",
        id: 0x0E,
        dlc: 8,
        signals: &[signal("Input_Torque", 0, F32)],
    },
    MessageDef {
        command: Command::SetVelocityLimit,
        name: "Set_Limits",
        id: 0x0F,
        dlc: 8,
        signals: &[signal("Velocity_Limit", 0, F32), signal("Current_Limit", 4, F32)],
    },
    MessageDef {
        command: Command::SetTrajectoryVelocityLimit,
        name: "Set_Traj_Vel_Limit",
        id: 0x11,
        dlc: 8,
        signals: &[signal("Traj_Vel_Limit", 0, F32)],
    },
    MessageDef {
        command: Command::SetTrajectoryAccelLimits,
        name: "Set_Traj_Accel_Limits",
        id: 0x12,
        dlc: 8,
        signals: &[signal("Traj_Accel_Limit", 0, F32), signal("Traj_Decel_Limit", 4, F32)],
    },
    MessageDef {
        command: Command::GetIq,
        name: "Get_Iq",
        id: 0x14,
        dlc: 8,
        signals: &[signal("Iq_Setpoint", 0, F32), signal("Iq_Measured", 4, F32)],
    },
    MessageDef {
        command: Command::GetBusVoltageCurrent,
        name: "Get_Bus_Voltage_Current",
        id: 0x17,
        dlc: 8,
        signals: &[signal("Bus_Voltage", 0, F32), signal("Bus_Current", 4, F32)],
    },
    MessageDef { command: Command::ClearErrors, name: "Clear_Errors", id: 0x18, dlc: 0, signals: &[] },
];

/// Named physical field values of one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(BTreeMap<&'static str, f64>);

impl Fields {
    /// Empty field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.0.insert(name, value);
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: &'static str, value: f64) {
        self.0.insert(name, value);
    }

    /// Field value, if present.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Field value, or `SchemaError::MissingField`.
    pub fn require(&self, command: Command, name: &'static str) -> Result<f64, SchemaError> {
        self.get(name).ok_or(SchemaError::MissingField { command, field: name })
    }

    /// Iterate `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fields are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Node the frame was addressed to / sent from.
    pub node: u8,
    /// Message kind.
    pub command: Command,
    /// Physical field values (empty for remote requests).
    pub fields: Fields,
    /// Whether the frame was a remote transmission request.
    pub remote: bool,
}

/// Encode `command` for `node`.
///
/// Every signal of the message must be present and representable; extra
/// field names are rejected.
pub fn encode(node: NodeAddress, command: Command, fields: &Fields) -> Result<CanFrame, SchemaError> {
    let def = command.definition();

    if let Some((name, _)) = fields.iter().find(|(name, _)| def.signal(name).is_none()) {
        return Err(SchemaError::UnknownField { command, field: name.to_string() });
    }

    let mut payload = [0u8; MAX_PAYLOAD];
    for sig in def.signals {
        let value = fields.require(command, sig.name)?;
        write_signal(command, sig, value, &mut payload)?;
    }

    CanFrame::new(node.arbitration_id(def.id), &payload[..def.dlc])
        .ok_or(SchemaError::PayloadLength { command, len: def.dlc })
}

/// Remote request frame asking `node` to transmit `command`.
pub fn encode_request(node: NodeAddress, command: Command) -> CanFrame {
    CanFrame::remote(node.arbitration_id(command.id()))
}

/// Decode a frame received from the bus.
///
/// Frames whose command id is not in the table yield
/// `SchemaError::UnknownFrame`; callers filter by id before decoding.
pub fn decode(frame: &CanFrame) -> Result<Decoded, SchemaError> {
    let id = frame.id();
    let command = Command::from_id((id & COMMAND_MASK) as u8).ok_or(SchemaError::UnknownFrame(id))?;
    let def = command.definition();

    let mut fields = Fields::new();
    if !frame.is_remote() {
        let data = frame.data();
        if data.len() < def.dlc {
            return Err(SchemaError::PayloadLength { command, len: data.len() });
        }
        for sig in def.signals {
            fields.insert(sig.name, read_signal(sig, data));
        }
    }

    Ok(Decoded { node: frame.node(), command, fields, remote: frame.is_remote() })
}

fn write_signal(command: Command, sig: &Signal, value: f64, out: &mut [u8; MAX_PAYLOAD]) -> Result<(), SchemaError> {
    let out_of_range = || SchemaError::OutOfRange { command, field: sig.name, value };
    if !value.is_finite() {
        return Err(out_of_range());
    }
    let raw = value / sig.scale;
    let slot = &mut out[sig.offset..sig.offset + sig.wire.width()];

    match sig.wire {
        WireType::U8 => {
            if raw.fract() != 0.0 || raw < 0.0 || raw > u8::MAX as f64 {
                return Err(out_of_range());
            }
            slot[0] = raw as u8;
        }
        WireType::U32 => {
            if raw.fract() != 0.0 || raw < 0.0 || raw > u32::MAX as f64 {
                return Err(out_of_range());
            }
            slot.copy_from_slice(&(raw as u32).to_le_bytes());
        }
        WireType::I16 => {
            let rounded = raw.round();
            if rounded < i16::MIN as f64 || rounded > i16::MAX as f64 {
                return Err(out_of_range());
            }
            slot.copy_from_slice(&(rounded as i16).to_le_bytes());
        }
        WireType::F32 => {
            if raw.abs() > f32::MAX as f64 {
                return Err(out_of_range());
            }
            slot.copy_from_slice(&(raw as f32).to_le_bytes());
        }
    }
    Ok(())
}

fn read_signal(sig: &Signal, data: &[u8]) -> f64 {
    let bytes = &data[sig.offset..sig.offset + sig.wire.width()];
    let raw = match sig.wire {
        WireType::U8 => bytes[0] as f64,
        WireType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        WireType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        WireType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    };
    raw * sig.scale
}
