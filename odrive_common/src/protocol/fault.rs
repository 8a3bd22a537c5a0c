//! Actuator fault codes.
//!
//! Heartbeat `Axis_Error`, `GetError.Active_Errors` and
//! `GetError.Disarm_Reason` all carry the same bit layout.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Fault bits reported by the actuator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultCode: u32 {
        const INITIALIZING = 0x0000_0001;
        const SYSTEM_LEVEL = 0x0000_0002;
        const TIMING_ERROR = 0x0000_0004;
        const MISSING_ESTIMATE = 0x0000_0008;
        const BAD_CONFIG = 0x0000_0010;
        const DRV_FAULT = 0x0000_0020;
        const MISSING_INPUT = 0x0000_0040;
        const DC_BUS_OVER_VOLTAGE = 0x0000_0100;
        const DC_BUS_UNDER_VOLTAGE = 0x0000_0200;
        const DC_BUS_OVER_CURRENT = 0x0000_0400;
        const DC_BUS_OVER_REGEN_CURRENT = 0x0000_0800;
        const CURRENT_LIMIT_VIOLATION = 0x0000_1000;
        const MOTOR_OVER_TEMP = 0x0000_2000;
        const INVERTER_OVER_TEMP = 0x0000_4000;
        const VELOCITY_LIMIT_VIOLATION = 0x0000_8000;
        const POSITION_LIMIT_VIOLATION = 0x0001_0000;
        const WATCHDOG_TIMER_EXPIRED = 0x0100_0000;
        const ESTOP_REQUESTED = 0x0200_0000;
        const SPINOUT_DETECTED = 0x0400_0000;
        const BRAKE_RESISTOR_DISARMED = 0x0800_0000;
        const THERMISTOR_DISCONNECTED = 0x1000_0000;
        const CALIBRATION_ERROR = 0x4000_0000;
    }
}

impl FaultCode {
    /// Wrap a raw code, keeping bits this table does not name.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self::from_bits_retain(raw)
    }

    /// Symbolic names of all set bits, `|`-separated.
    ///
    /// Unnamed bits are appended as hex so nothing reported is lost.
    pub fn symbolic(&self) -> String {
        if self.is_empty() {
            return "NONE".to_string();
        }
        let mut names: Vec<String> = self.iter_names().map(|(name, _)| name.to_string()).collect();
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            names.push(format!("UNKNOWN(0x{unknown:08X})"));
        }
        names.join("|")
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X} {}", self.bits(), self.symbolic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_is_none() {
        assert_eq!(FaultCode::from_raw(0).symbolic(), "NONE");
    }

    #[test]
    fn names_multiple_bits() {
        let code = FaultCode::from_raw(0x0000_0100 | 0x0200_0000);
        assert_eq!(code.symbolic(), "DC_BUS_OVER_VOLTAGE|ESTOP_REQUESTED");
    }

    #[test]
    fn keeps_unknown_bits() {
        let code = FaultCode::from_raw(0x0000_0080 | 0x1);
        assert_eq!(code.symbolic(), "INITIALIZING|UNKNOWN(0x00000080)");
        assert_eq!(code.bits(), 0x81);
    }
}
