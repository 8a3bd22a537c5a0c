//! Configuration loading, validation and calibration resolution.
//!
//! The host framework hands the bridge a flat set of named fields
//! ([`MotorConfig::from_attributes`]); the binary reads the same fields from
//! a TOML file through [`ConfigLoader`]. Either way the raw config is turned
//! into a [`ResolvedConfig`] by [`MotorConfig::resolve`], which is where
//! every validation rule lives.
//!
//! # TOML Example
//!
//! ```toml
//! canbus_node_id = 3
//! canbus_baud_rate = "250k"
//! odrive_config_file = "odrive_backup.json"
//! drive_style = "torque"
//! log_level = "debug"
//! ```

use crate::consts::{
    DEFAULT_BAUD_RATE, DEFAULT_CURRENT_SOFT_MAX, DEFAULT_MAX_RPM, DEFAULT_MONITOR_INTERVAL,
    DEFAULT_STATE_TIMEOUT, DEFAULT_TORQUE_CONSTANT, DEFAULT_TRAP_ACCEL_LIMIT,
    DEFAULT_VELOCITY_LIMIT,
};
use crate::protocol::frame::{NodeAddress, MAX_NODE_ADDRESS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML / JSON parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A required field is absent.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Development detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Potential problems.
    Warn,
    /// Serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// How a normalized power command is turned into a setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriveStyle {
    /// `power * current_soft_max * torque_constant` Nm.
    #[default]
    Torque,
    /// `power * max_rpm / 60` rev/s.
    Velocity,
}

/// Which actuator transport the bridge drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Frames on a shared, node-addressed bus.
    #[default]
    Canbus,
    /// A property-style direct handle (USB / serial).
    Direct,
}

fn default_max_rpm() -> f64 {
    DEFAULT_MAX_RPM
}

fn default_monitor_interval_ms() -> u64 {
    DEFAULT_MONITOR_INTERVAL.as_millis() as u64
}

fn default_state_timeout_ms() -> u64 {
    DEFAULT_STATE_TIMEOUT.as_millis() as u64
}

fn default_velocity_limit() -> f64 {
    DEFAULT_VELOCITY_LIMIT
}

fn default_trap_accel_limit() -> f64 {
    DEFAULT_TRAP_ACCEL_LIMIT
}

/// Raw motor configuration as supplied by the host framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MotorConfig {
    /// Bus node address (required, non-negative integer).
    #[serde(default)]
    pub canbus_node_id: Option<f64>,

    /// Bus bitrate, e.g. `"250k"`, `"1M"` or `"500000"`.
    #[serde(default)]
    pub canbus_baud_rate: Option<String>,

    /// Actuator configuration backup (JSON) used for calibration lookup.
    #[serde(default)]
    pub odrive_config_file: Option<PathBuf>,

    /// Torque constant override (Nm/A).
    #[serde(default)]
    pub torque_constant: Option<f64>,

    /// Soft current limit override (A).
    #[serde(default)]
    pub current_soft_max: Option<f64>,

    /// Maximum rpm for the velocity drive style.
    #[serde(default = "default_max_rpm")]
    pub max_rpm: f64,

    /// Power mapping.
    #[serde(default)]
    pub drive_style: DriveStyle,

    /// Transport variant.
    #[serde(default)]
    pub connection_type: ConnectionType,

    /// Goal Tracker / Fault Monitor polling interval.
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Ceiling for state confirmation.
    #[serde(default = "default_state_timeout_ms")]
    pub state_timeout_ms: u64,

    /// Controller velocity limit (rev/s) sent before trajectory moves.
    #[serde(default = "default_velocity_limit")]
    pub velocity_limit: f64,

    /// Trajectory acceleration / deceleration limit (rev/s²).
    #[serde(default = "default_trap_accel_limit")]
    pub trap_accel_limit: f64,

    /// Logging verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            canbus_node_id: None,
            canbus_baud_rate: None,
            odrive_config_file: None,
            torque_constant: None,
            current_soft_max: None,
            max_rpm: DEFAULT_MAX_RPM,
            drive_style: DriveStyle::default(),
            connection_type: ConnectionType::default(),
            monitor_interval_ms: default_monitor_interval_ms(),
            state_timeout_ms: default_state_timeout_ms(),
            velocity_limit: DEFAULT_VELOCITY_LIMIT,
            trap_accel_limit: DEFAULT_TRAP_ACCEL_LIMIT,
            log_level: LogLevel::default(),
        }
    }
}

/// Conversion constants for power commands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Nm per A.
    pub torque_constant: f64,
    /// Soft current limit in A.
    pub current_limit: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            torque_constant: DEFAULT_TORQUE_CONSTANT,
            current_limit: DEFAULT_CURRENT_SOFT_MAX,
        }
    }
}

/// Bus parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// Bitrate in bits per second.
    pub baud_rate: u32,
    /// Node address of this actuator.
    pub node: NodeAddress,
}

/// Validated configuration the bridge runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// Bus parameters.
    pub bus: BusConfig,
    /// Power conversion constants.
    pub calibration: Calibration,
    /// Maximum rpm for the velocity drive style.
    pub max_rpm: f64,
    /// Power mapping.
    pub drive_style: DriveStyle,
    /// Transport variant.
    pub connection_type: ConnectionType,
    /// Monitor polling interval.
    pub monitor_interval: Duration,
    /// State confirmation ceiling.
    pub state_timeout: Duration,
    /// Controller velocity limit (rev/s).
    pub velocity_limit: f64,
    /// Trajectory acceleration limit (rev/s²).
    pub trap_accel_limit: f64,
}

impl MotorConfig {
    /// Build from host-framework named fields (a JSON object).
    pub fn from_attributes(attributes: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(attributes).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Node address, validated.
    pub fn node_address(&self) -> Result<NodeAddress, ConfigError> {
        let raw = self.canbus_node_id.ok_or(ConfigError::MissingField("canbus_node_id"))?;
        if !raw.is_finite() || raw.fract() != 0.0 || raw < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "canbus_node_id must be a non-negative integer, got {raw}"
            )));
        }
        if raw > MAX_NODE_ADDRESS as f64 {
            return Err(ConfigError::ValidationError(format!(
                "canbus_node_id {raw} does not fit an 11-bit identifier (max {MAX_NODE_ADDRESS})"
            )));
        }
        NodeAddress::new(raw as u8).ok_or(ConfigError::MissingField("canbus_node_id"))
    }

    /// Calibration file path, treating an empty string as absent.
    pub fn calibration_file(&self) -> Option<&Path> {
        self.odrive_config_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Validate without keeping the resolved values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Validate and resolve every derived value.
    ///
    /// # Validation Rules
    /// 1. `canbus_node_id` present, integral, `0..=63`
    /// 2. bitrate parses (explicit string, else calibration file, else default)
    /// 3. calibration file, when configured, is readable JSON
    /// 4. calibration values, rpm and limits are positive and finite
    /// 5. monitor interval and state timeout are non-zero
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let node = self.node_address()?;

        let file = match self.calibration_file() {
            Some(path) => Some(CalibrationFile::load(path)?),
            None => None,
        };

        let baud_rate = match self.canbus_baud_rate.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(text) => normalize_baud_rate(text)?,
            None => file
                .as_ref()
                .and_then(CalibrationFile::baud_rate)
                .unwrap_or(DEFAULT_BAUD_RATE),
        };

        let calibration = Calibration {
            torque_constant: self
                .torque_constant
                .or_else(|| file.as_ref().and_then(CalibrationFile::torque_constant))
                .unwrap_or(DEFAULT_TORQUE_CONSTANT),
            current_limit: self
                .current_soft_max
                .or_else(|| file.as_ref().and_then(CalibrationFile::current_soft_max))
                .unwrap_or(DEFAULT_CURRENT_SOFT_MAX),
        };

        require_positive("torque_constant", calibration.torque_constant)?;
        require_positive("current_soft_max", calibration.current_limit)?;
        require_positive("max_rpm", self.max_rpm)?;
        require_positive("velocity_limit", self.velocity_limit)?;
        require_positive("trap_accel_limit", self.trap_accel_limit)?;

        if self.monitor_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "monitor_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.state_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "state_timeout_ms must be greater than 0".to_string(),
            ));
        }

        debug!(
            "Resolved config: {}, {} bit/s, calibration {:?}",
            node, baud_rate, calibration
        );

        Ok(ResolvedConfig {
            bus: BusConfig { baud_rate, node },
            calibration,
            max_rpm: self.max_rpm,
            drive_style: self.drive_style,
            connection_type: self.connection_type,
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            state_timeout: Duration::from_millis(self.state_timeout_ms),
            velocity_limit: self.velocity_limit,
            trap_accel_limit: self.trap_accel_limit,
        })
    }
}

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!("{name} must be positive, got {value}")))
    }
}

/// Normalize a bitrate string: `"250k"` → 250000, `"1M"` → 1000000.
pub fn normalize_baud_rate(text: &str) -> Result<u32, ConfigError> {
    let text = text.trim();
    let invalid = || ConfigError::ValidationError(format!("invalid bitrate {text:?}"));

    let (digits, multiplier) = match text.chars().last() {
        Some('k' | 'K') => (&text[..text.len() - 1], 1_000u64),
        Some('m' | 'M') => (&text[..text.len() - 1], 1_000_000u64),
        Some(_) => (text, 1u64),
        None => return Err(invalid()),
    };

    let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let rate = value.checked_mul(multiplier).ok_or_else(invalid)?;
    if rate == 0 || rate > u32::MAX as u64 {
        return Err(invalid());
    }
    Ok(rate as u32)
}

/// An actuator configuration backup, read for calibration values only.
#[derive(Debug, Clone)]
pub struct CalibrationFile {
    root: serde_json::Value,
}

impl CalibrationFile {
    /// Read and parse the JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(format!("{}: {e}", path.display()))
            }
        })?;
        Self::from_json(&content)
    }

    /// Parse JSON text.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let root = serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Ok(Self { root })
    }

    /// Numeric value at a nested key path.
    pub fn lookup(&self, path: &[&str]) -> Option<f64> {
        path.iter()
            .try_fold(&self.root, |node, key| node.get(*key))
            .and_then(serde_json::Value::as_f64)
    }

    /// `axis0.config.motor.torque_constant`
    pub fn torque_constant(&self) -> Option<f64> {
        self.lookup(&["axis0", "config", "motor", "torque_constant"])
    }

    /// `axis0.config.motor.current_soft_max`
    pub fn current_soft_max(&self) -> Option<f64> {
        self.lookup(&["axis0", "config", "motor", "current_soft_max"])
    }

    /// `can.config.baud_rate`; zero counts as unset.
    pub fn baud_rate(&self) -> Option<u32> {
        self.lookup(&["can", "config", "baud_rate"])
            .filter(|rate| *rate > 0.0 && *rate <= u32::MAX as f64)
            .map(|rate| rate as u32)
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for every `DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_node(node: f64) -> MotorConfig {
        MotorConfig {
            canbus_node_id: Some(node),
            ..MotorConfig::default()
        }
    }

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_baud_rate_normalization() {
        assert_eq!(normalize_baud_rate("250k").unwrap(), 250_000);
        assert_eq!(normalize_baud_rate("500K").unwrap(), 500_000);
        assert_eq!(normalize_baud_rate("1M").unwrap(), 1_000_000);
        assert_eq!(normalize_baud_rate(" 125000 ").unwrap(), 125_000);
        assert!(normalize_baud_rate("").is_err());
        assert!(normalize_baud_rate("fast").is_err());
        assert!(normalize_baud_rate("0k").is_err());
    }

    #[test]
    fn test_missing_node_id() {
        let err = MotorConfig::default().resolve().unwrap_err();
        assert_eq!(err, ConfigError::MissingField("canbus_node_id"));
    }

    #[test]
    fn test_node_id_bounds() {
        assert!(matches!(with_node(-1.0).resolve(), Err(ConfigError::ValidationError(_))));
        assert!(matches!(with_node(1.5).resolve(), Err(ConfigError::ValidationError(_))));
        assert!(matches!(with_node(64.0).resolve(), Err(ConfigError::ValidationError(_))));
        assert_eq!(with_node(63.0).resolve().unwrap().bus.node.get(), 63);
    }

    #[test]
    fn test_defaults_resolve() {
        let resolved = with_node(3.0).resolve().unwrap();
        assert_eq!(resolved.bus.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(resolved.calibration, Calibration::default());
        assert_eq!(resolved.state_timeout, DEFAULT_STATE_TIMEOUT);
        assert_eq!(resolved.monitor_interval, DEFAULT_MONITOR_INTERVAL);
        assert_eq!(resolved.drive_style, DriveStyle::Torque);
        assert_eq!(resolved.connection_type, ConnectionType::Canbus);
    }

    #[test]
    fn test_from_attributes() {
        let config = MotorConfig::from_attributes(serde_json::json!({
            "canbus_node_id": 3.0,
            "canbus_baud_rate": "500k",
            "odrive_config_file": "",
            "drive_style": "velocity",
            "serial_number": "ignored by this bridge",
        }))
        .unwrap();
        assert!(config.calibration_file().is_none());
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.bus.baud_rate, 500_000);
        assert_eq!(resolved.drive_style, DriveStyle::Velocity);
    }

    #[test]
    fn test_calibration_lookup() {
        let file = CalibrationFile::from_json(
            r#"{"axis0": {"config": {"motor": {"torque_constant": 0.083, "current_soft_max": 40}}},
                "can": {"config": {"baud_rate": 0}}}"#,
        )
        .unwrap();
        assert_eq!(file.torque_constant(), Some(0.083));
        assert_eq!(file.current_soft_max(), Some(40.0));
        assert_eq!(file.baud_rate(), None);
        assert_eq!(file.lookup(&["axis0", "nope"]), None);
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = with_node(1.0);
        config.monitor_interval_ms = 0;
        assert!(config.resolve().is_err());

        let mut config = with_node(1.0);
        config.state_timeout_ms = 0;
        assert!(config.resolve().is_err());
    }
}
