// Timeouts, topics, serial and robot configuration
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{OiError, Result};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Velocity commands older than this stop the robot
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Default readings publish rate
pub const READINGS_HZ: f64 = 1.0;

// Zenoh topics
pub const TOPIC_CMD_BASE: &str = "roomba/cmd/base"; // commands
pub const TOPIC_READINGS: &str = "roomba/state/readings"; // decoded sensors
pub const TOPIC_HEALTH: &str = "roomba/state/health"; // health status

// Serial link
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

// Robot geometry defaults
pub const DEFAULT_WIDTH_MM: i32 = 235;
pub const DEFAULT_WHEEL_CIRCUMFERENCE_MM: i32 = 220;

fn require_port(serial_port: &str) -> Result<()> {
    if serial_port.is_empty() {
        return Err(OiError::InvalidConfig("serial_port is required".into()));
    }
    Ok(())
}

/// Motion base configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    pub serial_port: String,
    /// Wheelbase width; 0 selects the default
    #[serde(default)]
    pub width_mm: i32,
    /// 0 selects the default
    #[serde(default)]
    pub wheel_circumference_mm: i32,
}

impl BaseConfig {
    pub fn new(serial_port: impl Into<String>) -> Self {
        Self {
            serial_port: serial_port.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_port(&self.serial_port)?;
        if self.width_mm < 0 {
            return Err(OiError::InvalidConfig(
                "width_mm must be a positive number".into(),
            ));
        }
        if self.wheel_circumference_mm < 0 {
            return Err(OiError::InvalidConfig(
                "wheel_circumference_mm must be a positive number".into(),
            ));
        }
        Ok(())
    }

    pub fn width_or_default(&self) -> i32 {
        if self.width_mm == 0 {
            DEFAULT_WIDTH_MM
        } else {
            self.width_mm
        }
    }

    pub fn wheel_circumference_or_default(&self) -> i32 {
        if self.wheel_circumference_mm == 0 {
            DEFAULT_WHEEL_CIRCUMFERENCE_MM
        } else {
            self.wheel_circumference_mm
        }
    }
}

/// Sensor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub serial_port: String,
}

impl SensorConfig {
    pub fn validate(&self) -> Result<()> {
        require_port(&self.serial_port)
    }
}

fn default_readings_hz() -> f64 {
    READINGS_HZ
}

/// Runtime configuration file (JSON)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub base: BaseConfig,
    /// Defaults to the base's port
    #[serde(default)]
    pub sensor: Option<SensorConfig>,
    #[serde(default = "default_readings_hz")]
    pub readings_hz: f64,
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| OiError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| OiError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.base.validate()?;
        if let Some(sensor) = &self.sensor {
            sensor.validate()?;
        }
        if !(self.readings_hz > 0.0 && self.readings_hz.is_finite()) {
            return Err(OiError::InvalidConfig(
                "readings_hz must be a positive number".into(),
            ));
        }
        Ok(())
    }

    pub fn sensor_config(&self) -> SensorConfig {
        self.sensor.clone().unwrap_or_else(|| SensorConfig {
            serial_port: self.base.serial_port.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied_for_zero() {
        let config = BaseConfig::new("/dev/ttyUSB0");
        assert!(config.validate().is_ok());
        assert_eq!(config.width_or_default(), 235);
        assert_eq!(config.wheel_circumference_or_default(), 220);
    }

    #[test]
    fn test_validation() {
        assert!(BaseConfig::new("").validate().is_err());

        let mut config = BaseConfig::new("/dev/ttyUSB0");
        config.width_mm = -1;
        assert!(config.validate().is_err());

        let mut config = BaseConfig::new("/dev/ttyUSB0");
        config.wheel_circumference_mm = -5;
        assert!(config.validate().is_err());

        assert!(SensorConfig::default().validate().is_err());
    }

    #[test]
    fn test_runtime_config_from_json() {
        let config = RuntimeConfig::from_json(
            r#"{"base": {"serial_port": "/dev/ttyUSB0", "width_mm": 250}}"#,
        )
        .unwrap();
        assert_eq!(config.base.width_or_default(), 250);
        assert_eq!(config.base.wheel_circumference_or_default(), 220);
        assert_eq!(config.readings_hz, READINGS_HZ);
        assert_eq!(config.sensor_config().serial_port, "/dev/ttyUSB0");
    }

    #[test]
    fn test_runtime_config_rejects_bad_values() {
        assert!(RuntimeConfig::from_json(r#"{"base": {"serial_port": ""}}"#).is_err());
        assert!(
            RuntimeConfig::from_json(
                r#"{"base": {"serial_port": "a"}, "readings_hz": 0}"#
            )
            .is_err()
        );
        assert!(RuntimeConfig::from_json("not json").is_err());
    }
}
