//! Rig configuration: which ports and channels the hardware sits on, the
//! rates everything runs at, and the serial retry policy.
//!
//! The configuration is a [RigConfig] encoded with [serde] and [ron], so a
//! rig file looks like:
//!
//! ```text
//! (
//!     thermal_port: Some("/dev/ttyACM0"),
//!     sample_rate: 10000,
//!     thermal_rate: 10,
//!     calibration_path: Some("Coeff.txt"),
//! )
//! ```
//!
//! Any field left out takes its default.

use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt, fs, path::Path, path::PathBuf, time::Duration};

/// Errors while reading a rig file.
#[derive(Debug)]
pub enum ConfigError {
    /// The rig file could not be read.
    IoError(std::io::Error),

    /// The rig file is not valid RON for a [RigConfig].
    RonSpannedError(ron::de::SpannedError),

    /// A value that parses but makes no sense.
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            ConfigError::IoError(error) => Cow::from(format!("io error: {}", error)),
            ConfigError::RonSpannedError(error) => Cow::from(format!("ron error: {}", error)),
            ConfigError::Invalid(what) => Cow::from(format!("invalid configuration: {}", what)),
        };

        write!(f, "{}", msg)
    }
}

impl std::error::Error for ConfigError {}

/// How hard to try opening the serial link before giving up on a delivery.
///
/// With `backoff` at 1.0 every attempt waits the same `delay_secs`; larger
/// factors grow the wait geometrically up to `max_delay_secs`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of attempts, including the first
    pub attempts: u32,
    /// Wait after the first failed attempt, in seconds
    pub delay_secs: f64,
    /// Growth factor applied to the wait after every failure
    pub backoff: f64,
    /// Upper bound on a single wait, in seconds
    pub max_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_secs: 1.0,
            backoff: 1.0,
            max_delay_secs: 8.0,
        }
    }
}

impl RetryPolicy {
    /// The wait after failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let secs = self.delay_secs * self.backoff.powi(attempt as i32);
        Duration::from_secs_f64(secs.min(self.max_delay_secs).max(0.0))
    }
}

/// Everything that describes one experiment rig.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RigConfig {
    /// Serial device of the thermal actuator; asked for interactively if unset
    pub thermal_port: Option<String>,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Serial open retry policy
    pub retry: RetryPolicy,
    /// Wait after opening the port for the actuator to reboot, in seconds
    pub settle_secs: f64,
    /// Serial read timeout, which bounds how long the flag goes unchecked
    pub serial_poll_ms: u64,
    /// Vibration sample rate in Hz
    pub sample_rate: u32,
    /// Thermal setpoint update rate in Hz
    pub thermal_rate: u32,
    /// Bottom of the vibration band in Hz
    pub min_freq: u32,
    /// Top of the vibration band in Hz
    pub max_freq: u32,
    /// Spread normalized frequencies logarithmically over the band
    pub log_scale: bool,
    /// Calibration file; a flat table is used if unset
    pub calibration_path: Option<PathBuf>,
    /// The constant the raw calibration values are divided into
    pub calibration_reference: f64,
    /// Extra telemetry logging time after the stimulus, in seconds
    pub telemetry_grace_secs: f64,
    /// Analog output channel driving the vibration actuator
    pub ao_channel: String,
    /// Analog input channels the accelerometer is wired to
    pub ai_channels: String,
    /// Root directory for audit copies and logs
    pub save_dir: PathBuf,
    /// Status events kept for a slow observer before the oldest is dropped
    pub status_capacity: usize,
    /// Idle interval after which the observer gets a keep-alive, in ms
    pub keep_alive_ms: u64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            thermal_port: None,
            baud_rate: 115200,
            retry: RetryPolicy::default(),
            settle_secs: 2.0,
            serial_poll_ms: 100,
            sample_rate: 10000,
            thermal_rate: 10,
            min_freq: 50,
            max_freq: 500,
            log_scale: true,
            calibration_path: None,
            calibration_reference: crate::calibration::DEFAULT_REFERENCE,
            telemetry_grace_secs: 1.0,
            ao_channel: "Dev1/ao0".to_owned(),
            ai_channels: "Dev1/ai0:2".to_owned(),
            save_dir: PathBuf::from("static/save_data"),
            status_capacity: 64,
            keep_alive_ms: 500,
        }
    }
}

impl RigConfig {
    /// Reads a rig file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_ron(&text)
    }

    /// Parses a rig description and checks that it is usable.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text).map_err(ConfigError::RonSpannedError)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no rig could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 || self.thermal_rate == 0 {
            return Err(ConfigError::Invalid("rates must be positive"));
        }
        if self.min_freq == 0 || self.max_freq < self.min_freq {
            return Err(ConfigError::Invalid("frequency band is empty"));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1"));
        }
        if self.serial_poll_ms == 0 {
            return Err(ConfigError::Invalid("serial_poll_ms must be positive"));
        }
        if self.status_capacity == 0 {
            return Err(ConfigError::Invalid("status_capacity must be positive"));
        }
        let waits = [
            (self.settle_secs, "settle_secs"),
            (self.telemetry_grace_secs, "telemetry_grace_secs"),
            (self.retry.delay_secs, "retry.delay_secs"),
            (self.retry.max_delay_secs, "retry.max_delay_secs"),
            (self.retry.backoff, "retry.backoff"),
        ];
        for (value, name) in waits {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(name));
            }
        }
        Ok(())
    }

    /// Settle time after opening the port.
    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs.max(0.0))
    }

    /// Serial read timeout.
    pub fn serial_poll(&self) -> Duration {
        Duration::from_millis(self.serial_poll_ms)
    }

    /// Extra telemetry logging time.
    pub fn telemetry_grace(&self) -> Duration {
        Duration::from_secs_f64(self.telemetry_grace_secs.max(0.0))
    }

    /// Keep-alive interval for the status stream.
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_takes_defaults() {
        let config = RigConfig::from_ron(
            r#"(thermal_port: Some("/dev/ttyUSB1"), thermal_rate: 20, retry: (attempts: 3))"#,
        )
        .unwrap();

        assert_eq!(config.thermal_port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.thermal_rate, 20);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.delay_secs, 1.0);
        assert_eq!(config.sample_rate, 10000);
        assert_eq!(config.max_freq, 500);
    }

    #[test]
    fn round_trips_through_ron() {
        let config = RigConfig::default();
        let text = ron::ser::to_string(&config).unwrap();
        assert_eq!(RigConfig::from_ron(&text).unwrap(), config);
    }

    #[test]
    fn rejects_empty_band() {
        let res = RigConfig::from_ron("(min_freq: 500, max_freq: 50)");
        assert!(matches!(res, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_waits_that_are_not_finite() {
        for text in [
            "(settle_secs: inf)",
            "(telemetry_grace_secs: NaN)",
            "(retry: (delay_secs: inf))",
            "(retry: (max_delay_secs: inf))",
            "(retry: (backoff: -1.0))",
        ] {
            let res = RigConfig::from_ron(text);
            assert!(matches!(res, Err(ConfigError::Invalid(_))), "{}", text);
        }
        assert!(RigConfig::from_ron("(settle_secs: 0.0, retry: (backoff: 2.0))").is_ok());
    }

    #[test]
    fn retry_delay_is_fixed_by_default_and_capped_with_backoff() {
        let fixed = RetryPolicy::default();
        assert_eq!(fixed.delay(0), Duration::from_secs(1));
        assert_eq!(fixed.delay(4), Duration::from_secs(1));

        let growing = RetryPolicy {
            backoff: 2.0,
            ..RetryPolicy::default()
        };
        assert_eq!(growing.delay(0), Duration::from_secs(1));
        assert_eq!(growing.delay(2), Duration::from_secs(4));
        assert_eq!(growing.delay(10), Duration::from_secs(8));
    }
}
