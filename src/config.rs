//! Process configuration.
//!
//! Defaults reproduce a DPM8624 feeding a micro inverter from a 24V battery. Values can be
//! overridden from a TOML file and from `DPM86_` prefixed environment variables, e.g.
//! `DPM86_SERIAL__PORT=/dev/ttyUSB0`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use fugit::MillisDurationU32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    frame::DeviceAddress,
    register::{ConstantMode, DpmRegister},
    scaling::{AMPERES, VOLTS},
    transport::RetryPolicy,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub serial: SerialConfig,
    pub retry: RetryConfig,
    pub supply: SupplyConfig,
    pub control: ControlConfig,
    pub metering: MeteringConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout_ms: u64,
    /// Bus address of the supply, 0 - 99.
    pub address: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u8,
    pub backoff_ms: u32,
}

/// Setpoints and limits of the supply, in volts, amperes and watts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupplyConfig {
    /// Output voltage programmed at startup and kept for the whole run.
    pub initial_voltage: f64,
    pub initial_current: f64,
    /// Ceiling for the current setpoint chosen by the control loop.
    pub current_max: f64,
    /// Floor for the requested power.
    pub min_power: f64,
    pub constant_mode: ConstantMode,
    pub settle_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Samples in the very first tracking window.
    pub initial_window: u32,
    /// Samples in every later tracking window.
    pub window: u32,
    pub sample_interval_ms: u32,
    /// A rise in consumption above this many watts between two samples restarts the window.
    pub spike_threshold: i32,
    /// Deltas smaller than this (in watts, either sign) leave the setpoint alone.
    pub min_delta: i32,
    /// Current changes smaller than this (in amperes) are not written.
    pub min_current_step: f64,
    pub metering_failure: MeteringFailurePolicy,
}

/// What a tracking window does when a consumption sample cannot be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MeteringFailurePolicy {
    /// Give up on the window. The setpoint is left alone for this cycle.
    #[default]
    AbortWindow,
    /// Count the failure as a reading of -1000 W.
    Sentinel,
}

impl MeteringFailurePolicy {
    pub const SENTINEL_WATTS: i32 = -1000;
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Address of the volkszaehler.org middleware.
    pub host: String,
    /// UUID of the power consumption channel.
    pub channel: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Where to write the status snapshot. `None` disables it.
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            serial: SerialConfig::default(),
            retry: RetryConfig::default(),
            supply: SupplyConfig::default(),
            control: ControlConfig::default(),
            metering: MeteringConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB1".to_string(),
            baud_rate: 9600,
            timeout_ms: 500,
            address: 1,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            backoff_ms: policy.backoff.to_millis(),
        }
    }
}

impl Default for SupplyConfig {
    fn default() -> Self {
        Self {
            initial_voltage: 25.5,
            initial_current: 2.55,
            current_max: 6.0,
            min_power: 10.0,
            constant_mode: ConstantMode::Voltage,
            settle_ms: 200,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            initial_window: 3,
            window: 20,
            sample_interval_ms: 200,
            spike_threshold: 900,
            min_delta: 5,
            min_current_step: 0.0,
            metering_failure: MeteringFailurePolicy::default(),
        }
    }
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            channel: String::new(),
            timeout_ms: 5000,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("/tmp/dpm86_current_power.txt")),
        }
    }
}

impl Config {
    /// Defaults, then the TOML file at `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("DPM86_").split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Reject settings the supply or the control loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if DeviceAddress::new(self.serial.address).is_none() {
            return invalid(format!(
                "serial.address {} must be at most {}",
                self.serial.address,
                DeviceAddress::MAX
            ));
        }
        if self.retry.attempts == 0 {
            return invalid("retry.attempts must be at least 1".into());
        }

        let voltage_max = VOLTS.to_physical(DpmRegister::VOLTAGE_MAX_TICKS);
        let current_max = AMPERES.to_physical(DpmRegister::CURRENT_MAX_TICKS);
        let supply = &self.supply;
        if !(supply.initial_voltage > 0.0 && supply.initial_voltage <= voltage_max) {
            return invalid(format!(
                "supply.initial_voltage {} must be within (0, {voltage_max}]",
                supply.initial_voltage
            ));
        }
        if !(0.0..=current_max).contains(&supply.initial_current) {
            return invalid(format!(
                "supply.initial_current {} must be within [0, {current_max}]",
                supply.initial_current
            ));
        }
        if !(0.0..=current_max).contains(&supply.current_max) {
            return invalid(format!(
                "supply.current_max {} must be within [0, {current_max}]",
                supply.current_max
            ));
        }

        if self.control.initial_window == 0 || self.control.window == 0 {
            return invalid("control windows must hold at least one sample".into());
        }
        if self.metering.channel.trim().is_empty() {
            return invalid("metering.channel must name the consumption channel".into());
        }
        Ok(())
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        DeviceAddress::new(self.serial.address)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry.attempts,
            backoff: MillisDurationU32::millis(self.retry.backoff_ms),
        }
    }

    pub fn serial_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.timeout_ms)
    }

    pub fn metering_timeout(&self) -> Duration {
        Duration::from_millis(self.metering.timeout_ms)
    }
}
