//! Link configuration
//!
//! One JSON file carries the serial settings, the device address and the command schema.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::schema::CommandSchema;

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_ADDRESS: u8 = 0x01;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                           Link Config
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfig {
    #[serde(default)]
    pub serial:           SerialConfig,
    #[serde(default = "default_address")]
    pub address:          u8,
    /// Pause between two `poll` passes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub commands:         CommandSchema,
}

impl LinkConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.serial.validate()?;
        if config.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("pollIntervalMs".into(), "0".into()));
        }
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                          Serial Config
// —————————————————————————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialConfig {
    /// Empty: pick the highest numbered port available
    pub port:       String,
    pub baud_rate:  u32,
    pub data_bits:  u8,
    pub parity:     Parity,
    pub stop_bits:  u8,
    pub timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port:       String::new(),
            baud_rate:  DEFAULT_BAUD_RATE,
            data_bits:  8,
            parity:     Parity::None,
            stop_bits:  1,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baudRate".into(), "0".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Invalid("dataBits".into(), self.data_bits.to_string()));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConfigError::Invalid("stopBits".into(), self.stop_bits.to_string()));
        }
        Ok(())
    }
}

fn default_address() -> u8 {
    DEFAULT_ADDRESS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

// —————————————————————————————————————————————————————————————————————————————————————————————————
//                                              Tests
// —————————————————————————————————————————————————————————————————————————————————————————————————
