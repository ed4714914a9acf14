//! # Configuration
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. JSON config file (named by `ETIQUETA_CONFIG` or `--config`)
//! 3. Environment variables
//!
//! ```json
//! {
//!   "session": { "command_timeout_ms": 3000, "max_retries": 2, "label_type": "with_gaps" },
//!   "serial": { "baud_rate": 115200 },
//!   "radio": { "mtu": 20, "discovery_timeout_ms": 10000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EtiquetaError;
use crate::protocol::commands::LabelType;

/// Upper bound on retries for idempotent setup commands.
pub const MAX_SETUP_RETRIES: u32 = 2;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ETIQUETA_CONFIG";

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub serial: SerialConfig,
    pub radio: RadioConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, EtiquetaError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(Some(Path::new(&path))),
            Err(_) => Self::load_from(None),
        }
    }

    /// Like [`Config::load`], reading `path` instead of `ETIQUETA_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self, EtiquetaError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file (no env overrides).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EtiquetaError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtiquetaError::InvalidConfiguration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
            .map_err(|e| EtiquetaError::InvalidConfiguration(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> Result<Self, EtiquetaError> {
        serde_json::from_str(content)
            .map_err(|e| EtiquetaError::InvalidConfiguration(format!("invalid config: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<(), EtiquetaError> {
        if let Some(baud) = env_parse::<u32>("ETIQUETA_BAUD_RATE")? {
            self.serial.baud_rate = baud;
        }
        if let Some(mtu) = env_parse::<usize>("ETIQUETA_RADIO_MTU")? {
            self.radio.mtu = mtu;
        }
        if let Some(ms) = env_parse::<u64>("ETIQUETA_COMMAND_TIMEOUT_MS")? {
            self.session.command_timeout_ms = ms;
        }
        if let Some(retries) = env_parse::<u32>("ETIQUETA_MAX_RETRIES")? {
            self.session.max_retries = retries;
        }
        if let Ok(name) = std::env::var("ETIQUETA_LABEL_TYPE") {
            self.session.label_type = LabelType::parse(&name).ok_or_else(|| {
                EtiquetaError::InvalidConfiguration(format!("unknown label type '{}'", name))
            })?;
        }
        Ok(())
    }

    /// Reject values the session cannot work with.
    pub fn validate(&self) -> Result<(), EtiquetaError> {
        self.session.validate()?;
        self.serial.validate()?;
        self.radio.validate()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, EtiquetaError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
            EtiquetaError::InvalidConfiguration(format!("{}: cannot parse '{}'", name, raw))
        }),
        Err(_) => Ok(None),
    }
}

fn invalid(msg: &str) -> EtiquetaError {
    EtiquetaError::InvalidConfiguration(msg.to_string())
}

// ============================================================================
// SESSION
// ============================================================================

/// Deadlines and retry policy for a print session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Ack deadline for setup commands and rows
    pub command_timeout_ms: u64,
    /// Ack deadline for EndPagePrint/EndPrint (cut and feed are slow)
    pub end_timeout_ms: u64,
    /// Retries for idempotent setup commands (0..=2)
    pub max_retries: u32,
    /// Status polls after EndPrint before giving up
    pub status_poll_attempts: u32,
    /// First delay between status polls, doubled each poll
    pub status_poll_initial_ms: u64,
    /// Longest delay between status polls
    pub status_poll_max_ms: u64,
    /// Media loaded in the printer
    pub label_type: LabelType,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 3_000,
            end_timeout_ms: 10_000,
            max_retries: MAX_SETUP_RETRIES,
            status_poll_attempts: 20,
            status_poll_initial_ms: 100,
            status_poll_max_ms: 1_000,
            label_type: LabelType::WithGaps,
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn end_timeout(&self) -> Duration {
        Duration::from_millis(self.end_timeout_ms)
    }

    /// Delay before status poll number `attempt` (0-based).
    pub fn poll_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let ms = self
            .status_poll_initial_ms
            .saturating_mul(factor)
            .min(self.status_poll_max_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<(), EtiquetaError> {
        if self.max_retries > MAX_SETUP_RETRIES {
            return Err(EtiquetaError::InvalidConfiguration(format!(
                "max_retries {} exceeds {}",
                self.max_retries, MAX_SETUP_RETRIES
            )));
        }
        if self.command_timeout_ms == 0 || self.end_timeout_ms == 0 {
            return Err(invalid("timeouts must be non-zero"));
        }
        if self.status_poll_attempts == 0 {
            return Err(invalid("status_poll_attempts must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// TRANSPORTS
// ============================================================================

/// Baud rates the serial transport can configure.
pub const SUPPORTED_BAUD_RATES: [u32; 8] =
    [9_600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800, 921_600];

/// Byte-stream (serial / RFCOMM tty) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud_rate: 115_200 }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<(), EtiquetaError> {
        if SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            Ok(())
        } else {
            Err(EtiquetaError::InvalidConfiguration(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )))
        }
    }
}

/// Radio (BLE) settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Largest write the link accepts (ATT MTU minus 3 on a default link)
    pub mtu: usize,
    /// How long discovery may run before giving up
    pub discovery_timeout_ms: u64,
    /// Pause between chunk writes
    pub chunk_delay_ms: u64,
    /// GATT service carrying the printer channel
    pub service_uuid: String,
    /// Characteristic used for both writes and notifications
    pub characteristic_uuid: String,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            mtu: 20,
            discovery_timeout_ms: 10_000,
            chunk_delay_ms: 0,
            service_uuid: "e7810a71-73ae-499d-8c15-faa9aef0c3f2".to_string(),
            characteristic_uuid: "bef8d6c9-9c21-4c9e-b632-bd58c1009f9f".to_string(),
        }
    }
}

impl RadioConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn validate(&self) -> Result<(), EtiquetaError> {
        if self.mtu == 0 {
            return Err(invalid("radio mtu must be non-zero"));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(invalid("discovery_timeout_ms must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
