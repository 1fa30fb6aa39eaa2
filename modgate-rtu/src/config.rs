//! Configuration for the Modbus RTU gateway.

use modgate_common::LoggingConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] modgate_common::Error),
    #[error("Invalid cron expression '{expr}': {message}")]
    Schedule { expr: String, message: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// UDP endpoints and the default poll schedule
    pub gateway: GatewaySettings,

    /// Serial buses and their registers
    pub networks: Vec<NetworkConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// UDP side of the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Host that receives value reports
    #[serde(default = "default_host")]
    pub host: String,

    /// Port that receives value reports
    pub port: u16,

    /// Local UDP port for inbound commands
    pub local_port: u16,

    /// Cron expression (with seconds) for the default poll tick
    #[serde(default = "default_poll")]
    pub default_poll: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_poll() -> String {
    "0/10 * * * * *".to_string()
}

impl GatewaySettings {
    /// Parse the default poll expression.
    pub fn schedule(&self) -> Result<cron::Schedule, ConfigError> {
        cron::Schedule::from_str(&self.default_poll).map_err(|e| ConfigError::Schedule {
            expr: self.default_poll.clone(),
            message: e.to_string(),
        })
    }
}

/// Configuration for a single serial bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name (unique)
    pub name: String,

    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub serial_port: String,

    /// Line settings
    #[serde(default)]
    pub options: SerialOptions,

    /// Unit id used when a register has no `slave_id`
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts after a failed request
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Delay between attempts to reopen the serial port
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,

    /// Registers on this bus, in polling order
    #[serde(default)]
    pub registers: Vec<Arc<RegisterConfig>>,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    600
}

fn default_retries() -> u32 {
    1
}

fn default_reconnect_secs() -> u64 {
    5
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialOptions {
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
        }
    }
}

/// A register or a contiguous group of identically-typed registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// Symbolic ids, one per value in the group
    #[serde(rename = "id", deserialize_with = "one_or_many")]
    pub ids: Vec<String>,

    /// Base address (0-based)
    pub address: u16,

    /// Register kind
    #[serde(rename = "type")]
    pub kind: RegisterKind,

    /// Registers per value (default: 1)
    #[serde(default)]
    pub length: Option<u16>,

    /// Post-decode converter ("tenths", "float32")
    #[serde(default)]
    pub converter: Option<String>,

    /// Unit id override
    #[serde(default)]
    pub slave_id: Option<u8>,

    /// Explicit polling interval; such registers skip the default tick
    #[serde(default)]
    pub polling: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

impl RegisterConfig {
    /// Registers per value.
    pub fn length(&self) -> u16 {
        self.length.unwrap_or(1)
    }

    /// Number of registers (or bits) read for the whole group.
    pub fn read_count(&self) -> u16 {
        let total = u32::from(self.length()) * self.ids.len() as u32;
        u16::try_from(total).unwrap_or(u16::MAX)
    }
}

/// Modbus register kinds.
///
/// Unknown kinds are kept as-is and rejected when the register is polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RegisterKind {
    /// Discrete output coils (read/write, 1-bit)
    Coil,
    /// Discrete input contacts (read-only, 1-bit)
    Discrete,
    /// Input registers (read-only, 16-bit)
    Input,
    /// Holding registers (read/write, 16-bit)
    Holding,
    /// Anything else found in the configuration
    Other(String),
}

impl RegisterKind {
    /// Return the string name for this register kind.
    pub fn as_str(&self) -> &str {
        match self {
            RegisterKind::Coil => "coil",
            RegisterKind::Discrete => "discrete",
            RegisterKind::Input => "input",
            RegisterKind::Holding => "holding",
            RegisterKind::Other(kind) => kind,
        }
    }

    /// Whether values of this kind are single bits.
    pub fn is_bit(&self) -> bool {
        matches!(self, RegisterKind::Coil | RegisterKind::Discrete)
    }
}

impl From<String> for RegisterKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "coil" => RegisterKind::Coil,
            "discrete" => RegisterKind::Discrete,
            "input" => RegisterKind::Input,
            "holding" => RegisterKind::Holding,
            _ => RegisterKind::Other(kind),
        }
    }
}

impl From<RegisterKind> for String {
    fn from(kind: RegisterKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: GatewayConfig = modgate_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.port == 0 || self.gateway.local_port == 0 {
            return Err(ConfigError::Validation(
                "gateway port and local_port must be non-zero".to_string(),
            ));
        }

        self.gateway.schedule()?;

        if self.networks.is_empty() {
            return Err(ConfigError::Validation(
                "At least one network must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();

        for network in &self.networks {
            if network.name.is_empty() {
                return Err(ConfigError::Validation(
                    "Network name cannot be empty".to_string(),
                ));
            }

            if !names.insert(network.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate network name '{}'",
                    network.name
                )));
            }

            network.options.validate(&network.name)?;

            for register in &network.registers {
                if register.ids.is_empty() || register.ids.iter().any(|id| id.is_empty()) {
                    return Err(ConfigError::Validation(format!(
                        "Network '{}': register at address {} needs at least one non-empty id",
                        network.name, register.address
                    )));
                }

                if register.length == Some(0) {
                    return Err(ConfigError::Validation(format!(
                        "Network '{}': register '{}' has zero length",
                        network.name, register.ids[0]
                    )));
                }

                let span = u32::from(register.length()) * register.ids.len() as u32;
                if u32::from(register.address) + span > 0x1_0000 {
                    return Err(ConfigError::Validation(format!(
                        "Network '{}': register '{}' runs past the end of the address space",
                        network.name, register.ids[0]
                    )));
                }

                for id in &register.ids {
                    if !ids.insert(id.as_str()) {
                        tracing::warn!(
                            network = %network.name,
                            id = %id,
                            "Duplicate register id, only the first occurrence is addressable"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

impl SerialOptions {
    fn validate(&self, network: &str) -> Result<(), ConfigError> {
        match self.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Network '{}': invalid parity '{}' (use none, even, or odd)",
                    network, self.parity
                )));
            }
        }

        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Validation(format!(
                "Network '{}': data_bits must be 5-8",
                network
            )));
        }

        if !(1..=2).contains(&self.stop_bits) {
            return Err(ConfigError::Validation(format!(
                "Network '{}': stop_bits must be 1 or 2",
                network
            )));
        }

        Ok(())
    }
}
