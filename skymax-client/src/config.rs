//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via SKYMAX_CONFIG or --config)
//! 3. Environment variables

use crate::exchange::FramingOptions;
use serde::{Deserialize, Serialize};
use skymax_core::QueryKind;
use skymax_protocol::MAX_FRAME_SIZE;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device configuration.
    pub device: DeviceConfig,
    /// Reply framing configuration.
    pub protocol: ProtocolConfig,
    /// Poll loop configuration.
    pub poll: PollConfig,
    /// Report rendering configuration.
    pub report: ReportConfig,
}

impl Config {
    /// Loads configuration from `path` if given, then applies environment overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.device.apply_env_overrides();
        self.protocol.apply_env_overrides();
        self.poll.apply_env_overrides();
        self.report.apply_env_overrides();
    }

    /// Framing options derived from the protocol and device sections.
    pub fn framing_options(&self) -> FramingOptions {
        self.protocol.framing_options(self.device.transport)
    }
}

/// How the device is attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// USB HID raw character device; line discipline is fixed by the kernel.
    #[default]
    Hidraw,
    /// RS232 serial cable; line settings are applied on open.
    Serial,
}

/// Device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Character device path.
    pub path: PathBuf,
    /// Transport type.
    pub transport: TransportKind,
    /// Serial baud rate (ignored for HID raw).
    pub baud_rate: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/hidraw0"),
            transport: TransportKind::Hidraw,
            baud_rate: 2400,
        }
    }
}

impl DeviceConfig {
    pub fn new(path: impl Into<PathBuf>, transport: TransportKind) -> Self {
        Self {
            path: path.into(),
            transport,
            ..Self::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SKYMAX_DEVICE") {
            self.path = PathBuf::from(path);
        }

        if let Ok(transport) = std::env::var("SKYMAX_TRANSPORT") {
            match transport.to_lowercase().as_str() {
                "serial" | "rs232" => self.transport = TransportKind::Serial,
                "hidraw" | "usb" => self.transport = TransportKind::Hidraw,
                other => tracing::warn!("Ignoring unknown SKYMAX_TRANSPORT '{}'", other),
            }
        }

        if let Ok(baud) = std::env::var("SKYMAX_BAUD_RATE") {
            if let Ok(n) = baud.parse() {
                self.baud_rate = n;
            }
        }
    }
}

/// How reply boundaries are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Scan for the first CR.
    #[default]
    Terminator,
    /// Read the known reply length of each query kind.
    FixedLength,
}

/// Reply framing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Reply boundary detection.
    pub framing: Framing,
    /// Read deadline per query in milliseconds. Defaults to 2000 for serial
    /// and 8000 for HID raw.
    pub read_timeout_ms: Option<u64>,
    /// Reply buffer capacity in bytes.
    pub reply_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Terminator,
            read_timeout_ms: None,
            reply_capacity: MAX_FRAME_SIZE,
        }
    }
}

impl ProtocolConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(framing) = std::env::var("SKYMAX_FRAMING") {
            match framing.to_lowercase().as_str() {
                "terminator" => self.framing = Framing::Terminator,
                "fixed_length" | "fixed" => self.framing = Framing::FixedLength,
                other => tracing::warn!("Ignoring unknown SKYMAX_FRAMING '{}'", other),
            }
        }

        if let Ok(timeout) = std::env::var("SKYMAX_READ_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.read_timeout_ms = Some(ms);
            }
        }
    }

    /// Returns the read deadline for the given transport.
    pub fn read_timeout(&self, transport: TransportKind) -> Duration {
        let default_ms = match transport {
            TransportKind::Serial => 2_000,
            TransportKind::Hidraw => 8_000,
        };
        Duration::from_millis(self.read_timeout_ms.unwrap_or(default_ms))
    }

    /// Framing options for `transport`.
    ///
    /// Capacity is clamped to `1..=MAX_FRAME_SIZE`. With fixed-length
    /// framing it is raised to the longest known reply so every polled
    /// reply fits.
    pub fn framing_options(&self, transport: TransportKind) -> FramingOptions {
        let mut capacity = self.reply_capacity.clamp(1, MAX_FRAME_SIZE);
        if self.framing == Framing::FixedLength {
            let longest = QueryKind::ALL
                .iter()
                .map(QueryKind::expected_reply_len)
                .max()
                .unwrap_or(MAX_FRAME_SIZE);
            if capacity < longest {
                tracing::warn!(
                    reply_capacity = self.reply_capacity,
                    longest,
                    "reply_capacity is below the longest fixed-length reply, raising it"
                );
                capacity = longest;
            }
        }
        FramingOptions {
            framing: self.framing,
            read_timeout: self.read_timeout(transport),
            capacity,
        }
    }
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Queries issued every cycle, in order.
    pub queries: Vec<QueryKind>,
    /// Pause between cycles in seconds.
    pub interval_secs: u64,
    /// Pause after the device could not be opened, in seconds.
    pub open_backoff_secs: u64,
    /// Skip a query while its previous result has not been consumed.
    pub gate_on_consumer: bool,
    /// Stop after every query has succeeded once.
    pub run_once: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            queries: QueryKind::ALL.to_vec(),
            interval_secs: 5,
            open_backoff_secs: 5,
            gate_on_consumer: true,
            run_once: false,
        }
    }
}

impl PollConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("SKYMAX_POLL_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.interval_secs = secs;
            }
        }

        if let Ok(once) = std::env::var("SKYMAX_RUN_ONCE") {
            self.run_once = once == "1" || once.to_lowercase() == "true";
        }
    }

    /// Returns the cycle interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the open backoff as Duration.
    pub fn open_backoff(&self) -> Duration {
        Duration::from_secs(self.open_backoff_secs)
    }
}

/// Report rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Correction applied to the reported PV input current.
    pub amperage_factor: f32,
    /// Conversion efficiency applied to PV watts.
    pub watt_factor: f32,
    /// Interval the watt-hour estimates cover, in seconds.
    pub run_interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            amperage_factor: 1.0,
            watt_factor: 1.0,
            run_interval_secs: 60,
        }
    }
}

impl ReportConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(factor) = std::env::var("SKYMAX_AMPERAGE_FACTOR") {
            if let Ok(f) = factor.parse() {
                self.amperage_factor = f;
            }
        }

        if let Ok(factor) = std::env::var("SKYMAX_WATT_FACTOR") {
            if let Ok(f) = factor.parse() {
                self.watt_factor = f;
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}
