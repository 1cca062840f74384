//! # skymax-client
//!
//! Device client for skymax.
//!
//! This crate provides:
//! - Configuration loading (YAML file plus environment overrides)
//! - Transport sessions over RS232 serial or USB HID raw
//! - The command/reply exchange with a read deadline
//! - The poll loop that keeps the status cache current

pub mod config;
pub mod error;
pub mod exchange;
pub mod poller;
pub mod transport;

pub use config::{
    Config, ConfigError, DeviceConfig, Framing, PollConfig, ProtocolConfig, ReportConfig,
    TransportKind,
};
pub use error::{ClientError, ErrorKind};
pub use exchange::{exchange, read_frame, FramingOptions};
pub use poller::{CycleReport, PollState, Poller, RunOutcome};
pub use transport::{Connector, DeviceStream};
