//! # skymax-core
//!
//! Shared state between the inverter poll loop and its consumers.
//!
//! This crate provides:
//! - The fixed query vocabulary (`QMOD`, `QPIGS`, `QPIRI`, `QPIWS`)
//! - Operating mode decoding
//! - A lock-protected status cache with change flags and a change-event channel

pub mod cache;
pub mod mode;
pub mod query;

pub use cache::{CacheEvent, StatusCache};
pub use mode::OperatingMode;
pub use query::{QueryKind, UnknownQueryKind};
