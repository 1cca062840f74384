//! Query vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A protocol query whose reply is cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Device mode inquiry (`QMOD`).
    Mode,
    /// General status parameters (`QPIGS`).
    GeneralStatus,
    /// Rated information (`QPIRI`).
    RatedInfo,
    /// Warning status (`QPIWS`).
    Warnings,
}

impl QueryKind {
    /// All kinds, in polling order.
    pub const ALL: [QueryKind; 4] = [
        QueryKind::Mode,
        QueryKind::GeneralStatus,
        QueryKind::RatedInfo,
        QueryKind::Warnings,
    ];

    /// Protocol command string.
    pub fn command(&self) -> &'static str {
        match self {
            QueryKind::Mode => "QMOD",
            QueryKind::GeneralStatus => "QPIGS",
            QueryKind::RatedInfo => "QPIRI",
            QueryKind::Warnings => "QPIWS",
        }
    }

    /// Exact reply length on the wire, marker and trailer included.
    ///
    /// Used when replies are framed by length instead of by terminator.
    pub fn expected_reply_len(&self) -> usize {
        match self {
            QueryKind::Mode => 5,
            QueryKind::GeneralStatus => 110,
            QueryKind::RatedInfo => 98,
            QueryKind::Warnings => 36,
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            QueryKind::Mode => 0,
            QueryKind::GeneralStatus => 1,
            QueryKind::RatedInfo => 2,
            QueryKind::Warnings => 3,
        }
    }

    /// Looks up the kind for a protocol command string.
    pub fn from_command(command: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.command().eq_ignore_ascii_case(command))
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

/// Error for unrecognized query names.
#[derive(Debug, Error)]
#[error("unknown query kind: {0}")]
pub struct UnknownQueryKind(pub String);

impl FromStr for QueryKind {
    type Err = UnknownQueryKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(kind) = Self::from_command(s) {
            return Ok(kind);
        }
        match s.to_lowercase().as_str() {
            "mode" => Ok(QueryKind::Mode),
            "general_status" | "status" => Ok(QueryKind::GeneralStatus),
            "rated_info" | "rating" => Ok(QueryKind::RatedInfo),
            "warnings" => Ok(QueryKind::Warnings),
            _ => Err(UnknownQueryKind(s.to_string())),
        }
    }
}
