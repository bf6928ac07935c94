//! PV kind discriminator.
//!
//! The kind says what sort of record sits behind a logical name. It does
//! not change how a value is transported; it gates writes and tells the
//! simulation backend how to seed the point.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Kind of a registered PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PvKind {
    /// Motor position (requested or actual). Writes move hardware.
    Motor,
    /// Plain read/write value (scan record fields, modes, temperatures).
    #[default]
    Value,
    /// Trigger field such as `.PROC` or `StopAll`. Written with `1`.
    Command,
    /// Read-only status (enum or flag).
    Status,
}

impl PvKind {
    /// Whether puts to this kind are allowed.
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::Status)
    }
}

impl fmt::Display for PvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Motor => write!(f, "motor"),
            Self::Value => write!(f, "value"),
            Self::Command => write!(f, "command"),
            Self::Status => write!(f, "status"),
        }
    }
}

impl FromStr for PvKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motor" => Ok(Self::Motor),
            "value" => Ok(Self::Value),
            "command" => Ok(Self::Command),
            "status" => Ok(Self::Status),
            _ => Err(format!("unknown PvKind: {s:?}")),
        }
    }
}
