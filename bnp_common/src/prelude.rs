//! Prelude module for common re-exports.
//!
//! ```rust
//! use bnp_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};
pub use crate::session::{BeamConfig, PathRewrite, SessionConfig, TimingConfig};

// ─── PV access ──────────────────────────────────────────────────────
pub use crate::pv::backend::{
    BackendContext, BackendDiagnostics, BackendFactory, PvBackend, PvError,
};
pub use crate::pv::config::{PvPoint, PvTableConfig};
pub use crate::pv::kind::PvKind;
pub use crate::pv::registry::{PvBinding, PvLink, PvRegistry, RegistryError};
pub use crate::pv::value::{round_decimals, PvValue};
