//! PV backend trait and error types.
//!
//! This module defines:
//! - `PvBackend` trait - Interface for pluggable PV access backends
//! - `PvError` enum - Error types for PV operations
//! - `BackendFactory` type alias - Factory function type
//! - `BackendContext` - What a backend receives on connect
//! - `BackendDiagnostics` struct - Optional backend counters

use crate::pv::registry::{PvBinding, PvRegistry};
use crate::pv::value::PvValue;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Error types for PV operations.
#[derive(Debug, Clone, Error)]
pub enum PvError {
    /// Logical key not present in the registry
    #[error("Unknown PV: {0}")]
    UnknownPv(String),

    /// Write attempted on a status PV
    #[error("PV is read-only: {0}")]
    ReadOnly(String),

    /// Backend connection or channel access failed
    #[error("PV communication error: {0}")]
    Communication(String),

    /// Put-with-completion or channel search did not finish in time
    #[error("PV operation timed out: {0}")]
    Timeout(String),

    /// Value could not be interpreted as the expected type
    #[error("Unexpected value for {key}: {value}")]
    TypeMismatch {
        /// Logical key
        key: String,
        /// Value as rendered by the backend
        value: String,
    },

    /// No backend registered under this name
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Backend exists but cannot run here (missing tool, not connected)
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Status log could not be opened or written
    #[error("Status log error: {0}")]
    Log(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// State persistence error
    #[error("State persistence error: {0}")]
    Persistence(String),
}

/// Factory function type for creating backend instances.
pub type BackendFactory = fn() -> Box<dyn PvBackend>;

/// Optional backend diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendDiagnostics {
    /// Number of get calls
    pub gets: u64,
    /// Number of put calls (with or without completion)
    pub puts: u64,
    /// Number of failed calls
    pub failures: u64,
}

/// Everything a backend receives when connecting.
#[derive(Debug, Clone, Copy)]
pub struct BackendContext<'a> {
    /// PV registry of the session.
    pub registry: &'a PvRegistry,
    /// Backend-specific table from the session config (`[backend_config.<name>]`).
    pub settings: Option<&'a toml::Value>,
    /// Optional state file (used by backends that persist values).
    pub state_file: Option<&'a Path>,
}

/// Trait defining the interface for PV backends.
///
/// `PvComm` talks to the control system only through this trait, enabling
/// pluggable access paths (simulation, EPICS command-line tools, ...).
///
/// # Lifecycle
///
/// 1. `connect()` - Called once before any PV access
/// 2. `get()` / `get_string()` / `put()` / `put_callback()` - In call order
/// 3. `disconnect()` - Called when the session closes
pub trait PvBackend: Send {
    /// Returns the backend's unique identifier (e.g., "simulation", "ca_tools").
    fn name(&self) -> &'static str;

    /// Returns the backend's semantic version.
    fn version(&self) -> &'static str;

    /// Connect to the control system.
    ///
    /// # Errors
    /// Return `PvError::BackendUnavailable` or `PvError::Config` if the
    /// backend cannot be used.
    fn connect(&mut self, ctx: &BackendContext<'_>) -> Result<(), PvError>;

    /// Read the current value of a PV.
    fn get(&mut self, pv: &PvBinding) -> Result<PvValue, PvError>;

    /// Read the current value of a PV rendered as a string (enum labels
    /// instead of indices).
    fn get_string(&mut self, pv: &PvBinding) -> Result<String, PvError>;

    /// Write a value without waiting for processing to complete.
    fn put(&mut self, pv: &PvBinding, value: &PvValue) -> Result<(), PvError>;

    /// Write a value and block until the record finishes processing.
    ///
    /// # Errors
    /// Return `PvError::Timeout` if completion is not signalled within `timeout`.
    fn put_callback(
        &mut self,
        pv: &PvBinding,
        value: &PvValue,
        timeout: Duration,
    ) -> Result<(), PvError>;

    /// Release connections and persist state if applicable.
    fn disconnect(&mut self) -> Result<(), PvError>;

    /// Get backend diagnostics.
    /// Default: None
    fn diagnostics(&self) -> Option<BackendDiagnostics> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBackend {
        connected: bool,
    }

    impl PvBackend for NullBackend {
        fn name(&self) -> &'static str {
            "null"
        }

        fn version(&self) -> &'static str {
            "0.1.0"
        }

        fn connect(&mut self, _ctx: &BackendContext<'_>) -> Result<(), PvError> {
            self.connected = true;
            Ok(())
        }

        fn get(&mut self, pv: &PvBinding) -> Result<PvValue, PvError> {
            Ok(pv.initial.clone())
        }

        fn get_string(&mut self, pv: &PvBinding) -> Result<String, PvError> {
            Ok(pv.render(&pv.initial))
        }

        fn put(&mut self, _pv: &PvBinding, _value: &PvValue) -> Result<(), PvError> {
            Ok(())
        }

        fn put_callback(
            &mut self,
            pv: &PvBinding,
            _value: &PvValue,
            _timeout: Duration,
        ) -> Result<(), PvError> {
            Err(PvError::Timeout(pv.channel.clone()))
        }

        fn disconnect(&mut self) -> Result<(), PvError> {
            self.connected = false;
            Ok(())
        }
    }

    #[test]
    fn test_pv_error_display() {
        let err = PvError::UnknownPv("BDA_pos".to_string());
        assert!(err.to_string().contains("BDA_pos"));

        let err = PvError::TypeMismatch {
            key: "nextsc".to_string(),
            value: "abc".to_string(),
        };
        assert!(err.to_string().contains("nextsc"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_default_diagnostics_is_none() {
        let registry = PvRegistry::builtin().unwrap();
        let mut backend = NullBackend { connected: false };
        let ctx = BackendContext {
            registry: &registry,
            settings: None,
            state_file: None,
        };
        backend.connect(&ctx).unwrap();
        assert!(backend.connected);
        assert!(backend.diagnostics().is_none());

        let status = registry.binding("netCDF_status").unwrap();
        assert_eq!(backend.get_string(status).unwrap(), "Done");
        assert!(matches!(
            backend.put_callback(status, &PvValue::Long(1), Duration::from_millis(1)),
            Err(PvError::Timeout(_))
        ));
    }
}
