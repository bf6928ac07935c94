//! Session configuration loaded from `pvcomm.toml`.
//!
//! Everything here has a default, so an empty file (or no file at all)
//! yields a working simulation session against the built-in PV table.

use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    BDA_BLOCK_OFFSET, DEFAULT_LOG_FILE, DETECTOR_SETTLE_MS, MICDATA_LOCAL_PREFIX,
    MICDATA_REMOTE_PREFIX, NETCDF_SAVE_DELAY_MS, PIEZO_POLL_INTERVAL_MS, PIEZO_READY_TIMEOUT_MS,
    PUT_CALLBACK_TIMEOUT_MS,
};
use crate::pv::config::PvTableConfig;
use crate::pv::registry::PvRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

fn default_backend() -> String {
    "simulation".to_string()
}

fn default_log_file() -> String {
    DEFAULT_LOG_FILE.to_string()
}

fn default_path_rewrites() -> Vec<PathRewrite> {
    vec![PathRewrite {
        from: MICDATA_REMOTE_PREFIX.to_string(),
        to: MICDATA_LOCAL_PREFIX.to_string(),
    }]
}

/// Main configuration loaded from `pvcomm.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Common fields.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Backend to load (e.g. "simulation", "ca_tools").
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Per-backend configuration sections.
    /// Key = backend name, Value = backend-specific TOML table.
    #[serde(default)]
    pub backend_config: HashMap<String, toml::Value>,

    /// Working directory for the status log. When absent it is derived
    /// from the scan record's file system and subdirectory PVs.
    #[serde(default)]
    pub user_dir: Option<PathBuf>,

    /// Status log file name inside the user directory.
    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Path to a `pvs.toml` PV table (relative to the config file).
    /// The built-in BNP table is used when absent.
    #[serde(default)]
    pub pv_table: Option<PathBuf>,

    /// Path to the backend state file (relative to the config file).
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Timing budgets.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Beam-defining aperture parameters.
    #[serde(default)]
    pub beam: BeamConfig,

    /// Prefix rewrites applied to the file system PV when deriving the
    /// user directory.
    #[serde(default = "default_path_rewrites")]
    pub path_rewrites: Vec<PathRewrite>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            backend: default_backend(),
            backend_config: HashMap::new(),
            user_dir: None,
            log_file: default_log_file(),
            pv_table: None,
            state_file: None,
            timing: TimingConfig::default(),
            beam: BeamConfig::default(),
            path_rewrites: default_path_rewrites(),
        }
    }
}

impl SessionConfig {
    /// Validate the session configuration.
    ///
    /// # Validation Rules
    /// 1. `shared` is valid
    /// 2. `backend` and `log_file` are non-empty
    /// 3. polling interval is non-zero and not longer than the ready budget
    /// 4. put-with-completion timeout is non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.backend.is_empty() {
            return Err(ConfigError::ValidationError(
                "backend cannot be empty".to_string(),
            ));
        }
        if self.log_file.is_empty() {
            return Err(ConfigError::ValidationError(
                "log_file cannot be empty".to_string(),
            ));
        }
        if self.timing.piezo_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.piezo_poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.timing.piezo_poll_interval_ms > self.timing.piezo_ready_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "timing.piezo_poll_interval_ms ({}) exceeds piezo_ready_timeout_ms ({})",
                self.timing.piezo_poll_interval_ms, self.timing.piezo_ready_timeout_ms
            )));
        }
        if self.timing.put_callback_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing.put_callback_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the PV registry for this session.
    ///
    /// `base_dir` resolves a relative `pv_table` path.
    pub fn registry(&self, base_dir: &Path) -> Result<PvRegistry, ConfigError> {
        let table = match &self.pv_table {
            Some(path) => {
                let full = resolve_path(base_dir, path);
                info!("Loading PV table from {:?}", full);
                let content = std::fs::read_to_string(&full).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        ConfigError::FileNotFound
                    } else {
                        ConfigError::ParseError(format!("{}: {e}", full.display()))
                    }
                })?;
                PvTableConfig::from_toml(&content)
                    .map_err(|e| ConfigError::ParseError(format!("{}: {e}", full.display())))?
            }
            None => crate::pv::defaults::builtin_table(),
        };

        PvRegistry::from_config(&table).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// State file resolved against `base_dir`.
    pub fn state_file_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.state_file.as_ref().map(|p| resolve_path(base_dir, p))
    }

    /// Apply the configured prefix rewrites to a remote file system path.
    pub fn rewrite_path(&self, remote: &str) -> String {
        self.path_rewrites
            .iter()
            .fold(remote.to_string(), |acc, rw| acc.replace(&rw.from, &rw.to))
    }
}

/// Timing budgets [ms].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Budget for the XZTP stage to report ready after piezo centering.
    pub piezo_ready_timeout_ms: u64,
    /// Polling interval while waiting for the XZTP stage.
    pub piezo_poll_interval_ms: u64,
    /// Delay between saving netCDF data and stopping capture.
    pub netcdf_save_delay_ms: u64,
    /// Delay after detector stop commands before the idle check.
    pub detector_settle_ms: u64,
    /// Upper bound on a put-with-completion.
    pub put_callback_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            piezo_ready_timeout_ms: PIEZO_READY_TIMEOUT_MS,
            piezo_poll_interval_ms: PIEZO_POLL_INTERVAL_MS,
            netcdf_save_delay_ms: NETCDF_SAVE_DELAY_MS,
            detector_settle_ms: DETECTOR_SETTLE_MS,
            put_callback_timeout_ms: PUT_CALLBACK_TIMEOUT_MS,
        }
    }
}

impl TimingConfig {
    /// Piezo ready budget.
    pub fn piezo_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.piezo_ready_timeout_ms)
    }

    /// Piezo polling interval.
    pub fn piezo_poll_interval(&self) -> Duration {
        Duration::from_millis(self.piezo_poll_interval_ms)
    }

    /// netCDF save-to-stop delay.
    pub fn netcdf_save_delay(&self) -> Duration {
        Duration::from_millis(self.netcdf_save_delay_ms)
    }

    /// Detector settle delay.
    pub fn detector_settle(&self) -> Duration {
        Duration::from_millis(self.detector_settle_ms)
    }

    /// Put-with-completion timeout.
    pub fn put_callback_timeout(&self) -> Duration {
        Duration::from_millis(self.put_callback_timeout_ms)
    }
}

/// Beam-defining aperture parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BeamConfig {
    /// Distance subtracted from the IN position to block the beam [µm].
    pub bda_block_offset: f64,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            bda_block_offset: BDA_BLOCK_OFFSET,
        }
    }
}

/// A single path prefix rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRewrite {
    /// Substring as reported by the control system.
    pub from: String,
    /// Local replacement.
    pub to: String,
}

/// Resolve a possibly relative path against a base directory.
fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
