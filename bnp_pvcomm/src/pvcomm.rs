//! `PvComm` session and beamline operations.
//!
//! A `PvComm` owns the PV registry, a connected backend and the status log
//! for one scan session. Every operation is a short sequence of gets and
//! puts, issued in call order, usually followed by a status log line.

use bnp_common::consts::{
    CRYO_TEMPERATURE_PVS, MOTION_MODE_COMBINED, MOTION_MODE_PIEZO, NETCDF_WRITING_LABEL,
    POSITION_DECIMALS, SCAN_FILE_EXTENSION, SCAN_NUMBER_WIDTH, XZTP_READY_LABEL,
};
use bnp_common::pv::backend::{BackendContext, BackendDiagnostics, PvBackend, PvError};
use bnp_common::pv::kind::PvKind;
use bnp_common::pv::registry::PvRegistry;
use bnp_common::pv::value::{PvValue, round_decimals};
use bnp_common::session::SessionConfig;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::status_log::StatusLog;

// ─── Outcomes ───────────────────────────────────────────────────────

/// Result of [`PvComm::reset_detector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetOutcome {
    /// Detectors went idle and the scan was resumed.
    Recovered,
    /// At least one detector is still acquiring.
    Failed,
}

impl ResetOutcome {
    /// Legacy sentinel: `1` on success, `-1` on failure.
    pub fn code(self) -> i32 {
        match self {
            Self::Recovered => 1,
            Self::Failed => -1,
        }
    }

    /// Whether the reset succeeded.
    pub fn is_success(self) -> bool {
        self == Self::Recovered
    }
}

impl fmt::Display for ResetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recovered => f.write_str("recovered"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Result of a bounded wait on a readiness flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitOutcome {
    /// The flag reported ready within the budget.
    Ready,
    /// The budget expired and the flag still reports not ready.
    TimedOut,
}

impl WaitOutcome {
    /// Legacy sentinel: `1` when ready, `0` otherwise.
    pub fn code(self) -> i32 {
        match self {
            Self::Ready => 1,
            Self::TimedOut => 0,
        }
    }

    /// Whether the flag ended up ready.
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for WaitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::TimedOut => f.write_str("timed out"),
        }
    }
}

/// One row of [`PvComm::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvReading {
    /// Logical key.
    pub key: String,
    /// EPICS channel name.
    pub channel: String,
    /// Record kind.
    pub kind: PvKind,
    /// Value as a string, `None` if the read failed.
    pub value: Option<String>,
    /// Read error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── PvComm ─────────────────────────────────────────────────────────

/// Beamline PV communication session.
pub struct PvComm {
    /// Session configuration
    config: SessionConfig,
    /// Logical key to channel bindings
    registry: PvRegistry,
    /// Connected backend
    backend: Box<dyn PvBackend>,
    /// User-facing status log
    log: StatusLog,
    /// Directory holding the status log
    user_dir: PathBuf,
}

impl PvComm {
    /// Connect `backend`, resolve the user directory and open the status log.
    ///
    /// The user directory is `config.user_dir` when set, otherwise it is
    /// derived from the scan record PVs (see [`PvComm::user_dir`]). A
    /// relative `config.state_file` is used as given; resolve it first if
    /// it should be relative to the config file.
    ///
    /// # Errors
    /// Configuration validation, backend connection, the PV reads needed to
    /// derive the user directory, and opening the log file can all fail.
    pub fn new(
        config: SessionConfig,
        registry: PvRegistry,
        mut backend: Box<dyn PvBackend>,
    ) -> Result<Self, PvError> {
        config
            .validate()
            .map_err(|e| PvError::Config(e.to_string()))?;

        let ctx = BackendContext {
            registry: &registry,
            settings: config.backend_config.get(backend.name()),
            state_file: config.state_file.as_deref(),
        };
        backend.connect(&ctx)?;
        info!(
            "Connected {} backend v{} ({} PVs)",
            backend.name(),
            backend.version(),
            registry.len()
        );

        let user_dir = match &config.user_dir {
            Some(dir) => dir.clone(),
            None => derive_user_dir(&config, &registry, backend.as_mut())?,
        };
        let log = StatusLog::open(user_dir.join(&config.log_file))?;

        Ok(Self {
            config,
            registry,
            backend,
            log,
            user_dir,
        })
    }

    /// Disable (or re-enable) the stdout echo of the status log.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.log = self.log.with_echo(echo);
        self
    }

    /// Whether status-log lines are echoed to stdout.
    pub fn echoes_log(&self) -> bool {
        self.log.echoes()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// PV registry.
    pub fn registry(&self) -> &PvRegistry {
        &self.registry
    }

    /// Directory the status log lives in.
    pub fn session_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Path of the status log.
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Name of the connected backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Backend counters, if the backend keeps any.
    pub fn diagnostics(&self) -> Option<BackendDiagnostics> {
        self.backend.diagnostics()
    }

    // ─── Low-level access ───────────────────────────────────────────

    /// Read a PV by logical key.
    pub fn get(&mut self, key: &str) -> Result<PvValue, PvError> {
        let binding = self.registry.binding(key)?;
        self.backend.get(binding)
    }

    /// Read a PV by logical key, rendered as a string.
    pub fn get_string(&mut self, key: &str) -> Result<String, PvError> {
        let binding = self.registry.binding(key)?;
        self.backend.get_string(binding)
    }

    fn get_f64(&mut self, key: &str) -> Result<f64, PvError> {
        let value = self.get(key)?;
        value.as_f64().ok_or_else(|| PvError::TypeMismatch {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    fn get_rounded(&mut self, key: &str) -> Result<f64, PvError> {
        Ok(round_decimals(self.get_f64(key)?, POSITION_DECIMALS))
    }

    /// Write a PV without waiting for completion.
    pub fn put(&mut self, key: &str, value: PvValue) -> Result<(), PvError> {
        let binding = self.registry.writable(key)?;
        debug!("put {} = {}", key, value);
        self.backend.put(binding, &value)
    }

    /// Write a PV and wait for the record to finish processing.
    pub fn put_wait(&mut self, key: &str, value: PvValue) -> Result<(), PvError> {
        let binding = self.registry.writable(key)?;
        let timeout = self.config.timing.put_callback_timeout();
        debug!("put_callback {} = {} (timeout {:?})", key, value, timeout);
        self.backend.put_callback(binding, &value, timeout)
    }

    // ─── Status log ─────────────────────────────────────────────────

    /// Write `msg` verbatim to stdout and the status log.
    pub fn log(&mut self, msg: &str) -> Result<(), PvError> {
        self.log.write(msg)
    }

    /// Write a timestamped line to stdout and the status log.
    pub fn log_line(&mut self, msg: &str) -> Result<(), PvError> {
        self.log.line(msg)
    }

    // ─── Positions ──────────────────────────────────────────────────

    /// Current working directory for scan data, derived from the scan
    /// record's file system and subdirectory PVs.
    pub fn user_dir(&mut self) -> Result<PathBuf, PvError> {
        derive_user_dir(&self.config, &self.registry, self.backend.as_mut())
    }

    /// Beam-defining aperture position, 2 decimals.
    pub fn bda_position(&mut self) -> Result<f64, PvError> {
        self.get_rounded("BDA_pos")
    }

    /// Sample rotation angle, 2 decimals.
    pub fn sample_angle(&mut self) -> Result<f64, PvError> {
        self.get_rounded("sm_rot_Act")
    }

    /// Tomography rotation angle, 2 decimals.
    pub fn tomo_angle(&mut self) -> Result<f64, PvError> {
        self.get_rounded("tomo_rot_Act")
    }

    /// `[x, y, z]` stage center, 2 decimals each.
    pub fn xyz_center(&mut self) -> Result<[f64; 3], PvError> {
        Ok([
            self.get_rounded("x_center_Act")?,
            self.get_rounded("y_center_Act")?,
            self.get_rounded("z_value_Act")?,
        ])
    }

    /// File name the next scan will be saved under, e.g. `bnp_fly0042.mda`.
    pub fn next_scan_name(&mut self) -> Result<String, PvError> {
        let basename = self.get_string("basename")?;
        let raw = self.get("nextsc")?;
        let number = raw.as_i64().ok_or_else(|| PvError::TypeMismatch {
            key: "nextsc".to_string(),
            value: raw.to_string(),
        })?;
        Ok(format!(
            "{basename}{number:0width$}.{SCAN_FILE_EXTENSION}",
            width = SCAN_NUMBER_WIDTH
        ))
    }

    // ─── Scan control ───────────────────────────────────────────────

    /// Pause the running scan.
    pub fn scan_pause(&mut self) -> Result<(), PvError> {
        self.put_wait("wait", PvValue::Long(1))?;
        info!("Scan paused");
        Ok(())
    }

    /// Resume a paused scan.
    pub fn scan_resume(&mut self) -> Result<(), PvError> {
        self.put_wait("wait", PvValue::Long(0))?;
        info!("Scan resumed");
        Ok(())
    }

    /// Abort all scans.
    pub fn scan_abort(&mut self) -> Result<(), PvError> {
        self.put_wait("abort", PvValue::Long(1))?;
        warn!("Scan aborted");
        Ok(())
    }

    // ─── Detectors ──────────────────────────────────────────────────

    /// Recover hung XRF detectors.
    ///
    /// Saves and stops netCDF capture if it is writing, stops MCS and XMAP,
    /// then resumes the scan if both went idle.
    pub fn reset_detector(&mut self) -> Result<ResetOutcome, PvError> {
        let status = self.get_string("netCDF_status")?;
        info!("netCDF status: {}", status);

        if status == NETCDF_WRITING_LABEL {
            info!("Saving current netCDF data and stopping file write");
            self.put("netCDF_save", PvValue::Long(1))?;
            thread::sleep(self.config.timing.netcdf_save_delay());
            self.put("netCDF_stp", PvValue::Long(1))?;
        }
        self.put("mcs_stp", PvValue::Long(1))?;
        self.put("xmap_stp", PvValue::Long(1))?;
        thread::sleep(self.config.timing.detector_settle());

        if self.detector_idle()? {
            self.scan_resume()?;
            info!("Detector reset recovered");
            Ok(ResetOutcome::Recovered)
        } else {
            warn!("Detector reset failed, detectors still acquiring");
            Ok(ResetOutcome::Failed)
        }
    }

    /// Whether neither XMAP nor MCS is acquiring.
    pub fn detector_idle(&mut self) -> Result<bool, PvError> {
        let xmap_acquiring = self.get("xmap_status")?.is_truthy();
        let mcs_acquiring = self.get("mcs_status")?.is_truthy();
        debug!(
            "xmap acquiring: {}, mcs acquiring: {}",
            xmap_acquiring, mcs_acquiring
        );
        Ok(!xmap_acquiring && !mcs_acquiring)
    }

    /// Log the cryostat temperatures [K].
    pub fn log_cryo_temps(&mut self) -> Result<(), PvError> {
        let mut parts = Vec::with_capacity(CRYO_TEMPERATURE_PVS.len());
        for key in CRYO_TEMPERATURE_PVS {
            parts.push(format!("{}: {:.2}", key, self.get_f64(key)?));
        }
        self.log_line(&parts.join(", "))
    }

    // ─── Rotation ───────────────────────────────────────────────────

    /// Rotate the tomography stage to `theta` and wait for completion.
    pub fn change_tomo_rotation(&mut self, theta: f64) -> Result<(), PvError> {
        let current = self.tomo_angle()?;
        self.log_line(&format!(
            "Changing tomo rotation angle from {current:.2} to {theta:.2}"
        ))?;
        self.put_wait("tomo_rot_Act", PvValue::Double(theta))
    }

    /// Rotate the sample stage to `theta` and wait for completion.
    pub fn change_sample_rotation(&mut self, theta: f64) -> Result<(), PvError> {
        let current = self.sample_angle()?;
        self.log_line(&format!(
            "Changing sample rotation angle from {current:.2} to {theta:.2}"
        ))?;
        self.put_wait("sm_rot_Act", PvValue::Double(theta))
    }

    // ─── Beam-defining aperture ─────────────────────────────────────

    /// Move the BDA out of its IN position to block the beam.
    ///
    /// Returns the block position.
    pub fn block_beam_bda(&mut self, bda_in: f64) -> Result<f64, PvError> {
        let target = bda_in - self.config.beam.bda_block_offset;
        self.log_line(&format!("Move BDA to block position at: {target:.3}"))?;
        self.put_wait("BDA_pos", PvValue::Double(target))?;
        Ok(target)
    }

    /// Move the BDA back to its IN position.
    pub fn open_beam_bda(&mut self, bda_in: f64) -> Result<(), PvError> {
        self.log_line(&format!("Move BDA to open position at: {bda_in:.3}"))?;
        self.put_wait("BDA_pos", PvValue::Double(bda_in))
    }

    // ─── XZTP stage ─────────────────────────────────────────────────

    /// X and Y in combined (coarse + piezo) motion.
    pub fn xy_combined_mode(&mut self) -> Result<(), PvError> {
        self.log_line("Changing XY scan mode to combined motion")?;
        self.put("x_motorMode", PvValue::Long(MOTION_MODE_COMBINED))?;
        self.put("y_motorMode", PvValue::Long(MOTION_MODE_COMBINED))
    }

    /// X in combined (coarse + piezo) motion.
    pub fn x_combined_mode(&mut self) -> Result<(), PvError> {
        self.log_line("Changing X scan mode to combined motion")?;
        self.put("x_motorMode", PvValue::Long(MOTION_MODE_COMBINED))
    }

    /// X in piezo-only motion.
    pub fn x_piezo_mode(&mut self) -> Result<(), PvError> {
        self.log_line("Changing X scan mode to Piezo only")?;
        self.put("x_motorMode", PvValue::Long(MOTION_MODE_PIEZO))
    }

    /// Use the requested X/Y stage position as the scan center.
    ///
    /// Returns the `(x, y)` request positions.
    pub fn set_xy_center(&mut self) -> Result<(f64, f64), PvError> {
        self.log_line("Update the current position as the center of the scan.")?;
        let x = self.get_f64("x_center_Rqs")?;
        let y = self.get_f64("y_center_Rqs")?;
        self.put(
            "x_updatecenter",
            PvValue::Double(round_decimals(x, POSITION_DECIMALS)),
        )?;
        self.put(
            "y_updatecenter",
            PvValue::Double(round_decimals(y, POSITION_DECIMALS)),
        )?;
        self.log_line(&format!("X_center value: {x:.2}"))?;
        self.log_line(&format!("Y_center value: {y:.2}"))?;
        Ok((x, y))
    }

    /// Whether the XZTP stage reports `Ready`.
    pub fn xztp_motor_ready(&mut self) -> Result<bool, PvError> {
        Ok(self.get_string("xztp_motor_ready")? == XZTP_READY_LABEL)
    }

    /// Center both piezos and wait for the XZTP stage to settle.
    pub fn center_piezo_xy(&mut self) -> Result<WaitOutcome, PvError> {
        self.log_line("Centering piezoX and piezoY.")?;
        self.put("piezo_xCenter", PvValue::Long(1))?;
        self.put("piezo_yCenter", PvValue::Long(1))?;

        let x = self.get_f64("x_piezo_val")?;
        self.log_line(&format!("Piezo xcenter value: {x:.2}"))?;
        let y = self.get_f64("y_piezo_val")?;
        self.log_line(&format!("Piezo ycenter value: {y:.2}"))?;

        let budget = self.config.timing.piezo_ready_timeout();
        let poll = self.config.timing.piezo_poll_interval();
        let start = Instant::now();
        while !self.xztp_motor_ready()? && start.elapsed() < budget {
            self.log_line("Waiting for XZTP to be ready.")?;
            thread::sleep(poll);
        }

        // Re-check once the budget is spent; the stage may settle on the last sleep.
        if self.xztp_motor_ready()? {
            debug!("XZTP ready after {:?}", start.elapsed());
            Ok(WaitOutcome::Ready)
        } else {
            warn!("XZTP not ready after {:?}", budget);
            Ok(WaitOutcome::TimedOut)
        }
    }

    /// Compare `<axis>_Act` against `<axis>_Rqs` within `tolerance`.
    pub fn motor_in_position(&mut self, axis: &str, tolerance: f64) -> Result<bool, PvError> {
        self.log_line("Checking whether motors are ready.")?;
        let actual = self.get_f64(&format!("{axis}_Act"))?;
        let requested = self.get_f64(&format!("{axis}_Rqs"))?;

        if (actual - requested).abs() <= tolerance {
            self.log_line(&format!(
                "{axis} motor is in position with value {actual:.2}"
            ))?;
            Ok(true)
        } else {
            self.log_line(&format!(
                "{axis} motor not in position, current: {actual:.2}, request: {requested:.2}"
            ))?;
            Ok(false)
        }
    }

    // ─── Bulk writes ────────────────────────────────────────────────

    /// Write several PVs in order, logging each change.
    ///
    /// Every key is checked before the first write, so an unknown or
    /// read-only key leaves all PVs untouched.
    pub fn assign_pvs<K: AsRef<str>>(&mut self, pairs: &[(K, PvValue)]) -> Result<(), PvError> {
        for (key, _) in pairs {
            self.registry.writable(key.as_ref())?;
        }
        for (key, value) in pairs {
            self.assign_pv(key.as_ref(), value.clone())?;
        }
        Ok(())
    }

    /// Write one PV and log the change.
    pub fn assign_pv(&mut self, key: &str, value: PvValue) -> Result<(), PvError> {
        self.put(key, value.clone())?;
        let shown = match value.as_f64() {
            Some(v) if !matches!(value, PvValue::Text(_)) => format!("{v:.3}"),
            _ => value.to_string(),
        };
        self.log_line(&format!("Change {key} to {shown}"))
    }

    /// Log the banner that opens a scan in the status log.
    pub fn write_scan_init(
        &mut self,
        mode: &str,
        sample_info: &str,
        params: &[(String, PvValue)],
    ) -> Result<(), PvError> {
        let next = self.next_scan_name()?;
        let rule = "#".repeat(20);
        self.log(&format!("{rule} Initiating scan {next} {rule}\n"))?;
        self.log(&format!("Sample info: {sample_info}\n"))?;
        self.log_line(&format!("Setting up scan using {mode} mode."))?;
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        self.log_line(&format!("{{{}}}", rendered.join(", ")))?;
        self.log("\n")
    }

    // ─── Session ────────────────────────────────────────────────────

    /// Read every registered PV as a string. Failed reads are reported per
    /// row instead of aborting the snapshot.
    pub fn snapshot(&mut self) -> Vec<PvReading> {
        let mut rows = Vec::with_capacity(self.registry.len());
        for binding in self.registry.bindings() {
            let (value, error) = match self.backend.get_string(binding) {
                Ok(v) => (Some(v), None),
                Err(e) => {
                    debug!("snapshot read of {} failed: {}", binding.key, e);
                    (None, Some(e.to_string()))
                }
            };
            rows.push(PvReading {
                key: binding.key.clone(),
                channel: binding.channel.clone(),
                kind: binding.kind,
                value,
                error,
            });
        }
        rows
    }

    /// Close the status log and disconnect the backend.
    pub fn close(mut self) -> Result<(), PvError> {
        self.log.close();
        self.backend.disconnect()?;
        info!("Session closed");
        Ok(())
    }
}

/// File system PV with path rewrites applied, joined with the subdirectory
/// PV stripped of `mda`.
fn derive_user_dir(
    config: &SessionConfig,
    registry: &PvRegistry,
    backend: &mut dyn PvBackend,
) -> Result<PathBuf, PvError> {
    let filesys = backend.get_string(registry.binding("filesys")?)?;
    let subdir = backend.get_string(registry.binding("subdir")?)?;
    let dir = PathBuf::from(config.rewrite_path(&filesys)).join(subdir.replace("mda", ""));
    debug!("User directory resolved to {:?}", dir);
    Ok(dir)
}
