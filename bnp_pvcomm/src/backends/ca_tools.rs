//! EPICS command-line tools backend.
//!
//! Talks to the control system by running `caget` / `caput` from EPICS base.
//! Each call is one short-lived process, which is slow but needs nothing
//! beyond a working EPICS installation on `PATH`.
//!
//! Settings come from `[backend_config.ca_tools]`:
//!
//! ```toml
//! [backend_config.ca_tools]
//! caget = "/opt/epics/base/bin/linux-x86_64/caget"
//! caput = "/opt/epics/base/bin/linux-x86_64/caput"
//! timeout_s = 1.0
//!
//! [backend_config.ca_tools.env]
//! EPICS_CA_ADDR_LIST = "164.54.100.255"
//! ```

use bnp_common::pv::backend::{BackendContext, BackendDiagnostics, PvBackend, PvError};
use bnp_common::pv::registry::PvBinding;
use bnp_common::pv::value::PvValue;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::{Command, Output};
use std::time::Duration;
use tracing::{debug, info, trace};

fn default_caget() -> String {
    "caget".to_string()
}

fn default_caput() -> String {
    "caput".to_string()
}

fn default_timeout_s() -> f64 {
    1.0
}

/// `[backend_config.ca_tools]` table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaToolsSettings {
    /// Path or name of the `caget` executable.
    #[serde(default = "default_caget")]
    pub caget: String,
    /// Path or name of the `caput` executable.
    #[serde(default = "default_caput")]
    pub caput: String,
    /// Channel search / read timeout passed as `-w` [s].
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    /// Extra environment for the child processes (`EPICS_CA_*`).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for CaToolsSettings {
    fn default() -> Self {
        Self {
            caget: default_caget(),
            caput: default_caput(),
            timeout_s: default_timeout_s(),
            env: BTreeMap::new(),
        }
    }
}

impl CaToolsSettings {
    /// Parse the backend table. A missing table yields the defaults.
    pub fn from_settings(settings: Option<&toml::Value>) -> Result<Self, PvError> {
        let Some(value) = settings else {
            return Ok(Self::default());
        };
        let parsed: Self = value
            .clone()
            .try_into()
            .map_err(|e| PvError::Config(format!("Invalid [backend_config.ca_tools]: {}", e)))?;
        if parsed.timeout_s.is_nan() || parsed.timeout_s <= 0.0 {
            return Err(PvError::Config(format!(
                "ca_tools timeout_s must be positive, got {}",
                parsed.timeout_s
            )));
        }
        Ok(parsed)
    }
}

/// `caget` arguments. `numeric` asks for enum indices instead of labels.
pub fn caget_args(channel: &str, numeric: bool, wait_s: f64) -> Vec<String> {
    let mut args = vec!["-t".to_string()];
    if numeric {
        args.push("-n".to_string());
    }
    args.push("-w".to_string());
    args.push(format_seconds(wait_s));
    args.push(channel.to_string());
    args
}

/// `caput` arguments. With `callback`, waits for completion up to that long.
pub fn caput_args(channel: &str, value: &PvValue, callback: Option<Duration>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(timeout) = callback {
        args.push("-c".to_string());
        args.push("-w".to_string());
        args.push(format_seconds(timeout.as_secs_f64()));
    }
    args.push("-t".to_string());
    args.push(channel.to_string());
    args.push(value.to_string());
    args
}

fn format_seconds(secs: f64) -> String {
    format!("{secs}")
}

/// Backend running EPICS base command-line tools.
pub struct CaToolsBackend {
    settings: Option<CaToolsSettings>,
    diagnostics: BackendDiagnostics,
}

impl CaToolsBackend {
    /// Create a new, unconnected backend.
    pub fn new() -> Self {
        Self {
            settings: None,
            diagnostics: BackendDiagnostics::default(),
        }
    }

    fn settings(&self) -> Result<&CaToolsSettings, PvError> {
        self.settings
            .as_ref()
            .ok_or_else(|| PvError::BackendUnavailable("ca_tools backend not connected".into()))
    }

    /// Run one tool invocation and return its trimmed stdout.
    fn run(&mut self, program: &str, args: &[String], channel: &str) -> Result<String, PvError> {
        let settings = self.settings()?;
        trace!("{} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .envs(&settings.env)
            .output()
            .map_err(|e| {
                self.diagnostics.failures += 1;
                if e.kind() == std::io::ErrorKind::NotFound {
                    PvError::BackendUnavailable(format!("{program} not found: {e}"))
                } else {
                    PvError::Communication(format!("Failed to run {program}: {e}"))
                }
            })?;

        check_output(program, channel, &output).inspect_err(|_| self.diagnostics.failures += 1)
    }
}

/// Map a finished tool invocation to its stdout or an error.
fn check_output(program: &str, channel: &str, output: &Output) -> Result<String, PvError> {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let detail = if stderr.is_empty() { stdout } else { stderr };
    let lowered = detail.to_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") {
        Err(PvError::Timeout(format!("{channel}: {detail}")))
    } else {
        Err(PvError::Communication(format!(
            "{program} {channel} failed: {detail}"
        )))
    }
}

impl Default for CaToolsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PvBackend for CaToolsBackend {
    fn name(&self) -> &'static str {
        "ca_tools"
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn connect(&mut self, ctx: &BackendContext<'_>) -> Result<(), PvError> {
        let settings = CaToolsSettings::from_settings(ctx.settings)?;
        info!(
            "ca_tools backend using {} / {} (timeout {}s) for {} PVs",
            settings.caget,
            settings.caput,
            settings.timeout_s,
            ctx.registry.len()
        );
        self.settings = Some(settings);
        Ok(())
    }

    fn get(&mut self, pv: &PvBinding) -> Result<PvValue, PvError> {
        self.diagnostics.gets += 1;
        let settings = self.settings()?;
        let program = settings.caget.clone();
        let args = caget_args(&pv.channel, true, settings.timeout_s);
        let raw = self.run(&program, &args, &pv.channel)?;
        let Ok(value) = raw.parse::<PvValue>();
        debug!("caget {} -> {}", pv.channel, value);
        Ok(value)
    }

    fn get_string(&mut self, pv: &PvBinding) -> Result<String, PvError> {
        self.diagnostics.gets += 1;
        let settings = self.settings()?;
        let program = settings.caget.clone();
        let args = caget_args(&pv.channel, false, settings.timeout_s);
        self.run(&program, &args, &pv.channel)
    }

    fn put(&mut self, pv: &PvBinding, value: &PvValue) -> Result<(), PvError> {
        self.diagnostics.puts += 1;
        let program = self.settings()?.caput.clone();
        let args = caput_args(&pv.channel, value, None);
        self.run(&program, &args, &pv.channel).map(|_| ())
    }

    fn put_callback(
        &mut self,
        pv: &PvBinding,
        value: &PvValue,
        timeout: Duration,
    ) -> Result<(), PvError> {
        self.diagnostics.puts += 1;
        let program = self.settings()?.caput.clone();
        let args = caput_args(&pv.channel, value, Some(timeout));
        self.run(&program, &args, &pv.channel).map(|_| ())
    }

    fn disconnect(&mut self) -> Result<(), PvError> {
        self.settings = None;
        Ok(())
    }

    fn diagnostics(&self) -> Option<BackendDiagnostics> {
        Some(self.diagnostics.clone())
    }
}

/// Factory function to create a ca_tools backend instance.
pub fn create_backend() -> Box<dyn PvBackend> {
    Box::new(CaToolsBackend::new())
}
