//! # BNP PV Communication Binary
//!
//! Command-line access to the beamline operations of [`PvComm`]: positions,
//! scan pause/resume/abort, detector recovery, cryostat logging and stage
//! setup.
//!
//! # Usage
//!
//! ```bash
//! # Read positions from the simulator, logging under ./bnp-sim
//! bnp_pvcomm --simulate --user-dir ./bnp-sim positions
//!
//! # Recover hung detectors on the beamline
//! bnp_pvcomm --config /etc/bnp/pvcomm.toml --backend ca_tools reset-detector
//!
//! # Log cryostat temperatures every 30 s until Ctrl-C
//! bnp_pvcomm log-temps --every 30
//!
//! # Full PV table as JSON
//! bnp_pvcomm --json status
//! ```
//!
//! With `--json`, stdout carries only the command result; the status log
//! is still written to its file but not echoed.
//!
//! Exit codes: `0` success, `1` error, `2` when a recovery or readiness
//! check reports failure.

use bnp_common::config::{ConfigError, ConfigLoader};
use bnp_common::consts::DEFAULT_CONFIG_PATH;
use bnp_common::pv::value::PvValue;
use bnp_common::session::SessionConfig;
use bnp_pvcomm::{BackendRegistry, PvComm, ResetOutcome, WaitOutcome};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Exit code for a completed command whose check reported failure.
const EXIT_CHECK_FAILED: i32 = 2;

/// Sleep granularity of the `log-temps` loop, so Ctrl-C is seen promptly.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// BNP PV Communication - EPICS PV layer for the Bionanoprobe scan system
#[derive(Parser, Debug)]
#[command(name = "bnp_pvcomm")]
#[command(version)]
#[command(about = "EPICS PV communication layer for the BNP scan system")]
#[command(long_about = None)]
struct Args {
    /// Path to session configuration (pvcomm.toml).
    /// Defaults to /etc/bnp/pvcomm.toml when that file exists.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Force the simulation backend
    #[arg(short = 's', long, conflicts_with = "backend")]
    simulate: bool,

    /// Backend to use (overrides the config file)
    #[arg(short, long)]
    backend: Option<String>,

    /// Working directory for the status log (skips the PV lookup)
    #[arg(long, value_name = "DIR")]
    user_dir: Option<PathBuf>,

    /// Status log file name inside the user directory
    #[arg(long, value_name = "NAME")]
    log_file: Option<String>,

    /// Simulation state file (keeps simulated values between runs)
    #[arg(long, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and command results in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show every PV, or a single one by key
    Status {
        /// Logical PV key
        key: Option<String>,
    },
    /// Show BDA, rotation angles and stage center
    Positions,
    /// Pause the running scan
    Pause,
    /// Resume a paused scan
    Resume,
    /// Abort all scans
    Abort,
    /// Stop netCDF capture, MCS and XMAP, then resume if they went idle
    ResetDetector,
    /// Check whether MCS and XMAP are idle
    DetectorIdle,
    /// Log cryostat temperatures
    LogTemps {
        /// Repeat every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<f64>,
    },
    /// Rotate a stage and wait for completion
    Rotate {
        /// Stage to rotate
        stage: RotationStage,
        /// Target angle [deg]
        #[arg(allow_negative_numbers = true)]
        theta: f64,
    },
    /// Move the BDA out of the beam (IN position minus the block offset)
    BlockBeam {
        /// BDA IN position [µm]
        #[arg(allow_negative_numbers = true)]
        bda: f64,
    },
    /// Move the BDA back to its IN position
    OpenBeam {
        /// BDA IN position [µm]
        #[arg(allow_negative_numbers = true)]
        bda: f64,
    },
    /// Switch the XZTP motion mode
    MotionMode {
        /// Motion mode
        mode: MotionMode,
    },
    /// Use the requested X/Y position as the scan center
    SetXyCenter,
    /// Center both piezos and wait for the XZTP stage
    CenterPiezo,
    /// Check a motor against its requested position
    InPosition {
        /// Axis prefix, e.g. `x_center`
        axis: String,
        /// Allowed difference between actual and requested position
        #[arg(long, default_value_t = 0.1)]
        tolerance: f64,
    },
    /// Write PVs, e.g. `put x_updatecenter=12.5 y_updatecenter=-3`
    Put {
        /// KEY=VALUE assignments, applied in order
        #[arg(required = true, value_parser = parse_assignment, allow_hyphen_values = true)]
        assignments: Vec<(String, PvValue)>,
    },
    /// Print the file name of the next scan
    NextScan,
    /// Print the user directory derived from the scan record PVs
    UserDir,
    /// List available backends
    Backends,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RotationStage {
    /// Tomography rotation (CT)
    Tomo,
    /// Sample rotation (ST)
    Sample,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MotionMode {
    /// X and Y in combined coarse + piezo motion
    XyCombined,
    /// X in combined coarse + piezo motion
    XCombined,
    /// X in piezo-only motion
    XPiezo,
}

/// Errors raised by the command-line layer itself.
#[derive(Debug, Error)]
enum CliError {
    /// Explicit config file does not exist.
    #[error("Configuration file not found: {0:?}")]
    ConfigMissing(PathBuf),

    /// Config file exists but could not be used.
    #[error("Failed to load {path:?}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    /// `--every` must be a positive number of seconds.
    #[error("Invalid interval: {0}")]
    Interval(f64),
}

fn parse_assignment(s: &str) -> Result<(String, PvValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let Ok(value) = value.trim().parse::<PvValue>();
    Ok((key.to_string(), value))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("bnp_pvcomm failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = load_session(&args);
    let level = if args.verbose {
        Level::DEBUG
    } else {
        loaded
            .as_ref()
            .map(|(config, _)| config.shared.log_level.into())
            .unwrap_or(Level::INFO)
    };
    setup_tracing(level, args.json);

    info!("BNP PV communication v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Command::Backends = args.command {
        let names = BackendRegistry::with_builtin().list_backends();
        if args.json {
            println!("{}", json!(names));
        } else {
            for name in names {
                println!("{name}");
            }
        }
        return Ok(0);
    }

    let (config, base_dir) = loaded?;
    let mut comm = open_session(config, &base_dir, args.json)?;
    let result = execute(&mut comm, &args.command, args.json, &mut std::io::stdout());
    let closed = comm.close();
    let code = result?;
    closed?;
    Ok(code)
}

/// Connect the configured backend and open the status log.
///
/// In JSON mode the status log is not echoed to stdout.
fn open_session(
    config: SessionConfig,
    base_dir: &Path,
    json: bool,
) -> Result<PvComm, Box<dyn std::error::Error>> {
    let registry = config.registry(base_dir)?;
    let backend = BackendRegistry::with_builtin().create_backend(&config.backend)?;
    info!("Using {} backend", backend.name());
    Ok(PvComm::new(config, registry, backend)?.with_echo(!json))
}

/// Load the session config and apply command-line overrides.
///
/// Returns the config together with the directory relative paths in it
/// resolve against.
fn load_session(args: &Args) -> Result<(SessionConfig, PathBuf), CliError> {
    let path = match &args.config {
        Some(path) if !path.exists() => return Err(CliError::ConfigMissing(path.clone())),
        Some(path) => Some(path.clone()),
        None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|p| p.exists()),
    };

    let (mut config, base_dir) = match path {
        Some(path) => {
            let config = SessionConfig::load(&path).map_err(|source| CliError::Config {
                path: path.clone(),
                source,
            })?;
            let base_dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."))
                .to_path_buf();
            (config, base_dir)
        }
        None => (SessionConfig::default(), PathBuf::from(".")),
    };

    // Paths from the file are relative to it; command-line paths to the cwd.
    config.state_file = config.state_file_path(&base_dir);
    config.user_dir = config.user_dir.take().map(|dir| base_dir.join(dir));

    if args.simulate {
        config.backend = "simulation".to_string();
    } else if let Some(backend) = &args.backend {
        config.backend = backend.clone();
    }
    if let Some(dir) = &args.user_dir {
        config.user_dir = Some(dir.clone());
    }
    if let Some(name) = &args.log_file {
        config.log_file = name.clone();
    }
    if let Some(file) = &args.state_file {
        config.state_file = Some(file.clone());
    }

    Ok((config, base_dir))
}

/// Run one subcommand against an open session.
fn execute(
    comm: &mut PvComm,
    command: &Command,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32, Box<dyn std::error::Error>> {
    match command {
        Command::Status { key: Some(key) } => {
            let value = comm.get_string(key)?;
            if json {
                writeln!(out, "{}", json!({ "key": key, "value": value }))?;
            } else {
                writeln!(out, "{value}")?;
            }
        }
        Command::Status { key: None } => {
            let rows = comm.snapshot();
            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&rows)?)?;
            } else {
                for row in &rows {
                    let shown = match (&row.value, &row.error) {
                        (Some(v), _) => v.clone(),
                        (None, Some(e)) => format!("<{e}>"),
                        (None, None) => String::new(),
                    };
                    writeln!(out, "{:<18} {:<42} {}", row.key, row.channel, shown)?;
                }
            }
        }
        Command::Positions => {
            let bda = comm.bda_position()?;
            let sample = comm.sample_angle()?;
            let tomo = comm.tomo_angle()?;
            let [x, y, z] = comm.xyz_center()?;
            if json {
                writeln!(
                    out,
                    "{}",
                    json!({
                        "bda": bda,
                        "sample_angle": sample,
                        "tomo_angle": tomo,
                        "center": { "x": x, "y": y, "z": z },
                    })
                )?;
            } else {
                writeln!(out, "BDA:          {bda:.2}")?;
                writeln!(out, "Sample angle: {sample:.2}")?;
                writeln!(out, "Tomo angle:   {tomo:.2}")?;
                writeln!(out, "Center x/y/z: {x:.2} / {y:.2} / {z:.2}")?;
            }
        }
        Command::Pause => comm.scan_pause()?,
        Command::Resume => comm.scan_resume()?,
        Command::Abort => comm.scan_abort()?,
        Command::ResetDetector => {
            let outcome = comm.reset_detector()?;
            report(out, json, "reset_detector", &outcome, outcome.code())?;
            if outcome == ResetOutcome::Failed {
                return Ok(EXIT_CHECK_FAILED);
            }
        }
        Command::DetectorIdle => {
            let idle = comm.detector_idle()?;
            report(out, json, "detector_idle", &idle, i32::from(idle))?;
            if !idle {
                return Ok(EXIT_CHECK_FAILED);
            }
        }
        Command::LogTemps { every: None } => comm.log_cryo_temps()?,
        Command::LogTemps { every: Some(secs) } => log_temps_until_interrupted(comm, *secs)?,
        Command::Rotate { stage, theta } => match stage {
            RotationStage::Tomo => comm.change_tomo_rotation(*theta)?,
            RotationStage::Sample => comm.change_sample_rotation(*theta)?,
        },
        Command::BlockBeam { bda } => {
            comm.block_beam_bda(*bda)?;
        }
        Command::OpenBeam { bda } => comm.open_beam_bda(*bda)?,
        Command::MotionMode { mode } => match mode {
            MotionMode::XyCombined => comm.xy_combined_mode()?,
            MotionMode::XCombined => comm.x_combined_mode()?,
            MotionMode::XPiezo => comm.x_piezo_mode()?,
        },
        Command::SetXyCenter => {
            comm.set_xy_center()?;
        }
        Command::CenterPiezo => {
            let outcome = comm.center_piezo_xy()?;
            report(out, json, "center_piezo", &outcome, outcome.code())?;
            if outcome == WaitOutcome::TimedOut {
                return Ok(EXIT_CHECK_FAILED);
            }
        }
        Command::InPosition { axis, tolerance } => {
            let in_position = comm.motor_in_position(axis, *tolerance)?;
            report(out, json, "in_position", &in_position, i32::from(in_position))?;
            if !in_position {
                return Ok(EXIT_CHECK_FAILED);
            }
        }
        Command::Put { assignments } => comm.assign_pvs(assignments)?,
        Command::NextScan => {
            let name = comm.next_scan_name()?;
            if json {
                writeln!(out, "{}", json!({ "next_scan": name }))?;
            } else {
                writeln!(out, "{name}")?;
            }
        }
        Command::UserDir => {
            let dir = comm.user_dir()?;
            if json {
                writeln!(out, "{}", json!({ "user_dir": dir }))?;
            } else {
                writeln!(out, "{}", dir.display())?;
            }
        }
        Command::Backends => {}
    }
    Ok(0)
}

/// Print a check result as text or JSON.
fn report<T: std::fmt::Display + serde::Serialize>(
    out: &mut dyn Write,
    json: bool,
    check: &str,
    result: &T,
    code: i32,
) -> std::io::Result<()> {
    if json {
        writeln!(out, "{}", json!({ "check": check, "result": result, "code": code }))
    } else {
        writeln!(out, "{check}: {result}")
    }
}

/// Log cryostat temperatures every `secs` seconds until Ctrl-C.
fn log_temps_until_interrupted(
    comm: &mut PvComm,
    secs: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(CliError::Interval(secs).into());
    }
    let period = Duration::from_secs_f64(secs);

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        flag.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        comm.log_cryo_temps()?;
        let next = Instant::now() + period;
        while running.load(Ordering::SeqCst) && Instant::now() < next {
            std::thread::sleep(INTERRUPT_POLL.min(next.saturating_duration_since(Instant::now())));
        }
    }
    info!("Temperature logging stopped");
    Ok(())
}

/// Setup tracing subscriber. Output goes to stderr so command results on
/// stdout stay machine-readable.
fn setup_tracing(level: Level, json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
