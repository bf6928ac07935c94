//! `PvComm` integration tests against the simulation backend.
//!
//! Each test opens a session in a temp directory with shortened timing
//! budgets and checks the PV writes and status log lines of one operation.

use bnp_common::pv::defaults::builtin_table;
use bnp_common::prelude::*;
use bnp_pvcomm::status_log::TIMESTAMP_FORMAT;
use bnp_pvcomm::{BackendRegistry, PvComm, ResetOutcome, WaitOutcome};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Session config writing the log into `dir`, with test-sized timings.
fn fast_config(dir: &Path) -> SessionConfig {
    SessionConfig {
        user_dir: Some(dir.to_path_buf()),
        timing: TimingConfig {
            piezo_ready_timeout_ms: 1500,
            piezo_poll_interval_ms: 20,
            netcdf_save_delay_ms: 5,
            detector_settle_ms: 100,
            put_callback_timeout_ms: 1000,
        },
        ..SessionConfig::default()
    }
}

fn open_with(config: SessionConfig, table: &PvTableConfig) -> PvComm {
    let registry = PvRegistry::from_config(table).unwrap();
    let backend = BackendRegistry::with_builtin()
        .create_backend(&config.backend)
        .unwrap();
    PvComm::new(config, registry, backend)
        .unwrap()
        .with_echo(false)
}

fn open(dir: &TempDir, table: &PvTableConfig) -> PvComm {
    open_with(fast_config(dir.path()), table)
}

fn set_initial(table: &mut PvTableConfig, key: &str, value: impl Into<toml::Value>) {
    table.points.get_mut(key).unwrap().initial = Some(value.into());
}

fn log_content(comm: &PvComm) -> String {
    fs::read_to_string(comm.log_path()).unwrap()
}

// ─── Positions ──────────────────────────────────────────────────────

#[test]
fn positions_are_rounded_to_two_decimals() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    set_initial(&mut table, "BDA_pos", -1250.456);
    set_initial(&mut table, "sm_rot_Act", 12.3456);
    set_initial(&mut table, "tomo_rot_Act", 179.999);
    set_initial(&mut table, "x_center_Act", 1.004);
    set_initial(&mut table, "y_center_Act", -2.006);
    set_initial(&mut table, "z_value_Act", 30_i64);
    let mut comm = open(&dir, &table);

    assert_eq!(comm.bda_position().unwrap(), -1250.46);
    assert_eq!(comm.sample_angle().unwrap(), 12.35);
    assert_eq!(comm.tomo_angle().unwrap(), 180.0);
    assert_eq!(comm.xyz_center().unwrap(), [1.0, -2.01, 30.0]);
}

#[test]
fn non_numeric_position_is_a_type_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    set_initial(&mut table, "BDA_pos", "disconnected");
    let mut comm = open(&dir, &table);

    assert!(matches!(
        comm.bda_position(),
        Err(PvError::TypeMismatch { key, .. }) if key == "BDA_pos"
    ));
}

#[test]
fn user_dir_is_derived_from_scan_record() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    set_initial(&mut table, "subdir", "2026-3/smith/mda");

    let mut config = fast_config(dir.path());
    config.user_dir = None;
    config.path_rewrites = vec![PathRewrite {
        from: "//micdata/data1".to_string(),
        to: dir.path().to_string_lossy().into_owned(),
    }];
    let mut comm = open_with(config, &table);

    let expected = dir.path().join("bnp").join("2026-3").join("smith");
    assert_eq!(comm.session_dir(), expected.as_path());
    assert_eq!(comm.user_dir().unwrap(), expected);
    assert!(comm.log_path().starts_with(&expected));
    assert!(comm.log_path().exists());
}

#[test]
fn next_scan_name_is_zero_padded() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    assert_eq!(comm.next_scan_name().unwrap(), "bnp_fly0001.mda");
    comm.assign_pv("nextsc", PvValue::Long(42)).unwrap();
    assert_eq!(comm.next_scan_name().unwrap(), "bnp_fly0042.mda");
}

// ─── Registry enforcement ───────────────────────────────────────────

#[test]
fn unknown_pv_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    assert!(matches!(comm.get("BDA_pox"), Err(PvError::UnknownPv(k)) if k == "BDA_pox"));
    assert!(matches!(
        comm.assign_pv("no_such_pv", PvValue::Double(1.0)),
        Err(PvError::UnknownPv(_))
    ));
    assert!(matches!(
        comm.motor_in_position("w_center", 0.1),
        Err(PvError::UnknownPv(_))
    ));
}

#[test]
fn status_pvs_cannot_be_assigned() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    assert!(matches!(
        comm.assign_pv("mcs_status", PvValue::Long(1)),
        Err(PvError::ReadOnly(_))
    ));
}

// ─── Status log ─────────────────────────────────────────────────────

#[test]
fn cryo_temperatures_are_logged_on_one_line() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());
    comm.log_cryo_temps().unwrap();

    let content = log_content(&comm);
    let line = content.lines().last().unwrap();
    let (ts, msg) = line.split_at(19);
    assert!(chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok());
    assert_eq!(
        msg,
        ": CryoCon1:In_1: 92.41, CryoCon1:In_2: 88.07, CryoCon1:In_3: 101.36, \
         CryoCon3:In_2: 95.12, CryoCon3:Loop_2: 95.00"
    );
}

#[test]
fn log_appends_across_sessions() {
    let dir = TempDir::new().unwrap();

    let mut first = open(&dir, &builtin_table());
    first.log_line("first session").unwrap();
    first.close().unwrap();

    let mut second = open(&dir, &builtin_table());
    second.log("verbatim\n").unwrap();

    let content = log_content(&second);
    assert!(content.contains(": first session\n"));
    assert!(content.ends_with("verbatim\n"));
}

// ─── Beam-defining aperture ─────────────────────────────────────────

#[test]
fn block_and_open_beam() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());
    let bda_in = comm.bda_position().unwrap();

    let blocked = comm.block_beam_bda(bda_in).unwrap();
    assert_eq!(blocked, bda_in - 500.0);
    assert_eq!(comm.bda_position().unwrap(), -1750.0);

    comm.open_beam_bda(bda_in).unwrap();
    assert_eq!(comm.bda_position().unwrap(), -1250.0);

    let content = log_content(&comm);
    assert!(content.contains(": Move BDA to block position at: -1750.000\n"));
    assert!(content.contains(": Move BDA to open position at: -1250.000\n"));
}

#[test]
fn block_offset_is_configurable() {
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(dir.path());
    config.beam.bda_block_offset = 250.0;
    let mut comm = open_with(config, &builtin_table());

    assert_eq!(comm.block_beam_bda(-1000.0).unwrap(), -1250.0);
}

// ─── Scan control ───────────────────────────────────────────────────

#[test]
fn pause_resume_abort() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    comm.scan_pause().unwrap();
    assert_eq!(comm.get("wait").unwrap(), PvValue::Long(1));
    comm.scan_resume().unwrap();
    assert_eq!(comm.get("wait").unwrap(), PvValue::Long(0));
    comm.scan_abort().unwrap();
    assert_eq!(comm.get("abort").unwrap(), PvValue::Long(1));
}

#[test]
fn rotations_log_from_and_to() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    comm.change_tomo_rotation(90.0).unwrap();
    comm.change_sample_rotation(-15.5).unwrap();
    assert_eq!(comm.tomo_angle().unwrap(), 90.0);
    assert_eq!(comm.sample_angle().unwrap(), -15.5);

    let content = log_content(&comm);
    assert!(content.contains(": Changing tomo rotation angle from 0.00 to 90.00\n"));
    assert!(content.contains(": Changing sample rotation angle from 0.00 to -15.50\n"));
}

// ─── Detectors ──────────────────────────────────────────────────────

/// Table with both detectors acquiring and netCDF writing.
fn hung_detector_table() -> PvTableConfig {
    let mut table = builtin_table();
    set_initial(&mut table, "mcs_status", 1_i64);
    set_initial(&mut table, "xmap_status", 1_i64);
    set_initial(&mut table, "netCDF_status", 1_i64);
    set_initial(&mut table, "wait", 1_i64);
    table
}

#[test]
fn detector_idle_requires_both_detectors_idle() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());
    assert!(comm.detector_idle().unwrap());

    let mut table = builtin_table();
    set_initial(&mut table, "xmap_status", 1_i64);
    let mut comm = open(&dir, &table);
    assert!(!comm.detector_idle().unwrap());
}

#[test]
fn reset_recovers_when_stops_take_effect() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &hung_detector_table());

    let outcome = comm.reset_detector().unwrap();
    assert_eq!(outcome, ResetOutcome::Recovered);
    assert_eq!(outcome.code(), 1);

    // netCDF was writing, so its data was saved and capture stopped.
    assert_eq!(comm.get("netCDF_save").unwrap(), PvValue::Long(1));
    assert_eq!(comm.get("netCDF_stp").unwrap(), PvValue::Long(1));
    assert_eq!(comm.get_string("netCDF_status").unwrap(), "Done");
    // Scan resumed.
    assert_eq!(comm.get("wait").unwrap(), PvValue::Long(0));
}

#[test]
fn reset_fails_when_a_detector_keeps_acquiring() {
    let dir = TempDir::new().unwrap();
    let mut table = hung_detector_table();
    set_initial(&mut table, "netCDF_status", 0_i64);
    table.links.retain(|l| l.trigger != "mcs_stp");
    let mut comm = open(&dir, &table);

    let outcome = comm.reset_detector().unwrap();
    assert_eq!(outcome, ResetOutcome::Failed);
    assert_eq!(outcome.code(), -1);

    // netCDF was idle: no save.
    assert_eq!(comm.get("netCDF_save").unwrap(), PvValue::Long(0));
    assert_eq!(comm.get("mcs_stp").unwrap(), PvValue::Long(1));
    assert_eq!(comm.get("xmap_stp").unwrap(), PvValue::Long(1));
    // Scan left paused.
    assert_eq!(comm.get("wait").unwrap(), PvValue::Long(1));
}

// ─── XZTP stage ─────────────────────────────────────────────────────

#[test]
fn motion_modes() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    comm.x_piezo_mode().unwrap();
    assert_eq!(comm.get_string("x_motorMode").unwrap(), "Piezo");
    assert_eq!(comm.get_string("y_motorMode").unwrap(), "Combined");

    comm.x_combined_mode().unwrap();
    assert_eq!(comm.get("x_motorMode").unwrap(), PvValue::Long(0));

    comm.x_piezo_mode().unwrap();
    comm.xy_combined_mode().unwrap();
    assert_eq!(comm.get("x_motorMode").unwrap(), PvValue::Long(0));
    assert_eq!(comm.get("y_motorMode").unwrap(), PvValue::Long(0));

    let content = log_content(&comm);
    assert!(content.contains(": Changing X scan mode to Piezo only\n"));
    assert!(content.contains(": Changing XY scan mode to combined motion\n"));
}

#[test]
fn set_xy_center_copies_rounded_request_positions() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    set_initial(&mut table, "x_center_Rqs", 12.3456);
    set_initial(&mut table, "y_center_Rqs", -3.14159);
    let mut comm = open(&dir, &table);

    let (x, y) = comm.set_xy_center().unwrap();
    assert_eq!((x, y), (12.3456, -3.14159));
    assert_eq!(comm.get("x_updatecenter").unwrap(), PvValue::Double(12.35));
    assert_eq!(comm.get("y_updatecenter").unwrap(), PvValue::Double(-3.14));

    let content = log_content(&comm);
    assert!(content.contains(": X_center value: 12.35\n"));
    assert!(content.contains(": Y_center value: -3.14\n"));
}

#[test]
fn rounding_ties_go_to_even() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    set_initial(&mut table, "BDA_pos", -1250.125);
    set_initial(&mut table, "x_center_Rqs", 12.125);
    set_initial(&mut table, "y_center_Rqs", -0.375);
    let mut comm = open(&dir, &table);

    assert_eq!(comm.bda_position().unwrap(), -1250.12);
    comm.set_xy_center().unwrap();
    assert_eq!(comm.get("x_updatecenter").unwrap(), PvValue::Double(12.12));
    assert_eq!(comm.get("y_updatecenter").unwrap(), PvValue::Double(-0.38));
}

#[test]
fn center_piezo_waits_until_ready() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());
    assert!(comm.xztp_motor_ready().unwrap());

    let outcome = comm.center_piezo_xy().unwrap();
    assert_eq!(outcome, WaitOutcome::Ready);
    assert_eq!(outcome.code(), 1);
    assert!(comm.xztp_motor_ready().unwrap());
    assert_eq!(comm.get("x_piezo_val").unwrap(), PvValue::Double(0.0));

    let content = log_content(&comm);
    assert!(content.contains(": Centering piezoX and piezoY.\n"));
    assert!(content.contains(": Piezo xcenter value: 3.20\n"));
    assert!(content.contains(": Waiting for XZTP to be ready.\n"));
}

#[test]
fn center_piezo_times_out_when_stage_never_settles() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    // Stage goes "Not Ready" and stays there.
    table
        .links
        .retain(|l| !(l.target == "xztp_motor_ready" && l.delay_ms > 0));
    let mut config = fast_config(dir.path());
    config.timing.piezo_ready_timeout_ms = 100;
    let mut comm = open_with(config, &table);

    let outcome = comm.center_piezo_xy().unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert_eq!(outcome.code(), 0);
    assert_eq!(comm.get_string("xztp_motor_ready").unwrap(), "Not Ready");
}

#[test]
fn motor_in_position_uses_tolerance() {
    let dir = TempDir::new().unwrap();
    let mut table = builtin_table();
    set_initial(&mut table, "x_center_Act", 10.0);
    set_initial(&mut table, "x_center_Rqs", 10.05);
    let mut comm = open(&dir, &table);

    assert!(comm.motor_in_position("x_center", 0.1).unwrap());
    assert!(!comm.motor_in_position("x_center", 0.01).unwrap());

    let content = log_content(&comm);
    assert!(content.contains(": x_center motor is in position with value 10.00\n"));
    assert!(content.contains(": x_center motor not in position, current: 10.00, request: 10.05\n"));
}

// ─── Bulk writes ────────────────────────────────────────────────────

#[test]
fn assign_pvs_writes_in_order_and_logs_each() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    comm.assign_pvs(&[
        ("x_updatecenter", PvValue::Double(1.5)),
        ("y_updatecenter", PvValue::Long(-2)),
    ])
    .unwrap();

    assert_eq!(comm.get("x_updatecenter").unwrap(), PvValue::Double(1.5));
    assert_eq!(comm.get("y_updatecenter").unwrap(), PvValue::Long(-2));
    let content = log_content(&comm);
    let x = content.find(": Change x_updatecenter to 1.500\n").unwrap();
    let y = content.find(": Change y_updatecenter to -2.000\n").unwrap();
    assert!(x < y);
}

#[test]
fn assign_pvs_with_unknown_key_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    let result = comm.assign_pvs(&[
        ("x_updatecenter", PvValue::Double(1.5)),
        ("z_updatecenter", PvValue::Double(2.5)),
    ]);
    assert!(matches!(result, Err(PvError::UnknownPv(k)) if k == "z_updatecenter"));
    assert_eq!(comm.get("x_updatecenter").unwrap(), PvValue::Long(0));
}

#[test]
fn scan_init_banner() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    comm.write_scan_init(
        "fly",
        "Cell A, cryo",
        &[
            ("width".to_string(), PvValue::Double(20.0)),
            ("points".to_string(), PvValue::Long(200)),
        ],
    )
    .unwrap();

    let content = log_content(&comm);
    let rule = "#".repeat(20);
    assert!(content.starts_with(&format!("{rule} Initiating scan bnp_fly0001.mda {rule}\n")));
    assert!(content.contains("\nSample info: Cell A, cryo\n"));
    assert!(content.contains(": Setting up scan using fly mode.\n"));
    assert!(content.ends_with(": {width: 20, points: 200}\n\n"));
}

// ─── Session ────────────────────────────────────────────────────────

#[test]
fn snapshot_reads_every_pv() {
    let dir = TempDir::new().unwrap();
    let mut comm = open(&dir, &builtin_table());

    let rows = comm.snapshot();
    assert_eq!(rows.len(), comm.registry().len());
    assert!(rows.iter().all(|r| r.error.is_none()));

    let ready = rows.iter().find(|r| r.key == "xztp_motor_ready").unwrap();
    assert_eq!(ready.channel, "9idbTAU:SM:Ps:Ready");
    assert_eq!(ready.value.as_deref(), Some("Ready"));
}

#[test]
fn simulated_state_persists_between_sessions() {
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(dir.path());
    config.state_file = Some(dir.path().join("sim_state.bin"));

    let mut first = open_with(config.clone(), &builtin_table());
    first.assign_pv("nextsc", PvValue::Long(7)).unwrap();
    first.block_beam_bda(-1250.0).unwrap();
    first.close().unwrap();

    let mut second = open_with(config, &builtin_table());
    assert_eq!(second.next_scan_name().unwrap(), "bnp_fly0007.mda");
    assert_eq!(second.bda_position().unwrap(), -1750.0);
}

#[test]
fn invalid_config_is_rejected_before_connecting() {
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(dir.path());
    config.timing.piezo_poll_interval_ms = 0;
    let registry = PvRegistry::builtin().unwrap();
    let backend = BackendRegistry::with_builtin()
        .create_backend("simulation")
        .unwrap();

    assert!(matches!(
        PvComm::new(config, registry, backend),
        Err(PvError::Config(_))
    ));
}

#[test]
fn ca_tools_without_epics_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let mut config = fast_config(dir.path());
    config.backend = "ca_tools".to_string();
    let settings: toml::Table = toml::from_str(
        r#"
caget = "/nonexistent/epics/bin/caget"
caput = "/nonexistent/epics/bin/caput"
"#,
    )
    .unwrap();
    config
        .backend_config
        .insert("ca_tools".to_string(), toml::Value::Table(settings));

    let mut comm = open_with(config, &builtin_table());
    assert_eq!(comm.backend_name(), "ca_tools");
    assert!(matches!(
        comm.bda_position(),
        Err(PvError::BackendUnavailable(_))
    ));
    assert!(matches!(
        comm.scan_pause(),
        Err(PvError::BackendUnavailable(_))
    ));

    let rows = comm.snapshot();
    assert!(rows.iter().all(|r| r.value.is_none() && r.error.is_some()));
}
