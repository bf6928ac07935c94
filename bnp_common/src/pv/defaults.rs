//! Built-in PV table for the 9-ID-B Bionanoprobe.
//!
//! Used when no `pvs.toml` is configured. Simulation initial values and
//! links make the table usable with the simulation backend out of the box.

use super::config::{PvPoint, PvTableConfig};
use super::kind::PvKind;

/// Keys every `PvComm` operation relies on. A table missing any of them
/// is rejected at registry construction.
pub const REQUIRED_KEYS: &[&str] = &[
    "filesys",
    "subdir",
    "basename",
    "nextsc",
    "BDA_pos",
    "sm_rot_Act",
    "tomo_rot_Act",
    "wait",
    "abort",
    "netCDF_status",
    "netCDF_save",
    "netCDF_stp",
    "mcs_stp",
    "xmap_stp",
    "mcs_status",
    "xmap_status",
    "CryoCon1:In_1",
    "CryoCon1:In_2",
    "CryoCon1:In_3",
    "CryoCon3:In_2",
    "CryoCon3:Loop_2",
    "x_motorMode",
    "y_motorMode",
    "x_center_Rqs",
    "y_center_Rqs",
    "x_center_Act",
    "y_center_Act",
    "z_value_Act",
    "x_updatecenter",
    "y_updatecenter",
    "xztp_motor_ready",
    "piezo_xCenter",
    "piezo_yCenter",
    "x_piezo_val",
    "y_piezo_val",
];

/// Simulated detector stop latency [ms].
const SIM_STOP_DELAY_MS: u64 = 50;

/// Simulated XZTP settle time after piezo centering [ms].
const SIM_PIEZO_SETTLE_MS: u64 = 600;

/// Build the default BNP PV table.
pub fn builtin_table() -> PvTableConfig {
    use PvKind::{Command, Motor, Status, Value};

    let mut t = PvTableConfig::default();

    // ── Scan record / file saving ──
    t.insert(
        "filesys",
        PvPoint::new("9idbBNP:saveData_fileSystem", Value).with_initial("//micdata/data1/bnp"),
    );
    t.insert(
        "subdir",
        PvPoint::new("9idbBNP:saveData_subDir", Value).with_initial("2026-3/commissioning/mda"),
    );
    t.insert(
        "basename",
        PvPoint::new("9idbBNP:saveData_baseName", Value).with_initial("bnp_fly"),
    );
    t.insert(
        "nextsc",
        PvPoint::new("9idbBNP:saveData_scanNumber", Value).with_initial(1_i64),
    );
    t.insert(
        "wait",
        PvPoint::new("9idbBNP:scan2.WAIT", Value).with_description("Outer scan wait counter"),
    );
    t.insert("abort", PvPoint::new("9idbBNP:AbortScans.PROC", Command));
    t.insert("x_updatecenter", PvPoint::new("9idbBNP:scan1.P1CP", Value));
    t.insert("y_updatecenter", PvPoint::new("9idbBNP:scan2.P1CP", Value));

    // ── Motors ──
    t.insert(
        "BDA_pos",
        PvPoint::new("9idbTAU:UA:UX:RqsPos", Motor)
            .with_initial(-1250.0)
            .with_description("Beam-defining aperture X"),
    );
    t.insert("sm_rot_Act", PvPoint::new("9idbTAU:SM:ST:ActPos", Motor));
    t.insert("tomo_rot_Act", PvPoint::new("9idbTAU:SM:CT:ActPos", Motor));
    t.insert("x_center_Rqs", PvPoint::new("9idbTAU:SM:PX:RqsPos", Motor));
    t.insert("y_center_Rqs", PvPoint::new("9idbTAU:SY:PY:RqsPos", Motor));
    t.insert("x_center_Act", PvPoint::new("9idbTAU:SM:PX:ActPos", Motor));
    t.insert("y_center_Act", PvPoint::new("9idbTAU:SY:PY:ActPos", Motor));
    t.insert("z_value_Act", PvPoint::new("9idbTAU:SM:PZ:ActPos", Motor));

    // ── XZTP stage ──
    let motion_states = ["Combined", "Coarse", "Piezo"];
    t.insert(
        "x_motorMode",
        PvPoint::new("9idbTAU:SM:Ps:xMotionChoice.VAL", Value).with_states(&motion_states),
    );
    t.insert(
        "y_motorMode",
        PvPoint::new("9idbTAU:SY:Ps:yMotionChoice.VAL", Value).with_states(&motion_states),
    );
    t.insert(
        "xztp_motor_ready",
        PvPoint::new("9idbTAU:SM:Ps:Ready", Status).with_states(&["Ready", "Not Ready"]),
    );
    t.insert("piezo_xCenter", PvPoint::new("9idbTAU:SM:Ps:xCenter.PROC", Command));
    t.insert("piezo_yCenter", PvPoint::new("9idbTAU:SY:Ps:yCenter.PROC", Command));
    t.insert(
        "x_piezo_val",
        PvPoint::new("9idbTAU:SM:Ps:xPiezo.VAL", Value).with_initial(3.2),
    );
    t.insert(
        "y_piezo_val",
        PvPoint::new("9idbTAU:SY:Ps:yPiezo.VAL", Value).with_initial(-1.7),
    );

    // ── Detectors ──
    t.insert(
        "netCDF_status",
        PvPoint::new("9idbXMAP:netCDF1:WriteFile_RBV", Status).with_states(&["Done", "Writing"]),
    );
    t.insert("netCDF_save", PvPoint::new("9idbXMAP:netCDF1:WriteFile", Command));
    t.insert("netCDF_stp", PvPoint::new("9idbXMAP:netCDF1:Capture", Command));
    t.insert("mcs_stp", PvPoint::new("9idbBNP:3820:StopAll", Command));
    t.insert("xmap_stp", PvPoint::new("9idbXMAP:StopAll", Command));
    let acquire_states = ["Done", "Acquiring"];
    t.insert(
        "mcs_status",
        PvPoint::new("9idbBNP:3820:Acquiring", Status).with_states(&acquire_states),
    );
    t.insert(
        "xmap_status",
        PvPoint::new("9idbXMAP:Acquiring", Status).with_states(&acquire_states),
    );

    // ── Cryostat ──
    for (key, channel, initial) in [
        ("CryoCon1:In_1", "9idbCRYO:CryoCon1:In_1:Temp.VAL", 92.41),
        ("CryoCon1:In_2", "9idbCRYO:CryoCon1:In_2:Temp.VAL", 88.07),
        ("CryoCon1:In_3", "9idbCRYO:CryoCon1:In_3:Temp.VAL", 101.36),
        ("CryoCon3:In_2", "9idbCRYO:CryoCon3:In_2:Temp.VAL", 95.12),
        ("CryoCon3:Loop_2", "9idbCRYO:CryoCon3:Loop_2:SetControl.VAL", 95.0),
    ] {
        t.insert(key, PvPoint::new(channel, Value).with_initial(initial));
    }

    // ── Simulation reactions ──
    t.link("netCDF_stp", "netCDF_status", 0_i64, SIM_STOP_DELAY_MS);
    t.link("mcs_stp", "mcs_status", 0_i64, SIM_STOP_DELAY_MS);
    t.link("xmap_stp", "xmap_status", 0_i64, SIM_STOP_DELAY_MS);
    t.link("piezo_xCenter", "xztp_motor_ready", 1_i64, 0);
    t.link("piezo_xCenter", "xztp_motor_ready", 0_i64, SIM_PIEZO_SETTLE_MS);
    t.link("piezo_xCenter", "x_piezo_val", 0.0, SIM_PIEZO_SETTLE_MS);
    t.link("piezo_yCenter", "y_piezo_val", 0.0, SIM_PIEZO_SETTLE_MS);

    t
}
