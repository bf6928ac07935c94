//! Beamline-wide constants for the BNP workspace.
//!
//! Single source of truth for timing budgets, offsets and default paths.
//! Configuration may override the timing values; these are the defaults.

/// Default service name reported in logs.
pub const DEFAULT_SERVICE_NAME: &str = "bnp-pvcomm";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/bnp/pvcomm.toml";

/// Default status log file name, created inside the user directory.
pub const DEFAULT_LOG_FILE: &str = "log.txt";

/// Distance [µm] the BDA moves away from its IN position to block the beam.
pub const BDA_BLOCK_OFFSET: f64 = 500.0;

/// Wall-clock budget for the XZTP stage to report ready after piezo centering [ms].
pub const PIEZO_READY_TIMEOUT_MS: u64 = 5000;

/// Polling interval while waiting for the XZTP stage [ms].
pub const PIEZO_POLL_INTERVAL_MS: u64 = 200;

/// Delay between saving in-flight netCDF data and stopping capture [ms].
pub const NETCDF_SAVE_DELAY_MS: u64 = 100;

/// Delay after issuing detector stop commands before checking idle status [ms].
pub const DETECTOR_SETTLE_MS: u64 = 200;

/// Upper bound on a put-with-completion (motor moves, scan records) [ms].
pub const PUT_CALLBACK_TIMEOUT_MS: u64 = 60_000;

/// Number of decimals used when rounding positions for display.
pub const POSITION_DECIMALS: i32 = 2;

/// Motion choice value for combined coarse + piezo motion.
pub const MOTION_MODE_COMBINED: i64 = 0;

/// Motion choice value for piezo-only motion.
pub const MOTION_MODE_PIEZO: i64 = 2;

/// String reported by the XZTP ready PV when the stage is ready.
pub const XZTP_READY_LABEL: &str = "Ready";

/// String reported by the netCDF write status PV while a file is open.
pub const NETCDF_WRITING_LABEL: &str = "Writing";

/// Cryostat temperature PVs logged by `log_cryo_temps`, in log order.
pub const CRYO_TEMPERATURE_PVS: [&str; 5] = [
    "CryoCon1:In_1",
    "CryoCon1:In_2",
    "CryoCon1:In_3",
    "CryoCon3:In_2",
    "CryoCon3:Loop_2",
];

/// File system prefix as reported by the scan record's saveData PV.
pub const MICDATA_REMOTE_PREFIX: &str = "//micdata/data1";

/// Local mount point for [`MICDATA_REMOTE_PREFIX`].
pub const MICDATA_LOCAL_PREFIX: &str = "/mnt/micdata1";

/// Scan data file extension.
pub const SCAN_FILE_EXTENSION: &str = "mda";

/// Zero-padded width of the scan number in a scan file name.
pub const SCAN_NUMBER_WIDTH: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_constants_are_consistent() {
        assert!(PIEZO_POLL_INTERVAL_MS > 0);
        assert!(PIEZO_POLL_INTERVAL_MS < PIEZO_READY_TIMEOUT_MS);
        assert!(NETCDF_SAVE_DELAY_MS < DETECTOR_SETTLE_MS);
        assert!(PUT_CALLBACK_TIMEOUT_MS > PIEZO_READY_TIMEOUT_MS);
    }

    #[test]
    fn motion_modes_differ() {
        assert_ne!(MOTION_MODE_COMBINED, MOTION_MODE_PIEZO);
    }
}
