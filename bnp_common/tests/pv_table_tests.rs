//! PV table and session config loading tests.
//!
//! Covers the shipped `config/` files, relative `pv_table` resolution,
//! and the error paths of `SessionConfig` loading.

use bnp_common::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn shipped_config_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../config")
}

#[test]
fn shipped_pv_table_matches_builtin() {
    let content = fs::read_to_string(shipped_config_dir().join("pvs.toml")).unwrap();
    let table = PvTableConfig::from_toml(&content).unwrap();
    let shipped = PvRegistry::from_config(&table).unwrap();
    let builtin = PvRegistry::builtin().unwrap();

    assert_eq!(shipped.len(), builtin.len());
    for binding in builtin.bindings() {
        let other = shipped.binding(&binding.key).unwrap();
        assert_eq!(other.channel, binding.channel, "channel of {}", binding.key);
        assert_eq!(other.kind, binding.kind, "kind of {}", binding.key);
        assert_eq!(other.states, binding.states, "states of {}", binding.key);
        assert_eq!(other.initial, binding.initial, "initial of {}", binding.key);
    }
    assert_eq!(shipped.links(), builtin.links());
}

#[test]
fn shipped_session_config_is_valid() {
    let path = shipped_config_dir().join("pvcomm.toml");
    let config = SessionConfig::load(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.backend, "simulation");
    assert_eq!(config.shared.log_level, LogLevel::Info);
    assert!(config.backend_config.contains_key("ca_tools"));

    let registry = config.registry(&shipped_config_dir()).unwrap();
    assert!(registry.contains("xztp_motor_ready"));
}

#[test]
fn relative_pv_table_resolves_against_base_dir() {
    let dir = TempDir::new().unwrap();
    let mut table = String::new();
    for key in bnp_common::pv::defaults::REQUIRED_KEYS {
        table.push_str(&format!(
            "[pv.\"{key}\"]\nchannel = \"TEST:{key}\"\n\n"
        ));
    }
    fs::write(dir.path().join("pvs.toml"), table).unwrap();

    let config = SessionConfig::from_toml_str("pv_table = \"pvs.toml\"").unwrap();
    let registry = config.registry(dir.path()).unwrap();
    assert_eq!(registry.binding("BDA_pos").unwrap().channel, "TEST:BDA_pos");
    assert_eq!(registry.binding("BDA_pos").unwrap().kind, PvKind::Value);
    assert!(registry.links().is_empty());
}

#[test]
fn pv_table_missing_required_key_is_a_validation_error() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("pvs.toml"),
        "[pv.BDA_pos]\nchannel = \"9idbTAU:UA:UX:RqsPos\"\n",
    )
    .unwrap();

    let config = SessionConfig::from_toml_str("pv_table = \"pvs.toml\"").unwrap();
    let err = config.registry(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("required PV")));
}

#[test]
fn pv_table_syntax_error_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("pvs.toml"), "[pv.BDA_pos\nchannel = ").unwrap();

    let config = SessionConfig::from_toml_str("pv_table = \"pvs.toml\"").unwrap();
    assert!(matches!(
        config.registry(dir.path()),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn session_config_file_not_found() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        SessionConfig::load(&dir.path().join("pvcomm.toml")),
        Err(ConfigError::FileNotFound)
    ));
}

#[test]
fn session_config_wrong_type_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pvcomm.toml");
    fs::write(&path, "[timing]\npiezo_ready_timeout_ms = \"five seconds\"\n").unwrap();
    assert!(matches!(
        SessionConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn shared_section_with_only_log_level() {
    let config = SessionConfig::from_toml_str("[shared]\nlog_level = \"debug\"\n").unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.shared.service_name, "bnp-pvcomm");
}

#[test]
fn state_file_resolves_against_base_dir() {
    let config = SessionConfig::from_toml_str("state_file = \"sim_state.bin\"").unwrap();
    assert_eq!(
        config.state_file_path(Path::new("/etc/bnp")),
        Some(PathBuf::from("/etc/bnp/sim_state.bin"))
    );
    assert_eq!(SessionConfig::default().state_file_path(Path::new("/etc/bnp")), None);
}
