//! State persistence for the simulation backend.
//!
//! Lets consecutive CLI invocations against the simulator see each
//! other's writes. State is persisted using bincode.

use bnp_common::pv::backend::PvError;
use bnp_common::pv::value::PvValue;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persisted value of a single PV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedPv {
    /// Logical key (for matching on load)
    pub key: String,
    /// Last value
    pub value: PvValue,
}

/// Persisted state for the whole store.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PersistedState {
    /// Version of state format (for migration)
    pub version: u32,
    /// PV values
    pub values: Vec<PersistedPv>,
    /// Timestamp of last save (Unix epoch seconds)
    pub saved_at: u64,
}

impl PersistedState {
    /// Current state format version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Build a state from `(key, value)` pairs.
    pub fn from_values(values: Vec<(String, PvValue)>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            values: values
                .into_iter()
                .map(|(key, value)| PersistedPv { key, value })
                .collect(),
            saved_at: 0,
        }
    }
}

/// State persistence manager.
pub struct StatePersistence {
    /// Path to state file
    path: PathBuf,
}

impl StatePersistence {
    /// Create a new persistence manager.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Save state to file.
    pub fn save(&self, state: &PersistedState) -> Result<(), PvError> {
        debug!("Saving simulation state to {:?}", self.path);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    PvError::Persistence(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        let mut state = state.clone();
        state.saved_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let file = File::create(&self.path).map_err(|e| {
            PvError::Persistence(format!("Failed to create state file: {}", e))
        })?;

        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, &state).map_err(|e| {
            PvError::Persistence(format!("Failed to serialize state: {}", e))
        })?;

        info!(
            "Saved {} simulated PV values to {:?}",
            state.values.len(),
            self.path
        );
        Ok(())
    }

    /// Load state from file. `Ok(None)` when there is nothing usable.
    pub fn load(&self) -> Result<Option<PersistedState>, PvError> {
        debug!("Loading simulation state from {:?}", self.path);

        if !self.path.exists() {
            debug!("State file does not exist, starting fresh");
            return Ok(None);
        }

        let file = File::open(&self.path).map_err(|e| {
            PvError::Persistence(format!("Failed to open state file: {}", e))
        })?;

        let reader = BufReader::new(file);
        let state: PersistedState = bincode::deserialize_from(reader).map_err(|e| {
            warn!("Failed to deserialize state file, starting fresh: {}", e);
            PvError::Persistence(format!("Failed to deserialize state: {}", e))
        })?;

        if state.version != PersistedState::CURRENT_VERSION {
            warn!(
                "State file version {} differs from current {}, starting fresh",
                state.version,
                PersistedState::CURRENT_VERSION
            );
            return Ok(None);
        }

        info!(
            "Loaded {} simulated PV values from {:?} (saved at {})",
            state.values.len(),
            self.path,
            state.saved_at
        );
        Ok(Some(state))
    }

    /// Delete state file.
    pub fn delete(&self) -> Result<(), PvError> {
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                PvError::Persistence(format!("Failed to delete state file: {}", e))
            })?;
            info!("Deleted state file {:?}", self.path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_persistence_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sim_state.bin");
        let persistence = StatePersistence::new(&path);

        let state = PersistedState::from_values(vec![
            ("BDA_pos".to_string(), PvValue::Double(-1750.0)),
            ("nextsc".to_string(), PvValue::Long(42)),
            ("basename".to_string(), PvValue::Text("bnp_fly".to_string())),
        ]);

        persistence.save(&state).unwrap();
        assert!(path.exists());

        let loaded = persistence.load().unwrap().unwrap();
        assert_eq!(loaded.version, PersistedState::CURRENT_VERSION);
        assert_eq!(loaded.values, state.values);
        assert!(loaded.saved_at > 0);

        persistence.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_persistence_load_missing() {
        let dir = tempdir().unwrap();
        let persistence = StatePersistence::new(dir.path().join("nonexistent.bin"));
        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_version_mismatch_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.bin");
        let persistence = StatePersistence::new(&path);

        let mut state = PersistedState::from_values(vec![]);
        state.version = 0;
        persistence.save(&state).unwrap();

        assert!(persistence.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("corrupt.bin");
        fs::write(&path, [0xffu8; 3]).unwrap();
        assert!(matches!(
            StatePersistence::new(&path).load(),
            Err(PvError::Persistence(_))
        ));
    }
}
