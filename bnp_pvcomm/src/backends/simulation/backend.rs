//! Simulation backend implementation.
//!
//! The `SimulationBackend` implements the `PvBackend` trait on top of an
//! in-memory [`PvStore`], so every `PvComm` operation can run without a
//! control system.

use super::state::{PersistedState, StatePersistence};
use super::store::PvStore;
use bnp_common::pv::backend::{BackendContext, BackendDiagnostics, PvBackend, PvError};
use bnp_common::pv::registry::PvBinding;
use bnp_common::pv::value::PvValue;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Simulation backend implementing the PvBackend trait.
pub struct SimulationBackend {
    /// Backend name
    name: &'static str,
    /// Backend version
    version: &'static str,
    /// PV store, `None` until connected
    store: Option<PvStore>,
    /// State persistence manager
    state_persistence: Option<StatePersistence>,
    /// Call counters
    diagnostics: BackendDiagnostics,
}

impl SimulationBackend {
    /// Create a new simulation backend instance.
    pub fn new() -> Self {
        Self {
            name: "simulation",
            version: env!("CARGO_PKG_VERSION"),
            store: None,
            state_persistence: None,
            diagnostics: BackendDiagnostics::default(),
        }
    }

    fn store(&mut self) -> Result<&mut PvStore, PvError> {
        self.store
            .as_mut()
            .ok_or_else(|| PvError::BackendUnavailable("simulation backend not connected".into()))
    }

    /// Restore store values from persisted data.
    fn restore_state(store: &mut PvStore, persisted: PersistedState) {
        let mut restored = 0usize;
        for pv in persisted.values {
            if store.restore(&pv.key, pv.value) {
                restored += 1;
            } else {
                debug!("Persisted PV {} is no longer in the table", pv.key);
            }
        }
        info!("Restored {} simulated PV values", restored);
    }

    /// Values as written by a client: enum labels become their index.
    fn coerce(pv: &PvBinding, value: &PvValue) -> PvValue {
        if let PvValue::Text(label) = value {
            if let Some(idx) = pv.states.iter().position(|s| s == label) {
                return PvValue::Long(idx as i64);
            }
        }
        value.clone()
    }

    fn write(&mut self, pv: &PvBinding, value: &PvValue) -> Result<(), PvError> {
        self.diagnostics.puts += 1;
        if !pv.kind.is_writable() {
            self.diagnostics.failures += 1;
            return Err(PvError::ReadOnly(pv.key.clone()));
        }
        let value = Self::coerce(pv, value);
        let now = Instant::now();
        if !self.store()?.write(&pv.key, value, now) {
            self.diagnostics.failures += 1;
            return Err(PvError::UnknownPv(pv.key.clone()));
        }
        Ok(())
    }

    fn read(&mut self, pv: &PvBinding) -> Result<PvValue, PvError> {
        self.diagnostics.gets += 1;
        let now = Instant::now();
        match self.store()?.read(&pv.key, now) {
            Some(value) => Ok(value),
            None => {
                self.diagnostics.failures += 1;
                Err(PvError::UnknownPv(pv.key.clone()))
            }
        }
    }
}

impl Default for SimulationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PvBackend for SimulationBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn version(&self) -> &'static str {
        self.version
    }

    fn connect(&mut self, ctx: &BackendContext<'_>) -> Result<(), PvError> {
        info!(
            "Connecting simulation backend with {} PVs, {} links",
            ctx.registry.len(),
            ctx.registry.links().len()
        );

        let mut store = PvStore::new(ctx.registry);

        if let Some(state_file) = ctx.state_file {
            let persistence = StatePersistence::new(state_file);
            match persistence.load() {
                Ok(Some(state)) => Self::restore_state(&mut store, state),
                Ok(None) => debug!("No persisted state found"),
                Err(e) => warn!("Failed to load persisted state: {}", e),
            }
            self.state_persistence = Some(persistence);
        }

        self.store = Some(store);
        Ok(())
    }

    fn get(&mut self, pv: &PvBinding) -> Result<PvValue, PvError> {
        self.read(pv)
    }

    fn get_string(&mut self, pv: &PvBinding) -> Result<String, PvError> {
        let value = self.read(pv)?;
        Ok(pv.render(&value))
    }

    fn put(&mut self, pv: &PvBinding, value: &PvValue) -> Result<(), PvError> {
        debug!("put {} ({}) = {}", pv.key, pv.channel, value);
        self.write(pv, value)
    }

    fn put_callback(
        &mut self,
        pv: &PvBinding,
        value: &PvValue,
        _timeout: Duration,
    ) -> Result<(), PvError> {
        // Simulated records complete as soon as they are written.
        debug!("put_callback {} ({}) = {}", pv.key, pv.channel, value);
        self.write(pv, value)
    }

    fn disconnect(&mut self) -> Result<(), PvError> {
        let Some(store) = self.store.take() else {
            return Ok(());
        };
        if let Some(persistence) = &self.state_persistence {
            persistence.save(&PersistedState::from_values(store.snapshot()))?;
        }
        info!(
            "Simulation backend disconnected ({} gets, {} puts)",
            self.diagnostics.gets, self.diagnostics.puts
        );
        Ok(())
    }

    fn diagnostics(&self) -> Option<BackendDiagnostics> {
        Some(self.diagnostics.clone())
    }
}
