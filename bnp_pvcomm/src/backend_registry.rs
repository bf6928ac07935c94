//! Name → backend lookup.
//!
//! A session picks its backend by name, from `backend = "..."` in
//! `pvcomm.toml` or from `--backend` / `--simulate` on the command line.
//! The registry is built once at startup (usually [`BackendRegistry::with_builtin`])
//! and turns that name into a fresh, unconnected [`PvBackend`].

use bnp_common::pv::backend::{BackendFactory, PvBackend, PvError};
use std::collections::BTreeMap;
use tracing::debug;

use crate::backends;

/// Backend factories keyed by the name sessions select them with.
#[derive(Default)]
pub struct BackendRegistry {
    factories: BTreeMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    /// Registry without any backend, for sessions that bring their own.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `simulation` and `ca_tools`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        backends::register_builtin(&mut registry);
        registry
    }

    /// Make `factory` selectable as `name`.
    ///
    /// # Panics
    /// Panics if `name` is taken; two backends answering to one config
    /// value is a wiring bug.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        if self.factories.insert(name, factory).is_some() {
            panic!("Backend '{name}' is already registered");
        }
    }

    /// Whether a session config naming `name` can be opened.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build the backend a session config names. The backend is not
    /// connected yet; `PvComm::new` does that.
    ///
    /// # Errors
    /// `PvError::BackendNotFound` naming the unknown backend and the
    /// registered alternatives.
    pub fn create_backend(&self, name: &str) -> Result<Box<dyn PvBackend>, PvError> {
        let Some(factory) = self.factories.get(name) else {
            return Err(PvError::BackendNotFound(format!(
                "{name} (available: {})",
                self.list_backends().join(", ")
            )));
        };
        debug!("Creating {} backend", name);
        Ok(factory())
    }

    /// Registered backend names in alphabetical order.
    pub fn list_backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}
