//! Simulation backend module.
//!
//! This module provides an in-memory PV backend for development and testing
//! without a control system.

mod backend;
mod state;
mod store;

pub use backend::SimulationBackend;
pub use state::{PersistedPv, PersistedState, StatePersistence};
pub use store::PvStore;

use bnp_common::pv::backend::PvBackend;

/// Factory function to create a simulation backend instance.
pub fn create_backend() -> Box<dyn PvBackend> {
    Box::new(SimulationBackend::new())
}
