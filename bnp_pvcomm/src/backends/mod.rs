//! PV backend implementations.
//!
//! - [`simulation`] - In-memory PV store for development and testing
//! - [`ca_tools`] - EPICS base command-line tools (`caget` / `caput`)
//!
//! # Adding New Backends
//!
//! 1. Create a new submodule under `backends/`
//! 2. Implement the `PvBackend` trait from `bnp_common::pv::backend`
//! 3. Register the factory in [`register_builtin`]

pub mod ca_tools;
pub mod simulation;

use crate::backend_registry::BackendRegistry;

/// Register all built-in backends.
pub fn register_builtin(registry: &mut BackendRegistry) {
    registry.register("simulation", simulation::create_backend);
    registry.register("ca_tools", ca_tools::create_backend);
}
