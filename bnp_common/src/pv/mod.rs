//! PV access contracts shared between `PvComm` and its backends.
//!
//! Logical keys are resolved through [`registry::PvRegistry`], built once
//! from `pvs.toml` or the built-in table. Backends implement
//! [`backend::PvBackend`] and only ever see resolved bindings.

pub mod backend;
pub mod config;
pub mod defaults;
pub mod kind;
pub mod registry;
pub mod value;
