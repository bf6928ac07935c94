//! BNP Common Library
//!
//! Shared configuration, constants and PV access contracts for the BNP
//! scan-control workspace.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Timing budgets, offsets and default paths
//! - [`pv`] - PV values, registry and backend trait
//! - [`session`] - Session configuration (`pvcomm.toml`)
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use bnp_common::prelude::*;
//!
//! let registry = PvRegistry::builtin().unwrap();
//! assert!(registry.contains("BDA_pos"));
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod pv;
pub mod session;
