//! # BNP PV Communication Library
//!
//! Operational layer for the 9-ID-B Bionanoprobe: reads stage and motor
//! positions, drives detector recovery, logs cryostat temperatures and
//! pauses, resumes or aborts scans through EPICS process variables.
//!
//! Backends implement the `PvBackend` trait defined in
//! `bnp_common::pv::backend`.
//!
//! # Module Structure
//!
//! - [`pvcomm`] - `PvComm` session and beamline operations
//! - [`status_log`] - Append-only, timestamped status log
//! - [`backend_registry`] - Backend factory registration
//! - [`backends`] - PV backend implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          bnp_pvcomm                              │
//! │  ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐  │
//! │  │ PvRegistry  │───►│   PvComm     │◄───│  Backend Registry   │  │
//! │  │(bnp_common) │    │              │    │                     │  │
//! │  └─────────────┘    └──┬────────┬──┘    └─────────────────────┘  │
//! │                        │        │                                │
//! │                        ▼        ▼                                │
//! │              ┌────────────┐  ┌────────────────┐                  │
//! │              │ StatusLog  │  │  PvBackend     │ (trait object)   │
//! │              │ (log.txt)  │  │  trait         │                  │
//! │              └────────────┘  └────────────────┘                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod backend_registry;
pub mod backends;
pub mod pvcomm;
pub mod status_log;

// Re-export key types for convenience
pub use crate::backend_registry::BackendRegistry;
pub use crate::pvcomm::{PvComm, PvReading, ResetOutcome, WaitOutcome};
pub use crate::status_log::StatusLog;
