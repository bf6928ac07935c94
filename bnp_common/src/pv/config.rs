//! PV table configuration structs.
//!
//! Deserialized from `pvs.toml`. Each `[pv.<key>]` table binds a logical
//! name to an EPICS channel; `[[link]]` entries describe how the
//! simulation backend reacts to writes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::kind::PvKind;

// ─── PvPoint ────────────────────────────────────────────────────────

/// A single PV definition from `pvs.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PvPoint {
    /// Full EPICS channel name, e.g. `9idbTAU:UA:UX:RqsPos`.
    pub channel: String,

    /// Record kind. Default: `value`.
    #[serde(default)]
    pub kind: PvKind,

    /// Enum state labels, index order. Used to render enum PVs as strings.
    #[serde(default)]
    pub states: Vec<String>,

    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,

    // ── Simulation ──────────────────────────────────────────────────

    /// Initial value for the simulation backend. Default: `0`.
    #[serde(default)]
    pub initial: Option<toml::Value>,
}

impl PvPoint {
    /// Shorthand used by the built-in table.
    pub fn new(channel: &str, kind: PvKind) -> Self {
        Self {
            channel: channel.to_string(),
            kind,
            states: Vec::new(),
            description: None,
            initial: None,
        }
    }

    /// Attach enum state labels.
    pub fn with_states(mut self, states: &[&str]) -> Self {
        self.states = states.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Attach a simulation initial value.
    pub fn with_initial(mut self, initial: impl Into<toml::Value>) -> Self {
        self.initial = Some(initial.into());
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

// ─── SimLink ────────────────────────────────────────────────────────

/// Simulated reaction: a put on `trigger` sets `target` to `value` after
/// `delay_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimLink {
    /// Logical key whose write starts the reaction.
    pub trigger: String,
    /// Logical key that changes.
    pub target: String,
    /// New value of `target`.
    pub value: toml::Value,
    /// Delay after the trigger write [ms]. Default: 0.
    #[serde(default)]
    pub delay_ms: u64,
}

// ─── PvTableConfig ──────────────────────────────────────────────────

/// Top-level PV table configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PvTableConfig {
    /// Logical key → PV definition, ordered by key.
    #[serde(default, rename = "pv")]
    pub points: BTreeMap<String, PvPoint>,

    /// Simulation reactions.
    #[serde(default, rename = "link")]
    pub links: Vec<SimLink>,
}

impl PvTableConfig {
    /// Parse from TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Add or replace a point.
    pub fn insert(&mut self, key: &str, point: PvPoint) {
        self.points.insert(key.to_string(), point);
    }

    /// Add a simulation link.
    pub fn link(&mut self, trigger: &str, target: &str, value: impl Into<toml::Value>, delay_ms: u64) {
        self.links.push(SimLink {
            trigger: trigger.to_string(),
            target: target.to_string(),
            value: value.into(),
            delay_ms,
        });
    }
}
