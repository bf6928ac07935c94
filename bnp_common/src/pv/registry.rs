//! PV Registry: logical name to channel binding.
//!
//! Built at startup from a [`PvTableConfig`]. Immutable after construction.
//! Lookups are by logical key (e.g. `BDA_pos`); an unknown key is an error,
//! never a silent default.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::backend::PvError;
use super::config::{PvPoint, PvTableConfig};
use super::defaults::{builtin_table, REQUIRED_KEYS};
use super::kind::PvKind;
use super::value::PvValue;

// ─── Error Types ────────────────────────────────────────────────────

/// PV table validation error.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A point has an empty logical key.
    EmptyKey,
    /// A point has an empty channel name.
    EmptyChannel { key: String },
    /// Two keys share the same channel.
    ChannelDuplicate {
        channel: String,
        key_a: String,
        key_b: String,
    },
    /// A key used by the scan layer is missing from the table.
    RequiredMissing { key: String },
    /// A simulation link names a key that is not in the table.
    LinkUnknownKey { key: String },
    /// A simulation link targets a key with an unusable value.
    LinkValueInvalid { trigger: String, target: String },
    /// An `initial` value is not a scalar, or not a valid state index.
    InitialInvalid { key: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyKey => write!(f, "PV table contains an empty key"),
            Self::EmptyChannel { key } => write!(f, "PV '{key}' has an empty channel name"),
            Self::ChannelDuplicate {
                channel,
                key_a,
                key_b,
            } => write!(
                f,
                "channel '{channel}' bound twice, by '{key_a}' and '{key_b}'"
            ),
            Self::RequiredMissing { key } => write!(f, "required PV '{key}' is not defined"),
            Self::LinkUnknownKey { key } => {
                write!(f, "simulation link references unknown PV '{key}'")
            }
            Self::LinkValueInvalid { trigger, target } => write!(
                f,
                "simulation link '{trigger}' -> '{target}' has a non-scalar value"
            ),
            Self::InitialInvalid { key } => write!(f, "PV '{key}' has an invalid initial value"),
        }
    }
}

impl std::error::Error for RegistryError {}

// ─── PvBinding ──────────────────────────────────────────────────────

/// Runtime binding of a logical key to its channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PvBinding {
    /// Logical key from the PV table.
    pub key: String,
    /// EPICS channel name.
    pub channel: String,
    /// Record kind.
    pub kind: PvKind,
    /// Enum state labels (may be empty).
    pub states: Vec<String>,
    /// Simulation initial value.
    pub initial: PvValue,
    /// Human-readable description.
    pub description: Option<String>,
}

impl PvBinding {
    /// Render a raw value as the record would with `as_string`: enum
    /// indices map to their state label, anything else uses `Display`.
    pub fn render(&self, value: &PvValue) -> String {
        if !self.states.is_empty() {
            if let Some(idx) = value.as_i64() {
                if let Some(label) = usize::try_from(idx).ok().and_then(|i| self.states.get(i)) {
                    return label.clone();
                }
            }
        }
        value.to_string()
    }
}

/// Resolved simulation link.
#[derive(Debug, Clone, PartialEq)]
pub struct PvLink {
    /// Trigger key.
    pub trigger: String,
    /// Target key.
    pub target: String,
    /// Value applied to the target.
    pub value: PvValue,
    /// Delay after the trigger write [ms].
    pub delay_ms: u64,
}

// ─── PvRegistry ─────────────────────────────────────────────────────

/// Runtime PV registry. Maps logical keys to [`PvBinding`]s.
///
/// Built once at startup. Immutable after construction.
#[derive(Debug, Clone)]
pub struct PvRegistry {
    bindings: BTreeMap<String, PvBinding>,
    links: Vec<PvLink>,
}

impl PvRegistry {
    /// Build the registry from a PV table, running all validation rules.
    ///
    /// Returns the first validation error encountered.
    pub fn from_config(config: &PvTableConfig) -> Result<Self, RegistryError> {
        let mut bindings = BTreeMap::new();
        // Track channel → key for duplicate detection.
        let mut channel_map: HashMap<&str, &str> = HashMap::new();

        for (key, point) in &config.points {
            if key.trim().is_empty() {
                return Err(RegistryError::EmptyKey);
            }
            if point.channel.trim().is_empty() {
                return Err(RegistryError::EmptyChannel { key: key.clone() });
            }
            if let Some(prev) = channel_map.insert(point.channel.as_str(), key.as_str()) {
                return Err(RegistryError::ChannelDuplicate {
                    channel: point.channel.clone(),
                    key_a: prev.to_string(),
                    key_b: key.clone(),
                });
            }
            bindings.insert(key.clone(), Self::build_binding(key, point)?);
        }

        for key in REQUIRED_KEYS {
            if !bindings.contains_key(*key) {
                return Err(RegistryError::RequiredMissing {
                    key: (*key).to_string(),
                });
            }
        }

        let mut links = Vec::with_capacity(config.links.len());
        for link in &config.links {
            for key in [&link.trigger, &link.target] {
                if !bindings.contains_key(key) {
                    return Err(RegistryError::LinkUnknownKey { key: key.clone() });
                }
            }
            let value =
                PvValue::from_toml(&link.value).ok_or_else(|| RegistryError::LinkValueInvalid {
                    trigger: link.trigger.clone(),
                    target: link.target.clone(),
                })?;
            links.push(PvLink {
                trigger: link.trigger.clone(),
                target: link.target.clone(),
                value,
                delay_ms: link.delay_ms,
            });
        }

        Ok(Self { bindings, links })
    }

    /// Registry for the built-in BNP table.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_config(&builtin_table())
    }

    fn build_binding(key: &str, point: &PvPoint) -> Result<PvBinding, RegistryError> {
        let initial = match &point.initial {
            Some(v) => PvValue::from_toml(v)
                .ok_or_else(|| RegistryError::InitialInvalid { key: key.to_string() })?,
            None => PvValue::Long(0),
        };
        // Enum PVs must start on a defined state.
        if !point.states.is_empty() {
            let in_range = initial
                .as_i64()
                .is_some_and(|i| i >= 0 && (i as usize) < point.states.len());
            if !in_range {
                return Err(RegistryError::InitialInvalid { key: key.to_string() });
            }
        }
        Ok(PvBinding {
            key: key.to_string(),
            channel: point.channel.clone(),
            kind: point.kind,
            states: point.states.clone(),
            initial,
            description: point.description.clone(),
        })
    }

    /// Look up a binding by key.
    pub fn get(&self, key: &str) -> Option<&PvBinding> {
        self.bindings.get(key)
    }

    /// Look up a binding by key, failing with [`PvError::UnknownPv`].
    pub fn binding(&self, key: &str) -> Result<&PvBinding, PvError> {
        self.bindings
            .get(key)
            .ok_or_else(|| PvError::UnknownPv(key.to_string()))
    }

    /// Look up a binding that will be written to.
    ///
    /// # Errors
    /// `UnknownPv` for a missing key, `ReadOnly` for status PVs.
    pub fn writable(&self, key: &str) -> Result<&PvBinding, PvError> {
        let binding = self.binding(key)?;
        if !binding.kind.is_writable() {
            return Err(PvError::ReadOnly(key.to_string()));
        }
        Ok(binding)
    }

    /// Check if a key exists in the registry.
    pub fn contains(&self, key: &str) -> bool {
        self.bindings.contains_key(key)
    }

    /// All bindings, ordered by key.
    pub fn bindings(&self) -> impl Iterator<Item = &PvBinding> {
        self.bindings.values()
    }

    /// Number of registered PVs.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Simulation links.
    pub fn links(&self) -> &[PvLink] {
        &self.links
    }

    /// Links started by a write to `trigger`.
    pub fn links_from<'a>(&'a self, trigger: &'a str) -> impl Iterator<Item = &'a PvLink> + 'a {
        self.links.iter().filter(move |l| l.trigger == trigger)
    }
}
