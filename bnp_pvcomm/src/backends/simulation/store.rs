//! In-memory PV store for the simulation backend.
//!
//! The `PvStore` manages:
//! - Current value of every registered PV, keyed by logical key
//! - Linked reactions (a write to one PV queues delayed changes of others)

use bnp_common::pv::registry::{PvLink, PvRegistry};
use bnp_common::pv::value::PvValue;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Pending change queued by a linked reaction.
#[derive(Debug, Clone)]
struct PendingChange {
    /// When this change should be applied
    due: Instant,
    /// Logical key to change
    target: String,
    /// New value
    value: PvValue,
}

/// In-memory PV values with delayed reactions.
pub struct PvStore {
    /// Current values
    values: HashMap<String, PvValue>,
    /// Linked reactions, grouped by trigger key
    links: HashMap<String, Vec<PvLink>>,
    /// Queue of pending changes, ordered by due time
    pending: VecDeque<PendingChange>,
}

impl PvStore {
    /// Seed the store with the registry's initial values and links.
    pub fn new(registry: &PvRegistry) -> Self {
        let values: HashMap<String, PvValue> = registry
            .bindings()
            .map(|b| (b.key.clone(), b.initial.clone()))
            .collect();

        let mut links: HashMap<String, Vec<PvLink>> = HashMap::new();
        for link in registry.links() {
            links.entry(link.trigger.clone()).or_default().push(link.clone());
        }

        debug!(
            "PvStore initialized: {} PVs, {} linked triggers",
            values.len(),
            links.len()
        );

        Self {
            values,
            links,
            pending: VecDeque::new(),
        }
    }

    /// Current value of `key` after applying every change due by `now`.
    pub fn read(&mut self, key: &str, now: Instant) -> Option<PvValue> {
        self.apply_due(now);
        self.values.get(key).cloned()
    }

    /// Write `value` to `key` and queue its linked reactions.
    ///
    /// Returns `false` if the key is not in the store.
    pub fn write(&mut self, key: &str, value: PvValue, now: Instant) -> bool {
        self.apply_due(now);
        let Some(slot) = self.values.get_mut(key) else {
            return false;
        };
        trace!("PV {} <- {}", key, value);
        *slot = value;

        if let Some(reactions) = self.links.get(key) {
            for link in reactions {
                let change = PendingChange {
                    due: now + Duration::from_millis(link.delay_ms),
                    target: link.target.clone(),
                    value: link.value.clone(),
                };
                trace!(
                    "{} -> queued {} = {} in {}ms",
                    key, link.target, link.value, link.delay_ms
                );
                // Keep the queue ordered; equal due times keep insertion order.
                let idx = self.pending.partition_point(|p| p.due <= change.due);
                self.pending.insert(idx, change);
            }
        }
        true
    }

    /// Apply pending changes whose time has arrived.
    pub fn apply_due(&mut self, now: Instant) {
        while self.pending.front().is_some_and(|p| p.due <= now) {
            let Some(change) = self.pending.pop_front() else {
                break;
            };
            if let Some(slot) = self.values.get_mut(&change.target) {
                if *slot != change.value {
                    debug!("{} changed: {} -> {}", change.target, slot, change.value);
                }
                *slot = change.value;
            }
        }
    }

    /// Overwrite a value without triggering links (state restore).
    pub fn restore(&mut self, key: &str, value: PvValue) -> bool {
        match self.values.get_mut(key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Number of changes still waiting.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of all values, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, PvValue)> {
        let mut all: Vec<_> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}
