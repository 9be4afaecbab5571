//! # Manager Statistics
//!
//! Read-only introspection over the channel registry, used for operational
//! visibility. Counts are computed at call time; nothing is cached.

use std::collections::BTreeMap;

use serde::Serialize;

/// Snapshot of the manager's registry state
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Number of open shared channels
    pub channel_count: usize,

    /// Listener count per channel, keyed by "<channel>:<EVENT>".
    /// BTreeMap so serialized output is deterministically ordered.
    pub listeners: BTreeMap<String, usize>,
}

impl ManagerStats {
    /// Total listeners across all channels
    pub fn total_listeners(&self) -> usize {
        self.listeners.values().sum()
    }
}
