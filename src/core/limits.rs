//! Replication safety limits.

use serde::{Deserialize, Serialize};

/// Bounds on what one replication session may buffer.
///
/// Units are explicit in the field names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Live operations held back behind one (entity, key) sync.
    pub max_deferred_events_per_key: usize,
    /// Payload bytes held back behind one (entity, key) sync.
    pub max_deferred_bytes_per_key: usize,
    /// Largest single snapshot chunk accepted from the active.
    pub max_sync_payload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_deferred_events_per_key: 50_000,
            max_deferred_bytes_per_key: 64 * 1024 * 1024,
            max_sync_payload_bytes: 16 * 1024 * 1024,
        }
    }
}
