//! Deferral of live operations that arrive while their key is mid-sync.

use std::collections::{BTreeMap, VecDeque};

use crate::core::{ConcurrencyKey, EntityId, Limits, ReplicationMessage};

use super::error::OverflowKind;

#[derive(Clone, Debug, Default)]
struct DeferredQueue {
    events: VecDeque<ReplicationMessage>,
    bytes: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferDecision {
    /// Held; `depth` is the queue length after insertion.
    Deferred { depth: usize },
    /// The key is not mid-sync; apply now.
    NotDeferring(ReplicationMessage),
    Overflow { kind: OverflowKind, limit: usize },
}

/// Per-(entity, key) FIFO queues. A queue exists exactly while its key is
/// open for sync.
#[derive(Clone, Debug)]
pub struct DeferralTable {
    queues: BTreeMap<(EntityId, ConcurrencyKey), DeferredQueue>,
    max_events: usize,
    max_bytes: usize,
}

impl DeferralTable {
    pub fn new(limits: &Limits) -> Self {
        Self {
            queues: BTreeMap::new(),
            max_events: limits.max_deferred_events_per_key,
            max_bytes: limits.max_deferred_bytes_per_key,
        }
    }

    /// Start diverting traffic for (entity, key). Returns false if it was
    /// already open.
    pub fn open(&mut self, entity: &EntityId, key: ConcurrencyKey) -> bool {
        let slot = (entity.clone(), key);
        if self.queues.contains_key(&slot) {
            return false;
        }
        self.queues.insert(slot, DeferredQueue::default());
        true
    }

    pub fn is_open(&self, entity: &EntityId, key: ConcurrencyKey) -> bool {
        self.queues.contains_key(&(entity.clone(), key))
    }

    pub fn offer(&mut self, msg: ReplicationMessage) -> DeferDecision {
        let slot = (msg.entity.id.clone(), msg.concurrency);
        let Some(queue) = self.queues.get_mut(&slot) else {
            return DeferDecision::NotDeferring(msg);
        };

        if queue.events.len() >= self.max_events {
            return DeferDecision::Overflow {
                kind: OverflowKind::Events,
                limit: self.max_events,
            };
        }
        let bytes = msg.payload_len();
        if queue.bytes + bytes > self.max_bytes {
            return DeferDecision::Overflow {
                kind: OverflowKind::Bytes,
                limit: self.max_bytes,
            };
        }

        queue.bytes += bytes;
        queue.events.push_back(msg);
        DeferDecision::Deferred {
            depth: queue.events.len(),
        }
    }

    /// Stop diverting and hand back everything held, oldest first.
    pub fn close(&mut self, entity: &EntityId, key: ConcurrencyKey) -> VecDeque<ReplicationMessage> {
        self.queues
            .remove(&(entity.clone(), key))
            .map(|queue| queue.events)
            .unwrap_or_default()
    }

    pub fn len(&self, entity: &EntityId, key: ConcurrencyKey) -> usize {
        self.queues
            .get(&(entity.clone(), key))
            .map(|queue| queue.events.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(|queue| queue.events.is_empty())
    }

    /// Drop every queue. Returns (events, bytes) discarded.
    pub fn discard_all(&mut self) -> (usize, usize) {
        let mut events = 0;
        let mut bytes = 0;
        for queue in self.queues.values() {
            events += queue.events.len();
            bytes += queue.bytes;
        }
        self.queues.clear();
        (events, bytes)
    }
}
