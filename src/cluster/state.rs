//! Per-node identity and liveness bookkeeping.
//!
//! Stripe identity is adopted once and never silently replaced. The next
//! channel id only moves forward. Lifecycle transitions are durable before
//! they become visible.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::core::{ChannelId, ConnectionId, GroupId, LifecycleState, StripeId};

use super::error::ClusterStateError;
use super::persist::ClusterStatePersistor;
use super::stripe_ids::StripeIdStateManager;

/// Downstream channel bookkeeping, reseeded whenever this node becomes
/// active.
pub trait ConnectionIdFactory: Send + Sync {
    /// First channel id the factory would hand out right now.
    fn current_connection_id(&self) -> ChannelId;

    fn init(&self, stripe_name: &str, next_channel: ChannelId, connections: &BTreeSet<ConnectionId>);
}

#[derive(Debug)]
struct Inner {
    stripe_id: Option<StripeId>,
    next_channel: ChannelId,
    connections: BTreeSet<ConnectionId>,
    state: LifecycleState,
}

pub struct ClusterState {
    group_id: GroupId,
    persistor: Arc<dyn ClusterStatePersistor>,
    connection_ids: Arc<dyn ConnectionIdFactory>,
    stripe_ids: StripeIdStateManager,
    inner: Mutex<Inner>,
}

impl ClusterState {
    /// Loads the persisted record and checks it belongs to `group_id`.
    pub fn open(
        group_id: GroupId,
        persistor: Arc<dyn ClusterStatePersistor>,
        connection_ids: Arc<dyn ConnectionIdFactory>,
    ) -> Result<Self, ClusterStateError> {
        let persisted_group = persistor.group_id()?;
        if persisted_group.is_null() {
            if !group_id.is_null() {
                persistor.set_group_id(group_id)?;
            }
        } else if persisted_group != group_id {
            tracing::error!(
                persisted = %persisted_group,
                configured = %group_id,
                "data directory belongs to another group"
            );
            return Err(ClusterStateError::GroupMismatch {
                persisted: persisted_group,
                configured: group_id,
            });
        }

        let stripe_id = persistor.stripe_id()?;
        let state = persistor.current_state()?;
        let connections = persistor.connections()?;
        let stripe_ids = StripeIdStateManager::load(Arc::clone(&persistor))?;

        let mut next_channel = connection_ids.current_connection_id();
        for conn in &connections {
            if conn.channel >= next_channel {
                next_channel = conn.channel.next();
            }
        }

        tracing::info!(
            group = %group_id,
            state = %state,
            stripe_id = ?stripe_id,
            connections = connections.len(),
            "cluster state loaded"
        );

        Ok(Self {
            group_id,
            persistor,
            connection_ids,
            stripe_ids,
            inner: Mutex::new(Inner {
                stripe_id,
                next_channel,
                connections,
                state,
            }),
        })
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn stripe_id(&self) -> Option<StripeId> {
        self.lock().stripe_id
    }

    /// Checks `hint` against the persisted identity, adopting it if none is
    /// persisted yet.
    pub fn initialize(&self, hint: Option<StripeId>) -> Result<(), ClusterStateError> {
        match hint {
            Some(id) => self.set_stripe_id(id),
            None => Ok(()),
        }
    }

    /// Adopt `id` as this node's stripe identity. Same id again is a no-op;
    /// a different one is an identity fault.
    pub fn set_stripe_id(&self, id: StripeId) -> Result<(), ClusterStateError> {
        let mut inner = self.lock();
        match inner.stripe_id {
            Some(current) if current == id => return Ok(()),
            Some(current) => {
                tracing::error!(persisted = %current, received = %id, "stripe id mismatch");
                return Err(ClusterStateError::StripeIdMismatch {
                    persisted: current,
                    received: id,
                });
            }
            None => {}
        }
        self.check_registry(id)?;

        self.persistor.set_stripe_id(id)?;
        inner.stripe_id = Some(id);
        self.register(id)?;
        tracing::info!(stripe_id = %id, "stripe id adopted");
        Ok(())
    }

    /// Generate a stripe identity if this node never had one. Only valid
    /// while becoming active for the first time.
    pub fn assign_stripe_id_if_absent(&self) -> Result<StripeId, ClusterStateError> {
        let mut inner = self.lock();
        if inner.state.is_standby() {
            return Err(ClusterStateError::StripeIdAssignment { state: inner.state });
        }
        if let Some(id) = inner.stripe_id {
            return Ok(id);
        }

        let id = StripeId::generate();
        self.check_registry(id)?;
        self.persistor.set_stripe_id(id)?;
        inner.stripe_id = Some(id);
        self.register(id)?;
        tracing::info!(stripe_id = %id, "stripe id generated");
        Ok(id)
    }

    pub fn next_available_channel_id(&self) -> ChannelId {
        self.lock().next_channel
    }

    /// Hand out the next channel id.
    pub fn allocate_channel_id(&self) -> ChannelId {
        let mut inner = self.lock();
        let id = inner.next_channel;
        inner.next_channel = id.next();
        id
    }

    /// A channel id already in use somewhere; never moves the counter back.
    pub fn observe_channel_id(&self, id: ChannelId) {
        let mut inner = self.lock();
        if id >= inner.next_channel {
            inner.next_channel = id.next();
        } else {
            tracing::warn!(
                observed = %id,
                next = %inner.next_channel,
                "ignoring channel id below next available"
            );
        }
    }

    pub fn set_next_available_channel_id(&self, next: ChannelId) {
        let mut inner = self.lock();
        if next < inner.next_channel {
            // Two actives racing; arbitration happens elsewhere.
            tracing::error!(
                requested = %next,
                current = %inner.next_channel,
                "ignoring attempt to move next channel id backwards"
            );
            return;
        }
        inner.next_channel = next;
    }

    pub fn record_connection(&self, conn: ConnectionId) {
        let mut inner = self.lock();
        if conn.channel >= inner.next_channel {
            inner.next_channel = conn.channel.next();
        }
        inner.connections.insert(conn);
    }

    pub fn forget_connection(&self, conn: &ConnectionId) {
        if !self.lock().connections.remove(conn) {
            tracing::warn!(connection = %conn, "removing unknown connection");
        }
    }

    pub fn connections(&self) -> BTreeSet<ConnectionId> {
        self.lock().connections.clone()
    }

    pub fn current_state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Persist `state` (with the live connection set), then make it current.
    pub fn transition_to(&self, state: LifecycleState) -> Result<(), ClusterStateError> {
        let mut inner = self.lock();
        let from = inner.state;
        self.persistor.set_current_state(state, &inner.connections)?;
        inner.state = state;
        tracing::info!(from = %from, to = %state, "lifecycle transition");
        Ok(())
    }

    /// Seed downstream connection bookkeeping after promotion to active.
    pub fn sync_active_state(&self) -> Result<(), ClusterStateError> {
        let inner = self.lock();
        let stripe = inner.stripe_id.ok_or(ClusterStateError::StripeIdMissing)?;
        self.connection_ids
            .init(&stripe.name(), inner.next_channel, &inner.connections);
        tracing::debug!(
            stripe_id = %stripe,
            next = %inner.next_channel,
            connections = inner.connections.len(),
            "connection ids seeded"
        );
        Ok(())
    }

    pub fn stripe_id_map(&self) -> BTreeMap<GroupId, StripeId> {
        self.stripe_ids.stripe_ids()
    }

    pub fn add_to_stripe_id_map(
        &self,
        group: GroupId,
        stripe: StripeId,
    ) -> Result<(), ClusterStateError> {
        self.stripe_ids.verify_or_save(group, stripe)
    }

    fn check_registry(&self, id: StripeId) -> Result<(), ClusterStateError> {
        if self.group_id.is_null() {
            return Ok(());
        }
        match self.stripe_ids.stripe_id_for(self.group_id) {
            Some(existing) if existing != id => Err(ClusterStateError::StripeIdConflict {
                group: self.group_id,
                existing,
                stripe: id,
            }),
            _ => Ok(()),
        }
    }

    fn register(&self, id: StripeId) -> Result<(), ClusterStateError> {
        if self.group_id.is_null() {
            return Ok(());
        }
        self.stripe_ids.verify_or_save(self.group_id, id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("cluster state lock poisoned")
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        writeln!(f, "ClusterState")?;
        writeln!(f, "Connections:")?;
        for conn in &inner.connections {
            writeln!(f, "  {conn}")?;
        }
        writeln!(f, "Next Available Channel ID: {}", inner.next_channel)?;
        writeln!(f, "Current State: {}", inner.state)?;
        match inner.stripe_id {
            Some(id) => write!(f, "Stripe ID: {id}"),
            None => write!(f, "Stripe ID: <none>"),
        }
    }
}

impl fmt::Debug for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterState")
            .field("group_id", &self.group_id)
            .field("inner", &*self.lock())
            .finish()
    }
}
