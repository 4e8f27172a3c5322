//! Group -> stripe identity registry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::core::{GroupId, StripeId};

use super::error::{ClusterStateError, PersistError};
use super::persist::ClusterStatePersistor;

/// Knows which stripe identity every group of the cluster carries.
/// Once a group has an identity, a different one is refused.
pub struct StripeIdStateManager {
    persistor: Arc<dyn ClusterStatePersistor>,
    map: Mutex<BTreeMap<GroupId, StripeId>>,
}

impl StripeIdStateManager {
    pub fn load(persistor: Arc<dyn ClusterStatePersistor>) -> Result<Self, PersistError> {
        let map = persistor.stripe_id_map()?;
        Ok(Self {
            persistor,
            map: Mutex::new(map),
        })
    }

    pub fn stripe_ids(&self) -> BTreeMap<GroupId, StripeId> {
        self.lock().clone()
    }

    pub fn stripe_id_for(&self, group: GroupId) -> Option<StripeId> {
        self.lock().get(&group).copied()
    }

    /// Registers `stripe` for `group`, or confirms it is already the
    /// registered identity.
    pub fn verify_or_save(&self, group: GroupId, stripe: StripeId) -> Result<(), ClusterStateError> {
        let mut map = self.lock();
        match map.get(&group) {
            Some(existing) if *existing == stripe => return Ok(()),
            Some(existing) => {
                tracing::error!(
                    group = %group,
                    existing = %existing,
                    stripe = %stripe,
                    "conflicting stripe id for group"
                );
                return Err(ClusterStateError::StripeIdConflict {
                    group,
                    existing: *existing,
                    stripe,
                });
            }
            None => {}
        }

        let mut next = map.clone();
        next.insert(group, stripe);
        self.persistor.set_stripe_id_map(&next)?;
        *map = next;
        tracing::debug!(group = %group, stripe = %stripe, "stripe id registered");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<GroupId, StripeId>> {
        self.map.lock().expect("stripe id map lock poisoned")
    }
}

impl std::fmt::Debug for StripeIdStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeIdStateManager")
            .field("map", &*self.lock())
            .finish()
    }
}
