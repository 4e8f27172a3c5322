//! Passive bootstrap: adopt the active's stripe identity, run one sync pass,
//! and become PASSIVE when it completes.

use std::sync::Arc;

use crate::cluster::{ClusterState, ClusterStateError};
use crate::core::{Inbound, LifecycleState, StripeId};
use crate::Error;

use super::engine::{Admission, ReplicationSyncEngine};
use super::runtime::StreamConsumer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapStage {
    Syncing,
    Passive,
    Failed,
}

pub struct PassiveBootstrap {
    cluster: Arc<ClusterState>,
    engine: ReplicationSyncEngine,
    stage: BootstrapStage,
}

impl PassiveBootstrap {
    /// Record the active's stripe id and enter SYNCING.
    ///
    /// A stripe id that differs from the persisted one is refused before
    /// any sync traffic is consumed.
    pub fn begin(
        cluster: Arc<ClusterState>,
        active_stripe: StripeId,
        engine: ReplicationSyncEngine,
    ) -> Result<Self, ClusterStateError> {
        cluster.set_stripe_id(active_stripe)?;
        cluster.transition_to(LifecycleState::Syncing)?;
        tracing::info!(
            stripe_id = %active_stripe,
            source = %engine.source(),
            "passive bootstrap started"
        );
        Ok(Self {
            cluster,
            engine,
            stage: BootstrapStage::Syncing,
        })
    }

    pub fn stage(&self) -> BootstrapStage {
        self.stage
    }

    pub fn is_passive(&self) -> bool {
        self.stage == BootstrapStage::Passive
    }

    pub fn engine(&self) -> &ReplicationSyncEngine {
        &self.engine
    }

    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    pub fn handle(&mut self, item: Inbound) -> Result<Admission, Error> {
        let admission = match self.engine.handle(item) {
            Ok(admission) => admission,
            Err(err) => {
                self.stage = BootstrapStage::Failed;
                return Err(err.into());
            }
        };
        if admission == Admission::SyncCompleted && self.stage == BootstrapStage::Syncing {
            if let Err(err) = self.cluster.transition_to(LifecycleState::Passive) {
                self.stage = BootstrapStage::Failed;
                return Err(err.into());
            }
            self.stage = BootstrapStage::Passive;
            tracing::info!(stats = ?self.engine.stats(), "passive bootstrap complete");
        }
        Ok(admission)
    }
}

impl StreamConsumer for PassiveBootstrap {
    fn consume(&mut self, item: Inbound) -> Result<Admission, Error> {
        self.handle(item)
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Err(err) = self.engine.close() {
            self.stage = BootstrapStage::Failed;
            return Err(err.into());
        }
        Ok(())
    }
}
