//! Passive-side replication/sync state machine.
//!
//! One engine consumes the ordered stream from one active. Every admission
//! decision (apply now vs defer) is made here, on a single thread; the
//! applies themselves are handed to an [`ApplyExecutor`].

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::core::{
    ClientId, ConcurrencyKey, EntityId, Inbound, Limits, OperationKind, ReplicationMessage,
    ServerId, SyncMessage, TransactionId,
};

use super::collab::{
    AckSender, EntityAction, EntityManager, EntityRequest, ManagedEntity, RequestPayload,
};
use super::completion::CompletionHandle;
use super::deferral::{DeferDecision, DeferralTable};
use super::error::ReplError;
use super::executor::{ApplyExecutor, ApplyJob};

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// The active this stream comes from.
    pub source: ServerId,
    pub limits: Limits,
}

impl EngineConfig {
    pub fn new(source: ServerId, limits: Limits) -> Self {
        Self { source, limits }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnginePhase {
    /// No sync pass open; live traffic applies directly.
    Live,
    Syncing,
    Failed,
    Closed,
}

/// What happened to one inbound item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Dispatched for apply (or acknowledged outright, for NOOP).
    Applied,
    /// Held behind an open key sync.
    Deferred { depth: usize },
    /// Not applied: payload undecodable or the entity could not be created.
    Skipped,
    /// Sync bracket accepted.
    SyncControl,
    /// END_SYNC accepted; the pass is complete.
    SyncCompleted,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub applied: u64,
    pub deferred: u64,
    pub replayed: u64,
    pub sync_payloads: u64,
    pub decode_failures: u64,
    pub entities_created: u64,
}

struct OpenEntity {
    id: EntityId,
    version: u64,
    handle: Arc<dyn ManagedEntity>,
    open_key: Option<ConcurrencyKey>,
    synced: BTreeSet<ConcurrencyKey>,
}

pub struct ReplicationSyncEngine {
    source: ServerId,
    limits: Limits,
    entities: Arc<dyn EntityManager>,
    acks: Arc<dyn AckSender>,
    executor: Box<dyn ApplyExecutor>,
    phase: EnginePhase,
    open: Option<OpenEntity>,
    deferred: DeferralTable,
    stats: EngineStats,
}

impl ReplicationSyncEngine {
    pub fn new(
        config: EngineConfig,
        entities: Arc<dyn EntityManager>,
        acks: Arc<dyn AckSender>,
        executor: Box<dyn ApplyExecutor>,
    ) -> Self {
        Self {
            source: config.source,
            deferred: DeferralTable::new(&config.limits),
            limits: config.limits,
            entities,
            acks,
            executor,
            phase: EnginePhase::Live,
            open: None,
            stats: EngineStats::default(),
        }
    }

    pub fn phase(&self) -> EnginePhase {
        self.phase
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn source(&self) -> &ServerId {
        &self.source
    }

    pub fn is_syncing(&self) -> bool {
        self.phase == EnginePhase::Syncing
    }

    pub fn open_entity(&self) -> Option<&EntityId> {
        self.open.as_ref().map(|open| &open.id)
    }

    pub fn open_key(&self) -> Option<ConcurrencyKey> {
        self.open.as_ref().and_then(|open| open.open_key)
    }

    pub fn deferred_len(&self, entity: &EntityId, key: ConcurrencyKey) -> usize {
        self.deferred.len(entity, key)
    }

    /// Admit one item of the stream. A fatal error leaves the engine in
    /// [`EnginePhase::Failed`]; all later input is refused.
    pub fn handle(&mut self, item: Inbound) -> Result<Admission, ReplError> {
        match self.phase {
            EnginePhase::Failed => return Err(ReplError::SessionFailed),
            EnginePhase::Closed => return Err(ReplError::SessionClosed),
            EnginePhase::Live | EnginePhase::Syncing => {}
        }

        let result = match item {
            Inbound::Sync(msg) => self.on_sync(msg),
            Inbound::Replicate(msg) => self.on_replicate(msg),
        };
        if let Err(err) = &result {
            if err.is_fatal() {
                self.fail(err);
            }
        }
        result
    }

    /// Stop the session. Deferred operations are discarded unapplied.
    ///
    /// Closing mid-sync reports [`ReplError::SyncInterrupted`]: a partial
    /// pass is never resumed.
    pub fn close(&mut self) -> Result<(), ReplError> {
        let was_syncing = match self.phase {
            EnginePhase::Closed => return Ok(()),
            EnginePhase::Syncing => true,
            EnginePhase::Live | EnginePhase::Failed => false,
        };
        let (events, bytes) = self.deferred.discard_all();
        if events > 0 {
            tracing::warn!(events, bytes, "discarding deferred operations on close");
        }
        self.open = None;
        self.phase = EnginePhase::Closed;
        if was_syncing {
            tracing::warn!(source = %self.source, "replication session closed mid-sync");
            return Err(ReplError::SyncInterrupted);
        }
        tracing::info!(source = %self.source, "replication session closed");
        Ok(())
    }

    fn fail(&mut self, err: &ReplError) {
        let (events, bytes) = self.deferred.discard_all();
        tracing::error!(
            source = %self.source,
            error = %err,
            discarded_events = events,
            discarded_bytes = bytes,
            "replication session failed"
        );
        self.open = None;
        self.phase = EnginePhase::Failed;
    }

    fn on_sync(&mut self, msg: SyncMessage) -> Result<Admission, ReplError> {
        let received = msg.kind_str();
        if !matches!(msg, SyncMessage::StartSync) && self.phase != EnginePhase::Syncing {
            return Err(ReplError::protocol(received, "no sync pass in progress"));
        }

        match msg {
            SyncMessage::StartSync => {
                if self.phase == EnginePhase::Syncing {
                    return Err(ReplError::protocol(received, "sync pass already in progress"));
                }
                self.phase = EnginePhase::Syncing;
                tracing::info!(source = %self.source, "sync pass started");
                Ok(Admission::SyncControl)
            }
            SyncMessage::StartEntity {
                entity,
                version,
                config,
                is_new_entity,
            } => self.start_entity(entity, version, config, is_new_entity),
            SyncMessage::StartKey {
                entity,
                version,
                key,
            } => self.start_key(&entity, version, key),
            SyncMessage::Payload {
                entity,
                version,
                key,
                bytes,
            } => self.sync_payload(&entity, version, key, bytes),
            SyncMessage::EndKey {
                entity,
                version,
                key,
            } => self.end_key(&entity, version, key),
            SyncMessage::EndEntity { entity, version } => self.end_entity(&entity, version),
            SyncMessage::EndSync { final_bytes } => {
                if let Some(open) = &self.open {
                    return Err(ReplError::protocol(
                        received,
                        format!("entity {} still open", open.id),
                    ));
                }
                self.entities
                    .sync_complete(&final_bytes)
                    .map_err(|source| ReplError::SyncComplete { source })?;
                self.phase = EnginePhase::Live;
                tracing::info!(
                    source = %self.source,
                    sync_payloads = self.stats.sync_payloads,
                    replayed = self.stats.replayed,
                    "sync pass completed"
                );
                Ok(Admission::SyncCompleted)
            }
        }
    }

    fn start_entity(
        &mut self,
        entity: EntityId,
        version: u64,
        config: Bytes,
        is_new_entity: bool,
    ) -> Result<Admission, ReplError> {
        if let Some(open) = &self.open {
            return Err(ReplError::protocol(
                "start_entity",
                format!("entity {} still open", open.id),
            ));
        }

        let handle = match self.entities.get_entity(&entity, version) {
            Some(handle) => handle,
            None => {
                let handle = self
                    .entities
                    .create_entity(&entity, version, &config, true)
                    .map_err(|source| ReplError::EntityCreate { source })?;
                self.stats.entities_created += 1;
                handle
            }
        };
        tracing::debug!(entity = %entity, version, is_new_entity, "sync entity start");

        self.dispatch_sync(
            &handle,
            EntityAction::SyncEntityStart,
            ConcurrencyKey::MANAGEMENT,
            RequestPayload::None,
        );
        self.open = Some(OpenEntity {
            id: entity,
            version,
            handle,
            open_key: None,
            synced: BTreeSet::new(),
        });
        Ok(Admission::SyncControl)
    }

    fn start_key(
        &mut self,
        entity: &EntityId,
        version: u64,
        key: ConcurrencyKey,
    ) -> Result<Admission, ReplError> {
        let open = require_open(&mut self.open, entity, version, "start_key")?;
        if let Some(current) = open.open_key {
            return Err(ReplError::protocol(
                "start_key",
                format!("key {current} of {entity} still open"),
            ));
        }
        if open.synced.contains(&key) {
            return Err(ReplError::protocol(
                "start_key",
                format!("key {key} of {entity} already synced in this pass"),
            ));
        }
        if !self.deferred.open(entity, key) {
            return Err(ReplError::protocol(
                "start_key",
                format!("key {key} of {entity} already deferring"),
            ));
        }
        open.open_key = Some(key);
        let handle = Arc::clone(&open.handle);
        tracing::debug!(entity = %entity, key = %key, "sync key start");

        self.dispatch_sync(&handle, EntityAction::SyncKeyStart, key, RequestPayload::None);
        Ok(Admission::SyncControl)
    }

    fn sync_payload(
        &mut self,
        entity: &EntityId,
        version: u64,
        key: ConcurrencyKey,
        bytes: Bytes,
    ) -> Result<Admission, ReplError> {
        let open = require_open(&mut self.open, entity, version, "sync_payload")?;
        if open.open_key != Some(key) {
            return Err(ReplError::protocol(
                "sync_payload",
                format!("key {key} of {entity} is not open"),
            ));
        }
        if bytes.len() > self.limits.max_sync_payload_bytes {
            return Err(ReplError::SyncPayloadTooLarge {
                entity: entity.clone(),
                key,
                bytes: bytes.len(),
                max: self.limits.max_sync_payload_bytes,
            });
        }
        let handle = Arc::clone(&open.handle);

        let decoded = self
            .entities
            .sync_message_codec(entity)
            .decode(key, &bytes)
            .map_err(|source| ReplError::SyncDecode {
                entity: entity.clone(),
                key,
                source,
            })?;
        self.stats.sync_payloads += 1;
        self.dispatch_sync(
            &handle,
            EntityAction::SyncPayload,
            key,
            RequestPayload::Sync(decoded),
        );
        Ok(Admission::SyncControl)
    }

    fn end_key(
        &mut self,
        entity: &EntityId,
        version: u64,
        key: ConcurrencyKey,
    ) -> Result<Admission, ReplError> {
        let open = require_open(&mut self.open, entity, version, "end_key")?;
        if open.open_key != Some(key) {
            return Err(ReplError::protocol(
                "end_key",
                format!("key {key} of {entity} is not open"),
            ));
        }
        open.open_key = None;
        open.synced.insert(key);
        let handle = Arc::clone(&open.handle);

        let queued = self.deferred.close(entity, key);
        tracing::debug!(entity = %entity, key = %key, replay = queued.len(), "sync key end");
        for msg in queued {
            self.stats.replayed += 1;
            self.apply_live(msg);
        }

        self.dispatch_sync(&handle, EntityAction::SyncKeyEnd, key, RequestPayload::None);
        Ok(Admission::SyncControl)
    }

    fn end_entity(&mut self, entity: &EntityId, version: u64) -> Result<Admission, ReplError> {
        let open = require_open(&mut self.open, entity, version, "end_entity")?;
        if let Some(key) = open.open_key {
            return Err(ReplError::protocol(
                "end_entity",
                format!("key {key} of {entity} not closed"),
            ));
        }
        let handle = Arc::clone(&open.handle);
        self.open = None;
        tracing::debug!(entity = %entity, version, "sync entity end");

        self.dispatch_sync(
            &handle,
            EntityAction::SyncEntityEnd,
            ConcurrencyKey::MANAGEMENT,
            RequestPayload::None,
        );
        Ok(Admission::SyncControl)
    }

    fn on_replicate(&mut self, msg: ReplicationMessage) -> Result<Admission, ReplError> {
        let entity = msg.entity.id.clone();
        let key = msg.concurrency;
        let sequence = msg.sequence;
        match self.deferred.offer(msg) {
            DeferDecision::Deferred { depth } => {
                self.stats.deferred += 1;
                tracing::trace!(entity = %entity, key = %key, sequence = sequence.get(), depth, "deferred");
                Ok(Admission::Deferred { depth })
            }
            DeferDecision::Overflow { kind, limit } => Err(ReplError::DeferralOverflow {
                entity,
                key,
                kind,
                limit,
            }),
            DeferDecision::NotDeferring(msg) => Ok(self.apply_live(msg)),
        }
    }

    fn apply_live(&mut self, msg: ReplicationMessage) -> Admission {
        let mut completion =
            CompletionHandle::acking(Arc::clone(&self.acks), msg.source.clone(), msg.sequence);

        if msg.kind == OperationKind::Noop {
            completion.complete();
            self.stats.applied += 1;
            return Admission::Applied;
        }

        let id = &msg.entity.id;
        let version = msg.entity.version;
        let handle = match self.entities.get_entity(id, version) {
            Some(handle) => handle,
            None => {
                let config: &[u8] = if msg.kind == OperationKind::Create {
                    &msg.payload[..]
                } else {
                    &[]
                };
                match self.entities.create_entity(id, version, config, true) {
                    Ok(handle) => {
                        self.stats.entities_created += 1;
                        tracing::debug!(entity = %id, version, "entity created on demand");
                        handle
                    }
                    Err(err) => {
                        tracing::warn!(
                            entity = %id,
                            sequence = msg.sequence.get(),
                            error = %err,
                            "on-demand entity creation failed"
                        );
                        completion.fail();
                        return Admission::Skipped;
                    }
                }
            }
        };

        let payload = match msg.kind {
            OperationKind::Invoke => match self.entities.message_codec(id).decode(&msg.payload) {
                Ok(decoded) => RequestPayload::Message(decoded),
                Err(err) => {
                    self.stats.decode_failures += 1;
                    tracing::warn!(
                        entity = %id,
                        key = %msg.concurrency,
                        sequence = msg.sequence.get(),
                        error = %err,
                        "dropping undecodable operation"
                    );
                    completion.retire_received();
                    return Admission::Skipped;
                }
            },
            OperationKind::Create | OperationKind::Reconfigure => {
                RequestPayload::Config(msg.payload.clone())
            }
            OperationKind::Destroy | OperationKind::Noop => RequestPayload::None,
        };
        completion.received();

        let request = EntityRequest {
            action: action_for(msg.kind),
            source: msg.source,
            client: msg.client,
            transaction: msg.transaction,
            key: msg.concurrency,
            sequence: Some(msg.sequence),
        };
        self.executor
            .execute(ApplyJob::new(handle, request, payload, completion));
        self.stats.applied += 1;
        Admission::Applied
    }

    fn dispatch_sync(
        &self,
        handle: &Arc<dyn ManagedEntity>,
        action: EntityAction,
        key: ConcurrencyKey,
        payload: RequestPayload,
    ) {
        let request = EntityRequest {
            action,
            source: self.source.clone(),
            client: ClientId::new(0),
            transaction: TransactionId::NULL,
            key,
            sequence: None,
        };
        self.executor.execute(ApplyJob::new(
            Arc::clone(handle),
            request,
            payload,
            CompletionHandle::silent(),
        ));
    }
}

impl std::fmt::Debug for ReplicationSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationSyncEngine")
            .field("source", &self.source)
            .field("phase", &self.phase)
            .field("open_entity", &self.open_entity())
            .field("open_key", &self.open_key())
            .field("stats", &self.stats)
            .finish()
    }
}

fn require_open<'a>(
    open: &'a mut Option<OpenEntity>,
    entity: &EntityId,
    version: u64,
    received: &'static str,
) -> Result<&'a mut OpenEntity, ReplError> {
    match open.as_ref() {
        Some(current) if current.id == *entity && current.version == version => {}
        Some(current) => {
            return Err(ReplError::protocol(
                received,
                format!(
                    "{entity} v{version} is not the open entity ({} v{})",
                    current.id, current.version
                ),
            ))
        }
        None => {
            return Err(ReplError::protocol(
                received,
                format!("{entity} has no open sync"),
            ))
        }
    }
    open.as_mut()
        .ok_or_else(|| ReplError::protocol(received, format!("{entity} has no open sync")))
}

fn action_for(kind: OperationKind) -> EntityAction {
    match kind {
        OperationKind::Create => EntityAction::Create,
        OperationKind::Invoke => EntityAction::Invoke,
        OperationKind::Destroy => EntityAction::Destroy,
        OperationKind::Noop => EntityAction::Noop,
        OperationKind::Reconfigure => EntityAction::Reconfigure,
    }
}
