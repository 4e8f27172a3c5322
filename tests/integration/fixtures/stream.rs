//! Builders for replication stream items.

use std::sync::Arc;

use bytes::Bytes;

use stripe_sync::core::{
    ClientId, ClientInstanceId, ConcurrencyKey, EntityDescriptor, EntityId, Inbound, Limits,
    OperationKind, ReplicationMessage, SequenceNumber, ServerId, SyncMessage, TransactionId,
};
use stripe_sync::repl::{ApplyExecutor, EngineConfig, InlineExecutor, ReplicationSyncEngine};

use super::entities::{FakeEntityManager, RecordingAcks};

pub const VERSION: u64 = 1;

pub fn active() -> ServerId {
    ServerId::new("active-1").expect("server id")
}

pub fn entity(name: &str) -> EntityId {
    EntityId::new("org.example.Counter", name).expect("entity id")
}

pub fn key(k: i32) -> ConcurrencyKey {
    ConcurrencyKey::new(k)
}

pub fn op(seq: u64, target: &EntityId, k: i32, kind: OperationKind, body: &[u8]) -> Inbound {
    ReplicationMessage {
        sequence: SequenceNumber::new(seq),
        entity: EntityDescriptor::new(target.clone(), ClientInstanceId::NULL, VERSION),
        concurrency: key(k),
        kind,
        source: active(),
        client: ClientId::new(7),
        transaction: TransactionId::new(seq as i64),
        oldest_transaction_on_client: TransactionId::new(0),
        payload: Bytes::copy_from_slice(body),
    }
    .into()
}

pub fn invoke(seq: u64, target: &EntityId, k: i32, body: &str) -> Inbound {
    op(seq, target, k, OperationKind::Invoke, body.as_bytes())
}

pub fn start_sync() -> Inbound {
    SyncMessage::StartSync.into()
}

pub fn start_entity(target: &EntityId, config: &str) -> Inbound {
    SyncMessage::StartEntity {
        entity: target.clone(),
        version: VERSION,
        config: Bytes::copy_from_slice(config.as_bytes()),
        is_new_entity: true,
    }
    .into()
}

pub fn start_key(target: &EntityId, k: i32) -> Inbound {
    SyncMessage::StartKey {
        entity: target.clone(),
        version: VERSION,
        key: key(k),
    }
    .into()
}

pub fn payload(target: &EntityId, k: i32, body: &str) -> Inbound {
    SyncMessage::Payload {
        entity: target.clone(),
        version: VERSION,
        key: key(k),
        bytes: Bytes::copy_from_slice(body.as_bytes()),
    }
    .into()
}

pub fn end_key(target: &EntityId, k: i32) -> Inbound {
    SyncMessage::EndKey {
        entity: target.clone(),
        version: VERSION,
        key: key(k),
    }
    .into()
}

pub fn end_entity(target: &EntityId) -> Inbound {
    SyncMessage::EndEntity {
        entity: target.clone(),
        version: VERSION,
    }
    .into()
}

pub fn end_sync(final_bytes: &[u8]) -> Inbound {
    SyncMessage::EndSync {
        final_bytes: Bytes::copy_from_slice(final_bytes),
    }
    .into()
}

pub struct Rig {
    pub engine: ReplicationSyncEngine,
    pub entities: Arc<FakeEntityManager>,
    pub acks: Arc<RecordingAcks>,
}

impl Rig {
    pub fn inline() -> Self {
        Self::with(Limits::default(), Box::new(InlineExecutor))
    }

    pub fn with(limits: Limits, executor: Box<dyn ApplyExecutor>) -> Self {
        let entities = FakeEntityManager::new();
        let acks = RecordingAcks::new();
        let engine = ReplicationSyncEngine::new(
            EngineConfig::new(active(), limits),
            entities.clone(),
            acks.clone(),
            executor,
        );
        Self {
            engine,
            entities,
            acks,
        }
    }
}
