//! Recording doubles for the entity manager, entities, codecs and ack path.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;

use stripe_sync::core::{ConcurrencyKey, EntityId, ReplicationAck, SequenceNumber, ServerId};
use stripe_sync::discovery::TransportError;
use stripe_sync::repl::{
    AckSender, CodecError, CompletionHandle, EntityAction, EntityError, EntityManager,
    EntityMessage, EntityRequest, ManagedEntity, MessageCodec, RequestPayload, SyncMessageCodec,
};

/// One request as an entity saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observed {
    pub entity: EntityId,
    pub action: EntityAction,
    pub key: ConcurrencyKey,
    pub sequence: Option<SequenceNumber>,
    pub body: Option<String>,
}

impl Observed {
    pub fn is_sync(&self) -> bool {
        self.action.is_sync()
    }
}

pub type ObservedLog = Arc<Mutex<Vec<Observed>>>;

pub struct FakeEntity {
    id: EntityId,
    log: ObservedLog,
    fail_applies: bool,
    panics: bool,
}

impl ManagedEntity for FakeEntity {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn add_request(
        &self,
        request: EntityRequest,
        payload: RequestPayload,
        completion: CompletionHandle,
    ) {
        let body = match payload {
            RequestPayload::None => None,
            RequestPayload::Config(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            RequestPayload::Message(msg) | RequestPayload::Sync(msg) => {
                msg.downcast::<String>().ok().map(|body| *body)
            }
        };
        self.log.lock().expect("log lock poisoned").push(Observed {
            entity: self.id.clone(),
            action: request.action,
            key: request.key,
            sequence: request.sequence,
            body,
        });
        if self.panics {
            panic!("{} blew up applying {:?}", self.id, request.action);
        }
        if self.fail_applies {
            completion.fail();
        } else {
            completion.complete();
        }
    }
}

/// Live payloads must be UTF-8.
pub struct Utf8Codec;

impl MessageCodec for Utf8Codec {
    fn decode(&self, payload: &[u8]) -> Result<EntityMessage, CodecError> {
        String::from_utf8(payload.to_vec())
            .map(|body| Box::new(body) as EntityMessage)
            .map_err(|err| CodecError::new(err.to_string()))
    }
}

/// Snapshot chunks decode to `sync:<key>:<body>`.
pub struct Utf8SyncCodec;

impl SyncMessageCodec for Utf8SyncCodec {
    fn decode(&self, key: ConcurrencyKey, payload: &[u8]) -> Result<EntityMessage, CodecError> {
        let body =
            std::str::from_utf8(payload).map_err(|err| CodecError::new(err.to_string()))?;
        Ok(Box::new(format!("sync:{key}:{body}")))
    }
}

#[derive(Default)]
pub struct FakeEntityManager {
    entities: Mutex<BTreeMap<EntityId, Arc<FakeEntity>>>,
    log: ObservedLog,
    created: Mutex<Vec<(EntityId, Vec<u8>)>>,
    refuse_create: Mutex<BTreeSet<EntityId>>,
    failing_entities: Mutex<BTreeSet<EntityId>>,
    panicking_entities: Mutex<BTreeSet<EntityId>>,
    sync_completions: Mutex<Vec<Bytes>>,
}

impl FakeEntityManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-register an entity as if it already existed on this node.
    pub fn with_entity(&self, id: &EntityId) {
        let entity = self.build(id);
        self.entities
            .lock()
            .expect("entities lock poisoned")
            .insert(id.clone(), entity);
    }

    pub fn refuse_create(&self, id: &EntityId) {
        self.refuse_create
            .lock()
            .expect("refuse lock poisoned")
            .insert(id.clone());
    }

    /// Entities created after this call complete every apply with failure.
    pub fn fail_applies(&self, id: &EntityId) {
        self.failing_entities
            .lock()
            .expect("failing lock poisoned")
            .insert(id.clone());
    }

    /// Entities created after this call panic inside every apply.
    pub fn panic_applies(&self, id: &EntityId) {
        self.panicking_entities
            .lock()
            .expect("panicking lock poisoned")
            .insert(id.clone());
    }

    pub fn observed(&self) -> Vec<Observed> {
        self.log.lock().expect("log lock poisoned").clone()
    }

    pub fn observed_for(&self, id: &EntityId) -> Vec<Observed> {
        self.observed()
            .into_iter()
            .filter(|obs| &obs.entity == id)
            .collect()
    }

    pub fn created(&self) -> Vec<(EntityId, Vec<u8>)> {
        self.created.lock().expect("created lock poisoned").clone()
    }

    pub fn sync_completions(&self) -> Vec<Bytes> {
        self.sync_completions
            .lock()
            .expect("sync lock poisoned")
            .clone()
    }

    fn build(&self, id: &EntityId) -> Arc<FakeEntity> {
        let fail_applies = self
            .failing_entities
            .lock()
            .expect("failing lock poisoned")
            .contains(id);
        let panics = self
            .panicking_entities
            .lock()
            .expect("panicking lock poisoned")
            .contains(id);
        Arc::new(FakeEntity {
            id: id.clone(),
            log: Arc::clone(&self.log),
            fail_applies,
            panics,
        })
    }
}

impl EntityManager for FakeEntityManager {
    fn get_entity(&self, id: &EntityId, _version: u64) -> Option<Arc<dyn ManagedEntity>> {
        self.entities
            .lock()
            .expect("entities lock poisoned")
            .get(id)
            .map(|entity| Arc::clone(entity) as Arc<dyn ManagedEntity>)
    }

    fn create_entity(
        &self,
        id: &EntityId,
        _version: u64,
        config: &[u8],
        _can_delete: bool,
    ) -> Result<Arc<dyn ManagedEntity>, EntityError> {
        if self
            .refuse_create
            .lock()
            .expect("refuse lock poisoned")
            .contains(id)
        {
            return Err(EntityError::CreateFailed {
                entity: id.clone(),
                reason: "refused by test".to_string(),
            });
        }
        let entity = self.build(id);
        self.entities
            .lock()
            .expect("entities lock poisoned")
            .insert(id.clone(), Arc::clone(&entity));
        self.created
            .lock()
            .expect("created lock poisoned")
            .push((id.clone(), config.to_vec()));
        Ok(entity)
    }

    fn message_codec(&self, _id: &EntityId) -> Arc<dyn MessageCodec> {
        Arc::new(Utf8Codec)
    }

    fn sync_message_codec(&self, _id: &EntityId) -> Arc<dyn SyncMessageCodec> {
        Arc::new(Utf8SyncCodec)
    }

    fn sync_complete(&self, final_bytes: &[u8]) -> Result<(), EntityError> {
        self.sync_completions
            .lock()
            .expect("sync lock poisoned")
            .push(Bytes::copy_from_slice(final_bytes));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAcks {
    sent: Mutex<Vec<(ServerId, ReplicationAck)>>,
}

impl RecordingAcks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<(ServerId, ReplicationAck)> {
        self.sent.lock().expect("acks lock poisoned").clone()
    }

    pub fn acks(&self) -> Vec<ReplicationAck> {
        self.sent().into_iter().map(|(_, ack)| ack).collect()
    }

    pub fn for_sequence(&self, seq: u64) -> Vec<ReplicationAck> {
        self.acks()
            .into_iter()
            .filter(|ack| ack.sequence().get() == seq)
            .collect()
    }

    /// Poll until at least `count` acks arrived or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sent.lock().expect("acks lock poisoned").len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        self.sent.lock().expect("acks lock poisoned").len() >= count
    }
}

impl AckSender for RecordingAcks {
    fn send_to(&self, target: &ServerId, ack: ReplicationAck) -> Result<(), TransportError> {
        self.sent
            .lock()
            .expect("acks lock poisoned")
            .push((target.clone(), ack));
        Ok(())
    }
}

pub fn received(seq: u64) -> ReplicationAck {
    ReplicationAck::Received {
        sequence: SequenceNumber::new(seq),
    }
}

pub fn completed(seq: u64, success: bool) -> ReplicationAck {
    ReplicationAck::Completed {
        sequence: SequenceNumber::new(seq),
        success,
    }
}
