//! Narrow contracts the engine consumes: entity manager, entity handles,
//! codecs and the acknowledgement path back to the active.

use std::any::Any;
use std::sync::Arc;

use bytes::Bytes;

use crate::core::{
    ClientId, ConcurrencyKey, EntityId, ReplicationAck, SequenceNumber, ServerId, TransactionId,
};
use crate::discovery::TransportError;

use super::completion::CompletionHandle;
use super::error::{CodecError, EntityError};

/// Entity-defined decoded message. Only the entity knows the concrete type.
pub type EntityMessage = Box<dyn Any + Send>;

/// Decodes live operation payloads for one entity type.
pub trait MessageCodec: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<EntityMessage, CodecError>;
}

/// Decodes snapshot chunks for one entity type.
pub trait SyncMessageCodec: Send + Sync {
    fn decode(&self, key: ConcurrencyKey, payload: &[u8]) -> Result<EntityMessage, CodecError>;
}

/// What the entity is asked to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityAction {
    SyncEntityStart,
    SyncKeyStart,
    SyncPayload,
    SyncKeyEnd,
    SyncEntityEnd,
    Create,
    Invoke,
    Destroy,
    Noop,
    Reconfigure,
}

impl EntityAction {
    pub fn is_sync(self) -> bool {
        matches!(
            self,
            EntityAction::SyncEntityStart
                | EntityAction::SyncKeyStart
                | EntityAction::SyncPayload
                | EntityAction::SyncKeyEnd
                | EntityAction::SyncEntityEnd
        )
    }
}

/// Request envelope handed to an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityRequest {
    pub action: EntityAction,
    pub source: ServerId,
    pub client: ClientId,
    pub transaction: TransactionId,
    pub key: ConcurrencyKey,
    /// Present for live operations; sync traffic carries none.
    pub sequence: Option<SequenceNumber>,
}

/// Body accompanying an [`EntityRequest`].
pub enum RequestPayload {
    None,
    /// Entity configuration (create / reconfigure).
    Config(Bytes),
    /// Decoded live operation.
    Message(EntityMessage),
    /// Decoded snapshot chunk.
    Sync(EntityMessage),
}

impl std::fmt::Debug for RequestPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestPayload::None => f.write_str("None"),
            RequestPayload::Config(bytes) => write!(f, "Config({} bytes)", bytes.len()),
            RequestPayload::Message(_) => f.write_str("Message(..)"),
            RequestPayload::Sync(_) => f.write_str("Sync(..)"),
        }
    }
}

/// A live entity instance on this node.
///
/// `add_request` may finish asynchronously; the entity reports the outcome
/// through the completion handle.
pub trait ManagedEntity: Send + Sync {
    fn id(&self) -> &EntityId;

    fn add_request(
        &self,
        request: EntityRequest,
        payload: RequestPayload,
        completion: CompletionHandle,
    );
}

pub trait EntityManager: Send + Sync {
    fn get_entity(&self, id: &EntityId, version: u64) -> Option<Arc<dyn ManagedEntity>>;

    fn create_entity(
        &self,
        id: &EntityId,
        version: u64,
        config: &[u8],
        can_delete: bool,
    ) -> Result<Arc<dyn ManagedEntity>, EntityError>;

    fn message_codec(&self, id: &EntityId) -> Arc<dyn MessageCodec>;

    fn sync_message_codec(&self, id: &EntityId) -> Arc<dyn SyncMessageCodec>;

    /// Global bookkeeping once a whole sync pass has been applied.
    fn sync_complete(&self, final_bytes: &[u8]) -> Result<(), EntityError>;
}

/// Outbound acknowledgement path to the node that sent an operation.
pub trait AckSender: Send + Sync {
    fn send_to(&self, target: &ServerId, ack: ReplicationAck) -> Result<(), TransportError>;
}
