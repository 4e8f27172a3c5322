//! Replication stream vocabulary.
//!
//! The stream from one active is a total order of [`Inbound`] items:
//! sync-control brackets interleaved with live [`ReplicationMessage`]s.

use bytes::Bytes;

use super::identity::{
    ClientId, ConcurrencyKey, EntityDescriptor, EntityId, SequenceNumber, ServerId, TransactionId,
};

/// What a live replicated operation does to its entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Invoke,
    Destroy,
    Noop,
    Reconfigure,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Invoke => "invoke",
            OperationKind::Destroy => "destroy",
            OperationKind::Noop => "noop",
            OperationKind::Reconfigure => "reconfigure",
        }
    }
}

/// One live operation from a source node for one target entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationMessage {
    pub sequence: SequenceNumber,
    pub entity: EntityDescriptor,
    pub concurrency: ConcurrencyKey,
    pub kind: OperationKind,
    pub source: ServerId,
    pub client: ClientId,
    pub transaction: TransactionId,
    pub oldest_transaction_on_client: TransactionId,
    pub payload: Bytes,
}

impl ReplicationMessage {
    pub fn entity_id(&self) -> &EntityId {
        &self.entity.id
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Brackets of one sync pass. Always strictly nested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncMessage {
    StartSync,
    StartEntity {
        entity: EntityId,
        version: u64,
        config: Bytes,
        is_new_entity: bool,
    },
    StartKey {
        entity: EntityId,
        version: u64,
        key: ConcurrencyKey,
    },
    Payload {
        entity: EntityId,
        version: u64,
        key: ConcurrencyKey,
        bytes: Bytes,
    },
    EndKey {
        entity: EntityId,
        version: u64,
        key: ConcurrencyKey,
    },
    EndEntity {
        entity: EntityId,
        version: u64,
    },
    EndSync {
        final_bytes: Bytes,
    },
}

impl SyncMessage {
    pub fn kind_str(&self) -> &'static str {
        match self {
            SyncMessage::StartSync => "start_sync",
            SyncMessage::StartEntity { .. } => "start_entity",
            SyncMessage::StartKey { .. } => "start_key",
            SyncMessage::Payload { .. } => "sync_payload",
            SyncMessage::EndKey { .. } => "end_key",
            SyncMessage::EndEntity { .. } => "end_entity",
            SyncMessage::EndSync { .. } => "end_sync",
        }
    }

    pub fn entity(&self) -> Option<&EntityId> {
        match self {
            SyncMessage::StartEntity { entity, .. }
            | SyncMessage::StartKey { entity, .. }
            | SyncMessage::Payload { entity, .. }
            | SyncMessage::EndKey { entity, .. }
            | SyncMessage::EndEntity { entity, .. } => Some(entity),
            SyncMessage::StartSync | SyncMessage::EndSync { .. } => None,
        }
    }
}

/// One item of the ordered stream delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Sync(SyncMessage),
    Replicate(ReplicationMessage),
}

impl From<SyncMessage> for Inbound {
    fn from(msg: SyncMessage) -> Self {
        Inbound::Sync(msg)
    }
}

impl From<ReplicationMessage> for Inbound {
    fn from(msg: ReplicationMessage) -> Self {
        Inbound::Replicate(msg)
    }
}

/// Acknowledgement sent back to the source of a live operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicationAck {
    Received {
        sequence: SequenceNumber,
    },
    Completed {
        sequence: SequenceNumber,
        success: bool,
    },
}

impl ReplicationAck {
    pub fn sequence(&self) -> SequenceNumber {
        match self {
            ReplicationAck::Received { sequence } | ReplicationAck::Completed { sequence, .. } => {
                *sequence
            }
        }
    }
}
