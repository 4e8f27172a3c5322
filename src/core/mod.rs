//! Core domain types shared by the replication engine, cluster state and
//! membership discovery.
//!
//! - identity: stripe, group, server, connection and entity identifiers
//! - message: the replication stream vocabulary and acknowledgements
//! - lifecycle: node role states
//! - limits: buffering bounds

pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod limits;
pub mod message;

pub use error::{CoreError, InvalidId};
pub use identity::{
    ChannelId, ClientId, ClientInstanceId, ConcurrencyKey, ConnectionId, EntityDescriptor,
    EntityId, GroupId, SequenceNumber, ServerId, StripeId, TransactionId,
};
pub use lifecycle::LifecycleState;
pub use limits::Limits;
pub use message::{Inbound, OperationKind, ReplicationAck, ReplicationMessage, SyncMessage};
