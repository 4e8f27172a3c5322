#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod paths;
pub mod repl;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the common vocabulary at crate root
pub use crate::cluster::{ClusterState, ClusterStatePersistor, FlatFilePersistor};
pub use crate::core::{
    ChannelId, ConcurrencyKey, ConnectionId, EntityId, GroupId, Inbound, LifecycleState, Limits,
    ReplicationAck, ReplicationMessage, ServerId, StripeId, SyncMessage,
};
pub use crate::discovery::MembershipDiscovery;
pub use crate::repl::{PassiveBootstrap, ReplicationSyncEngine};
