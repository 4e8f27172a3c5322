//! Passive-side replication: live apply, sync passes, deferral and acks.

pub mod bootstrap;
pub mod collab;
pub mod completion;
pub mod deferral;
pub mod engine;
mod error;
pub mod executor;
pub mod runtime;

pub use bootstrap::{BootstrapStage, PassiveBootstrap};
pub use collab::{
    AckSender, EntityAction, EntityManager, EntityMessage, EntityRequest, ManagedEntity,
    MessageCodec, RequestPayload, SyncMessageCodec,
};
pub use completion::CompletionHandle;
pub use deferral::{DeferDecision, DeferralTable};
pub use engine::{Admission, EngineConfig, EnginePhase, EngineStats, ReplicationSyncEngine};
pub use error::{CodecError, EntityError, OverflowKind, ReplError};
pub use executor::{ApplyExecutor, ApplyJob, InlineExecutor, KeyedExecutor};
pub use runtime::{EngineHandle, EngineRuntime, EngineSender, StreamConsumer};
