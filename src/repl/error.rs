//! Replication engine error types.

use thiserror::Error;

use crate::core::{ConcurrencyKey, EntityId};
use crate::error::Transience;

/// Entity codec refused a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("payload decode failed: {reason}")]
pub struct CodecError {
    pub reason: String,
}

impl CodecError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Entity-manager side failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EntityError {
    #[error("entity {entity} could not be created: {reason}")]
    CreateFailed { entity: EntityId, reason: String },
    #[error("post-sync bookkeeping failed: {reason}")]
    SyncComplete { reason: String },
}

impl EntityError {
    pub fn transience(&self) -> Transience {
        Transience::Unknown
    }
}

/// Which deferral bound a queue ran into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverflowKind {
    Events,
    Bytes,
}

impl OverflowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OverflowKind::Events => "events",
            OverflowKind::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplError {
    /// Sync brackets arrived out of nesting order.
    #[error("protocol violation at {received}: {reason}")]
    Protocol {
        received: &'static str,
        reason: String,
    },

    #[error("deferred queue for {entity} key {key} exceeded its {} limit ({limit})", .kind.as_str())]
    DeferralOverflow {
        entity: EntityId,
        key: ConcurrencyKey,
        kind: OverflowKind,
        limit: usize,
    },

    #[error("sync payload for {entity} key {key} is {bytes} bytes (max {max})")]
    SyncPayloadTooLarge {
        entity: EntityId,
        key: ConcurrencyKey,
        bytes: usize,
        max: usize,
    },

    #[error("sync payload for {entity} key {key} could not be decoded: {source}")]
    SyncDecode {
        entity: EntityId,
        key: ConcurrencyKey,
        #[source]
        source: CodecError,
    },

    #[error("entity creation during sync failed: {source}")]
    EntityCreate {
        #[source]
        source: EntityError,
    },

    #[error("sync completion failed: {source}")]
    SyncComplete {
        #[source]
        source: EntityError,
    },

    /// The stream ended before END_SYNC; the bootstrap starts over.
    #[error("stream closed mid-sync")]
    SyncInterrupted,

    /// Input after a fatal fault; the session must be rebuilt.
    #[error("replication session already failed")]
    SessionFailed,

    #[error("replication session is closed")]
    SessionClosed,
}

impl ReplError {
    pub(crate) fn protocol(received: &'static str, reason: impl Into<String>) -> Self {
        ReplError::Protocol {
            received,
            reason: reason.into(),
        }
    }

    /// Whether this fault tears down the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ReplError::SessionClosed)
    }

    pub fn transience(&self) -> Transience {
        match self {
            ReplError::EntityCreate { source } | ReplError::SyncComplete { source } => {
                source.transience()
            }
            _ => Transience::Permanent,
        }
    }
}
