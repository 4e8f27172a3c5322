use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{GroupId, LifecycleState, StripeId};
use crate::error::Transience;

use super::data_dir_lock::DataDirLockError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PersistError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cluster state record corrupted at {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("persistence unavailable: {reason}")]
    Unavailable { reason: String },
    #[error(transparent)]
    Lock(#[from] DataDirLockError),
}

impl PersistError {
    pub fn transience(&self) -> Transience {
        match self {
            PersistError::Corrupt { .. } => Transience::Permanent,
            PersistError::Lock(err) => err.transience(),
            PersistError::Io { .. } | PersistError::Unavailable { .. } => Transience::Unknown,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterStateError {
    /// The node holds another stripe's data; it must not keep serving.
    #[error("stripe id mismatch: persisted {persisted}, received {received}")]
    StripeIdMismatch {
        persisted: StripeId,
        received: StripeId,
    },

    #[error(
        "group id mismatch: persisted {persisted}, configured {configured}; data directory holds data from the incorrect stripe"
    )]
    GroupMismatch {
        persisted: GroupId,
        configured: GroupId,
    },

    #[error("cannot generate a stripe id while {state}")]
    StripeIdAssignment { state: LifecycleState },

    #[error("no stripe id assigned")]
    StripeIdMissing,

    #[error("stripe id {stripe} for {group} conflicts with registered {existing}")]
    StripeIdConflict {
        group: GroupId,
        existing: StripeId,
        stripe: StripeId,
    },

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl ClusterStateError {
    pub fn transience(&self) -> Transience {
        match self {
            ClusterStateError::Persist(err) => err.transience(),
            _ => Transience::Permanent,
        }
    }

    /// Identity faults stop the node outright.
    pub fn is_identity_fault(&self) -> bool {
        matches!(
            self,
            ClusterStateError::StripeIdMismatch { .. }
                | ClusterStateError::GroupMismatch { .. }
                | ClusterStateError::StripeIdConflict { .. }
        )
    }
}
