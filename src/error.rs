use thiserror::Error;

use crate::cluster::{ClusterStateError, DataDirLockError, PersistError};
use crate::config::ConfigError;
use crate::core::CoreError;
use crate::discovery::{DiscoveryError, TransportError};
use crate::repl::ReplError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transience::Permanent => "permanent",
            Transience::Retryable => "retryable",
            Transience::Unknown => "unknown",
        }
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Repl(#[from] ReplError),

    #[error(transparent)]
    ClusterState(#[from] ClusterStateError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    DataDirLock(#[from] DataDirLockError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Repl(e) => e.transience(),
            Error::ClusterState(e) => e.transience(),
            Error::Persist(e) => e.transience(),
            Error::DataDirLock(e) => e.transience(),
            Error::Discovery(e) => e.transience(),
            Error::Transport(e) => e.transience(),
            Error::Config(e) => e.transience(),
        }
    }
}
