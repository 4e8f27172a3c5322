//! Config loading and persistence.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::Transience;

pub(crate) mod env;
mod load;
mod schema;

pub use env::{
    apply_env_overrides, ENV_APPLY_WORKERS, ENV_DATA_DIR, ENV_GROUP_ID, ENV_SERVER_NAME,
};
pub use load::{load, load_or_default, write_config};
pub use schema::{
    ApplyConfig, ClusterConfig, Config, FileLoggingConfig, LogFormat, LogRotation, LoggingConfig,
    MembershipConfig, PeerEntry,
};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn transience(&self) -> Transience {
        match self {
            ConfigError::Read { .. } | ConfigError::Write { .. } => Transience::Retryable,
            ConfigError::Parse { .. } | ConfigError::Render(_) | ConfigError::Invalid { .. } => {
                Transience::Permanent
            }
        }
    }
}
