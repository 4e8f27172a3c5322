//! Cluster identity and connection bookkeeping for one node.

pub mod data_dir_lock;
mod error;
pub mod persist;
pub mod state;
pub mod stripe_ids;

pub use data_dir_lock::{DataDirLock, DataDirLockError, DataDirLockMeta};
pub use error::{ClusterStateError, PersistError};
pub use persist::{
    ClusterStatePersistor, ClusterStateRecord, FlatFilePersistor, MemoryPersistor, StripeIdEntry,
};
pub use state::{ClusterState, ConnectionIdFactory};
pub use stripe_ids::StripeIdStateManager;
