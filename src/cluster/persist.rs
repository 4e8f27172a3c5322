//! Durable cluster-state backends.
//!
//! Every setter is synchronous: when it returns `Ok`, the value is on disk
//! (or in the in-memory record, for [`MemoryPersistor`]).

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::{ConnectionId, GroupId, LifecycleState, ServerId, StripeId};

use super::data_dir_lock::DataDirLock;
use super::error::PersistError;

pub const STATE_FILE_NAME: &str = "cluster_state.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeIdEntry {
    pub group: GroupId,
    pub stripe: StripeId,
}

/// One node's persisted record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterStateRecord {
    pub stripe_id: Option<StripeId>,
    pub group_id: GroupId,
    pub state: LifecycleState,
    pub connections: BTreeSet<ConnectionId>,
    pub stripe_ids: Vec<StripeIdEntry>,
}

pub trait ClusterStatePersistor: Send + Sync {
    fn stripe_id(&self) -> Result<Option<StripeId>, PersistError>;
    fn set_stripe_id(&self, id: StripeId) -> Result<(), PersistError>;

    /// [`GroupId::NULL`] when never set.
    fn group_id(&self) -> Result<GroupId, PersistError>;
    fn set_group_id(&self, id: GroupId) -> Result<(), PersistError>;

    fn current_state(&self) -> Result<LifecycleState, PersistError>;
    fn connections(&self) -> Result<BTreeSet<ConnectionId>, PersistError>;
    /// Lifecycle state and live connections land in one write.
    fn set_current_state(
        &self,
        state: LifecycleState,
        connections: &BTreeSet<ConnectionId>,
    ) -> Result<(), PersistError>;

    fn stripe_id_map(&self) -> Result<BTreeMap<GroupId, StripeId>, PersistError>;
    fn set_stripe_id_map(&self, map: &BTreeMap<GroupId, StripeId>) -> Result<(), PersistError>;
}

fn entries(map: &BTreeMap<GroupId, StripeId>) -> Vec<StripeIdEntry> {
    map.iter()
        .map(|(group, stripe)| StripeIdEntry {
            group: *group,
            stripe: *stripe,
        })
        .collect()
}

fn to_map(entries: &[StripeIdEntry]) -> BTreeMap<GroupId, StripeId> {
    entries.iter().map(|e| (e.group, e.stripe)).collect()
}

/// Process-lifetime backend.
#[derive(Debug, Default)]
pub struct MemoryPersistor {
    record: Mutex<ClusterStateRecord>,
}

impl MemoryPersistor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ClusterStateRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }

    pub fn record(&self) -> ClusterStateRecord {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterStateRecord> {
        self.record.lock().expect("memory persistor lock poisoned")
    }
}

impl ClusterStatePersistor for MemoryPersistor {
    fn stripe_id(&self) -> Result<Option<StripeId>, PersistError> {
        Ok(self.lock().stripe_id)
    }

    fn set_stripe_id(&self, id: StripeId) -> Result<(), PersistError> {
        self.lock().stripe_id = Some(id);
        Ok(())
    }

    fn group_id(&self) -> Result<GroupId, PersistError> {
        Ok(self.lock().group_id)
    }

    fn set_group_id(&self, id: GroupId) -> Result<(), PersistError> {
        self.lock().group_id = id;
        Ok(())
    }

    fn current_state(&self) -> Result<LifecycleState, PersistError> {
        Ok(self.lock().state)
    }

    fn connections(&self) -> Result<BTreeSet<ConnectionId>, PersistError> {
        Ok(self.lock().connections.clone())
    }

    fn set_current_state(
        &self,
        state: LifecycleState,
        connections: &BTreeSet<ConnectionId>,
    ) -> Result<(), PersistError> {
        let mut record = self.lock();
        record.state = state;
        record.connections = connections.clone();
        Ok(())
    }

    fn stripe_id_map(&self) -> Result<BTreeMap<GroupId, StripeId>, PersistError> {
        Ok(to_map(&self.lock().stripe_ids))
    }

    fn set_stripe_id_map(&self, map: &BTreeMap<GroupId, StripeId>) -> Result<(), PersistError> {
        self.lock().stripe_ids = entries(map);
        Ok(())
    }
}

/// One JSON record per server directory, replaced atomically on every write.
#[derive(Debug)]
pub struct FlatFilePersistor {
    path: PathBuf,
    record: Mutex<ClusterStateRecord>,
    _lock: DataDirLock,
}

impl FlatFilePersistor {
    /// Opens (creating if needed) `<data_dir>/<server>/`. Fails if another
    /// process holds the directory.
    pub fn open(data_dir: &Path, server: &ServerId) -> Result<Self, PersistError> {
        let dir = data_dir.join(server.as_str());
        let lock = DataDirLock::acquire(&dir, server)?;
        let path = dir.join(STATE_FILE_NAME);

        let record = match fs::read(&path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|source| PersistError::Corrupt {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => ClusterStateRecord::default(),
            Err(source) => return Err(PersistError::Io { path, source }),
        };
        tracing::debug!(path = %path.display(), state = %record.state, "cluster state opened");

        Ok(Self {
            path,
            record: Mutex::new(record),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&ClusterStateRecord) -> T) -> T {
        f(&self.record.lock().expect("cluster state record lock poisoned"))
    }

    /// Apply `f` to a copy, write it, then commit the copy in memory.
    fn update(&self, f: impl FnOnce(&mut ClusterStateRecord)) -> Result<(), PersistError> {
        let mut record = self
            .record
            .lock()
            .expect("cluster state record lock poisoned");
        let mut next = record.clone();
        f(&mut next);
        self.write(&next)?;
        *record = next;
        Ok(())
    }

    fn write(&self, record: &ClusterStateRecord) -> Result<(), PersistError> {
        let io_err = |source: io::Error| PersistError::Io {
            path: self.path.clone(),
            source,
        };
        let dir = self.path.parent().ok_or_else(|| PersistError::Unavailable {
            reason: format!("{} has no parent directory", self.path.display()),
        })?;
        let bytes = serde_json::to_vec_pretty(record).map_err(|source| PersistError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        temp.write_all(&bytes).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

impl ClusterStatePersistor for FlatFilePersistor {
    fn stripe_id(&self) -> Result<Option<StripeId>, PersistError> {
        Ok(self.read(|r| r.stripe_id))
    }

    fn set_stripe_id(&self, id: StripeId) -> Result<(), PersistError> {
        self.update(|r| r.stripe_id = Some(id))
    }

    fn group_id(&self) -> Result<GroupId, PersistError> {
        Ok(self.read(|r| r.group_id))
    }

    fn set_group_id(&self, id: GroupId) -> Result<(), PersistError> {
        self.update(|r| r.group_id = id)
    }

    fn current_state(&self) -> Result<LifecycleState, PersistError> {
        Ok(self.read(|r| r.state))
    }

    fn connections(&self) -> Result<BTreeSet<ConnectionId>, PersistError> {
        Ok(self.read(|r| r.connections.clone()))
    }

    fn set_current_state(
        &self,
        state: LifecycleState,
        connections: &BTreeSet<ConnectionId>,
    ) -> Result<(), PersistError> {
        self.update(|r| {
            r.state = state;
            r.connections = connections.clone();
        })
    }

    fn stripe_id_map(&self) -> Result<BTreeMap<GroupId, StripeId>, PersistError> {
        Ok(self.read(|r| to_map(&r.stripe_ids)))
    }

    fn set_stripe_id_map(&self, map: &BTreeMap<GroupId, StripeId>) -> Result<(), PersistError> {
        let list = entries(map);
        self.update(|r| r.stripe_ids = list)
    }
}
