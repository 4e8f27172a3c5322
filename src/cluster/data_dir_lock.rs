//! Exclusive ownership of a server's data directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::ServerId;
use crate::error::Transience;

pub const LOCK_FILE_NAME: &str = "startup.lck";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDirLockMeta {
    pub server: ServerId,
    pub pid: u32,
    pub started_at_ms: u64,
    pub version: String,
}

impl DataDirLockMeta {
    pub fn new(server: ServerId, started_at_ms: u64) -> Self {
        Self {
            server,
            pid: std::process::id(),
            started_at_ms,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Held while a process owns `dir`. Released on drop.
#[derive(Debug)]
pub struct DataDirLock {
    path: PathBuf,
    meta: DataDirLockMeta,
    released: bool,
}

impl DataDirLock {
    pub fn acquire(dir: &Path, server: &ServerId) -> Result<Self, DataDirLockError> {
        ensure_dir(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        reject_symlink(&path)?;

        let meta = DataDirLockMeta::new(server.clone(), now_ms());

        let mut file = match open_new_lock_file(&path) {
            Ok(file) => file,
            Err(DataDirLockError::Io(err)) if err.kind() == io::ErrorKind::AlreadyExists => {
                let (holder, meta_error) = match read_metadata(&path) {
                    Ok(meta) => (Some(meta), None),
                    Err(err) => (None, Some(err.to_string())),
                };
                return Err(DataDirLockError::Held {
                    path: Box::new(path),
                    holder: holder.map(Box::new),
                    meta_error,
                });
            }
            Err(err) => return Err(err),
        };

        write_metadata(&mut file, &path, &meta)?;

        Ok(Self {
            path,
            meta,
            released: false,
        })
    }

    pub fn meta(&self) -> &DataDirLockMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), DataDirLockError> {
        if !self.released {
            self.released = true;
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

impl Drop for DataDirLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Who holds the lock in `dir`, if anyone.
pub fn read_lock_meta(dir: &Path) -> Result<Option<DataDirLockMeta>, DataDirLockError> {
    let path = dir.join(LOCK_FILE_NAME);
    match fs::symlink_metadata(&path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(DataDirLockError::Symlink { path }),
        Ok(_) => Ok(Some(read_metadata(&path)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(DataDirLockError::Io(err)),
    }
}

#[derive(Debug, Error)]
pub enum DataDirLockError {
    #[error("data directory lock already held at {path:?}")]
    Held {
        path: Box<PathBuf>,
        holder: Option<Box<DataDirLockMeta>>,
        meta_error: Option<String>,
    },
    #[error("data directory lock path is a symlink: {path:?}")]
    Symlink { path: PathBuf },
    #[error("lock metadata corrupted at {path:?}: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl DataDirLockError {
    pub fn transience(&self) -> Transience {
        match self {
            DataDirLockError::Held { .. } => Transience::Retryable,
            DataDirLockError::Symlink { .. } | DataDirLockError::MetadataCorrupt { .. } => {
                Transience::Permanent
            }
            DataDirLockError::Io(_) => Transience::Unknown,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn ensure_dir(path: &Path) -> Result<(), DataDirLockError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                return Err(DataDirLockError::Symlink {
                    path: path.to_path_buf(),
                });
            }
            if !meta.is_dir() {
                return Err(DataDirLockError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("expected directory at {:?}", path),
                )));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
        }
        Err(err) => return Err(DataDirLockError::Io(err)),
    }
    set_dir_permissions(path, 0o700)?;
    Ok(())
}

fn reject_symlink(path: &Path) -> Result<(), DataDirLockError> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            return Err(DataDirLockError::Symlink {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}

fn read_metadata(path: &Path) -> Result<DataDirLockMeta, DataDirLockError> {
    reject_symlink(path)?;
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| DataDirLockError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_metadata(
    file: &mut fs::File,
    path: &Path,
    meta: &DataDirLockMeta,
) -> Result<(), DataDirLockError> {
    serde_json::to_writer(&mut *file, meta).map_err(|source| DataDirLockError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all()?;
    Ok(())
}

fn open_new_lock_file(path: &Path) -> Result<fs::File, DataDirLockError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true).mode(0o600);
        Ok(options.open(path)?)
    }
    #[cfg(not(unix))]
    {
        Ok(fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?)
    }
}

fn set_dir_permissions(path: &Path, mode: u32) -> Result<(), DataDirLockError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}
