//! XDG directory helpers for data and log locations.

use std::path::PathBuf;

use crate::config::ENV_DATA_DIR;

const APP_DIR: &str = "stripe-sync";

/// Base directory for per-server state.
///
/// Uses `STRIPE_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/stripe-sync` or
/// `~/.local/share/stripe-sync`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join(APP_DIR)
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}
