use std::path::PathBuf;
use std::str::FromStr;

use crate::core::ServerId;

use super::Config;

pub const ENV_SERVER_NAME: &str = "STRIPE_SERVER_NAME";
pub const ENV_GROUP_ID: &str = "STRIPE_GROUP_ID";
pub const ENV_DATA_DIR: &str = "STRIPE_DATA_DIR";
pub const ENV_APPLY_WORKERS: &str = "STRIPE_APPLY_WORKERS";

pub fn apply_env_overrides(config: &mut Config) {
    if let Some(raw) = env_value(ENV_SERVER_NAME) {
        match ServerId::new(raw.clone()) {
            Ok(_) => config.cluster.server_name = raw,
            Err(err) => tracing::warn!("invalid {ENV_SERVER_NAME}, ignoring: {err}"),
        }
    }

    if let Some(group) = parsed::<i32>(ENV_GROUP_ID) {
        config.cluster.group_id = group;
    }

    if let Some(raw) = env_value(ENV_DATA_DIR) {
        config.cluster.data_dir = Some(PathBuf::from(raw));
    }

    if let Some(workers) = parsed::<usize>(ENV_APPLY_WORKERS) {
        config.apply.workers = workers;
    }
}

fn env_value(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parsed<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_value(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("invalid {key}, ignoring: {err}");
            None
        }
    }
}
