use std::fs;
use std::io::Write;
use std::path::Path;

use super::env::apply_env_overrides;
use super::{Config, ConfigError};

/// Read `path`, then apply environment overrides.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Like [`load`], but a missing or unreadable file yields defaults (still
/// subject to environment overrides).
pub fn load_or_default(path: &Path) -> Config {
    if !path.exists() {
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        return config;
    }
    match load(path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("config load failed, using defaults: {err}");
            let mut config = Config::default();
            apply_env_overrides(&mut config);
            config
        }
    }
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let contents = toml::to_string_pretty(config)?;

    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(contents.as_bytes()).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}
