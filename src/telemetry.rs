//! Tracing subscriber setup: env filter, stdout layer, optional rolling file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use crate::paths;

const LOG_FILE_PREFIX: &str = "stripe-sync.log";
const LOG_ENV_VAR: &str = "STRIPE_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self { verbosity, logging }
    }
}

/// Keeps the non-blocking file writer flushing until dropped.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.logging.stdout {
        layers.push(stdout_layer(config.logging.stdout_format));
    }

    let mut prune_report = None;
    let mut setup_error = None;
    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging.file);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let retention = RetentionLimits::from_file_config(&config.logging.file);
                if retention.is_enabled() {
                    match prune_logs(&dir, LOG_FILE_PREFIX, retention, SystemTime::now()) {
                        Ok(report) => prune_report = Some(report),
                        Err(err) => setup_error = Some(format!("log retention failed: {err}")),
                    }
                }
                let (layer, guard) = file_layer(&config.logging.file, &dir);
                layers.push(layer);
                guards.push(guard);
            }
            Err(err) => {
                setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(build_filter(
        config.verbosity,
        config.logging.filter.as_deref(),
    )));

    if Registry::default().with(layers).try_init().is_err() {
        tracing::debug!("global subscriber already installed");
    }

    if let Some(report) = prune_report {
        tracing::info!(
            pruned = report.removed,
            failed = report.failed,
            candidates = report.candidates,
            "log retention applied"
        );
    }
    if let Some(error) = setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

/// `STRIPE_LOG` wins; then the configured directive; then verbosity.
fn build_filter(verbosity: u8, configured: Option<&str>) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(level_from_verbosity(verbosity).into());
    if std::env::var_os(LOG_ENV_VAR).is_some() {
        return builder.with_env_var(LOG_ENV_VAR).from_env_lossy();
    }
    match configured {
        Some(directives) => builder.parse_lossy(directives),
        None => builder.parse_lossy(""),
    }
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}

fn stdout_layer(format: LogFormat) -> BoxedLayer {
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true);
    match format {
        LogFormat::Tree => Box::new(tracing_tree::HierarchicalLayer::new(2)),
        LogFormat::Pretty => Box::new(fmt.pretty()),
        LogFormat::Compact => Box::new(fmt.compact()),
        LogFormat::Json => Box::new(fmt.json().with_current_span(true).with_span_list(true)),
    }
}

fn file_layer(
    config: &FileLoggingConfig,
    dir: &Path,
) -> (BoxedLayer, tracing_appender::non_blocking::WorkerGuard) {
    let rotation = match config.rotation {
        LogRotation::Daily => tracing_appender::rolling::Rotation::DAILY,
        LogRotation::Hourly => tracing_appender::rolling::Rotation::HOURLY,
        LogRotation::Minutely => tracing_appender::rolling::Rotation::MINUTELY,
        LogRotation::Never => tracing_appender::rolling::Rotation::NEVER,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(writer.clone())
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);
    let layer: BoxedLayer = match config.format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(fmt.pretty()),
        LogFormat::Compact => Box::new(fmt.compact()),
        LogFormat::Json => Box::new(fmt.json().with_current_span(true).with_span_list(true)),
    };
    (layer, guard)
}

fn resolve_log_dir(config: &FileLoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(paths::log_dir)
}

#[derive(Clone, Copy, Debug, Default)]
struct RetentionLimits {
    max_age: Option<Duration>,
    max_files: Option<usize>,
}

impl RetentionLimits {
    fn from_file_config(config: &FileLoggingConfig) -> Self {
        Self {
            max_age: config
                .retention_max_age_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
            max_files: config.retention_max_files,
        }
    }

    fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_files.is_some()
    }
}

#[derive(Clone, Debug)]
struct LogEntry {
    path: PathBuf,
    modified: SystemTime,
}

#[derive(Clone, Debug, Default)]
struct PruneReport {
    candidates: usize,
    removed: usize,
    failed: usize,
}

fn prune_logs(
    dir: &Path,
    prefix: &str,
    retention: RetentionLimits,
    now: SystemTime,
) -> std::io::Result<PruneReport> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches_prefix = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix));
        if !matches_prefix {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            entries.push(LogEntry {
                path,
                modified: meta.modified().unwrap_or(now),
            });
        }
    }

    let mut report = PruneReport {
        candidates: entries.len(),
        ..PruneReport::default()
    };
    for path in expired_logs(&mut entries, retention, now) {
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(_) => report.failed += 1,
        }
    }
    Ok(report)
}

/// Entries past `max_age`, then the oldest beyond `max_files`.
fn expired_logs(
    entries: &mut Vec<LogEntry>,
    retention: RetentionLimits,
    now: SystemTime,
) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    if let Some(max_age) = retention.max_age {
        entries.retain(|entry| {
            let age = now.duration_since(entry.modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                removed.push(entry.path.clone());
                false
            } else {
                true
            }
        });
    }

    if let Some(max_files) = retention.max_files {
        entries.sort_by_key(|entry| entry.modified);
        if entries.len() > max_files {
            let excess = entries.len() - max_files;
            removed.extend(entries.drain(..excess).map(|entry| entry.path));
        }
    }

    removed
}
