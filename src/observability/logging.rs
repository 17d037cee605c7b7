//! Structured logging.
//!
//! # Responsibilities
//! - Resolve the log file path (config value, then `XMPPD_LOG_PATH`, then the default)
//! - Initialize the tracing subscriber with a console layer
//! - Add the configured log backend on top (no-op unless selected)

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::{LogBackendKind, LoggingConfig};

/// Environment variable consulted when no log path is configured.
pub const LOG_PATH_ENV: &str = "XMPPD_LOG_PATH";

/// Log path used when neither config nor environment provide one.
pub const DEFAULT_LOG_PATH: &str = "/var/log/xmppd/xmppd.log";

/// A type-erased layer that can sit directly on the registry.
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Resolve the log file path.
///
/// `env` looks up an environment variable by name; it is only consulted when
/// `configured` is `None`. Empty environment values are ignored.
pub fn resolve_log_path<F>(configured: Option<&Path>, env: F) -> PathBuf
where
    F: FnOnce(&str) -> Option<String>,
{
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    match env(LOG_PATH_ENV) {
        Some(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_LOG_PATH),
    }
}

/// [`resolve_log_path`] against the real process environment.
pub fn log_path(configured: Option<&Path>) -> PathBuf {
    resolve_log_path(configured, |key| std::env::var(key).ok())
}

/// A pluggable log sink.
pub trait LogBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build the layer for this backend, if it produces one.
    ///
    /// The returned guard flushes buffered output when dropped.
    fn install(&self, path: &Path) -> io::Result<Option<(BoxedLayer, WorkerGuard)>>;
}

/// Backend that adds nothing.
#[derive(Debug, Default)]
pub struct NoopBackend;

impl LogBackend for NoopBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn install(&self, _path: &Path) -> io::Result<Option<(BoxedLayer, WorkerGuard)>> {
        Ok(None)
    }
}

/// Backend appending plain-text events to a single file.
#[derive(Debug, Default)]
pub struct FileBackend;

impl LogBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn install(&self, path: &Path) -> io::Result<Option<(BoxedLayer, WorkerGuard)>> {
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("log path {} has no file name", path.display()),
            )
        })?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let appender = tracing_appender::rolling::never(dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(writer)
            .boxed();
        Ok(Some((layer, guard)))
    }
}

/// Select the backend named by configuration.
pub fn backend_for(kind: LogBackendKind) -> Box<dyn LogBackend> {
    match kind {
        LogBackendKind::None => Box::new(NoopBackend),
        LogBackendKind::File => Box::new(FileBackend),
    }
}

/// Keeps the log backend alive. Drop it last.
#[derive(Debug)]
pub struct LoggingGuard {
    path: PathBuf,
    _file: Option<WorkerGuard>,
}

impl LoggingGuard {
    /// The resolved log path, whether or not a file backend uses it.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Initialize the global tracing subscriber.
pub fn init_logging(config: &LoggingConfig) -> io::Result<LoggingGuard> {
    let path = log_path(config.path.as_deref());
    let backend = backend_for(config.backend);
    let (file_layer, file_guard) = match backend.install(&path)? {
        Some((layer, guard)) => (Some(layer), Some(guard)),
        None => (None, None),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .with(fmt::layer())
        .try_init();

    tracing::debug!(backend = backend.name(), path = %path.display(), "Logging initialized");

    Ok(LoggingGuard {
        path,
        _file: file_guard,
    })
}
