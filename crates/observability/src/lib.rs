// crates/observability/src/lib.rs
//! Tracing setup shared by the reelrun binaries.
//!
//! Installs one global subscriber: an `EnvFilter` (`RUST_LOG`, falling back
//! to [`LogConfig::default_filter`]), a console layer, and optionally a
//! non-blocking file layer under [`LogConfig::log_dir`].

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const DEFAULT_FILTER: &str = "info,tower_http=info";
pub const DEFAULT_LOG_FILE: &str = "api_server.log";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset or invalid.
    pub default_filter: String,
    /// Directory for the server log file. `None` logs to the console only.
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    /// Emit JSON lines on the console instead of compact text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            log_dir: None,
            file_name: DEFAULT_LOG_FILE.to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(&self.file_name))
    }
}

/// Keeps the file writer alive. Buffered lines are flushed when dropped,
/// so hold it until the end of `main`.
#[must_use = "dropping the guard stops file logging"]
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter(default_filter: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(default_filter)?),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<TracingGuard> {
    let filter = env_filter(&config.default_filter)?;

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::never(dir, &config.file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console = if config.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().compact().boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(TracingGuard { _file: guard })
}
