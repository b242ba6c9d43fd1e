use std::io;
use std::sync::Once;

use medallion_config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

/// Directory for rolling log files in production.
const LOG_DIRECTORY: &str = "logs";

/// Variable that turns on log output in tests.
const ENABLE_TEST_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[from] io::Error),

    /// A global subscriber is already installed in this process.
    #[error("tracing is already initialized: {0}")]
    AlreadyInitialized(#[from] TryInitError),

    #[error("failed to forward `log` records to tracing: {0}")]
    LogBridge(#[from] tracing_log::log::SetLoggerError),
}

/// Handle that keeps the non-blocking log writer alive.
///
/// Buffered records are flushed when the handle is dropped or [`LogFlusher::shutdown`] is
/// called, so binaries hold it for the whole of `main`.
#[must_use = "dropping the flusher stops log output"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

impl LogFlusher {
    /// Flushes pending records and stops the background writer.
    pub fn shutdown(self) {
        drop(self);
    }
}

/// Installs the process-wide subscriber for a binary.
///
/// Development builds log human-readable lines to stdout. Production logs JSON to a daily
/// rolling file `logs/{app_name}.log`. `RUST_LOG` overrides the default `info` filter.
/// Calling this twice in one process fails with [`TracingError::AlreadyInitialized`].
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let guard = if environment.is_prod() {
        let appender = tracing_appender::rolling::daily(LOG_DIRECTORY, format!("{app_name}.log"));
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()?;

        guard
    } else {
        let (writer, guard) = tracing_appender::non_blocking(io::stdout());

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer))
            .try_init()?;

        guard
    };

    // The subscriber is built without its `tracing-log` feature, so this is the only bridge.
    tracing_log::LogTracer::init()?;

    ::tracing::info!(app = app_name, %environment, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
///
/// Output is only produced when `ENABLE_TRACING` is set, keeping `cargo test` quiet by default.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TEST_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        // Another test harness may have installed a subscriber already.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
