use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LogLevel};

#[derive(Debug, Error)]
#[error("failed to initialize logging: {0}")]
pub struct LoggingError(String);

/// Initialize structured logging to stdout.
///
/// - `LogFormat::Json`: flattened JSON (production, log aggregator
///   compatible).
/// - `LogFormat::Text`: human-readable colored output (development).
///
/// Uses `RUST_LOG` if set, otherwise the given `level`. Reconcile
/// workers interleave freely across runtime threads, so events carry
/// no thread ids; the `iface`/`id` fields on each event are the
/// correlation keys. Fails if a global subscriber is already set.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_current_span(true)
                    .with_ansi(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(fmt::layer().pretty().with_target(true).with_ansi(true))
            .try_init(),
    }
    .map_err(|e| LoggingError(e.to_string()))
}
