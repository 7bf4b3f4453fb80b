//! Logging setup using tracing.
//!
//! Logs go to stderr so that stdout stays free for the document.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Default filter when neither `RUST_LOG` nor `--log-filter` is given.
pub const DEFAULT_FILTER: &str = "info,xavyo_collector_azure=info";

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `filter`.
pub fn init_logging(filter: &str, format: LogFormat) {
    let filter_layer =
        match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(filter)) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("FATAL: Failed to create log filter: {e}");
                std::process::exit(1);
            }
        };

    let registry = tracing_subscriber::registry().with(filter_layer);
    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            )
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init(),
    }

    tracing::debug!(filter = %filter, ?format, "Logging initialized");
}
