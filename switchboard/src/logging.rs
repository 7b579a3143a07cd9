use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber from settings
///
/// `log_level` uses `EnvFilter` syntax; when `log_file_path` is set, output
/// goes to that file instead of stdout (ANSI disabled).
///
/// # Errors
///
/// Returns an error if the log file cannot be opened.
pub fn init(log_level: &str, log_file_path: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match log_file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| anyhow::anyhow!("failed to open log file {}: {e}", path.display()))?;

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));

            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
        None => {
            let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
            tracing_subscriber::registry().with(filter).with(fmt_layer).init();
        }
    }

    Ok(())
}
