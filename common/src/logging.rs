use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level`. Output goes to `logging.file`
/// because the terminal UI owns stdout; if the file cannot be opened the
/// logs fall back to stderr.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.level.parse().unwrap_or_default());

    match OpenOptions::new().create(true).append(true).open(&config.file) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            tracing::warn!(file = %config.file.display(), error = %e, "cannot open log file, logging to stderr");
        }
    }
}
