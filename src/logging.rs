//! Logging setup and helpers.

use std::time::Instant;

use tracing::{info, span::EnteredSpan, Level};
use tracing_subscriber::EnvFilter;

/// Installs a global fmt subscriber. `RUST_LOG` overrides `default_level`.
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// A named section of work. Logs when it starts and, on drop, how long it took.
pub struct LoggingSection {
    name: String,
    start: Instant,
    _span: EnteredSpan,
}

pub fn logging_section(name: &str) -> LoggingSection {
    let span = tracing::span!(Level::INFO, "section", name = name).entered();
    info!("**** STARTING: {name} ****");
    LoggingSection { name: name.to_string(), start: Instant::now(), _span: span }
}

impl Drop for LoggingSection {
    fn drop(&mut self) {
        info!(
            "**** FINISHED: {} after {:0.2} seconds ****",
            self.name,
            self.start.elapsed().as_secs_f64()
        );
    }
}
