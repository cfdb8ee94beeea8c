//! Logging initialization.
//!
//! RUST_LOG takes priority when set; otherwise the supplied default level
//! applies. Output format is compact by default, JSON when requested.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Initializes the logging system. Safe to call more than once; only the
/// first call installs a subscriber.
pub fn init_logging(default_level: &str, json: bool) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(default_level)
    };

    if json {
        let subscriber = tracing_subscriber::registry().with(env_filter).with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE),
        );
        let _ = tracing::subscriber::set_global_default(subscriber);
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().compact());
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}
