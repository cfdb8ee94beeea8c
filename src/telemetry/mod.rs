//! Telemetry: logging setup for binaries embedding the engine.

mod logging;

pub use logging::init_logging;
