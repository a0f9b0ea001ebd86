//! Logging utilities

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Reads `RUST_LOG`; safe to call more than once.
pub fn init() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp_millis()
        .try_init();
}
