//! Logging utilities and structured logging support

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Reads `RUST_LOG` like any `env_logger` setup. Calling it more than once is harmless,
/// which keeps tests and embedding applications from fighting over the global logger.
pub fn init() {
    if env_logger::try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
