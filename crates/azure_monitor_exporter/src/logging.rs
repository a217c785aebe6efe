//! Log subscriber setup for binaries.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. Binaries in this crate call [`init_logging`]:
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, default "info")
//!   └── Fmt Layer (stderr)
//! ```

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber, honoring `RUST_LOG`.
pub fn init_logging() -> Result<(), LoggingError> {
    init_logging_with_default("info")
}

/// Like [`init_logging`], with `default_directive` used when `RUST_LOG` is
/// unset or invalid.
pub fn init_logging_with_default(default_directive: &str) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        // another test may have installed a subscriber first
        let _ = init_logging_with_default("debug");
        assert!(matches!(init_logging(), Err(LoggingError::AlreadyInitialized(_))));
    }
}
