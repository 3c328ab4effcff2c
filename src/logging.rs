//! Log output setup.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to the
//! application. [`init`] is a convenience for binaries and tests that do not
//! have one of their own.

use tracing_subscriber::EnvFilter;

use crate::config::TollgateConfig;
use crate::error::{Error, ErrorContext};
use crate::Result;

/// Installs a formatting subscriber filtered by `RUST_LOG`, or by
/// `TOLLGATE_LOG_LEVEL` / the default level when `RUST_LOG` is unset.
pub fn init() -> Result<()> {
    let level = TollgateConfig::from_env()
        .map(|c| c.log_level)
        .unwrap_or_else(|_| TollgateConfig::default().log_level);
    init_with_level(&level)
}

pub fn init_with_level(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| {
            Error::configuration_with_context(
                format!("invalid log filter: {e}"),
                ErrorContext::new()
                    .with_field_path("log_level")
                    .with_details(level.to_string())
                    .with_source("logging"),
            )
        })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| {
            Error::runtime_with_context(
                format!("cannot install subscriber: {e}"),
                ErrorContext::new().with_source("logging"),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_reports_error() {
        let _ = init_with_level("debug");
        assert!(init_with_level("debug").is_err());
    }
}
