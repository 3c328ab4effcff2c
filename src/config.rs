//! Runtime configuration.
//!
//! Values come from defaults, a YAML document, or `TOLLGATE_*` environment
//! variables applied on top:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TOLLGATE_MAX_CONTEXT_NAMES` | `max_context_names` |
//! | `TOLLGATE_MAX_SLOT_CHAINS` | `max_slot_chains` |
//! | `TOLLGATE_SAMPLE_COUNT` | `sample_count` |
//! | `TOLLGATE_WINDOW_INTERVAL_MS` | `window_interval_ms` |
//! | `TOLLGATE_LOG_LEVEL` | `log_level` |

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, ErrorContext};
use crate::flow::DEFAULT_COLD_FACTOR;
use crate::node::WindowSpec;
use crate::Result;

pub const DEFAULT_CONTEXT_NAME: &str = "tollgate_default_context";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    /// Distinct context names kept; further names get a pass-through context.
    pub max_context_names: usize,
    /// Distinct resources given a slot chain; further resources pass unchecked.
    pub max_slot_chains: usize,
    /// Buckets in the one-second window.
    pub sample_count: u32,
    pub window_interval_ms: u32,
    /// Context used by entries made without naming one.
    pub default_context_name: String,
    pub cold_factor: u32,
    /// Fallback filter for [`crate::logging::init`] when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TollgateConfig {
    fn default() -> Self {
        Self {
            max_context_names: 2000,
            max_slot_chains: 6000,
            sample_count: 2,
            window_interval_ms: 1000,
            default_context_name: DEFAULT_CONTEXT_NAME.to_string(),
            cold_factor: DEFAULT_COLD_FACTOR,
            log_level: "info".to_string(),
        }
    }
}

impl TollgateConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            Error::Configuration { message, context } => Error::Configuration {
                message,
                context: context.with_source(path.as_ref().display().to_string()),
            },
            other => other,
        })
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overrides fields from `TOLLGATE_*` variables that are set.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse("TOLLGATE_MAX_CONTEXT_NAMES")? {
            self.max_context_names = v;
        }
        if let Some(v) = env_parse("TOLLGATE_MAX_SLOT_CHAINS")? {
            self.max_slot_chains = v;
        }
        if let Some(v) = env_parse("TOLLGATE_SAMPLE_COUNT")? {
            self.sample_count = v;
        }
        if let Some(v) = env_parse("TOLLGATE_WINDOW_INTERVAL_MS")? {
            self.window_interval_ms = v;
        }
        if let Ok(v) = std::env::var("TOLLGATE_LOG_LEVEL") {
            let v = v.trim();
            if !v.is_empty() {
                self.log_level = v.to_string();
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_context_names", self.max_context_names as u64),
            ("max_slot_chains", self.max_slot_chains as u64),
            ("sample_count", self.sample_count as u64),
            ("window_interval_ms", self.window_interval_ms as u64),
            ("cold_factor", self.cold_factor as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::configuration_with_context(
                    format!("{field} must be positive"),
                    ErrorContext::new().with_field_path(field).with_source("config"),
                ));
            }
        }
        if self.window_interval_ms % self.sample_count != 0 {
            return Err(Error::configuration_with_context(
                "window_interval_ms must be a multiple of sample_count",
                ErrorContext::new()
                    .with_field_path("window_interval_ms")
                    .with_details(format!(
                        "interval {} ms, {} samples",
                        self.window_interval_ms, self.sample_count
                    ))
                    .with_source("config"),
            ));
        }
        if self.default_context_name.is_empty() {
            return Err(Error::configuration_with_context(
                "default_context_name must not be empty",
                ErrorContext::new()
                    .with_field_path("default_context_name")
                    .with_source("config"),
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> WindowSpec {
        WindowSpec {
            sample_count: self.sample_count,
            interval_ms: self.window_interval_ms,
        }
    }

    pub fn with_max_context_names(mut self, n: usize) -> Self {
        self.max_context_names = n;
        self
    }

    pub fn with_max_slot_chains(mut self, n: usize) -> Self {
        self.max_slot_chains = n;
        self
    }

    pub fn with_window(mut self, sample_count: u32, interval_ms: u32) -> Self {
        self.sample_count = sample_count;
        self.window_interval_ms = interval_ms;
        self
    }

    pub fn with_default_context_name(mut self, name: impl Into<String>) -> Self {
        self.default_context_name = name.into();
        self
    }

    pub fn with_cold_factor(mut self, cold_factor: u32) -> Self {
        self.cold_factor = cold_factor;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    let Ok(raw) = std::env::var(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>().map(Some).map_err(|_| {
        Error::configuration_with_context(
            format!("cannot parse {key}"),
            ErrorContext::new()
                .with_field_path(key)
                .with_details(format!("value: {raw}"))
                .with_source("env"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TollgateConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window(), WindowSpec::default());
        assert_eq!(config.default_context_name, DEFAULT_CONTEXT_NAME);
    }

    #[test]
    fn test_yaml_partial_override() {
        let config = TollgateConfig::from_yaml_str(
            "max_slot_chains: 10\nsample_count: 4\nwindow_interval_ms: 2000\n",
        )
        .unwrap();
        assert_eq!(config.max_slot_chains, 10);
        assert_eq!(config.window().bucket_length_ms(), 500);
        assert_eq!(config.max_context_names, 2000);
    }

    #[test]
    fn test_rejects_bad_window() {
        let err = TollgateConfig::default()
            .with_window(3, 1000)
            .validate()
            .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("window_interval_ms")
        );

        let err = TollgateConfig::from_yaml_str("sample_count: 0\n").unwrap_err();
        assert!(err.to_string().contains("sample_count must be positive"));
    }

    // Single test touching the environment, so no other test observes it.
    #[test]
    fn test_apply_env() {
        std::env::set_var("TOLLGATE_MAX_CONTEXT_NAMES", "7");
        std::env::set_var("TOLLGATE_LOG_LEVEL", "debug");
        let mut config = TollgateConfig::default();
        config.apply_env().unwrap();
        std::env::remove_var("TOLLGATE_MAX_CONTEXT_NAMES");
        std::env::remove_var("TOLLGATE_LOG_LEVEL");
        assert_eq!(config.max_context_names, 7);
        assert_eq!(config.log_level, "debug");

        std::env::set_var("TOLLGATE_MAX_SLOT_CHAINS", "lots");
        let result = TollgateConfig::default().apply_env();
        std::env::remove_var("TOLLGATE_MAX_SLOT_CHAINS");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("TOLLGATE_MAX_SLOT_CHAINS"));
    }
}
