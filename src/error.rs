use std::sync::Arc;

use thiserror::Error;

use crate::flow::FlowRule;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Configuration key or identifier that caused the error (e.g., "sample_count", "resource:getUser")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, observed value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config", "context", "token_service")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A request was refused admission.
///
/// This is an expected outcome, not a failure: the guarded body never ran and the
/// caller picks the degraded response.
#[derive(Debug, Clone, Error)]
pub enum BlockError {
    #[error("blocked by flow rule on '{}' (limit app: {limit_app})", .rule.resource)]
    Flow {
        limit_app: String,
        rule: Arc<FlowRule>,
    },

    #[error("blocked by slot '{slot}': {reason}")]
    Slot { slot: String, reason: String },
}

impl BlockError {
    pub fn flow(rule: Arc<FlowRule>) -> Self {
        let limit_app = rule.limit_app.clone().unwrap_or_default();
        BlockError::Flow { limit_app, rule }
    }

    pub fn slot(slot: impl Into<String>, reason: impl Into<String>) -> Self {
        BlockError::Slot {
            slot: slot.into(),
            reason: reason.into(),
        }
    }

    /// The limiting app of the rule that vetoed the request, if a rule did.
    pub fn limit_app(&self) -> Option<&str> {
        match self {
            BlockError::Flow { limit_app, .. } => Some(limit_app),
            BlockError::Slot { .. } => None,
        }
    }

    pub fn rule(&self) -> Option<&Arc<FlowRule>> {
        match self {
            BlockError::Flow { rule, .. } => Some(rule),
            BlockError::Slot { .. } => None,
        }
    }
}

/// Unified error type for tollgate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Request blocked: {0}")]
    Blocked(#[from] BlockError),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Cluster token service error: {message}{}", format_context(.context))]
    Cluster {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn cluster_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Cluster {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Runtime { context, .. }
            | Error::Cluster { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Error::Blocked(_))
    }

    /// Borrow the block payload when this error is an admission refusal.
    pub fn as_block(&self) -> Option<&BlockError> {
        match self {
            Error::Blocked(b) => Some(b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_formatting() {
        let err = Error::configuration_with_context(
            "sample_count must be positive",
            ErrorContext::new()
                .with_field_path("sample_count")
                .with_source("config"),
        );
        let msg = err.to_string();
        assert!(msg.contains("sample_count must be positive"));
        assert!(msg.contains("field: sample_count"));
        assert!(msg.contains("source: config"));
        assert!(!err.is_blocked());
    }

    #[test]
    fn test_slot_block_has_no_rule() {
        let block = BlockError::slot("authority", "origin denied");
        assert!(block.rule().is_none());
        assert!(block.limit_app().is_none());

        let err: Error = block.into();
        assert!(err.is_blocked());
        assert!(err.to_string().contains("origin denied"));
    }
}
