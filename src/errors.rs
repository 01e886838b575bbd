//! Error classifier & policies (§4.K, §7).
//!
//! Everything that can go wrong anywhere in the core funnels through
//! [`classify`] into a [`ClassifiedError`] before it touches `context.errors`
//! or decides a transition's fate. Kinds are closed and structured — nothing
//! escapes as a bare string.

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::logic::LogicError;

/// The closed error taxonomy from §7.
#[derive(Debug, Error, Diagnostic, Clone, Serialize, Deserialize)]
pub enum ErrorKind {
    #[error("configuration error: {0}")]
    #[diagnostic(code(flowspire::errors::config))]
    ConfigError(String),

    #[error("validation error: {0}")]
    #[diagnostic(code(flowspire::errors::validation))]
    ValidationError(String),

    #[error("network error: {0}")]
    #[diagnostic(code(flowspire::errors::network))]
    NetworkError(String),

    #[error("request timed out after {0}ms")]
    #[diagnostic(code(flowspire::errors::timeout))]
    TimeoutError(u64),

    #[error("http status {status}")]
    #[diagnostic(code(flowspire::errors::http_status))]
    HttpStatusError { status: u16 },

    #[error("schema error: {0}")]
    #[diagnostic(code(flowspire::errors::schema))]
    SchemaError(String),

    #[error("logic error: {0:?}")]
    #[diagnostic(code(flowspire::errors::logic))]
    LogicError(#[from] LogicError),

    #[error("business error: {0}")]
    #[diagnostic(code(flowspire::errors::business))]
    BusinessError(String),

    #[error("cancelled")]
    #[diagnostic(code(flowspire::errors::cancelled))]
    Cancelled,
}

impl ErrorKind {
    /// The transient classes eligible for retry per §4.E step 5: network,
    /// timeout, 5xx, and 429. 4xx other than 408/429 is never retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ErrorKind::NetworkError(_) | ErrorKind::TimeoutError(_) => true,
            ErrorKind::HttpStatusError { status } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::ConfigError(_) => "ConfigError",
            ErrorKind::ValidationError(_) => "ValidationError",
            ErrorKind::NetworkError(_) => "NetworkError",
            ErrorKind::TimeoutError(_) => "TimeoutError",
            ErrorKind::HttpStatusError { .. } => "HttpStatusError",
            ErrorKind::SchemaError(_) => "SchemaError",
            ErrorKind::LogicError(_) => "LogicError",
            ErrorKind::BusinessError(_) => "BusinessError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

/// Propagation policy for a classified error (the glossary's "Severity").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Record and continue the pipeline.
    Warn,
    /// Abort the current pipeline; the active node does not change.
    Block,
    /// Abort the pipeline and drive the machine to `error` / `errorStep`.
    Fatal,
}

/// A raw error mapped to `{kind, severity, retriable, details}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub retriable: bool,
    #[serde(default)]
    pub details: Value,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, severity: Severity) -> Self {
        let retriable = kind.is_transient();
        Self {
            kind,
            severity,
            retriable,
            details: Value::Null,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?})", self.kind, self.severity)
    }
}

/// Per-action-kind default severity policy, overridable on the Action Spec
/// itself (§4.K: "Policies are table-driven, configurable per HTTP action,
/// defaulted at the orchestrator level").
#[derive(Debug, Clone, Copy)]
pub struct SeverityPolicy {
    pub default_severity: Severity,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            default_severity: Severity::Warn,
        }
    }
}

/// Maps a raw [`ErrorKind`] into a [`ClassifiedError`], applying an explicit
/// override when the action spec declared one, otherwise the policy default.
#[must_use]
pub fn classify(
    kind: ErrorKind,
    override_severity: Option<Severity>,
    policy: &SeverityPolicy,
) -> ClassifiedError {
    let severity = override_severity.unwrap_or(policy.default_severity);
    ClassifiedError::new(kind, severity)
}

/// One entry in the runtime state's `errors` channel: a classified error
/// plus when and where it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(default = "Utc::now")]
    pub when: DateTime<Utc>,
    pub node: String,
    pub error: ClassifiedError,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(node: impl Into<String>, error: ClassifiedError) -> Self {
        Self {
            when: Utc::now(),
            node: node.into(),
            error,
        }
    }
}
