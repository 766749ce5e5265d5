//! Failure descriptions returned inside a `TimeoutResult`.
//!
//! The engine never raises. Whatever goes wrong (an elapsed deadline, an
//! error returned by the operation, a panic) ends up as an [`OperationError`]
//! carrying a category, a severity, a retry hint and the original cause.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Free-form key/value context attached to an operation.
pub type ContextMap = HashMap<String, serde_json::Value>;

/// Shared, type-erased cause of a failure.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Component name stamped on every error the engine produces.
pub const COMPONENT: &str = "timeout_engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Deadline elapsed inside the engine.
    Timeout,
    Network,
    Permission,
    ResourceExhausted,
    /// Anything the classifier does not recognise.
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Failures raised by the engine itself rather than by the operation.
#[derive(Debug, Clone, Error)]
pub enum EngineFailure {
    #[error("deadline of {timeout_secs:.2}s elapsed")]
    Elapsed { timeout_secs: f64 },

    #[error("operation panicked: {message}")]
    Panicked { message: String },

    #[error("worker thread exited without reporting a result")]
    WorkerLost,

    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(String),

    #[error("{running} blocking workers still running (limit {limit}), orphans included")]
    OrphanLimitReached { running: usize, limit: usize },
}

impl EngineFailure {
    /// Build a `Panicked` failure from a `catch_unwind` payload.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        EngineFailure::Panicked { message }
    }
}

/// Where a failure happened.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub component: String,
    pub operation: String,
    pub details: ContextMap,
}

impl ErrorContext {
    pub fn new(operation: &str, details: ContextMap) -> Self {
        Self {
            component: COMPONENT.to_string(),
            operation: operation.to_string(),
            details,
        }
    }
}

/// Category-tagged failure description.
#[derive(Clone, Serialize)]
pub struct OperationError {
    pub error_id: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub is_retryable: bool,
    /// Suggested wait before the caller tries again, in seconds.
    pub retry_after_secs: Option<f64>,
    pub context: ErrorContext,
    #[serde(skip)]
    pub original_cause: Option<Cause>,
}

impl OperationError {
    pub fn new(
        message: impl Into<String>,
        category: ErrorCategory,
        severity: ErrorSeverity,
        context: ErrorContext,
    ) -> Self {
        Self {
            error_id: Uuid::new_v4().to_string(),
            message: message.into(),
            category,
            severity,
            is_retryable: false,
            retry_after_secs: None,
            context,
            original_cause: None,
        }
    }

    pub fn retryable(mut self, retry_after_secs: Option<f64>) -> Self {
        self.is_retryable = true;
        self.retry_after_secs = retry_after_secs;
        self
    }

    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.original_cause = Some(cause);
        self
    }

    /// Downcast the original cause to a concrete error type.
    pub fn cause_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.original_cause.as_deref().and_then(|c| c.downcast_ref::<E>())
    }
}

impl fmt::Debug for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationError")
            .field("error_id", &self.error_id)
            .field("message", &self.message)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .field("is_retryable", &self.is_retryable)
            .field("retry_after_secs", &self.retry_after_secs)
            .field("operation", &self.context.operation)
            .field("original_cause", &self.original_cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.category, self.message)
    }
}

impl StdError for OperationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.original_cause
            .as_deref()
            .map(|c| c as &(dyn StdError + 'static))
    }
}

/// How an upstream error maps onto the engine's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub is_retryable: bool,
    pub retry_after_secs: Option<f64>,
}

impl Classification {
    pub const fn internal() -> Self {
        Self {
            category: ErrorCategory::Internal,
            severity: ErrorSeverity::Medium,
            is_retryable: false,
            retry_after_secs: None,
        }
    }
}

/// Maps arbitrary operation errors to a category and severity.
///
/// Callers with a richer taxonomy (service error codes, throttling hints)
/// plug their own implementation in with `TimeoutEngine::with_classifier`.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, error: &(dyn StdError + 'static)) -> Classification;
}

/// Fallback classifier used when none is supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &(dyn StdError + 'static)) -> Classification {
        if let Some(failure) = error.downcast_ref::<EngineFailure>() {
            return match failure {
                EngineFailure::Elapsed { timeout_secs } => Classification {
                    category: ErrorCategory::Timeout,
                    severity: ErrorSeverity::Medium,
                    is_retryable: true,
                    retry_after_secs: Some(timeout_secs * 1.5),
                },
                EngineFailure::Panicked { .. } | EngineFailure::WorkerLost => Classification {
                    severity: ErrorSeverity::High,
                    ..Classification::internal()
                },
                EngineFailure::SpawnFailed(_) => Classification {
                    category: ErrorCategory::ResourceExhausted,
                    severity: ErrorSeverity::High,
                    ..Classification::internal()
                },
                EngineFailure::OrphanLimitReached { .. } => Classification {
                    category: ErrorCategory::ResourceExhausted,
                    severity: ErrorSeverity::High,
                    is_retryable: true,
                    retry_after_secs: None,
                },
            };
        }

        if let Some(io_err) = error.downcast_ref::<io::Error>() {
            return classify_io(io_err.kind());
        }

        Classification::internal()
    }
}

fn classify_io(kind: io::ErrorKind) -> Classification {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut => Classification {
            category: ErrorCategory::Network,
            severity: ErrorSeverity::Medium,
            is_retryable: true,
            retry_after_secs: None,
        },
        io::ErrorKind::PermissionDenied => Classification {
            category: ErrorCategory::Permission,
            severity: ErrorSeverity::High,
            is_retryable: false,
            retry_after_secs: None,
        },
        _ => Classification::internal(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("quota exceeded")]
    struct QuotaError;

    #[test]
    fn test_io_errors_are_network() {
        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let class = DefaultClassifier.classify(&err);
        assert_eq!(class.category, ErrorCategory::Network);
        assert!(class.is_retryable);

        let err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(DefaultClassifier.classify(&err).category, ErrorCategory::Permission);
    }

    #[test]
    fn test_unknown_errors_are_internal() {
        let class = DefaultClassifier.classify(&QuotaError);
        assert_eq!(class, Classification::internal());
    }

    #[test]
    fn test_engine_failures() {
        let orphan = EngineFailure::OrphanLimitReached { running: 4, limit: 4 };
        assert_eq!(
            DefaultClassifier.classify(&orphan).category,
            ErrorCategory::ResourceExhausted
        );

        let panicked = EngineFailure::from_panic(Box::new("boom"));
        assert_eq!(panicked.to_string(), "operation panicked: boom");
        assert_eq!(DefaultClassifier.classify(&panicked).severity, ErrorSeverity::High);
    }

    #[test]
    fn test_cause_downcast() {
        let err = OperationError::new(
            "quota exceeded",
            ErrorCategory::Internal,
            ErrorSeverity::Medium,
            ErrorContext::new("create_user", ContextMap::new()),
        )
        .with_cause(Arc::new(QuotaError));

        assert!(err.cause_as::<QuotaError>().is_some());
        assert!(err.cause_as::<io::Error>().is_none());
        assert_eq!(err.context.component, COMPONENT);
        assert!(err.source().is_some());
    }
}
