//! Outcome of every engine call.

use serde::Serialize;

use crate::resilience::error::{ErrorCategory, ErrorContext, ErrorSeverity, OperationError};

/// Result of running an operation through the engine.
///
/// `error` is present exactly when `success` is false, and `result` exactly
/// when it is true.
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutResult<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<OperationError>,
    /// Wall-clock time of the whole call, retries and sleeps included.
    pub duration_secs: f64,
    pub timeout_occurred: bool,
    /// Attempts made beyond the first.
    pub retry_count: u32,
    /// Timeout in force for the attempt that produced the outcome.
    pub final_timeout_used: f64,
    pub warnings: Vec<String>,
}

impl<T> TimeoutResult<T> {
    pub(crate) fn succeeded(
        value: T,
        duration_secs: f64,
        retry_count: u32,
        final_timeout_used: f64,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            success: true,
            result: Some(value),
            error: None,
            duration_secs,
            timeout_occurred: false,
            retry_count,
            final_timeout_used,
            warnings,
        }
    }

    pub(crate) fn failed(
        error: OperationError,
        timeout_occurred: bool,
        duration_secs: f64,
        retry_count: u32,
        final_timeout_used: f64,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            duration_secs,
            timeout_occurred,
            retry_count,
            final_timeout_used,
            warnings,
        }
    }

    /// Collapse into a plain `Result`, dropping timing information.
    pub fn into_result(self) -> Result<T, OperationError> {
        match (self.result, self.error) {
            (Some(value), None) => Ok(value),
            (_, Some(error)) => Err(error),
            (None, None) => Err(OperationError::new(
                "result missing from successful call",
                ErrorCategory::Internal,
                ErrorSeverity::Critical,
                ErrorContext::default(),
            )),
        }
    }

    /// Transform the payload, keeping every other field.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TimeoutResult<U> {
        TimeoutResult {
            success: self.success,
            result: self.result.map(f),
            error: self.error,
            duration_secs: self.duration_secs,
            timeout_occurred: self.timeout_occurred,
            retry_count: self.retry_count,
            final_timeout_used: self.final_timeout_used,
            warnings: self.warnings,
        }
    }
}
