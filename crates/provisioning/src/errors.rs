//! Error taxonomy and retry-policy types for the provisioning domain.
//!
//! [`ProviderError`] classifies every failure a provider port can report.
//! Infrastructure adapters translate their SDK errors into it; the workflow
//! layer decides from the variant whether a failure is an idempotent success,
//! a retryable condition, or fatal for the current step.
//!
//! [`ConfigError`] covers configuration problems detected before any provider
//! is contacted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by [`ProviderError::retry_policy`] to let the workflow decide
/// whether to re-issue a provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// A classified failure reported by a provider port.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// The resource already exists. Callers that can look the existing resource
    /// up treat this as success.
    #[error("Resource already exists: {message}")]
    ResourceConflict {
        /// Provider-supplied description.
        message: String,
    },

    /// A referenced resource does not exist. Fatal for the step.
    #[error("Resource not found: {message}")]
    ResourceNotFound {
        /// Provider-supplied description.
        message: String,
    },

    /// Network failure, throttling, or an eventual-consistency delay.
    #[error("Transient provider error: {message}")]
    Transient {
        /// Provider-supplied description.
        message: String,
        /// Delay the provider asked for, when it supplied one.
        retry_after: Option<Duration>,
    },

    /// A permission statement id is already in use with different parameters.
    #[error("Permission statement '{statement_id}' conflicts: {message}")]
    PermissionConflict {
        /// The reused statement id.
        statement_id: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A malformed name, ARN, or request parameter. Never retried.
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the invalid input.
        message: String,
    },

    /// A provider failure outside the taxonomy above (e.g. access denied).
    #[error("Provider error{}: {message}", code_suffix(.code))]
    Unclassified {
        /// Provider error code, when the provider reported one.
        code: Option<String>,
        /// Provider-supplied description.
        message: String,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default()
}

impl ProviderError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::ResourceConflict {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns whether this error may be retried.
    ///
    /// Only [`ProviderError::Transient`] is retryable.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// The provisioning configuration is invalid.
///
/// Produced at load time; an orchestrator is never constructed from an
/// invalid configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Configuration error: {message}")]
    Invalid {
        /// Description of the configuration problem.
        message: String,
    },

    #[error("Configuration could not be parsed: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        let transient = ProviderError::Transient {
            message: "throttled".into(),
            retry_after: Some(Duration::from_millis(50)),
        };
        assert_eq!(
            transient.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_millis(50))
            }
        );

        for fatal in [
            ProviderError::conflict("exists"),
            ProviderError::not_found("gone"),
            ProviderError::validation("bad"),
            ProviderError::Unclassified {
                code: Some("AccessDenied".into()),
                message: "nope".into(),
            },
        ] {
            assert_eq!(fatal.retry_policy(), RetryPolicy::NonRetryable);
        }
    }

    #[test]
    fn unclassified_display_includes_code() {
        let err = ProviderError::Unclassified {
            code: Some("AccessDenied".into()),
            message: "not authorized".into(),
        };
        assert_eq!(err.to_string(), "Provider error [AccessDenied]: not authorized");

        let err = ProviderError::Unclassified {
            code: None,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Provider error: boom");
    }
}
