//! Mapping of AWS SDK failures onto [`ProviderError`].
//!
//! Every service crate re-exports the same smithy `SdkError` and
//! `ProvideErrorMetadata` types, so one classifier serves all three adapters.

use std::error::Error as StdError;
use std::fmt::Debug;

use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use provisioning::ProviderError;

const CONFLICT_CODES: &[&str] = &[
    "QueueAlreadyExists",
    "QueueNameExists",
    "ConflictException",
    "ResourceConflictException",
];

const NOT_FOUND_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
    "NotFoundException",
    "ResourceNotFoundException",
];

const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestThrottled",
    "TooManyRequestsException",
    "ServiceUnavailable",
    "ServiceException",
    "InternalFailure",
];

const VALIDATION_CODES: &[&str] = &[
    "InvalidParameterValue",
    "InvalidParameterValueException",
    "InvalidAttributeName",
    "InvalidAttributeValue",
    "BadRequestException",
    "ValidationException",
];

/// Classifies a failed SDK call made by `operation`.
pub(crate) fn from_sdk<E, R>(operation: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ProviderError::transient(message),
        other => classify(other.code(), message),
    }
}

/// Maps a provider error code to the domain taxonomy.
pub(crate) fn classify(code: Option<&str>, message: String) -> ProviderError {
    let Some(code) = code else {
        return ProviderError::Unclassified {
            code: None,
            message,
        };
    };
    if CONFLICT_CODES.contains(&code) {
        ProviderError::conflict(message)
    } else if NOT_FOUND_CODES.contains(&code) {
        ProviderError::not_found(message)
    } else if TRANSIENT_CODES.contains(&code) {
        ProviderError::transient(message)
    } else if VALIDATION_CODES.contains(&code) {
        ProviderError::validation(message)
    } else {
        ProviderError::Unclassified {
            code: Some(code.to_string()),
            message,
        }
    }
}

/// Error for a successful response that lacks a field the adapter needs.
pub(crate) fn missing_field(operation: &str, field: &str) -> ProviderError {
    ProviderError::Unclassified {
        code: None,
        message: format!("{operation}: response did not include {field}"),
    }
}
