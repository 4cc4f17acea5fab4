//! Newtype domain identifiers.
//!
//! Every provider-assigned or caller-chosen identity is a distinct newtype
//! wrapping a `String`. This prevents accidentally passing a [`QueueUrl`] where
//! a [`QueueArn`] is expected even though both are strings under the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ProviderError;

/// Suffix the queue provider requires on every strictly-ordered queue name.
pub const ORDERED_QUEUE_SUFFIX: &str = ".fifo";

/// Longest queue name the provider accepts, suffix included.
pub const MAX_QUEUE_NAME_LEN: usize = 80;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single orchestration of one [`crate::ProvisioningRequest`].
///
/// Generated fresh for every run; propagated through spans so all provider
/// calls made on behalf of one request can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProvisioningRunId(Uuid);

impl ProvisioningRunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ProvisioningRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Queue names
// ---------------------------------------------------------------------------

/// Full name of a strictly-ordered queue, always ending in [`ORDERED_QUEUE_SUFFIX`]
/// exactly once.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Normalizes `base` into an ordered queue name.
    ///
    /// Trailing ordered suffixes are stripped before exactly one is appended, so
    /// `ordered(ordered(x).as_str()) == ordered(x)`.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Validation`] if the base is empty, too long, or contains
    /// characters other than ASCII alphanumerics, `-` and `_`.
    pub fn ordered(base: &str) -> Result<Self, ProviderError> {
        let mut stem = base.trim();
        while let Some(stripped) = stem.strip_suffix(ORDERED_QUEUE_SUFFIX) {
            stem = stripped;
        }

        if stem.is_empty() {
            return Err(ProviderError::validation(format!(
                "queue base name '{base}' is empty once the ordered suffix is removed"
            )));
        }
        if let Some(bad) = stem
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(ProviderError::validation(format!(
                "queue base name '{base}' contains invalid character '{bad}'"
            )));
        }
        let max_stem = MAX_QUEUE_NAME_LEN - ORDERED_QUEUE_SUFFIX.len();
        if stem.len() > max_stem {
            return Err(ProviderError::validation(format!(
                "queue base name '{base}' exceeds {max_stem} characters"
            )));
        }

        Ok(Self(format!("{stem}{ORDERED_QUEUE_SUFFIX}")))
    }

    /// Returns the full queue name, suffix included.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the name without the ordered suffix.
    pub fn base(&self) -> &str {
        self.0
            .strip_suffix(ORDERED_QUEUE_SUFFIX)
            .unwrap_or(self.0.as_str())
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: provider-assigned
// ---------------------------------------------------------------------------

string_id! {
    /// URL of a queue as returned by the queue service's create call.
    QueueUrl
}

string_id! {
    /// Globally unique identifier of a queue, available only after an explicit
    /// attribute fetch.
    QueueArn
}

string_id! {
    /// Identifies an API resource. The API service assigns a new one on every
    /// create call; names are not deduplicated.
    ApiId
}

string_id! {
    /// Identifies a resource (path) within an API. The root resource carries
    /// the provider-assigned id returned alongside the API id.
    ResourceId
}

// ---------------------------------------------------------------------------
// Identifiers: caller-chosen
// ---------------------------------------------------------------------------

string_id! {
    /// Human-readable name of an API resource.
    ApiName
}

string_id! {
    /// Name or ARN of a downstream compute function.
    FunctionRef
}

string_id! {
    /// Caller-chosen key for one permission statement on a function's policy.
    StatementId
}

string_id! {
    /// Cloud region the topology is provisioned in (e.g. `"us-east-1"`).
    Region
}

impl StatementId {
    /// Derives the statement id that authorizes `queue` to invoke a function.
    ///
    /// Characters the provider rejects in statement ids are replaced by `-`.
    pub fn for_queue(queue: &QueueName) -> Self {
        let sanitized: String = queue
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        Self(format!("{sanitized}-invoke"))
    }
}

impl QueueArn {
    /// Splits an `arn:<partition>:sqs:<region>:<account>:<name>` identifier into
    /// its account and queue-name components.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Validation`] if the ARN does not have six `:`-separated
    /// parts or any of account/name are empty.
    pub fn account_and_name(&self) -> Result<(&str, &str), ProviderError> {
        let parts: Vec<&str> = self.0.splitn(6, ':').collect();
        match parts.as_slice() {
            ["arn", _, _, _, account, name] if !account.is_empty() && !name.is_empty() => {
                Ok((account, name))
            }
            _ => Err(ProviderError::validation(format!(
                "malformed queue ARN '{}'",
                self.0
            ))),
        }
    }
}
