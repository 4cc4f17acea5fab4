//! Provisioning configuration.
//!
//! Injected into the orchestrator at construction. Every field has a default so
//! an empty JSON object is a valid configuration file. Credentials are never
//! part of configuration; infrastructure adapters obtain them from the
//! provider's default credential chain.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ApiId, ConfigError};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_STAGE: &str = "default";

/// Tag key present on every provisioned queue.
pub const MANAGED_BY_TAG: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "gatewire";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningConfig {
    pub region: String,

    /// Value of the send policy's source-ARN condition. `None` allows any API
    /// in the configured region.
    pub source_arn_pattern: Option<String>,

    /// Stage name used when reporting invoke URLs.
    pub stage_name: String,

    pub content_based_deduplication: bool,

    /// Role the API assumes when forwarding to the queue.
    pub integration_credentials: Option<String>,

    /// Tags applied to every queue, in addition to [`MANAGED_BY_TAG`].
    pub tags: BTreeMap<String, String>,

    pub retry: RetrySettings,

    /// Number of batch requests processed concurrently. `1` is sequential.
    pub max_concurrency: usize,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            source_arn_pattern: None,
            stage_name: DEFAULT_STAGE.to_string(),
            content_based_deduplication: false,
            integration_credentials: None,
            tags: BTreeMap::new(),
            retry: RetrySettings::default(),
            max_concurrency: 1,
        }
    }
}

impl ProvisioningConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(invalid("region must not be empty"));
        }
        if let Some(pattern) = &self.source_arn_pattern {
            if !pattern.starts_with("arn:") {
                return Err(invalid(format!(
                    "source_arn_pattern '{pattern}' is not an ARN pattern"
                )));
            }
        }
        if self.stage_name.trim().is_empty() {
            return Err(invalid("stage_name must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(invalid(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms",
            ));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency must be at least 1"));
        }
        Ok(())
    }

    /// The source-ARN condition value for send policies.
    pub fn source_arn_pattern(&self) -> String {
        self.source_arn_pattern
            .clone()
            .unwrap_or_else(|| format!("arn:aws:execute-api:{}:*:*", self.region))
    }

    /// Tags to apply to a queue: the configured set plus the managed-by marker.
    pub fn queue_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        tags.entry(MANAGED_BY_TAG.to_string())
            .or_insert_with(|| MANAGED_BY_VALUE.to_string());
        tags
    }

    /// Public URL of the configured stage of `api_id`.
    pub fn invoke_url(&self, api_id: &ApiId) -> String {
        format!(
            "https://{api_id}.execute-api.{}.amazonaws.com/{}",
            self.region, self.stage_name
        )
    }

    /// URI of the queue service path integration for a queue owned by `account`.
    pub fn queue_backend_uri(&self, account: &str, queue_name: &str) -> String {
        format!(
            "arn:aws:apigateway:{}:sqs:path/{account}/{queue_name}",
            self.region
        )
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Bounded exponential back-off for transient provider errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    /// Total attempts, the first included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `retry` (1-based): doubles each time, capped
    /// at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}
