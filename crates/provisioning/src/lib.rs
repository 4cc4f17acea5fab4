//! Provisioning domain for Gatewire.
//!
//! This crate contains every domain concept, newtype identifier, shared value
//! type, error type, and provider port used to provision an ordered queue, a
//! public API in front of it, and the permission letting the queue invoke a
//! downstream function. Infrastructure crates implement the ports defined here;
//! they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`QueueName`, `QueueArn`, `ApiId`, etc.) |
//! | [`types`] | Resources, bindings, grants, and run progress |
//! | [`errors`] | Provider error taxonomy, retry policy, configuration errors |
//! | [`policy`] | Send-policy document builder |
//! | [`config`] | Injected provisioning configuration |
//! | [`ports`] | Queue, API, and permission service traits |

pub mod config;
pub mod errors;
pub mod identifiers;
pub mod policy;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{ProvisioningConfig, RetrySettings};
pub use errors::{ConfigError, ProviderError, RetryPolicy};
pub use identifiers::{
    ApiId, ApiName, FunctionRef, ProvisioningRunId, QueueArn, QueueName, QueueUrl, Region,
    ResourceId, StatementId, MAX_QUEUE_NAME_LEN, ORDERED_QUEUE_SUFFIX,
};
pub use policy::{build_send_policy, Effect, PolicyDocument, PolicyStatement};
pub use ports::{ApiService, PermissionService, ProviderResult, QueueService};
pub use types::{
    ApiResource, CreatedApi, GrantOutcome, IntegrationBinding, IntegrationSpec,
    IntegrationSubStep, IntegrationType, MethodTarget, PermissionGrant, ProvisioningRequest,
    ProvisioningResult, ProvisioningStage, ProvisioningStep, QueueAttribute, QueueResource,
    Timestamp,
};
