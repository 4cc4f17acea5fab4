//! Shared value types for the provisioning domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! relationships between resources (a binding references an API and a backend,
//! a grant references a function and a queue) and the progress of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ApiId, ApiName, FunctionRef, ProvisioningRunId, QueueArn, QueueName, QueueUrl, Region,
    ResourceId, StatementId,
};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One (queue, API, target function) triple to provision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    /// Queue name without the ordered suffix. A suffix passed in error is
    /// stripped before exactly one is appended.
    pub queue_base_name: String,

    /// Name given to the created API.
    pub api_name: String,

    /// Function to authorize for invocation from the queue, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_function_ref: Option<String>,
}

impl ProvisioningRequest {
    pub fn new(queue_base_name: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            queue_base_name: queue_base_name.into(),
            api_name: api_name.into(),
            target_function_ref: None,
        }
    }

    /// Sets the function the queue is allowed to invoke.
    pub fn with_target_function(mut self, function_ref: impl Into<String>) -> Self {
        self.target_function_ref = Some(function_ref.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Queue attributes the workflow reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QueueAttribute {
    FifoQueue,
    ContentBasedDeduplication,
    QueueArn,
    Policy,
}

/// A strictly-ordered queue.
///
/// `arn` is `None` until the attribute fetch step has run; the create call
/// returns only the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueResource {
    pub name: QueueName,
    pub url: QueueUrl,
    pub arn: Option<QueueArn>,
    pub ordered: bool,
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

/// An API resource as created by the API service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    pub id: ApiId,
    pub name: ApiName,
    pub region: Region,
    /// Provider-assigned id of the API's root (`/`) resource.
    pub root_resource_id: ResourceId,
}

/// Identifiers returned by the API service's create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedApi {
    pub id: ApiId,
    pub root_resource_id: ResourceId,
}

/// Addresses one method on one resource of one API.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodTarget {
    pub api_id: ApiId,
    pub resource_id: ResourceId,
    pub http_method: String,
}

/// How the API forwards requests to its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationType {
    /// Direct call to a provider service action (no proxying function).
    Aws,
}

/// Parameters of an integration `put`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationSpec {
    pub integration_type: IntegrationType,
    /// HTTP method the API uses when calling the backend.
    pub backend_method: String,
    pub uri: String,
    /// Role the API assumes to call the backend, when one is configured.
    pub credentials: Option<String>,
}

/// A wired binding from an API method to a backend resource.
///
/// At most one exists per [`MethodTarget`]; re-attaching overwrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationBinding {
    pub target: MethodTarget,
    pub backend_uri: String,
    pub integration_type: IntegrationType,
}

/// The ordered sub-steps of wiring an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationSubStep {
    Method,
    Integration,
    MethodResponse,
    IntegrationResponse,
}

impl IntegrationSubStep {
    /// All sub-steps in the order they must be issued.
    pub const ORDER: [IntegrationSubStep; 4] = [
        Self::Method,
        Self::Integration,
        Self::MethodResponse,
        Self::IntegrationResponse,
    ];
}

impl std::fmt::Display for IntegrationSubStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Method => "method",
            Self::Integration => "integration",
            Self::MethodResponse => "method-response",
            Self::IntegrationResponse => "integration-response",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// One statement on a function's resource policy authorizing an invoker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub function_ref: FunctionRef,
    pub statement_id: StatementId,
    pub action: String,
    pub principal: String,
    pub source_arn: String,
}

/// Whether a grant was newly issued or found already in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    Granted,
    AlreadyPresent,
}

// ---------------------------------------------------------------------------
// Run progress
// ---------------------------------------------------------------------------

/// Position of a run in the provisioning state machine.
///
/// `PermissionGranted` is terminal for requests naming a target function;
/// `Integrated` is terminal for requests without one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStage {
    Pending,
    Queued,
    Policied,
    ApiCreated,
    Integrated,
    PermissionGranted,
}

/// An individual step of a run. A failure is always attributed to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    Validate,
    CreateQueue,
    FetchQueueArn,
    ApplyPolicy,
    TagQueue,
    CreateApi,
    AttachIntegration,
    GrantPermission,
}

impl std::fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::CreateQueue => "create-queue",
            Self::FetchQueueArn => "fetch-queue-arn",
            Self::ApplyPolicy => "apply-policy",
            Self::TagQueue => "tag-queue",
            Self::CreateApi => "create-api",
            Self::AttachIntegration => "attach-integration",
            Self::GrantPermission => "grant-permission",
        };
        write!(f, "{name}")
    }
}

/// Everything a run produced, whether it finished or not.
///
/// On failure this is the partial result: every identifier created before the
/// failing step is present so a caller can resume or clean up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub run_id: ProvisioningRunId,
    pub request: ProvisioningRequest,
    pub stage: ProvisioningStage,
    /// Steps that completed, in execution order.
    pub completed_steps: Vec<ProvisioningStep>,
    pub queue: Option<QueueResource>,
    pub api: Option<ApiResource>,
    /// Integration sub-steps that completed on the most recent attempt.
    pub integration_progress: Vec<IntegrationSubStep>,
    pub integration: Option<IntegrationBinding>,
    pub permission: Option<PermissionGrant>,
    pub permission_outcome: Option<GrantOutcome>,
    pub invoke_url: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub started_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl ProvisioningResult {
    /// Creates an empty result in the `Pending` stage.
    pub fn pending(run_id: ProvisioningRunId, request: ProvisioningRequest) -> Self {
        Self {
            run_id,
            request,
            stage: ProvisioningStage::Pending,
            completed_steps: Vec::new(),
            queue: None,
            api: None,
            integration_progress: Vec::new(),
            integration: None,
            permission: None,
            permission_outcome: None,
            invoke_url: None,
            tags: BTreeMap::new(),
            started_at: Timestamp::now(),
            finished_at: None,
        }
    }

    /// Records a completed step, advancing the stage when the step closes one.
    pub fn complete(&mut self, step: ProvisioningStep) {
        self.completed_steps.push(step);
        let reached = match step {
            ProvisioningStep::CreateQueue => Some(ProvisioningStage::Queued),
            ProvisioningStep::TagQueue => Some(ProvisioningStage::Policied),
            ProvisioningStep::CreateApi => Some(ProvisioningStage::ApiCreated),
            ProvisioningStep::AttachIntegration => Some(ProvisioningStage::Integrated),
            ProvisioningStep::GrantPermission => Some(ProvisioningStage::PermissionGranted),
            _ => None,
        };
        if let Some(stage) = reached {
            self.stage = stage;
        }
    }

    /// Returns `true` if `step` completed during this run.
    pub fn has_completed(&self, step: ProvisioningStep) -> bool {
        self.completed_steps.contains(&step)
    }

    /// Returns `true` if the run reached its terminal success stage.
    pub fn is_complete(&self) -> bool {
        let terminal = if self.request.target_function_ref.is_some() {
            ProvisioningStage::PermissionGranted
        } else {
            ProvisioningStage::Integrated
        };
        self.stage == terminal
    }

    /// Returns `true` if an integration attempt stopped between sub-steps.
    pub fn is_partially_wired(&self) -> bool {
        !self.integration_progress.is_empty()
            && self.integration_progress.len() < IntegrationSubStep::ORDER.len()
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
