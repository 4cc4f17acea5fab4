//! In-memory provider implementations.
//!
//! [`MemoryCloud`] implements all three provider ports against a single shared
//! in-memory state, mirroring the behaviour of the real control planes closely
//! enough to exercise the workflow:
//!
//! - queues are deduplicated by name: an identical create returns the existing
//!   URL, a create with different attributes reports a conflict;
//! - APIs are never deduplicated: every create assigns a new id;
//! - integration, method, and response `put`s overwrite per method target;
//! - permission statement ids are unique per function: re-adding one reports a
//!   conflict regardless of parameters.
//!
//! Every call is recorded as a [`ProviderOp`] for assertions. Failures can be
//! injected per [`OperationKind`], and newly created queues can be made to
//! report transient errors on their first attribute reads to simulate
//! eventual consistency.
//!
//! ## Architectural Layer
//!
//! **Infrastructure (simulated).** Used by the workflow tests and by the CLI's
//! dry-run mode.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use provisioning::{
    ApiId, ApiName, ApiService, CreatedApi, FunctionRef, IntegrationSpec, MethodTarget,
    PermissionGrant, PermissionService, ProviderError, ProviderResult, QueueArn, QueueAttribute,
    QueueName, QueueService, QueueUrl, ResourceId, StatementId, ORDERED_QUEUE_SUFFIX,
};

/// Account id used in the ARNs and URLs of simulated resources.
pub const DEFAULT_ACCOUNT: &str = "000000000000";

/// Id of the root resource of every simulated API.
pub const ROOT_RESOURCE_ID: &str = "root";

/// Record of a provider call for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOp {
    CreateQueue {
        name: String,
    },
    QueueUrl {
        name: String,
    },
    GetAttributes {
        url: String,
    },
    SetAttributes {
        url: String,
        attributes: BTreeMap<QueueAttribute, String>,
    },
    TagQueue {
        url: String,
        tags: BTreeMap<String, String>,
    },
    CreateApi {
        name: String,
    },
    PutMethod {
        target: MethodTarget,
    },
    PutIntegration {
        target: MethodTarget,
        uri: String,
    },
    PutMethodResponse {
        target: MethodTarget,
        status_code: String,
    },
    PutIntegrationResponse {
        target: MethodTarget,
        status_code: String,
    },
    AddPermission {
        grant: PermissionGrant,
    },
    GetStatement {
        function_ref: String,
        statement_id: String,
    },
}

impl ProviderOp {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateQueue { .. } => OperationKind::CreateQueue,
            Self::QueueUrl { .. } => OperationKind::QueueUrl,
            Self::GetAttributes { .. } => OperationKind::GetAttributes,
            Self::SetAttributes { .. } => OperationKind::SetAttributes,
            Self::TagQueue { .. } => OperationKind::TagQueue,
            Self::CreateApi { .. } => OperationKind::CreateApi,
            Self::PutMethod { .. } => OperationKind::PutMethod,
            Self::PutIntegration { .. } => OperationKind::PutIntegration,
            Self::PutMethodResponse { .. } => OperationKind::PutMethodResponse,
            Self::PutIntegrationResponse { .. } => OperationKind::PutIntegrationResponse,
            Self::AddPermission { .. } => OperationKind::AddPermission,
            Self::GetStatement { .. } => OperationKind::GetStatement,
        }
    }
}

/// Provider call kinds, used to target fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    CreateQueue,
    QueueUrl,
    GetAttributes,
    SetAttributes,
    TagQueue,
    CreateApi,
    PutMethod,
    PutIntegration,
    PutMethodResponse,
    PutIntegrationResponse,
    AddPermission,
    GetStatement,
}

#[derive(Debug, Clone)]
struct Fault {
    kind: OperationKind,
    error: ProviderError,
    /// `None` fails every matching call until cleared.
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct StoredQueue {
    url: QueueUrl,
    /// Attributes given at creation; compared on repeated creates.
    creation_attributes: BTreeMap<QueueAttribute, String>,
    attributes: BTreeMap<QueueAttribute, String>,
    tags: BTreeMap<String, String>,
    /// Attribute reads still to fail before the queue becomes queryable.
    unreadable_reads: u32,
}

/// Snapshot of one API method.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodState {
    pub authorization: Option<String>,
    pub integration: Option<IntegrationSpec>,
    pub method_responses: BTreeSet<String>,
    pub integration_responses: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone)]
struct StoredApi {
    name: ApiName,
    methods: BTreeMap<(ResourceId, String), MethodState>,
}

#[derive(Debug, Default)]
struct CloudState {
    queues: BTreeMap<QueueName, StoredQueue>,
    apis: BTreeMap<ApiId, StoredApi>,
    next_api: u64,
    statements: BTreeMap<FunctionRef, BTreeMap<StatementId, PermissionGrant>>,
    operations: Vec<ProviderOp>,
    faults: Vec<Fault>,
    visibility_lag: u32,
}

/// Queue, API, and permission providers over shared in-memory state.
///
/// Clones share state, so one instance can be handed to the orchestrator as
/// all three ports while the test keeps a handle for assertions.
#[derive(Debug, Clone)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
    region: String,
    account: String,
}

impl Default for MemoryCloud {
    fn default() -> Self {
        Self::new("us-east-1")
    }
}

impl MemoryCloud {
    /// Creates an empty cloud in `region`.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            state: Arc::default(),
            region: region.into(),
            account: DEFAULT_ACCOUNT.to_string(),
        }
    }

    /// Makes every queue created from now on fail its first `reads` attribute
    /// reads with a transient error.
    #[must_use]
    pub fn with_visibility_lag(self, reads: u32) -> Self {
        self.lock().visibility_lag = reads;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    /// Fails every subsequent `kind` call with `error` until cleared.
    pub fn inject_failure(&self, kind: OperationKind, error: ProviderError) {
        self.lock().faults.push(Fault {
            kind,
            error,
            remaining: None,
        });
    }

    /// Fails the next `times` calls of `kind` with `error`.
    pub fn inject_failures(&self, kind: OperationKind, error: ProviderError, times: u32) {
        self.lock().faults.push(Fault {
            kind,
            error,
            remaining: Some(times),
        });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.lock().faults.clear();
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Returns all recorded operations in call order.
    pub fn operations(&self) -> Vec<ProviderOp> {
        self.lock().operations.clone()
    }

    /// Returns recorded operations of one kind.
    pub fn operations_of(&self, kind: OperationKind) -> Vec<ProviderOp> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Names of all queues, sorted.
    pub fn queue_names(&self) -> Vec<QueueName> {
        self.lock().queues.keys().cloned().collect()
    }

    /// Current attributes of a queue.
    pub fn queue_attributes(&self, name: &QueueName) -> Option<BTreeMap<QueueAttribute, String>> {
        self.lock().queues.get(name).map(|q| q.attributes.clone())
    }

    /// Current tags of a queue.
    pub fn queue_tags(&self, name: &QueueName) -> Option<BTreeMap<String, String>> {
        self.lock().queues.get(name).map(|q| q.tags.clone())
    }

    /// Ids of all APIs, in creation order.
    pub fn api_ids(&self) -> Vec<ApiId> {
        self.lock().apis.keys().cloned().collect()
    }

    /// Name an API was created with.
    pub fn api_name(&self, api_id: &ApiId) -> Option<ApiName> {
        self.lock().apis.get(api_id).map(|api| api.name.clone())
    }

    /// All methods declared on an API, keyed by resource id and HTTP method.
    pub fn methods(&self, api_id: &ApiId) -> BTreeMap<(ResourceId, String), MethodState> {
        self.lock()
            .apis
            .get(api_id)
            .map(|api| api.methods.clone())
            .unwrap_or_default()
    }

    /// Number of methods on an API with an integration attached.
    pub fn integration_count(&self, api_id: &ApiId) -> usize {
        self.methods(api_id)
            .values()
            .filter(|m| m.integration.is_some())
            .count()
    }

    /// Statements on a function's resource policy.
    pub fn statements(&self, function_ref: &FunctionRef) -> Vec<PermissionGrant> {
        self.lock()
            .statements
            .get(function_ref)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Records `op` and returns the injected failure for it, if any.
    fn begin(&self, state: &mut CloudState, op: ProviderOp) -> ProviderResult<()> {
        let kind = op.kind();
        state.operations.push(op);

        let Some(index) = state.faults.iter().position(|f| f.kind == kind) else {
            return Ok(());
        };
        let fault = &mut state.faults[index];
        let error = fault.error.clone();
        let exhausted = match fault.remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if exhausted {
            state.faults.remove(index);
        }
        tracing::debug!(?kind, %error, "injected provider failure");
        Err(error)
    }

    fn queue_by_url<'a>(
        state: &'a mut CloudState,
        url: &QueueUrl,
    ) -> ProviderResult<&'a mut StoredQueue> {
        state
            .queues
            .values_mut()
            .find(|q| &q.url == url)
            .ok_or_else(|| ProviderError::not_found(format!("queue '{url}' does not exist")))
    }

    /// Declares a new method. Like the provider, re-declaring one conflicts.
    fn declare_method<'a>(
        state: &'a mut CloudState,
        target: &MethodTarget,
    ) -> ProviderResult<&'a mut MethodState> {
        let api = state.apis.get_mut(&target.api_id).ok_or_else(|| {
            ProviderError::not_found(format!("API '{}' does not exist", target.api_id))
        })?;
        if target.resource_id.as_str() != ROOT_RESOURCE_ID {
            return Err(ProviderError::not_found(format!(
                "resource '{}' does not exist on API '{}'",
                target.resource_id, target.api_id
            )));
        }
        match api
            .methods
            .entry((target.resource_id.clone(), target.http_method.clone()))
        {
            Entry::Occupied(_) => Err(ProviderError::conflict(format!(
                "method {} already exists on resource '{}'",
                target.http_method, target.resource_id
            ))),
            Entry::Vacant(slot) => Ok(slot.insert(MethodState::default())),
        }
    }

    fn existing_method<'a>(
        state: &'a mut CloudState,
        target: &MethodTarget,
    ) -> ProviderResult<&'a mut MethodState> {
        let key = (target.resource_id.clone(), target.http_method.clone());
        state
            .apis
            .get_mut(&target.api_id)
            .and_then(|api| api.methods.get_mut(&key))
            .ok_or_else(|| {
                ProviderError::not_found(format!(
                    "method {} on resource '{}' of API '{}' does not exist",
                    target.http_method, target.resource_id, target.api_id
                ))
            })
    }
}

#[async_trait]
impl QueueService for MemoryCloud {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<QueueUrl> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::CreateQueue {
                name: name.to_string(),
            },
        )?;

        let fifo = attributes.get(&QueueAttribute::FifoQueue).map(String::as_str) == Some("true");
        if fifo != name.as_str().ends_with(ORDERED_QUEUE_SUFFIX) {
            return Err(ProviderError::validation(format!(
                "queue '{name}': only FIFO queues may end in '{ORDERED_QUEUE_SUFFIX}'"
            )));
        }

        if let Some(existing) = state.queues.get(name) {
            return if &existing.creation_attributes == attributes {
                Ok(existing.url.clone())
            } else {
                Err(ProviderError::conflict(format!(
                    "queue '{name}' already exists with different attributes"
                )))
            };
        }

        let url = format!(
            "https://sqs.{}.amazonaws.com/{}/{name}",
            self.region, self.account
        );
        let arn = format!("arn:aws:sqs:{}:{}:{name}", self.region, self.account);
        let url = QueueUrl::new(url).ok_or_else(|| ProviderError::validation("empty queue URL"))?;
        let arn = QueueArn::new(arn).ok_or_else(|| ProviderError::validation("empty queue ARN"))?;

        let mut stored_attributes = attributes.clone();
        stored_attributes.insert(QueueAttribute::QueueArn, arn.to_string());
        let unreadable_reads = state.visibility_lag;
        state.queues.insert(
            name.clone(),
            StoredQueue {
                url: url.clone(),
                creation_attributes: attributes.clone(),
                attributes: stored_attributes,
                tags: BTreeMap::new(),
                unreadable_reads,
            },
        );
        Ok(url)
    }

    async fn queue_url(&self, name: &QueueName) -> ProviderResult<QueueUrl> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::QueueUrl {
                name: name.to_string(),
            },
        )?;
        state
            .queues
            .get(name)
            .map(|q| q.url.clone())
            .ok_or_else(|| ProviderError::not_found(format!("queue '{name}' does not exist")))
    }

    async fn get_attributes(
        &self,
        url: &QueueUrl,
        names: &[QueueAttribute],
    ) -> ProviderResult<BTreeMap<QueueAttribute, String>> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::GetAttributes {
                url: url.to_string(),
            },
        )?;
        let queue = Self::queue_by_url(&mut state, url)?;
        if queue.unreadable_reads > 0 {
            queue.unreadable_reads -= 1;
            return Err(ProviderError::transient(format!(
                "queue '{url}' is not yet queryable"
            )));
        }
        Ok(names
            .iter()
            .filter_map(|n| queue.attributes.get(n).map(|v| (*n, v.clone())))
            .collect())
    }

    async fn set_attributes(
        &self,
        url: &QueueUrl,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::SetAttributes {
                url: url.to_string(),
                attributes: attributes.clone(),
            },
        )?;
        if attributes.contains_key(&QueueAttribute::QueueArn) {
            return Err(ProviderError::validation("QueueArn is read-only"));
        }
        let queue = Self::queue_by_url(&mut state, url)?;
        queue
            .attributes
            .extend(attributes.iter().map(|(k, v)| (*k, v.clone())));
        Ok(())
    }

    async fn tag_queue(
        &self,
        url: &QueueUrl,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::TagQueue {
                url: url.to_string(),
                tags: tags.clone(),
            },
        )?;
        let queue = Self::queue_by_url(&mut state, url)?;
        queue.tags.extend(tags.clone());
        Ok(())
    }
}

#[async_trait]
impl ApiService for MemoryCloud {
    async fn create_api(&self, name: &ApiName) -> ProviderResult<CreatedApi> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::CreateApi {
                name: name.to_string(),
            },
        )?;

        state.next_api += 1;
        let id = ApiId::new(format!("api{:06}", state.next_api))
            .ok_or_else(|| ProviderError::validation("empty API id"))?;
        let root_resource_id = ResourceId::new(ROOT_RESOURCE_ID)
            .ok_or_else(|| ProviderError::validation("empty resource id"))?;
        state.apis.insert(
            id.clone(),
            StoredApi {
                name: name.clone(),
                methods: BTreeMap::new(),
            },
        );
        tracing::debug!(api_id = %id, api_name = %name, "simulated API created");
        Ok(CreatedApi {
            id,
            root_resource_id,
        })
    }

    async fn put_method(&self, target: &MethodTarget, authorization: &str) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::PutMethod {
                target: target.clone(),
            },
        )?;
        Self::declare_method(&mut state, target)?.authorization = Some(authorization.to_string());
        Ok(())
    }

    async fn put_integration(
        &self,
        target: &MethodTarget,
        integration: &IntegrationSpec,
    ) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::PutIntegration {
                target: target.clone(),
                uri: integration.uri.clone(),
            },
        )?;
        Self::existing_method(&mut state, target)?.integration = Some(integration.clone());
        Ok(())
    }

    async fn put_method_response(
        &self,
        target: &MethodTarget,
        status_code: &str,
    ) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::PutMethodResponse {
                target: target.clone(),
                status_code: status_code.to_string(),
            },
        )?;
        let method = Self::existing_method(&mut state, target)?;
        if !method.method_responses.insert(status_code.to_string()) {
            return Err(ProviderError::conflict(format!(
                "response {status_code} already exists for method {}",
                target.http_method
            )));
        }
        Ok(())
    }

    async fn put_integration_response(
        &self,
        target: &MethodTarget,
        status_code: &str,
        response_parameters: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::PutIntegrationResponse {
                target: target.clone(),
                status_code: status_code.to_string(),
            },
        )?;
        let method = Self::existing_method(&mut state, target)?;
        if method.integration.is_none() {
            return Err(ProviderError::not_found(format!(
                "no integration on method {} of API '{}'",
                target.http_method, target.api_id
            )));
        }
        if !method.method_responses.contains(status_code) {
            return Err(ProviderError::not_found(format!(
                "no {status_code} method response on API '{}'",
                target.api_id
            )));
        }
        method
            .integration_responses
            .insert(status_code.to_string(), response_parameters.clone());
        Ok(())
    }
}

#[async_trait]
impl PermissionService for MemoryCloud {
    async fn add_permission(&self, grant: &PermissionGrant) -> ProviderResult<()> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::AddPermission {
                grant: grant.clone(),
            },
        )?;
        let statements = state
            .statements
            .entry(grant.function_ref.clone())
            .or_default();
        if statements.contains_key(&grant.statement_id) {
            return Err(ProviderError::conflict(format!(
                "statement '{}' already exists on '{}'",
                grant.statement_id, grant.function_ref
            )));
        }
        statements.insert(grant.statement_id.clone(), grant.clone());
        Ok(())
    }

    async fn get_statement(
        &self,
        function_ref: &FunctionRef,
        statement_id: &StatementId,
    ) -> ProviderResult<Option<PermissionGrant>> {
        let mut state = self.lock();
        self.begin(
            &mut state,
            ProviderOp::GetStatement {
                function_ref: function_ref.to_string(),
                statement_id: statement_id.to_string(),
            },
        )?;
        Ok(state
            .statements
            .get(function_ref)
            .and_then(|s| s.get(statement_id))
            .cloned())
    }
}
