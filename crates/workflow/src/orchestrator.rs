//! The provisioning orchestrator.
//!
//! Runs the fixed topology sequence for one request:
//!
//! ```text
//! PENDING → QUEUED → POLICIED → API_CREATED → INTEGRATED → PERMISSION_GRANTED
//! ```
//!
//! Each step either advances the run or ends it with a [`ProvisioningError`]
//! naming the failing step. There is no rollback: the error carries the
//! partial [`ProvisioningResult`] with every identifier created so far, which
//! can be handed back to [`ProvisioningOrchestrator::resume`].

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use provisioning::{
    build_send_policy, ApiName, ApiService, ConfigError, FunctionRef, IntegrationSubStep,
    PermissionService, ProviderError, ProvisioningConfig, ProvisioningRequest,
    ProvisioningResult, ProvisioningRunId, ProvisioningStep, QueueName,
    QueueService, Region, StatementId, Timestamp,
};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::api::ApiProvisioner;
use crate::permission::PermissionBinder;
use crate::queue::QueueProvisioner;

/// Why a step failed.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum StepError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// An integration sub-step failed; earlier sub-steps remain applied.
    #[error("{sub_step} sub-step failed: {source}")]
    Integration {
        sub_step: IntegrationSubStep,
        source: ProviderError,
    },

    #[error("Run cancelled before the step started")]
    Cancelled,
}

/// A run that stopped before its terminal stage.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Provisioning failed at step '{step}': {cause}")]
pub struct ProvisioningError {
    pub step: ProvisioningStep,
    pub cause: StepError,
    /// Everything created before the failure.
    pub partial: Box<ProvisioningResult>,
}

/// Outcome of one orchestrated request.
pub type RunOutcome = Result<ProvisioningResult, ProvisioningError>;

struct StepFailure {
    step: ProvisioningStep,
    cause: StepError,
}

/// Attributes a failure to the step that produced it.
trait AtStep<T> {
    fn at(self, step: ProvisioningStep) -> Result<T, StepFailure>;
}

impl<T, E: Into<StepError>> AtStep<T> for Result<T, E> {
    fn at(self, step: ProvisioningStep) -> Result<T, StepFailure> {
        self.map_err(|e| StepFailure {
            step,
            cause: e.into(),
        })
    }
}

/// Request fields validated into domain identifiers.
struct ValidatedRequest {
    queue_name: QueueName,
    api_name: ApiName,
    function_ref: Option<FunctionRef>,
}

fn validate(request: &ProvisioningRequest) -> Result<ValidatedRequest, ProviderError> {
    let queue_name = QueueName::ordered(&request.queue_base_name)?;
    let api_name = ApiName::new(request.api_name.trim())
        .ok_or_else(|| ProviderError::validation("API name must not be empty"))?;
    let function_ref = match request.target_function_ref.as_deref().map(str::trim) {
        Some(function) => Some(FunctionRef::new(function).ok_or_else(|| {
            ProviderError::validation("target function reference must not be empty")
        })?),
        None => None,
    };
    Ok(ValidatedRequest {
        queue_name,
        api_name,
        function_ref,
    })
}

/// Sequences the queue, API, and permission provisioners for each request.
///
/// Holds no state between runs beyond its configuration and provider handles.
pub struct ProvisioningOrchestrator {
    config: ProvisioningConfig,
    source_arn_pattern: String,
    queues: QueueProvisioner,
    apis: ApiProvisioner,
    permissions: PermissionBinder,
}

impl ProvisioningOrchestrator {
    /// Builds an orchestrator over the given providers.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if `config` does not validate.
    pub fn new(
        config: ProvisioningConfig,
        queue_service: Arc<dyn QueueService>,
        api_service: Arc<dyn ApiService>,
        permission_service: Arc<dyn PermissionService>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let region = Region::new(config.region.trim()).ok_or_else(|| ConfigError::Invalid {
            message: "region must not be empty".to_string(),
        })?;

        Ok(Self {
            source_arn_pattern: config.source_arn_pattern(),
            queues: QueueProvisioner::new(
                queue_service,
                config.retry.clone(),
                config.content_based_deduplication,
            ),
            apis: ApiProvisioner::new(
                api_service,
                config.retry.clone(),
                region,
                config.integration_credentials.clone(),
            ),
            permissions: PermissionBinder::new(permission_service, config.retry.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Provisions one request from scratch.
    pub async fn run(&self, request: &ProvisioningRequest) -> RunOutcome {
        self.run_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Provisions one request, checking `cancel` before every step.
    pub async fn run_with_cancellation(
        &self,
        request: &ProvisioningRequest,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let result = ProvisioningResult::pending(ProvisioningRunId::new_random(), request.clone());
        self.execute(request, result, cancel).await
    }

    /// Re-runs the request of an earlier failed run from its partial result.
    ///
    /// The earlier API is reused rather than created again, since API creation
    /// is not idempotent. Every other step is re-issued.
    pub async fn resume(&self, prior: ProvisioningResult, cancel: &CancellationToken) -> RunOutcome {
        let request = prior.request.clone();
        let mut result = ProvisioningResult::pending(prior.run_id, request.clone());
        result.api = prior.api;
        result.queue = prior.queue;
        self.execute(&request, result, cancel).await
    }

    /// Provisions every request, returning one outcome per request in input
    /// order. A failed request never stops the ones after it.
    pub async fn run_batch(&self, requests: &[ProvisioningRequest]) -> Vec<RunOutcome> {
        self.run_batch_with_cancellation(requests, &CancellationToken::new())
            .await
    }

    /// As [`Self::run_batch`], checking `cancel` before every step of every
    /// request.
    ///
    /// Up to `max_concurrency` requests run at once; steps within a request
    /// are always sequential. A request whose queue name repeats an earlier
    /// one in the batch is rejected without contacting any provider.
    pub async fn run_batch_with_cancellation(
        &self,
        requests: &[ProvisioningRequest],
        cancel: &CancellationToken,
    ) -> Vec<RunOutcome> {
        let mut seen = HashSet::new();
        let duplicates: Vec<bool> = requests
            .iter()
            .map(|request| match QueueName::ordered(&request.queue_base_name) {
                Ok(name) => !seen.insert(name),
                Err(_) => false,
            })
            .collect();

        info!(
            requests = requests.len(),
            max_concurrency = self.config.max_concurrency,
            "Starting provisioning batch"
        );

        let runs = requests
            .iter()
            .zip(duplicates)
            .map(|(request, duplicate)| async move {
                if duplicate {
                    Err(self.reject_duplicate(request))
                } else {
                    self.run_with_cancellation(request, cancel).await
                }
            });

        let outcomes: Vec<RunOutcome> = stream::iter(runs)
            .buffered(self.config.max_concurrency)
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        info!(
            succeeded = outcomes.len() - failed,
            failed,
            "Provisioning batch finished"
        );
        outcomes
    }

    fn reject_duplicate(&self, request: &ProvisioningRequest) -> ProvisioningError {
        let mut partial =
            ProvisioningResult::pending(ProvisioningRunId::new_random(), request.clone());
        partial.finished_at = Some(Timestamp::now());
        warn!(
            queue = %request.queue_base_name,
            "Queue name repeats an earlier request in the batch"
        );
        ProvisioningError {
            step: ProvisioningStep::Validate,
            cause: StepError::Provider(ProviderError::validation(format!(
                "queue '{}' is already provisioned by an earlier request in this batch",
                request.queue_base_name
            ))),
            partial: Box::new(partial),
        }
    }

    async fn execute(
        &self,
        request: &ProvisioningRequest,
        mut result: ProvisioningResult,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let span = info_span!(
            "provision",
            run_id = %result.run_id,
            queue = %request.queue_base_name,
            api = %request.api_name,
        );

        async move {
            let outcome = self.drive(request, &mut result, cancel).await;
            result.finished_at = Some(Timestamp::now());
            match outcome {
                Ok(()) => {
                    info!(
                        stage = ?result.stage,
                        invoke_url = result.invoke_url.as_deref().unwrap_or_default(),
                        "Provisioning complete"
                    );
                    Ok(result)
                }
                Err(StepFailure { step, cause }) => {
                    warn!(
                        %step,
                        error = %cause,
                        stage = ?result.stage,
                        completed = result.completed_steps.len(),
                        "Provisioning failed"
                    );
                    Err(ProvisioningError {
                        step,
                        cause,
                        partial: Box::new(result),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    fn checkpoint(cancel: &CancellationToken, step: ProvisioningStep) -> Result<(), StepFailure> {
        if cancel.is_cancelled() {
            return Err(StepFailure {
                step,
                cause: StepError::Cancelled,
            });
        }
        Ok(())
    }

    async fn drive(
        &self,
        request: &ProvisioningRequest,
        result: &mut ProvisioningResult,
        cancel: &CancellationToken,
    ) -> Result<(), StepFailure> {
        use ProvisioningStep as Step;

        Self::checkpoint(cancel, Step::Validate)?;
        let validated = validate(request).at(Step::Validate)?;
        result.complete(Step::Validate);

        // Queue
        Self::checkpoint(cancel, Step::CreateQueue)?;
        let queue = self
            .queues
            .create_ordered_queue(&validated.queue_name)
            .await
            .at(Step::CreateQueue)?;
        let queue_url = queue.url.clone();
        result.queue = Some(queue);
        result.complete(Step::CreateQueue);

        Self::checkpoint(cancel, Step::FetchQueueArn)?;
        let queue_arn = self.queues.fetch_arn(&queue_url).await.at(Step::FetchQueueArn)?;
        if let Some(queue) = result.queue.as_mut() {
            queue.arn = Some(queue_arn.clone());
        }
        result.complete(Step::FetchQueueArn);

        Self::checkpoint(cancel, Step::ApplyPolicy)?;
        let policy = build_send_policy(&queue_arn, &self.source_arn_pattern);
        self.queues
            .apply_policy(&queue_url, &policy)
            .await
            .at(Step::ApplyPolicy)?;
        result.complete(Step::ApplyPolicy);

        Self::checkpoint(cancel, Step::TagQueue)?;
        let tags = self.config.queue_tags();
        self.queues.tag(&queue_url, &tags).await.at(Step::TagQueue)?;
        result.tags = tags;
        result.complete(Step::TagQueue);

        // API
        Self::checkpoint(cancel, Step::CreateApi)?;
        let api = match result.api.clone() {
            Some(api) => {
                info!(api_id = %api.id, "Reusing API from an earlier run");
                api
            }
            None => self
                .apis
                .create_api(&validated.api_name)
                .await
                .at(Step::CreateApi)?,
        };
        result.api = Some(api.clone());
        result.complete(Step::CreateApi);

        Self::checkpoint(cancel, Step::AttachIntegration)?;
        let (account, queue_name) = queue_arn.account_and_name().at(Step::AttachIntegration)?;
        let backend_uri = self.config.queue_backend_uri(account, queue_name);
        result.integration_progress.clear();
        match self.apis.attach_integration(&api, &backend_uri).await {
            Ok(binding) => {
                result.integration_progress = IntegrationSubStep::ORDER.to_vec();
                result.integration = Some(binding);
            }
            Err(failure) => {
                result.integration_progress = failure.completed;
                return Err(StepFailure {
                    step: Step::AttachIntegration,
                    cause: StepError::Integration {
                        sub_step: failure.failed,
                        source: failure.source,
                    },
                });
            }
        }
        result.invoke_url = Some(self.config.invoke_url(&api.id));
        result.complete(Step::AttachIntegration);

        // Permission
        if let Some(function_ref) = &validated.function_ref {
            Self::checkpoint(cancel, Step::GrantPermission)?;
            let statement_id = StatementId::for_queue(&validated.queue_name);
            let (grant, outcome) = self
                .permissions
                .grant_invoke_from_queue(function_ref, &queue_arn, &statement_id)
                .await
                .at(Step::GrantPermission)?;
            result.permission = Some(grant);
            result.permission_outcome = Some(outcome);
            result.complete(Step::GrantPermission);
        }

        debug_assert!(
            result.is_complete(),
            "run ended in non-terminal stage {:?}",
            result.stage
        );
        Ok(())
    }
}
