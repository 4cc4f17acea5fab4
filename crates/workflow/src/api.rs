//! API creation and queue integration wiring.

use std::collections::BTreeMap;
use std::sync::Arc;

use provisioning::{
    ApiName, ApiResource, ApiService, IntegrationBinding, IntegrationSpec, IntegrationSubStep,
    IntegrationType, MethodTarget, ProviderError, ProviderResult, Region, RetrySettings,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::retry::with_backoff;

/// HTTP method the root resource accepts and forwards to the backend.
pub const INTEGRATION_METHOD: &str = "POST";

/// Status code of the success method and integration responses.
pub const SUCCESS_STATUS: &str = "200";

/// An integration attempt that stopped part-way.
///
/// Every sub-step is put-semantics, so the whole attachment can be re-issued.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("integration {failed} sub-step failed after {completed:?}: {source}")]
pub struct IntegrationFailure {
    /// Sub-steps that completed before the failure, in order.
    pub completed: Vec<IntegrationSubStep>,
    pub failed: IntegrationSubStep,
    pub source: ProviderError,
}

/// Creates APIs and wires their root POST method to a backend.
pub struct ApiProvisioner {
    service: Arc<dyn ApiService>,
    retry: RetrySettings,
    region: Region,
    credentials: Option<String>,
}

impl ApiProvisioner {
    pub fn new(
        service: Arc<dyn ApiService>,
        retry: RetrySettings,
        region: Region,
        credentials: Option<String>,
    ) -> Self {
        Self {
            service,
            retry,
            region,
            credentials,
        }
    }

    /// Creates a new API named `name`.
    ///
    /// The provider does not deduplicate by name: each call creates a distinct
    /// API. Transient failures are therefore not retried here, since a retried
    /// create whose first attempt reached the provider would leave a duplicate.
    pub async fn create_api(&self, name: &ApiName) -> ProviderResult<ApiResource> {
        let created = self.service.create_api(name).await?;
        info!(api_name = %name, api_id = %created.id, "API created");
        Ok(ApiResource {
            id: created.id,
            name: name.clone(),
            region: self.region.clone(),
            root_resource_id: created.root_resource_id,
        })
    }

    /// Binds the root POST method of `api` to `backend_uri`.
    ///
    /// Issues, in order: method declaration, integration, 200 method response,
    /// 200 pass-through integration response. Re-attaching overwrites the
    /// existing binding. The provider rejects re-declaring a method or method
    /// response with a conflict; those declarations are kept as they are.
    pub async fn attach_integration(
        &self,
        api: &ApiResource,
        backend_uri: &str,
    ) -> Result<IntegrationBinding, IntegrationFailure> {
        let target = MethodTarget {
            api_id: api.id.clone(),
            resource_id: api.root_resource_id.clone(),
            http_method: INTEGRATION_METHOD.to_string(),
        };
        let spec = IntegrationSpec {
            integration_type: IntegrationType::Aws,
            backend_method: INTEGRATION_METHOD.to_string(),
            uri: backend_uri.to_string(),
            credentials: self.credentials.clone(),
        };
        let no_parameters = BTreeMap::new();

        let service = self.service.as_ref();
        let (target, spec, no_parameters) = (&target, &spec, &no_parameters);
        let mut completed = Vec::with_capacity(IntegrationSubStep::ORDER.len());

        for sub_step in IntegrationSubStep::ORDER {
            let outcome = match sub_step {
                IntegrationSubStep::Method => already_declared(
                    sub_step,
                    with_backoff(&self.retry, "put_method", move || {
                        service.put_method(target, "NONE")
                    })
                    .await,
                ),
                IntegrationSubStep::Integration => {
                    with_backoff(&self.retry, "put_integration", move || {
                        service.put_integration(target, spec)
                    })
                    .await
                }
                IntegrationSubStep::MethodResponse => already_declared(
                    sub_step,
                    with_backoff(&self.retry, "put_method_response", move || {
                        service.put_method_response(target, SUCCESS_STATUS)
                    })
                    .await,
                ),
                IntegrationSubStep::IntegrationResponse => {
                    with_backoff(&self.retry, "put_integration_response", move || {
                        service.put_integration_response(target, SUCCESS_STATUS, no_parameters)
                    })
                    .await
                }
            };

            if let Err(source) = outcome {
                warn!(
                    api_id = %api.id,
                    %sub_step,
                    completed = completed.len(),
                    error = %source,
                    "Integration left partially wired"
                );
                return Err(IntegrationFailure {
                    completed,
                    failed: sub_step,
                    source,
                });
            }
            debug!(api_id = %api.id, %sub_step, "Integration sub-step applied");
            completed.push(sub_step);
        }

        info!(api_id = %api.id, backend_uri, "Integration attached");
        Ok(IntegrationBinding {
            target: target.clone(),
            backend_uri: backend_uri.to_string(),
            integration_type: IntegrationType::Aws,
        })
    }
}

/// Maps a conflict on a declaration sub-step to success: the method or
/// response is already declared from an earlier attachment.
fn already_declared(
    sub_step: IntegrationSubStep,
    outcome: ProviderResult<()>,
) -> ProviderResult<()> {
    match outcome {
        Err(ProviderError::ResourceConflict { message }) => {
            debug!(%sub_step, %message, "Already declared; keeping existing declaration");
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use memory::{MemoryCloud, OperationKind, ROOT_RESOURCE_ID};

    use super::*;

    const URI: &str = "arn:aws:apigateway:us-east-1:sqs:path/000000000000/orders.fifo";

    fn provisioner(cloud: &MemoryCloud) -> ApiProvisioner {
        let retry = RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        };
        ApiProvisioner::new(
            Arc::new(cloud.clone()),
            retry,
            Region::new("us-east-1").unwrap(),
            None,
        )
    }

    #[tokio::test]
    async fn create_api_is_not_idempotent_by_name() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let name = ApiName::new("orders-api").unwrap();

        let first = apis.create_api(&name).await.unwrap();
        let second = apis.create_api(&name).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.root_resource_id.as_str(), ROOT_RESOURCE_ID);
        assert_eq!(first.region.as_str(), "us-east-1");
    }

    #[tokio::test]
    async fn create_api_does_not_retry_transient_errors() {
        let cloud = MemoryCloud::default();
        cloud.inject_failures(OperationKind::CreateApi, ProviderError::transient("throttled"), 1);

        let err = provisioner(&cloud)
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transient { .. }));
        assert_eq!(cloud.operations_of(OperationKind::CreateApi).len(), 1);
    }

    #[tokio::test]
    async fn attach_twice_leaves_one_binding() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let api = apis
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap();

        let first = apis.attach_integration(&api, URI).await.unwrap();
        let second = apis.attach_integration(&api, URI).await.unwrap();
        assert_eq!(first, second);

        let methods = cloud.methods(&api.id);
        assert_eq!(methods.len(), 1);
        let method = methods.values().next().unwrap();
        assert_eq!(method.integration.as_ref().map(|i| i.uri.as_str()), Some(URI));
        assert_eq!(method.method_responses.len(), 1);
        assert_eq!(method.integration_responses.len(), 1);
        assert_eq!(cloud.integration_count(&api.id), 1);
    }

    #[tokio::test]
    async fn reattach_tolerates_existing_method_declaration() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let api = apis
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap();
        apis.attach_integration(&api, URI).await.unwrap();
        cloud.clear_operations();

        let binding = apis.attach_integration(&api, URI).await.unwrap();
        assert_eq!(binding.backend_uri, URI);
        assert_eq!(cloud.operations_of(OperationKind::PutMethod).len(), 1);
        assert_eq!(cloud.operations_of(OperationKind::PutIntegrationResponse).len(), 1);
        assert_eq!(cloud.integration_count(&api.id), 1);
    }

    #[tokio::test]
    async fn declaration_conflict_is_not_retried_or_fatal() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let api = apis
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap();
        apis.attach_integration(&api, URI).await.unwrap();
        cloud.inject_failure(
            OperationKind::PutMethod,
            ProviderError::conflict("Method already exists for this resource"),
        );

        apis.attach_integration(&api, URI).await.unwrap();
        assert_eq!(cloud.operations_of(OperationKind::PutMethod).len(), 2);
    }

    #[tokio::test]
    async fn integration_conflict_still_fails() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let api = apis
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap();
        cloud.inject_failure(
            OperationKind::PutIntegration,
            ProviderError::conflict("concurrent modification"),
        );

        let failure = apis.attach_integration(&api, URI).await.unwrap_err();
        assert_eq!(failure.failed, IntegrationSubStep::Integration);
        assert_eq!(failure.completed, vec![IntegrationSubStep::Method]);
    }

    #[tokio::test]
    async fn partial_failure_reports_completed_sub_steps() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let api = apis
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap();
        cloud.inject_failure(
            OperationKind::PutMethodResponse,
            ProviderError::validation("bad status code"),
        );

        let failure = apis.attach_integration(&api, URI).await.unwrap_err();
        assert_eq!(
            failure.completed,
            vec![IntegrationSubStep::Method, IntegrationSubStep::Integration]
        );
        assert_eq!(failure.failed, IntegrationSubStep::MethodResponse);
        assert_eq!(cloud.operations_of(OperationKind::PutIntegrationResponse).len(), 0);

        cloud.clear_failures();
        apis.attach_integration(&api, URI).await.unwrap();
        assert_eq!(cloud.integration_count(&api.id), 1);
    }

    #[tokio::test]
    async fn transient_sub_step_failures_are_retried() {
        let cloud = MemoryCloud::default();
        let apis = provisioner(&cloud);
        let api = apis
            .create_api(&ApiName::new("orders-api").unwrap())
            .await
            .unwrap();
        cloud.inject_failures(
            OperationKind::PutIntegration,
            ProviderError::transient("throttled"),
            2,
        );

        apis.attach_integration(&api, URI).await.unwrap();
        assert_eq!(cloud.operations_of(OperationKind::PutIntegration).len(), 3);
    }
}
