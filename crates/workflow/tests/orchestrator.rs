//! End-to-end orchestration against the in-memory providers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use memory::{MemoryCloud, OperationKind, ProviderOp};
use provisioning::{
    FunctionRef, GrantOutcome, IntegrationSubStep, PermissionGrant, PermissionService,
    PolicyDocument, ProviderError, ProviderResult, ProvisioningConfig, ProvisioningRequest,
    ProvisioningStage, ProvisioningStep, QueueAttribute, QueueName, QueueService, QueueUrl,
    RetrySettings, StatementId,
};
use workflow::{CancellationToken, ProvisioningOrchestrator, StepError};

fn config() -> ProvisioningConfig {
    ProvisioningConfig {
        retry: RetrySettings {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        },
        ..ProvisioningConfig::default()
    }
}

fn orchestrator_with(cloud: &MemoryCloud, config: ProvisioningConfig) -> ProvisioningOrchestrator {
    ProvisioningOrchestrator::new(
        config,
        Arc::new(cloud.clone()),
        Arc::new(cloud.clone()),
        Arc::new(cloud.clone()),
    )
    .expect("valid config")
}

fn orchestrator(cloud: &MemoryCloud) -> ProvisioningOrchestrator {
    orchestrator_with(cloud, config())
}

fn orders_request() -> ProvisioningRequest {
    ProvisioningRequest::new("orders", "orders-api").with_target_function("fn:orders-handler")
}

#[tokio::test]
async fn provisions_full_topology_in_order() {
    let cloud = MemoryCloud::default();
    let result = orchestrator(&cloud).run(&orders_request()).await.expect("run");

    let kinds: Vec<OperationKind> = cloud.operations().iter().map(ProviderOp::kind).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::CreateQueue,
            OperationKind::GetAttributes,
            OperationKind::SetAttributes,
            OperationKind::TagQueue,
            OperationKind::CreateApi,
            OperationKind::PutMethod,
            OperationKind::PutIntegration,
            OperationKind::PutMethodResponse,
            OperationKind::PutIntegrationResponse,
            OperationKind::AddPermission,
        ]
    );

    assert_eq!(result.stage, ProvisioningStage::PermissionGranted);
    assert!(result.is_complete());

    let queue = result.queue.as_ref().expect("queue");
    assert!(queue.url.as_str().ends_with("orders.fifo"));
    let arn = queue.arn.as_ref().expect("queue arn");
    assert!(!arn.as_str().is_empty());

    let api = result.api.as_ref().expect("api");
    assert_eq!(cloud.api_ids(), vec![api.id.clone()]);

    let methods = cloud.methods(&api.id);
    assert_eq!(methods.len(), 1);
    let ((resource, method_name), method) = methods.iter().next().expect("root POST");
    assert_eq!(resource.as_str(), "root");
    assert_eq!(method_name, "POST");
    let integration = method.integration.as_ref().expect("integration");
    assert_eq!(
        integration.uri,
        "arn:aws:apigateway:us-east-1:sqs:path/000000000000/orders.fifo"
    );
    assert_eq!(method.method_responses.iter().collect::<Vec<_>>(), vec!["200"]);
    assert_eq!(
        method.integration_responses.keys().collect::<Vec<_>>(),
        vec!["200"]
    );

    let function = FunctionRef::new("fn:orders-handler").unwrap();
    let statements = cloud.statements(&function);
    assert_eq!(statements.len(), 1);
    assert_eq!(statements[0].source_arn, arn.as_str());
    assert_eq!(result.permission_outcome, Some(GrantOutcome::Granted));

    assert_eq!(
        result.invoke_url.as_deref(),
        Some(format!("https://{}.execute-api.us-east-1.amazonaws.com/default", api.id).as_str())
    );
    assert!(result.finished_at.is_some());
}

#[tokio::test]
async fn applied_policy_matches_fetched_arn_and_pattern() {
    let cloud = MemoryCloud::default();
    let config = ProvisioningConfig {
        source_arn_pattern: Some("arn:aws:execute-api:us-east-1:123456789012:*".into()),
        ..config()
    };
    let result = orchestrator_with(&cloud, config)
        .run(&orders_request())
        .await
        .expect("run");

    let name = QueueName::ordered("orders").unwrap();
    let attributes = cloud.queue_attributes(&name).expect("queue");
    let policy: PolicyDocument =
        serde_json::from_str(attributes.get(&QueueAttribute::Policy).expect("policy")).unwrap();

    let arn = result.queue.and_then(|q| q.arn).expect("arn");
    assert_eq!(policy.statement[0].resource, arn.as_str());
    assert_eq!(
        policy.source_arn_condition(),
        Some("arn:aws:execute-api:us-east-1:123456789012:*")
    );
    assert_eq!(
        cloud.queue_tags(&name).and_then(|t| t.get("managed-by").cloned()),
        Some("gatewire".to_string())
    );
}

#[tokio::test]
async fn suffixed_base_name_is_normalized() {
    let cloud = MemoryCloud::default();
    let request = ProvisioningRequest::new("orders.fifo", "orders-api");
    let result = orchestrator(&cloud).run(&request).await.expect("run");

    assert_eq!(
        result.queue.map(|q| q.name.to_string()),
        Some("orders.fifo".to_string())
    );
    assert_eq!(cloud.queue_names(), vec![QueueName::ordered("orders").unwrap()]);
}

#[tokio::test]
async fn request_without_function_ends_integrated() {
    let cloud = MemoryCloud::default();
    let request = ProvisioningRequest::new("orders", "orders-api");
    let result = orchestrator(&cloud).run(&request).await.expect("run");

    assert_eq!(result.stage, ProvisioningStage::Integrated);
    assert!(result.is_complete());
    assert!(result.permission.is_none());
    assert!(cloud.operations_of(OperationKind::AddPermission).is_empty());
}

#[tokio::test]
async fn rerun_reuses_queue_but_creates_new_api() {
    let cloud = MemoryCloud::default();
    let orchestrator = orchestrator(&cloud);

    let first = orchestrator.run(&orders_request()).await.expect("first run");
    let second = orchestrator.run(&orders_request()).await.expect("second run");

    assert_eq!(
        first.queue.as_ref().map(|q| &q.url),
        second.queue.as_ref().map(|q| &q.url)
    );
    assert_ne!(
        first.api.as_ref().map(|a| &a.id),
        second.api.as_ref().map(|a| &a.id)
    );
    assert_eq!(cloud.api_ids().len(), 2);
    assert_eq!(second.permission_outcome, Some(GrantOutcome::AlreadyPresent));
    assert_eq!(
        cloud
            .statements(&FunctionRef::new("fn:orders-handler").unwrap())
            .len(),
        1
    );
}

#[tokio::test]
async fn arn_fetch_tolerates_visibility_lag() {
    let cloud = MemoryCloud::default().with_visibility_lag(3);
    let result = orchestrator(&cloud).run(&orders_request()).await.expect("run");

    assert!(result.is_complete());
    assert_eq!(cloud.operations_of(OperationKind::GetAttributes).len(), 4);
}

#[tokio::test]
async fn arn_fetch_gives_up_after_bounded_retries() {
    let cloud = MemoryCloud::default().with_visibility_lag(10);
    let err = orchestrator(&cloud)
        .run(&orders_request())
        .await
        .expect_err("run should fail");

    assert_eq!(err.step, ProvisioningStep::FetchQueueArn);
    assert!(matches!(
        err.cause,
        StepError::Provider(ProviderError::Transient { .. })
    ));
    assert_eq!(err.partial.stage, ProvisioningStage::Queued);
    assert!(err.partial.queue.as_ref().is_some_and(|q| q.arn.is_none()));
    assert_eq!(cloud.operations_of(OperationKind::GetAttributes).len(), 4);
}

#[tokio::test]
async fn failure_reports_partial_result() {
    let cloud = MemoryCloud::default();
    cloud.inject_failure(
        OperationKind::CreateApi,
        ProviderError::Unclassified {
            code: Some("AccessDenied".into()),
            message: "not authorized to create APIs".into(),
        },
    );

    let err = orchestrator(&cloud)
        .run(&orders_request())
        .await
        .expect_err("run should fail");

    assert_eq!(err.step, ProvisioningStep::CreateApi);
    assert_eq!(err.partial.stage, ProvisioningStage::Policied);
    assert_eq!(
        err.partial.completed_steps,
        vec![
            ProvisioningStep::Validate,
            ProvisioningStep::CreateQueue,
            ProvisioningStep::FetchQueueArn,
            ProvisioningStep::ApplyPolicy,
            ProvisioningStep::TagQueue,
        ]
    );
    let queue = err.partial.queue.as_ref().expect("queue survives failure");
    assert!(queue.arn.is_some());
    assert!(err.partial.api.is_none());
    assert!(err.to_string().contains("create-api"));
}

#[tokio::test]
async fn partially_wired_integration_is_resumed_without_new_api() {
    let cloud = MemoryCloud::default();
    let orchestrator = orchestrator(&cloud);
    cloud.inject_failure(
        OperationKind::PutIntegrationResponse,
        ProviderError::validation("invalid response parameters"),
    );

    let err = orchestrator
        .run(&orders_request())
        .await
        .expect_err("run should fail");
    assert_eq!(err.step, ProvisioningStep::AttachIntegration);
    assert!(matches!(
        err.cause,
        StepError::Integration {
            sub_step: IntegrationSubStep::IntegrationResponse,
            ..
        }
    ));
    assert!(err.partial.is_partially_wired());
    assert_eq!(err.partial.stage, ProvisioningStage::ApiCreated);
    let api_id = err.partial.api.as_ref().map(|a| a.id.clone()).expect("api");

    cloud.clear_failures();
    let result = orchestrator
        .resume(*err.partial, &CancellationToken::new())
        .await
        .expect("resumed run");

    assert!(result.is_complete());
    assert_eq!(result.api.map(|a| a.id), Some(api_id.clone()));
    assert_eq!(cloud.operations_of(OperationKind::CreateApi).len(), 1);
    assert_eq!(cloud.integration_count(&api_id), 1);
    assert_eq!(
        result.integration_progress,
        IntegrationSubStep::ORDER.to_vec()
    );
}

#[tokio::test]
async fn conflicting_statement_fails_permission_step() {
    let cloud = MemoryCloud::default();
    let function = FunctionRef::new("fn:orders-handler").unwrap();
    let statement_id = StatementId::for_queue(&QueueName::ordered("orders").unwrap());
    cloud
        .add_permission(&PermissionGrant {
            function_ref: function.clone(),
            statement_id: statement_id.clone(),
            action: "lambda:InvokeFunction".into(),
            principal: "sqs.amazonaws.com".into(),
            source_arn: "arn:aws:sqs:us-east-1:999999999999:orders.fifo".into(),
        })
        .await
        .unwrap();

    let err = orchestrator(&cloud)
        .run(&orders_request())
        .await
        .expect_err("run should fail");

    assert_eq!(err.step, ProvisioningStep::GrantPermission);
    assert!(matches!(
        err.cause,
        StepError::Provider(ProviderError::PermissionConflict { .. })
    ));
    assert_eq!(err.partial.stage, ProvisioningStage::Integrated);
    assert!(err.partial.invoke_url.is_some());
}

#[tokio::test]
async fn cancelled_run_touches_no_provider() {
    let cloud = MemoryCloud::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator(&cloud)
        .run_with_cancellation(&orders_request(), &cancel)
        .await
        .expect_err("cancelled");

    assert_eq!(err.cause, StepError::Cancelled);
    assert_eq!(err.partial.stage, ProvisioningStage::Pending);
    assert!(cloud.operations().is_empty());
}

/// Queue provider that cancels a run once its queue is tagged.
struct CancelAfterTagging {
    inner: MemoryCloud,
    cancel: CancellationToken,
}

#[async_trait]
impl QueueService for CancelAfterTagging {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<QueueUrl> {
        self.inner.create_queue(name, attributes).await
    }

    async fn queue_url(&self, name: &QueueName) -> ProviderResult<QueueUrl> {
        self.inner.queue_url(name).await
    }

    async fn get_attributes(
        &self,
        url: &QueueUrl,
        names: &[QueueAttribute],
    ) -> ProviderResult<BTreeMap<QueueAttribute, String>> {
        self.inner.get_attributes(url, names).await
    }

    async fn set_attributes(
        &self,
        url: &QueueUrl,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<()> {
        self.inner.set_attributes(url, attributes).await
    }

    async fn tag_queue(
        &self,
        url: &QueueUrl,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        let tagged = self.inner.tag_queue(url, tags).await;
        self.cancel.cancel();
        tagged
    }
}

#[tokio::test]
async fn cancellation_between_steps_keeps_created_queue() {
    let cloud = MemoryCloud::default();
    let cancel = CancellationToken::new();
    let queues = CancelAfterTagging {
        inner: cloud.clone(),
        cancel: cancel.clone(),
    };
    let orchestrator = ProvisioningOrchestrator::new(
        config(),
        Arc::new(queues),
        Arc::new(cloud.clone()),
        Arc::new(cloud.clone()),
    )
    .expect("valid config");

    let err = orchestrator
        .run_with_cancellation(&orders_request(), &cancel)
        .await
        .expect_err("cancelled");

    assert_eq!(err.step, ProvisioningStep::CreateApi);
    assert_eq!(err.cause, StepError::Cancelled);
    assert_eq!(err.partial.stage, ProvisioningStage::Policied);
    let queue = err.partial.queue.as_ref().expect("queue kept");
    assert!(queue.arn.is_some());
    assert!(err.partial.api.is_none());
    assert!(cloud.operations_of(OperationKind::CreateApi).is_empty());
    assert_eq!(cloud.queue_names(), vec![QueueName::ordered("orders").unwrap()]);
}

#[tokio::test]
async fn incompatible_existing_queue_fails_create_step() {
    let cloud = MemoryCloud::default();
    let name = QueueName::ordered("orders").unwrap();
    let attributes = BTreeMap::from([
        (QueueAttribute::FifoQueue, "true".to_string()),
        (QueueAttribute::ContentBasedDeduplication, "true".to_string()),
    ]);
    cloud.create_queue(&name, &attributes).await.unwrap();

    let err = orchestrator(&cloud)
        .run(&orders_request())
        .await
        .expect_err("run should fail");

    assert_eq!(err.step, ProvisioningStep::CreateQueue);
    assert!(matches!(
        err.cause,
        StepError::Provider(ProviderError::ResourceConflict { .. })
    ));
    assert!(err.partial.queue.is_none());
    assert!(cloud.operations_of(OperationKind::CreateApi).is_empty());
}

#[tokio::test]
async fn batch_requests_share_no_identifiers() {
    let cloud = MemoryCloud::default();
    let requests = vec![
        orders_request(),
        ProvisioningRequest::new("refunds", "refunds-api").with_target_function("fn:refunds"),
    ];

    let outcomes = orchestrator(&cloud).run_batch(&requests).await;
    assert_eq!(outcomes.len(), 2);
    let results: Vec<_> = outcomes
        .into_iter()
        .map(|o| o.expect("batch item succeeds"))
        .collect();

    assert_eq!(results[0].request, requests[0]);
    assert_eq!(results[1].request, requests[1]);
    let (a, b) = (&results[0], &results[1]);
    assert_ne!(a.run_id, b.run_id);
    assert_ne!(a.queue.as_ref().unwrap().url, b.queue.as_ref().unwrap().url);
    assert_ne!(a.queue.as_ref().unwrap().arn, b.queue.as_ref().unwrap().arn);
    assert_ne!(a.api.as_ref().unwrap().id, b.api.as_ref().unwrap().id);
    assert_ne!(
        a.permission.as_ref().unwrap().statement_id,
        b.permission.as_ref().unwrap().statement_id
    );
}

#[tokio::test]
async fn batch_continues_after_failed_request() {
    let cloud = MemoryCloud::default();
    let requests = vec![
        ProvisioningRequest::new("bad/name", "bad-api"),
        orders_request(),
        ProvisioningRequest::new("orders.fifo", "orders-api-2"),
    ];

    let outcomes = orchestrator(&cloud).run_batch(&requests).await;

    let invalid = outcomes[0].as_ref().expect_err("invalid name");
    assert_eq!(invalid.step, ProvisioningStep::Validate);
    assert!(matches!(
        invalid.cause,
        StepError::Provider(ProviderError::Validation { .. })
    ));
    assert!(outcomes[1].as_ref().is_ok_and(|r| r.is_complete()));
    let duplicate = outcomes[2].as_ref().expect_err("duplicate queue name");
    assert_eq!(duplicate.step, ProvisioningStep::Validate);

    assert_eq!(cloud.operations_of(OperationKind::CreateQueue).len(), 1);
    assert_eq!(cloud.api_ids().len(), 1);
}

#[tokio::test]
async fn concurrent_batch_preserves_input_order() {
    let cloud = MemoryCloud::default();
    let config = ProvisioningConfig {
        max_concurrency: 4,
        ..config()
    };
    let requests: Vec<_> = (0..5)
        .map(|i| ProvisioningRequest::new(format!("queue-{i}"), format!("api-{i}")))
        .collect();

    let outcomes = orchestrator_with(&cloud, config).run_batch(&requests).await;

    for (request, outcome) in requests.iter().zip(&outcomes) {
        let result = outcome.as_ref().expect("batch item succeeds");
        assert_eq!(&result.request, request);
        assert!(result.is_complete());
    }
    assert_eq!(cloud.queue_names().len(), 5);
    assert_eq!(cloud.api_ids().len(), 5);
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let cloud = MemoryCloud::default();
    let config = ProvisioningConfig {
        max_concurrency: 0,
        ..ProvisioningConfig::default()
    };
    let built = ProvisioningOrchestrator::new(
        config,
        Arc::new(cloud.clone()),
        Arc::new(cloud.clone()),
        Arc::new(cloud),
    );
    assert!(built.is_err());
}
