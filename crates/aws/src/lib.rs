//! Gatewire AWS infrastructure adapter.
//!
//! Implements the provider ports defined in the [`provisioning`] crate
//! (`QueueService`, `ApiService`, `PermissionService`) over the AWS SDK for
//! Rust: SQS for queues, API Gateway REST APIs for the HTTP front door, and
//! Lambda resource policies for invoke permissions.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. SDK error
//! codes are mapped onto [`provisioning::ProviderError`] here; the workflow
//! never sees SDK types.

mod apigateway;
mod error;
mod lambda;
mod sqs;

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};

pub use apigateway::ApiGatewayApis;
pub use lambda::LambdaPermissions;
pub use sqs::SqsQueues;

/// The three AWS-backed providers, sharing one SDK configuration.
#[derive(Clone)]
pub struct AwsProviders {
    pub queues: Arc<SqsQueues>,
    pub apis: Arc<ApiGatewayApis>,
    pub permissions: Arc<LambdaPermissions>,
}

impl AwsProviders {
    /// Loads SDK configuration for `region` from the environment.
    ///
    /// Credentials come from the default provider chain (environment,
    /// shared profile, container or instance role).
    pub async fn from_env(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        tracing::debug!(region, "AWS SDK configuration loaded");

        Self {
            queues: Arc::new(SqsQueues::new(aws_sdk_sqs::Client::new(&config))),
            apis: Arc::new(ApiGatewayApis::new(aws_sdk_apigateway::Client::new(&config))),
            permissions: Arc::new(LambdaPermissions::new(aws_sdk_lambda::Client::new(&config))),
        }
    }
}
