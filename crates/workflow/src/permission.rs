//! Function invoke permissions for queue event sources.

use std::sync::Arc;

use provisioning::{
    FunctionRef, GrantOutcome, PermissionGrant, PermissionService, ProviderError, ProviderResult,
    QueueArn, RetrySettings, StatementId,
};
use tracing::info;

use crate::retry::with_backoff;

pub const INVOKE_ACTION: &str = "lambda:InvokeFunction";
pub const QUEUE_PRINCIPAL: &str = "sqs.amazonaws.com";

pub struct PermissionBinder {
    service: Arc<dyn PermissionService>,
    retry: RetrySettings,
}

impl PermissionBinder {
    pub fn new(service: Arc<dyn PermissionService>, retry: RetrySettings) -> Self {
        Self { service, retry }
    }

    /// Authorizes events from `queue_arn` to invoke `function_ref` under
    /// `statement_id`.
    ///
    /// If the statement id is already in use, the existing statement is read
    /// back: identical parameters yield [`GrantOutcome::AlreadyPresent`],
    /// anything else fails with [`ProviderError::PermissionConflict`]. The
    /// provider also reports a conflict while another policy update is in
    /// flight; a statement that cannot be read back is retried as transient.
    pub async fn grant_invoke_from_queue(
        &self,
        function_ref: &FunctionRef,
        queue_arn: &QueueArn,
        statement_id: &StatementId,
    ) -> ProviderResult<(PermissionGrant, GrantOutcome)> {
        let grant = PermissionGrant {
            function_ref: function_ref.clone(),
            statement_id: statement_id.clone(),
            action: INVOKE_ACTION.to_string(),
            principal: QUEUE_PRINCIPAL.to_string(),
            source_arn: queue_arn.to_string(),
        };
        let service = self.service.as_ref();
        let grant_ref = &grant;

        let outcome = with_backoff(&self.retry, "add_permission", move || async move {
            match service.add_permission(grant_ref).await {
                Ok(()) => Ok(GrantOutcome::Granted),
                Err(ProviderError::ResourceConflict { .. }) => {
                    match service.get_statement(function_ref, statement_id).await? {
                        Some(existing) if existing == *grant_ref => {
                            Ok(GrantOutcome::AlreadyPresent)
                        }
                        Some(existing) => Err(ProviderError::PermissionConflict {
                            statement_id: statement_id.to_string(),
                            message: format!(
                                "existing statement allows {} from {} (principal {}), requested {} from {}",
                                existing.action,
                                existing.source_arn,
                                existing.principal,
                                grant_ref.action,
                                grant_ref.source_arn
                            ),
                        }),
                        None => Err(ProviderError::transient(format!(
                            "statement id '{statement_id}' reported in use but not readable; \
                             a policy update may be in progress"
                        ))),
                    }
                }
                Err(err) => Err(err),
            }
        })
        .await?;

        match outcome {
            GrantOutcome::Granted => {
                info!(function = %function_ref, %statement_id, "Invoke permission granted");
            }
            GrantOutcome::AlreadyPresent => {
                info!(
                    function = %function_ref,
                    %statement_id,
                    "Invoke permission already present"
                );
            }
        }
        Ok((grant, outcome))
    }
}
