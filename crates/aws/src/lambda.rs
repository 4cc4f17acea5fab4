//! [`PermissionService`] over AWS Lambda resource policies.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_lambda::Client;
use provisioning::{
    FunctionRef, PermissionGrant, PermissionService, ProviderError, ProviderResult, StatementId,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::from_sdk;

const SOURCE_ARN_KEY: &str = "aws:sourcearn";

pub struct LambdaPermissions {
    client: Client,
}

impl LambdaPermissions {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PermissionService for LambdaPermissions {
    async fn add_permission(&self, grant: &PermissionGrant) -> ProviderResult<()> {
        debug!(
            function = %grant.function_ref,
            statement_id = %grant.statement_id,
            "lambda:AddPermission"
        );
        self.client
            .add_permission()
            .function_name(grant.function_ref.as_str())
            .statement_id(grant.statement_id.as_str())
            .action(&grant.action)
            .principal(&grant.principal)
            .source_arn(&grant.source_arn)
            .send()
            .await
            .map_err(|e| from_sdk("add_permission", e))?;
        Ok(())
    }

    async fn get_statement(
        &self,
        function_ref: &FunctionRef,
        statement_id: &StatementId,
    ) -> ProviderResult<Option<PermissionGrant>> {
        debug!(function = %function_ref, %statement_id, "lambda:GetPolicy");
        let output = match self
            .client
            .get_policy()
            .function_name(function_ref.as_str())
            .send()
            .await
            .map_err(|e| from_sdk("get_policy", e))
        {
            Ok(output) => output,
            // A function without a resource policy reports not-found.
            Err(ProviderError::ResourceNotFound { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };

        match output.policy() {
            Some(policy) => find_statement(policy, function_ref, statement_id),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource policy parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourcePolicy {
    #[serde(default)]
    statement: Vec<RawStatement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawStatement {
    sid: Option<String>,
    principal: Option<Value>,
    action: Option<Value>,
    #[serde(default)]
    condition: BTreeMap<String, BTreeMap<String, Value>>,
}

/// Principal as written in the policy: a bare string or `{"Service": ...}` /
/// `{"AWS": ...}`.
fn principal_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("Service")
            .or_else(|| map.get("AWS"))
            .and_then(first_string),
        _ => None,
    }
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}

/// Source ARN from any ARN condition operator; condition keys are
/// case-insensitive.
fn source_arn_of(condition: &BTreeMap<String, BTreeMap<String, Value>>) -> Option<String> {
    condition
        .iter()
        .filter(|(operator, _)| operator.starts_with("Arn"))
        .flat_map(|(_, entries)| entries.iter())
        .find(|(key, _)| key.to_ascii_lowercase() == SOURCE_ARN_KEY)
        .and_then(|(_, value)| first_string(value))
}

fn find_statement(
    policy: &str,
    function_ref: &FunctionRef,
    statement_id: &StatementId,
) -> ProviderResult<Option<PermissionGrant>> {
    let policy: ResourcePolicy =
        serde_json::from_str(policy).map_err(|e| ProviderError::Unclassified {
            code: None,
            message: format!("get_policy: resource policy is not valid JSON: {e}"),
        })?;

    let Some(statement) = policy
        .statement
        .into_iter()
        .find(|s| s.sid.as_deref() == Some(statement_id.as_str()))
    else {
        return Ok(None);
    };

    Ok(Some(PermissionGrant {
        function_ref: function_ref.clone(),
        statement_id: statement_id.clone(),
        action: statement
            .action
            .as_ref()
            .and_then(first_string)
            .unwrap_or_default(),
        principal: statement
            .principal
            .as_ref()
            .and_then(principal_of)
            .unwrap_or_default(),
        source_arn: source_arn_of(&statement.condition).unwrap_or_default(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"{
        "Version": "2012-10-17",
        "Id": "default",
        "Statement": [
            {
                "Sid": "other-invoke",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "lambda:InvokeFunction",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:orders-handler"
            },
            {
                "Sid": "orders-fifo-invoke",
                "Effect": "Allow",
                "Principal": { "Service": "sqs.amazonaws.com" },
                "Action": "lambda:InvokeFunction",
                "Resource": "arn:aws:lambda:us-east-1:123456789012:function:orders-handler",
                "Condition": {
                    "ArnLike": {
                        "AWS:SourceArn": "arn:aws:sqs:us-east-1:123456789012:orders.fifo"
                    }
                }
            }
        ]
    }"#;

    fn ids(sid: &str) -> (FunctionRef, StatementId) {
        (
            FunctionRef::new("orders-handler").unwrap(),
            StatementId::new(sid).unwrap(),
        )
    }

    #[test]
    fn statement_is_read_back_by_sid() {
        let (function, sid) = ids("orders-fifo-invoke");
        let grant = find_statement(POLICY, &function, &sid).unwrap().unwrap();

        assert_eq!(grant.function_ref, function);
        assert_eq!(grant.statement_id, sid);
        assert_eq!(grant.action, "lambda:InvokeFunction");
        assert_eq!(grant.principal, "sqs.amazonaws.com");
        assert_eq!(grant.source_arn, "arn:aws:sqs:us-east-1:123456789012:orders.fifo");
    }

    #[test]
    fn unknown_sid_is_absent() {
        let (function, sid) = ids("refunds-fifo-invoke");
        assert_eq!(find_statement(POLICY, &function, &sid).unwrap(), None);
    }

    #[test]
    fn statement_without_condition_has_empty_source() {
        let (function, sid) = ids("other-invoke");
        let grant = find_statement(POLICY, &function, &sid).unwrap().unwrap();
        assert_eq!(grant.principal, "*");
        assert!(grant.source_arn.is_empty());
    }

    #[test]
    fn malformed_policy_is_reported() {
        let (function, sid) = ids("orders-fifo-invoke");
        let err = find_statement("not json", &function, &sid).unwrap_err();
        assert!(matches!(err, ProviderError::Unclassified { code: None, .. }));
    }
}
