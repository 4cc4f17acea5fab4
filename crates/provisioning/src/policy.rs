//! Resource-access policy documents.
//!
//! Documents are built fresh for every application and never mutated in place.
//! Serialisation goes through `serde_json`, which escapes every string value, so
//! a resource ARN containing quotes or backslashes cannot break the document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ProviderError, QueueArn};

/// Policy language version accepted by the provider.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Action that lets a caller enqueue messages.
pub const SEND_MESSAGE_ACTION: &str = "SQS:SendMessage";

/// Condition key holding the ARN of the calling resource.
pub const SOURCE_ARN_CONDITION_KEY: &str = "aws:SourceArn";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// One statement. `condition` maps an operator (e.g. `ArnEquals`) to
/// key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: Effect,
    pub principal: String,
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: BTreeMap<String, BTreeMap<String, String>>,
}

impl PolicyDocument {
    /// Serialises the document to the JSON text providers expect.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Validation`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, ProviderError> {
        serde_json::to_string(self)
            .map_err(|e| ProviderError::validation(format!("Failed to serialize policy: {e}")))
    }

    /// Returns the first statement's source-ARN condition value, if any.
    pub fn source_arn_condition(&self) -> Option<&str> {
        self.statement
            .first()?
            .condition
            .values()
            .find_map(|pairs| pairs.get(SOURCE_ARN_CONDITION_KEY))
            .map(String::as_str)
    }
}

/// Builds a policy letting any principal send messages to `resource_arn`,
/// provided the call originates from a resource matching `source_arn_pattern`.
///
/// Pure and deterministic: identical inputs always produce identical documents.
pub fn build_send_policy(resource_arn: &QueueArn, source_arn_pattern: &str) -> PolicyDocument {
    let condition = BTreeMap::from([(
        "ArnEquals".to_string(),
        BTreeMap::from([(
            SOURCE_ARN_CONDITION_KEY.to_string(),
            source_arn_pattern.to_string(),
        )]),
    )]);

    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![PolicyStatement {
            effect: Effect::Allow,
            principal: "*".to_string(),
            action: SEND_MESSAGE_ACTION.to_string(),
            resource: resource_arn.as_str().to_string(),
            condition,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARN: &str = "arn:aws:sqs:us-east-1:123456789012:orders.fifo";
    const PATTERN: &str = "arn:aws:execute-api:us-east-1:*:*";

    #[test]
    fn send_policy_targets_queue_and_pattern() {
        let arn = QueueArn::new(ARN).unwrap();
        let policy = build_send_policy(&arn, PATTERN);

        assert_eq!(policy.version, POLICY_VERSION);
        assert_eq!(policy.statement.len(), 1);
        let statement = &policy.statement[0];
        assert_eq!(statement.effect, Effect::Allow);
        assert_eq!(statement.principal, "*");
        assert_eq!(statement.action, SEND_MESSAGE_ACTION);
        assert_eq!(statement.resource, ARN);
        assert_eq!(policy.source_arn_condition(), Some(PATTERN));
    }

    #[test]
    fn send_policy_is_deterministic() {
        let arn = QueueArn::new(ARN).unwrap();
        assert_eq!(
            build_send_policy(&arn, PATTERN).to_json().unwrap(),
            build_send_policy(&arn, PATTERN).to_json().unwrap()
        );
    }

    #[test]
    fn json_uses_provider_field_names() {
        let arn = QueueArn::new(ARN).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&build_send_policy(&arn, PATTERN).to_json().unwrap()).unwrap();

        assert_eq!(json["Version"], "2012-10-17");
        assert_eq!(json["Statement"][0]["Effect"], "Allow");
        assert_eq!(json["Statement"][0]["Resource"], ARN);
        assert_eq!(
            json["Statement"][0]["Condition"]["ArnEquals"]["aws:SourceArn"],
            PATTERN
        );
    }

    #[test]
    fn resource_arn_is_escaped() {
        let arn = QueueArn::new(r#"arn:aws:sqs:us-east-1:1:q"uote\"#).unwrap();
        let json = build_send_policy(&arn, PATTERN).to_json().unwrap();
        let parsed: PolicyDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.statement[0].resource, arn.as_str());
    }
}
