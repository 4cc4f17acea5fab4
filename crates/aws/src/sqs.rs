//! [`QueueService`] over Amazon SQS.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use provisioning::{ProviderResult, QueueAttribute, QueueName, QueueService, QueueUrl};
use tracing::debug;

use crate::error::{from_sdk, missing_field};

pub struct SqsQueues {
    client: Client,
}

impl SqsQueues {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_sdk_name(attribute: QueueAttribute) -> QueueAttributeName {
    match attribute {
        QueueAttribute::FifoQueue => QueueAttributeName::FifoQueue,
        QueueAttribute::ContentBasedDeduplication => QueueAttributeName::ContentBasedDeduplication,
        QueueAttribute::QueueArn => QueueAttributeName::QueueArn,
        QueueAttribute::Policy => QueueAttributeName::Policy,
    }
}

fn from_sdk_name(name: &QueueAttributeName) -> Option<QueueAttribute> {
    match name {
        QueueAttributeName::FifoQueue => Some(QueueAttribute::FifoQueue),
        QueueAttributeName::ContentBasedDeduplication => {
            Some(QueueAttribute::ContentBasedDeduplication)
        }
        QueueAttributeName::QueueArn => Some(QueueAttribute::QueueArn),
        QueueAttributeName::Policy => Some(QueueAttribute::Policy),
        _ => None,
    }
}

fn to_sdk_attributes(
    attributes: &BTreeMap<QueueAttribute, String>,
) -> HashMap<QueueAttributeName, String> {
    attributes
        .iter()
        .map(|(name, value)| (to_sdk_name(*name), value.clone()))
        .collect()
}

fn to_queue_url(operation: &str, url: Option<&str>) -> ProviderResult<QueueUrl> {
    url.and_then(QueueUrl::new)
        .ok_or_else(|| missing_field(operation, "a queue URL"))
}

#[async_trait]
impl QueueService for SqsQueues {
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<QueueUrl> {
        debug!(queue = %name, "sqs:CreateQueue");
        let output = self
            .client
            .create_queue()
            .queue_name(name.as_str())
            .set_attributes(Some(to_sdk_attributes(attributes)))
            .send()
            .await
            .map_err(|e| from_sdk("create_queue", e))?;
        to_queue_url("create_queue", output.queue_url())
    }

    async fn queue_url(&self, name: &QueueName) -> ProviderResult<QueueUrl> {
        debug!(queue = %name, "sqs:GetQueueUrl");
        let output = self
            .client
            .get_queue_url()
            .queue_name(name.as_str())
            .send()
            .await
            .map_err(|e| from_sdk("get_queue_url", e))?;
        to_queue_url("get_queue_url", output.queue_url())
    }

    async fn get_attributes(
        &self,
        url: &QueueUrl,
        names: &[QueueAttribute],
    ) -> ProviderResult<BTreeMap<QueueAttribute, String>> {
        debug!(queue_url = %url, ?names, "sqs:GetQueueAttributes");
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(url.as_str())
            .set_attribute_names(Some(names.iter().copied().map(to_sdk_name).collect()))
            .send()
            .await
            .map_err(|e| from_sdk("get_queue_attributes", e))?;

        Ok(output
            .attributes()
            .into_iter()
            .flatten()
            .filter_map(|(name, value)| from_sdk_name(name).map(|name| (name, value.clone())))
            .collect())
    }

    async fn set_attributes(
        &self,
        url: &QueueUrl,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<()> {
        debug!(queue_url = %url, "sqs:SetQueueAttributes");
        self.client
            .set_queue_attributes()
            .queue_url(url.as_str())
            .set_attributes(Some(to_sdk_attributes(attributes)))
            .send()
            .await
            .map_err(|e| from_sdk("set_queue_attributes", e))?;
        Ok(())
    }

    async fn tag_queue(
        &self,
        url: &QueueUrl,
        tags: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        debug!(queue_url = %url, tags = tags.len(), "sqs:TagQueue");
        self.client
            .tag_queue()
            .queue_url(url.as_str())
            .set_tags(Some(
                tags.iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ))
            .send()
            .await
            .map_err(|e| from_sdk("tag_queue", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_names_map_both_ways() {
        for attribute in [
            QueueAttribute::FifoQueue,
            QueueAttribute::ContentBasedDeduplication,
            QueueAttribute::QueueArn,
            QueueAttribute::Policy,
        ] {
            assert_eq!(from_sdk_name(&to_sdk_name(attribute)), Some(attribute));
        }
    }

    #[test]
    fn attributes_the_workflow_never_reads_are_dropped() {
        assert_eq!(from_sdk_name(&QueueAttributeName::VisibilityTimeout), None);
    }

    #[test]
    fn empty_queue_url_is_rejected() {
        assert!(to_queue_url("create_queue", Some("")).is_err());
        assert!(to_queue_url("create_queue", None).is_err());
    }
}
