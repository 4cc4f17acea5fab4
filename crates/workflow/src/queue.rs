//! Ordered queue provisioning.

use std::collections::BTreeMap;
use std::sync::Arc;

use provisioning::{
    PolicyDocument, ProviderError, ProviderResult, QueueArn, QueueAttribute, QueueName,
    QueueResource, QueueService, QueueUrl, RetrySettings,
};
use tracing::{debug, info, warn};

use crate::retry::with_backoff;

/// Creates, looks up, secures, and tags strictly-ordered queues.
pub struct QueueProvisioner {
    service: Arc<dyn QueueService>,
    retry: RetrySettings,
    content_based_deduplication: bool,
}

impl QueueProvisioner {
    pub fn new(
        service: Arc<dyn QueueService>,
        retry: RetrySettings,
        content_based_deduplication: bool,
    ) -> Self {
        Self {
            service,
            retry,
            content_based_deduplication,
        }
    }

    fn creation_attributes(&self) -> BTreeMap<QueueAttribute, String> {
        let mut attributes =
            BTreeMap::from([(QueueAttribute::FifoQueue, "true".to_string())]);
        if self.content_based_deduplication {
            attributes.insert(QueueAttribute::ContentBasedDeduplication, "true".to_string());
        }
        attributes
    }

    /// Creates the ordered queue `name`, or returns the existing one.
    ///
    /// The provider returns an existing queue's URL for an identical create.
    /// When it instead reports a conflict, the existing queue is looked up by
    /// name and accepted only if its ordering and deduplication settings match
    /// the requested ones. The ARN is left unset.
    pub async fn create_ordered_queue(&self, name: &QueueName) -> ProviderResult<QueueResource> {
        let service = self.service.as_ref();
        let attributes = self.creation_attributes();
        let attributes = &attributes;

        let created = with_backoff(&self.retry, "create_queue", move || {
            service.create_queue(name, attributes)
        })
        .await;

        let url = match created {
            Ok(url) => url,
            Err(ProviderError::ResourceConflict { message }) => {
                info!(queue = %name, %message, "Queue already exists; looking it up");
                let url =
                    with_backoff(&self.retry, "queue_url", move || service.queue_url(name)).await?;
                self.ensure_compatible(name, &url).await?;
                url
            }
            Err(err) => return Err(err),
        };

        info!(queue = %name, queue_url = %url, "Ordered queue ready");
        Ok(QueueResource {
            name: name.clone(),
            url,
            arn: None,
            ordered: true,
        })
    }

    /// Fails with [`ProviderError::ResourceConflict`] if the existing queue at
    /// `url` is configured differently from what this provisioner creates.
    async fn ensure_compatible(&self, name: &QueueName, url: &QueueUrl) -> ProviderResult<()> {
        let service = self.service.as_ref();
        let names = [QueueAttribute::FifoQueue, QueueAttribute::ContentBasedDeduplication];
        let names = &names[..];

        let existing = with_backoff(&self.retry, "get_queue_attributes", move || {
            service.get_attributes(url, names)
        })
        .await?;

        let wanted = self.creation_attributes();
        // The provider omits or reports "false" for disabled flags.
        let flag = |attributes: &BTreeMap<QueueAttribute, String>, attribute: QueueAttribute| {
            attributes
                .get(&attribute)
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        };
        let mismatched: Vec<String> = names
            .iter()
            .filter(|attribute| flag(&existing, **attribute) != flag(&wanted, **attribute))
            .map(|attribute| format!("{attribute:?}"))
            .collect();

        if mismatched.is_empty() {
            debug!(queue = %name, "Existing queue configuration is compatible");
            return Ok(());
        }
        warn!(queue = %name, ?mismatched, "Existing queue configuration differs");
        Err(ProviderError::conflict(format!(
            "queue '{name}' already exists with different {}",
            mismatched.join(", ")
        )))
    }

    /// Reads the queue's ARN.
    ///
    /// Retries while the provider reports the queue as not yet queryable.
    /// Fails with [`ProviderError::ResourceNotFound`] for an unknown URL.
    pub async fn fetch_arn(&self, url: &QueueUrl) -> ProviderResult<QueueArn> {
        let service = self.service.as_ref();
        let names = [QueueAttribute::QueueArn];
        let names = &names[..];

        let attributes = with_backoff(&self.retry, "get_queue_attributes", move || {
            service.get_attributes(url, names)
        })
        .await?;

        let arn = attributes
            .get(&QueueAttribute::QueueArn)
            .and_then(|value| QueueArn::new(value.clone()))
            .ok_or_else(|| {
                ProviderError::not_found(format!("queue '{url}' reported no QueueArn attribute"))
            })?;
        debug!(queue_url = %url, queue_arn = %arn, "Queue ARN fetched");
        Ok(arn)
    }

    /// Sets the queue's access policy, replacing any previous one.
    pub async fn apply_policy(&self, url: &QueueUrl, policy: &PolicyDocument) -> ProviderResult<()> {
        let service = self.service.as_ref();
        let attributes = BTreeMap::from([(QueueAttribute::Policy, policy.to_json()?)]);
        let attributes = &attributes;

        with_backoff(&self.retry, "set_queue_attributes", move || {
            service.set_attributes(url, attributes)
        })
        .await?;
        debug!(queue_url = %url, "Queue policy applied");
        Ok(())
    }

    /// Attaches metadata tags. Tags already present with the same value are
    /// left as they are.
    pub async fn tag(&self, url: &QueueUrl, tags: &BTreeMap<String, String>) -> ProviderResult<()> {
        if tags.is_empty() {
            return Ok(());
        }
        let service = self.service.as_ref();
        with_backoff(&self.retry, "tag_queue", move || service.tag_queue(url, tags)).await?;
        debug!(queue_url = %url, tag_count = tags.len(), "Queue tagged");
        Ok(())
    }
}
