//! Provider port traits.
//!
//! These are the only way the workflow reaches an external control plane.
//! Infrastructure crates implement them over a cloud SDK; tests implement them
//! in memory. Every method maps one-to-one onto a provider call and reports
//! failures through the [`ProviderError`] taxonomy.
//!
//! ## Put semantics
//!
//! All `set_*`/`put_*`/`tag_*` methods overwrite: issuing one twice with the same
//! arguments leaves the provider in the same state as issuing it once.
//! [`ApiService::create_api`] is the exception: the provider never deduplicates
//! API names, so every call creates a distinct API.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{
    ApiName, CreatedApi, FunctionRef, IntegrationSpec, MethodTarget, PermissionGrant,
    ProviderError, QueueAttribute, QueueName, QueueUrl, StatementId,
};

/// Result alias for port calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Queue control plane.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Creates a queue with the given attributes.
    ///
    /// If a queue with this name and identical attributes exists, returns its
    /// URL. If one exists with different attributes, fails with
    /// [`ProviderError::ResourceConflict`].
    async fn create_queue(
        &self,
        name: &QueueName,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<QueueUrl>;

    /// Looks up the URL of an existing queue by name.
    async fn queue_url(&self, name: &QueueName) -> ProviderResult<QueueUrl>;

    /// Reads the named attributes. Fails with
    /// [`ProviderError::ResourceNotFound`] for an unknown URL.
    async fn get_attributes(
        &self,
        url: &QueueUrl,
        names: &[QueueAttribute],
    ) -> ProviderResult<BTreeMap<QueueAttribute, String>>;

    /// Sets attributes, overwriting existing values.
    async fn set_attributes(
        &self,
        url: &QueueUrl,
        attributes: &BTreeMap<QueueAttribute, String>,
    ) -> ProviderResult<()>;

    /// Adds tags. Re-tagging with an identical value is a no-op.
    async fn tag_queue(&self, url: &QueueUrl, tags: &BTreeMap<String, String>)
        -> ProviderResult<()>;
}

/// API control plane.
#[async_trait]
pub trait ApiService: Send + Sync {
    /// Creates a new API. Never deduplicates by name.
    async fn create_api(&self, name: &ApiName) -> ProviderResult<CreatedApi>;

    /// Declares a method on a resource.
    async fn put_method(&self, target: &MethodTarget, authorization: &str) -> ProviderResult<()>;

    /// Binds a method to a backend.
    async fn put_integration(
        &self,
        target: &MethodTarget,
        integration: &IntegrationSpec,
    ) -> ProviderResult<()>;

    /// Declares a method response for `status_code`.
    async fn put_method_response(
        &self,
        target: &MethodTarget,
        status_code: &str,
    ) -> ProviderResult<()>;

    /// Declares how backend responses map to the method response.
    async fn put_integration_response(
        &self,
        target: &MethodTarget,
        status_code: &str,
        response_parameters: &BTreeMap<String, String>,
    ) -> ProviderResult<()>;
}

/// Compute-permission control plane.
#[async_trait]
pub trait PermissionService: Send + Sync {
    /// Adds a statement to a function's resource policy.
    ///
    /// Fails with [`ProviderError::ResourceConflict`] if the statement id is
    /// already in use on that function, whatever its parameters.
    async fn add_permission(&self, grant: &PermissionGrant) -> ProviderResult<()>;

    /// Reads back one statement from a function's resource policy.
    async fn get_statement(
        &self,
        function_ref: &FunctionRef,
        statement_id: &StatementId,
    ) -> ProviderResult<Option<PermissionGrant>>;
}
