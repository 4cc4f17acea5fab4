//! [`ApiService`] over Amazon API Gateway REST APIs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_apigateway::types::IntegrationType as SdkIntegrationType;
use aws_sdk_apigateway::Client;
use provisioning::{
    ApiId, ApiName, ApiService, CreatedApi, IntegrationSpec, IntegrationType, MethodTarget,
    ProviderResult, ResourceId,
};
use tracing::debug;

use crate::error::{from_sdk, missing_field};

pub struct ApiGatewayApis {
    client: Client,
}

impl ApiGatewayApis {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_sdk_type(integration_type: IntegrationType) -> SdkIntegrationType {
    match integration_type {
        IntegrationType::Aws => SdkIntegrationType::Aws,
    }
}

#[async_trait]
impl ApiService for ApiGatewayApis {
    async fn create_api(&self, name: &ApiName) -> ProviderResult<CreatedApi> {
        debug!(api_name = %name, "apigateway:CreateRestApi");
        let output = self
            .client
            .create_rest_api()
            .name(name.as_str())
            .send()
            .await
            .map_err(|e| from_sdk("create_rest_api", e))?;

        let id = output
            .id()
            .and_then(ApiId::new)
            .ok_or_else(|| missing_field("create_rest_api", "an API id"))?;
        let root_resource_id = output
            .root_resource_id()
            .and_then(ResourceId::new)
            .ok_or_else(|| missing_field("create_rest_api", "a root resource id"))?;
        Ok(CreatedApi {
            id,
            root_resource_id,
        })
    }

    async fn put_method(&self, target: &MethodTarget, authorization: &str) -> ProviderResult<()> {
        debug!(api_id = %target.api_id, method = %target.http_method, "apigateway:PutMethod");
        self.client
            .put_method()
            .rest_api_id(target.api_id.as_str())
            .resource_id(target.resource_id.as_str())
            .http_method(&target.http_method)
            .authorization_type(authorization)
            .send()
            .await
            .map_err(|e| from_sdk("put_method", e))?;
        Ok(())
    }

    async fn put_integration(
        &self,
        target: &MethodTarget,
        integration: &IntegrationSpec,
    ) -> ProviderResult<()> {
        debug!(api_id = %target.api_id, uri = %integration.uri, "apigateway:PutIntegration");
        self.client
            .put_integration()
            .rest_api_id(target.api_id.as_str())
            .resource_id(target.resource_id.as_str())
            .http_method(&target.http_method)
            .r#type(to_sdk_type(integration.integration_type))
            .integration_http_method(&integration.backend_method)
            .uri(&integration.uri)
            .set_credentials(integration.credentials.clone())
            .send()
            .await
            .map_err(|e| from_sdk("put_integration", e))?;
        Ok(())
    }

    async fn put_method_response(
        &self,
        target: &MethodTarget,
        status_code: &str,
    ) -> ProviderResult<()> {
        debug!(api_id = %target.api_id, status_code, "apigateway:PutMethodResponse");
        self.client
            .put_method_response()
            .rest_api_id(target.api_id.as_str())
            .resource_id(target.resource_id.as_str())
            .http_method(&target.http_method)
            .status_code(status_code)
            .send()
            .await
            .map_err(|e| from_sdk("put_method_response", e))?;
        Ok(())
    }

    async fn put_integration_response(
        &self,
        target: &MethodTarget,
        status_code: &str,
        response_parameters: &BTreeMap<String, String>,
    ) -> ProviderResult<()> {
        debug!(api_id = %target.api_id, status_code, "apigateway:PutIntegrationResponse");
        let parameters = (!response_parameters.is_empty()).then(|| {
            response_parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });
        self.client
            .put_integration_response()
            .rest_api_id(target.api_id.as_str())
            .resource_id(target.resource_id.as_str())
            .http_method(&target.http_method)
            .status_code(status_code)
            .set_response_parameters(parameters)
            .send()
            .await
            .map_err(|e| from_sdk("put_integration_response", e))?;
        Ok(())
    }
}
