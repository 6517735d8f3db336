//! Cloud client implementation.

use crate::config::ClientConfig;
use crate::errors::{CloudError, CloudResult, ResponseError};
use crate::lro::LroDriver;
use crate::operations::{OperationHandle, OperationResolver};
use crate::resources::{ParamDefaults, Registry, ResourceRef};
use crate::services::OperationsService;
use crate::transport::{HttpTransport, ReqwestTransport};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

mod executor;
pub use executor::RequestExecutor;

/// Entry point: owns the transport, the collection registry and the
/// request executor, and hands out services and the LRO driver.
///
/// Cheap to share behind an `Arc`; everything inside is immutable.
pub struct CloudClient {
    config: ClientConfig,
    registry: Arc<Registry>,
    executor: Arc<RequestExecutor>,
}

impl CloudClient {
    /// Creates a client with the reqwest transport and the default registry.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use integrations_google_cloud_lro::{CloudClient, ClientConfig, StaticTokenProvider};
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ClientConfig::builder()
    ///     .auth_provider(StaticTokenProvider::new("ya29.token"))
    ///     .build()?;
    ///
    /// let client = CloudClient::new(config)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: ClientConfig) -> CloudResult<Self> {
        let transport = ReqwestTransport::from_context(&config.endpoints)
            .map_err(|e| CloudError::configuration(format!("Failed to create transport: {e}")))?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Creates a client over a caller-supplied transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> CloudResult<Self> {
        let registry = Registry::with_defaults(config.endpoints.clone())?;
        Self::with_parts(config, transport, registry)
    }

    /// Creates a client over a transport and a custom registry.
    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
        registry: Registry,
    ) -> CloudResult<Self> {
        config.endpoints.validate()?;
        config.retry.validate()?;

        let executor = Arc::new(RequestExecutor::new(
            transport,
            config.auth_provider.clone(),
            config.retry.clone(),
            config.endpoints.timeout,
        ));

        Ok(Self {
            config,
            registry: registry.into_shared(),
            executor,
        })
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Gets the collection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Gets the request executor.
    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    /// Access the operations service.
    pub fn operations(&self) -> OperationsService {
        OperationsService::new(self.executor.clone())
    }

    /// Operation resolver over this client's registry.
    pub fn resolver(&self) -> OperationResolver {
        OperationResolver::new(self.registry.clone())
    }

    /// LRO driver bound to this client.
    pub fn lro(&self) -> LroDriver {
        LroDriver::new(self.operations(), self.resolver())
    }

    /// Parses a user supplied name or URL against a registered collection.
    pub fn parse(
        &self,
        input: &str,
        collection: &str,
        defaults: &ParamDefaults,
    ) -> CloudResult<ResourceRef> {
        Ok(self.registry.parse(input, collection, defaults)?)
    }

    /// GETs a JSON resource.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> CloudResult<T> {
        self.executor.get_json(url, cancel).await
    }

    /// GETs the resource an operation acted on, via its target link.
    ///
    /// The usual `fetch` step of an LRO invocation.
    pub async fn fetch_target<T: DeserializeOwned>(
        &self,
        operation: &OperationHandle,
        cancel: &CancellationToken,
    ) -> CloudResult<T> {
        let link = operation.target_link.as_deref().ok_or_else(|| {
            ResponseError::UnexpectedFormat(format!(
                "operation [{}] has no target link",
                operation.name
            ))
        })?;
        let url = Url::parse(link).map_err(|e| {
            ResponseError::UnexpectedFormat(format!("invalid target link [{link}]: {e}"))
        })?;
        self.executor.get_json(&url, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::config::EndpointContext;
    use crate::mocks::MockHttpTransport;
    use serde_json::{json, Value};

    fn client(transport: Arc<MockHttpTransport>) -> CloudClient {
        let config = ClientConfig::builder()
            .auth_provider(StaticTokenProvider::new("tok"))
            .build()
            .unwrap();
        CloudClient::with_transport(config, transport).unwrap()
    }

    #[test]
    fn test_new_client() {
        let config = ClientConfig::builder()
            .auth_provider(StaticTokenProvider::new("tok"))
            .endpoints(
                EndpointContext::builder()
                    .universe_domain("example-cloud.com")
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        let client = CloudClient::new(config).unwrap();

        let reference = client
            .parse(
                "vm-1",
                "compute.instances",
                &ParamDefaults::new().project("p").zone("z"),
            )
            .unwrap();
        assert_eq!(
            reference.self_link(),
            "https://compute.example-cloud.com/compute/v1/projects/p/zones/z/instances/vm-1"
        );
    }

    #[test]
    fn test_parse_error_exit_code() {
        let client = client(Arc::new(MockHttpTransport::new()));
        let err = client
            .parse("vm-1", "compute.instances", &ParamDefaults::new())
            .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_fetch_target() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.enqueue_json(200, json!({"name": "vm-1", "status": "RUNNING"}));
        let client = client(transport.clone());

        let mut operation = OperationHandle::new("op-1");
        let no_target: CloudResult<Value> =
            client.fetch_target(&operation, &CancellationToken::new()).await;
        assert!(no_target.is_err());

        operation.target_link = Some(
            "https://compute.googleapis.com/compute/v1/projects/p/zones/z/instances/vm-1"
                .to_string(),
        );
        let instance: Value = client
            .fetch_target(&operation, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(instance["name"], "vm-1");
        transport.verify_request_count(1);
        transport.verify_header(0, "authorization", "Bearer tok");
    }
}
