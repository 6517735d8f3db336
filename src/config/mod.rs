//! Endpoint and client configuration.

use crate::auth::AuthProvider;
use crate::errors::{CloudError, CloudResult, ConfigurationError};
use crate::resilience::RetryConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default universe domain.
pub const DEFAULT_UNIVERSE_DOMAIN: &str = "googleapis.com";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Environment variable prefix for per-API endpoint overrides.
pub const ENDPOINT_OVERRIDE_ENV_PREFIX: &str = "CLOUDSDK_API_ENDPOINT_OVERRIDES_";

/// APIs whose REST root carries the API name as a path prefix.
const PATH_PREFIXED_APIS: &[&str] = &["compute", "storage"];

/// Connection pool configuration.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum idle connections per host.
    pub max_idle_per_host: usize,

    /// Idle timeout.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

/// Resolves base URLs, user agent, timeouts and proxy settings per API.
///
/// Stateless after construction.
#[derive(Clone, Debug)]
pub struct EndpointContext {
    /// Universe domain (`googleapis.com` outside sovereign clouds).
    pub universe_domain: String,

    /// Per-API base URL overrides, keyed by API name.
    pub overrides: HashMap<String, Url>,

    /// User agent string.
    pub user_agent: String,

    /// Per-request timeout.
    pub timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Explicit proxy URL.
    pub proxy: Option<Url>,

    /// Pool configuration.
    pub pool: PoolConfig,
}

impl EndpointContext {
    /// Creates a new builder.
    pub fn builder() -> EndpointContextBuilder {
        EndpointContextBuilder::new()
    }

    /// Builds a context from `CLOUDSDK_*` environment variables.
    pub fn from_env() -> CloudResult<Self> {
        Self::from_vars(std::env::vars())
    }

    fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> CloudResult<Self> {
        let mut builder = Self::builder();
        for (key, value) in vars {
            if let Some(api) = key.strip_prefix(ENDPOINT_OVERRIDE_ENV_PREFIX) {
                builder = builder.endpoint_override(api.to_ascii_lowercase(), value);
                continue;
            }
            match key.as_str() {
                "CLOUDSDK_CORE_UNIVERSE_DOMAIN" => builder = builder.universe_domain(value),
                "CLOUDSDK_CORE_HTTP_TIMEOUT" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        CloudError::configuration(format!(
                            "CLOUDSDK_CORE_HTTP_TIMEOUT must be a number of seconds, got [{value}]"
                        ))
                    })?;
                    builder = builder.timeout(Duration::from_secs(secs));
                }
                "CLOUDSDK_PROXY_ADDRESS" => builder = builder.proxy(value),
                _ => {}
            }
        }
        builder.build()
    }

    /// Returns the REST root for `api` at `version`, always ending in `/`.
    pub fn base_url(&self, api: &str, version: &str) -> CloudResult<Url> {
        if let Some(url) = self.overrides.get(api) {
            return Ok(url.clone());
        }

        let raw = if PATH_PREFIXED_APIS.contains(&api) {
            format!("https://{api}.{}/{api}/{version}/", self.universe_domain)
        } else {
            format!("https://{api}.{}/{version}/", self.universe_domain)
        };
        Url::parse(&raw).map_err(|e| {
            CloudError::Configuration(ConfigurationError::InvalidEndpoint {
                api: api.to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Validates the context.
    pub fn validate(&self) -> CloudResult<()> {
        for (api, url) in &self.overrides {
            let local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
            if url.scheme() != "https" && !local {
                return Err(CloudError::Configuration(ConfigurationError::InvalidEndpoint {
                    api: api.clone(),
                    message: "endpoint must use HTTPS".to_string(),
                }));
            }
            if !url.path().ends_with('/') {
                return Err(CloudError::Configuration(ConfigurationError::InvalidEndpoint {
                    api: api.clone(),
                    message: "endpoint must end with '/'".to_string(),
                }));
            }
        }

        if self.universe_domain.is_empty() {
            return Err(CloudError::configuration("Universe domain must not be empty"));
        }

        Ok(())
    }
}

impl Default for EndpointContext {
    fn default() -> Self {
        Self {
            universe_domain: DEFAULT_UNIVERSE_DOMAIN.to_string(),
            overrides: HashMap::new(),
            user_agent: default_user_agent(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            proxy: None,
            pool: PoolConfig::default(),
        }
    }
}

fn default_user_agent() -> String {
    format!("integrations-google-cloud-lro/{}", env!("CARGO_PKG_VERSION"))
}

/// Builder for [`EndpointContext`].
pub struct EndpointContextBuilder {
    universe_domain: String,
    overrides: Vec<(String, String)>,
    user_agent: Option<String>,
    timeout: Duration,
    connect_timeout: Duration,
    proxy: Option<String>,
    pool: PoolConfig,
}

impl EndpointContextBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            universe_domain: DEFAULT_UNIVERSE_DOMAIN.to_string(),
            overrides: Vec::new(),
            user_agent: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            proxy: None,
            pool: PoolConfig::default(),
        }
    }

    /// Sets the universe domain.
    pub fn universe_domain(mut self, domain: impl Into<String>) -> Self {
        self.universe_domain = domain.into();
        self
    }

    /// Overrides the REST root of one API.
    pub fn endpoint_override(mut self, api: impl Into<String>, url: impl Into<String>) -> Self {
        self.overrides.push((api.into(), url.into()));
        self
    }

    /// Sets the user agent string.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Routes all requests through a proxy.
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Sets the pool configuration.
    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Builds the context.
    pub fn build(self) -> CloudResult<EndpointContext> {
        let mut overrides = HashMap::new();
        for (api, raw) in self.overrides {
            let url = Url::parse(&raw).map_err(|e| {
                CloudError::Configuration(ConfigurationError::InvalidEndpoint {
                    api: api.clone(),
                    message: e.to_string(),
                })
            })?;
            overrides.insert(api, url);
        }

        let proxy = self
            .proxy
            .map(|p| {
                Url::parse(&p).map_err(|e| {
                    CloudError::configuration(format!("Invalid proxy address [{p}]: {e}"))
                })
            })
            .transpose()?;

        let context = EndpointContext {
            universe_domain: self.universe_domain,
            overrides,
            user_agent: self.user_agent.unwrap_or_else(default_user_agent),
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            proxy,
            pool: self.pool,
        };

        context.validate()?;

        Ok(context)
    }
}

impl Default for EndpointContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for [`CloudClient`](crate::client::CloudClient).
#[derive(Clone)]
pub struct ClientConfig {
    /// Authentication provider.
    pub auth_provider: Arc<dyn AuthProvider>,

    /// Endpoint resolution.
    pub endpoints: EndpointContext,

    /// Retry policy for individual HTTP calls.
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    auth_provider: Option<Arc<dyn AuthProvider>>,
    endpoints: Option<EndpointContext>,
    retry: Option<RetryConfig>,
}

impl ClientConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the authentication provider.
    pub fn auth_provider<A: AuthProvider + 'static>(mut self, provider: A) -> Self {
        self.auth_provider = Some(Arc::new(provider));
        self
    }

    /// Sets the authentication provider from an Arc.
    pub fn auth_provider_arc(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Sets the endpoint context.
    pub fn endpoints(mut self, endpoints: EndpointContext) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Sets the retry policy.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> CloudResult<ClientConfig> {
        let auth_provider = self.auth_provider.ok_or_else(|| {
            CloudError::Configuration(ConfigurationError::MissingCredentials(
                "Authentication provider is required".to_string(),
            ))
        })?;

        let endpoints = self.endpoints.unwrap_or_default();
        endpoints.validate()?;

        let retry = self.retry.unwrap_or_default();
        retry.validate()?;

        Ok(ClientConfig {
            auth_provider,
            endpoints,
            retry,
        })
    }
}
