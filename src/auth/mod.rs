//! Credential providers.
//!
//! The driver never looks inside a token. It only needs something that can
//! hand out a bearer token and refresh it on demand. Token acquisition
//! (OAuth flows, metadata server, service account JWTs) lives outside this
//! crate; [`RefreshingTokenProvider`] adapts any async fetch function into a
//! cached, single-flight provider.
//!
//! # Example
//!
//! ```no_run
//! use integrations_google_cloud_lro::auth::{AccessToken, AuthProvider, RefreshingTokenProvider};
//! use chrono::{Duration, Utc};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = RefreshingTokenProvider::new(|| async {
//!     Ok(AccessToken::new("ya29.token", "Bearer", Utc::now() + Duration::hours(1), vec![]))
//! });
//!
//! let token = provider.get_access_token().await?;
//! # Ok(())
//! # }
//! ```

use crate::errors::AuthenticationError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Token expiry buffer (5 minutes) - refresh tokens proactively before expiry.
pub const TOKEN_EXPIRY_BUFFER_SECONDS: i64 = 300;

/// OAuth 2.0 scopes used by the cloud APIs.
pub mod scopes {
    /// Full access to Google Cloud resources.
    pub const CLOUD_PLATFORM: &str = "https://www.googleapis.com/auth/cloud-platform";

    /// Read-only access to Google Cloud resources.
    pub const CLOUD_PLATFORM_READ_ONLY: &str =
        "https://www.googleapis.com/auth/cloud-platform.read-only";

    /// Compute Engine read/write.
    pub const COMPUTE: &str = "https://www.googleapis.com/auth/compute";
}

/// Authentication provider abstraction.
///
/// Implementations must be safe to call concurrently.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Get an access token for API requests.
    async fn get_access_token(&self) -> Result<AccessToken, AuthenticationError>;

    /// Force refresh the access token.
    async fn refresh_token(&self) -> Result<AccessToken, AuthenticationError>;
}

/// Access token with metadata.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The token string.
    pub token: SecretString,

    /// Token type (usually "Bearer").
    pub token_type: String,

    /// Expiration time.
    pub expires_at: DateTime<Utc>,

    /// Scopes granted.
    pub scopes: Vec<String>,
}

impl AccessToken {
    /// Creates a new access token.
    pub fn new(
        token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: DateTime<Utc>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            token: SecretString::new(token.into()),
            token_type: token_type.into(),
            expires_at,
            scopes,
        }
    }

    /// Checks if the token is expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Checks if the token needs proactive refresh (within 5 minutes of expiry).
    pub fn needs_refresh(&self) -> bool {
        let threshold = self.expires_at - Duration::seconds(TOKEN_EXPIRY_BUFFER_SECONDS);
        Utc::now() >= threshold
    }

    /// Returns the authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.token.expose_secret())
    }
}

/// Provider for a token obtained elsewhere (`gcloud auth print-access-token`,
/// a test fixture, ...). Refreshing returns the same token.
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    /// Creates a provider for a bearer token valid for one hour.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token, "Bearer", Utc::now() + Duration::hours(1), vec![]),
        }
    }

    /// Creates a provider from a complete access token.
    pub fn from_token(token: AccessToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_access_token(&self) -> Result<AccessToken, AuthenticationError> {
        Ok(self.token.clone())
    }

    async fn refresh_token(&self) -> Result<AccessToken, AuthenticationError> {
        Ok(self.token.clone())
    }
}

type FetchToken =
    dyn Fn() -> BoxFuture<'static, Result<AccessToken, AuthenticationError>> + Send + Sync;

/// Caching provider around an async token fetch function.
///
/// # Thread Safety
///
/// Refreshes are single-flight: the refresh lock is held across the fetch,
/// and callers that queued behind it re-check the cache before fetching
/// again, so a burst of concurrent expiries triggers exactly one fetch.
///
/// # Proactive Refresh
///
/// Tokens are refreshed 5 minutes before expiry.
pub struct RefreshingTokenProvider {
    fetch: Arc<FetchToken>,
    cached_token: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
}

impl RefreshingTokenProvider {
    /// Creates a provider that calls `fetch` whenever a new token is needed.
    pub fn new<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AccessToken, AuthenticationError>> + Send + 'static,
    {
        Self {
            fetch: Arc::new(move || fetch().boxed()),
            cached_token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    async fn cached_valid(&self) -> Option<AccessToken> {
        let cached = self.cached_token.read().await;
        cached.as_ref().filter(|t| !t.needs_refresh()).cloned()
    }

    async fn fetch_and_store(&self) -> Result<AccessToken, AuthenticationError> {
        let token = (self.fetch)().await?;
        *self.cached_token.write().await = Some(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl AuthProvider for RefreshingTokenProvider {
    async fn get_access_token(&self) -> Result<AccessToken, AuthenticationError> {
        if let Some(token) = self.cached_valid().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.cached_valid().await {
            return Ok(token);
        }
        self.fetch_and_store().await
    }

    async fn refresh_token(&self) -> Result<AccessToken, AuthenticationError> {
        let stale = self
            .cached_token
            .read()
            .await
            .as_ref()
            .map(|t| t.token.expose_secret().clone());

        let _guard = self.refresh_lock.lock().await;
        let current = self.cached_token.read().await.clone();
        if let Some(current) = current {
            // Someone already replaced the token we were about to discard.
            if stale.as_deref() != Some(current.token.expose_secret().as_str())
                && !current.needs_refresh()
            {
                return Ok(current);
            }
        }
        self.fetch_and_store().await
    }
}

/// Authentication manager for handling auth operations.
///
/// Wraps an [`AuthProvider`] and hands out ready-to-use header values.
pub struct AuthManager {
    provider: Arc<dyn AuthProvider>,
}

impl AuthManager {
    /// Creates a new authentication manager.
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self { provider }
    }

    /// Gets the authorization header value.
    pub async fn get_authorization_header(&self) -> Result<String, AuthenticationError> {
        let token = self.provider.get_access_token().await?;
        Ok(token.authorization_header())
    }

    /// Forces a token refresh and returns the new header value.
    pub async fn refresh_authorization_header(&self) -> Result<String, AuthenticationError> {
        let token = self.provider.refresh_token().await?;
        Ok(token.authorization_header())
    }
}
