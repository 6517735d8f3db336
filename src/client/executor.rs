//! Request executor with auth, retry and error mapping.

use crate::auth::{AuthManager, AuthProvider};
use crate::errors::{
    ApiError, AuthenticationError, CloudError, CloudResult, ConfigurationError, ResponseError,
};
use crate::operations::canonical_code_name;
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Performs one authenticated request-response, with retry on transient faults.
///
/// This is the component that:
/// - attaches the bearer token and refreshes it once on 401
/// - retries connection errors and 429/500/502/503/504 with full jitter
/// - maps every other non-2xx response to a typed [`ApiError`]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    auth: AuthManager,
    retry: RetryExecutor,
    timeout: Duration,
}

impl RequestExecutor {
    /// Creates a new request executor.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn AuthProvider>,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            auth: AuthManager::new(auth),
            retry: RetryExecutor::new(retry),
            timeout,
        }
    }

    /// Executes a request and returns the raw response of the first
    /// successful attempt.
    pub async fn execute(
        &self,
        method: HttpMethod,
        url: &Url,
        body: Option<Bytes>,
        cancel: &CancellationToken,
    ) -> CloudResult<HttpResponse> {
        self.retry
            .execute(cancel, || {
                let url = url.clone();
                let body = body.clone();
                async move { self.attempt(method, url, body).await }
            })
            .await
    }

    /// GETs `url` and deserializes the JSON response.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> CloudResult<T> {
        let response = self.execute(HttpMethod::Get, url, None, cancel).await?;
        decode_json(&response.body)
    }

    /// POSTs a JSON body to `url` and deserializes the JSON response.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &Url,
        body: &B,
        cancel: &CancellationToken,
    ) -> CloudResult<T> {
        let body = serde_json::to_vec(body)
            .map_err(|e| CloudError::configuration(format!("Failed to serialize body: {e}")))?;
        let response = self
            .execute(HttpMethod::Post, url, Some(Bytes::from(body)), cancel)
            .await?;
        decode_json(&response.body)
    }

    async fn attempt(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<Bytes>,
    ) -> CloudResult<HttpResponse> {
        let authorization = self.auth.get_authorization_header().await?;
        let request = self.build_request(method, url, body, &authorization)?;

        tracing::debug!(method = ?request.method, url = %request.url, "sending request");
        let response = self.transport.send(request.clone()).await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return check_status(response);
        }

        tracing::debug!(url = %request.url, "401 received, refreshing credentials");
        let authorization = self.auth.refresh_authorization_header().await?;
        let retried = self.build_request(request.method, request.url, request.body, &authorization)?;
        let response = self.transport.send(retried).await?;

        if response.status == StatusCode::UNAUTHORIZED {
            let error = map_error_response(&response);
            return Err(AuthenticationError::Rejected(error.message).into());
        }
        check_status(response)
    }

    fn build_request(
        &self,
        method: HttpMethod,
        url: Url,
        body: Option<Bytes>,
        authorization: &str,
    ) -> CloudResult<HttpRequest> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(authorization).map_err(|e| {
                CloudError::Authentication(AuthenticationError::InvalidToken(format!(
                    "Invalid auth header: {e}"
                )))
            })?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if url.cannot_be_a_base() {
            return Err(ConfigurationError::InvalidConfiguration(format!(
                "Invalid request URL [{url}]"
            ))
            .into());
        }

        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
            timeout: Some(self.timeout),
        })
    }
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> CloudResult<T> {
    let result = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(Value::Object(Default::default()))
    } else {
        serde_json::from_slice(body)
    };
    result.map_err(|e| {
        CloudError::Response(ResponseError::DeserializationError(format!(
            "Failed to deserialize response: {e}"
        )))
    })
}

fn check_status(response: HttpResponse) -> CloudResult<HttpResponse> {
    if response.status.is_success() {
        Ok(response)
    } else {
        Err(map_error_response(&response).into())
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorItem>,
    #[serde(default)]
    details: Vec<Value>,
}

#[derive(Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Service code implied by an HTTP status when the body names none.
fn status_code_name(status: StatusCode) -> &'static str {
    let code = match status.as_u16() {
        400 => 3,
        401 => 16,
        403 => 7,
        404 => 5,
        409 => 6,
        412 => 9,
        429 => 8,
        499 => 1,
        501 => 12,
        503 => 14,
        504 => 4,
        500..=599 => 13,
        _ => 2,
    };
    canonical_code_name(code)
}

/// Parses a `Retry-After` header, in seconds or as an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

/// Maps an error response onto [`ApiError`].
pub(crate) fn map_error_response(response: &HttpResponse) -> ApiError {
    let status = response.status;
    let envelope: Option<ErrorEnvelope> = serde_json::from_slice(&response.body).ok();

    let mut error = match envelope {
        Some(ErrorEnvelope { error }) => {
            let service_code = error
                .status
                .clone()
                .or_else(|| error.errors.first().and_then(|e| e.reason.clone()))
                .unwrap_or_else(|| status_code_name(status).to_string());
            let message = error
                .message
                .clone()
                .or_else(|| error.errors.first().and_then(|e| e.message.clone()))
                .unwrap_or_else(|| status.to_string());

            let mut details: Vec<String> = error
                .errors
                .iter()
                .filter_map(|e| match (&e.reason, &e.message) {
                    (Some(reason), Some(message)) => Some(format!("{reason}: {message}")),
                    (Some(reason), None) => Some(reason.clone()),
                    _ => None,
                })
                .collect();
            details.extend(error.details.iter().map(|d| match d {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }));

            let mut api = ApiError::new(status.as_u16(), service_code, message);
            api.details = details;
            api
        }
        None => ApiError::new(
            status.as_u16(),
            status_code_name(status),
            format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&response.body).trim()
            ),
        ),
    };

    error.retry_after = parse_retry_after(&response.headers);
    error
}
