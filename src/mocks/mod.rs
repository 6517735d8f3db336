//! Mock implementations for testing.
//!
//! [`MockHttpTransport`] replays canned responses in FIFO order and records
//! every request it receives; [`MockAuthProvider`] hands out predictable
//! tokens and counts how often it was asked.
//!
//! # Example
//!
//! ```
//! use integrations_google_cloud_lro::mocks::MockHttpTransport;
//! use integrations_google_cloud_lro::transport::{HttpMethod, HttpRequest, HttpTransport};
//! use reqwest::header::HeaderMap;
//!
//! # tokio_test::block_on(async {
//! let transport = MockHttpTransport::new();
//! transport.enqueue_json(200, serde_json::json!({"name": "op-1", "status": "DONE"}));
//!
//! let request = HttpRequest {
//!     method: HttpMethod::Get,
//!     url: "https://compute.googleapis.com/compute/v1/projects/p/global/operations/op-1"
//!         .parse()
//!         .unwrap(),
//!     headers: HeaderMap::new(),
//!     body: None,
//!     timeout: None,
//! };
//!
//! let response = transport.send(request).await.unwrap();
//! assert_eq!(response.status.as_u16(), 200);
//! transport.verify_request_count(1);
//! # });
//! ```

use crate::auth::{AccessToken, AuthProvider};
use crate::errors::{AuthenticationError, TransportError};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock HTTP transport for testing.
#[derive(Default)]
pub struct MockHttpTransport {
    responses: Arc<Mutex<VecDeque<Result<HttpResponse, TransportError>>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockHttpTransport {
    /// Create a new mock HTTP transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a response to be returned by the next request.
    pub fn enqueue_response(&self, response: Result<HttpResponse, TransportError>) {
        locked(&self.responses).push_back(response);
    }

    /// Enqueue a JSON response with the given status code and body.
    pub fn enqueue_json(&self, status: u16, body: Value) {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        self.enqueue_response(Ok(HttpResponse::new(
            status,
            headers,
            Bytes::from(body.to_string()),
        )));
    }

    /// Enqueue a Google style error body for `status`.
    pub fn enqueue_api_error(&self, status: u16, service_code: &str, message: &str) {
        self.enqueue_json(
            status,
            serde_json::json!({
                "error": {"code": status, "message": message, "status": service_code}
            }),
        );
    }

    /// Enqueue a transport failure.
    pub fn enqueue_error(&self, error: TransportError) {
        self.enqueue_response(Err(error));
    }

    /// Number of canned responses not yet consumed.
    pub fn pending_responses(&self) -> usize {
        locked(&self.responses).len()
    }

    /// Get all requests that were made.
    pub fn requests(&self) -> Vec<HttpRequest> {
        locked(&self.requests).clone()
    }

    /// Get the last request that was made.
    pub fn last_request(&self) -> Option<HttpRequest> {
        locked(&self.requests).last().cloned()
    }

    /// Number of requests made with `method`.
    pub fn request_count(&self, method: HttpMethod) -> usize {
        locked(&self.requests)
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// Verify that exactly `expected` requests were made.
    pub fn verify_request_count(&self, expected: usize) {
        let actual = locked(&self.requests).len();
        assert_eq!(actual, expected, "Expected {} requests, got {}", expected, actual);
    }

    /// Verify that a request was made with the expected method and URL.
    pub fn verify_request(&self, index: usize, method: HttpMethod, url_contains: &str) {
        let requests = locked(&self.requests);
        assert!(index < requests.len(), "No request at index {}", index);

        let request = &requests[index];
        assert_eq!(request.method, method, "Expected method {:?}, got {:?}", method, request.method);
        assert!(
            request.url.as_str().contains(url_contains),
            "Expected URL to contain '{}', got '{}'",
            url_contains,
            request.url
        );
    }

    /// Verify that a request carries a header value.
    pub fn verify_header(&self, index: usize, header_name: &str, header_value: &str) {
        let requests = locked(&self.requests);
        assert!(index < requests.len(), "No request at index {}", index);

        let actual = requests[index]
            .headers
            .get(header_name)
            .and_then(|v| v.to_str().ok());
        assert_eq!(
            actual,
            Some(header_value),
            "Expected header '{}' to be '{}', got {:?}",
            header_name,
            header_value,
            actual
        );
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        locked(&self.requests).push(request);
        locked(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Http("No mock response queued".to_string())))
    }
}

/// Mock authentication provider.
///
/// `get_access_token` returns `<base>-<generation>`; every refresh bumps
/// the generation.
pub struct MockAuthProvider {
    base: String,
    generation: AtomicU32,
    get_calls: AtomicU32,
    refresh_calls: AtomicU32,
    fail_refresh: bool,
}

impl MockAuthProvider {
    /// Creates a provider whose first token is `<base>-0`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            generation: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            refresh_calls: AtomicU32::new(0),
            fail_refresh: false,
        }
    }

    /// Makes every refresh fail.
    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    /// Number of `get_access_token` calls.
    pub fn get_count(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Number of `refresh_token` calls.
    pub fn refresh_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    fn current(&self) -> AccessToken {
        let generation = self.generation.load(Ordering::SeqCst);
        AccessToken::new(
            format!("{}-{}", self.base, generation),
            "Bearer",
            Utc::now() + Duration::hours(1),
            vec![],
        )
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn get_access_token(&self) -> Result<AccessToken, AuthenticationError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }

    async fn refresh_token(&self) -> Result<AccessToken, AuthenticationError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(AuthenticationError::RefreshFailed("mock refresh failure".to_string()));
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(self.current())
    }
}
