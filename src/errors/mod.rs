//! Error types for the Google Cloud operation driver.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Resource reference could not be parsed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Connection-level failure after retries were exhausted.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Server-reported failure.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Long-running operation failure.
    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    /// Response error.
    #[error("Response error: {0}")]
    Response(#[from] ResponseError),
}

impl CloudError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        CloudError::Configuration(ConfigurationError::InvalidConfiguration(msg.into()))
    }

    /// Creates a deserialization error.
    pub fn deserialization(msg: impl Into<String>) -> Self {
        CloudError::Response(ResponseError::DeserializationError(msg.into()))
    }

    /// Creates a cancellation error, optionally naming the operation.
    pub fn cancelled(operation: Option<String>) -> Self {
        CloudError::Operation(OperationError::Cancelled { operation })
    }

    /// Returns true if the error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Transport(TransportError::Network(_))
            | CloudError::Transport(TransportError::Timeout(_)) => true,
            CloudError::Api(api) => api.is_transient(),
            _ => false,
        }
    }

    /// Returns true for an API error with HTTP status 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::Api(api) if api.http_status == StatusCode::NOT_FOUND.as_u16())
    }

    /// Returns true if the error is a cancellation, at any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            CloudError::Transport(TransportError::Cancelled)
                | CloudError::Operation(OperationError::Cancelled { .. })
        )
    }

    /// Returns the retry delay hint if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CloudError::Api(api) => api.retry_after,
            _ => None,
        }
    }

    /// Returns the HTTP status code if applicable.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            CloudError::Api(api) => StatusCode::from_u16(api.http_status).ok(),
            CloudError::Authentication(_) => Some(StatusCode::UNAUTHORIZED),
            _ => None,
        }
    }

    /// Returns the relative name of the operation the error belongs to.
    pub fn operation_name(&self) -> Option<&str> {
        match self {
            CloudError::Operation(err) => err.operation_name(),
            _ => None,
        }
    }

    /// Process exit code for a command that failed with this error.
    ///
    /// Reference parse errors come from user input and map to the usage
    /// exit code 2; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            CloudError::Parse(_) => 2,
            _ => 1,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Missing credentials.
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid endpoint URL.
    #[error("Invalid endpoint for {api}: {message}")]
    InvalidEndpoint {
        /// API name.
        api: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// Invalid token.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Refresh failed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Credentials rejected after a refresh.
    #[error("Credentials rejected: {0}")]
    Rejected(String),
}

/// Resource reference parse errors. Raised before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Input is neither a name, a relative name nor a usable URL.
    #[error("Invalid resource URL or name [{0}]")]
    InvalidUrl(String),

    /// Input names a resource of another collection.
    #[error("Wrong collection: expected [{expected}], got [{input}]")]
    WrongCollection {
        /// Collection that was asked for.
        expected: String,
        /// Offending input.
        input: String,
    },

    /// URL carries an API version other than the collection's.
    #[error("Wrong API version: expected [{expected}], got [{found}]")]
    WrongVersion {
        /// Collection version.
        expected: String,
        /// Version segment found in the URL.
        found: String,
    },

    /// A path parameter is bound neither by the input nor by the defaults.
    #[error("Missing required parameter [{0}]")]
    MissingParameter(String),
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The cancellation token fired between attempts.
    #[error("Request cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

/// Server-reported failure.
#[derive(Debug, Clone, Error)]
#[error("HTTP {http_status} [{service_code}]: {message}")]
pub struct ApiError {
    /// HTTP status code.
    pub http_status: u16,
    /// Service error code (`NOT_FOUND`, `quotaExceeded`, ...).
    pub service_code: String,
    /// Human readable message.
    pub message: String,
    /// Raw detail entries.
    pub details: Vec<String>,
    /// Server `Retry-After` hint.
    pub retry_after: Option<Duration>,
}

impl ApiError {
    /// HTTP statuses retried by the executor.
    pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

    /// Creates an API error without details.
    pub fn new(http_status: u16, service_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            http_status,
            service_code: service_code.into(),
            message: message.into(),
            details: Vec::new(),
            retry_after: None,
        }
    }

    /// Returns true for the transient set of statuses.
    pub fn is_transient(&self) -> bool {
        Self::TRANSIENT_STATUSES.contains(&self.http_status)
    }
}

/// Long-running operation errors.
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// Operation reached DONE with an error payload.
    #[error("Operation [{operation}] failed: [{service_code}] {message}")]
    Failed {
        /// Operation relative name.
        operation: String,
        /// Service error code.
        service_code: String,
        /// Error message.
        message: String,
        /// Error details, rendered verbatim.
        details: Vec<String>,
    },

    /// Max total wait exceeded.
    #[error("Operation [{operation}] did not complete within {waited:?}")]
    Timeout {
        /// Operation relative name.
        operation: String,
        /// Time spent waiting.
        waited: Duration,
    },

    /// Cancellation token fired.
    #[error("Operation{} cancelled", .operation.as_ref().map(|o| format!(" [{o}]")).unwrap_or_default())]
    Cancelled {
        /// Operation relative name, when one exists yet.
        operation: Option<String>,
    },

    /// Operation disappeared from its polling collection.
    #[error("Operation [{operation}] not found after {attempts} attempts")]
    Lost {
        /// Operation relative name.
        operation: String,
        /// Consecutive not-found polls.
        attempts: u32,
    },

    /// Resolver could not classify the operation's scope.
    #[error("Unsupported operation shape: {0}")]
    UnsupportedShape(String),
}

impl OperationError {
    /// Returns the operation name carried by the error, if any.
    pub fn operation_name(&self) -> Option<&str> {
        match self {
            OperationError::Failed { operation, .. }
            | OperationError::Timeout { operation, .. }
            | OperationError::Lost { operation, .. } => Some(operation),
            OperationError::Cancelled { operation } => operation.as_deref(),
            OperationError::UnsupportedShape(_) => None,
        }
    }
}

/// Response errors.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Unexpected format.
    #[error("Unexpected response format: {0}")]
    UnexpectedFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        let error = CloudError::Api(ApiError::new(503, "UNAVAILABLE", "try later"));
        assert!(error.is_retryable());

        let error = CloudError::Transport(TransportError::Timeout("slow".to_string()));
        assert!(error.is_retryable());

        let error = CloudError::Api(ApiError::new(404, "NOT_FOUND", "gone"));
        assert!(!error.is_retryable());
        assert!(error.is_not_found());

        let error = CloudError::Transport(TransportError::Cancelled);
        assert!(!error.is_retryable());
        assert!(error.is_cancelled());
    }

    #[test]
    fn test_exit_codes() {
        let error = CloudError::Parse(ParseError::MissingParameter("zone".to_string()));
        assert_eq!(error.exit_code(), 2);

        let error = CloudError::Operation(OperationError::Timeout {
            operation: "op-1".to_string(),
            waited: Duration::from_secs(5),
        });
        assert_eq!(error.exit_code(), 1);
        assert_eq!(error.operation_name(), Some("op-1"));

        let error = CloudError::Api(ApiError::new(403, "PERMISSION_DENIED", "no"));
        assert_eq!(error.exit_code(), 1);
        assert_eq!(error.status_code(), Some(StatusCode::FORBIDDEN));

        let error = CloudError::configuration("poll jitter must be in [0, 1)");
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_cancelled_display() {
        let error = OperationError::Cancelled { operation: None };
        assert_eq!(error.to_string(), "Operation cancelled");

        let error = OperationError::Cancelled {
            operation: Some("op-9".to_string()),
        };
        assert_eq!(error.to_string(), "Operation [op-9] cancelled");
    }
}
