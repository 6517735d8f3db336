//! JSON decoding of operation resources.

use crate::errors::{CloudResult, ResponseError};
use crate::operations::{
    OperationErrorInfo, OperationHandle, OperationStatus, OperationWarning,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOperation {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    self_link: Option<String>,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    global: bool,
    #[serde(default)]
    target_link: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
    #[serde(default)]
    warnings: Vec<WireWarning>,
    #[serde(default)]
    response: Option<Value>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    progress: Option<i32>,
    #[serde(default)]
    operation_type: Option<String>,
    #[serde(default)]
    http_error_status_code: Option<u16>,
    #[serde(flatten)]
    extensions: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<WireErrorItem>,
    #[serde(default)]
    details: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct WireErrorItem {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireWarning {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Canonical name of a numeric `google.rpc.Code`.
pub fn canonical_code_name(code: i64) -> &'static str {
    match code {
        0 => "OK",
        1 => "CANCELLED",
        2 => "UNKNOWN",
        3 => "INVALID_ARGUMENT",
        4 => "DEADLINE_EXCEEDED",
        5 => "NOT_FOUND",
        6 => "ALREADY_EXISTS",
        7 => "PERMISSION_DENIED",
        8 => "RESOURCE_EXHAUSTED",
        9 => "FAILED_PRECONDITION",
        10 => "ABORTED",
        11 => "OUT_OF_RANGE",
        12 => "UNIMPLEMENTED",
        13 => "INTERNAL",
        14 => "UNAVAILABLE",
        15 => "DATA_LOSS",
        16 => "UNAUTHENTICATED",
        _ => "UNKNOWN",
    }
}

fn render_detail(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl WireError {
    fn into_info(self) -> OperationErrorInfo {
        let first = self.errors.first();
        let code = match &self.code {
            Some(Value::String(code)) => code.clone(),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(canonical_code_name)
                .unwrap_or("UNKNOWN")
                .to_string(),
            _ => first
                .and_then(|e| e.code.clone())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        };

        let message = self.message.clone().unwrap_or_else(|| {
            self.errors
                .iter()
                .filter_map(|e| e.message.as_deref())
                .collect::<Vec<_>>()
                .join("; ")
        });

        let mut details: Vec<String> = self
            .errors
            .iter()
            .map(|e| {
                let code = e.code.as_deref().unwrap_or("UNKNOWN");
                let message = e.message.as_deref().unwrap_or_default();
                match &e.location {
                    Some(location) => format!("{code} ({location}): {message}"),
                    None => format!("{code}: {message}"),
                }
            })
            .collect();
        details.extend(self.details.iter().map(render_detail));

        OperationErrorInfo {
            code,
            message,
            details,
        }
    }
}

impl OperationHandle {
    /// Returns true if `value` looks like an operation resource.
    pub fn is_operation_json(value: &Value) -> bool {
        let Some(object) = value.as_object() else {
            return false;
        };
        if object
            .get("kind")
            .and_then(Value::as_str)
            .is_some_and(|kind| kind.ends_with("#operation"))
        {
            return true;
        }
        let Some(name) = object.get("name").and_then(Value::as_str) else {
            return false;
        };
        let has_status = object
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| matches!(s, "PENDING" | "RUNNING" | "DONE"));
        has_status
            || object.get("done").is_some_and(Value::is_boolean)
            || name.starts_with("operations/")
            || name.contains("/operations/")
    }

    /// Decodes a Compute or google.longrunning operation.
    ///
    /// Poll responses may omit the name; the handle then has an empty name
    /// and [`advance`](Self::advance) keeps the one already known.
    pub fn from_json(value: Value) -> Result<Self, ResponseError> {
        let wire: WireOperation = serde_json::from_value(value)
            .map_err(|e| ResponseError::DeserializationError(e.to_string()))?;

        let status = match (wire.status.as_deref(), wire.done) {
            (Some("PENDING"), _) => OperationStatus::Pending,
            (Some("RUNNING"), _) => OperationStatus::Running,
            (Some("DONE"), _) => OperationStatus::Done,
            (Some(other), _) => {
                return Err(ResponseError::UnexpectedFormat(format!(
                    "unknown operation status [{other}]"
                )))
            }
            (None, Some(true)) => OperationStatus::Done,
            (None, Some(false)) => OperationStatus::Running,
            (None, None) if wire.error.is_some() || wire.response.is_some() => {
                OperationStatus::Done
            }
            (None, None) => OperationStatus::Pending,
        };

        let name = wire
            .name
            .or_else(|| {
                wire.self_link
                    .as_deref()
                    .and_then(|link| link.rsplit('/').next())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let warnings = wire
            .warnings
            .into_iter()
            .map(|w| OperationWarning {
                code: w.code,
                message: w.message.unwrap_or_default(),
            })
            .collect();

        let mut extensions = wire.extensions;
        extensions.remove("kind");

        Ok(OperationHandle {
            name,
            self_link: wire.self_link,
            scope: None,
            status,
            error: wire.error.map(WireError::into_info),
            warnings,
            target_link: wire.target_link,
            response: wire.response,
            metadata: wire.metadata,
            progress: wire.progress,
            operation_type: wire.operation_type,
            zone: wire.zone,
            region: wire.region,
            global: wire.global,
            http_error_status: wire.http_error_status_code,
            extensions,
        })
    }
}

/// What a mutating call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome<T> {
    /// The API completed synchronously and returned the payload.
    Done(T),
    /// The API returned an operation to wait on.
    Operation(OperationHandle),
}

impl<T: DeserializeOwned> SubmitOutcome<T> {
    /// Classifies a submit response body.
    ///
    /// An operation returned by submit must carry a name or a self-link.
    pub fn from_json(value: Value) -> CloudResult<Self> {
        if OperationHandle::is_operation_json(&value) {
            let handle = OperationHandle::from_json(value)?;
            if handle.name.is_empty() {
                return Err(
                    ResponseError::UnexpectedFormat("operation has no name".to_string()).into(),
                );
            }
            return Ok(SubmitOutcome::Operation(handle));
        }
        let payload = serde_json::from_value(value)
            .map_err(|e| ResponseError::DeserializationError(e.to_string()))?;
        Ok(SubmitOutcome::Done(payload))
    }
}
