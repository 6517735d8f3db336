//! Operation handles and operation scope resolution.
//!
//! Two wire shapes are understood: Compute Engine operations (`status`,
//! `zone`, `region`, `selfLink`, `targetLink`, ...) and the standard
//! `google.longrunning.Operation` (`name`, `done`, `error`, `response`).
//! Both decode into one [`OperationHandle`].

mod resolver;
mod wire;

pub use resolver::{OperationResolver, ResolvedOperation, ScopeHints};
pub use wire::{canonical_code_name, SubmitOutcome};

use serde_json::{Map, Value};
use std::fmt;

/// Operation status. Ordered: `Pending < Running < Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationStatus {
    /// Accepted, not started.
    Pending,
    /// In progress.
    Running,
    /// Terminal, successful or not.
    Done,
}

impl OperationStatus {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Running => "RUNNING",
            OperationStatus::Done => "DONE",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The axis an operation lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationScope {
    /// `projects/*/global/operations/*`.
    Global,
    /// `projects/*/regions/{region}/operations/*`.
    Regional(String),
    /// `projects/*/zones/{zone}/operations/*`.
    Zonal(String),
    /// A service's own operations collection, by full collection name.
    Service(String),
}

impl fmt::Display for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationScope::Global => f.write_str("global"),
            OperationScope::Regional(region) => write!(f, "regional({region})"),
            OperationScope::Zonal(zone) => write!(f, "zonal({zone})"),
            OperationScope::Service(collection) => write!(f, "service({collection})"),
        }
    }
}

/// Error payload of a finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationErrorInfo {
    /// Service error code, e.g. `QUOTA_EXCEEDED` or `RESOURCE_EXHAUSTED`.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Detail entries, rendered verbatim.
    pub details: Vec<String>,
}

/// Warning attached to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationWarning {
    /// Warning code, if the service sends one.
    pub code: Option<String>,
    /// Message.
    pub message: String,
}

/// Client-side record of a long-running operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHandle {
    /// Operation name as returned by the service.
    pub name: String,
    /// Self-link, when the service returns one.
    pub self_link: Option<String>,
    /// Scope, set once the resolver classified the operation.
    pub scope: Option<OperationScope>,
    /// Current status.
    pub status: OperationStatus,
    /// Error payload of a failed operation.
    pub error: Option<OperationErrorInfo>,
    /// Warnings of a finished operation.
    pub warnings: Vec<OperationWarning>,
    /// Self-link of the resource the operation acts on.
    pub target_link: Option<String>,
    /// Result payload of a successful operation.
    pub response: Option<Value>,
    /// Service specific metadata.
    pub metadata: Option<Value>,
    /// Completion percentage, when reported.
    pub progress: Option<i32>,
    /// Operation type, e.g. `insert`.
    pub operation_type: Option<String>,
    /// Zone field, as sent (name or URL).
    pub zone: Option<String>,
    /// Region field, as sent (name or URL).
    pub region: Option<String>,
    /// The operation declared itself global.
    pub global: bool,
    /// HTTP status the operation failed with, when reported.
    pub http_error_status: Option<u16>,
    /// Fields this crate does not model.
    pub extensions: Map<String, Value>,
}

impl OperationHandle {
    /// Creates a pending handle with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            self_link: None,
            scope: None,
            status: OperationStatus::Pending,
            error: None,
            warnings: Vec::new(),
            target_link: None,
            response: None,
            metadata: None,
            progress: None,
            operation_type: None,
            zone: None,
            region: None,
            global: false,
            http_error_status: None,
            extensions: Map::new(),
        }
    }

    /// Returns true once the operation is terminal.
    pub fn is_done(&self) -> bool {
        self.status == OperationStatus::Done
    }

    /// Returns true for a finished operation without error.
    pub fn succeeded(&self) -> bool {
        self.is_done() && self.error.is_none()
    }

    /// Folds a freshly polled snapshot into this handle.
    ///
    /// Status never moves backwards. The scope, the name and any link the
    /// poll response omits are kept from the previous snapshot.
    pub fn advance(&mut self, polled: OperationHandle) {
        let status = self.status.max(polled.status);
        let scope = self.scope.take();
        let self_link = polled.self_link.or_else(|| self.self_link.take());
        let target_link = polled.target_link.or_else(|| self.target_link.take());
        let zone = polled.zone.or_else(|| self.zone.take());
        let region = polled.region.or_else(|| self.region.take());
        let global = self.global || polled.global;
        let name = if polled.name.is_empty() {
            std::mem::take(&mut self.name)
        } else {
            polled.name
        };

        *self = OperationHandle {
            name,
            self_link,
            scope,
            status,
            target_link,
            zone,
            region,
            global,
            ..polled
        };
    }

    /// Short description used in progress messages.
    pub fn describe(&self) -> String {
        match self.progress {
            Some(progress) => format!("{} [{}] {}%", self.name, self.status, progress),
            None => format!("{} [{}]", self.name, self.status),
        }
    }
}
