//! Waiting on several submitted operations together.
//!
//! Commands that fan out one mutation per resource (`instances delete a b c`)
//! submit every request first and then wait on all resulting operations at
//! once. Each operation is resolved and polled in its own scope, so zonal,
//! regional and global operations can share one wait. Failures are collected
//! per operation instead of aborting the whole batch.

use crate::errors::{CloudError, CloudResult, OperationError};
use crate::lro::driver::{failure_message, RunState, Timeline};
use crate::lro::{LroDriver, LroOutcome, PollPlan, PollPolicy};
use crate::operations::{OperationHandle, ScopeHints};
use crate::progress::{EventKind, NoopReporter, ProgressReporter};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type BatchFetchFn<'a, T> =
    Box<dyn Fn(OperationHandle) -> BoxFuture<'a, CloudResult<T>> + Send + Sync + 'a>;

/// Failure of one operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchError {
    /// Operation name, in relative form once it was resolved.
    pub operation: String,
    /// HTTP status of the failure, when known.
    pub http_status: Option<u16>,
    /// Single-line description.
    pub message: String,
}

impl BatchError {
    fn from_error(operation: String, error: &CloudError) -> Self {
        Self {
            operation,
            http_status: error.status_code().map(|status| status.as_u16()),
            message: failure_message(error),
        }
    }

    fn from_operation(operation: &str, handle: &OperationHandle) -> Option<Self> {
        let info = handle.error.as_ref()?;
        let error: CloudError = OperationError::Failed {
            operation: operation.to_string(),
            service_code: info.code.clone(),
            message: info.message.clone(),
            details: info.details.clone(),
        }
        .into();
        Some(Self {
            operation: operation.to_string(),
            http_status: handle.http_error_status,
            message: failure_message(&error),
        })
    }
}

/// What a batch wait produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T> {
    /// One entry per successful operation, in submission order.
    pub results: Vec<LroOutcome<T>>,
    /// One entry per failed operation.
    pub errors: Vec<BatchError>,
    /// Warnings attached to finished operations.
    pub warnings: Vec<String>,
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<T> BatchOutcome<T> {
    /// Returns true when no operation failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Operations to wait on, with their shared settings.
pub struct BatchRequest<'a, T> {
    label: String,
    operations: Vec<(OperationHandle, ScopeHints)>,
    fetch: Option<BatchFetchFn<'a, T>>,
    policy: PollPolicy,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl<'a, T> BatchRequest<'a, T> {
    /// Creates an empty batch with default policy and no reporter.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            operations: Vec::new(),
            fetch: None,
            policy: PollPolicy::default(),
            progress: Arc::new(NoopReporter),
            cancel: CancellationToken::new(),
        }
    }

    /// Adds an operation and the scope of the resource it acts on.
    pub fn operation(mut self, handle: OperationHandle, hints: ScopeHints) -> Self {
        self.operations.push((handle, hints));
        self
    }

    /// Fetches the final resource of every successful operation.
    pub fn fetch<F, Fut>(mut self, fetch: F) -> Self
    where
        F: Fn(OperationHandle) -> Fut + Send + Sync + 'a,
        Fut: Future<Output = CloudResult<T>> + Send + 'a,
    {
        self.fetch = Some(Box::new(move |handle| fetch(handle).boxed()));
        self
    }

    /// Sets the poll policy, applied to each operation.
    pub fn policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the progress reporter.
    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Sets the cancellation token.
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl LroDriver {
    /// Waits on every operation of `request` concurrently.
    ///
    /// Emits one `Started`, a `Tick` per poll of any operation, then
    /// `Completed` when all succeeded or `Failed` when any did not. Per
    /// operation failures are returned in [`BatchOutcome::errors`]; only
    /// an invalid policy or cancellation fail the call itself.
    pub async fn wait_all<T>(&self, request: BatchRequest<'_, T>) -> CloudResult<BatchOutcome<T>> {
        let BatchRequest {
            label,
            operations,
            fetch,
            policy,
            progress,
            cancel,
        } = request;

        let timeline = Timeline {
            reporter: progress.as_ref(),
            label: &label,
            started: Instant::now(),
        };
        timeline.emit(EventKind::Started, None, label.clone());

        if let Err(error) = policy.validate() {
            timeline.emit(EventKind::Failed, None, error.to_string());
            return Err(error);
        }

        let total = operations.len();
        let mut outcome = BatchOutcome::default();
        let mut plans = Vec::with_capacity(total);
        for (mut handle, hints) in operations {
            match self.resolver.resolve(&handle, &hints) {
                Ok(resolved) => {
                    tracing::debug!(operation = %resolved.poll, scope = %resolved.scope, "resolved operation");
                    handle.scope = Some(resolved.scope);
                    plans.push((PollPlan::new(resolved.poll, policy.clone(), cancel.clone()), handle));
                }
                Err(error) => outcome
                    .errors
                    .push(BatchError::from_error(handle.name.clone(), &error)),
            }
        }

        let timeline_ref = &timeline;
        let waits = plans.into_iter().map(|(mut plan, handle)| async move {
            let mut state = RunState {
                handle: Some(handle.clone()),
                poll: Some(plan.poll_ref().clone()),
            };
            let result = if handle.is_done() {
                Ok(handle)
            } else {
                self.poll_until_done(&mut plan, handle, timeline_ref, &mut state)
                    .await
            };
            (plan, result)
        });
        let finished = join_all(waits).await;

        let cancelled = finished.iter().find_map(|(plan, result)| match result {
            Err(error) if error.is_cancelled() => Some(plan.poll_ref().relative_name()),
            _ => None,
        });
        if let Some(operation) = cancelled {
            timeline.emit(EventKind::Cancelled, None, "cancelled".to_string());
            for (plan, result) in &finished {
                if !matches!(result, Ok(handle) if handle.is_done()) {
                    self.cancel_remote(plan.poll_ref()).await;
                }
            }
            return Err(CloudError::cancelled(Some(operation)));
        }

        let mut succeeded = Vec::with_capacity(finished.len());
        for (plan, result) in finished {
            let operation = plan.poll_ref().relative_name();
            match result {
                Ok(handle) => {
                    for warning in &handle.warnings {
                        tracing::warn!(operation = %operation, warning = %warning.message, "operation warning");
                        outcome.warnings.push(warning.message.clone());
                    }
                    match BatchError::from_operation(&operation, &handle) {
                        Some(error) => outcome.errors.push(error),
                        None => succeeded.push((operation, handle)),
                    }
                }
                Err(error) => outcome.errors.push(BatchError::from_error(operation, &error)),
            }
        }

        match &fetch {
            Some(fetch) => {
                let fetches = succeeded
                    .into_iter()
                    .map(|(operation, handle)| fetch(handle).map(move |result| (operation, result)));
                for (operation, result) in join_all(fetches).await {
                    match result {
                        Ok(resource) => outcome.results.push(LroOutcome::Resource(resource)),
                        Err(error) => outcome.errors.push(BatchError::from_error(operation, &error)),
                    }
                }
            }
            None => outcome
                .results
                .extend(succeeded.into_iter().map(|(_, handle)| LroOutcome::Operation(handle))),
        }

        if outcome.is_success() {
            tracing::info!(label = %label, operations = total, "operations finished");
            timeline.emit(EventKind::Completed, None, format!("{total} operation(s) done"));
        } else {
            timeline.emit(
                EventKind::Failed,
                None,
                format!("{} of {total} operation(s) failed", outcome.errors.len()),
            );
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RequestExecutor;
    use crate::config::EndpointContext;
    use crate::mocks::{MockAuthProvider, MockHttpTransport};
    use crate::operations::{OperationResolver, OperationScope};
    use crate::progress::RecordingReporter;
    use crate::resilience::RetryConfig;
    use crate::resources::Registry;
    use crate::services::OperationsService;
    use crate::transport::HttpMethod;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const COMPUTE: &str = "https://compute.googleapis.com/compute/v1/projects/my-project";

    fn driver(transport: Arc<MockHttpTransport>) -> LroDriver {
        let executor = Arc::new(RequestExecutor::new(
            transport,
            Arc::new(MockAuthProvider::new("tok")),
            RetryConfig::no_retry(),
            Duration::from_secs(60),
        ));
        let registry = Registry::with_defaults(EndpointContext::default()).unwrap();
        LroDriver::new(
            OperationsService::new(executor),
            OperationResolver::new(Arc::new(registry)),
        )
    }

    fn zonal(name: &str, status: &str) -> OperationHandle {
        OperationHandle::from_json(json!({
            "name": name,
            "status": status,
            "zone": "us-central2-a",
            "targetLink": format!("{COMPUTE}/zones/us-central2-a/instances/{name}-vm"),
        }))
        .unwrap()
    }

    fn regional(name: &str, status: &str) -> OperationHandle {
        OperationHandle::from_json(json!({
            "name": name,
            "status": status,
            "region": "us-central2",
        }))
        .unwrap()
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.0,
            ..Default::default()
        }
    }

    fn hints() -> ScopeHints {
        ScopeHints::project("my-project")
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_operations_are_fetched_without_polling() {
        let transport = Arc::new(MockHttpTransport::new());
        let reporter = Arc::new(RecordingReporter::new());
        let fetches = Arc::new(AtomicU32::new(0));
        let counter = fetches.clone();

        let outcome = driver(transport.clone())
            .wait_all(
                BatchRequest::new("Creating instances")
                    .operation(zonal("operation-0", "DONE"), hints())
                    .operation(zonal("operation-1", "DONE"), hints())
                    .operation(zonal("operation-2", "DONE"), hints())
                    .fetch(move |handle| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async move { Ok(json!({"selfLink": handle.target_link})) }
                    })
                    .policy(policy())
                    .progress(reporter.clone()),
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.results.len(), 3);
        let first = outcome.results[0].clone().into_resource().unwrap();
        assert!(first["selfLink"].as_str().unwrap().ends_with("/operation-0-vm"));
        assert_eq!(fetches.load(Ordering::SeqCst), 3);
        transport.verify_request_count(0);
        assert_eq!(reporter.kinds(), vec![EventKind::Started, EventKind::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zonal_and_regional_operations_share_a_wait() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.enqueue_json(200, json!({"status": "DONE"}));
        transport.enqueue_json(200, json!({"status": "DONE"}));
        let reporter = Arc::new(RecordingReporter::new());

        let outcome: BatchOutcome<Value> = driver(transport.clone())
            .wait_all(
                BatchRequest::new("Deleting resources")
                    .operation(zonal("operation-0", "PENDING"), hints())
                    .operation(regional("operation-1", "RUNNING"), hints())
                    .policy(policy())
                    .progress(reporter.clone()),
            )
            .await
            .unwrap();

        assert!(outcome.is_success());
        let handles: Vec<OperationHandle> = outcome
            .results
            .into_iter()
            .map(|r| r.into_operation().unwrap())
            .collect();
        assert_eq!(handles[0].name, "operation-0");
        assert_eq!(handles[0].scope, Some(OperationScope::Zonal("us-central2-a".to_string())));
        assert_eq!(handles[1].name, "operation-1");
        assert_eq!(handles[1].scope, Some(OperationScope::Regional("us-central2".to_string())));
        assert!(handles.iter().all(OperationHandle::succeeded));

        let urls: Vec<String> = transport.requests().iter().map(|r| r.url.to_string()).collect();
        assert_eq!(transport.request_count(HttpMethod::Get), 2);
        assert!(urls.contains(&format!("{COMPUTE}/zones/us-central2-a/operations/operation-0")));
        assert!(urls.contains(&format!("{COMPUTE}/regions/us-central2/operations/operation-1")));
        assert_eq!(
            reporter.kinds(),
            vec![
                EventKind::Started,
                EventKind::Tick,
                EventKind::Tick,
                EventKind::Completed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_and_warnings_are_collected() {
        let transport = Arc::new(MockHttpTransport::new());
        let reporter = Arc::new(RecordingReporter::new());

        let failed = OperationHandle::from_json(json!({
            "name": "operation-1",
            "status": "DONE",
            "zone": "us-central2-a",
            "httpErrorStatusCode": 404,
            "error": {"errors": [{"code": "RESOURCE_NOT_FOUND", "message": "error-message-1"}]}
        }))
        .unwrap();
        let warned = OperationHandle::from_json(json!({
            "name": "operation-2",
            "status": "DONE",
            "zone": "us-central2-a",
            "warnings": [{"code": "NO_RESULTS_ON_PAGE", "message": "warning-1"}]
        }))
        .unwrap();

        let outcome: BatchOutcome<Value> = driver(transport.clone())
            .wait_all(
                BatchRequest::new("Deleting instances")
                    .operation(OperationHandle::new("operation-0"), hints())
                    .operation(failed, hints())
                    .operation(warned, hints())
                    .policy(policy())
                    .progress(reporter.clone()),
            )
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.warnings, vec!["warning-1".to_string()]);
        assert_eq!(outcome.errors.len(), 2);
        assert_eq!(outcome.errors[0].operation, "operation-0");
        assert!(outcome.errors[0].message.contains("Unsupported operation shape"));
        assert_eq!(
            outcome.errors[1].operation,
            "projects/my-project/zones/us-central2-a/operations/operation-1"
        );
        assert_eq!(outcome.errors[1].http_status, Some(404));
        assert!(outcome.errors[1].message.contains("[RESOURCE_NOT_FOUND] error-message-1"));
        transport.verify_request_count(0);

        let events = reporter.events();
        assert_eq!(events.last().map(|e| e.kind), Some(EventKind::Failed));
        assert_eq!(events.last().unwrap().message, "2 of 3 operation(s) failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_per_operation() {
        let transport = Arc::new(MockHttpTransport::new());
        for _ in 0..10 {
            transport.enqueue_json(200, json!({"status": "RUNNING"}));
        }

        let outcome: BatchOutcome<Value> = driver(transport.clone())
            .wait_all(
                BatchRequest::new("Creating instances")
                    .operation(zonal("operation-0", "PENDING"), hints())
                    .policy(policy().with_max_total_wait(Duration::from_secs(9))),
            )
            .await
            .unwrap();

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("did not complete"));
        assert_eq!(outcome.errors[0].http_status, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_batch_fails() {
        let transport = Arc::new(MockHttpTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reporter = Arc::new(RecordingReporter::new());

        let err = driver(transport.clone())
            .wait_all(
                BatchRequest::<Value>::new("Creating instances")
                    .operation(zonal("operation-0", "PENDING"), hints())
                    .operation(zonal("operation-1", "DONE"), hints())
                    .progress(reporter.clone())
                    .cancel(cancel),
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(
            err.operation_name(),
            Some("projects/my-project/zones/us-central2-a/operations/operation-0")
        );
        assert_eq!(reporter.kinds(), vec![EventKind::Started, EventKind::Cancelled]);
        transport.verify_request_count(0);
    }
}
