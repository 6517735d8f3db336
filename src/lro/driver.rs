use crate::errors::{CloudError, CloudResult, OperationError};
use crate::lro::{PollPlan, PollPolicy};
use crate::operations::{
    OperationHandle, OperationResolver, ResolvedOperation, ScopeHints, SubmitOutcome,
};
use crate::progress::{EventKind, NoopReporter, ProgressEvent, ProgressReporter};
use crate::resources::ResourceRef;
use crate::services::OperationsService;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Consecutive not-found polls tolerated before an operation counts as lost.
pub const MAX_NOT_FOUND_POLLS: u32 = 3;

/// Upper bound for the best-effort cancel call.
const CANCEL_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type SubmitFn<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, CloudResult<SubmitOutcome<T>>> + Send + 'a>;
type FetchFn<'a, T> = Box<dyn FnOnce(OperationHandle) -> BoxFuture<'a, CloudResult<T>> + Send + 'a>;

/// Whether to wait for the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Poll to a terminal state.
    #[default]
    Sync,
    /// Return the operation handle right after submit (`--async`).
    Async,
}

/// What an invocation returned.
#[derive(Debug, Clone, PartialEq)]
pub enum LroOutcome<T> {
    /// Typed result: the synchronous API payload or the fetched resource.
    Resource(T),
    /// Operation handle: async mode, or a finished operation without fetch.
    Operation(OperationHandle),
}

impl<T> LroOutcome<T> {
    /// Returns the resource, if any.
    pub fn into_resource(self) -> Option<T> {
        match self {
            LroOutcome::Resource(resource) => Some(resource),
            LroOutcome::Operation(_) => None,
        }
    }

    /// Returns the operation handle, if any.
    pub fn into_operation(self) -> Option<OperationHandle> {
        match self {
            LroOutcome::Operation(handle) => Some(handle),
            LroOutcome::Resource(_) => None,
        }
    }
}

/// One LRO invocation.
///
/// # Example
///
/// ```no_run
/// use integrations_google_cloud_lro::prelude::*;
/// use serde_json::Value;
///
/// # async fn example(client: CloudClient) -> CloudResult<()> {
/// let url = client
///     .parse("vm-1", "compute.instances", &ParamDefaults::new().project("p").zone("z"))?
///     .url();
/// let executor = client.executor().clone();
///
/// let request = LroRequest::new("Deleting instance [vm-1]", move || async move {
///     let token = CancellationToken::new();
///     let response = executor.execute(HttpMethod::Delete, &url, None, &token).await?;
///     SubmitOutcome::<Value>::from_json(serde_json::from_slice(&response.body).unwrap_or_default())
/// })
/// .hints(ScopeHints::project("p").with_zone("z"))
/// .progress(reporter_for(false));
///
/// let outcome = client.lro().run(request).await?;
/// # Ok(())
/// # }
/// ```
pub struct LroRequest<'a, T> {
    label: String,
    submit: SubmitFn<'a, T>,
    fetch: Option<FetchFn<'a, T>>,
    mode: Mode,
    hints: ScopeHints,
    policy: PollPolicy,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl<'a, T> LroRequest<'a, T> {
    /// Creates a synchronous request with default policy and no reporter.
    pub fn new<F, Fut>(label: impl Into<String>, submit: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = CloudResult<SubmitOutcome<T>>> + Send + 'a,
    {
        Self {
            label: label.into(),
            submit: Box::new(move || submit().boxed()),
            fetch: None,
            mode: Mode::Sync,
            hints: ScopeHints::default(),
            policy: PollPolicy::default(),
            progress: Arc::new(NoopReporter),
            cancel: CancellationToken::new(),
        }
    }

    /// Fetches the final resource once the operation succeeded.
    pub fn fetch<F, Fut>(mut self, fetch: F) -> Self
    where
        F: FnOnce(OperationHandle) -> Fut + Send + 'a,
        Fut: Future<Output = CloudResult<T>> + Send + 'a,
    {
        self.fetch = Some(Box::new(move |handle| fetch(handle).boxed()));
        self
    }

    /// Sets the mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the scope hints.
    pub fn hints(mut self, hints: ScopeHints) -> Self {
        self.hints = hints;
        self
    }

    /// Sets the poll policy.
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

/// Emits events in timeline order for one invocation.
pub(super) struct Timeline<'r> {
    pub(super) reporter: &'r dyn ProgressReporter,
    pub(super) label: &'r str,
    pub(super) started: Instant,
}

impl Timeline<'_> {
    pub(super) fn emit(&self, kind: EventKind, operation: Option<&OperationHandle>, message: String) {
        self.reporter.emit(ProgressEvent {
            kind,
            label: self.label.to_string(),
            operation: operation.cloned(),
            message,
            elapsed: self.started.elapsed(),
        });
    }
}

/// Where an invocation got to before it ended.
#[derive(Default)]
pub(super) struct RunState {
    pub(super) handle: Option<OperationHandle>,
    pub(super) poll: Option<ResourceRef>,
}

impl RunState {
    fn operation_name(&self) -> Option<String> {
        self.poll
            .as_ref()
            .map(ResourceRef::relative_name)
            .or_else(|| self.handle.as_ref().map(|h| h.name.clone()))
    }

    fn cancelled(&self) -> CloudError {
        CloudError::cancelled(self.operation_name())
    }
}

/// Runs long-running operations: submit once, then poll to completion.
///
/// The driver holds no state between invocations; concurrent calls to
/// [`run`](Self::run) are independent.
#[derive(Clone)]
pub struct LroDriver {
    pub(super) operations: OperationsService,
    pub(super) resolver: OperationResolver,
}

impl LroDriver {
    /// Creates a driver.
    pub fn new(operations: OperationsService, resolver: OperationResolver) -> Self {
        Self {
            operations,
            resolver,
        }
    }

    /// Runs one invocation.
    pub async fn run<T>(&self, request: LroRequest<'_, T>) -> CloudResult<LroOutcome<T>> {
        let LroRequest {
            label,
            submit,
            fetch,
            mode,
            hints,
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

        let mut state = RunState::default();
        let result = self
            .drive(submit, fetch, mode, &hints, policy, &cancel, &timeline, &mut state)
            .await;

        match &result {
            Ok(outcome) => {
                let (handle, message) = match outcome {
                    LroOutcome::Operation(handle) if !handle.is_done() => (
                        Some(handle),
                        format!("operation [{}] in progress", handle.name),
                    ),
                    LroOutcome::Operation(handle) => (Some(handle), "done".to_string()),
                    LroOutcome::Resource(_) => (state.handle.as_ref(), "done".to_string()),
                };
                tracing::info!(label = %label, "operation finished");
                timeline.emit(EventKind::Completed, handle, message);
            }
            Err(error) if error.is_cancelled() => {
                timeline.emit(EventKind::Cancelled, state.handle.as_ref(), "cancelled".to_string());
                if let Some(poll) = &state.poll {
                    self.cancel_remote(poll).await;
                }
            }
            Err(error) => {
                timeline.emit(EventKind::Failed, state.handle.as_ref(), failure_message(error));
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive<T>(
        &self,
        submit: SubmitFn<'_, T>,
        fetch: Option<FetchFn<'_, T>>,
        mode: Mode,
        hints: &ScopeHints,
        policy: PollPolicy,
        cancel: &CancellationToken,
        timeline: &Timeline<'_>,
        state: &mut RunState,
    ) -> CloudResult<LroOutcome<T>> {
        if mode == Mode::Sync {
            policy.validate()?;
        }
        if cancel.is_cancelled() {
            return Err(state.cancelled());
        }

        let mut handle = match submit().await {
            Ok(SubmitOutcome::Done(value)) => return Ok(LroOutcome::Resource(value)),
            Ok(SubmitOutcome::Operation(handle)) => handle,
            Err(error) if error.is_cancelled() => return Err(state.cancelled()),
            Err(error) => return Err(error),
        };
        state.handle = Some(handle.clone());

        let ResolvedOperation { scope, poll } = self.resolver.resolve(&handle, hints)?;
        tracing::debug!(operation = %poll, %scope, "resolved operation");
        handle.scope = Some(scope);
        state.handle = Some(handle.clone());
        state.poll = Some(poll.clone());

        if cancel.is_cancelled() {
            return Err(state.cancelled());
        }
        if mode == Mode::Async {
            return Ok(LroOutcome::Operation(handle));
        }

        let mut plan = PollPlan::new(poll, policy, cancel.clone());
        let handle = self.poll_until_done(&mut plan, handle, timeline, state).await?;
        let operation = plan.poll_ref().relative_name();

        if let Some(error) = &handle.error {
            return Err(OperationError::Failed {
                operation,
                service_code: error.code.clone(),
                message: error.message.clone(),
                details: error.details.clone(),
            }
            .into());
        }

        for warning in &handle.warnings {
            tracing::warn!(operation = %operation, warning = %warning.message, "operation warning");
        }

        match fetch {
            Some(fetch) => {
                if cancel.is_cancelled() {
                    return Err(state.cancelled());
                }
                match fetch(handle).await {
                    Err(error) if error.is_cancelled() => Err(state.cancelled()),
                    other => other.map(LroOutcome::Resource),
                }
            }
            None => Ok(LroOutcome::Operation(handle)),
        }
    }

    pub(super) async fn poll_until_done(
        &self,
        plan: &mut PollPlan,
        mut handle: OperationHandle,
        timeline: &Timeline<'_>,
        state: &mut RunState,
    ) -> CloudResult<OperationHandle> {
        let cancel = plan.cancel_token().clone();
        let mut not_found = 0u32;

        loop {
            let delay = plan.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(state.cancelled()),
            }

            let polled = if plan.uses_server_wait() {
                self.operations.wait(plan.poll_ref(), &cancel).await
            } else {
                self.operations.get(plan.poll_ref(), &cancel).await
            };
            match polled {
                Ok(polled) => {
                    not_found = 0;
                    handle.advance(polled);
                    state.handle = Some(handle.clone());
                    tracing::debug!(
                        operation = %plan.poll_ref(),
                        status = %handle.status,
                        poll = plan.polls(),
                        "polled operation"
                    );
                    timeline.emit(EventKind::Tick, Some(&handle), handle.describe());
                }
                Err(error) if error.is_not_found() => {
                    not_found += 1;
                    tracing::debug!(operation = %plan.poll_ref(), not_found, "operation not found yet");
                    if not_found >= MAX_NOT_FOUND_POLLS {
                        return Err(OperationError::Lost {
                            operation: plan.poll_ref().relative_name(),
                            attempts: not_found,
                        }
                        .into());
                    }
                }
                Err(error) if error.is_cancelled() => return Err(state.cancelled()),
                Err(error) => return Err(error),
            }

            if handle.is_done() {
                return Ok(handle);
            }
            if cancel.is_cancelled() {
                return Err(state.cancelled());
            }
            if plan.expired() {
                return Err(OperationError::Timeout {
                    operation: plan.poll_ref().relative_name(),
                    waited: plan.waited(),
                }
                .into());
            }
        }
    }

    /// Best-effort server-side cancel. Failures are logged and dropped.
    pub(super) async fn cancel_remote(&self, poll: &ResourceRef) {
        if !poll.collection().supports_cancel() {
            return;
        }
        let token = CancellationToken::new();
        let call = self.operations.cancel(poll, &token);
        match tokio::time::timeout(CANCEL_CALL_TIMEOUT, call).await {
            Ok(Ok(())) => tracing::info!(operation = %poll, "cancel requested"),
            Ok(Err(error)) => tracing::warn!(operation = %poll, %error, "cancel request failed"),
            Err(_) => tracing::warn!(operation = %poll, "cancel request timed out"),
        }
    }
}

/// Single-line failure text: operation name, service code, message and
/// the details verbatim.
pub(super) fn failure_message(error: &CloudError) -> String {
    match error {
        CloudError::Operation(OperationError::Failed { details, .. }) if !details.is_empty() => {
            format!("{error} [details: {}]", details.join("; "))
        }
        CloudError::Api(api) if !api.details.is_empty() => {
            format!("{error} [details: {}]", api.details.join("; "))
        }
        _ => error.to_string(),
    }
}
