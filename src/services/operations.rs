//! Operations service.

use crate::client::RequestExecutor;
use crate::errors::{CloudResult, OperationError};
use crate::operations::OperationHandle;
use crate::resources::ResourceRef;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Service for reading and cancelling operations by reference.
#[derive(Clone)]
pub struct OperationsService {
    executor: Arc<RequestExecutor>,
}

impl OperationsService {
    /// Creates a new operations service.
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// GETs the operation and decodes it.
    pub async fn get(
        &self,
        operation: &ResourceRef,
        cancel: &CancellationToken,
    ) -> CloudResult<OperationHandle> {
        let value: Value = self.executor.get_json(&operation.url(), cancel).await?;
        Ok(OperationHandle::from_json(value)?)
    }

    /// POSTs to the operation's `/wait` method.
    ///
    /// The service holds the request until the operation is done or its own
    /// deadline (about two minutes for Compute Engine) passes, then returns
    /// the operation. The executor's request timeout must allow for that.
    pub async fn wait(
        &self,
        operation: &ResourceRef,
        cancel: &CancellationToken,
    ) -> CloudResult<OperationHandle> {
        if !operation.collection().supports_wait() {
            return Err(OperationError::UnsupportedShape(format!(
                "{} does not support wait",
                operation.collection().full_name()
            ))
            .into());
        }

        let value: Value = self
            .executor
            .post_json(&operation.child_url("wait"), &json!({}), cancel)
            .await?;
        Ok(OperationHandle::from_json(value)?)
    }

    /// Requests server-side cancellation via the `:cancel` custom method.
    ///
    /// Only collections registered with cancel support accept this.
    pub async fn cancel(
        &self,
        operation: &ResourceRef,
        cancel: &CancellationToken,
    ) -> CloudResult<()> {
        if !operation.collection().supports_cancel() {
            return Err(OperationError::UnsupportedShape(format!(
                "{} does not support cancel",
                operation.collection().full_name()
            ))
            .into());
        }

        let _: Value = self
            .executor
            .post_json(&operation.method_url("cancel"), &json!({}), cancel)
            .await?;
        Ok(())
    }
}
