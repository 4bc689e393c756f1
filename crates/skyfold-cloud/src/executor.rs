//! Resumable create/update/delete of a single resource
//!
//! One call to the executor never waits for a long-running operation. It
//! either finishes within a single round of remote calls or leaves an
//! operation record behind and reports [`Progress::InProgress`]; the next
//! pass picks the record up and polls it.

use crate::client::{AsyncResult, OperationState, PendingOperation, ResourceClient};
use crate::error::{CloudError, Result};
use crate::operation::{Operation, OperationKey, OperationKind, OperationStore};
use crate::spec::{ResourceRef, ResourceSpec};
use skyfold_config::EngineConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of driving a resource for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Desired state reached (or nothing to do)
    Done,
    /// A remote operation is still running; call again after `retry_after`
    InProgress { retry_after: Duration },
}

impl Progress {
    pub fn is_done(&self) -> bool {
        matches!(self, Progress::Done)
    }

    /// Keep the more pressing of two outcomes, preferring the shorter wait
    pub fn combine(self, other: Progress) -> Progress {
        match (self, other) {
            (Progress::Done, other) => other,
            (this, Progress::Done) => this,
            (
                Progress::InProgress { retry_after: a },
                Progress::InProgress { retry_after: b },
            ) => Progress::InProgress {
                retry_after: a.min(b),
            },
        }
    }
}

/// Drives resources of one service through the remote client
pub struct AsyncExecutor<R> {
    service: String,
    client: Arc<dyn ResourceClient<Resource = R>>,
    store: Arc<dyn OperationStore>,
    call_timeout: Duration,
    default_retry_after: Duration,
}

impl<R: Send + Sync> AsyncExecutor<R> {
    pub fn new(
        service: impl Into<String>,
        client: Arc<dyn ResourceClient<Resource = R>>,
        store: Arc<dyn OperationStore>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            service: service.into(),
            client,
            store,
            call_timeout: config.call_timeout(),
            default_retry_after: config.default_retry_after(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn client(&self) -> &Arc<dyn ResourceClient<Resource = R>> {
        &self.client
    }

    /// Bound a remote call by the configured timeout
    async fn call<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CloudError::Timeout(format!(
                "{} (service: {}) did not answer within {:?}",
                what, self.service, self.call_timeout
            ))),
        }
    }

    fn retry_after(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.default_retry_after)
    }

    /// Observed state of the resource, bounded by the call timeout
    pub async fn get<S>(&self, spec: &S) -> Result<Option<R>>
    where
        S: ResourceSpec<Resource = R> + ?Sized,
    {
        self.call("get", self.client.get(&spec.resource_ref()))
            .await
    }

    /// Bring the resource described by `spec` to its desired parameters
    pub async fn create_or_update<S>(&self, spec: &S) -> Result<Progress>
    where
        S: ResourceSpec<Resource = R> + ?Sized,
    {
        let reference = spec.resource_ref();
        let key = OperationKey::new(&self.service, spec.resource_name());

        if let Some(operation) = self.store.get(&key).await {
            if operation.kind == OperationKind::Create {
                return self.resume(&reference, operation).await;
            }
            warn!(
                service = %self.service,
                resource = %reference,
                "Discarding in-flight {} operation superseded by create",
                operation.kind
            );
            self.store.delete(&key).await;
        }

        let existing = self.call("get", self.client.get(&reference)).await?;

        let Some(parameters) = spec.parameters(existing.as_ref())? else {
            debug!(service = %self.service, resource = %reference, "No changes, skipping");
            return Ok(Progress::Done);
        };

        info!(
            service = %self.service,
            resource = %reference,
            exists = existing.is_some(),
            "Creating or updating resource"
        );
        let result = self
            .call(
                "create_or_update",
                self.client.create_or_update_async(&reference, parameters),
            )
            .await?;

        match result {
            AsyncResult::Completed(_) => {
                info!(service = %self.service, resource = %reference, "Resource ready");
                Ok(Progress::Done)
            }
            AsyncResult::Pending(pending) => {
                self.record(&key, &reference, OperationKind::Create, &pending)
                    .await
            }
        }
    }

    /// Delete the resource described by `spec`; an absent resource counts as deleted
    pub async fn delete<S>(&self, spec: &S) -> Result<Progress>
    where
        S: ResourceSpec<Resource = R> + ?Sized,
    {
        let reference = spec.resource_ref();
        let key = OperationKey::new(&self.service, spec.resource_name());

        if let Some(operation) = self.store.get(&key).await {
            if operation.kind == OperationKind::Delete {
                return self.resume(&reference, operation).await;
            }
            warn!(
                service = %self.service,
                resource = %reference,
                "Discarding in-flight {} operation superseded by delete",
                operation.kind
            );
            self.store.delete(&key).await;
        }

        info!(service = %self.service, resource = %reference, "Deleting resource");
        let result = match self
            .call("delete", self.client.delete_async(&reference))
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_not_found() => {
                debug!(service = %self.service, resource = %reference, "Already deleted");
                return Ok(Progress::Done);
            }
            Err(e) => return Err(e),
        };

        match result {
            AsyncResult::Completed(()) => {
                info!(service = %self.service, resource = %reference, "Resource deleted");
                Ok(Progress::Done)
            }
            AsyncResult::Pending(pending) => {
                self.record(&key, &reference, OperationKind::Delete, &pending)
                    .await
            }
        }
    }

    async fn record(
        &self,
        key: &OperationKey,
        reference: &ResourceRef,
        kind: OperationKind,
        pending: &PendingOperation,
    ) -> Result<Progress> {
        self.store
            .put(Operation::new(key, &reference.resource_group, kind, pending))
            .await;
        info!(
            service = %self.service,
            resource = %reference,
            "Started long-running {} operation",
            kind
        );
        Ok(Progress::InProgress {
            retry_after: self.retry_after(pending.retry_after),
        })
    }

    /// Single poll of a recorded operation
    async fn resume(&self, reference: &ResourceRef, operation: Operation) -> Result<Progress> {
        let key = operation.key();
        let pending = operation.pending();

        let state = match self.call("poll", self.client.poll(&pending)).await {
            Ok(state) => state,
            Err(CloudError::InvalidToken(reason)) => {
                self.store.delete(&key).await;
                return Err(CloudError::InvalidToken(format!(
                    "{} (resetting {} operation on {})",
                    reason, operation.kind, reference
                )));
            }
            // the record stays so the next pass polls the same token
            Err(e) => return Err(e),
        };

        match state {
            OperationState::Pending => {
                debug!(
                    service = %self.service,
                    resource = %reference,
                    "{} operation still running",
                    operation.kind
                );
                Ok(Progress::InProgress {
                    retry_after: self.retry_after(pending.retry_after),
                })
            }
            OperationState::Succeeded => {
                self.store.delete(&key).await;
                info!(
                    service = %self.service,
                    resource = %reference,
                    "{} operation completed",
                    operation.kind
                );
                Ok(Progress::Done)
            }
            OperationState::Failed(message) => {
                self.store.delete(&key).await;
                Err(CloudError::OperationFailed {
                    service: self.service.clone(),
                    resource: reference.to_string(),
                    message,
                })
            }
        }
    }
}
