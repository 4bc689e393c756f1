//! Remote service traits
//!
//! Concrete SDK clients live outside this crate. The engine only needs the
//! narrow contract below: read, start a create/update or delete that may run
//! long, and poll a continuation token.

use crate::error::Result;
use crate::spec::ResourceRef;
use crate::tags::Tags;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Provider-issued handle for an operation that outlives one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Opaque continuation token
    pub token: String,

    /// How long the provider suggests waiting before polling again
    pub retry_after: Option<Duration>,
}

impl PendingOperation {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Outcome of starting a remote operation
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncResult<T> {
    /// The provider finished within the request
    Completed(T),
    /// The provider accepted the request and returned a continuation token
    Pending(PendingOperation),
}

/// Verdict of polling a continuation token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Succeeded,
    /// Terminal failure reported by the provider
    Failed(String),
}

/// Remote resource service for one resource kind
#[async_trait]
pub trait ResourceClient: Send + Sync {
    type Resource: Send + Sync;

    /// Fetch the resource; a missing resource is `Ok(None)`
    async fn get(&self, reference: &ResourceRef) -> Result<Option<Self::Resource>>;

    async fn create_or_update_async(
        &self,
        reference: &ResourceRef,
        parameters: Self::Resource,
    ) -> Result<AsyncResult<Self::Resource>>;

    /// Start a delete; a missing resource is `CloudError::ResourceNotFound`
    async fn delete_async(&self, reference: &ResourceRef) -> Result<AsyncResult<()>>;

    /// Single non-blocking round-trip on a continuation token.
    ///
    /// `Err` means the verdict could not be obtained (transport, timeout);
    /// `CloudError::InvalidToken` means the token can never be resumed.
    async fn poll(&self, operation: &PendingOperation) -> Result<OperationState>;
}

/// Tag API addressed by resource scope (a resource id)
#[async_trait]
pub trait TagsClient: Send + Sync {
    /// Tags currently on the resource; `Ok(None)` when the resource is absent
    async fn get_at_scope(&self, scope: &str) -> Result<Option<Tags>>;

    /// Replace the tag set on the resource
    async fn update_at_scope(&self, scope: &str, tags: Tags) -> Result<()>;
}
