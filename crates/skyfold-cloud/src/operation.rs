//! Long-running operation records
//!
//! A record is written when the provider answers a request with a
//! continuation token and removed once completion is observed, so a pass
//! that starts after a restart polls the same operation instead of issuing
//! a second request.

use crate::client::PendingOperation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Kind of in-flight operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create or update
    Create,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// At most one open record exists per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationKey {
    pub service: String,
    pub resource: String,
}

impl OperationKey {
    pub fn new(service: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            resource: resource.into(),
        }
    }
}

impl std::fmt::Display for OperationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.service, self.resource)
    }
}

/// A persisted in-flight operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub service_name: String,
    pub resource_name: String,
    pub resource_group: String,
    pub kind: OperationKind,

    /// Opaque continuation handle issued by the provider
    pub token: String,

    /// Provider polling hint in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,

    pub started_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(
        key: &OperationKey,
        resource_group: impl Into<String>,
        kind: OperationKind,
        pending: &PendingOperation,
    ) -> Self {
        Self {
            service_name: key.service.clone(),
            resource_name: key.resource.clone(),
            resource_group: resource_group.into(),
            kind,
            token: pending.token.clone(),
            retry_after_secs: pending.retry_after.map(|d| d.as_secs()),
            started_at: Utc::now(),
        }
    }

    pub fn key(&self) -> OperationKey {
        OperationKey::new(&self.service_name, &self.resource_name)
    }

    /// Rebuild the handle handed to the provider when polling
    pub fn pending(&self) -> PendingOperation {
        PendingOperation {
            token: self.token.clone(),
            retry_after: self.retry_after(),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_secs.map(Duration::from_secs)
    }
}

/// Durable record of in-flight operations for one top-level object.
///
/// `put` replaces any record under the same key, including one of the other
/// kind; the stale token is discarded.
#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn get(&self, key: &OperationKey) -> Option<Operation>;

    async fn put(&self, operation: Operation);

    async fn delete(&self, key: &OperationKey);
}
