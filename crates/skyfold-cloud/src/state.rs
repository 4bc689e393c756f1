//! Object status and its persistence
//!
//! The status of a top-level object carries everything that must survive a
//! process restart between two passes: in-flight operations, per-service
//! conditions, failure domains, and the user-facing phase. It is stored as
//! one JSON file per object under the configured state directory.

use crate::error::{CloudError, Result};
use crate::executor::Progress;
use crate::operation::{Operation, OperationKey, OperationStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

const STATUS_VERSION: u32 = 1;
const STATUS_EXTENSION: &str = "json";
const BACKUP_EXTENSION: &str = "json.backup";
const TMP_EXTENSION: &str = "json.tmp";

/// Human-readable lifecycle phase of the object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectPhase {
    #[default]
    Provisioning,
    Provisioned,
    Deleting,
    Deleted,
    Failed,
}

impl std::fmt::Display for ObjectPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectPhase::Provisioning => write!(f, "provisioning"),
            ObjectPhase::Provisioned => write!(f, "provisioned"),
            ObjectPhase::Deleting => write!(f, "deleting"),
            ObjectPhase::Deleted => write!(f, "deleted"),
            ObjectPhase::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionStatus {
    True,
    False,
}

pub const CREATING_REASON: &str = "Creating";
pub const DELETING_REASON: &str = "Deleting";
pub const DELETED_REASON: &str = "Deleted";
pub const FAILED_REASON: &str = "Failed";
pub const NOT_OWNED_REASON: &str = "ResourceGroupNotOwned";

/// Condition reported by a service or by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// e.g. `VNetReady`
    pub kind: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition: DateTime<Utc>,
}

impl Condition {
    pub fn ready(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            status: ConditionStatus::True,
            reason: None,
            message: None,
            last_transition: Utc::now(),
        }
    }

    pub fn not_ready(
        kind: impl Into<String>,
        reason: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            status: ConditionStatus::False,
            reason: Some(reason.into()),
            message,
            last_transition: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Topology unit available to control plane machines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDomainSpec {
    pub control_plane: bool,
}

/// Persisted status of one top-level object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStatus {
    pub version: u32,
    pub phase: ObjectPhase,
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub long_running_operations: Vec<Operation>,
    #[serde(default)]
    pub failure_domains: BTreeMap<String, FailureDomainSpec>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ObjectStatus {
    fn default() -> Self {
        Self {
            version: STATUS_VERSION,
            phase: ObjectPhase::default(),
            ready: false,
            failure_message: None,
            conditions: Vec::new(),
            long_running_operations: Vec::new(),
            failure_domains: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl ObjectStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(&self, key: &OperationKey) -> Option<&Operation> {
        self.long_running_operations
            .iter()
            .find(|op| op.service_name == key.service && op.resource_name == key.resource)
    }

    /// Insert or replace the record under the operation's key
    pub fn set_operation(&mut self, operation: Operation) {
        let key = operation.key();
        self.remove_operation(&key);
        self.long_running_operations.push(operation);
        self.updated_at = Utc::now();
    }

    pub fn remove_operation(&mut self, key: &OperationKey) -> Option<Operation> {
        let index = self
            .long_running_operations
            .iter()
            .position(|op| op.service_name == key.service && op.resource_name == key.resource)?;
        self.updated_at = Utc::now();
        Some(self.long_running_operations.remove(index))
    }

    pub fn condition(&self, kind: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Set a condition, keeping the transition time when nothing changed
    pub fn set_condition(&mut self, condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
            Some(current) => {
                let unchanged = current.status == condition.status
                    && current.reason == condition.reason
                    && current.message == condition.message;
                if !unchanged {
                    *current = condition;
                }
            }
            None => self.conditions.push(condition),
        }
        self.updated_at = Utc::now();
    }

    pub fn remove_condition(&mut self, kind: &str) {
        self.conditions.retain(|c| c.kind != kind);
    }

    pub fn set_failure_domain(&mut self, zone: impl Into<String>, spec: FailureDomainSpec) {
        self.failure_domains.insert(zone.into(), spec);
    }
}

/// Shared, mutable view of an object's status during one pass
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<Mutex<ObjectStatus>>,
}

impl StatusHandle {
    pub fn new(status: ObjectStatus) -> Self {
        Self {
            inner: Arc::new(Mutex::new(status)),
        }
    }

    /// Copy of the current status
    pub async fn snapshot(&self) -> ObjectStatus {
        self.inner.lock().await.clone()
    }

    /// Run `f` with exclusive access to the status
    pub async fn update<T>(&self, f: impl FnOnce(&mut ObjectStatus) -> T) -> T {
        let mut status = self.inner.lock().await;
        f(&mut status)
    }

    /// Record the outcome of a create/update pass over a service
    pub async fn update_put_status(&self, condition_kind: &str, outcome: &Result<Progress>) {
        let condition = match outcome {
            Ok(Progress::Done) => Condition::ready(condition_kind),
            Ok(Progress::InProgress { .. }) => {
                Condition::not_ready(condition_kind, CREATING_REASON, None)
            }
            Err(e) => Condition::not_ready(condition_kind, FAILED_REASON, Some(e.to_string())),
        };
        self.update(|status| status.set_condition(condition)).await;
    }

    /// Record the outcome of a delete pass over a service
    pub async fn update_delete_status(&self, condition_kind: &str, outcome: &Result<Progress>) {
        let condition = match outcome {
            Ok(Progress::Done) => Condition::not_ready(condition_kind, DELETED_REASON, None),
            Ok(Progress::InProgress { .. }) => {
                Condition::not_ready(condition_kind, DELETING_REASON, None)
            }
            Err(e) => Condition::not_ready(condition_kind, FAILED_REASON, Some(e.to_string())),
        };
        self.update(|status| status.set_condition(condition)).await;
    }
}

#[async_trait]
impl OperationStore for StatusHandle {
    async fn get(&self, key: &OperationKey) -> Option<Operation> {
        self.inner.lock().await.operation(key).cloned()
    }

    async fn put(&self, operation: Operation) {
        self.inner.lock().await.set_operation(operation);
    }

    async fn delete(&self, key: &OperationKey) {
        self.inner.lock().await.remove_operation(key);
    }
}

/// Reads and writes object status files
pub struct StatusStore {
    state_dir: PathBuf,
}

impl StatusStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    fn status_path(&self, object: &str) -> PathBuf {
        self.state_dir.join(format!("{}.{}", object, STATUS_EXTENSION))
    }

    fn backup_path(&self, object: &str) -> PathBuf {
        self.state_dir.join(format!("{}.{}", object, BACKUP_EXTENSION))
    }

    fn tmp_path(&self, object: &str) -> PathBuf {
        self.state_dir.join(format!("{}.{}", object, TMP_EXTENSION))
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        if !self.state_dir.exists() {
            fs::create_dir_all(&self.state_dir).await?;
            tracing::debug!("Created state directory: {}", self.state_dir.display());
        }
        Ok(())
    }

    /// Load the status of `object`, or a fresh status when none was saved.
    ///
    /// Falls back to the backup when the primary file is missing.
    pub async fn load(&self, object: &str) -> Result<ObjectStatus> {
        let mut path = self.status_path(object);
        if !path.exists() {
            let backup = self.backup_path(object);
            if !backup.exists() {
                tracing::debug!(object, "Status file not found, starting from empty status");
                return Ok(ObjectStatus::new());
            }
            tracing::warn!(object, "Status file missing, loading backup");
            path = backup;
        }

        let content = fs::read_to_string(&path).await?;
        let status: ObjectStatus = serde_json::from_str(&content)?;

        if status.version > STATUS_VERSION {
            return Err(CloudError::StateError(format!(
                "Status file version {} is newer than supported version {}",
                status.version, STATUS_VERSION
            )));
        }

        tracing::debug!(
            object,
            operations = status.long_running_operations.len(),
            "Loaded status"
        );
        Ok(status)
    }

    /// Save the status, keeping the previous file as a backup.
    ///
    /// The new content is written to a temporary file and renamed over the
    /// status file, so the status file is always either the old or the new
    /// version.
    pub async fn save(&self, object: &str, status: &ObjectStatus) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.status_path(object);
        let tmp = self.tmp_path(object);

        let content = serde_json::to_string_pretty(status)?;
        fs::write(&tmp, content).await?;

        if path.exists() {
            fs::copy(&path, self.backup_path(object)).await?;
        }
        fs::rename(&tmp, &path).await?;

        tracing::debug!(object, phase = %status.phase, "Saved status");
        Ok(())
    }

    /// Forget an object once it is fully deleted
    pub async fn remove(&self, object: &str) -> Result<()> {
        for path in [
            self.status_path(object),
            self.backup_path(object),
            self.tmp_path(object),
        ] {
            if path.exists() {
                fs::remove_file(&path).await?;
            }
        }
        tracing::debug!(object, "Removed status");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PendingOperation;
    use crate::error::CloudError;
    use crate::operation::OperationKind;
    use std::time::Duration;
    use tempfile::tempdir;

    fn record(service: &str, resource: &str, kind: OperationKind, token: &str) -> Operation {
        Operation::new(
            &OperationKey::new(service, resource),
            "my-rg",
            kind,
            &PendingOperation::new(token),
        )
    }

    #[tokio::test]
    async fn test_status_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        let mut status = ObjectStatus::new();
        status.set_operation(record("vnet", "my-vnet", OperationKind::Create, "tok-1"));
        status.set_failure_domain("1", FailureDomainSpec { control_plane: true });
        status.set_condition(Condition::ready("VNetReady"));

        store.save("my-cluster", &status).await.unwrap();

        let loaded = store.load("my-cluster").await.unwrap();
        assert_eq!(loaded.long_running_operations.len(), 1);
        assert_eq!(loaded.long_running_operations[0].token, "tok-1");
        assert!(loaded.failure_domains["1"].control_plane);
        assert!(loaded.condition("VNetReady").unwrap().is_true());
    }

    #[tokio::test]
    async fn test_empty_status() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        let status = store.load("missing").await.unwrap();
        assert!(status.long_running_operations.is_empty());
        assert_eq!(status.phase, ObjectPhase::Provisioning);
    }

    #[tokio::test]
    async fn test_save_keeps_backup_and_remove_clears_both() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        store.save("c", &ObjectStatus::new()).await.unwrap();
        store.save("c", &ObjectStatus::new()).await.unwrap();
        assert!(temp_dir.path().join("c.json").exists());
        assert!(temp_dir.path().join("c.json.backup").exists());

        store.remove("c").await.unwrap();
        assert!(!temp_dir.path().join("c.json").exists());
        assert!(!temp_dir.path().join("c.json.backup").exists());
    }

    #[tokio::test]
    async fn test_load_falls_back_to_backup() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        let mut status = ObjectStatus::new();
        status.set_operation(record("vnet", "my-vnet", OperationKind::Create, "tok-1"));
        store.save("c", &status).await.unwrap();
        store.save("c", &status).await.unwrap();

        // crash after the primary file went away
        std::fs::remove_file(temp_dir.path().join("c.json")).unwrap();

        let loaded = store.load("c").await.unwrap();
        assert_eq!(loaded.long_running_operations.len(), 1);
        assert_eq!(loaded.long_running_operations[0].token, "tok-1");
    }

    #[tokio::test]
    async fn test_save_replaces_status_without_leftovers() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        store.save("c", &ObjectStatus::new()).await.unwrap();
        let mut status = ObjectStatus::new();
        status.phase = ObjectPhase::Provisioned;
        store.save("c", &status).await.unwrap();

        assert!(!temp_dir.path().join("c.json.tmp").exists());
        assert_eq!(store.load("c").await.unwrap().phase, ObjectPhase::Provisioned);
    }

    #[tokio::test]
    async fn test_newer_version_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = StatusStore::new(temp_dir.path());

        let mut status = ObjectStatus::new();
        status.version = STATUS_VERSION + 1;
        store.save("c", &status).await.unwrap();

        let result = store.load("c").await;
        assert!(matches!(result, Err(CloudError::StateError(_))));
    }

    #[tokio::test]
    async fn test_put_replaces_record_of_other_kind() {
        let handle = StatusHandle::default();
        let key = OperationKey::new("groups", "my-rg");

        handle.put(record("groups", "my-rg", OperationKind::Create, "put-1")).await;
        handle.put(record("groups", "my-rg", OperationKind::Delete, "del-1")).await;

        let status = handle.snapshot().await;
        assert_eq!(status.long_running_operations.len(), 1);
        let op = handle.get(&key).await.unwrap();
        assert_eq!(op.kind, OperationKind::Delete);
        assert_eq!(op.token, "del-1");

        handle.delete(&key).await;
        assert!(handle.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_service_conditions() {
        let handle = StatusHandle::default();

        handle
            .update_put_status(
                "SubnetsReady",
                &Ok(Progress::InProgress {
                    retry_after: Duration::from_secs(5),
                }),
            )
            .await;
        let status = handle.snapshot().await;
        let condition = status.condition("SubnetsReady").unwrap();
        assert_eq!(condition.reason.as_deref(), Some(CREATING_REASON));
        assert!(!condition.is_true());

        handle
            .update_put_status("SubnetsReady", &Err(CloudError::ApiError("boom".into())))
            .await;
        let status = handle.snapshot().await;
        let condition = status.condition("SubnetsReady").unwrap();
        assert_eq!(condition.reason.as_deref(), Some(FAILED_REASON));
        assert_eq!(condition.message.as_deref(), Some("API error: boom"));

        handle.update_put_status("SubnetsReady", &Ok(Progress::Done)).await;
        assert!(handle.snapshot().await.condition("SubnetsReady").unwrap().is_true());

        handle
            .update_delete_status("SubnetsReady", &Ok(Progress::Done))
            .await;
        let status = handle.snapshot().await;
        assert_eq!(
            status.condition("SubnetsReady").unwrap().reason.as_deref(),
            Some(DELETED_REASON)
        );
    }
}
