//! Dependency-ordered reconcile and delete over a fixed list of services
//!
//! Creation runs the ownership resource (the resource group) first, then every
//! dependent in declaration order, then the tag pass. Deletion tries the
//! ownership resource alone; only when it reports [`CloudError::NotOwned`]
//! are the dependents deleted one by one, in the exact reverse order.

use crate::error::{CloudError, Phase, Result};
use crate::executor::Progress;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A service that converges the resources of one kind.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Service name, used in error context and logs
    fn name(&self) -> &str;

    /// Create or update every resource of this kind
    async fn reconcile(&self) -> Result<Progress>;

    /// Delete every resource of this kind
    async fn delete(&self) -> Result<Progress>;
}

/// Desired-state derivation run before the first service of a create pass
#[async_trait]
pub trait Prepare: Send + Sync {
    async fn prepare(&self) -> Result<()>;
}

/// Result of a successful create pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every service converged and tags were applied
    Ready,
    /// Every service converged; the resource group is not owned, so tags were left alone
    NotOwned,
    /// `service` has an operation in flight; the pass stopped there
    InProgress {
        service: String,
        retry_after: Duration,
    },
}

/// Result of a successful delete pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    InProgress {
        service: String,
        retry_after: Duration,
    },
}

pub struct Orchestrator {
    group: Arc<dyn Reconciler>,
    dependents: Vec<Arc<dyn Reconciler>>,
    tags: Option<Arc<dyn Reconciler>>,
    prepare: Option<Arc<dyn Prepare>>,
}

impl Orchestrator {
    /// `dependents` must be in creation order
    pub fn new(group: Arc<dyn Reconciler>, dependents: Vec<Arc<dyn Reconciler>>) -> Self {
        Self {
            group,
            dependents,
            tags: None,
            prepare: None,
        }
    }

    pub fn with_tags(mut self, tags: Arc<dyn Reconciler>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn with_prepare(mut self, prepare: Arc<dyn Prepare>) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// Service names in creation order, ownership resource first
    pub fn creation_order(&self) -> Vec<&str> {
        std::iter::once(self.group.name())
            .chain(self.dependents.iter().map(|s| s.name()))
            .collect()
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        if let Some(prepare) = &self.prepare {
            prepare.prepare().await?;
        }

        let services = std::iter::once(&self.group).chain(self.dependents.iter());
        for service in services {
            debug!(service = service.name(), "Reconciling service");
            let progress = service
                .reconcile()
                .await
                .map_err(|e| e.context(service.name(), Phase::Reconcile))?;
            if let Progress::InProgress { retry_after } = progress {
                info!(service = service.name(), ?retry_after, "Service not ready yet");
                return Ok(ReconcileOutcome::InProgress {
                    service: service.name().to_string(),
                    retry_after,
                });
            }
        }

        let Some(tags) = &self.tags else {
            return Ok(ReconcileOutcome::Ready);
        };

        match tags.reconcile().await {
            Ok(Progress::Done) => Ok(ReconcileOutcome::Ready),
            Ok(Progress::InProgress { retry_after }) => Ok(ReconcileOutcome::InProgress {
                service: tags.name().to_string(),
                retry_after,
            }),
            Err(e) if e.is_not_owned() => {
                warn!(error = %e, "Resource group is not owned, skipping tag reconciliation");
                Ok(ReconcileOutcome::NotOwned)
            }
            Err(e) => Err(e.context(tags.name(), Phase::Reconcile)),
        }
    }

    pub async fn delete(&self) -> Result<DeleteOutcome> {
        match self.group.delete().await {
            Ok(Progress::Done) => {
                info!(
                    service = self.group.name(),
                    "Resource group deleted, nested resources go with it"
                );
                return Ok(DeleteOutcome::Deleted);
            }
            Ok(Progress::InProgress { retry_after }) => {
                return Ok(DeleteOutcome::InProgress {
                    service: self.group.name().to_string(),
                    retry_after,
                });
            }
            Err(e) if e.is_not_owned() => {
                info!(
                    service = self.group.name(),
                    "Resource group is not owned, deleting owned resources individually"
                );
            }
            Err(e) => return Err(e.context(self.group.name(), Phase::Delete)),
        }

        for service in self.dependents.iter().rev() {
            debug!(service = service.name(), "Deleting service");
            let progress = service
                .delete()
                .await
                .map_err(|e| e.context(service.name(), Phase::Delete))?;
            if let Progress::InProgress { retry_after } = progress {
                return Ok(DeleteOutcome::InProgress {
                    service: service.name().to_string(),
                    retry_after,
                });
            }
        }

        Ok(DeleteOutcome::Deleted)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("order", &self.creation_order())
            .field("tags", &self.tags.as_ref().map(|t| t.name()))
            .finish()
    }
}

/// The sentinel a group service returns for a resource group it does not own
pub fn not_owned(resource: impl Into<String>) -> CloudError {
    CloudError::NotOwned {
        resource: resource.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallLog, RecordingReconciler};
    use tokio_test::assert_err;

    const DEPENDENTS: [&str; 9] = [
        "vnet",
        "securitygroups",
        "routetables",
        "publicips",
        "natgateways",
        "subnets",
        "loadbalancers",
        "privatedns",
        "bastionhosts",
    ];

    struct Fixture {
        log: CallLog,
        group: Arc<RecordingReconciler>,
        dependents: Vec<Arc<RecordingReconciler>>,
        tags: Arc<RecordingReconciler>,
        orchestrator: Orchestrator,
    }

    fn fixture() -> Fixture {
        let log = CallLog::default();
        let group = Arc::new(RecordingReconciler::new("group", log.clone()));
        let dependents: Vec<_> = DEPENDENTS
            .iter()
            .map(|name| Arc::new(RecordingReconciler::new(*name, log.clone())))
            .collect();
        let tags = Arc::new(RecordingReconciler::new("tags", log.clone()));
        let orchestrator = Orchestrator::new(
            group.clone(),
            dependents
                .iter()
                .map(|d| d.clone() as Arc<dyn Reconciler>)
                .collect(),
        )
        .with_tags(tags.clone());
        Fixture {
            log,
            group,
            dependents,
            tags,
            orchestrator,
        }
    }

    fn not_owned_group() -> CloudError {
        not_owned("my-rg")
    }

    #[tokio::test]
    async fn test_create_runs_in_order_then_tags() {
        let f = fixture();

        let outcome = f.orchestrator.reconcile().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Ready);

        let mut expected = vec!["reconcile:group".to_string()];
        expected.extend(DEPENDENTS.iter().map(|d| format!("reconcile:{}", d)));
        expected.push("reconcile:tags".to_string());
        assert_eq!(f.log.entries(), expected);
    }

    #[tokio::test]
    async fn test_create_stops_at_first_error_with_context() {
        let f = fixture();
        f.dependents[5].script_reconcile(Err(CloudError::InvalidConfig("bad cidr".into())));

        let err = assert_err!(f.orchestrator.reconcile().await);
        assert_eq!(err.to_string(), "failed to reconcile subnets: Invalid configuration: bad cidr");
        assert_eq!(f.log.entries().last().map(String::as_str), Some("reconcile:subnets"));
        assert_eq!(f.dependents[6].calls(), 0);
        assert_eq!(f.tags.calls(), 0);
    }

    #[tokio::test]
    async fn test_create_stops_at_in_progress() {
        let f = fixture();
        f.dependents[0].script_reconcile(Ok(Progress::InProgress {
            retry_after: Duration::from_secs(15),
        }));

        let outcome = f.orchestrator.reconcile().await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::InProgress {
                service: "vnet".to_string(),
                retry_after: Duration::from_secs(15),
            }
        );
        assert_eq!(f.log.entries(), vec!["reconcile:group", "reconcile:vnet"]);
    }

    #[tokio::test]
    async fn test_not_owned_group_skips_tags_without_failing() {
        let f = fixture();
        f.tags.script_reconcile(Err(not_owned_group()));

        let outcome = f.orchestrator.reconcile().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::NotOwned);
        assert!(f.dependents.iter().all(|d| d.calls() == 1));
    }

    #[tokio::test]
    async fn test_owned_group_delete_touches_nothing_else() {
        let f = fixture();

        let outcome = f.orchestrator.delete().await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);
        assert_eq!(f.log.entries(), vec!["delete:group"]);
    }

    #[tokio::test]
    async fn test_not_owned_group_deletes_dependents_in_reverse() {
        let f = fixture();
        f.orchestrator.reconcile().await.unwrap();
        let created: Vec<String> = f
            .log
            .take()
            .into_iter()
            .filter_map(|e| e.strip_prefix("reconcile:").map(str::to_string))
            .filter(|name| name != "group" && name != "tags")
            .collect();

        f.group.script_delete(Err(not_owned_group()));
        let outcome = f.orchestrator.delete().await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted);

        let entries = f.log.entries();
        assert_eq!(entries[0], "delete:group");
        let mut deleted: Vec<String> = entries[1..]
            .iter()
            .filter_map(|e| e.strip_prefix("delete:").map(str::to_string))
            .collect();
        deleted.reverse();
        assert_eq!(deleted, created);
    }

    #[tokio::test]
    async fn test_other_group_delete_error_is_fatal() {
        let f = fixture();
        f.group
            .script_delete(Err(CloudError::ApiError("503 Service Unavailable".into())));

        let err = assert_err!(f.orchestrator.delete().await);
        assert!(err.is_transient());
        assert!(!err.is_not_owned());
        assert_eq!(f.log.entries(), vec!["delete:group"]);
    }

    #[tokio::test]
    async fn test_dependent_delete_in_progress_stops_pass() {
        let f = fixture();
        f.group.script_delete(Err(not_owned_group()));
        f.dependents[7].script_delete(Ok(Progress::InProgress {
            retry_after: Duration::from_secs(10),
        }));

        let outcome = f.orchestrator.delete().await.unwrap();
        assert_eq!(
            outcome,
            DeleteOutcome::InProgress {
                service: "privatedns".to_string(),
                retry_after: Duration::from_secs(10),
            }
        );
        assert_eq!(
            f.log.entries(),
            vec!["delete:group", "delete:bastionhosts", "delete:privatedns"]
        );
    }

    #[tokio::test]
    async fn test_dependent_delete_error_keeps_not_owned_out() {
        let f = fixture();
        f.group.script_delete(Err(not_owned_group()));
        f.dependents[2].script_delete(Err(CloudError::OperationFailed {
            service: "routetables".into(),
            resource: "my-rg/node-rt".into(),
            message: "in use".into(),
        }));

        let err = assert_err!(f.orchestrator.delete().await);
        assert!(!err.is_not_owned());
        assert!(err.to_string().starts_with("failed to delete routetables"));
        assert_eq!(f.dependents[1].calls(), 0);
    }

    struct FailingPrepare;

    #[async_trait]
    impl Prepare for FailingPrepare {
        async fn prepare(&self) -> Result<()> {
            Err(CloudError::ApiError("sku listing unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_prepare_failure_aborts_before_first_service() {
        let f = fixture();
        let orchestrator = f.orchestrator.with_prepare(Arc::new(FailingPrepare));

        assert_err!(orchestrator.reconcile().await);
        assert!(f.log.entries().is_empty());
    }

    #[test]
    fn test_creation_order() {
        let f = fixture();
        let order = f.orchestrator.creation_order();
        assert_eq!(order[0], "group");
        assert_eq!(&order[1..], &DEPENDENTS[..]);
    }
}
