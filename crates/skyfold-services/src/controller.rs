//! Cluster controller
//!
//! One call to [`ClusterController::reconcile`] or [`ClusterController::delete`]
//! is one pass: status is loaded from disk, the services run until they finish
//! or hit an in-flight operation, and the status is saved again whatever the
//! outcome. A pass whose status cannot be saved fails. Callers invoke the
//! controller again after `requeue_after`.

use crate::api::ClusterSpec;
use crate::clients::CloudClients;
use crate::cluster::ClusterService;
use crate::scope::ClusterScope;
use skyfold_cloud::{
    CapabilityCache, CloudError, DeleteOutcome, ObjectPhase, ObjectStatus, ReconcileOutcome,
    Result, StatusHandle, StatusStore,
};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// When the caller should run the next pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

pub struct ClusterController {
    store: StatusStore,
    clients: CloudClients,
    capabilities: Arc<CapabilityCache>,
    config: EngineConfig,
}

impl ClusterController {
    pub fn new(
        clients: CloudClients,
        capabilities: Arc<CapabilityCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store: StatusStore::new(&config.state_dir),
            clients,
            capabilities,
            config,
        }
    }

    /// Persisted status of a cluster, fresh if none was saved
    pub async fn status(&self, cluster: &str) -> Result<ObjectStatus> {
        self.store.load(cluster).await
    }

    async fn service(&self, spec: ClusterSpec) -> Result<ClusterService> {
        let status = self.store.load(&spec.name).await?;
        let scope = Arc::new(ClusterScope::new(spec, StatusHandle::new(status)));
        Ok(ClusterService::new(
            scope,
            &self.clients,
            self.capabilities.clone(),
            &self.config,
        ))
    }

    /// Run one create/update pass for `spec`
    pub async fn reconcile(&self, spec: ClusterSpec) -> Result<ReconcileResult> {
        let cluster = spec.name.clone();
        if let Err(e) = spec.validate() {
            // a name that cannot be a file name gets no status
            if spec.validate_name().is_ok() {
                let mut status = self.store.load(&cluster).await?;
                record_failure(&mut status, &e);
                let saved = self.store.save(&cluster, &status).await;
                return settle(Err(e), saved, &cluster);
            }
            return Err(e);
        }

        let service = self.service(spec).await?;
        let status = service.scope().status().clone();

        let outcome = service.reconcile().await;
        status
            .update(|status| match &outcome {
                Ok(ReconcileOutcome::Ready) | Ok(ReconcileOutcome::NotOwned) => {
                    status.phase = ObjectPhase::Provisioned;
                    status.ready = true;
                    status.failure_message = None;
                }
                Ok(ReconcileOutcome::InProgress { .. }) => {
                    status.phase = ObjectPhase::Provisioning;
                    status.ready = false;
                    status.failure_message = None;
                }
                Err(e) => record_failure(status, e),
            })
            .await;
        let saved = self.save(&cluster, &status).await;

        match settle(outcome, saved, &cluster)? {
            ReconcileOutcome::Ready => {
                info!(cluster = %cluster, "Cluster ready");
                Ok(ReconcileResult::done())
            }
            ReconcileOutcome::NotOwned => {
                info!(cluster = %cluster, "Cluster ready in a resource group it does not own");
                Ok(ReconcileResult::done())
            }
            ReconcileOutcome::InProgress {
                service,
                retry_after,
            } => {
                info!(
                    cluster = %cluster,
                    service = %service,
                    ?retry_after,
                    "Cluster still provisioning"
                );
                Ok(ReconcileResult::requeue(retry_after))
            }
        }
    }

    /// Run one delete pass for `spec`. The status file is removed once
    /// everything is gone.
    pub async fn delete(&self, spec: ClusterSpec) -> Result<ReconcileResult> {
        spec.validate()?;
        let cluster = spec.name.clone();
        let service = self.service(spec).await?;
        let status = service.scope().status().clone();
        status
            .update(|status| {
                status.phase = ObjectPhase::Deleting;
                status.ready = false;
            })
            .await;

        match service.delete().await {
            Ok(DeleteOutcome::Deleted) => {
                info!(cluster = %cluster, "Cluster deleted");
                self.store.remove(&cluster).await?;
                Ok(ReconcileResult::done())
            }
            Ok(DeleteOutcome::InProgress {
                service,
                retry_after,
            }) => {
                info!(
                    cluster = %cluster,
                    service = %service,
                    ?retry_after,
                    "Cluster still deleting"
                );
                let saved = self.save(&cluster, &status).await;
                settle(Ok(ReconcileResult::requeue(retry_after)), saved, &cluster)
            }
            Err(e) => {
                status.update(|status| record_failure(status, &e)).await;
                let saved = self.save(&cluster, &status).await;
                settle(Err(e), saved, &cluster)
            }
        }
    }

    async fn save(&self, cluster: &str, status: &StatusHandle) -> Result<()> {
        let snapshot = status.snapshot().await;
        self.store.save(cluster, &snapshot).await
    }
}

/// Combine a pass outcome with the status save that followed it. A failed
/// pass reports its own error and only logs the save error.
fn settle<T>(outcome: Result<T>, saved: Result<()>, cluster: &str) -> Result<T> {
    match (outcome, saved) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(save_err)) => {
            error!(cluster, error = %save_err, "Failed to save cluster status");
            Err(save_err)
        }
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(save_err)) => {
            error!(cluster, error = %save_err, "Failed to save cluster status");
            Err(e)
        }
    }
}

/// Transient errors leave the phase alone so the next pass simply retries
fn record_failure(status: &mut ObjectStatus, e: &CloudError) {
    if e.is_transient() {
        warn!(error = %e, "Transient failure, will retry");
        return;
    }
    error!(error = %e, "Cluster pass failed");
    status.phase = ObjectPhase::Failed;
    status.ready = false;
    status.failure_message = Some(e.to_string());
}
