//! Shared plumbing for the per-kind services

use skyfold_cloud::{
    AsyncExecutor, Progress, ResourceClient, ResourceSpec, Result, StatusHandle, Tags,
};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tracing::{info, warn};

/// A remote resource that carries tags
pub trait Tagged {
    fn tags(&self) -> &Tags;
}

/// Runs a list of specs of one kind through the executor.
///
/// Every spec is visited even after one fails or is still in flight; the
/// reported outcome is the most significant one (error, then in progress,
/// then done) and is recorded as the service's condition.
pub struct ResourceService<R> {
    condition: &'static str,
    executor: AsyncExecutor<R>,
    status: StatusHandle,
}

impl<R: Send + Sync> ResourceService<R> {
    pub fn new(
        name: &str,
        condition: &'static str,
        client: Arc<dyn ResourceClient<Resource = R>>,
        status: StatusHandle,
        config: &EngineConfig,
    ) -> Self {
        let executor = AsyncExecutor::new(name, client, Arc::new(status.clone()), config);
        Self {
            condition,
            executor,
            status,
        }
    }

    pub fn name(&self) -> &str {
        self.executor.service()
    }

    pub fn executor(&self) -> &AsyncExecutor<R> {
        &self.executor
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    pub async fn reconcile_specs<S>(&self, specs: &[S]) -> Result<Progress>
    where
        S: ResourceSpec<Resource = R>,
    {
        if specs.is_empty() {
            return Ok(Progress::Done);
        }

        let mut outcome = Ok(Progress::Done);
        for spec in specs {
            let result = self.executor.create_or_update(spec).await;
            if let Err(e) = &result {
                warn!(
                    service = self.name(),
                    resource = spec.resource_name(),
                    error = %e,
                    "Failed to reconcile resource"
                );
            }
            outcome = most_significant(outcome, result);
        }

        self.status.update_put_status(self.condition, &outcome).await;
        outcome
    }

    pub async fn delete_specs<S>(&self, specs: &[S]) -> Result<Progress>
    where
        S: ResourceSpec<Resource = R>,
    {
        if specs.is_empty() {
            return Ok(Progress::Done);
        }

        let mut outcome = Ok(Progress::Done);
        for spec in specs {
            outcome = most_significant(outcome, self.delete_one(spec).await);
        }

        self.status.update_delete_status(self.condition, &outcome).await;
        outcome
    }

    /// Like [`Self::delete_specs`], but resources that exist without the
    /// ownership tag of `cluster` are left in place. A resource that is
    /// already gone counts as deleted.
    pub async fn delete_owned_specs<S>(&self, specs: &[S], cluster: &str) -> Result<Progress>
    where
        S: ResourceSpec<Resource = R>,
        R: Tagged,
    {
        if specs.is_empty() {
            return Ok(Progress::Done);
        }

        let mut outcome = Ok(Progress::Done);
        for spec in specs {
            let result = match self.executor.get(spec).await {
                Ok(Some(resource)) if !resource.tags().has_owned(cluster) => {
                    info!(
                        service = self.name(),
                        resource = spec.resource_name(),
                        cluster,
                        "Resource is not owned by this cluster, not deleting it"
                    );
                    Ok(Progress::Done)
                }
                Ok(_) => self.delete_one(spec).await,
                Err(e) => {
                    warn!(
                        service = self.name(),
                        resource = spec.resource_name(),
                        error = %e,
                        "Failed to look up resource before delete"
                    );
                    Err(e)
                }
            };
            outcome = most_significant(outcome, result);
        }

        self.status.update_delete_status(self.condition, &outcome).await;
        outcome
    }

    async fn delete_one<S>(&self, spec: &S) -> Result<Progress>
    where
        S: ResourceSpec<Resource = R>,
    {
        let result = self.executor.delete(spec).await;
        if let Err(e) = &result {
            warn!(
                service = self.name(),
                resource = spec.resource_name(),
                error = %e,
                "Failed to delete resource"
            );
        }
        result
    }
}

/// The first error wins; otherwise in-progress wins over done
fn most_significant(current: Result<Progress>, next: Result<Progress>) -> Result<Progress> {
    match (current, next) {
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        (Ok(a), Ok(b)) => Ok(a.combine(b)),
    }
}
