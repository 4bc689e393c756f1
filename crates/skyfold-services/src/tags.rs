//! Ownership tag reconciliation
//!
//! Runs after every other service on create. Tags are read and written by
//! resource scope through the tag API, independent of the resource kind.
//! The resource group scope is the ownership gate: if the cluster does not
//! own the group, nothing is tagged and the pass reports `NotOwned`.

use crate::scope::ClusterScope;
use async_trait::async_trait;
use skyfold_cloud::orchestrator::not_owned;
use skyfold_cloud::state::{Condition, FAILED_REASON, NOT_OWNED_REASON};
use skyfold_cloud::tags::tag_parameters;
use skyfold_cloud::{CloudError, Progress, Reconciler, Result, Tags, TagsClient};
use skyfold_config::EngineConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "tags";
pub const CONDITION: &str = "TagsReady";

/// Tags wanted on one resource scope
#[derive(Debug, Clone)]
pub struct TagsSpec {
    /// Resource id the tags live on
    pub scope: String,
    pub managed: Tags,
    pub declared: Tags,
    /// An unowned or missing resource at this scope fails the pass with `NotOwned`
    pub ownership_gate: bool,
}

pub struct TagsService {
    scope: Arc<ClusterScope>,
    client: Arc<dyn TagsClient>,
    call_timeout: Duration,
}

impl TagsService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn TagsClient>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            scope,
            client,
            call_timeout: config.call_timeout(),
        }
    }

    async fn call<T>(&self, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| {
                CloudError::Timeout(format!(
                    "{} did not answer within {:?}",
                    what, self.call_timeout
                ))
            })?
    }

    async fn reconcile_scope(&self, spec: &TagsSpec) -> Result<()> {
        let cluster = self.scope.cluster_name();
        let existing = self
            .call("get tags", self.client.get_at_scope(&spec.scope))
            .await?;

        let Some(existing) = existing else {
            if spec.ownership_gate {
                return Err(CloudError::ResourceNotFound(spec.scope.clone()));
            }
            debug!(scope = %spec.scope, "Resource not found, skipping tags");
            return Ok(());
        };

        if !existing.has_owned(cluster) {
            if spec.ownership_gate {
                return Err(not_owned(&spec.scope));
            }
            debug!(scope = %spec.scope, "Resource not owned, skipping tags");
            return Ok(());
        }

        let Some(tags) = tag_parameters(&spec.managed, &spec.declared, &existing, cluster) else {
            debug!(scope = %spec.scope, "Tags up to date");
            return Ok(());
        };

        info!(scope = %spec.scope, count = tags.len(), "Updating tags");
        self.call("update tags", self.client.update_at_scope(&spec.scope, tags))
            .await
    }
}

#[async_trait]
impl Reconciler for TagsService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let mut outcome = Ok(());
        for spec in self.scope.tag_specs().await {
            if let Err(e) = self.reconcile_scope(&spec).await {
                outcome = Err(e);
                break;
            }
        }

        let condition = match &outcome {
            Ok(()) => Condition::ready(CONDITION),
            Err(e) if e.is_not_owned() => {
                Condition::not_ready(CONDITION, NOT_OWNED_REASON, Some(e.to_string()))
            }
            Err(e) => Condition::not_ready(CONDITION, FAILED_REASON, Some(e.to_string())),
        };
        self.scope
            .status()
            .update(|status| status.set_condition(condition))
            .await;

        outcome.map(|()| Progress::Done)
    }

    /// Tags go away with their resources
    async fn delete(&self) -> Result<Progress> {
        Ok(Progress::Done)
    }
}
