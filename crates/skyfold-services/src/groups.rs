//! Resource groups
//!
//! The resource group is the ownership boundary of a cluster. Deleting an
//! owned group removes everything inside it; a group the cluster does not own
//! is never deleted, and its delete reports `CloudError::NotOwned` so the
//! orchestrator falls back to deleting resources one by one.

use crate::scope::ClusterScope;
use crate::service::ResourceService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::orchestrator::not_owned;
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tracing::info;

pub const SERVICE_NAME: &str = "group";
pub const CONDITION: &str = "ResourceGroupReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub location: String,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: String,
    pub location: String,
    pub tags: BuildParams,
}

impl ResourceSpec for GroupSpec {
    type Resource = ResourceGroup;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.name
    }

    fn parameters(&self, existing: Option<&ResourceGroup>) -> Result<Option<ResourceGroup>> {
        let Some(existing) = existing else {
            return Ok(Some(ResourceGroup {
                location: self.location.clone(),
                tags: tags::build(&self.tags),
            }));
        };

        let managed = tags::managed_tags(&self.tags);
        Ok(tags::tag_parameters(
            &managed,
            &self.tags.additional,
            &existing.tags,
            &self.tags.cluster_name,
        )
        .map(|tags| ResourceGroup {
            location: existing.location.clone(),
            tags,
        }))
    }
}

pub struct GroupService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<ResourceGroup>,
}

impl GroupService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = ResourceGroup>>,
        config: &EngineConfig,
    ) -> Self {
        let inner = ResourceService::new(
            SERVICE_NAME,
            CONDITION,
            client,
            scope.status().clone(),
            config,
        );
        Self { scope, inner }
    }
}

#[async_trait]
impl Reconciler for GroupService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let spec = self.scope.group_spec().await;
        self.inner.reconcile_specs(&[spec]).await
    }

    async fn delete(&self) -> Result<Progress> {
        let spec = self.scope.group_spec().await;

        let owned = match self.inner.executor().get(&spec).await? {
            Some(group) => group.tags.has_owned(self.scope.cluster_name()),
            // nothing left to protect; lets an in-flight delete finish
            None => true,
        };
        if !owned {
            info!(
                resource_group = %spec.name,
                "Resource group is not owned by this cluster, not deleting it"
            );
            return Err(not_owned(&spec.name));
        }

        self.inner.delete_specs(&[spec]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use skyfold_cloud::StatusHandle;
    use skyfold_cloud::testing::{FakeResourceClient, RemoteCall};
    use skyfold_cloud::tags::COMMON_ROLE;
    use tokio_test::assert_err;

    fn spec(additional: Tags) -> GroupSpec {
        GroupSpec {
            name: "g".to_string(),
            location: "westeurope".to_string(),
            tags: BuildParams::owned("x")
                .name("g")
                .role(COMMON_ROLE)
                .additional(additional),
        }
    }

    fn managed_tags() -> Tags {
        Tags::new()
            .with("Name", "g")
            .with("skyfold.io_role", "common")
            .with("skyfold.io_cluster_x", "owned")
    }

    #[test]
    fn test_new_group_carries_all_tags() {
        let declared = Tags::new().with("environment", "dev");
        let group = spec(declared).parameters(None).unwrap().unwrap();
        assert_eq!(group.location, "westeurope");
        assert_eq!(group.tags, managed_tags().with("environment", "dev"));
    }

    #[test]
    fn test_existing_group_gains_declared_tag() {
        let existing = ResourceGroup {
            location: "westeurope".to_string(),
            tags: managed_tags(),
        };
        let declared = Tags::new().with("environment", "dev");

        let group = spec(declared).parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(group.tags, managed_tags().with("environment", "dev"));
    }

    #[test]
    fn test_converged_group_is_noop() {
        let existing = ResourceGroup {
            location: "westeurope".to_string(),
            tags: managed_tags().with("environment", "dev"),
        };
        let declared = Tags::new().with("environment", "dev");
        assert_eq!(spec(declared).parameters(Some(&existing)).unwrap(), None);
    }

    #[test]
    fn test_unmanaged_group_is_never_updated() {
        let existing = ResourceGroup {
            location: "westeurope".to_string(),
            tags: Tags::new().with("foo", "bar"),
        };
        let declared = Tags::new().with("environment", "dev");
        assert_eq!(spec(declared).parameters(Some(&existing)).unwrap(), None);
    }

    fn group_service(client: &Arc<FakeResourceClient<ResourceGroup>>) -> GroupService {
        let scope = Arc::new(ClusterScope::new(
            fixtures::cluster_spec(),
            StatusHandle::default(),
        ));
        GroupService::new(scope, client.clone(), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_delete_unowned_group_is_not_owned() {
        let client = Arc::new(FakeResourceClient::<ResourceGroup>::new());
        client.insert(
            "my-rg",
            "my-rg",
            ResourceGroup {
                location: "westeurope".to_string(),
                tags: Tags::new().with("team", "platform"),
            },
        );
        let service = group_service(&client);

        let err = assert_err!(service.delete().await);
        assert!(err.is_not_owned());
        assert_eq!(client.count(|c| matches!(c, RemoteCall::Delete(_))), 0);
        assert!(client.resource("my-rg").is_some());
    }

    #[tokio::test]
    async fn test_delete_owned_group() {
        let client = Arc::new(FakeResourceClient::<ResourceGroup>::new());
        let service = group_service(&client);

        assert_eq!(service.reconcile().await.unwrap(), Progress::Done);
        assert!(client.resource("my-rg").unwrap().tags.has_owned("my-cluster"));

        assert_eq!(service.delete().await.unwrap(), Progress::Done);
        assert!(client.resource("my-rg").is_none());
        // already gone
        assert_eq!(service.delete().await.unwrap(), Progress::Done);
    }
}
