//! Disks
//!
//! Disks are created together with the machines that use them, so this
//! service never creates anything. It only removes the cluster's disks when
//! they have to be deleted one by one.

use crate::scope::ClusterScope;
use crate::service::ResourceService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "disks";
pub const CONDITION: &str = "DisksReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u32>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct DiskSpec {
    pub name: String,
    pub resource_group: String,
}

impl ResourceSpec for DiskSpec {
    type Resource = Disk;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, _existing: Option<&Disk>) -> Result<Option<Disk>> {
        Ok(None)
    }
}

pub struct DiskService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<Disk>,
}

impl DiskService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = Disk>>,
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
impl Reconciler for DiskService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    async fn delete(&self) -> Result<Progress> {
        let specs = self.scope.disk_specs().await;
        self.inner.delete_specs(&specs).await
    }
}
