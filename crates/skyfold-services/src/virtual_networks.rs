//! Virtual networks
//!
//! A cluster may run in a pre-existing virtual network. Such a network is
//! used as-is and is never updated or deleted, and neither are the security
//! groups, route tables, and subnets inside it.

use crate::scope::ClusterScope;
use crate::service::ResourceService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{CloudError, Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "virtualnetwork";
pub const CONDITION: &str = "VNetReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub location: String,
    pub address_space: Vec<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct VirtualNetworkSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cidr_blocks: Vec<String>,
    pub tags: BuildParams,
}

impl ResourceSpec for VirtualNetworkSpec {
    type Resource = VirtualNetwork;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&VirtualNetwork>) -> Result<Option<VirtualNetwork>> {
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(VirtualNetwork {
            location: self.location.clone(),
            address_space: self.cidr_blocks.clone(),
            tags: tags::build(&self.tags),
        }))
    }
}

pub struct VirtualNetworkService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<VirtualNetwork>,
    managed: OnceCell<bool>,
}

impl VirtualNetworkService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = VirtualNetwork>>,
        config: &EngineConfig,
    ) -> Self {
        let inner = ResourceService::new(
            SERVICE_NAME,
            CONDITION,
            client,
            scope.status().clone(),
            config,
        );
        Self {
            scope,
            inner,
            managed: OnceCell::new(),
        }
    }

    /// Whether this cluster owns the virtual network.
    ///
    /// A network that does not exist yet will be created by the cluster and
    /// counts as managed. Looked up once per service instance.
    pub async fn is_managed(&self) -> Result<bool> {
        self.managed
            .get_or_try_init(|| async {
                let spec = self.scope.vnet_spec().await;
                let managed = match self.inner.executor().get(&spec).await? {
                    Some(vnet) => vnet.tags.has_owned(self.scope.cluster_name()),
                    None => true,
                };
                debug!(vnet = %spec.name, managed, "Resolved virtual network ownership");
                Ok::<_, CloudError>(managed)
            })
            .await
            .copied()
    }
}

#[async_trait]
impl Reconciler for VirtualNetworkService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let spec = self.scope.vnet_spec().await;
        self.inner.reconcile_specs(&[spec]).await
    }

    async fn delete(&self) -> Result<Progress> {
        let spec = self.scope.vnet_spec().await;
        if !self.is_managed().await? {
            info!(
                vnet = %spec.name,
                resource_group = %spec.resource_group,
                "Virtual network is not managed by this cluster, skipping delete"
            );
            return Ok(Progress::Done);
        }
        self.inner.delete_specs(&[spec]).await
    }
}
