//! Route tables

use crate::scope::ClusterScope;
use crate::service::ResourceService;
use crate::virtual_networks::VirtualNetworkService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tracing::info;

pub const SERVICE_NAME: &str = "routetables";
pub const CONDITION: &str = "RouteTablesReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub location: String,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct RouteTableSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub tags: BuildParams,
}

impl ResourceSpec for RouteTableSpec {
    type Resource = RouteTable;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&RouteTable>) -> Result<Option<RouteTable>> {
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(RouteTable {
            location: self.location.clone(),
            tags: tags::build(&self.tags),
        }))
    }
}

pub struct RouteTableService {
    scope: Arc<ClusterScope>,
    vnet: Arc<VirtualNetworkService>,
    inner: ResourceService<RouteTable>,
}

impl RouteTableService {
    pub fn new(
        scope: Arc<ClusterScope>,
        vnet: Arc<VirtualNetworkService>,
        client: Arc<dyn ResourceClient<Resource = RouteTable>>,
        config: &EngineConfig,
    ) -> Self {
        let inner = ResourceService::new(
            SERVICE_NAME,
            CONDITION,
            client,
            scope.status().clone(),
            config,
        );
        Self { scope, vnet, inner }
    }
}

#[async_trait]
impl Reconciler for RouteTableService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.route_table_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        if !self.vnet.is_managed().await? {
            info!("Virtual network is not managed, skipping route table delete");
            return Ok(Progress::Done);
        }
        let specs = self.scope.route_table_specs().await;
        self.inner.delete_specs(&specs).await
    }
}
