//! Subnets of the cluster's virtual network

use crate::scope::ClusterScope;
use crate::service::ResourceService;
use crate::virtual_networks::VirtualNetworkService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tracing::info;

pub const SERVICE_NAME: &str = "subnets";
pub const CONDITION: &str = "SubnetsReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub address_prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubnetSpec {
    pub name: String,
    pub resource_group: String,
    pub vnet_name: String,
    pub cidr_blocks: Vec<String>,
    pub security_group: Option<String>,
    pub route_table: Option<String>,
    pub nat_gateway: Option<String>,
}

impl SubnetSpec {
    fn desired(&self) -> Subnet {
        Subnet {
            address_prefixes: self.cidr_blocks.clone(),
            security_group: self.security_group.clone(),
            route_table: self.route_table.clone(),
            nat_gateway: self.nat_gateway.clone(),
        }
    }
}

impl ResourceSpec for SubnetSpec {
    type Resource = Subnet;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn owner_resource_name(&self) -> Option<&str> {
        Some(&self.vnet_name)
    }

    fn parameters(&self, existing: Option<&Subnet>) -> Result<Option<Subnet>> {
        let desired = self.desired();
        match existing {
            Some(existing) if *existing == desired => Ok(None),
            _ => Ok(Some(desired)),
        }
    }
}

pub struct SubnetService {
    scope: Arc<ClusterScope>,
    vnet: Arc<VirtualNetworkService>,
    inner: ResourceService<Subnet>,
}

impl SubnetService {
    pub fn new(
        scope: Arc<ClusterScope>,
        vnet: Arc<VirtualNetworkService>,
        client: Arc<dyn ResourceClient<Resource = Subnet>>,
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
impl Reconciler for SubnetService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.subnet_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        if !self.vnet.is_managed().await? {
            info!("Virtual network is not managed, skipping subnet delete");
            return Ok(Progress::Done);
        }
        let specs = self.scope.subnet_specs().await;
        self.inner.delete_specs(&specs).await
    }
}
