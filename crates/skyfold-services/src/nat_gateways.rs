//! NAT gateways for outbound traffic of node subnets

use crate::scope::ClusterScope;
use crate::service::{ResourceService, Tagged};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tracing::debug;

pub const SERVICE_NAME: &str = "natgateways";
pub const CONDITION: &str = "NATGatewaysReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGateway {
    pub location: String,
    /// Name of the attached public IP
    pub public_ip: String,
    #[serde(default)]
    pub tags: Tags,
}

impl Tagged for NatGateway {
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

#[derive(Debug, Clone)]
pub struct NatGatewaySpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub public_ip: String,
    pub tags: BuildParams,
}

impl ResourceSpec for NatGatewaySpec {
    type Resource = NatGateway;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&NatGateway>) -> Result<Option<NatGateway>> {
        if let Some(existing) = existing {
            if existing.public_ip == self.public_ip {
                return Ok(None);
            }
            debug!(
                nat_gateway = %self.name,
                from = %existing.public_ip,
                to = %self.public_ip,
                "NAT gateway public IP changed"
            );
        }

        Ok(Some(NatGateway {
            location: self.location.clone(),
            public_ip: self.public_ip.clone(),
            tags: tags::build(&self.tags),
        }))
    }
}

pub struct NatGatewayService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<NatGateway>,
}

impl NatGatewayService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = NatGateway>>,
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
impl Reconciler for NatGatewayService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.nat_gateway_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        let specs = self.scope.nat_gateway_specs().await;
        self.inner
            .delete_owned_specs(&specs, self.scope.cluster_name())
            .await
    }
}
