//! Public IP addresses

use crate::scope::ClusterScope;
use crate::service::{ResourceService, Tagged};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "publicips";
pub const CONDITION: &str = "PublicIPsReady";

pub const STANDARD_SKU: &str = "Standard";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationMethod {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpAddress {
    pub location: String,
    pub sku: String,
    pub allocation: AllocationMethod,
    #[serde(default)]
    pub zones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

impl Tagged for PublicIpAddress {
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

#[derive(Debug, Clone)]
pub struct PublicIpSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub dns_name: Option<String>,
    /// Failure domains of the cluster
    pub zones: Vec<String>,
    pub tags: BuildParams,
}

impl ResourceSpec for PublicIpSpec {
    type Resource = PublicIpAddress;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&PublicIpAddress>) -> Result<Option<PublicIpAddress>> {
        if existing.is_some() {
            return Ok(None);
        }

        let dns_label = self
            .dns_name
            .as_deref()
            .and_then(|fqdn| fqdn.split('.').next())
            .map(str::to_string);

        Ok(Some(PublicIpAddress {
            location: self.location.clone(),
            sku: STANDARD_SKU.to_string(),
            allocation: AllocationMethod::Static,
            zones: self.zones.clone(),
            dns_label,
            fqdn: self.dns_name.clone(),
            tags: tags::build(&self.tags),
        }))
    }
}

pub struct PublicIpService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<PublicIpAddress>,
}

impl PublicIpService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = PublicIpAddress>>,
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
impl Reconciler for PublicIpService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.public_ip_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        let specs = self.scope.public_ip_specs().await;
        self.inner
            .delete_owned_specs(&specs, self.scope.cluster_name())
            .await
    }
}
