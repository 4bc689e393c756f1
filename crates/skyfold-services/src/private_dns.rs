//! Private DNS zone of private clusters
//!
//! The zone is linked to the cluster's virtual network and carries the API
//! server record, so machines resolve the internal load balancer by name.

use crate::scope::ClusterScope;
use crate::service::{ResourceService, Tagged};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "privatedns";
pub const CONDITION: &str = "PrivateDNSReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VnetLink {
    pub name: String,
    pub virtual_network: String,
    pub registration_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ARecord {
    pub hostname: String,
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateDnsZone {
    #[serde(default)]
    pub links: Vec<VnetLink>,
    #[serde(default)]
    pub records: Vec<ARecord>,
    #[serde(default)]
    pub tags: Tags,
}

impl Tagged for PrivateDnsZone {
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

#[derive(Debug, Clone)]
pub struct PrivateDnsSpec {
    pub zone_name: String,
    pub resource_group: String,
    pub links: Vec<VnetLink>,
    pub records: Vec<ARecord>,
    pub tags: BuildParams,
}

impl ResourceSpec for PrivateDnsSpec {
    type Resource = PrivateDnsZone;

    fn resource_name(&self) -> &str {
        &self.zone_name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&PrivateDnsZone>) -> Result<Option<PrivateDnsZone>> {
        let Some(existing) = existing else {
            return Ok(Some(PrivateDnsZone {
                links: self.links.clone(),
                records: self.records.clone(),
                tags: tags::build(&self.tags),
            }));
        };

        let missing_links: Vec<_> = self
            .links
            .iter()
            .filter(|link| !existing.links.iter().any(|l| l.name == link.name))
            .cloned()
            .collect();
        let missing_records: Vec<_> = self
            .records
            .iter()
            .filter(|record| !existing.records.contains(record))
            .cloned()
            .collect();

        if missing_links.is_empty() && missing_records.is_empty() {
            return Ok(None);
        }

        let mut zone = existing.clone();
        zone.links.extend(missing_links);
        zone.records.extend(missing_records);
        Ok(Some(zone))
    }
}

pub struct PrivateDnsService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<PrivateDnsZone>,
}

impl PrivateDnsService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = PrivateDnsZone>>,
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
impl Reconciler for PrivateDnsService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.private_dns_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        let specs = self.scope.private_dns_specs().await;
        self.inner
            .delete_owned_specs(&specs, self.scope.cluster_name())
            .await
    }
}
