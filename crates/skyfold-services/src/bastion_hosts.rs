//! Optional bastion host for SSH access to machines

use crate::scope::ClusterScope;
use crate::service::{ResourceService, Tagged};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags};
use skyfold_config::EngineConfig;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "bastionhosts";
pub const CONDITION: &str = "BastionHostReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BastionHost {
    pub location: String,
    /// `<vnet>/<subnet>`
    pub subnet: String,
    pub public_ip: String,
    #[serde(default)]
    pub tags: Tags,
}

impl Tagged for BastionHost {
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

#[derive(Debug, Clone)]
pub struct BastionSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vnet_name: String,
    pub subnet_name: String,
    pub public_ip: String,
    pub tags: BuildParams,
}

impl ResourceSpec for BastionSpec {
    type Resource = BastionHost;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&BastionHost>) -> Result<Option<BastionHost>> {
        if existing.is_some() {
            return Ok(None);
        }
        Ok(Some(BastionHost {
            location: self.location.clone(),
            subnet: format!("{}/{}", self.vnet_name, self.subnet_name),
            public_ip: self.public_ip.clone(),
            tags: tags::build(&self.tags),
        }))
    }
}

pub struct BastionService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<BastionHost>,
}

impl BastionService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = BastionHost>>,
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
impl Reconciler for BastionService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.bastion_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        let specs = self.scope.bastion_specs().await;
        self.inner
            .delete_owned_specs(&specs, self.scope.cluster_name())
            .await
    }
}
