//! Network security groups

use crate::api::SecurityRule;
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

pub const SERVICE_NAME: &str = "securitygroups";
pub const CONDITION: &str = "SecurityGroupsReady";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSecurityGroup {
    pub location: String,
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub rules: Vec<SecurityRule>,
    pub tags: BuildParams,
}

impl ResourceSpec for SecurityGroupSpec {
    type Resource = NetworkSecurityGroup;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    /// Desired rules are added or corrected by name; rules added out of band
    /// stay in place.
    fn parameters(
        &self,
        existing: Option<&NetworkSecurityGroup>,
    ) -> Result<Option<NetworkSecurityGroup>> {
        let Some(existing) = existing else {
            return Ok(Some(NetworkSecurityGroup {
                location: self.location.clone(),
                security_rules: self.rules.clone(),
                tags: tags::build(&self.tags),
            }));
        };

        let mut rules = existing.security_rules.clone();
        let mut changed = false;
        for rule in &self.rules {
            match rules.iter_mut().find(|r| r.name == rule.name) {
                Some(current) if current == rule => {}
                Some(current) => {
                    *current = rule.clone();
                    changed = true;
                }
                None => {
                    rules.push(rule.clone());
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(None);
        }
        Ok(Some(NetworkSecurityGroup {
            location: existing.location.clone(),
            security_rules: rules,
            tags: existing.tags.clone(),
        }))
    }
}

pub struct SecurityGroupService {
    scope: Arc<ClusterScope>,
    vnet: Arc<VirtualNetworkService>,
    inner: ResourceService<NetworkSecurityGroup>,
}

impl SecurityGroupService {
    pub fn new(
        scope: Arc<ClusterScope>,
        vnet: Arc<VirtualNetworkService>,
        client: Arc<dyn ResourceClient<Resource = NetworkSecurityGroup>>,
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
impl Reconciler for SecurityGroupService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.security_group_specs().await;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        if !self.vnet.is_managed().await? {
            info!("Virtual network is not managed, skipping security group delete");
            return Ok(Progress::Done);
        }
        let specs = self.scope.security_group_specs().await;
        self.inner.delete_specs(&specs).await
    }
}
