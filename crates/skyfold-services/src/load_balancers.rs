//! API server load balancer

use crate::api::LoadBalancerType;
use crate::scope::ClusterScope;
use crate::service::{ResourceService, Tagged};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use skyfold_cloud::tags::{self, BuildParams};
use skyfold_cloud::{
    CloudError, Progress, Reconciler, ResourceClient, ResourceSpec, Result, Tags,
};
use skyfold_config::EngineConfig;
use std::sync::Arc;

pub const SERVICE_NAME: &str = "loadbalancers";
pub const CONDITION: &str = "LoadBalancersReady";

const PROBE_NAME: &str = "TCPProbe";
const RULE_NAME: &str = "LBRuleHTTPS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendIpConfiguration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
    /// `<vnet>/<subnet>` for internal load balancers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub name: String,
    pub port: u16,
    pub interval_secs: u32,
    pub number_of_probes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancingRule {
    pub name: String,
    pub frontend_port: u16,
    pub backend_port: u16,
    pub idle_timeout_mins: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub location: String,
    pub sku: String,
    pub frontend: FrontendIpConfiguration,
    pub backend_pool: String,
    pub probe: Probe,
    pub rule: LoadBalancingRule,
    #[serde(default)]
    pub tags: Tags,
}

impl Tagged for LoadBalancer {
    fn tags(&self) -> &Tags {
        &self.tags
    }
}

#[derive(Debug, Clone)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub lb_type: LoadBalancerType,
    pub frontend_name: String,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub vnet_name: String,
    pub subnet_name: String,
    pub port: u16,
    pub tags: BuildParams,
}

impl LoadBalancerSpec {
    fn frontend(&self) -> Result<FrontendIpConfiguration> {
        match self.lb_type {
            LoadBalancerType::Public => {
                let public_ip = self.public_ip.clone().ok_or_else(|| {
                    CloudError::InvalidConfig(format!(
                        "public load balancer {} has no public IP",
                        self.name
                    ))
                })?;
                Ok(FrontendIpConfiguration {
                    name: self.frontend_name.clone(),
                    public_ip: Some(public_ip),
                    private_ip: None,
                    subnet: None,
                })
            }
            LoadBalancerType::Internal => {
                let private_ip = self.private_ip.clone().ok_or_else(|| {
                    CloudError::InvalidConfig(format!(
                        "internal load balancer {} has no private IP",
                        self.name
                    ))
                })?;
                Ok(FrontendIpConfiguration {
                    name: self.frontend_name.clone(),
                    public_ip: None,
                    private_ip: Some(private_ip),
                    subnet: Some(format!("{}/{}", self.vnet_name, self.subnet_name)),
                })
            }
        }
    }
}

impl ResourceSpec for LoadBalancerSpec {
    type Resource = LoadBalancer;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&LoadBalancer>) -> Result<Option<LoadBalancer>> {
        if existing.is_some() {
            return Ok(None);
        }

        Ok(Some(LoadBalancer {
            location: self.location.clone(),
            sku: "Standard".to_string(),
            frontend: self.frontend()?,
            backend_pool: format!("{}-backendPool", self.name),
            probe: Probe {
                name: PROBE_NAME.to_string(),
                port: self.port,
                interval_secs: 15,
                number_of_probes: 4,
            },
            rule: LoadBalancingRule {
                name: RULE_NAME.to_string(),
                frontend_port: self.port,
                backend_port: self.port,
                idle_timeout_mins: 4,
            },
            tags: tags::build(&self.tags),
        }))
    }
}

pub struct LoadBalancerService {
    scope: Arc<ClusterScope>,
    inner: ResourceService<LoadBalancer>,
}

impl LoadBalancerService {
    pub fn new(
        scope: Arc<ClusterScope>,
        client: Arc<dyn ResourceClient<Resource = LoadBalancer>>,
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
impl Reconciler for LoadBalancerService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn reconcile(&self) -> Result<Progress> {
        let specs = self.scope.load_balancer_specs().await?;
        self.inner.reconcile_specs(&specs).await
    }

    async fn delete(&self) -> Result<Progress> {
        let specs = self.scope.load_balancer_specs().await?;
        self.inner
            .delete_owned_specs(&specs, self.scope.cluster_name())
            .await
    }
}
