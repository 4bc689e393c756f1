//! Cluster service: every resource service wired in dependency order

use crate::bastion_hosts::BastionService;
use crate::clients::CloudClients;
use crate::disks::DiskService;
use crate::groups::GroupService;
use crate::load_balancers::LoadBalancerService;
use crate::nat_gateways::NatGatewayService;
use crate::private_dns::PrivateDnsService;
use crate::public_ips::PublicIpService;
use crate::route_tables::RouteTableService;
use crate::scope::ClusterScope;
use crate::security_groups::SecurityGroupService;
use crate::subnets::SubnetService;
use crate::tags::TagsService;
use crate::virtual_networks::VirtualNetworkService;
use async_trait::async_trait;
use skyfold_cloud::{
    CapabilityCache, DeleteOutcome, Orchestrator, Prepare, ReconcileOutcome, Reconciler, Result,
};
use skyfold_config::EngineConfig;
use std::sync::Arc;
use tracing::{debug, info};

/// Derives the desired-state values a create pass needs before any remote write
pub struct ClusterPreparer {
    scope: Arc<ClusterScope>,
    capabilities: Arc<CapabilityCache>,
}

impl ClusterPreparer {
    pub fn new(scope: Arc<ClusterScope>, capabilities: Arc<CapabilityCache>) -> Self {
        Self {
            scope,
            capabilities,
        }
    }
}

#[async_trait]
impl Prepare for ClusterPreparer {
    async fn prepare(&self) -> Result<()> {
        let zones = self.capabilities.get_zones(self.scope.location()).await?;
        self.scope.set_failure_domains(&zones).await;
        self.scope.set_dns_name().await;
        self.scope.set_control_plane_security_rules().await;
        Ok(())
    }
}

pub struct ClusterService {
    scope: Arc<ClusterScope>,
    orchestrator: Orchestrator,
}

impl ClusterService {
    pub fn new(
        scope: Arc<ClusterScope>,
        clients: &CloudClients,
        capabilities: Arc<CapabilityCache>,
        config: &EngineConfig,
    ) -> Self {
        let vnet = Arc::new(VirtualNetworkService::new(
            scope.clone(),
            clients.virtual_networks.clone(),
            config,
        ));

        let group: Arc<dyn Reconciler> = Arc::new(GroupService::new(
            scope.clone(),
            clients.groups.clone(),
            config,
        ));
        let dependents: Vec<Arc<dyn Reconciler>> = vec![
            vnet.clone(),
            Arc::new(SecurityGroupService::new(
                scope.clone(),
                vnet.clone(),
                clients.security_groups.clone(),
                config,
            )),
            Arc::new(RouteTableService::new(
                scope.clone(),
                vnet.clone(),
                clients.route_tables.clone(),
                config,
            )),
            Arc::new(PublicIpService::new(
                scope.clone(),
                clients.public_ips.clone(),
                config,
            )),
            Arc::new(NatGatewayService::new(
                scope.clone(),
                clients.nat_gateways.clone(),
                config,
            )),
            Arc::new(SubnetService::new(
                scope.clone(),
                vnet,
                clients.subnets.clone(),
                config,
            )),
            Arc::new(LoadBalancerService::new(
                scope.clone(),
                clients.load_balancers.clone(),
                config,
            )),
            Arc::new(PrivateDnsService::new(
                scope.clone(),
                clients.private_dns.clone(),
                config,
            )),
            Arc::new(BastionService::new(
                scope.clone(),
                clients.bastion_hosts.clone(),
                config,
            )),
            Arc::new(DiskService::new(scope.clone(), clients.disks.clone(), config)),
        ];

        let tags = Arc::new(TagsService::new(scope.clone(), clients.tags.clone(), config));
        let prepare = Arc::new(ClusterPreparer::new(scope.clone(), capabilities));

        let orchestrator = Orchestrator::new(group, dependents)
            .with_tags(tags)
            .with_prepare(prepare);
        debug!(cluster = %scope.cluster_name(), ?orchestrator, "Built cluster service");

        Self {
            scope,
            orchestrator,
        }
    }

    pub fn scope(&self) -> &Arc<ClusterScope> {
        &self.scope
    }

    /// Service names in creation order
    pub fn creation_order(&self) -> Vec<&str> {
        self.orchestrator.creation_order()
    }

    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        info!(cluster = %self.scope.cluster_name(), "Reconciling cluster");
        self.orchestrator.reconcile().await
    }

    pub async fn delete(&self) -> Result<DeleteOutcome> {
        info!(cluster = %self.scope.cluster_name(), "Deleting cluster");
        self.orchestrator.delete().await
    }
}
