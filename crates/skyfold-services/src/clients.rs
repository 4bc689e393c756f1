//! Remote clients the cluster services talk to

use crate::bastion_hosts::BastionHost;
use crate::disks::Disk;
use crate::groups::ResourceGroup;
use crate::load_balancers::LoadBalancer;
use crate::nat_gateways::NatGateway;
use crate::private_dns::PrivateDnsZone;
use crate::public_ips::PublicIpAddress;
use crate::route_tables::RouteTable;
use crate::security_groups::NetworkSecurityGroup;
use crate::subnets::Subnet;
use crate::virtual_networks::VirtualNetwork;
use skyfold_cloud::{ResourceClient, TagsClient};
use std::sync::Arc;

/// One client per resource kind, plus the tag API
#[derive(Clone)]
pub struct CloudClients {
    pub groups: Arc<dyn ResourceClient<Resource = ResourceGroup>>,
    pub virtual_networks: Arc<dyn ResourceClient<Resource = VirtualNetwork>>,
    pub security_groups: Arc<dyn ResourceClient<Resource = NetworkSecurityGroup>>,
    pub route_tables: Arc<dyn ResourceClient<Resource = RouteTable>>,
    pub public_ips: Arc<dyn ResourceClient<Resource = PublicIpAddress>>,
    pub nat_gateways: Arc<dyn ResourceClient<Resource = NatGateway>>,
    pub subnets: Arc<dyn ResourceClient<Resource = Subnet>>,
    pub load_balancers: Arc<dyn ResourceClient<Resource = LoadBalancer>>,
    pub private_dns: Arc<dyn ResourceClient<Resource = PrivateDnsZone>>,
    pub bastion_hosts: Arc<dyn ResourceClient<Resource = BastionHost>>,
    pub disks: Arc<dyn ResourceClient<Resource = Disk>>,
    pub tags: Arc<dyn TagsClient>,
}
