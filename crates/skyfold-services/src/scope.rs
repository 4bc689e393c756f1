//! Cluster scope: desired state and status of one cluster during a pass
//!
//! Services never read the cluster spec directly. They ask the scope for the
//! resource specs of their kind, computed from the declared spec plus the
//! derivations made at the start of a create pass (failure domains, API
//! server DNS name, default control-plane security rules).

use crate::api::{ClusterSpec, LoadBalancerType, SecurityRule, SubnetRole};
use crate::bastion_hosts::BastionSpec;
use crate::disks::DiskSpec;
use crate::groups::GroupSpec;
use crate::load_balancers::LoadBalancerSpec;
use crate::nat_gateways::NatGatewaySpec;
use crate::private_dns::{ARecord, PrivateDnsSpec, VnetLink};
use crate::public_ips::PublicIpSpec;
use crate::route_tables::RouteTableSpec;
use crate::security_groups::SecurityGroupSpec;
use crate::subnets::SubnetSpec;
use crate::tags::TagsSpec;
use crate::virtual_networks::VirtualNetworkSpec;
use skyfold_cloud::tags::{
    self, API_SERVER_ROLE, BASTION_ROLE, BuildParams, COMMON_ROLE, CONTROL_PLANE_ROLE, NODE_ROLE,
};
use skyfold_cloud::{CloudError, FailureDomainSpec, Result, StatusHandle, Tags};
use std::collections::BTreeSet;
use tokio::sync::RwLock;
use tracing::{debug, info};

const SSH_RULE_PRIORITY: u32 = 2200;
const API_SERVER_RULE_PRIORITY: u32 = 2201;
const API_SERVER_HOSTNAME: &str = "apiserver";

fn subnet_role(role: SubnetRole) -> &'static str {
    match role {
        SubnetRole::ControlPlane => CONTROL_PLANE_ROLE,
        SubnetRole::Node => NODE_ROLE,
        SubnetRole::Bastion => BASTION_ROLE,
    }
}

pub struct ClusterScope {
    name: String,
    location: String,
    resource_group: String,
    subscription_id: String,
    spec: RwLock<ClusterSpec>,
    status: StatusHandle,
}

impl ClusterScope {
    pub fn new(spec: ClusterSpec, status: StatusHandle) -> Self {
        Self {
            name: spec.name.clone(),
            location: spec.location.clone(),
            resource_group: spec.resource_group.clone(),
            subscription_id: spec.subscription_id.clone(),
            spec: RwLock::new(spec),
            status,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn status(&self) -> &StatusHandle {
        &self.status
    }

    /// Copy of the spec including derived values
    pub async fn spec(&self) -> ClusterSpec {
        self.spec.read().await.clone()
    }

    /// Resource id of the cluster's resource group
    pub fn group_scope(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )
    }

    fn tag_params(&self, name: &str, role: &str, additional: &Tags) -> BuildParams {
        BuildParams::owned(&self.name)
            .name(name)
            .role(role)
            .additional(additional.clone())
    }

    // Derivations

    /// Record every zone as a failure domain usable by the control plane
    pub async fn set_failure_domains(&self, zones: &[String]) {
        self.status
            .update(|status| {
                for zone in zones {
                    status.set_failure_domain(zone.clone(), FailureDomainSpec { control_plane: true });
                }
            })
            .await;
        debug!(cluster = %self.name, ?zones, "Set failure domains");
    }

    pub async fn failure_domain_zones(&self) -> Vec<String> {
        self.status
            .snapshot()
            .await
            .failure_domains
            .into_keys()
            .collect()
    }

    /// Give the public API server IP a DNS name when none is declared
    pub async fn set_dns_name(&self) {
        let mut spec = self.spec.write().await;
        let location = spec.location.clone();
        let suffix = spec.dns_suffix.clone();
        let lb = &mut spec.network.api_server_lb;
        if lb.lb_type != LoadBalancerType::Public {
            return;
        }
        if let Some(ip) = lb.frontend.public_ip.as_mut() {
            if ip.dns_name.is_none() {
                let fqdn = format!("{}.{}.cloudapp.{}", ip.name, location, suffix);
                info!(public_ip = %ip.name, dns_name = %fqdn, "Generated API server DNS name");
                ip.dns_name = Some(fqdn);
            }
        }
    }

    /// Allow SSH and the API server port when the control-plane subnet declares no rules
    pub async fn set_control_plane_security_rules(&self) {
        let mut spec = self.spec.write().await;
        let port = spec.network.api_server_lb.port;
        let Some(subnet) = spec
            .network
            .subnets
            .iter_mut()
            .find(|s| s.role == SubnetRole::ControlPlane)
        else {
            return;
        };
        if !subnet.security_group.rules.is_empty() {
            return;
        }
        subnet.security_group.rules = vec![
            SecurityRule::allow_inbound_tcp("allow_ssh", "Allow SSH", 22, SSH_RULE_PRIORITY),
            SecurityRule::allow_inbound_tcp(
                "allow_apiserver",
                "Allow K8s API Server",
                port,
                API_SERVER_RULE_PRIORITY,
            ),
        ];
    }

    // Resource specs, in creation order

    pub async fn group_spec(&self) -> GroupSpec {
        let spec = self.spec.read().await;
        GroupSpec {
            name: self.resource_group.clone(),
            location: self.location.clone(),
            tags: self.tag_params(&self.resource_group, COMMON_ROLE, &spec.additional_tags),
        }
    }

    pub async fn vnet_spec(&self) -> VirtualNetworkSpec {
        let spec = self.spec.read().await;
        let vnet = &spec.network.vnet;
        VirtualNetworkSpec {
            name: vnet.name.clone(),
            resource_group: spec.vnet_resource_group().to_string(),
            location: self.location.clone(),
            cidr_blocks: vnet.cidr_blocks.clone(),
            tags: self.tag_params(&vnet.name, COMMON_ROLE, &spec.additional_tags),
        }
    }

    pub async fn security_group_specs(&self) -> Vec<SecurityGroupSpec> {
        let spec = self.spec.read().await;
        let mut seen = BTreeSet::new();
        spec.network
            .subnets
            .iter()
            .chain(spec.bastion.as_ref().map(|b| &b.subnet))
            .filter(|s| seen.insert(s.security_group.name.clone()))
            .map(|s| SecurityGroupSpec {
                name: s.security_group.name.clone(),
                resource_group: spec.vnet_resource_group().to_string(),
                location: self.location.clone(),
                rules: s.security_group.rules.clone(),
                tags: self.tag_params(
                    &s.security_group.name,
                    subnet_role(s.role),
                    &spec.additional_tags,
                ),
            })
            .collect()
    }

    pub async fn route_table_specs(&self) -> Vec<RouteTableSpec> {
        let spec = self.spec.read().await;
        let names: BTreeSet<&String> = spec
            .network
            .subnets
            .iter()
            .filter_map(|s| s.route_table.as_ref())
            .collect();
        names
            .into_iter()
            .map(|name| RouteTableSpec {
                name: name.clone(),
                resource_group: spec.vnet_resource_group().to_string(),
                location: self.location.clone(),
                tags: self.tag_params(name, COMMON_ROLE, &spec.additional_tags),
            })
            .collect()
    }

    pub async fn public_ip_specs(&self) -> Vec<PublicIpSpec> {
        let zones = self.failure_domain_zones().await;
        let spec = self.spec.read().await;
        let mut specs = Vec::new();

        let mut push = |ip: &crate::api::PublicIpSpec, role: &str| {
            specs.push(PublicIpSpec {
                name: ip.name.clone(),
                resource_group: self.resource_group.clone(),
                location: self.location.clone(),
                dns_name: ip.dns_name.clone(),
                zones: zones.clone(),
                tags: self.tag_params(&ip.name, role, &spec.additional_tags),
            });
        };

        let lb = &spec.network.api_server_lb;
        if lb.lb_type == LoadBalancerType::Public {
            if let Some(ip) = &lb.frontend.public_ip {
                push(ip, API_SERVER_ROLE);
            }
        }
        for subnet in &spec.network.subnets {
            if let Some(nat) = &subnet.nat_gateway {
                push(&nat.public_ip, NODE_ROLE);
            }
        }
        if let Some(bastion) = &spec.bastion {
            push(&bastion.public_ip, BASTION_ROLE);
        }
        specs
    }

    pub async fn nat_gateway_specs(&self) -> Vec<NatGatewaySpec> {
        let spec = self.spec.read().await;
        spec.network
            .subnets
            .iter()
            .filter_map(|s| s.nat_gateway.as_ref())
            .map(|nat| NatGatewaySpec {
                name: nat.name.clone(),
                resource_group: self.resource_group.clone(),
                location: self.location.clone(),
                public_ip: nat.public_ip.name.clone(),
                tags: self.tag_params(&nat.name, NODE_ROLE, &spec.additional_tags),
            })
            .collect()
    }

    pub async fn subnet_specs(&self) -> Vec<SubnetSpec> {
        let spec = self.spec.read().await;
        spec.network
            .subnets
            .iter()
            .chain(spec.bastion.as_ref().map(|b| &b.subnet))
            .map(|s| SubnetSpec {
                name: s.name.clone(),
                resource_group: spec.vnet_resource_group().to_string(),
                vnet_name: spec.network.vnet.name.clone(),
                cidr_blocks: s.cidr_blocks.clone(),
                security_group: Some(s.security_group.name.clone()),
                route_table: s.route_table.clone(),
                nat_gateway: s.nat_gateway.as_ref().map(|n| n.name.clone()),
            })
            .collect()
    }

    /// The API server load balancer, placed in the control-plane subnet
    pub async fn load_balancer_specs(&self) -> Result<Vec<LoadBalancerSpec>> {
        let spec = self.spec.read().await;
        let lb = &spec.network.api_server_lb;
        let subnet_name = spec
            .control_plane_subnet()
            .map(|s| s.name.clone())
            .ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "load balancer {} needs a control-plane subnet",
                    lb.name
                ))
            })?;
        Ok(vec![LoadBalancerSpec {
            name: lb.name.clone(),
            resource_group: self.resource_group.clone(),
            location: self.location.clone(),
            lb_type: lb.lb_type,
            frontend_name: lb.frontend.name.clone(),
            public_ip: lb.frontend.public_ip.as_ref().map(|ip| ip.name.clone()),
            private_ip: lb.frontend.private_ip.clone(),
            vnet_name: spec.network.vnet.name.clone(),
            subnet_name,
            port: lb.port,
            tags: self.tag_params(&lb.name, API_SERVER_ROLE, &spec.additional_tags),
        }])
    }

    /// Empty unless the cluster is private
    pub async fn private_dns_specs(&self) -> Vec<PrivateDnsSpec> {
        let spec = self.spec.read().await;
        if !spec.is_private() {
            return Vec::new();
        }
        let Some(ip) = spec.network.api_server_lb.frontend.private_ip.clone() else {
            return Vec::new();
        };

        let zone_name = spec.private_dns_zone_name();
        let vnet = &spec.network.vnet.name;
        vec![PrivateDnsSpec {
            tags: self.tag_params(&zone_name, COMMON_ROLE, &spec.additional_tags),
            zone_name,
            resource_group: self.resource_group.clone(),
            links: vec![VnetLink {
                name: format!("{}-link", vnet),
                virtual_network: vnet.clone(),
                registration_enabled: false,
            }],
            records: vec![ARecord {
                hostname: API_SERVER_HOSTNAME.to_string(),
                ip,
            }],
        }]
    }

    pub async fn bastion_specs(&self) -> Vec<BastionSpec> {
        let spec = self.spec.read().await;
        spec.bastion
            .iter()
            .map(|bastion| BastionSpec {
                name: bastion.name.clone(),
                resource_group: self.resource_group.clone(),
                location: self.location.clone(),
                vnet_name: spec.network.vnet.name.clone(),
                subnet_name: bastion.subnet.name.clone(),
                public_ip: bastion.public_ip.name.clone(),
                tags: self.tag_params(&bastion.name, BASTION_ROLE, &spec.additional_tags),
            })
            .collect()
    }

    pub async fn disk_specs(&self) -> Vec<DiskSpec> {
        let spec = self.spec.read().await;
        spec.disks
            .iter()
            .map(|name| DiskSpec {
                name: name.clone(),
                resource_group: self.resource_group.clone(),
            })
            .collect()
    }

    /// The resource group (ownership gate) followed by the virtual network
    pub async fn tag_specs(&self) -> Vec<TagsSpec> {
        let spec = self.spec.read().await;
        let group = self.tag_params(&self.resource_group, COMMON_ROLE, &spec.additional_tags);
        let vnet = &spec.network.vnet;
        let vnet_params = self.tag_params(&vnet.name, COMMON_ROLE, &spec.additional_tags);

        vec![
            TagsSpec {
                scope: self.group_scope(),
                managed: tags::managed_tags(&group),
                declared: spec.additional_tags.clone(),
                ownership_gate: true,
            },
            TagsSpec {
                scope: format!(
                    "/subscriptions/{}/resourceGroups/{}/virtualNetworks/{}",
                    self.subscription_id,
                    spec.vnet_resource_group(),
                    vnet.name
                ),
                managed: tags::managed_tags(&vnet_params),
                declared: spec.additional_tags.clone(),
                ownership_gate: false,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fixtures;
    use crate::api::{BastionSpec as BastionConfig, PublicIpSpec as PublicIpConfig};

    fn new_scope(spec: ClusterSpec) -> ClusterScope {
        ClusterScope::new(spec, StatusHandle::default())
    }

    #[tokio::test]
    async fn test_load_balancer_needs_control_plane_subnet() {
        let scope = new_scope(fixtures::cluster_spec());
        let lbs = scope.load_balancer_specs().await.unwrap();
        assert_eq!(lbs[0].subnet_name, "control-plane-subnet");

        let mut spec = fixtures::cluster_spec();
        spec.network.subnets.retain(|s| s.role != SubnetRole::ControlPlane);
        let err = new_scope(spec).load_balancer_specs().await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_failure_domains_feed_public_ip_zones() {
        let scope = new_scope(fixtures::cluster_spec());
        scope
            .set_failure_domains(&["1".to_string(), "2".to_string(), "3".to_string()])
            .await;

        let status = scope.status().snapshot().await;
        assert_eq!(status.failure_domains.len(), 3);
        assert!(status.failure_domains.values().all(|fd| fd.control_plane));

        let ips = scope.public_ip_specs().await;
        assert_eq!(ips.len(), 2);
        assert!(ips.iter().all(|ip| ip.zones == vec!["1", "2", "3"]));
    }

    #[tokio::test]
    async fn test_dns_name_is_generated_once() {
        let scope = new_scope(fixtures::cluster_spec());
        scope.set_dns_name().await;

        let ips = scope.public_ip_specs().await;
        let apiserver = ips
            .iter()
            .find(|ip| ip.name == "pip-my-cluster-apiserver")
            .unwrap();
        assert_eq!(
            apiserver.dns_name.as_deref(),
            Some("pip-my-cluster-apiserver.westeurope.cloudapp.azure.com")
        );
        assert_eq!(apiserver.tags.role.as_deref(), Some(API_SERVER_ROLE));

        let mut spec = fixtures::cluster_spec();
        if let Some(ip) = spec.network.api_server_lb.frontend.public_ip.as_mut() {
            ip.dns_name = Some("api.example.com".to_string());
        }
        let scope = new_scope(spec);
        scope.set_dns_name().await;
        let ips = scope.public_ip_specs().await;
        assert_eq!(ips[0].dns_name.as_deref(), Some("api.example.com"));
    }

    #[tokio::test]
    async fn test_default_control_plane_rules() {
        let scope = new_scope(fixtures::cluster_spec());
        scope.set_control_plane_security_rules().await;

        let nsgs = scope.security_group_specs().await;
        let cp = nsgs
            .iter()
            .find(|n| n.name == "control-plane-subnet-nsg")
            .unwrap();
        let ports: Vec<_> = cp.rules.iter().map(|r| r.destination_ports.as_str()).collect();
        assert_eq!(ports, vec!["22", "6443"]);
        assert_eq!(cp.rules[0].priority, 2200);

        let node = nsgs.iter().find(|n| n.name == "node-subnet-nsg").unwrap();
        assert!(node.rules.is_empty());
    }

    #[tokio::test]
    async fn test_declared_control_plane_rules_are_kept() {
        let mut spec = fixtures::cluster_spec();
        spec.network.subnets[0].security_group.rules =
            vec![SecurityRule::allow_inbound_tcp("allow_vpn", "VPN", 1194, 100)];
        let scope = new_scope(spec);
        scope.set_control_plane_security_rules().await;

        let nsgs = scope.security_group_specs().await;
        assert_eq!(nsgs[0].rules.len(), 1);
        assert_eq!(nsgs[0].rules[0].name, "allow_vpn");
    }

    #[tokio::test]
    async fn test_subnet_specs_reference_their_dependencies() {
        let scope = new_scope(fixtures::cluster_spec());
        let subnets = scope.subnet_specs().await;
        let node = subnets.iter().find(|s| s.name == "node-subnet").unwrap();

        assert_eq!(node.vnet_name, "my-vnet");
        assert_eq!(node.security_group.as_deref(), Some("node-subnet-nsg"));
        assert_eq!(node.route_table.as_deref(), Some("node-routetable"));
        assert_eq!(node.nat_gateway.as_deref(), Some("node-natgw"));

        let tables = scope.route_table_specs().await;
        assert_eq!(tables.len(), 1);
        let nats = scope.nat_gateway_specs().await;
        assert_eq!(nats[0].public_ip, "pip-node-natgw");
    }

    #[tokio::test]
    async fn test_private_dns_only_for_private_clusters() {
        assert!(new_scope(fixtures::cluster_spec()).private_dns_specs().await.is_empty());

        let scope = new_scope(fixtures::private_cluster_spec());
        let zones = scope.private_dns_specs().await;
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_name, "my-cluster.skyfold.internal");
        assert_eq!(zones[0].records[0].ip, "10.0.1.100");
        assert_eq!(zones[0].links[0].virtual_network, "my-vnet");

        // no public API server IP for an internal load balancer
        let ips = scope.public_ip_specs().await;
        assert!(ips.iter().all(|ip| ip.name != "pip-my-cluster-apiserver"));
    }

    #[tokio::test]
    async fn test_bastion_adds_subnet_nsg_and_ip() {
        let mut spec = fixtures::cluster_spec();
        let mut subnet = spec.network.subnets[1].clone();
        subnet.name = "AzureBastionSubnet".to_string();
        subnet.role = SubnetRole::Bastion;
        subnet.security_group.name = "bastion-nsg".to_string();
        subnet.route_table = None;
        subnet.nat_gateway = None;
        spec.bastion = Some(BastionConfig {
            name: "my-cluster-bastion".to_string(),
            subnet,
            public_ip: PublicIpConfig {
                name: "pip-my-cluster-bastion".to_string(),
                dns_name: None,
            },
        });
        let scope = new_scope(spec);

        assert_eq!(scope.bastion_specs().await.len(), 1);
        assert!(scope.subnet_specs().await.iter().any(|s| s.name == "AzureBastionSubnet"));
        assert!(scope.security_group_specs().await.iter().any(|s| s.name == "bastion-nsg"));
        let bastion_ip = scope
            .public_ip_specs()
            .await
            .into_iter()
            .find(|ip| ip.name == "pip-my-cluster-bastion")
            .unwrap();
        assert_eq!(bastion_ip.tags.role.as_deref(), Some(BASTION_ROLE));
    }

    #[tokio::test]
    async fn test_tag_specs_gate_on_group() {
        let mut spec = fixtures::cluster_spec();
        spec.additional_tags = Tags::new().with("environment", "dev");
        let scope = new_scope(spec);

        let specs = scope.tag_specs().await;
        assert_eq!(specs[0].scope, "/subscriptions/sub-123/resourceGroups/my-rg");
        assert!(specs[0].ownership_gate);
        assert!(specs[0].managed.has_owned("my-cluster"));
        assert_eq!(specs[0].declared.get("environment"), Some("dev"));
        assert!(!specs[1].ownership_gate);
    }

    #[tokio::test]
    async fn test_security_group_role_follows_subnet() {
        let scope = new_scope(fixtures::cluster_spec());
        let nsgs = scope.security_group_specs().await;
        assert_eq!(nsgs[0].tags.role.as_deref(), Some(CONTROL_PLANE_ROLE));
        assert_eq!(nsgs[1].tags.role.as_deref(), Some(NODE_ROLE));
    }
}
