//! Desired state of a cluster's infrastructure

use serde::{Deserialize, Serialize};
use skyfold_cloud::{CloudError, Result, Tags};

pub const DEFAULT_API_SERVER_PORT: u16 = 6443;
pub const DEFAULT_DNS_SUFFIX: &str = "azure.com";

fn default_dns_suffix() -> String {
    DEFAULT_DNS_SUFFIX.to_string()
}

fn default_api_server_port() -> u16 {
    DEFAULT_API_SERVER_PORT
}

/// Top-level declared object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub location: String,
    pub resource_group: String,
    pub subscription_id: String,

    /// Suffix of generated public DNS names
    #[serde(default = "default_dns_suffix")]
    pub dns_suffix: String,

    pub network: NetworkSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionSpec>,

    /// Disks owned by the cluster and removed with it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<String>,

    /// User-declared tags applied to every created resource
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub additional_tags: Tags,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub vnet: VnetSpec,
    pub subnets: Vec<SubnetSpec>,
    pub api_server_lb: LoadBalancerSpec,

    /// Zone name for private clusters; defaults to `<cluster>.skyfold.internal`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_dns_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VnetSpec {
    pub name: String,

    /// Defaults to the cluster's resource group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    pub cidr_blocks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubnetRole {
    ControlPlane,
    Node,
    Bastion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub name: String,
    pub role: SubnetRole,
    pub cidr_blocks: Vec<String>,
    pub security_group: SecurityGroupSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_table: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_gateway: Option<NatGatewaySpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
    #[serde(rename = "*")]
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub protocol: Protocol,
    pub direction: Direction,
    pub priority: u32,
    pub source: String,
    pub source_ports: String,
    pub destination: String,
    pub destination_ports: String,
}

impl SecurityRule {
    /// Inbound TCP rule from anywhere to `port`
    pub fn allow_inbound_tcp(name: &str, description: &str, port: u16, priority: u32) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
            protocol: Protocol::Tcp,
            direction: Direction::Inbound,
            priority,
            source: "*".to_string(),
            source_ports: "*".to_string(),
            destination: "*".to_string(),
            destination_ports: port.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NatGatewaySpec {
    pub name: String,
    pub public_ip: PublicIpSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicIpSpec {
    pub name: String,

    /// Fully qualified DNS name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerType {
    Public,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub lb_type: LoadBalancerType,

    #[serde(default = "default_api_server_port")]
    pub port: u16,

    pub frontend: FrontendIpSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontendIpSpec {
    pub name: String,

    /// Required for public load balancers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<PublicIpSpec>,

    /// Required for internal load balancers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BastionSpec {
    pub name: String,
    pub subnet: SubnetSpec,
    pub public_ip: PublicIpSpec,
}

impl ClusterSpec {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let spec: ClusterSpec = serde_yaml::from_str(content)
            .map_err(|e| CloudError::InvalidConfig(format!("cluster spec: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_name()?;
        for (field, value) in [
            ("location", &self.location),
            ("resource_group", &self.resource_group),
            ("network.vnet.name", &self.network.vnet.name),
        ] {
            if value.is_empty() {
                return Err(CloudError::InvalidConfig(format!("{} must not be empty", field)));
            }
        }

        if self.control_plane_subnet().is_none() {
            return Err(CloudError::InvalidConfig(
                "network.subnets must contain a control-plane subnet".to_string(),
            ));
        }

        let lb = &self.network.api_server_lb;
        match lb.lb_type {
            LoadBalancerType::Public if lb.frontend.public_ip.is_none() => {
                Err(CloudError::InvalidConfig(format!(
                    "public load balancer {} needs a frontend public IP",
                    lb.name
                )))
            }
            LoadBalancerType::Internal if lb.frontend.private_ip.is_none() => {
                Err(CloudError::InvalidConfig(format!(
                    "internal load balancer {} needs a frontend private IP",
                    lb.name
                )))
            }
            _ => Ok(()),
        }
    }

    /// The name also names the status file, so it must stay a single path
    /// component.
    pub fn validate_name(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CloudError::InvalidConfig("name must not be empty".to_string()));
        }
        if self.name.contains(['/', '\\']) || self.name.contains("..") {
            return Err(CloudError::InvalidConfig(format!(
                "name {:?} must not contain path separators or '..'",
                self.name
            )));
        }
        Ok(())
    }

    pub fn control_plane_subnet(&self) -> Option<&SubnetSpec> {
        self.network
            .subnets
            .iter()
            .find(|s| s.role == SubnetRole::ControlPlane)
    }

    pub fn vnet_resource_group(&self) -> &str {
        self.network
            .vnet
            .resource_group
            .as_deref()
            .unwrap_or(&self.resource_group)
    }

    /// API server reachable only inside the virtual network
    pub fn is_private(&self) -> bool {
        self.network.api_server_lb.lb_type == LoadBalancerType::Internal
    }

    pub fn private_dns_zone_name(&self) -> String {
        self.network
            .private_dns_zone
            .clone()
            .unwrap_or_else(|| format!("{}.skyfold.internal", self.name))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    fn subnet(name: &str, role: SubnetRole, cidr: &str) -> SubnetSpec {
        SubnetSpec {
            name: name.to_string(),
            role,
            cidr_blocks: vec![cidr.to_string()],
            security_group: SecurityGroupSpec {
                name: format!("{}-nsg", name),
                rules: Vec::new(),
            },
            route_table: None,
            nat_gateway: None,
        }
    }

    /// Public cluster `my-cluster` in `westeurope`
    pub fn cluster_spec() -> ClusterSpec {
        let mut node = subnet("node-subnet", SubnetRole::Node, "10.0.2.0/24");
        node.route_table = Some("node-routetable".to_string());
        node.nat_gateway = Some(NatGatewaySpec {
            name: "node-natgw".to_string(),
            public_ip: PublicIpSpec {
                name: "pip-node-natgw".to_string(),
                dns_name: None,
            },
        });

        ClusterSpec {
            name: "my-cluster".to_string(),
            location: "westeurope".to_string(),
            resource_group: "my-rg".to_string(),
            subscription_id: "sub-123".to_string(),
            dns_suffix: DEFAULT_DNS_SUFFIX.to_string(),
            network: NetworkSpec {
                vnet: VnetSpec {
                    name: "my-vnet".to_string(),
                    resource_group: None,
                    cidr_blocks: vec!["10.0.0.0/16".to_string()],
                },
                subnets: vec![
                    subnet("control-plane-subnet", SubnetRole::ControlPlane, "10.0.1.0/24"),
                    node,
                ],
                api_server_lb: LoadBalancerSpec {
                    name: "my-cluster-public-lb".to_string(),
                    lb_type: LoadBalancerType::Public,
                    port: DEFAULT_API_SERVER_PORT,
                    frontend: FrontendIpSpec {
                        name: "my-cluster-public-lb-frontEnd".to_string(),
                        public_ip: Some(PublicIpSpec {
                            name: "pip-my-cluster-apiserver".to_string(),
                            dns_name: None,
                        }),
                        private_ip: None,
                    },
                },
                private_dns_zone: None,
            },
            bastion: None,
            disks: Vec::new(),
            additional_tags: Tags::new(),
        }
    }

    /// Same cluster behind an internal load balancer
    pub fn private_cluster_spec() -> ClusterSpec {
        let mut spec = cluster_spec();
        spec.network.api_server_lb = LoadBalancerSpec {
            name: "my-cluster-internal-lb".to_string(),
            lb_type: LoadBalancerType::Internal,
            port: DEFAULT_API_SERVER_PORT,
            frontend: FrontendIpSpec {
                name: "my-cluster-internal-lb-frontEnd".to_string(),
                public_ip: None,
                private_ip: Some("10.0.1.100".to_string()),
            },
        };
        spec
    }
}
