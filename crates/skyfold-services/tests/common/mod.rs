use async_trait::async_trait;
use skyfold_cloud::capability::{LocationInfo, ResourceSku, VIRTUAL_MACHINES};
use skyfold_cloud::testing::{FakeResourceClient, FakeSkuSource, RemoteCall};
use skyfold_cloud::{CapabilityCache, CloudError, Result, Tags, TagsClient};
use skyfold_config::EngineConfig;
use skyfold_services::bastion_hosts::BastionHost;
use skyfold_services::disks::Disk;
use skyfold_services::groups::ResourceGroup;
use skyfold_services::load_balancers::LoadBalancer;
use skyfold_services::nat_gateways::NatGateway;
use skyfold_services::private_dns::PrivateDnsZone;
use skyfold_services::public_ips::PublicIpAddress;
use skyfold_services::route_tables::RouteTable;
use skyfold_services::security_groups::NetworkSecurityGroup;
use skyfold_services::subnets::Subnet;
use skyfold_services::virtual_networks::VirtualNetwork;
use skyfold_services::{CloudClients, ClusterController};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const CLUSTER_YAML: &str = r#"
name: my-cluster
location: westeurope
resource_group: my-rg
subscription_id: sub-123
network:
  vnet:
    name: my-vnet
    cidr_blocks: ["10.0.0.0/16"]
  subnets:
    - name: control-plane-subnet
      role: control-plane
      cidr_blocks: ["10.0.1.0/24"]
      security_group:
        name: control-plane-nsg
    - name: node-subnet
      role: node
      cidr_blocks: ["10.0.2.0/24"]
      security_group:
        name: node-nsg
      route_table: node-routetable
      nat_gateway:
        name: node-natgw
        public_ip:
          name: pip-node-natgw
  api_server_lb:
    name: my-cluster-public-lb
    type: public
    frontend:
      name: my-cluster-public-lb-frontEnd
      public_ip:
        name: pip-my-cluster-apiserver
additional_tags:
  environment: dev
"#;

pub const PRIVATE_CLUSTER_YAML: &str = r#"
name: my-cluster
location: westeurope
resource_group: my-rg
subscription_id: sub-123
network:
  vnet:
    name: my-vnet
    cidr_blocks: ["10.0.0.0/16"]
  subnets:
    - name: control-plane-subnet
      role: control-plane
      cidr_blocks: ["10.0.1.0/24"]
      security_group:
        name: control-plane-nsg
  api_server_lb:
    name: my-cluster-internal-lb
    type: internal
    frontend:
      name: my-cluster-internal-lb-frontEnd
      private_ip: 10.0.1.100
"#;

/// Tag API backed by the fake group and virtual network stores, so tags
/// written by the services and by the tag pass are the same tags.
pub struct LinkedTags {
    groups: Arc<FakeResourceClient<ResourceGroup>>,
    virtual_networks: Arc<FakeResourceClient<VirtualNetwork>>,
    updates: Mutex<Vec<String>>,
}

enum TagScope<'a> {
    Group(&'a str),
    VirtualNetwork(&'a str, &'a str),
}

fn parse_scope(scope: &str) -> Result<TagScope<'_>> {
    let parts: Vec<&str> = scope.trim_start_matches('/').split('/').collect();
    match parts.as_slice() {
        ["subscriptions", _, "resourceGroups", group] => Ok(TagScope::Group(*group)),
        ["subscriptions", _, "resourceGroups", group, "virtualNetworks", vnet] => {
            Ok(TagScope::VirtualNetwork(*group, *vnet))
        }
        _ => Err(CloudError::ApiError(format!("unsupported tag scope {}", scope))),
    }
}

impl LinkedTags {
    #[allow(dead_code)]
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagsClient for LinkedTags {
    async fn get_at_scope(&self, scope: &str) -> Result<Option<Tags>> {
        Ok(match parse_scope(scope)? {
            TagScope::Group(name) => self.groups.resource(name).map(|g| g.tags),
            TagScope::VirtualNetwork(_, name) => {
                self.virtual_networks.resource(name).map(|v| v.tags)
            }
        })
    }

    async fn update_at_scope(&self, scope: &str, tags: Tags) -> Result<()> {
        self.updates.lock().unwrap().push(scope.to_string());
        match parse_scope(scope)? {
            TagScope::Group(name) => {
                let mut group = self
                    .groups
                    .resource(name)
                    .ok_or_else(|| CloudError::ResourceNotFound(scope.to_string()))?;
                group.tags = tags;
                self.groups.insert(name, name, group);
            }
            TagScope::VirtualNetwork(group, name) => {
                let mut vnet = self
                    .virtual_networks
                    .resource(name)
                    .ok_or_else(|| CloudError::ResourceNotFound(scope.to_string()))?;
                vnet.tags = tags;
                self.virtual_networks.insert(group, name, vnet);
            }
        }
        Ok(())
    }
}

/// Every fake remote service of one cloud, plus a state directory
pub struct FakeCloud {
    pub root: TempDir,
    pub groups: Arc<FakeResourceClient<ResourceGroup>>,
    pub virtual_networks: Arc<FakeResourceClient<VirtualNetwork>>,
    pub security_groups: Arc<FakeResourceClient<NetworkSecurityGroup>>,
    pub route_tables: Arc<FakeResourceClient<RouteTable>>,
    pub public_ips: Arc<FakeResourceClient<PublicIpAddress>>,
    pub nat_gateways: Arc<FakeResourceClient<NatGateway>>,
    pub subnets: Arc<FakeResourceClient<Subnet>>,
    pub load_balancers: Arc<FakeResourceClient<LoadBalancer>>,
    pub private_dns: Arc<FakeResourceClient<PrivateDnsZone>>,
    pub bastion_hosts: Arc<FakeResourceClient<BastionHost>>,
    pub disks: Arc<FakeResourceClient<Disk>>,
    pub tags: Arc<LinkedTags>,
    pub skus: Arc<FakeSkuSource>,
}

impl FakeCloud {
    pub fn new() -> Self {
        let groups = Arc::new(FakeResourceClient::new());
        let virtual_networks = Arc::new(FakeResourceClient::new());
        let tags = Arc::new(LinkedTags {
            groups: groups.clone(),
            virtual_networks: virtual_networks.clone(),
            updates: Mutex::new(Vec::new()),
        });

        let skus = Arc::new(FakeSkuSource::new());
        skus.set_skus(
            "westeurope",
            vec![ResourceSku {
                name: "Standard_D4s_v3".to_string(),
                resource_type: VIRTUAL_MACHINES.to_string(),
                location_info: vec![LocationInfo {
                    location: "westeurope".to_string(),
                    zones: vec!["1".to_string(), "2".to_string(), "3".to_string()],
                }],
                restrictions: Vec::new(),
            }],
        );

        Self {
            root: tempfile::tempdir().unwrap(),
            groups,
            virtual_networks,
            security_groups: Arc::new(FakeResourceClient::new()),
            route_tables: Arc::new(FakeResourceClient::new()),
            public_ips: Arc::new(FakeResourceClient::new()),
            nat_gateways: Arc::new(FakeResourceClient::new()),
            subnets: Arc::new(FakeResourceClient::new()),
            load_balancers: Arc::new(FakeResourceClient::new()),
            private_dns: Arc::new(FakeResourceClient::new()),
            bastion_hosts: Arc::new(FakeResourceClient::new()),
            disks: Arc::new(FakeResourceClient::new()),
            tags,
            skus,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.path().join("state")
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig {
            state_dir: self.state_dir(),
            ..EngineConfig::default()
        }
    }

    pub fn clients(&self) -> CloudClients {
        CloudClients {
            groups: self.groups.clone(),
            virtual_networks: self.virtual_networks.clone(),
            security_groups: self.security_groups.clone(),
            route_tables: self.route_tables.clone(),
            public_ips: self.public_ips.clone(),
            nat_gateways: self.nat_gateways.clone(),
            subnets: self.subnets.clone(),
            load_balancers: self.load_balancers.clone(),
            private_dns: self.private_dns.clone(),
            bastion_hosts: self.bastion_hosts.clone(),
            disks: self.disks.clone(),
            tags: self.tags.clone(),
        }
    }

    /// A controller as a freshly started process would build it
    pub fn controller(&self) -> ClusterController {
        let config = self.config();
        let cache = Arc::new(CapabilityCache::new(self.skus.clone(), &config));
        ClusterController::new(self.clients(), cache, config)
    }

    pub fn status_file(&self, cluster: &str) -> PathBuf {
        self.state_dir().join(format!("{}.json", cluster))
    }

    /// Create/update and delete requests across every kind
    pub fn mutation_count(&self) -> usize {
        self.groups.mutation_count()
            + self.virtual_networks.mutation_count()
            + self.security_groups.mutation_count()
            + self.route_tables.mutation_count()
            + self.public_ips.mutation_count()
            + self.nat_gateways.mutation_count()
            + self.subnets.mutation_count()
            + self.load_balancers.mutation_count()
            + self.private_dns.mutation_count()
            + self.bastion_hosts.mutation_count()
            + self.disks.mutation_count()
    }
}

pub fn deletes<R: Clone + Send + Sync + 'static>(client: &FakeResourceClient<R>) -> usize {
    client.count(|c| matches!(c, RemoteCall::Delete(_)))
}

pub fn creates<R: Clone + Send + Sync + 'static>(client: &FakeResourceClient<R>) -> usize {
    client.count(|c| matches!(c, RemoteCall::CreateOrUpdate(_)))
}
