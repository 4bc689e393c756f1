//! Skyfold cluster services
//!
//! One module per resource kind, each turning the cluster spec into resource
//! specs and running them through the engine in `skyfold-cloud`. The
//! [`ClusterService`] wires the kinds in dependency order and the
//! [`ClusterController`] runs one pass per call, persisting status in between.

pub mod api;
pub mod bastion_hosts;
pub mod clients;
pub mod cluster;
pub mod controller;
pub mod disks;
pub mod groups;
pub mod load_balancers;
pub mod nat_gateways;
pub mod private_dns;
pub mod public_ips;
pub mod route_tables;
pub mod scope;
pub mod security_groups;
pub mod service;
pub mod subnets;
pub mod tags;
pub mod virtual_networks;

// Re-exports
pub use api::ClusterSpec;
pub use clients::CloudClients;
pub use cluster::{ClusterPreparer, ClusterService};
pub use controller::{ClusterController, ReconcileResult};
pub use scope::ClusterScope;
pub use service::ResourceService;
