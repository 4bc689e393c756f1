//! Ownership tags
//!
//! Every resource created by the engine carries a small set of managed tags
//! (its name, its role, and a per-cluster lifecycle marker). Users may
//! declare extra tags on top. The marker is the only ownership signal: a
//! resource without `owned` under this cluster's key is never written to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NAME_TAG: &str = "Name";
pub const TAG_PREFIX: &str = "skyfold.io_";
pub const ROLE_TAG: &str = "skyfold.io_role";

/// Role of resources shared by the whole cluster
pub const COMMON_ROLE: &str = "common";
pub const NODE_ROLE: &str = "node";
pub const CONTROL_PLANE_ROLE: &str = "control-plane";
pub const BASTION_ROLE: &str = "bastion";
pub const API_SERVER_ROLE: &str = "apiserver";

/// Key of the per-cluster lifecycle marker
pub fn cluster_tag_key(cluster_name: &str) -> String {
    format!("{}cluster_{}", TAG_PREFIX, cluster_name)
}

/// Whether the cluster exclusively manages a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Created by and deleted with the cluster
    Owned,
    /// Used by the cluster but managed elsewhere
    Shared,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Owned => "owned",
            Lifecycle::Shared => "shared",
        }
    }
}

/// Tag set, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// True when this cluster's lifecycle marker says `owned`
    pub fn has_owned(&self, cluster_name: &str) -> bool {
        self.get(&cluster_tag_key(cluster_name)) == Some(Lifecycle::Owned.as_str())
    }

    /// Copy of `self` with every entry of `other` applied on top
    pub fn merge(&self, other: &Tags) -> Tags {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Input for the managed tag set of one resource
#[derive(Debug, Clone)]
pub struct BuildParams {
    pub cluster_name: String,
    pub lifecycle: Lifecycle,
    pub name: Option<String>,
    pub role: Option<String>,
    pub additional: Tags,
}

impl BuildParams {
    pub fn owned(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            lifecycle: Lifecycle::Owned,
            name: None,
            role: None,
            additional: Tags::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn additional(mut self, additional: Tags) -> Self {
        self.additional = additional;
        self
    }
}

/// Only the engine-managed keys (`Name`, role, lifecycle marker)
pub fn managed_tags(params: &BuildParams) -> Tags {
    let mut tags = Tags::new();
    tags.insert(
        cluster_tag_key(&params.cluster_name),
        params.lifecycle.as_str(),
    );
    if let Some(name) = &params.name {
        tags.insert(NAME_TAG, name.clone());
    }
    if let Some(role) = &params.role {
        tags.insert(ROLE_TAG, role.clone());
    }
    tags
}

/// Full tag set for a new resource: declared tags with managed keys on top
pub fn build(params: &BuildParams) -> Tags {
    params.additional.merge(&managed_tags(params))
}

/// Converge tags on an existing resource.
///
/// Returns `None` when the resource is not owned by `cluster_name` (it is
/// never written) or when nothing would change. Otherwise returns
/// `existing ∪ declared ∪ managed`, later sets winning on key collisions.
/// Tags outside the managed and declared sets are kept as-is.
pub fn tag_parameters(
    managed: &Tags,
    declared: &Tags,
    existing: &Tags,
    cluster_name: &str,
) -> Option<Tags> {
    if !existing.has_owned(cluster_name) {
        return None;
    }

    let wanted = existing.merge(declared).merge(managed);
    if wanted == *existing {
        return None;
    }
    Some(wanted)
}
