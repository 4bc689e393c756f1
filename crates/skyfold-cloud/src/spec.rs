//! Resource descriptors

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Address of a resource in the remote cloud
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_group: String,

    /// Parent resource for nested kinds (a subnet's virtual network)
    pub owner: Option<String>,

    pub name: String,
}

impl ResourceRef {
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            owner: None,
            name: name.into(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner {
            Some(owner) => write!(f, "{}/{}/{}", self.resource_group, owner, self.name),
            None => write!(f, "{}/{}", self.resource_group, self.name),
        }
    }
}

/// Identity and desired parameters of one resource, fixed for a reconcile pass.
///
/// Every resource kind implements this; the executor never sees concrete kinds.
pub trait ResourceSpec: Send + Sync {
    /// Remote representation, used both for observed state and for the
    /// parameters sent on create/update
    type Resource: Send + Sync;

    /// Unique within its service and resource group
    fn resource_name(&self) -> &str;

    fn resource_group_name(&self) -> &str;

    /// Non-owning back-reference to a parent resource, lookup only
    fn owner_resource_name(&self) -> Option<&str> {
        None
    }

    /// Compute what to send given the observed resource (`None` when absent).
    ///
    /// Returning `Ok(None)` means there is no drift and nothing to do.
    fn parameters(&self, existing: Option<&Self::Resource>) -> Result<Option<Self::Resource>>;

    fn resource_ref(&self) -> ResourceRef {
        let reference = ResourceRef::new(self.resource_group_name(), self.resource_name());
        match self.owner_resource_name() {
            Some(owner) => reference.with_owner(owner),
            None => reference,
        }
    }
}
