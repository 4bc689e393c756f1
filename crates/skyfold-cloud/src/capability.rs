//! Per-location capability cache
//!
//! Availability zones of a location are looked up once and shared by every
//! reconcile that needs them. Zone topology changes rarely, so by default an
//! entry never expires; a TTL can be configured to refetch stale entries.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use skyfold_config::EngineConfig;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const VIRTUAL_MACHINES: &str = "virtualMachines";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    Location,
    Zone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionReason {
    QuotaId,
    NotAvailableForSubscription,
}

/// Restriction on where a SKU may be used by the current subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub kind: RestrictionKind,
    pub reason: RestrictionReason,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub location: String,
    #[serde(default)]
    pub zones: Vec<String>,
}

/// One entry of the provider's SKU listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSku {
    pub name: String,
    pub resource_type: String,
    #[serde(default)]
    pub location_info: Vec<LocationInfo>,
    #[serde(default)]
    pub restrictions: Vec<Restriction>,
}

/// Remote listing of resource SKUs
#[async_trait]
pub trait SkuSource: Send + Sync {
    async fn list_skus(&self, location: &str) -> Result<Vec<ResourceSku>>;
}

/// Cached capabilities of one location; immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub location: String,
    /// Sorted, deduplicated
    pub zones: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Option<Duration>) -> bool {
        let Some(ttl) = ttl else {
            return true;
        };
        let age = Utc::now().signed_duration_since(self.fetched_at);
        age.to_std().map(|age| age < ttl).unwrap_or(true)
    }
}

/// Zones usable by virtual machines in `location`
pub fn zones_for_location(skus: &[ResourceSku], location: &str) -> Vec<String> {
    let mut zones = BTreeSet::new();
    let mut restricted = BTreeSet::new();

    for sku in skus.iter().filter(|s| s.resource_type == VIRTUAL_MACHINES) {
        for info in &sku.location_info {
            if info.location.eq_ignore_ascii_case(location) {
                zones.extend(info.zones.iter().cloned());
            }
        }
        for restriction in &sku.restrictions {
            if restriction.kind == RestrictionKind::Zone
                && restriction.reason == RestrictionReason::NotAvailableForSubscription
            {
                restricted.extend(restriction.zones.iter().cloned());
            }
        }
    }

    zones.difference(&restricted).cloned().collect()
}

/// Shared, per-location cache of remote capabilities
pub struct CapabilityCache {
    source: Arc<dyn SkuSource>,
    ttl: Option<Duration>,
    call_timeout: Duration,
    entries: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl CapabilityCache {
    pub fn new(source: Arc<dyn SkuSource>, config: &EngineConfig) -> Self {
        Self {
            source,
            ttl: config.capability_ttl(),
            call_timeout: config.call_timeout(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached entry for `location`, fetching it on first use.
    ///
    /// Concurrent first calls may each fetch; the last one to finish wins the
    /// slot. A fetch failure is returned to the caller and nothing is cached.
    pub async fn get(&self, location: &str) -> Result<Arc<CacheEntry>> {
        // location names are case-insensitive
        let location = location.to_ascii_lowercase();
        let location = location.as_str();

        if let Some(entry) = self.entries.read().await.get(location) {
            if entry.is_fresh(self.ttl) {
                return Ok(entry.clone());
            }
            debug!(location, "Capability entry expired");
        }

        let skus = tokio::time::timeout(self.call_timeout, self.source.list_skus(location))
            .await
            .map_err(|_| {
                CloudError::Timeout(format!("listing SKUs for location {}", location))
            })??;

        let entry = Arc::new(CacheEntry {
            location: location.to_string(),
            zones: zones_for_location(&skus, location),
            fetched_at: Utc::now(),
        });
        info!(location, zones = ?entry.zones, "Cached location capabilities");

        self.entries
            .write()
            .await
            .insert(location.to_string(), entry.clone());
        Ok(entry)
    }

    pub async fn get_zones(&self, location: &str) -> Result<Vec<String>> {
        Ok(self.get(location).await?.zones.clone())
    }
}

impl std::fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
