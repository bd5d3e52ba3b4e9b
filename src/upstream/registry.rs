//! Upstream registry: routing group -> current candidate endpoints.

use dashmap::DashMap;

use super::Endpoint;
use crate::config::UpstreamGroupConfig;

/// Read-only view of the candidate endpoints for a routing group.
///
/// Implementations may change their answer between calls; callers must
/// treat every result as the most recent snapshot and nothing more.
pub trait UpstreamRegistry: Send + Sync {
    fn list_endpoints(&self, group: &str) -> Vec<Endpoint>;
}

/// In-memory registry backed by a concurrent map.
///
/// Groups are replaced wholesale, so readers always see a consistent list.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    groups: DashMap<String, Vec<Endpoint>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured upstream groups.
    pub fn from_groups(groups: &[UpstreamGroupConfig]) -> Self {
        let registry = Self::new();
        for group in groups {
            registry.replace_group(
                group.id.clone(),
                group.endpoints.iter().map(Endpoint::from).collect(),
            );
        }
        registry
    }

    /// Replace the endpoint list of a group, creating it if needed.
    pub fn replace_group(&self, group: impl Into<String>, endpoints: Vec<Endpoint>) {
        let group = group.into();
        tracing::debug!(group = %group, endpoints = endpoints.len(), "Replacing upstream group");
        self.groups.insert(group, endpoints);
    }

    /// All endpoints of a group, including ones marked down.
    pub fn all_endpoints(&self, group: &str) -> Vec<Endpoint> {
        self.groups
            .get(group)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl UpstreamRegistry for MemoryRegistry {
    fn list_endpoints(&self, group: &str) -> Vec<Endpoint> {
        self.groups
            .get(group)
            .map(|entry| entry.value().iter().filter(|e| e.status).cloned().collect())
            .unwrap_or_default()
    }
}
