//! In-memory shared policy cache.
//!
//! Stands in for an out-of-process cache in tests and single-node
//! deployments. Entries expire lazily on read.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use gatehouse_permissions::{PermissionsResult, Policy, SharedPolicyCache, TenantScope};

#[derive(Debug, Clone)]
struct Entry {
    policies: Vec<Policy>,
    expires_at: Instant,
}

/// [`SharedPolicyCache`] over a concurrent map keyed by
/// `(scope, resource_type)`.
#[derive(Debug, Default)]
pub struct InMemorySharedCache {
    entries: DashMap<(TenantScope, String), Entry>,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a live entry exists for `(scope, resource_type)`.
    pub fn contains(&self, scope: &TenantScope, resource_type: &str) -> bool {
        self.entries
            .get(&(scope.clone(), resource_type.to_string()))
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

#[async_trait]
impl SharedPolicyCache for InMemorySharedCache {
    async fn get(
        &self,
        scope: &TenantScope,
        resource_type: &str,
    ) -> PermissionsResult<Option<Vec<Policy>>> {
        let key = (scope.clone(), resource_type.to_string());
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&key)
            && entry.expires_at > now
        {
            return Ok(Some(entry.policies.clone()));
        }
        self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn put(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        policies: &[Policy],
        ttl: Duration,
    ) -> PermissionsResult<()> {
        self.entries.insert(
            (scope.clone(), resource_type.to_string()),
            Entry {
                policies: policies.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, scope: &TenantScope, resource_type: &str) -> PermissionsResult<()> {
        self.entries
            .remove(&(scope.clone(), resource_type.to_string()));
        Ok(())
    }

    async fn invalidate_prefix(
        &self,
        app_id: &str,
        environment_id: Option<&str>,
        organization_id: Option<&str>,
    ) -> PermissionsResult<()> {
        self.entries.retain(|(scope, _), _| {
            let matches = scope.app_id == app_id
                && environment_id.is_none_or(|env| scope.environment_id == env)
                && organization_id.is_none_or(|org| scope.organization_id.as_deref() == Some(org));
            !matches
        });
        Ok(())
    }
}
