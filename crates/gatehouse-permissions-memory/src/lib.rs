//! In-memory backends for the Gatehouse permissions engine.
//!
//! This crate implements the storage traits of `gatehouse-permissions` over
//! process memory:
//!
//! - [`InMemoryPolicyStore`] - `PolicyStore` on `dashmap` maps
//! - [`InMemoryAuditLog`] - append-only `AuditLog`
//! - [`InMemorySharedCache`] - `SharedPolicyCache` with lazy expiry
//! - [`InMemoryLegacySource`] - `LegacyRbacSource` over a JSON export
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_permissions::{PermissionsConfig, TenantScope};
//! use gatehouse_permissions_memory::InMemoryBackend;
//!
//! let backend = InMemoryBackend::new();
//! let service = backend.policy_service(PermissionsConfig::default());
//! let decision = service.evaluate(&TenantScope::new("app", "prod"), &ctx).await?;
//! ```

mod audit;
mod legacy;
#[cfg(test)]
mod log_capture;
mod shared_cache;
mod store;

use std::sync::Arc;

use gatehouse_permissions::{PermissionsConfig, PolicyService};

pub use audit::InMemoryAuditLog;
pub use legacy::{InMemoryLegacySource, LegacySnapshot};
pub use shared_cache::InMemorySharedCache;
pub use store::InMemoryPolicyStore;

/// The in-memory store, audit log and shared cache, wired together.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    pub store: Arc<InMemoryPolicyStore>,
    pub audit: Arc<InMemoryAuditLog>,
    pub shared_cache: Arc<InMemorySharedCache>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy service over this backend. The shared cache is attached but
    /// only consulted when the configured cache backend uses it.
    pub fn policy_service(&self, config: PermissionsConfig) -> PolicyService {
        PolicyService::new(self.store.clone(), config)
            .with_audit_log(self.audit.clone())
            .with_shared_cache(self.shared_cache.clone())
    }
}

/// Creates a policy service over a fresh in-memory store.
pub fn create_policy_service(config: PermissionsConfig) -> Arc<PolicyService> {
    Arc::new(InMemoryBackend::new().policy_service(config))
}
