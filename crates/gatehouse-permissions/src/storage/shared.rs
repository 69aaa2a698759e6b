//! Shared policy cache trait.
//!
//! An optional out-of-process cache of raw policy records keyed by scope and
//! resource type. It lets a fresh process warm its local compiled-policy
//! cache without hitting the durable store. Compiled programs are never
//! shared; every process compiles its own.

use std::time::Duration;

use async_trait::async_trait;

use crate::PermissionsResult;
use crate::model::{Policy, TenantScope};

/// Cross-process cache of raw policy records.
///
/// Failures are never fatal to evaluation: the service logs them and falls
/// back to the durable store.
#[async_trait]
pub trait SharedPolicyCache: Send + Sync {
    /// Cached policies for `(scope, resource_type)`, if present.
    async fn get(
        &self,
        scope: &TenantScope,
        resource_type: &str,
    ) -> PermissionsResult<Option<Vec<Policy>>>;

    /// Store the policies for `(scope, resource_type)` with a TTL.
    async fn put(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        policies: &[Policy],
        ttl: Duration,
    ) -> PermissionsResult<()>;

    /// Drop the entry for `(scope, resource_type)`.
    async fn invalidate(&self, scope: &TenantScope, resource_type: &str) -> PermissionsResult<()>;

    /// Drop every entry under a scope prefix.
    ///
    /// An absent environment or organization widens the prefix: an app-only
    /// prefix removes every environment of the app.
    async fn invalidate_prefix(
        &self,
        app_id: &str,
        environment_id: Option<&str>,
        organization_id: Option<&str>,
    ) -> PermissionsResult<()>;
}
