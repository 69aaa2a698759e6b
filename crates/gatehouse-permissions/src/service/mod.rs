//! Policy service.
//!
//! The orchestration layer between callers, the durable [`PolicyStore`], the
//! compiler, the compiled-policy cache and the evaluator.
//!
//! # Architecture
//!
//! ```text
//! evaluate ─▶ PolicyCache ─(miss)─▶ SharedPolicyCache ─(miss)─▶ PolicyStore
//!                 │                                                  │
//!                 │◀──────────────── PolicyCompiler ◀────────────────┘
//!                 ▼
//!          PolicyEvaluator ─▶ Decision
//! ```
//!
//! Mutations run compile, then store, then cache, so a store failure never
//! leaves a cache entry behind. Every mutation appends an audit event and,
//! when a notifier is configured, publishes an invalidation event for other
//! instances.
//!
//! # Example
//!
//! ```ignore
//! let service = Arc::new(PolicyService::new(store, PermissionsConfig::default()));
//! let scope = TenantScope::new("app-1", "prod");
//!
//! service
//!     .create_policy(&scope, "admin", CreatePolicyRequest::new(
//!         "owner-read",
//!         "resource.owner == principal.id",
//!         "document",
//!         vec!["read".to_string()],
//!     ))
//!     .await?;
//!
//! let decision = service.evaluate(&scope, &context).await?;
//! ```

mod evaluation;
mod namespaces;
mod policies;
mod types;

pub use types::{
    EvaluationStats, PolicyTestCase, TestCaseResult, TestPolicyRequest, TestPolicyResponse,
    ValidationResponse, WarmupReport,
};

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::{AuditEvent, AuditFilter, AuditLog};
use crate::cache::{PolicyCache, PolicyCacheStats};
use crate::config::PermissionsConfig;
use crate::evaluator::PolicyEvaluator;
use crate::expression::PolicyCompiler;
use crate::invalidation::{CacheInvalidationListener, InvalidationEvent, PolicyChangeNotifier};
use crate::model::TenantScope;
use crate::storage::{PolicyStore, SharedPolicyCache};
use crate::templates::PolicyTemplates;
use crate::PermissionsResult;

use types::EvaluationCounters;

/// Evaluation and administration entry point.
pub struct PolicyService {
    store: Arc<dyn PolicyStore>,
    audit: Option<Arc<dyn AuditLog>>,
    shared_cache: Option<Arc<dyn SharedPolicyCache>>,
    notifier: Option<Arc<PolicyChangeNotifier>>,
    cache: Arc<PolicyCache>,
    config: PermissionsConfig,
    templates: PolicyTemplates,
    /// Identity used when publishing invalidation events.
    origin: Uuid,
    counters: EvaluationCounters,
}

impl PolicyService {
    /// Create a service over `store` with a fresh local cache.
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>, config: PermissionsConfig) -> Self {
        let cache = Arc::new(PolicyCache::new(&config.cache));
        Self {
            store,
            audit: None,
            shared_cache: None,
            notifier: None,
            cache,
            config,
            templates: PolicyTemplates,
            origin: Uuid::new_v4(),
            counters: EvaluationCounters::default(),
        }
    }

    /// Record mutations in `audit`.
    #[must_use]
    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Consult `shared_cache` on local misses when the backend allows it.
    #[must_use]
    pub fn with_shared_cache(mut self, shared_cache: Arc<dyn SharedPolicyCache>) -> Self {
        self.shared_cache = Some(shared_cache);
        self
    }

    /// Publish invalidation events on `notifier`.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<PolicyChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Use an existing compiled-policy cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<PolicyCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The service configuration.
    #[must_use]
    pub fn config(&self) -> &PermissionsConfig {
        &self.config
    }

    /// The local compiled-policy cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// Local cache statistics.
    pub async fn cache_stats(&self) -> PolicyCacheStats {
        self.cache.stats().await
    }

    /// Identity this instance publishes invalidation events under.
    #[must_use]
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// A listener applying other instances' invalidation events to this
    /// service's cache, if a notifier is configured.
    #[must_use]
    pub fn invalidation_listener(&self) -> Option<CacheInvalidationListener> {
        self.notifier.as_ref().map(|notifier| {
            CacheInvalidationListener::new(self.cache.clone(), notifier.clone(), self.origin)
        })
    }

    /// Compiler with the tenant's complexity ceiling.
    #[must_use]
    pub fn compiler_for(&self, scope: &TenantScope) -> PolicyCompiler {
        let engine = self
            .config
            .for_tenant(&scope.app_id, &scope.environment_id);
        PolicyCompiler::new(engine.max_policy_complexity)
    }

    fn evaluator_for(&self, scope: &TenantScope) -> PolicyEvaluator {
        PolicyEvaluator::from_config(
            &self
                .config
                .for_tenant(&scope.app_id, &scope.environment_id),
        )
    }

    // -------------------------------------------------------------------------
    // Audit and analytics
    // -------------------------------------------------------------------------

    /// Audit events of a scope, most recent first. Empty when no audit log
    /// is configured.
    pub async fn list_audit_events(
        &self,
        scope: &TenantScope,
        filter: &AuditFilter,
    ) -> PermissionsResult<Vec<AuditEvent>> {
        scope.validate()?;
        match &self.audit {
            Some(audit) => audit.query(scope, filter).await,
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of this instance's evaluation counters.
    #[must_use]
    pub fn analytics(&self) -> EvaluationStats {
        self.counters.snapshot()
    }

    pub(crate) async fn record_audit(&self, event: AuditEvent) {
        let Some(audit) = &self.audit else {
            return;
        };
        let code = event.action.code();
        let resource_id = event.resource_id.clone();
        if let Err(e) = audit.append(event).await {
            tracing::warn!(
                action = code,
                resource_id = %resource_id,
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Invalidation plumbing
    // -------------------------------------------------------------------------

    fn publish(&self, event: InvalidationEvent) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(self.origin, event);
        }
    }

    fn shared_cache(&self) -> Option<&Arc<dyn SharedPolicyCache>> {
        self.shared_cache
            .as_ref()
            .filter(|_| self.config.cache.backend.uses_shared())
    }

    /// Drop the shared entry of one resource type and tell peers about it.
    async fn resource_type_changed(&self, scope: &TenantScope, resource_type: &str) {
        if let Some(shared) = self.shared_cache()
            && let Err(e) = shared.invalidate(scope, resource_type).await
        {
            tracing::warn!(
                scope = %scope,
                resource_type = resource_type,
                error = %e,
                "Failed to invalidate shared policy cache"
            );
        }
        self.publish(InvalidationEvent::ResourceType {
            scope: scope.clone(),
            resource_type: resource_type.to_string(),
        });
    }

    async fn invalidate_shared_prefix(
        &self,
        app_id: &str,
        environment_id: Option<&str>,
        organization_id: Option<&str>,
    ) {
        if let Some(shared) = self.shared_cache()
            && let Err(e) = shared
                .invalidate_prefix(app_id, environment_id, organization_id)
                .await
        {
            tracing::warn!(
                app_id = app_id,
                error = %e,
                "Failed to invalidate shared policy cache prefix"
            );
        }
    }

    // -------------------------------------------------------------------------
    // Cache invalidation
    // -------------------------------------------------------------------------

    /// Drop one policy from the local cache and tell peers.
    pub async fn invalidate_cache_by_policy(&self, policy_id: Uuid) -> bool {
        let removed = self.cache.invalidate_by_policy(policy_id).await;
        self.publish(InvalidationEvent::Policy { policy_id });
        removed
    }

    /// Drop everything cached under an application.
    pub async fn invalidate_cache_by_app(&self, app_id: &str) -> usize {
        let removed = self.cache.invalidate_by_app(app_id).await;
        self.invalidate_shared_prefix(app_id, None, None).await;
        self.publish(InvalidationEvent::App {
            app_id: app_id.to_string(),
        });
        tracing::info!(app_id = app_id, removed = removed, "Invalidated policy cache for app");
        removed
    }

    /// Drop everything cached under an environment, organizations included.
    pub async fn invalidate_cache_by_environment(
        &self,
        app_id: &str,
        environment_id: &str,
    ) -> usize {
        let removed = self
            .cache
            .invalidate_by_environment(app_id, environment_id)
            .await;
        self.invalidate_shared_prefix(app_id, Some(environment_id), None)
            .await;
        self.publish(InvalidationEvent::Environment {
            app_id: app_id.to_string(),
            environment_id: environment_id.to_string(),
        });
        tracing::info!(
            app_id = app_id,
            environment_id = environment_id,
            removed = removed,
            "Invalidated policy cache for environment"
        );
        removed
    }

    /// Drop everything cached under one organization.
    pub async fn invalidate_cache_by_organization(
        &self,
        app_id: &str,
        environment_id: &str,
        organization_id: &str,
    ) -> usize {
        let removed = self
            .cache
            .invalidate_by_organization(app_id, environment_id, organization_id)
            .await;
        self.invalidate_shared_prefix(app_id, Some(environment_id), Some(organization_id))
            .await;
        self.publish(InvalidationEvent::Organization {
            app_id: app_id.to_string(),
            environment_id: environment_id.to_string(),
            organization_id: organization_id.to_string(),
        });
        removed
    }
}
