//! Request-path evaluation and cache warm-up.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;

use super::PolicyService;
use super::types::WarmupReport;
use crate::PermissionsResult;
use crate::cache::{LoadTicket, order_candidates};
use crate::error::PermissionsError;
use crate::expression::{CompiledPolicy, PolicyCompiler};
use crate::model::{Decision, EvaluateRequest, EvaluationContext, Policy, TenantScope, WILDCARD};

impl PolicyService {
    /// Decide whether `context` is allowed within `scope`.
    ///
    /// Candidate policies come from the local cache; on a miss the
    /// requested resource type and the `*` type are loaded from the shared
    /// cache or the store, compiled, and cached.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an invalid scope or context and `Storage`
    /// when candidates cannot be loaded. Per-policy failures and timeouts are
    /// reported inside the [`Decision`].
    pub async fn evaluate(
        &self,
        scope: &TenantScope,
        context: &EvaluationContext,
    ) -> PermissionsResult<Decision> {
        if let Err(e) = scope.validate().and_then(|()| context.validate()) {
            self.counters.record_error();
            return Err(e);
        }

        let candidates = match self
            .candidates(scope, &context.resource.resource_type, &context.action)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                self.counters.record_error();
                tracing::error!(
                    scope = %scope,
                    resource_type = %context.resource.resource_type,
                    error = %e,
                    "Failed to load candidate policies"
                );
                return Err(e);
            }
        };

        let decision = self.evaluator_for(scope).evaluate(&candidates, context).await;
        self.counters.record(&decision);
        tracing::debug!(
            scope = %scope,
            principal = %context.principal.id,
            resource_type = %context.resource.resource_type,
            action = %context.action,
            allowed = decision.allowed,
            "Evaluated access request"
        );
        Ok(decision)
    }

    /// Evaluate many requests concurrently, one task per item.
    ///
    /// Decisions are returned in request order. An item that fails is
    /// reported as a deny carrying the error, without affecting the others.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` before any work when the batch is larger
    /// than the configured maximum.
    pub async fn evaluate_batch(
        self: &Arc<Self>,
        requests: Vec<EvaluateRequest>,
    ) -> PermissionsResult<Vec<Decision>> {
        let max = self.config.engine.max_batch_size;
        if requests.len() > max {
            return Err(PermissionsError::capacity_exceeded(format!(
                "batch of {} requests exceeds the limit of {}",
                requests.len(),
                max
            )));
        }

        let tasks = requests.into_iter().map(|request| {
            let service = Arc::clone(self);
            tokio::spawn(async move { service.evaluate(&request.scope, &request.context).await })
        });

        let decisions = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(Ok(decision)) => decision,
                Ok(Err(e)) => Decision::deny_with_error(e.to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "Batch evaluation task failed");
                    Decision::deny_with_error("evaluation task failed")
                }
            })
            .collect();
        Ok(decisions)
    }

    async fn candidates(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        action: &str,
    ) -> PermissionsResult<Vec<Arc<CompiledPolicy>>> {
        if let Some(candidates) = self.cache.lookup(scope, resource_type, action).await {
            return Ok(candidates);
        }

        let compiler = self.compiler_for(scope);
        let mut candidates = Vec::new();
        let mut types = vec![resource_type];
        if resource_type != WILDCARD {
            types.push(WILDCARD);
        }
        for rt in types {
            let ticket = self.cache.ticket(scope).await;
            let policies = self.fetch_policies(scope, rt, ticket).await?;
            let (compiled, _) = self
                .load_compiled(scope, rt, &policies, compiler, ticket)
                .await;
            candidates.extend(compiled.into_iter().filter(|p| p.matches_action(action)));
        }
        Ok(order_candidates(candidates))
    }

    /// Raw policies of one resource type, from the shared cache when
    /// enabled and populated, otherwise from the store. A store read is
    /// written back to the shared cache only if no local write happened
    /// since `ticket`.
    async fn fetch_policies(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        ticket: LoadTicket,
    ) -> PermissionsResult<Vec<Policy>> {
        let shared = self.shared_cache();
        if let Some(shared) = shared {
            match shared.get(scope, resource_type).await {
                Ok(Some(policies)) => return Ok(policies),
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    scope = %scope,
                    resource_type = resource_type,
                    error = %e,
                    "Shared policy cache read failed"
                ),
            }
        }

        let policies = self
            .store
            .get_policies_by_resource_type(scope, resource_type)
            .await?;

        if let Some(shared) = shared
            && self.cache.ticket(scope).await == ticket
            && let Err(e) = shared
                .put(scope, resource_type, &policies, self.config.cache.shared_ttl)
                .await
        {
            tracing::warn!(
                scope = %scope,
                resource_type = resource_type,
                error = %e,
                "Shared policy cache write failed"
            );
        }
        Ok(policies)
    }

    /// Compile the enabled policies of one resource type and load them into
    /// the local cache. Returns the compiled set and the number skipped.
    ///
    /// The set is still returned when the cache refuses it because of a
    /// concurrent write; the caller's own request uses the snapshot it read.
    async fn load_compiled(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        policies: &[Policy],
        compiler: PolicyCompiler,
        ticket: LoadTicket,
    ) -> (Vec<Arc<CompiledPolicy>>, usize) {
        let mut compiled = Vec::new();
        let mut failed = 0;
        for policy in policies.iter().filter(|p| p.enabled) {
            match compiler.compile(policy) {
                Ok(program) => compiled.push(Arc::new(program)),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        scope = %scope,
                        policy_id = %policy.id,
                        error = %e,
                        "Skipping policy that failed to compile"
                    );
                }
            }
        }
        self.cache
            .load(scope, resource_type, compiled.clone(), ticket)
            .await;
        (compiled, failed)
    }

    // -------------------------------------------------------------------------
    // Warm-up
    // -------------------------------------------------------------------------

    /// Compile and cache every enabled policy of a scope.
    ///
    /// The `*` resource type is always loaded so that later lookups hit.
    pub async fn warm_cache(&self, scope: &TenantScope) -> PermissionsResult<WarmupReport> {
        scope.validate()?;
        let ticket = self.cache.ticket(scope).await;
        let policies = self.store.get_policies_for_scope(scope).await?;

        let mut by_type: BTreeMap<String, Vec<Policy>> = BTreeMap::new();
        by_type.entry(WILDCARD.to_string()).or_default();
        for policy in policies {
            by_type
                .entry(policy.resource_type.clone())
                .or_default()
                .push(policy);
        }

        let compiler = self.compiler_for(scope);
        let mut report = WarmupReport {
            scopes: 1,
            ..WarmupReport::default()
        };
        for (resource_type, policies) in &by_type {
            let (compiled, failed) = self
                .load_compiled(scope, resource_type, policies, compiler, ticket)
                .await;
            report.resource_types += 1;
            report.compiled += compiled.len();
            report.failed += failed;
        }

        tracing::info!(
            scope = %scope,
            resource_types = report.resource_types,
            compiled = report.compiled,
            failed = report.failed,
            "Warmed policy cache"
        );
        Ok(report)
    }

    /// Warm every scope known to the store. A scope that fails is logged and
    /// skipped.
    pub async fn warm_cache_for_all_apps(&self) -> PermissionsResult<WarmupReport> {
        let scopes = self.store.list_scopes().await?;
        let mut report = WarmupReport::default();
        for scope in &scopes {
            match self.warm_cache(scope).await {
                Ok(scope_report) => report.merge(&scope_report),
                Err(e) => tracing::warn!(scope = %scope, error = %e, "Failed to warm policy cache"),
            }
        }
        tracing::info!(
            scopes = report.scopes,
            compiled = report.compiled,
            failed = report.failed,
            "Policy cache warm-up completed"
        );
        Ok(report)
    }
}
