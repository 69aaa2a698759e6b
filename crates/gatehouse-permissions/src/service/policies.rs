//! Policy administration: CRUD, validation, dry-run testing and templates.

use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use uuid::Uuid;

use super::PolicyService;
use super::types::{TestCaseResult, TestPolicyRequest, TestPolicyResponse, ValidationResponse};
use crate::PermissionsResult;
use crate::audit::{AuditAction, AuditEventBuilder};
use crate::error::{FieldError, PermissionsError};
use crate::expression::Type;
use crate::model::{
    CreatePolicyRequest, Decision, Page, Policy, PolicyFilter, TenantScope, UpdatePolicyRequest,
    validate_targets,
};
use crate::templates::{PolicyTemplate, TemplateParams};

/// Share of the complexity ceiling above which validation warns.
const COMPLEXITY_WARNING_PERCENT: u32 = 80;

impl PolicyService {
    // -------------------------------------------------------------------------
    // CRUD
    // -------------------------------------------------------------------------

    /// Create a policy.
    ///
    /// The request is validated, compiled and checked against the tenant cap
    /// and existing names before anything is written; the default namespace
    /// is only created for a create that will be stored.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an invalid scope or missing targets
    /// - `NotFound` if the requested namespace is not in the scope
    /// - `CapacityExceeded` if the tenant is at its policy cap
    /// - `Conflict` if the name is taken
    /// - `InvalidExpression` / `ComplexityExceeded` if compilation fails
    /// - `Storage` if the store fails
    pub async fn create_policy(
        &self,
        scope: &TenantScope,
        actor: &str,
        request: CreatePolicyRequest,
    ) -> PermissionsResult<Policy> {
        scope.validate()?;
        validate_targets(&request.name, &request.resource_type, &request.actions)?;

        // Everything that can reject the request runs before the first write.
        let requested_namespace = match request.namespace_id {
            Some(id) => Some(self.scoped_namespace(scope, id).await?),
            None => None,
        };

        let now = OffsetDateTime::now_utc();
        let mut policy = Policy {
            id: Uuid::new_v4(),
            scope: scope.clone(),
            namespace_id: Uuid::nil(),
            name: request.name,
            description: request.description,
            expression: request.expression,
            resource_type: request.resource_type,
            actions: request.actions,
            priority: request.priority,
            enabled: request.enabled,
            version: 1,
            created_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        };

        let compiled = self.compiler_for(scope).compile(&policy)?;

        let cap = self
            .config
            .for_tenant(&scope.app_id, &scope.environment_id)
            .max_policies_per_tenant;
        let count = self.store.count_policies(scope).await?;
        if count >= cap {
            return Err(PermissionsError::capacity_exceeded(format!(
                "scope {} already holds {} policies (limit {})",
                scope, count, cap
            )));
        }

        if self
            .store
            .find_policy_by_name(scope, &policy.name)
            .await?
            .is_some()
        {
            return Err(PermissionsError::conflict(format!(
                "policy '{}' already exists in {}",
                policy.name, scope
            )));
        }

        let namespace = match requested_namespace {
            Some(namespace) => namespace,
            None => self.initialize_tenant(scope, actor, None).await?,
        };
        policy.namespace_id = namespace.id;

        let stored = self.store.create_policy(&policy).await.map_err(|e| {
            tracing::error!(scope = %scope, policy = %policy.name, error = %e, "Failed to store policy");
            e
        })?;

        if stored.enabled {
            self.cache.put(Arc::new(compiled)).await;
        }
        self.resource_type_changed(scope, &stored.resource_type).await;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::PolicyCreate, stored.id)
                .new_value(&stored)
                .build(),
        )
        .await;

        tracing::info!(
            scope = %scope,
            policy_id = %stored.id,
            name = %stored.name,
            resource_type = %stored.resource_type,
            "Created policy"
        );
        Ok(stored)
    }

    /// Get a policy of the scope.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the policy doesn't exist or belongs to another
    /// scope.
    pub async fn get_policy(&self, scope: &TenantScope, id: Uuid) -> PermissionsResult<Policy> {
        scope.validate()?;
        self.store
            .get_policy(id)
            .await?
            .filter(|p| p.scope == *scope)
            .ok_or_else(|| PermissionsError::not_found("policy", id))
    }

    /// List policies of the scope.
    pub async fn list_policies(
        &self,
        scope: &TenantScope,
        filter: &PolicyFilter,
    ) -> PermissionsResult<Page<Policy>> {
        scope.validate()?;
        self.store.list_policies(scope, filter).await
    }

    /// Look up a policy by name within the scope.
    pub async fn find_policy_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Policy>> {
        scope.validate()?;
        self.store.find_policy_by_name(scope, name).await
    }

    /// Apply a partial update. The version is bumped and the expression is
    /// recompiled before anything is stored.
    ///
    /// # Errors
    ///
    /// Same as [`PolicyService::create_policy`], minus the capacity check.
    pub async fn update_policy(
        &self,
        scope: &TenantScope,
        actor: &str,
        id: Uuid,
        request: UpdatePolicyRequest,
    ) -> PermissionsResult<Policy> {
        let current = self.get_policy(scope, id).await?;
        let updated = request.apply(&current, OffsetDateTime::now_utc());
        validate_targets(&updated.name, &updated.resource_type, &updated.actions)?;

        if updated.name != current.name
            && self
                .store
                .find_policy_by_name(scope, &updated.name)
                .await?
                .is_some()
        {
            return Err(PermissionsError::conflict(format!(
                "policy '{}' already exists in {}",
                updated.name, scope
            )));
        }

        let compiled = self.compiler_for(scope).compile(&updated)?;

        let stored = self.store.update_policy(&updated).await.map_err(|e| {
            tracing::error!(scope = %scope, policy_id = %id, error = %e, "Failed to update policy");
            e
        })?;

        if stored.enabled {
            self.cache.put(Arc::new(compiled)).await;
        } else {
            self.cache.invalidate_by_policy(id).await;
        }
        self.resource_type_changed(scope, &current.resource_type)
            .await;
        if stored.resource_type != current.resource_type {
            self.resource_type_changed(scope, &stored.resource_type)
                .await;
        }
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::PolicyUpdate, id)
                .old_value(&current)
                .new_value(&stored)
                .build(),
        )
        .await;

        tracing::info!(
            scope = %scope,
            policy_id = %id,
            version = stored.version,
            recompiled = request.requires_recompile(&current),
            "Updated policy"
        );
        Ok(stored)
    }

    /// Delete a policy and drop it from the cache.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the policy doesn't exist or belongs to another
    /// scope.
    pub async fn delete_policy(
        &self,
        scope: &TenantScope,
        actor: &str,
        id: Uuid,
    ) -> PermissionsResult<()> {
        let current = self.get_policy(scope, id).await?;
        self.store.delete_policy(id).await.map_err(|e| {
            tracing::error!(scope = %scope, policy_id = %id, error = %e, "Failed to delete policy");
            e
        })?;

        self.cache.invalidate_by_policy(id).await;
        self.resource_type_changed(scope, &current.resource_type)
            .await;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::PolicyDelete, id)
                .old_value(&current)
                .build(),
        )
        .await;

        tracing::info!(scope = %scope, policy_id = %id, "Deleted policy");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Validation and dry runs
    // -------------------------------------------------------------------------

    /// Check an expression against the scope's compiler without storing
    /// anything.
    #[must_use]
    pub fn validate_policy(&self, scope: &TenantScope, expression: &str) -> ValidationResponse {
        let compiler = self.compiler_for(scope);
        let max_complexity = compiler.max_complexity();

        let info = match compiler.analyze(expression) {
            Ok(info) => info,
            Err(err) => {
                let complexity = compiler.estimate_complexity(expression).unwrap_or(0);
                return ValidationResponse {
                    valid: false,
                    errors: PermissionsError::from(err).field_errors(),
                    warnings: Vec::new(),
                    complexity,
                    max_complexity,
                };
            }
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        if info.complexity > max_complexity {
            errors.push(FieldError::new(
                "expression",
                PermissionsError::ComplexityExceeded {
                    complexity: info.complexity,
                    max: max_complexity,
                }
                .to_string(),
            ));
        } else if info.complexity * 100 > max_complexity * COMPLEXITY_WARNING_PERCENT {
            warnings.push(format!(
                "complexity {} is above {}% of the limit {}",
                info.complexity, COMPLEXITY_WARNING_PERCENT, max_complexity
            ));
        }
        if info.result_type == Type::Dyn {
            warnings.push(
                "result type is only known at evaluation time; non-boolean results deny"
                    .to_string(),
            );
        }

        ValidationResponse {
            valid: errors.is_empty(),
            errors,
            warnings,
            complexity: info.complexity,
            max_complexity,
        }
    }

    /// Compile an unsaved policy and run it against the caller's test cases.
    ///
    /// Cases whose action or resource type the policy does not target are
    /// denied without evaluation, as they would be in production.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an invalid scope or missing targets.
    /// Compile failures are reported in the response.
    pub async fn test_policy(
        &self,
        scope: &TenantScope,
        request: TestPolicyRequest,
    ) -> PermissionsResult<TestPolicyResponse> {
        scope.validate()?;
        validate_targets("test", &request.resource_type, &request.actions)?;

        let now = OffsetDateTime::now_utc();
        let draft = Policy {
            id: Uuid::new_v4(),
            scope: scope.clone(),
            namespace_id: Uuid::nil(),
            name: "test".to_string(),
            description: String::new(),
            expression: request.expression,
            resource_type: request.resource_type,
            actions: request.actions,
            priority: 0,
            enabled: true,
            version: 1,
            created_by: String::new(),
            created_at: now,
            updated_at: now,
        };

        let compiled = match self.compiler_for(scope).compile(&draft) {
            Ok(compiled) => Arc::new(compiled),
            Err(err) => {
                return Ok(TestPolicyResponse {
                    valid: false,
                    errors: PermissionsError::from(err).field_errors(),
                    results: Vec::new(),
                    passed: 0,
                    failed: 0,
                });
            }
        };

        let evaluator = self.evaluator_for(scope);
        let mut results = Vec::with_capacity(request.test_cases.len());
        for case in request.test_cases {
            let started = Instant::now();
            let decision = if let Err(e) = case.context.validate() {
                Decision::deny_with_error(e.to_string())
            } else if draft.matches_resource_type(&case.context.resource.resource_type)
                && compiled.matches_action(&case.context.action)
            {
                evaluator
                    .evaluate(std::slice::from_ref(&compiled), &case.context)
                    .await
            } else {
                Decision::deny()
            };

            results.push(TestCaseResult {
                passed: decision.allowed == case.expected,
                name: case.name,
                expected: case.expected,
                actual: decision.allowed,
                error: decision.error,
                duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            });
        }

        let passed = results.iter().filter(|r| r.passed).count();
        Ok(TestPolicyResponse {
            valid: true,
            errors: Vec::new(),
            failed: results.len() - passed,
            passed,
            results,
        })
    }

    // -------------------------------------------------------------------------
    // Templates
    // -------------------------------------------------------------------------

    /// Every built-in template.
    #[must_use]
    pub fn list_templates(&self) -> &'static [PolicyTemplate] {
        self.templates.list()
    }

    /// One built-in template.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown id.
    pub fn get_template(&self, id: &str) -> PermissionsResult<&'static PolicyTemplate> {
        self.templates
            .get(id)
            .ok_or_else(|| PermissionsError::not_found("template", id))
    }

    /// Render a template into a create request without storing it.
    pub fn instantiate_template(
        &self,
        id: &str,
        params: &TemplateParams,
    ) -> PermissionsResult<CreatePolicyRequest> {
        self.templates.instantiate(id, params)
    }

    /// Render a template and create the resulting policy.
    pub async fn create_policy_from_template(
        &self,
        scope: &TenantScope,
        actor: &str,
        template_id: &str,
        params: &TemplateParams,
    ) -> PermissionsResult<Policy> {
        let request = self.templates.instantiate(template_id, params)?;
        self.create_policy(scope, actor, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PermissionsConfig, TenantOverride};
    use crate::model::{EvaluationContext, PrincipalContext, ResourceContext};
    use crate::service::PolicyTestCase;
    use crate::testing::{MockAuditLog, MockPolicyStore};
    use serde_json::json;

    fn scope() -> TenantScope {
        TenantScope::new("app", "prod")
    }

    fn service() -> PolicyService {
        PolicyService::new(MockPolicyStore::new(), PermissionsConfig::default())
    }

    fn request(name: &str, expression: &str) -> CreatePolicyRequest {
        CreatePolicyRequest::new(name, expression, "document", vec!["read".to_string()])
    }

    #[tokio::test]
    async fn test_create_policy_assigns_defaults() {
        let service = service();
        let policy = service
            .create_policy(&scope(), "alice", request("owner", "resource.owner == principal.id"))
            .await
            .unwrap();

        assert_eq!(policy.version, 1);
        assert_eq!(policy.created_by, "alice");
        assert!(policy.enabled);

        let namespaces = service.list_namespaces(&scope()).await.unwrap();
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].id, policy.namespace_id);
    }

    #[tokio::test]
    async fn test_create_policy_rejects_invalid_expression() {
        let service = service();
        let err = service
            .create_policy(&scope(), "alice", request("bad", "resource.owner == "))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::InvalidExpression { .. }));

        let err = service
            .create_policy(&scope(), "alice", request("typo", "principle.id == \"x\""))
            .await
            .unwrap_err();
        assert!(err.is_compile_error());

        let page = service
            .list_policies(&scope(), &PolicyFilter::new())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_create_policy_enforces_complexity_ceiling() {
        let mut config = PermissionsConfig::default();
        config.engine.max_policy_complexity = 10;
        let service = PolicyService::new(MockPolicyStore::new(), config);

        let expression = "principal.roles.exists(r, r == \"a\") && principal.roles.exists(r, r == \"b\")";
        let err = service
            .create_policy(&scope(), "alice", request("complex", expression))
            .await
            .unwrap_err();
        match err {
            PermissionsError::ComplexityExceeded { complexity, max } => {
                assert!(complexity > 10);
                assert_eq!(max, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_policy_rejects_duplicate_name() {
        let service = service();
        service
            .create_policy(&scope(), "alice", request("dup", "true"))
            .await
            .unwrap();
        let err = service
            .create_policy(&scope(), "alice", request("dup", "true"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::Conflict { .. }));

        // Names are unique per scope only.
        let other = TenantScope::new("app", "dev");
        assert!(
            service
                .create_policy(&other, "alice", request("dup", "true"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_create_policy_enforces_tenant_cap() {
        let mut config = PermissionsConfig::default();
        config.tenants.insert(
            "app:prod".to_string(),
            TenantOverride {
                max_policies_per_tenant: Some(2),
                ..Default::default()
            },
        );
        let service = PolicyService::new(MockPolicyStore::new(), config);

        for name in ["a", "b"] {
            service
                .create_policy(&scope(), "alice", request(name, "true"))
                .await
                .unwrap();
        }
        let err = service
            .create_policy(&scope(), "alice", request("c", "true"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn test_rejected_create_writes_nothing() {
        let mut config = PermissionsConfig::default();
        config.engine.max_policy_complexity = 10;
        config.tenants.insert(
            "app:prod".to_string(),
            TenantOverride {
                max_policies_per_tenant: Some(0),
                ..Default::default()
            },
        );
        let audit = MockAuditLog::new();
        let service =
            PolicyService::new(MockPolicyStore::new(), config).with_audit_log(audit.clone());

        let err = service
            .create_policy(&scope(), "alice", request("unknown", "foo.bar == 1"))
            .await
            .unwrap_err();
        assert!(err.is_compile_error());

        let complex = "principal.roles.exists(r, r == \"a\") && principal.roles.exists(r, r == \"b\")";
        let err = service
            .create_policy(&scope(), "alice", request("complex", complex))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::ComplexityExceeded { .. }));

        let err = service
            .create_policy(&scope(), "alice", request("capped", "true"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::CapacityExceeded { .. }));

        assert!(service.list_namespaces(&scope()).await.unwrap().is_empty());
        assert!(audit.events().is_empty());
    }

    #[tokio::test]
    async fn test_create_policy_store_failure_leaves_cache_untouched() {
        let store = MockPolicyStore::new();
        let service = PolicyService::new(store.clone(), PermissionsConfig::default());
        service
            .create_policy(&scope(), "alice", request("first", "true"))
            .await
            .unwrap();

        store.set_failing(true);
        let err = service
            .create_policy(&scope(), "alice", request("second", "true"))
            .await
            .unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(service.cache_stats().await.policy_count, 1);
    }

    #[tokio::test]
    async fn test_get_policy_hides_other_scopes() {
        let service = service();
        let policy = service
            .create_policy(&scope(), "alice", request("p", "true"))
            .await
            .unwrap();

        assert!(service.get_policy(&scope(), policy.id).await.is_ok());
        let err = service
            .get_policy(&TenantScope::new("other", "prod"), policy.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_policy_bumps_version_and_audits() {
        let audit = MockAuditLog::new();
        let service = service().with_audit_log(audit.clone());
        let policy = service
            .create_policy(&scope(), "alice", request("p", "true"))
            .await
            .unwrap();

        let updated = service
            .update_policy(
                &scope(),
                "bob",
                policy.id,
                UpdatePolicyRequest {
                    expression: Some("has_role(\"editor\")".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.expression, "has_role(\"editor\")");

        let actions: Vec<_> = audit.events().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::NamespaceCreate,
                AuditAction::PolicyCreate,
                AuditAction::PolicyUpdate
            ]
        );
        let events = audit.events();
        let update = &events[2];
        assert_eq!(update.old_value.as_ref().unwrap()["version"], json!(1));
        assert_eq!(update.new_value.as_ref().unwrap()["version"], json!(2));
    }

    #[tokio::test]
    async fn test_update_policy_rejects_invalid_expression() {
        let service = service();
        let policy = service
            .create_policy(&scope(), "alice", request("p", "true"))
            .await
            .unwrap();

        let err = service
            .update_policy(
                &scope(),
                "alice",
                policy.id,
                UpdatePolicyRequest {
                    expression: Some("1 + 1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_compile_error());

        let stored = service.get_policy(&scope(), policy.id).await.unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_delete_policy_checks_scope() {
        let service = service();
        let policy = service
            .create_policy(&scope(), "alice", request("p", "true"))
            .await
            .unwrap();

        let err = service
            .delete_policy(&TenantScope::new("app", "dev"), "mallory", policy.id)
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionsError::NotFound { .. }));

        service
            .delete_policy(&scope(), "alice", policy.id)
            .await
            .unwrap();
        assert!(service.get_policy(&scope(), policy.id).await.is_err());
        assert_eq!(service.cache_stats().await.policy_count, 0);
    }

    #[test]
    fn test_validate_policy_reports_position() {
        let service = service();
        let response = service.validate_policy(&scope(), "resource.owner == principle.id");
        assert!(!response.valid);
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].field, "expression");
        assert_eq!(response.errors[0].position, Some(18));
        assert_eq!(response.max_complexity, 100);
    }

    #[test]
    fn test_validate_policy_warns_near_ceiling() {
        let mut config = PermissionsConfig::default();
        config.engine.max_policy_complexity = 10;
        let service = PolicyService::new(MockPolicyStore::new(), config);

        // && (1) + owner comparison (5) + type comparison (4) = 10
        let response = service.validate_policy(
            &scope(),
            "resource.owner == principal.id && resource.type == \"doc\"",
        );
        assert!(response.valid, "{response:?}");
        assert_eq!(response.complexity, 10);
        assert_eq!(response.warnings.len(), 1);

        let response = service.validate_policy(&scope(), "true");
        assert!(response.valid);
        assert!(response.warnings.is_empty());
        assert_eq!(response.complexity, 1);
    }

    #[test]
    fn test_validate_policy_rejects_over_ceiling() {
        let mut config = PermissionsConfig::default();
        config.engine.max_policy_complexity = 10;
        let service = PolicyService::new(MockPolicyStore::new(), config);

        let response = service.validate_policy(
            &scope(),
            "principal.roles.exists(r, r == \"a\") || principal.roles.exists(r, r == \"b\")",
        );
        assert!(!response.valid);
        assert!(response.errors[0].message.contains("exceeds maximum 10"));
    }

    #[tokio::test]
    async fn test_test_policy_runs_cases() {
        let service = service();
        let owner = EvaluationContext::new(
            PrincipalContext::new("u1"),
            ResourceContext::new("document").with_owner("u1"),
            "read",
        );
        let stranger = EvaluationContext::new(
            PrincipalContext::new("u2"),
            ResourceContext::new("document").with_owner("u1"),
            "read",
        );
        let wrong_action = EvaluationContext::new(
            PrincipalContext::new("u1"),
            ResourceContext::new("document").with_owner("u1"),
            "delete",
        );

        let response = service
            .test_policy(
                &scope(),
                TestPolicyRequest {
                    expression: "resource.owner == principal.id".to_string(),
                    resource_type: "document".to_string(),
                    actions: vec!["read".to_string()],
                    test_cases: vec![
                        PolicyTestCase {
                            name: "owner".to_string(),
                            context: owner,
                            expected: true,
                        },
                        PolicyTestCase {
                            name: "stranger".to_string(),
                            context: stranger,
                            expected: true,
                        },
                        PolicyTestCase {
                            name: "untargeted action".to_string(),
                            context: wrong_action,
                            expected: false,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        assert!(response.valid);
        assert_eq!(response.passed, 2);
        assert_eq!(response.failed, 1);
        assert!(!response.results[1].passed);
        assert!(!response.results[1].actual);
        assert!(service.list_policies(&scope(), &PolicyFilter::new()).await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn test_test_policy_reports_compile_errors() {
        let response = service()
            .test_policy(
                &scope(),
                TestPolicyRequest {
                    expression: "1 + 1".to_string(),
                    resource_type: "document".to_string(),
                    actions: vec!["read".to_string()],
                    test_cases: Vec::new(),
                },
            )
            .await
            .unwrap();
        assert!(!response.valid);
        assert!(!response.errors.is_empty());
        assert!(response.results.is_empty());
    }

    #[tokio::test]
    async fn test_create_policy_from_template() {
        let service = service();
        let policy = service
            .create_policy_from_template(
                &scope(),
                "alice",
                "owner-only",
                &TemplateParams::new().with_resource_type("document"),
            )
            .await
            .unwrap();
        assert_eq!(policy.resource_type, "document");
        assert!(policy.expression.contains("resource.owner"));

        let err = service.get_template("nope").unwrap_err();
        assert!(matches!(err, PermissionsError::NotFound { .. }));
        assert!(!service.list_templates().is_empty());
    }
}
