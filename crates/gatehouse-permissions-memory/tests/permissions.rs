//! End-to-end behaviour of the policy service over the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use gatehouse_permissions::model::{
    CreateNamespaceRequest, CreatePolicyRequest, PolicyFilter, UpdatePolicyRequest,
};
use gatehouse_permissions::{
    AuditAction, AuditFilter, CacheBackend, CacheInvalidationListener, EvaluateRequest, EvaluationContext,
    PermissionsConfig, PermissionsError, PolicyChangeNotifier, PolicyService, PolicyStore,
    PrincipalContext, ResourceContext, TenantScope,
};
use gatehouse_permissions_memory::{InMemoryBackend, InMemoryPolicyStore, create_policy_service};
use serde_json::json;

fn tenant_a() -> TenantScope {
    TenantScope::new("app-a", "prod")
}

fn tenant_b() -> TenantScope {
    TenantScope::new("app-b", "prod")
}

fn owner_policy() -> CreatePolicyRequest {
    CreatePolicyRequest::new(
        "document-owner",
        "resource.owner == principal.id",
        "document",
        vec!["read".to_string()],
    )
}

fn read_document(principal: &str, owner: &str) -> EvaluationContext {
    EvaluationContext::new(
        PrincipalContext::new(principal),
        ResourceContext::new("document").with_owner(owner),
        "read",
    )
}

#[tokio::test]
async fn test_owner_policy_allows_only_owner() {
    let service = create_policy_service(PermissionsConfig::default());
    service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();

    let allowed = service
        .evaluate(&tenant_a(), &read_document("u1", "u1"))
        .await
        .unwrap();
    assert!(allowed.allowed);
    assert_eq!(allowed.evaluated_policies, 1);
    assert_eq!(allowed.matched_policies.len(), 1);

    let denied = service
        .evaluate(&tenant_a(), &read_document("u1", "u2"))
        .await
        .unwrap();
    assert!(!denied.allowed);
}

#[tokio::test]
async fn test_default_deny_without_policies() {
    let service = create_policy_service(PermissionsConfig::default());
    let ctx = EvaluationContext::new(
        PrincipalContext::new("u1"),
        ResourceContext::new("invoice"),
        "read",
    );

    let decision = service.evaluate(&tenant_a(), &ctx).await.unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policies, 0);
}

#[tokio::test]
async fn test_wildcard_action_matches_any_action() {
    let service = create_policy_service(PermissionsConfig::default());
    service
        .create_policy(
            &tenant_a(),
            "admin",
            CreatePolicyRequest::new(
                "admins",
                "principal.roles.exists(r, r == \"admin\")",
                "document",
                vec!["*".to_string()],
            ),
        )
        .await
        .unwrap();

    let ctx = EvaluationContext::new(
        PrincipalContext::new("u1").with_roles(["admin"]),
        ResourceContext::new("document"),
        "anything",
    );
    assert!(service.evaluate(&tenant_a(), &ctx).await.unwrap().allowed);
}

#[tokio::test]
async fn test_disabling_policy_takes_effect_immediately() {
    let service = create_policy_service(PermissionsConfig::default());
    let policy = service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();
    assert!(
        service
            .evaluate(&tenant_a(), &read_document("u1", "u1"))
            .await
            .unwrap()
            .allowed
    );

    service
        .update_policy(
            &tenant_a(),
            "admin",
            policy.id,
            UpdatePolicyRequest {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let decision = service
        .evaluate(&tenant_a(), &read_document("u1", "u1"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policies, 0);
}

#[tokio::test]
async fn test_updated_expression_is_visible_to_next_evaluation() {
    let service = create_policy_service(PermissionsConfig::default());
    let policy = service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();
    assert!(
        !service
            .evaluate(&tenant_a(), &read_document("u1", "u2"))
            .await
            .unwrap()
            .allowed
    );

    service
        .update_policy(
            &tenant_a(),
            "admin",
            policy.id,
            UpdatePolicyRequest {
                expression: Some("resource.owner != principal.id".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(
        service
            .evaluate(&tenant_a(), &read_document("u1", "u2"))
            .await
            .unwrap()
            .allowed
    );
}

#[tokio::test]
async fn test_complexity_ceiling_rejects_before_storing() {
    let mut config = PermissionsConfig::default();
    config.engine.max_policy_complexity = 10;
    let backend = InMemoryBackend::new();
    let service = backend.policy_service(config);

    let err = service
        .create_policy(
            &tenant_a(),
            "admin",
            CreatePolicyRequest::new(
                "too-complex",
                "principal.roles.exists(r, r == \"admin\")",
                "document",
                vec!["read".to_string()],
            ),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PermissionsError::ComplexityExceeded { complexity: 14, max: 10 }
    ));
    assert!(backend.store.is_empty());
    assert_eq!(service.cache_stats().await.entry_count, 0);
}

#[tokio::test]
async fn test_scopes_are_isolated() {
    let service = create_policy_service(PermissionsConfig::default());
    let policy = service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();

    let err = service.get_policy(&tenant_b(), policy.id).await.unwrap_err();
    assert!(matches!(err, PermissionsError::NotFound { .. }));
    assert!(
        service
            .delete_policy(&tenant_b(), "mallory", policy.id)
            .await
            .is_err()
    );

    let decision = service
        .evaluate(&tenant_b(), &read_document("u1", "u1"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(decision.evaluated_policies, 0);
}

#[tokio::test]
async fn test_undeclared_identifier_is_rejected_everywhere() {
    let backend = InMemoryBackend::new();
    let service = backend.policy_service(PermissionsConfig::default());

    let validation = service.validate_policy(&tenant_a(), "foo.bar == \"x\"");
    assert!(!validation.valid);
    assert!(validation.errors[0].message.contains("foo"));

    let err = service
        .create_policy(
            &tenant_a(),
            "admin",
            CreatePolicyRequest::new("bad", "foo.bar == \"x\"", "document", vec![
                "read".to_string(),
            ]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PermissionsError::InvalidExpression { .. }));
    assert!(backend.store.is_empty());
    assert!(service.list_namespaces(&tenant_a()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_namespace_with_policies_cannot_be_deleted() {
    let service = create_policy_service(PermissionsConfig::default());
    let namespace = service
        .create_namespace(
            &tenant_a(),
            "admin",
            CreateNamespaceRequest {
                name: "billing".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let policy = service
        .create_policy(
            &tenant_a(),
            "admin",
            owner_policy().with_namespace(namespace.id),
        )
        .await
        .unwrap();

    let err = service
        .delete_namespace(&tenant_a(), "admin", namespace.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PermissionsError::NamespaceNotEmpty { policy_count: 1, .. }
    ));

    service
        .delete_policy(&tenant_a(), "admin", policy.id)
        .await
        .unwrap();
    service
        .delete_namespace(&tenant_a(), "admin", namespace.id)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_batch_over_limit_is_rejected() {
    let mut config = PermissionsConfig::default();
    config.engine.max_batch_size = 2;
    let service = create_policy_service(config);
    service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();

    let request = |owner: &str| EvaluateRequest::new(tenant_a(), read_document("u1", owner));
    let decisions = service
        .evaluate_batch(vec![request("u1"), request("u2")])
        .await
        .unwrap();
    assert_eq!(
        decisions.iter().map(|d| d.allowed).collect::<Vec<_>>(),
        vec![true, false]
    );

    let err = service
        .evaluate_batch(vec![request("u1"), request("u1"), request("u1")])
        .await
        .unwrap_err();
    assert!(matches!(err, PermissionsError::CapacityExceeded { .. }));
}

#[tokio::test]
async fn test_failing_policy_does_not_block_others() {
    let service = create_policy_service(PermissionsConfig::default());
    service
        .create_policy(
            &tenant_a(),
            "admin",
            CreatePolicyRequest::new(
                "broken",
                "resource.level > 3",
                "document",
                vec!["read".to_string()],
            ),
        )
        .await
        .unwrap();
    service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();

    let ctx = EvaluationContext::new(
        PrincipalContext::new("u1"),
        ResourceContext::new("document")
            .with_owner("u1")
            .with_attribute("level", json!("high")),
        "read",
    );
    let decision = service.evaluate(&tenant_a(), &ctx).await.unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_mutations_are_audited() {
    let backend = InMemoryBackend::new();
    let service = backend.policy_service(PermissionsConfig::default());
    let policy = service
        .create_policy(&tenant_a(), "alice", owner_policy())
        .await
        .unwrap();
    service
        .delete_policy(&tenant_a(), "bob", policy.id)
        .await
        .unwrap();

    let events = service
        .list_audit_events(
            &tenant_a(),
            &AuditFilter::new().with_resource_id(policy.id),
        )
        .await
        .unwrap();
    let actions: Vec<AuditAction> = events.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::PolicyDelete, AuditAction::PolicyCreate]);
    assert_eq!(events[0].actor, "bob");
}

#[tokio::test]
async fn test_hybrid_cache_warms_from_shared_store() {
    let mut config = PermissionsConfig::default();
    config.cache.backend = CacheBackend::Hybrid;
    let backend = InMemoryBackend::new();
    let writer = backend.policy_service(config.clone());
    writer
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();

    let reader = backend.policy_service(config);
    assert!(
        reader
            .evaluate(&tenant_a(), &read_document("u1", "u1"))
            .await
            .unwrap()
            .allowed
    );
    assert!(backend.shared_cache.contains(&tenant_a(), "document"));
}

#[tokio::test]
async fn test_peer_cache_is_invalidated_by_notifier() {
    let store = Arc::new(InMemoryPolicyStore::new());
    let notifier = Arc::new(PolicyChangeNotifier::new(64));
    let writer = PolicyService::new(store.clone(), PermissionsConfig::default())
        .with_notifier(notifier.clone());
    let reader = Arc::new(
        PolicyService::new(store.clone(), PermissionsConfig::default())
            .with_notifier(notifier.clone()),
    );

    let listener = Arc::new(reader.invalidation_listener().unwrap());
    let handle = tokio::spawn({
        let listener = listener.clone();
        async move { listener.run().await }
    });
    tokio::task::yield_now().await;

    let policy = writer
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();
    wait_for_applied(&listener, 1).await;
    assert!(
        reader
            .evaluate(&tenant_a(), &read_document("u1", "u1"))
            .await
            .unwrap()
            .allowed
    );

    writer
        .update_policy(
            &tenant_a(),
            "admin",
            policy.id,
            UpdatePolicyRequest {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    wait_for_applied(&listener, 2).await;
    assert!(
        !reader
            .evaluate(&tenant_a(), &read_document("u1", "u1"))
            .await
            .unwrap()
            .allowed
    );

    listener.shutdown();
    handle.await.unwrap();
}

async fn wait_for_applied(listener: &CacheInvalidationListener, applied: u64) {
    for _ in 0..200 {
        if listener.stats().messages_applied >= applied {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("listener applied fewer than {applied} invalidations");
}

#[tokio::test]
async fn test_template_parameters_are_escaped() {
    let backend = InMemoryBackend::new();
    let service = backend.policy_service(PermissionsConfig::default());

    let policy = service
        .create_policy_from_template(
            &tenant_a(),
            "admin",
            "role-required",
            &gatehouse_permissions::TemplateParams::new()
                .with_resource_type("document")
                .with_value("role", json!("admin\") || true || (\"")),
        )
        .await
        .unwrap();

    let outsider = EvaluationContext::new(
        PrincipalContext::new("u9"),
        ResourceContext::new("document"),
        "read",
    );
    assert!(!service.evaluate(&tenant_a(), &outsider).await.unwrap().allowed);
    assert!(
        store_has(&backend, &tenant_a(), &policy.name).await,
        "template policy should be stored"
    );
}

async fn store_has(backend: &InMemoryBackend, scope: &TenantScope, name: &str) -> bool {
    backend
        .store
        .find_policy_by_name(scope, name)
        .await
        .unwrap()
        .is_some()
}

#[tokio::test]
async fn test_warm_cache_for_all_apps() {
    let backend = InMemoryBackend::new();
    let service = backend.policy_service(PermissionsConfig::default());
    service
        .create_policy(&tenant_a(), "admin", owner_policy())
        .await
        .unwrap();
    service
        .create_policy(&tenant_b(), "admin", owner_policy())
        .await
        .unwrap();

    let fresh = backend.policy_service(PermissionsConfig::default());
    let report = fresh.warm_cache_for_all_apps().await.unwrap();
    assert_eq!(report.scopes, 2);
    assert_eq!(report.compiled, 2);
    assert_eq!(report.failed, 0);

    let listed = fresh
        .list_policies(&tenant_a(), &PolicyFilter::new())
        .await
        .unwrap();
    assert_eq!(listed.total, 1);
}
