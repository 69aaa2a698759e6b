//! Fixtures shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::PermissionsResult;
use crate::audit::{AuditEvent, AuditFilter, AuditLog};
use crate::error::PermissionsError;
use crate::expression::{CompiledPolicy, PolicyCompiler};
use crate::migration::{LegacyPolicy, LegacyRbacSource, LegacyRole};
use crate::model::{
    ActionDefinition, Namespace, Page, Policy, PolicyFilter, ResourceDefinition, TenantScope,
};
use crate::storage::{PolicyStore, SharedPolicyCache};

// =============================================================================
// Compiled policies
// =============================================================================

pub(crate) fn policy(
    scope: &TenantScope,
    name: &str,
    expression: &str,
    resource_type: &str,
    actions: &[&str],
    priority: i32,
) -> Policy {
    let now = OffsetDateTime::now_utc();
    Policy {
        id: Uuid::new_v4(),
        scope: scope.clone(),
        namespace_id: Uuid::nil(),
        name: name.to_string(),
        description: String::new(),
        expression: expression.to_string(),
        resource_type: resource_type.to_string(),
        actions: actions.iter().map(|a| a.to_string()).collect(),
        priority,
        enabled: true,
        version: 1,
        created_by: "test".to_string(),
        created_at: now,
        updated_at: now,
    }
}

/// An always-true compiled policy with the given targets.
pub(crate) fn compiled(
    scope: &TenantScope,
    name: &str,
    resource_type: &str,
    actions: &[&str],
    priority: i32,
) -> Arc<CompiledPolicy> {
    let policy = policy(scope, name, "true", resource_type, actions, priority);
    Arc::new(PolicyCompiler::default().compile(&policy).unwrap())
}

/// A compiled `document`/`read` policy with the given expression.
pub(crate) fn compiled_expr(
    scope: &TenantScope,
    name: &str,
    expression: &str,
    priority: i32,
) -> Arc<CompiledPolicy> {
    let policy = policy(scope, name, expression, "document", &["read"], priority);
    Arc::new(PolicyCompiler::default().compile(&policy).unwrap())
}

// =============================================================================
// Mock policy store
// =============================================================================

#[derive(Default)]
struct StoreState {
    policies: Vec<Policy>,
    namespaces: Vec<Namespace>,
    resources: Vec<ResourceDefinition>,
    actions: Vec<ActionDefinition>,
}

/// Pauses one `get_policies_by_resource_type` call after it has read.
struct FetchGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

/// Vec-backed store with a failure switch, a fetch counter and a gate.
#[derive(Default)]
pub(crate) struct MockPolicyStore {
    state: Mutex<StoreState>,
    failing: AtomicBool,
    fetches: AtomicUsize,
    gate: Mutex<Option<FetchGate>>,
}

impl MockPolicyStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent call fail with a storage error.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Hold the next `get_policies_by_resource_type` call after it has taken
    /// its snapshot. Returns `(reached, release)`: `reached` is notified once
    /// the call is paused, and notifying `release` lets it return.
    pub(crate) fn pause_next_fetch(&self) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(FetchGate {
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        (reached, release)
    }

    /// Number of `get_policies_by_resource_type` calls.
    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check(&self) -> PermissionsResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PermissionsError::storage("mock store unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PolicyStore for MockPolicyStore {
    async fn create_policy(&self, policy: &Policy) -> PermissionsResult<Policy> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if state
            .policies
            .iter()
            .any(|p| p.scope == policy.scope && p.name == policy.name)
        {
            return Err(PermissionsError::conflict(format!(
                "policy '{}' already exists",
                policy.name
            )));
        }
        state.policies.push(policy.clone());
        Ok(policy.clone())
    }

    async fn get_policy(&self, id: Uuid) -> PermissionsResult<Option<Policy>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.policies.iter().find(|p| p.id == id).cloned())
    }

    async fn find_policy_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Policy>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .policies
            .iter()
            .find(|p| p.scope == *scope && p.name == name)
            .cloned())
    }

    async fn list_policies(
        &self,
        scope: &TenantScope,
        filter: &PolicyFilter,
    ) -> PermissionsResult<Page<Policy>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut matching: Vec<Policy> = state
            .policies
            .iter()
            .filter(|p| p.scope == *scope && filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.name.cmp(&b.name)));
        Ok(Page::from_vec(matching, filter.limit(), filter.offset()))
    }

    async fn update_policy(&self, policy: &Policy) -> PermissionsResult<Policy> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let slot = state
            .policies
            .iter_mut()
            .find(|p| p.id == policy.id)
            .ok_or_else(|| PermissionsError::not_found("policy", policy.id))?;
        *slot = policy.clone();
        Ok(policy.clone())
    }

    async fn delete_policy(&self, id: Uuid) -> PermissionsResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let before = state.policies.len();
        state.policies.retain(|p| p.id != id);
        if state.policies.len() == before {
            return Err(PermissionsError::not_found("policy", id));
        }
        Ok(())
    }

    async fn get_policies_by_resource_type(
        &self,
        scope: &TenantScope,
        resource_type: &str,
    ) -> PermissionsResult<Vec<Policy>> {
        self.check()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot: Vec<Policy> = self
            .state
            .lock()
            .unwrap()
            .policies
            .iter()
            .filter(|p| p.scope == *scope && p.resource_type == resource_type)
            .cloned()
            .collect();

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        Ok(snapshot)
    }

    async fn get_policies_for_scope(&self, scope: &TenantScope) -> PermissionsResult<Vec<Policy>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .policies
            .iter()
            .filter(|p| p.scope == *scope)
            .cloned()
            .collect())
    }

    async fn count_policies(&self, scope: &TenantScope) -> PermissionsResult<usize> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.policies.iter().filter(|p| p.scope == *scope).count())
    }

    async fn count_namespace_policies(&self, namespace_id: Uuid) -> PermissionsResult<usize> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .policies
            .iter()
            .filter(|p| p.namespace_id == namespace_id)
            .count())
    }

    async fn list_scopes(&self) -> PermissionsResult<Vec<TenantScope>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut scopes: Vec<TenantScope> = Vec::new();
        for policy in &state.policies {
            if !scopes.contains(&policy.scope) {
                scopes.push(policy.scope.clone());
            }
        }
        Ok(scopes)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> PermissionsResult<Namespace> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if state
            .namespaces
            .iter()
            .any(|n| n.scope == namespace.scope && n.name == namespace.name)
        {
            return Err(PermissionsError::conflict(format!(
                "namespace '{}' already exists",
                namespace.name
            )));
        }
        state.namespaces.push(namespace.clone());
        Ok(namespace.clone())
    }

    async fn get_namespace(&self, id: Uuid) -> PermissionsResult<Option<Namespace>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.namespaces.iter().find(|n| n.id == id).cloned())
    }

    async fn find_namespace_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Namespace>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .namespaces
            .iter()
            .find(|n| n.scope == *scope && n.name == name)
            .cloned())
    }

    async fn list_namespaces(&self, scope: &TenantScope) -> PermissionsResult<Vec<Namespace>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .namespaces
            .iter()
            .filter(|n| n.scope == *scope)
            .cloned()
            .collect())
    }

    async fn update_namespace(&self, namespace: &Namespace) -> PermissionsResult<Namespace> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let slot = state
            .namespaces
            .iter_mut()
            .find(|n| n.id == namespace.id)
            .ok_or_else(|| PermissionsError::not_found("namespace", namespace.id))?;
        *slot = namespace.clone();
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, id: Uuid) -> PermissionsResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.namespaces.retain(|n| n.id != id);
        state.resources.retain(|r| r.namespace_id != id);
        state.actions.retain(|a| a.namespace_id != id);
        Ok(())
    }

    async fn create_resource(
        &self,
        resource: &ResourceDefinition,
    ) -> PermissionsResult<ResourceDefinition> {
        self.check()?;
        self.state.lock().unwrap().resources.push(resource.clone());
        Ok(resource.clone())
    }

    async fn get_resource(&self, id: Uuid) -> PermissionsResult<Option<ResourceDefinition>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.resources.iter().find(|r| r.id == id).cloned())
    }

    async fn list_resources(
        &self,
        namespace_id: Uuid,
    ) -> PermissionsResult<Vec<ResourceDefinition>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .resources
            .iter()
            .filter(|r| r.namespace_id == namespace_id)
            .cloned()
            .collect())
    }

    async fn delete_resource(&self, id: Uuid) -> PermissionsResult<()> {
        self.check()?;
        self.state.lock().unwrap().resources.retain(|r| r.id != id);
        Ok(())
    }

    async fn create_action(
        &self,
        action: &ActionDefinition,
    ) -> PermissionsResult<ActionDefinition> {
        self.check()?;
        self.state.lock().unwrap().actions.push(action.clone());
        Ok(action.clone())
    }

    async fn get_action(&self, id: Uuid) -> PermissionsResult<Option<ActionDefinition>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.actions.iter().find(|a| a.id == id).cloned())
    }

    async fn list_actions(&self, namespace_id: Uuid) -> PermissionsResult<Vec<ActionDefinition>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .actions
            .iter()
            .filter(|a| a.namespace_id == namespace_id)
            .cloned()
            .collect())
    }

    async fn delete_action(&self, id: Uuid) -> PermissionsResult<()> {
        self.check()?;
        self.state.lock().unwrap().actions.retain(|a| a.id != id);
        Ok(())
    }
}

// =============================================================================
// Mock audit log
// =============================================================================

#[derive(Default)]
pub(crate) struct MockAuditLog {
    events: Mutex<Vec<AuditEvent>>,
    failing: AtomicBool,
}

impl MockAuditLog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        let log = Self::default();
        log.failing.store(true, Ordering::SeqCst);
        Arc::new(log)
    }

    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditLog for MockAuditLog {
    async fn append(&self, event: AuditEvent) -> PermissionsResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PermissionsError::storage("audit sink unavailable"));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }

    async fn query(
        &self,
        scope: &TenantScope,
        filter: &AuditFilter,
    ) -> PermissionsResult<Vec<AuditEvent>> {
        let events = self.events.lock().unwrap();
        let mut matching: Vec<AuditEvent> = events
            .iter()
            .rev()
            .filter(|e| e.scope == *scope && filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

// =============================================================================
// Mock shared cache
// =============================================================================

#[derive(Default)]
pub(crate) struct MockSharedCache {
    entries: Mutex<HashMap<(TenantScope, String), Vec<Policy>>>,
    pub(crate) hits: AtomicUsize,
}

impl MockSharedCache {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn contains(&self, scope: &TenantScope, resource_type: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(&(scope.clone(), resource_type.to_string()))
    }
}

#[async_trait]
impl SharedPolicyCache for MockSharedCache {
    async fn get(
        &self,
        scope: &TenantScope,
        resource_type: &str,
    ) -> PermissionsResult<Option<Vec<Policy>>> {
        let entries = self.entries.lock().unwrap();
        let found = entries
            .get(&(scope.clone(), resource_type.to_string()))
            .cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(found)
    }

    async fn put(
        &self,
        scope: &TenantScope,
        resource_type: &str,
        policies: &[Policy],
        _ttl: Duration,
    ) -> PermissionsResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert((scope.clone(), resource_type.to_string()), policies.to_vec());
        Ok(())
    }

    async fn invalidate(&self, scope: &TenantScope, resource_type: &str) -> PermissionsResult<()> {
        self.entries
            .lock()
            .unwrap()
            .remove(&(scope.clone(), resource_type.to_string()));
        Ok(())
    }

    async fn invalidate_prefix(
        &self,
        app_id: &str,
        environment_id: Option<&str>,
        organization_id: Option<&str>,
    ) -> PermissionsResult<()> {
        self.entries.lock().unwrap().retain(|(scope, _), _| {
            !(scope.app_id == app_id
                && environment_id.is_none_or(|env| scope.environment_id == env)
                && organization_id.is_none_or(|org| scope.organization_key() == org))
        });
        Ok(())
    }
}

// =============================================================================
// Mock legacy RBAC source
// =============================================================================

#[derive(Default)]
pub(crate) struct MockLegacySource {
    pub(crate) policies: Vec<LegacyPolicy>,
    pub(crate) roles: Vec<LegacyRole>,
    pub(crate) permissions: HashMap<String, Vec<LegacyPolicy>>,
    pub(crate) failing: bool,
    /// `get_all_policies` never resolves.
    pub(crate) stalled: bool,
}

impl MockLegacySource {
    pub(crate) fn with_policies(policies: Vec<LegacyPolicy>) -> Arc<Self> {
        Arc::new(Self {
            policies,
            ..Default::default()
        })
    }

    fn check(&self) -> PermissionsResult<()> {
        if self.failing {
            Err(PermissionsError::legacy_source("legacy database unreachable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LegacyRbacSource for MockLegacySource {
    async fn get_all_policies(&self) -> PermissionsResult<Vec<LegacyPolicy>> {
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.check()?;
        Ok(self.policies.clone())
    }

    async fn get_roles(
        &self,
        app_id: &str,
        environment_id: &str,
    ) -> PermissionsResult<Vec<LegacyRole>> {
        self.check()?;
        Ok(self
            .roles
            .iter()
            .filter(|r| r.app_id == app_id && r.environment_id == environment_id)
            .cloned()
            .collect())
    }

    async fn get_role_permissions(&self, role_id: &str) -> PermissionsResult<Vec<LegacyPolicy>> {
        self.check()?;
        Ok(self.permissions.get(role_id).cloned().unwrap_or_default())
    }
}
