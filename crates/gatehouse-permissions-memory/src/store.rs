//! In-memory policy store.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gatehouse_permissions::model::{
    ActionDefinition, Namespace, Page, PolicyFilter, ResourceDefinition,
};
use gatehouse_permissions::{PermissionsError, PermissionsResult, Policy, PolicyStore, TenantScope};
use tracing::debug;
use uuid::Uuid;

/// Unique-name index key: `(scope, name)`.
type NameKey = (TenantScope, String);

/// [`PolicyStore`] backed by concurrent hash maps.
///
/// Names are unique per scope for policies and namespaces. Uniqueness is
/// enforced through a separate name index so concurrent creates with the same
/// name cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<Uuid, Policy>,
    policy_names: DashMap<NameKey, Uuid>,
    namespaces: DashMap<Uuid, Namespace>,
    namespace_names: DashMap<NameKey, Uuid>,
    resources: DashMap<Uuid, ResourceDefinition>,
    actions: DashMap<Uuid, ActionDefinition>,
}

impl InMemoryPolicyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored policies across all scopes.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn scope_policies(&self, scope: &TenantScope) -> Vec<Policy> {
        self.policies
            .iter()
            .filter(|entry| entry.scope == *scope)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn conflict(entity: &str, name: &str) -> PermissionsError {
    PermissionsError::conflict(format!("{} '{}' already exists", entity, name))
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    // -------------------------------------------------------------------------
    // Policies
    // -------------------------------------------------------------------------

    async fn create_policy(&self, policy: &Policy) -> PermissionsResult<Policy> {
        match self
            .policy_names
            .entry((policy.scope.clone(), policy.name.clone()))
        {
            Entry::Occupied(_) => return Err(conflict("policy", &policy.name)),
            Entry::Vacant(slot) => {
                slot.insert(policy.id);
            }
        }
        self.policies.insert(policy.id, policy.clone());
        Ok(policy.clone())
    }

    async fn get_policy(&self, id: Uuid) -> PermissionsResult<Option<Policy>> {
        Ok(self.policies.get(&id).map(|p| p.value().clone()))
    }

    async fn find_policy_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Policy>> {
        let Some(id) = self
            .policy_names
            .get(&(scope.clone(), name.to_string()))
            .map(|id| *id)
        else {
            return Ok(None);
        };
        self.get_policy(id).await
    }

    async fn list_policies(
        &self,
        scope: &TenantScope,
        filter: &PolicyFilter,
    ) -> PermissionsResult<Page<Policy>> {
        let mut matching: Vec<Policy> = self
            .scope_policies(scope)
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(Page::from_vec(matching, filter.limit(), filter.offset()))
    }

    async fn update_policy(&self, policy: &Policy) -> PermissionsResult<Policy> {
        let (old_scope, old_name) = self
            .policies
            .get(&policy.id)
            .map(|p| (p.scope.clone(), p.name.clone()))
            .ok_or_else(|| PermissionsError::not_found("policy", policy.id))?;

        if old_scope != policy.scope || old_name != policy.name {
            match self
                .policy_names
                .entry((policy.scope.clone(), policy.name.clone()))
            {
                Entry::Occupied(taken) if *taken.get() != policy.id => {
                    return Err(conflict("policy", &policy.name));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(policy.id);
                }
            }
            self.policy_names.remove(&(old_scope, old_name));
        }

        self.policies.insert(policy.id, policy.clone());
        Ok(policy.clone())
    }

    async fn delete_policy(&self, id: Uuid) -> PermissionsResult<()> {
        let (_, removed) = self
            .policies
            .remove(&id)
            .ok_or_else(|| PermissionsError::not_found("policy", id))?;
        self.policy_names.remove(&(removed.scope, removed.name));
        Ok(())
    }

    async fn get_policies_by_resource_type(
        &self,
        scope: &TenantScope,
        resource_type: &str,
    ) -> PermissionsResult<Vec<Policy>> {
        Ok(self
            .policies
            .iter()
            .filter(|entry| entry.scope == *scope && entry.resource_type == resource_type)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_policies_for_scope(&self, scope: &TenantScope) -> PermissionsResult<Vec<Policy>> {
        Ok(self.scope_policies(scope))
    }

    async fn count_policies(&self, scope: &TenantScope) -> PermissionsResult<usize> {
        Ok(self
            .policies
            .iter()
            .filter(|entry| entry.scope == *scope)
            .count())
    }

    async fn count_namespace_policies(&self, namespace_id: Uuid) -> PermissionsResult<usize> {
        Ok(self
            .policies
            .iter()
            .filter(|entry| entry.namespace_id == namespace_id)
            .count())
    }

    async fn list_scopes(&self) -> PermissionsResult<Vec<TenantScope>> {
        let scopes: BTreeSet<TenantScope> = self
            .policies
            .iter()
            .map(|entry| entry.scope.clone())
            .collect();
        Ok(scopes.into_iter().collect())
    }

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------

    async fn create_namespace(&self, namespace: &Namespace) -> PermissionsResult<Namespace> {
        match self
            .namespace_names
            .entry((namespace.scope.clone(), namespace.name.clone()))
        {
            Entry::Occupied(_) => return Err(conflict("namespace", &namespace.name)),
            Entry::Vacant(slot) => {
                slot.insert(namespace.id);
            }
        }
        self.namespaces.insert(namespace.id, namespace.clone());
        Ok(namespace.clone())
    }

    async fn get_namespace(&self, id: Uuid) -> PermissionsResult<Option<Namespace>> {
        Ok(self.namespaces.get(&id).map(|n| n.value().clone()))
    }

    async fn find_namespace_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Namespace>> {
        let Some(id) = self
            .namespace_names
            .get(&(scope.clone(), name.to_string()))
            .map(|id| *id)
        else {
            return Ok(None);
        };
        self.get_namespace(id).await
    }

    async fn list_namespaces(&self, scope: &TenantScope) -> PermissionsResult<Vec<Namespace>> {
        let mut namespaces: Vec<Namespace> = self
            .namespaces
            .iter()
            .filter(|entry| entry.scope == *scope)
            .map(|entry| entry.value().clone())
            .collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(namespaces)
    }

    async fn update_namespace(&self, namespace: &Namespace) -> PermissionsResult<Namespace> {
        let (old_scope, old_name) = self
            .namespaces
            .get(&namespace.id)
            .map(|n| (n.scope.clone(), n.name.clone()))
            .ok_or_else(|| PermissionsError::not_found("namespace", namespace.id))?;

        if old_scope != namespace.scope || old_name != namespace.name {
            match self
                .namespace_names
                .entry((namespace.scope.clone(), namespace.name.clone()))
            {
                Entry::Occupied(taken) if *taken.get() != namespace.id => {
                    return Err(conflict("namespace", &namespace.name));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(namespace.id);
                }
            }
            self.namespace_names.remove(&(old_scope, old_name));
        }

        self.namespaces.insert(namespace.id, namespace.clone());
        Ok(namespace.clone())
    }

    async fn delete_namespace(&self, id: Uuid) -> PermissionsResult<()> {
        let (_, removed) = self
            .namespaces
            .remove(&id)
            .ok_or_else(|| PermissionsError::not_found("namespace", id))?;
        self.namespace_names.remove(&(removed.scope, removed.name));

        let mut resources = 0usize;
        self.resources.retain(|_, r| {
            let keep = r.namespace_id != id;
            resources += usize::from(!keep);
            keep
        });
        let mut actions = 0usize;
        self.actions.retain(|_, a| {
            let keep = a.namespace_id != id;
            actions += usize::from(!keep);
            keep
        });
        debug!(
            namespace_id = %id,
            resources,
            actions,
            "Deleted namespace and its definitions"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Resource and action definitions
    // -------------------------------------------------------------------------

    async fn create_resource(
        &self,
        resource: &ResourceDefinition,
    ) -> PermissionsResult<ResourceDefinition> {
        self.resources.insert(resource.id, resource.clone());
        Ok(resource.clone())
    }

    async fn get_resource(&self, id: Uuid) -> PermissionsResult<Option<ResourceDefinition>> {
        Ok(self.resources.get(&id).map(|r| r.value().clone()))
    }

    async fn list_resources(
        &self,
        namespace_id: Uuid,
    ) -> PermissionsResult<Vec<ResourceDefinition>> {
        let mut resources: Vec<ResourceDefinition> = self
            .resources
            .iter()
            .filter(|entry| entry.namespace_id == namespace_id)
            .map(|entry| entry.value().clone())
            .collect();
        resources.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
        Ok(resources)
    }

    async fn delete_resource(&self, id: Uuid) -> PermissionsResult<()> {
        self.resources
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PermissionsError::not_found("resource", id))
    }

    async fn create_action(
        &self,
        action: &ActionDefinition,
    ) -> PermissionsResult<ActionDefinition> {
        self.actions.insert(action.id, action.clone());
        Ok(action.clone())
    }

    async fn get_action(&self, id: Uuid) -> PermissionsResult<Option<ActionDefinition>> {
        Ok(self.actions.get(&id).map(|a| a.value().clone()))
    }

    async fn list_actions(&self, namespace_id: Uuid) -> PermissionsResult<Vec<ActionDefinition>> {
        let mut actions: Vec<ActionDefinition> = self
            .actions
            .iter()
            .filter(|entry| entry.namespace_id == namespace_id)
            .map(|entry| entry.value().clone())
            .collect();
        actions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(actions)
    }

    async fn delete_action(&self, id: Uuid) -> PermissionsResult<()> {
        self.actions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PermissionsError::not_found("action", id))
    }
}
