//! Policy store trait.
//!
//! Defines the interface for durable persistence of policies, namespaces and
//! the resource/action definitions they own. Implementations are provided by
//! storage backends (e.g. `gatehouse-permissions-memory`).

use async_trait::async_trait;
use uuid::Uuid;

use crate::PermissionsResult;
use crate::model::{
    ActionDefinition, Namespace, Page, Policy, PolicyFilter, ResourceDefinition, TenantScope,
};

/// Durable storage for policies and namespaces.
///
/// Lookups by id are not scoped: the service verifies that a fetched record
/// belongs to the caller's scope and reports a mismatch as not found.
///
/// # Example
///
/// ```ignore
/// use gatehouse_permissions::storage::PolicyStore;
///
/// async fn example(store: &impl PolicyStore, scope: &TenantScope) {
///     let policies = store.get_policies_by_resource_type(scope, "document").await?;
///     for policy in policies {
///         println!("Policy: {} (priority: {})", policy.name, policy.priority);
///     }
/// }
/// ```
#[async_trait]
pub trait PolicyStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Policies
    // -------------------------------------------------------------------------

    /// Persist a new policy.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a policy with the same name exists in the scope,
    /// or `Storage` if the operation fails.
    async fn create_policy(&self, policy: &Policy) -> PermissionsResult<Policy>;

    /// Get a policy by id, from any scope.
    ///
    /// Returns `None` if the policy doesn't exist.
    async fn get_policy(&self, id: Uuid) -> PermissionsResult<Option<Policy>>;

    /// Get a policy by name within a scope.
    async fn find_policy_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Policy>>;

    /// List policies in a scope, filtered and paginated.
    ///
    /// Results are ordered by priority (descending) then name.
    async fn list_policies(
        &self,
        scope: &TenantScope,
        filter: &PolicyFilter,
    ) -> PermissionsResult<Page<Policy>>;

    /// Replace a stored policy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the policy doesn't exist.
    async fn update_policy(&self, policy: &Policy) -> PermissionsResult<Policy>;

    /// Delete a policy.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the policy doesn't exist.
    async fn delete_policy(&self, id: Uuid) -> PermissionsResult<()>;

    /// All policies in a scope whose resource type is exactly
    /// `resource_type`, enabled or not.
    async fn get_policies_by_resource_type(
        &self,
        scope: &TenantScope,
        resource_type: &str,
    ) -> PermissionsResult<Vec<Policy>>;

    /// Every policy in a scope.
    async fn get_policies_for_scope(&self, scope: &TenantScope) -> PermissionsResult<Vec<Policy>>;

    /// Number of policies in a scope.
    async fn count_policies(&self, scope: &TenantScope) -> PermissionsResult<usize>;

    /// Number of policies owned by a namespace.
    async fn count_namespace_policies(&self, namespace_id: Uuid) -> PermissionsResult<usize>;

    /// Every scope that owns at least one policy.
    async fn list_scopes(&self) -> PermissionsResult<Vec<TenantScope>>;

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------

    /// Persist a new namespace.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the name is taken within the scope.
    async fn create_namespace(&self, namespace: &Namespace) -> PermissionsResult<Namespace>;

    async fn get_namespace(&self, id: Uuid) -> PermissionsResult<Option<Namespace>>;

    async fn find_namespace_by_name(
        &self,
        scope: &TenantScope,
        name: &str,
    ) -> PermissionsResult<Option<Namespace>>;

    async fn list_namespaces(&self, scope: &TenantScope) -> PermissionsResult<Vec<Namespace>>;

    async fn update_namespace(&self, namespace: &Namespace) -> PermissionsResult<Namespace>;

    /// Delete a namespace together with its resource and action definitions.
    async fn delete_namespace(&self, id: Uuid) -> PermissionsResult<()>;

    // -------------------------------------------------------------------------
    // Resource and action definitions
    // -------------------------------------------------------------------------

    async fn create_resource(
        &self,
        resource: &ResourceDefinition,
    ) -> PermissionsResult<ResourceDefinition>;

    async fn get_resource(&self, id: Uuid) -> PermissionsResult<Option<ResourceDefinition>>;

    async fn list_resources(&self, namespace_id: Uuid)
    -> PermissionsResult<Vec<ResourceDefinition>>;

    async fn delete_resource(&self, id: Uuid) -> PermissionsResult<()>;

    async fn create_action(&self, action: &ActionDefinition)
    -> PermissionsResult<ActionDefinition>;

    async fn get_action(&self, id: Uuid) -> PermissionsResult<Option<ActionDefinition>>;

    async fn list_actions(&self, namespace_id: Uuid) -> PermissionsResult<Vec<ActionDefinition>>;

    async fn delete_action(&self, id: Uuid) -> PermissionsResult<()>;
}
