//! Tenant initialization and namespace, resource and action definitions.

use time::OffsetDateTime;
use uuid::Uuid;

use super::PolicyService;
use crate::PermissionsResult;
use crate::audit::{AuditAction, AuditEventBuilder};
use crate::error::PermissionsError;
use crate::model::{
    ActionDefinition, CreateActionRequest, CreateNamespaceRequest, CreateResourceRequest,
    DEFAULT_NAMESPACE, Namespace, ResourceDefinition, TenantScope, UpdateNamespaceRequest,
};

impl PolicyService {
    /// Prepare a tenant scope by creating its default namespace.
    ///
    /// Idempotent: an existing default namespace is returned unchanged.
    pub async fn initialize_tenant(
        &self,
        scope: &TenantScope,
        actor: &str,
        template_id: Option<&str>,
    ) -> PermissionsResult<Namespace> {
        scope.validate()?;
        if let Some(existing) = self
            .store
            .find_namespace_by_name(scope, DEFAULT_NAMESPACE)
            .await?
        {
            return Ok(existing);
        }

        let namespace = self
            .create_namespace(
                scope,
                actor,
                CreateNamespaceRequest {
                    name: DEFAULT_NAMESPACE.to_string(),
                    description: "Default namespace".to_string(),
                    template_id: template_id.map(str::to_string),
                },
            )
            .await?;
        tracing::info!(scope = %scope, namespace_id = %namespace.id, "Initialized tenant");
        Ok(namespace)
    }

    /// Fetch a namespace, reporting one from another scope as missing.
    pub(super) async fn scoped_namespace(
        &self,
        scope: &TenantScope,
        id: Uuid,
    ) -> PermissionsResult<Namespace> {
        self.store
            .get_namespace(id)
            .await?
            .filter(|n| n.scope == *scope)
            .ok_or_else(|| PermissionsError::not_found("namespace", id))
    }

    // -------------------------------------------------------------------------
    // Namespaces
    // -------------------------------------------------------------------------

    /// Create a namespace.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for an empty name and `Conflict` if the name
    /// is taken within the scope.
    pub async fn create_namespace(
        &self,
        scope: &TenantScope,
        actor: &str,
        request: CreateNamespaceRequest,
    ) -> PermissionsResult<Namespace> {
        scope.validate()?;
        if request.name.trim().is_empty() {
            return Err(PermissionsError::invalid_request("namespace name is required"));
        }
        if self
            .store
            .find_namespace_by_name(scope, &request.name)
            .await?
            .is_some()
        {
            return Err(PermissionsError::conflict(format!(
                "namespace '{}' already exists in {}",
                request.name, scope
            )));
        }

        let now = OffsetDateTime::now_utc();
        let namespace = self
            .store
            .create_namespace(&Namespace {
                id: Uuid::new_v4(),
                scope: scope.clone(),
                name: request.name,
                description: request.description,
                template_id: request.template_id,
                created_by: actor.to_string(),
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::NamespaceCreate, namespace.id)
                .new_value(&namespace)
                .build(),
        )
        .await;
        Ok(namespace)
    }

    /// Get a namespace of the scope.
    pub async fn get_namespace(&self, scope: &TenantScope, id: Uuid) -> PermissionsResult<Namespace> {
        scope.validate()?;
        self.scoped_namespace(scope, id).await
    }

    /// Every namespace of the scope.
    pub async fn list_namespaces(&self, scope: &TenantScope) -> PermissionsResult<Vec<Namespace>> {
        scope.validate()?;
        self.store.list_namespaces(scope).await
    }

    /// Rename or re-describe a namespace.
    pub async fn update_namespace(
        &self,
        scope: &TenantScope,
        actor: &str,
        id: Uuid,
        request: UpdateNamespaceRequest,
    ) -> PermissionsResult<Namespace> {
        let current = self.get_namespace(scope, id).await?;
        let mut updated = current.clone();

        if let Some(name) = request.name
            && name != current.name
        {
            if name.trim().is_empty() {
                return Err(PermissionsError::invalid_request("namespace name is required"));
            }
            if self.store.find_namespace_by_name(scope, &name).await?.is_some() {
                return Err(PermissionsError::conflict(format!(
                    "namespace '{}' already exists in {}",
                    name, scope
                )));
            }
            updated.name = name;
        }
        if let Some(description) = request.description {
            updated.description = description;
        }
        updated.updated_at = OffsetDateTime::now_utc();

        let stored = self.store.update_namespace(&updated).await?;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::NamespaceUpdate, id)
                .old_value(&current)
                .new_value(&stored)
                .build(),
        )
        .await;
        Ok(stored)
    }

    /// Delete a namespace and its resource and action definitions.
    ///
    /// # Errors
    ///
    /// Returns `NamespaceNotEmpty` while the namespace still owns policies.
    pub async fn delete_namespace(
        &self,
        scope: &TenantScope,
        actor: &str,
        id: Uuid,
    ) -> PermissionsResult<()> {
        let current = self.get_namespace(scope, id).await?;

        let policy_count = self.store.count_namespace_policies(id).await?;
        if policy_count > 0 {
            return Err(PermissionsError::NamespaceNotEmpty {
                namespace_id: id.to_string(),
                policy_count,
            });
        }

        self.store.delete_namespace(id).await?;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::NamespaceDelete, id)
                .old_value(&current)
                .build(),
        )
        .await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Resource definitions
    // -------------------------------------------------------------------------

    /// Define a resource type in a namespace.
    pub async fn create_resource(
        &self,
        scope: &TenantScope,
        actor: &str,
        namespace_id: Uuid,
        request: CreateResourceRequest,
    ) -> PermissionsResult<ResourceDefinition> {
        self.get_namespace(scope, namespace_id).await?;
        if request.resource_type.trim().is_empty() {
            return Err(PermissionsError::invalid_request("resource type is required"));
        }
        let existing = self.store.list_resources(namespace_id).await?;
        if existing
            .iter()
            .any(|r| r.resource_type == request.resource_type)
        {
            return Err(PermissionsError::conflict(format!(
                "resource type '{}' is already defined",
                request.resource_type
            )));
        }

        let resource = self
            .store
            .create_resource(&ResourceDefinition {
                id: Uuid::new_v4(),
                namespace_id,
                resource_type: request.resource_type,
                description: request.description,
                attributes: request.attributes,
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::ResourceCreate, resource.id)
                .new_value(&resource)
                .build(),
        )
        .await;
        Ok(resource)
    }

    /// Resource definitions of a namespace.
    pub async fn list_resources(
        &self,
        scope: &TenantScope,
        namespace_id: Uuid,
    ) -> PermissionsResult<Vec<ResourceDefinition>> {
        self.get_namespace(scope, namespace_id).await?;
        self.store.list_resources(namespace_id).await
    }

    /// Remove a resource definition. Policies targeting the type are kept.
    pub async fn delete_resource(
        &self,
        scope: &TenantScope,
        actor: &str,
        id: Uuid,
    ) -> PermissionsResult<()> {
        let resource = self
            .store
            .get_resource(id)
            .await?
            .ok_or_else(|| PermissionsError::not_found("resource", id))?;
        self.get_namespace(scope, resource.namespace_id)
            .await
            .map_err(|_| PermissionsError::not_found("resource", id))?;

        self.store.delete_resource(id).await?;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::ResourceDelete, id)
                .old_value(&resource)
                .build(),
        )
        .await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Action definitions
    // -------------------------------------------------------------------------

    /// Define an action in a namespace.
    pub async fn create_action(
        &self,
        scope: &TenantScope,
        actor: &str,
        namespace_id: Uuid,
        request: CreateActionRequest,
    ) -> PermissionsResult<ActionDefinition> {
        self.get_namespace(scope, namespace_id).await?;
        if request.name.trim().is_empty() {
            return Err(PermissionsError::invalid_request("action name is required"));
        }
        let existing = self.store.list_actions(namespace_id).await?;
        if existing.iter().any(|a| a.name == request.name) {
            return Err(PermissionsError::conflict(format!(
                "action '{}' is already defined",
                request.name
            )));
        }

        let action = self
            .store
            .create_action(&ActionDefinition {
                id: Uuid::new_v4(),
                namespace_id,
                name: request.name,
                description: request.description,
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::ActionCreate, action.id)
                .new_value(&action)
                .build(),
        )
        .await;
        Ok(action)
    }

    /// Action definitions of a namespace.
    pub async fn list_actions(
        &self,
        scope: &TenantScope,
        namespace_id: Uuid,
    ) -> PermissionsResult<Vec<ActionDefinition>> {
        self.get_namespace(scope, namespace_id).await?;
        self.store.list_actions(namespace_id).await
    }

    /// Remove an action definition.
    pub async fn delete_action(
        &self,
        scope: &TenantScope,
        actor: &str,
        id: Uuid,
    ) -> PermissionsResult<()> {
        let action = self
            .store
            .get_action(id)
            .await?
            .ok_or_else(|| PermissionsError::not_found("action", id))?;
        self.get_namespace(scope, action.namespace_id)
            .await
            .map_err(|_| PermissionsError::not_found("action", id))?;

        self.store.delete_action(id).await?;
        self.record_audit(
            AuditEventBuilder::new(scope, actor, AuditAction::ActionDelete, id)
                .old_value(&action)
                .build(),
        )
        .await;
        Ok(())
    }
}
