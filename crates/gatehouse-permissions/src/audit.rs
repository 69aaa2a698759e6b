//! Audit trail for policy administration.
//!
//! The policy service appends one [`AuditEvent`] per mutating call. Events
//! are never updated or deleted by the engine. Persistence is delegated to an
//! [`AuditLog`] implementation; a failed append is logged and never fails the
//! mutation that produced it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::PermissionsResult;
use crate::model::TenantScope;

/// Mutations recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Policies
    PolicyCreate,
    PolicyUpdate,
    PolicyDelete,

    // Namespaces
    NamespaceCreate,
    NamespaceUpdate,
    NamespaceDelete,

    // Resource and action definitions
    ResourceCreate,
    ResourceDelete,
    ActionCreate,
    ActionDelete,

    // Migration runs
    MigrationRun,
}

impl AuditAction {
    /// Returns the dotted event code.
    pub fn code(&self) -> &'static str {
        match self {
            AuditAction::PolicyCreate => "policy.create",
            AuditAction::PolicyUpdate => "policy.update",
            AuditAction::PolicyDelete => "policy.delete",
            AuditAction::NamespaceCreate => "namespace.create",
            AuditAction::NamespaceUpdate => "namespace.update",
            AuditAction::NamespaceDelete => "namespace.delete",
            AuditAction::ResourceCreate => "resource.create",
            AuditAction::ResourceDelete => "resource.delete",
            AuditAction::ActionCreate => "action.create",
            AuditAction::ActionDelete => "action.delete",
            AuditAction::MigrationRun => "migration.run",
        }
    }

    /// Returns the kind of entity the action touches.
    pub fn entity(&self) -> &'static str {
        match self {
            AuditAction::PolicyCreate | AuditAction::PolicyUpdate | AuditAction::PolicyDelete => {
                "policy"
            }
            AuditAction::NamespaceCreate
            | AuditAction::NamespaceUpdate
            | AuditAction::NamespaceDelete => "namespace",
            AuditAction::ResourceCreate | AuditAction::ResourceDelete => "resource",
            AuditAction::ActionCreate | AuditAction::ActionDelete => "action",
            AuditAction::MigrationRun => "migration",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub scope: TenantScope,

    /// Who performed the mutation.
    pub actor: String,

    pub action: AuditAction,

    /// Entity kind (`policy`, `namespace`, ...).
    pub resource_type: String,

    /// Entity identifier.
    pub resource_id: String,

    /// Snapshot before the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,

    /// Snapshot after the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Builder for audit events.
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    scope: TenantScope,
    actor: String,
    action: AuditAction,
    resource_id: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
}

impl AuditEventBuilder {
    #[must_use]
    pub fn new(
        scope: &TenantScope,
        actor: impl Into<String>,
        action: AuditAction,
        resource_id: impl ToString,
    ) -> Self {
        Self {
            scope: scope.clone(),
            actor: actor.into(),
            action,
            resource_id: resource_id.to_string(),
            old_value: None,
            new_value: None,
        }
    }

    /// Attach the "before" snapshot. Values that fail to serialize are
    /// recorded as absent.
    #[must_use]
    pub fn old_value(mut self, value: &impl Serialize) -> Self {
        self.old_value = serde_json::to_value(value).ok();
        self
    }

    /// Attach the "after" snapshot.
    #[must_use]
    pub fn new_value(mut self, value: &impl Serialize) -> Self {
        self.new_value = serde_json::to_value(value).ok();
        self
    }

    #[must_use]
    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4(),
            scope: self.scope,
            actor: self.actor,
            resource_type: self.action.entity().to_string(),
            action: self.action,
            resource_id: self.resource_id,
            old_value: self.old_value,
            new_value: self.new_value,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Query over the audit trail of one scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    #[serde(default)]
    pub action: Option<AuditAction>,

    #[serde(default)]
    pub actor: Option<String>,

    #[serde(default)]
    pub resource_id: Option<String>,

    /// Only events at or after this instant.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub since: Option<OffsetDateTime>,

    /// Maximum number of events (most recent first).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl AuditFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event passes every set criterion. Scope is matched by the
    /// log itself.
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.action.is_none_or(|a| a == event.action)
            && self.actor.as_ref().is_none_or(|a| *a == event.actor)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| *id == event.resource_id)
            && self.since.is_none_or(|since| event.timestamp >= since)
    }
}

/// Append-only audit storage.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one event.
    async fn append(&self, event: AuditEvent) -> PermissionsResult<()>;

    /// Events of `scope` matching `filter`, most recent first.
    async fn query(
        &self,
        scope: &TenantScope,
        filter: &AuditFilter,
    ) -> PermissionsResult<Vec<AuditEvent>>;
}
