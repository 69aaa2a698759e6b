//! Namespaces and the resource/action definitions they own.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::scope::TenantScope;

/// Name of the namespace created when a tenant is initialized.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Isolation unit within a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Namespace {
    /// Unique identifier.
    pub id: Uuid,

    /// Owning tenant scope.
    pub scope: TenantScope,

    /// Name, unique within the scope.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Platform template the namespace was seeded from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    /// Actor that created the namespace.
    pub created_by: String,

    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last update timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Request to create a namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNamespaceRequest {
    /// Namespace name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Platform template to inherit.
    #[serde(default)]
    pub template_id: Option<String>,
}

/// Partial namespace update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNamespaceRequest {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,

    /// New description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A typed attribute of a resource definition. Descriptive only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAttribute {
    /// Attribute name.
    pub name: String,

    /// Type tag (`string`, `int`, `bool`, ...).
    #[serde(rename = "type")]
    pub attr_type: String,

    /// Whether the attribute is expected on every resource.
    #[serde(default)]
    pub required: bool,

    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Description.
    #[serde(default)]
    pub description: String,
}

/// A named resource type within a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Unique identifier.
    pub id: Uuid,

    /// Owning namespace.
    pub namespace_id: Uuid,

    /// Resource type name.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Attribute metadata.
    #[serde(default)]
    pub attributes: Vec<ResourceAttribute>,

    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Request to define a resource type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResourceRequest {
    /// Resource type name.
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Attribute metadata.
    #[serde(default)]
    pub attributes: Vec<ResourceAttribute>,
}

/// A named verb within a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    /// Unique identifier.
    pub id: Uuid,

    /// Owning namespace.
    pub namespace_id: Uuid,

    /// Action name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Request to define an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActionRequest {
    /// Action name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,
}
