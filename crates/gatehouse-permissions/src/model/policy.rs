//! Policy records and the request types that create, patch and query them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::scope::TenantScope;
use crate::error::PermissionsError;

/// Wildcard matching any action or any resource type.
pub const WILDCARD: &str = "*";

// =============================================================================
// Policy
// =============================================================================

/// A stored authorization rule.
///
/// Policies are additive grants: a request is allowed when any enabled policy
/// matching its resource type and action evaluates to `true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Unique policy identifier.
    pub id: Uuid,

    /// Owning tenant scope.
    pub scope: TenantScope,

    /// Owning namespace.
    pub namespace_id: Uuid,

    /// Human-readable name, unique within the scope.
    pub name: String,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Boolean policy expression.
    pub expression: String,

    /// Target resource type (`*` for any).
    pub resource_type: String,

    /// Target actions (`*` for any). Never empty.
    pub actions: Vec<String>,

    /// Evaluation order; higher runs first.
    #[serde(default)]
    pub priority: i32,

    /// Disabled policies are never compiled or evaluated.
    pub enabled: bool,

    /// Starts at 1 and increments on every update.
    pub version: u32,

    /// Actor that created the policy.
    pub created_by: String,

    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last update timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Policy {
    /// Whether the policy targets the given resource type.
    #[must_use]
    pub fn matches_resource_type(&self, resource_type: &str) -> bool {
        self.resource_type == WILDCARD || self.resource_type == resource_type
    }

    /// Whether the policy's action set contains the action or the wildcard.
    #[must_use]
    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == WILDCARD || a == action)
    }
}

/// Validate the shared parts of create/update requests.
pub(crate) fn validate_targets(
    name: &str,
    resource_type: &str,
    actions: &[String],
) -> Result<(), PermissionsError> {
    if name.trim().is_empty() {
        return Err(PermissionsError::invalid_request("policy name is required"));
    }
    if resource_type.trim().is_empty() {
        return Err(PermissionsError::invalid_request(
            "policy resource_type is required",
        ));
    }
    if actions.is_empty() {
        return Err(PermissionsError::invalid_request(
            "policy must target at least one action",
        ));
    }
    if actions.iter().any(|a| a.trim().is_empty()) {
        return Err(PermissionsError::invalid_request(
            "policy actions must not be empty strings",
        ));
    }
    Ok(())
}

// =============================================================================
// Requests
// =============================================================================

/// Request to create a policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePolicyRequest {
    /// Target namespace; the scope's default namespace when absent.
    #[serde(default)]
    pub namespace_id: Option<Uuid>,

    /// Policy name.
    pub name: String,

    /// Description.
    #[serde(default)]
    pub description: String,

    /// Boolean expression.
    pub expression: String,

    /// Target resource type.
    pub resource_type: String,

    /// Target actions.
    pub actions: Vec<String>,

    /// Evaluation priority.
    #[serde(default)]
    pub priority: i32,

    /// Whether the policy starts enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CreatePolicyRequest {
    /// Create a request with the required fields and defaults for the rest.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        expression: impl Into<String>,
        resource_type: impl Into<String>,
        actions: Vec<String>,
    ) -> Self {
        Self {
            namespace_id: None,
            name: name.into(),
            description: String::new(),
            expression: expression.into(),
            resource_type: resource_type.into(),
            actions,
            priority: 0,
            enabled: true,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the enabled flag.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace_id: Uuid) -> Self {
        self.namespace_id = Some(namespace_id);
        self
    }
}

/// Partial update of a policy. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePolicyRequest {
    /// New name.
    #[serde(default)]
    pub name: Option<String>,

    /// New description.
    #[serde(default)]
    pub description: Option<String>,

    /// New expression.
    #[serde(default)]
    pub expression: Option<String>,

    /// New resource type.
    #[serde(default)]
    pub resource_type: Option<String>,

    /// New action set.
    #[serde(default)]
    pub actions: Option<Vec<String>>,

    /// New priority.
    #[serde(default)]
    pub priority: Option<i32>,

    /// New enabled flag.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl UpdatePolicyRequest {
    /// Whether applying this patch to `policy` changes anything the
    /// compiled form depends on.
    #[must_use]
    pub fn requires_recompile(&self, policy: &Policy) -> bool {
        self.expression
            .as_ref()
            .is_some_and(|e| *e != policy.expression)
            || self.actions.as_ref().is_some_and(|a| *a != policy.actions)
            || self
                .resource_type
                .as_ref()
                .is_some_and(|r| *r != policy.resource_type)
            || self.enabled.is_some_and(|e| e != policy.enabled)
            || self.priority.is_some_and(|p| p != policy.priority)
    }

    /// Apply the patch, returning the updated record with a bumped version.
    #[must_use]
    pub fn apply(&self, policy: &Policy, now: OffsetDateTime) -> Policy {
        let mut updated = policy.clone();
        if let Some(name) = &self.name {
            updated.name = name.clone();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(expression) = &self.expression {
            updated.expression = expression.clone();
        }
        if let Some(resource_type) = &self.resource_type {
            updated.resource_type = resource_type.clone();
        }
        if let Some(actions) = &self.actions {
            updated.actions = actions.clone();
        }
        if let Some(priority) = self.priority {
            updated.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            updated.enabled = enabled;
        }
        updated.version = policy.version.saturating_add(1);
        updated.updated_at = now;
        updated
    }
}

// =============================================================================
// Listing
// =============================================================================

/// Filters for listing policies within a scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFilter {
    /// Only policies targeting this resource type.
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Only policies whose action set intersects these actions.
    #[serde(default)]
    pub actions: Option<Vec<String>>,

    /// Only enabled or only disabled policies.
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Only policies in this namespace.
    #[serde(default)]
    pub namespace_id: Option<Uuid>,

    /// Page size (default 50).
    #[serde(default)]
    pub limit: Option<usize>,

    /// Number of records to skip.
    #[serde(default)]
    pub offset: Option<usize>,
}

/// Default page size for policy listings.
pub const DEFAULT_PAGE_SIZE: usize = 50;

impl PolicyFilter {
    /// Create an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource type filter.
    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    /// Set the action filter.
    #[must_use]
    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Set the enabled filter.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the namespace filter.
    #[must_use]
    pub fn with_namespace(mut self, namespace_id: Uuid) -> Self {
        self.namespace_id = Some(namespace_id);
        self
    }

    /// Set pagination parameters.
    #[must_use]
    pub fn with_pagination(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Whether a policy passes every filter (pagination excluded).
    #[must_use]
    pub fn matches(&self, policy: &Policy) -> bool {
        if let Some(rt) = &self.resource_type
            && policy.resource_type != *rt
        {
            return false;
        }
        if let Some(actions) = &self.actions
            && !actions.iter().any(|a| policy.actions.contains(a))
        {
            return false;
        }
        if let Some(enabled) = self.enabled
            && policy.enabled != enabled
        {
            return false;
        }
        if let Some(ns) = self.namespace_id
            && policy.namespace_id != ns
        {
            return false;
        }
        true
    }

    /// Effective page size.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Effective offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,

    /// Total matching items across all pages.
    pub total: usize,

    /// Page size used.
    pub limit: usize,

    /// Offset used.
    pub offset: usize,
}

impl<T> Page<T> {
    /// Slice an already filtered, ordered collection into a page.
    #[must_use]
    pub fn from_vec(all: Vec<T>, limit: usize, offset: usize) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            total,
            limit,
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Policy {
        let now = OffsetDateTime::now_utc();
        Policy {
            id: Uuid::new_v4(),
            scope: TenantScope::new("app", "prod"),
            namespace_id: Uuid::new_v4(),
            name: "owner-read".to_string(),
            description: String::new(),
            expression: "resource.owner == principal.id".to_string(),
            resource_type: "document".to_string(),
            actions: vec!["read".to_string()],
            priority: 0,
            enabled: true,
            version: 1,
            created_by: "admin".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_wildcard_matching() {
        let mut p = policy();
        assert!(p.matches_action("read"));
        assert!(!p.matches_action("write"));
        p.actions = vec![WILDCARD.to_string()];
        assert!(p.matches_action("anything"));

        assert!(p.matches_resource_type("document"));
        assert!(!p.matches_resource_type("invoice"));
        p.resource_type = WILDCARD.to_string();
        assert!(p.matches_resource_type("invoice"));
    }

    #[test]
    fn test_update_bumps_version() {
        let p = policy();
        let patch = UpdatePolicyRequest {
            description: Some("docs".to_string()),
            ..Default::default()
        };
        assert!(!patch.requires_recompile(&p));
        let updated = patch.apply(&p, OffsetDateTime::now_utc());
        assert_eq!(updated.version, 2);
        assert_eq!(updated.description, "docs");
        assert_eq!(updated.expression, p.expression);
    }

    #[test]
    fn test_requires_recompile() {
        let p = policy();
        let same = UpdatePolicyRequest {
            expression: Some(p.expression.clone()),
            ..Default::default()
        };
        assert!(!same.requires_recompile(&p));

        let disable = UpdatePolicyRequest {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(disable.requires_recompile(&p));

        let actions = UpdatePolicyRequest {
            actions: Some(vec!["write".to_string()]),
            ..Default::default()
        };
        assert!(actions.requires_recompile(&p));
    }

    #[test]
    fn test_filter_matches() {
        let p = policy();
        assert!(PolicyFilter::new().matches(&p));
        assert!(PolicyFilter::new().with_resource_type("document").matches(&p));
        assert!(!PolicyFilter::new().with_resource_type("invoice").matches(&p));
        assert!(
            PolicyFilter::new()
                .with_actions(vec!["read".to_string(), "write".to_string()])
                .matches(&p)
        );
        assert!(!PolicyFilter::new().with_enabled(false).matches(&p));
        assert!(!PolicyFilter::new().with_namespace(Uuid::new_v4()).matches(&p));
    }

    #[test]
    fn test_page_from_vec() {
        let page = Page::from_vec((0..10).collect::<Vec<_>>(), 3, 8);
        assert_eq!(page.items, vec![8, 9]);
        assert_eq!(page.total, 10);
    }

    #[test]
    fn test_validate_targets() {
        assert!(validate_targets("p", "doc", &["read".to_string()]).is_ok());
        assert!(validate_targets("", "doc", &["read".to_string()]).is_err());
        assert!(validate_targets("p", "", &["read".to_string()]).is_err());
        assert!(validate_targets("p", "doc", &[]).is_err());
        assert!(validate_targets("p", "doc", &[" ".to_string()]).is_err());
    }
}
