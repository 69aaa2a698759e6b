//! Legacy RBAC source trait and records.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::PermissionsResult;

/// One legacy `(subject, actions, resource, condition)` rule.
///
/// Subjects look like `role:admin`, `user:u1`, `group:ops`,
/// `permission:docs.read`, `*` or a bare role name. Resources look like `*`,
/// `project`, `project:*`, `project:p-1` or `project:tmp-*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPolicy {
    pub subject: String,

    #[serde(default)]
    pub actions: Vec<String>,

    pub resource: String,

    /// Free-text condition such as `owner = true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl LegacyPolicy {
    #[must_use]
    pub fn new<I, S>(subject: impl Into<String>, actions: I, resource: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            actions: actions.into_iter().map(Into::into).collect(),
            resource: resource.into(),
            condition: None,
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// The condition, if present and not blank.
    #[must_use]
    pub fn condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

impl fmt::Display for LegacyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} may [{}] on {}",
            self.subject,
            self.actions.join(", "),
            self.resource
        )?;
        if let Some(condition) = self.condition() {
            write!(f, " if {}", condition)?;
        }
        Ok(())
    }
}

/// A legacy role of one application environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyRole {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub app_id: String,
    pub environment_id: String,
}

/// Read access to the legacy RBAC data being migrated.
#[async_trait]
pub trait LegacyRbacSource: Send + Sync {
    /// Every legacy policy rule.
    async fn get_all_policies(&self) -> PermissionsResult<Vec<LegacyPolicy>>;

    /// Roles defined for an application environment.
    async fn get_roles(
        &self,
        app_id: &str,
        environment_id: &str,
    ) -> PermissionsResult<Vec<LegacyRole>>;

    /// Permissions granted to a role. The `subject` of each returned rule is
    /// ignored; the role is the subject.
    async fn get_role_permissions(&self, role_id: &str) -> PermissionsResult<Vec<LegacyPolicy>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let policy = LegacyPolicy::new("role:admin", ["write"], "project:*")
            .with_condition(" owner = true ");
        assert_eq!(
            policy.to_string(),
            "role:admin may [write] on project:* if owner = true"
        );
        assert_eq!(policy.condition(), Some("owner = true"));

        let blank = LegacyPolicy::new("*", ["read"], "*").with_condition("  ");
        assert_eq!(blank.condition(), None);
    }

    #[test]
    fn test_deserialize_without_condition() {
        let policy: LegacyPolicy = serde_json::from_str(
            r#"{"subject": "user:u1", "actions": ["read"], "resource": "doc:1"}"#,
        )
        .unwrap();
        assert_eq!(policy.condition, None);
        assert_eq!(policy.actions, vec!["read".to_string()]);
    }
}
