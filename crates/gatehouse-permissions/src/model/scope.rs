//! Tenant addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PermissionsError;

/// Joins scope components in tenant keys and display output.
pub const SCOPE_SEPARATOR: char = ':';

/// The tenant addressing tuple used to isolate all data and cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    /// Application identifier.
    pub app_id: String,

    /// Environment identifier within the application.
    pub environment_id: String,

    /// Optional organization within the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl TenantScope {
    /// Create an app/environment scope without an organization.
    #[must_use]
    pub fn new(app_id: impl Into<String>, environment_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            environment_id: environment_id.into(),
            organization_id: None,
        }
    }

    /// Narrow the scope to an organization.
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Organization identifier as used in cache keys (empty when absent).
    #[must_use]
    pub fn organization_key(&self) -> &str {
        self.organization_id.as_deref().unwrap_or("")
    }

    /// Check that every present component is non-empty and free of the
    /// `:` separator used in tenant keys.
    ///
    /// # Errors
    ///
    /// Returns `PermissionsError::InvalidRequest` when the app or environment
    /// is empty, when an organization is present but empty, or when any
    /// component contains `:`.
    pub fn validate(&self) -> Result<(), PermissionsError> {
        if self.app_id.trim().is_empty() {
            return Err(PermissionsError::invalid_request("app_id is required"));
        }
        if self.environment_id.trim().is_empty() {
            return Err(PermissionsError::invalid_request(
                "environment_id is required",
            ));
        }
        if let Some(org) = &self.organization_id
            && org.trim().is_empty()
        {
            return Err(PermissionsError::invalid_request(
                "organization_id must not be empty when present",
            ));
        }

        let components = [
            ("app_id", self.app_id.as_str()),
            ("environment_id", self.environment_id.as_str()),
            ("organization_id", self.organization_key()),
        ];
        for (name, value) in components {
            if value.contains(SCOPE_SEPARATOR) {
                return Err(PermissionsError::invalid_request(format!(
                    "{} must not contain '{}'",
                    name, SCOPE_SEPARATOR
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.app_id,
            self.environment_id,
            self.organization_key(),
            sep = SCOPE_SEPARATOR
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_validation() {
        assert!(TenantScope::new("app", "prod").validate().is_ok());
        assert!(
            TenantScope::new("app", "prod")
                .with_organization("acme")
                .validate()
                .is_ok()
        );
        assert!(TenantScope::new("", "prod").validate().is_err());
        assert!(TenantScope::new("app", " ").validate().is_err());
        assert!(
            TenantScope::new("app", "prod")
                .with_organization("")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_scope_rejects_separator_in_components() {
        // "a:b" + "c" and "a" + "b:c" would share the tenant key "a:b:c".
        assert!(TenantScope::new("a:b", "c").validate().is_err());
        assert!(TenantScope::new("a", "b:c").validate().is_err());
        let err = TenantScope::new("a", "b")
            .with_organization("x:y")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("organization_id"));
    }

    #[test]
    fn test_scope_display_encodes_missing_org_as_empty() {
        assert_eq!(TenantScope::new("a", "e").to_string(), "a:e:");
        assert_eq!(
            TenantScope::new("a", "e").with_organization("o").to_string(),
            "a:e:o"
        );
    }
}
