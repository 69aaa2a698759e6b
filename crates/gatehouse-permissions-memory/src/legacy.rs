//! In-memory legacy RBAC source.
//!
//! Holds a snapshot of legacy rules and roles, typically loaded from a JSON
//! export of the legacy system:
//!
//! ```json
//! {
//!   "policies": [
//!     {"subject": "role:admin", "actions": ["write"], "resource": "project:*", "condition": "owner = true"}
//!   ],
//!   "roles": [
//!     {"id": "r1", "name": "editor", "appId": "app", "environmentId": "prod"}
//!   ],
//!   "rolePermissions": {
//!     "r1": [{"subject": "", "actions": ["write"], "resource": "doc:*"}]
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use gatehouse_permissions::{
    LegacyPolicy, LegacyRbacSource, LegacyRole, PermissionsError, PermissionsResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Serialized form of a legacy RBAC export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySnapshot {
    #[serde(default)]
    pub policies: Vec<LegacyPolicy>,

    #[serde(default)]
    pub roles: Vec<LegacyRole>,

    /// Permissions keyed by role id.
    #[serde(default)]
    pub role_permissions: HashMap<String, Vec<LegacyPolicy>>,
}

/// [`LegacyRbacSource`] serving a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLegacySource {
    snapshot: LegacySnapshot,
}

impl InMemoryLegacySource {
    pub fn new(snapshot: LegacySnapshot) -> Self {
        Self { snapshot }
    }

    /// A source holding only top-level rules.
    pub fn with_policies(policies: Vec<LegacyPolicy>) -> Self {
        Self::new(LegacySnapshot {
            policies,
            ..Default::default()
        })
    }

    /// Add a role and its permissions.
    #[must_use]
    pub fn with_role(mut self, role: LegacyRole, permissions: Vec<LegacyPolicy>) -> Self {
        self.snapshot
            .role_permissions
            .insert(role.id.clone(), permissions);
        self.snapshot.roles.push(role);
        self
    }

    /// Parse a JSON export.
    ///
    /// A bare array is accepted as a list of top-level rules.
    ///
    /// # Errors
    ///
    /// Returns `LegacySource` if the document is not a valid export.
    pub fn from_json(document: &str) -> PermissionsResult<Self> {
        let value: serde_json::Value = serde_json::from_str(document)
            .map_err(|e| PermissionsError::legacy_source(format!("invalid JSON: {}", e)))?;
        let snapshot = if value.is_array() {
            LegacySnapshot {
                policies: serde_json::from_value(value).map_err(|e| {
                    PermissionsError::legacy_source(format!("invalid legacy policy list: {}", e))
                })?,
                ..Default::default()
            }
        } else {
            serde_json::from_value(value).map_err(|e| {
                PermissionsError::legacy_source(format!("invalid legacy snapshot: {}", e))
            })?
        };
        debug!(
            policies = snapshot.policies.len(),
            roles = snapshot.roles.len(),
            "Loaded legacy snapshot"
        );
        Ok(Self::new(snapshot))
    }

    /// Read and parse a JSON export from disk.
    ///
    /// # Errors
    ///
    /// Returns `LegacySource` if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> PermissionsResult<Self> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| {
            PermissionsError::legacy_source(format!("failed to read {}: {}", path.display(), e))
        })?;
        let source = Self::from_json(&document)?;
        info!(path = %path.display(), "Read legacy export");
        Ok(source)
    }

    pub fn snapshot(&self) -> &LegacySnapshot {
        &self.snapshot
    }
}

#[async_trait]
impl LegacyRbacSource for InMemoryLegacySource {
    async fn get_all_policies(&self) -> PermissionsResult<Vec<LegacyPolicy>> {
        Ok(self.snapshot.policies.clone())
    }

    async fn get_roles(
        &self,
        app_id: &str,
        environment_id: &str,
    ) -> PermissionsResult<Vec<LegacyRole>> {
        Ok(self
            .snapshot
            .roles
            .iter()
            .filter(|r| r.app_id == app_id && r.environment_id == environment_id)
            .cloned()
            .collect())
    }

    async fn get_role_permissions(&self, role_id: &str) -> PermissionsResult<Vec<LegacyPolicy>> {
        Ok(self
            .snapshot
            .role_permissions
            .get(role_id)
            .cloned()
            .unwrap_or_default())
    }
}
