//! Evaluation input.
//!
//! Each part of the context is a typed structure with an `attributes` bag for
//! anything else the caller wants policies to see. Typed fields take
//! precedence over attributes with the same name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::error::PermissionsError;
use crate::expression::Activation;

/// Extra attributes exposed to expressions.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// The acting subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalContext {
    /// Principal identity. Required.
    pub id: String,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default)]
    pub attributes: Attributes,
}

impl PrincipalContext {
    /// Create a principal with only an identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set the roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Set the groups.
    #[must_use]
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Set the permissions.
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Add an extra attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn to_value(&self) -> serde_json::Value {
        let mut map = attributes_to_map(&self.attributes);
        map.insert("id".to_string(), json!(self.id));
        map.insert("roles".to_string(), json!(self.roles));
        map.insert("groups".to_string(), json!(self.groups));
        map.insert("permissions".to_string(), json!(self.permissions));
        serde_json::Value::Object(map)
    }
}

/// The resource being accessed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContext {
    /// Resource type; selects the candidate policies.
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default)]
    pub attributes: Attributes,
}

impl ResourceContext {
    /// Create a resource context of the given type.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Set the resource id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Add an extra attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn to_value(&self) -> serde_json::Value {
        let mut map = attributes_to_map(&self.attributes);
        map.insert("type".to_string(), json!(self.resource_type));
        if let Some(id) = &self.id {
            map.insert("id".to_string(), json!(id));
        }
        if let Some(owner) = &self.owner {
            map.insert("owner".to_string(), json!(owner));
        }
        serde_json::Value::Object(map)
    }
}

/// Request metadata (exposed as both `request` and `context`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Client IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Request time; defaults to the evaluation time.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<OffsetDateTime>,

    #[serde(default)]
    pub attributes: Attributes,
}

impl RequestContext {
    /// Set the client IP.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the request time.
    #[must_use]
    pub fn with_time(mut self, time: OffsetDateTime) -> Self {
        self.time = Some(time);
        self
    }

    /// Add an extra attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn to_value(&self, now: OffsetDateTime) -> serde_json::Value {
        let mut map = attributes_to_map(&self.attributes);
        if let Some(ip) = &self.ip {
            map.insert("ip".to_string(), json!(ip));
        }
        let timestamp = now
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        map.insert("time".to_string(), json!(timestamp));
        serde_json::Value::Object(map)
    }
}

/// Everything one evaluation call needs besides the tenant scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    pub principal: PrincipalContext,
    pub resource: ResourceContext,
    #[serde(default)]
    pub request: RequestContext,
    pub action: String,
}

impl EvaluationContext {
    /// Create a context for `principal` performing `action` on `resource`.
    #[must_use]
    pub fn new(
        principal: PrincipalContext,
        resource: ResourceContext,
        action: impl Into<String>,
    ) -> Self {
        Self {
            principal,
            resource,
            request: RequestContext::default(),
            action: action.into(),
        }
    }

    /// Attach request metadata.
    #[must_use]
    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    /// Check the keys every evaluation needs.
    ///
    /// # Errors
    ///
    /// Returns `PermissionsError::InvalidRequest` when the principal id,
    /// resource type or action is empty.
    pub fn validate(&self) -> Result<(), PermissionsError> {
        if self.principal.id.trim().is_empty() {
            return Err(PermissionsError::invalid_request("principal.id is required"));
        }
        if self.resource.resource_type.trim().is_empty() {
            return Err(PermissionsError::invalid_request(
                "resource type is required",
            ));
        }
        if self.action.trim().is_empty() {
            return Err(PermissionsError::invalid_request("action is required"));
        }
        Ok(())
    }

    /// Build the expression environment for this context.
    #[must_use]
    pub fn activation(&self) -> Activation {
        let now = self.request.time.unwrap_or_else(OffsetDateTime::now_utc);
        Activation::new(
            self.principal.to_value(),
            self.resource.to_value(),
            self.request.to_value(now),
            self.action.clone(),
            now,
        )
    }
}

fn attributes_to_map(attributes: &Attributes) -> serde_json::Map<String, serde_json::Value> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
