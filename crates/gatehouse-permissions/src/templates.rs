//! Built-in policy templates.
//!
//! Templates are immutable data: an expression with `{{name}}` placeholders,
//! default targets, and the parameters the placeholders accept. Parameter
//! values are always rendered as quoted, escaped literals, so a value can
//! never inject operators into the generated expression.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PermissionsError;
use crate::model::{CreatePolicyRequest, WILDCARD};
use crate::PermissionsResult;

/// Kind of value a template parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    /// Rendered as one string literal.
    String,
    /// Rendered as a list of string literals.
    StringList,
}

/// A placeholder in a template expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemplateParameter {
    pub name: &'static str,
    pub kind: ParameterKind,
    pub description: &'static str,
}

/// A reusable policy blueprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    /// Expression with `{{parameter}}` placeholders.
    pub expression: &'static str,
    /// Default resource type; `None` means the caller must supply one.
    pub resource_type: Option<&'static str>,
    pub actions: &'static [&'static str],
    pub parameters: &'static [TemplateParameter],
}

impl PolicyTemplate {
    fn parameter(&self, name: &str) -> Option<&TemplateParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

static TEMPLATES: &[PolicyTemplate] = &[
    PolicyTemplate {
        id: "owner-only",
        name: "Owner only",
        description: "Only the owner of a resource may act on it",
        category: "ownership",
        expression: "resource.owner == principal.id",
        resource_type: None,
        actions: &[WILDCARD],
        parameters: &[],
    },
    PolicyTemplate {
        id: "role-required",
        name: "Role required",
        description: "Principals holding a specific role",
        category: "rbac",
        expression: "has_role({{role}})",
        resource_type: None,
        actions: &[WILDCARD],
        parameters: &[TemplateParameter {
            name: "role",
            kind: ParameterKind::String,
            description: "Role name",
        }],
    },
    PolicyTemplate {
        id: "any-role",
        name: "Any of several roles",
        description: "Principals holding at least one of the listed roles",
        category: "rbac",
        expression: "has_any_role({{roles}})",
        resource_type: None,
        actions: &[WILDCARD],
        parameters: &[TemplateParameter {
            name: "roles",
            kind: ParameterKind::StringList,
            description: "Role names",
        }],
    },
    PolicyTemplate {
        id: "admin-full-access",
        name: "Administrator full access",
        description: "The admin role may perform any action on any resource",
        category: "rbac",
        expression: "has_role(\"admin\")",
        resource_type: Some(WILDCARD),
        actions: &[WILDCARD],
        parameters: &[],
    },
    PolicyTemplate {
        id: "public-read",
        name: "Public read",
        description: "Anyone may read resources marked public",
        category: "visibility",
        expression: "has(resource.visibility) && resource.visibility == \"public\"",
        resource_type: None,
        actions: &["read", "list"],
        parameters: &[],
    },
    PolicyTemplate {
        id: "team-access",
        name: "Team access",
        description: "Members of the owning team may act on a resource",
        category: "ownership",
        expression: "resource.team_id == principal.team_id",
        resource_type: None,
        actions: &["read", "update"],
        parameters: &[],
    },
    PolicyTemplate {
        id: "organization-member",
        name: "Organization member",
        description: "Principals in the resource's organization",
        category: "ownership",
        expression: "resource.organization_id == principal.organization_id",
        resource_type: None,
        actions: &["read"],
        parameters: &[],
    },
    PolicyTemplate {
        id: "business-hours",
        name: "Business hours",
        description: "Access on weekdays within a time window (UTC)",
        category: "time",
        expression: "is_weekday() && in_time_range({{start}}, {{end}})",
        resource_type: None,
        actions: &[WILDCARD],
        parameters: &[
            TemplateParameter {
                name: "start",
                kind: ParameterKind::String,
                description: "Window start, HH:MM",
            },
            TemplateParameter {
                name: "end",
                kind: ParameterKind::String,
                description: "Window end, HH:MM",
            },
        ],
    },
    PolicyTemplate {
        id: "ip-allowlist",
        name: "IP allowlist",
        description: "Requests from the listed networks",
        category: "network",
        expression: "ip_in_range({{cidrs}})",
        resource_type: None,
        actions: &[WILDCARD],
        parameters: &[TemplateParameter {
            name: "cidrs",
            kind: ParameterKind::StringList,
            description: "CIDR blocks, e.g. 10.0.0.0/8",
        }],
    },
];

/// Values and overrides used to instantiate a template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateParams {
    /// Name of the generated policy; defaults to the template name.
    #[serde(default)]
    pub name: Option<String>,

    /// Overrides the template's resource type.
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Overrides the template's actions.
    #[serde(default)]
    pub actions: Option<Vec<String>>,

    /// Placeholder values.
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl TemplateParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }
}

/// Registry of the built-in templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyTemplates;

impl PolicyTemplates {
    /// All templates, in registration order.
    #[must_use]
    pub fn list(&self) -> &'static [PolicyTemplate] {
        TEMPLATES
    }

    /// Look up a template by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&'static PolicyTemplate> {
        TEMPLATES.iter().find(|t| t.id == id)
    }

    /// Render a template into a create request.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown template and `InvalidRequest` for a
    /// missing, unknown or mistyped parameter, or when no resource type is
    /// available.
    pub fn instantiate(
        &self,
        id: &str,
        params: &TemplateParams,
    ) -> PermissionsResult<CreatePolicyRequest> {
        let template = self
            .get(id)
            .ok_or_else(|| PermissionsError::not_found("template", id))?;

        if let Some(unknown) = params
            .values
            .keys()
            .find(|k| template.parameter(k).is_none())
        {
            return Err(PermissionsError::invalid_request(format!(
                "template '{}' has no parameter '{}'",
                id, unknown
            )));
        }

        let mut expression = template.expression.to_string();
        for parameter in template.parameters {
            let value = params.values.get(parameter.name).ok_or_else(|| {
                PermissionsError::invalid_request(format!(
                    "template '{}' requires parameter '{}'",
                    id, parameter.name
                ))
            })?;
            let rendered = render(parameter, value)?;
            expression = expression.replace(&format!("{{{{{}}}}}", parameter.name), &rendered);
        }

        let resource_type = params
            .resource_type
            .clone()
            .or_else(|| template.resource_type.map(str::to_string))
            .ok_or_else(|| {
                PermissionsError::invalid_request(format!(
                    "template '{}' requires a resource type",
                    id
                ))
            })?;
        let actions = params
            .actions
            .clone()
            .unwrap_or_else(|| template.actions.iter().map(|a| a.to_string()).collect());
        let name = params
            .name
            .clone()
            .unwrap_or_else(|| format!("{} ({})", template.name, resource_type));

        Ok(
            CreatePolicyRequest::new(name, expression, resource_type, actions)
                .with_description(template.description),
        )
    }
}

fn render(parameter: &TemplateParameter, value: &serde_json::Value) -> PermissionsResult<String> {
    let mistyped = || {
        PermissionsError::invalid_request(format!(
            "parameter '{}' must be a {}",
            parameter.name,
            match parameter.kind {
                ParameterKind::String => "string",
                ParameterKind::StringList => "list of strings",
            }
        ))
    };

    match parameter.kind {
        ParameterKind::String => value.as_str().map(quote).ok_or_else(mistyped),
        ParameterKind::StringList => {
            let items = value.as_array().ok_or_else(mistyped)?;
            let quoted = items
                .iter()
                .map(|item| item.as_str().map(quote).ok_or_else(mistyped))
                .collect::<PermissionsResult<Vec<_>>>()?;
            Ok(format!("[{}]", quoted.join(", ")))
        }
    }
}

/// Render `value` as a double-quoted expression string literal.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
