//! Legacy RBAC rule translation.
//!
//! Translation is pure and deterministic: the same legacy rule always yields
//! the same policy name and expression text. Each legacy rule becomes an
//! AND-join of up to four clauses:
//!
//! | Part      | Legacy form            | Expression                                   |
//! |-----------|------------------------|----------------------------------------------|
//! | subject   | `role:admin`           | `principal.roles.exists(r, r == "admin")`    |
//! | subject   | `user:u1`              | `principal.id == "u1"`                       |
//! | resource  | `project:*`            | `resource.type == "project"`                 |
//! | resource  | `project:tmp-*`        | `... && resource.id.startsWith("tmp-")`      |
//! | actions   | `["read", "list"]`     | `action in ["read", "list"]`                 |
//! | condition | `owner = true`         | `resource.owner == principal.id`             |
//!
//! Wildcards produce no clause, and an empty clause set becomes `true`.
//! Conditions run through an ordered list of [`ConditionRule`]s; anything no
//! rule recognizes becomes a `manual_review_required(...)` call, which never
//! grants access.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use super::source::LegacyPolicy;
use crate::PermissionsResult;
use crate::error::PermissionsError;
use crate::model::{CreatePolicyRequest, WILDCARD};
use crate::templates::quote;

/// Name reported for conditions no rule recognized.
pub const MANUAL_REVIEW_RULE: &str = "manual-review";

/// Splits a compound condition into its conjuncts.
static CONJUNCTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+|\s*&&\s*").expect("Invalid conjunction regex"));

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("Invalid number regex"));

static DEFAULT_RULES: LazyLock<Vec<ConditionRule>> = LazyLock::new(|| {
    vec![
        ConditionRule::new(
            "ownership",
            r"(?i)^(?:owner|is_owner|owned_by_user)\s*==?\s*true$",
            |_| Some("resource.owner == principal.id".to_string()),
        ),
        ConditionRule::new("team", r"(?i)^(?:team|same_team)\s*==?\s*true$", |_| {
            Some("resource.team == principal.team".to_string())
        }),
        ConditionRule::new(
            "visibility",
            r#"(?i)^visibility\s*==?\s*["']?([A-Za-z_][A-Za-z0-9_-]*)["']?$"#,
            |caps| Some(format!("resource.visibility == {}", quote(&caps[1]))),
        ),
        ConditionRule::new(
            "organization",
            r"(?i)^(?:org|organization|same_org)\s*==?\s*true$",
            |_| Some("resource.organization_id == principal.organization_id".to_string()),
        ),
        ConditionRule::new(
            "comparison",
            r#"^([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\s*(==|!=|<=|>=|=|<|>)\s*("[^"]*"|'[^']*'|-?\d+(?:\.\d+)?|true|false|null|[A-Za-z0-9_-]+)$"#,
            translate_comparison,
        ),
    ]
    .into_iter()
    .collect::<Result<_, _>>()
    .expect("Invalid condition rule regex")
});

// =============================================================================
// Condition rules
// =============================================================================

/// One `(matcher, translator)` pair of the condition table.
#[derive(Clone)]
pub struct ConditionRule {
    name: &'static str,
    matcher: Regex,
    translate: fn(&Captures<'_>) -> Option<String>,
}

impl ConditionRule {
    /// Build a rule. The translator may decline a match by returning `None`,
    /// in which case later rules are tried.
    ///
    /// # Errors
    ///
    /// Returns the regex compilation error for an invalid pattern.
    pub fn new(
        name: &'static str,
        pattern: &str,
        translate: fn(&Captures<'_>) -> Option<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            matcher: Regex::new(pattern)?,
            translate,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Translate `condition` if this rule recognizes it.
    #[must_use]
    pub fn apply(&self, condition: &str) -> Option<String> {
        let caps = self.matcher.captures(condition)?;
        (self.translate)(&caps)
    }
}

impl std::fmt::Debug for ConditionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionRule")
            .field("name", &self.name)
            .field("matcher", &self.matcher.as_str())
            .finish()
    }
}

/// `field OP value` on a resource attribute (or an explicit
/// `principal.`/`request.` path). The value must be a single token: a
/// number, `true`/`false`/`null`, a bare word or one fully quoted string.
fn translate_comparison(caps: &Captures<'_>) -> Option<String> {
    let field = &caps[1];
    if field
        .split('.')
        .any(|part| matches!(part, "true" | "false" | "null" | "in"))
    {
        return None;
    }
    let path = if ["principal.", "resource.", "request."]
        .iter()
        .any(|root| field.starts_with(root))
    {
        field.to_string()
    } else {
        format!("resource.{}", field)
    };

    let op = match &caps[2] {
        "=" => "==",
        other => other,
    };
    Some(format!("{} {} {}", path, op, literal(caps[3].trim())))
}

/// Render a legacy value as an expression literal.
fn literal(value: &str) -> String {
    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    if let Some(inner) = unquoted {
        return quote(inner);
    }
    if matches!(value, "true" | "false" | "null") || NUMBER.is_match(value) {
        return value.to_string();
    }
    quote(value)
}

/// Split a condition on `and` / `&&` outside quoted strings.
fn split_conjuncts(condition: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for separator in CONJUNCTION.find_iter(condition) {
        if quoted_at(condition, separator.start()) {
            continue;
        }
        parts.push(&condition[start..separator.start()]);
        start = separator.end();
    }
    parts.push(&condition[start..]);
    parts
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Whether byte `index` of `text` falls inside a quoted string.
fn quoted_at(text: &str, index: usize) -> bool {
    let mut quote = None;
    for c in text[..index].chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None => {}
        }
    }
    quote.is_some()
}

// =============================================================================
// Subjects and resources
// =============================================================================

/// Parsed legacy subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubjectPattern {
    Any,
    Role(String),
    User(String),
    Group(String),
    Permission(String),
}

impl SubjectPattern {
    pub(crate) fn parse(subject: &str) -> PermissionsResult<Self> {
        let subject = subject.trim();
        if subject.is_empty() || subject == WILDCARD {
            return Ok(Self::Any);
        }
        let Some((kind, name)) = subject.split_once(':') else {
            return Ok(Self::Role(subject.to_string()));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(PermissionsError::invalid_request(format!(
                "legacy subject '{}' has no name",
                subject
            )));
        }
        let name = name.to_string();
        match kind.trim() {
            "role" => Ok(Self::Role(name)),
            "user" => Ok(Self::User(name)),
            "group" => Ok(Self::Group(name)),
            "permission" | "perm" => Ok(Self::Permission(name)),
            other => Err(PermissionsError::invalid_request(format!(
                "unsupported legacy subject kind '{}'",
                other
            ))),
        }
    }

    fn clause(&self) -> Option<String> {
        match self {
            Self::Any => None,
            Self::Role(role) => Some(format!("principal.roles.exists(r, r == {})", quote(role))),
            Self::User(user) => Some(format!("principal.id == {}", quote(user))),
            Self::Group(group) => Some(format!(
                "principal.groups.exists(g, g == {})",
                quote(group)
            )),
            Self::Permission(permission) => Some(format!(
                "principal.permissions.exists(p, p == {})",
                quote(permission)
            )),
        }
    }
}

/// Parsed legacy resource pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResourcePattern {
    Any,
    Type(String),
    Exact { resource_type: String, id: String },
    Prefix { resource_type: String, prefix: String },
}

impl ResourcePattern {
    pub(crate) fn parse(resource: &str) -> PermissionsResult<Self> {
        let resource = resource.trim();
        if resource.is_empty() {
            return Err(PermissionsError::invalid_request("legacy resource is empty"));
        }
        if resource == WILDCARD {
            return Ok(Self::Any);
        }
        let Some((resource_type, id)) = resource.split_once(':') else {
            return Ok(Self::Type(resource.to_string()));
        };
        let resource_type = resource_type.trim();
        if resource_type.is_empty() || resource_type == WILDCARD {
            return Err(PermissionsError::invalid_request(format!(
                "unsupported legacy resource pattern '{}'",
                resource
            )));
        }
        let resource_type = resource_type.to_string();
        let id = id.trim();
        Ok(match id.strip_suffix('*') {
            _ if id.is_empty() || id == WILDCARD => Self::Type(resource_type),
            Some(prefix) => Self::Prefix {
                resource_type,
                prefix: prefix.to_string(),
            },
            None => Self::Exact {
                resource_type,
                id: id.to_string(),
            },
        })
    }

    pub(crate) fn resource_type(&self) -> &str {
        match self {
            Self::Any => WILDCARD,
            Self::Type(resource_type)
            | Self::Exact { resource_type, .. }
            | Self::Prefix { resource_type, .. } => resource_type,
        }
    }

    fn clauses(&self) -> Vec<String> {
        let type_clause = |t: &str| format!("resource.type == {}", quote(t));
        match self {
            Self::Any => Vec::new(),
            Self::Type(resource_type) => vec![type_clause(resource_type)],
            Self::Exact { resource_type, id } => vec![
                type_clause(resource_type),
                format!("resource.id == {}", quote(id)),
            ],
            Self::Prefix {
                resource_type,
                prefix,
            } => vec![
                type_clause(resource_type),
                format!("resource.id.startsWith({})", quote(prefix)),
            ],
        }
    }
}

fn normalize_actions(actions: &[String]) -> Option<Vec<String>> {
    let actions: Vec<String> = actions
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    if actions.is_empty() || actions.iter().any(|a| a == WILDCARD) {
        None
    } else {
        Some(actions)
    }
}

fn action_clause(actions: &[String]) -> String {
    match actions {
        [single] => format!("action == {}", quote(single)),
        many => format!(
            "action in [{}]",
            many.iter().map(|a| quote(a)).collect::<Vec<_>>().join(", ")
        ),
    }
}

// =============================================================================
// Translator
// =============================================================================

/// The translated form of one legacy rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPreview {
    /// Deterministic policy name.
    pub name: String,

    pub expression: String,

    pub resource_type: String,

    /// Targeted actions; `["*"]` for a wildcard rule.
    pub actions: Vec<String>,

    /// Condition rules that fired, in clause order.
    pub matched_rules: Vec<String>,

    /// Whether part of the condition could not be translated.
    pub needs_review: bool,

    /// The legacy rule in readable form.
    pub original: String,
}

impl PolicyPreview {
    /// A create request for this preview. Rules needing review are created
    /// disabled.
    #[must_use]
    pub fn to_create_request(&self, keep_original: bool) -> CreatePolicyRequest {
        let mut description = "Migrated from legacy RBAC".to_string();
        if self.needs_review {
            description.push_str("; condition requires manual review");
        }
        if keep_original {
            description.push_str(&format!("\n\nOriginal: {}", self.original));
        }
        CreatePolicyRequest::new(
            self.name.clone(),
            self.expression.clone(),
            self.resource_type.clone(),
            self.actions.clone(),
        )
        .with_description(description)
        .with_enabled(!self.needs_review)
    }
}

/// Converts legacy RBAC rules into policy expressions.
#[derive(Debug, Clone)]
pub struct RbacTranslator {
    rules: Vec<ConditionRule>,
}

impl Default for RbacTranslator {
    fn default() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }
}

impl RbacTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule ahead of the built-in ones.
    #[must_use]
    pub fn with_rule(mut self, rule: ConditionRule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Names of the condition rules in match order, fallback last.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules
            .iter()
            .map(ConditionRule::name)
            .chain(std::iter::once(MANUAL_REVIEW_RULE))
            .collect()
    }

    /// Translate one condition conjunct. Returns the expression and the name
    /// of the rule that produced it.
    #[must_use]
    pub fn translate_condition(&self, condition: &str) -> (String, &'static str) {
        let condition = condition.trim();
        self.rules
            .iter()
            .find_map(|rule| rule.apply(condition).map(|expr| (expr, rule.name)))
            .unwrap_or_else(|| {
                (
                    format!("manual_review_required({})", quote(condition)),
                    MANUAL_REVIEW_RULE,
                )
            })
    }

    /// Translate a legacy rule.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed subject or resource.
    pub fn convert_policy(&self, legacy: &LegacyPolicy) -> PermissionsResult<PolicyPreview> {
        let subject = SubjectPattern::parse(&legacy.subject)?;
        let resource = ResourcePattern::parse(&legacy.resource)?;
        let actions = normalize_actions(&legacy.actions);

        let mut clauses = Vec::new();
        clauses.extend(subject.clause());
        clauses.extend(resource.clauses());
        if let Some(actions) = &actions {
            clauses.push(action_clause(actions));
        }

        let mut matched_rules = Vec::new();
        if let Some(condition) = legacy.condition() {
            for part in split_conjuncts(condition) {
                let (expression, rule) = self.translate_condition(part);
                clauses.push(expression);
                matched_rules.push(rule.to_string());
            }
        }

        let expression = if clauses.is_empty() {
            "true".to_string()
        } else {
            clauses.join(" && ")
        };

        Ok(PolicyPreview {
            name: policy_name(legacy),
            expression,
            resource_type: resource.resource_type().to_string(),
            actions: actions.unwrap_or_else(|| vec![WILDCARD.to_string()]),
            needs_review: matched_rules.iter().any(|r| r == MANUAL_REVIEW_RULE),
            matched_rules,
            original: legacy.to_string(),
        })
    }
}

/// `rbac-<subject>-<resource>-<actions>-<hash>`, stable across runs.
fn policy_name(legacy: &LegacyPolicy) -> String {
    let mut slug = String::from("rbac");
    for part in [
        legacy.subject.as_str(),
        legacy.resource.as_str(),
        &legacy.actions.join("-"),
    ] {
        slug.push('-');
        let mut last_dash = true;
        for c in part.chars() {
            if c.is_ascii_alphanumeric() {
                slug.push(c.to_ascii_lowercase());
                last_dash = false;
            } else if c == '*' {
                slug.push_str("any");
                last_dash = false;
            } else if !last_dash {
                slug.push('-');
                last_dash = true;
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    format!("{}-{:08x}", slug, fnv1a(&legacy.to_string()))
}

/// 32-bit FNV-1a.
fn fnv1a(input: &str) -> u32 {
    input.bytes().fold(0x811c_9dc5, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}
