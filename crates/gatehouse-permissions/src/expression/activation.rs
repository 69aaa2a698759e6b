//! The evaluation environment handed to a compiled program.
//!
//! An [`Activation`] is built once per request from the evaluation context.
//! It keeps the JSON form of each variable for inspection and the CEL form
//! for execution, plus the principal facts the built-in functions read.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use cel_interpreter::{Context, Value};
use serde_json::Value as Json;
use time::OffsetDateTime;

use super::{builtins, runtime};

/// Principal and request facts captured by the built-in functions.
#[derive(Debug, Clone)]
pub struct Facts {
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub permissions: Vec<String>,
    /// Parsed `request.ip`; `None` when absent or unparseable.
    pub ip: Option<IpAddr>,
    pub now: OffsetDateTime,
}

impl Facts {
    fn from_variables(principal: &Json, request: &Json, now: OffsetDateTime) -> Self {
        Self {
            roles: string_list(principal.get("roles")),
            groups: string_list(principal.get("groups")),
            permissions: string_list(principal.get("permissions")),
            ip: request
                .get("ip")
                .and_then(Json::as_str)
                .and_then(|ip| ip.parse().ok()),
            now,
        }
    }
}

fn string_list(value: Option<&Json>) -> Vec<String> {
    value
        .and_then(Json::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Variables bound for one evaluation.
#[derive(Debug, Clone)]
pub struct Activation {
    principal: Json,
    resource: Json,
    request: Json,
    action: String,
    now: OffsetDateTime,
    facts: Arc<Facts>,
    bindings: Arc<[(&'static str, Value)]>,
}

impl Activation {
    pub fn new(
        principal: Json,
        resource: Json,
        request: Json,
        action: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        let action = action.into();
        let facts = Arc::new(Facts::from_variables(&principal, &request, now));
        let request_value = to_cel(&request);
        let bindings: Arc<[(&'static str, Value)]> = Arc::from(vec![
            ("principal", to_cel(&principal)),
            ("resource", to_cel(&resource)),
            ("request", request_value.clone()),
            ("context", request_value),
            ("action", Value::String(Arc::new(action.clone()))),
        ]);
        Self {
            principal,
            resource,
            request,
            action,
            now,
            facts,
            bindings,
        }
    }

    /// A top-level variable. `context` is an alias of `request`.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Json> {
        match name {
            "principal" => Some(&self.principal),
            "resource" => Some(&self.resource),
            "request" | "context" => Some(&self.request),
            _ => None,
        }
    }

    /// `variable.key`, if both exist.
    #[must_use]
    pub fn field(&self, variable: &str, key: &str) -> Option<&Json> {
        self.variable(variable)?.get(key)
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        self.now
    }

    #[must_use]
    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    /// A fresh CEL context with every variable and built-in installed.
    /// Comprehensions on it fail once `deadline` passes.
    pub(crate) fn context(&self, deadline: Option<Instant>) -> Context {
        let mut context = Context::default();
        for (name, value) in self.bindings.iter() {
            context.add_variable_from_value(*name, value.clone());
        }
        builtins::install(&mut context, &self.facts);
        runtime::install_comprehensions(&mut context, deadline);
        context
    }
}

/// Convert JSON into a CEL value. Integral numbers become `int`, all other
/// numbers `double`.
pub(crate) fn to_cel(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(Arc::new(s.clone())),
        Json::Array(items) => Value::List(Arc::new(items.iter().map(to_cel).collect())),
        Json::Object(map) => Value::from(
            map.iter()
                .map(|(k, v)| (k.clone(), to_cel(v)))
                .collect::<HashMap<String, Value>>(),
        ),
    }
}
