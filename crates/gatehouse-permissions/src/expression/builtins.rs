//! Built-in functions and receiver methods.
//!
//! Both tables are immutable data. A function row pairs the signature the
//! type checker enforces with the hook that installs its implementation
//! into a CEL [`Context`]. Methods are provided by the CEL standard library;
//! the table only admits the ones policies may call. Adding a built-in
//! means adding a row here.

use std::sync::Arc;

use cel_interpreter::{Context, ExecutionError, Value};
use ipnetwork::IpNetwork;
use time::Weekday;

use super::activation::Facts;
use super::checker::Type;

/// Registers a function's implementation on a context.
pub type Installer = fn(&mut Context, &Arc<Facts>);

/// A global function available to policy expressions.
pub struct FunctionDecl {
    pub name: &'static str,
    pub params: &'static [Type],
    pub returns: Type,
    pub description: &'static str,
    pub install: Installer,
}

/// A method callable on a receiver value.
pub struct MethodDecl {
    pub name: &'static str,
    /// Receiver types accepted (`Dyn` receivers are always accepted).
    pub receivers: &'static [Type],
    pub params: &'static [Type],
    pub returns: Type,
}

pub static FUNCTIONS: &[FunctionDecl] = &[
    FunctionDecl {
        name: "has_role",
        params: &[Type::String],
        returns: Type::Bool,
        description: "principal.roles contains the given role",
        install: install_has_role,
    },
    FunctionDecl {
        name: "has_any_role",
        params: &[Type::List],
        returns: Type::Bool,
        description: "principal.roles contains any of the given roles",
        install: install_has_any_role,
    },
    FunctionDecl {
        name: "has_permission",
        params: &[Type::String],
        returns: Type::Bool,
        description: "principal.permissions contains the given permission",
        install: install_has_permission,
    },
    FunctionDecl {
        name: "has_group",
        params: &[Type::String],
        returns: Type::Bool,
        description: "principal.groups contains the given group",
        install: install_has_group,
    },
    FunctionDecl {
        name: "ip_in_range",
        params: &[Type::List],
        returns: Type::Bool,
        description: "request.ip falls inside any of the given CIDR ranges",
        install: install_ip_in_range,
    },
    FunctionDecl {
        name: "is_weekday",
        params: &[],
        returns: Type::Bool,
        description: "the request time falls on Monday through Friday (UTC)",
        install: install_is_weekday,
    },
    FunctionDecl {
        name: "in_time_range",
        params: &[Type::String, Type::String],
        returns: Type::Bool,
        description: "the request time of day is within [start, end) in HH:MM, wrapping past midnight",
        install: install_in_time_range,
    },
    FunctionDecl {
        name: "size",
        params: &[Type::Dyn],
        returns: Type::Int,
        description: "length of a string, list or map",
        install: standard_library,
    },
    FunctionDecl {
        name: "manual_review_required",
        params: &[Type::String],
        returns: Type::Bool,
        description: "placeholder for an untranslated legacy condition; always false",
        install: install_manual_review_required,
    },
];

pub static METHODS: &[MethodDecl] = &[
    MethodDecl {
        name: "contains",
        receivers: &[Type::String, Type::List],
        params: &[Type::Dyn],
        returns: Type::Bool,
    },
    MethodDecl {
        name: "startsWith",
        receivers: &[Type::String],
        params: &[Type::String],
        returns: Type::Bool,
    },
    MethodDecl {
        name: "endsWith",
        receivers: &[Type::String],
        params: &[Type::String],
        returns: Type::Bool,
    },
];

/// Look up a global function by name.
pub fn function(name: &str) -> Option<&'static FunctionDecl> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

/// Look up a receiver method by name.
pub fn method(name: &str) -> Option<&'static MethodDecl> {
    METHODS.iter().find(|m| m.name == name)
}

/// Install every global function on `context`.
pub(crate) fn install(context: &mut Context, facts: &Arc<Facts>) {
    for decl in FUNCTIONS {
        (decl.install)(context, facts);
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn contains(list: &[String], needle: &str) -> bool {
    list.iter().any(|item| item == needle)
}

fn minutes_of_day(text: &str) -> Result<u32, ExecutionError> {
    let invalid = || {
        ExecutionError::function_error(
            "in_time_range",
            format!("'{}' is not a valid HH:MM time", text),
        )
    };
    let (hours, minutes) = text.split_once(':').ok_or_else(invalid)?;
    let hours: u32 = hours.parse().map_err(|_| invalid())?;
    let minutes: u32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 60 + minutes)
}

fn ip_in_range(facts: &Facts, ranges: &Value) -> Result<bool, ExecutionError> {
    let Value::List(ranges) = ranges else {
        return Err(ExecutionError::function_error(
            "ip_in_range",
            "argument must be a list",
        ));
    };

    // No client address means no range can match.
    let Some(ip) = facts.ip else {
        return Ok(false);
    };

    for range in ranges.iter() {
        let Value::String(cidr) = range else {
            return Err(ExecutionError::function_error(
                "ip_in_range",
                "ranges must be strings",
            ));
        };
        let network = cidr.parse::<IpNetwork>().map_err(|e| {
            ExecutionError::function_error("ip_in_range", format!("invalid CIDR '{}': {}", cidr, e))
        })?;
        if network.contains(ip) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn in_time_range(facts: &Facts, start: &str, end: &str) -> Result<bool, ExecutionError> {
    let start = minutes_of_day(start)?;
    let end = minutes_of_day(end)?;
    let now = u32::from(facts.now.hour()) * 60 + u32::from(facts.now.minute());

    Ok(if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    })
}

// =============================================================================
// Installers
// =============================================================================

fn standard_library(_context: &mut Context, _facts: &Arc<Facts>) {}

fn install_has_role(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function("has_role", move |role: Arc<String>| {
        contains(&facts.roles, &role)
    });
}

fn install_has_any_role(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function("has_any_role", move |roles: Value| match roles {
        Value::List(roles) => roles
            .iter()
            .any(|role| matches!(role, Value::String(r) if contains(&facts.roles, r))),
        _ => false,
    });
}

fn install_has_permission(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function("has_permission", move |permission: Arc<String>| {
        contains(&facts.permissions, &permission)
    });
}

fn install_has_group(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function("has_group", move |group: Arc<String>| {
        contains(&facts.groups, &group)
    });
}

fn install_ip_in_range(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function("ip_in_range", move |ranges: Value| {
        ip_in_range(&facts, &ranges)
    });
}

fn install_is_weekday(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function("is_weekday", move || {
        !matches!(facts.now.weekday(), Weekday::Saturday | Weekday::Sunday)
    });
}

fn install_in_time_range(context: &mut Context, facts: &Arc<Facts>) {
    let facts = Arc::clone(facts);
    context.add_function(
        "in_time_range",
        move |start: Arc<String>, end: Arc<String>| in_time_range(&facts, &start, &end),
    );
}

fn install_manual_review_required(context: &mut Context, _facts: &Arc<Facts>) {
    context.add_function("manual_review_required", |_note: Arc<String>| false);
}
