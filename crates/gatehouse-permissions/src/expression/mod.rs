//! Policy expression language.
//!
//! Policies are boolean CEL expressions, executed by `cel-interpreter`:
//!
//! ```text
//! resource.owner == principal.id
//! principal.roles.exists(r, r == "admin") && action in ["read", "list"]
//! ip_in_range(["10.0.0.0/8"]) && in_time_range("09:00", "17:00")
//! ```
//!
//! Expressions are parsed, checked against the fixed variable and function
//! environment and scored for structural complexity before they are handed
//! to the interpreter. Any unknown identifier or function is rejected at
//! compile time so that a typo can never evaluate to "allow".

mod activation;
pub mod builtins;
mod checker;
mod compiler;
mod complexity;
mod runtime;

pub use activation::{Activation, Facts};
pub use checker::Type;
pub use compiler::{CompiledPolicy, ExpressionInfo, PolicyCompiler, Program};

/// Maximum expression length in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// Maximum nesting depth of an expression tree.
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// Default complexity ceiling.
pub const DEFAULT_MAX_COMPLEXITY: u32 = 100;

/// Errors produced while compiling an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("syntax error: {message}")]
    Syntax { message: String },

    #[error("undeclared reference to '{name}' at position {position}")]
    UndeclaredIdentifier { name: String, position: usize },

    #[error("unknown function '{name}' at position {position}")]
    UnknownFunction { name: String, position: usize },

    #[error("{function}() expects {expected} argument(s), found {found} at position {position}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
        position: usize,
    },

    #[error("type error: {message}")]
    Type { message: String },

    #[error("expression must evaluate to bool, found {found}")]
    NonBooleanResult { found: Type },

    #[error("expression is {length} bytes long, maximum is {max}")]
    TooLong { length: usize, max: usize },

    #[error("expression nesting depth {depth} exceeds maximum {max}")]
    TooDeep { depth: usize, max: usize },

    #[error("expression complexity {complexity} exceeds maximum {max}")]
    ComplexityExceeded { complexity: u32, max: u32 },
}

impl CompileError {
    /// Byte offset of the problem, when it has one.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::UndeclaredIdentifier { position, .. }
            | Self::UnknownFunction { position, .. }
            | Self::Arity { position, .. } => Some(*position),
            Self::NonBooleanResult { .. } => Some(0),
            Self::Syntax { .. }
            | Self::Type { .. }
            | Self::TooLong { .. }
            | Self::TooDeep { .. }
            | Self::ComplexityExceeded { .. } => None,
        }
    }

    /// The clause of `expression` around the error position, for
    /// author-facing diagnostics.
    #[must_use]
    pub fn clause<'e>(&self, expression: &'e str) -> Option<&'e str> {
        let position = self.position()?;
        if position >= expression.len() {
            return None;
        }
        let start = expression[..position]
            .rfind(['&', '|', '(', '?', ':', ','])
            .map_or(0, |i| i + 1);
        let end = expression[position..]
            .find(['&', '|', ')', '?', ':', ','])
            .map_or(expression.len(), |i| position + i);
        let clause = expression.get(start..end)?.trim();
        (!clause.is_empty()).then_some(clause)
    }
}

/// Errors produced while evaluating one compiled policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    /// The evaluation deadline passed.
    #[error("evaluation timed out")]
    Timeout,

    /// A runtime type mismatch, missing key or invalid argument.
    #[error("runtime error: {message}")]
    Runtime { message: String },
}

impl EvaluationError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }
}
