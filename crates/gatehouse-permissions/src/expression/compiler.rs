//! Policy compiler.
//!
//! Turns expression text into a checked [`Program`] and binds it to the
//! static metadata of a [`Policy`] to produce a [`CompiledPolicy`].
//!
//! Parsing is done by `cel-parser` and execution by `cel-interpreter`; this
//! module adds the environment checks, the size limits and the complexity
//! score on top of the parsed tree.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use cel_interpreter::Value;
use cel_parser::Expression;
use uuid::Uuid;

use super::activation::Activation;
use super::checker::{self, Type};
use super::runtime;
use super::{
    CompileError, DEFAULT_MAX_COMPLEXITY, EvaluationError, MAX_EXPRESSION_DEPTH,
    MAX_EXPRESSION_LENGTH, complexity,
};
use crate::model::{Policy, TenantScope, WILDCARD};

/// Static facts about a valid expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionInfo {
    /// Weighted structural cost.
    pub complexity: u32,
    /// Height of the expression tree.
    pub depth: usize,
    /// Inferred result type (`bool`, or `dyn` when only known at runtime).
    pub result_type: Type,
}

/// A parsed and checked expression, ready to run.
#[derive(Clone)]
pub struct Program {
    source: Arc<str>,
    expr: Arc<Expression>,
    info: ExpressionInfo,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("source", &self.source)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Program {
    /// Static facts gathered at compile time.
    #[must_use]
    pub fn info(&self) -> ExpressionInfo {
        self.info
    }

    /// The expression text this program was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the program against an activation.
    ///
    /// `&&`, `||`, `!` and `?:` short-circuit left to right, so
    /// `false && <error>` is `false` and `true || <error>` is `true`.
    /// Comprehensions stop at the deadline.
    ///
    /// # Errors
    ///
    /// Returns `EvaluationError::Timeout` when `deadline` has passed before
    /// or during the run, and `EvaluationError::Runtime` for missing keys,
    /// type mismatches, invalid built-in arguments or a non-bool result.
    pub fn evaluate(
        &self,
        activation: &Activation,
        deadline: Option<Instant>,
    ) -> Result<bool, EvaluationError> {
        let expired = || deadline.is_some_and(|d| Instant::now() >= d);
        if expired() {
            return Err(EvaluationError::Timeout);
        }

        let context = activation.context(deadline);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            runtime::resolve(&self.expr, &context)
        }));
        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(_)) if expired() => return Err(EvaluationError::Timeout),
            Ok(Err(err)) => return Err(EvaluationError::runtime(err.to_string())),
            Err(_) => return Err(EvaluationError::runtime("expression execution panicked")),
        };

        if expired() {
            return Err(EvaluationError::Timeout);
        }
        match value {
            Value::Bool(result) => Ok(result),
            other => Err(EvaluationError::runtime(format!(
                "expression produced {:?}, expected bool",
                other
            ))),
        }
    }
}

/// In-memory executable form of a stored policy. Never persisted.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy_id: Uuid,
    pub scope: TenantScope,
    pub name: String,
    pub resource_type: String,
    pub actions: Vec<String>,
    pub priority: i32,
    pub version: u32,
    pub complexity: u32,
    program: Program,
}

impl CompiledPolicy {
    /// Whether the policy's action set contains the action or the wildcard.
    #[must_use]
    pub fn matches_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == WILDCARD || a == action)
    }

    /// The compiled predicate.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Evaluate the predicate.
    ///
    /// # Errors
    ///
    /// See [`Program::evaluate`].
    pub fn evaluate(
        &self,
        activation: &Activation,
        deadline: Option<Instant>,
    ) -> Result<bool, EvaluationError> {
        self.program.evaluate(activation, deadline)
    }
}

/// Compiles policy expressions against the fixed environment.
///
/// The compiler is a small value type; per-tenant ceilings are applied by
/// constructing a compiler with [`PolicyCompiler::with_max_complexity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyCompiler {
    max_complexity: u32,
}

impl Default for PolicyCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COMPLEXITY)
    }
}

impl PolicyCompiler {
    /// Create a compiler with the given complexity ceiling.
    #[must_use]
    pub fn new(max_complexity: u32) -> Self {
        Self { max_complexity }
    }

    /// A copy of this compiler with a different ceiling.
    #[must_use]
    pub fn with_max_complexity(self, max_complexity: u32) -> Self {
        Self { max_complexity }
    }

    /// The configured complexity ceiling.
    #[must_use]
    pub fn max_complexity(&self) -> u32 {
        self.max_complexity
    }

    /// Check syntax, identifiers, functions and the boolean result type.
    ///
    /// The complexity ceiling is not applied here; see
    /// [`PolicyCompiler::compile_expression`].
    ///
    /// # Errors
    ///
    /// Returns the first [`CompileError`] found.
    pub fn validate(&self, expression: &str) -> Result<(), CompileError> {
        self.analyze(expression).map(|_| ())
    }

    /// Structural cost of an expression, independent of any data.
    ///
    /// # Errors
    ///
    /// Returns a syntax error if the expression does not parse.
    pub fn estimate_complexity(&self, expression: &str) -> Result<u32, CompileError> {
        let expr = parse(expression)?;
        Ok(complexity::estimate(&expr))
    }

    /// Validate an expression and report its static facts.
    ///
    /// # Errors
    ///
    /// Returns the first [`CompileError`] found.
    pub fn analyze(&self, expression: &str) -> Result<ExpressionInfo, CompileError> {
        let expr = parse(expression)?;
        Self::info_for(expression, &expr)
    }

    fn info_for(source: &str, expr: &Expression) -> Result<ExpressionInfo, CompileError> {
        let result_type = checker::check(source, expr)?;
        Ok(ExpressionInfo {
            complexity: complexity::estimate(expr),
            depth: complexity::depth(expr),
            result_type,
        })
    }

    /// Validate an expression and enforce the complexity ceiling.
    ///
    /// # Errors
    ///
    /// Returns `CompileError::ComplexityExceeded` when the score is above
    /// the ceiling, otherwise the first validation error.
    pub fn compile_expression(&self, expression: &str) -> Result<Program, CompileError> {
        let expr = parse(expression)?;
        let info = Self::info_for(expression, &expr)?;
        if info.complexity > self.max_complexity {
            return Err(CompileError::ComplexityExceeded {
                complexity: info.complexity,
                max: self.max_complexity,
            });
        }
        Ok(Program {
            source: Arc::from(expression),
            expr: Arc::new(expr),
            info,
        })
    }

    /// Compile a policy into its executable form.
    ///
    /// # Errors
    ///
    /// See [`PolicyCompiler::compile_expression`].
    pub fn compile(&self, policy: &Policy) -> Result<CompiledPolicy, CompileError> {
        let program = self.compile_expression(&policy.expression)?;
        tracing::debug!(
            policy_id = %policy.id,
            version = policy.version,
            complexity = program.info.complexity,
            "Compiled policy"
        );
        Ok(CompiledPolicy {
            policy_id: policy.id,
            scope: policy.scope.clone(),
            name: policy.name.clone(),
            resource_type: policy.resource_type.clone(),
            actions: policy.actions.clone(),
            priority: policy.priority,
            version: policy.version,
            complexity: program.info.complexity,
            program,
        })
    }
}

/// Parse with the length and depth limits applied.
fn parse(expression: &str) -> Result<Expression, CompileError> {
    if expression.len() > MAX_EXPRESSION_LENGTH {
        return Err(CompileError::TooLong {
            length: expression.len(),
            max: MAX_EXPRESSION_LENGTH,
        });
    }
    if expression.trim().is_empty() {
        return Err(CompileError::Syntax {
            message: "expression is empty".to_string(),
        });
    }
    let expr = cel_parser::parse(expression).map_err(|e| CompileError::Syntax {
        message: e.to_string(),
    })?;
    let depth = complexity::depth(&expr);
    if depth > MAX_EXPRESSION_DEPTH {
        return Err(CompileError::TooDeep {
            depth,
            max: MAX_EXPRESSION_DEPTH,
        });
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn policy(expression: &str) -> Policy {
        let now = OffsetDateTime::now_utc();
        Policy {
            id: Uuid::new_v4(),
            scope: TenantScope::new("app", "prod"),
            namespace_id: Uuid::new_v4(),
            name: "p".to_string(),
            description: String::new(),
            expression: expression.to_string(),
            resource_type: "document".to_string(),
            actions: vec!["read".to_string()],
            priority: 5,
            enabled: true,
            version: 3,
            created_by: "admin".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_validate() {
        let compiler = PolicyCompiler::default();
        assert!(compiler.validate("resource.owner == principal.id").is_ok());
        assert!(matches!(
            compiler.validate("foo.bar == 1"),
            Err(CompileError::UndeclaredIdentifier { .. })
        ));
        assert!(matches!(
            compiler.validate("principal.id"),
            Ok(())
        ));
        assert!(matches!(
            compiler.validate("\"x\""),
            Err(CompileError::NonBooleanResult { .. })
        ));
    }

    #[test]
    fn test_estimate_complexity_is_deterministic() {
        let compiler = PolicyCompiler::default();
        let a = compiler
            .estimate_complexity("principal.roles.exists(r, r == \"admin\")")
            .unwrap();
        let b = compiler
            .estimate_complexity("principal.roles.exists(r, r == \"admin\")")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 14);
    }

    #[test]
    fn test_complexity_ceiling() {
        let compiler = PolicyCompiler::new(10);
        assert_eq!(compiler.max_complexity(), 10);
        let err = compiler
            .compile(&policy("principal.roles.exists(r, r == \"admin\")"))
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::ComplexityExceeded {
                complexity: 14,
                max: 10
            }
        );

        // The same expression passes with a per-tenant ceiling.
        assert!(
            compiler
                .with_max_complexity(100)
                .compile(&policy("principal.roles.exists(r, r == \"admin\")"))
                .is_ok()
        );
    }

    #[test]
    fn test_compile_binds_metadata() {
        let p = policy("resource.owner == principal.id");
        let compiled = PolicyCompiler::default().compile(&p).unwrap();
        assert_eq!(compiled.policy_id, p.id);
        assert_eq!(compiled.priority, 5);
        assert_eq!(compiled.version, 3);
        assert_eq!(compiled.complexity, 5);
        assert!(compiled.matches_action("read"));
        assert!(!compiled.matches_action("write"));
        assert_eq!(compiled.program().info().result_type, Type::Bool);
    }

    fn activation() -> Activation {
        Activation::new(
            json!({"id": "u1", "roles": ["editor", "viewer"], "level": 3}),
            json!({"owner": "u1", "tags": ["a", "b"], "score": 2.5, "public": false}),
            json!({"ip": "10.0.0.1"}),
            "read",
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    fn run(expression: &str) -> Result<bool, EvaluationError> {
        PolicyCompiler::default()
            .compile_expression(expression)
            .unwrap()
            .evaluate(&activation(), None)
    }

    #[test]
    fn test_compiled_policy_evaluates() {
        let compiled = PolicyCompiler::default()
            .compile(&policy("resource.owner == principal.id"))
            .unwrap();
        assert!(compiled.evaluate(&activation(), None).unwrap());
        assert_eq!(compiled.program().source(), "resource.owner == principal.id");
    }

    #[test]
    fn test_operators() {
        assert!(run(r#"action in ["read", "list"]"#).unwrap());
        assert!(run(r#"resource.tags[1] == "b""#).unwrap());
        assert!(run("principal.level >= 3 && resource.score < 3.0").unwrap());
        assert!(run(r#"principal.roles.exists(r, r == "viewer")"#).unwrap());
        assert!(!run(r#"principal.roles.all(r, r.startsWith("ed"))"#).unwrap());
        assert!(run("resource.public ? false : true").unwrap());
        assert!(run("context.ip == request.ip").unwrap());
    }

    #[test]
    fn test_missing_key_is_an_error_but_has_is_not() {
        let err = run("resource.team == \"eng\"").unwrap_err();
        assert!(matches!(err, EvaluationError::Runtime { .. }));
        assert!(!run("has(resource.team)").unwrap());
        assert!(run("has(resource.owner)").unwrap());
    }

    #[test]
    fn test_logical_operators_short_circuit() {
        assert!(!run("false && resource.team == \"eng\"").unwrap());
        assert!(run("true || resource.team == \"eng\"").unwrap());
        assert!(run("resource.team == \"eng\" && false").is_err());
        assert!(!run("resource.public ? resource.team == \"eng\" : false").unwrap());
    }

    #[test]
    fn test_presence_guard_is_a_clean_false() {
        assert!(!run("has(resource.team) && resource.team == \"eng\"").unwrap());
        assert!(run("!(has(resource.team) && resource.team == \"eng\")").unwrap());
        assert!(run("!has(resource.team) || resource.team == \"eng\"").unwrap());
        assert!(
            !run("principal.roles.exists(r, has(resource.team) && resource.team == r)").unwrap()
        );
    }

    #[test]
    fn test_comprehensions() {
        assert!(run(r#"principal.roles.exists_one(r, r == "editor")"#).unwrap());
        assert!(!run(r#"resource.tags.exists_one(t, t != "c")"#).unwrap());
        assert!(run(r#"principal.roles.all(r, size(r) > 1)"#).unwrap());
    }

    #[test]
    fn test_slow_predicate_stops_at_deadline() {
        let items: Vec<i64> = (0..3000).collect();
        let activation = Activation::new(
            json!({"id": "u1"}),
            json!({"items": items}),
            json!({}),
            "read",
            OffsetDateTime::UNIX_EPOCH,
        );
        let program = PolicyCompiler::default()
            .compile_expression("resource.items.exists(x, resource.items.exists(y, x + y < 0))")
            .unwrap();

        let started = Instant::now();
        let result = program.evaluate(&activation, Some(started + Duration::from_millis(10)));
        assert_eq!(result, Err(EvaluationError::Timeout));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_dynamic_non_bool_result_is_a_runtime_error() {
        let err = run("resource.owner").unwrap_err();
        assert!(matches!(err, EvaluationError::Runtime { .. }));
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let program = PolicyCompiler::default().compile_expression("true").unwrap();
        let past = Instant::now()
            .checked_sub(Duration::from_millis(5))
            .unwrap_or_else(Instant::now);
        assert_eq!(
            program.evaluate(&activation(), Some(past)),
            Err(EvaluationError::Timeout)
        );
        let future = Instant::now() + Duration::from_secs(5);
        assert_eq!(program.evaluate(&activation(), Some(future)), Ok(true));
    }

    #[test]
    fn test_size_limits() {
        let compiler = PolicyCompiler::default();
        let long = format!("action == \"{}\"", "x".repeat(MAX_EXPRESSION_LENGTH));
        assert!(matches!(
            compiler.validate(&long),
            Err(CompileError::TooLong { .. })
        ));

        let nested = format!("{}true{}", "(".repeat(30), ")".repeat(30));
        assert!(compiler.validate(&nested).is_ok());
        let deep = format!(
            "{}true{}",
            "true && (".repeat(MAX_EXPRESSION_DEPTH),
            ")".repeat(MAX_EXPRESSION_DEPTH)
        );
        assert!(matches!(
            compiler.validate(&deep),
            Err(CompileError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_syntax_errors() {
        let compiler = PolicyCompiler::default();
        for bad in ["", "resource.owner ==", "(true", "has_role(\"a\""] {
            assert!(
                matches!(compiler.validate(bad), Err(CompileError::Syntax { .. })),
                "{bad:?} should be a syntax error"
            );
        }
    }
}
