//! Execution driver over `cel-interpreter`.
//!
//! The interpreter resolves both sides of `&&` and `||` before combining
//! them and runs comprehensions to completion. This module resolves the
//! logical connectives itself, left to right with short-circuiting, and
//! replaces the `exists`, `all` and `exists_one` macros with versions that
//! check the call deadline on every iteration. Everything else is handed to
//! [`Context::resolve`].
//!
//! Connectives nested inside an operand the interpreter resolves (a list
//! literal, a function argument, a comparison operand) keep the
//! interpreter's eager behaviour.

use std::time::Instant;

use cel_interpreter::{Context, ExecutionError, FunctionContext, Value};
use cel_parser::{Expression, UnaryOp};

/// Message carried by the error a comprehension raises at the deadline.
pub(crate) const DEADLINE_MESSAGE: &str = "evaluation deadline exceeded";

/// Resolve `expr`, short-circuiting `&&`, `||`, `!` and `?:`.
pub(crate) fn resolve(expr: &Expression, ctx: &Context) -> Result<Value, ExecutionError> {
    match expr {
        Expression::And(lhs, rhs) => {
            if !truthy("&&", resolve(lhs, ctx)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy("&&", resolve(rhs, ctx)?)?))
        }
        Expression::Or(lhs, rhs) => {
            if truthy("||", resolve(lhs, ctx)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy("||", resolve(rhs, ctx)?)?))
        }
        Expression::Unary(UnaryOp::Not, operand) => {
            Ok(Value::Bool(!truthy("!", resolve(operand, ctx)?)?))
        }
        Expression::Ternary(cond, then, otherwise) => {
            if truthy("?:", resolve(cond, ctx)?)? {
                resolve(then, ctx)
            } else {
                resolve(otherwise, ctx)
            }
        }
        _ => ctx.resolve(expr),
    }
}

fn truthy(operator: &str, value: Value) -> Result<bool, ExecutionError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExecutionError::function_error(
            operator,
            format!("expected bool operand, found {:?}", other),
        )),
    }
}

/// Install the deadline-aware comprehension macros on `context`.
pub(crate) fn install_comprehensions(context: &mut Context, deadline: Option<Instant>) {
    context.add_function("exists", move |ftx: &FunctionContext| {
        comprehend(ftx, deadline, Quantifier::Exists)
    });
    context.add_function("all", move |ftx: &FunctionContext| {
        comprehend(ftx, deadline, Quantifier::All)
    });
    context.add_function("exists_one", move |ftx: &FunctionContext| {
        comprehend(ftx, deadline, Quantifier::ExistsOne)
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quantifier {
    Exists,
    All,
    ExistsOne,
}

impl Quantifier {
    fn name(self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::All => "all",
            Self::ExistsOne => "exists_one",
        }
    }
}

fn comprehend(
    ftx: &FunctionContext,
    deadline: Option<Instant>,
    quantifier: Quantifier,
) -> Result<Value, ExecutionError> {
    let name = quantifier.name();
    let (Some(target), [Expression::Ident(var), body]) = (ftx.this.as_ref(), ftx.args.as_slice())
    else {
        return Err(ExecutionError::function_error(
            name,
            "expected a receiver, a loop variable and a predicate",
        ));
    };

    let items: Vec<Value> = match target {
        Value::List(items) => items.iter().cloned().collect(),
        Value::Map(map) => map.map.keys().cloned().map(Value::from).collect(),
        other => {
            return Err(ExecutionError::function_error(
                name,
                format!("cannot iterate over {:?}", other),
            ));
        }
    };

    let mut matches = 0usize;
    for item in items {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ExecutionError::function_error(name, DEADLINE_MESSAGE));
        }
        let mut scope = ftx.ptx.new_inner_scope();
        scope.add_variable_from_value(var.as_str(), item);
        let hit = truthy(name, resolve(body, &scope)?)?;
        match quantifier {
            Quantifier::Exists if hit => return Ok(Value::Bool(true)),
            Quantifier::All if !hit => return Ok(Value::Bool(false)),
            Quantifier::ExistsOne if hit => {
                matches += 1;
                if matches > 1 {
                    return Ok(Value::Bool(false));
                }
            }
            _ => {}
        }
    }

    Ok(Value::Bool(match quantifier {
        Quantifier::Exists => false,
        Quantifier::All => true,
        Quantifier::ExistsOne => matches == 1,
    }))
}
