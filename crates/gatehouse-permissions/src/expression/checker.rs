//! Static checks over a parsed CEL expression.
//!
//! The checker resolves every identifier against the fixed environment,
//! resolves every call against the built-in registry and infers a type for
//! each node. Attribute access on the context maps yields `dyn`, which is
//! compatible with everything and checked again at runtime.

use std::fmt;

use cel_parser::{ArithmeticOp, Atom, Expression, Member, RelationOp, UnaryOp};

use super::CompileError;
use super::builtins;

/// Static type of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
    Double,
    String,
    List,
    Map,
    Null,
    Dyn,
}

impl Type {
    fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Double)
    }

    /// Whether a value of type `actual` may be passed where `self` is expected.
    fn accepts(self, actual: Type) -> bool {
        self == Self::Dyn
            || actual == Self::Dyn
            || self == actual
            || (self == Self::Double && actual == Self::Int)
    }

    /// Whether `self` and `other` may be compared for equality.
    fn comparable(self, other: Type) -> bool {
        self == other
            || self == Self::Dyn
            || other == Self::Dyn
            || self == Self::Null
            || other == Self::Null
            || (self.is_numeric() && other.is_numeric())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Double => "double",
            Self::String => "string",
            Self::List => "list",
            Self::Map => "map",
            Self::Null => "null",
            Self::Dyn => "dyn",
        };
        f.write_str(name)
    }
}

/// Top-level variables and their types.
const VARIABLES: &[(&str, Type)] = &[
    ("principal", Type::Map),
    ("resource", Type::Map),
    ("request", Type::Map),
    ("context", Type::Map),
    ("action", Type::String),
];

/// Macros that bind a loop variable: `list.exists(v, predicate)`.
pub(crate) const COMPREHENSIONS: &[&str] = &["exists", "all", "exists_one"];

/// The name of a call target, when it is a plain identifier.
pub(crate) fn function_name(expr: &Expression) -> Option<&str> {
    match expr {
        Expression::Ident(name) => Some(name.as_str()),
        _ => None,
    }
}

/// Check an expression and require a boolean (or dynamic) result.
pub fn check(source: &str, expr: &Expression) -> Result<Type, CompileError> {
    let mut checker = Checker {
        source,
        locals: Vec::new(),
    };
    let ty = checker.infer(expr)?;
    match ty {
        Type::Bool | Type::Dyn => Ok(ty),
        found => Err(CompileError::NonBooleanResult { found }),
    }
}

struct Checker<'s> {
    source: &'s str,
    /// Comprehension variables currently in scope.
    locals: Vec<String>,
}

impl Checker<'_> {
    fn infer(&mut self, expr: &Expression) -> Result<Type, CompileError> {
        match expr {
            Expression::Atom(atom) => Ok(atom_type(atom)),

            Expression::Ident(name) => {
                if self.locals.iter().any(|l| l == name.as_str()) {
                    return Ok(Type::Dyn);
                }
                VARIABLES
                    .iter()
                    .find(|(var, _)| *var == name.as_str())
                    .map(|(_, ty)| *ty)
                    .ok_or_else(|| CompileError::UndeclaredIdentifier {
                        name: name.to_string(),
                        position: locate(self.source, name, false),
                    })
            }

            Expression::List(items) => {
                for item in items {
                    self.infer(item)?;
                }
                Ok(Type::List)
            }

            Expression::Map(entries) => {
                for (key, value) in entries {
                    self.infer(key)?;
                    self.infer(value)?;
                }
                Ok(Type::Map)
            }

            Expression::Member(target, member) => self.member(target, member),

            Expression::FunctionCall(name, target, args) => {
                let Some(name) = function_name(name) else {
                    return Err(type_error("call target must be a function name"));
                };
                match target {
                    None => self.call(name, args),
                    Some(receiver) => self.method(receiver, name, args),
                }
            }

            Expression::Unary(op, operand) => {
                let ty = self.infer(operand)?;
                match op {
                    UnaryOp::Not if Type::Bool.accepts(ty) => Ok(Type::Bool),
                    UnaryOp::Minus if ty.is_numeric() || ty == Type::Dyn => Ok(ty),
                    UnaryOp::Not => Err(type_error(format!("cannot negate {}", ty))),
                    UnaryOp::Minus => Err(type_error(format!(
                        "unary '-' expects a number, found {}",
                        ty
                    ))),
                    #[allow(unreachable_patterns)]
                    _ => Err(type_error("repeated unary operators are not supported")),
                }
            }

            Expression::And(lhs, rhs) | Expression::Or(lhs, rhs) => {
                let l = self.infer(lhs)?;
                let r = self.infer(rhs)?;
                if Type::Bool.accepts(l) && Type::Bool.accepts(r) {
                    Ok(Type::Bool)
                } else {
                    Err(type_error(format!(
                        "logical operators expect bool operands, found {} and {}",
                        l, r
                    )))
                }
            }

            Expression::Relation(lhs, op, rhs) => {
                let l = self.infer(lhs)?;
                let r = self.infer(rhs)?;
                relation_type(op, l, r).ok_or_else(|| {
                    type_error(format!(
                        "operator '{}' cannot be applied to {} and {}",
                        relation_symbol(op),
                        l,
                        r
                    ))
                })
            }

            Expression::Arithmetic(lhs, op, rhs) => {
                let l = self.infer(lhs)?;
                let r = self.infer(rhs)?;
                arithmetic_type(op, l, r).ok_or_else(|| {
                    type_error(format!(
                        "operator '{}' cannot be applied to {} and {}",
                        arithmetic_symbol(op),
                        l,
                        r
                    ))
                })
            }

            Expression::Ternary(cond, then, otherwise) => {
                let cond_ty = self.infer(cond)?;
                if !Type::Bool.accepts(cond_ty) {
                    return Err(type_error(format!(
                        "condition must be bool, found {}",
                        cond_ty
                    )));
                }
                let a = self.infer(then)?;
                let b = self.infer(otherwise)?;
                Ok(if a == b { a } else { Type::Dyn })
            }

            #[allow(unreachable_patterns)]
            _ => Err(type_error("unsupported expression form")),
        }
    }

    fn member(&mut self, target: &Expression, member: &Member) -> Result<Type, CompileError> {
        match member {
            Member::Attribute(field) => {
                let ty = self.infer(target)?;
                if matches!(ty, Type::Map | Type::Dyn) {
                    Ok(Type::Dyn)
                } else {
                    Err(type_error(format!(
                        "cannot select field '{}' from {}",
                        field, ty
                    )))
                }
            }
            Member::Index(index) => {
                let target_ty = self.infer(target)?;
                let index_ty = self.infer(index)?;
                let ok = match target_ty {
                    Type::List => Type::Int.accepts(index_ty),
                    Type::Map => Type::String.accepts(index_ty),
                    Type::Dyn => true,
                    _ => false,
                };
                if ok {
                    Ok(Type::Dyn)
                } else {
                    Err(type_error(format!(
                        "cannot index {} with {}",
                        target_ty, index_ty
                    )))
                }
            }
            _ => Err(type_error("message construction is not supported")),
        }
    }

    fn call(&mut self, name: &str, args: &[Expression]) -> Result<Type, CompileError> {
        if name == "has" {
            return self.has(args);
        }
        let decl = builtins::function(name).ok_or_else(|| CompileError::UnknownFunction {
            name: name.to_string(),
            position: locate(self.source, name, false),
        })?;
        self.check_args(name, decl.params, args, false)?;
        Ok(decl.returns)
    }

    /// `has(target.field)` tests for presence without failing on absence.
    fn has(&mut self, args: &[Expression]) -> Result<Type, CompileError> {
        let [Expression::Member(target, member)] = args else {
            return Err(CompileError::Arity {
                function: "has".to_string(),
                expected: 1,
                found: args.len(),
                position: locate(self.source, "has", false),
            });
        };
        let Member::Attribute(field) = member.as_ref() else {
            return Err(type_error("has() expects a field selection"));
        };
        let ty = self.infer(target)?;
        if matches!(ty, Type::Map | Type::Dyn) {
            Ok(Type::Bool)
        } else {
            Err(type_error(format!(
                "has() cannot test field '{}' on {}",
                field, ty
            )))
        }
    }

    fn method(
        &mut self,
        receiver: &Expression,
        name: &str,
        args: &[Expression],
    ) -> Result<Type, CompileError> {
        if COMPREHENSIONS.contains(&name) {
            return self.comprehension(receiver, name, args);
        }
        let decl = builtins::method(name).ok_or_else(|| CompileError::UnknownFunction {
            name: name.to_string(),
            position: locate(self.source, name, true),
        })?;
        let receiver_ty = self.infer(receiver)?;
        if receiver_ty != Type::Dyn && !decl.receivers.contains(&receiver_ty) {
            return Err(type_error(format!(
                "{}() is not defined on {}",
                name, receiver_ty
            )));
        }
        self.check_args(name, decl.params, args, true)?;
        Ok(decl.returns)
    }

    fn comprehension(
        &mut self,
        receiver: &Expression,
        name: &str,
        args: &[Expression],
    ) -> Result<Type, CompileError> {
        let [Expression::Ident(var), body] = args else {
            return Err(CompileError::Arity {
                function: name.to_string(),
                expected: 2,
                found: args.len(),
                position: locate(self.source, name, true),
            });
        };
        let target_ty = self.infer(receiver)?;
        if !matches!(target_ty, Type::List | Type::Map | Type::Dyn) {
            return Err(type_error(format!("cannot iterate over {}", target_ty)));
        }
        if VARIABLES.iter().any(|(v, _)| *v == var.as_str()) {
            return Err(type_error(format!(
                "loop variable '{}' shadows a built-in variable",
                var
            )));
        }
        self.locals.push(var.to_string());
        let body_ty = self.infer(body);
        self.locals.pop();
        let body_ty = body_ty?;
        if Type::Bool.accepts(body_ty) {
            Ok(Type::Bool)
        } else {
            Err(type_error(format!(
                "comprehension predicate must be bool, found {}",
                body_ty
            )))
        }
    }

    fn check_args(
        &mut self,
        name: &str,
        params: &[Type],
        args: &[Expression],
        is_method: bool,
    ) -> Result<(), CompileError> {
        if params.len() != args.len() {
            return Err(CompileError::Arity {
                function: name.to_string(),
                expected: params.len(),
                found: args.len(),
                position: locate(self.source, name, is_method),
            });
        }
        for (index, (param, arg)) in params.iter().zip(args).enumerate() {
            let ty = self.infer(arg)?;
            if !param.accepts(ty) {
                return Err(type_error(format!(
                    "{}() argument {} expects {}, found {}",
                    name,
                    index + 1,
                    param,
                    ty
                )));
            }
        }
        Ok(())
    }
}

fn type_error(message: impl Into<String>) -> CompileError {
    CompileError::Type {
        message: message.into(),
    }
}

fn atom_type(atom: &Atom) -> Type {
    match atom {
        Atom::Int(_) => Type::Int,
        Atom::Float(_) => Type::Double,
        Atom::String(_) => Type::String,
        Atom::Bool(_) => Type::Bool,
        Atom::Null => Type::Null,
        _ => Type::Dyn,
    }
}

fn relation_type(op: &RelationOp, l: Type, r: Type) -> Option<Type> {
    use Type::{Bool, Dyn, List, Map, String};

    match op {
        RelationOp::Equals | RelationOp::NotEquals => l.comparable(r).then_some(Bool),
        RelationOp::In => matches!(r, List | Map | Dyn).then_some(Bool),
        _ => {
            let ok = l == Dyn
                || r == Dyn
                || (l.is_numeric() && r.is_numeric())
                || (l == String && r == String);
            ok.then_some(Bool)
        }
    }
}

fn arithmetic_type(op: &ArithmeticOp, l: Type, r: Type) -> Option<Type> {
    use Type::{Double, Dyn, Int, List, String};

    match op {
        ArithmeticOp::Add => match (l, r) {
            (Dyn, _) | (_, Dyn) => Some(Dyn),
            (Int, Int) => Some(Int),
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Double),
            (String, String) => Some(String),
            (List, List) => Some(List),
            _ => None,
        },
        ArithmeticOp::Modulus => match (l, r) {
            (Int, Int) => Some(Int),
            (Dyn, Int) | (Int, Dyn) | (Dyn, Dyn) => Some(Dyn),
            _ => None,
        },
        _ => match (l, r) {
            (Dyn, _) | (_, Dyn) => Some(Dyn),
            (Int, Int) => Some(Int),
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Double),
            _ => None,
        },
    }
}

fn relation_symbol(op: &RelationOp) -> &'static str {
    match op {
        RelationOp::Equals => "==",
        RelationOp::NotEquals => "!=",
        RelationOp::LessThan => "<",
        RelationOp::LessThanEq => "<=",
        RelationOp::GreaterThan => ">",
        RelationOp::GreaterThanEq => ">=",
        RelationOp::In => "in",
    }
}

fn arithmetic_symbol(op: &ArithmeticOp) -> &'static str {
    match op {
        ArithmeticOp::Add => "+",
        ArithmeticOp::Subtract => "-",
        ArithmeticOp::Multiply => "*",
        ArithmeticOp::Divide => "/",
        ArithmeticOp::Modulus => "%",
    }
}

/// Byte offset of the first occurrence of `word` as a whole identifier
/// outside string literals. Method names are matched only after a `.`,
/// other names only when not preceded by one. Falls back to 0.
pub(crate) fn locate(source: &str, word: &str, is_method: bool) -> usize {
    let bytes = source.as_bytes();
    let needle = word.as_bytes();
    let is_ident = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None => {
                let before = i.checked_sub(1).map(|j| bytes[j]);
                let after = bytes.get(i + needle.len()).copied();
                let dotted = before == Some(b'.');
                if bytes[i..].starts_with(needle)
                    && !before.is_some_and(is_ident)
                    && !after.is_some_and(is_ident)
                    && dotted == is_method
                {
                    return i;
                }
            }
        }
        i += 1;
    }
    0
}
