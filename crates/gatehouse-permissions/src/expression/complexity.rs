//! Structural cost of an expression.
//!
//! The score depends only on the shape of the tree, never on data: every
//! node costs 1, a function or method call adds [`CALL_COST`], and the body
//! of an `exists`/`all` comprehension is weighted by [`COMPREHENSION_FACTOR`]
//! because it runs once per element.

use cel_parser::{Expression, Member};

use super::checker::{COMPREHENSIONS, function_name};

/// Extra cost of a function or method call.
pub const CALL_COST: u32 = 2;

/// Multiplier applied to comprehension bodies.
pub const COMPREHENSION_FACTOR: u32 = 3;

/// Deterministic weighted node count.
pub fn estimate(expr: &Expression) -> u32 {
    let own = 1u32;
    let children = match expr {
        Expression::FunctionCall(name, target, args) => {
            let base = CALL_COST.saturating_add(target.as_deref().map_or(0, estimate));
            match (function_name(name), target, args.as_slice()) {
                // The loop variable is a binder, not a node.
                (Some(name), Some(_), [Expression::Ident(_), body])
                    if COMPREHENSIONS.contains(&name) =>
                {
                    base.saturating_add(estimate(body).saturating_mul(COMPREHENSION_FACTOR))
                }
                _ => base.saturating_add(sum(args.iter())),
            }
        }
        Expression::Member(target, member) => match member.as_ref() {
            Member::Index(index) => estimate(target).saturating_add(estimate(index)),
            _ => estimate(target),
        },
        other => sum(children(other).into_iter()),
    };
    own.saturating_add(children)
}

/// Height of the expression tree.
pub fn depth(expr: &Expression) -> usize {
    1 + children(expr).into_iter().map(depth).max().unwrap_or(0)
}

fn sum<'e>(items: impl Iterator<Item = &'e Expression>) -> u32 {
    items.fold(0u32, |acc, item| acc.saturating_add(estimate(item)))
}

/// Direct sub-expressions, in source order.
fn children(expr: &Expression) -> Vec<&Expression> {
    match expr {
        Expression::Atom(_) | Expression::Ident(_) => Vec::new(),
        Expression::List(items) => items.iter().collect(),
        Expression::Map(entries) => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
        Expression::Member(target, member) => match member.as_ref() {
            Member::Index(index) => vec![target.as_ref(), index.as_ref()],
            _ => vec![target.as_ref()],
        },
        Expression::FunctionCall(_, target, args) => {
            target.as_deref().into_iter().chain(args.iter()).collect()
        }
        Expression::Unary(_, operand) => vec![operand.as_ref()],
        Expression::Relation(lhs, _, rhs)
        | Expression::Arithmetic(lhs, _, rhs)
        | Expression::And(lhs, rhs)
        | Expression::Or(lhs, rhs) => vec![lhs.as_ref(), rhs.as_ref()],
        Expression::Ternary(cond, then, otherwise) => {
            vec![cond.as_ref(), then.as_ref(), otherwise.as_ref()]
        }
        #[allow(unreachable_patterns)]
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(input: &str) -> u32 {
        estimate(&cel_parser::parse(input).unwrap())
    }

    #[test]
    fn test_simple_comparison() {
        // == (1) + resource.owner (2) + principal.id (2)
        assert_eq!(score("resource.owner == principal.id"), 5);
        assert_eq!(score("true"), 1);
    }

    #[test]
    fn test_call_cost() {
        // call (1 + 2) + literal (1)
        assert_eq!(score("has_role(\"admin\")"), 4);
        // call (1 + 2) + list (1) + 2 literals
        assert_eq!(score("has_any_role([\"a\", \"b\"])"), 6);
    }

    #[test]
    fn test_comprehension_weight() {
        // 1 + 2 + principal.roles (2) + 3 * (r == "admin" = 3)
        assert_eq!(score("principal.roles.exists(r, r == \"admin\")"), 14);
    }

    #[test]
    fn test_score_is_deterministic_and_ignores_whitespace() {
        let a = score("action == \"read\" && resource.public == true");
        let b = score("action==\"read\"&&resource.public==true");
        assert_eq!(a, b);
        assert_eq!(a, score("action == \"read\" && resource.public == true"));
    }

    #[test]
    fn test_score_grows_with_clauses() {
        let one = score("action == \"a\"");
        let two = score("action == \"a\" || action == \"b\"");
        assert_eq!(two, one * 2 + 1);
    }

    #[test]
    fn test_depth() {
        assert_eq!(depth(&cel_parser::parse("true").unwrap()), 1);
        // == over two member selections over identifiers
        assert_eq!(
            depth(&cel_parser::parse("resource.owner == principal.id").unwrap()),
            3
        );
    }
}
