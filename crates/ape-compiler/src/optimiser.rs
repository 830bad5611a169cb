//! Constant folding (spec.md §4.3's optimisation pass).
//!
//! Runs after parsing, before compilation: collapses `Infix`/`Prefix` nodes
//! whose operands are both literals into a single literal node. This is
//! the only optimisation the pipeline performs — no dead-code elimination,
//! no inlining (spec.md's Non-goals).

use crate::ast::{Expression, ExpressionKind, InfixOp, LogicalOp, PrefixOp, Program, Statement, StatementKind};

pub fn optimise(program: Program) -> Program {
    Program {
        statements: program.statements.into_iter().map(optimise_statement).collect(),
    }
}

fn optimise_statement(stmt: Statement) -> Statement {
    let position = stmt.position.clone();
    let kind = match stmt.kind {
        StatementKind::Expression(e) => StatementKind::Expression(optimise_expr(e)),
        StatementKind::VarDecl { name, mutable, value } => StatementKind::VarDecl {
            name,
            mutable,
            value: optimise_expr(value),
        },
        StatementKind::Return(e) => StatementKind::Return(e.map(optimise_expr)),
        StatementKind::Block(stmts) => StatementKind::Block(optimise_statements(stmts)),
        StatementKind::If { branches, otherwise } => StatementKind::If {
            branches: branches
                .into_iter()
                .map(|(cond, body)| (optimise_expr(cond), optimise_statements(body)))
                .collect(),
            otherwise: otherwise.map(optimise_statements),
        },
        StatementKind::While { condition, body } => StatementKind::While {
            condition: optimise_expr(condition),
            body: optimise_statements(body),
        },
        StatementKind::ForIn {
            binding,
            iterable,
            body,
        } => StatementKind::ForIn {
            binding,
            iterable: optimise_expr(iterable),
            body: optimise_statements(body),
        },
        StatementKind::ForLoop {
            init,
            condition,
            update,
            body,
        } => StatementKind::ForLoop {
            init: init.map(|s| Box::new(optimise_statement(*s))),
            condition: condition.map(optimise_expr),
            update: update.map(|s| Box::new(optimise_statement(*s))),
            body: optimise_statements(body),
        },
        StatementKind::Recover { error_binding, body } => StatementKind::Recover {
            error_binding,
            body: optimise_statements(body),
        },
        other @ (StatementKind::Break | StatementKind::Continue | StatementKind::Import { .. }) => other,
    };
    Statement { kind, position }
}

fn optimise_statements(stmts: Vec<Statement>) -> Vec<Statement> {
    stmts.into_iter().map(optimise_statement).collect()
}

fn optimise_expr(expr: Expression) -> Expression {
    let position = expr.position.clone();
    let kind = match expr.kind {
        ExpressionKind::Prefix { op, right } => {
            let right = optimise_expr(*right);
            match (op, &right.kind) {
                (PrefixOp::Negate, ExpressionKind::Number(n)) => ExpressionKind::Number(-n),
                (PrefixOp::Not, ExpressionKind::Bool(b)) => ExpressionKind::Bool(!b),
                _ => ExpressionKind::Prefix {
                    op,
                    right: Box::new(right),
                },
            }
        }
        ExpressionKind::Infix { op, left, right } => {
            let left = optimise_expr(*left);
            let right = optimise_expr(*right);
            match fold_infix(op, &left, &right) {
                Some(folded) => folded,
                None => ExpressionKind::Infix {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            }
        }
        ExpressionKind::Array(items) => ExpressionKind::Array(items.into_iter().map(optimise_expr).collect()),
        ExpressionKind::MapLiteral(pairs) => ExpressionKind::MapLiteral(
            pairs
                .into_iter()
                .map(|(k, v)| (optimise_expr(k), optimise_expr(v)))
                .collect(),
        ),
        ExpressionKind::Logical { op, left, right } => {
            let left = optimise_expr(*left);
            let right = optimise_expr(*right);
            match (op, &left.kind) {
                (LogicalOp::And, ExpressionKind::Bool(false)) => ExpressionKind::Bool(false),
                (LogicalOp::Or, ExpressionKind::Bool(true)) => ExpressionKind::Bool(true),
                _ => ExpressionKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            }
        }
        ExpressionKind::Assign {
            target,
            value,
            is_postfix,
        } => ExpressionKind::Assign {
            target: Box::new(optimise_expr(*target)),
            value: Box::new(optimise_expr(*value)),
            is_postfix,
        },
        ExpressionKind::Index { target, index } => ExpressionKind::Index {
            target: Box::new(optimise_expr(*target)),
            index: Box::new(optimise_expr(*index)),
        },
        ExpressionKind::Call { callee, args } => ExpressionKind::Call {
            callee: Box::new(optimise_expr(*callee)),
            args: args.into_iter().map(optimise_expr).collect(),
        },
        ExpressionKind::Ternary {
            condition,
            when_true,
            when_false,
        } => ExpressionKind::Ternary {
            condition: Box::new(optimise_expr(*condition)),
            when_true: Box::new(optimise_expr(*when_true)),
            when_false: Box::new(optimise_expr(*when_false)),
        },
        ExpressionKind::StringInterp(parts) => ExpressionKind::StringInterp(
            parts
                .into_iter()
                .map(|p| match p {
                    crate::ast::StringPart::Splice(e) => crate::ast::StringPart::Splice(Box::new(optimise_expr(*e))),
                    literal => literal,
                })
                .collect(),
        ),
        ExpressionKind::FunctionLit { name, params, body } => ExpressionKind::FunctionLit {
            name,
            params,
            body: optimise_statements(body),
        },
        other @ (ExpressionKind::Number(_)
        | ExpressionKind::Bool(_)
        | ExpressionKind::Null
        | ExpressionKind::StringLit(_)
        | ExpressionKind::Ident(_)
        | ExpressionKind::This) => other,
    };
    Expression { kind, position }
}

fn fold_infix(op: InfixOp, left: &Expression, right: &Expression) -> Option<ExpressionKind> {
    if let (ExpressionKind::Number(a), ExpressionKind::Number(b)) = (&left.kind, &right.kind) {
        let (a, b) = (*a, *b);
        return Some(match op {
            InfixOp::Add => ExpressionKind::Number(a + b),
            InfixOp::Sub => ExpressionKind::Number(a - b),
            InfixOp::Mul => ExpressionKind::Number(a * b),
            InfixOp::Div => ExpressionKind::Number(a / b),
            InfixOp::Mod => ExpressionKind::Number(a % b),
            InfixOp::Eq => ExpressionKind::Bool(a == b),
            InfixOp::NotEq => ExpressionKind::Bool(a != b),
            InfixOp::Lt => ExpressionKind::Bool(a < b),
            InfixOp::LtEq => ExpressionKind::Bool(a <= b),
            InfixOp::Gt => ExpressionKind::Bool(a > b),
            InfixOp::GtEq => ExpressionKind::Bool(a >= b),
            _ => return None,
        });
    }
    if let (ExpressionKind::StringLit(a), ExpressionKind::StringLit(b)) = (&left.kind, &right.kind) {
        if op == InfixOp::Add {
            return Some(ExpressionKind::StringLit(format!("{a}{b}")));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ape_core::SourcePosition;

    fn num(n: f64) -> Expression {
        Expression {
            kind: ExpressionKind::Number(n),
            position: SourcePosition::synthetic(),
        }
    }

    #[test]
    fn folds_constant_arithmetic() {
        let folded = fold_infix(InfixOp::Add, &num(2.0), &num(3.0));
        assert_eq!(folded, Some(ExpressionKind::Number(5.0)));
    }

    #[test]
    fn does_not_fold_non_constants() {
        let ident = Expression {
            kind: ExpressionKind::Ident("x".into()),
            position: SourcePosition::synthetic(),
        };
        assert_eq!(fold_infix(InfixOp::Add, &ident, &num(3.0)), None);
    }
}
