//! Pratt-style expression parser plus recursive-descent statement parsing
//! (spec.md §4.2).

use std::rc::Rc;

use ape_core::{EngineError, SourcePosition};

use crate::ast::*;
use crate::lexer::{Lexer, Token, TokenKind};

/// Parsing gives up (rather than overflowing the real call stack) once
/// expression nesting passes this depth.
const MAX_EXPR_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assign,
    Ternary,
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Relational,
    Shift,
    Additive,
    Multiplicative,
    Prefix,
    Call,
    Index,
}

fn precedence_of(kind: &TokenKind) -> Precedence {
    match kind {
        TokenKind::Assign
        | TokenKind::PlusAssign
        | TokenKind::MinusAssign
        | TokenKind::StarAssign
        | TokenKind::SlashAssign
        | TokenKind::PercentAssign
        | TokenKind::BitAndAssign
        | TokenKind::BitOrAssign
        | TokenKind::BitXorAssign
        | TokenKind::ShlAssign
        | TokenKind::ShrAssign => Precedence::Assign,
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equality,
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => Precedence::Relational,
        TokenKind::Question => Precedence::Ternary,
        TokenKind::Or => Precedence::LogicalOr,
        TokenKind::And => Precedence::LogicalAnd,
        TokenKind::BitOr => Precedence::BitOr,
        TokenKind::BitXor => Precedence::BitXor,
        TokenKind::BitAnd => Precedence::BitAnd,
        TokenKind::Shl | TokenKind::Shr => Precedence::Shift,
        TokenKind::Plus | TokenKind::Minus => Precedence::Additive,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Multiplicative,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket | TokenKind::Dot => Precedence::Index,
        TokenKind::PlusPlus | TokenKind::MinusMinus => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peek: Token,
    errors: Vec<EngineError>,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str, file: Option<Rc<str>>) -> Parser<'a> {
        let mut lexer = Lexer::new(src, file);
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Parser {
            lexer,
            current,
            peek,
            errors: Vec::new(),
            depth: 0,
        }
    }

    fn advance(&mut self) {
        self.current = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(EngineError::parsing(message, self.current.position.clone()));
    }

    fn expect(&mut self, kind: &TokenKind) -> bool {
        if std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind) {
            self.advance();
            true
        } else {
            self.error(format!("expected {kind:?}, found {:?}", self.current.kind));
            false
        }
    }

    pub fn parse_program(mut self) -> Result<Program, Vec<EngineError>> {
        let mut statements = Vec::new();
        while self.current.kind != TokenKind::Eof {
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => self.synchronize(),
            }
        }
        if self.errors.is_empty() {
            Ok(Program { statements })
        } else {
            Err(self.errors)
        }
    }

    /// On a parse error, skip tokens up to the next statement terminator so
    /// one bad statement doesn't cascade into spurious follow-on errors
    /// (spec.md §4.2's error-recovery note).
    fn synchronize(&mut self) {
        while !matches!(self.current.kind, TokenKind::Semicolon | TokenKind::Eof) {
            self.advance();
        }
        if self.current.kind == TokenKind::Semicolon {
            self.advance();
        }
    }

    fn parse_statement(&mut self) -> Option<Statement> {
        let position = self.current.position.clone();
        let kind = match &self.current.kind {
            TokenKind::Const | TokenKind::Var => self.parse_var_decl()?,
            TokenKind::Return => self.parse_return()?,
            TokenKind::LBrace => StatementKind::Block(self.parse_block()?),
            TokenKind::If => self.parse_if()?,
            TokenKind::While => self.parse_while()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::Break => {
                self.advance();
                self.eat_semicolon();
                StatementKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.eat_semicolon();
                StatementKind::Continue
            }
            TokenKind::Import => self.parse_import()?,
            TokenKind::Recover => self.parse_recover()?,
            _ => {
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.eat_semicolon();
                StatementKind::Expression(expr)
            }
        };
        Some(Statement { kind, position })
    }

    fn eat_semicolon(&mut self) {
        if self.current.kind == TokenKind::Semicolon {
            self.advance();
        }
    }

    fn parse_var_decl(&mut self) -> Option<StatementKind> {
        let mutable = self.current.kind == TokenKind::Var;
        self.advance();
        let name = self.parse_ident_name()?;
        if !self.expect(&TokenKind::Assign) {
            return None;
        }
        let value = self.parse_expression(Precedence::Lowest)?;
        self.eat_semicolon();
        Some(StatementKind::VarDecl { name, mutable, value })
    }

    fn parse_ident_name(&mut self) -> Option<String> {
        match self.current.kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ => {
                self.error("expected an identifier");
                None
            }
        }
    }

    fn parse_return(&mut self) -> Option<StatementKind> {
        self.advance();
        if self.current.kind == TokenKind::Semicolon {
            self.advance();
            return Some(StatementKind::Return(None));
        }
        let value = self.parse_expression(Precedence::Lowest)?;
        self.eat_semicolon();
        Some(StatementKind::Return(Some(value)))
    }

    fn parse_block(&mut self) -> Option<Vec<Statement>> {
        if !self.expect(&TokenKind::LBrace) {
            return None;
        }
        let mut statements = Vec::new();
        while !matches!(self.current.kind, TokenKind::RBrace | TokenKind::Eof) {
            match self.parse_statement() {
                Some(stmt) => statements.push(stmt),
                None => self.synchronize(),
            }
        }
        self.expect(&TokenKind::RBrace);
        Some(statements)
    }

    fn parse_if(&mut self) -> Option<StatementKind> {
        let mut branches = Vec::new();
        self.advance();
        if !self.expect(&TokenKind::LParen) {
            return None;
        }
        let cond = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::RParen);
        let body = self.parse_block()?;
        branches.push((cond, body));
        let mut otherwise = None;
        while self.current.kind == TokenKind::Else {
            self.advance();
            if self.current.kind == TokenKind::If {
                self.advance();
                self.expect(&TokenKind::LParen);
                let cond = self.parse_expression(Precedence::Lowest)?;
                self.expect(&TokenKind::RParen);
                let body = self.parse_block()?;
                branches.push((cond, body));
            } else {
                otherwise = Some(self.parse_block()?);
                break;
            }
        }
        Some(StatementKind::If { branches, otherwise })
    }

    fn parse_while(&mut self) -> Option<StatementKind> {
        self.advance();
        self.expect(&TokenKind::LParen);
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::RParen);
        let body = self.parse_block()?;
        Some(StatementKind::While { condition, body })
    }

    /// Disambiguates `for (x in it) {}` (foreach) from `for (init; cond;
    /// update) {}` (c-style) by peeking one token past a leading identifier.
    fn parse_for(&mut self) -> Option<StatementKind> {
        self.advance();
        self.expect(&TokenKind::LParen);
        if matches!(self.current.kind, TokenKind::Ident(_)) && self.peek.kind == TokenKind::In {
            let binding = self.parse_ident_name()?;
            self.advance(); // `in`
            let iterable = self.parse_expression(Precedence::Lowest)?;
            self.expect(&TokenKind::RParen);
            let body = self.parse_block()?;
            return Some(StatementKind::ForIn {
                binding,
                iterable,
                body,
            });
        }

        let init = if self.current.kind == TokenKind::Semicolon {
            None
        } else {
            let stmt = self.parse_for_clause()?;
            Some(Box::new(stmt))
        };
        self.expect(&TokenKind::Semicolon);
        let condition = if self.current.kind == TokenKind::Semicolon {
            None
        } else {
            Some(self.parse_expression(Precedence::Lowest)?)
        };
        self.expect(&TokenKind::Semicolon);
        let update = if self.current.kind == TokenKind::RParen {
            None
        } else {
            let stmt = self.parse_for_clause()?;
            Some(Box::new(stmt))
        };
        self.expect(&TokenKind::RParen);
        let body = self.parse_block()?;
        Some(StatementKind::ForLoop {
            init,
            condition,
            update,
            body,
        })
    }

    /// A `for (...)` init/update clause: either a `var`/`const` declaration
    /// or a bare expression, neither terminated by its own semicolon.
    fn parse_for_clause(&mut self) -> Option<Statement> {
        let position = self.current.position.clone();
        if matches!(self.current.kind, TokenKind::Const | TokenKind::Var) {
            let mutable = self.current.kind == TokenKind::Var;
            self.advance();
            let name = self.parse_ident_name()?;
            self.expect(&TokenKind::Assign);
            let value = self.parse_expression(Precedence::Lowest)?;
            Some(Statement {
                kind: StatementKind::VarDecl { name, mutable, value },
                position,
            })
        } else {
            let expr = self.parse_expression(Precedence::Lowest)?;
            Some(Statement {
                kind: StatementKind::Expression(expr),
                position,
            })
        }
    }

    fn parse_import(&mut self) -> Option<StatementKind> {
        self.advance();
        let path = match self.current.kind.clone() {
            TokenKind::StringLit(s) => {
                self.advance();
                s
            }
            _ => {
                self.error("expected a string path after import");
                return None;
            }
        };
        self.eat_semicolon();
        Some(StatementKind::Import { path })
    }

    fn parse_recover(&mut self) -> Option<StatementKind> {
        self.advance();
        if !self.expect(&TokenKind::LParen) {
            return None;
        }
        let error_binding = self.parse_ident_name()?;
        self.expect(&TokenKind::RParen);
        let body = self.parse_block()?;
        Some(StatementKind::Recover { error_binding, body })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expression> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            self.error("expression nested too deeply");
            self.depth -= 1;
            return None;
        }
        let mut left = self.parse_prefix()?;
        while self.current.kind != TokenKind::Semicolon && precedence < precedence_of(&self.current.kind) {
            left = match self.current.kind.clone() {
                TokenKind::LParen => self.parse_call(left)?,
                TokenKind::LBracket => self.parse_index(left)?,
                TokenKind::Dot => self.parse_dot_index(left)?,
                TokenKind::Question => self.parse_ternary(left)?,
                TokenKind::Assign => self.parse_assign(left)?,
                TokenKind::PlusAssign => self.parse_compound_assign(left, InfixOp::Add)?,
                TokenKind::MinusAssign => self.parse_compound_assign(left, InfixOp::Sub)?,
                TokenKind::StarAssign => self.parse_compound_assign(left, InfixOp::Mul)?,
                TokenKind::SlashAssign => self.parse_compound_assign(left, InfixOp::Div)?,
                TokenKind::PercentAssign => self.parse_compound_assign(left, InfixOp::Mod)?,
                TokenKind::BitAndAssign => self.parse_compound_assign(left, InfixOp::BitAnd)?,
                TokenKind::BitOrAssign => self.parse_compound_assign(left, InfixOp::BitOr)?,
                TokenKind::BitXorAssign => self.parse_compound_assign(left, InfixOp::BitXor)?,
                TokenKind::ShlAssign => self.parse_compound_assign(left, InfixOp::Shl)?,
                TokenKind::ShrAssign => self.parse_compound_assign(left, InfixOp::Shr)?,
                TokenKind::PlusPlus => self.parse_postfix_incdec(left, InfixOp::Add)?,
                TokenKind::MinusMinus => self.parse_postfix_incdec(left, InfixOp::Sub)?,
                _ => self.parse_infix(left)?,
            };
        }
        self.depth -= 1;
        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expression> {
        let position = self.current.position.clone();
        let kind = match self.current.kind.clone() {
            TokenKind::Number(n) => {
                self.advance();
                ExpressionKind::Number(n)
            }
            TokenKind::True => {
                self.advance();
                ExpressionKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExpressionKind::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                ExpressionKind::Null
            }
            TokenKind::StringLit(s) => {
                self.advance();
                ExpressionKind::StringLit(s)
            }
            TokenKind::StringInterpStart(_) => self.parse_string_interp()?,
            TokenKind::This => {
                self.advance();
                ExpressionKind::This
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExpressionKind::Ident(name)
            }
            TokenKind::Minus => {
                self.advance();
                let right = self.parse_expression(Precedence::Prefix)?;
                ExpressionKind::Prefix {
                    op: PrefixOp::Negate,
                    right: Box::new(right),
                }
            }
            TokenKind::Bang => {
                self.advance();
                let right = self.parse_expression(Precedence::Prefix)?;
                ExpressionKind::Prefix {
                    op: PrefixOp::Not,
                    right: Box::new(right),
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect(&TokenKind::RParen);
                return Some(expr);
            }
            TokenKind::LBracket => self.parse_array()?,
            TokenKind::LBrace => self.parse_map_literal()?,
            TokenKind::Fn => self.parse_function_lit()?,
            other => {
                self.error(format!("unexpected token {other:?}"));
                return None;
            }
        };
        Some(Expression { kind, position })
    }

    fn parse_string_interp(&mut self) -> Option<ExpressionKind> {
        let mut parts = Vec::new();
        let first = match self.current.kind.clone() {
            TokenKind::StringInterpStart(s) => s,
            _ => unreachable!(),
        };
        if !first.is_empty() {
            parts.push(StringPart::Literal(Rc::from(first.as_str())));
        }
        loop {
            self.advance(); // move past the *Start/*Middle token, into the spliced expression
            let expr = self.parse_expression(Precedence::Lowest)?;
            parts.push(StringPart::Splice(Box::new(expr)));
            let resumed = self.lexer.resume_string();
            match resumed.kind.clone() {
                TokenKind::StringInterpMiddle(s) => {
                    if !s.is_empty() {
                        parts.push(StringPart::Literal(Rc::from(s.as_str())));
                    }
                    self.current = resumed;
                    self.peek = self.lexer.next_token();
                }
                TokenKind::StringInterpEnd(s) => {
                    if !s.is_empty() {
                        parts.push(StringPart::Literal(Rc::from(s.as_str())));
                    }
                    // `self.peek` still holds the stale `Illegal('}')` token
                    // captured before `resume_string()` ran, so `advance()`
                    // would swap it back into `current`; pull two fresh
                    // tokens instead of advancing off the old lookahead.
                    self.current = self.lexer.next_token();
                    self.peek = self.lexer.next_token();
                    break;
                }
                _ => {
                    self.error("malformed string interpolation");
                    return None;
                }
            }
        }
        Some(ExpressionKind::StringInterp(parts))
    }

    fn parse_array(&mut self) -> Option<ExpressionKind> {
        self.advance();
        let mut items = Vec::new();
        while self.current.kind != TokenKind::RBracket {
            items.push(self.parse_expression(Precedence::Lowest)?);
            if self.current.kind == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RBracket);
        Some(ExpressionKind::Array(items))
    }

    fn parse_map_literal(&mut self) -> Option<ExpressionKind> {
        self.advance();
        let mut pairs = Vec::new();
        while self.current.kind != TokenKind::RBrace {
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(&TokenKind::Colon);
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));
            if self.current.kind == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RBrace);
        Some(ExpressionKind::MapLiteral(pairs))
    }

    fn parse_function_lit(&mut self) -> Option<ExpressionKind> {
        self.advance();
        let name = if let TokenKind::Ident(n) = self.current.kind.clone() {
            self.advance();
            Some(n)
        } else {
            None
        };
        self.expect(&TokenKind::LParen);
        let mut params = Vec::new();
        while self.current.kind != TokenKind::RParen {
            params.push(self.parse_ident_name()?);
            if self.current.kind == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RParen);
        let body = self.parse_block()?;
        Some(ExpressionKind::FunctionLit { name, params, body })
    }

    fn parse_call(&mut self, callee: Expression) -> Option<Expression> {
        let position = callee.position.clone();
        self.advance();
        let mut args = Vec::new();
        while self.current.kind != TokenKind::RParen {
            args.push(self.parse_expression(Precedence::Lowest)?);
            if self.current.kind == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RParen);
        Some(Expression {
            kind: ExpressionKind::Call {
                callee: Box::new(callee),
                args,
            },
            position,
        })
    }

    fn parse_index(&mut self, target: Expression) -> Option<Expression> {
        let position = target.position.clone();
        self.advance();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::RBracket);
        Some(Expression {
            kind: ExpressionKind::Index {
                target: Box::new(target),
                index: Box::new(index),
            },
            position,
        })
    }

    fn parse_dot_index(&mut self, target: Expression) -> Option<Expression> {
        let position = target.position.clone();
        self.advance();
        let field = self.parse_ident_name()?;
        let index = Expression {
            kind: ExpressionKind::StringLit(field),
            position: position.clone(),
        };
        Some(Expression {
            kind: ExpressionKind::Index {
                target: Box::new(target),
                index: Box::new(index),
            },
            position,
        })
    }

    /// `cond ? when_true : when_false`. The false branch is parsed at
    /// `Assign` precedence (one step below `Ternary`) so a chained
    /// `a ? b : c ? d : e` recurses back into `parse_ternary` for the right
    /// operand instead of stopping after `c`, giving right-associativity.
    fn parse_ternary(&mut self, condition: Expression) -> Option<Expression> {
        let position = condition.position.clone();
        self.advance(); // '?'
        let when_true = self.parse_expression(Precedence::Lowest)?;
        self.expect(&TokenKind::Colon);
        let when_false = self.parse_expression(Precedence::Assign)?;
        Some(Expression {
            kind: ExpressionKind::Ternary {
                condition: Box::new(condition),
                when_true: Box::new(when_true),
                when_false: Box::new(when_false),
            },
            position,
        })
    }

    fn parse_assign(&mut self, target: Expression) -> Option<Expression> {
        let position = target.position.clone();
        self.advance();
        let value = self.parse_expression(Precedence::Assign)?;
        Some(Expression {
            kind: ExpressionKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
                is_postfix: false,
            },
            position,
        })
    }

    /// Lowers `x op= e` to `x = x op e`. Re-evaluates `target` as the left
    /// operand, so an index target's side effects (e.g. `a[f()] += 1`) run
    /// twice — a deliberate simplification, matching the one already made
    /// for plain index assignment.
    fn parse_compound_assign(&mut self, target: Expression, op: InfixOp) -> Option<Expression> {
        let position = target.position.clone();
        self.advance();
        let rhs = self.parse_expression(Precedence::Assign)?;
        let value = Expression {
            kind: ExpressionKind::Infix {
                op,
                left: Box::new(target.clone()),
                right: Box::new(rhs),
            },
            position: position.clone(),
        };
        Some(Expression {
            kind: ExpressionKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
                is_postfix: false,
            },
            position,
        })
    }

    /// Lowers `x++`/`x--` to `x = x op 1`, flagged `is_postfix` so the
    /// compiler yields the pre-increment value as the expression's result.
    fn parse_postfix_incdec(&mut self, target: Expression, op: InfixOp) -> Option<Expression> {
        let position = target.position.clone();
        self.advance();
        let one = Expression {
            kind: ExpressionKind::Number(1.0),
            position: position.clone(),
        };
        let value = Expression {
            kind: ExpressionKind::Infix {
                op,
                left: Box::new(target.clone()),
                right: Box::new(one),
            },
            position: position.clone(),
        };
        Some(Expression {
            kind: ExpressionKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
                is_postfix: true,
            },
            position,
        })
    }

    fn parse_infix(&mut self, left: Expression) -> Option<Expression> {
        let position = left.position.clone();
        if matches!(self.current.kind, TokenKind::And | TokenKind::Or) {
            let op = if self.current.kind == TokenKind::And {
                LogicalOp::And
            } else {
                LogicalOp::Or
            };
            let prec = precedence_of(&self.current.kind);
            self.advance();
            let right = self.parse_expression(prec)?;
            return Some(Expression {
                kind: ExpressionKind::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                position,
            });
        }
        let op = match self.current.kind {
            TokenKind::Plus => InfixOp::Add,
            TokenKind::Minus => InfixOp::Sub,
            TokenKind::Star => InfixOp::Mul,
            TokenKind::Slash => InfixOp::Div,
            TokenKind::Percent => InfixOp::Mod,
            TokenKind::Eq => InfixOp::Eq,
            TokenKind::NotEq => InfixOp::NotEq,
            TokenKind::Lt => InfixOp::Lt,
            TokenKind::LtEq => InfixOp::LtEq,
            TokenKind::Gt => InfixOp::Gt,
            TokenKind::GtEq => InfixOp::GtEq,
            TokenKind::BitAnd => InfixOp::BitAnd,
            TokenKind::BitOr => InfixOp::BitOr,
            TokenKind::BitXor => InfixOp::BitXor,
            TokenKind::Shl => InfixOp::Shl,
            TokenKind::Shr => InfixOp::Shr,
            ref other => {
                self.error(format!("unexpected infix token {other:?}"));
                return None;
            }
        };
        let prec = precedence_of(&self.current.kind);
        self.advance();
        let right = self.parse_expression(prec)?;
        Some(Expression {
            kind: ExpressionKind::Infix {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            position,
        })
    }
}

pub fn parse(src: &str, file: Option<Rc<str>>) -> Result<Program, Vec<EngineError>> {
    Parser::new(src, file).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arithmetic_precedence() {
        let program = parse("1 + 2 * 3;", None).expect("should parse");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn parses_string_interpolation_parts() {
        let program = parse(r#"name = "hi ${x} and ${y}!"; 1 + 2;"#, None).expect("should parse");
        assert_eq!(program.statements.len(), 2);
        let assign_expr = match &program.statements[0].kind {
            StatementKind::Expression(expr) => expr,
            other => panic!("expected expression statement, got {other:?}"),
        };
        let rhs = match &assign_expr.kind {
            ExpressionKind::Assign { value, .. } => value.as_ref(),
            other => panic!("expected assignment, got {other:?}"),
        };
        let parts = match &rhs.kind {
            ExpressionKind::StringInterp(parts) => parts,
            other => panic!("expected string interpolation, got {other:?}"),
        };
        assert_eq!(parts.len(), 5);
        assert!(matches!(&parts[0], StringPart::Literal(s) if &**s == "hi "));
        assert!(matches!(&parts[1], StringPart::Splice(_)));
        assert!(matches!(&parts[2], StringPart::Literal(s) if &**s == " and "));
        assert!(matches!(&parts[3], StringPart::Splice(_)));
        assert!(matches!(&parts[4], StringPart::Literal(s) if &**s == "!"));
        // the parser must land back on a clean lookahead after the closing
        // quote, so the trailing statement still parses instead of erroring
        // out on a leftover `Illegal('}')` token.
        assert!(matches!(program.statements[1].kind, StatementKind::Expression(_)));
    }

    #[test]
    fn parses_if_else() {
        let program = parse("if (x) { 1; } else { 2; }", None).expect("should parse");
        assert!(matches!(program.statements[0].kind, StatementKind::If { .. }));
    }

    #[test]
    fn parses_function_literal_with_params() {
        let program = parse("fn add(a, b) { return a + b; }", None).expect("should parse");
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn recovers_after_a_malformed_statement() {
        let result = parse("1 +; 2;", None);
        assert!(result.is_err());
    }

    #[test]
    fn parses_logical_and_or_as_distinct_node() {
        let program = parse("a && b || c;", None).expect("should parse");
        match &program.statements[0].kind {
            StatementKind::Expression(expr) => {
                assert!(matches!(expr.kind, ExpressionKind::Logical { op: LogicalOp::Or, .. }));
            }
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parses_c_style_for_loop() {
        let program = parse("for (var i = 0; i < 10; i = i + 1) { i; }", None).expect("should parse");
        assert!(matches!(program.statements[0].kind, StatementKind::ForLoop { .. }));
    }

    #[test]
    fn parses_foreach_for_loop() {
        let program = parse("for (x in arr) { x; }", None).expect("should parse");
        assert!(matches!(program.statements[0].kind, StatementKind::ForIn { .. }));
    }

    #[test]
    fn parses_postfix_increment() {
        let program = parse("i++;", None).expect("should parse");
        match &program.statements[0].kind {
            StatementKind::Expression(expr) => {
                assert!(matches!(expr.kind, ExpressionKind::Assign { is_postfix: true, .. }));
            }
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parses_compound_assign() {
        let program = parse("x += 1;", None).expect("should parse");
        match &program.statements[0].kind {
            StatementKind::Expression(expr) => {
                assert!(matches!(expr.kind, ExpressionKind::Assign { is_postfix: false, .. }));
            }
            other => panic!("expected expression statement, got {other:?}"),
        }
    }
}
