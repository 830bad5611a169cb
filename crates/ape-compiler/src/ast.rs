//! Abstract syntax tree (spec.md §4.3).
//!
//! Every node carries the [`SourcePosition`] of its first token, so later
//! stages (the optimiser, the compiler, runtime tracebacks) can all point
//! back at source without re-deriving it.

use std::rc::Rc;

use ape_core::SourcePosition;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Expression(Expression),
    VarDecl {
        name: String,
        mutable: bool,
        value: Expression,
    },
    Return(Option<Expression>),
    Block(Vec<Statement>),
    If {
        branches: Vec<(Expression, Vec<Statement>)>,
        otherwise: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    ForIn {
        binding: String,
        iterable: Expression,
        body: Vec<Statement>,
    },
    ForLoop {
        init: Option<Box<Statement>>,
        condition: Option<Expression>,
        update: Option<Box<Statement>>,
        body: Vec<Statement>,
    },
    Break,
    Continue,
    Import {
        path: String,
    },
    /// `recover (err) { body }`: installs `body` as the handler for the
    /// first runtime error raised anywhere later in the enclosing
    /// function, binding it to `error_binding`. There is no separate
    /// "protected" block — everything textually after this statement in
    /// the same function is implicitly protected (spec.md §3, §4.5).
    Recover {
        error_binding: String,
        body: Vec<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub position: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    Number(f64),
    Bool(bool),
    Null,
    StringLit(String),
    /// An interpolated string: literal chunks interleaved with spliced
    /// expressions, concatenated left to right at compile time into a
    /// chain of `+` nodes (spec.md §4.1's "desugars to concatenation").
    StringInterp(Vec<StringPart>),
    Ident(String),
    This,
    Array(Vec<Expression>),
    MapLiteral(Vec<(Expression, Expression)>),
    Prefix {
        op: PrefixOp,
        right: Box<Expression>,
    },
    Infix {
        op: InfixOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Short-circuiting `&&`/`||`, kept separate from `Infix` because they
    /// compile to a jump sequence instead of a single opcode.
    Logical {
        op: LogicalOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Assign {
        target: Box<Expression>,
        value: Box<Expression>,
        /// `true` for `x++`/`x--`, where the expression's value is the
        /// pre-increment value rather than the newly stored one.
        is_postfix: bool,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
    },
    FunctionLit {
        name: Option<String>,
        params: Vec<String>,
        body: Vec<Statement>,
    },
    Ternary {
        condition: Box<Expression>,
        when_true: Box<Expression>,
        when_false: Box<Expression>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Literal(Rc<str>),
    Splice(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Compare,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
