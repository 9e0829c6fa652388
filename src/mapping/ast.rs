//! Syntax tree produced by the mapping parser

use serde_json::Value;
use std::fmt;

/// One assignment inside a mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: Target,
    pub value: Expr,
    pub line: usize,
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// `root` (empty path) or a field below it
    Document(Vec<String>),
    /// `meta key`
    Metadata(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Document(path) if path.is_empty() => write!(f, "root"),
            Target::Document(path) => write!(f, "root.{}", path.join(".")),
            Target::Metadata(key) => write!(f, "meta {key}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `this` followed by an optional field path
    This(Vec<String>),
    /// Field access on an arbitrary expression
    Get { target: Box<Expr>, field: String },
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    Match(Vec<MatchArm>),
    Function(Function),
    Method { target: Box<Expr>, method: Method },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    /// `None` for the `_` catch-all
    pub condition: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    And,
    Or,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        };
        f.write_str(symbol)
    }
}

/// Built-in functions, resolved at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    Deleted,
    Meta(String),
    BatchIndex,
    BatchSize,
    Content,
}

/// Built-in methods, resolved at parse time
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    Uppercase,
    Lowercase,
    Trim,
    Length,
    Number,
    String,
    NotNull,
    MapEach(Box<Expr>),
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Uppercase => "uppercase",
            Method::Lowercase => "lowercase",
            Method::Trim => "trim",
            Method::Length => "length",
            Method::Number => "number",
            Method::String => "string",
            Method::NotNull => "not_null",
            Method::MapEach(_) => "map_each",
        }
    }
}
