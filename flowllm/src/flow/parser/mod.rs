//! Flow expression language: a restricted, line-oriented composition DSL.
//!
//! ```text
//! a = LenOp(tool_index=1)
//! router.ops.search = VectorSearchOp()
//! EchoOp() >> (a | LenOp(tool_index=2))
//! ```
//!
//! Constructs: registry-resolved constructor calls with keyword arguments,
//! the binary operators `>>` (Sequential), `|` (Parallel) and `<<`
//! (container add), parentheses, plain assignment, and attribute assignment
//! `var.ops.NAME = Ctor()`. Every line but the last is a statement; the last
//! line must be an expression evaluating to an op.
//!
//! This is a real lexer + Pratt parser + tree walker — names resolve against
//! the registry snapshot at parse time, and there is no host-language eval.
//! Precedence: `<<` binds tightest, then `|`, then `>>`; all operators are
//! left-associative.

mod ast;
mod eval;
mod lexer;

pub use ast::{BinOp, Expr, Stmt};

use thiserror::Error;

use crate::op::{CompositionError, Op};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty flow expression")]
    EmptyExpression,

    #[error("unknown op: {0}")]
    UnknownOp(String),

    #[error("line {line}: last line must be an expression, not an assignment")]
    NotAnExpression { line: usize },

    #[error("flow expression does not evaluate to an op")]
    NotAnOp,

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("op `{name}`: {message}")]
    Constructor { name: String, message: String },

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

/// Parses a flow expression against the global registry and builds the
/// composed op tree.
pub fn parse_flow(source: &str) -> Result<Box<dyn Op>, ParseError> {
    parse_flow_with(source, Registry::global())
}

/// Parses against an explicit registry (tests).
pub fn parse_flow_with(source: &str, registry: &Registry) -> Result<Box<dyn Op>, ParseError> {
    let statements = parse_statements(source)?;
    eval::evaluate(statements, registry)
}

/// Parses the source into statements without evaluating (syntax only).
pub fn parse_statements(source: &str) -> Result<Vec<(usize, Stmt)>, ParseError> {
    let lines = lexer::lex(source)?;
    if lines.is_empty() {
        return Err(ParseError::EmptyExpression);
    }
    lines
        .into_iter()
        .map(|(line, tokens)| ast::parse_line(line, tokens).map(|stmt| (line, stmt)))
        .collect()
}
