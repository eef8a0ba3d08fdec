//! Strategy script language.
//!
//! A small indentation-based language with Python-style syntax: imports,
//! assignments, `if`/`for`/`while`, calls, attributes and subscripts. It is
//! deliberately narrower than the language it resembles. Constructs such as
//! `def`, `class`, `lambda`, `with` and `try` parse (so the policy verifier
//! can point at them) but never execute.

mod ast;
mod lexer;
mod parser;
mod visit;

pub use ast::{
    BinaryOperator, BoolOperator, CompareOperator, Expr, ImportAlias, Program, Stmt, StmtKind,
    UnaryOperator,
};
pub use lexer::{tokenize, Lexeme, Token};
pub use parser::parse_program;
pub use visit::{walk_expr, walk_stmt, Visitor};

use thiserror::Error;

/// Syntax error with a 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line}, column {column})")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}
