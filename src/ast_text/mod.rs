//! Typed AST text format.
//!
//! A small s-expression serialization of an already checked program, used by the command
//! line driver and by file based tests. It is not a source language: the reader only
//! annotates types (from variable declarations and library signatures) and inserts the
//! implicit int-to-float casts the checker would.
//!
//! # Format
//!
//! ```text
//! ; Comments start with a semicolon
//! (var total i64)
//! (var name$ str)
//! (array grid f64 8)
//!
//! (assign total (+ total 1))
//! (assign (elem grid 2) 0.5)
//! (if (and (< total 10) (<> name$ ""))
//!     (then (print "small " total))
//!     (else (print "large")))
//! (while (> total 0) (assign total (- total 1)))
//! (print (call strlen name$) (cast str 1.5))
//! ```
//!
//! Declarations may appear anywhere at top level; every other form is a statement.
//! Expression forms: literals (`42`, `-1.5`, `"text"`, `true`), variable names,
//! `(elem name index)`, `(neg e)`, `(not e)`, `+ - * / %`, `= <> < <= > >=`,
//! `and or xor`, `(call name args...)` and `(cast type e)`. A bare expression form at
//! statement level is an expression statement.

use thiserror::Error;

use crate::ast::{Position, Program};
use crate::core::symbols::Library;

pub mod check;
pub mod parser;

pub use check::{CheckDirective, RunDirective, TestRunner, TestSpec};

/// Errors reading AST text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("{position}: unexpected end of input")]
    UnexpectedEof { position: Position },

    #[error("{position}: unexpected {found}")]
    Unexpected { position: Position, found: String },

    #[error("{position}: unterminated string literal")]
    UnterminatedString { position: Position },

    #[error("{position}: invalid number '{text}'")]
    InvalidNumber { position: Position, text: String },

    #[error("{position}: unknown form '{name}'")]
    UnknownForm { position: Position, name: String },

    #[error("{position}: unknown type '{name}'")]
    UnknownType { position: Position, name: String },

    #[error("{position}: unknown variable '{name}'")]
    UnknownVariable { position: Position, name: String },

    #[error("{position}: variable '{name}' declared twice")]
    DuplicateVariable { position: Position, name: String },

    #[error("{position}: '{form}' expects {expected}")]
    Arity { position: Position, form: String, expected: &'static str },

    #[error("{position}: no library function matches {signature}")]
    UnknownFunction { position: Position, signature: String },
}

/// Read a program, resolving calls against `library`.
pub fn read_program(text: &str, library: &Library) -> Result<Program, ReadError> {
    let nodes = parser::parse_nodes(text)?;
    parser::Builder::new(library).program(&nodes)
}

/// Read a program against the standard library.
pub fn parse_program(text: &str) -> Result<Program, ReadError> {
    read_program(text, &Library::standard())
}
