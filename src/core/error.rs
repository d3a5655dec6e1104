// This module defines error types for the rivet lowering engine using the thiserror crate for
// idiomatic Rust error handling. CompileError is the main error enum covering the failure
// scenarios of lowering: a node kind with no generator in the active backend, an operation
// a storage location kind cannot perform, an unsupported cast, storage released out of LIFO
// order or lost while the pool was borrowed, exhausted storage, unresolved variables or library functions, and division by a
// literal zero. Each variant carries the context needed to report it (node names, location
// descriptions, positions). Everything except DivisionByZero is an internal compiler error
// and is reported as such by is_internal(). The module also provides CompileResult<T> as a
// convenience alias for Result<T, CompileError>.

//! Error types for the rivet backends.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

use crate::ast::{Position, ValueType};
use crate::core::register_file::RegAllocError;

/// Main error type for lowering.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("no {backend} generator for {node} nodes")]
    DispatchMiss {
        backend: &'static str,
        node: &'static str,
    },

    #[error("{operation} is not supported on {location}")]
    UnsupportedOperation {
        operation: &'static str,
        location: String,
    },

    #[error("unsupported cast from {from} to {to}")]
    UnsupportedCast { from: ValueType, to: ValueType },

    #[error("storage released out of order: released {released} while {expected} was live")]
    StorageOrder { released: String, expected: String },

    #[error("{count} storage release(s) lost while the pool was in use")]
    LostRelease { count: usize },

    #[error("storage exhausted: {reason}")]
    ExhaustedStorage { reason: String },

    #[error("unknown variable: {name}")]
    UnknownVariable { name: String },

    #[error("no library function matches {signature}")]
    UnknownFunction { signature: String },

    #[error("{position}: division by zero")]
    DivisionByZero { position: Position },

    #[error("register allocation failed: {0}")]
    RegisterAllocation(#[from] RegAllocError),
}

impl CompileError {
    /// Internal compiler errors indicate a bug in a generator rather than in the program.
    pub fn is_internal(&self) -> bool {
        !matches!(self, CompileError::DivisionByZero { .. })
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
