// This module gathers the backend-independent pieces of the compiler: the error type every
// stage reports through, the register bookkeeping shared by storage allocation, the symbol
// tables for program variables, constants and library imports, the compiler configuration,
// the compilation session with its arena and statistics, and the lowering traits through
// which the AST walk is dispatched to a concrete backend.

//! Core compiler infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - `CompileError` for every failure a lowering pass can report
//!
//! ## Register Bookkeeping (`register_file`)
//! - Bitset tracking of owned and touched registers
//!
//! ## Symbols (`symbols`)
//! - Variable and constant tables, import library, recorded dependencies
//!
//! ## Configuration (`config`)
//! - Backend selection, collector threshold, annotations
//!
//! ## Session (`session`)
//! - Arena allocation using `bumpalo` and compilation statistics
//!
//! ## Lowering (`lowering`)
//! - `ExprLowering` and `StmtLowering` traits with the generic AST walk

pub mod config;
pub mod error;
pub mod lowering;
pub mod register_file;
pub mod session;
pub mod symbols;

pub use config::{BackendKind, CompilerConfig};
pub use error::{CompileError, CompileResult};
pub use lowering::{lower_block, lower_expr, lower_stmt, ExprLowering, StmtLowering};
pub use register_file::{AsmReg, RegBitSet, RegisterFile};
pub use session::{CompilationSession, LoweringStats, SessionStats};
pub use symbols::{Dependencies, FunctionDescriptor, Library, ReturnKind, SymbolTable};
