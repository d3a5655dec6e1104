//! rivet - lowering and runtime-memory engine.
//!
//! rivet takes a typed AST, as produced by a frontend after parsing, type checking and
//! constant folding, and lowers it either to x86-64 flat assembler text for a PE64
//! console executable or to LLVM IR text. The assembly backend manages a small pool of
//! registers and stack slots with scoped release, follows the Windows x64 calling
//! convention, and emits a mark-and-sweep collector for heap strings into the program.
//!
//! # Primary Usage
//!
//! ```
//! use rivet::ast_text::parse_program;
//! use rivet::core::{CompilationSession, CompilerConfig, Library};
//! use bumpalo::Bump;
//!
//! let program = parse_program("(var x i64)\n(assign x (* 6 7))\n(print x)").unwrap();
//!
//! // Create compilation session with arena allocation
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//!
//! let output = rivet::compile(&program, &Library::standard(), &CompilerConfig::default(), &session)
//!     .unwrap();
//! assert!(output.render().contains("call [printf]"));
//! ```
//!
//! # Architecture
//!
//! - [`ast`] - Typed AST handed over by the frontends
//! - [`core`] - Shared infrastructure (errors, symbols, session, lowering dispatch)
//! - [`x64`] - Assembly backend, collector and reference emulator
//! - [`llvm`] - LLVM IR text backend
//! - [`ast_text`] - Text form of the typed AST and FileCheck-style test support

pub mod ast;
pub mod ast_text;
pub mod core;
pub mod llvm;
pub mod x64;

pub use crate::core::{
    BackendKind, CompilationSession, CompileError, CompileResult, CompilerConfig, Library,
    SessionStats,
};

use crate::ast::Program;
use crate::core::symbols::Dependencies;
use crate::llvm::SsaModule;
use crate::x64::AsmModule;

/// A compiled program in the form the configured backend produces.
#[derive(Debug, Clone)]
pub enum Output {
    Asm(AsmModule),
    Llvm(SsaModule),
}

impl Output {
    /// Text handed to the external assembler or LLVM toolchain.
    pub fn render(&self) -> String {
        match self {
            Output::Asm(module) => module.render(),
            Output::Llvm(module) => module.render(),
        }
    }

    pub fn dependencies(&self) -> &Dependencies {
        match self {
            Output::Asm(module) => &module.dependencies,
            Output::Llvm(module) => &module.dependencies,
        }
    }

    pub fn as_asm(&self) -> Option<&AsmModule> {
        match self {
            Output::Asm(module) => Some(module),
            Output::Llvm(_) => None,
        }
    }

    pub fn as_llvm(&self) -> Option<&SsaModule> {
        match self {
            Output::Llvm(module) => Some(module),
            Output::Asm(_) => None,
        }
    }
}

/// Compile `program` with the backend selected in `config`.
pub fn compile(
    program: &Program,
    library: &Library,
    config: &CompilerConfig,
    session: &CompilationSession<'_>,
) -> CompileResult<Output> {
    log::debug!(
        "compiling {} statements over {} variables with the {} backend",
        program.body.len(),
        program.variables.len(),
        config.backend
    );
    match config.backend {
        BackendKind::Asm => x64::compile_program(program, library, config, session).map(Output::Asm),
        BackendKind::Llvm => {
            llvm::compile_program(program, library, config, session).map(Output::Llvm)
        }
    }
}
