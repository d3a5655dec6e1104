//! Compiler configuration.

use std::fmt;
use std::str::FromStr;

/// Initial value of the collector's allocation limit.
pub const DEFAULT_GC_LIMIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// x86-64 flat assembler text with the generated collector.
    #[default]
    Asm,
    /// Textual LLVM IR.
    Llvm,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asm" | "x64" => Ok(BackendKind::Asm),
            "llvm" => Ok(BackendKind::Llvm),
            other => Err(format!("unknown backend '{other}' (expected asm or llvm)")),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Asm => f.write_str("asm"),
            BackendKind::Llvm => f.write_str("llvm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    pub backend: BackendKind,
    /// Registrations before the first collection. Clamped to at least 1.
    pub gc_initial_limit: u64,
    /// Emit a comment line before each lowered statement.
    pub annotate: bool,
    /// Fail with ExhaustedStorage past this many live stack slots.
    pub stack_slot_limit: Option<u32>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Asm,
            gc_initial_limit: DEFAULT_GC_LIMIT,
            annotate: false,
            stack_slot_limit: None,
        }
    }
}

impl CompilerConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_gc_limit(mut self, limit: u64) -> Self {
        self.gc_initial_limit = limit.max(1);
        self
    }

    pub fn with_annotations(mut self, annotate: bool) -> Self {
        self.annotate = annotate;
        self
    }

    pub fn with_stack_slot_limit(mut self, limit: u32) -> Self {
        self.stack_slot_limit = Some(limit);
        self
    }

    pub fn gc_limit(&self) -> u64 {
        self.gc_initial_limit.max(1)
    }
}
