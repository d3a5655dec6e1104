// This module contains the x64 implementation of the shared lowering traits. AsmLowering walks
// one routine body and accumulates its instruction Lines. It owns the routine's storage
// factory, reads the library descriptors, and mutates the symbol table only to intern
// constants and record call dependencies. The generators are split by concern: expr holds the
// ExprLowering implementation (literals, variables, array elements, unary and arithmetic
// operators, casts), relational holds comparisons, boolean materialization and short-circuit
// logic, call holds the Windows x64 call sequence together with the string runtime (library
// calls, concatenation, collector registration, explicit frees), and stmt holds the
// StmtLowering implementation.
//
// Fresh heap strings are tracked with temporary GC roots. Each generator that produces a
// fresh string registers it under the next `_gc_temp_<d>` word, and every consumer pops that
// word again, either by freeing the buffer or by handing the node over to a variable's type
// pointer. Nesting keeps this a stack, so the depth counter here is all the bookkeeping the
// compiler needs; the peak depth tells the program assembler how many root words to emit.

//! Assembly generators for expressions and statements.

mod call;
mod expr;
mod relational;
mod stmt;

pub use call::{ArgSource, Callee};

use log::debug;

use crate::core::config::CompilerConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::LoweringStats;
use crate::core::symbols::{runtime, Library, SymbolTable};
use crate::x64::asm::{transfer, Line, Memory, Mnemonic, Operand};
use crate::x64::gc;
use crate::x64::registers::{RAX, RDX};
use crate::x64::storage::{StorageFactory, StorageLocation};

/// Lowering state of one routine body.
pub struct AsmLowering<'a> {
    library: &'a Library,
    symbols: &'a mut SymbolTable,
    factory: StorageFactory,
    config: &'a CompilerConfig,
    lines: Vec<Line>,
    next_label: usize,
    temp_depth: usize,
    temp_peak: usize,
    stats: LoweringStats,
    gc_used: bool,
}

/// Result of lowering a routine body.
#[derive(Debug)]
pub struct LoweredBody {
    pub lines: Vec<Line>,
    pub stats: LoweringStats,
    /// Number of `_gc_temp_<d>` words the body uses.
    pub temp_roots: usize,
    /// Whether the body registers anything with the collector.
    pub gc_used: bool,
}

impl<'a> AsmLowering<'a> {
    pub fn new(
        library: &'a Library,
        symbols: &'a mut SymbolTable,
        factory: StorageFactory,
        config: &'a CompilerConfig,
    ) -> Self {
        Self {
            library,
            symbols,
            factory,
            config,
            lines: Vec::new(),
            next_label: 0,
            temp_depth: 0,
            temp_peak: 0,
            stats: LoweringStats::default(),
            gc_used: false,
        }
    }

    pub fn factory(&self) -> &StorageFactory {
        &self.factory
    }

    /// Lines emitted so far.
    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    /// Emit the process exit sequence.
    pub fn emit_exit(&mut self, code: i64) -> CompileResult<()> {
        self.emit_call(Callee::Import(&runtime::EXIT), &[ArgSource::Immediate(code)], None)
    }

    /// Check the body left no storage or temporary roots behind.
    pub fn finish(mut self) -> CompileResult<LoweredBody> {
        if self.temp_depth != 0 {
            return Err(CompileError::StorageOrder {
                released: "end of routine".to_string(),
                expected: gc::temp_root(self.temp_depth - 1),
            });
        }
        self.factory.finish()?;
        self.stats.registers_allocated = self.factory.registers_allocated();
        self.stats.stack_slots = self.factory.peak_stack_slots() as usize;
        debug!(
            "lowered body: {} lines, {} registers, {} stack slots, {} calls",
            self.lines.len(),
            self.stats.registers_allocated,
            self.stats.stack_slots,
            self.stats.calls
        );
        Ok(LoweredBody {
            lines: self.lines,
            stats: self.stats,
            temp_roots: self.temp_peak,
            gc_used: self.gc_used,
        })
    }

    fn emit(&mut self, lines: Vec<Line>) {
        self.lines.extend(lines);
    }

    fn emit_line(&mut self, line: Line) {
        self.lines.push(line);
    }

    fn new_label(&mut self, hint: &str) -> String {
        let label = format!("_{}_{}", hint, self.next_label);
        self.next_label += 1;
        label
    }

    /// Claim the next temporary root word.
    fn push_temp_root(&mut self) -> String {
        let root = gc::temp_root(self.temp_depth);
        self.temp_depth += 1;
        self.temp_peak = self.temp_peak.max(self.temp_depth);
        self.gc_used = true;
        root
    }

    /// Release the most recent temporary root word.
    fn pop_temp_root(&mut self) -> CompileResult<String> {
        if self.temp_depth == 0 {
            return Err(CompileError::StorageOrder {
                released: "temporary root".to_string(),
                expected: "none".to_string(),
            });
        }
        self.temp_depth -= 1;
        Ok(gc::temp_root(self.temp_depth))
    }

    /// Leave the address of element `index` of the array at `symbol` in RAX.
    ///
    /// Uses RAX and RDX only, so R11 survives.
    fn element_address(&self, index: &StorageLocation, symbol: &str) -> Vec<Line> {
        let mut lines = transfer(&Operand::Reg(RAX), &index.operand());
        lines.push(Line::op2(Mnemonic::Shl, Operand::Reg(RAX), Operand::Imm(3)));
        lines.push(Line::op2(Mnemonic::Lea, Operand::Reg(RDX), Operand::sym(symbol)));
        lines.push(Line::op2(Mnemonic::Add, Operand::Reg(RAX), Operand::Reg(RDX)));
        lines
    }

    fn element(&self) -> Memory {
        Memory::base(RAX, 0)
    }
}
