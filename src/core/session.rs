// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns a reference to the arena that backs per-routine frame bookkeeping
// (saved registers and stack slot tables are arena vectors) and accumulates statistics across
// every program compiled with it. Backends report what they did through LoweringStats, a
// plain counter struct filled during lowering and merged into the session once a program has
// been assembled. SessionStats is printed by the command line driver when asked for.

//! Arena-based compilation session management.

use bumpalo::Bump;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

/// Counters collected while lowering one program.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoweringStats {
    pub registers_allocated: usize,
    pub stack_slots: usize,
    pub calls: usize,
    pub gc_registrations: usize,
    pub explicit_frees: usize,
    pub short_circuits: usize,
}

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for compilation objects.
    arena: &'arena Bump,

    /// Session statistics for debugging and optimization.
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Record that a program was lowered and assembled.
    pub fn record_program_compiled(&self, backend: &str, lines: usize, lowering: &LoweringStats) {
        let mut stats = self.stats.borrow_mut();
        stats.programs_compiled += 1;
        stats.lines_emitted += lines;
        stats.registers_allocated += lowering.registers_allocated;
        stats.peak_stack_slots = stats.peak_stack_slots.max(lowering.stack_slots);
        stats.total_calls += lowering.calls;
        stats.gc_registrations += lowering.gc_registrations;
        stats.explicit_frees += lowering.explicit_frees;
        stats.short_circuits += lowering.short_circuits;
        *stats.backend_counts.entry(backend.to_string()).or_insert(0) += 1;
    }

    /// Record an instruction emitted by mnemonic.
    pub fn record_instruction(&self, mnemonic: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.instructions_emitted += 1;
        *stats
            .instruction_counts
            .entry(mnemonic.to_string())
            .or_insert(0) += 1;
    }

    /// Get compilation statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Compilation session statistics.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Number of programs compiled.
    pub programs_compiled: usize,

    /// Output lines across all programs.
    pub lines_emitted: usize,

    /// Number of instructions emitted.
    pub instructions_emitted: usize,

    /// Count of each mnemonic emitted.
    pub instruction_counts: HashMap<String, usize>,

    /// Programs per backend.
    pub backend_counts: HashMap<String, usize>,

    /// Storage locations backed by a register.
    pub registers_allocated: usize,

    /// Largest stack slot area of any program.
    pub peak_stack_slots: usize,

    /// Call sites lowered.
    pub total_calls: usize,

    /// Strings handed to the collector.
    pub gc_registrations: usize,

    /// Transient strings freed right after use.
    pub explicit_frees: usize,

    /// Short-circuit branches emitted for and/or.
    pub short_circuits: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Session Statistics:")?;
        writeln!(f, "  Programs compiled: {}", self.programs_compiled)?;
        writeln!(f, "  Lines emitted: {}", self.lines_emitted)?;
        writeln!(f, "  Instructions emitted: {}", self.instructions_emitted)?;
        writeln!(f, "  Registers allocated: {}", self.registers_allocated)?;
        writeln!(f, "  Peak stack slots: {}", self.peak_stack_slots)?;
        writeln!(f, "  Calls lowered: {}", self.total_calls)?;
        writeln!(f, "  GC registrations: {}", self.gc_registrations)?;
        writeln!(f, "  Explicit frees: {}", self.explicit_frees)?;
        writeln!(f, "  Short circuits: {}", self.short_circuits)?;

        if !self.instruction_counts.is_empty() {
            writeln!(f, "  Instruction breakdown:")?;
            let mut sorted: Vec<_> = self.instruction_counts.iter().collect();
            sorted.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            for (mnemonic, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {}: {}", mnemonic, count)?;
            }
        }

        Ok(())
    }
}
