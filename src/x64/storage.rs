// This module implements the storage model of the x64 backend: the factory that hands out
// registers and stack slots for intermediate values, and the storage locations generators
// emit code against. A StorageLocation is an RAII handle; dropping it returns its register or
// stack slot to the shared pool. Locations are expected to be released in reverse order of
// acquisition (nested expression evaluation guarantees this), which keeps the stack slot area
// a simple LIFO stack whose peak depth sizes the frame. A release that breaks the order is
// recorded rather than panicking inside Drop, and surfaces as a StorageOrder error from
// StorageFactory::finish. A drop that finds the pool borrowed is counted and fails finish as
// a LostRelease error. Allocation honours a volatility hint: volatile requests prefer
// caller-saved registers, then callee-saved ones, then a stack slot; non-volatile requests
// skip the caller-saved pool, so the value survives calls without being saved. Fixed handles
// name a specific register (RAX, XMM0, argument registers) and do nothing when dropped.
// Location operations return the instruction lines for loads, stores, moves, arithmetic and
// comparisons, routing through R11 or XMM4/XMM5 when an operand combination has no direct
// encoding.

//! Registers and stack slots for intermediate values.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use log::{trace, warn};

use crate::ast::{ArithOp, LogicalOp, ValueType};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{AsmReg, RegisterFile};
use crate::x64::asm::{transfer, Line, Memory, Mnemonic, Operand};
use crate::x64::calling_convention::{CCAssigner, FunctionFrame, Win64Assigner};
use crate::x64::registers::{
    self, is_xmm, NON_VOLATILE_GP, NON_VOLATILE_XMM, RAX, RDX, SCRATCH, SCRATCH_XMM,
    SCRATCH_XMM2, VOLATILE_GP, VOLATILE_XMM,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// May be clobbered by a call.
    Volatile,
    /// Survives calls.
    NonVolatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    GeneralRegister,
    FloatRegister,
    StackSlot,
}

/// What backs a storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backing {
    /// Pooled register.
    Register(AsmReg),
    /// Stack slot `n`, at `[rbp - 8*(n+1)]`.
    Stack(u32),
    /// Handle on a specific register outside the pool.
    Fixed(AsmReg),
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Register(reg) => f.write_str(registers::name(*reg)),
            Backing::Stack(n) => write!(f, "stack slot {n}"),
            Backing::Fixed(reg) => write!(f, "fixed {}", registers::name(*reg)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    Acquire(Backing),
    Release(Backing),
}

struct Pool {
    registers: RegisterFile,
    /// Pooled backings currently live, in acquisition order.
    live: Vec<Backing>,
    slots_in_use: u32,
    peak_slots: u32,
    slot_limit: Option<u32>,
    violations: Vec<CompileError>,
    history: Option<Vec<StorageEvent>>,
    registers_allocated: usize,
}

impl Pool {
    fn record(&mut self, event: StorageEvent) {
        if let Some(history) = &mut self.history {
            history.push(event);
        }
    }

    fn release(&mut self, backing: Backing) {
        match self.live.iter().rposition(|b| *b == backing) {
            Some(pos) => {
                if pos + 1 != self.live.len() {
                    let expected = self.live[self.live.len() - 1];
                    warn!("released {} while {} is still live", backing, expected);
                    self.violations.push(CompileError::StorageOrder {
                        released: backing.to_string(),
                        expected: expected.to_string(),
                    });
                }
                self.live.remove(pos);
            }
            None => {
                warn!("released {} which is not live", backing);
                self.violations.push(CompileError::StorageOrder {
                    released: backing.to_string(),
                    expected: "a live location".to_string(),
                });
            }
        }
        match backing {
            Backing::Register(reg) => {
                if let Err(err) = self.registers.free_register(reg) {
                    self.violations.push(err.into());
                }
            }
            Backing::Stack(_) => {
                self.slots_in_use = self
                    .live
                    .iter()
                    .filter_map(|b| match b {
                        Backing::Stack(n) => Some(n + 1),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0);
            }
            Backing::Fixed(_) => {}
        }
        self.record(StorageEvent::Release(backing));
    }
}

/// The pool plus a count of releases it could not take because it was borrowed at the time.
struct SharedPool {
    state: RefCell<Pool>,
    lost_releases: Cell<usize>,
}

/// Candidate registers for a value of type `ty`, in preference order.
fn candidates(ty: ValueType, hint: Volatility) -> Vec<AsmReg> {
    let (volatile, non_volatile): (&[AsmReg], &[AsmReg]) = if ty.is_float() {
        (&VOLATILE_XMM[..], &NON_VOLATILE_XMM[..])
    } else {
        (&VOLATILE_GP[..], &NON_VOLATILE_GP[..])
    };
    match hint {
        Volatility::Volatile => volatile.iter().chain(non_volatile).copied().collect(),
        Volatility::NonVolatile => non_volatile.to_vec(),
    }
}

/// Hands out storage locations from a shared pool.
#[derive(Clone)]
pub struct StorageFactory {
    pool: Rc<SharedPool>,
}

impl Default for StorageFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageFactory {
    pub fn new() -> Self {
        Self::with_slot_limit(None)
    }

    /// Factory whose stack area may hold at most `limit` live slots.
    pub fn with_slot_limit(limit: Option<u32>) -> Self {
        let allocatable = Win64Assigner::new().get_ccinfo().allocatable_regs.clone();
        Self {
            pool: Rc::new(SharedPool {
                state: RefCell::new(Pool {
                    registers: RegisterFile::new(allocatable),
                    live: Vec::new(),
                    slots_in_use: 0,
                    peak_slots: 0,
                    slot_limit: limit,
                    violations: Vec::new(),
                    history: None,
                    registers_allocated: 0,
                }),
                lost_releases: Cell::new(0),
            }),
        }
    }

    /// Start recording acquire and release events.
    pub fn record_history(&self) {
        self.pool.state.borrow_mut().history = Some(Vec::new());
    }

    pub fn history(&self) -> Vec<StorageEvent> {
        self.pool.state.borrow().history.clone().unwrap_or_default()
    }

    pub fn allocate(&self, hint: Volatility, ty: ValueType) -> CompileResult<StorageLocation> {
        let mut pool = self.pool.state.borrow_mut();
        let backing = match pool.registers.allocate_first(&candidates(ty, hint)) {
            Some(reg) => {
                pool.registers_allocated += 1;
                Backing::Register(reg)
            }
            None => {
                if pool.slot_limit.is_some_and(|limit| pool.slots_in_use >= limit) {
                    return Err(CompileError::ExhaustedStorage {
                        reason: format!("more than {} live stack slots", pool.slots_in_use),
                    });
                }
                let slot = pool.slots_in_use;
                pool.slots_in_use += 1;
                pool.peak_slots = pool.peak_slots.max(pool.slots_in_use);
                Backing::Stack(slot)
            }
        };
        pool.live.push(backing);
        pool.record(StorageEvent::Acquire(backing));
        trace!("allocated {} for {} ({:?})", backing, ty, hint);
        Ok(StorageLocation {
            backing,
            ty,
            pool: Some(Rc::clone(&self.pool)),
        })
    }

    /// Handle on a specific register. Dropping it has no effect on the pool.
    pub fn get(&self, reg: AsmReg, ty: ValueType) -> StorageLocation {
        StorageLocation {
            backing: Backing::Fixed(reg),
            ty,
            pool: None,
        }
    }

    pub fn release(&self, location: StorageLocation) {
        drop(location);
    }

    /// Live pooled caller-saved registers, in acquisition order.
    pub fn live_volatile(&self) -> Vec<AsmReg> {
        self.pool
            .state
            .borrow()
            .live
            .iter()
            .filter_map(|b| match b {
                Backing::Register(reg) if registers::is_volatile(*reg) => Some(*reg),
                _ => None,
            })
            .collect()
    }

    /// Callee-saved registers handed out at least once.
    pub fn used_non_volatile(&self) -> Vec<AsmReg> {
        self.pool
            .state
            .borrow()
            .registers
            .touched()
            .iter()
            .filter(|reg| !registers::is_volatile(*reg))
            .collect()
    }

    pub fn peak_stack_slots(&self) -> u32 {
        self.pool.state.borrow().peak_slots
    }

    pub fn live_count(&self) -> usize {
        self.pool.state.borrow().live.len()
    }

    pub fn registers_allocated(&self) -> usize {
        self.pool.state.borrow().registers_allocated
    }

    /// Check the routine released everything, in order.
    pub fn finish(&self) -> CompileResult<()> {
        let lost = self.pool.lost_releases.get();
        if lost > 0 {
            return Err(CompileError::LostRelease { count: lost });
        }
        let pool = self.pool.state.borrow();
        if let Some(violation) = pool.violations.first() {
            return Err(violation.clone());
        }
        if let Some(last) = pool.live.last() {
            return Err(CompileError::StorageOrder {
                released: "end of routine".to_string(),
                expected: last.to_string(),
            });
        }
        Ok(())
    }
}

/// A register or stack slot holding one value.
pub struct StorageLocation {
    backing: Backing,
    ty: ValueType,
    pool: Option<Rc<SharedPool>>,
}

impl fmt::Debug for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorageLocation({}, {})", self.backing, self.ty)
    }
}

impl Drop for StorageLocation {
    fn drop(&mut self) {
        if let Some(shared) = self.pool.take() {
            match shared.state.try_borrow_mut() {
                Ok(mut pool) => pool.release(self.backing),
                Err(_) => {
                    warn!("could not release {}: storage pool is borrowed", self.backing);
                    shared.lost_releases.set(shared.lost_releases.get() + 1);
                }
            }
        }
    }
}

fn gp_in_place(op: Mnemonic, dst: &Operand, src: &Operand) -> Vec<Line> {
    if dst.is_mem() {
        let scratch = Operand::Reg(SCRATCH);
        vec![
            Line::op2(Mnemonic::Mov, scratch.clone(), dst.clone()),
            Line::op2(op, scratch.clone(), src.clone()),
            Line::op2(Mnemonic::Mov, dst.clone(), scratch),
        ]
    } else {
        vec![Line::op2(op, dst.clone(), src.clone())]
    }
}

fn float_in_place(op: Mnemonic, dst: &Operand, src: &Operand) -> Vec<Line> {
    if dst.is_mem() {
        let scratch = Operand::Reg(SCRATCH_XMM);
        vec![
            Line::op2(Mnemonic::Movsd, scratch.clone(), dst.clone()),
            Line::op2(op, scratch.clone(), src.clone()),
            Line::op2(Mnemonic::Movsd, dst.clone(), scratch),
        ]
    } else {
        vec![Line::op2(op, dst.clone(), src.clone())]
    }
}

impl StorageLocation {
    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn backing(&self) -> Backing {
        self.backing
    }

    pub fn register(&self) -> Option<AsmReg> {
        match self.backing {
            Backing::Register(reg) | Backing::Fixed(reg) => Some(reg),
            Backing::Stack(_) => None,
        }
    }

    pub fn kind(&self) -> LocationKind {
        match self.register() {
            Some(reg) if is_xmm(reg) => LocationKind::FloatRegister,
            Some(_) => LocationKind::GeneralRegister,
            None => LocationKind::StackSlot,
        }
    }

    pub fn volatility(&self) -> Volatility {
        match self.register() {
            Some(reg) if registers::is_volatile(reg) => Volatility::Volatile,
            _ => Volatility::NonVolatile,
        }
    }

    /// Whether the value lives in the float register class.
    pub fn is_float(&self) -> bool {
        match self.register() {
            Some(reg) => is_xmm(reg),
            None => self.ty.is_float(),
        }
    }

    pub fn operand(&self) -> Operand {
        match self.backing {
            Backing::Register(reg) | Backing::Fixed(reg) => Operand::Reg(reg),
            Backing::Stack(n) => Operand::Mem(FunctionFrame::slot(n)),
        }
    }

    fn unsupported(&self, operation: &'static str) -> CompileError {
        CompileError::UnsupportedOperation {
            operation,
            location: self.backing.to_string(),
        }
    }

    pub fn load_immediate(&self, value: i64) -> Vec<Line> {
        transfer(&self.operand(), &Operand::Imm(value))
    }

    pub fn load_memory(&self, mem: Memory) -> Vec<Line> {
        transfer(&self.operand(), &Operand::Mem(mem))
    }

    pub fn store_memory(&self, mem: Memory) -> Vec<Line> {
        transfer(&Operand::Mem(mem), &self.operand())
    }

    /// Load the address of a data symbol.
    pub fn load_address(&self, symbol: &str) -> Vec<Line> {
        match self.register() {
            Some(reg) if !is_xmm(reg) => {
                vec![Line::op2(Mnemonic::Lea, Operand::Reg(reg), Operand::sym(symbol))]
            }
            _ => {
                let scratch = Operand::Reg(SCRATCH);
                let mut lines = vec![Line::op2(Mnemonic::Lea, scratch.clone(), Operand::sym(symbol))];
                lines.extend(transfer(&self.operand(), &scratch));
                lines
            }
        }
    }

    pub fn move_from(&self, other: &StorageLocation) -> Vec<Line> {
        transfer(&self.operand(), &other.operand())
    }

    /// `self = self <op> rhs`
    pub fn arithmetic(&self, op: ArithOp, rhs: &StorageLocation) -> CompileResult<Vec<Line>> {
        if self.is_float() != rhs.is_float() {
            return Err(self.unsupported("mixed-class arithmetic"));
        }
        let dst = self.operand();
        let src = rhs.operand();
        if self.is_float() {
            let mnemonic = match op {
                ArithOp::Add => Mnemonic::Addsd,
                ArithOp::Sub => Mnemonic::Subsd,
                ArithOp::Mul => Mnemonic::Mulsd,
                ArithOp::Div => Mnemonic::Divsd,
                ArithOp::Mod => return Err(self.unsupported("float modulo")),
            };
            return Ok(float_in_place(mnemonic, &dst, &src));
        }
        let lines = match op {
            ArithOp::Add => gp_in_place(Mnemonic::Add, &dst, &src),
            ArithOp::Sub => gp_in_place(Mnemonic::Sub, &dst, &src),
            ArithOp::Mul => gp_in_place(Mnemonic::Imul, &dst, &src),
            ArithOp::Div | ArithOp::Mod => {
                let result = if op == ArithOp::Div { RAX } else { RDX };
                vec![
                    Line::op2(Mnemonic::Mov, Operand::Reg(RAX), dst.clone()),
                    Line::op0(Mnemonic::Cqo),
                    Line::op1(Mnemonic::Idiv, src),
                    Line::op2(Mnemonic::Mov, dst, Operand::Reg(result)),
                ]
            }
        };
        Ok(lines)
    }

    pub fn add_immediate(&self, value: i32) -> CompileResult<Vec<Line>> {
        if self.is_float() {
            return Err(self.unsupported("immediate add"));
        }
        Ok(vec![Line::op2(Mnemonic::Add, self.operand(), Operand::Imm(value as i64))])
    }

    /// Bitwise and/or/xor.
    pub fn bitwise(&self, op: LogicalOp, rhs: &StorageLocation) -> CompileResult<Vec<Line>> {
        if self.is_float() || rhs.is_float() {
            return Err(self.unsupported("bitwise operation"));
        }
        let mnemonic = match op {
            LogicalOp::And => Mnemonic::And,
            LogicalOp::Or => Mnemonic::Or,
            LogicalOp::Xor => Mnemonic::Xor,
        };
        Ok(gp_in_place(mnemonic, &self.operand(), &rhs.operand()))
    }

    /// Arithmetic negation. Floats flip the sign bit with the mask at `sign_mask`.
    pub fn negate(&self, sign_mask: Option<&str>) -> CompileResult<Vec<Line>> {
        if !self.is_float() {
            return Ok(vec![Line::op1(Mnemonic::Neg, self.operand())]);
        }
        let mask = sign_mask.ok_or_else(|| self.unsupported("float negation without sign mask"))?;
        let mask_reg = Operand::Reg(SCRATCH_XMM2);
        let mut lines = vec![Line::op2(Mnemonic::Movsd, mask_reg.clone(), Operand::sym(mask))];
        lines.extend(float_in_place(Mnemonic::Xorpd, &self.operand(), &mask_reg));
        Ok(lines)
    }

    /// Bitwise complement.
    pub fn complement(&self) -> CompileResult<Vec<Line>> {
        if self.is_float() {
            return Err(self.unsupported("complement"));
        }
        Ok(vec![Line::op1(Mnemonic::Not, self.operand())])
    }

    /// Set flags from `self - rhs` (ucomisd for floats).
    pub fn compare(&self, rhs: &StorageLocation) -> CompileResult<Vec<Line>> {
        if self.is_float() != rhs.is_float() {
            return Err(self.unsupported("mixed-class comparison"));
        }
        let dst = self.operand();
        let src = rhs.operand();
        if self.is_float() {
            if dst.is_mem() {
                let scratch = Operand::Reg(SCRATCH_XMM);
                return Ok(vec![
                    Line::op2(Mnemonic::Movsd, scratch.clone(), dst),
                    Line::op2(Mnemonic::Ucomisd, scratch, src),
                ]);
            }
            return Ok(vec![Line::op2(Mnemonic::Ucomisd, dst, src)]);
        }
        if dst.is_mem() && src.is_mem() {
            let scratch = Operand::Reg(SCRATCH);
            return Ok(vec![
                Line::op2(Mnemonic::Mov, scratch.clone(), dst),
                Line::op2(Mnemonic::Cmp, scratch, src),
            ]);
        }
        Ok(vec![Line::op2(Mnemonic::Cmp, dst, src)])
    }

    pub fn compare_immediate(&self, value: i32) -> CompileResult<Vec<Line>> {
        if self.is_float() {
            return Err(self.unsupported("immediate comparison"));
        }
        Ok(vec![Line::op2(Mnemonic::Cmp, self.operand(), Operand::Imm(value as i64))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::asm::render_lines;
    use crate::x64::registers::{R10, R12, R13, R14, R15, R8, R9, RBX, RCX, RDI, RSI, XMM1};

    #[test]
    fn test_volatile_hint_prefers_caller_saved() {
        let factory = StorageFactory::new();
        let a = factory.allocate(Volatility::Volatile, ValueType::I64).unwrap();
        let b = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();
        let c = factory.allocate(Volatility::Volatile, ValueType::F64).unwrap();

        assert_eq!(a.register(), Some(RCX));
        assert_eq!(a.volatility(), Volatility::Volatile);
        assert_eq!(b.register(), Some(RBX));
        assert_eq!(b.volatility(), Volatility::NonVolatile);
        assert_eq!(c.register(), Some(XMM1));
        assert_eq!(c.kind(), LocationKind::FloatRegister);
        assert_eq!(factory.live_volatile(), vec![RCX]);

        drop(c);
        drop(b);
        drop(a);
        factory.finish().unwrap();
    }

    #[test]
    fn test_exhaustion_falls_back_to_stack_slots() {
        let factory = StorageFactory::new();
        let mut held = Vec::new();
        for _ in 0..NON_VOLATILE_GP.len() {
            held.push(factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap());
        }
        let spill = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();
        assert_eq!(spill.backing(), Backing::Stack(0));
        assert_eq!(spill.kind(), LocationKind::StackSlot);
        assert_eq!(spill.operand(), Operand::Mem(Memory::base(registers::RBP, -8)));

        let second = factory.allocate(Volatility::NonVolatile, ValueType::F64).unwrap();
        assert_eq!(second.register(), Some(registers::xmm(6)));

        drop(second);
        drop(spill);
        while let Some(loc) = held.pop() {
            drop(loc);
        }
        factory.finish().unwrap();
        assert_eq!(factory.peak_stack_slots(), 1);
        assert_eq!(
            factory.used_non_volatile(),
            vec![RBX, RSI, RDI, R12, R13, R14, R15, registers::xmm(6)]
        );
    }

    #[test]
    fn test_volatile_hint_spills_into_non_volatile_pool() {
        let factory = StorageFactory::new();
        let held: Vec<_> = (0..4)
            .map(|_| factory.allocate(Volatility::Volatile, ValueType::I64).unwrap())
            .collect();
        let regs: Vec<_> = held.iter().filter_map(|l| l.register()).collect();
        assert_eq!(regs, vec![RCX, R8, R9, R10]);

        let next = factory.allocate(Volatility::Volatile, ValueType::Bool).unwrap();
        assert_eq!(next.register(), Some(RBX));
        drop(next);
        for loc in held.into_iter().rev() {
            drop(loc);
        }
        factory.finish().unwrap();
    }

    #[test]
    fn test_stack_slots_are_reused_lifo() {
        let factory = StorageFactory::with_slot_limit(Some(2));
        let held: Vec<_> = (0..NON_VOLATILE_GP.len())
            .map(|_| factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap())
            .collect();

        let s0 = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();
        let s1 = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();
        assert_eq!(s1.backing(), Backing::Stack(1));
        assert!(matches!(
            factory.allocate(Volatility::NonVolatile, ValueType::I64),
            Err(CompileError::ExhaustedStorage { .. })
        ));
        drop(s1);
        let again = factory.allocate(Volatility::NonVolatile, ValueType::Str).unwrap();
        assert_eq!(again.backing(), Backing::Stack(1));
        drop(again);
        drop(s0);
        for loc in held.into_iter().rev() {
            drop(loc);
        }
        assert_eq!(factory.peak_stack_slots(), 2);
        factory.finish().unwrap();
    }

    #[test]
    fn test_out_of_order_release_is_reported() {
        let factory = StorageFactory::new();
        factory.record_history();
        let a = factory.allocate(Volatility::Volatile, ValueType::I64).unwrap();
        let b = factory.allocate(Volatility::Volatile, ValueType::I64).unwrap();
        drop(a);
        drop(b);

        let err = factory.finish().unwrap_err();
        assert_eq!(
            err,
            CompileError::StorageOrder { released: "rcx".to_string(), expected: "r8".to_string() }
        );
        assert_eq!(factory.history().len(), 4);
    }

    #[test]
    fn test_leaked_location_fails_finish() {
        let factory = StorageFactory::new();
        let leaked = factory.allocate(Volatility::Volatile, ValueType::I64).unwrap();
        assert!(factory.finish().is_err());
        std::mem::forget(leaked);
    }

    #[test]
    fn test_release_during_pool_borrow_fails_finish() {
        let factory = StorageFactory::new();
        let location = factory.allocate(Volatility::Volatile, ValueType::I64).unwrap();
        {
            let _busy = factory.pool.state.borrow();
            drop(location);
        }
        assert_eq!(factory.finish(), Err(CompileError::LostRelease { count: 1 }));
        assert_eq!(factory.live_count(), 1);
    }

    #[test]
    fn test_fixed_handles_do_not_touch_the_pool() {
        let factory = StorageFactory::new();
        let rax = factory.get(RAX, ValueType::I64);
        assert_eq!(rax.backing(), Backing::Fixed(RAX));
        assert_eq!(rax.volatility(), Volatility::Volatile);
        drop(rax);
        assert_eq!(factory.live_count(), 0);
        factory.finish().unwrap();
    }

    #[test]
    fn test_division_sequence() {
        let factory = StorageFactory::new();
        let dst = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();
        let src = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();

        let text = render_lines(&dst.arithmetic(ArithOp::Mod, &src).unwrap());
        assert_eq!(text, "    mov rax, rbx\n    cqo\n    idiv rsi\n    mov rbx, rdx\n");
    }

    #[test]
    fn test_memory_operands_route_through_scratch() {
        let factory = StorageFactory::new();
        let held: Vec<_> = (0..NON_VOLATILE_GP.len())
            .map(|_| factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap())
            .collect();
        let a = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();
        let b = factory.allocate(Volatility::NonVolatile, ValueType::I64).unwrap();

        let text = render_lines(&a.arithmetic(ArithOp::Mul, &b).unwrap());
        assert_eq!(
            text,
            "    mov r11, qword [rbp-8]\n    imul r11, qword [rbp-16]\n    mov qword [rbp-8], r11\n"
        );
        let text = render_lines(&a.compare(&b).unwrap());
        assert_eq!(text, "    mov r11, qword [rbp-8]\n    cmp r11, qword [rbp-16]\n");
        drop(b);
        drop(a);
        drop(held);
    }

    #[test]
    fn test_float_operations() {
        let factory = StorageFactory::new();
        let x = factory.allocate(Volatility::Volatile, ValueType::F64).unwrap();
        let y = factory.allocate(Volatility::Volatile, ValueType::F64).unwrap();

        let text = render_lines(&x.arithmetic(ArithOp::Div, &y).unwrap());
        assert_eq!(text, "    divsd xmm1, xmm2\n");
        assert!(x.arithmetic(ArithOp::Mod, &y).is_err());

        let text = render_lines(&x.negate(Some("_sign_mask")).unwrap());
        assert_eq!(text, "    movsd xmm5, qword [_sign_mask]\n    xorpd xmm1, xmm5\n");
        assert!(x.negate(None).is_err());
        assert!(x.complement().is_err());
        assert_eq!(render_lines(&x.compare(&y).unwrap()), "    ucomisd xmm1, xmm2\n");
    }

    #[test]
    fn test_load_address_into_stack_slot() {
        let factory = StorageFactory::new();
        let held: Vec<_> = (0..NON_VOLATILE_GP.len())
            .map(|_| factory.allocate(Volatility::NonVolatile, ValueType::Str).unwrap())
            .collect();
        let slot = factory.allocate(Volatility::NonVolatile, ValueType::Str).unwrap();
        assert_eq!(
            render_lines(&slot.load_address("_str_0")),
            "    lea r11, [_str_0]\n    mov qword [rbp-8], r11\n"
        );
        drop(slot);
        drop(held);
    }
}
