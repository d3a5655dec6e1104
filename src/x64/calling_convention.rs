// This module implements the Windows x64 calling convention used by every call the x64 backend
// emits. It provides the CCAssigner trait and the Win64Assigner implementation: arguments are
// assigned by position, so argument N uses the Nth slot of RCX, RDX, R8, R9 or XMM0-XMM3
// depending on its class, and arguments past the fourth go to the stack above the 32-byte
// shadow area the caller always reserves. Variadic callees additionally receive float
// arguments in the matching general purpose register. Return values use RAX or XMM0. CCInfo
// describes which registers the storage pool may hand out and which are callee-saved.
// CallFrame computes the per-call stack reservation (shadow space, stack arguments and the
// save area for live caller-saved registers) rounded to 16 bytes, and FunctionFrame manages
// the entry routine's frame: value stack slots below RBP followed by the save slots of the
// callee-saved registers the routine touched, with prologue and epilogue generation.

//! Windows x64 calling convention implementation.

use crate::core::register_file::{AsmReg, RegBitSet};
use crate::x64::asm::{transfer, Line, Memory, Mnemonic, Operand};
use crate::x64::registers::{
    is_xmm, NON_VOLATILE_GP, NON_VOLATILE_XMM, R8, R9, RAX, RBP, RCX, RDX, RSP, VOLATILE_GP,
    VOLATILE_XMM, XMM0, XMM1, XMM2, XMM3,
};
use bumpalo::{collections::Vec as BumpVec, Bump};

/// Bytes the caller reserves for the callee to spill its register arguments.
pub const SHADOW_SPACE: u32 = 32;

/// Register banks for different register types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegBank {
    GeneralPurpose = 0,
    Xmm = 1,
}

/// Argument assignment result from calling convention analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAssignment {
    /// Register bank this argument belongs to.
    pub bank: RegBank,
    /// Assigned register (if any).
    pub reg: Option<AsmReg>,
    /// Offset past the shadow area (if assigned to stack).
    pub stack_off: Option<i32>,
    /// General purpose copy of a float argument to a variadic callee.
    pub gp_copy: Option<AsmReg>,
}

impl CCAssignment {
    /// Create a new assignment for an argument.
    pub fn new(bank: RegBank) -> Self {
        Self {
            bank,
            reg: None,
            stack_off: None,
            gp_copy: None,
        }
    }
}

/// Information about a calling convention.
#[derive(Debug, Clone)]
pub struct CCInfo {
    /// Registers available for allocation.
    pub allocatable_regs: RegBitSet,
    /// Registers that must be preserved by callee.
    pub callee_saved_regs: RegBitSet,
    /// Registers used for argument passing.
    pub arg_regs: RegBitSet,
}

/// Trait for calling convention argument assignment.
pub trait CCAssigner {
    /// Get calling convention information.
    fn get_ccinfo(&self) -> &CCInfo;

    /// Assign an argument according to the calling convention.
    fn assign_arg(&mut self, arg: &mut CCAssignment);

    /// Assign a return value according to the calling convention.
    fn assign_ret(&mut self, arg: &mut CCAssignment);

    /// Reset state for a new call.
    fn reset(&mut self);

    /// Bytes of outgoing argument area, shadow space included.
    fn get_stack_size(&self) -> u32;
}

/// Windows x64 calling convention assigner.
pub struct Win64Assigner {
    cc_info: CCInfo,
    /// Position of the next argument.
    position: usize,
    /// Bytes of stack arguments assigned so far.
    stack: u32,
    /// Float arguments also go to the GP register of their position.
    variadic: bool,
}

impl Default for Win64Assigner {
    fn default() -> Self {
        let mut allocatable = RegBitSet::new();
        for pool in [&VOLATILE_GP[..], &NON_VOLATILE_GP[..], &VOLATILE_XMM[..], &NON_VOLATILE_XMM[..]] {
            allocatable.union(&RegBitSet::from_regs(pool));
        }

        let mut callee_saved = RegBitSet::from_regs(&NON_VOLATILE_GP);
        callee_saved.union(&RegBitSet::from_regs(&NON_VOLATILE_XMM));
        callee_saved.set(RBP);

        let mut arg_regs = RegBitSet::from_regs(&Self::GP_ARG_REGS);
        arg_regs.union(&RegBitSet::from_regs(&Self::XMM_ARG_REGS));

        Self {
            cc_info: CCInfo {
                allocatable_regs: allocatable,
                callee_saved_regs: callee_saved,
                arg_regs,
            },
            position: 0,
            stack: 0,
            variadic: false,
        }
    }
}

impl Win64Assigner {
    pub const GP_ARG_REGS: [AsmReg; 4] = [RCX, RDX, R8, R9];
    pub const XMM_ARG_REGS: [AsmReg; 4] = [XMM0, XMM1, XMM2, XMM3];

    pub fn new() -> Self {
        Self::default()
    }

    /// The callee takes a variable argument list.
    pub fn set_variadic(&mut self) {
        self.variadic = true;
    }
}

impl CCAssigner for Win64Assigner {
    fn get_ccinfo(&self) -> &CCInfo {
        &self.cc_info
    }

    fn assign_arg(&mut self, arg: &mut CCAssignment) {
        let position = self.position;
        self.position += 1;
        if position < Self::GP_ARG_REGS.len() {
            match arg.bank {
                RegBank::GeneralPurpose => arg.reg = Some(Self::GP_ARG_REGS[position]),
                RegBank::Xmm => {
                    arg.reg = Some(Self::XMM_ARG_REGS[position]);
                    if self.variadic {
                        arg.gp_copy = Some(Self::GP_ARG_REGS[position]);
                    }
                }
            }
        } else {
            arg.stack_off = Some(self.stack as i32);
            self.stack += 8;
        }
    }

    fn assign_ret(&mut self, arg: &mut CCAssignment) {
        arg.reg = Some(match arg.bank {
            RegBank::GeneralPurpose => RAX,
            RegBank::Xmm => XMM0,
        });
    }

    fn reset(&mut self) {
        self.position = 0;
        self.stack = 0;
        self.variadic = false;
    }

    fn get_stack_size(&self) -> u32 {
        SHADOW_SPACE + self.stack
    }
}

/// Align a value up to the specified power of two.
pub fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// Stack reservation of one call site.
///
/// ```text
/// rsp + 0             shadow space (32 bytes)
/// rsp + 32            stack arguments, 8 bytes each
/// rsp + call_area     save area for live caller-saved registers
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    pub call_area: u32,
    pub saved: u32,
}

impl CallFrame {
    pub fn new(args: usize, saved: usize) -> Self {
        let stack_args = args.saturating_sub(Win64Assigner::GP_ARG_REGS.len()) as u32;
        Self {
            call_area: SHADOW_SPACE + 8 * stack_args,
            saved: saved as u32,
        }
    }

    /// Total adjustment of RSP, a multiple of 16.
    pub fn size(&self) -> u32 {
        align_up(self.call_area + 8 * self.saved, 16)
    }

    pub fn save_slot(&self, index: usize) -> Memory {
        Memory::base(RSP, (self.call_area + 8 * index as u32) as i64)
    }

    pub fn stack_arg(&self, stack_off: i32) -> Memory {
        Memory::base(RSP, (SHADOW_SPACE as i32 + stack_off) as i64)
    }
}

/// Entry routine stack frame management.
#[derive(Debug)]
pub struct FunctionFrame<'a> {
    /// Callee-saved registers that need to be preserved.
    pub saved_registers: BumpVec<'a, AsmReg>,
    /// Value slots addressed as `[rbp - 8*(n+1)]`.
    pub value_slots: u32,
    /// Total size of the stack frame below RBP.
    pub frame_size: u32,
}

impl<'a> FunctionFrame<'a> {
    /// Create a new function frame using the provided arena.
    pub fn new(arena: &'a Bump) -> Self {
        Self {
            saved_registers: BumpVec::new_in(arena),
            value_slots: 0,
            frame_size: 0,
        }
    }

    /// Add a callee-saved register that needs preservation.
    pub fn add_saved_register(&mut self, reg: AsmReg) {
        if !self.saved_registers.contains(&reg) {
            self.saved_registers.push(reg);
        }
    }

    pub fn slot(index: u32) -> Memory {
        Memory::base(RBP, -8 * (index as i64 + 1))
    }

    /// XMM registers are saved whole, so they take 16 bytes.
    fn save_size(reg: AsmReg) -> u32 {
        if is_xmm(reg) {
            16
        } else {
            8
        }
    }

    /// Save slots of the callee-saved registers, below the value slots.
    fn save_slots(&self) -> impl Iterator<Item = (AsmReg, Memory)> + '_ {
        let mut offset = 8 * self.value_slots;
        self.saved_registers.iter().map(move |&reg| {
            offset += Self::save_size(reg);
            (reg, Memory::base(RBP, -(offset as i64)))
        })
    }

    fn save_line(reg: AsmReg, dst: Operand, src: Operand) -> Vec<Line> {
        if is_xmm(reg) {
            vec![Line::op2(Mnemonic::Movdqu, dst, src)]
        } else {
            transfer(&dst, &src)
        }
    }

    /// Calculate the final frame size.
    pub fn calculate_frame_size(&mut self) {
        // rbp + 8:  return address
        // rbp:      saved rbp
        // rbp - 8:  value slots, then callee-saved register slots
        let saves: u32 = self.saved_registers.iter().map(|&reg| Self::save_size(reg)).sum();
        self.frame_size = align_up(8 * self.value_slots + saves, 16);
    }

    pub fn prologue(&self) -> Vec<Line> {
        let mut lines = vec![
            Line::op1(Mnemonic::Push, Operand::Reg(RBP)),
            Line::op2(Mnemonic::Mov, Operand::Reg(RBP), Operand::Reg(RSP)),
        ];
        if self.frame_size > 0 {
            lines.push(Line::op2(Mnemonic::Sub, Operand::Reg(RSP), Operand::Imm(self.frame_size as i64)));
        }
        for (reg, slot) in self.save_slots() {
            lines.extend(Self::save_line(reg, Operand::Mem(slot), Operand::Reg(reg)));
        }
        lines
    }

    pub fn epilogue(&self) -> Vec<Line> {
        let mut lines = Vec::new();
        for (reg, slot) in self.save_slots() {
            lines.extend(Self::save_line(reg, Operand::Reg(reg), Operand::Mem(slot)));
        }
        lines.push(Line::op2(Mnemonic::Mov, Operand::Reg(RSP), Operand::Reg(RBP)));
        lines.push(Line::op1(Mnemonic::Pop, Operand::Reg(RBP)));
        lines.push(Line::op0(Mnemonic::Ret));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x64::asm::render_lines;
    use crate::x64::registers::{self, RBX, RSI};
    use bumpalo::Bump;

    #[test]
    fn test_win64_positional_assignment() {
        let mut assigner = Win64Assigner::new();
        let banks = [RegBank::GeneralPurpose, RegBank::Xmm, RegBank::GeneralPurpose, RegBank::Xmm];
        let expected = [RCX, XMM1, R8, XMM3];

        for (bank, reg) in banks.iter().zip(expected) {
            let mut arg = CCAssignment::new(*bank);
            assigner.assign_arg(&mut arg);
            assert_eq!(arg.reg, Some(reg));
            assert_eq!(arg.stack_off, None);
            assert_eq!(arg.gp_copy, None);
        }

        let mut fifth = CCAssignment::new(RegBank::Xmm);
        assigner.assign_arg(&mut fifth);
        assert_eq!(fifth.reg, None);
        assert_eq!(fifth.stack_off, Some(0));

        let mut sixth = CCAssignment::new(RegBank::GeneralPurpose);
        assigner.assign_arg(&mut sixth);
        assert_eq!(sixth.stack_off, Some(8));
        assert_eq!(assigner.get_stack_size(), 48);
    }

    #[test]
    fn test_variadic_float_gets_gp_copy() {
        let mut assigner = Win64Assigner::new();
        assigner.set_variadic();
        let mut fmt = CCAssignment::new(RegBank::GeneralPurpose);
        assigner.assign_arg(&mut fmt);
        let mut value = CCAssignment::new(RegBank::Xmm);
        assigner.assign_arg(&mut value);

        assert_eq!(value.reg, Some(XMM1));
        assert_eq!(value.gp_copy, Some(RDX));

        assigner.reset();
        let mut plain = CCAssignment::new(RegBank::Xmm);
        assigner.assign_arg(&mut plain);
        assert_eq!(plain.gp_copy, None);
    }

    #[test]
    fn test_return_registers() {
        let mut assigner = Win64Assigner::new();
        let mut gp = CCAssignment::new(RegBank::GeneralPurpose);
        assigner.assign_ret(&mut gp);
        assert_eq!(gp.reg, Some(RAX));
        let mut fp = CCAssignment::new(RegBank::Xmm);
        assigner.assign_ret(&mut fp);
        assert_eq!(fp.reg, Some(XMM0));
    }

    #[test]
    fn test_ccinfo_excludes_scratch() {
        let info = Win64Assigner::new().get_ccinfo().clone();
        for reg in [RAX, RDX, registers::R11, RSP, RBP, XMM0, registers::XMM4, registers::XMM5] {
            assert!(!info.allocatable_regs.contains(reg), "{} is pooled", registers::name(reg));
        }
        assert!(info.callee_saved_regs.contains(RBX));
        assert!(info.arg_regs.contains(R9));
        assert!(info.callee_saved_regs.contains(RSI));
        assert!(!info.callee_saved_regs.contains(RCX));
    }

    #[test]
    fn test_call_frame_layout() {
        let frame = CallFrame::new(2, 0);
        assert_eq!(frame.size(), 32);

        let frame = CallFrame::new(6, 3);
        assert_eq!(frame.call_area, 48);
        assert_eq!(frame.size(), 80);
        assert_eq!(frame.save_slot(1), Memory::base(RSP, 56));
        assert_eq!(frame.stack_arg(8), Memory::base(RSP, 40));
    }

    #[test]
    fn test_function_frame_prologue() {
        let arena = Bump::new();
        let mut frame = FunctionFrame::new(&arena);
        frame.value_slots = 1;
        frame.add_saved_register(RBX);
        frame.add_saved_register(RSI);
        frame.add_saved_register(RBX);
        frame.calculate_frame_size();

        assert_eq!(frame.saved_registers.len(), 2);
        assert_eq!(frame.frame_size, 32);
        assert_eq!(
            render_lines(&frame.prologue()),
            "    push rbp\n    mov rbp, rsp\n    sub rsp, 32\n    mov qword [rbp-16], rbx\n    mov qword [rbp-24], rsi\n"
        );
        let epilogue = render_lines(&frame.epilogue());
        assert!(epilogue.starts_with("    mov rbx, qword [rbp-16]\n"));
        assert!(epilogue.ends_with("    pop rbp\n    ret\n"));
    }

    #[test]
    fn test_xmm_saves_use_full_width_slots() {
        let arena = Bump::new();
        let mut frame = FunctionFrame::new(&arena);
        frame.value_slots = 1;
        frame.add_saved_register(RBX);
        frame.add_saved_register(registers::xmm(6));
        frame.add_saved_register(RSI);
        frame.calculate_frame_size();

        assert_eq!(frame.frame_size, 48);
        assert_eq!(
            render_lines(&frame.prologue()),
            "    push rbp\n    mov rbp, rsp\n    sub rsp, 48\n    mov qword [rbp-16], rbx\n    movdqu dqword [rbp-32], xmm6\n    mov qword [rbp-40], rsi\n"
        );
        let epilogue = render_lines(&frame.epilogue());
        assert!(epilogue.contains("    movdqu xmm6, dqword [rbp-32]\n"));
        assert!(!epilogue.contains("movsd"));
    }
}
