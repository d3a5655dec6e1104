//! Call lowering and the string runtime built on it.
//!
//! Every call site follows the same shape:
//!
//! ```text
//! sub rsp, N                  ; shadow space, stack arguments, save area
//! mov [rsp+k], <live volatile registers>
//! <marshal arguments>
//! call [symbol]
//! mov <result>, rax | xmm0
//! mov <live volatile registers>, [rsp+k]
//! add rsp, N
//! ```
//!
//! Arguments whose source register was saved are read back from the save slot, so
//! marshalling can clobber argument registers in any order.

use log::debug;

use super::AsmLowering;
use crate::ast::{ArithOp, Expr, ValueType};
use crate::core::error::{CompileError, CompileResult};
use crate::core::lowering::{is_fresh_string, lower_expr, ExprLowering};
use crate::core::symbols::{runtime, FunctionDescriptor, ReturnKind};
use crate::x64::asm::{transfer, Line, Memory, Mnemonic, Operand};
use crate::x64::calling_convention::{CCAssigner, CCAssignment, CallFrame, RegBank, Win64Assigner};
use crate::x64::gc;
use crate::x64::registers::{RAX, RSP, SCRATCH, XMM0};
use crate::x64::storage::StorageLocation;

/// What a call transfers control to.
#[derive(Debug, Clone, Copy)]
pub enum Callee<'f> {
    /// Imported library function, called through the import table.
    Import(&'f FunctionDescriptor),
    /// Routine emitted into the program itself.
    Internal(&'static str),
}

impl Callee<'_> {
    pub fn name(&self) -> &str {
        match self {
            Callee::Import(function) => function.name,
            Callee::Internal(label) => label,
        }
    }

    fn is_variadic(&self) -> bool {
        matches!(self, Callee::Import(function) if function.variadic)
    }

    fn ret(&self) -> ReturnKind {
        match self {
            Callee::Import(function) => function.ret,
            Callee::Internal(_) => ReturnKind::Void,
        }
    }
}

/// Where an argument value comes from.
#[derive(Debug)]
pub enum ArgSource<'l> {
    Location(&'l StorageLocation),
    Immediate(i64),
    /// Address of a data symbol.
    Address(String),
}

impl ArgSource<'_> {
    fn bank(&self) -> RegBank {
        match self {
            ArgSource::Location(loc) if loc.is_float() => RegBank::Xmm,
            _ => RegBank::GeneralPurpose,
        }
    }
}

impl AsmLowering<'_> {
    /// Emit a complete call sequence. `result` receives the return value, if any.
    pub fn emit_call(
        &mut self,
        callee: Callee<'_>,
        args: &[ArgSource<'_>],
        result: Option<&StorageLocation>,
    ) -> CompileResult<()> {
        let live = self.factory.live_volatile();
        let frame = CallFrame::new(args.len(), live.len());
        debug!(
            "call {}: {} argument(s), {} saved register(s), {} bytes reserved",
            callee.name(),
            args.len(),
            live.len(),
            frame.size()
        );

        self.emit_line(Line::op2(Mnemonic::Sub, Operand::Reg(RSP), Operand::Imm(frame.size() as i64)));
        for (i, &reg) in live.iter().enumerate() {
            self.emit(transfer(&Operand::Mem(frame.save_slot(i)), &Operand::Reg(reg)));
        }

        let mut assigner = Win64Assigner::new();
        if callee.is_variadic() {
            assigner.set_variadic();
        }
        for arg in args {
            let mut assignment = CCAssignment::new(arg.bank());
            assigner.assign_arg(&mut assignment);
            let dst = match (assignment.reg, assignment.stack_off) {
                (Some(reg), _) => Operand::Reg(reg),
                (None, Some(off)) => Operand::Mem(frame.stack_arg(off)),
                (None, None) => {
                    return Err(CompileError::UnsupportedOperation {
                        operation: "argument assignment",
                        location: callee.name().to_string(),
                    })
                }
            };
            let lines = match arg {
                ArgSource::Location(loc) => {
                    let saved = loc
                        .register()
                        .and_then(|reg| live.iter().position(|&r| r == reg));
                    let src = match saved {
                        Some(i) => Operand::Mem(frame.save_slot(i)),
                        None => loc.operand(),
                    };
                    transfer(&dst, &src)
                }
                ArgSource::Immediate(value) => transfer(&dst, &Operand::Imm(*value)),
                ArgSource::Address(symbol) if !dst.is_mem() => {
                    vec![Line::op2(Mnemonic::Lea, dst.clone(), Operand::sym(symbol.as_str()))]
                }
                ArgSource::Address(symbol) => vec![
                    Line::op2(Mnemonic::Lea, Operand::Reg(SCRATCH), Operand::sym(symbol.as_str())),
                    Line::op2(Mnemonic::Mov, dst.clone(), Operand::Reg(SCRATCH)),
                ],
            };
            self.emit(lines);
            if let (Some(gp), Some(reg)) = (assignment.gp_copy, assignment.reg) {
                self.emit(transfer(&Operand::Reg(gp), &Operand::Reg(reg)));
            }
        }

        match callee {
            Callee::Import(function) => {
                self.symbols.add_dependency(function);
                self.emit_line(Line::op1(Mnemonic::Call, Operand::sym(function.name)));
            }
            Callee::Internal(label) => {
                self.emit_line(Line::op1(Mnemonic::Call, Operand::label(label)));
            }
        }
        self.stats.calls += 1;

        if let Some(result) = result {
            match callee.ret() {
                ReturnKind::Void => {}
                ReturnKind::Int32 => {
                    self.emit_line(Line::op2(Mnemonic::Movsxd, Operand::Reg(RAX), Operand::Reg32(RAX)));
                    self.emit(transfer(&result.operand(), &Operand::Reg(RAX)));
                }
                ReturnKind::Value(ValueType::F64) => {
                    self.emit(transfer(&result.operand(), &Operand::Reg(XMM0)));
                }
                ReturnKind::Value(_) => self.emit(transfer(&result.operand(), &Operand::Reg(RAX))),
            }
        }

        let kept = result.and_then(StorageLocation::register);
        for (i, &reg) in live.iter().enumerate() {
            if Some(reg) != kept {
                self.emit(transfer(&Operand::Reg(reg), &Operand::Mem(frame.save_slot(i))));
            }
        }
        self.emit_line(Line::op2(Mnemonic::Add, Operand::Reg(RSP), Operand::Imm(frame.size() as i64)));
        Ok(())
    }

    /// Source level call of a library function.
    pub(super) fn lower_call(
        &mut self,
        name: &str,
        args: &[Expr],
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        let types: Vec<ValueType> = args.iter().map(|arg| arg.ty).collect();
        let function = *self.library.resolve(name, &types)?;

        let mut locations = Vec::with_capacity(args.len());
        for arg in args {
            let mut loc = self.fresh_location(arg.ty)?;
            lower_expr(self, arg, &mut loc)?;
            locations.push(loc);
        }
        let sources: Vec<ArgSource<'_>> = locations.iter().map(ArgSource::Location).collect();
        self.emit_call(Callee::Import(&function), &sources, Some(&*target))?;
        drop(sources);

        for (arg, loc) in args.iter().zip(&locations).rev() {
            if is_fresh_string(arg, self.library) {
                self.consume_string(loc)?;
            }
        }
        // release in reverse allocation order
        while let Some(loc) = locations.pop() {
            drop(loc);
        }

        if function.allocates {
            self.register_string(target)?;
        }
        Ok(())
    }

    /// `left + right` on strings: a new buffer holding both.
    pub(super) fn lower_concatenation(
        &mut self,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        let mut lhs = self.fresh_location(ValueType::Str)?;
        lower_expr(self, left, &mut lhs)?;
        let mut rhs = self.fresh_location(ValueType::Str)?;
        lower_expr(self, right, &mut rhs)?;

        let size = self.fresh_location(ValueType::I64)?;
        self.emit_call(Callee::Import(&runtime::STRLEN), &[ArgSource::Location(&lhs)], Some(&size))?;
        let right_len = self.fresh_location(ValueType::I64)?;
        self.emit_call(Callee::Import(&runtime::STRLEN), &[ArgSource::Location(&rhs)], Some(&right_len))?;
        self.emit(size.arithmetic(ArithOp::Add, &right_len)?);
        drop(right_len);
        self.emit(size.add_immediate(1)?);

        let buffer = self.fresh_location(ValueType::Str)?;
        self.emit_call(Callee::Import(&runtime::MALLOC), &[ArgSource::Location(&size)], Some(&buffer))?;
        self.emit_call(
            Callee::Import(&runtime::STRCPY),
            &[ArgSource::Location(&buffer), ArgSource::Location(&lhs)],
            None,
        )?;
        self.emit_call(
            Callee::Import(&runtime::STRCAT),
            &[ArgSource::Location(&buffer), ArgSource::Location(&rhs)],
            None,
        )?;

        if is_fresh_string(right, self.library) {
            self.consume_string(&rhs)?;
        }
        if is_fresh_string(left, self.library) {
            self.consume_string(&lhs)?;
        }
        self.emit(target.move_from(&buffer));
        drop(buffer);
        drop(size);
        drop(rhs);
        drop(lhs);

        self.register_string(target)
    }

    /// Hand a fresh buffer to the collector under a new temporary root.
    pub(super) fn register_string(&mut self, loc: &StorageLocation) -> CompileResult<()> {
        let root = self.push_temp_root();
        self.emit_call(
            Callee::Internal(gc::REGISTER),
            &[ArgSource::Location(loc), ArgSource::Address(root)],
            None,
        )?;
        self.stats.gc_registrations += 1;
        Ok(())
    }

    /// Free a fresh buffer nothing else references and retire its temporary root.
    ///
    /// The node stays on the allocation list with a null data pointer until the next sweep.
    pub(super) fn consume_string(&mut self, loc: &StorageLocation) -> CompileResult<()> {
        let root = self.pop_temp_root()?;
        self.emit_call(Callee::Import(&runtime::FREE), &[ArgSource::Location(loc)], None)?;
        self.emit_line(Line::op2(Mnemonic::Mov, Operand::Reg(RAX), Operand::sym(root.as_str())));
        self.emit_line(Line::op2(
            Mnemonic::Mov,
            Operand::Mem(Memory::base(RAX, gc::NODE_DATA)),
            Operand::Imm(0),
        ));
        self.emit_line(Line::op2(Mnemonic::Mov, Operand::sym(root), Operand::Imm(0)));
        self.stats.explicit_frees += 1;
        Ok(())
    }

    /// Move the node of the most recent fresh string into R11 and retire its root.
    pub(super) fn take_temp_root(&mut self) -> CompileResult<()> {
        let root = self.pop_temp_root()?;
        self.emit_line(Line::op2(Mnemonic::Mov, Operand::Reg(SCRATCH), Operand::sym(root.as_str())));
        self.emit_line(Line::op2(Mnemonic::Mov, Operand::sym(root), Operand::Imm(0)));
        Ok(())
    }
}
