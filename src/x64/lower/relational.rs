//! Comparisons, boolean materialization and short-circuit logic.
//!
//! Booleans are all-zero bits for false and all-one bits for true. A comparison leaves its
//! result in flags and `materialize` turns the flags into one of those two words.

use super::{AsmLowering, ArgSource, Callee};
use crate::ast::{Expr, LogicalOp, RelOp, ValueType};
use crate::core::error::CompileResult;
use crate::core::lowering::{is_fresh_string, lower_converted, lower_expr, ExprLowering};
use crate::core::symbols::runtime;
use crate::x64::asm::{Cond, Line, Mnemonic, Operand};
use crate::x64::storage::StorageLocation;

/// Condition codes of a relational operator as (signed, unsigned).
///
/// Integer comparisons use the signed family, `ucomisd` sets flags like an unsigned compare.
pub fn conditions(op: RelOp) -> (Cond, Cond) {
    match op {
        RelOp::Eq => (Cond::E, Cond::E),
        RelOp::Ne => (Cond::Ne, Cond::Ne),
        RelOp::Lt => (Cond::L, Cond::B),
        RelOp::Le => (Cond::Le, Cond::Be),
        RelOp::Gt => (Cond::G, Cond::A),
        RelOp::Ge => (Cond::Ge, Cond::Ae),
    }
}

/// Result of an unsigned condition when `ucomisd` saw a NaN and raised the parity flag.
///
/// An unordered compare sets ZF, PF and CF together, which `e`, `b` and `be` would read as
/// true and `ne` as false. `None` means `cond` is already false on unordered operands.
pub fn unordered_result(cond: Cond) -> Option<bool> {
    match cond {
        Cond::E | Cond::B | Cond::Be => Some(false),
        Cond::Ne => Some(true),
        _ => None,
    }
}

impl AsmLowering<'_> {
    pub(super) fn lower_relational(
        &mut self,
        op: RelOp,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        let (signed, unsigned) = conditions(op);
        if left.ty == ValueType::Str {
            self.compare_strings(left, right, target)?;
        } else if left.ty.is_float() || right.ty.is_float() {
            let mut lhs = self.fresh_location(ValueType::F64)?;
            lower_converted(self, left, ValueType::F64, &mut lhs)?;
            let mut rhs = self.fresh_location(ValueType::F64)?;
            lower_converted(self, right, ValueType::F64, &mut rhs)?;
            self.emit(lhs.compare(&rhs)?);
            drop(rhs);
            drop(lhs);
            return self.materialize_unordered(unsigned, unordered_result(unsigned), target);
        } else {
            lower_expr(self, left, target)?;
            let mut rhs = self.fresh_location(right.ty)?;
            lower_expr(self, right, &mut rhs)?;
            self.emit(target.compare(&rhs)?);
        }
        self.materialize(signed, target)
    }

    /// `strcmp` the operands into `target` and compare the result with zero.
    fn compare_strings(
        &mut self,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        let mut lhs = self.fresh_location(ValueType::Str)?;
        lower_expr(self, left, &mut lhs)?;
        let mut rhs = self.fresh_location(ValueType::Str)?;
        lower_expr(self, right, &mut rhs)?;
        self.emit_call(
            Callee::Import(&runtime::STRCMP),
            &[ArgSource::Location(&lhs), ArgSource::Location(&rhs)],
            Some(&*target),
        )?;
        if is_fresh_string(right, self.library) {
            self.consume_string(&rhs)?;
        }
        if is_fresh_string(left, self.library) {
            self.consume_string(&lhs)?;
        }
        drop(rhs);
        drop(lhs);
        self.emit(target.compare_immediate(0)?);
        Ok(())
    }

    /// Turn the flags into 0 or -1 in `target`.
    pub(super) fn materialize(&mut self, cond: Cond, target: &StorageLocation) -> CompileResult<()> {
        self.materialize_unordered(cond, None, target)
    }

    /// Like `materialize`, with the parity flag deciding the result first when `unordered` is set.
    fn materialize_unordered(
        &mut self,
        cond: Cond,
        unordered: Option<bool>,
        target: &StorageLocation,
    ) -> CompileResult<()> {
        let end = self.new_label("rel_end");
        let nan = match unordered {
            Some(true) => {
                self.emit_line(Line::op1(Mnemonic::J(Cond::P), Operand::Forward));
                None
            }
            Some(false) => {
                let nan = self.new_label("rel_nan");
                self.emit_line(Line::op1(Mnemonic::J(Cond::P), Operand::label(nan.clone())));
                Some(nan)
            }
            None => None,
        };
        self.emit_line(Line::op1(Mnemonic::J(cond), Operand::Forward));
        if let Some(nan) = nan {
            self.emit_line(Line::label(nan));
        }
        self.emit(target.load_immediate(0));
        self.emit_line(Line::op1(Mnemonic::Jmp, Operand::label(end.clone())));
        self.emit_line(Line::AnonLabel);
        self.emit(target.load_immediate(-1));
        self.emit_line(Line::label(end));
        Ok(())
    }

    pub(super) fn lower_logical(
        &mut self,
        op: LogicalOp,
        ty: ValueType,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        lower_expr(self, left, target)?;
        let decided = match (op, ty) {
            (LogicalOp::Xor, _) => None,
            (LogicalOp::And, _) => Some(("and_end", 0, Cond::E)),
            (LogicalOp::Or, ValueType::Bool) => Some(("or_end", 0, Cond::Ne)),
            // Only an all-ones left operand decides an integer OR.
            (LogicalOp::Or, _) => Some(("or_end", -1, Cond::E)),
        };
        let end = match decided {
            Some((hint, value, cond)) => {
                let end = self.new_label(hint);
                self.emit(target.compare_immediate(value)?);
                self.emit_line(Line::op1(Mnemonic::J(cond), Operand::label(end.clone())));
                self.stats.short_circuits += 1;
                Some(end)
            }
            None => None,
        };
        let mut rhs = self.fresh_location(ty)?;
        lower_expr(self, right, &mut rhs)?;
        self.emit(target.bitwise(op, &rhs)?);
        drop(rhs);
        if let Some(end) = end {
            self.emit_line(Line::label(end));
        }
        Ok(())
    }
}
