//! Statement generators.

use super::{AsmLowering, ArgSource, Callee};
use crate::ast::{Expr, ExprKind, LValue, Stmt, ValueType};
use crate::core::error::{CompileError, CompileResult};
use crate::core::lowering::{
    format_directive, is_fresh_string, lower_block, lower_converted, lower_expr, ExprLowering,
    StmtLowering,
};
use crate::core::symbols::runtime;
use crate::x64::asm::{Cond, Line, Memory, Mnemonic, Operand};
use crate::x64::registers::SCRATCH;
use crate::x64::storage::{StorageLocation, Volatility};

/// Strip casts that do not change the type.
fn strip_identity_casts(mut expr: &Expr) -> &Expr {
    while let ExprKind::Cast { operand } = &expr.kind {
        if operand.ty != expr.ty {
            break;
        }
        expr = &**operand;
    }
    expr
}

impl AsmLowering<'_> {
    /// Evaluate `condition` and jump to `label` when it is zero.
    fn branch_if_false(&mut self, condition: &Expr, label: &str) -> CompileResult<()> {
        if !matches!(condition.ty, ValueType::Bool | ValueType::I64) {
            return Err(CompileError::DispatchMiss { backend: Self::BACKEND, node: "condition" });
        }
        let mut loc = self.factory.allocate(Volatility::Volatile, condition.ty)?;
        lower_expr(self, condition, &mut loc)?;
        self.emit(loc.compare_immediate(0)?);
        drop(loc);
        self.emit_line(Line::op1(Mnemonic::J(Cond::E), Operand::label(label)));
        Ok(())
    }

    /// Leave the type pointer word the assigned string should own in R11.
    fn type_pointer_source(
        &mut self,
        value: &Expr,
        source_index: Option<&StorageLocation>,
    ) -> CompileResult<()> {
        let source = strip_identity_casts(value);
        if is_fresh_string(value, self.library) {
            return self.take_temp_root();
        }
        match (&source.kind, source_index) {
            (ExprKind::Identifier(name), _) => {
                let tp = self.type_pointer(name)?;
                self.emit_line(Line::op2(Mnemonic::Mov, Operand::Reg(SCRATCH), Operand::sym(tp)));
            }
            (ExprKind::ArrayElement { name, .. }, Some(index)) => {
                let tp = self.type_pointer(name)?;
                let address = self.element_address(index, &tp);
                self.emit(address);
                let element = self.element();
                self.emit_line(Line::op2(Mnemonic::Mov, Operand::Reg(SCRATCH), Operand::Mem(element)));
            }
            // literals are never collected
            _ => self.emit_line(Line::op2(Mnemonic::Mov, Operand::Reg(SCRATCH), Operand::Imm(0))),
        }
        Ok(())
    }

    fn type_pointer(&self, name: &str) -> CompileResult<String> {
        let variable = self.symbols.variable(name)?;
        variable.type_pointer.clone().ok_or_else(|| CompileError::UnsupportedOperation {
            operation: "type pointer",
            location: variable.symbol.clone(),
        })
    }
}

impl StmtLowering for AsmLowering<'_> {
    fn assign(&mut self, target: &LValue, value: &Expr) -> CompileResult<()> {
        let variable = self.symbols.variable(target.name())?.clone();

        let target_index = match target {
            LValue::Element { index, .. } => {
                let mut loc = self.fresh_location(ValueType::I64)?;
                lower_converted(self, index, ValueType::I64, &mut loc)?;
                Some(loc)
            }
            LValue::Variable(_) => None,
        };

        let mut value_loc = self.factory.allocate(Volatility::Volatile, variable.ty)?;
        let source = strip_identity_casts(value);
        let source_index = match &source.kind {
            // keep the index for the type pointer copy
            ExprKind::ArrayElement { name, index } if variable.ty == ValueType::Str => {
                let symbol = self.symbols.variable(name)?.symbol.clone();
                let mut loc = self.fresh_location(ValueType::I64)?;
                lower_converted(self, index, ValueType::I64, &mut loc)?;
                let address = self.element_address(&loc, &symbol);
                self.emit(address);
                let element = self.element();
                self.emit(value_loc.load_memory(element));
                Some(loc)
            }
            _ => {
                lower_converted(self, value, variable.ty, &mut value_loc)?;
                None
            }
        };

        match &target_index {
            Some(index) => {
                let address = self.element_address(index, &variable.symbol);
                self.emit(address);
                let element = self.element();
                self.emit(value_loc.store_memory(element));
            }
            None => self.emit(value_loc.store_memory(Memory::symbol(variable.symbol.as_str()))),
        }

        if let Some(tp) = &variable.type_pointer {
            self.type_pointer_source(value, source_index.as_ref())?;
            let slot = match &target_index {
                Some(index) => {
                    let address = self.element_address(index, tp);
                    self.emit(address);
                    Operand::Mem(self.element())
                }
                None => Operand::sym(tp.as_str()),
            };
            self.emit_line(Line::op2(Mnemonic::Mov, slot, Operand::Reg(SCRATCH)));
        }

        drop(source_index);
        drop(value_loc);
        drop(target_index);
        Ok(())
    }

    fn print(&mut self, values: &[Expr]) -> CompileResult<()> {
        let mut format: String = values.iter().map(|v| format_directive(v.ty)).collect();
        format.push('\n');
        let format = self.symbols.string_constant(&format);

        let mut locations = Vec::with_capacity(values.len());
        for value in values {
            let mut loc = self.fresh_location(value.ty)?;
            lower_expr(self, value, &mut loc)?;
            locations.push(loc);
        }
        let mut args = vec![ArgSource::Address(format)];
        args.extend(locations.iter().map(ArgSource::Location));
        self.emit_call(Callee::Import(&runtime::PRINTF), &args, None)?;
        drop(args);

        for (value, loc) in values.iter().zip(&locations).rev() {
            if is_fresh_string(value, self.library) {
                self.consume_string(loc)?;
            }
        }
        while let Some(loc) = locations.pop() {
            drop(loc);
        }
        Ok(())
    }

    fn if_else(
        &mut self,
        condition: &Expr,
        then_branch: &[Stmt],
        else_branch: &[Stmt],
    ) -> CompileResult<()> {
        let else_label = self.new_label("else");
        let end = self.new_label("endif");
        self.branch_if_false(condition, &else_label)?;
        lower_block(self, then_branch)?;
        self.emit_line(Line::op1(Mnemonic::Jmp, Operand::label(end.as_str())));
        self.emit_line(Line::label(else_label));
        lower_block(self, else_branch)?;
        self.emit_line(Line::label(end));
        Ok(())
    }

    fn while_loop(&mut self, condition: &Expr, body: &[Stmt]) -> CompileResult<()> {
        let start = self.new_label("while");
        let end = self.new_label("wend");
        self.emit_line(Line::label(start.as_str()));
        self.branch_if_false(condition, &end)?;
        lower_block(self, body)?;
        self.emit_line(Line::op1(Mnemonic::Jmp, Operand::label(start)));
        self.emit_line(Line::label(end));
        Ok(())
    }

    fn expression(&mut self, expr: &Expr) -> CompileResult<()> {
        let mut loc = self.factory.allocate(Volatility::Volatile, expr.ty)?;
        lower_expr(self, expr, &mut loc)?;
        if is_fresh_string(expr, self.library) {
            self.consume_string(&loc)?;
        }
        Ok(())
    }

    fn annotate(&mut self, stmt: &Stmt) {
        if !self.config.annotate {
            return;
        }
        let text = match stmt {
            Stmt::Assign { target, .. } => format!("{} {}", stmt.node_name(), target.name()),
            _ => stmt.node_name().to_string(),
        };
        self.emit_line(Line::comment(text));
    }
}
