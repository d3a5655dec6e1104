//! Expression generators: literals, variables, operators and casts.

use log::trace;

use super::{AsmLowering, ArgSource, Callee};
use crate::ast::{ArithOp, Expr, LogicalOp, RelOp, UnaryOp, ValueType};
use crate::core::error::{CompileError, CompileResult};
use crate::core::lowering::{is_fresh_string, lower_converted, lower_expr, ExprLowering};
use crate::core::register_file::AsmReg;
use crate::core::symbols::{runtime, Library};
use crate::x64::asm::{transfer, Cond, Line, Memory, Mnemonic, Operand};
use crate::x64::registers::{is_xmm, SCRATCH, SCRATCH_XMM};
use crate::x64::storage::{StorageLocation, Volatility};

/// Bytes reserved for the text of a converted number; fits any `%f` rendering of a double.
const NUMBER_TEXT_CAPACITY: i64 = 328;

impl ExprLowering for AsmLowering<'_> {
    type Location = StorageLocation;
    const BACKEND: &'static str = "x64";

    fn library(&self) -> &Library {
        self.library
    }

    fn fresh_location(&mut self, ty: ValueType) -> CompileResult<StorageLocation> {
        self.factory.allocate(Volatility::NonVolatile, ty)
    }

    fn int_literal(&mut self, value: i64, target: &mut StorageLocation) -> CompileResult<()> {
        self.emit(target.load_immediate(value));
        Ok(())
    }

    fn float_literal(&mut self, value: f64, target: &mut StorageLocation) -> CompileResult<()> {
        let label = self.symbols.float_constant(value);
        self.emit(target.load_memory(Memory::symbol(label)));
        Ok(())
    }

    fn string_literal(&mut self, value: &str, target: &mut StorageLocation) -> CompileResult<()> {
        let label = self.symbols.string_constant(value);
        self.emit(target.load_address(&label));
        Ok(())
    }

    fn bool_literal(&mut self, value: bool, target: &mut StorageLocation) -> CompileResult<()> {
        self.emit(target.load_immediate(if value { -1 } else { 0 }));
        Ok(())
    }

    fn identifier(
        &mut self,
        name: &str,
        _ty: ValueType,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        let symbol = self.symbols.variable(name)?.symbol.clone();
        self.emit(target.load_memory(Memory::symbol(symbol)));
        Ok(())
    }

    fn array_element(
        &mut self,
        name: &str,
        index: &Expr,
        _ty: ValueType,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        let symbol = self.symbols.variable(name)?.symbol.clone();
        let mut index_loc = self.fresh_location(ValueType::I64)?;
        lower_converted(self, index, ValueType::I64, &mut index_loc)?;
        let address = self.element_address(&index_loc, &symbol);
        self.emit(address);
        let element = self.element();
        self.emit(target.load_memory(element));
        Ok(())
    }

    fn unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        lower_expr(self, operand, target)?;
        let lines = match op {
            UnaryOp::Negate if operand.ty.is_float() => {
                let mask = self.symbols.sign_mask();
                target.negate(Some(&mask))?
            }
            UnaryOp::Negate => target.negate(None)?,
            UnaryOp::Not => target.complement()?,
        };
        self.emit(lines);
        Ok(())
    }

    fn apply_arithmetic(
        &mut self,
        op: ArithOp,
        _ty: ValueType,
        target: &mut StorageLocation,
        right: &StorageLocation,
    ) -> CompileResult<()> {
        let lines = target.arithmetic(op, right)?;
        self.emit(lines);
        Ok(())
    }

    fn concatenate(
        &mut self,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        self.lower_concatenation(left, right, target)
    }

    fn relational(
        &mut self,
        op: RelOp,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        self.lower_relational(op, left, right, target)
    }

    fn logical(
        &mut self,
        op: LogicalOp,
        ty: ValueType,
        left: &Expr,
        right: &Expr,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        self.lower_logical(op, ty, left, right, target)
    }

    fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        _ty: ValueType,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        self.lower_call(name, args, target)
    }

    fn convert(
        &mut self,
        operand: &Expr,
        source: &StorageLocation,
        to: ValueType,
        target: &mut StorageLocation,
    ) -> CompileResult<()> {
        use ValueType::{Bool, Str, F64, I64};
        let from = operand.ty;
        trace!("convert {} -> {}", from, to);
        match (from, to) {
            _ if from == to => self.emit(target.move_from(source)),
            (I64 | Bool, F64) => {
                let lines = convert_into(target, Mnemonic::Cvtsi2sd, source.operand(), SCRATCH_XMM, true);
                self.emit(lines);
            }
            (F64, I64) => {
                let lines = convert_into(target, Mnemonic::Cvttsd2si, source.operand(), SCRATCH, false);
                self.emit(lines);
            }
            (Bool, I64) => self.emit(target.move_from(source)),
            (I64, Bool) => {
                self.emit(source.compare_immediate(0)?);
                self.materialize(Cond::Ne, target)?;
            }
            (I64 | F64 | Bool, Str) => {
                self.emit_call(
                    Callee::Import(&runtime::MALLOC),
                    &[ArgSource::Immediate(NUMBER_TEXT_CAPACITY)],
                    Some(&*target),
                )?;
                let format = self.symbols.string_constant(if from == F64 { "%f" } else { "%lld" });
                self.emit_call(
                    Callee::Import(&runtime::SPRINTF),
                    &[
                        ArgSource::Location(target),
                        ArgSource::Address(format),
                        ArgSource::Location(source),
                    ],
                    None,
                )?;
                self.register_string(target)?;
            }
            (Str, I64 | F64) => {
                let function = if to == F64 { runtime::ATOF } else { runtime::ATOI64 };
                self.emit_call(
                    Callee::Import(&function),
                    &[ArgSource::Location(source)],
                    Some(&*target),
                )?;
                if is_fresh_string(operand, self.library) {
                    self.consume_string(source)?;
                }
            }
            _ => return Err(CompileError::UnsupportedCast { from, to }),
        }
        Ok(())
    }
}

/// Emit a conversion whose destination must be a register of the other class than `src`.
fn convert_into(
    target: &StorageLocation,
    op: Mnemonic,
    src: Operand,
    scratch: AsmReg,
    to_xmm: bool,
) -> Vec<Line> {
    match target.register() {
        Some(reg) if is_xmm(reg) == to_xmm => vec![Line::op2(op, Operand::Reg(reg), src)],
        _ => {
            let mut lines = vec![Line::op2(op, Operand::Reg(scratch), src)];
            lines.extend(transfer(&target.operand(), &Operand::Reg(scratch)));
            lines
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{Expr, UnaryOp, ValueType, VarDecl};
    use crate::core::config::CompilerConfig;
    use crate::core::error::CompileError;
    use crate::core::lowering::lower_expr;
    use crate::core::symbols::{Library, SymbolTable};
    use crate::x64::asm::render_lines;
    use crate::x64::lower::AsmLowering;
    use crate::x64::storage::{StorageFactory, Volatility};

    fn lower(symbols: &mut SymbolTable, expr: &Expr) -> Result<String, CompileError> {
        let library = Library::standard();
        let config = CompilerConfig::default();
        let mut lowering = AsmLowering::new(&library, symbols, StorageFactory::new(), &config);
        let mut target = lowering.factory().allocate(Volatility::Volatile, expr.ty)?;
        lower_expr(&mut lowering, expr, &mut target)?;
        let text = render_lines(lowering.lines());
        drop(target);
        Ok(text)
    }

    #[test]
    fn test_float_literals_are_deduplicated() {
        let mut symbols = SymbolTable::new();
        let expr = Expr::arith(crate::ast::ArithOp::Mul, Expr::float(1.5), Expr::float(1.5));
        let text = lower(&mut symbols, &expr).unwrap();
        assert_eq!(text, "    movsd xmm1, qword [_float_0]\n    movsd xmm6, qword [_float_0]\n    mulsd xmm1, xmm6\n");
        assert_eq!(symbols.constants().len(), 1);
    }

    #[test]
    fn test_float_negation_interns_the_sign_mask() {
        let mut symbols = SymbolTable::new();
        let expr = Expr::unary(UnaryOp::Negate, Expr::float(2.0));
        let text = lower(&mut symbols, &expr).unwrap();
        assert!(text.ends_with("    movsd xmm5, qword [_sign_mask]\n    xorpd xmm1, xmm5\n"));

        let expr = Expr::unary(UnaryOp::Not, Expr::boolean(true));
        assert_eq!(lower(&mut symbols, &expr).unwrap(), "    mov rcx, -1\n    not rcx\n");
    }

    #[test]
    fn test_array_element_address() {
        let mut symbols = SymbolTable::new();
        symbols.declare(&VarDecl::array("n%", ValueType::I64, 4));
        let expr = Expr::element("n%", ValueType::I64, Expr::int(2));
        let text = lower(&mut symbols, &expr).unwrap();
        assert_eq!(
            text,
            "    mov rbx, 2\n    mov rax, rbx\n    shl rax, 3\n    lea rdx, [v_n_i]\n    add rax, rdx\n    mov rcx, qword [rax]\n"
        );
    }

    #[test]
    fn test_numeric_casts() {
        let mut symbols = SymbolTable::new();
        let expr = Expr::cast(ValueType::I64, Expr::float(2.75));
        let text = lower(&mut symbols, &expr).unwrap();
        assert!(text.ends_with("    cvttsd2si rcx, xmm6\n"));

        let expr = Expr::cast(ValueType::Bool, Expr::int(7));
        let text = lower(&mut symbols, &expr).unwrap();
        assert!(text.contains("    cmp rbx, 0\n    jne @f\n"));
    }

    #[test]
    fn test_number_to_string_goes_through_sprintf() {
        let mut symbols = SymbolTable::new();
        let expr = Expr::cast(ValueType::Str, Expr::float(0.5));
        let text = lower(&mut symbols, &expr).unwrap();
        assert!(text.contains("call [malloc]"));
        assert!(text.contains("call [sprintf]"));
        assert!(text.contains("call _gc_register"));
        // the variadic double is mirrored into its integer register
        assert!(text.contains("    movq r8, xmm2\n"));
    }

    #[test]
    fn test_unsupported_cast() {
        let mut symbols = SymbolTable::new();
        let expr = Expr::cast(ValueType::Bool, Expr::float(1.0));
        assert_eq!(
            lower(&mut symbols, &expr).unwrap_err(),
            CompileError::UnsupportedCast { from: ValueType::F64, to: ValueType::Bool }
        );
    }
}
