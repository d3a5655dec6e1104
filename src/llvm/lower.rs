// This module implements the shared lowering traits for the SSA backend. Every expression
// generator leaves an immutable typed value in an SsaSlot, so there is no storage to manage:
// fresh locations are empty slots and release is a no-op. Program variables live in globals and
// are accessed with load/store, which keeps the output free of phi nodes except where
// short-circuit logic merges two paths.
//
// Booleans are `i1` with true = 1. Casting a boolean to an integer zero-extends, so a true
// condition prints as 1 here while the x64 backend prints -1. Short-circuit AND/OR branch on
// whether the left operand already decides the result and merge both paths with a phi whose
// incoming block is the block that was current when each path ended, since the right operand
// may itself open new blocks.
//
// There is no collector on this path. Transient strings (concatenation operands, call
// arguments, printed values) are freed right after use exactly as on x64, strings stored in
// variables are left to the process exit.

//! SSA generators for expressions and statements.

use log::trace;

use super::ir::{variadic_type, IrLine, IrType, Typed, Value};
use crate::ast::{ArithOp, Expr, LValue, LogicalOp, RelOp, Stmt, UnaryOp, ValueType};
use crate::core::config::CompilerConfig;
use crate::core::error::{CompileError, CompileResult};
use crate::core::lowering::{
    format_directive, is_fresh_string, lower_block, lower_converted, lower_expr, ExprLowering,
    StmtLowering,
};
use crate::core::session::LoweringStats;
use crate::core::symbols::{runtime, FunctionDescriptor, Library, ReturnKind, SymbolTable, VariableSymbol};

/// Buffer size for number to string conversions; fits any `%f` of a double.
const NUMBER_TEXT_CAPACITY: i64 = 328;

/// The value an SSA generator produced, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SsaSlot(Option<Typed>);

impl SsaSlot {
    pub fn new(value: Typed) -> Self {
        Self(Some(value))
    }

    pub fn get(&self) -> CompileResult<&Typed> {
        self.0.as_ref().ok_or_else(|| CompileError::UnsupportedOperation {
            operation: "read",
            location: "an empty SSA slot".to_string(),
        })
    }

    fn set(&mut self, ty: IrType, value: Value) {
        self.0 = Some(Typed::new(ty, value));
    }
}

/// Lowering state of the `main` body.
pub struct SsaLowering<'a> {
    library: &'a Library,
    symbols: &'a mut SymbolTable,
    config: &'a CompilerConfig,
    lines: Vec<IrLine>,
    next_value: usize,
    next_label: usize,
    /// Label of the block instructions are currently appended to.
    block: String,
    stats: LoweringStats,
}

impl<'a> SsaLowering<'a> {
    pub fn new(library: &'a Library, symbols: &'a mut SymbolTable, config: &'a CompilerConfig) -> Self {
        Self {
            library,
            symbols,
            config,
            lines: vec![IrLine::Label("entry".to_string())],
            next_value: 0,
            next_label: 0,
            block: "entry".to_string(),
            stats: LoweringStats::default(),
        }
    }

    pub fn lines(&self) -> &[IrLine] {
        &self.lines
    }

    /// Terminate the body with `ret i32 code`.
    pub fn finish(mut self, code: i32) -> (Vec<IrLine>, LoweringStats) {
        self.effect("ret", format!("i32 {code}"));
        (self.lines, self.stats)
    }

    fn inst(&mut self, opcode: &'static str, operands: String) -> Value {
        let result = format!("t{}", self.next_value);
        self.next_value += 1;
        self.lines.push(IrLine::Inst { result: Some(result.clone()), opcode, operands });
        Value::Local(result)
    }

    fn effect(&mut self, opcode: &'static str, operands: String) {
        self.lines.push(IrLine::Inst { result: None, opcode, operands });
    }

    fn new_label_id(&mut self) -> usize {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    fn start_block(&mut self, label: String) {
        self.lines.push(IrLine::Label(label.clone()));
        self.block = label;
    }

    fn branch(&mut self, label: &str) {
        self.effect("br", format!("label %{label}"));
    }

    fn branch_if(&mut self, condition: &Value, then_label: &str, else_label: &str) {
        self.effect("br", format!("i1 {condition}, label %{then_label}, label %{else_label}"));
    }

    /// Lower `expr` converted to `ty` and return its value.
    fn operand(&mut self, expr: &Expr, ty: ValueType) -> CompileResult<Typed> {
        let mut slot = SsaSlot::default();
        lower_converted(self, expr, ty, &mut slot)?;
        slot.get().cloned()
    }

    /// `i1` value of a branch condition.
    fn condition(&mut self, expr: &Expr) -> CompileResult<Value> {
        match expr.ty {
            ValueType::Bool => Ok(self.operand(expr, ValueType::Bool)?.value),
            ValueType::I64 => {
                let value = self.operand(expr, ValueType::I64)?;
                Ok(self.inst("icmp", format!("ne {value}, 0")))
            }
            _ => Err(CompileError::DispatchMiss { backend: Self::BACKEND, node: "condition" }),
        }
    }

    /// Emit a call and record the dependency. Returns the raw result.
    fn call_function(&mut self, function: &FunctionDescriptor, args: &[Typed]) -> Option<Value> {
        self.symbols.add_dependency(function);
        self.stats.calls += 1;
        let args: Vec<String> = args.iter().map(ToString::to_string).collect();
        let callee = if function.variadic {
            variadic_type(function)
        } else {
            IrType::returned(function.ret).to_string()
        };
        let operands = format!("{} @{}({})", callee, function.name, args.join(", "));
        trace!("llvm: call {}", function.name);
        match function.ret {
            ReturnKind::Void => {
                self.effect("call", operands);
                None
            }
            _ => Some(self.inst("call", operands)),
        }
    }

    fn call_value(&mut self, function: &FunctionDescriptor, args: &[Typed]) -> CompileResult<Value> {
        self.call_function(function, args).ok_or_else(|| CompileError::UnsupportedOperation {
            operation: "using the result of a void call",
            location: function.name.to_string(),
        })
    }

    /// Free the buffer behind `value` if evaluating `expr` allocated it.
    fn free_if_fresh(&mut self, expr: &Expr, value: &Typed) {
        if is_fresh_string(expr, self.library) {
            self.call_function(&runtime::FREE, std::slice::from_ref(value));
            self.stats.explicit_frees += 1;
        }
    }

    fn element_pointer(&mut self, symbol: &VariableSymbol, index: &Expr) -> CompileResult<Value> {
        let length = symbol.length.ok_or_else(|| CompileError::UnsupportedOperation {
            operation: "indexing",
            location: format!("scalar {}", symbol.name),
        })?;
        let index = self.operand(index, ValueType::I64)?;
        Ok(self.inst(
            "getelementptr",
            format!(
                "inbounds [{} x {}], ptr @{}, i64 0, {}",
                length,
                IrType::of(symbol.ty),
                symbol.symbol,
                index
            ),
        ))
    }

    /// Widen a printed or formatted value to what `printf` expects.
    fn vararg(&mut self, value: Typed) -> Typed {
        if value.ty == IrType::I1 {
            let widened = self.inst("zext", format!("{value} to i64"));
            Typed::new(IrType::I64, widened)
        } else {
            value
        }
    }

    fn annotation(&mut self, text: String) {
        if self.config.annotate {
            self.lines.push(IrLine::Comment(text));
        }
    }
}

fn int_predicate(op: RelOp) -> &'static str {
    match op {
        RelOp::Eq => "eq",
        RelOp::Ne => "ne",
        RelOp::Lt => "slt",
        RelOp::Le => "sle",
        RelOp::Gt => "sgt",
        RelOp::Ge => "sge",
    }
}

/// Ordered predicates, so a comparison involving NaN is false, except `<>` which is then true.
fn float_predicate(op: RelOp) -> &'static str {
    match op {
        RelOp::Eq => "oeq",
        RelOp::Ne => "une",
        RelOp::Lt => "olt",
        RelOp::Le => "ole",
        RelOp::Gt => "ogt",
        RelOp::Ge => "oge",
    }
}

impl ExprLowering for SsaLowering<'_> {
    type Location = SsaSlot;
    const BACKEND: &'static str = "llvm";

    fn library(&self) -> &Library {
        self.library
    }

    fn fresh_location(&mut self, _ty: ValueType) -> CompileResult<SsaSlot> {
        Ok(SsaSlot::default())
    }

    fn int_literal(&mut self, value: i64, target: &mut SsaSlot) -> CompileResult<()> {
        target.set(IrType::I64, Value::Int(value));
        Ok(())
    }

    fn float_literal(&mut self, value: f64, target: &mut SsaSlot) -> CompileResult<()> {
        target.set(IrType::Double, Value::Float(value));
        Ok(())
    }

    fn string_literal(&mut self, value: &str, target: &mut SsaSlot) -> CompileResult<()> {
        let label = self.symbols.string_constant(value);
        target.set(IrType::Ptr, Value::Global(label));
        Ok(())
    }

    fn bool_literal(&mut self, value: bool, target: &mut SsaSlot) -> CompileResult<()> {
        target.set(IrType::I1, Value::Bool(value));
        Ok(())
    }

    fn identifier(&mut self, name: &str, ty: ValueType, target: &mut SsaSlot) -> CompileResult<()> {
        let symbol = self.symbols.variable(name)?.symbol.clone();
        let ir = IrType::of(ty);
        let value = self.inst("load", format!("{ir}, ptr @{symbol}"));
        target.set(ir, value);
        Ok(())
    }

    fn array_element(
        &mut self,
        name: &str,
        index: &Expr,
        ty: ValueType,
        target: &mut SsaSlot,
    ) -> CompileResult<()> {
        let symbol = self.symbols.variable(name)?.clone();
        let pointer = self.element_pointer(&symbol, index)?;
        let ir = IrType::of(ty);
        let value = self.inst("load", format!("{ir}, ptr {pointer}"));
        target.set(ir, value);
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, target: &mut SsaSlot) -> CompileResult<()> {
        let value = self.operand(operand, operand.ty)?;
        let ty = value.ty;
        let result = match (op, ty) {
            (UnaryOp::Negate, IrType::Double) => self.inst("fneg", value.to_string()),
            (UnaryOp::Negate, _) => self.inst("sub", format!("{ty} 0, {}", value.value)),
            (UnaryOp::Not, IrType::I1) => self.inst("xor", format!("{value}, true")),
            (UnaryOp::Not, _) => self.inst("xor", format!("{value}, -1")),
        };
        target.set(ty, result);
        Ok(())
    }

    fn apply_arithmetic(
        &mut self,
        op: ArithOp,
        ty: ValueType,
        target: &mut SsaSlot,
        right: &SsaSlot,
    ) -> CompileResult<()> {
        let left = target.get()?.clone();
        let right = right.get()?;
        let float = ty.is_float();
        let opcode = match op {
            ArithOp::Add if float => "fadd",
            ArithOp::Sub if float => "fsub",
            ArithOp::Mul if float => "fmul",
            ArithOp::Div if float => "fdiv",
            ArithOp::Mod if float => "frem",
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "sdiv",
            ArithOp::Mod => "srem",
        };
        let result = self.inst(opcode, format!("{left}, {}", right.value));
        target.set(left.ty, result);
        Ok(())
    }

    fn concatenate(&mut self, left: &Expr, right: &Expr, target: &mut SsaSlot) -> CompileResult<()> {
        let l = self.operand(left, ValueType::Str)?;
        let r = self.operand(right, ValueType::Str)?;
        let left_len = self.call_value(&runtime::STRLEN, std::slice::from_ref(&l))?;
        let right_len = self.call_value(&runtime::STRLEN, std::slice::from_ref(&r))?;
        let sum = self.inst("add", format!("i64 {left_len}, {right_len}"));
        let size = self.inst("add", format!("i64 {sum}, 1"));
        let buffer = self.call_value(&runtime::MALLOC, &[Typed::new(IrType::I64, size)])?;
        let buffer = Typed::new(IrType::Ptr, buffer);
        self.call_function(&runtime::STRCPY, &[buffer.clone(), l.clone()]);
        self.call_function(&runtime::STRCAT, &[buffer.clone(), r.clone()]);
        self.free_if_fresh(right, &r);
        self.free_if_fresh(left, &l);
        target.0 = Some(buffer);
        Ok(())
    }

    fn relational(
        &mut self,
        op: RelOp,
        left: &Expr,
        right: &Expr,
        target: &mut SsaSlot,
    ) -> CompileResult<()> {
        use ValueType::{Bool, Str, F64, I64};
        let result = match (left.ty, right.ty) {
            (Str, Str) => {
                let l = self.operand(left, Str)?;
                let r = self.operand(right, Str)?;
                let order = self.call_value(&runtime::STRCMP, &[l.clone(), r.clone()])?;
                self.free_if_fresh(right, &r);
                self.free_if_fresh(left, &l);
                self.inst("icmp", format!("{} i32 {order}, 0", int_predicate(op)))
            }
            (F64, _) | (_, F64) => {
                let l = self.operand(left, F64)?;
                let r = self.operand(right, F64)?;
                self.inst("fcmp", format!("{} {l}, {}", float_predicate(op), r.value))
            }
            (Bool, Bool) => {
                let l = self.operand(left, Bool)?;
                let r = self.operand(right, Bool)?;
                self.inst("icmp", format!("{} {l}, {}", int_predicate(op), r.value))
            }
            _ => {
                let l = self.operand(left, I64)?;
                let r = self.operand(right, I64)?;
                self.inst("icmp", format!("{} {l}, {}", int_predicate(op), r.value))
            }
        };
        target.set(IrType::I1, result);
        Ok(())
    }

    fn logical(
        &mut self,
        op: LogicalOp,
        ty: ValueType,
        left: &Expr,
        right: &Expr,
        target: &mut SsaSlot,
    ) -> CompileResult<()> {
        let ir = IrType::of(ty);
        let l = self.operand(left, ty)?;
        let opcode = match op {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Xor => {
                let r = self.operand(right, ty)?;
                let result = self.inst("xor", format!("{l}, {}", r.value));
                target.set(ir, result);
                return Ok(());
            }
        };

        // i1 value that is true when the left operand alone decides the result.
        let decided = match (op, ty) {
            (LogicalOp::Or, ValueType::Bool) => l.value.clone(),
            (LogicalOp::Or, _) => self.inst("icmp", format!("eq {l}, -1")),
            (_, ValueType::Bool) => self.inst("icmp", format!("eq {l}, false")),
            _ => self.inst("icmp", format!("eq {l}, 0")),
        };
        let id = self.new_label_id();
        let rhs_label = format!("rhs{id}");
        let end_label = format!("logic_end{id}");
        let from = self.block.clone();
        self.branch_if(&decided, &end_label, &rhs_label);

        self.start_block(rhs_label);
        let r = self.operand(right, ty)?;
        let combined = self.inst(opcode, format!("{l}, {}", r.value));
        let rhs_end = self.block.clone();
        self.branch(&end_label);

        self.start_block(end_label);
        let result = self.inst(
            "phi",
            format!("{ir} [ {}, %{from} ], [ {combined}, %{rhs_end} ]", l.value),
        );
        self.stats.short_circuits += 1;
        target.set(ir, result);
        Ok(())
    }

    fn call(&mut self, name: &str, args: &[Expr], _ty: ValueType, target: &mut SsaSlot) -> CompileResult<()> {
        let library = self.library;
        let arg_types: Vec<ValueType> = args.iter().map(|arg| arg.ty).collect();
        let function = *library.resolve(name, &arg_types)?;
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.operand(arg, arg.ty)?;
            values.push(value);
        }
        let result = self.call_function(&function, &values);
        for (arg, value) in args.iter().zip(&values).rev() {
            self.free_if_fresh(arg, value);
        }
        match (function.ret, result) {
            (ReturnKind::Int32, Some(raw)) => {
                let widened = self.inst("sext", format!("i32 {raw} to i64"));
                target.set(IrType::I64, widened);
            }
            (ReturnKind::Value(ty), Some(value)) => target.set(IrType::of(ty), value),
            _ => target.0 = None,
        }
        Ok(())
    }

    fn convert(
        &mut self,
        operand: &Expr,
        source: &SsaSlot,
        to: ValueType,
        target: &mut SsaSlot,
    ) -> CompileResult<()> {
        use ValueType::{Bool, Str, F64, I64};
        let from = operand.ty;
        let value = source.get()?.clone();
        trace!("llvm: convert {} -> {}", from, to);
        match (from, to) {
            _ if from == to => target.0 = Some(value),
            (I64, F64) => {
                let result = self.inst("sitofp", format!("{value} to double"));
                target.set(IrType::Double, result);
            }
            (Bool, F64) => {
                let result = self.inst("uitofp", format!("{value} to double"));
                target.set(IrType::Double, result);
            }
            (F64, I64) => {
                let result = self.inst("fptosi", format!("{value} to i64"));
                target.set(IrType::I64, result);
            }
            (Bool, I64) => {
                let result = self.inst("zext", format!("{value} to i64"));
                target.set(IrType::I64, result);
            }
            (I64, Bool) => {
                let result = self.inst("icmp", format!("ne {value}, 0"));
                target.set(IrType::I1, result);
            }
            (I64 | F64 | Bool, Str) => {
                let capacity = Typed::new(IrType::I64, Value::Int(NUMBER_TEXT_CAPACITY));
                let buffer = self.call_value(&runtime::MALLOC, &[capacity])?;
                let buffer = Typed::new(IrType::Ptr, buffer);
                let format = self.symbols.string_constant(if from == F64 { "%f" } else { "%lld" });
                let value = self.vararg(value);
                self.call_function(
                    &runtime::SPRINTF,
                    &[buffer.clone(), Typed::new(IrType::Ptr, Value::Global(format)), value],
                );
                target.0 = Some(buffer);
            }
            (Str, I64 | F64) => {
                let function = if to == F64 { runtime::ATOF } else { runtime::ATOI64 };
                let result = self.call_value(&function, std::slice::from_ref(&value))?;
                self.free_if_fresh(operand, &value);
                target.set(IrType::of(to), result);
            }
            _ => return Err(CompileError::UnsupportedCast { from, to }),
        }
        Ok(())
    }
}

impl StmtLowering for SsaLowering<'_> {
    fn assign(&mut self, target: &LValue, value: &Expr) -> CompileResult<()> {
        let symbol = self.symbols.variable(target.name())?.clone();
        let pointer = match target {
            LValue::Variable(_) => Value::Global(symbol.symbol.clone()),
            LValue::Element { index, .. } => self.element_pointer(&symbol, index)?,
        };
        let value = self.operand(value, symbol.ty)?;
        self.effect("store", format!("{value}, ptr {pointer}"));
        Ok(())
    }

    fn print(&mut self, values: &[Expr]) -> CompileResult<()> {
        let mut format = String::new();
        let mut printed = Vec::with_capacity(values.len());
        for value in values {
            format.push_str(format_directive(value.ty));
            printed.push(self.operand(value, value.ty)?);
        }
        format.push('\n');
        let label = self.symbols.string_constant(&format);

        let mut args = vec![Typed::new(IrType::Ptr, Value::Global(label))];
        for value in &printed {
            let arg = self.vararg(value.clone());
            args.push(arg);
        }
        self.call_function(&runtime::PRINTF, &args);
        for (expr, value) in values.iter().zip(&printed).rev() {
            self.free_if_fresh(expr, value);
        }
        Ok(())
    }

    fn if_else(&mut self, condition: &Expr, then_branch: &[Stmt], else_branch: &[Stmt]) -> CompileResult<()> {
        let id = self.new_label_id();
        let then_label = format!("then{id}");
        let else_label = format!("else{id}");
        let end_label = format!("endif{id}");

        let condition = self.condition(condition)?;
        self.branch_if(&condition, &then_label, &else_label);
        self.start_block(then_label);
        lower_block(self, then_branch)?;
        self.branch(&end_label);
        self.start_block(else_label);
        lower_block(self, else_branch)?;
        self.branch(&end_label);
        self.start_block(end_label);
        Ok(())
    }

    fn while_loop(&mut self, condition: &Expr, body: &[Stmt]) -> CompileResult<()> {
        let id = self.new_label_id();
        let head = format!("while{id}");
        let body_label = format!("body{id}");
        let end_label = format!("wend{id}");

        self.branch(&head);
        self.start_block(head.clone());
        let condition = self.condition(condition)?;
        self.branch_if(&condition, &body_label, &end_label);
        self.start_block(body_label);
        lower_block(self, body)?;
        self.branch(&head);
        self.start_block(end_label);
        Ok(())
    }

    fn expression(&mut self, expr: &Expr) -> CompileResult<()> {
        let mut slot = SsaSlot::default();
        lower_expr(self, expr, &mut slot)?;
        if let Ok(value) = slot.get() {
            let value = value.clone();
            self.free_if_fresh(expr, &value);
        }
        Ok(())
    }

    fn annotate(&mut self, stmt: &Stmt) {
        let text = match stmt {
            Stmt::Assign { target, .. } => format!("assign {}", target.name()),
            other => other.node_name().to_string(),
        };
        self.annotation(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarDecl;

    struct Fixture {
        library: Library,
        symbols: SymbolTable,
        config: CompilerConfig,
    }

    impl Fixture {
        fn new(variables: &[VarDecl]) -> Self {
            let mut symbols = SymbolTable::new();
            for decl in variables {
                symbols.declare(decl);
            }
            Self { library: Library::standard(), symbols, config: CompilerConfig::default() }
        }

        fn lowering(&mut self) -> SsaLowering<'_> {
            SsaLowering::new(&self.library, &mut self.symbols, &self.config)
        }
    }

    fn render(lines: &[IrLine]) -> String {
        lines.iter().map(|line| format!("{line}\n")).collect()
    }

    #[test]
    fn test_relational_result_is_i1() {
        let mut fixture = Fixture::new(&[VarDecl::scalar("a", ValueType::I64)]);
        let mut l = fixture.lowering();
        let expr = Expr::relational(RelOp::Lt, Expr::ident("a", ValueType::I64), Expr::int(3));
        let mut slot = SsaSlot::default();
        lower_expr(&mut l, &expr, &mut slot).unwrap();

        assert_eq!(slot.get().unwrap().ty, IrType::I1);
        assert_eq!(
            render(l.lines()),
            "entry:\n  %t0 = load i64, ptr @v_a\n  %t1 = icmp slt i64 %t0, 3\n"
        );
    }

    #[test]
    fn test_mixed_comparison_converts_integer_side() {
        let mut fixture = Fixture::new(&[VarDecl::scalar("n", ValueType::I64)]);
        let mut l = fixture.lowering();
        let expr = Expr::relational(RelOp::Ne, Expr::ident("n", ValueType::I64), Expr::float(0.5));
        let mut slot = SsaSlot::default();
        lower_expr(&mut l, &expr, &mut slot).unwrap();

        let text = render(l.lines());
        assert!(text.contains("%t1 = sitofp i64 %t0 to double"));
        assert!(text.contains("%t2 = fcmp une double %t1, 0x3FE0000000000000"));
    }

    #[test]
    fn test_short_circuit_and_merges_with_phi() {
        let mut fixture = Fixture::new(&[
            VarDecl::scalar("p", ValueType::Bool),
            VarDecl::scalar("q", ValueType::Bool),
        ]);
        let mut l = fixture.lowering();
        let expr = Expr::logical(
            LogicalOp::And,
            Expr::ident("p", ValueType::Bool),
            Expr::ident("q", ValueType::Bool),
        );
        let mut slot = SsaSlot::default();
        lower_expr(&mut l, &expr, &mut slot).unwrap();

        let (lines, stats) = l.finish(0);
        assert_eq!(
            render(&lines),
            "entry:\n\
             \x20 %t0 = load i1, ptr @v_p\n\
             \x20 %t1 = icmp eq i1 %t0, false\n\
             \x20 br i1 %t1, label %logic_end0, label %rhs0\n\
             rhs0:\n\
             \x20 %t2 = load i1, ptr @v_q\n\
             \x20 %t3 = and i1 %t0, %t2\n\
             \x20 br label %logic_end0\n\
             logic_end0:\n\
             \x20 %t4 = phi i1 [ %t0, %entry ], [ %t3, %rhs0 ]\n\
             \x20 ret i32 0\n"
        );
        assert_eq!(stats.short_circuits, 1);
    }

    #[test]
    fn test_integer_or_short_circuits_on_all_ones() {
        let mut fixture = Fixture::new(&[VarDecl::scalar("m", ValueType::I64)]);
        let mut l = fixture.lowering();
        let expr = Expr::logical(LogicalOp::Or, Expr::ident("m", ValueType::I64), Expr::int(12));
        let mut slot = SsaSlot::default();
        lower_expr(&mut l, &expr, &mut slot).unwrap();
        assert!(render(l.lines()).contains("%t1 = icmp eq i64 %t0, -1\n"));
    }

    #[test]
    fn test_nested_short_circuit_uses_inner_end_block() {
        let mut fixture = Fixture::new(&[
            VarDecl::scalar("p", ValueType::Bool),
            VarDecl::scalar("q", ValueType::Bool),
            VarDecl::scalar("r", ValueType::Bool),
        ]);
        let mut l = fixture.lowering();
        let inner = Expr::logical(
            LogicalOp::Or,
            Expr::ident("q", ValueType::Bool),
            Expr::ident("r", ValueType::Bool),
        );
        let expr = Expr::logical(LogicalOp::And, Expr::ident("p", ValueType::Bool), inner);
        let mut slot = SsaSlot::default();
        lower_expr(&mut l, &expr, &mut slot).unwrap();

        let text = render(l.lines());
        assert!(text.contains("phi i1 [ %t2, %rhs0 ], [ %t4, %rhs1 ]"));
        assert!(text.contains("phi i1 [ %t0, %entry ], [ %t6, %logic_end1 ]"));
    }

    #[test]
    fn test_concatenation_frees_transient_operand() {
        let mut fixture = Fixture::new(&[VarDecl::scalar("s$", ValueType::Str)]);
        let mut l = fixture.lowering();
        let inner = Expr::arith(ArithOp::Add, Expr::ident("s$", ValueType::Str), Expr::string("!"));
        let expr = Expr::arith(ArithOp::Add, inner, Expr::string("?"));
        let mut slot = SsaSlot::default();
        lower_expr(&mut l, &expr, &mut slot).unwrap();

        let text = render(l.lines());
        assert_eq!(text.matches("call ptr @malloc").count(), 2);
        assert_eq!(text.matches("call void @free(ptr %t5)").count(), 1);
        assert!(fixture.symbols.dependencies().contains("msvcrt", "strcat"));
    }

    #[test]
    fn test_print_widens_booleans() {
        let mut fixture = Fixture::new(&[]);
        let mut l = fixture.lowering();
        l.print(&[Expr::boolean(true), Expr::float(2.0)]).unwrap();

        let text = render(l.lines());
        assert!(text.contains("%t0 = zext i1 true to i64"));
        assert!(text.contains(
            "%t1 = call i32 (ptr, ...) @printf(ptr @_str_0, i64 %t0, double 0x4000000000000000)"
        ));
        assert_eq!(
            fixture.symbols.constants()[0].1,
            crate::core::symbols::Constant::Str("%lld%f\n".to_string())
        );
    }

    #[test]
    fn test_while_loop_blocks() {
        let mut fixture = Fixture::new(&[VarDecl::scalar("i", ValueType::I64)]);
        let mut l = fixture.lowering();
        let body = vec![Stmt::Assign {
            target: LValue::Variable("i".into()),
            value: Expr::arith(ArithOp::Add, Expr::ident("i", ValueType::I64), Expr::int(1)),
        }];
        let condition = Expr::relational(RelOp::Lt, Expr::ident("i", ValueType::I64), Expr::int(10));
        l.while_loop(&condition, &body).unwrap();

        assert_eq!(
            render(l.lines()),
            "entry:\n\
             \x20 br label %while0\n\
             while0:\n\
             \x20 %t0 = load i64, ptr @v_i\n\
             \x20 %t1 = icmp slt i64 %t0, 10\n\
             \x20 br i1 %t1, label %body0, label %wend0\n\
             body0:\n\
             \x20 %t2 = load i64, ptr @v_i\n\
             \x20 %t3 = add i64 %t2, 1\n\
             \x20 store i64 %t3, ptr @v_i\n\
             \x20 br label %while0\n\
             wend0:\n"
        );
    }

    #[test]
    fn test_string_condition_is_rejected() {
        let mut fixture = Fixture::new(&[]);
        let mut l = fixture.lowering();
        let err = l.if_else(&Expr::string("x"), &[], &[]).unwrap_err();
        assert_eq!(err, CompileError::DispatchMiss { backend: "llvm", node: "condition" });
    }

    #[test]
    fn test_unsupported_cast() {
        let mut fixture = Fixture::new(&[]);
        let mut l = fixture.lowering();
        let expr = Expr::cast(ValueType::Bool, Expr::string("yes"));
        let mut slot = SsaSlot::default();
        let err = lower_expr(&mut l, &expr, &mut slot).unwrap_err();
        assert_eq!(err, CompileError::UnsupportedCast { from: ValueType::Str, to: ValueType::Bool });
    }
}
