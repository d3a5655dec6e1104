// This module contains the backend independent half of lowering: the dispatch from AST node
// kinds to generator methods. ExprLowering is implemented once per backend with one method per
// expression node kind plus the two services every generator needs, fresh storage and type
// conversion. lower_expr matches exhaustively over ExprKind, so adding a node kind without a
// generator is a compile error in every backend instead of a runtime lookup failure; operand
// type combinations no generator handles are reported as DispatchMiss. Division or modulo by
// a literal zero is rejected here, before any code is emitted. StmtLowering does the same for
// statements. The default arithmetic method implements the binary composition rule shared by
// both backends: the left operand is lowered into the target, the right into a fresh
// location, the operator is applied in place, and the fresh location is released.

//! Shared expression and statement dispatch.

use crate::ast::{
    ArithOp, Expr, ExprKind, LValue, LogicalOp, RelOp, Stmt, UnaryOp, ValueType,
};
use crate::core::error::{CompileError, CompileResult};
use crate::core::symbols::Library;

/// Expression generators of one backend.
pub trait ExprLowering {
    /// Where a generator leaves its value.
    type Location;

    /// Backend name used in diagnostics.
    const BACKEND: &'static str;

    fn library(&self) -> &Library;

    /// A location for a temporary that must survive calls.
    fn fresh_location(&mut self, ty: ValueType) -> CompileResult<Self::Location>;

    fn int_literal(&mut self, value: i64, target: &mut Self::Location) -> CompileResult<()>;
    fn float_literal(&mut self, value: f64, target: &mut Self::Location) -> CompileResult<()>;
    fn string_literal(&mut self, value: &str, target: &mut Self::Location) -> CompileResult<()>;
    fn bool_literal(&mut self, value: bool, target: &mut Self::Location) -> CompileResult<()>;

    fn identifier(
        &mut self,
        name: &str,
        ty: ValueType,
        target: &mut Self::Location,
    ) -> CompileResult<()>;

    fn array_element(
        &mut self,
        name: &str,
        index: &Expr,
        ty: ValueType,
        target: &mut Self::Location,
    ) -> CompileResult<()>;

    fn unary(&mut self, op: UnaryOp, operand: &Expr, target: &mut Self::Location)
        -> CompileResult<()>;

    /// `target = target <op> right` for numeric operands of type `ty`.
    fn apply_arithmetic(
        &mut self,
        op: ArithOp,
        ty: ValueType,
        target: &mut Self::Location,
        right: &Self::Location,
    ) -> CompileResult<()>;

    fn arithmetic(
        &mut self,
        op: ArithOp,
        ty: ValueType,
        left: &Expr,
        right: &Expr,
        target: &mut Self::Location,
    ) -> CompileResult<()>
    where
        Self: Sized,
    {
        lower_converted(self, left, ty, target)?;
        let mut rhs = self.fresh_location(ty)?;
        lower_converted(self, right, ty, &mut rhs)?;
        self.apply_arithmetic(op, ty, target, &rhs)
    }

    /// String `+`.
    fn concatenate(&mut self, left: &Expr, right: &Expr, target: &mut Self::Location)
        -> CompileResult<()>;

    fn relational(
        &mut self,
        op: RelOp,
        left: &Expr,
        right: &Expr,
        target: &mut Self::Location,
    ) -> CompileResult<()>;

    fn logical(
        &mut self,
        op: LogicalOp,
        ty: ValueType,
        left: &Expr,
        right: &Expr,
        target: &mut Self::Location,
    ) -> CompileResult<()>;

    fn call(
        &mut self,
        name: &str,
        args: &[Expr],
        ty: ValueType,
        target: &mut Self::Location,
    ) -> CompileResult<()>;

    /// Convert `source`, the value of `operand`, to `to` and leave it in `target`.
    fn convert(
        &mut self,
        operand: &Expr,
        source: &Self::Location,
        to: ValueType,
        target: &mut Self::Location,
    ) -> CompileResult<()>;
}

/// Statement generators of one backend.
pub trait StmtLowering: ExprLowering {
    fn assign(&mut self, target: &LValue, value: &Expr) -> CompileResult<()>;
    fn print(&mut self, values: &[Expr]) -> CompileResult<()>;
    fn if_else(
        &mut self,
        condition: &Expr,
        then_branch: &[Stmt],
        else_branch: &[Stmt],
    ) -> CompileResult<()>;
    fn while_loop(&mut self, condition: &Expr, body: &[Stmt]) -> CompileResult<()>;
    /// Evaluate for side effects and discard the value.
    fn expression(&mut self, expr: &Expr) -> CompileResult<()>;

    /// Hook run before each statement.
    fn annotate(&mut self, _stmt: &Stmt) {}
}

fn dispatch_miss<L: ExprLowering>(node: &'static str) -> CompileError {
    CompileError::DispatchMiss { backend: L::BACKEND, node }
}

/// Lower `expr` into `target`.
pub fn lower_expr<L: ExprLowering>(
    l: &mut L,
    expr: &Expr,
    target: &mut L::Location,
) -> CompileResult<()> {
    log::trace!("{}: lowering {} ({})", L::BACKEND, expr.kind.node_name(), expr.ty);
    match &expr.kind {
        ExprKind::Int(v) => l.int_literal(*v, target),
        ExprKind::Float(v) => l.float_literal(*v, target),
        ExprKind::Str(s) => l.string_literal(s, target),
        ExprKind::Bool(b) => l.bool_literal(*b, target),
        ExprKind::Identifier(name) => l.identifier(name, expr.ty, target),
        ExprKind::ArrayElement { name, index } => l.array_element(name, index, expr.ty, target),
        ExprKind::Unary { op, operand } => {
            let supported = match op {
                UnaryOp::Negate => operand.ty.is_numeric(),
                UnaryOp::Not => matches!(operand.ty, ValueType::I64 | ValueType::Bool),
            };
            if !supported {
                return Err(dispatch_miss::<L>("unary"));
            }
            l.unary(*op, operand, target)
        }
        ExprKind::Arith { op, left, right } => {
            if matches!(op, ArithOp::Div | ArithOp::Mod) && right.is_zero_literal() {
                return Err(CompileError::DivisionByZero { position: expr.pos });
            }
            match (expr.ty, op) {
                (ValueType::Str, ArithOp::Add) => l.concatenate(left, right, target),
                (ValueType::I64 | ValueType::F64, _) => {
                    l.arithmetic(*op, expr.ty, left, right, target)
                }
                _ => Err(dispatch_miss::<L>("arithmetic")),
            }
        }
        ExprKind::Relational { op, left, right } => {
            let comparable = match (left.ty, right.ty) {
                (ValueType::Str, ValueType::Str) => true,
                (ValueType::Str, _) | (_, ValueType::Str) => false,
                _ => true,
            };
            if !comparable {
                return Err(dispatch_miss::<L>("relational"));
            }
            l.relational(*op, left, right, target)
        }
        ExprKind::Logical { op, left, right } => {
            if !matches!(expr.ty, ValueType::I64 | ValueType::Bool) || left.ty != right.ty {
                return Err(dispatch_miss::<L>("logical"));
            }
            l.logical(*op, expr.ty, left, right, target)
        }
        ExprKind::Call { name, args } => l.call(name, args, expr.ty, target),
        ExprKind::Cast { operand } => lower_converted(l, operand, expr.ty, target),
    }
}

/// Lower `expr` into `target`, converting to `ty` first when the types differ.
pub fn lower_converted<L: ExprLowering>(
    l: &mut L,
    expr: &Expr,
    ty: ValueType,
    target: &mut L::Location,
) -> CompileResult<()> {
    if expr.ty == ty {
        return lower_expr(l, expr, target);
    }
    let mut source = l.fresh_location(expr.ty)?;
    lower_expr(l, expr, &mut source)?;
    l.convert(expr, &source, ty, target)
}

pub fn lower_stmt<L: StmtLowering>(l: &mut L, stmt: &Stmt) -> CompileResult<()> {
    log::debug!("{}: lowering {} statement", L::BACKEND, stmt.node_name());
    l.annotate(stmt);
    match stmt {
        Stmt::Assign { target, value } => l.assign(target, value),
        Stmt::Print { values } => l.print(values),
        Stmt::If { condition, then_branch, else_branch } => {
            l.if_else(condition, then_branch, else_branch)
        }
        Stmt::While { condition, body } => l.while_loop(condition, body),
        Stmt::Expr(expr) => l.expression(expr),
    }
}

pub fn lower_block<L: StmtLowering>(l: &mut L, stmts: &[Stmt]) -> CompileResult<()> {
    for stmt in stmts {
        lower_stmt(l, stmt)?;
    }
    Ok(())
}

/// Whether evaluating `expr` produces a heap string nothing else references yet.
pub fn is_fresh_string(expr: &Expr, library: &Library) -> bool {
    if expr.ty != ValueType::Str {
        return false;
    }
    match &expr.kind {
        ExprKind::Arith { op: ArithOp::Add, .. } => true,
        ExprKind::Cast { operand } => {
            operand.ty != ValueType::Str || is_fresh_string(operand, library)
        }
        ExprKind::Call { name, .. } => library.get(name).is_some_and(|f| f.allocates),
        _ => false,
    }
}

/// Format directive `printf` needs for a value of type `ty`.
pub fn format_directive(ty: ValueType) -> &'static str {
    match ty {
        ValueType::I64 | ValueType::Bool => "%lld",
        ValueType::F64 => "%f",
        ValueType::Str => "%s",
    }
}
