// This module defines the typed abstract syntax tree that every frontend hands to the lowering
// engine. The tree is produced after parsing, type checking and constant folding, so each
// expression already carries its ValueType (the type-lookup service) and its source Position
// (used for compile-time value errors). Expressions are a tagged union over literals,
// identifiers, array elements, unary/arithmetic/relational/logical operators, library calls
// and casts; statements cover assignment, printing, conditionals, loops and expression
// statements. The constructors on Expr apply the typing rules the checker uses, inserting
// explicit int-to-float casts where arithmetic mixes the two, so hand-built trees in tests
// look exactly like checker output.

//! Typed AST consumed by the backends.

use std::fmt;

/// Type of a value flowing through an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit signed integer.
    I64,
    /// 64-bit IEEE float.
    F64,
    /// Pointer to a NUL terminated byte string.
    Str,
    /// Boolean.
    Bool,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::I64 => "i64",
            ValueType::F64 => "f64",
            ValueType::Str => "str",
            ValueType::Bool => "bool",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "i64" | "int" => Some(ValueType::I64),
            "f64" | "float" => Some(ValueType::F64),
            "str" | "string" => Some(ValueType::Str),
            "bool" => Some(ValueType::Bool),
            _ => None,
        }
    }

    pub fn is_float(self) -> bool {
        self == ValueType::F64
    }

    /// Integers and floats.
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::I64 | ValueType::F64)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source position of a node, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Xor,
}

/// An expression together with its checked type.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: ValueType,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Identifier(String),
    ArrayElement { name: String, index: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Arith { op: ArithOp, left: Box<Expr>, right: Box<Expr> },
    Relational { op: RelOp, left: Box<Expr>, right: Box<Expr> },
    Logical { op: LogicalOp, left: Box<Expr>, right: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
    /// Conversion of `operand` to the type of the enclosing expression.
    Cast { operand: Box<Expr> },
}

impl ExprKind {
    /// Short node name used in diagnostics and traces.
    pub fn node_name(&self) -> &'static str {
        match self {
            ExprKind::Int(_) => "integer literal",
            ExprKind::Float(_) => "float literal",
            ExprKind::Str(_) => "string literal",
            ExprKind::Bool(_) => "boolean literal",
            ExprKind::Identifier(_) => "identifier",
            ExprKind::ArrayElement { .. } => "array element",
            ExprKind::Unary { .. } => "unary",
            ExprKind::Arith { .. } => "arithmetic",
            ExprKind::Relational { .. } => "relational",
            ExprKind::Logical { .. } => "logical",
            ExprKind::Call { .. } => "call",
            ExprKind::Cast { .. } => "cast",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, ty: ValueType) -> Self {
        Self { kind, ty, pos: Position::default() }
    }

    pub fn at(mut self, pos: Position) -> Self {
        self.pos = pos;
        self
    }

    pub fn int(value: i64) -> Self {
        Self::new(ExprKind::Int(value), ValueType::I64)
    }

    pub fn float(value: f64) -> Self {
        Self::new(ExprKind::Float(value), ValueType::F64)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ExprKind::Str(value.into()), ValueType::Str)
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Bool(value), ValueType::Bool)
    }

    pub fn ident(name: impl Into<String>, ty: ValueType) -> Self {
        Self::new(ExprKind::Identifier(name.into()), ty)
    }

    pub fn element(name: impl Into<String>, ty: ValueType, index: Expr) -> Self {
        Self::new(
            ExprKind::ArrayElement { name: name.into(), index: Box::new(index) },
            ty,
        )
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        let ty = operand.ty;
        let pos = operand.pos;
        Self::new(ExprKind::Unary { op, operand: Box::new(operand) }, ty).at(pos)
    }

    /// Arithmetic node. Mixed int/float operands are widened with explicit casts.
    pub fn arith(op: ArithOp, left: Expr, right: Expr) -> Self {
        let pos = left.pos;
        let ty = match (left.ty, right.ty) {
            (ValueType::Str, ValueType::Str) => ValueType::Str,
            (ValueType::F64, _) | (_, ValueType::F64) => ValueType::F64,
            _ => ValueType::I64,
        };
        let left = left.coerce(ty);
        let right = right.coerce(ty);
        Self::new(
            ExprKind::Arith { op, left: Box::new(left), right: Box::new(right) },
            ty,
        )
        .at(pos)
    }

    pub fn relational(op: RelOp, left: Expr, right: Expr) -> Self {
        let pos = left.pos;
        Self::new(
            ExprKind::Relational { op, left: Box::new(left), right: Box::new(right) },
            ValueType::Bool,
        )
        .at(pos)
    }

    pub fn logical(op: LogicalOp, left: Expr, right: Expr) -> Self {
        let pos = left.pos;
        let ty = left.ty;
        Self::new(
            ExprKind::Logical { op, left: Box::new(left), right: Box::new(right) },
            ty,
        )
        .at(pos)
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>, ty: ValueType) -> Self {
        Self::new(ExprKind::Call { name: name.into(), args }, ty)
    }

    pub fn cast(to: ValueType, operand: Expr) -> Self {
        let pos = operand.pos;
        Self::new(ExprKind::Cast { operand: Box::new(operand) }, to).at(pos)
    }

    /// Wrap in a cast unless the expression already has type `ty`.
    pub fn coerce(self, ty: ValueType) -> Self {
        if self.ty == ty {
            self
        } else {
            Expr::cast(ty, self)
        }
    }

    /// Whether the node is a literal zero (integer `0` or float `0.0`).
    pub fn is_zero_literal(&self) -> bool {
        match &self.kind {
            ExprKind::Int(v) => *v == 0,
            ExprKind::Float(v) => *v == 0.0,
            ExprKind::Cast { operand } => operand.is_zero_literal(),
            _ => false,
        }
    }
}

/// Assignment destination.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    Variable(String),
    Element { name: String, index: Expr },
}

impl LValue {
    pub fn name(&self) -> &str {
        match self {
            LValue::Variable(name) | LValue::Element { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { target: LValue, value: Expr },
    /// Print the values back to back, followed by a newline.
    Print { values: Vec<Expr> },
    If { condition: Expr, then_branch: Vec<Stmt>, else_branch: Vec<Stmt> },
    While { condition: Expr, body: Vec<Stmt> },
    Expr(Expr),
}

impl Stmt {
    pub fn node_name(&self) -> &'static str {
        match self {
            Stmt::Assign { .. } => "assign",
            Stmt::Print { .. } => "print",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::Expr(_) => "expression",
        }
    }
}

/// Program level variable. `length` is set for fixed-size arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub ty: ValueType,
    pub length: Option<usize>,
}

impl VarDecl {
    pub fn scalar(name: impl Into<String>, ty: ValueType) -> Self {
        Self { name: name.into(), ty, length: None }
    }

    pub fn array(name: impl Into<String>, ty: ValueType, length: usize) -> Self {
        Self { name: name.into(), ty, length: Some(length) }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub variables: Vec<VarDecl>,
    pub body: Vec<Stmt>,
}

impl Program {
    pub fn new(variables: Vec<VarDecl>, body: Vec<Stmt>) -> Self {
        Self { variables, body }
    }

    pub fn variable(&self, name: &str) -> Option<&VarDecl> {
        self.variables.iter().find(|v| v.name == name)
    }
}
