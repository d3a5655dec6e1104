// This module contains the textual SSA model the LLVM backend emits: first-class types, operand
// values and body lines. It is intentionally small. Instructions are stored with their opcode
// kept apart from the operand text so tests and statistics can count opcodes without parsing
// rendered lines, and values render in the exact syntax LLVM's text parser expects (floats as
// 64-bit hex patterns, strings as pointers to private byte arrays).

//! Types, values and lines of emitted LLVM IR.

use std::fmt;

use crate::ast::ValueType;
use crate::core::symbols::{FunctionDescriptor, ReturnKind};

/// First-class IR types used by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrType {
    I1,
    I32,
    I64,
    Double,
    Ptr,
    Void,
}

impl IrType {
    pub fn of(ty: ValueType) -> Self {
        match ty {
            ValueType::I64 => IrType::I64,
            ValueType::F64 => IrType::Double,
            ValueType::Str => IrType::Ptr,
            ValueType::Bool => IrType::I1,
        }
    }

    pub fn returned(ret: ReturnKind) -> Self {
        match ret {
            ReturnKind::Void => IrType::Void,
            ReturnKind::Value(ty) => IrType::of(ty),
            ReturnKind::Int32 => IrType::I32,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IrType::I1 => "i1",
            IrType::I32 => "i32",
            IrType::I64 => "i64",
            IrType::Double => "double",
            IrType::Ptr => "ptr",
            IrType::Void => "void",
        })
    }
}

/// An operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// `%name`
    Local(String),
    /// `@name`
    Global(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "0x{:016X}", v.to_bits()),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Local(name) => write!(f, "%{name}"),
            Value::Global(name) => write!(f, "@{name}"),
        }
    }
}

/// A value together with its type, rendered as `type value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Typed {
    pub ty: IrType,
    pub value: Value,
}

impl Typed {
    pub fn new(ty: IrType, value: Value) -> Self {
        Self { ty, value }
    }
}

impl fmt::Display for Typed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ty, self.value)
    }
}

/// One line of a function body.
#[derive(Debug, Clone, PartialEq)]
pub enum IrLine {
    Label(String),
    Inst {
        result: Option<String>,
        opcode: &'static str,
        operands: String,
    },
    Comment(String),
}

impl IrLine {
    pub fn opcode(&self) -> Option<&'static str> {
        match self {
            IrLine::Inst { opcode, .. } => Some(*opcode),
            _ => None,
        }
    }

    /// Whether the line ends a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(self.opcode(), Some("br" | "ret" | "unreachable"))
    }
}

impl fmt::Display for IrLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrLine::Label(name) => write!(f, "{name}:"),
            IrLine::Inst { result: Some(result), opcode, operands } => {
                write!(f, "  %{result} = {opcode} {operands}")
            }
            IrLine::Inst { result: None, opcode, operands } => write!(f, "  {opcode} {operands}"),
            IrLine::Comment(text) => write!(f, "  ; {text}"),
        }
    }
}

/// `declare` line for a library function.
pub fn declaration(function: &FunctionDescriptor) -> String {
    let mut params: Vec<String> =
        function.params.iter().map(|&ty| IrType::of(ty).to_string()).collect();
    if function.variadic {
        params.push("...".to_string());
    }
    format!(
        "declare {} @{}({})",
        IrType::returned(function.ret),
        function.name,
        params.join(", ")
    )
}

/// Function type used at call sites of variadic functions, e.g. `i32 (ptr, ...)`.
pub fn variadic_type(function: &FunctionDescriptor) -> String {
    let params: Vec<String> =
        function.params.iter().map(|&ty| IrType::of(ty).to_string()).collect();
    format!("{} ({}, ...)", IrType::returned(function.ret), params.join(", "))
}

/// `c"..."` literal of `text` with its NUL terminator, and the array length.
pub fn c_string(text: &str) -> (String, usize) {
    let mut out = String::from("c\"");
    for &b in text.as_bytes() {
        if b == b'"' || b == b'\\' || !(0x20..0x7f).contains(&b) {
            out.push_str(&format!("\\{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out.push_str("\\00\"");
    (out, text.len() + 1)
}
