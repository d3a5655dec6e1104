// This module defines the flat-assembler text model produced by the x64 backend. Every
// generator returns a sequence of Line values (instructions with optional trailing comments,
// named labels, anonymous `@@` labels, comment lines, blank lines) instead of strings, so
// tests can inspect instructions structurally and the emulator can execute them directly.
// Operands are registers, 32-bit register views, immediates, memory references with a
// register or symbol base, named labels and the anonymous `@f`/`@b` references. Rendering
// follows FASM syntax: memory operands carry an explicit `qword` size (`dqword` for movdqu)
// except in address-only positions (lea, call, jmp). The data section model (DataItem) covers the `dq`, `dq N dup`
// and `db` directives the program assembler needs. `transfer` synthesizes a move between any
// two operands, going through the scratch registers when x86 has no direct form.

//! Assembly line model and FASM rendering.

use std::fmt;

use crate::core::register_file::AsmReg;
use crate::x64::registers::{self, is_xmm, SCRATCH};

/// Condition codes for `jcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
    A,
    Ae,
    B,
    Be,
    P,
    Np,
}

impl Cond {
    pub fn suffix(self) -> &'static str {
        match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::L => "l",
            Cond::Le => "le",
            Cond::G => "g",
            Cond::Ge => "ge",
            Cond::A => "a",
            Cond::Ae => "ae",
            Cond::B => "b",
            Cond::Be => "be",
            Cond::P => "p",
            Cond::Np => "np",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mnemonic {
    Mov,
    Movsxd,
    Lea,
    Add,
    Sub,
    Imul,
    Cqo,
    Idiv,
    Neg,
    Not,
    And,
    Or,
    Xor,
    Cmp,
    Shl,
    Push,
    Pop,
    Call,
    Ret,
    Jmp,
    J(Cond),
    Movsd,
    Movq,
    Movdqu,
    Addsd,
    Subsd,
    Mulsd,
    Divsd,
    Ucomisd,
    Xorpd,
    Cvtsi2sd,
    Cvttsd2si,
}

impl Mnemonic {
    /// Size keyword of a memory operand, `None` when the operand is an address.
    fn memory_size(self) -> Option<&'static str> {
        match self {
            Mnemonic::Lea | Mnemonic::Call | Mnemonic::Jmp | Mnemonic::J(_) => None,
            Mnemonic::Movdqu => Some("dqword"),
            _ => Some("qword"),
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mnemonic::J(cond) => return write!(f, "j{}", cond.suffix()),
            Mnemonic::Mov => "mov",
            Mnemonic::Movsxd => "movsxd",
            Mnemonic::Lea => "lea",
            Mnemonic::Add => "add",
            Mnemonic::Sub => "sub",
            Mnemonic::Imul => "imul",
            Mnemonic::Cqo => "cqo",
            Mnemonic::Idiv => "idiv",
            Mnemonic::Neg => "neg",
            Mnemonic::Not => "not",
            Mnemonic::And => "and",
            Mnemonic::Or => "or",
            Mnemonic::Xor => "xor",
            Mnemonic::Cmp => "cmp",
            Mnemonic::Shl => "shl",
            Mnemonic::Push => "push",
            Mnemonic::Pop => "pop",
            Mnemonic::Call => "call",
            Mnemonic::Ret => "ret",
            Mnemonic::Jmp => "jmp",
            Mnemonic::Movsd => "movsd",
            Mnemonic::Movq => "movq",
            Mnemonic::Movdqu => "movdqu",
            Mnemonic::Addsd => "addsd",
            Mnemonic::Subsd => "subsd",
            Mnemonic::Mulsd => "mulsd",
            Mnemonic::Divsd => "divsd",
            Mnemonic::Ucomisd => "ucomisd",
            Mnemonic::Xorpd => "xorpd",
            Mnemonic::Cvtsi2sd => "cvtsi2sd",
            Mnemonic::Cvttsd2si => "cvttsd2si",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemBase {
    Reg(AsmReg),
    Symbol(String),
}

/// `[base + index*scale + disp]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub base: MemBase,
    pub index: Option<(AsmReg, u8)>,
    pub disp: i64,
}

impl Memory {
    pub fn symbol(name: impl Into<String>) -> Self {
        Self { base: MemBase::Symbol(name.into()), index: None, disp: 0 }
    }

    pub fn base(reg: AsmReg, disp: i64) -> Self {
        Self { base: MemBase::Reg(reg), index: None, disp }
    }

    pub fn offset(&self, by: i64) -> Self {
        Self { disp: self.disp + by, ..self.clone() }
    }

    /// The data symbol addressed, if this is a plain `[symbol]` operand.
    pub fn symbol_name(&self) -> Option<&str> {
        match &self.base {
            MemBase::Symbol(name) if self.index.is_none() && self.disp == 0 => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        match &self.base {
            MemBase::Reg(reg) => f.write_str(registers::name(*reg))?,
            MemBase::Symbol(name) => f.write_str(name)?,
        }
        if let Some((index, scale)) = self.index {
            write!(f, "+{}*{}", registers::name(index), scale)?;
        }
        if self.disp > 0 {
            write!(f, "+{}", self.disp)?;
        } else if self.disp < 0 {
            write!(f, "-{}", self.disp.unsigned_abs())?;
        }
        f.write_str("]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Reg(AsmReg),
    /// Low 32 bits of a general purpose register.
    Reg32(AsmReg),
    Imm(i64),
    Mem(Memory),
    Label(String),
    /// `@f`: the next anonymous label.
    Forward,
    /// `@b`: the previous anonymous label.
    Backward,
}

impl Operand {
    pub fn sym(name: impl Into<String>) -> Self {
        Operand::Mem(Memory::symbol(name))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }

    pub fn is_mem(&self) -> bool {
        matches!(self, Operand::Mem(_))
    }

    pub fn reg(&self) -> Option<AsmReg> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_xmm(&self) -> bool {
        self.reg().is_some_and(is_xmm)
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, size: Option<&str>) -> fmt::Result {
        match self {
            Operand::Reg(r) => f.write_str(registers::name(*r)),
            Operand::Reg32(r) => f.write_str(registers::name32(*r)),
            Operand::Imm(v) => write!(f, "{v}"),
            Operand::Mem(m) => match size {
                Some(size) => write!(f, "{size} {m}"),
                None => write!(f, "{m}"),
            },
            Operand::Label(l) => f.write_str(l),
            Operand::Forward => f.write_str("@f"),
            Operand::Backward => f.write_str("@b"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, Some("qword"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Instr {
        op: Mnemonic,
        operands: Vec<Operand>,
        comment: Option<String>,
    },
    Label(String),
    /// `@@:`
    AnonLabel,
    Comment(String),
    Blank,
}

impl Line {
    pub fn op0(op: Mnemonic) -> Self {
        Line::Instr { op, operands: Vec::new(), comment: None }
    }

    pub fn op1(op: Mnemonic, a: Operand) -> Self {
        Line::Instr { op, operands: vec![a], comment: None }
    }

    pub fn op2(op: Mnemonic, a: Operand, b: Operand) -> Self {
        Line::Instr { op, operands: vec![a, b], comment: None }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Line::Label(name.into())
    }

    pub fn comment(text: impl Into<String>) -> Self {
        Line::Comment(text.into())
    }

    /// Attach a trailing comment to an instruction.
    pub fn commented(self, text: impl Into<String>) -> Self {
        match self {
            Line::Instr { op, operands, .. } => Line::Instr { op, operands, comment: Some(text.into()) },
            other => other,
        }
    }

    pub fn mnemonic(&self) -> Option<Mnemonic> {
        match self {
            Line::Instr { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn operands(&self) -> &[Operand] {
        match self {
            Line::Instr { operands, .. } => operands,
            _ => &[],
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Instr { op, operands, comment } => {
                write!(f, "    {op}")?;
                let size = op.memory_size();
                for (i, operand) in operands.iter().enumerate() {
                    f.write_str(if i == 0 { " " } else { ", " })?;
                    operand.render(f, size)?;
                }
                if let Some(comment) = comment {
                    write!(f, "  ; {comment}")?;
                }
                Ok(())
            }
            Line::Label(name) => write!(f, "{name}:"),
            Line::AnonLabel => f.write_str("@@:"),
            Line::Comment(text) => write!(f, "    ; {text}"),
            Line::Blank => Ok(()),
        }
    }
}

/// Render lines one per row.
pub fn render_lines(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

/// Move `src` into `dst` whatever their kinds.
///
/// Memory-to-memory moves go through R11; immediates that do not fit a sign-extended 32-bit
/// field are staged in R11 as well. General purpose and XMM registers exchange raw bits.
pub fn transfer(dst: &Operand, src: &Operand) -> Vec<Line> {
    use Mnemonic::{Mov, Movq, Movsd};
    if dst == src {
        return Vec::new();
    }
    let scratch = Operand::Reg(SCRATCH);
    match (dst, src) {
        (Operand::Reg(d), Operand::Reg(s)) => {
            let op = match (is_xmm(*d), is_xmm(*s)) {
                (false, false) => Mov,
                (true, true) => Movsd,
                _ => Movq,
            };
            vec![Line::op2(op, dst.clone(), src.clone())]
        }
        (Operand::Reg(d), Operand::Mem(_)) | (Operand::Mem(_), Operand::Reg(d)) => {
            let op = if is_xmm(*d) { Movsd } else { Mov };
            vec![Line::op2(op, dst.clone(), src.clone())]
        }
        (Operand::Mem(_), Operand::Mem(_)) => vec![
            Line::op2(Mov, scratch.clone(), src.clone()),
            Line::op2(Mov, dst.clone(), scratch),
        ],
        (Operand::Reg(d), Operand::Imm(_)) if is_xmm(*d) => vec![
            Line::op2(Mov, scratch.clone(), src.clone()),
            Line::op2(Movq, dst.clone(), scratch),
        ],
        (Operand::Mem(_), Operand::Imm(v)) if i32::try_from(*v).is_err() => vec![
            Line::op2(Mov, scratch.clone(), src.clone()),
            Line::op2(Mov, dst.clone(), scratch),
        ],
        _ => vec![Line::op2(Mov, dst.clone(), src.clone())],
    }
}

/// A value stored by a data directive.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Int(i64),
    /// Emitted as its IEEE bit pattern.
    Float(f64),
    /// Address of a symbol plus a byte offset.
    Address(String, i64),
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Int(v) => write!(f, "{v}"),
            DataValue::Float(v) => write!(f, "0x{:016X}", v.to_bits()),
            DataValue::Address(symbol, 0) => f.write_str(symbol),
            DataValue::Address(symbol, offset) => write!(f, "{symbol}+{offset}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    /// `label dq v1, v2, ...`; unlabeled rows continue the previous label.
    Quad { label: Option<String>, values: Vec<DataValue> },
    /// `label dq count dup (value)`
    Repeat { label: String, count: usize, value: DataValue },
    /// `label db ...` with the bytes given verbatim.
    Bytes { label: String, bytes: Vec<u8> },
    /// A bare `label:` marking an address.
    Label(String),
    Comment(String),
}

impl DataItem {
    pub fn quad(label: impl Into<String>, value: DataValue) -> Self {
        DataItem::Quad { label: Some(label.into()), values: vec![value] }
    }

    /// Bytes of a NUL terminated string.
    pub fn c_string(label: impl Into<String>, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        DataItem::Bytes { label: label.into(), bytes }
    }

    pub fn label_name(&self) -> Option<&str> {
        match self {
            DataItem::Quad { label, .. } => label.as_deref(),
            DataItem::Repeat { label, .. } | DataItem::Bytes { label, .. } => Some(label),
            DataItem::Label(label) => Some(label),
            DataItem::Comment(_) => None,
        }
    }

    /// Size in bytes, before alignment.
    pub fn size(&self) -> usize {
        match self {
            DataItem::Quad { values, .. } => 8 * values.len(),
            DataItem::Repeat { count, .. } => 8 * count,
            DataItem::Bytes { bytes, .. } => bytes.len(),
            DataItem::Label(_) | DataItem::Comment(_) => 0,
        }
    }
}

fn render_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let mut first = true;
    let mut in_quote = false;
    for &b in bytes {
        let printable = (0x20..0x7f).contains(&b) && b != b'\'';
        if printable {
            if !in_quote {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str("'")?;
                in_quote = true;
            }
            write!(f, "{}", b as char)?;
        } else {
            if in_quote {
                f.write_str("'")?;
                in_quote = false;
            }
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{b}")?;
        }
        first = false;
    }
    if in_quote {
        f.write_str("'")?;
    }
    Ok(())
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::Quad { label, values } => {
                match label {
                    Some(label) => write!(f, "    {label} dq ")?,
                    None => f.write_str("    dq ")?,
                }
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                Ok(())
            }
            DataItem::Repeat { label, count, value } => {
                write!(f, "    {label} dq {count} dup ({value})")
            }
            DataItem::Bytes { label, bytes } => {
                write!(f, "    {label} db ")?;
                render_bytes(f, bytes)
            }
            DataItem::Label(label) => write!(f, "    {label}:"),
            DataItem::Comment(text) => write!(f, "    ; {text}"),
        }
    }
}
