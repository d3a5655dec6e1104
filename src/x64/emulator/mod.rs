// This module is a reference interpreter for the assembly the x64 backend emits. It executes
// the Line form of an AsmModule directly, without an assembler: data items are laid out in a
// flat address space starting at DATA_BASE, code addresses are line indices offset by
// CODE_BASE, and calls through the import table dispatch to a simulated msvcrt.
//
// The interpreter is strict where generated code is most likely to go wrong. Every call must
// see a 16-byte aligned RSP, the heap rejects double and invalid frees and faults on any access
// to a freed block, volatile registers hold garbage after every library call, and `strcmp`
// leaves garbage in the upper half of RAX so a missing sign extension shows up. Variadic
// callees read their arguments from the integer registers and the stack, which is what the
// Windows x64 convention promises them.

//! Reference interpreter for emitted assembly.

mod memory;
mod msvcrt;

use std::collections::BTreeMap;

use hashbrown::HashMap;
use log::{debug, trace};
use thiserror::Error;

pub use memory::{AddressSpace, DATA_BASE, HEAP_BASE, STACK_TOP};

use super::asm::{Cond, DataItem, DataValue, Line, MemBase, Memory, Mnemonic, Operand};
use super::program::AsmModule;
use super::registers::{self, RAX, RDX, RSP};
use crate::core::register_file::AsmReg;

/// Code address of line 0.
const CODE_BASE: u64 = 0x4000_0000;
/// Return address of the entry routine.
const EXIT_ADDRESS: u64 = 0x7fff_0000;
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    #[error("unknown label {0}")]
    UnknownLabel(String),

    #[error("call to {0}, which is neither imported nor simulated")]
    UnknownImport(String),

    #[error("memory access out of bounds at {address:#x}")]
    OutOfBounds { address: u64 },

    #[error("use after free at {address:#x}")]
    UseAfterFree { address: u64 },

    #[error("double free of {address:#x}")]
    DoubleFree { address: u64 },

    #[error("free of {address:#x}, which was never allocated")]
    InvalidFree { address: u64 },

    #[error("heap exhausted allocating {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("call to {target} with misaligned stack (rsp = {rsp:#x})")]
    Misaligned { target: String, rsp: u64 },

    #[error("integer division fault")]
    DivideError,

    #[error("step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("return to non-code address {0:#x}")]
    BadReturn(u64),

    #[error("execution ran past the last line")]
    FellOffEnd,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

type EmuResult<T> = Result<T, EmulatorError>;

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    zf: bool,
    sf: bool,
    of: bool,
    cf: bool,
    pf: bool,
}

impl Flags {
    fn logic(result: u64) -> Self {
        Self {
            zf: result == 0,
            sf: (result as i64) < 0,
            of: false,
            cf: false,
            pf: (result as u8).count_ones() % 2 == 0,
        }
    }

    fn add(a: u64, b: u64) -> Self {
        let result = a.wrapping_add(b);
        Self {
            cf: a.overflowing_add(b).1,
            of: (a as i64).overflowing_add(b as i64).1,
            ..Self::logic(result)
        }
    }

    fn sub(a: u64, b: u64) -> Self {
        let result = a.wrapping_sub(b);
        Self {
            cf: a < b,
            of: (a as i64).overflowing_sub(b as i64).1,
            ..Self::logic(result)
        }
    }

    fn holds(&self, cond: Cond) -> bool {
        match cond {
            Cond::E => self.zf,
            Cond::Ne => !self.zf,
            Cond::L => self.sf != self.of,
            Cond::Le => self.zf || self.sf != self.of,
            Cond::G => !self.zf && self.sf == self.of,
            Cond::Ge => self.sf == self.of,
            Cond::A => !self.cf && !self.zf,
            Cond::Ae => !self.cf,
            Cond::B => self.cf,
            Cond::Be => self.cf || self.zf,
            Cond::P => self.pf,
            Cond::Np => !self.pf,
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub stdout: String,
    pub exit_code: i64,
    /// Calls per target, library functions and internal routines alike.
    pub calls: BTreeMap<String, usize>,
    pub steps: u64,
}

impl Execution {
    pub fn calls_to(&self, target: &str) -> usize {
        self.calls.get(target).copied().unwrap_or(0)
    }
}

enum Step {
    Next,
    Jump(usize),
    Exit(i64),
}

pub struct Emulator<'m> {
    module: &'m AsmModule,
    labels: HashMap<&'m str, usize>,
    anonymous: Vec<usize>,
    symbols: HashMap<String, u64>,
    imports: Vec<&'static str>,
    gp: [u64; 16],
    xmm: [u64; 16],
    flags: Flags,
    memory: AddressSpace,
    stdout: Vec<u8>,
    calls: BTreeMap<String, usize>,
    step_limit: u64,
}

impl<'m> Emulator<'m> {
    pub fn new(module: &'m AsmModule) -> EmuResult<Self> {
        let mut labels = HashMap::new();
        let mut anonymous = Vec::new();
        for (index, line) in module.code.iter().enumerate() {
            match line {
                Line::Label(name) => {
                    labels.insert(name.as_str(), index);
                }
                Line::AnonLabel => anonymous.push(index),
                _ => {}
            }
        }

        let mut emulator = Self {
            module,
            labels,
            anonymous,
            symbols: HashMap::new(),
            imports: module.dependencies.symbols().collect(),
            gp: [0; 16],
            xmm: [0; 16],
            flags: Flags::default(),
            memory: AddressSpace::new(),
            stdout: Vec::new(),
            calls: BTreeMap::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        };
        emulator.load_data()?;
        emulator.gp[RSP.id as usize] = STACK_TOP;
        emulator.push(EXIT_ADDRESS)?;
        Ok(emulator)
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    fn load_data(&mut self) -> EmuResult<()> {
        let module = self.module;
        let mut address = DATA_BASE;
        let mut placed = Vec::new();
        for item in &module.data {
            if matches!(item, DataItem::Comment(_)) {
                continue;
            }
            address = address.next_multiple_of(8);
            if let Some(label) = item.label_name() {
                self.symbols.insert(label.to_string(), address);
            }
            placed.push((address, item));
            address += item.size() as u64;
        }
        if address > HEAP_BASE {
            return Err(EmulatorError::OutOfMemory { requested: address - DATA_BASE });
        }
        debug!("emulator: {} bytes of data at {:#x}", address - DATA_BASE, DATA_BASE);

        for (address, item) in placed {
            match item {
                DataItem::Quad { values, .. } => {
                    for (i, value) in values.iter().enumerate() {
                        let word = self.data_value(value)?;
                        self.memory.write_u64(address + 8 * i as u64, word)?;
                    }
                }
                DataItem::Repeat { count, value, .. } => {
                    let word = self.data_value(value)?;
                    for i in 0..*count {
                        self.memory.write_u64(address + 8 * i as u64, word)?;
                    }
                }
                DataItem::Bytes { bytes, .. } => self.memory.write_bytes(address, bytes)?,
                DataItem::Label(_) | DataItem::Comment(_) => {}
            }
        }
        Ok(())
    }

    fn data_value(&self, value: &DataValue) -> EmuResult<u64> {
        Ok(match value {
            DataValue::Int(v) => *v as u64,
            DataValue::Float(v) => v.to_bits(),
            DataValue::Address(symbol, offset) => self.symbol(symbol)?.wrapping_add(*offset as u64),
        })
    }

    fn symbol(&self, name: &str) -> EmuResult<u64> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| EmulatorError::UnknownLabel(name.to_string()))
    }

    /// Word stored at a data label.
    pub fn global(&self, label: &str) -> EmuResult<u64> {
        self.memory.read_u64(self.symbol(label)?)
    }

    /// String a pointer word at a data label refers to.
    pub fn string_global(&self, label: &str) -> EmuResult<String> {
        let pointer = self.global(label)?;
        Ok(String::from_utf8_lossy(&self.memory.c_string(pointer)?).into_owned())
    }

    pub fn live_allocations(&self) -> usize {
        self.memory.live_allocations()
    }

    pub fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    /// Run from the entry label until the program exits.
    pub fn run(&mut self) -> EmuResult<Execution> {
        let module = self.module;
        let entry = module.entry.as_str();
        let mut pc = *self
            .labels
            .get(entry)
            .ok_or_else(|| EmulatorError::UnknownLabel(entry.to_string()))?;
        let mut steps = 0u64;
        loop {
            let line = module.code.get(pc).ok_or(EmulatorError::FellOffEnd)?;
            let Line::Instr { op, operands, .. } = line else {
                pc += 1;
                continue;
            };
            if steps >= self.step_limit {
                return Err(EmulatorError::StepLimit(self.step_limit));
            }
            steps += 1;
            trace!("{:#x}: {}", CODE_BASE + pc as u64, line);
            match self.step(pc, *op, operands)? {
                Step::Next => pc += 1,
                Step::Jump(target) => pc = target,
                Step::Exit(code) => {
                    debug!("emulator: exit {} after {} steps", code, steps);
                    return Ok(Execution {
                        stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
                        exit_code: code,
                        calls: self.calls.clone(),
                        steps,
                    });
                }
            }
        }
    }

    fn reg(&self, reg: AsmReg) -> u64 {
        if registers::is_xmm(reg) {
            self.xmm[reg.id as usize]
        } else {
            self.gp[reg.id as usize]
        }
    }

    fn set_reg(&mut self, reg: AsmReg, value: u64) {
        if registers::is_xmm(reg) {
            self.xmm[reg.id as usize] = value;
        } else {
            self.gp[reg.id as usize] = value;
        }
    }

    fn address(&self, mem: &Memory) -> EmuResult<u64> {
        let base = match &mem.base {
            MemBase::Reg(reg) => self.reg(*reg),
            MemBase::Symbol(name) => self.symbol(name)?,
        };
        let index = mem
            .index
            .map(|(reg, scale)| self.reg(reg).wrapping_mul(scale as u64))
            .unwrap_or(0);
        Ok(base.wrapping_add(index).wrapping_add(mem.disp as u64))
    }

    fn read(&self, operand: &Operand) -> EmuResult<u64> {
        match operand {
            Operand::Reg(reg) => Ok(self.reg(*reg)),
            Operand::Reg32(reg) => Ok(self.reg(*reg) & 0xffff_ffff),
            Operand::Imm(value) => Ok(*value as u64),
            Operand::Mem(mem) => self.memory.read_u64(self.address(mem)?),
            other => Err(EmulatorError::Unsupported(format!("reading {other}"))),
        }
    }

    fn write(&mut self, operand: &Operand, value: u64) -> EmuResult<()> {
        match operand {
            Operand::Reg(reg) => self.set_reg(*reg, value),
            Operand::Reg32(reg) => self.set_reg(*reg, value & 0xffff_ffff),
            Operand::Mem(mem) => {
                let address = self.address(mem)?;
                self.memory.write_u64(address, value)?;
            }
            other => return Err(EmulatorError::Unsupported(format!("writing {other}"))),
        }
        Ok(())
    }

    fn push(&mut self, value: u64) -> EmuResult<()> {
        let rsp = self.gp[RSP.id as usize].wrapping_sub(8);
        self.gp[RSP.id as usize] = rsp;
        self.memory.write_u64(rsp, value)
    }

    fn pop(&mut self) -> EmuResult<u64> {
        let rsp = self.gp[RSP.id as usize];
        let value = self.memory.read_u64(rsp)?;
        self.gp[RSP.id as usize] = rsp.wrapping_add(8);
        Ok(value)
    }

    fn jump_target(&self, pc: usize, operand: &Operand) -> EmuResult<usize> {
        match operand {
            Operand::Label(name) => self
                .labels
                .get(name.as_str())
                .copied()
                .ok_or_else(|| EmulatorError::UnknownLabel(name.clone())),
            Operand::Forward => self
                .anonymous
                .iter()
                .copied()
                .find(|&index| index > pc)
                .ok_or_else(|| EmulatorError::UnknownLabel("@f".to_string())),
            Operand::Backward => self
                .anonymous
                .iter()
                .copied()
                .rev()
                .find(|&index| index < pc)
                .ok_or_else(|| EmulatorError::UnknownLabel("@b".to_string())),
            other => Err(EmulatorError::Unsupported(format!("jump to {other}"))),
        }
    }

    fn float_op(&mut self, operands: &[Operand], f: impl Fn(f64, f64) -> f64) -> EmuResult<()> {
        let [dst, src] = operands else {
            return Err(EmulatorError::Unsupported("float operand count".to_string()));
        };
        let a = f64::from_bits(self.read(dst)?);
        let b = f64::from_bits(self.read(src)?);
        self.write(dst, f(a, b).to_bits())
    }

    fn step(&mut self, pc: usize, op: Mnemonic, operands: &[Operand]) -> EmuResult<Step> {
        use Mnemonic::*;
        let operand = |i: usize| {
            operands
                .get(i)
                .ok_or_else(|| EmulatorError::Unsupported(format!("{op} without operand {i}")))
        };

        match op {
            // Only the low lane of an XMM register is modelled.
            Mov | Movsd | Movq | Movdqu => {
                let value = self.read(operand(1)?)?;
                self.write(operand(0)?, value)?;
            }
            Movsxd => {
                let value = self.read(operand(1)?)? as u32 as i32 as i64;
                self.write(operand(0)?, value as u64)?;
            }
            Lea => {
                let Operand::Mem(mem) = operand(1)? else {
                    return Err(EmulatorError::Unsupported("lea without memory operand".to_string()));
                };
                let address = self.address(mem)?;
                self.write(operand(0)?, address)?;
            }
            Add | Sub | Cmp | Imul | And | Or | Xor | Shl => {
                let dst = operand(0)?;
                let a = self.read(dst)?;
                let b = self.read(operand(1)?)?;
                let (result, flags) = match op {
                    Add => (a.wrapping_add(b), Flags::add(a, b)),
                    Sub | Cmp => (a.wrapping_sub(b), Flags::sub(a, b)),
                    Imul => {
                        let (result, overflow) = (a as i64).overflowing_mul(b as i64);
                        let result = result as u64;
                        (result, Flags { of: overflow, cf: overflow, ..Flags::logic(result) })
                    }
                    And => (a & b, Flags::logic(a & b)),
                    Or => (a | b, Flags::logic(a | b)),
                    Xor => (a ^ b, Flags::logic(a ^ b)),
                    _ => {
                        let result = a << (b & 63);
                        (result, Flags::logic(result))
                    }
                };
                self.flags = flags;
                if op != Cmp {
                    self.write(dst, result)?;
                }
            }
            Neg => {
                let dst = operand(0)?;
                let a = self.read(dst)?;
                self.flags = Flags::sub(0, a);
                self.write(dst, 0u64.wrapping_sub(a))?;
            }
            Not => {
                let dst = operand(0)?;
                let a = self.read(dst)?;
                self.write(dst, !a)?;
            }
            Cqo => {
                let negative = (self.reg(RAX) as i64) < 0;
                self.set_reg(RDX, if negative { u64::MAX } else { 0 });
            }
            Idiv => {
                let divisor = self.read(operand(0)?)? as i64;
                let dividend = self.reg(RAX) as i64;
                if divisor == 0 || (dividend == i64::MIN && divisor == -1) {
                    return Err(EmulatorError::DivideError);
                }
                self.set_reg(RAX, (dividend / divisor) as u64);
                self.set_reg(RDX, (dividend % divisor) as u64);
            }
            Push => {
                let value = self.read(operand(0)?)?;
                self.push(value)?;
            }
            Pop => {
                let value = self.pop()?;
                self.write(operand(0)?, value)?;
            }
            Call => return self.call(pc, operand(0)?),
            Ret => {
                let address = self.pop()?;
                if address == EXIT_ADDRESS {
                    return Ok(Step::Exit(self.reg(RAX) as i64));
                }
                return match address.checked_sub(CODE_BASE) {
                    Some(index) if (index as usize) < self.module.code.len() => {
                        Ok(Step::Jump(index as usize))
                    }
                    _ => Err(EmulatorError::BadReturn(address)),
                };
            }
            Jmp => return Ok(Step::Jump(self.jump_target(pc, operand(0)?)?)),
            J(cond) => {
                if self.flags.holds(cond) {
                    return Ok(Step::Jump(self.jump_target(pc, operand(0)?)?));
                }
            }
            Addsd => self.float_op(operands, |a, b| a + b)?,
            Subsd => self.float_op(operands, |a, b| a - b)?,
            Mulsd => self.float_op(operands, |a, b| a * b)?,
            Divsd => self.float_op(operands, |a, b| a / b)?,
            Ucomisd => {
                let a = f64::from_bits(self.read(operand(0)?)?);
                let b = f64::from_bits(self.read(operand(1)?)?);
                let (zf, pf, cf) = match a.partial_cmp(&b) {
                    None => (true, true, true),
                    Some(std::cmp::Ordering::Less) => (false, false, true),
                    Some(std::cmp::Ordering::Equal) => (true, false, false),
                    Some(std::cmp::Ordering::Greater) => (false, false, false),
                };
                self.flags = Flags { zf, pf, cf, of: false, sf: false };
            }
            Xorpd => {
                let dst = operand(0)?;
                let value = self.read(dst)? ^ self.read(operand(1)?)?;
                self.write(dst, value)?;
            }
            Cvtsi2sd => {
                let value = self.read(operand(1)?)? as i64 as f64;
                self.write(operand(0)?, value.to_bits())?;
            }
            Cvttsd2si => {
                let value = f64::from_bits(self.read(operand(1)?)?);
                // out of range converts to the integer indefinite value
                let in_range = (-9.223_372_036_854_775_808e18..9.223_372_036_854_775_808e18).contains(&value);
                let converted = if in_range { value.trunc() as i64 } else { i64::MIN };
                self.write(operand(0)?, converted as u64)?;
            }
        }
        Ok(Step::Next)
    }

    fn call(&mut self, pc: usize, target: &Operand) -> EmuResult<Step> {
        let rsp = self.reg(RSP);
        let name = match target {
            Operand::Label(label) => label.clone(),
            Operand::Mem(mem) => mem
                .symbol_name()
                .map(str::to_string)
                .ok_or_else(|| EmulatorError::Unsupported(format!("indirect call through {mem}")))?,
            other => return Err(EmulatorError::Unsupported(format!("call to {other}"))),
        };
        if rsp % 16 != 0 {
            return Err(EmulatorError::Misaligned { target: name, rsp });
        }
        *self.calls.entry(name.clone()).or_insert(0) += 1;

        if let Operand::Label(label) = target {
            let index = self.jump_target(pc, target)?;
            trace!("call {} -> line {}", label, index);
            self.push(CODE_BASE + pc as u64 + 1)?;
            return Ok(Step::Jump(index));
        }
        if !self.imports.iter().any(|import| *import == name) {
            return Err(EmulatorError::UnknownImport(name));
        }
        match msvcrt::call(self, &name)? {
            msvcrt::Outcome::Return => Ok(Step::Next),
            msvcrt::Outcome::Exit(code) => Ok(Step::Exit(code)),
        }
    }
}

/// Run a module to completion.
pub fn run(module: &AsmModule) -> EmuResult<Execution> {
    Emulator::new(module)?.run()
}
