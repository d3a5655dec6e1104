//! Simulated msvcrt functions.
//!
//! Arguments follow the Windows x64 convention as seen from the callee: the first four in
//! RCX/RDX/R8/R9 (or XMM0-3 for doubles of non-variadic functions), the rest at
//! `[rsp+32+8k]`. Variadic functions read every argument from the integer side.

use log::trace;

use super::{EmuResult, Emulator, EmulatorError};
use crate::core::register_file::AsmReg;
use crate::x64::registers::{self, RAX, RCX, RDX, R10, R11, R8, R9, RSP, XMM0};

pub(super) enum Outcome {
    Return,
    Exit(i64),
}

/// Value left in clobbered registers.
const GARBAGE: u64 = 0xcccc_cccc_cccc_cccc;
/// Upper half `strcmp` leaves in RAX; only EAX is defined.
const STRCMP_GARBAGE: u64 = 0xdead_beef_0000_0000;

const GP_ARGS: [AsmReg; 4] = [RCX, RDX, R8, R9];

enum Result64 {
    Int(u64),
    Float(f64),
    None,
}

impl Emulator<'_> {
    fn int_arg(&self, index: usize) -> EmuResult<u64> {
        match GP_ARGS.get(index) {
            Some(&reg) => Ok(self.reg(reg)),
            None => self.memory.read_u64(self.reg(RSP) + 32 + 8 * (index as u64 - 4)),
        }
    }

    fn float_arg(&self, index: usize) -> EmuResult<f64> {
        if index < 4 {
            Ok(f64::from_bits(self.xmm[index]))
        } else {
            self.int_arg(index).map(f64::from_bits)
        }
    }

    fn string_arg(&self, index: usize) -> EmuResult<Vec<u8>> {
        self.memory.c_string(self.int_arg(index)?)
    }

    fn clobber_volatile(&mut self) {
        for reg in [RAX, RCX, RDX, R8, R9, R10, R11] {
            self.set_reg(reg, GARBAGE);
        }
        for id in 0..6 {
            self.set_reg(registers::xmm(id), GARBAGE);
        }
    }
}

pub(super) fn call(emu: &mut Emulator<'_>, name: &str) -> EmuResult<Outcome> {
    trace!("msvcrt: {}", name);
    let result = match name {
        "malloc" => {
            let size = emu.int_arg(0)?;
            Result64::Int(emu.memory.malloc(size)?)
        }
        "free" => {
            let pointer = emu.int_arg(0)?;
            emu.memory.free(pointer)?;
            Result64::None
        }
        "strlen" => Result64::Int(emu.string_arg(0)?.len() as u64),
        "strcpy" => {
            let dst = emu.int_arg(0)?;
            let mut text = emu.string_arg(1)?;
            text.push(0);
            emu.memory.write_bytes(dst, &text)?;
            Result64::Int(dst)
        }
        "strcat" => {
            let dst = emu.int_arg(0)?;
            let start = dst + emu.memory.c_string(dst)?.len() as u64;
            let mut text = emu.string_arg(1)?;
            text.push(0);
            emu.memory.write_bytes(start, &text)?;
            Result64::Int(dst)
        }
        "strcmp" => {
            let ordering = emu.string_arg(0)?.cmp(&emu.string_arg(1)?);
            Result64::Int(STRCMP_GARBAGE | (ordering as i32 as u32 as u64))
        }
        "_strdup" => {
            let mut text = emu.string_arg(0)?;
            text.push(0);
            let copy = emu.memory.malloc(text.len() as u64)?;
            emu.memory.write_bytes(copy, &text)?;
            Result64::Int(copy)
        }
        "printf" => {
            let format = emu.string_arg(0)?;
            let text = format_c(emu, &format, 1)?;
            emu.stdout.extend_from_slice(&text);
            Result64::Int(text.len() as u64)
        }
        "sprintf" => {
            let dst = emu.int_arg(0)?;
            let format = emu.string_arg(1)?;
            let mut text = format_c(emu, &format, 2)?;
            let written = text.len() as u64;
            text.push(0);
            emu.memory.write_bytes(dst, &text)?;
            Result64::Int(written)
        }
        "exit" => return Ok(Outcome::Exit(emu.int_arg(0)? as i32 as i64)),
        "_atoi64" => Result64::Int(parse_int_prefix(&emu.string_arg(0)?) as u64),
        "atof" => Result64::Float(parse_float_prefix(&emu.string_arg(0)?)),
        "_abs64" => Result64::Int((emu.int_arg(0)? as i64).wrapping_abs() as u64),
        "sqrt" => Result64::Float(emu.float_arg(0)?.sqrt()),
        "floor" => Result64::Float(emu.float_arg(0)?.floor()),
        "fabs" => Result64::Float(emu.float_arg(0)?.abs()),
        "pow" => Result64::Float(emu.float_arg(0)?.powf(emu.float_arg(1)?)),
        other => return Err(EmulatorError::UnknownImport(other.to_string())),
    };

    emu.clobber_volatile();
    match result {
        Result64::Int(value) => emu.set_reg(RAX, value),
        Result64::Float(value) => emu.set_reg(XMM0, value.to_bits()),
        Result64::None => {}
    }
    Ok(Outcome::Return)
}

/// `printf` style formatting of the variadic arguments starting at `first`.
fn format_c(emu: &Emulator<'_>, format: &[u8], first: usize) -> EmuResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut next = first;
    let mut i = 0;
    while i < format.len() {
        let c = format[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }

        let mut precision = None;
        if format.get(i) == Some(&b'.') {
            i += 1;
            let start = i;
            while format.get(i).is_some_and(u8::is_ascii_digit) {
                i += 1;
            }
            precision = std::str::from_utf8(&format[start..i]).ok().and_then(|p| p.parse().ok());
        }
        let mut long = 0;
        while format.get(i) == Some(&b'l') {
            long += 1;
            i += 1;
        }
        let conversion = format
            .get(i)
            .copied()
            .ok_or_else(|| EmulatorError::Unsupported("truncated format directive".to_string()))?;
        i += 1;

        match conversion {
            b'%' => out.push(b'%'),
            b'd' | b'i' => {
                let raw = emu.int_arg(next)?;
                let value = if long >= 2 { raw as i64 } else { raw as i32 as i64 };
                out.extend_from_slice(value.to_string().as_bytes());
                next += 1;
            }
            b'f' => {
                let value = f64::from_bits(emu.int_arg(next)?);
                out.extend_from_slice(c_float(value, precision.unwrap_or(6)).as_bytes());
                next += 1;
            }
            b's' => {
                out.extend_from_slice(&emu.string_arg(next)?);
                next += 1;
            }
            other => {
                return Err(EmulatorError::Unsupported(format!(
                    "format conversion %{}",
                    other as char
                )))
            }
        }
    }
    Ok(out)
}

fn c_float(value: f64, precision: usize) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let text = if value < 0.0 { "-inf" } else { "inf" };
        text.to_string()
    } else {
        format!("{value:.precision$}")
    }
}

fn skip_space(text: &[u8]) -> &[u8] {
    let start = text.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(text.len());
    &text[start..]
}

fn parse_int_prefix(text: &[u8]) -> i64 {
    let text = skip_space(text);
    let (negative, digits) = match text.first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for &b in digits.iter().take_while(|b| b.is_ascii_digit()) {
        value = value.wrapping_mul(10).wrapping_add((b - b'0') as i64);
    }
    if negative {
        value.wrapping_neg()
    } else {
        value
    }
}

fn parse_float_prefix(text: &[u8]) -> f64 {
    let text = skip_space(text);
    let mut end = 0;
    let digits = |from: usize| from + text[from..].iter().take_while(|b| b.is_ascii_digit()).count();
    if matches!(text.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    end = digits(end);
    if text.get(end) == Some(&b'.') {
        end = digits(end + 1);
    }
    if matches!(text.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(text.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    std::str::from_utf8(&text[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}
