//! x86-64 register names and the register classes used by storage allocation.
//!
//! Registers are plain [`AsmReg`] values: bank 0 holds the sixteen general purpose registers
//! numbered by their hardware encoding, bank 1 holds XMM0-XMM15.

use crate::core::register_file::{AsmReg, RegBank};

pub const GP: RegBank = 0;
pub const XMM: RegBank = 1;

pub const RAX: AsmReg = AsmReg::new(GP, 0);
pub const RCX: AsmReg = AsmReg::new(GP, 1);
pub const RDX: AsmReg = AsmReg::new(GP, 2);
pub const RBX: AsmReg = AsmReg::new(GP, 3);
pub const RSP: AsmReg = AsmReg::new(GP, 4);
pub const RBP: AsmReg = AsmReg::new(GP, 5);
pub const RSI: AsmReg = AsmReg::new(GP, 6);
pub const RDI: AsmReg = AsmReg::new(GP, 7);
pub const R8: AsmReg = AsmReg::new(GP, 8);
pub const R9: AsmReg = AsmReg::new(GP, 9);
pub const R10: AsmReg = AsmReg::new(GP, 10);
pub const R11: AsmReg = AsmReg::new(GP, 11);
pub const R12: AsmReg = AsmReg::new(GP, 12);
pub const R13: AsmReg = AsmReg::new(GP, 13);
pub const R14: AsmReg = AsmReg::new(GP, 14);
pub const R15: AsmReg = AsmReg::new(GP, 15);

pub const fn xmm(id: u8) -> AsmReg {
    AsmReg::new(XMM, id)
}

pub const XMM0: AsmReg = xmm(0);
pub const XMM1: AsmReg = xmm(1);
pub const XMM2: AsmReg = xmm(2);
pub const XMM3: AsmReg = xmm(3);
pub const XMM4: AsmReg = xmm(4);
pub const XMM5: AsmReg = xmm(5);

/// Pooled caller-saved general purpose registers, in allocation order.
pub static VOLATILE_GP: [AsmReg; 4] = [RCX, R8, R9, R10];
/// Pooled callee-saved general purpose registers, in allocation order.
pub static NON_VOLATILE_GP: [AsmReg; 7] = [RBX, RSI, RDI, R12, R13, R14, R15];
pub static VOLATILE_XMM: [AsmReg; 3] = [XMM1, XMM2, XMM3];
pub static NON_VOLATILE_XMM: [AsmReg; 10] = [
    xmm(6),
    xmm(7),
    xmm(8),
    xmm(9),
    xmm(10),
    xmm(11),
    xmm(12),
    xmm(13),
    xmm(14),
    xmm(15),
];

/// General purpose scratch for memory-to-memory moves; never pooled.
pub const SCRATCH: AsmReg = R11;
/// Float scratch registers; never pooled.
pub const SCRATCH_XMM: AsmReg = XMM4;
pub const SCRATCH_XMM2: AsmReg = XMM5;

const GP_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

const GP32_NAMES: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d",
];

const XMM_NAMES: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

pub fn is_xmm(reg: AsmReg) -> bool {
    reg.bank == XMM
}

/// Assembler name of the full register.
pub fn name(reg: AsmReg) -> &'static str {
    let table = if is_xmm(reg) { &XMM_NAMES } else { &GP_NAMES };
    table.get(reg.id as usize).copied().unwrap_or("?")
}

/// Name of the low 32 bits of a general purpose register.
pub fn name32(reg: AsmReg) -> &'static str {
    GP32_NAMES.get(reg.id as usize).copied().unwrap_or("?")
}

pub fn by_name(name: &str) -> Option<AsmReg> {
    if let Some(id) = GP_NAMES.iter().position(|&n| n == name) {
        return Some(AsmReg::new(GP, id as u8));
    }
    XMM_NAMES
        .iter()
        .position(|&n| n == name)
        .map(|id| xmm(id as u8))
}

/// Caller-saved under the Windows x64 convention.
pub fn is_volatile(reg: AsmReg) -> bool {
    if is_xmm(reg) {
        reg.id <= 5
    } else {
        matches!(reg.id, 0 | 1 | 2 | 8 | 9 | 10 | 11)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_names() {
        assert_eq!(name(RAX), "rax");
        assert_eq!(name(R11), "r11");
        assert_eq!(name(xmm(15)), "xmm15");
        assert_eq!(name32(RAX), "eax");
        assert_eq!(name32(R10), "r10d");
        assert_eq!(by_name("rsi"), Some(RSI));
        assert_eq!(by_name("xmm3"), Some(XMM3));
        assert_eq!(by_name("ax"), None);
    }

    #[test]
    fn test_pools_match_volatility() {
        assert!(VOLATILE_GP.iter().all(|&r| is_volatile(r)));
        assert!(VOLATILE_XMM.iter().all(|&r| is_volatile(r)));
        assert!(NON_VOLATILE_GP.iter().all(|&r| !is_volatile(r)));
        assert!(NON_VOLATILE_XMM.iter().all(|&r| !is_volatile(r)));
        for scratch in [RAX, RDX, SCRATCH, SCRATCH_XMM, SCRATCH_XMM2, RSP, RBP] {
            assert!(!VOLATILE_GP.contains(&scratch) && !NON_VOLATILE_GP.contains(&scratch));
            assert!(!VOLATILE_XMM.contains(&scratch) && !NON_VOLATILE_XMM.contains(&scratch));
        }
    }
}
