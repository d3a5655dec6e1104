//! Register bookkeeping.
//!
//! This module implements the RegisterFile that tracks which allocatable registers are
//! currently owned by a storage location and which have been touched at least once. The
//! storage layer asks for the first free register out of an ordered candidate list, so the
//! allocation order is decided by the caller's register class table rather than by bank
//! position.

use thiserror::Error;

/// Maximum number of register banks supported (GP, FP, etc.).
pub const MAX_REGISTER_BANKS: usize = 4;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegBitSet {
    /// Bit mask for each register bank.
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    /// Create empty register set.
    pub fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    /// Check if register is set.
    pub fn contains(&self, reg: AsmReg) -> bool {
        if reg.bank as usize >= MAX_REGISTER_BANKS || reg.id >= 64 {
            return false;
        }
        (self.banks[reg.bank as usize] & (1u64 << reg.id)) != 0
    }

    /// Set a register.
    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    /// Clear a register.
    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    /// Set union with another set.
    pub fn union(&mut self, other: &RegBitSet) {
        for i in 0..MAX_REGISTER_BANKS {
            self.banks[i] |= other.banks[i];
        }
    }

    /// Count number of set registers in bank.
    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        if bank as usize >= MAX_REGISTER_BANKS {
            return 0;
        }
        self.banks[bank as usize].count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.banks.iter().all(|&b| b == 0)
    }

    /// Registers in the set, bank by bank in id order.
    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        self.banks.iter().enumerate().flat_map(|(bank, &mask)| {
            (0..64u8)
                .filter(move |id| mask & (1u64 << id) != 0)
                .map(move |id| AsmReg::new(bank as RegBank, id))
        })
    }
}

impl Default for RegBitSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Error types for register allocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegAllocError {
    /// Register is not allocated.
    #[error("register is not allocated")]
    RegisterNotAllocated,
    /// Register is outside the allocatable set.
    #[error("register is not allocatable")]
    InvalidRegister,
}

/// RegisterFile tracks register ownership for a single routine.
pub struct RegisterFile {
    /// Registers available for allocation (excludes SP, BP and scratch).
    allocatable: RegBitSet,
    /// Currently allocated registers.
    used: RegBitSet,
    /// Registers that have been allocated at least once since the last reset.
    touched: RegBitSet,
}

impl RegisterFile {
    pub fn new(allocatable: RegBitSet) -> Self {
        Self {
            allocatable,
            used: RegBitSet::new(),
            touched: RegBitSet::new(),
        }
    }

    /// Allocate the first free register of `candidates`, in order.
    pub fn allocate_first(&mut self, candidates: &[AsmReg]) -> Option<AsmReg> {
        let reg = candidates
            .iter()
            .copied()
            .find(|&r| self.allocatable.contains(r) && !self.used.contains(r))?;
        self.used.set(reg);
        self.touched.set(reg);
        Some(reg)
    }

    /// Free a register.
    pub fn free_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.allocatable.contains(reg) {
            return Err(RegAllocError::InvalidRegister);
        }
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated);
        }
        self.used.clear(reg);
        Ok(())
    }

    /// Check if register is currently allocated.
    pub fn is_allocated(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    pub fn used(&self) -> &RegBitSet {
        &self.used
    }

    pub fn touched(&self) -> &RegBitSet {
        &self.touched
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_regfile() -> RegisterFile {
        let regs: Vec<AsmReg> = (0..8)
            .map(|i| AsmReg::new(0, i))
            .chain((0..8).map(|i| AsmReg::new(1, i)))
            .collect();
        RegisterFile::new(RegBitSet::from_regs(&regs))
    }

    #[test]
    fn test_regbitset_operations() {
        let mut set = RegBitSet::new();
        let reg = AsmReg::new(0, 5);

        assert!(!set.contains(reg));
        set.set(reg);
        assert!(set.contains(reg));
        set.clear(reg);
        assert!(!set.contains(reg));
        assert!(set.is_empty());
    }

    #[test]
    fn test_regbitset_iter_order() {
        let set = RegBitSet::from_regs(&[AsmReg::new(1, 2), AsmReg::new(0, 7), AsmReg::new(0, 1)]);
        let regs: Vec<_> = set.iter().collect();
        assert_eq!(regs, vec![AsmReg::new(0, 1), AsmReg::new(0, 7), AsmReg::new(1, 2)]);
    }

    #[test]
    fn test_allocation_follows_candidate_order() {
        let mut regfile = create_test_regfile();
        let order = [AsmReg::new(0, 3), AsmReg::new(0, 1), AsmReg::new(0, 2)];

        assert_eq!(regfile.allocate_first(&order), Some(AsmReg::new(0, 3)));
        assert_eq!(regfile.allocate_first(&order), Some(AsmReg::new(0, 1)));
        regfile.free_register(AsmReg::new(0, 3)).unwrap();
        assert_eq!(regfile.allocate_first(&order), Some(AsmReg::new(0, 3)));
        assert_eq!(regfile.allocate_first(&order), Some(AsmReg::new(0, 2)));
        assert_eq!(regfile.allocate_first(&order), None);
    }

    #[test]
    fn test_free_errors() {
        let mut regfile = create_test_regfile();
        assert_eq!(
            regfile.free_register(AsmReg::new(0, 2)),
            Err(RegAllocError::RegisterNotAllocated)
        );
        assert_eq!(
            regfile.free_register(AsmReg::new(2, 0)),
            Err(RegAllocError::InvalidRegister)
        );
    }

    #[test]
    fn test_touched_survives_free() {
        let mut regfile = create_test_regfile();
        let reg = regfile.allocate_first(&[AsmReg::new(1, 4)]).unwrap();
        regfile.free_register(reg).unwrap();

        assert!(!regfile.is_allocated(reg));
        assert!(regfile.touched().contains(reg));
        assert_eq!(regfile.touched().count_in_bank(1), 1);
        assert!(regfile.used().is_empty());
    }
}
