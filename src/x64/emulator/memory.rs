//! Flat address space with a tracked heap.

use std::collections::BTreeMap;

use super::EmulatorError;

/// First mapped address; everything below faults, like the null page.
pub const DATA_BASE: u64 = 0x1000;
pub const HEAP_BASE: u64 = 0x20_0000;
pub const STACK_TOP: u64 = 0x80_0000;
const HEAP_ALIGN: u64 = 16;

pub struct AddressSpace {
    bytes: Vec<u8>,
    heap_top: u64,
    /// Live heap blocks, start to size.
    live: BTreeMap<u64, u64>,
    /// Freed heap blocks, start to size. The heap never reuses addresses.
    freed: BTreeMap<u64, u64>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; STACK_TOP as usize],
            heap_top: HEAP_BASE,
            live: BTreeMap::new(),
            freed: BTreeMap::new(),
        }
    }

    fn check(&self, address: u64, len: u64) -> Result<usize, EmulatorError> {
        let end = address.checked_add(len).ok_or(EmulatorError::OutOfBounds { address })?;
        if address < DATA_BASE || end > STACK_TOP {
            return Err(EmulatorError::OutOfBounds { address });
        }
        if (HEAP_BASE..self.heap_top).contains(&address) {
            if let Some((&start, &size)) = self.freed.range(..=address).next_back() {
                if address < start + size {
                    return Err(EmulatorError::UseAfterFree { address });
                }
            }
        }
        Ok(address as usize)
    }

    pub fn read_u64(&self, address: u64) -> Result<u64, EmulatorError> {
        let at = self.check(address, 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.bytes[at..at + 8]);
        Ok(u64::from_le_bytes(word))
    }

    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<(), EmulatorError> {
        let at = self.check(address, 8)?;
        self.bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), EmulatorError> {
        let at = self.check(address, data.len() as u64)?;
        self.bytes[at..at + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Bytes of the NUL terminated string at `address`, terminator excluded.
    pub fn c_string(&self, address: u64) -> Result<Vec<u8>, EmulatorError> {
        let mut out = Vec::new();
        let mut at = address;
        loop {
            let index = self.check(at, 1)?;
            match self.bytes[index] {
                0 => return Ok(out),
                b => out.push(b),
            }
            at += 1;
        }
    }

    pub fn malloc(&mut self, size: u64) -> Result<u64, EmulatorError> {
        let size = size.max(1);
        let address = self.heap_top;
        let end = address
            .checked_add(size)
            .map(|end| end.div_ceil(HEAP_ALIGN) * HEAP_ALIGN)
            .filter(|&end| end <= STACK_TOP / 2)
            .ok_or(EmulatorError::OutOfMemory { requested: size })?;
        self.heap_top = end;
        self.live.insert(address, size);
        Ok(address)
    }

    pub fn free(&mut self, address: u64) -> Result<(), EmulatorError> {
        if address == 0 {
            return Ok(());
        }
        match self.live.remove(&address) {
            Some(size) => {
                self.freed.insert(address, size);
                Ok(())
            }
            None if self.freed.contains_key(&address) => Err(EmulatorError::DoubleFree { address }),
            None => Err(EmulatorError::InvalidFree { address }),
        }
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().sum()
    }
}
