use crate::rom::{Address, Rom};
use crate::{OwmError, Result};

/// Bytes of this value are available for allocation.
pub const FREE_BYTE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Halfword,
    Word,
}

impl Alignment {
    pub fn bytes(self) -> u32 {
        match self {
            Alignment::Halfword => 2,
            Alignment::Word => 4,
        }
    }

    fn align_up(self, addr: usize) -> usize {
        let step = self.bytes() as usize;
        addr.div_ceil(step) * step
    }
}

/// Finds the first aligned run of `size` free bytes at or after `hint`.
pub fn find_free_space(rom: &Rom, size: u32, hint: Address, align: Alignment) -> Result<Address> {
    let bytes = rom.as_bytes();
    let size_us = size as usize;
    let mut start = align.align_up(hint as usize);

    while start + size_us <= bytes.len() {
        match bytes[start..start + size_us]
            .iter()
            .rposition(|&b| b != FREE_BYTE)
        {
            None => return Ok(start as Address),
            // Nothing before the last used byte can start a long enough run.
            Some(used) => start = align.align_up(start + used + 1),
        }
    }

    Err(OwmError::NoFreeSpace { size, hint })
}

/// True iff all `size` bytes at `addr` are free.
pub fn is_free(rom: &Rom, addr: Address, size: u32) -> bool {
    match rom.read_bytes(addr, size) {
        Ok(bytes) => bytes.iter().all(|&b| b == FREE_BYTE),
        Err(_) => false,
    }
}
