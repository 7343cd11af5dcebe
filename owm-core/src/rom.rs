use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::fmt;
use std::fs;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::Path;

use crate::{OwmError, Result};

/// Byte offset into the image.
pub type Address = u32;

/// GBA cartridge space starts at 0x0800_0000; a pointer word is the image
/// offset plus this base.
pub const POINTER_BASE: u32 = 0x0800_0000;

/// Reserved "empty" pointer. It carries a valid bank byte but never decodes.
pub const EMPTY_POINTER: u32 = 0x0800_0000;

/// A word of free bytes.
pub const FREE_WORD: u32 = 0xFFFF_FFFF;

const GAME_CODE_OFFSET: Address = 0xAC;

pub fn encode_pointer(addr: Address) -> u32 {
    debug_assert!(addr < 0x0200_0000, "address {addr:#X} is outside cartridge space");
    POINTER_BASE.wrapping_add(addr)
}

/// Decodes a pointer word against an image of `image_len` bytes.
///
/// Only the two cartridge banks (0x08 and 0x09) are accepted, the empty
/// sentinel never decodes, and the target must lie inside the image.
pub fn decode_pointer(word: u32, image_len: usize) -> Option<Address> {
    if word == EMPTY_POINTER {
        return None;
    }
    match word >> 24 {
        0x08 | 0x09 => {}
        _ => return None,
    }

    let addr = word - POINTER_BASE;
    if (addr as usize) < image_len {
        Some(addr)
    } else {
        None
    }
}

/// The whole image, held in memory. Every write lands immediately.
#[derive(Clone, PartialEq, Eq)]
pub struct Rom {
    data: Vec<u8>,
}

impl fmt::Debug for Rom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rom").field("len", &self.data.len()).finish()
    }
}

impl Rom {
    pub fn new(data: Vec<u8>) -> Self {
        Rom { data }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Rom::new(fs::read(path)?))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    /// Writes a gzip-compressed copy of the image.
    pub fn write_backup(&self, path: &Path) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&self.data)?;
        fs::write(path, encoder.finish()?)?;
        Ok(())
    }

    pub fn read_backup(path: &Path) -> Result<Self> {
        let raw = fs::read(path)?;
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut data = Vec::new();
        decoder.read_to_end(&mut data)?;
        Ok(Rom::new(data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn span(&self, addr: Address, len: u32) -> Result<Range<usize>> {
        let start = addr as usize;
        start
            .checked_add(len as usize)
            .filter(|&end| end <= self.data.len())
            .map(|end| start..end)
            .ok_or(OwmError::OutOfBounds { addr, len })
    }

    pub fn read_byte(&self, addr: Address) -> Result<u8> {
        let range = self.span(addr, 1)?;
        Ok(self.data[range.start])
    }

    pub fn read_word(&self, addr: Address) -> Result<u32> {
        let b = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&self, addr: Address, len: u32) -> Result<&[u8]> {
        let range = self.span(addr, len)?;
        Ok(&self.data[range])
    }

    pub fn write_byte(&mut self, addr: Address, value: u8) -> Result<()> {
        let range = self.span(addr, 1)?;
        self.data[range.start] = value;
        Ok(())
    }

    pub fn write_word(&mut self, addr: Address, value: u32) -> Result<()> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    pub fn write_bytes(&mut self, addr: Address, bytes: &[u8]) -> Result<()> {
        let range = self.span(addr, bytes.len() as u32)?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// `Ok(None)` means the word is there but is not a usable pointer.
    pub fn read_pointer(&self, addr: Address) -> Result<Option<Address>> {
        let word = self.read_word(addr)?;
        Ok(decode_pointer(word, self.data.len()))
    }

    pub fn write_pointer(&mut self, addr: Address, target: Address) -> Result<()> {
        self.write_word(addr, encode_pointer(target))
    }

    /// True iff the word at `addr` decodes to an address inside the image.
    /// Reads past the end count as "not a pointer".
    pub fn is_ptr(&self, addr: Address) -> bool {
        matches!(self.read_pointer(addr), Ok(Some(_)))
    }

    pub fn fill(&mut self, addr: Address, len: u32, value: u8) -> Result<()> {
        let range = self.span(addr, len)?;
        self.data[range].fill(value);
        Ok(())
    }

    /// Moves `len` bytes from `src` to `dst` (overlap-safe). Source bytes
    /// that the destination does not cover afterwards are set to `vacated`.
    pub fn move_data(&mut self, src: Address, dst: Address, len: u32, vacated: u8) -> Result<()> {
        let from = self.span(src, len)?;
        let to = self.span(dst, len)?;
        self.data.copy_within(from.clone(), to.start);
        for i in from {
            if !to.contains(&i) {
                self.data[i] = vacated;
            }
        }
        Ok(())
    }

    pub fn copy_data(&mut self, src: Address, dst: Address, len: u32) -> Result<()> {
        let from = self.span(src, len)?;
        let to = self.span(dst, len)?;
        self.data.copy_within(from, to.start);
        Ok(())
    }

    /// True if `pattern` occurs anywhere inside `[addr, addr + len)`.
    pub fn contains_pattern(&self, addr: Address, len: u32, pattern: &[u8]) -> Result<bool> {
        let haystack = self.read_bytes(addr, len)?;
        if pattern.is_empty() {
            return Ok(true);
        }
        Ok(haystack.windows(pattern.len()).any(|w| w == pattern))
    }

    /// Every word-aligned location whose word is a pointer to `target`.
    pub fn find_pointer_occurrences(&self, target: Address) -> Vec<Address> {
        let needle = encode_pointer(target).to_le_bytes();
        self.data
            .chunks_exact(4)
            .enumerate()
            .filter(|(_, word)| *word == needle)
            .map(|(i, _)| (i * 4) as Address)
            .collect()
    }

    /// Four-character game code from the cartridge header, e.g. `BPRE`.
    pub fn game_code(&self) -> Option<String> {
        let raw = self.read_bytes(GAME_CODE_OFFSET, 4).ok()?;
        if raw.iter().all(|b| b.is_ascii_alphanumeric()) {
            Some(String::from_utf8_lossy(raw).into_owned())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rom_of(len: usize) -> Rom {
        Rom::new(vec![0xFF; len])
    }

    proptest! {
        #[test]
        fn pointer_round_trips(addr in 1u32..0x0200_0000) {
            let word = encode_pointer(addr);
            prop_assert_eq!(decode_pointer(word, 0x0200_0000), Some(addr));
        }
    }

    #[test]
    fn decode_rejects_foreign_words() {
        assert_eq!(decode_pointer(0x1111_1111, 0x1000), None);
        assert_eq!(decode_pointer(FREE_WORD, 0x1000), None);
        assert_eq!(decode_pointer(EMPTY_POINTER, 0x1000), None);
        // Valid bank but past the end of a small image.
        assert_eq!(decode_pointer(0x0800_2000, 0x1000), None);
        assert_eq!(decode_pointer(0x0800_0FFC, 0x1000), Some(0xFFC));
    }

    #[test]
    fn reads_past_the_end_are_bounds_faults() {
        let rom = rom_of(16);
        assert!(matches!(
            rom.read_word(14),
            Err(OwmError::OutOfBounds { addr: 14, len: 4 })
        ));
        assert!(!rom.is_ptr(14));
        assert!(rom.read_word(12).is_ok());
    }

    #[test]
    fn move_data_marks_vacated_bytes() {
        let mut rom = rom_of(16);
        rom.write_bytes(4, &[1, 2, 3, 4]).unwrap();
        rom.move_data(4, 6, 4, 0x22).unwrap();
        assert_eq!(rom.read_bytes(4, 6).unwrap(), &[0x22, 0x22, 1, 2, 3, 4]);

        rom.move_data(6, 2, 4, 0x22).unwrap();
        assert_eq!(rom.read_bytes(2, 8).unwrap(), &[1, 2, 3, 4, 0x22, 0x22, 0x22, 0x22]);
    }

    #[test]
    fn finds_aligned_pointer_occurrences() {
        let mut rom = rom_of(64);
        rom.write_pointer(8, 0x20).unwrap();
        rom.write_pointer(40, 0x20).unwrap();
        rom.write_pointer(44, 0x24).unwrap();
        assert_eq!(rom.find_pointer_occurrences(0x20), vec![8, 40]);
    }

    #[test]
    fn reads_game_code() {
        let mut rom = rom_of(0x200);
        assert_eq!(rom.game_code(), None);
        rom.write_bytes(0xAC, b"BPRE").unwrap();
        assert_eq!(rom.game_code().as_deref(), Some("BPRE"));
    }

    #[test]
    fn backup_restores_identical_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.gba.gz");

        let mut rom = rom_of(0x1000);
        rom.write_word(0x100, 0xDEAD_BEEF).unwrap();
        rom.write_backup(&path).unwrap();

        let restored = Rom::read_backup(&path).unwrap();
        assert_eq!(restored, rom);
    }
}
