use tracing::warn;

use crate::free_space::{find_free_space, Alignment, FREE_BYTE};
use crate::layout::{TableLayout, FRAME_POINTER_FILL, FRAME_POINTER_POOL_SIZE};
use crate::rom::{encode_pointer, Address, Rom};
use crate::sprite::{FrameKind, SpriteType};
use crate::{OwmError, Result};

/// Pixel pointer, two signature bytes, two zero bytes.
pub const FRAME_ENTRY_SIZE: u32 = 8;

/// Longest frame walk before a count is reported as unknown.
pub const MAX_FRAMES: u32 = 256;

/// A frame-pointer array plus the pixel blocks its entries reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSet {
    /// Start of the frame-pointer array.
    pub pointers: Address,
    /// First pixel block, if the first entry decodes.
    pub data: Option<Address>,
    pub kind: FrameKind,
}

impl FrameSet {
    pub fn load(rom: &Rom, pointers: Address) -> FrameSet {
        FrameSet {
            pointers,
            data: rom.read_pointer(pointers).ok().flatten(),
            kind: FrameSet::infer_type(rom, pointers),
        }
    }

    /// Reads the signature four bytes into the first entry.
    pub fn infer_type(rom: &Rom, pointers: Address) -> FrameKind {
        match rom.read_bytes(pointers + 4, 2) {
            Ok(&[a, b]) => SpriteType::from_signature([a, b])
                .map(FrameKind::Known)
                .unwrap_or(FrameKind::Unrecognized),
            _ => FrameKind::Unrecognized,
        }
    }

    /// Number of pixel blocks before the frames-end terminator.
    ///
    /// `None` when the type is unrecognized, the first entry does not
    /// decode, the walk leaves the image or no terminator shows up within
    /// `MAX_FRAMES` strides.
    pub fn count(&self, rom: &Rom, frames_end: Address) -> Option<u32> {
        let size = self.kind.sprite_type()?.frame_size();
        let mut addr = self.data?;

        for strides in 0..=MAX_FRAMES {
            match rom.read_pointer(addr) {
                Ok(Some(target)) if target == frames_end => return Some(strides),
                Err(_) => return None,
                _ => addr = addr.checked_add(size)?,
            }
        }
        None
    }

    /// First byte after this set's terminator.
    pub fn end(&self, rom: &Rom, frames_end: Address) -> Option<Address> {
        let count = self.count(rom, frames_end)?;
        let size = self.kind.sprite_type()?.frame_size();
        Some(self.data? + count * size + 4)
    }

    /// Allocates `count` blank frames of `ty` for a table.
    ///
    /// Pixel space is searched from `pixel_hint`; the entries go into the
    /// first run of `count` untouched slots of the table's frame-pointer pool.
    pub fn allocate(
        rom: &mut Rom,
        layout: &TableLayout,
        pixel_hint: Address,
        frames_end: Address,
        ty: SpriteType,
        count: u32,
    ) -> Result<FrameSet> {
        if count == 0 {
            return Err(OwmError::EmptyFrameSet);
        }

        let size = ty.frame_size();
        let pixels = size * count;
        let data = find_free_space(rom, pixels + 4, pixel_hint, Alignment::Halfword)?;
        let pointers = find_entry_run(rom, layout, count)?;

        rom.fill(data, pixels, FREE_BYTE)?;
        rom.write_pointer(data + pixels, frames_end)?;

        let [lo, hi] = ty.signature();
        for i in 0..count {
            let entry = pointers + i * FRAME_ENTRY_SIZE;
            rom.write_pointer(entry, data + i * size)?;
            rom.write_bytes(entry + 4, &[lo, hi, 0x00, 0x00])?;
        }

        Ok(FrameSet {
            pointers,
            data: Some(data),
            kind: FrameKind::Known(ty),
        })
    }

    /// Tombstones the entries and releases the pixel blocks.
    ///
    /// When the pixel range holds a frames-end terminator, another set was
    /// allocated over these blocks; only the trailing terminator is freed.
    pub fn clear(&self, rom: &mut Rom, frames_end: Address) -> Result<()> {
        let (Some(ty), Some(data), Some(count)) = (
            self.kind.sprite_type(),
            self.data,
            self.count(rom, frames_end),
        ) else {
            warn!(
                "frame set at {:#X} has no measurable frames, leaving it in place",
                self.pointers
            );
            return Ok(());
        };

        rom.fill(self.pointers, count * FRAME_ENTRY_SIZE, FRAME_POINTER_FILL)?;

        let pixels = count * ty.frame_size();
        if overlays_terminator(rom, data, pixels, frames_end)? {
            warn!(
                "frame data at {:#X} overlaps another frame set, only releasing its terminator",
                data
            );
            return rom.fill(data + pixels, 4, FREE_BYTE);
        }

        rom.fill(data, pixels + 4, FREE_BYTE)
    }
}

/// True if a frames-end terminator is embedded anywhere in the range.
pub(crate) fn overlays_terminator(
    rom: &Rom,
    addr: Address,
    len: u32,
    frames_end: Address,
) -> Result<bool> {
    rom.contains_pattern(addr, len, &encode_pointer(frames_end).to_le_bytes())
}

fn find_entry_run(rom: &Rom, layout: &TableLayout, count: u32) -> Result<Address> {
    let needed = count * FRAME_ENTRY_SIZE;
    let pool_end = layout.frame_pointers + FRAME_POINTER_POOL_SIZE - 4;

    let mut addr = layout.frame_pointers;
    while addr + needed <= pool_end {
        let bytes = rom.read_bytes(addr, needed)?;
        match bytes.iter().rposition(|&b| b != FRAME_POINTER_FILL) {
            None => return Ok(addr),
            Some(used) => {
                let skip = (used as u32 / FRAME_ENTRY_SIZE + 1) * FRAME_ENTRY_SIZE;
                addr += skip;
            }
        }
    }

    Err(OwmError::CapacityExceeded {
        what: "frame-pointer pool",
        limit: ((FRAME_POINTER_POOL_SIZE - 4) / FRAME_ENTRY_SIZE) as usize,
    })
}
