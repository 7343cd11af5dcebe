use serde::{Deserialize, Serialize};

use crate::frames::FrameSet;
use crate::layout::{TableLayout, POINTER_SIZE, RECORD_FILL, TABLE_SLOTS};
use crate::rom::{Address, Rom};
use crate::validate::is_record;
use crate::{OwmError, Result};

pub const RECORD_SIZE: u32 = 0x24;

/// Palette slot given to every freshly added record.
pub const DEFAULT_PALETTE_SLOT: u8 = 0xA;

pub(crate) const RECORD_MARKER_BYTES: [u8; 2] = [0xFF, 0xFF];
pub(crate) const POINTER_FIELDS: [u32; 5] = [0x10, 0x14, 0x18, 0x1C, 0x20];
pub(crate) const FRAMES_FIELD: u32 = 0x1C;

const PALETTE_ID: u32 = 0x02;
const PALETTE_SLOT: u32 = 0x0C;
const FOOTPRINT: u32 = 0x0D;
const TEXT_COLOR: u32 = 0x0E;
const ANIMATION_FIELDS: [u32; 2] = [0x18, 0x20];

/// The user-visible attributes that survive a resize or a relocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cosmetics {
    pub palette_id: u16,
    /// Low nibble of byte 0x0C.
    pub palette_slot: u8,
    pub footprint: u8,
    pub text_color: u8,
    /// Raw pointer words at 0x18 and 0x20.
    pub animations: [u32; 2],
}

impl Cosmetics {
    pub fn read(rom: &Rom, record: Address) -> Result<Cosmetics> {
        let id = rom.read_bytes(record + PALETTE_ID, 2)?;
        Ok(Cosmetics {
            palette_id: u16::from_le_bytes([id[0], id[1]]),
            palette_slot: rom.read_byte(record + PALETTE_SLOT)? & 0x0F,
            footprint: rom.read_byte(record + FOOTPRINT)?,
            text_color: rom.read_byte(record + TEXT_COLOR)?,
            animations: [
                rom.read_word(record + ANIMATION_FIELDS[0])?,
                rom.read_word(record + ANIMATION_FIELDS[1])?,
            ],
        })
    }

    pub fn write(&self, rom: &mut Rom, record: Address) -> Result<()> {
        rom.write_bytes(record + PALETTE_ID, &self.palette_id.to_le_bytes())?;
        write_palette_slot(rom, record, self.palette_slot)?;
        rom.write_byte(record + FOOTPRINT, self.footprint)?;
        rom.write_byte(record + TEXT_COLOR, self.text_color)?;
        rom.write_word(record + ANIMATION_FIELDS[0], self.animations[0])?;
        rom.write_word(record + ANIMATION_FIELDS[1], self.animations[1])
    }
}

/// Cosmetic fields to overwrite; `None` keeps the record's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CosmeticsPatch {
    pub palette_id: Option<u16>,
    pub palette_slot: Option<u8>,
    pub footprint: Option<u8>,
    pub text_color: Option<u8>,
}

impl CosmeticsPatch {
    pub fn apply(&self, base: Cosmetics) -> Cosmetics {
        Cosmetics {
            palette_id: self.palette_id.unwrap_or(base.palette_id),
            palette_slot: self.palette_slot.map_or(base.palette_slot, |slot| slot & 0x0F),
            footprint: self.footprint.unwrap_or(base.footprint),
            text_color: self.text_color.unwrap_or(base.text_color),
            animations: base.animations,
        }
    }
}

/// Sets the low nibble of byte 0x0C, keeping the high nibble.
pub fn write_palette_slot(rom: &mut Rom, record: Address, slot: u8) -> Result<()> {
    let byte = rom.read_byte(record + PALETTE_SLOT)?;
    rom.write_byte(record + PALETTE_SLOT, (byte & 0xF0) | (slot & 0x0F))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
}

impl Direction {
    fn step(self, addr: Address, width: u32) -> Result<Address> {
        match self {
            Direction::Left => addr.checked_sub(width),
            Direction::Right => addr.checked_add(width),
        }
        .ok_or(OwmError::OutOfBounds { addr, len: width })
    }
}

/// One 0x24-byte sprite record and the table slot that points at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub slot: Address,
    pub addr: Address,
    pub frames: FrameSet,
}

impl Record {
    /// Builds the record the pointer at `slot` refers to.
    pub fn load(rom: &Rom, slot: Address) -> Result<Record> {
        let addr = rom
            .read_pointer(slot)?
            .ok_or(OwmError::InvalidPointer { addr: slot })?;
        let field = addr + FRAMES_FIELD;
        let pointers = rom
            .read_pointer(field)?
            .ok_or(OwmError::InvalidPointer { addr: field })?;

        Ok(Record {
            slot,
            addr,
            frames: FrameSet::load(rom, pointers),
        })
    }

    /// First record-sized cell of the pool that does not hold a record.
    pub fn find_storage(rom: &Rom, layout: &TableLayout) -> Result<Address> {
        (0..TABLE_SLOTS as u32)
            .map(|i| layout.records + i * RECORD_SIZE)
            .find(|&addr| !is_record(rom, addr))
            .ok_or(OwmError::CapacityExceeded {
                what: "record pool",
                limit: TABLE_SLOTS,
            })
    }

    /// Copies `template` to `storage` and points it at `frames`.
    pub fn instantiate(
        rom: &mut Rom,
        storage: Address,
        slot: Address,
        template: &[u8; RECORD_SIZE as usize],
        frames: FrameSet,
    ) -> Result<Record> {
        rom.write_bytes(storage, template)?;
        rom.write_pointer(storage + FRAMES_FIELD, frames.pointers)?;
        Ok(Record {
            slot,
            addr: storage,
            frames,
        })
    }

    pub fn cosmetics(&self, rom: &Rom) -> Result<Cosmetics> {
        Cosmetics::read(rom, self.addr)
    }

    /// Tombstones the body and releases the frames. The slot is untouched.
    pub fn clear(&self, rom: &mut Rom, frames_end: Address) -> Result<()> {
        self.frames.clear(rom, frames_end)?;
        rom.fill(self.addr, RECORD_SIZE, RECORD_FILL)
    }

    pub fn remove(&self, rom: &mut Rom, frames_end: Address) -> Result<()> {
        self.clear(rom, frames_end)?;
        rom.fill(self.slot, POINTER_SIZE, RECORD_FILL)
    }

    /// Moves the body one record width and the slot one pointer width.
    pub fn shift(&self, rom: &mut Rom, direction: Direction) -> Result<Record> {
        let addr = direction.step(self.addr, RECORD_SIZE)?;
        let slot = direction.step(self.slot, POINTER_SIZE)?;

        rom.move_data(self.addr, addr, RECORD_SIZE, RECORD_FILL)?;
        rom.write_pointer(self.slot, addr)?;
        rom.move_data(self.slot, slot, POINTER_SIZE, RECORD_FILL)?;

        Ok(Record {
            slot,
            addr,
            frames: self.frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free_space::FREE_BYTE;
    use crate::sprite::FrameKind;

    fn body(frames: Address) -> [u8; RECORD_SIZE as usize] {
        let mut body = [0u8; RECORD_SIZE as usize];
        body[0] = 0xFF;
        body[1] = 0xFF;
        body[PALETTE_SLOT as usize] = 0x3A;
        for field in POINTER_FIELDS {
            let target = if field == FRAMES_FIELD { frames } else { 0x100 };
            body[field as usize..field as usize + 4]
                .copy_from_slice(&(0x0800_0000 + target).to_le_bytes());
        }
        body
    }

    fn frames() -> FrameSet {
        FrameSet {
            pointers: 0x800,
            data: None,
            kind: FrameKind::Unrecognized,
        }
    }

    #[test]
    fn palette_slot_keeps_high_nibble() {
        let mut rom = Rom::new(vec![FREE_BYTE; 0x1000]);
        rom.write_bytes(0x200, &body(0x800)).unwrap();
        write_palette_slot(&mut rom, 0x200, 0x5).unwrap();
        assert_eq!(rom.read_byte(0x20C).unwrap(), 0x35);
        assert_eq!(Cosmetics::read(&rom, 0x200).unwrap().palette_slot, 0x5);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let base = Cosmetics {
            palette_id: 0x1103,
            palette_slot: 0x2,
            footprint: 0x10,
            text_color: 1,
            animations: [0x0823_0000, 0x0823_0100],
        };
        let patch = CosmeticsPatch {
            palette_slot: Some(0x1C),
            text_color: Some(4),
            ..CosmeticsPatch::default()
        };

        let patched = patch.apply(base);
        assert_eq!(patched.palette_slot, 0xC);
        assert_eq!(patched.text_color, 4);
        assert_eq!(
            (patched.palette_id, patched.footprint, patched.animations),
            (base.palette_id, base.footprint, base.animations)
        );
        assert_eq!(CosmeticsPatch::default().apply(base), base);
    }

    #[test]
    fn cosmetics_write_read_back() {
        let mut rom = Rom::new(vec![FREE_BYTE; 0x1000]);
        rom.write_bytes(0x200, &body(0x800)).unwrap();
        let cosmetics = Cosmetics {
            palette_id: 0x1105,
            palette_slot: 0x2,
            footprint: 0x40,
            text_color: 3,
            animations: [0x0800_0300, 0x0800_0340],
        };
        cosmetics.write(&mut rom, 0x200).unwrap();

        assert_eq!(Cosmetics::read(&rom, 0x200).unwrap(), cosmetics);
        assert_eq!(rom.read_bytes(0x202, 2).unwrap(), &[0x05, 0x11]);
        assert_eq!(rom.read_byte(0x20C).unwrap(), 0x32);
    }

    #[test]
    fn storage_skips_live_records() {
        let mut rom = Rom::new(vec![RECORD_FILL; 0x4000]);
        let layout = TableLayout {
            pointers: 0,
            records: 0x100,
            frame_pointers: 0x3000,
            frame_data: 0x3800,
        };
        rom.write_bytes(0x100, &body(0x800)).unwrap();
        rom.write_bytes(0x124, &body(0x800)).unwrap();
        assert_eq!(Record::find_storage(&rom, &layout).unwrap(), 0x148);
    }

    #[test]
    fn shift_moves_body_and_slot() {
        let mut rom = Rom::new(vec![RECORD_FILL; 0x1000]);
        let storage = 0x200;
        let record = Record::instantiate(&mut rom, storage, 0x40, &body(0x900), frames()).unwrap();
        assert_eq!(rom.read_pointer(0x21C).unwrap(), Some(0x800));
        rom.write_pointer(0x40, storage).unwrap();

        let moved = record.shift(&mut rom, Direction::Right).unwrap();
        assert_eq!(moved.addr, 0x224);
        assert_eq!(moved.slot, 0x44);
        assert_eq!(rom.read_pointer(0x44).unwrap(), Some(0x224));
        assert_eq!(rom.read_word(0x40).unwrap(), 0x2222_2222);
        assert_eq!(rom.read_bytes(0x200, RECORD_SIZE).unwrap(), &[RECORD_FILL; 0x24]);
        assert!(is_record(&rom, 0x224));

        let back = moved.shift(&mut rom, Direction::Left).unwrap();
        assert_eq!((back.addr, back.slot), (storage, 0x40));
        assert_eq!(rom.read_pointer(0x40).unwrap(), Some(storage));
        assert_eq!(rom.read_word(0x44).unwrap(), 0x2222_2222);
    }
}
