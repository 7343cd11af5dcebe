use tracing::debug;

use crate::frames::FrameSet;
use crate::layout::{
    TableLayout, FRAME_POINTER_FILL, FRAME_POINTER_POOL_SIZE, POINTER_SIZE, RECORD_FILL,
    RECORD_POOL_SIZE, TABLE_FILL, TABLE_SLOTS,
};
use crate::record::{write_palette_slot, Cosmetics, Direction, Record, DEFAULT_PALETTE_SLOT};
use crate::rom::{Address, Rom};
use crate::session::Session;
use crate::sprite::SpriteType;
use crate::validate::is_record_ptr;
use crate::{OwmError, Result};

/// A pointer array of up to 256 records and its three pools.
///
/// `records` is rebuilt from the image after every structural change and
/// is never written back on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Root array entry pointing at this table.
    pub root_slot: Address,
    pub layout: TableLayout,
    pub records: Vec<Record>,
}

impl Table {
    pub fn load(rom: &Rom, session: &mut Session, root_slot: Address) -> Result<Table> {
        let pointers = rom
            .read_pointer(root_slot)?
            .ok_or(OwmError::InvalidPointer { addr: root_slot })?;
        let mut table = Table {
            root_slot,
            layout: TableLayout::read(rom, pointers)?,
            records: Vec::new(),
        };
        table.re_derive(rom, session)?;
        debug!(
            "loaded table {:#X} with {} records",
            pointers,
            table.records.len()
        );
        Ok(table)
    }

    /// Initialises the four regions of `layout` and points `root_slot` at
    /// the new, empty table.
    pub fn create(rom: &mut Rom, root_slot: Address, layout: TableLayout) -> Result<Table> {
        rom.fill(layout.pointers, TABLE_SLOTS as u32 * POINTER_SIZE, TABLE_FILL)?;
        rom.fill(layout.records, RECORD_POOL_SIZE - 4, RECORD_FILL)?;
        rom.fill(layout.frame_pointers, FRAME_POINTER_POOL_SIZE - 4, FRAME_POINTER_FILL)?;
        layout.write_metadata(rom)?;
        rom.write_pointer(root_slot, layout.pointers)?;

        Ok(Table {
            root_slot,
            layout,
            records: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn slot(&self, position: usize) -> Address {
        self.layout.pointers + position as u32 * POINTER_SIZE
    }

    /// Walks the slots until one does not point at a record.
    pub fn re_derive(&mut self, rom: &Rom, session: &mut Session) -> Result<()> {
        self.records.clear();
        for position in 0..TABLE_SLOTS {
            let slot = self.slot(position);
            if !is_record_ptr(rom, slot) {
                break;
            }
            let record = Record::load(rom, slot)?;
            session.claimed.insert(record.frames.pointers);
            self.records.push(record);
        }
        Ok(())
    }

    /// First slot that does not point at a record.
    pub fn free_slot(&self, rom: &Rom) -> Result<Address> {
        (0..TABLE_SLOTS)
            .map(|position| self.slot(position))
            .find(|&slot| !is_record_ptr(rom, slot))
            .ok_or(OwmError::CapacityExceeded {
                what: "table",
                limit: TABLE_SLOTS,
            })
    }

    /// Where a new frame set's pixels may start: past every live set.
    pub fn pixel_hint(&self, rom: &Rom, frames_end: Address) -> Address {
        self.records
            .iter()
            .filter_map(|record| record.frames.end(rom, frames_end))
            .fold(self.layout.frame_data, Address::max)
    }

    fn check_position(&self, position: usize) -> Result<()> {
        if position < self.records.len() {
            Ok(())
        } else {
            Err(OwmError::IndexOutOfRange {
                what: "record",
                index: position,
                len: self.records.len(),
            })
        }
    }

    /// Appends a record in the first free slot and returns its position.
    pub fn add(
        &mut self,
        rom: &mut Rom,
        session: &mut Session,
        ty: SpriteType,
        count: u32,
    ) -> Result<usize> {
        let slot = self.free_slot(rom)?;
        let storage = Record::find_storage(rom, &self.layout)?;
        let hint = self.pixel_hint(rom, session.frames_end);

        let frames = FrameSet::allocate(rom, &self.layout, hint, session.frames_end, ty, count)?;
        let record = Record::instantiate(rom, storage, slot, session.templates.get(ty), frames)?;
        rom.write_pointer(slot, record.addr)?;
        write_palette_slot(rom, record.addr, DEFAULT_PALETTE_SLOT)?;

        self.re_derive(rom, session)?;
        debug!(
            "added {} x{} at {:#X} in table {:#X}",
            ty, count, record.addr, self.layout.pointers
        );
        Ok(((slot - self.layout.pointers) / POINTER_SIZE) as usize)
    }

    /// Shifts records `position..` one slot right and adds into the gap.
    pub fn insert(
        &mut self,
        rom: &mut Rom,
        session: &mut Session,
        position: usize,
        ty: SpriteType,
        count: u32,
    ) -> Result<usize> {
        let len = self.records.len();
        if position > len {
            return Err(OwmError::IndexOutOfRange {
                what: "record",
                index: position,
                len,
            });
        }
        if len >= TABLE_SLOTS {
            return Err(OwmError::CapacityExceeded {
                what: "table",
                limit: TABLE_SLOTS,
            });
        }

        for record in self.records[position..].iter().rev() {
            record.shift(rom, Direction::Right)?;
        }
        self.add(rom, session, ty, count)
    }

    /// Removes the record at `position` and closes the gap.
    pub fn remove(&mut self, rom: &mut Rom, session: &mut Session, position: usize) -> Result<()> {
        self.check_position(position)?;

        let removed = self.records[position];
        removed.remove(rom, session.frames_end)?;
        session.claimed.remove(&removed.frames.pointers);

        for record in &self.records[position + 1..] {
            record.shift(rom, Direction::Left)?;
        }
        self.re_derive(rom, session)
    }

    /// Rebuilds the record at `position` with new geometry, keeping its
    /// cosmetics and its slot.
    pub fn resize(
        &mut self,
        rom: &mut Rom,
        session: &mut Session,
        position: usize,
        ty: SpriteType,
        count: u32,
    ) -> Result<usize> {
        self.check_position(position)?;

        let old = self.records.remove(position);
        let cosmetics = Cosmetics::read(rom, old.addr)?;
        old.remove(rom, session.frames_end)?;
        session.claimed.remove(&old.frames.pointers);

        let position = self.add(rom, session, ty, count)?;
        cosmetics.write(rom, self.records[position].addr)?;
        Ok(position)
    }
}
