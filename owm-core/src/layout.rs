use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frames::FRAME_ENTRY_SIZE;
use crate::free_space::{find_free_space, Alignment};
use crate::record::RECORD_SIZE;
use crate::rom::{Address, Rom};
use crate::{OwmError, Result};

pub const TABLE_SLOTS: usize = 256;
pub const POINTER_SIZE: u32 = 4;

/// Frame-pointer pool headroom per record.
pub const FRAMES_PER_RECORD: u32 = 9;

/// 256 slots, 3 metadata words, one word of rounding.
pub const TABLE_REGION_SIZE: u32 = 260 * POINTER_SIZE;
pub const RECORD_POOL_SIZE: u32 = TABLE_SLOTS as u32 * RECORD_SIZE + 4;
pub const FRAME_POINTER_POOL_SIZE: u32 =
    FRAMES_PER_RECORD * FRAME_ENTRY_SIZE * TABLE_SLOTS as u32 + 4;
pub const FRAME_DATA_POOL_SIZE: u32 = 0x40000;

/// Fill of a fresh pointer array.
pub const TABLE_FILL: u8 = 0x11;
/// Fill of a fresh record pool, and the tombstone for records and slots.
pub const RECORD_FILL: u8 = 0x22;
/// Fill of a fresh frame-pointer pool, and the tombstone for frame entries.
pub const FRAME_POINTER_FILL: u8 = 0x33;

pub const TABLE_MARKER: u32 = 0x1111_1111;
pub const RECORD_MARKER: u32 = 0x2222_2222;
pub const FRAME_POINTER_MARKER: u32 = 0x3333_3333;

/// Where one table and its three companion pools live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableLayout {
    pub pointers: Address,
    pub records: Address,
    pub frame_pointers: Address,
    pub frame_data: Address,
}

impl TableLayout {
    /// Reads the pool pointers stored after a table's slots.
    pub fn read(rom: &Rom, pointers: Address) -> Result<TableLayout> {
        let meta = end_of_slots(pointers);
        let pool = |offset: u32| -> Result<Address> {
            let addr = meta + offset;
            rom.read_pointer(addr)?
                .ok_or(OwmError::InvalidPointer { addr })
        };

        Ok(TableLayout {
            pointers,
            records: pool(0)?,
            frame_pointers: pool(4)?,
            frame_data: pool(8)?,
        })
    }

    pub fn write_metadata(&self, rom: &mut Rom) -> Result<()> {
        let meta = end_of_slots(self.pointers);
        rom.write_pointer(meta, self.records)?;
        rom.write_pointer(meta + 4, self.frame_pointers)?;
        rom.write_pointer(meta + 8, self.frame_data)
    }
}

/// First byte after the 256 slots; the three pool pointers live here.
pub(crate) fn end_of_slots(pointers: Address) -> Address {
    pointers + TABLE_SLOTS as u32 * POINTER_SIZE
}

/// Optional caller-chosen addresses for a new table's regions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LayoutRequest {
    pub pointers: Option<Address>,
    pub records: Option<Address>,
    pub frame_pointers: Option<Address>,
    pub frame_data: Option<Address>,
}

/// Places the four regions of a table footprint.
///
/// Explicit addresses must be free for the full region. The others are
/// searched from `cursor`, which advances past each region placed there.
/// Regions of one request never overlap.
pub fn resolve(rom: &Rom, cursor: &mut Address, request: &LayoutRequest) -> Result<TableLayout> {
    let regions = [
        (request.pointers, TABLE_REGION_SIZE, Alignment::Word),
        (request.records, RECORD_POOL_SIZE, Alignment::Word),
        (request.frame_pointers, FRAME_POINTER_POOL_SIZE, Alignment::Word),
        (request.frame_data, FRAME_DATA_POOL_SIZE, Alignment::Halfword),
    ];

    let mut taken: Vec<(Address, u32)> = regions
        .iter()
        .filter_map(|&(explicit, size, _)| explicit.map(|addr| (addr, size)))
        .collect();

    for (i, &(addr, size)) in taken.iter().enumerate() {
        let clash = taken[..i]
            .iter()
            .any(|&(other, other_size)| overlaps(addr, size, other, other_size));
        if clash {
            return Err(OwmError::RegionNotFree { addr, size });
        }
    }

    let mut placed = [0 as Address; 4];
    for (i, &(explicit, size, align)) in regions.iter().enumerate() {
        placed[i] = match explicit {
            Some(addr) => place_exact(rom, addr, size, align)?,
            None => {
                let addr = place_at_cursor(rom, cursor, size, align, &taken)?;
                taken.push((addr, size));
                addr
            }
        };
    }

    let layout = TableLayout {
        pointers: placed[0],
        records: placed[1],
        frame_pointers: placed[2],
        frame_data: placed[3],
    };
    debug!(
        "table regions: pointers {:#X}, records {:#X}, frame pointers {:#X}, frame data {:#X}",
        layout.pointers, layout.records, layout.frame_pointers, layout.frame_data
    );
    Ok(layout)
}

fn place_exact(rom: &Rom, addr: Address, size: u32, align: Alignment) -> Result<Address> {
    match find_free_space(rom, size, addr, align) {
        Ok(found) if found == addr => Ok(addr),
        _ => Err(OwmError::RegionNotFree { addr, size }),
    }
}

fn place_at_cursor(
    rom: &Rom,
    cursor: &mut Address,
    size: u32,
    align: Alignment,
    taken: &[(Address, u32)],
) -> Result<Address> {
    let mut hint = *cursor;
    loop {
        let addr = find_free_space(rom, size, hint, align)?;
        match taken
            .iter()
            .find(|&&(other, other_size)| overlaps(addr, size, other, other_size))
        {
            Some(&(other, other_size)) => hint = other + other_size,
            None => {
                *cursor = addr + size;
                return Ok(addr);
            }
        }
    }
}

fn overlaps(a: Address, a_len: u32, b: Address, b_len: u32) -> bool {
    a < b + b_len && b < a + a_len
}
