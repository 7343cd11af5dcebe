//! Byte-pattern predicates. None of these fail: bytes that cannot be read
//! simply do not match.

use crate::layout::{end_of_slots, FRAME_POINTER_MARKER, RECORD_MARKER, TABLE_MARKER};
use crate::record::{FRAMES_FIELD, POINTER_FIELDS, RECORD_MARKER_BYTES};
use crate::rom::{Address, Rom};
use crate::sprite::SpriteType;

fn pointer_at(rom: &Rom, addr: Address) -> Option<Address> {
    rom.read_pointer(addr).ok().flatten()
}

/// `FF FF` marker plus five decodable pointer fields.
pub fn is_record(rom: &Rom, addr: Address) -> bool {
    match rom.read_bytes(addr, 2) {
        Ok(marker) if marker == RECORD_MARKER_BYTES => {}
        _ => return false,
    }
    POINTER_FIELDS
        .iter()
        .all(|&field| rom.is_ptr(addr + field))
}

pub fn is_record_ptr(rom: &Rom, addr: Address) -> bool {
    pointer_at(rom, addr).is_some_and(|record| is_record(rom, record))
}

/// True iff the frame-pointer entry at `addr` decodes and carries a known
/// type signature.
pub fn is_frame_set_ptr(rom: &Rom, addr: Address) -> bool {
    if !rom.is_ptr(addr) {
        return false;
    }
    match rom.read_bytes(addr + 4, 2) {
        Ok(&[a, b]) => SpriteType::from_signature([a, b]).is_some(),
        _ => false,
    }
}

/// Pointer -> pointer -> record whose frame field is a valid entry.
pub fn is_vanilla_table_ptr(rom: &Rom, addr: Address) -> bool {
    let Some(table) = pointer_at(rom, addr) else {
        return false;
    };
    let Some(record) = pointer_at(rom, table) else {
        return false;
    };
    if !is_record(rom, record) {
        return false;
    }
    pointer_at(rom, record + FRAMES_FIELD).is_some_and(|entry| is_frame_set_ptr(rom, entry))
}

/// A table this tool laid out: three pool pointers after the slots and a
/// first slot that is fresh, tombstoned or live.
pub fn is_owned_table_ptr(rom: &Rom, addr: Address) -> bool {
    let Some(table) = pointer_at(rom, addr) else {
        return false;
    };
    let meta = end_of_slots(table);
    if ![meta, meta + 4, meta + 8].iter().all(|&word| rom.is_ptr(word)) {
        return false;
    }

    match rom.read_word(table) {
        Ok(TABLE_MARKER) | Ok(RECORD_MARKER) => true,
        Ok(_) => is_record_ptr(rom, table),
        Err(_) => false,
    }
}

pub fn is_table_ptr(rom: &Rom, addr: Address) -> bool {
    is_vanilla_table_ptr(rom, addr) || is_owned_table_ptr(rom, addr)
}

/// True unless the pools after the table's slots look like ones this tool
/// initialised. Untouched tables always need relocating.
pub fn needs_repoint(rom: &Rom, table: Address) -> bool {
    let meta = end_of_slots(table);

    let Some(records) = pointer_at(rom, meta) else {
        return true;
    };
    if rom.read_word(records).ok() == Some(RECORD_MARKER) {
        return false;
    }
    if !is_record(rom, records) {
        return true;
    }

    let Some(frames) = pointer_at(rom, meta + 4) else {
        return true;
    };
    if rom.read_word(frames).ok() == Some(FRAME_POINTER_MARKER) {
        return false;
    }
    !is_frame_set_ptr(rom, frames)
}
