//! Synthetic images shared by the unit tests.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::free_space::FREE_BYTE;
use crate::profile::Profile;
use crate::record::{FRAMES_FIELD, POINTER_FIELDS, RECORD_SIZE};
use crate::rom::{encode_pointer, Address, Rom};
use crate::session::Session;
use crate::sprite::SpriteType;
use crate::template::{RecordBody, Templates};

pub const IMAGE_SIZE: usize = 0x200000;
pub const GAME_CODE: &str = "BTST";

pub const ROOT: Address = 0x1000;
pub const ROOT_SLOTS: usize = 16;
pub const FRAMES_END: Address = 0x500;
pub const ANIMATION_TARGET: Address = 0x600;
pub const FREE_SPACE: Address = 0x100000;

pub const VANILLA_TABLE: Address = 0x2000;
pub const VANILLA_RECORDS: Address = 0x3000;
pub const VANILLA_FRAMES: Address = 0x6000;
pub const VANILLA_PIXELS: Address = 0x10000;

pub fn profile() -> Profile {
    Profile {
        name: "Test image".to_string(),
        table_root: ROOT,
        free_space: FREE_SPACE,
        frames_end: FRAMES_END,
        ow_fix: None,
        stale_tables: Vec::new(),
        templates_dir: None,
    }
}

pub fn template(ty: SpriteType) -> RecordBody {
    let mut body = [0u8; RECORD_SIZE as usize];
    body[0] = 0xFF;
    body[1] = 0xFF;
    body[2..4].copy_from_slice(&(0x1100 + ty.number() as u16).to_le_bytes());
    body[0x0C] = 0x10;
    body[0x0D] = ty.number();
    for field in POINTER_FIELDS {
        let at = field as usize;
        body[at..at + 4].copy_from_slice(&encode_pointer(ANIMATION_TARGET + field).to_le_bytes());
    }
    body
}

pub fn templates() -> Templates {
    Templates::new(SpriteType::ALL.map(template))
}

pub fn session() -> Session {
    Session::new(&profile(), templates())
}

/// Zeroed game area, a 16-slot root array, free space from `FREE_SPACE`.
pub fn blank_image() -> Rom {
    let mut data = vec![0u8; IMAGE_SIZE];
    data[FREE_SPACE as usize..].fill(FREE_BYTE);
    data[0xAC..0xB0].copy_from_slice(GAME_CODE.as_bytes());

    let root_end = ROOT as usize + ROOT_SLOTS * 4;
    data[root_end..root_end + 4].fill(0x01);
    Rom::new(data)
}

/// A table as the game ships it: records, frame arrays and pixels packed
/// back to back with no pools after the slots. Pixel bytes never contain
/// 0x00, 0x08, 0x09 or 0xFF.
pub fn vanilla_image(records: &[(SpriteType, u32)], seed: u64) -> Rom {
    let mut rom = blank_image();
    let mut rng = StdRng::seed_from_u64(seed);
    rom.write_pointer(ROOT, VANILLA_TABLE).unwrap();

    let mut entry = VANILLA_FRAMES;
    let mut pixels = VANILLA_PIXELS;
    for (i, &(ty, count)) in records.iter().enumerate() {
        let i = i as u32;
        let body = VANILLA_RECORDS + i * RECORD_SIZE;
        let mut raw = template(ty);
        raw[0x0C] = 0x10 | (i % 16) as u8;
        raw[0x0E] = (i % 7) as u8;
        rom.write_bytes(body, &raw).unwrap();
        rom.write_pointer(body + FRAMES_FIELD, entry).unwrap();
        rom.write_pointer(VANILLA_TABLE + i * 4, body).unwrap();

        let [lo, hi] = ty.signature();
        for _ in 0..count {
            rom.write_pointer(entry, pixels).unwrap();
            rom.write_bytes(entry + 4, &[lo, hi, 0x00, 0x00]).unwrap();
            let block: Vec<u8> = (0..ty.frame_size())
                .map(|_| rng.gen_range(0x10..0xF0))
                .collect();
            rom.write_bytes(pixels, &block).unwrap();
            entry += 8;
            pixels += ty.frame_size();
        }
    }
    rom
}
