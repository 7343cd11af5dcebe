use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::frames::{overlays_terminator, FrameSet, FRAME_ENTRY_SIZE, MAX_FRAMES};
use crate::free_space::FREE_BYTE;
use crate::layout::{
    end_of_slots, resolve, LayoutRequest, TableLayout, FRAMES_PER_RECORD,
    FRAME_POINTER_POOL_SIZE, POINTER_SIZE, RECORD_POOL_SIZE, TABLE_SLOTS,
};
use crate::profile::Profile;
use crate::record::{Cosmetics, CosmeticsPatch, Record, FRAMES_FIELD, RECORD_SIZE};
use crate::rom::{Address, Rom};
use crate::session::Session;
use crate::sprite::{FrameKind, SpriteType};
use crate::table::Table;
use crate::template::Templates;
use crate::validate::{is_frame_set_ptr, is_record_ptr, is_table_ptr, needs_repoint};
use crate::{OwmError, Result};

/// Relocated tables this close to full are topped up with filler records.
const PADDING_THRESHOLD: usize = TABLE_SLOTS - 38;

/// Read-only view of the catalog: the root array, then one entry per
/// table followed by its records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Root {
        address: Address,
        tables: usize,
        /// Tables that can still be imported.
        free_slots: usize,
    },
    Table {
        index: usize,
        root_slot: Address,
        layout: TableLayout,
        records: usize,
    },
    Record {
        table: usize,
        position: usize,
        address: Address,
        frame_pointers: Address,
        kind: FrameKind,
        frames: Option<u32>,
        dimensions: Option<(u32, u32)>,
        cosmetics: Cosmetics,
    },
}

/// Every table reachable from the root pointer array of one image.
#[derive(Debug)]
pub struct Catalog {
    rom: Rom,
    session: Session,
    tables: Vec<Table>,
}

impl Catalog {
    /// Discovers the tables of `rom`, relocating any that were not laid
    /// out by this tool.
    pub fn open(rom: Rom, profile: &Profile, templates: Templates) -> Result<Catalog> {
        let mut catalog = Catalog {
            rom,
            session: Session::new(profile, templates),
            tables: Vec::new(),
        };
        catalog.discover()?;
        Ok(catalog)
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn rom(&self) -> &Rom {
        &self.rom
    }

    pub fn into_rom(self) -> Rom {
        self.rom
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn discover(&mut self) -> Result<()> {
        self.tables.clear();
        self.session.claimed.clear();

        let entries = self.root_entries()?;
        self.session.known_tables = entries.iter().map(|&(_, table)| table).collect();

        for (slot, table) in entries {
            let table = if needs_repoint(&self.rom, table) {
                self.relocate(slot)?
            } else {
                Table::load(&self.rom, &mut self.session, slot)?
            };
            self.tables.push(table);
        }

        info!("discovered {} tables", self.tables.len());
        Ok(())
    }

    /// Rebuilds the table list from the image without relocating anything.
    pub fn reload(&mut self) -> Result<()> {
        self.session.claimed.clear();
        let entries = self.root_entries()?;
        self.session.known_tables = entries.iter().map(|&(_, table)| table).collect();

        let mut tables = Vec::with_capacity(entries.len());
        for (slot, _) in entries {
            tables.push(Table::load(&self.rom, &mut self.session, slot)?);
        }
        self.tables = tables;
        Ok(())
    }

    /// `(root slot, table address)` for each consecutive table pointer.
    /// A slot naming a stale table is zeroed and ends the walk.
    fn root_entries(&mut self) -> Result<Vec<(Address, Address)>> {
        let mut entries = Vec::new();
        let mut slot = self.session.root;

        while is_table_ptr(&self.rom, slot) {
            let table = self
                .rom
                .read_pointer(slot)?
                .ok_or(OwmError::InvalidPointer { addr: slot })?;
            if self.session.stale_tables.contains(&table) {
                warn!(
                    "root slot {:#X} points at stale table {:#X}, clearing it",
                    slot, table
                );
                self.rom.write_word(slot, 0)?;
                break;
            }
            entries.push((slot, table));
            slot += POINTER_SIZE;
        }
        Ok(entries)
    }

    /// Zero words following the pointers of the root array.
    pub fn free_root_slots(&self) -> usize {
        let mut addr = self.first_non_pointer_root_slot();
        let mut free = 0;
        while self.rom.read_word(addr).ok() == Some(0) {
            free += 1;
            addr += POINTER_SIZE;
        }
        free
    }

    fn first_non_pointer_root_slot(&self) -> Address {
        let mut addr = self.session.root;
        while self.rom.is_ptr(addr) {
            addr += POINTER_SIZE;
        }
        addr
    }

    fn table(&self, index: usize) -> Result<&Table> {
        self.tables.get(index).ok_or(OwmError::IndexOutOfRange {
            what: "table",
            index,
            len: self.tables.len(),
        })
    }

    fn record(&self, table: usize, position: usize) -> Result<&Record> {
        let table = self.table(table)?;
        table.records.get(position).ok_or(OwmError::IndexOutOfRange {
            what: "record",
            index: position,
            len: table.records.len(),
        })
    }

    pub fn add(&mut self, table: usize, ty: SpriteType, count: u32) -> Result<usize> {
        let table = table_mut(&mut self.tables, table)?;
        table.add(&mut self.rom, &mut self.session, ty, count)
    }

    pub fn insert(
        &mut self,
        table: usize,
        position: usize,
        ty: SpriteType,
        count: u32,
    ) -> Result<usize> {
        let table = table_mut(&mut self.tables, table)?;
        table.insert(&mut self.rom, &mut self.session, position, ty, count)
    }

    pub fn remove(&mut self, table: usize, position: usize) -> Result<()> {
        let table = table_mut(&mut self.tables, table)?;
        table.remove(&mut self.rom, &mut self.session, position)
    }

    pub fn resize(
        &mut self,
        table: usize,
        position: usize,
        ty: SpriteType,
        count: u32,
    ) -> Result<usize> {
        let table = table_mut(&mut self.tables, table)?;
        table.resize(&mut self.rom, &mut self.session, position, ty, count)
    }

    pub fn cosmetics(&self, table: usize, position: usize) -> Result<Cosmetics> {
        self.record(table, position)?.cosmetics(&self.rom)
    }

    pub fn set_cosmetics(
        &mut self,
        table: usize,
        position: usize,
        cosmetics: &Cosmetics,
    ) -> Result<()> {
        let addr = self.record(table, position)?.addr;
        cosmetics.write(&mut self.rom, addr)
    }

    /// Overwrites the fields set in `patch` and returns the result.
    pub fn patch_cosmetics(
        &mut self,
        table: usize,
        position: usize,
        patch: &CosmeticsPatch,
    ) -> Result<Cosmetics> {
        let cosmetics = patch.apply(self.cosmetics(table, position)?);
        self.set_cosmetics(table, position, &cosmetics)?;
        Ok(cosmetics)
    }

    /// Lays out a new empty table and registers it in the first free root
    /// slot. Returns its index.
    pub fn import_table(&mut self, request: &LayoutRequest) -> Result<usize> {
        let slot = self.first_non_pointer_root_slot();
        if self.rom.read_word(slot).ok() != Some(0) {
            return Err(OwmError::CapacityExceeded {
                what: "root table",
                limit: ((slot - self.session.root) / POINTER_SIZE) as usize,
            });
        }

        let layout = resolve(&self.rom, &mut self.session.cursor, request)?;
        Table::create(&mut self.rom, slot, layout)?;
        info!(
            "imported table {:#X} into root slot {:#X}",
            layout.pointers, slot
        );

        self.reload()?;
        self.tables
            .iter()
            .position(|table| table.root_slot == slot)
            .ok_or(OwmError::InvalidPointer { addr: slot })
    }

    /// Removes every record of a table, releases its regions and closes
    /// the gap in the root array.
    pub fn remove_table(&mut self, index: usize) -> Result<()> {
        let table = self.table(index)?.clone();
        for record in &table.records {
            record.remove(&mut self.rom, self.session.frames_end)?;
        }

        let layout = table.layout;
        self.release_regions(&layout)?;

        self.rom.write_word(table.root_slot, 0)?;
        let mut next = table.root_slot + POINTER_SIZE;
        while is_table_ptr(&self.rom, next) {
            self.rom.move_data(next, next - POINTER_SIZE, POINTER_SIZE, 0)?;
            next += POINTER_SIZE;
        }

        info!("removed table {:#X}", layout.pointers);
        self.reload()
    }

    /// Frees the slots, metadata words and both fixed-size pools of a
    /// table this tool laid out. Pixels are released per record.
    fn release_regions(&mut self, layout: &TableLayout) -> Result<()> {
        self.rom
            .fill(layout.frame_pointers, FRAME_POINTER_POOL_SIZE - 4, FREE_BYTE)?;
        self.rom.fill(layout.records, RECORD_POOL_SIZE - 4, FREE_BYTE)?;
        let meta_end = end_of_slots(layout.pointers) + 3 * POINTER_SIZE;
        self.rom
            .fill(layout.pointers, meta_end - layout.pointers, FREE_BYTE)
    }

    /// Moves table `index` and everything it owns to fresh space.
    ///
    /// Not transactional: a failure part-way leaves a half-migrated table
    /// behind. Back the image up first when that matters.
    pub fn repoint(&mut self, index: usize) -> Result<()> {
        let root_slot = self.table(index)?.root_slot;
        let table = self.relocate(root_slot)?;
        self.tables[index] = table;
        Ok(())
    }

    fn relocate(&mut self, root_slot: Address) -> Result<Table> {
        let old = self
            .rom
            .read_pointer(root_slot)?
            .ok_or(OwmError::InvalidPointer { addr: root_slot })?;
        info!("relocating table {:#X}", old);
        let owned = if needs_repoint(&self.rom, old) {
            None
        } else {
            TableLayout::read(&self.rom, old).ok()
        };

        let mut bodies = Vec::new();
        let mut slot = old;
        while bodies.len() < TABLE_SLOTS && is_record_ptr(&self.rom, slot) {
            if !bodies.is_empty() && self.session.known_tables.contains(&slot) {
                debug!("table {:#X} ends where table {:#X} starts", old, slot);
                break;
            }
            bodies.push(
                self.rom
                    .read_pointer(slot)?
                    .ok_or(OwmError::InvalidPointer { addr: slot })?,
            );
            slot += POINTER_SIZE;
        }

        let mut arrays = Vec::with_capacity(bodies.len());
        for &body in &bodies {
            let field = body + FRAMES_FIELD;
            let array = self
                .rom
                .read_pointer(field)?
                .ok_or(OwmError::InvalidPointer { addr: field })?;
            self.session.claimed.insert(array);
            arrays.push(array);
        }

        let counts: Vec<u32> = arrays
            .iter()
            .map(|&array| infer_frame_count(&self.rom, &self.session.claimed, array))
            .collect();
        let kinds: Vec<FrameKind> = arrays
            .iter()
            .map(|&array| FrameSet::infer_type(&self.rom, array))
            .collect();

        let aliases = if root_slot == self.session.root {
            self.rom.find_pointer_occurrences(old)
        } else {
            Vec::new()
        };

        let layout = resolve(&self.rom, &mut self.session.cursor, &LayoutRequest::default())?;
        let mut table = Table::create(&mut self.rom, root_slot, layout)?;

        for (i, &body) in bodies.iter().enumerate() {
            let ty = kinds[i].sprite_type().unwrap_or_else(|| {
                warn!(
                    "record {} of table {:#X} has an unrecognized frame type, rebuilding it as {}",
                    i,
                    old,
                    SpriteType::default()
                );
                SpriteType::default()
            });
            let position = table.add(&mut self.rom, &mut self.session, ty, counts[i])?;
            let fresh = table.records[position];

            self.rom.copy_data(body, fresh.addr, RECORD_SIZE)?;
            self.rom
                .write_pointer(fresh.addr + FRAMES_FIELD, fresh.frames.pointers)?;

            if let (FrameKind::Known(ty), Some(data)) = (kinds[i], fresh.frames.data) {
                let size = ty.frame_size();
                for j in 0..counts[i] {
                    if let Some(src) = self.rom.read_pointer(arrays[i] + j * FRAME_ENTRY_SIZE)? {
                        self.rom.copy_data(src, data + j * size, size)?;
                    }
                }
            }
        }

        if bodies.len() >= PADDING_THRESHOLD {
            info!(
                "padding table {:#X} from {} to {} records",
                layout.pointers,
                bodies.len(),
                TABLE_SLOTS
            );
            while table.len() < TABLE_SLOTS {
                table.add(
                    &mut self.rom,
                    &mut self.session,
                    SpriteType::default(),
                    FRAMES_PER_RECORD,
                )?;
            }
        }

        for &alias in &aliases {
            self.rom.write_pointer(alias, layout.pointers)?;
        }
        if !aliases.is_empty() {
            debug!("rewrote {} pointers to table {:#X}", aliases.len(), old);
        }

        for (i, &body) in bodies.iter().enumerate() {
            self.rom
                .fill(old + i as u32 * POINTER_SIZE, POINTER_SIZE, FREE_BYTE)?;
            self.rom.fill(body, RECORD_SIZE, FREE_BYTE)?;
            self.release_frames(arrays[i], kinds[i], counts[i])?;
            self.session.claimed.remove(&arrays[i]);
        }
        if let Some(previous) = owned {
            self.release_regions(&previous)?;
        }

        if let Some(known) = self.session.known_tables.iter_mut().find(|t| **t == old) {
            *known = layout.pointers;
        }
        info!(
            "table {:#X} now lives at {:#X} with {} records",
            old,
            layout.pointers,
            table.len()
        );
        Ok(table)
    }

    /// Frees the entries and pixel blocks of a frame set that has been
    /// copied elsewhere.
    fn release_frames(&mut self, array: Address, kind: FrameKind, count: u32) -> Result<()> {
        let frames_end = self.session.frames_end;
        for j in 0..count {
            let entry = array + j * FRAME_ENTRY_SIZE;
            if !is_frame_set_ptr(&self.rom, entry) {
                break;
            }
            if let (Some(ty), Some(src)) = (kind.sprite_type(), self.rom.read_pointer(entry)?) {
                let size = ty.frame_size();
                if overlays_terminator(&self.rom, src, size, frames_end)? {
                    warn!("frame block at {:#X} holds a frames-end marker, keeping it", src);
                } else {
                    self.rom.fill(src, size, FREE_BYTE)?;
                }
            }
            self.rom.fill(entry, FRAME_ENTRY_SIZE, FREE_BYTE)?;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<Node>> {
        let frames_end = self.session.frames_end;
        let mut nodes = vec![Node::Root {
            address: self.session.root,
            tables: self.tables.len(),
            free_slots: self.free_root_slots(),
        }];

        for (index, table) in self.tables.iter().enumerate() {
            nodes.push(Node::Table {
                index,
                root_slot: table.root_slot,
                layout: table.layout,
                records: table.len(),
            });
            for (position, record) in table.records.iter().enumerate() {
                nodes.push(Node::Record {
                    table: index,
                    position,
                    address: record.addr,
                    frame_pointers: record.frames.pointers,
                    kind: record.frames.kind,
                    frames: record.frames.count(&self.rom, frames_end),
                    dimensions: record.frames.kind.dimensions(),
                    cosmetics: record.cosmetics(&self.rom)?,
                });
            }
        }
        Ok(nodes)
    }
}

fn table_mut(tables: &mut [Table], index: usize) -> Result<&mut Table> {
    let len = tables.len();
    tables.get_mut(index).ok_or(OwmError::IndexOutOfRange {
        what: "table",
        index,
        len,
    })
}

/// Guesses how many frames an untouched frame-pointer array holds.
///
/// Entries are counted while they decode, do not start another record's
/// array and carry the same signature word as the entry before. Two
/// neighbouring arrays with equal signatures and no claimed boundary
/// between them are counted as one.
pub fn infer_frame_count(rom: &Rom, claimed: &BTreeSet<Address>, array: Address) -> u32 {
    let mut count = 1;
    let mut entry = array + FRAME_ENTRY_SIZE;

    while count < MAX_FRAMES
        && !claimed.contains(&entry)
        && is_frame_set_ptr(rom, entry)
        && rom.read_word(entry + 4).ok() == rom.read_word(entry - 4).ok()
    {
        count += 1;
        entry += FRAME_ENTRY_SIZE;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free_space::is_free;
    use crate::testutil::{
        self, profile, templates, vanilla_image, FRAMES_END, ROOT, ROOT_SLOTS, VANILLA_TABLE,
    };

    const MIXED: [(SpriteType, u32); 5] = [
        (SpriteType::Size16x32, 2),
        (SpriteType::Size32x32, 3),
        (SpriteType::Size16x32, 1),
        (SpriteType::Size16x16, 4),
        (SpriteType::Size64x64, 2),
    ];

    fn open(rom: Rom) -> Catalog {
        Catalog::open(rom, &profile(), templates()).unwrap()
    }

    fn geometry(table: &Table, rom: &Rom) -> Vec<(Option<SpriteType>, Option<u32>)> {
        table
            .records
            .iter()
            .map(|r| (r.frames.kind.sprite_type(), r.frames.count(rom, FRAMES_END)))
            .collect()
    }

    fn vanilla_pixels(rom: &Rom) -> Vec<Vec<u8>> {
        let mut blocks = Vec::new();
        for i in 0..MIXED.len() as u32 {
            let body = rom.read_pointer(VANILLA_TABLE + i * 4).unwrap().unwrap();
            let array = rom.read_pointer(body + FRAMES_FIELD).unwrap().unwrap();
            let (ty, count) = MIXED[i as usize];
            let first = rom.read_pointer(array).unwrap().unwrap();
            blocks.push(rom.read_bytes(first, ty.frame_size() * count).unwrap().to_vec());
        }
        blocks
    }

    #[test]
    fn vanilla_table_is_relocated_on_open() {
        let rom = vanilla_image(&MIXED, 7);
        assert!(needs_repoint(&rom, VANILLA_TABLE));
        let pixels = vanilla_pixels(&rom);
        let cosmetics: Vec<Cosmetics> = (0..MIXED.len() as u32)
            .map(|i| Cosmetics::read(&rom, rom.read_pointer(VANILLA_TABLE + i * 4).unwrap().unwrap()).unwrap())
            .collect();

        let catalog = open(rom);
        let table = &catalog.tables()[0];
        let rom = catalog.rom();

        let expected: Vec<_> = MIXED.iter().map(|&(ty, n)| (Some(ty), Some(n))).collect();
        assert_eq!(geometry(table, rom), expected);
        assert!(!needs_repoint(rom, table.layout.pointers));
        assert_eq!(rom.read_pointer(ROOT).unwrap(), Some(table.layout.pointers));

        for (i, record) in table.records.iter().enumerate() {
            assert_eq!(record.cosmetics(rom).unwrap(), cosmetics[i]);
            let data = record.frames.data.unwrap();
            let len = pixels[i].len() as u32;
            assert_eq!(rom.read_bytes(data, len).unwrap(), pixels[i].as_slice());
        }
    }

    #[test]
    fn relocation_releases_the_old_table() {
        let rom = vanilla_image(&MIXED, 11);
        let bodies: Vec<Address> = (0..MIXED.len() as u32)
            .map(|i| rom.read_pointer(VANILLA_TABLE + i * 4).unwrap().unwrap())
            .collect();
        let first_pixels = rom
            .read_pointer(rom.read_pointer(bodies[0] + FRAMES_FIELD).unwrap().unwrap())
            .unwrap()
            .unwrap();

        let catalog = open(rom);
        let rom = catalog.rom();

        assert!(is_free(rom, VANILLA_TABLE, MIXED.len() as u32 * 4));
        for body in bodies {
            assert!(is_free(rom, body, RECORD_SIZE));
        }
        assert!(is_free(rom, first_pixels, 2 * 0x100));
        assert_eq!(catalog.session().claimed.len(), MIXED.len());
    }

    #[test]
    fn root_table_aliases_follow_the_move() {
        let mut rom = vanilla_image(&MIXED, 3);
        rom.write_pointer(0x1800, VANILLA_TABLE).unwrap();

        let catalog = open(rom);
        let new_table = catalog.tables()[0].layout.pointers;
        assert_eq!(catalog.rom().read_pointer(0x1800).unwrap(), Some(new_table));
    }

    #[test]
    fn discovery_is_repeatable() {
        let mut catalog = open(vanilla_image(&MIXED, 5));
        let tables = catalog.tables().to_vec();
        let rom = catalog.rom().clone();

        catalog.discover().unwrap();
        assert_eq!(catalog.tables(), tables.as_slice());
        assert_eq!(catalog.rom(), &rom);

        let reopened = open(rom);
        assert_eq!(reopened.tables(), tables.as_slice());
    }

    #[test]
    fn unrecognized_frames_fall_back_to_default_type() {
        let mut rom = vanilla_image(&MIXED[..2], 9);
        let body = rom.read_pointer(VANILLA_TABLE + 4).unwrap().unwrap();
        let array = rom.read_pointer(body + FRAMES_FIELD).unwrap().unwrap();
        rom.write_bytes(array + 4, &[0x12, 0x34]).unwrap();

        let catalog = open(rom);
        let table = &catalog.tables()[0];
        assert_eq!(
            geometry(table, catalog.rom()),
            vec![
                (Some(SpriteType::Size16x32), Some(2)),
                (Some(SpriteType::Size16x32), Some(1)),
            ]
        );
    }

    #[test]
    fn nearly_full_tables_are_padded() {
        let records = vec![(SpriteType::Size16x16, 1); 220];
        let catalog = open(vanilla_image(&records, 13));
        let table = &catalog.tables()[0];

        assert_eq!(table.len(), TABLE_SLOTS);
        let padding = &geometry(table, catalog.rom())[220..];
        assert!(padding
            .iter()
            .all(|&g| g == (Some(SpriteType::Size16x32), Some(FRAMES_PER_RECORD))));
    }

    #[test]
    fn short_tables_are_not_padded() {
        let records = vec![(SpriteType::Size16x16, 1); 200];
        let catalog = open(vanilla_image(&records, 17));
        assert_eq!(catalog.tables()[0].len(), 200);
    }

    #[test]
    fn stale_root_entry_is_cleared() {
        let rom = vanilla_image(&MIXED, 1);
        let mut profile = profile();
        profile.stale_tables = vec![VANILLA_TABLE];

        let catalog = Catalog::open(rom, &profile, templates()).unwrap();
        assert!(catalog.tables().is_empty());
        assert_eq!(catalog.rom().read_word(ROOT).unwrap(), 0);
    }

    #[test]
    fn import_and_remove_tables() {
        let mut catalog = open(testutil::blank_image());
        assert!(catalog.tables().is_empty());
        assert_eq!(catalog.free_root_slots(), ROOT_SLOTS);

        let first = catalog.import_table(&LayoutRequest::default()).unwrap();
        let request = LayoutRequest {
            frame_data: Some(0x1C0000),
            ..LayoutRequest::default()
        };
        let second = catalog.import_table(&request).unwrap();
        assert_eq!((first, second), (0, 1));
        assert_eq!(catalog.free_root_slots(), ROOT_SLOTS - 2);
        assert_eq!(catalog.tables()[1].layout.frame_data, 0x1C0000);

        catalog.add(0, SpriteType::Size32x32, 2).unwrap();
        catalog.add(1, SpriteType::Size16x32, 3).unwrap();
        let removed = catalog.tables()[0].layout;
        let kept = catalog.tables()[1].layout;

        catalog.remove_table(0).unwrap();

        assert_eq!(catalog.tables().len(), 1);
        assert_eq!(catalog.tables()[0].layout, kept);
        assert_eq!(catalog.tables()[0].root_slot, ROOT);
        assert_eq!(catalog.rom().read_word(ROOT + 4).unwrap(), 0);
        assert_eq!(catalog.free_root_slots(), ROOT_SLOTS - 1);

        let rom = catalog.rom();
        assert!(is_free(rom, removed.pointers, 259 * 4));
        assert!(is_free(rom, removed.records, RECORD_POOL_SIZE - 4));
        assert!(is_free(rom, removed.frame_pointers, FRAME_POINTER_POOL_SIZE - 4));
        assert!(is_free(rom, removed.frame_data, 2 * 0x200 + 4));
    }

    #[test]
    fn explicit_region_that_is_taken_fails_import() {
        let mut catalog = open(testutil::blank_image());
        let request = LayoutRequest {
            pointers: Some(0x2000),
            ..LayoutRequest::default()
        };
        assert!(matches!(
            catalog.import_table(&request),
            Err(OwmError::RegionNotFree { addr: 0x2000, .. })
        ));
        assert!(catalog.tables().is_empty());
    }

    #[test]
    fn crud_through_the_catalog() {
        let mut catalog = open(testutil::blank_image());
        catalog.import_table(&LayoutRequest::default()).unwrap();

        for ty in [SpriteType::Size16x32, SpriteType::Size32x32, SpriteType::Size16x16] {
            catalog.add(0, ty, 2).unwrap();
        }
        catalog.insert(0, 0, SpriteType::Size48x48, 1).unwrap();
        catalog.remove(0, 2).unwrap();

        let mut cosmetics = catalog.cosmetics(0, 1).unwrap();
        cosmetics.text_color = 3;
        catalog.set_cosmetics(0, 1, &cosmetics).unwrap();
        catalog.resize(0, 1, SpriteType::Size64x64, 2).unwrap();

        let table = &catalog.tables()[0];
        assert_eq!(
            geometry(table, catalog.rom()),
            vec![
                (Some(SpriteType::Size48x48), Some(1)),
                (Some(SpriteType::Size64x64), Some(2)),
                (Some(SpriteType::Size16x16), Some(2)),
            ]
        );
        let after = catalog.cosmetics(0, 1).unwrap();
        assert_eq!(after.palette_slot, 0xA);
        assert_eq!(after.text_color, 3);

        assert!(matches!(
            catalog.add(3, SpriteType::Size16x32, 1),
            Err(OwmError::IndexOutOfRange { what: "table", index: 3, len: 1 })
        ));
        assert!(matches!(
            catalog.cosmetics(0, 9),
            Err(OwmError::IndexOutOfRange { what: "record", .. })
        ));
    }

    #[test]
    fn explicit_repoint_keeps_records() {
        let mut catalog = open(testutil::blank_image());
        catalog.import_table(&LayoutRequest::default()).unwrap();
        catalog.add(0, SpriteType::Size16x32, 4).unwrap();
        catalog.add(0, SpriteType::Size64x64, 1).unwrap();
        let before = geometry(&catalog.tables()[0], catalog.rom());
        let old = catalog.tables()[0].layout;

        catalog.repoint(0).unwrap();

        let table = &catalog.tables()[0];
        assert_ne!(table.layout, old);
        assert_eq!(geometry(table, catalog.rom()), before);
        assert_eq!(catalog.rom().read_pointer(ROOT).unwrap(), Some(table.layout.pointers));

        let rom = catalog.rom();
        assert!(is_free(rom, old.pointers, 259 * 4));
        assert!(is_free(rom, old.records, RECORD_POOL_SIZE - 4));
        assert!(is_free(rom, old.frame_pointers, FRAME_POINTER_POOL_SIZE - 4));
        assert!(is_free(rom, old.frame_data, 4 * 0x100));
    }

    #[test]
    fn adjacent_tables_keep_their_own_records() {
        let mut records = MIXED.to_vec();
        records.extend([(SpriteType::Size16x16, 3), (SpriteType::Size32x32, 1)]);
        let mut rom = vanilla_image(&records, 23);
        let second = VANILLA_TABLE + MIXED.len() as u32 * 4;
        rom.write_pointer(ROOT + 4, second).unwrap();

        let catalog = open(rom);
        assert_eq!(catalog.tables().len(), 2);
        let rom = catalog.rom();

        let first: Vec<_> = MIXED.iter().map(|&(ty, n)| (Some(ty), Some(n))).collect();
        assert_eq!(geometry(&catalog.tables()[0], rom), first);
        assert_eq!(
            geometry(&catalog.tables()[1], rom),
            vec![
                (Some(SpriteType::Size16x16), Some(3)),
                (Some(SpriteType::Size32x32), Some(1)),
            ]
        );

        for (i, table) in catalog.tables().iter().enumerate() {
            assert!(!needs_repoint(rom, table.layout.pointers));
            let slot = ROOT + i as u32 * 4;
            assert_eq!(table.root_slot, slot);
            assert_eq!(rom.read_pointer(slot).unwrap(), Some(table.layout.pointers));
        }
        assert!(is_free(rom, VANILLA_TABLE, records.len() as u32 * 4));
    }

    #[test]
    fn frame_count_stops_at_claimed_arrays() {
        let rom = vanilla_image(&[(SpriteType::Size16x32, 3), (SpriteType::Size16x32, 2)], 21);
        let first = rom.read_pointer(0x3000 + FRAMES_FIELD).unwrap().unwrap();
        let second = first + 3 * FRAME_ENTRY_SIZE;

        // Without the neighbour claimed, both arrays read as one.
        let mut claimed = BTreeSet::from([first]);
        assert_eq!(infer_frame_count(&rom, &claimed, first), 5);

        claimed.insert(second);
        assert_eq!(infer_frame_count(&rom, &claimed, first), 3);
        assert_eq!(infer_frame_count(&rom, &claimed, second), 2);
    }

    #[test]
    fn snapshot_serializes_tagged_nodes() {
        let mut catalog = open(testutil::blank_image());
        catalog.import_table(&LayoutRequest::default()).unwrap();
        catalog.add(0, SpriteType::Size16x32, 4).unwrap();

        let nodes = catalog.snapshot().unwrap();
        assert_eq!(nodes.len(), 3);

        let json = serde_json::to_value(&nodes).unwrap();
        assert_eq!(json[0]["node"], "root");
        assert_eq!(json[0]["address"], ROOT);
        assert_eq!(json[0]["tables"], 1);
        assert_eq!(json[0]["free_slots"], ROOT_SLOTS - 1);
        assert_eq!(json[1]["node"], "table");
        assert_eq!(json[1]["records"], 1);
        assert_eq!(json[2]["node"], "record");
        assert_eq!(json[2]["frames"], 4);
        assert_eq!(json[2]["kind"]["known"], "Size16x32");
        assert_eq!(json[2]["dimensions"], serde_json::json!([16, 32]));
        assert_eq!(json[2]["cosmetics"]["palette_slot"], 0xA);
    }
}
