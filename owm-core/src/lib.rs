use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub mod catalog;
pub mod frames;
pub mod free_space;
pub mod layout;
pub mod profile;
pub mod record;
pub mod rom;
pub mod session;
pub mod sprite;
pub mod table;
pub mod template;
pub mod validate;

#[cfg(test)]
mod testutil;

pub use catalog::{Catalog, Node};
pub use layout::{LayoutRequest, TableLayout};
pub use profile::{Profile, ProfileSet};
pub use record::{Cosmetics, CosmeticsPatch};
pub use rom::{Address, Rom};
pub use sprite::{FrameKind, SpriteType};
pub use template::Templates;

#[derive(Debug, Error)]
pub enum OwmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{len} bytes at {addr:#X} run past the end of the image")]
    OutOfBounds { addr: Address, len: u32 },
    #[error("word at {addr:#X} is not a valid pointer")]
    InvalidPointer { addr: Address },
    #[error("no free run of {size:#X} bytes at or after {hint:#X}")]
    NoFreeSpace { size: u32, hint: Address },
    #[error("{size:#X} bytes at {addr:#X} are not free")]
    RegionNotFree { addr: Address, size: u32 },
    #[error("{what} is full ({limit} entries)")]
    CapacityExceeded { what: &'static str, limit: usize },
    #[error("{what} index {index} is out of range ({len} present)")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    #[error("unknown sprite type {0}, expected 1-8")]
    UnknownSpriteType(u8),
    #[error("a frame set needs at least one frame")]
    EmptyFrameSet,
    #[error("template {name} is {len} bytes, expected at least {expected}")]
    Template {
        name: String,
        len: usize,
        expected: usize,
    },
}

pub type Result<T> = std::result::Result<T, OwmError>;

/// One edit applied after the tables are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    List,
    Add {
        table: usize,
        sprite: SpriteType,
        frames: u32,
    },
    Insert {
        table: usize,
        position: usize,
        sprite: SpriteType,
        frames: u32,
    },
    Remove {
        table: usize,
        position: usize,
    },
    Resize {
        table: usize,
        position: usize,
        sprite: SpriteType,
        frames: u32,
    },
    SetCosmetics {
        table: usize,
        position: usize,
        changes: CosmeticsPatch,
    },
    Repoint {
        table: usize,
    },
    ImportTable {
        layout: LayoutRequest,
    },
    RemoveTable {
        table: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwmSettings {
    pub rom_path: PathBuf,
    /// Written in place when absent.
    pub output_path: Option<PathBuf>,
    pub profiles_path: PathBuf,
    /// Game code to use instead of the one in the image header.
    pub profile: Option<String>,
    /// Overrides the profile's template directory.
    pub templates_dir: Option<PathBuf>,
    /// Gzip copy of the untouched image.
    pub backup_path: Option<PathBuf>,
    pub edit: Edit,
}

fn relative_to(base_file: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    base_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(path)
}

fn apply_edit(catalog: &mut Catalog, edit: Edit) -> Result<()> {
    match edit {
        Edit::List => {}
        Edit::Add {
            table,
            sprite,
            frames,
        } => {
            let position = catalog.add(table, sprite, frames)?;
            info!("added {} x{} as record {} of table {}", sprite, frames, position, table);
        }
        Edit::Insert {
            table,
            position,
            sprite,
            frames,
        } => {
            catalog.insert(table, position, sprite, frames)?;
            info!("inserted {} x{} at record {} of table {}", sprite, frames, position, table);
        }
        Edit::Remove { table, position } => {
            catalog.remove(table, position)?;
            info!("removed record {} of table {}", position, table);
        }
        Edit::Resize {
            table,
            position,
            sprite,
            frames,
        } => {
            catalog.resize(table, position, sprite, frames)?;
            info!("resized record {} of table {} to {} x{}", position, table, sprite, frames);
        }
        Edit::SetCosmetics {
            table,
            position,
            changes,
        } => {
            let cosmetics = catalog.patch_cosmetics(table, position, &changes)?;
            info!("record {} of table {} now has {:?}", position, table, cosmetics);
        }
        Edit::Repoint { table } => catalog.repoint(table)?,
        Edit::ImportTable { layout } => {
            let index = catalog.import_table(&layout)?;
            info!("imported table {}", index);
        }
        Edit::RemoveTable { table } => catalog.remove_table(table)?,
    }
    Ok(())
}

/// Opens the image, applies one edit and writes the image back if any
/// byte changed. Returns the resulting catalog snapshot.
pub fn run(settings: OwmSettings) -> Result<Vec<Node>> {
    if !settings.rom_path.exists() {
        return Err(OwmError::Config(format!(
            "Image path does not exist: {}",
            settings.rom_path.display()
        )));
    }

    let mut rom = Rom::open(&settings.rom_path)?;
    if let Some(backup) = &settings.backup_path {
        rom.write_backup(backup)?;
        info!("backed up image to {}", backup.display());
    }

    let profiles = ProfileSet::load(&settings.profiles_path)?;
    let profile = match &settings.profile {
        Some(code) => profiles.get(code)?,
        None => profiles.detect(&rom)?,
    };
    info!("using profile '{}'", profile.name);

    let templates_dir = settings
        .templates_dir
        .clone()
        .or_else(|| {
            profile
                .templates_dir
                .as_deref()
                .map(|dir| relative_to(&settings.profiles_path, dir))
        })
        .ok_or_else(|| {
            OwmError::Config(format!("profile '{}' names no template directory", profile.name))
        })?;
    let templates = Templates::load_dir(&templates_dir)?;

    let original = rom.clone();
    profile.apply_fixes(&mut rom)?;
    let mut catalog = Catalog::open(rom, profile, templates)?;
    apply_edit(&mut catalog, settings.edit)?;

    let nodes = catalog.snapshot()?;
    let rom = catalog.into_rom();
    if rom == original {
        info!("image unchanged");
    } else {
        let out = settings
            .output_path
            .as_deref()
            .unwrap_or(settings.rom_path.as_path());
        rom.save(out)?;
        info!("wrote {}", out.display());
    }
    Ok(nodes)
}
