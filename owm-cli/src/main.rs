use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use owm_core::profile::parse_address;
use owm_core::{
    run, Address, CosmeticsPatch, Edit, LayoutRequest, Node, OwmSettings, SpriteType,
};

#[derive(Debug, Parser)]
#[command(name = "owm", version, about = "Overworld sprite table manager for GBA images")]
struct Args {
    /// Image to edit.
    #[arg(long)]
    rom: PathBuf,

    /// Write the result here instead of over the input image.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = "profiles.json")]
    profiles: PathBuf,

    /// Game code of the profile to use; detected from the image otherwise.
    #[arg(long)]
    profile: Option<String>,

    #[arg(long)]
    templates: Option<PathBuf>,

    /// Gzip the untouched image here before editing.
    #[arg(long)]
    backup: Option<PathBuf>,

    /// Print the catalog as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tables and records.
    List,
    Add {
        table: usize,
        #[arg(value_parser = parse_sprite_type)]
        sprite: SpriteType,
        frames: u32,
    },
    Insert {
        table: usize,
        position: usize,
        #[arg(value_parser = parse_sprite_type)]
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
        #[arg(value_parser = parse_sprite_type)]
        sprite: SpriteType,
        frames: u32,
    },
    /// Change palette, footprint or text color of a record.
    SetCosmetics {
        table: usize,
        position: usize,
        #[arg(long, value_parser = parse_number::<u16>)]
        palette_id: Option<u16>,
        #[arg(long, value_parser = parse_palette_slot)]
        palette_slot: Option<u8>,
        #[arg(long, value_parser = parse_number::<u8>)]
        footprint: Option<u8>,
        #[arg(long, value_parser = parse_number::<u8>)]
        text_color: Option<u8>,
    },
    /// Move a table and its records to fresh free space.
    Repoint { table: usize },
    /// Create an empty table. Regions not given are placed in free space.
    ImportTable {
        #[arg(long, value_parser = parse_address)]
        pointers: Option<Address>,
        #[arg(long, value_parser = parse_address)]
        records: Option<Address>,
        #[arg(long, value_parser = parse_address)]
        frame_pointers: Option<Address>,
        #[arg(long, value_parser = parse_address)]
        frame_data: Option<Address>,
    },
    RemoveTable { table: usize },
}

fn parse_sprite_type(text: &str) -> Result<SpriteType, String> {
    let number: u8 = text
        .parse()
        .map_err(|_| format!("'{}' is not a sprite type number", text))?;
    SpriteType::try_from(number).map_err(|e| e.to_string())
}

fn parse_number<T: TryFrom<Address>>(text: &str) -> Result<T, String> {
    let value = parse_address(text).map_err(|e| format!("'{}': {}", text, e))?;
    T::try_from(value).map_err(|_| format!("{:#X} is out of range", value))
}

fn parse_palette_slot(text: &str) -> Result<u8, String> {
    let slot = parse_number::<u8>(text)?;
    if slot > 0xF {
        return Err(format!("palette slot {:#X} does not fit in a nibble", slot));
    }
    Ok(slot)
}

impl Command {
    fn into_edit(self) -> Edit {
        match self {
            Command::List => Edit::List,
            Command::Add {
                table,
                sprite,
                frames,
            } => Edit::Add {
                table,
                sprite,
                frames,
            },
            Command::Insert {
                table,
                position,
                sprite,
                frames,
            } => Edit::Insert {
                table,
                position,
                sprite,
                frames,
            },
            Command::Remove { table, position } => Edit::Remove { table, position },
            Command::Resize {
                table,
                position,
                sprite,
                frames,
            } => Edit::Resize {
                table,
                position,
                sprite,
                frames,
            },
            Command::SetCosmetics {
                table,
                position,
                palette_id,
                palette_slot,
                footprint,
                text_color,
            } => Edit::SetCosmetics {
                table,
                position,
                changes: CosmeticsPatch {
                    palette_id,
                    palette_slot,
                    footprint,
                    text_color,
                },
            },
            Command::Repoint { table } => Edit::Repoint { table },
            Command::ImportTable {
                pointers,
                records,
                frame_pointers,
                frame_data,
            } => Edit::ImportTable {
                layout: LayoutRequest {
                    pointers,
                    records,
                    frame_pointers,
                    frame_data,
                },
            },
            Command::RemoveTable { table } => Edit::RemoveTable { table },
        }
    }
}

fn print_nodes(nodes: &[Node]) {
    for node in nodes {
        match node {
            Node::Root {
                address,
                tables,
                free_slots,
            } => println!(
                "Root {:#X}: {} tables, room for {} more",
                address, tables, free_slots
            ),
            Node::Table {
                index,
                layout,
                records,
                ..
            } => println!(
                "Table {} at {:#X}: {} records (records {:#X}, frame pointers {:#X}, frames {:#X})",
                index, layout.pointers, records, layout.records, layout.frame_pointers, layout.frame_data
            ),
            Node::Record {
                position,
                address,
                kind,
                frames,
                cosmetics,
                ..
            } => {
                let ty = match kind.sprite_type() {
                    Some(ty) => ty.to_string(),
                    None => "unrecognized".to_string(),
                };
                let frames = frames.map_or_else(|| "?".to_string(), |n| n.to_string());
                println!(
                    "  {:>3}: {:#X} {} frames={} palette={:#06X} slot={:#X}",
                    position, address, ty, frames, cosmetics.palette_id, cosmetics.palette_slot
                );
            }
        }
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = OwmSettings {
        rom_path: args.rom,
        output_path: args.output,
        profiles_path: args.profiles,
        profile: args.profile,
        templates_dir: args.templates,
        backup_path: args.backup,
        edit: args.command.into_edit(),
    };
    tracing::debug!("{:?}", settings);

    let nodes = match run(settings) {
        Ok(nodes) => nodes,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&nodes) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                eprintln!("Error: {err}");
                std::process::exit(1);
            }
        }
    } else {
        print_nodes(&nodes);
    }
}
