use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::rom::{Address, Rom};
use crate::{OwmError, Result};

/// Engine hook that JPAN's patch repoints at its relocated root array.
pub const JPAN_HOOK: Address = 0x160EE0;
pub const JPAN_ROOT: Address = 0x1A2000;

/// Per-game addresses. Addresses may be written as JSON numbers or as
/// `"0x..."` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(with = "hex_address")]
    pub table_root: Address,
    #[serde(with = "hex_address")]
    pub free_space: Address,
    #[serde(with = "hex_address")]
    pub frames_end: Address,
    /// Byte set to 0xFF so the engine accepts more sprites.
    #[serde(default, with = "hex_address::option", skip_serializing_if = "Option::is_none")]
    pub ow_fix: Option<Address>,
    /// Tables left behind by older tool versions; root entries naming
    /// them are dropped.
    #[serde(default, with = "hex_address::list", skip_serializing_if = "Vec::is_empty")]
    pub stale_tables: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
}

impl Profile {
    pub fn apply_fixes(&self, rom: &mut Rom) -> Result<()> {
        if let Some(addr) = self.ow_fix {
            rom.write_byte(addr, 0xFF)?;
            debug!("applied sprite limit fix at {:#X}", addr);
        }
        Ok(())
    }
}

/// Profiles keyed by game code (`BPRE`, `BPEE`, `JPAN`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileSet {
    profiles: BTreeMap<String, Profile>,
}

impl ProfileSet {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn get(&self, code: &str) -> Result<&Profile> {
        self.profiles
            .get(code)
            .ok_or_else(|| OwmError::Config(format!("no profile for game code '{}'", code)))
    }

    pub fn detect(&self, rom: &Rom) -> Result<&Profile> {
        let code = detect_game(rom)
            .ok_or_else(|| OwmError::Config("image has no readable game code".to_string()))?;
        self.get(&code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }
}

/// Game code of the image, or `JPAN` when JPAN's engine hook is present.
pub fn detect_game(rom: &Rom) -> Option<String> {
    if rom.read_pointer(JPAN_HOOK).ok().flatten() == Some(JPAN_ROOT) {
        return Some("JPAN".to_string());
    }
    rom.game_code()
}

/// Parses `0x`-prefixed hex or plain decimal.
pub fn parse_address(text: &str) -> std::result::Result<Address, ParseIntError> {
    let t = text.trim();
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Address::from_str_radix(hex, 16)
    } else {
        t.parse::<Address>()
    }
}

mod hex_address {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::parse_address;
    use crate::rom::Address;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(Address),
        Text(String),
    }

    fn resolve<E: de::Error>(raw: Raw) -> Result<Address, E> {
        match raw {
            Raw::Number(n) => Ok(n),
            Raw::Text(t) => {
                parse_address(&t).map_err(|e| E::custom(format!("invalid address '{}': {}", t, e)))
            }
        }
    }

    pub fn serialize<S: Serializer>(addr: &Address, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{:#X}", addr))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Address, D::Error> {
        resolve(Raw::deserialize(d)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(addr: &Option<Address>, s: S) -> Result<S::Ok, S::Error> {
            match addr {
                Some(addr) => s.serialize_some(&format!("{:#X}", addr)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
            Option::<Raw>::deserialize(d)?.map(resolve).transpose()
        }
    }

    pub mod list {
        use super::*;

        pub fn serialize<S: Serializer>(addrs: &[Address], s: S) -> Result<S::Ok, S::Error> {
            s.collect_seq(addrs.iter().map(|addr| format!("{:#X}", addr)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Address>, D::Error> {
            Vec::<Raw>::deserialize(d)?.into_iter().map(resolve).collect()
        }
    }
}
