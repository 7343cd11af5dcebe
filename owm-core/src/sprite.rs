use serde::{Deserialize, Serialize};
use std::fmt;

use crate::OwmError;

/// The eight overworld frame layouts. The discriminant order matches the
/// 1-based type numbers used by the template files and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SpriteType {
    #[default]
    Size16x32,
    Size32x32,
    Size16x16,
    Size64x64,
    /// FireRed only.
    Size128x64,
    /// Emerald only.
    Size48x48,
    /// Emerald only.
    Size88x32,
    /// Emerald only.
    Size96x40,
}

impl SpriteType {
    pub const ALL: [SpriteType; 8] = [
        SpriteType::Size16x32,
        SpriteType::Size32x32,
        SpriteType::Size16x16,
        SpriteType::Size64x64,
        SpriteType::Size128x64,
        SpriteType::Size48x48,
        SpriteType::Size88x32,
        SpriteType::Size96x40,
    ];

    /// The two bytes stored 4 bytes into every frame-pointer entry.
    pub fn signature(self) -> [u8; 2] {
        match self {
            SpriteType::Size16x32 => [0x00, 0x01],
            SpriteType::Size32x32 => [0x00, 0x02],
            SpriteType::Size16x16 => [0x80, 0x00],
            SpriteType::Size64x64 => [0x00, 0x08],
            SpriteType::Size128x64 => [0x00, 0x10],
            SpriteType::Size48x48 => [0x80, 0x04],
            SpriteType::Size88x32 => [0x80, 0x05],
            SpriteType::Size96x40 => [0x80, 0x07],
        }
    }

    pub fn from_signature(signature: [u8; 2]) -> Option<SpriteType> {
        SpriteType::ALL
            .into_iter()
            .find(|ty| ty.signature() == signature)
    }

    /// Bytes per frame (4bpp tiles).
    pub fn frame_size(self) -> u32 {
        match self {
            SpriteType::Size16x32 => 0x100,
            SpriteType::Size32x32 => 0x200,
            SpriteType::Size16x16 => 0x80,
            SpriteType::Size64x64 => 0x800,
            SpriteType::Size128x64 => 0x1000,
            SpriteType::Size48x48 => 0x480,
            SpriteType::Size88x32 => 0x580,
            SpriteType::Size96x40 => 0x780,
        }
    }

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            SpriteType::Size16x32 => (16, 32),
            SpriteType::Size32x32 => (32, 32),
            SpriteType::Size16x16 => (16, 16),
            SpriteType::Size64x64 => (64, 64),
            SpriteType::Size128x64 => (128, 64),
            SpriteType::Size48x48 => (48, 48),
            SpriteType::Size88x32 => (88, 32),
            SpriteType::Size96x40 => (96, 40),
        }
    }

    /// 1-based type number.
    pub fn number(self) -> u8 {
        match self {
            SpriteType::Size16x32 => 1,
            SpriteType::Size32x32 => 2,
            SpriteType::Size16x16 => 3,
            SpriteType::Size64x64 => 4,
            SpriteType::Size128x64 => 5,
            SpriteType::Size48x48 => 6,
            SpriteType::Size88x32 => 7,
            SpriteType::Size96x40 => 8,
        }
    }

    pub(crate) fn template_index(self) -> usize {
        (self.number() - 1) as usize
    }
}

impl TryFrom<u8> for SpriteType {
    type Error = OwmError;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        number
            .checked_sub(1)
            .and_then(|i| SpriteType::ALL.get(i as usize).copied())
            .ok_or(OwmError::UnknownSpriteType(number))
    }
}

impl fmt::Display for SpriteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "type {} [{}x{}]", self.number(), w, h)
    }
}

/// What a frame-pointer entry's signature says about its frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Known(SpriteType),
    Unrecognized,
}

impl FrameKind {
    pub fn sprite_type(self) -> Option<SpriteType> {
        match self {
            FrameKind::Known(ty) => Some(ty),
            FrameKind::Unrecognized => None,
        }
    }

    pub fn dimensions(self) -> Option<(u32, u32)> {
        self.sprite_type().map(SpriteType::dimensions)
    }
}
