use std::fs;
use std::path::Path;

use crate::record::RECORD_SIZE;
use crate::sprite::SpriteType;
use crate::{OwmError, Result};

pub type RecordBody = [u8; RECORD_SIZE as usize];

/// Default record bodies, one per sprite type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    bodies: [RecordBody; 8],
}

impl Templates {
    pub fn new(bodies: [RecordBody; 8]) -> Self {
        Templates { bodies }
    }

    /// Reads `Template1` .. `Template8` from `dir`. Only the first 0x24
    /// bytes of each file are used.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut bodies = [[0u8; RECORD_SIZE as usize]; 8];
        for (i, body) in bodies.iter_mut().enumerate() {
            let name = format!("Template{}", i + 1);
            let raw = fs::read(dir.join(&name))?;
            let len = body.len();
            if raw.len() < len {
                return Err(OwmError::Template {
                    name,
                    len: raw.len(),
                    expected: len,
                });
            }
            body.copy_from_slice(&raw[..len]);
        }
        Ok(Templates { bodies })
    }

    pub fn get(&self, ty: SpriteType) -> &RecordBody {
        &self.bodies[ty.template_index()]
    }
}
