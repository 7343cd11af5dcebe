use std::collections::BTreeSet;

use crate::profile::Profile;
use crate::rom::Address;
use crate::template::Templates;

/// State shared by every table of one open image.
#[derive(Debug, Clone)]
pub struct Session {
    /// Root pointer array listing the tables.
    pub root: Address,
    /// Target of the pointer written after every frame set's pixels.
    pub frames_end: Address,
    /// Where the next auto-placed table region search starts.
    pub cursor: Address,
    pub templates: Templates,
    /// Frame-pointer arrays owned by some loaded record.
    pub claimed: BTreeSet<Address>,
    pub known_tables: Vec<Address>,
    pub stale_tables: Vec<Address>,
}

impl Session {
    pub fn new(profile: &Profile, templates: Templates) -> Session {
        Session {
            root: profile.table_root,
            frames_end: profile.frames_end,
            cursor: profile.free_space,
            templates,
            claimed: BTreeSet::new(),
            known_tables: Vec::new(),
            stale_tables: profile.stale_tables.clone(),
        }
    }
}
