mod store;

use std::{
    collections::{BTreeMap, BTreeSet},
    time::SystemTime,
};

use serde::{Deserialize, Serialize};

use crate::RegionId;

pub use store::{FileSlotStore, MemorySlotStore, SlotStore};

/// Identifier of a save slot.
pub type SlotId = u32;

/// Requested size of a slot thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ThumbnailSize {
    /// Creates a thumbnail size.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
        }
    }
}

/// Captured thumbnail pixels, stored alongside the slot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// RGBA8 pixels, row major.
    pub rgba: Vec<u8>,
}

/// Lightweight metadata of a slot.
///
/// Cheap to read, so slot listings only ever decode this half of a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotInfo {
    /// Slot this info belongs to.
    pub id: SlotId,
    /// Display name, derived from the id.
    pub name: String,
    /// When the slot was last written.
    pub save_date: SystemTime,
    /// Map or scene the game was in when saved.
    pub map: String,
    /// Arbitrary host-defined fields.
    pub fields: BTreeMap<String, String>,
    /// Optional capture of the screen at save time.
    pub thumbnail: Option<Thumbnail>,
}

impl Default for SlotInfo {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            save_date: SystemTime::UNIX_EPOCH,
            map: String::new(),
            fields: BTreeMap::new(),
            thumbnail: None,
        }
    }
}

impl SlotInfo {
    /// Creates an info for `id` with the derived slot name.
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            name: id.to_string(),
            ..Default::default()
        }
    }
}

/// Heavyweight world state of a slot.
///
/// The contents are opaque to the save manager. Hosts fill them through
/// [`WorldHooks`](crate::WorldHooks).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotData {
    /// Serialized state of everything outside streaming regions.
    pub world: Vec<u8>,
    /// Serialized state of each streaming region.
    pub regions: BTreeMap<RegionId, Vec<u8>>,
    /// Regions that were resident when the slot was saved.
    pub resident_regions: BTreeSet<RegionId>,
}

/// The slot the application currently has loaded.
#[derive(Debug, Clone, Default)]
pub struct CurrentSlot {
    /// Metadata of the slot.
    pub info: SlotInfo,
    /// World state as of the last save or load.
    pub data: SlotData,
    /// Whether this slot came from a save or load rather than lazy creation.
    pub(crate) persisted: bool,
}

impl CurrentSlot {
    pub(crate) fn persisted(info: SlotInfo, data: SlotData) -> Self {
        Self {
            info,
            data,
            persisted: true,
        }
    }
}
