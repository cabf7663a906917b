use core::time::Duration;
use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{PresetError, SlotId};

/// Configuration used to validate and run save operations.
///
/// The active preset can only be swapped while no task is running, see
/// [`SaveManager::set_active_preset`](crate::SaveManager::set_active_preset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SavePreset {
    /// Maximum number of slots. Zero means unbounded.
    pub max_slots: u32,
    /// How long a load waits for its regions to stream in before failing.
    pub region_load_timeout: Duration,
}

impl Default for SavePreset {
    fn default() -> Self {
        Self {
            max_slots: 0,
            region_load_timeout: Duration::from_secs(10),
        }
    }
}

impl SavePreset {
    /// Creates a preset limited to `max_slots` slots.
    pub fn with_max_slots(max_slots: u32) -> Self {
        Self {
            max_slots,
            ..Default::default()
        }
    }

    /// Parses a preset from RON text. Missing fields keep their defaults.
    pub fn from_ron_str(source: &str) -> Result<Self, PresetError> {
        ron::from_str(source).map_err(|e| PresetError::Parse(e.to_string()))
    }

    /// Reads a preset from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|e| PresetError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ron_str(&source)
    }

    /// Checks a slot id against the slot limit.
    pub fn is_valid_slot(&self, slot: SlotId) -> bool {
        self.max_slots == 0 || slot < self.max_slots
    }

    /// Name of a slot on storage, or `None` for an invalid id.
    pub fn slot_name(&self, slot: SlotId) -> Option<String> {
        self.is_valid_slot(slot).then(|| slot.to_string())
    }
}
