use std::{
    collections::{BTreeMap, BTreeSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use bevy::prelude::*;
use ron::ser::PrettyConfig;
use serde::{Serialize, de::DeserializeOwned};

use crate::{SlotData, SlotId, SlotInfo, StoreError};

const INFO_EXTENSION: &str = "info.ron";
const DATA_EXTENSION: &str = "data.ron";

/// Durable storage for slot artifacts.
///
/// Stores are pure data access and are called from background workers, so
/// every method must be safe to call from any thread.
pub trait SlotStore: Send + Sync + 'static {
    /// Returns true if the slot has been written.
    fn exists(&self, slot: SlotId) -> bool;

    /// Reads the lightweight half of a slot.
    fn read_info(&self, slot: SlotId) -> Result<SlotInfo, StoreError>;

    /// Reads the heavyweight half of a slot.
    fn read_data(&self, slot: SlotId) -> Result<SlotData, StoreError>;

    /// Writes both halves of a slot, replacing any previous contents.
    fn write(&self, slot: SlotId, info: &SlotInfo, data: &SlotData) -> Result<(), StoreError>;

    /// Removes both halves of a slot.
    fn delete(&self, slot: SlotId) -> Result<(), StoreError>;

    /// Lists every slot present in storage, in ascending order.
    fn enumerate_ids(&self) -> Result<BTreeSet<SlotId>, StoreError>;
}

/// Slot store backed by RON files in a directory.
///
/// Each slot is written as `<id>.data.ron` followed by `<id>.info.ron`. A slot
/// exists once its info file exists.
#[derive(Debug, Clone)]
pub struct FileSlotStore {
    root: PathBuf,
}

impl FileSlotStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory this store writes into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the metadata file of a slot.
    pub fn info_path(&self, slot: SlotId) -> PathBuf {
        self.root.join(format!("{slot}.{INFO_EXTENSION}"))
    }

    /// Path of the world data file of a slot.
    pub fn data_path(&self, slot: SlotId) -> PathBuf {
        self.root.join(format!("{slot}.{DATA_EXTENSION}"))
    }

    fn read_file<T: DeserializeOwned>(&self, slot: SlotId, path: &Path) -> Result<T, StoreError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(slot));
            }
            Err(e) => return Err(io_error(path, e)),
        };
        ron::from_str(&contents).map_err(|e| StoreError::Decode {
            slot,
            reason: e.to_string(),
        })
    }

    fn write_file<T: Serialize>(
        &self,
        slot: SlotId,
        path: &Path,
        value: &T,
    ) -> Result<(), StoreError> {
        let encoded = ron::ser::to_string_pretty(value, PrettyConfig::default()).map_err(|e| {
            StoreError::Encode {
                slot,
                reason: e.to_string(),
            }
        })?;

        // Write next to the target and rename so readers never see a torn file
        let mut temp_path = path.to_path_buf();
        temp_path.set_extension("ron.tmp");
        fs::write(&temp_path, encoded).map_err(|e| io_error(&temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| io_error(path, e))
    }
}

impl SlotStore for FileSlotStore {
    fn exists(&self, slot: SlotId) -> bool {
        self.info_path(slot).is_file()
    }

    fn read_info(&self, slot: SlotId) -> Result<SlotInfo, StoreError> {
        self.read_file(slot, &self.info_path(slot))
    }

    fn read_data(&self, slot: SlotId) -> Result<SlotData, StoreError> {
        self.read_file(slot, &self.data_path(slot))
    }

    fn write(&self, slot: SlotId, info: &SlotInfo, data: &SlotData) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| io_error(&self.root, e))?;

        // Data first: the info file is what marks the slot as present.
        self.write_file(slot, &self.data_path(slot), data)?;
        self.write_file(slot, &self.info_path(slot), info)?;
        debug!("Wrote slot {} to {:?}", slot, self.root);
        Ok(())
    }

    fn delete(&self, slot: SlotId) -> Result<(), StoreError> {
        let info_path = self.info_path(slot);
        match fs::remove_file(&info_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(slot));
            }
            Err(e) => return Err(io_error(&info_path, e)),
        }

        let data_path = self.data_path(slot);
        match fs::remove_file(&data_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Slot {} had no data file at {:?}", slot, data_path);
                Ok(())
            }
            Err(e) => Err(io_error(&data_path, e)),
        }
    }

    fn enumerate_ids(&self) -> Result<BTreeSet<SlotId>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(id) = parse_info_file_name(file_name) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}

fn parse_info_file_name(file_name: &str) -> Option<SlotId> {
    let stem = file_name.strip_suffix(INFO_EXTENSION)?.strip_suffix('.')?;
    // Reject "+1" and "01" so that the name round-trips through the id.
    let id: SlotId = stem.parse().ok()?;
    (id.to_string() == stem).then_some(id)
}

fn io_error(path: &Path, error: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

/// Slot store that keeps every slot in memory.
///
/// Useful for tests and for hosts that persist slots through other means.
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    slots: Mutex<BTreeMap<SlotId, (SlotInfo, SlotData)>>,
}

impl MemorySlotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored slots.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no slot is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<SlotId, (SlotInfo, SlotData)>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SlotStore for MemorySlotStore {
    fn exists(&self, slot: SlotId) -> bool {
        self.lock().contains_key(&slot)
    }

    fn read_info(&self, slot: SlotId) -> Result<SlotInfo, StoreError> {
        self.lock()
            .get(&slot)
            .map(|(info, _)| info.clone())
            .ok_or(StoreError::NotFound(slot))
    }

    fn read_data(&self, slot: SlotId) -> Result<SlotData, StoreError> {
        self.lock()
            .get(&slot)
            .map(|(_, data)| data.clone())
            .ok_or(StoreError::NotFound(slot))
    }

    fn write(&self, slot: SlotId, info: &SlotInfo, data: &SlotData) -> Result<(), StoreError> {
        self.lock().insert(slot, (info.clone(), data.clone()));
        Ok(())
    }

    fn delete(&self, slot: SlotId) -> Result<(), StoreError> {
        self.lock()
            .remove(&slot)
            .map(|_| ())
            .ok_or(StoreError::NotFound(slot))
    }

    fn enumerate_ids(&self) -> Result<BTreeSet<SlotId>, StoreError> {
        Ok(self.lock().keys().copied().collect())
    }
}
