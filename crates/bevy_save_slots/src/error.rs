use std::path::PathBuf;

use thiserror::Error;

use crate::{RegionId, SlotId, WorkError};

/// Errors produced by the save manager, either when a request is rejected or
/// when an accepted task fails.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// The slot id is outside the active preset.
    #[error("Slot {slot} is not a valid slot id (max slots: {max_slots})")]
    InvalidSlot { slot: SlotId, max_slots: u32 },

    /// An exclusive task is running, or the request would conflict with one.
    #[error("Another save operation is already in progress")]
    AlreadyInProgress,

    /// Nothing is stored under the slot.
    #[error("Slot {0} was not found in storage")]
    NotFound(SlotId),

    /// The slot is stored and the save did not allow overriding it.
    #[error("Slot {0} already exists and overriding was not allowed")]
    SlotOccupied(SlotId),

    /// A current-slot shortcut was used before any save or load succeeded.
    #[error("No slot has been saved or loaded in this session")]
    NoCurrentSlot,

    /// Preset or hooks cannot change while tasks are active.
    #[error("Cannot change the save manager while tasks are active")]
    Busy,

    /// Storage failed to read, write or decode a slot.
    #[error("IO error: {0}")]
    Io(String),

    /// Some slots of a bulk delete could not be removed.
    #[error("{} of {} slot deletions failed", failed.len(), failed.len() + removed.len())]
    PartialFailure {
        removed: Vec<SlotId>,
        failed: Vec<(SlotId, String)>,
    },

    /// Regions did not stream in before the preset timeout.
    #[error("Timed out waiting for regions to stream in: {0:?}")]
    RegionTimeout(Vec<RegionId>),

    /// The background job panicked or vanished.
    #[error("Background work failed: {0}")]
    Worker(String),

    /// The manager shut down before the task finished.
    #[error("Operation was cancelled during shutdown")]
    Cancelled,
}

impl From<StoreError> for SaveError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(slot) => SaveError::NotFound(slot),
            other => SaveError::Io(other.to_string()),
        }
    }
}

impl From<WorkError> for SaveError {
    fn from(error: WorkError) -> Self {
        match error {
            WorkError::Cancelled => SaveError::Cancelled,
            other => SaveError::Worker(other.to_string()),
        }
    }
}

/// Errors reported by a [`SlotStore`](crate::SlotStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Nothing is stored under the slot.
    #[error("Slot {0} not found")]
    NotFound(SlotId),

    /// A filesystem call failed.
    #[error("Failed to access {path:?}: {reason}")]
    Io { path: PathBuf, reason: String },

    /// Slot content could not be serialized.
    #[error("Failed to encode slot {slot}: {reason}")]
    Encode { slot: SlotId, reason: String },

    /// Stored bytes are not a valid slot.
    #[error("Failed to decode slot {slot}: {reason}")]
    Decode { slot: SlotId, reason: String },
}

/// Errors raised while reading a [`SavePreset`](crate::SavePreset).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresetError {
    /// The preset file could not be read.
    #[error("Failed to read preset {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// The preset file is not valid RON.
    #[error("Failed to parse preset: {0}")]
    Parse(String),
}
