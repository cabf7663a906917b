//! Numbered save slots for Bevy applications.
//!
//! The [`SaveManager`] resource saves, loads, lists and deletes slots. Storage
//! work runs on the [`IoTaskPool`](bevy::tasks::IoTaskPool) while capture and
//! restore stay on the main schedule, through the [`WorldHooks`] the
//! application provides. Streaming regions are serialized alongside the world
//! and restored once they load back in.
//!
//! Add [`SaveSlotsPlugin`] to drive the manager every frame and receive
//! [`SaveFinished`], [`LoadFinished`] and [`SlotTaskCompleted`] events.

mod error;
mod events;
mod hooks;
mod manager;
mod preset;
mod slot;
mod streaming;
mod systems;
mod task;
mod worker;

pub use error::*;
pub use events::{
    LoadFinished, LoadStarted, RegionEvent, SaveFinished, SaveLifecycle, SaveListener,
    SaveStarted, SlotTaskCompleted, Subscribers,
};
pub use hooks::*;
pub use manager::*;
pub use preset::*;
pub use slot::*;
pub use streaming::*;
pub use systems::*;
pub use task::{
    DeleteSummary, OnTaskDone, TaskId, TaskKind, TaskOutcome, TaskPayload, TaskReport, TaskState,
    list_slot_infos,
};
pub use worker::*;

use std::{path::PathBuf, sync::Arc};

use bevy::prelude::*;

/// Installs a [`SaveManager`] and the systems driving it.
pub struct SaveSlotsPlugin {
    /// Preset active at startup.
    pub preset: SavePreset,
    /// Directory of the default [`FileSlotStore`].
    pub save_dir: PathBuf,
    /// Overrides the file store, for example with a [`MemorySlotStore`].
    pub store: Option<Arc<dyn SlotStore>>,
}

impl Default for SaveSlotsPlugin {
    fn default() -> Self {
        Self {
            preset: SavePreset::default(),
            save_dir: PathBuf::from("saves"),
            store: None,
        }
    }
}

impl SaveSlotsPlugin {
    /// Uses `store` instead of a file store in `save_dir`.
    pub fn with_store(mut self, store: Arc<dyn SlotStore>) -> Self {
        self.store = Some(store);
        self
    }
}

impl Plugin for SaveSlotsPlugin {
    fn build(&self, app: &mut App) {
        let store = self
            .store
            .clone()
            .unwrap_or_else(|| Arc::new(FileSlotStore::new(self.save_dir.clone())));
        // The event systems below drain the lifecycle queue every frame.
        let manager = SaveManager::new(self.preset.clone(), store).with_lifecycle_events();
        app.insert_resource(manager);

        app.add_event::<SaveStarted>();
        app.add_event::<SaveFinished>();
        app.add_event::<LoadStarted>();
        app.add_event::<LoadFinished>();
        app.add_event::<SlotTaskCompleted>();
        app.add_event::<RegionEvent>();

        app.add_systems(
            Update,
            (systems::forward_region_events, systems::advance_save_manager).chain(),
        );
    }
}
