use bevy::prelude::*;

use crate::{
    LoadFinished, LoadStarted, RegionEvent, SaveFinished, SaveManager, SaveStarted,
    SlotTaskCompleted, events::SaveLifecycle,
};

/// Forwards streaming notifications to the [`SaveManager`], in the order they
/// were sent.
pub fn forward_region_events(
    mut manager: ResMut<SaveManager>,
    mut region_events: EventReader<RegionEvent>,
) {
    for event in region_events.read() {
        match event {
            RegionEvent::Loaded(region) => manager.on_region_loaded(region.clone()),
            RegionEvent::WillUnload(region) => manager.on_region_will_unload(region.clone()),
        }
    }
}

/// Steps every active save task and writes the resulting lifecycle events.
pub fn advance_save_manager(
    mut manager: ResMut<SaveManager>,
    mut save_started: EventWriter<SaveStarted>,
    mut save_finished: EventWriter<SaveFinished>,
    mut load_started: EventWriter<LoadStarted>,
    mut load_finished: EventWriter<LoadFinished>,
    mut completed: EventWriter<SlotTaskCompleted>,
) {
    manager.advance();

    // Also flushes the started events of tasks requested since the last frame.
    for lifecycle in manager.drain_lifecycle() {
        match lifecycle {
            SaveLifecycle::SaveStarted(event) => {
                save_started.write(event);
            }
            SaveLifecycle::SaveFinished(event) => {
                save_finished.write(event);
            }
            SaveLifecycle::LoadStarted(event) => {
                load_started.write(event);
            }
            SaveLifecycle::LoadFinished(event) => {
                load_finished.write(event);
            }
            SaveLifecycle::Completed(event) => {
                completed.write(event);
            }
        }
    }
}
