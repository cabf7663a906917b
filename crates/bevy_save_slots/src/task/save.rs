use std::time::SystemTime;

use bevy::prelude::*;

use crate::{
    CancelToken, SaveError, SlotData, SlotId, SlotInfo, StoreError, ThumbnailSize, WorkError,
    WorkHandle,
    task::{Step, TaskContext, TaskId, TaskOutcome, TaskPayload},
};

type WriteResult = Result<(SlotInfo, SlotData), StoreError>;

enum SavePhase {
    Snapshot,
    SerializeRegions { info: SlotInfo, data: SlotData },
    Dispatch { info: SlotInfo, data: SlotData },
    Writing(WorkHandle<WriteResult>),
    Done,
}

/// Saves the application state into a slot.
///
/// Snapshot, region serialization and thumbnail capture run on the main
/// schedule. Encoding and writing run on the worker pool.
pub(crate) struct SaveOp {
    slot: SlotId,
    thumbnail: Option<ThumbnailSize>,
    phase: SavePhase,
    /// Region unloads up to this point are part of the snapshot.
    kept_seq: u64,
}

impl SaveOp {
    pub fn new(slot: SlotId, thumbnail: Option<ThumbnailSize>) -> Self {
        Self {
            slot,
            thumbnail,
            phase: SavePhase::Snapshot,
            kept_seq: 0,
        }
    }

    pub fn step(&mut self, task: TaskId, cancel: &CancelToken, cx: &mut TaskContext<'_>) -> Step {
        match std::mem::replace(&mut self.phase, SavePhase::Done) {
            SavePhase::Snapshot => {
                let mut info = SlotInfo::new(self.slot);
                let mut data = SlotData::default();
                if let Some(current) = cx.current.as_ref() {
                    // Keep host fields such as the map across saves.
                    info.map = current.info.map.clone();
                    info.fields = current.info.fields.clone();
                    // Regions that are not loaded only live in the current slot.
                    data.regions = current.data.regions.clone();
                }
                info.save_date = SystemTime::now();
                self.kept_seq = cx.regions.kept_seq();

                cx.hooks.capture(&mut info, &mut data);
                debug!("Task {} captured world state for slot {}", task, self.slot);

                self.phase = SavePhase::SerializeRegions { info, data };
                Step::Continue
            }
            SavePhase::SerializeRegions { info, mut data } => {
                let covered = cx
                    .regions
                    .serialize_resident_regions(task, &mut data, cx.hooks);
                debug!("Task {} serialized {} regions", task, covered.len());
                data.resident_regions = covered;

                self.phase = SavePhase::Dispatch { info, data };
                Step::Continue
            }
            SavePhase::Dispatch { mut info, data } => {
                if let Some(size) = self.thumbnail {
                    // Reads the render target, so it must stay on the main schedule.
                    info.thumbnail = cx.hooks.capture_thumbnail(size);
                    if info.thumbnail.is_none() {
                        warn!("Task {} could not capture a thumbnail", task);
                    }
                }

                let store = cx.store.clone();
                let slot = self.slot;
                let handle = cx.pool.submit(cancel.clone(), move |_| {
                    store.write(slot, &info, &data).map(|()| (info, data))
                });
                self.phase = SavePhase::Writing(handle);
                Step::Continue
            }
            SavePhase::Writing(mut handle) => match handle.try_take() {
                None => {
                    self.phase = SavePhase::Writing(handle);
                    Step::Continue
                }
                Some(Ok(Ok((info, mut data)))) => {
                    self.merge_kept_regions(&mut data, cx);
                    cx.replace_current(info.clone(), data);
                    Step::Finished(TaskOutcome::Succeeded, TaskPayload::Slot(info))
                }
                Some(Ok(Err(error))) => {
                    error!("Failed to write slot {}: {}", self.slot, error);
                    Step::Finished(TaskOutcome::Failed(error.into()), TaskPayload::None)
                }
                Some(Err(WorkError::Cancelled)) => {
                    Step::Finished(TaskOutcome::Cancelled, TaskPayload::None)
                }
                Some(Err(error)) => Step::Finished(
                    TaskOutcome::Failed(SaveError::from(error)),
                    TaskPayload::None,
                ),
            },
            SavePhase::Done => Step::Continue,
        }
    }

    /// Copies region state kept by unloads during the save, which is newer
    /// than what was written.
    fn merge_kept_regions(&self, data: &mut SlotData, cx: &TaskContext<'_>) {
        let Some(current) = cx.current.as_ref() else {
            return;
        };
        for region in cx.regions.kept_since(self.kept_seq) {
            if let Some(state) = current.data.regions.get(region) {
                debug!("Keeping region {} unloaded during the save", region);
                data.regions.insert(region.clone(), state.clone());
            }
        }
    }
}
