use core::cmp::Reverse;

use bevy::prelude::*;

use crate::{
    CancelToken, SaveError, SavePreset, SlotInfo, SlotStore, StoreError, WorkError, WorkHandle,
    task::{Step, TaskContext, TaskOutcome, TaskPayload},
};

/// Reads the info of every valid slot in `store`.
///
/// Sorted by most recent save first when `sort_by_recent` is set, by slot id
/// otherwise. Slots whose info cannot be read are skipped.
pub fn list_slot_infos(
    store: &dyn SlotStore,
    preset: &SavePreset,
    sort_by_recent: bool,
) -> Result<Vec<SlotInfo>, StoreError> {
    let ids = store.enumerate_ids()?;

    let mut infos = Vec::with_capacity(ids.len());
    for id in ids.into_iter().filter(|id| preset.is_valid_slot(*id)) {
        match store.read_info(id) {
            Ok(info) => infos.push(info),
            Err(error) => warn!("Skipping unreadable slot {}: {}", id, error),
        }
    }

    if sort_by_recent {
        infos.sort_by_key(|info| Reverse(info.save_date));
    } else {
        infos.sort_by_key(|info| info.id);
    }
    Ok(infos)
}

enum ListPhase {
    Start,
    Listing(WorkHandle<Result<Vec<SlotInfo>, StoreError>>),
    Done,
}

/// Lists slot infos on the worker pool.
pub(crate) struct ListInfosOp {
    sort_by_recent: bool,
    phase: ListPhase,
}

impl ListInfosOp {
    pub fn new(sort_by_recent: bool) -> Self {
        Self {
            sort_by_recent,
            phase: ListPhase::Start,
        }
    }

    pub fn step(&mut self, cancel: &CancelToken, cx: &mut TaskContext<'_>) -> Step {
        match std::mem::replace(&mut self.phase, ListPhase::Done) {
            ListPhase::Start => {
                let store = cx.store.clone();
                // Validate against the preset active when the listing was requested.
                let preset = cx.preset.clone();
                let sort_by_recent = self.sort_by_recent;
                let handle = cx.pool.submit(cancel.clone(), move |_| {
                    list_slot_infos(store.as_ref(), &preset, sort_by_recent)
                });
                self.phase = ListPhase::Listing(handle);
                Step::Continue
            }
            ListPhase::Listing(mut handle) => match handle.try_take() {
                None => {
                    self.phase = ListPhase::Listing(handle);
                    Step::Continue
                }
                Some(Ok(Ok(infos))) => {
                    Step::Finished(TaskOutcome::Succeeded, TaskPayload::Infos(infos))
                }
                Some(Ok(Err(error))) => Step::Finished(
                    TaskOutcome::Failed(error.into()),
                    TaskPayload::Infos(Vec::new()),
                ),
                Some(Err(WorkError::Cancelled)) => {
                    Step::Finished(TaskOutcome::Cancelled, TaskPayload::Infos(Vec::new()))
                }
                Some(Err(error)) => Step::Finished(
                    TaskOutcome::Failed(SaveError::from(error)),
                    TaskPayload::Infos(Vec::new()),
                ),
            },
            ListPhase::Done => Step::Continue,
        }
    }
}
