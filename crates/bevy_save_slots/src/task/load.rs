use std::time::Instant;

use bevy::prelude::*;

use crate::{
    CancelToken, RegionRequest, SaveError, SlotData, SlotId, SlotInfo, StoreError, WorkError,
    WorkHandle,
    task::{Step, TaskContext, TaskId, TaskOutcome, TaskPayload},
};

type ReadResult = Result<(SlotInfo, SlotData), StoreError>;

enum LoadPhase {
    Read,
    Reading(WorkHandle<ReadResult>),
    AwaitRegions { info: SlotInfo, deadline: Instant },
    Done,
}

/// Loads a slot and applies it to the application.
///
/// Reading and decoding run on the worker pool. The current slot is swapped
/// as soon as decoding succeeds, then the task waits for every region that
/// was resident at save time to be deserialized.
pub(crate) struct LoadOp {
    slot: SlotId,
    phase: LoadPhase,
}

impl LoadOp {
    pub fn new(slot: SlotId) -> Self {
        Self {
            slot,
            phase: LoadPhase::Read,
        }
    }

    pub fn step(&mut self, task: TaskId, cancel: &CancelToken, cx: &mut TaskContext<'_>) -> Step {
        match std::mem::replace(&mut self.phase, LoadPhase::Done) {
            LoadPhase::Read => {
                let store = cx.store.clone();
                let slot = self.slot;
                let handle = cx.pool.submit(cancel.clone(), move |_| -> ReadResult {
                    let info = store.read_info(slot)?;
                    let data = store.read_data(slot)?;
                    Ok((info, data))
                });
                self.phase = LoadPhase::Reading(handle);
                Step::Continue
            }
            LoadPhase::Reading(mut handle) => match handle.try_take() {
                None => {
                    self.phase = LoadPhase::Reading(handle);
                    Step::Continue
                }
                Some(Ok(Ok((info, data)))) => self.apply(task, info, data, cx),
                Some(Ok(Err(error))) => {
                    warn!("Failed to read slot {}: {}", self.slot, error);
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
            LoadPhase::AwaitRegions { info, deadline } => {
                if cx.regions.is_settled(task) {
                    return Step::Finished(TaskOutcome::Succeeded, TaskPayload::Slot(info));
                }
                if cx.now >= deadline {
                    let pending = cx.regions.pending_regions(task);
                    return Step::Finished(
                        TaskOutcome::Failed(SaveError::RegionTimeout(pending)),
                        TaskPayload::None,
                    );
                }
                self.phase = LoadPhase::AwaitRegions { info, deadline };
                Step::Continue
            }
            LoadPhase::Done => Step::Continue,
        }
    }

    fn apply(
        &mut self,
        task: TaskId,
        info: SlotInfo,
        data: SlotData,
        cx: &mut TaskContext<'_>,
    ) -> Step {
        let payload_info = info.clone();
        cx.replace_current(info, data);
        let Some(current) = cx.current.as_ref() else {
            return Step::Finished(
                TaskOutcome::Failed(SaveError::NoCurrentSlot),
                TaskPayload::None,
            );
        };

        cx.hooks.restore(&current.info, &current.data);

        let mut pending = 0;
        for region in &current.data.resident_regions {
            let request = cx
                .regions
                .request_deserialize(region, task, &current.data, cx.hooks);
            if request == RegionRequest::Pending {
                pending += 1;
            }
        }
        debug!(
            "Task {} applied slot {}, waiting on {} regions",
            task, self.slot, pending
        );

        self.phase = LoadPhase::AwaitRegions {
            info: payload_info,
            deadline: cx.now + cx.preset.region_load_timeout,
        };
        Step::Continue
    }
}
