use bevy::prelude::*;

use crate::{
    CancelToken, SaveError, SlotId, SlotStore, StoreError, WorkError, WorkHandle,
    task::{DeleteSummary, Step, TaskContext, TaskOutcome, TaskPayload},
};

/// Deletes every slot found in `store`, continuing past individual failures.
///
/// Stops early, without error, once `cancel` is set.
pub(crate) fn delete_all_slots(
    store: &dyn SlotStore,
    cancel: &CancelToken,
) -> Result<DeleteSummary, StoreError> {
    let ids = store.enumerate_ids()?;
    let mut summary = DeleteSummary::default();
    for id in ids {
        if cancel.is_cancelled() {
            debug!("Bulk delete cancelled after {} slots", summary.removed.len());
            break;
        }
        match store.delete(id) {
            Ok(()) => summary.removed.push(id),
            Err(error) => {
                error!("Failed to delete slot {}: {}", id, error);
                summary.failed.push((id, error.to_string()));
            }
        }
    }
    Ok(summary)
}

fn worker_failure(error: WorkError, payload: TaskPayload) -> Step {
    match error {
        WorkError::Cancelled => Step::Finished(TaskOutcome::Cancelled, payload),
        other => Step::Finished(TaskOutcome::Failed(SaveError::from(other)), payload),
    }
}

enum DeleteOnePhase {
    Start,
    Deleting(WorkHandle<Result<(), StoreError>>),
    Done,
}

/// Deletes one slot on the worker pool.
pub(crate) struct DeleteOneOp {
    slot: SlotId,
    phase: DeleteOnePhase,
}

impl DeleteOneOp {
    pub fn new(slot: SlotId) -> Self {
        Self {
            slot,
            phase: DeleteOnePhase::Start,
        }
    }

    pub fn step(&mut self, cancel: &CancelToken, cx: &mut TaskContext<'_>) -> Step {
        match std::mem::replace(&mut self.phase, DeleteOnePhase::Done) {
            DeleteOnePhase::Start => {
                let store = cx.store.clone();
                let slot = self.slot;
                let handle = cx.pool.submit(cancel.clone(), move |_| store.delete(slot));
                self.phase = DeleteOnePhase::Deleting(handle);
                Step::Continue
            }
            DeleteOnePhase::Deleting(mut handle) => match handle.try_take() {
                None => {
                    self.phase = DeleteOnePhase::Deleting(handle);
                    Step::Continue
                }
                Some(Ok(Ok(()))) => {
                    cx.clear_current_if(self.slot);
                    Step::Finished(
                        TaskOutcome::Succeeded,
                        TaskPayload::Deleted(DeleteSummary {
                            removed: vec![self.slot],
                            failed: Vec::new(),
                        }),
                    )
                }
                Some(Ok(Err(error))) => Step::Finished(
                    TaskOutcome::Failed(error.clone().into()),
                    TaskPayload::Deleted(DeleteSummary {
                        removed: Vec::new(),
                        failed: vec![(self.slot, error.to_string())],
                    }),
                ),
                Some(Err(error)) => worker_failure(error, TaskPayload::None),
            },
            DeleteOnePhase::Done => Step::Continue,
        }
    }
}

enum DeleteAllPhase {
    Start,
    Deleting(WorkHandle<Result<DeleteSummary, StoreError>>),
    Done,
}

/// Deletes every slot in storage on the worker pool, loaded or not.
pub(crate) struct DeleteAllOp {
    phase: DeleteAllPhase,
}

impl DeleteAllOp {
    pub fn new() -> Self {
        Self {
            phase: DeleteAllPhase::Start,
        }
    }

    pub fn step(&mut self, cancel: &CancelToken, cx: &mut TaskContext<'_>) -> Step {
        match std::mem::replace(&mut self.phase, DeleteAllPhase::Done) {
            DeleteAllPhase::Start => {
                let store = cx.store.clone();
                let handle = cx.pool.submit(cancel.clone(), move |token| {
                    delete_all_slots(store.as_ref(), token)
                });
                self.phase = DeleteAllPhase::Deleting(handle);
                Step::Continue
            }
            DeleteAllPhase::Deleting(mut handle) => match handle.try_take() {
                None => {
                    self.phase = DeleteAllPhase::Deleting(handle);
                    Step::Continue
                }
                Some(Ok(Ok(summary))) => {
                    for slot in &summary.removed {
                        cx.clear_current_if(*slot);
                    }
                    let outcome = if summary.failed.is_empty() {
                        TaskOutcome::Succeeded
                    } else {
                        TaskOutcome::Failed(SaveError::PartialFailure {
                            removed: summary.removed.clone(),
                            failed: summary.failed.clone(),
                        })
                    };
                    Step::Finished(outcome, TaskPayload::Deleted(summary))
                }
                Some(Ok(Err(error))) => Step::Finished(
                    TaskOutcome::Failed(error.into()),
                    TaskPayload::Deleted(DeleteSummary::default()),
                ),
                Some(Err(error)) => {
                    worker_failure(error, TaskPayload::Deleted(DeleteSummary::default()))
                }
            },
            DeleteAllPhase::Done => Step::Continue,
        }
    }
}
