mod delete;
mod listing;
mod load;
mod save;

use core::fmt;
use std::{sync::Arc, time::Instant};

use bevy::prelude::*;

use crate::{
    CancelToken, CurrentSlot, RegionSync, SaveError, SavePreset, SlotData, SlotId, SlotInfo,
    SlotStore, WorkerPool, WorldHooks, events::Fanout,
};

pub(crate) use delete::{DeleteAllOp, DeleteOneOp};
pub use listing::list_slot_infos;
pub(crate) use listing::ListInfosOp;
pub(crate) use load::LoadOp;
pub(crate) use save::SaveOp;

/// Identifier of a task, unique within one [`SaveManager`](crate::SaveManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Writes the application state into a slot.
    Save,
    /// Reads a slot and makes it current.
    Load,
    /// Lists the infos of stored slots.
    ListInfos,
    /// Removes one slot.
    DeleteOne,
    /// Removes every stored slot.
    DeleteAll,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Accepted but not stepped yet.
    Created,
    /// Announced and stepping.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Stopped before it could finish.
    Cancelled,
}

impl TaskState {
    /// Returns true for states a task never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task did what it was asked to.
    Succeeded,
    /// The task stopped on an error.
    Failed(SaveError),
    /// The manager shut down while the task was running.
    Cancelled,
}

impl TaskOutcome {
    /// Returns true for [`TaskOutcome::Succeeded`].
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }

    /// Converts the outcome into a `Result`, cancellation becoming
    /// [`SaveError::Cancelled`].
    pub fn into_result(self) -> Result<(), SaveError> {
        match self {
            TaskOutcome::Succeeded => Ok(()),
            TaskOutcome::Failed(error) => Err(error),
            TaskOutcome::Cancelled => Err(SaveError::Cancelled),
        }
    }

    fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Succeeded => TaskState::Succeeded,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

/// Slots removed and slots that could not be removed by a delete task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Slots that are gone from storage.
    pub removed: Vec<SlotId>,
    /// Slots that are still stored, with the reason.
    pub failed: Vec<(SlotId, String)>,
}

/// Data produced by a finished task.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TaskPayload {
    /// Nothing to hand back.
    #[default]
    None,
    /// Info of the slot that was saved or loaded.
    Slot(SlotInfo),
    /// Slot listing.
    Infos(Vec<SlotInfo>),
    /// Result of a delete.
    Deleted(DeleteSummary),
}

/// Everything known about a task once it has finished.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Id returned when the request was accepted.
    pub task: TaskId,
    /// What the task did.
    pub kind: TaskKind,
    /// Target slot, `None` for listings and bulk deletes.
    pub slot: Option<SlotId>,
    /// How the task ended.
    pub outcome: TaskOutcome,
    /// Data the task produced.
    pub payload: TaskPayload,
}

impl TaskReport {
    /// Listed infos, empty unless this is a successful listing.
    pub fn infos(&self) -> &[SlotInfo] {
        match &self.payload {
            TaskPayload::Infos(infos) => infos,
            _ => &[],
        }
    }

    /// Delete summary, if this task deleted slots.
    pub fn deleted(&self) -> Option<&DeleteSummary> {
        match &self.payload {
            TaskPayload::Deleted(summary) => Some(summary),
            _ => None,
        }
    }
}

/// One-shot completion callback of a task.
pub type OnTaskDone = Box<dyn FnOnce(&TaskReport) + Send + Sync>;

/// What a task may touch while it steps. Borrowed from the manager for the
/// duration of one step.
pub(crate) struct TaskContext<'a> {
    pub store: &'a Arc<dyn SlotStore>,
    pub pool: &'a mut WorkerPool,
    pub regions: &'a mut RegionSync,
    pub hooks: &'a mut dyn WorldHooks,
    pub current: &'a mut Option<CurrentSlot>,
    pub preset: &'a SavePreset,
    pub now: Instant,
}

impl TaskContext<'_> {
    /// Installs a new current slot, replacing info and data together.
    pub fn replace_current(&mut self, info: SlotInfo, data: SlotData) {
        *self.current = Some(CurrentSlot::persisted(info, data));
    }

    /// Forgets the current slot if it is `slot`.
    pub fn clear_current_if(&mut self, slot: SlotId) {
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.persisted && current.info.id == slot)
        {
            debug!("Cleared current slot {}", slot);
            *self.current = None;
        }
    }
}

/// Result of advancing an operation by one step.
pub(crate) enum Step {
    Continue,
    Finished(TaskOutcome, TaskPayload),
}

pub(crate) enum TaskOp {
    Save(SaveOp),
    Load(LoadOp),
    ListInfos(ListInfosOp),
    DeleteOne(DeleteOneOp),
    DeleteAll(DeleteAllOp),
}

impl TaskOp {
    fn kind(&self) -> TaskKind {
        match self {
            TaskOp::Save(_) => TaskKind::Save,
            TaskOp::Load(_) => TaskKind::Load,
            TaskOp::ListInfos(_) => TaskKind::ListInfos,
            TaskOp::DeleteOne(_) => TaskKind::DeleteOne,
            TaskOp::DeleteAll(_) => TaskKind::DeleteAll,
        }
    }
}

/// One in-flight save, load, listing or delete.
pub(crate) struct SlotTask {
    id: TaskId,
    slot: Option<SlotId>,
    exclusive: bool,
    state: TaskState,
    op: TaskOp,
    cancel: CancelToken,
    on_done: Option<OnTaskDone>,
    finished: Option<(TaskOutcome, TaskPayload)>,
}

impl SlotTask {
    pub fn new(
        id: TaskId,
        slot: Option<SlotId>,
        exclusive: bool,
        op: TaskOp,
        on_done: Option<OnTaskDone>,
    ) -> Self {
        Self {
            id,
            slot,
            exclusive,
            state: TaskState::Created,
            op,
            cancel: CancelToken::new(),
            on_done,
            finished: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.op.kind()
    }

    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves a created task to running and announces it.
    pub fn start(&mut self, fanout: &mut Fanout) {
        if self.state != TaskState::Created {
            return;
        }
        self.state = TaskState::Running;
        debug!("Task {} ({:?}) started", self.id, self.kind());
        fanout.began(self.id, self.kind(), self.slot);
    }

    /// Advances a running task by one step.
    pub fn step(&mut self, cx: &mut TaskContext<'_>) {
        if self.state != TaskState::Running {
            return;
        }

        if self.cancel.is_cancelled() {
            self.finish(TaskOutcome::Cancelled, TaskPayload::None);
            return;
        }

        let id = self.id;
        let cancel = &self.cancel;
        let step = match &mut self.op {
            TaskOp::Save(op) => op.step(id, cancel, cx),
            TaskOp::Load(op) => op.step(id, cancel, cx),
            TaskOp::ListInfos(op) => op.step(cancel, cx),
            TaskOp::DeleteOne(op) => op.step(cancel, cx),
            TaskOp::DeleteAll(op) => op.step(cancel, cx),
        };
        if let Step::Finished(outcome, payload) = step {
            self.finish(outcome, payload);
        }
    }

    /// Requests cancellation. Background work stops at its next safe point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves a task that is still running to [`TaskOutcome::Cancelled`].
    pub fn abandon(&mut self) {
        if !self.is_terminal() {
            self.finish(TaskOutcome::Cancelled, TaskPayload::None);
        }
    }

    /// Builds the final report and hands out the completion callback.
    pub fn into_report(mut self) -> (TaskReport, Option<OnTaskDone>) {
        let (outcome, payload) = self
            .finished
            .take()
            .unwrap_or((TaskOutcome::Cancelled, TaskPayload::None));
        let report = TaskReport {
            task: self.id,
            kind: self.op.kind(),
            slot: self.slot,
            outcome,
            payload,
        };
        (report, self.on_done.take())
    }

    fn finish(&mut self, outcome: TaskOutcome, payload: TaskPayload) {
        self.state = outcome.state();
        match &outcome {
            TaskOutcome::Succeeded => info!("Task {} ({:?}) succeeded", self.id, self.kind()),
            TaskOutcome::Failed(error) => {
                warn!("Task {} ({:?}) failed: {}", self.id, self.kind(), error);
            }
            TaskOutcome::Cancelled => info!("Task {} ({:?}) cancelled", self.id, self.kind()),
        }
        self.finished = Some((outcome, payload));
    }
}
