use std::{sync::Arc, time::Instant};

use bevy::prelude::*;

use crate::{
    CurrentSlot, NoopWorldHooks, RegionId, RegionSync, SaveError, SaveListener, SavePreset,
    SlotData, SlotId, SlotInfo, SlotStore, ThumbnailSize, WorkerPool, WorldHooks,
    events::{Fanout, SaveLifecycle},
    task::{
        DeleteAllOp, DeleteOneOp, ListInfosOp, LoadOp, OnTaskDone, SaveOp, SlotTask, TaskContext,
        TaskId, TaskKind, TaskOp, TaskOutcome, TaskPayload, TaskReport, list_slot_infos,
    },
};

/// Controls the complete saving and loading process.
///
/// Owns the current slot and every active task. Requests are validated
/// synchronously; an `Err` means no task was created and no callback will
/// ever run. Accepted tasks make progress only when [`advance`](Self::advance)
/// is called, once per frame.
#[derive(Resource)]
pub struct SaveManager {
    preset: SavePreset,
    store: Arc<dyn SlotStore>,
    hooks: Box<dyn WorldHooks>,
    pool: WorkerPool,
    regions: RegionSync,
    fanout: Fanout,
    current: Option<CurrentSlot>,
    tasks: Vec<SlotTask>,
    next_task_id: u64,
}

impl SaveManager {
    /// Creates a manager that persists slots into `store`.
    pub fn new(preset: SavePreset, store: Arc<dyn SlotStore>) -> Self {
        Self {
            preset,
            store,
            hooks: Box::new(NoopWorldHooks),
            pool: WorkerPool::new(),
            regions: RegionSync::new(),
            fanout: Fanout::default(),
            current: None,
            tasks: Vec::new(),
            next_task_id: 0,
        }
    }

    /// Sets the hooks used to capture and restore application state.
    pub fn with_world_hooks(mut self, hooks: impl WorldHooks) -> Self {
        self.hooks = Box::new(hooks);
        self
    }

    /// Queues lifecycle notifications for [`drain_lifecycle`](Self::drain_lifecycle).
    ///
    /// Off by default, since nothing would empty the queue. The caller must
    /// drain it regularly once enabled. [`SaveSlotsPlugin`](crate::SaveSlotsPlugin)
    /// enables it and drains it every frame.
    pub fn with_lifecycle_events(mut self) -> Self {
        self.fanout.queue_lifecycle = true;
        self
    }

    /// Replaces the world hooks. Rejected while any task is active.
    pub fn set_world_hooks(&mut self, hooks: impl WorldHooks) -> Result<(), SaveError> {
        if self.has_tasks() {
            return Err(SaveError::Busy);
        }
        self.hooks = Box::new(hooks);
        Ok(())
    }

    /// Preset currently used for validation.
    pub fn preset(&self) -> &SavePreset {
        &self.preset
    }

    /// Swaps the active preset. Rejected while any task is active, so that
    /// validation rules never change mid-operation.
    pub fn set_active_preset(&mut self, preset: SavePreset) -> Result<(), SaveError> {
        if self.has_tasks() {
            warn!("Cannot change the save preset while tasks are running");
            return Err(SaveError::Busy);
        }
        self.preset = preset;
        Ok(())
    }

    /// Storage used by this manager.
    pub fn store(&self) -> &Arc<dyn SlotStore> {
        &self.store
    }

    /// Saves the game into `slot`.
    ///
    /// Fails if the slot is invalid, another exclusive task is active, or the
    /// slot already exists and `override_if_needed` is false.
    pub fn request_save(
        &mut self,
        slot: SlotId,
        override_if_needed: bool,
        thumbnail: Option<ThumbnailSize>,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        self.validate_slot(slot)?;
        self.check_exclusive()?;
        if !override_if_needed && self.store.exists(slot) {
            return Err(SaveError::SlotOccupied(slot));
        }
        Ok(self.spawn_task(
            Some(slot),
            true,
            TaskOp::Save(SaveOp::new(slot, thumbnail)),
            Box::new(on_done),
        ))
    }

    /// Saves into the slot that is currently loaded.
    pub fn save_current_slot(
        &mut self,
        thumbnail: Option<ThumbnailSize>,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        let slot = self.current_slot_id().ok_or(SaveError::NoCurrentSlot)?;
        self.request_save(slot, true, thumbnail, on_done)
    }

    /// Loads the game from `slot`.
    pub fn request_load(
        &mut self,
        slot: SlotId,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        self.validate_slot(slot)?;
        self.check_exclusive()?;
        if !self.store.exists(slot) {
            return Err(SaveError::NotFound(slot));
        }
        Ok(self.spawn_task(
            Some(slot),
            true,
            TaskOp::Load(LoadOp::new(slot)),
            Box::new(on_done),
        ))
    }

    /// Loads the current slot again, discarding unsaved changes.
    pub fn reload_current_slot(
        &mut self,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        let slot = self.current_slot_id().ok_or(SaveError::NoCurrentSlot)?;
        self.request_load(slot, on_done)
    }

    /// Lists the infos of every saved slot in the background.
    pub fn request_slot_infos(
        &mut self,
        sort_by_recent: bool,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        self.check_shared()?;
        Ok(self.spawn_task(
            None,
            false,
            TaskOp::ListInfos(ListInfosOp::new(sort_by_recent)),
            Box::new(on_done),
        ))
    }

    /// Lists the infos of every saved slot, blocking until done. `on_done`
    /// runs before this returns.
    pub fn load_slot_infos_sync(
        &mut self,
        sort_by_recent: bool,
        on_done: impl FnOnce(&TaskReport),
    ) -> Result<(), SaveError> {
        self.check_shared()?;
        let task = self.allocate_task_id();
        let (outcome, payload) =
            match list_slot_infos(self.store.as_ref(), &self.preset, sort_by_recent) {
                Ok(infos) => (TaskOutcome::Succeeded, TaskPayload::Infos(infos)),
                Err(error) => (
                    TaskOutcome::Failed(error.into()),
                    TaskPayload::Infos(Vec::new()),
                ),
            };
        on_done(&TaskReport {
            task,
            kind: TaskKind::ListInfos,
            slot: None,
            outcome,
            payload,
        });
        Ok(())
    }

    /// Deletes a slot right away.
    ///
    /// Interacts with storage on the calling thread.
    pub fn delete_slot(&mut self, slot: SlotId) -> Result<(), SaveError> {
        self.validate_slot(slot)?;
        if self.is_current_slot(slot) {
            self.check_exclusive()?;
        } else {
            self.check_shared()?;
            self.check_not_deleting(slot)?;
        }

        self.store.delete(slot)?;
        if self.is_current_slot(slot) {
            self.current = None;
        }
        info!("Deleted slot {}", slot);
        Ok(())
    }

    /// Deletes a slot in the background.
    ///
    /// Deleting the current slot is exclusive; any other slot may be deleted
    /// alongside listings and other deletes.
    pub fn request_delete_slot(
        &mut self,
        slot: SlotId,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        self.validate_slot(slot)?;
        let exclusive = self.is_current_slot(slot);
        if exclusive {
            self.check_exclusive()?;
        } else {
            self.check_shared()?;
            self.check_not_deleting(slot)?;
        }
        if !self.store.exists(slot) {
            return Err(SaveError::NotFound(slot));
        }
        Ok(self.spawn_task(
            Some(slot),
            exclusive,
            TaskOp::DeleteOne(DeleteOneOp::new(slot)),
            Box::new(on_done),
        ))
    }

    /// Deletes every slot in storage, loaded or not.
    pub fn request_delete_all(
        &mut self,
        on_done: impl FnOnce(&TaskReport) + Send + Sync + 'static,
    ) -> Result<TaskId, SaveError> {
        self.check_exclusive()?;
        Ok(self.spawn_task(
            None,
            true,
            TaskOp::DeleteAll(DeleteAllOp::new()),
            Box::new(on_done),
        ))
    }

    /// Reads the info of one slot from storage.
    ///
    /// Interacts with storage on the calling thread.
    pub fn slot_info(&self, slot: SlotId) -> Result<SlotInfo, SaveError> {
        self.validate_slot(slot)?;
        Ok(self.store.read_info(slot)?)
    }

    /// Returns true if `slot` is valid and exists in storage.
    pub fn is_slot_saved(&self, slot: SlotId) -> bool {
        self.is_valid_slot(slot) && self.store.exists(slot)
    }

    /// Checks a slot id against the active preset.
    pub fn is_valid_slot(&self, slot: SlotId) -> bool {
        self.preset.is_valid_slot(slot)
    }

    /// Storage name of a slot, `None` if the id is invalid.
    pub fn slot_name(&self, slot: SlotId) -> Option<String> {
        self.preset.slot_name(slot)
    }

    /// The currently loaded slot info. If nothing was saved or loaded yet, an
    /// empty info is created. It is not persisted.
    pub fn current_info(&mut self) -> &SlotInfo {
        &self.current.get_or_insert_with(CurrentSlot::default).info
    }

    /// The currently loaded slot data, created empty if needed.
    pub fn current_data(&mut self) -> &SlotData {
        &self.current.get_or_insert_with(CurrentSlot::default).data
    }

    /// The current slot, if one exists yet.
    pub fn current_slot(&self) -> Option<&CurrentSlot> {
        self.current.as_ref()
    }

    /// Returns true when playing in a slot that was saved or loaded.
    pub fn is_in_slot(&self) -> bool {
        self.current.as_ref().is_some_and(|current| current.persisted)
    }

    /// Adds a listener for save and load events. Idempotent.
    pub fn subscribe<L: SaveListener + 'static>(&mut self, listener: &Arc<L>) -> bool {
        self.fanout.subscribers.subscribe(listener)
    }

    /// Removes a listener. Idempotent.
    pub fn unsubscribe<L: SaveListener + 'static>(&mut self, listener: &Arc<L>) -> bool {
        self.fanout.subscribers.unsubscribe(listener)
    }

    /// Returns true while any task is active.
    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Returns true when saving or loading anything.
    pub fn is_saving_or_loading(&self) -> bool {
        self.has_tasks()
    }

    /// Returns true while a load is running.
    pub fn is_loading(&self) -> bool {
        self.tasks.iter().any(|task| task.kind() == TaskKind::Load)
    }

    /// Number of active tasks.
    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Regions the streaming subsystem reported as loaded.
    pub fn regions(&self) -> &RegionSync {
        &self.regions
    }

    /// Notifies the manager that a streaming region finished loading.
    pub fn on_region_loaded(&mut self, region: impl Into<RegionId>) {
        let current = self.current.as_ref().map(|current| &current.data);
        self.regions
            .on_region_loaded(region.into(), current, self.hooks.as_mut());
    }

    /// Notifies the manager that a streaming region is about to unload.
    pub fn on_region_will_unload(&mut self, region: impl Into<RegionId>) {
        let current = self.current.as_mut().map(|current| &mut current.data);
        self.regions
            .on_region_will_unload(region.into(), current, self.hooks.as_mut());
    }

    /// Advances every active task by one step, then finalizes the tasks that
    /// finished.
    pub fn advance(&mut self) {
        self.pool.reap();
        if self.tasks.is_empty() {
            return;
        }

        let mut cx = TaskContext {
            store: &self.store,
            pool: &mut self.pool,
            regions: &mut self.regions,
            hooks: self.hooks.as_mut(),
            current: &mut self.current,
            preset: &self.preset,
            now: Instant::now(),
        };
        for task in &mut self.tasks {
            task.step(&mut cx);
        }

        let (finished, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(SlotTask::is_terminal);
        self.tasks = active;
        for task in finished {
            self.finalize(task);
        }
    }

    /// Takes the notifications queued since the last call. Always empty unless
    /// the manager was built with [`with_lifecycle_events`](Self::with_lifecycle_events).
    pub fn drain_lifecycle(&mut self) -> Vec<SaveLifecycle> {
        self.fanout.drain()
    }

    /// Cancels every active task and waits for background work to stop.
    ///
    /// Every task still running is reported as cancelled. Called
    /// automatically when the manager is dropped.
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            self.pool.join_all();
            return;
        }

        info!("Cancelling {} save tasks", self.tasks.len());
        for task in &self.tasks {
            task.cancel();
        }
        self.pool.join_all();

        for mut task in std::mem::take(&mut self.tasks) {
            task.abandon();
            self.finalize(task);
        }
        self.regions.clear_claim();
    }

    fn finalize(&mut self, task: SlotTask) {
        self.regions.release(task.id());
        let (report, on_done) = task.into_report();
        self.fanout.finished(&report);
        if let Some(on_done) = on_done {
            on_done(&report);
        }
    }

    fn spawn_task(
        &mut self,
        slot: Option<SlotId>,
        exclusive: bool,
        op: TaskOp,
        on_done: OnTaskDone,
    ) -> TaskId {
        let id = self.allocate_task_id();
        let mut task = SlotTask::new(id, slot, exclusive, op, Some(on_done));
        info!("Created task {} ({:?}) for slot {:?}", id, task.kind(), slot);
        task.start(&mut self.fanout);
        self.tasks.push(task);
        id
    }

    fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    fn validate_slot(&self, slot: SlotId) -> Result<(), SaveError> {
        if self.is_valid_slot(slot) {
            Ok(())
        } else {
            warn!("Rejected request for invalid slot {}", slot);
            Err(SaveError::InvalidSlot {
                slot,
                max_slots: self.preset.max_slots,
            })
        }
    }

    /// Exclusive tasks run alone.
    fn check_exclusive(&self) -> Result<(), SaveError> {
        if self.has_tasks() {
            warn!("Rejected exclusive request: {} tasks active", self.tasks.len());
            return Err(SaveError::AlreadyInProgress);
        }
        Ok(())
    }

    /// Shared tasks may overlap each other but never an exclusive task.
    fn check_shared(&self) -> Result<(), SaveError> {
        if self.tasks.iter().any(SlotTask::is_exclusive) {
            warn!("Rejected request while an exclusive task is active");
            return Err(SaveError::AlreadyInProgress);
        }
        Ok(())
    }

    fn check_not_deleting(&self, slot: SlotId) -> Result<(), SaveError> {
        let deleting = self
            .tasks
            .iter()
            .any(|task| task.kind() == TaskKind::DeleteOne && task.slot() == Some(slot));
        if deleting {
            return Err(SaveError::AlreadyInProgress);
        }
        Ok(())
    }

    fn current_slot_id(&self) -> Option<SlotId> {
        self.current
            .as_ref()
            .filter(|current| current.persisted)
            .map(|current| current.info.id)
    }

    fn is_current_slot(&self, slot: SlotId) -> bool {
        self.current_slot_id() == Some(slot)
    }
}

impl Drop for SaveManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Mutex,
        time::{Duration, SystemTime},
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::{MemorySlotStore, TaskState};

    fn manager() -> SaveManager {
        SaveManager::new(SavePreset::with_max_slots(5), Arc::new(MemorySlotStore::new()))
    }

    fn run_until_idle(manager: &mut SaveManager) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.has_tasks() {
            assert!(Instant::now() < deadline, "Tasks never finished");
            manager.advance();
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn capture_reports() -> (Arc<Mutex<Vec<TaskReport>>>, impl Fn() -> OnTaskDone) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = reports.clone();
        let make = move || -> OnTaskDone {
            let sink = sink.clone();
            Box::new(move |report: &TaskReport| sink.lock().unwrap().push(report.clone()))
        };
        (reports, make)
    }

    #[test]
    fn test_task_ids_are_unique() {
        let mut manager = manager();
        let first = manager.request_slot_infos(false, |_| {}).unwrap();
        let second = manager.request_slot_infos(true, |_| {}).unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.active_task_count(), 2);
        run_until_idle(&mut manager);
    }

    #[test]
    fn test_new_task_is_running() {
        let mut manager = manager();
        manager.request_save(1, true, None, |_| {}).unwrap();
        assert_eq!(manager.tasks[0].state(), TaskState::Running);
        run_until_idle(&mut manager);
    }

    #[test]
    fn test_save_sets_current_slot() {
        let mut manager = manager();
        let (reports, on_done) = capture_reports();

        manager.request_save(2, true, None, on_done()).unwrap();
        assert!(!manager.is_in_slot());
        run_until_idle(&mut manager);

        assert!(manager.is_in_slot());
        assert!(manager.store().exists(2));
        assert_eq!(manager.current_info().id, 2);
        assert!(manager.current_info().save_date > SystemTime::UNIX_EPOCH);
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TaskOutcome::Succeeded);
    }

    #[test]
    fn test_lazy_current_info_is_not_a_slot() {
        let mut manager = manager();
        assert_eq!(manager.current_info().id, 0);
        assert_eq!(manager.current_data(), &SlotData::default());
        assert!(!manager.is_in_slot());
        assert_eq!(
            manager.save_current_slot(None, |_| {}),
            Err(SaveError::NoCurrentSlot)
        );
        assert_eq!(
            manager.reload_current_slot(|_| {}),
            Err(SaveError::NoCurrentSlot)
        );
    }

    #[test]
    fn test_preset_locked_while_busy() {
        let mut manager = manager();
        manager.request_delete_all(|_| {}).unwrap();
        assert_eq!(
            manager.set_active_preset(SavePreset::with_max_slots(2)),
            Err(SaveError::Busy)
        );
        assert_eq!(manager.set_world_hooks(NoopWorldHooks), Err(SaveError::Busy));
        run_until_idle(&mut manager);

        assert_eq!(manager.preset().max_slots, 5);
        assert!(manager.set_active_preset(SavePreset::with_max_slots(2)).is_ok());
        assert_eq!(manager.preset().max_slots, 2);
        assert!(!manager.is_valid_slot(3));
        assert_eq!(manager.slot_name(3), None);
        assert_eq!(manager.slot_name(1).as_deref(), Some("1"));
    }

    #[test]
    fn test_shutdown_cancels_tasks() {
        let mut manager = manager();
        let (reports, on_done) = capture_reports();
        manager.request_save(0, true, None, on_done()).unwrap();

        manager.shutdown();

        assert!(!manager.has_tasks());
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TaskOutcome::Cancelled);
        // Shutdown twice is harmless.
        drop(reports);
        manager.shutdown();
    }

    #[traced_test]
    #[test]
    fn test_rejections_are_logged() {
        let mut manager = manager();
        assert!(matches!(
            manager.request_load(9, |_| {}),
            Err(SaveError::InvalidSlot { slot: 9, max_slots: 5 })
        ));
        assert!(logs_contain("Rejected request for invalid slot 9"));
    }
}
