use std::sync::{Arc, Weak};

use bevy::{
    ecs::event::{BufferedEvent, Event},
    prelude::*,
};

use crate::{RegionId, SlotId, TaskId, TaskKind, TaskReport};

/// Receives save and load notifications from the [`SaveManager`](crate::SaveManager).
///
/// The manager only keeps weak references to listeners, so dropping the last
/// `Arc` unsubscribes implicitly.
pub trait SaveListener: Send + Sync {
    /// A save into `slot` was accepted.
    fn on_save_began(&self, _slot: SlotId) {}
    /// A save into `slot` ended, before its completion callback runs.
    fn on_save_finished(&self, _slot: SlotId, _success: bool) {}
    /// A load of `slot` was accepted.
    fn on_load_began(&self, _slot: SlotId) {}
    /// A load of `slot` ended, before its completion callback runs.
    fn on_load_finished(&self, _slot: SlotId, _success: bool) {}
}

/// Ordered set of weakly held listeners.
#[derive(Default)]
pub struct Subscribers {
    listeners: Vec<Weak<dyn SaveListener>>,
}

impl Subscribers {
    /// Adds a listener. Returns false if it was already subscribed.
    pub fn subscribe<L: SaveListener + 'static>(&mut self, listener: &Arc<L>) -> bool {
        let weak: Weak<dyn SaveListener> = Arc::<L>::downgrade(listener);
        self.prune();
        if self.listeners.iter().any(|known| Weak::ptr_eq(known, &weak)) {
            return false;
        }
        self.listeners.push(weak);
        true
    }

    /// Removes a listener. Returns false if it was not subscribed.
    pub fn unsubscribe<L: SaveListener + 'static>(&mut self, listener: &Arc<L>) -> bool {
        let weak: Weak<dyn SaveListener> = Arc::<L>::downgrade(listener);
        let before = self.listeners.len();
        self.listeners.retain(|known| !Weak::ptr_eq(known, &weak));
        self.listeners.len() != before
    }

    /// Number of listeners that are still alive.
    pub fn len(&self) -> usize {
        self.listeners
            .iter()
            .filter(|listener| listener.strong_count() > 0)
            .count()
    }

    /// Returns true if no live listener is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `f` on every live listener in subscription order.
    pub fn for_each(&self, mut f: impl FnMut(&dyn SaveListener)) {
        for listener in &self.listeners {
            if let Some(listener) = listener.upgrade() {
                f(listener.as_ref());
            }
        }
    }

    fn prune(&mut self) {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.strong_count() > 0);
        if self.listeners.len() != before {
            debug!(
                "Dropped {} dead save listeners",
                before - self.listeners.len()
            );
        }
    }
}

/// Notification queued for the Bevy event systems.
#[derive(Debug, Clone)]
pub enum SaveLifecycle {
    /// See [`SaveStarted`].
    SaveStarted(SaveStarted),
    /// See [`SaveFinished`].
    SaveFinished(SaveFinished),
    /// See [`LoadStarted`].
    LoadStarted(LoadStarted),
    /// See [`LoadFinished`].
    LoadFinished(LoadFinished),
    /// See [`SlotTaskCompleted`].
    Completed(SlotTaskCompleted),
}

/// Broadcasts task lifecycle points to listeners and, when enabled, to the
/// queue read by the Bevy event systems.
#[derive(Default)]
pub(crate) struct Fanout {
    pub(crate) subscribers: Subscribers,
    /// The outbox only fills while this is set. Whoever sets it drains it.
    pub(crate) queue_lifecycle: bool,
    outbox: Vec<SaveLifecycle>,
}

impl Fanout {
    fn queue(&mut self, entry: SaveLifecycle) {
        if self.queue_lifecycle {
            self.outbox.push(entry);
        }
    }

    pub(crate) fn began(&mut self, task_id: TaskId, kind: TaskKind, slot: Option<SlotId>) {
        let Some(slot) = slot else {
            return;
        };
        match kind {
            TaskKind::Save => {
                self.subscribers.for_each(|l| l.on_save_began(slot));
                self.queue(SaveLifecycle::SaveStarted(SaveStarted { task_id, slot }));
            }
            TaskKind::Load => {
                self.subscribers.for_each(|l| l.on_load_began(slot));
                self.queue(SaveLifecycle::LoadStarted(LoadStarted { task_id, slot }));
            }
            _ => {}
        }
    }

    pub(crate) fn finished(&mut self, report: &TaskReport) {
        let success = report.outcome.is_success();
        match (report.kind, report.slot) {
            (TaskKind::Save, Some(slot)) => {
                self.subscribers
                    .for_each(|l| l.on_save_finished(slot, success));
                self.queue(SaveLifecycle::SaveFinished(SaveFinished {
                    task_id: report.task,
                    slot,
                    success,
                }));
            }
            (TaskKind::Load, Some(slot)) => {
                self.subscribers
                    .for_each(|l| l.on_load_finished(slot, success));
                self.queue(SaveLifecycle::LoadFinished(LoadFinished {
                    task_id: report.task,
                    slot,
                    success,
                }));
            }
            _ => {}
        }
        if self.queue_lifecycle {
            self.outbox.push(SaveLifecycle::Completed(SlotTaskCompleted {
                report: report.clone(),
            }));
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<SaveLifecycle> {
        std::mem::take(&mut self.outbox)
    }
}

/// Event emitted when a save task starts running.
#[derive(Event, BufferedEvent, Debug, Clone)]
pub struct SaveStarted {
    /// Task that performs the save.
    pub task_id: TaskId,
    /// Slot being written.
    pub slot: SlotId,
}

/// Event emitted when a save task reaches a terminal state.
#[derive(Event, BufferedEvent, Debug, Clone)]
pub struct SaveFinished {
    /// Task that performed the save.
    pub task_id: TaskId,
    /// Slot that was written.
    pub slot: SlotId,
    /// Whether the slot is now stored and current.
    pub success: bool,
}

/// Event emitted when a load task starts running.
#[derive(Event, BufferedEvent, Debug, Clone)]
pub struct LoadStarted {
    /// Task that performs the load.
    pub task_id: TaskId,
    /// Slot being read.
    pub slot: SlotId,
}

/// Event emitted when a load task reaches a terminal state.
#[derive(Event, BufferedEvent, Debug, Clone)]
pub struct LoadFinished {
    /// Task that performed the load.
    pub task_id: TaskId,
    /// Slot that was read.
    pub slot: SlotId,
    /// Whether the slot was applied and its regions streamed in.
    pub success: bool,
}

/// Event emitted for every finished task, whatever its kind.
#[derive(Event, BufferedEvent, Debug, Clone)]
pub struct SlotTaskCompleted {
    /// Report also handed to the task's completion callback.
    pub report: TaskReport,
}

/// Sent by the streaming subsystem when region residency changes.
///
/// Loads and unloads share one event type so that they reach the save
/// manager in the order they were written.
#[derive(Event, BufferedEvent, Debug, Clone, PartialEq, Eq)]
pub enum RegionEvent {
    /// The region finished loading.
    Loaded(RegionId),
    /// The region is about to unload.
    WillUnload(RegionId),
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct CountingListener {
        calls: Mutex<Vec<String>>,
    }

    impl SaveListener for CountingListener {
        fn on_save_began(&self, slot: SlotId) {
            self.calls.lock().unwrap().push(format!("save_began {slot}"));
        }
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut subscribers = Subscribers::default();
        let listener = Arc::new(CountingListener::default());

        assert!(subscribers.subscribe(&listener));
        assert!(!subscribers.subscribe(&listener));
        assert_eq!(subscribers.len(), 1);

        assert!(subscribers.unsubscribe(&listener));
        assert!(!subscribers.unsubscribe(&listener));
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_dead_listeners_are_skipped() {
        let mut subscribers = Subscribers::default();
        let alive = Arc::new(CountingListener::default());
        let dead = Arc::new(CountingListener::default());
        subscribers.subscribe(&dead);
        subscribers.subscribe(&alive);
        drop(dead);

        let mut fanout = Fanout {
            subscribers,
            ..Default::default()
        };
        fanout.began(TaskId(0), TaskKind::Save, Some(2));

        assert_eq!(*alive.calls.lock().unwrap(), vec!["save_began 2"]);
        assert_eq!(fanout.subscribers.len(), 1);
    }

    #[test]
    fn test_began_only_for_save_and_load() {
        let mut fanout = Fanout {
            queue_lifecycle: true,
            ..Default::default()
        };
        fanout.began(TaskId(0), TaskKind::DeleteAll, None);
        fanout.began(TaskId(1), TaskKind::ListInfos, None);
        assert!(fanout.drain().is_empty());

        fanout.began(TaskId(2), TaskKind::Load, Some(1));
        let drained = fanout.drain();
        assert!(matches!(
            drained.as_slice(),
            [SaveLifecycle::LoadStarted(LoadStarted { slot: 1, .. })]
        ));
    }

    #[test]
    fn test_queue_stays_empty_when_disabled() {
        let mut fanout = Fanout::default();
        let report = TaskReport {
            task: TaskId(0),
            kind: TaskKind::Save,
            slot: Some(3),
            outcome: crate::TaskOutcome::Succeeded,
            payload: crate::TaskPayload::None,
        };
        for _ in 0..100 {
            fanout.began(TaskId(0), TaskKind::Save, Some(3));
            fanout.finished(&report);
        }
        assert!(fanout.outbox.is_empty());
    }
}
