#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bevy::prelude::*;
use bevy_save_slots::{
    MemorySlotStore, RegionId, SaveListener, SaveManager, SavePreset, SlotData, SlotId, SlotInfo,
    SlotStore, StoreError, TaskReport, Thumbnail, ThumbnailSize, WorldHooks,
};

pub fn wait_for<F>(app: &mut App, condition: F, max_iterations: usize) -> bool
where
    F: Fn(&App) -> bool,
{
    // Check condition before first update
    if condition(app) {
        return true;
    }

    for _ in 0..max_iterations {
        app.update();
        if condition(app) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    false
}

/// Advances the manager until no task is left.
pub fn run_until_idle(manager: &mut SaveManager, max_iterations: usize) -> bool {
    for _ in 0..max_iterations {
        if !manager.has_tasks() {
            return true;
        }
        manager.advance();
        std::thread::sleep(Duration::from_millis(1));
    }
    !manager.has_tasks()
}

pub fn memory_manager(max_slots: u32) -> (SaveManager, Arc<MemorySlotStore>) {
    let store = Arc::new(MemorySlotStore::new());
    let manager = SaveManager::new(SavePreset::with_max_slots(max_slots), store.clone());
    (manager, store)
}

/// Shared, ordered record of hook, listener and callback calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Application state the hooks save and restore.
#[derive(Debug, Default)]
pub struct FakeWorld {
    pub bytes: Vec<u8>,
    pub regions: BTreeMap<RegionId, Vec<u8>>,
}

/// Hooks that move [`FakeWorld`] in and out of slots and log every call.
pub struct RecordingHooks {
    pub world: Arc<Mutex<FakeWorld>>,
    pub log: CallLog,
}

impl RecordingHooks {
    pub fn new(log: CallLog) -> (Self, Arc<Mutex<FakeWorld>>) {
        let world = Arc::new(Mutex::new(FakeWorld::default()));
        (
            Self {
                world: world.clone(),
                log,
            },
            world,
        )
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl WorldHooks for RecordingHooks {
    fn capture(&mut self, info: &mut SlotInfo, data: &mut SlotData) {
        self.record(format!("capture {}", info.id));
        data.world = self.world.lock().unwrap().bytes.clone();
    }

    fn restore(&mut self, info: &SlotInfo, data: &SlotData) {
        self.record(format!("restore {}", info.id));
        self.world.lock().unwrap().bytes = data.world.clone();
    }

    fn serialize_region(&mut self, region: &RegionId, data: &mut SlotData) {
        self.record(format!("serialize {region}"));
        let state = self
            .world
            .lock()
            .unwrap()
            .regions
            .get(region)
            .cloned()
            .unwrap_or_default();
        data.regions.insert(region.clone(), state);
    }

    fn deserialize_region(&mut self, region: &RegionId, data: &SlotData) {
        self.record(format!("deserialize {region}"));
        if let Some(state) = data.regions.get(region) {
            self.world
                .lock()
                .unwrap()
                .regions
                .insert(region.clone(), state.clone());
        }
    }

    fn capture_thumbnail(&mut self, size: ThumbnailSize) -> Option<Thumbnail> {
        self.record(format!("thumbnail {}x{}", size.width, size.height));
        Some(Thumbnail {
            width: size.width,
            height: size.height,
            rgba: vec![0; (size.width * size.height * 4) as usize],
        })
    }
}

/// Listener that appends every notification to a [`CallLog`].
pub struct RecordingListener {
    pub name: &'static str,
    pub log: CallLog,
}

impl RecordingListener {
    pub fn new(name: &'static str, log: CallLog) -> Arc<Self> {
        Arc::new(Self { name, log })
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(format!("{}: {}", self.name, entry));
    }
}

impl SaveListener for RecordingListener {
    fn on_save_began(&self, slot: SlotId) {
        self.record(format!("save_began {slot}"));
    }

    fn on_save_finished(&self, slot: SlotId, success: bool) {
        self.record(format!("save_finished {slot} {success}"));
    }

    fn on_load_began(&self, slot: SlotId) {
        self.record(format!("load_began {slot}"));
    }

    fn on_load_finished(&self, slot: SlotId, success: bool) {
        self.record(format!("load_finished {slot} {success}"));
    }
}

/// Collects the reports handed to completion callbacks.
#[derive(Clone, Default)]
pub struct Reports(Arc<Mutex<Vec<TaskReport>>>);

impl Reports {
    pub fn callback(&self) -> impl FnOnce(&TaskReport) + Send + Sync + 'static {
        let reports = self.0.clone();
        move |report: &TaskReport| reports.lock().unwrap().push(report.clone())
    }

    pub fn logged(&self, log: &CallLog) -> impl FnOnce(&TaskReport) + Send + Sync + 'static {
        let reports = self.0.clone();
        let log = log.clone();
        move |report: &TaskReport| {
            log.lock()
                .unwrap()
                .push(format!("callback {}", report.outcome.is_success()));
            reports.lock().unwrap().push(report.clone());
        }
    }

    pub fn all(&self) -> Vec<TaskReport> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// Store that delegates to memory but fails selected operations.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemorySlotStore,
    pub fail_writes: AtomicBool,
    pub fail_enumerate: AtomicBool,
    pub fail_deletes: Mutex<BTreeSet<SlotId>>,
    pub corrupt_data: Mutex<BTreeSet<SlotId>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, slot: SlotId) {
        self.inner
            .write(slot, &SlotInfo::new(slot), &SlotData::default())
            .unwrap();
    }
}

impl SlotStore for FlakyStore {
    fn exists(&self, slot: SlotId) -> bool {
        self.inner.exists(slot)
    }

    fn read_info(&self, slot: SlotId) -> Result<SlotInfo, StoreError> {
        self.inner.read_info(slot)
    }

    fn read_data(&self, slot: SlotId) -> Result<SlotData, StoreError> {
        if self.corrupt_data.lock().unwrap().contains(&slot) {
            return Err(StoreError::Decode {
                slot,
                reason: "corrupt".to_string(),
            });
        }
        self.inner.read_data(slot)
    }

    fn write(&self, slot: SlotId, info: &SlotInfo, data: &SlotData) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: format!("{slot}").into(),
                reason: "disk full".to_string(),
            });
        }
        self.inner.write(slot, info, data)
    }

    fn delete(&self, slot: SlotId) -> Result<(), StoreError> {
        if self.fail_deletes.lock().unwrap().contains(&slot) {
            return Err(StoreError::Io {
                path: format!("{slot}").into(),
                reason: "permission denied".to_string(),
            });
        }
        self.inner.delete(slot)
    }

    fn enumerate_ids(&self) -> Result<BTreeSet<SlotId>, StoreError> {
        if self.fail_enumerate.load(Ordering::SeqCst) {
            return Err(StoreError::Io {
                path: "saves".into(),
                reason: "directory unreadable".to_string(),
            });
        }
        self.inner.enumerate_ids()
    }
}
