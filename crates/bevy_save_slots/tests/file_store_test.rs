mod common;

use std::{fs, sync::Arc};

use bevy_save_slots::{
    FileSlotStore, SaveManager, SavePreset, SlotStore, TaskOutcome, ThumbnailSize,
};
use common::{RecordingHooks, Reports, call_log, run_until_idle};
use tempfile::TempDir;

const MAX_ITERATIONS: usize = 5000;

fn file_manager(temp_dir: &TempDir) -> (SaveManager, Arc<FileSlotStore>) {
    let store = Arc::new(FileSlotStore::new(temp_dir.path().join("saves")));
    let manager = SaveManager::new(SavePreset::with_max_slots(4), store.clone());
    (manager, store)
}

/// Integration test: save, list, reload and wipe slots on disk.
#[test]
fn test_slots_on_disk_workflow() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let (hooks, world) = RecordingHooks::new(call_log());
    let (manager, store) = file_manager(&temp_dir);
    let mut manager = manager.with_world_hooks(hooks);

    for slot in 0..3u8 {
        world.lock().unwrap().bytes = vec![slot; 16];
        manager
            .request_save(slot.into(), true, Some(ThumbnailSize::new(4, 2)), |_| {})
            .expect("Save should be accepted");
        assert!(run_until_idle(&mut manager, MAX_ITERATIONS));
    }

    for slot in 0..3 {
        assert!(store.info_path(slot).is_file());
        assert!(store.data_path(slot).is_file());
    }
    let leftovers = fs::read_dir(store.root())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);

    let reports = Reports::default();
    manager
        .request_slot_infos(true, reports.callback())
        .expect("Listing should be accepted");
    assert!(run_until_idle(&mut manager, MAX_ITERATIONS));
    let listed: Vec<_> = reports.all()[0].infos().iter().map(|i| i.id).collect();
    assert_eq!(listed, vec![2, 1, 0]);

    manager.request_load(1, |_| {}).expect("Load should be accepted");
    assert!(run_until_idle(&mut manager, MAX_ITERATIONS));
    assert_eq!(world.lock().unwrap().bytes, vec![1; 16]);
    let thumbnail = manager.current_info().thumbnail.clone().unwrap();
    assert_eq!((thumbnail.width, thumbnail.height), (4, 2));

    let reports = Reports::default();
    manager
        .request_delete_all(reports.callback())
        .expect("Delete all should be accepted");
    assert!(run_until_idle(&mut manager, MAX_ITERATIONS));
    assert_eq!(reports.all()[0].outcome, TaskOutcome::Succeeded);
    assert!(store.enumerate_ids().unwrap().is_empty());
    assert!(!manager.is_in_slot());
}

#[test]
fn test_corrupt_slot_fails_to_load() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let (mut manager, store) = file_manager(&temp_dir);

    manager.request_save(0, true, None, |_| {}).unwrap();
    assert!(run_until_idle(&mut manager, MAX_ITERATIONS));
    fs::write(store.data_path(0), "not ron at all (").unwrap();

    let reports = Reports::default();
    manager.request_load(0, reports.callback()).unwrap();
    assert!(run_until_idle(&mut manager, MAX_ITERATIONS));

    assert!(!reports.all()[0].outcome.is_success());
}

#[test]
fn test_unreadable_infos_are_skipped_in_listing() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let (mut manager, store) = file_manager(&temp_dir);

    for slot in [0, 1] {
        manager.request_save(slot, true, None, |_| {}).unwrap();
        assert!(run_until_idle(&mut manager, MAX_ITERATIONS));
    }
    fs::write(store.info_path(1), "garbage").unwrap();
    // Not a slot file, and an id beyond the slot limit.
    fs::write(store.root().join("notes.txt"), "hello").unwrap();
    fs::copy(store.info_path(0), store.info_path(9)).unwrap();

    let mut ids = Vec::new();
    manager
        .load_slot_infos_sync(false, |report| {
            ids = report.infos().iter().map(|info| info.id).collect();
        })
        .unwrap();
    assert_eq!(ids, vec![0]);
}
