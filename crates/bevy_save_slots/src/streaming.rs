use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{SlotData, TaskId, WorldHooks};

/// Name of a streaming region, a piece of the world that loads and unloads
/// independently from save tasks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    /// Creates a region id.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The region name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RegionId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RegionId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of asking for a region to be deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRequest {
    /// The region was resident and has been deserialized.
    Done,
    /// The region will be deserialized when it finishes loading.
    Pending,
}

/// Region work owned by a single task.
#[derive(Debug)]
struct RegionClaim {
    task: TaskId,
    applied: BTreeSet<RegionId>,
    waiting: BTreeSet<RegionId>,
}

impl RegionClaim {
    fn new(task: TaskId) -> Self {
        Self {
            task,
            applied: BTreeSet::new(),
            waiting: BTreeSet::new(),
        }
    }
}

/// Keeps save tasks in step with the streaming subsystem.
///
/// Tracks which regions are resident and applies region hooks for the one
/// task that currently owns region work. Outside of tasks, regions that
/// unload are serialized into the current slot and regions that load are
/// restored from it.
#[derive(Debug, Default)]
pub struct RegionSync {
    resident: BTreeSet<RegionId>,
    claim: Option<RegionClaim>,
    /// Sequence number of the last unload kept into the current slot.
    kept_seq: u64,
    kept: BTreeMap<RegionId, u64>,
}

impl RegionSync {
    /// Creates a synchronizer with no resident regions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the region is currently loaded.
    pub fn is_resident(&self, region: &RegionId) -> bool {
        self.resident.contains(region)
    }

    /// All currently loaded regions.
    pub fn resident_regions(&self) -> impl Iterator<Item = &RegionId> {
        self.resident.iter()
    }

    /// Handles a region that finished streaming in.
    pub fn on_region_loaded(
        &mut self,
        region: RegionId,
        current: Option<&SlotData>,
        hooks: &mut dyn WorldHooks,
    ) {
        self.resident.insert(region.clone());

        if let Some(claim) = &mut self.claim {
            if claim.waiting.remove(&region) {
                if let Some(data) = current {
                    debug!("Deserializing region {} for task {}", region, claim.task);
                    hooks.deserialize_region(&region, data);
                }
                claim.applied.insert(region);
                return;
            }
            if claim.applied.contains(&region) {
                return;
            }
        }

        if let Some(data) = current.filter(|data| data.regions.contains_key(&region)) {
            debug!("Restoring region {} from the current slot", region);
            hooks.deserialize_region(&region, data);
        }
    }

    /// Handles a region that is about to stream out.
    pub fn on_region_will_unload(
        &mut self,
        region: RegionId,
        current: Option<&mut SlotData>,
        hooks: &mut dyn WorldHooks,
    ) {
        if !self.resident.remove(&region) {
            return;
        }
        if let Some(data) = current {
            debug!("Keeping state of unloading region {}", region);
            hooks.serialize_region(&region, data);
            self.kept_seq += 1;
            self.kept.insert(region, self.kept_seq);
        }
    }

    /// Marker for [`kept_since`](Self::kept_since).
    pub(crate) fn kept_seq(&self) -> u64 {
        self.kept_seq
    }

    /// Regions whose state was kept into the current slot after `seq`.
    pub(crate) fn kept_since(&self, seq: u64) -> impl Iterator<Item = &RegionId> {
        self.kept
            .iter()
            .filter(move |(_, kept)| **kept > seq)
            .map(|(region, _)| region)
    }

    /// Serializes every resident region not yet covered by `task`.
    ///
    /// Returns the regions covered by this call.
    pub fn serialize_resident_regions(
        &mut self,
        task: TaskId,
        data: &mut SlotData,
        hooks: &mut dyn WorldHooks,
    ) -> BTreeSet<RegionId> {
        let claim = claim_for(&mut self.claim, task);
        let mut covered = BTreeSet::new();
        for region in &self.resident {
            if claim.applied.insert(region.clone()) {
                hooks.serialize_region(region, data);
                covered.insert(region.clone());
            }
        }
        covered
    }

    /// Deserializes `region` for `task` now if it is resident, or once it loads.
    pub fn request_deserialize(
        &mut self,
        region: &RegionId,
        task: TaskId,
        data: &SlotData,
        hooks: &mut dyn WorldHooks,
    ) -> RegionRequest {
        let claim = claim_for(&mut self.claim, task);
        if claim.applied.contains(region) {
            return RegionRequest::Done;
        }
        if self.resident.contains(region) {
            hooks.deserialize_region(region, data);
            claim.applied.insert(region.clone());
            RegionRequest::Done
        } else {
            claim.waiting.insert(region.clone());
            RegionRequest::Pending
        }
    }

    /// Returns true when `task` is not waiting on any region.
    pub fn is_settled(&self, task: TaskId) -> bool {
        match &self.claim {
            Some(claim) if claim.task == task => claim.waiting.is_empty(),
            _ => true,
        }
    }

    /// Regions `task` is still waiting on.
    pub fn pending_regions(&self, task: TaskId) -> Vec<RegionId> {
        match &self.claim {
            Some(claim) if claim.task == task => claim.waiting.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Drops the region work of `task`. Later load events are no longer
    /// applied on its behalf.
    pub fn release(&mut self, task: TaskId) {
        if self.claim.as_ref().is_some_and(|claim| claim.task == task) {
            self.claim = None;
        }
    }

    pub(crate) fn clear_claim(&mut self) {
        self.claim = None;
    }
}

fn claim_for(claim: &mut Option<RegionClaim>, task: TaskId) -> &mut RegionClaim {
    if let Some(previous) = claim.as_ref().filter(|claim| claim.task != task) {
        warn!(
            "Task {} took over region work still held by task {}",
            task, previous.task
        );
        *claim = None;
    }
    claim.get_or_insert_with(|| RegionClaim::new(task))
}
