use crate::{RegionId, SlotData, SlotInfo, Thumbnail, ThumbnailSize};

/// Bridge between the save manager and the application's state.
///
/// All methods run on the main schedule, never on a background worker.
pub trait WorldHooks: Send + Sync + 'static {
    /// Writes the application's state into a slot that is about to be saved.
    fn capture(&mut self, info: &mut SlotInfo, data: &mut SlotData);

    /// Applies a freshly loaded slot to the application.
    fn restore(&mut self, info: &SlotInfo, data: &SlotData);

    /// Writes the state of one streaming region into `data`.
    fn serialize_region(&mut self, _region: &RegionId, _data: &mut SlotData) {}

    /// Applies the stored state of one streaming region.
    fn deserialize_region(&mut self, _region: &RegionId, _data: &SlotData) {}

    /// Captures the current frame. Returning `None` saves without a thumbnail.
    fn capture_thumbnail(&mut self, _size: ThumbnailSize) -> Option<Thumbnail> {
        None
    }
}

/// Hooks that leave the application untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWorldHooks;

impl WorldHooks for NoopWorldHooks {
    fn capture(&mut self, _info: &mut SlotInfo, _data: &mut SlotData) {}

    fn restore(&mut self, _info: &SlotInfo, _data: &SlotData) {}
}
