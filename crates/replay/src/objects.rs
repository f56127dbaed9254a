use common::{Category, EntryFamily, HandleId, StateTable};

/// Replay-side translation record for one captured object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayObjectInfo {
    pub capture_id: HandleId,
    /// Handle created by the replay driver.
    pub handle: u64,
    /// Capture id of the owning object (device, pool, ...), or null.
    pub parent_id: HandleId,
}

/// Entry family storing translation records.
pub struct ReplayObjects;

impl EntryFamily for ReplayObjects {
    type Entry<C: Category> = ReplayObjectInfo;
}

pub type ReplayStateTable = StateTable<ReplayObjects>;

/// Replay handle for `capture_id` in category `C`. The null id maps to the
/// null handle.
pub fn replay_handle<C: Category>(table: &ReplayStateTable, capture_id: HandleId) -> Option<u64> {
    if capture_id.is_null() {
        return Some(0);
    }
    table.get::<C>(capture_id).map(|info| info.handle)
}
