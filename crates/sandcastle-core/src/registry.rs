use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{IllegalState, SyncError};
use crate::model::ObjectId;
use crate::object::ObjectEntry;

/// Per-session identity authority.
///
/// Allocation is a lock-free counter so ids stay strictly increasing even when
/// several execution contexts allocate concurrently. Ids are never reused.
#[derive(Debug)]
pub struct IdentityRegistry {
    next: AtomicU32,
    live: HashMap<ObjectId, ObjectEntry>,
}

/// Error for an id that is not live: removed if it was ever handed out.
fn missing(id: ObjectId, next: &AtomicU32) -> SyncError {
    if id.get() < next.load(Ordering::Acquire) {
        IllegalState::Removed(id).into()
    } else {
        SyncError::UnknownObject(id)
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
            live: HashMap::new(),
        }
    }

    pub fn allocate(&self) -> Result<ObjectId, SyncError> {
        let raw = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(1)
            })
            .map_err(|_| IllegalState::IdsExhausted)?;
        ObjectId::new(raw).ok_or_else(|| IllegalState::IdsExhausted.into())
    }

    /// Highest identifier handed out so far (0 before the first allocation).
    pub fn last_allocated(&self) -> u32 {
        self.next.load(Ordering::Acquire).saturating_sub(1)
    }

    pub(crate) fn register(&mut self, entry: ObjectEntry) {
        self.live.insert(entry.id, entry);
    }

    pub fn resolve(&self, id: ObjectId) -> Option<&ObjectEntry> {
        self.live.get(&id)
    }

    pub(crate) fn resolve_mut(&mut self, id: ObjectId) -> Option<&mut ObjectEntry> {
        self.live.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.live.contains_key(&id)
    }

    /// Allocated but no longer live.
    pub fn was_removed(&self, id: ObjectId) -> bool {
        !self.contains(id) && id.get() <= self.last_allocated()
    }

    pub(crate) fn lookup(&self, id: ObjectId) -> Result<&ObjectEntry, SyncError> {
        match self.live.get(&id) {
            Some(entry) => Ok(entry),
            None => Err(missing(id, &self.next)),
        }
    }

    pub(crate) fn lookup_mut(&mut self, id: ObjectId) -> Result<&mut ObjectEntry, SyncError> {
        match self.live.get_mut(&id) {
            Some(entry) => Ok(entry),
            None => Err(missing(id, &self.next)),
        }
    }

    pub(crate) fn purge(&mut self, id: ObjectId) -> Option<ObjectEntry> {
        self.live.remove(&id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}
