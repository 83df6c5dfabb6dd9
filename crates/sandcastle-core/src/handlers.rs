use std::fmt;

use crate::context::UiContext;
use crate::error::SyncError;
use crate::model::HandlerKind;
use crate::router::UiEvent;

/// Server-side event handler. The remote side only learns that a category is
/// of interest; the handler logic itself never leaves the server.
pub type Handler = Box<dyn FnMut(&mut UiContext, &UiEvent) -> Result<(), SyncError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Dispatch categories; typed ones map onto a [`HandlerKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Selection,
    BeforeSelection,
    Native,
}

impl EventCategory {
    pub fn handler_kind(self) -> Option<HandlerKind> {
        match self {
            EventCategory::Selection => Some(HandlerKind::Selection),
            EventCategory::BeforeSelection => Some(HandlerKind::BeforeSelection),
            EventCategory::Native => None,
        }
    }
}

impl From<HandlerKind> for EventCategory {
    fn from(kind: HandlerKind) -> Self {
        match kind {
            HandlerKind::Selection => EventCategory::Selection,
            HandlerKind::BeforeSelection => EventCategory::BeforeSelection,
        }
    }
}

struct Slot {
    category: EventCategory,
    id: HandlerId,
    // `None` while the handler is lent out to a running dispatch.
    handler: Option<Handler>,
}

/// Per-object handlers in registration order.
#[derive(Default)]
pub(crate) struct HandlerTable {
    slots: Vec<Slot>,
}

impl HandlerTable {
    /// Returns `true` when this is the first handler of its category.
    pub(crate) fn insert(&mut self, category: EventCategory, id: HandlerId, handler: Handler) -> bool {
        let first = self.count(category) == 0;
        self.slots.push(Slot {
            category,
            id,
            handler: Some(handler),
        });
        first
    }

    /// Returns the category and whether it became empty.
    pub(crate) fn remove(&mut self, id: HandlerId) -> Option<(EventCategory, bool)> {
        let index = self.slots.iter().position(|slot| slot.id == id)?;
        let slot = self.slots.remove(index);
        Some((slot.category, self.count(slot.category) == 0))
    }

    pub(crate) fn count(&self, category: EventCategory) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.category == category)
            .count()
    }

    pub(crate) fn ids(&self, category: EventCategory) -> Vec<HandlerId> {
        self.slots
            .iter()
            .filter(|slot| slot.category == category)
            .map(|slot| slot.id)
            .collect()
    }

    pub(crate) fn lend(&mut self, id: HandlerId) -> Option<Handler> {
        self.slots
            .iter_mut()
            .find(|slot| slot.id == id)
            .and_then(|slot| slot.handler.take())
    }

    /// Puts a lent handler back unless it was removed while running.
    pub(crate) fn restore(&mut self, id: HandlerId, handler: Handler) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.handler = Some(handler);
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|slot| (slot.category, slot.id)))
            .finish()
    }
}
