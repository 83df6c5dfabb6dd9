//! Widget builders over the synchronization core.
//!
//! Widgets are copyable handles around an [`ObjectId`]; their state lives in
//! the session's [`UiContext`] and every operation takes the context
//! explicitly.
//!
//! [`ObjectId`]: sandcastle_core::ObjectId
//! [`UiContext`]: sandcastle_core::UiContext

mod horizontal_panel;
mod label;
mod root;
mod tab_layout_panel;

pub use horizontal_panel::{HorizontalAlignment, HorizontalPanel, VerticalAlignment};
pub use label::Label;
pub use root::RootPanel;
pub use tab_layout_panel::TabLayoutPanel;

use sandcastle_core::{Handler, SyncResult, UiContext, UiEvent};

/// Adapts an index callback into a handler for selection-style events.
pub(crate) fn index_handler<F>(mut f: F) -> Handler
where
    F: FnMut(&mut UiContext, usize) -> SyncResult<()> + Send + 'static,
{
    Box::new(move |cx, event| match event {
        UiEvent::Selection { index, .. } | UiEvent::BeforeSelection { index, .. } => f(cx, *index),
        UiEvent::Native { .. } => Ok(()),
    })
}
