use sandcastle_core::{ObjectId, SyncResult, UiContext, UiObject, WindowId};

/// Top-level container of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootPanel {
    id: ObjectId,
}

impl RootPanel {
    pub fn get(cx: &mut UiContext, window: WindowId) -> SyncResult<Self> {
        Ok(Self {
            id: cx.root(window)?,
        })
    }

    pub fn add(&self, cx: &mut UiContext, child: &impl UiObject) -> SyncResult<()> {
        cx.add_child(self.id, child.id(), Vec::new())
    }

    pub fn remove(&self, cx: &mut UiContext, child: &impl UiObject) -> SyncResult<()> {
        cx.remove(child.id())
    }
}

impl UiObject for RootPanel {
    fn id(&self) -> ObjectId {
        self.id
    }
}
