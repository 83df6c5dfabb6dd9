use std::collections::{BTreeSet, HashMap};

use crate::model::{ObjectId, WindowId};

/// Top-level frames open inside one session. The main window is always open.
#[derive(Debug)]
pub struct WindowScope {
    next: u32,
    open: BTreeSet<WindowId>,
    roots: HashMap<WindowId, ObjectId>,
}

impl Default for WindowScope {
    fn default() -> Self {
        Self {
            next: 1,
            open: BTreeSet::from([WindowId::MAIN]),
            roots: HashMap::new(),
        }
    }
}

impl WindowScope {
    pub fn open(&mut self) -> WindowId {
        let window = WindowId::new(self.next);
        self.next += 1;
        self.open.insert(window);
        window
    }

    pub fn is_open(&self, window: WindowId) -> bool {
        self.open.contains(&window)
    }

    pub fn windows(&self) -> impl Iterator<Item = WindowId> + '_ {
        self.open.iter().copied()
    }

    pub fn root(&self, window: WindowId) -> Option<ObjectId> {
        self.roots.get(&window).copied()
    }

    pub(crate) fn set_root(&mut self, window: WindowId, root: ObjectId) {
        self.roots.insert(window, root);
    }
}
