use tracing::debug;
use uuid::Uuid;

use crate::error::{IllegalState, SyncResult};
use crate::handlers::HandlerId;
use crate::model::{ObjectId, WidgetKind, WindowId};
use crate::object::ObjectSpec;
use crate::registry::IdentityRegistry;
use crate::txn::Transaction;
use crate::window::WindowScope;

/// Session-scoped state threaded through every core call.
///
/// A `UiContext` is only reachable through [`Session::scope`], so holding
/// `&mut UiContext` is proof of holding the session's exclusive scope.
///
/// [`Session::scope`]: crate::session::Session::scope
#[derive(Debug)]
pub struct UiContext {
    pub(crate) session_id: Uuid,
    pub(crate) registry: IdentityRegistry,
    pub(crate) windows: WindowScope,
    pub(crate) txn: Transaction,
    next_handler: u64,
}

impl UiContext {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            registry: IdentityRegistry::new(),
            windows: WindowScope::default(),
            txn: Transaction::new(),
            next_handler: 1,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The transaction bound to the current processing cycle.
    pub fn transaction(&self) -> &Transaction {
        &self.txn
    }

    pub fn take_transaction(&mut self) -> Transaction {
        self.txn.take()
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn windows(&self) -> &WindowScope {
        &self.windows
    }

    pub fn open_window(&mut self) -> WindowId {
        let window = self.windows.open();
        debug!(session_id = %self.session_id, window_id = %window, "window opened");
        window
    }

    /// Root panel of `window`, created and attached on first use.
    pub fn root(&mut self, window: WindowId) -> SyncResult<ObjectId> {
        if let Some(root) = self.windows.root(window) {
            return Ok(root);
        }
        if !self.windows.is_open(window) {
            return Err(IllegalState::UnknownWindow(window).into());
        }
        let root = self.create(ObjectSpec::new(WidgetKind::RootPanel))?;
        self.registry.lookup_mut(root)?.root_of = Some(window);
        self.attach(root, window)?;
        self.windows.set_root(window, root);
        Ok(root)
    }

    pub(crate) fn next_handler_id(&mut self) -> HandlerId {
        let id = HandlerId::new(self.next_handler);
        self.next_handler += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Operation;
    use crate::error::SyncError;
    use crate::model::ServerToClientModel;

    #[test_timeout::timeout]
    fn root_is_created_once_per_window() {
        let mut cx = UiContext::new(Uuid::new_v4());
        let main = cx.root(WindowId::MAIN).unwrap();
        assert_eq!(cx.root(WindowId::MAIN).unwrap(), main);

        let popup = cx.open_window();
        let popup_root = cx.root(popup).unwrap();
        assert_ne!(popup_root, main);

        let txn = cx.take_transaction();
        assert_eq!(txn.len(), 2);
        assert!(txn
            .instructions()
            .iter()
            .all(|i| i.operation() == Some(Operation::Create)));
        assert!(txn.instructions()[0]
            .get(ServerToClientModel::WindowId)
            .is_none());
        assert_eq!(txn.instructions()[1].window(), popup);
    }

    #[test_timeout::timeout]
    fn roots_cannot_be_removed() {
        let mut cx = UiContext::new(Uuid::new_v4());
        let root = cx.root(WindowId::MAIN).unwrap();
        assert_eq!(
            cx.remove(root).unwrap_err(),
            SyncError::IllegalState(IllegalState::WindowRoot {
                object: root,
                window: WindowId::MAIN
            })
        );
    }

    #[test_timeout::timeout]
    fn root_of_unopened_window_is_rejected() {
        let mut cx = UiContext::new(Uuid::new_v4());
        assert_eq!(
            cx.root(WindowId::new(4)).unwrap_err(),
            SyncError::IllegalState(IllegalState::UnknownWindow(WindowId::new(4)))
        );
        assert_eq!(cx.registry().last_allocated(), 0);
    }
}
