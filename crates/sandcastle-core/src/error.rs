use thiserror::Error;
use uuid::Uuid;

use crate::model::{ObjectId, WindowId};

/// Programmer errors. Each one would desynchronize the remote tree if it were
/// ignored, so they surface at the call site.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IllegalState {
    #[error("object {object} already attached to window {current}, cannot attach to window {requested}")]
    WindowMismatch {
        object: ObjectId,
        current: WindowId,
        requested: WindowId,
    },
    #[error("object {object} already bound to native function {function}")]
    AlreadyBound { object: ObjectId, function: String },
    #[error("object {0} is not bound to a native function")]
    NotBound(ObjectId),
    #[error("object {0} was removed")]
    Removed(ObjectId),
    #[error("window {0} is not open")]
    UnknownWindow(WindowId),
    #[error("object {child} already belongs to parent {parent}")]
    AlreadyAdopted { child: ObjectId, parent: ObjectId },
    #[error("object {0} cannot adopt itself")]
    SelfAdoption(ObjectId),
    #[error("object {0} has no parent to be removed from")]
    Orphan(ObjectId),
    #[error("object {object} is the root of window {window} and cannot be removed")]
    WindowRoot { object: ObjectId, window: WindowId },
    #[error("index {index} out of bounds for object {object} holding {len} children")]
    IndexOutOfBounds {
        object: ObjectId,
        index: usize,
        len: usize,
    },
    #[error("object {object} does not carry state of type {expected}")]
    StateMismatch {
        object: ObjectId,
        expected: &'static str,
    },
    #[error("object identifiers exhausted")]
    IdsExhausted,
}

/// Error returned across the core's API boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("illegal state: {0}")]
    IllegalState(#[from] IllegalState),
    #[error("session {session} desynchronized: {reason}")]
    Desynchronized { session: Uuid, reason: String },
    #[error("session {0} closed")]
    SessionClosed(Uuid),
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),
}

impl SyncError {
    /// `true` for errors after which the session can no longer be used.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Desynchronized { .. } | SyncError::SessionClosed(_)
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
