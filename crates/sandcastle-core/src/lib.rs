//! Server-side UI tree mirrored to a remote rendering runtime.
//!
//! Objects live in a per-session [`UiContext`]; every mutation becomes an
//! [`Instruction`] in the current [`Transaction`], and a [`Session`] commits
//! each transaction as one ordered frame over a [`Transport`]. Inbound event
//! envelopes travel the other way through the router.

pub mod config;
pub mod context;
pub mod encoder;
pub mod error;
pub mod handlers;
pub mod model;
pub mod object;
pub mod registry;
pub mod router;
pub mod session;
pub mod transport;
pub mod txn;
pub mod window;
pub mod wire;

pub use config::SyncConfig;
pub use context::UiContext;
pub use encoder::{Instruction, InstructionEncoder, Operation};
pub use error::{IllegalState, SyncError, SyncResult};
pub use handlers::{EventCategory, Handler, HandlerId};
pub use model::{
    ClientToServerModel, Field, HandlerKind, ObjectId, ServerToClientModel, Value, WidgetKind,
    WindowId,
};
pub use object::{HandlerRegistrant, Lifecycle, Mutable, NativeBindable, ObjectEntry, ObjectSpec, UiObject};
pub use registry::IdentityRegistry;
pub use router::{DispatchOutcome, DropReason, Envelope, EnvelopeError, EventPayload, UiEvent};
pub use session::{DesyncCause, Session};
pub use transport::{Transport, TransportError};
pub use txn::Transaction;
pub use window::WindowScope;
pub use wire::{TransactionFrame, WireError, WireFormat, WireFrame};
