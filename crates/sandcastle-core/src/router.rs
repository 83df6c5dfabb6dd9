//! Reverse path: inbound event envelopes routed to server-side handlers.
//!
//! Stale and malformed input never escapes this module as an error; handler
//! failures do.

use metrics::counter;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::context::UiContext;
use crate::error::SyncResult;
use crate::handlers::EventCategory;
use crate::model::{ClientToServerModel, ObjectId, WindowId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope is not valid json: {0}")]
    Json(String),
    #[error("envelope is not a json object")]
    NotAnObject,
    #[error("envelope is missing {0}")]
    MissingKey(ClientToServerModel),
    #[error("envelope carries no event key")]
    NoEvent,
    #[error("envelope key {key} is not {expected}")]
    InvalidValue {
        key: ClientToServerModel,
        expected: &'static str,
    },
}

/// Event payload decoded from an envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Selection(usize),
    BeforeSelection(usize),
    Native(JsonValue),
}

impl EventPayload {
    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::Selection(_) => EventCategory::Selection,
            EventPayload::BeforeSelection(_) => EventCategory::BeforeSelection,
            EventPayload::Native(_) => EventCategory::Native,
        }
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub object: ObjectId,
    pub window: Option<WindowId>,
    pub payload: EventPayload,
    /// Native payload sent alongside a typed event; delivered instead when
    /// the object has no handlers for the typed category.
    pub native_fallback: Option<JsonValue>,
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let value: JsonValue =
            serde_json::from_str(raw).map_err(|err| EnvelopeError::Json(err.to_string()))?;
        match value {
            JsonValue::Object(map) => Self::from_map(&map),
            _ => Err(EnvelopeError::NotAnObject),
        }
    }

    pub fn from_map(map: &Map<String, JsonValue>) -> Result<Self, EnvelopeError> {
        let object = map
            .get(ClientToServerModel::ObjectId.key())
            .ok_or(EnvelopeError::MissingKey(ClientToServerModel::ObjectId))?
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .and_then(ObjectId::new)
            .ok_or(EnvelopeError::InvalidValue {
                key: ClientToServerModel::ObjectId,
                expected: "a positive object id",
            })?;

        let window = match map.get(ClientToServerModel::WindowId.key()) {
            None => None,
            Some(raw) => Some(
                raw.as_u64()
                    .and_then(|raw| u32::try_from(raw).ok())
                    .map(WindowId::new)
                    .ok_or(EnvelopeError::InvalidValue {
                        key: ClientToServerModel::WindowId,
                        expected: "a window id",
                    })?,
            ),
        };

        let native = map.get(ClientToServerModel::Native.key());
        let payload = if let Some(raw) = map.get(ClientToServerModel::HandlerSelection.key()) {
            EventPayload::Selection(index(raw, ClientToServerModel::HandlerSelection)?)
        } else if let Some(raw) = map.get(ClientToServerModel::HandlerBeforeSelection.key()) {
            EventPayload::BeforeSelection(index(raw, ClientToServerModel::HandlerBeforeSelection)?)
        } else if let Some(raw) = native {
            EventPayload::Native(raw.clone())
        } else {
            return Err(EnvelopeError::NoEvent);
        };

        let native_fallback = match payload {
            EventPayload::Native(_) => None,
            _ => native.cloned(),
        };
        Ok(Self {
            object,
            window,
            payload,
            native_fallback,
        })
    }
}

fn index(raw: &JsonValue, key: ClientToServerModel) -> Result<usize, EnvelopeError> {
    raw.as_u64()
        .and_then(|raw| usize::try_from(raw).ok())
        .ok_or(EnvelopeError::InvalidValue {
            key,
            expected: "a non-negative index",
        })
}

/// Typed event handed to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Selection { source: ObjectId, index: usize },
    BeforeSelection { source: ObjectId, index: usize },
    Native { source: ObjectId, payload: JsonValue },
}

impl UiEvent {
    fn new(source: ObjectId, payload: EventPayload) -> Self {
        match payload {
            EventPayload::Selection(index) => UiEvent::Selection { source, index },
            EventPayload::BeforeSelection(index) => UiEvent::BeforeSelection { source, index },
            EventPayload::Native(payload) => UiEvent::Native { source, payload },
        }
    }

    pub fn source(&self) -> ObjectId {
        match self {
            UiEvent::Selection { source, .. }
            | UiEvent::BeforeSelection { source, .. }
            | UiEvent::Native { source, .. } => *source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownObject,
    NoHandlers,
    WindowMismatch,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::UnknownObject => "unknown_object",
            DropReason::NoHandlers => "no_handlers",
            DropReason::WindowMismatch => "window_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered { object: ObjectId, handlers: usize },
    Dropped { object: ObjectId, reason: DropReason },
    Rejected(EnvelopeError),
}

impl UiContext {
    /// Parses and routes one raw envelope.
    pub fn dispatch(&mut self, raw: &str) -> SyncResult<DispatchOutcome> {
        match Envelope::parse(raw) {
            Ok(envelope) => self.dispatch_envelope(envelope),
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "rejected inbound envelope");
                counter!("sandcastle_events_dropped_total", 1, "reason" => "malformed");
                Ok(DispatchOutcome::Rejected(err))
            }
        }
    }

    /// Invokes every handler of the envelope's category in registration order.
    ///
    /// Handlers are lent out of the object while they run, so they may mutate
    /// any object, including the source. Handlers registered during dispatch
    /// run from the next event on. If a handler removes the source object the
    /// remaining handlers are skipped.
    pub fn dispatch_envelope(&mut self, envelope: Envelope) -> SyncResult<DispatchOutcome> {
        let Envelope {
            object,
            window,
            mut payload,
            native_fallback,
        } = envelope;
        let mut category = payload.category();

        let ids = match self.registry.resolve(object) {
            None => return Ok(self.drop_event(object, DropReason::UnknownObject)),
            Some(entry) => {
                if let Some(window) = window {
                    if entry.window != Some(window) {
                        return Ok(self.drop_event(object, DropReason::WindowMismatch));
                    }
                }
                let typed = entry.handlers.ids(category);
                match native_fallback {
                    Some(native) if typed.is_empty() => {
                        payload = EventPayload::Native(native);
                        category = EventCategory::Native;
                        entry.handlers.ids(category)
                    }
                    _ => typed,
                }
            }
        };
        if ids.is_empty() {
            return Ok(self.drop_event(object, DropReason::NoHandlers));
        }

        let event = UiEvent::new(object, payload);
        let mut delivered = 0;
        for id in ids {
            let Some(mut handler) = self
                .registry
                .resolve_mut(object)
                .and_then(|entry| entry.handlers.lend(id))
            else {
                continue;
            };
            let result = handler(self, &event);
            if let Some(entry) = self.registry.resolve_mut(object) {
                entry.handlers.restore(id, handler);
            }
            result?;
            delivered += 1;
            if !self.registry.contains(object) {
                break;
            }
        }

        trace!(
            session_id = %self.session_id,
            object_id = %object,
            category = ?category,
            delivered,
            "event dispatched"
        );
        counter!("sandcastle_events_dispatched_total", 1);
        Ok(DispatchOutcome::Delivered {
            object,
            handlers: delivered,
        })
    }

    fn drop_event(&self, object: ObjectId, reason: DropReason) -> DispatchOutcome {
        debug!(
            session_id = %self.session_id,
            object_id = %object,
            reason = reason.as_str(),
            "dropped inbound event"
        );
        counter!("sandcastle_events_dropped_total", 1, "reason" => reason.as_str());
        DispatchOutcome::Dropped { object, reason }
    }
}
