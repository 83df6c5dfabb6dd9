//! UI object lifecycle: `Unattached -> Initialized -> Removed`.
//!
//! Every mutation is expressed as an instruction appended to the context's
//! current transaction. Mutations requested before an object is attached are
//! queued on the object and replayed right after its CREATE.

use std::any::{type_name, Any};
use std::fmt;

use tracing::trace;

use crate::context::UiContext;
use crate::error::{IllegalState, SyncError, SyncResult};
use crate::handlers::{EventCategory, Handler, HandlerId, HandlerTable};
use crate::model::{Field, HandlerKind, ObjectId, ServerToClientModel, Value, WidgetKind, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unattached,
    Initialized,
    Removed,
}

/// Construction recipe for a new object.
pub struct ObjectSpec {
    kind: WidgetKind,
    init_fields: Vec<Field>,
    state: Option<Box<dyn Any + Send>>,
}

impl ObjectSpec {
    pub fn new(kind: WidgetKind) -> Self {
        Self {
            kind,
            init_fields: Vec::new(),
            state: None,
        }
    }

    /// Extra construction field written into the CREATE instruction.
    pub fn with_field(mut self, model: ServerToClientModel, value: impl Into<Value>) -> Self {
        self.init_fields.push(Field::new(model, value));
        self
    }

    /// Widget-specific server-side state, reachable through
    /// [`UiContext::state`] and [`UiContext::state_mut`].
    pub fn with_state<T: Any + Send>(mut self, state: T) -> Self {
        self.state = Some(Box::new(state));
        self
    }
}

enum Deferred {
    Instruction(Vec<Field>),
    Attach(ObjectId),
    Adopt { child: ObjectId, fields: Vec<Field> },
}

pub struct ObjectEntry {
    pub(crate) id: ObjectId,
    pub(crate) kind: WidgetKind,
    pub(crate) window: Option<WindowId>,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) native_binding: Option<String>,
    pub(crate) parent: Option<ObjectId>,
    pub(crate) children: Vec<ObjectId>,
    /// Objects owned by this one without being its children, such as a tab header.
    pub(crate) companions: Vec<ObjectId>,
    pub(crate) companion_of: Option<ObjectId>,
    pub(crate) root_of: Option<WindowId>,
    pub(crate) handlers: HandlerTable,
    init_fields: Vec<Field>,
    deferred: Vec<Deferred>,
    state: Option<Box<dyn Any + Send>>,
}

impl ObjectEntry {
    pub(crate) fn new(id: ObjectId, spec: ObjectSpec) -> Self {
        Self {
            id,
            kind: spec.kind,
            window: None,
            lifecycle: Lifecycle::Unattached,
            native_binding: None,
            parent: None,
            children: Vec::new(),
            companions: Vec::new(),
            companion_of: None,
            root_of: None,
            handlers: HandlerTable::default(),
            init_fields: spec.init_fields,
            deferred: Vec::new(),
            state: spec.state,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> WidgetKind {
        self.kind
    }

    pub fn window(&self) -> Option<WindowId> {
        self.window
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn native_binding(&self) -> Option<&str> {
        self.native_binding.as_deref()
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }
}

impl fmt::Debug for ObjectEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("window", &self.window)
            .field("lifecycle", &self.lifecycle)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl UiContext {
    /// Registers a new, unattached object.
    pub fn create(&mut self, spec: ObjectSpec) -> SyncResult<ObjectId> {
        let id = self.registry.allocate()?;
        self.registry.register(ObjectEntry::new(id, spec));
        trace!(session_id = %self.session_id, object_id = %id, "object registered");
        Ok(id)
    }

    /// Attaches `id` to `window`, emitting CREATE on first attachment.
    ///
    /// Returns `true` if the object was initialized by this call. Attaching to
    /// the same window again is a no-op; a different window is an error.
    pub fn attach(&mut self, id: ObjectId, window: WindowId) -> SyncResult<bool> {
        if !self.windows.is_open(window) {
            return Err(IllegalState::UnknownWindow(window).into());
        }
        let current = self.registry.lookup(id)?.window;
        match current {
            None => {
                self.check_placement(id, window)?;
                self.registry.lookup_mut(id)?.window = Some(window);
                self.initialize(id)?;
                Ok(true)
            }
            Some(current) if current == window => Ok(false),
            Some(current) => Err(IllegalState::WindowMismatch {
                object: id,
                current,
                requested: window,
            }
            .into()),
        }
    }

    /// Fails if attaching `id` to `window` would drag along a queued dependent
    /// that already lives in another window. Runs before any state changes so
    /// a failed attach leaves the object and its queue untouched.
    fn check_placement(&self, id: ObjectId, window: WindowId) -> SyncResult<()> {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let Some(entry) = self.registry.resolve(next) else {
                continue;
            };
            match entry.window {
                Some(current) if current != window => {
                    return Err(IllegalState::WindowMismatch {
                        object: next,
                        current,
                        requested: window,
                    }
                    .into());
                }
                Some(_) => {}
                None => stack.extend(entry.deferred.iter().filter_map(|item| match item {
                    Deferred::Attach(dependent) => Some(*dependent),
                    Deferred::Adopt { child, .. } => Some(*child),
                    Deferred::Instruction(_) => None,
                })),
            }
        }
        Ok(())
    }

    fn initialize(&mut self, id: ObjectId) -> SyncResult<()> {
        let entry = self.registry.lookup_mut(id)?;
        let window = entry.window.unwrap_or(WindowId::MAIN);
        let kind = entry.kind;
        let init_fields = std::mem::take(&mut entry.init_fields);
        let deferred = std::mem::take(&mut entry.deferred);
        entry.lifecycle = Lifecycle::Initialized;

        let mut encoder = self.txn.begin_object();
        encoder
            .parse_window(window)
            .parse(ServerToClientModel::TypeCreate, id)
            .parse(ServerToClientModel::WidgetType, kind.as_u8() as i64)
            .extend(init_fields);
        encoder.end_object();
        trace!(
            session_id = %self.session_id,
            object_id = %id,
            window_id = %window,
            kind = ?kind,
            deferred = deferred.len(),
            "object initialized"
        );

        for item in deferred {
            match item {
                Deferred::Instruction(fields) => self.write(window, fields),
                Deferred::Attach(dependent) => {
                    // Companions purged with their owner while queued.
                    if self.registry.contains(dependent) {
                        self.attach(dependent, window)?;
                    }
                }
                Deferred::Adopt { child, fields } => {
                    self.attach(child, window)?;
                    self.write(window, fields);
                }
            }
        }
        Ok(())
    }

    fn write(&mut self, window: WindowId, fields: Vec<Field>) {
        let mut encoder = self.txn.begin_object();
        encoder.parse_window(window).extend(fields);
        encoder.end_object();
    }

    /// Emits now when initialized, otherwise queues until CREATE.
    fn emit(&mut self, id: ObjectId, fields: Vec<Field>) -> SyncResult<()> {
        let entry = self.registry.lookup_mut(id)?;
        match (entry.lifecycle, entry.window) {
            (Lifecycle::Initialized, Some(window)) => {
                self.write(window, fields);
            }
            _ => entry.deferred.push(Deferred::Instruction(fields)),
        }
        Ok(())
    }

    /// UPDATE carrying one property.
    pub fn update(
        &mut self,
        id: ObjectId,
        model: ServerToClientModel,
        value: impl Into<Value>,
    ) -> SyncResult<()> {
        self.emit(
            id,
            vec![
                Field::new(ServerToClientModel::TypeUpdate, id),
                Field::new(model, value),
            ],
        )
    }

    /// UPDATE carrying two properties in a single instruction frame.
    pub fn update_pair(&mut self, id: ObjectId, first: Field, second: Field) -> SyncResult<()> {
        self.emit(
            id,
            vec![Field::new(ServerToClientModel::TypeUpdate, id), first, second],
        )
    }

    /// Places `child` under `parent`, emitting ADD with the extra fields.
    ///
    /// The child is attached to the parent's window first, so its CREATE (if
    /// any) precedes the ADD. For an unattached parent the adoption waits
    /// until the parent is attached.
    pub fn add_child(
        &mut self,
        parent: ObjectId,
        child: ObjectId,
        extra: Vec<Field>,
    ) -> SyncResult<()> {
        if parent == child {
            return Err(IllegalState::SelfAdoption(child).into());
        }
        let child_entry = self.registry.lookup(child)?;
        if let Some(existing) = child_entry.parent.or(child_entry.companion_of) {
            return Err(IllegalState::AlreadyAdopted {
                child,
                parent: existing,
            }
            .into());
        }

        let parent_entry = self.registry.lookup(parent)?;
        let parent_state = (parent_entry.lifecycle, parent_entry.window);

        let mut fields = Vec::with_capacity(2 + extra.len());
        fields.push(Field::new(ServerToClientModel::TypeAdd, child));
        fields.push(Field::new(ServerToClientModel::ParentObjectId, parent));
        fields.extend(extra);

        match parent_state {
            (Lifecycle::Initialized, Some(window)) => {
                self.attach(child, window)?;
                self.write(window, fields);
            }
            _ => {
                self.registry
                    .lookup_mut(parent)?
                    .deferred
                    .push(Deferred::Adopt { child, fields });
            }
        }

        self.registry.lookup_mut(child)?.parent = Some(parent);
        self.registry.lookup_mut(parent)?.children.push(child);
        Ok(())
    }

    /// Attaches `dependent` to the window of `anchor`, now or once `anchor` is
    /// attached, and ties its lifetime to `owner`. Used for objects referenced
    /// by another object's instruction without being placed in the tree
    /// themselves, such as tab headers: removing `owner` purges `dependent`.
    pub fn attach_alongside(
        &mut self,
        anchor: ObjectId,
        owner: ObjectId,
        dependent: ObjectId,
    ) -> SyncResult<()> {
        if dependent == owner || dependent == anchor {
            return Err(IllegalState::SelfAdoption(dependent).into());
        }
        let entry = self.registry.lookup(dependent)?;
        if let Some(existing) = entry.parent.or(entry.companion_of) {
            return Err(IllegalState::AlreadyAdopted {
                child: dependent,
                parent: existing,
            }
            .into());
        }
        self.registry.lookup(owner)?;

        let anchor_entry = self.registry.lookup(anchor)?;
        match (anchor_entry.lifecycle, anchor_entry.window) {
            (Lifecycle::Initialized, Some(window)) => {
                self.attach(dependent, window)?;
            }
            _ => {
                self.registry
                    .lookup_mut(anchor)?
                    .deferred
                    .push(Deferred::Attach(dependent));
            }
        }
        self.registry.lookup_mut(dependent)?.companion_of = Some(owner);
        self.registry.lookup_mut(owner)?.companions.push(dependent);
        Ok(())
    }

    /// Emits REMOVE{id, parent} and purges the object with its subtree.
    ///
    /// Descendants get no instruction of their own: the remote runtime drops
    /// the subtree with its root.
    pub fn remove(&mut self, id: ObjectId) -> SyncResult<()> {
        let entry = self.registry.lookup(id)?;
        if let Some(window) = entry.root_of {
            return Err(IllegalState::WindowRoot { object: id, window }.into());
        }
        let parent = entry.parent.ok_or(IllegalState::Orphan(id))?;
        let window = entry.window.unwrap_or(WindowId::MAIN);

        let parent_entry = self.registry.lookup_mut(parent)?;
        let placed = parent_entry.lifecycle == Lifecycle::Initialized;
        parent_entry.children.retain(|child| *child != id);
        if !placed {
            parent_entry
                .deferred
                .retain(|item| !matches!(item, Deferred::Adopt { child, .. } if *child == id));
        }

        if placed {
            self.write(
                window,
                vec![
                    Field::new(ServerToClientModel::TypeRemove, id),
                    Field::new(ServerToClientModel::ParentObjectId, parent),
                ],
            );
        }

        let purged = self.purge_subtree(id);
        trace!(
            session_id = %self.session_id,
            object_id = %id,
            parent_id = %parent,
            purged,
            placed,
            "object removed"
        );
        Ok(())
    }

    pub(crate) fn purge_subtree(&mut self, id: ObjectId) -> usize {
        let mut stack = vec![id];
        let mut purged = 0;
        while let Some(next) = stack.pop() {
            if let Some(entry) = self.registry.purge(next) {
                stack.extend(entry.children);
                stack.extend(entry.companions);
                purged += 1;
            }
        }
        purged
    }

    /// Registers a typed handler; the first one of its kind emits ADD_HANDLER.
    pub fn add_handler(
        &mut self,
        id: ObjectId,
        kind: HandlerKind,
        handler: Handler,
    ) -> SyncResult<HandlerId> {
        let handler_id = self.next_handler_id();
        let first = self
            .registry
            .lookup_mut(id)?
            .handlers
            .insert(kind.into(), handler_id, handler);
        if first {
            self.emit(
                id,
                vec![
                    Field::new(ServerToClientModel::TypeAddHandler, kind.as_u8() as i64),
                    Field::new(ServerToClientModel::ObjectId, id),
                ],
            )?;
        }
        Ok(handler_id)
    }

    /// Unregisters a handler; the last one of its kind emits REMOVE_HANDLER.
    ///
    /// Returns `false` if the handler was not registered on this object.
    pub fn remove_handler(&mut self, id: ObjectId, handler: HandlerId) -> SyncResult<bool> {
        let Some((category, now_empty)) = self.registry.lookup_mut(id)?.handlers.remove(handler)
        else {
            return Ok(false);
        };
        if let (true, Some(kind)) = (now_empty, category.handler_kind()) {
            self.emit(
                id,
                vec![
                    Field::new(ServerToClientModel::TypeRemoveHandler, id),
                    Field::new(ServerToClientModel::HandlerType, kind.as_u8() as i64),
                ],
            )?;
        }
        Ok(true)
    }

    /// Server-side only; the remote function pushes native payloads regardless.
    pub fn add_native_handler(&mut self, id: ObjectId, handler: Handler) -> SyncResult<HandlerId> {
        let handler_id = self.next_handler_id();
        self.registry
            .lookup_mut(id)?
            .handlers
            .insert(EventCategory::Native, handler_id, handler);
        Ok(handler_id)
    }

    /// One-time binding to a function defined by the remote runtime.
    pub fn bind_native(&mut self, id: ObjectId, function: impl Into<String>) -> SyncResult<()> {
        let function = function.into();
        let entry = self.registry.lookup_mut(id)?;
        if let Some(existing) = &entry.native_binding {
            return Err(IllegalState::AlreadyBound {
                object: id,
                function: existing.clone(),
            }
            .into());
        }
        entry.native_binding = Some(function.clone());
        self.emit(
            id,
            vec![
                Field::new(ServerToClientModel::TypeUpdate, id),
                Field::new(ServerToClientModel::Bind, function),
            ],
        )
    }

    pub fn send_to_native(&mut self, id: ObjectId, payload: serde_json::Value) -> SyncResult<()> {
        if self.registry.lookup(id)?.native_binding.is_none() {
            return Err(IllegalState::NotBound(id).into());
        }
        self.emit(
            id,
            vec![
                Field::new(ServerToClientModel::TypeUpdate, id),
                Field::new(ServerToClientModel::Native, payload),
            ],
        )
    }

    pub fn lifecycle(&self, id: ObjectId) -> Lifecycle {
        match self.registry.resolve(id) {
            Some(entry) => entry.lifecycle,
            None => Lifecycle::Removed,
        }
    }

    pub fn object(&self, id: ObjectId) -> SyncResult<&ObjectEntry> {
        self.registry.lookup(id)
    }

    pub fn state<T: Any + Send>(&self, id: ObjectId) -> SyncResult<&T> {
        self.registry
            .lookup(id)?
            .state
            .as_ref()
            .and_then(|state| state.downcast_ref::<T>())
            .ok_or_else(|| state_mismatch::<T>(id))
    }

    pub fn state_mut<T: Any + Send>(&mut self, id: ObjectId) -> SyncResult<&mut T> {
        self.registry
            .lookup_mut(id)?
            .state
            .as_mut()
            .and_then(|state| state.downcast_mut::<T>())
            .ok_or_else(|| state_mismatch::<T>(id))
    }
}

fn state_mismatch<T>(id: ObjectId) -> SyncError {
    IllegalState::StateMismatch {
        object: id,
        expected: type_name::<T>(),
    }
    .into()
}

/// Identity and window affinity shared by every widget handle.
pub trait UiObject {
    fn id(&self) -> ObjectId;

    fn attach(&self, cx: &mut UiContext, window: WindowId) -> SyncResult<bool> {
        cx.attach(self.id(), window)
    }

    fn window(&self, cx: &UiContext) -> Option<WindowId> {
        cx.object(self.id()).ok().and_then(ObjectEntry::window)
    }

    fn lifecycle(&self, cx: &UiContext) -> Lifecycle {
        cx.lifecycle(self.id())
    }
}

/// Objects whose properties can be updated.
pub trait Mutable: UiObject {
    fn update(
        &self,
        cx: &mut UiContext,
        model: ServerToClientModel,
        value: impl Into<Value>,
    ) -> SyncResult<()>
    where
        Self: Sized,
    {
        cx.update(self.id(), model, value)
    }

    fn update_pair(&self, cx: &mut UiContext, first: Field, second: Field) -> SyncResult<()> {
        cx.update_pair(self.id(), first, second)
    }
}

/// Objects that accept typed event handlers.
pub trait HandlerRegistrant: UiObject {
    fn add_handler(
        &self,
        cx: &mut UiContext,
        kind: HandlerKind,
        handler: Handler,
    ) -> SyncResult<HandlerId> {
        cx.add_handler(self.id(), kind, handler)
    }

    fn remove_handler(&self, cx: &mut UiContext, handler: HandlerId) -> SyncResult<bool> {
        cx.remove_handler(self.id(), handler)
    }
}

/// Objects that can exchange opaque payloads with a remote function.
pub trait NativeBindable: UiObject {
    fn bind_native(&self, cx: &mut UiContext, function: &str) -> SyncResult<()> {
        cx.bind_native(self.id(), function)
    }

    fn send_to_native(&self, cx: &mut UiContext, payload: serde_json::Value) -> SyncResult<()> {
        cx.send_to_native(self.id(), payload)
    }

    fn add_native_handler(&self, cx: &mut UiContext, handler: Handler) -> SyncResult<HandlerId> {
        cx.add_native_handler(self.id(), handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Operation;
    use uuid::Uuid;

    fn context() -> UiContext {
        UiContext::new(Uuid::new_v4())
    }

    fn operations(cx: &mut UiContext) -> Vec<(Operation, u32)> {
        cx.take_transaction()
            .instructions()
            .iter()
            .map(|i| (i.operation().unwrap(), i.target().unwrap().get()))
            .collect()
    }

    #[test_timeout::timeout]
    fn attach_emits_create_once() {
        let mut cx = context();
        let id = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        assert_eq!(cx.lifecycle(id), Lifecycle::Unattached);

        assert!(cx.attach(id, WindowId::MAIN).unwrap());
        assert!(!cx.attach(id, WindowId::MAIN).unwrap());
        assert_eq!(cx.lifecycle(id), Lifecycle::Initialized);
        assert_eq!(operations(&mut cx), vec![(Operation::Create, 1)]);
    }

    #[test_timeout::timeout]
    fn attaching_to_another_window_fails() {
        let mut cx = context();
        let other = cx.open_window();
        let id = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.attach(id, WindowId::MAIN).unwrap();
        cx.take_transaction();

        let err = cx.attach(id, other).unwrap_err();
        assert_eq!(
            err,
            SyncError::IllegalState(IllegalState::WindowMismatch {
                object: id,
                current: WindowId::MAIN,
                requested: other,
            })
        );
        assert!(cx.transaction().is_empty());
    }

    #[test_timeout::timeout]
    fn attaching_to_unopened_window_fails() {
        let mut cx = context();
        let id = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        let err = cx.attach(id, WindowId::new(9)).unwrap_err();
        assert_eq!(
            err,
            SyncError::IllegalState(IllegalState::UnknownWindow(WindowId::new(9)))
        );
        assert_eq!(cx.lifecycle(id), Lifecycle::Unattached);
    }

    #[test_timeout::timeout]
    fn create_carries_kind_and_init_fields() {
        let mut cx = context();
        let id = cx
            .create(ObjectSpec::new(WidgetKind::Label).with_field(ServerToClientModel::Text, "hi"))
            .unwrap();
        cx.attach(id, WindowId::MAIN).unwrap();
        let txn = cx.take_transaction();
        let create = &txn.instructions()[0];
        let tags: Vec<_> = create.fields().iter().map(|f| f.model).collect();
        assert_eq!(
            tags,
            vec![
                ServerToClientModel::TypeCreate,
                ServerToClientModel::WidgetType,
                ServerToClientModel::Text
            ]
        );
        assert_eq!(
            create.get(ServerToClientModel::WidgetType),
            Some(&Value::Int(WidgetKind::Label.as_u8() as i64))
        );
    }

    #[test_timeout::timeout]
    fn updates_before_attach_follow_create() {
        let mut cx = context();
        let id = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.update(id, ServerToClientModel::Text, "a").unwrap();
        cx.bind_native(id, "chart").unwrap();
        assert!(cx.transaction().is_empty());

        cx.attach(id, WindowId::MAIN).unwrap();
        assert_eq!(
            operations(&mut cx),
            vec![
                (Operation::Create, 1),
                (Operation::Update, 1),
                (Operation::Bind, 1)
            ]
        );
    }

    #[test_timeout::timeout]
    fn double_bind_is_illegal_and_send_requires_bind() {
        let mut cx = context();
        let id = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.attach(id, WindowId::MAIN).unwrap();

        assert_eq!(
            cx.send_to_native(id, serde_json::json!({})).unwrap_err(),
            SyncError::IllegalState(IllegalState::NotBound(id))
        );
        cx.bind_native(id, "chart").unwrap();
        assert_eq!(
            cx.bind_native(id, "other").unwrap_err(),
            SyncError::IllegalState(IllegalState::AlreadyBound {
                object: id,
                function: "chart".into()
            })
        );
        cx.send_to_native(id, serde_json::json!({"points": [1, 2]}))
            .unwrap();
        assert_eq!(
            operations(&mut cx),
            vec![
                (Operation::Create, 1),
                (Operation::Bind, 1),
                (Operation::NativeData, 1)
            ]
        );
    }

    #[test_timeout::timeout]
    fn handler_interest_is_announced_once_per_kind() {
        let mut cx = context();
        let id = cx.create(ObjectSpec::new(WidgetKind::TabLayoutPanel)).unwrap();
        cx.attach(id, WindowId::MAIN).unwrap();
        cx.take_transaction();

        let a = cx
            .add_handler(id, HandlerKind::Selection, Box::new(|_, _| Ok(())))
            .unwrap();
        let b = cx
            .add_handler(id, HandlerKind::Selection, Box::new(|_, _| Ok(())))
            .unwrap();
        assert_eq!(operations(&mut cx), vec![(Operation::AddHandler, 1)]);

        assert!(cx.remove_handler(id, a).unwrap());
        assert!(cx.transaction().is_empty());
        assert!(cx.remove_handler(id, b).unwrap());
        assert!(!cx.remove_handler(id, b).unwrap());
        let txn = cx.take_transaction();
        assert_eq!(txn.len(), 1);
        assert_eq!(
            txn.instructions()[0].operation(),
            Some(Operation::RemoveHandler)
        );
        assert_eq!(
            txn.instructions()[0].get(ServerToClientModel::HandlerType),
            Some(&Value::Int(HandlerKind::Selection.as_u8() as i64))
        );
    }

    #[test_timeout::timeout]
    fn removal_is_terminal() {
        let mut cx = context();
        let parent = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let child = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.attach(parent, WindowId::MAIN).unwrap();
        cx.add_child(parent, child, Vec::new()).unwrap();
        cx.update(child, ServerToClientModel::Text, "x").unwrap();
        cx.remove(child).unwrap();

        assert_eq!(
            operations(&mut cx),
            vec![
                (Operation::Create, 1),
                (Operation::Create, 2),
                (Operation::Add, 2),
                (Operation::Update, 2),
                (Operation::Remove, 2)
            ]
        );
        assert_eq!(cx.lifecycle(child), Lifecycle::Removed);
        assert_eq!(
            cx.update(child, ServerToClientModel::Text, "y").unwrap_err(),
            SyncError::IllegalState(IllegalState::Removed(child))
        );
        assert!(cx.transaction().is_empty());
        assert!(cx.object(parent).unwrap().children().is_empty());
    }

    #[test_timeout::timeout]
    fn removing_a_container_purges_its_subtree() {
        let mut cx = context();
        let root = cx.root(WindowId::MAIN).unwrap();
        let panel = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let leaf = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.add_child(panel, leaf, Vec::new()).unwrap();
        cx.add_child(root, panel, Vec::new()).unwrap();
        cx.take_transaction();

        cx.remove(panel).unwrap();
        let txn = cx.take_transaction();
        assert_eq!(txn.len(), 1);
        assert_eq!(txn.instructions()[0].target(), Some(panel));
        assert_eq!(txn.instructions()[0].parent(), Some(root));
        assert_eq!(cx.lifecycle(leaf), Lifecycle::Removed);
    }

    #[test_timeout::timeout]
    fn adoption_into_unattached_parent_waits_for_parent() {
        let mut cx = context();
        let panel = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let leaf = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.add_child(panel, leaf, Vec::new()).unwrap();
        assert!(cx.transaction().is_empty());

        cx.attach(panel, WindowId::MAIN).unwrap();
        assert_eq!(
            operations(&mut cx),
            vec![
                (Operation::Create, panel.get()),
                (Operation::Create, leaf.get()),
                (Operation::Add, leaf.get())
            ]
        );
        assert_eq!(cx.object(leaf).unwrap().window(), Some(WindowId::MAIN));
    }

    #[test_timeout::timeout]
    fn removing_before_parent_attached_emits_nothing() {
        let mut cx = context();
        let panel = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let leaf = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.add_child(panel, leaf, Vec::new()).unwrap();
        cx.remove(leaf).unwrap();
        cx.attach(panel, WindowId::MAIN).unwrap();
        assert_eq!(operations(&mut cx), vec![(Operation::Create, panel.get())]);
    }

    #[test_timeout::timeout]
    fn adoption_rules() {
        let mut cx = context();
        let a = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let b = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let leaf = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();

        assert_eq!(
            cx.add_child(a, a, Vec::new()).unwrap_err(),
            SyncError::IllegalState(IllegalState::SelfAdoption(a))
        );
        cx.add_child(a, leaf, Vec::new()).unwrap();
        assert_eq!(
            cx.add_child(b, leaf, Vec::new()).unwrap_err(),
            SyncError::IllegalState(IllegalState::AlreadyAdopted {
                child: leaf,
                parent: a
            })
        );
        assert_eq!(
            cx.remove(b).unwrap_err(),
            SyncError::IllegalState(IllegalState::Orphan(b))
        );
    }

    #[test_timeout::timeout]
    fn child_of_other_window_cannot_be_added() {
        let mut cx = context();
        let popup = cx.open_window();
        let panel = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let leaf = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.attach(panel, WindowId::MAIN).unwrap();
        cx.attach(leaf, popup).unwrap();

        let err = cx.add_child(panel, leaf, Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::IllegalState(IllegalState::WindowMismatch { .. })
        ));
        assert_eq!(cx.object(leaf).unwrap().parent(), None);
    }

    #[test_timeout::timeout]
    fn typed_state_round_trips() {
        #[derive(Debug, PartialEq)]
        struct Counter(u32);

        let mut cx = context();
        let id = cx
            .create(ObjectSpec::new(WidgetKind::Label).with_state(Counter(1)))
            .unwrap();
        cx.state_mut::<Counter>(id).unwrap().0 += 1;
        assert_eq!(cx.state::<Counter>(id).unwrap(), &Counter(2));
        assert!(matches!(
            cx.state::<String>(id).unwrap_err(),
            SyncError::IllegalState(IllegalState::StateMismatch { .. })
        ));
    }

    #[test_timeout::timeout]
    fn attach_blocked_by_a_queued_child_changes_nothing() {
        let mut cx = context();
        let popup = cx.open_window();
        let panel = cx.create(ObjectSpec::new(WidgetKind::HorizontalPanel)).unwrap();
        let leaf = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.add_child(panel, leaf, Vec::new()).unwrap();
        cx.attach(leaf, popup).unwrap();
        cx.update(panel, ServerToClientModel::Text, "queued").unwrap();
        cx.take_transaction();

        let err = cx.attach(panel, WindowId::MAIN).unwrap_err();
        assert!(matches!(
            err,
            SyncError::IllegalState(IllegalState::WindowMismatch { object, .. }) if object == leaf
        ));
        assert_eq!(cx.lifecycle(panel), Lifecycle::Unattached);
        assert_eq!(cx.object(panel).unwrap().window(), None);
        assert!(cx.transaction().is_empty());

        // The adoption never reached the remote side, so neither does its removal.
        cx.remove(leaf).unwrap();
        assert!(cx.transaction().is_empty());

        assert!(cx.attach(panel, WindowId::MAIN).unwrap());
        let txn = cx.take_transaction();
        assert_eq!(txn.len(), 2);
        assert_eq!(txn.instructions()[0].operation(), Some(Operation::Create));
        assert_eq!(
            txn.instructions()[1].get(ServerToClientModel::Text),
            Some(&Value::Str("queued".into()))
        );
    }

    #[test_timeout::timeout]
    fn companions_are_purged_with_their_owner() {
        let mut cx = context();
        let panel = cx.create(ObjectSpec::new(WidgetKind::TabLayoutPanel)).unwrap();
        let body = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        let header = cx.create(ObjectSpec::new(WidgetKind::Label)).unwrap();
        cx.attach(panel, WindowId::MAIN).unwrap();
        cx.attach_alongside(panel, body, header).unwrap();
        cx.add_child(panel, body, Vec::new()).unwrap();
        assert_eq!(cx.lifecycle(header), Lifecycle::Initialized);

        assert!(matches!(
            cx.add_child(panel, header, Vec::new()),
            Err(SyncError::IllegalState(IllegalState::AlreadyAdopted { .. }))
        ));
        cx.remove(body).unwrap();
        assert!(!cx.registry().contains(header));
        assert!(cx.registry().was_removed(header));
    }
}
