use std::time::Duration;

use sandcastle_core::{
    Field, HandlerId, HandlerKind, HandlerRegistrant, IllegalState, Mutable, NativeBindable,
    ObjectId, ObjectSpec, ServerToClientModel, SyncResult, UiContext, UiObject, WidgetKind,
};
use tracing::trace;

use crate::index_handler;

#[derive(Default)]
struct TabState {
    tabs: Vec<ObjectId>,
    selected: Option<usize>,
    animation_duration: Option<Duration>,
}

/// Stack of children, one visible at a time, switched through tab headers.
///
/// The panel always listens for selection so [`TabLayoutPanel::selected_index`]
/// follows the remote side; application handlers run after the index is
/// updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabLayoutPanel {
    id: ObjectId,
}

enum TabHeader {
    Text(String),
    Widget(ObjectId),
}

impl TabLayoutPanel {
    pub fn new(cx: &mut UiContext) -> SyncResult<Self> {
        let id = cx.create(ObjectSpec::new(WidgetKind::TabLayoutPanel).with_state(TabState::default()))?;
        let panel = Self { id };
        panel.add_handler(
            cx,
            HandlerKind::Selection,
            index_handler(move |cx, index| {
                trace!(object_id = %id, index, "tab selected remotely");
                cx.state_mut::<TabState>(id)?.selected = Some(index);
                Ok(())
            }),
        )?;
        Ok(panel)
    }

    pub fn add(&self, cx: &mut UiContext, child: &impl UiObject, text: &str) -> SyncResult<()> {
        let index = self.widget_count(cx)?;
        self.insert(cx, child, text, index)
    }

    pub fn add_with_tab_widget(
        &self,
        cx: &mut UiContext,
        child: &impl UiObject,
        tab_widget: &impl UiObject,
    ) -> SyncResult<()> {
        let index = self.widget_count(cx)?;
        self.insert_with_tab_widget(cx, child, tab_widget, index)
    }

    pub fn insert(
        &self,
        cx: &mut UiContext,
        child: &impl UiObject,
        text: &str,
        before_index: usize,
    ) -> SyncResult<()> {
        self.insert_tab(cx, child.id(), TabHeader::Text(text.to_string()), before_index)
    }

    pub fn insert_with_tab_widget(
        &self,
        cx: &mut UiContext,
        child: &impl UiObject,
        tab_widget: &impl UiObject,
        before_index: usize,
    ) -> SyncResult<()> {
        self.insert_tab(cx, child.id(), TabHeader::Widget(tab_widget.id()), before_index)
    }

    fn insert_tab(
        &self,
        cx: &mut UiContext,
        child: ObjectId,
        header: TabHeader,
        before_index: usize,
    ) -> SyncResult<()> {
        let len = self.widget_count(cx)?;
        if before_index > len {
            return Err(IllegalState::IndexOutOfBounds {
                object: self.id,
                index: before_index,
                len,
            }
            .into());
        }

        if let Some(parent) = cx.object(child)?.parent() {
            return Err(IllegalState::AlreadyAdopted { child, parent }.into());
        }

        let header = match header {
            TabHeader::Text(text) => Field::new(ServerToClientModel::TabText, text),
            TabHeader::Widget(widget) => {
                cx.attach_alongside(self.id, child, widget)?;
                Field::new(ServerToClientModel::TabWidget, widget)
            }
        };
        cx.add_child(
            self.id,
            child,
            vec![header, Field::new(ServerToClientModel::BeforeIndex, before_index)],
        )?;
        self.state_mut(cx)?.tabs.insert(before_index, child);
        Ok(())
    }

    /// Returns `false` if `child` is not one of this panel's tabs.
    pub fn remove(&self, cx: &mut UiContext, child: &impl UiObject) -> SyncResult<bool> {
        let child = child.id();
        let Some(index) = self.tabs(cx)?.iter().position(|id| *id == child) else {
            return Ok(false);
        };
        cx.remove(child)?;
        let state = self.state_mut(cx)?;
        state.tabs.remove(index);
        state.selected = match state.selected {
            Some(selected) if selected == index => None,
            Some(selected) if selected > index => Some(selected - 1),
            other => other,
        };
        Ok(true)
    }

    pub fn widget_count(&self, cx: &mut UiContext) -> SyncResult<usize> {
        Ok(self.tabs(cx)?.len())
    }

    pub fn widget(&self, cx: &mut UiContext, index: usize) -> SyncResult<Option<ObjectId>> {
        Ok(self.tabs(cx)?.get(index).copied())
    }

    pub fn select_tab(&self, cx: &mut UiContext, index: usize) -> SyncResult<()> {
        let len = self.widget_count(cx)?;
        if index >= len {
            return Err(IllegalState::IndexOutOfBounds {
                object: self.id,
                index,
                len,
            }
            .into());
        }
        self.state_mut(cx)?.selected = Some(index);
        self.update(cx, ServerToClientModel::SelectedIndex, index)
    }

    pub fn selected_index(&self, cx: &UiContext) -> SyncResult<Option<usize>> {
        Ok(cx.state::<TabState>(self.id)?.selected)
    }

    /// Runs the pending layout animation over `duration`.
    pub fn animate(&self, cx: &mut UiContext, duration: Duration) -> SyncResult<()> {
        self.update(cx, ServerToClientModel::Animate, millis(duration))
    }

    pub fn animation_duration(&self, cx: &UiContext) -> SyncResult<Option<Duration>> {
        Ok(cx.state::<TabState>(self.id)?.animation_duration)
    }

    pub fn set_animation_duration(&self, cx: &mut UiContext, duration: Duration) -> SyncResult<()> {
        let state = self.state_mut(cx)?;
        if state.animation_duration == Some(duration) {
            return Ok(());
        }
        state.animation_duration = Some(duration);
        self.update(cx, ServerToClientModel::AnimationDuration, millis(duration))
    }

    pub fn set_animation_vertical(&self, cx: &mut UiContext, vertical: bool) -> SyncResult<()> {
        self.update(cx, ServerToClientModel::Vertical, vertical)
    }

    pub fn add_selection_handler<F>(&self, cx: &mut UiContext, handler: F) -> SyncResult<HandlerId>
    where
        F: FnMut(&mut UiContext, usize) -> SyncResult<()> + Send + 'static,
    {
        self.add_handler(cx, HandlerKind::Selection, index_handler(handler))
    }

    pub fn add_before_selection_handler<F>(
        &self,
        cx: &mut UiContext,
        handler: F,
    ) -> SyncResult<HandlerId>
    where
        F: FnMut(&mut UiContext, usize) -> SyncResult<()> + Send + 'static,
    {
        self.add_handler(cx, HandlerKind::BeforeSelection, index_handler(handler))
    }

    fn tabs(&self, cx: &mut UiContext) -> SyncResult<Vec<ObjectId>> {
        let members = cx.object(self.id)?.children().to_vec();
        let state = self.state_mut(cx)?;
        state.tabs.retain(|id| members.contains(id));
        Ok(state.tabs.clone())
    }

    fn state_mut<'a>(&self, cx: &'a mut UiContext) -> SyncResult<&'a mut TabState> {
        cx.state_mut::<TabState>(self.id)
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl UiObject for TabLayoutPanel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Mutable for TabLayoutPanel {}

impl HandlerRegistrant for TabLayoutPanel {}

impl NativeBindable for TabLayoutPanel {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Label;
    use sandcastle_core::{Operation, SyncError, Value, WindowId};
    use uuid::Uuid;

    fn attached() -> (UiContext, TabLayoutPanel) {
        let mut cx = UiContext::new(Uuid::new_v4());
        let panel = TabLayoutPanel::new(&mut cx).unwrap();
        panel.attach(&mut cx, WindowId::MAIN).unwrap();
        (cx, panel)
    }

    #[test_timeout::timeout]
    fn creation_subscribes_to_selection() {
        let (mut cx, panel) = attached();
        let txn = cx.take_transaction();
        let ops: Vec<_> = txn
            .instructions()
            .iter()
            .map(|i| i.operation().unwrap())
            .collect();
        assert_eq!(ops, vec![Operation::Create, Operation::AddHandler]);
        assert_eq!(txn.instructions()[1].target(), Some(panel.id()));

        panel.add_selection_handler(&mut cx, |_, _| Ok(())).unwrap();
        assert!(cx.transaction().is_empty());
        panel
            .add_before_selection_handler(&mut cx, |_, _| Ok(()))
            .unwrap();
        assert_eq!(cx.take_transaction().len(), 1);
    }

    #[test_timeout::timeout]
    fn insert_with_text_and_tab_widget() {
        let (mut cx, panel) = attached();
        cx.take_transaction();
        let body = Label::new(&mut cx, "body").unwrap();
        let header = Label::new(&mut cx, "header").unwrap();
        panel.add(&mut cx, &body, "Hi").unwrap();

        let other = Label::new(&mut cx, "other").unwrap();
        panel
            .insert_with_tab_widget(&mut cx, &other, &header, 0)
            .unwrap();

        let txn = cx.take_transaction();
        let summary: Vec<_> = txn
            .instructions()
            .iter()
            .map(|i| (i.operation().unwrap(), i.target().unwrap()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Operation::Create, body.id()),
                (Operation::Add, body.id()),
                (Operation::Create, header.id()),
                (Operation::Create, other.id()),
                (Operation::Add, other.id()),
            ]
        );
        let first_add = &txn.instructions()[1];
        assert_eq!(first_add.parent(), Some(panel.id()));
        assert_eq!(
            first_add.get(ServerToClientModel::TabText),
            Some(&Value::Str("Hi".into()))
        );
        assert_eq!(
            first_add.get(ServerToClientModel::BeforeIndex),
            Some(&Value::Int(0))
        );
        assert_eq!(
            txn.instructions()[4].get(ServerToClientModel::TabWidget),
            Some(&Value::from(header.id()))
        );
        assert_eq!(panel.widget(&mut cx, 0).unwrap(), Some(other.id()));
    }

    #[test_timeout::timeout]
    fn select_tab_checks_bounds() {
        let (mut cx, panel) = attached();
        let body = Label::new(&mut cx, "body").unwrap();
        panel.add(&mut cx, &body, "one").unwrap();
        cx.take_transaction();

        assert_eq!(
            panel.select_tab(&mut cx, 1).unwrap_err(),
            SyncError::IllegalState(IllegalState::IndexOutOfBounds {
                object: panel.id(),
                index: 1,
                len: 1
            })
        );
        panel.select_tab(&mut cx, 0).unwrap();
        assert_eq!(panel.selected_index(&cx).unwrap(), Some(0));
        assert_eq!(
            cx.take_transaction().instructions()[0].get(ServerToClientModel::SelectedIndex),
            Some(&Value::Int(0))
        );
    }

    #[test_timeout::timeout]
    fn remote_selection_updates_index_before_user_handlers() {
        let (mut cx, panel) = attached();
        for text in ["a", "b", "c"] {
            let body = Label::new(&mut cx, text).unwrap();
            panel.add(&mut cx, &body, text).unwrap();
        }
        let id = panel.id();
        panel
            .add_selection_handler(&mut cx, move |cx, index| {
                assert_eq!(cx.state::<TabState>(id)?.selected, Some(index));
                Ok(())
            })
            .unwrap();

        cx.dispatch(&format!(r#"{{"0": {}, "2": 2}}"#, id.get()))
            .unwrap();
        assert_eq!(panel.selected_index(&cx).unwrap(), Some(2));
    }

    #[test_timeout::timeout]
    fn animation_duration_is_deduplicated() {
        let (mut cx, panel) = attached();
        cx.take_transaction();
        panel
            .set_animation_duration(&mut cx, Duration::from_millis(300))
            .unwrap();
        panel
            .set_animation_duration(&mut cx, Duration::from_millis(300))
            .unwrap();
        panel.animate(&mut cx, Duration::from_millis(300)).unwrap();
        panel.set_animation_vertical(&mut cx, true).unwrap();

        let txn = cx.take_transaction();
        let tags: Vec<_> = txn
            .instructions()
            .iter()
            .map(|i| i.fields()[1].model)
            .collect();
        assert_eq!(
            tags,
            vec![
                ServerToClientModel::AnimationDuration,
                ServerToClientModel::Animate,
                ServerToClientModel::Vertical
            ]
        );
        assert_eq!(
            panel.animation_duration(&cx).unwrap(),
            Some(Duration::from_millis(300))
        );
    }

    #[test_timeout::timeout]
    fn removing_selected_tab_clears_selection() {
        let (mut cx, panel) = attached();
        let a = Label::new(&mut cx, "a").unwrap();
        let b = Label::new(&mut cx, "b").unwrap();
        panel.add(&mut cx, &a, "a").unwrap();
        panel.add(&mut cx, &b, "b").unwrap();
        panel.select_tab(&mut cx, 1).unwrap();

        assert!(panel.remove(&mut cx, &a).unwrap());
        assert_eq!(panel.selected_index(&cx).unwrap(), Some(0));
        assert!(panel.remove(&mut cx, &b).unwrap());
        assert_eq!(panel.selected_index(&cx).unwrap(), None);
        assert_eq!(panel.widget_count(&mut cx).unwrap(), 0);
    }
}
