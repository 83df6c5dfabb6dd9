use sandcastle_core::{
    Field, IllegalState, Mutable, NativeBindable, ObjectId, ObjectSpec, ServerToClientModel,
    SyncResult, UiContext, UiObject, WidgetKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HorizontalAlignment {
    #[default]
    Left,
    Center,
    Right,
}

impl HorizontalAlignment {
    pub fn code(self) -> i64 {
        match self {
            HorizontalAlignment::Left => 0,
            HorizontalAlignment::Center => 1,
            HorizontalAlignment::Right => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerticalAlignment {
    #[default]
    Top,
    Middle,
    Bottom,
}

impl VerticalAlignment {
    pub fn code(self) -> i64 {
        match self {
            VerticalAlignment::Top => 0,
            VerticalAlignment::Middle => 1,
            VerticalAlignment::Bottom => 2,
        }
    }
}

#[derive(Default)]
struct PanelState {
    children: Vec<ObjectId>,
    horizontal: HorizontalAlignment,
    vertical: VerticalAlignment,
}

/// Lays children out in a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HorizontalPanel {
    id: ObjectId,
}

impl HorizontalPanel {
    pub fn new(cx: &mut UiContext) -> SyncResult<Self> {
        let id = cx.create(
            ObjectSpec::new(WidgetKind::HorizontalPanel).with_state(PanelState::default()),
        )?;
        Ok(Self { id })
    }

    pub fn add(&self, cx: &mut UiContext, child: &impl UiObject) -> SyncResult<()> {
        let index = self.widget_count(cx)?;
        cx.add_child(self.id, child.id(), Vec::new())?;
        self.state_mut(cx)?.children.insert(index, child.id());
        Ok(())
    }

    pub fn insert(
        &self,
        cx: &mut UiContext,
        child: &impl UiObject,
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
        cx.add_child(
            self.id,
            child.id(),
            vec![Field::new(ServerToClientModel::BeforeIndex, before_index)],
        )?;
        self.state_mut(cx)?.children.insert(before_index, child.id());
        Ok(())
    }

    /// Returns `false` if `child` is not in this panel.
    pub fn remove(&self, cx: &mut UiContext, child: &impl UiObject) -> SyncResult<bool> {
        let child = child.id();
        if !self.children(cx)?.contains(&child) {
            return Ok(false);
        }
        cx.remove(child)?;
        self.state_mut(cx)?.children.retain(|id| *id != child);
        Ok(true)
    }

    pub fn widget_count(&self, cx: &mut UiContext) -> SyncResult<usize> {
        Ok(self.children(cx)?.len())
    }

    pub fn widget(&self, cx: &mut UiContext, index: usize) -> SyncResult<Option<ObjectId>> {
        Ok(self.children(cx)?.get(index).copied())
    }

    pub fn horizontal_alignment(&self, cx: &UiContext) -> SyncResult<HorizontalAlignment> {
        Ok(cx.state::<PanelState>(self.id)?.horizontal)
    }

    pub fn vertical_alignment(&self, cx: &UiContext) -> SyncResult<VerticalAlignment> {
        Ok(cx.state::<PanelState>(self.id)?.vertical)
    }

    pub fn set_horizontal_alignment(
        &self,
        cx: &mut UiContext,
        alignment: HorizontalAlignment,
    ) -> SyncResult<()> {
        let state = self.state_mut(cx)?;
        if state.horizontal == alignment {
            return Ok(());
        }
        state.horizontal = alignment;
        self.update(cx, ServerToClientModel::HorizontalAlignment, alignment.code())
    }

    pub fn set_vertical_alignment(
        &self,
        cx: &mut UiContext,
        alignment: VerticalAlignment,
    ) -> SyncResult<()> {
        let state = self.state_mut(cx)?;
        if state.vertical == alignment {
            return Ok(());
        }
        state.vertical = alignment;
        self.update(cx, ServerToClientModel::VerticalAlignment, alignment.code())
    }

    /// Sets both axes, using one two-field UPDATE when both change.
    pub fn set_alignment(
        &self,
        cx: &mut UiContext,
        horizontal: HorizontalAlignment,
        vertical: VerticalAlignment,
    ) -> SyncResult<()> {
        let state = self.state_mut(cx)?;
        match (state.horizontal != horizontal, state.vertical != vertical) {
            (true, true) => {
                state.horizontal = horizontal;
                state.vertical = vertical;
                self.update_pair(
                    cx,
                    Field::new(ServerToClientModel::HorizontalAlignment, horizontal.code()),
                    Field::new(ServerToClientModel::VerticalAlignment, vertical.code()),
                )
            }
            (true, false) => self.set_horizontal_alignment(cx, horizontal),
            (false, true) => self.set_vertical_alignment(cx, vertical),
            (false, false) => Ok(()),
        }
    }

    /// Children in display order, without those removed behind the panel's back.
    fn children(&self, cx: &mut UiContext) -> SyncResult<Vec<ObjectId>> {
        let members = cx.object(self.id)?.children().to_vec();
        let state = self.state_mut(cx)?;
        state.children.retain(|id| members.contains(id));
        Ok(state.children.clone())
    }

    fn state_mut<'a>(&self, cx: &'a mut UiContext) -> SyncResult<&'a mut PanelState> {
        cx.state_mut::<PanelState>(self.id)
    }
}

impl UiObject for HorizontalPanel {
    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Mutable for HorizontalPanel {}

impl NativeBindable for HorizontalPanel {}
