use sandcastle_core::{
    Mutable, NativeBindable, ObjectId, ObjectSpec, ServerToClientModel, SyncResult, UiContext,
    UiObject, WidgetKind,
};

struct LabelState {
    text: String,
}

/// Text leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    id: ObjectId,
}

impl Label {
    /// The initial text travels inside the CREATE instruction.
    pub fn new(cx: &mut UiContext, text: impl Into<String>) -> SyncResult<Self> {
        let text = text.into();
        let id = cx.create(
            ObjectSpec::new(WidgetKind::Label)
                .with_field(ServerToClientModel::Text, text.as_str())
                .with_state(LabelState { text }),
        )?;
        Ok(Self { id })
    }

    pub fn text<'a>(&self, cx: &'a UiContext) -> SyncResult<&'a str> {
        Ok(cx.state::<LabelState>(self.id)?.text.as_str())
    }

    /// Emits an UPDATE only when the text actually changes.
    pub fn set_text(&self, cx: &mut UiContext, text: impl Into<String>) -> SyncResult<()> {
        let text = text.into();
        let state = cx.state_mut::<LabelState>(self.id)?;
        if state.text == text {
            return Ok(());
        }
        state.text = text.clone();
        self.update(cx, ServerToClientModel::Text, text)
    }
}

impl UiObject for Label {
    fn id(&self) -> ObjectId {
        self.id
    }
}

impl Mutable for Label {}

impl NativeBindable for Label {}
