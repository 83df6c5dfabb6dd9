use std::time::Duration;

use sandcastle_core::{SyncResult, UiContext, WindowId};
use sandcastle_widgets::{
    HorizontalAlignment, HorizontalPanel, Label, RootPanel, TabLayoutPanel, VerticalAlignment,
};
use tracing::debug;

/// Entry point run once per websocket session, inside the session scope.
pub trait Application: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Builds the initial tree. The returned push, if any, is ticked by the
    /// connection until the session ends.
    fn start(&self, cx: &mut UiContext) -> SyncResult<Option<Box<dyn Push>>>;
}

/// Server-initiated updates driven by a timer rather than by client events.
pub trait Push: Send + 'static {
    fn interval(&self) -> Duration;

    fn tick(&mut self, cx: &mut UiContext) -> SyncResult<()>;
}

pub struct DemoApplication {
    name: String,
    tick_interval: Duration,
}

impl DemoApplication {
    pub fn new(name: impl Into<String>, tick_interval: Duration) -> Self {
        Self {
            name: name.into(),
            tick_interval,
        }
    }
}

impl Application for DemoApplication {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self, cx: &mut UiContext) -> SyncResult<Option<Box<dyn Push>>> {
        let tabs = TabLayoutPanel::new(cx)?;
        tabs.set_animation_duration(cx, Duration::from_millis(250))?;

        let welcome = Label::new(cx, format!("Welcome to {}", self.name))?;
        tabs.add(cx, &welcome, "Welcome")?;

        let row = HorizontalPanel::new(cx)?;
        for text in ["left", "center", "right"] {
            let cell = Label::new(cx, text)?;
            row.add(cx, &cell)?;
        }
        row.set_alignment(cx, HorizontalAlignment::Center, VerticalAlignment::Middle)?;
        tabs.add(cx, &row, "Layout")?;

        let clock = Label::new(cx, "tick 0")?;
        tabs.add(cx, &clock, "Clock")?;

        let status = Label::new(cx, "Selected tab 0")?;
        tabs.add_selection_handler(cx, move |cx, index| {
            status.set_text(cx, format!("Selected tab {index}"))
        })?;
        tabs.select_tab(cx, 0)?;

        let root = RootPanel::get(cx, WindowId::MAIN)?;
        root.add(cx, &tabs)?;
        root.add(cx, &status)?;
        debug!(session_id = %cx.session_id(), "demo tree built");

        Ok(Some(Box::new(Clock {
            label: clock,
            ticks: 0,
            interval: self.tick_interval,
        })))
    }
}

struct Clock {
    label: Label,
    ticks: u64,
    interval: Duration,
}

impl Push for Clock {
    fn interval(&self) -> Duration {
        self.interval
    }

    fn tick(&mut self, cx: &mut UiContext) -> SyncResult<()> {
        self.ticks += 1;
        self.label.set_text(cx, format!("tick {}", self.ticks))
    }
}
