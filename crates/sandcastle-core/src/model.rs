//! Closed tag vocabularies shared verbatim with the remote terminal.
//!
//! The numeric value of every tag is part of the wire contract. Tags are never
//! renumbered or recycled for a different meaning; new tags take fresh values.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Session-unique, monotonically assigned object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(NonZeroU32);

impl ObjectId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A logical top-level frame inside one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(u32);

impl WindowId {
    /// Instructions for the main window never carry a `WINDOW_ID` field.
    pub const MAIN: WindowId = WindowId(0);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            f.write_str("main")
        } else {
            write!(f, "w{}", self.0)
        }
    }
}

/// Server-to-client field tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerToClientModel {
    TypeCreate = 0,
    TypeAdd = 1,
    TypeRemove = 2,
    TypeUpdate = 3,
    TypeAddHandler = 4,
    TypeRemoveHandler = 5,
    WindowId = 10,
    ObjectId = 11,
    ParentObjectId = 12,
    WidgetType = 13,
    HandlerType = 14,
    Bind = 20,
    Native = 21,
    Text = 30,
    SelectedIndex = 31,
    Animate = 32,
    AnimationDuration = 33,
    Vertical = 34,
    HorizontalAlignment = 35,
    VerticalAlignment = 36,
    TabWidget = 37,
    TabText = 38,
    BeforeIndex = 39,
}

impl ServerToClientModel {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        use ServerToClientModel::*;
        let model = match value {
            0 => TypeCreate,
            1 => TypeAdd,
            2 => TypeRemove,
            3 => TypeUpdate,
            4 => TypeAddHandler,
            5 => TypeRemoveHandler,
            10 => WindowId,
            11 => ObjectId,
            12 => ParentObjectId,
            13 => WidgetType,
            14 => HandlerType,
            20 => Bind,
            21 => Native,
            30 => Text,
            31 => SelectedIndex,
            32 => Animate,
            33 => AnimationDuration,
            34 => Vertical,
            35 => HorizontalAlignment,
            36 => VerticalAlignment,
            37 => TabWidget,
            38 => TabText,
            39 => BeforeIndex,
            _ => return None,
        };
        Some(model)
    }
}

/// Client-to-server envelope keys.
///
/// Inbound envelopes are JSON objects keyed by the decimal form of these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientToServerModel {
    ObjectId = 0,
    WindowId = 1,
    HandlerSelection = 2,
    HandlerBeforeSelection = 3,
    Native = 4,
}

impl ClientToServerModel {
    pub const fn key(self) -> &'static str {
        match self {
            ClientToServerModel::ObjectId => "0",
            ClientToServerModel::WindowId => "1",
            ClientToServerModel::HandlerSelection => "2",
            ClientToServerModel::HandlerBeforeSelection => "3",
            ClientToServerModel::Native => "4",
        }
    }
}

impl fmt::Display for ClientToServerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.key())
    }
}

/// Event categories the remote side can be asked to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HandlerKind {
    Selection = 0,
    BeforeSelection = 1,
}

impl HandlerKind {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(HandlerKind::Selection),
            1 => Some(HandlerKind::BeforeSelection),
            _ => None,
        }
    }
}

/// Type discriminator carried by every CREATE instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WidgetKind {
    RootPanel = 0,
    Label = 1,
    HorizontalPanel = 2,
    TabLayoutPanel = 3,
}

impl WidgetKind {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(WidgetKind::RootPanel),
            1 => Some(WidgetKind::Label),
            2 => Some(WidgetKind::HorizontalPanel),
            3 => Some(WidgetKind::TabLayoutPanel),
            _ => None,
        }
    }
}

/// A typed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Double(f64),
    Json(serde_json::Value),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::Int(value.get().into())
    }
}

impl From<WindowId> for Value {
    fn from(value: WindowId) -> Self {
        Value::Int(value.get().into())
    }
}

/// One `(model-tag, value)` pair of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub model: ServerToClientModel,
    pub value: Value,
}

impl Field {
    pub fn new(model: ServerToClientModel, value: impl Into<Value>) -> Self {
        Self {
            model,
            value: value.into(),
        }
    }
}
