//! Instruction encoder: a structured writer with no cross-field validation.
//!
//! Field order is significant to the remote decoder. Call sites write the
//! window tag first (see [`InstructionEncoder::parse_window`]) and the
//! operation tag second.

use crate::model::{Field, ObjectId, ServerToClientModel, Value, WindowId};
use crate::txn::Transaction;

/// Mutation kinds an instruction can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Add,
    Update,
    AddHandler,
    RemoveHandler,
    Remove,
    Bind,
    NativeData,
}

/// One framed, ordered group of fields describing exactly one mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instruction {
    fields: Vec<Field>,
}

impl Instruction {
    pub fn from_fields(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, model: ServerToClientModel) -> Option<&Value> {
        self.fields
            .iter()
            .find(|field| field.model == model)
            .map(|field| &field.value)
    }

    /// Window the instruction is addressed to; absent tag means main window.
    pub fn window(&self) -> WindowId {
        match self.fields.first() {
            Some(Field {
                model: ServerToClientModel::WindowId,
                value: Value::Int(raw),
            }) => WindowId::new(*raw as u32),
            _ => WindowId::MAIN,
        }
    }

    fn body(&self) -> &[Field] {
        match self.fields.first() {
            Some(field) if field.model == ServerToClientModel::WindowId => &self.fields[1..],
            _ => &self.fields,
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        let body = self.body();
        let head = body.first()?;
        let operation = match head.model {
            ServerToClientModel::TypeCreate => Operation::Create,
            ServerToClientModel::TypeAdd => Operation::Add,
            ServerToClientModel::TypeRemove => Operation::Remove,
            ServerToClientModel::TypeAddHandler => Operation::AddHandler,
            ServerToClientModel::TypeRemoveHandler => Operation::RemoveHandler,
            ServerToClientModel::TypeUpdate => match body.get(1).map(|field| field.model) {
                Some(ServerToClientModel::Bind) => Operation::Bind,
                Some(ServerToClientModel::Native) => Operation::NativeData,
                _ => Operation::Update,
            },
            _ => return None,
        };
        Some(operation)
    }

    /// Object the instruction operates on.
    pub fn target(&self) -> Option<ObjectId> {
        let raw = match self.operation()? {
            Operation::AddHandler => self.get(ServerToClientModel::ObjectId)?,
            _ => &self.body().first()?.value,
        };
        raw.as_int()
            .and_then(|raw| u32::try_from(raw).ok())
            .and_then(ObjectId::new)
    }

    /// Parent carried by ADD and REMOVE instructions.
    pub fn parent(&self) -> Option<ObjectId> {
        self.get(ServerToClientModel::ParentObjectId)?
            .as_int()
            .and_then(|raw| u32::try_from(raw).ok())
            .and_then(ObjectId::new)
    }
}

/// An open instruction frame. Dropping it without [`end_object`] discards it.
///
/// [`end_object`]: InstructionEncoder::end_object
pub struct InstructionEncoder<'t> {
    txn: &'t mut Transaction,
    fields: Vec<Field>,
}

impl<'t> InstructionEncoder<'t> {
    pub(crate) fn begin_object(txn: &'t mut Transaction) -> Self {
        Self {
            txn,
            fields: Vec::with_capacity(4),
        }
    }

    /// Appends one typed field in call order.
    pub fn parse(&mut self, model: ServerToClientModel, value: impl Into<Value>) -> &mut Self {
        self.fields.push(Field::new(model, value));
        self
    }

    /// Writes the window tag unless the window is the main window.
    pub fn parse_window(&mut self, window: WindowId) -> &mut Self {
        if !window.is_main() {
            self.parse(ServerToClientModel::WindowId, window);
        }
        self
    }

    pub fn extend(&mut self, fields: impl IntoIterator<Item = Field>) -> &mut Self {
        self.fields.extend(fields);
        self
    }

    /// Closes the frame and appends it to the transaction.
    pub fn end_object(self) {
        let Self { txn, fields } = self;
        txn.push(Instruction::from_fields(fields));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u32) -> ObjectId {
        ObjectId::new(raw).unwrap()
    }

    #[test_timeout::timeout]
    fn fields_keep_call_order() {
        let mut txn = Transaction::new();
        let mut encoder = txn.begin_object();
        encoder
            .parse_window(WindowId::new(2))
            .parse(ServerToClientModel::TypeUpdate, id(5))
            .parse(ServerToClientModel::Text, "hello");
        encoder.end_object();

        let instruction = &txn.instructions()[0];
        let tags: Vec<_> = instruction.fields().iter().map(|f| f.model).collect();
        assert_eq!(
            tags,
            vec![
                ServerToClientModel::WindowId,
                ServerToClientModel::TypeUpdate,
                ServerToClientModel::Text
            ]
        );
        assert_eq!(instruction.window(), WindowId::new(2));
        assert_eq!(instruction.operation(), Some(Operation::Update));
        assert_eq!(instruction.target(), Some(id(5)));
    }

    #[test_timeout::timeout]
    fn main_window_tag_is_omitted() {
        let mut txn = Transaction::new();
        let mut encoder = txn.begin_object();
        encoder
            .parse_window(WindowId::MAIN)
            .parse(ServerToClientModel::TypeRemove, id(2))
            .parse(ServerToClientModel::ParentObjectId, id(1));
        encoder.end_object();

        let instruction = &txn.instructions()[0];
        assert!(instruction.get(ServerToClientModel::WindowId).is_none());
        assert_eq!(instruction.operation(), Some(Operation::Remove));
        assert_eq!(instruction.parent(), Some(id(1)));
    }

    #[test_timeout::timeout]
    fn update_carrying_bind_or_native_is_classified_separately() {
        let bind = Instruction::from_fields(vec![
            Field::new(ServerToClientModel::TypeUpdate, id(3)),
            Field::new(ServerToClientModel::Bind, "chart"),
        ]);
        let native = Instruction::from_fields(vec![
            Field::new(ServerToClientModel::TypeUpdate, id(3)),
            Field::new(ServerToClientModel::Native, serde_json::json!({"x": 1})),
        ]);
        assert_eq!(bind.operation(), Some(Operation::Bind));
        assert_eq!(native.operation(), Some(Operation::NativeData));
    }

    #[test_timeout::timeout]
    fn dropped_frame_is_not_committed() {
        let mut txn = Transaction::new();
        {
            let mut encoder = txn.begin_object();
            encoder.parse(ServerToClientModel::TypeUpdate, id(1));
        }
        assert!(txn.is_empty());
    }
}
