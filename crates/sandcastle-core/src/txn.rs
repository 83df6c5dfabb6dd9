use std::mem;

use crate::encoder::{Instruction, InstructionEncoder};

/// Instructions produced during one processing cycle of a session, in append
/// order. The session commits it as a single frame.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Transaction {
    instructions: Vec<Instruction>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new instruction frame.
    pub fn begin_object(&mut self) -> InstructionEncoder<'_> {
        InstructionEncoder::begin_object(self)
    }

    pub(crate) fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Moves the accumulated instructions out, leaving the buffer empty.
    pub fn take(&mut self) -> Transaction {
        Transaction {
            instructions: mem::take(&mut self.instructions),
        }
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }
}
