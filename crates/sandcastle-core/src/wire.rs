//! Outbound frame codecs.
//!
//! One committed transaction becomes one frame. The binary layout is
//! `header, var seq, var count` followed by each instruction as
//! `var field_count` and its fields as `u8 tag, u8 value_type, value`.

use bytes::Bytes;
use serde_json::{json, Value as JsonValue};

use crate::encoder::Instruction;
use crate::model::{Field, ServerToClientModel, Value};

pub const PROTOCOL_VERSION: u8 = 1;

const VERSION_BITS: u8 = 3;
const VERSION_MASK: u8 = 0b1110_0000;
const TYPE_MASK: u8 = 0b0001_1111;

const FRAME_KIND_TRANSACTION: u8 = 0;

const VALUE_INT: u8 = 0;
const VALUE_STR: u8 = 1;
const VALUE_BOOL: u8 = 2;
const VALUE_DOUBLE: u8 = 3;
const VALUE_JSON: u8 = 4;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),
    #[error("unknown model tag: {0}")]
    UnknownTag(u8),
    #[error("unknown value type: {0}")]
    UnknownValueType(u8),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("varint overflow")]
    VarIntOverflow,
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("invalid json frame: {0}")]
    Json(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Binary,
    Json,
}

/// A frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Binary(Bytes),
    Text(String),
}

impl WireFrame {
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Binary(bytes) => bytes.len(),
            WireFrame::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded view of one committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFrame {
    pub seq: u64,
    pub instructions: Vec<Instruction>,
}

pub fn encode_frame(format: WireFormat, seq: u64, instructions: &[Instruction]) -> WireFrame {
    match format {
        WireFormat::Binary => {
            WireFrame::Binary(Bytes::from(encode_transaction_binary(seq, instructions)))
        }
        WireFormat::Json => WireFrame::Text(encode_transaction_json(seq, instructions)),
    }
}

pub fn decode_frame(frame: &WireFrame) -> Result<TransactionFrame, WireError> {
    match frame {
        WireFrame::Binary(bytes) => decode_transaction_binary(bytes),
        WireFrame::Text(text) => decode_transaction_json(text),
    }
}

pub fn encode_transaction_binary(seq: u64, instructions: &[Instruction]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + instructions.len() * 8);
    write_header(&mut buf, FRAME_KIND_TRANSACTION);
    write_var_u64(&mut buf, seq);
    write_var_u64(&mut buf, instructions.len() as u64);
    for instruction in instructions {
        write_var_u64(&mut buf, instruction.len() as u64);
        for field in instruction.fields() {
            buf.push(field.model.as_u8());
            encode_value(&mut buf, &field.value);
        }
    }
    buf
}

pub fn decode_transaction_binary(bytes: &[u8]) -> Result<TransactionFrame, WireError> {
    let mut cursor = Cursor::new(bytes);
    let (kind, _) = read_header(&mut cursor)?;
    if kind != FRAME_KIND_TRANSACTION {
        return Err(WireError::UnknownFrameType(kind));
    }
    let seq = cursor.read_var_u64()?;
    let count = cursor.read_var_u32()? as usize;
    // Every instruction takes at least one byte, so a count larger than the
    // remaining input is corrupt and must not drive the allocation.
    if count > cursor.remaining() {
        return Err(WireError::UnexpectedEof);
    }
    let mut instructions = Vec::with_capacity(count);
    for _ in 0..count {
        let field_count = cursor.read_var_u32()? as usize;
        if field_count > cursor.remaining() {
            return Err(WireError::UnexpectedEof);
        }
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let tag = cursor.read_u8()?;
            let model = ServerToClientModel::from_u8(tag).ok_or(WireError::UnknownTag(tag))?;
            let value = decode_value(&mut cursor)?;
            fields.push(Field { model, value });
        }
        instructions.push(Instruction::from_fields(fields));
    }
    if cursor.remaining() != 0 {
        return Err(WireError::InvalidData("trailing bytes"));
    }
    Ok(TransactionFrame { seq, instructions })
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int(value) => {
            buf.push(VALUE_INT);
            write_var_u64(buf, zigzag_encode(*value));
        }
        Value::Str(value) => {
            buf.push(VALUE_STR);
            write_str(buf, value);
        }
        Value::Bool(value) => {
            buf.push(VALUE_BOOL);
            buf.push(u8::from(*value));
        }
        Value::Double(value) => {
            buf.push(VALUE_DOUBLE);
            buf.extend_from_slice(&value.to_le_bytes());
        }
        Value::Json(value) => {
            buf.push(VALUE_JSON);
            write_str(buf, &value.to_string());
        }
    }
}

fn decode_value(cursor: &mut Cursor<'_>) -> Result<Value, WireError> {
    let value = match cursor.read_u8()? {
        VALUE_INT => Value::Int(zigzag_decode(cursor.read_var_u64()?)),
        VALUE_STR => Value::Str(cursor.read_str()?.to_string()),
        VALUE_BOOL => Value::Bool(cursor.read_bool()?),
        VALUE_DOUBLE => {
            let raw = cursor.read_bytes(8)?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(raw);
            Value::Double(f64::from_le_bytes(bytes))
        }
        VALUE_JSON => {
            let text = cursor.read_str()?;
            Value::Json(
                serde_json::from_str(text).map_err(|_| WireError::InvalidData("invalid json"))?,
            )
        }
        other => return Err(WireError::UnknownValueType(other)),
    };
    Ok(value)
}

pub fn encode_transaction_json(seq: u64, instructions: &[Instruction]) -> String {
    let instructions: Vec<JsonValue> = instructions
        .iter()
        .map(|instruction| {
            JsonValue::Array(
                instruction
                    .fields()
                    .iter()
                    .map(|field| {
                        let (kind, value) = match &field.value {
                            Value::Int(value) => (VALUE_INT, json!(value)),
                            Value::Str(value) => (VALUE_STR, json!(value)),
                            Value::Bool(value) => (VALUE_BOOL, json!(value)),
                            Value::Double(value) => (VALUE_DOUBLE, json_double(*value)),
                            Value::Json(value) => (VALUE_JSON, value.clone()),
                        };
                        json!([field.model.as_u8(), kind, value])
                    })
                    .collect(),
            )
        })
        .collect();
    json!({ "seq": seq, "instructions": instructions }).to_string()
}

pub fn decode_transaction_json(text: &str) -> Result<TransactionFrame, WireError> {
    let root: JsonValue =
        serde_json::from_str(text).map_err(|err| WireError::Json(err.to_string()))?;
    let seq = root
        .get("seq")
        .and_then(JsonValue::as_u64)
        .ok_or(WireError::InvalidData("missing seq"))?;
    let raw_instructions = root
        .get("instructions")
        .and_then(JsonValue::as_array)
        .ok_or(WireError::InvalidData("missing instructions"))?;

    let mut instructions = Vec::with_capacity(raw_instructions.len());
    for raw in raw_instructions {
        let raw_fields = raw
            .as_array()
            .ok_or(WireError::InvalidData("instruction is not an array"))?;
        let mut fields = Vec::with_capacity(raw_fields.len());
        for raw_field in raw_fields {
            fields.push(decode_json_field(raw_field)?);
        }
        instructions.push(Instruction::from_fields(fields));
    }
    Ok(TransactionFrame { seq, instructions })
}

/// JSON numbers cannot carry non-finite doubles; those travel as the
/// JavaScript spellings instead.
fn json_double(value: f64) -> JsonValue {
    if value.is_nan() {
        json!("NaN")
    } else if value.is_infinite() {
        json!(if value > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        json!(value)
    }
}

fn parse_json_double(value: &JsonValue) -> Result<f64, WireError> {
    if let Some(number) = value.as_f64() {
        return Ok(number);
    }
    match value.as_str() {
        Some("NaN") => Ok(f64::NAN),
        Some("Infinity") => Ok(f64::INFINITY),
        Some("-Infinity") => Ok(f64::NEG_INFINITY),
        _ => Err(WireError::InvalidData("expected double")),
    }
}

fn decode_json_field(raw: &JsonValue) -> Result<Field, WireError> {
    let [tag, kind, value] = raw
        .as_array()
        .map(Vec::as_slice)
        .ok_or(WireError::InvalidData("field is not an array"))?
    else {
        return Err(WireError::InvalidData("field is not a triple"));
    };
    let tag = json_u8(tag)?;
    let model = ServerToClientModel::from_u8(tag).ok_or(WireError::UnknownTag(tag))?;
    let value = match json_u8(kind)? {
        VALUE_INT => Value::Int(
            value
                .as_i64()
                .ok_or(WireError::InvalidData("expected integer"))?,
        ),
        VALUE_STR => Value::Str(
            value
                .as_str()
                .ok_or(WireError::InvalidData("expected string"))?
                .to_string(),
        ),
        VALUE_BOOL => Value::Bool(
            value
                .as_bool()
                .ok_or(WireError::InvalidData("expected boolean"))?,
        ),
        VALUE_DOUBLE => Value::Double(parse_json_double(value)?),
        VALUE_JSON => Value::Json(value.clone()),
        other => return Err(WireError::UnknownValueType(other)),
    };
    Ok(Field { model, value })
}

fn json_u8(value: &JsonValue) -> Result<u8, WireError> {
    value
        .as_u64()
        .and_then(|raw| u8::try_from(raw).ok())
        .ok_or(WireError::InvalidData("expected small integer"))
}

pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_header(buf: &mut Vec<u8>, kind: u8) {
    let version = PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1);
    buf.push((version << 5) | (kind & TYPE_MASK));
}

fn read_header(cursor: &mut Cursor<'_>) -> Result<(u8, u8), WireError> {
    let byte = cursor.read_u8()?;
    let version = (byte & VERSION_MASK) >> 5;
    let kind = byte & TYPE_MASK;
    if version != (PROTOCOL_VERSION & ((1 << VERSION_BITS) - 1)) {
        return Err(WireError::InvalidVersion(version));
    }
    Ok((kind, version))
}

fn write_str(buf: &mut Vec<u8>, value: &str) {
    write_var_u64(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

fn write_var_u64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, WireError> {
        let value = *self.bytes.get(self.pos).ok_or(WireError::UnexpectedEof)?;
        self.pos += 1;
        Ok(value)
    }

    fn read_var_u64(&mut self) -> Result<u64, WireError> {
        let mut result: u64 = 0;
        let mut shift = 0;
        while shift < 64 {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(WireError::VarIntOverflow)
    }

    fn read_var_u32(&mut self) -> Result<u32, WireError> {
        u32::try_from(self.read_var_u64()?).map_err(|_| WireError::InvalidData("u32 overflow"))
    }

    fn read_bool(&mut self) -> Result<bool, WireError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(WireError::InvalidData("invalid boolean")),
        }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(len).ok_or(WireError::UnexpectedEof)?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(WireError::UnexpectedEof)?;
        self.pos = end;
        Ok(slice)
    }

    fn read_str(&mut self) -> Result<&'a str, WireError> {
        let len = self.read_var_u32()? as usize;
        std::str::from_utf8(self.read_bytes(len)?).map_err(|_| WireError::InvalidData("invalid utf-8"))
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }
}
