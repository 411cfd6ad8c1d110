//! Ordered binary records.
//!
//! A [`Message`] is a sequence of typed fields with no keys. A producer appends
//! fields with the `put_*` methods and a consumer drains them with the matching
//! `get_*` methods, in the same order and with the same kinds.
//!
//! # Overview
//!
//! Fields are held as tagged variants alongside an explicit read cursor. Reading
//! a field of the wrong kind fails with [`MessageError::KindMismatch`] and leaves
//! the cursor where it was, so a consumer that disagrees with its producer about
//! the shape of a message gets a descriptive error instead of misread bytes.
//!
//! # Binary Format
//!
//! A message body is the concatenation of its encoded fields. Each field is:
//!
//! - a one byte kind tag,
//! - the payload. Fixed-width primitives are written at their natural width,
//!   big-endian. Nullable kinds (string, timestamp, string list, string array)
//!   start with a presence byte, `0` for null and `1` for present, and a null
//!   value carries no further bytes.
//! - strings are a u64 big-endian byte length followed by UTF-8 bytes; string
//!   sequences are a u64 count followed by that many strings; timestamps are an
//!   i64 count of milliseconds since the Unix epoch.
//!
//! Declared string lengths and sequence counts are checked against the bytes
//! left in the body before anything is allocated, so a malformed length field
//! cannot request more memory than its frame carried.
//!
//! # Example
//! ```rust
//! use courier::Message;
//!
//! let mut request = Message::new();
//! request.put_int(7).put_string(Some("hello"));
//!
//! let mut decoded = Message::decode(&request.encode().unwrap()).unwrap();
//! assert_eq!(decoded.get_int().unwrap(), 7);
//! assert_eq!(decoded.get_string().unwrap().as_deref(), Some("hello"));
//! ```
mod field;

use bincode::{
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice_with_context, encode_into_std_write,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

use field::{BodyBound, Field};
pub use field::FieldKind;

type WireConfig = Configuration<BigEndian, Fixint>;

fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("field {position}: expected {expected}, found {found}")]
    KindMismatch {
        position: usize,
        expected: FieldKind,
        found: FieldKind,
    },
    #[error("field {position}: expected {expected}, but the message has no more fields")]
    Exhausted { position: usize, expected: FieldKind },
    #[error("timestamp {0}ms is out of range")]
    InvalidTimestamp(i64),
    #[error("failed to encode message: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// An ordered, typed record written and read strictly in matching sequence.
#[derive(Debug, Clone, Default)]
pub struct Message {
    fields: Vec<Field>,
    cursor: usize,
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields in the message.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields not yet read.
    pub fn remaining(&self) -> usize {
        self.fields.len() - self.cursor
    }

    /// Moves the read cursor back to the first field.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Kinds of every field, in order.
    pub fn kinds(&self) -> impl Iterator<Item = FieldKind> + '_ {
        self.fields.iter().map(Field::kind)
    }

    fn put(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put(Field::Bool(value))
    }

    pub fn put_byte(&mut self, value: i8) -> &mut Self {
        self.put(Field::Byte(value))
    }

    pub fn put_short(&mut self, value: i16) -> &mut Self {
        self.put(Field::Short(value))
    }

    pub fn put_int(&mut self, value: i32) -> &mut Self {
        self.put(Field::Int(value))
    }

    pub fn put_long(&mut self, value: i64) -> &mut Self {
        self.put(Field::Long(value))
    }

    pub fn put_float(&mut self, value: f32) -> &mut Self {
        self.put(Field::Float(value))
    }

    pub fn put_double(&mut self, value: f64) -> &mut Self {
        self.put(Field::Double(value))
    }

    pub fn put_string(&mut self, value: Option<&str>) -> &mut Self {
        self.put(Field::String(value.map(str::to_owned)))
    }

    /// Appends a timestamp. Precision below one millisecond is dropped.
    pub fn put_timestamp(&mut self, value: Option<DateTime<Utc>>) -> &mut Self {
        self.put(Field::Timestamp(value.map(|t| t.timestamp_millis())))
    }

    pub fn put_string_list(&mut self, value: Option<Vec<String>>) -> &mut Self {
        self.put(Field::StringList(value))
    }

    pub fn put_string_array(&mut self, value: Option<&[&str]>) -> &mut Self {
        self.put(Field::StringArray(value.map(|values| {
            values.iter().map(|s| s.to_string()).collect()
        })))
    }

    /// Reads the field under the cursor, advancing only when `extract` accepts it.
    fn take<T>(
        &mut self,
        expected: FieldKind,
        extract: impl FnOnce(&Field) -> Option<T>,
    ) -> Result<T, MessageError> {
        let position = self.cursor;
        let field = self
            .fields
            .get(position)
            .ok_or(MessageError::Exhausted { position, expected })?;

        let value = extract(field).ok_or_else(|| MessageError::KindMismatch {
            position,
            expected,
            found: field.kind(),
        })?;

        self.cursor += 1;
        Ok(value)
    }

    pub fn get_bool(&mut self) -> Result<bool, MessageError> {
        self.take(FieldKind::Bool, |f| match f {
            Field::Bool(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_byte(&mut self) -> Result<i8, MessageError> {
        self.take(FieldKind::Byte, |f| match f {
            Field::Byte(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_short(&mut self) -> Result<i16, MessageError> {
        self.take(FieldKind::Short, |f| match f {
            Field::Short(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_int(&mut self) -> Result<i32, MessageError> {
        self.take(FieldKind::Int, |f| match f {
            Field::Int(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_long(&mut self) -> Result<i64, MessageError> {
        self.take(FieldKind::Long, |f| match f {
            Field::Long(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_float(&mut self) -> Result<f32, MessageError> {
        self.take(FieldKind::Float, |f| match f {
            Field::Float(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_double(&mut self) -> Result<f64, MessageError> {
        self.take(FieldKind::Double, |f| match f {
            Field::Double(v) => Some(*v),
            _ => None,
        })
    }

    pub fn get_string(&mut self) -> Result<Option<String>, MessageError> {
        self.take(FieldKind::String, |f| match f {
            Field::String(v) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn get_timestamp(&mut self) -> Result<Option<DateTime<Utc>>, MessageError> {
        let millis = self.take(FieldKind::Timestamp, |f| match f {
            Field::Timestamp(v) => Some(*v),
            _ => None,
        })?;

        millis
            .map(|ms| {
                DateTime::<Utc>::from_timestamp_millis(ms).ok_or(MessageError::InvalidTimestamp(ms))
            })
            .transpose()
    }

    pub fn get_string_list(&mut self) -> Result<Option<Vec<String>>, MessageError> {
        self.take(FieldKind::StringList, |f| match f {
            Field::StringList(v) => Some(v.clone()),
            _ => None,
        })
    }

    pub fn get_string_array(&mut self) -> Result<Option<Box<[String]>>, MessageError> {
        self.take(FieldKind::StringArray, |f| match f {
            Field::StringArray(v) => Some(v.clone().map(Vec::into_boxed_slice)),
            _ => None,
        })
    }

    /// Encodes every field, ignoring the read cursor.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let config = wire_config();
        let mut out = Vec::new();
        for field in &self.fields {
            encode_into_std_write(field, &mut out, config)?;
        }
        Ok(out)
    }

    /// Rebuilds a message from an encoded body. The result reads from its first field.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        let config = wire_config();
        let mut fields = Vec::new();
        let mut offset = 0;

        while offset < bytes.len() {
            let rest = &bytes[offset..];
            let bound = BodyBound {
                remaining: rest.len(),
            };
            let (field, read): (Field, usize) =
                decode_from_slice_with_context(rest, config, bound)?;
            if let Field::Timestamp(Some(ms)) = field {
                if DateTime::<Utc>::from_timestamp_millis(ms).is_none() {
                    return Err(MessageError::InvalidTimestamp(ms));
                }
            }
            offset += read;
            fields.push(field);
        }

        Ok(Self { fields, cursor: 0 })
    }
}
