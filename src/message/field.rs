use std::fmt;

use bincode::{
    Decode, Encode,
    de::{Decoder, read::Reader},
    enc::Encoder,
    error::{AllowedEnumVariants, DecodeError, EncodeError},
};

/// A single encoded value inside a [`Message`](super::Message).
///
/// On the wire a field is a one byte [`FieldKind`] tag followed by its payload.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Field {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Option<String>),
    /// Milliseconds since the Unix epoch.
    Timestamp(Option<i64>),
    StringList(Option<Vec<String>>),
    StringArray(Option<Vec<String>>),
}

impl Field {
    pub(crate) fn kind(&self) -> FieldKind {
        match self {
            Field::Bool(_) => FieldKind::Bool,
            Field::Byte(_) => FieldKind::Byte,
            Field::Short(_) => FieldKind::Short,
            Field::Int(_) => FieldKind::Int,
            Field::Long(_) => FieldKind::Long,
            Field::Float(_) => FieldKind::Float,
            Field::Double(_) => FieldKind::Double,
            Field::String(_) => FieldKind::String,
            Field::Timestamp(_) => FieldKind::Timestamp,
            Field::StringList(_) => FieldKind::StringList,
            Field::StringArray(_) => FieldKind::StringArray,
        }
    }
}

/// Bytes left in the body being decoded.
///
/// Declared string lengths and sequence counts are checked against it before
/// anything is allocated, so a short body cannot claim a large buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BodyBound {
    pub(crate) remaining: usize,
}

const LENGTH_SIZE: usize = size_of::<u64>();

impl Encode for Field {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.kind().tag().encode(encoder)?;
        match self {
            Field::Bool(v) => v.encode(encoder),
            Field::Byte(v) => v.encode(encoder),
            Field::Short(v) => v.encode(encoder),
            Field::Int(v) => v.encode(encoder),
            Field::Long(v) => v.encode(encoder),
            Field::Float(v) => v.encode(encoder),
            Field::Double(v) => v.encode(encoder),
            Field::String(v) => v.encode(encoder),
            Field::Timestamp(v) => v.encode(encoder),
            Field::StringList(v) | Field::StringArray(v) => v.encode(encoder),
        }
    }
}

impl Decode<BodyBound> for Field {
    fn decode<D: Decoder<Context = BodyBound>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let tag = u8::decode(decoder)?;
        let kind = FieldKind::from_tag(tag).ok_or(DecodeError::UnexpectedVariant {
            type_name: "Field",
            allowed: &AllowedEnumVariants::Range { min: 0, max: 10 },
            found: tag.into(),
        })?;

        let field = match kind {
            FieldKind::Bool => Field::Bool(bool::decode(decoder)?),
            FieldKind::Byte => Field::Byte(i8::decode(decoder)?),
            FieldKind::Short => Field::Short(i16::decode(decoder)?),
            FieldKind::Int => Field::Int(i32::decode(decoder)?),
            FieldKind::Long => Field::Long(i64::decode(decoder)?),
            FieldKind::Float => Field::Float(f32::decode(decoder)?),
            FieldKind::Double => Field::Double(f64::decode(decoder)?),
            FieldKind::Timestamp => Field::Timestamp(Option::<i64>::decode(decoder)?),
            FieldKind::String => Field::String(match present(decoder)? {
                true => Some(decode_string(decoder)?),
                false => None,
            }),
            FieldKind::StringList => Field::StringList(match present(decoder)? {
                true => Some(decode_strings(decoder)?),
                false => None,
            }),
            FieldKind::StringArray => Field::StringArray(match present(decoder)? {
                true => Some(decode_strings(decoder)?),
                false => None,
            }),
        };
        Ok(field)
    }
}

fn present<D: Decoder>(decoder: &mut D) -> Result<bool, DecodeError> {
    match u8::decode(decoder)? {
        0 => Ok(false),
        1 => Ok(true),
        found => Err(DecodeError::UnexpectedVariant {
            type_name: "Option",
            allowed: &AllowedEnumVariants::Range { min: 0, max: 1 },
            found: found.into(),
        }),
    }
}

/// Reads a u64 length whose elements occupy at least `element_size` bytes each.
fn decode_len<D>(decoder: &mut D, element_size: usize) -> Result<usize, DecodeError>
where
    D: Decoder<Context = BodyBound>,
{
    let declared = u64::decode(decoder)?;
    let bound = decoder.context().remaining / element_size;

    match usize::try_from(declared) {
        Ok(len) if len <= bound => Ok(len),
        _ => Err(DecodeError::UnexpectedEnd {
            additional: usize::try_from(declared)
                .unwrap_or(usize::MAX)
                .saturating_sub(bound)
                .saturating_mul(element_size),
        }),
    }
}

fn decode_string<D>(decoder: &mut D) -> Result<String, DecodeError>
where
    D: Decoder<Context = BodyBound>,
{
    let len = decode_len(decoder, 1)?;
    let mut bytes = vec![0; len];
    decoder.reader().read(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| DecodeError::Utf8 {
        inner: e.utf8_error(),
    })
}

fn decode_strings<D>(decoder: &mut D) -> Result<Vec<String>, DecodeError>
where
    D: Decoder<Context = BodyBound>,
{
    let count = decode_len(decoder, LENGTH_SIZE)?;
    let mut strings = Vec::with_capacity(count);
    for _ in 0..count {
        strings.push(decode_string(decoder)?);
    }
    Ok(strings)
}

/// The kind of a field, as reported by kind mismatch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    Timestamp,
    StringList,
    StringArray,
}

impl FieldKind {
    /// Wire tag. Part of the format; never renumber.
    pub(crate) fn tag(self) -> u8 {
        match self {
            FieldKind::Bool => 0,
            FieldKind::Byte => 1,
            FieldKind::Short => 2,
            FieldKind::Int => 3,
            FieldKind::Long => 4,
            FieldKind::Float => 5,
            FieldKind::Double => 6,
            FieldKind::String => 7,
            FieldKind::Timestamp => 8,
            FieldKind::StringList => 9,
            FieldKind::StringArray => 10,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        let kind = match tag {
            0 => FieldKind::Bool,
            1 => FieldKind::Byte,
            2 => FieldKind::Short,
            3 => FieldKind::Int,
            4 => FieldKind::Long,
            5 => FieldKind::Float,
            6 => FieldKind::Double,
            7 => FieldKind::String,
            8 => FieldKind::Timestamp,
            9 => FieldKind::StringList,
            10 => FieldKind::StringArray,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Bool => "bool",
            FieldKind::Byte => "byte",
            FieldKind::Short => "short",
            FieldKind::Int => "int",
            FieldKind::Long => "long",
            FieldKind::Float => "float",
            FieldKind::Double => "double",
            FieldKind::String => "string",
            FieldKind::Timestamp => "timestamp",
            FieldKind::StringList => "string list",
            FieldKind::StringArray => "string array",
        };
        f.write_str(name)
    }
}
