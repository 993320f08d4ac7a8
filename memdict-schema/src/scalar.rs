//! Declared default values for attributes.

use serde::{Deserialize, Serialize};

use crate::kind::ValueKind;

/// A single typed value, used for per-attribute declared defaults.
///
/// The variant must agree with the attribute's [`ValueKind`];
/// [`DictionaryStructure::validate`](crate::DictionaryStructure::validate) enforces the
/// pairing once at declaration time so the lookup path can trust it.
///
/// `Decimal256` carries its value as 32 big-endian bytes because the 256-bit integer
/// type is an Arrow implementation detail that does not serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarValue {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Date32(i32),
    Date64(i64),
    TimestampMicros(i64),
    Decimal128(i128),
    Decimal256([u8; 32]),
    Uuid(u128),
    Ipv4(u32),
    Ipv6(u128),
    Utf8(String),
    Binary(Vec<u8>),
    List(Vec<ScalarValue>),
}

impl ScalarValue {
    /// True when this value is a legal default for an attribute of `kind`.
    ///
    /// Lists must be homogeneous in the declared element kind; an empty list matches
    /// any list kind.
    pub fn matches_kind(&self, kind: &ValueKind) -> bool {
        match (self, kind) {
            (ScalarValue::UInt8(_), ValueKind::UInt8) => true,
            (ScalarValue::UInt16(_), ValueKind::UInt16) => true,
            (ScalarValue::UInt32(_), ValueKind::UInt32) => true,
            (ScalarValue::UInt64(_), ValueKind::UInt64) => true,
            (ScalarValue::Int8(_), ValueKind::Int8) => true,
            (ScalarValue::Int16(_), ValueKind::Int16) => true,
            (ScalarValue::Int32(_), ValueKind::Int32) => true,
            (ScalarValue::Int64(_), ValueKind::Int64) => true,
            (ScalarValue::Float32(_), ValueKind::Float32) => true,
            (ScalarValue::Float64(_), ValueKind::Float64) => true,
            (ScalarValue::Date32(_), ValueKind::Date32) => true,
            (ScalarValue::Date64(_), ValueKind::Date64) => true,
            (ScalarValue::TimestampMicros(_), ValueKind::TimestampMicros) => true,
            (ScalarValue::Decimal128(_), ValueKind::Decimal128 { .. }) => true,
            (ScalarValue::Decimal256(_), ValueKind::Decimal256 { .. }) => true,
            (ScalarValue::Uuid(_), ValueKind::Uuid) => true,
            (ScalarValue::Ipv4(_), ValueKind::Ipv4) => true,
            (ScalarValue::Ipv6(_), ValueKind::Ipv6) => true,
            (ScalarValue::Utf8(_), ValueKind::Utf8) => true,
            (ScalarValue::Binary(_), ValueKind::Binary) => true,
            (ScalarValue::List(items), ValueKind::List(child)) => {
                items.iter().all(|item| item.matches_kind(child))
            }
            _ => false,
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<u64> for ScalarValue {
    fn from(value: u64) -> Self {
        ScalarValue::UInt64(value)
    }
}
