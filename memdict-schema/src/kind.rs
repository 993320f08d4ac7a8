//! Declared value types and their Arrow mapping.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, TimeUnit};
use memdict_result::{Error, Result};
use serde::{Deserialize, Serialize};

/// Declared type of a dictionary attribute or complex-key column.
///
/// Each kind maps to exactly one Arrow [`DataType`] via [`ValueKind::data_type`]. The
/// engine matches incoming columns against that mapping strictly; there are no implicit
/// casts anywhere in the load or lookup paths.
///
/// `Uuid` and `Ipv6` share the `FixedSizeBinary(16)` Arrow representation and `Ipv4`
/// shares `UInt32`, so the kind tag, not the Arrow type, is what selects the attribute
/// storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Days since the Unix epoch, 32-bit.
    Date32,
    /// Milliseconds since the Unix epoch, 64-bit.
    Date64,
    /// Microseconds since the Unix epoch, no time zone.
    TimestampMicros,
    /// Fixed-point decimal held in 128 bits.
    Decimal128 { precision: u8, scale: i8 },
    /// Fixed-point decimal held in 256 bits.
    Decimal256 { precision: u8, scale: i8 },
    /// 128-bit identifier, carried as 16 big-endian bytes.
    Uuid,
    /// IPv4 address, carried as a `UInt32` in network byte order.
    Ipv4,
    /// IPv6 address, carried as 16 big-endian bytes.
    Ipv6,
    Utf8,
    Binary,
    /// Variable-length array of a scalar element kind.
    List(Box<ValueKind>),
}

impl ValueKind {
    /// Arrow type this kind is carried as in record batches and lookup results.
    pub fn data_type(&self) -> DataType {
        match self {
            ValueKind::UInt8 => DataType::UInt8,
            ValueKind::UInt16 => DataType::UInt16,
            ValueKind::UInt32 => DataType::UInt32,
            ValueKind::UInt64 => DataType::UInt64,
            ValueKind::Int8 => DataType::Int8,
            ValueKind::Int16 => DataType::Int16,
            ValueKind::Int32 => DataType::Int32,
            ValueKind::Int64 => DataType::Int64,
            ValueKind::Float32 => DataType::Float32,
            ValueKind::Float64 => DataType::Float64,
            ValueKind::Date32 => DataType::Date32,
            ValueKind::Date64 => DataType::Date64,
            ValueKind::TimestampMicros => DataType::Timestamp(TimeUnit::Microsecond, None),
            ValueKind::Decimal128 { precision, scale } => {
                DataType::Decimal128(*precision, *scale)
            }
            ValueKind::Decimal256 { precision, scale } => {
                DataType::Decimal256(*precision, *scale)
            }
            ValueKind::Uuid | ValueKind::Ipv6 => DataType::FixedSizeBinary(16),
            ValueKind::Ipv4 => DataType::UInt32,
            ValueKind::Utf8 => DataType::Utf8,
            ValueKind::Binary => DataType::Binary,
            ValueKind::List(child) => {
                DataType::List(Arc::new(Field::new_list_field(child.data_type(), true)))
            }
        }
    }

    /// True for kinds that can serve as a complex-key column.
    ///
    /// Lists are excluded; every scalar kind is fair game because each one has an
    /// unambiguous byte serialization for the composite key.
    pub fn supports_key_column(&self) -> bool {
        !matches!(self, ValueKind::List(_))
    }

    /// Check declaration-time constraints on the kind itself.
    ///
    /// Decimal precisions must fit their physical width and list elements must be
    /// scalar. Nested lists are rejected here rather than deep in the loader.
    pub fn validate(&self) -> Result<()> {
        match self {
            ValueKind::Decimal128 { precision, scale } => {
                if *precision == 0 || *precision > 38 {
                    return Err(Error::Config(format!(
                        "Decimal128 precision must be within [1, 38], got {precision}"
                    )));
                }
                if scale.unsigned_abs() > *precision {
                    return Err(Error::Config(format!(
                        "Decimal128 scale {scale} exceeds precision {precision}"
                    )));
                }
                Ok(())
            }
            ValueKind::Decimal256 { precision, scale } => {
                if *precision == 0 || *precision > 76 {
                    return Err(Error::Config(format!(
                        "Decimal256 precision must be within [1, 76], got {precision}"
                    )));
                }
                if scale.unsigned_abs() > *precision {
                    return Err(Error::Config(format!(
                        "Decimal256 scale {scale} exceeds precision {precision}"
                    )));
                }
                Ok(())
            }
            ValueKind::List(child) => {
                if matches!(child.as_ref(), ValueKind::List(_)) {
                    return Err(Error::Config(
                        "nested List attribute kinds are not supported".into(),
                    ));
                }
                child.validate()
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrow_mapping_is_strict() {
        assert_eq!(ValueKind::UInt64.data_type(), DataType::UInt64);
        assert_eq!(ValueKind::Ipv4.data_type(), DataType::UInt32);
        assert_eq!(ValueKind::Uuid.data_type(), DataType::FixedSizeBinary(16));
        assert_eq!(
            ValueKind::TimestampMicros.data_type(),
            DataType::Timestamp(TimeUnit::Microsecond, None)
        );
        let list = ValueKind::List(Box::new(ValueKind::Utf8));
        match list.data_type() {
            DataType::List(field) => assert_eq!(field.data_type(), &DataType::Utf8),
            other => panic!("expected list type, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_declarations() {
        assert!(
            ValueKind::Decimal128 {
                precision: 39,
                scale: 0
            }
            .validate()
            .is_err()
        );
        assert!(
            ValueKind::Decimal256 {
                precision: 10,
                scale: -11
            }
            .validate()
            .is_err()
        );
        let nested = ValueKind::List(Box::new(ValueKind::List(Box::new(ValueKind::UInt8))));
        assert!(nested.validate().is_err());
    }
}
