//! Reads stored attribute values back out as Arrow arrays.
//!
//! For each probe row the resolution order is fixed: a null-set hit produces a null
//! (and counts as found), a table hit produces the stored value (found), otherwise
//! the caller-provided per-row default column wins over the attribute's declared
//! default, which wins over the type's natural zero. Substituted defaults never
//! count as found.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BinaryBuilder, FixedSizeBinaryArray, FixedSizeBinaryBuilder,
    ListArray, PrimitiveArray, PrimitiveBuilder, StringArray, StringBuilder, new_empty_array,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::compute;
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Date64Type, Decimal128Type, Decimal256Type,
    Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type,
    TimestampMicrosecondType, UInt8Type, UInt16Type, UInt32Type, UInt64Type, i256,
};
use memdict_result::{Error, Result};
use memdict_schema::{ScalarValue, ValueKind};
use rustc_hash::FxHashSet;

use crate::key::DictionaryKey;
use crate::router::ShardRouter;
use crate::store::attribute::{AttributeStorage, DictionaryAttribute};
use crate::store::tables::KeyedTable;

/// What to substitute for keys the dictionary does not hold.
#[derive(Clone, Copy)]
pub(crate) enum DefaultSpec<'a> {
    /// Caller-supplied per-row defaults, one entry per probe row.
    Column(&'a ArrayRef),
    /// The attribute's declared default.
    Declared(&'a ScalarValue),
    /// Natural zero of the value type.
    None,
}

impl<'a> DefaultSpec<'a> {
    fn column<T: Array + 'static>(&self, name: &str) -> Result<Option<&'a T>> {
        match *self {
            DefaultSpec::Column(col) => match col.as_any().downcast_ref::<T>() {
                Some(values) => Ok(Some(values)),
                None => Err(Error::Internal(format!(
                    "default column for attribute `{name}` does not downcast to its array type"
                ))),
            },
            _ => Ok(None),
        }
    }

    fn declared(&self) -> Option<&'a ScalarValue> {
        match self {
            DefaultSpec::Declared(scalar) => Some(scalar),
            _ => None,
        }
    }
}

fn declared_mismatch(name: &str) -> Error {
    Error::Internal(format!(
        "declared default for attribute `{name}` does not match its kind"
    ))
}

macro_rules! declared_value {
    ($default:expr, $($variant:ident)|+, $name:expr) => {
        match $default {
            $(Some(ScalarValue::$variant(v)) => Some(*v),)+
            Some(_) => return Err(declared_mismatch($name)),
            None => None,
        }
    };
}

/// Gather one output array for `probes`, returning the array and how many rows
/// were found in the dictionary.
pub(crate) fn gather_column<K: DictionaryKey>(
    attr: &DictionaryAttribute<K>,
    probes: &[&K::Probe],
    router: &ShardRouter,
    defaults: DefaultSpec<'_>,
) -> Result<(ArrayRef, u64)> {
    let name = attr.name.as_str();
    let nulls = attr.null_keys.as_deref();
    let out_type = &attr.data_type;
    let declared = defaults.declared();

    match (&attr.kind, &attr.storage) {
        (ValueKind::UInt8, AttributeStorage::U8(t)) => {
            let fill = declared_value!(declared, UInt8, name);
            gather_primitive::<K, UInt8Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::UInt16, AttributeStorage::U16(t)) => {
            let fill = declared_value!(declared, UInt16, name);
            gather_primitive::<K, UInt16Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::UInt32 | ValueKind::Ipv4, AttributeStorage::U32(t)) => {
            let fill = declared_value!(declared, UInt32 | Ipv4, name);
            gather_primitive::<K, UInt32Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::UInt64, AttributeStorage::U64(t)) => {
            let fill = declared_value!(declared, UInt64, name);
            gather_primitive::<K, UInt64Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Int8, AttributeStorage::I8(t)) => {
            let fill = declared_value!(declared, Int8, name);
            gather_primitive::<K, Int8Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Int16, AttributeStorage::I16(t)) => {
            let fill = declared_value!(declared, Int16, name);
            gather_primitive::<K, Int16Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Int32, AttributeStorage::I32(t)) => {
            let fill = declared_value!(declared, Int32, name);
            gather_primitive::<K, Int32Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Date32, AttributeStorage::I32(t)) => {
            let fill = declared_value!(declared, Date32, name);
            gather_primitive::<K, Date32Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Int64, AttributeStorage::I64(t)) => {
            let fill = declared_value!(declared, Int64, name);
            gather_primitive::<K, Int64Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Date64, AttributeStorage::I64(t)) => {
            let fill = declared_value!(declared, Date64, name);
            gather_primitive::<K, Date64Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::TimestampMicros, AttributeStorage::I64(t)) => {
            let fill = declared_value!(declared, TimestampMicros, name);
            gather_primitive::<K, TimestampMicrosecondType>(
                t, nulls, probes, router, &defaults, fill, out_type, name,
            )
        }
        (ValueKind::Float32, AttributeStorage::F32(t)) => {
            let fill = declared_value!(declared, Float32, name);
            gather_primitive::<K, Float32Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Float64, AttributeStorage::F64(t)) => {
            let fill = declared_value!(declared, Float64, name);
            gather_primitive::<K, Float64Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Decimal128 { .. }, AttributeStorage::I128(t)) => {
            let fill = declared_value!(declared, Decimal128, name);
            gather_primitive::<K, Decimal128Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Decimal256 { .. }, AttributeStorage::I256(t)) => {
            let fill = match declared {
                Some(ScalarValue::Decimal256(bytes)) => Some(i256::from_be_bytes(*bytes)),
                Some(_) => return Err(declared_mismatch(name)),
                None => None,
            };
            gather_primitive::<K, Decimal256Type>(t, nulls, probes, router, &defaults, fill, out_type, name)
        }
        (ValueKind::Uuid | ValueKind::Ipv6, AttributeStorage::U128(t)) => {
            let fill = declared_value!(declared, Uuid | Ipv6, name);
            gather_fixed16(t, nulls, probes, router, &defaults, fill, name)
        }
        (ValueKind::Utf8, AttributeStorage::Bytes(t)) => {
            let fill = match declared {
                Some(ScalarValue::Utf8(text)) => Some(text.as_str()),
                Some(_) => return Err(declared_mismatch(name)),
                None => None,
            };
            gather_utf8(t, nulls, probes, router, &defaults, fill, name)
        }
        (ValueKind::Binary, AttributeStorage::Bytes(t)) => {
            let fill = match declared {
                Some(ScalarValue::Binary(bytes)) => Some(bytes.as_slice()),
                Some(_) => return Err(declared_mismatch(name)),
                None => None,
            };
            gather_binary(t, nulls, probes, router, &defaults, fill, name)
        }
        (ValueKind::List(child), AttributeStorage::List(t)) => {
            gather_list(t, nulls, probes, router, &defaults, child, out_type, name)
        }
        _ => Err(Error::Internal(format!(
            "attribute `{name}` storage does not match its declared kind"
        ))),
    }
}

#[allow(clippy::too_many_arguments)]
fn gather_primitive<K, A>(
    tables: &[KeyedTable<K, A::Native>],
    nulls: Option<&[FxHashSet<K>]>,
    probes: &[&K::Probe],
    router: &ShardRouter,
    defaults: &DefaultSpec<'_>,
    fill: Option<A::Native>,
    out_type: &DataType,
    name: &str,
) -> Result<(ArrayRef, u64)>
where
    K: DictionaryKey,
    A: ArrowPrimitiveType,
{
    let default_column = defaults.column::<PrimitiveArray<A>>(name)?;
    let mut builder =
        PrimitiveBuilder::<A>::with_capacity(probes.len()).with_data_type(out_type.clone());
    let mut found = 0u64;
    for (row, probe) in probes.iter().enumerate() {
        let shard = K::shard(*probe, router);
        if let Some(sets) = nulls
            && sets[shard].contains(*probe)
        {
            builder.append_null();
            found += 1;
            continue;
        }
        if let Some(value) = tables[shard].get(*probe) {
            builder.append_value(*value);
            found += 1;
            continue;
        }
        match default_column {
            Some(col) => {
                if col.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(col.value(row));
                }
            }
            None => builder.append_value(fill.unwrap_or_default()),
        }
    }
    Ok((Arc::new(builder.finish()), found))
}

fn gather_fixed16<K: DictionaryKey>(
    tables: &[KeyedTable<K, u128>],
    nulls: Option<&[FxHashSet<K>]>,
    probes: &[&K::Probe],
    router: &ShardRouter,
    defaults: &DefaultSpec<'_>,
    fill: Option<u128>,
    name: &str,
) -> Result<(ArrayRef, u64)> {
    let default_column = defaults.column::<FixedSizeBinaryArray>(name)?;
    let mut builder = FixedSizeBinaryBuilder::with_capacity(probes.len(), 16);
    let mut found = 0u64;
    for (row, probe) in probes.iter().enumerate() {
        let shard = K::shard(*probe, router);
        if let Some(sets) = nulls
            && sets[shard].contains(*probe)
        {
            builder.append_null();
            found += 1;
            continue;
        }
        if let Some(value) = tables[shard].get(*probe) {
            builder.append_value(value.to_be_bytes())?;
            found += 1;
            continue;
        }
        match default_column {
            Some(col) => {
                if col.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(col.value(row))?;
                }
            }
            None => builder.append_value(fill.unwrap_or_default().to_be_bytes())?,
        }
    }
    Ok((Arc::new(builder.finish()), found))
}

fn gather_utf8<K: DictionaryKey>(
    tables: &[KeyedTable<K, Arc<[u8]>>],
    nulls: Option<&[FxHashSet<K>]>,
    probes: &[&K::Probe],
    router: &ShardRouter,
    defaults: &DefaultSpec<'_>,
    fill: Option<&str>,
    name: &str,
) -> Result<(ArrayRef, u64)> {
    let default_column = defaults.column::<StringArray>(name)?;
    let mut builder = StringBuilder::with_capacity(probes.len(), probes.len() * 16);
    let mut found = 0u64;
    for (row, probe) in probes.iter().enumerate() {
        let shard = K::shard(*probe, router);
        if let Some(sets) = nulls
            && sets[shard].contains(*probe)
        {
            builder.append_null();
            found += 1;
            continue;
        }
        if let Some(value) = tables[shard].get(*probe) {
            let text = std::str::from_utf8(value).map_err(|_| {
                Error::Internal(format!("attribute `{name}` holds non-UTF-8 bytes"))
            })?;
            builder.append_value(text);
            found += 1;
            continue;
        }
        match default_column {
            Some(col) => {
                if col.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(col.value(row));
                }
            }
            None => builder.append_value(fill.unwrap_or_default()),
        }
    }
    Ok((Arc::new(builder.finish()), found))
}

fn gather_binary<K: DictionaryKey>(
    tables: &[KeyedTable<K, Arc<[u8]>>],
    nulls: Option<&[FxHashSet<K>]>,
    probes: &[&K::Probe],
    router: &ShardRouter,
    defaults: &DefaultSpec<'_>,
    fill: Option<&[u8]>,
    name: &str,
) -> Result<(ArrayRef, u64)> {
    let default_column = defaults.column::<BinaryArray>(name)?;
    let mut builder = BinaryBuilder::with_capacity(probes.len(), probes.len() * 16);
    let mut found = 0u64;
    for (row, probe) in probes.iter().enumerate() {
        let shard = K::shard(*probe, router);
        if let Some(sets) = nulls
            && sets[shard].contains(*probe)
        {
            builder.append_null();
            found += 1;
            continue;
        }
        if let Some(value) = tables[shard].get(*probe) {
            builder.append_value(value);
            found += 1;
            continue;
        }
        match default_column {
            Some(col) => {
                if col.is_null(row) {
                    builder.append_null();
                } else {
                    builder.append_value(col.value(row));
                }
            }
            None => builder.append_value(fill.unwrap_or_default()),
        }
    }
    Ok((Arc::new(builder.finish()), found))
}

/// Lists are assembled by concatenating per-row child slices, then rebuilding the
/// offsets. Missing keys with no default yield an empty list, not null.
#[allow(clippy::too_many_arguments)]
fn gather_list<K: DictionaryKey>(
    tables: &[KeyedTable<K, ArrayRef>],
    nulls: Option<&[FxHashSet<K>]>,
    probes: &[&K::Probe],
    router: &ShardRouter,
    defaults: &DefaultSpec<'_>,
    child: &ValueKind,
    out_type: &DataType,
    name: &str,
) -> Result<(ArrayRef, u64)> {
    let DataType::List(field) = out_type else {
        return Err(Error::Internal(format!(
            "attribute `{name}` is list-backed but its data type is not List"
        )));
    };
    let default_column = defaults.column::<ListArray>(name)?;
    let fill: Option<ArrayRef> = match defaults.declared() {
        Some(ScalarValue::List(items)) => Some(scalar_list_to_array(items, child, name)?),
        Some(_) => return Err(declared_mismatch(name)),
        None => None,
    };
    let empty = new_empty_array(field.data_type());

    let mut parts: Vec<ArrayRef> = Vec::with_capacity(probes.len());
    let mut validity: Vec<bool> = Vec::with_capacity(probes.len());
    let mut found = 0u64;
    for (row, probe) in probes.iter().enumerate() {
        let shard = K::shard(*probe, router);
        if let Some(sets) = nulls
            && sets[shard].contains(*probe)
        {
            parts.push(empty.clone());
            validity.push(false);
            found += 1;
            continue;
        }
        if let Some(value) = tables[shard].get(*probe) {
            parts.push(value.clone());
            validity.push(true);
            found += 1;
            continue;
        }
        match default_column {
            Some(col) => {
                if col.is_null(row) {
                    parts.push(empty.clone());
                    validity.push(false);
                } else {
                    parts.push(col.value(row));
                    validity.push(true);
                }
            }
            None => {
                parts.push(fill.clone().unwrap_or_else(|| empty.clone()));
                validity.push(true);
            }
        }
    }

    let lengths: Vec<usize> = parts.iter().map(|part| part.len()).collect();
    let values = if parts.is_empty() {
        empty
    } else {
        let slices: Vec<&dyn Array> = parts.iter().map(|part| part.as_ref()).collect();
        compute::concat(&slices)?
    };
    let offsets = OffsetBuffer::from_lengths(lengths);
    let null_buffer = validity
        .iter()
        .any(|valid| !valid)
        .then(|| NullBuffer::from(validity));
    let array = ListArray::try_new(field.clone(), offsets, values, null_buffer)?;
    Ok((Arc::new(array), found))
}

/// Materialize a declared list default once, as a child array reused per row.
fn scalar_list_to_array(items: &[ScalarValue], child: &ValueKind, name: &str) -> Result<ArrayRef> {
    fn primitives<A: ArrowPrimitiveType>(
        items: &[ScalarValue],
        pick: impl Fn(&ScalarValue) -> Option<A::Native>,
        dt: &DataType,
        name: &str,
    ) -> Result<ArrayRef> {
        let mut values: Vec<A::Native> = Vec::with_capacity(items.len());
        for item in items {
            values.push(pick(item).ok_or_else(|| declared_mismatch(name))?);
        }
        let array = PrimitiveArray::<A>::from_iter_values(values);
        Ok(if array.data_type() == dt {
            Arc::new(array)
        } else {
            Arc::new(array.with_data_type(dt.clone()))
        })
    }

    let dt = child.data_type();
    match child {
        ValueKind::UInt8 => primitives::<UInt8Type>(
            items,
            |s| match s {
                ScalarValue::UInt8(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::UInt16 => primitives::<UInt16Type>(
            items,
            |s| match s {
                ScalarValue::UInt16(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::UInt32 | ValueKind::Ipv4 => primitives::<UInt32Type>(
            items,
            |s| match s {
                ScalarValue::UInt32(v) | ScalarValue::Ipv4(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::UInt64 => primitives::<UInt64Type>(
            items,
            |s| match s {
                ScalarValue::UInt64(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Int8 => primitives::<Int8Type>(
            items,
            |s| match s {
                ScalarValue::Int8(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Int16 => primitives::<Int16Type>(
            items,
            |s| match s {
                ScalarValue::Int16(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Int32 => primitives::<Int32Type>(
            items,
            |s| match s {
                ScalarValue::Int32(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Date32 => primitives::<Date32Type>(
            items,
            |s| match s {
                ScalarValue::Date32(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Int64 => primitives::<Int64Type>(
            items,
            |s| match s {
                ScalarValue::Int64(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Date64 => primitives::<Date64Type>(
            items,
            |s| match s {
                ScalarValue::Date64(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::TimestampMicros => primitives::<TimestampMicrosecondType>(
            items,
            |s| match s {
                ScalarValue::TimestampMicros(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Float32 => primitives::<Float32Type>(
            items,
            |s| match s {
                ScalarValue::Float32(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Float64 => primitives::<Float64Type>(
            items,
            |s| match s {
                ScalarValue::Float64(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Decimal128 { .. } => primitives::<Decimal128Type>(
            items,
            |s| match s {
                ScalarValue::Decimal128(v) => Some(*v),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Decimal256 { .. } => primitives::<Decimal256Type>(
            items,
            |s| match s {
                ScalarValue::Decimal256(bytes) => Some(i256::from_be_bytes(*bytes)),
                _ => None,
            },
            &dt,
            name,
        ),
        ValueKind::Uuid | ValueKind::Ipv6 => {
            let mut builder = FixedSizeBinaryBuilder::with_capacity(items.len(), 16);
            for item in items {
                let (ScalarValue::Uuid(v) | ScalarValue::Ipv6(v)) = item else {
                    return Err(declared_mismatch(name));
                };
                builder.append_value(v.to_be_bytes())?;
            }
            Ok(Arc::new(builder.finish()))
        }
        ValueKind::Utf8 => {
            let mut builder = StringBuilder::new();
            for item in items {
                let ScalarValue::Utf8(text) = item else {
                    return Err(declared_mismatch(name));
                };
                builder.append_value(text);
            }
            Ok(Arc::new(builder.finish()))
        }
        ValueKind::Binary => {
            let mut builder = BinaryBuilder::new();
            for item in items {
                let ScalarValue::Binary(bytes) = item else {
                    return Err(declared_mismatch(name));
                };
                builder.append_value(bytes);
            }
            Ok(Arc::new(builder.finish()))
        }
        ValueKind::List(_) => Err(Error::Internal(format!(
            "attribute `{name}` declares a nested list default"
        ))),
    }
}
