//! Typed per-attribute storage.
//!
//! Each attribute owns one concrete table instantiation per shard, selected by the
//! attribute's declared kind. Several kinds share a native representation (both
//! `Ipv4` and `UInt32` store `u32`, `Uuid` and `Ipv6` store `u128`, `Utf8` and
//! `Binary` store owned byte strings), so the storage enum is keyed by native type
//! while the declared kind on the attribute drives Arrow conversion at the edges.
//!
//! Nullable attributes keep a per-shard null key set beside the value tables. A key
//! is in the table or in the null set, never both; the loader maintains that
//! exclusivity on every last-write-wins transition.

use std::hash::Hash;
use std::mem;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, FixedSizeBinaryArray, ListArray, PrimitiveArray, StringArray,
};
use arrow::compute;
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Date64Type, Decimal128Type, Decimal256Type,
    Float32Type, Float64Type, Int8Type, Int16Type, Int32Type, Int64Type,
    TimestampMicrosecondType, UInt8Type, UInt16Type, UInt32Type, UInt64Type, i256,
};
use memdict_result::{Error, Result};
use memdict_schema::{AttributeDescriptor, ScalarValue, TableLayout, ValueKind};
use rustc_hash::FxHashSet;

use crate::key::DictionaryKey;
use crate::store::tables::{KeyedTable, dense_buckets};

/// Relays a callback macro with the full storage variant list appended, so each
/// dispatch site is written once.
macro_rules! storage_variants {
    ($callback:ident!($($args:tt)*)) => {
        $callback!(
            $($args)*;
            U8, U16, U32, U64, I8, I16, I32, I64, F32, F64, I128, I256, U128, Bytes, List
        )
    };
}

macro_rules! with_shard_tables_impl {
    ($storage:expr, $tables:ident => $body:expr; $($variant:ident),+) => {
        match $storage {
            $(AttributeStorage::$variant($tables) => $body,)+
        }
    };
}

/// Run `$body` with `$tables` bound to the shard table vector, whatever the value
/// type. The body must be polymorphic over the table's value type.
macro_rules! with_shard_tables {
    ($storage:expr, $tables:ident => $body:expr) => {
        storage_variants!(with_shard_tables_impl!($storage, $tables => $body))
    };
}

macro_rules! merge_two_impl {
    ($a:expr, $b:expr; $($variant:ident),+) => {
        match ($a, $b) {
            $(
                (AttributeStorage::$variant(mut tables), AttributeStorage::$variant(more)) => {
                    tables.extend(more);
                    AttributeStorage::$variant(tables)
                }
            )+
            _ => {
                return Err(Error::Internal(
                    "shard storages diverged in kind during merge".into(),
                ));
            }
        }
    };
}

/// Sharded tables of one attribute, keyed by native representation.
pub(crate) enum AttributeStorage<K> {
    U8(Vec<KeyedTable<K, u8>>),
    U16(Vec<KeyedTable<K, u16>>),
    U32(Vec<KeyedTable<K, u32>>),
    U64(Vec<KeyedTable<K, u64>>),
    I8(Vec<KeyedTable<K, i8>>),
    I16(Vec<KeyedTable<K, i16>>),
    I32(Vec<KeyedTable<K, i32>>),
    I64(Vec<KeyedTable<K, i64>>),
    F32(Vec<KeyedTable<K, f32>>),
    F64(Vec<KeyedTable<K, f64>>),
    I128(Vec<KeyedTable<K, i128>>),
    I256(Vec<KeyedTable<K, i256>>),
    U128(Vec<KeyedTable<K, u128>>),
    Bytes(Vec<KeyedTable<K, Arc<[u8]>>>),
    List(Vec<KeyedTable<K, ArrayRef>>),
}

fn new_storage<K: DictionaryKey>(
    kind: &ValueKind,
    shards: usize,
    layout: TableLayout,
) -> AttributeStorage<K> {
    fn tables<K: Eq + Hash, V>(shards: usize, layout: TableLayout) -> Vec<KeyedTable<K, V>> {
        (0..shards).map(|_| KeyedTable::new(layout)).collect()
    }
    match kind {
        ValueKind::UInt8 => AttributeStorage::U8(tables(shards, layout)),
        ValueKind::UInt16 => AttributeStorage::U16(tables(shards, layout)),
        ValueKind::UInt32 | ValueKind::Ipv4 => AttributeStorage::U32(tables(shards, layout)),
        ValueKind::UInt64 => AttributeStorage::U64(tables(shards, layout)),
        ValueKind::Int8 => AttributeStorage::I8(tables(shards, layout)),
        ValueKind::Int16 => AttributeStorage::I16(tables(shards, layout)),
        ValueKind::Int32 | ValueKind::Date32 => AttributeStorage::I32(tables(shards, layout)),
        ValueKind::Int64 | ValueKind::Date64 | ValueKind::TimestampMicros => {
            AttributeStorage::I64(tables(shards, layout))
        }
        ValueKind::Float32 => AttributeStorage::F32(tables(shards, layout)),
        ValueKind::Float64 => AttributeStorage::F64(tables(shards, layout)),
        ValueKind::Decimal128 { .. } => AttributeStorage::I128(tables(shards, layout)),
        ValueKind::Decimal256 { .. } => AttributeStorage::I256(tables(shards, layout)),
        ValueKind::Uuid | ValueKind::Ipv6 => AttributeStorage::U128(tables(shards, layout)),
        ValueKind::Utf8 | ValueKind::Binary => AttributeStorage::Bytes(tables(shards, layout)),
        ValueKind::List(_) => AttributeStorage::List(tables(shards, layout)),
    }
}

/// One attribute's declared shape plus its sharded storage.
pub(crate) struct DictionaryAttribute<K> {
    pub name: String,
    pub kind: ValueKind,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<ScalarValue>,
    pub null_keys: Option<Vec<FxHashSet<K>>>,
    pub storage: AttributeStorage<K>,
}

impl<K: DictionaryKey> DictionaryAttribute<K> {
    pub fn new(descriptor: &AttributeDescriptor, shard_count: usize, layout: TableLayout) -> Self {
        let null_keys = descriptor
            .nullable
            .then(|| (0..shard_count).map(|_| FxHashSet::default()).collect());
        Self {
            name: descriptor.name.clone(),
            kind: descriptor.kind.clone(),
            data_type: descriptor.kind.data_type(),
            nullable: descriptor.nullable,
            default: descriptor.default.clone(),
            null_keys,
            storage: new_storage(&descriptor.kind, shard_count, layout),
        }
    }

    pub fn shard_count(&self) -> usize {
        with_shard_tables!(&self.storage, tables => tables.len())
    }

    /// Insert one batch column's values for the given shard-local rows.
    ///
    /// `keys[i]` is the owned key of source row `rows[i]`. Later rows overwrite
    /// earlier ones, including transitions between a value and null.
    pub fn insert_column(
        &mut self,
        shard: usize,
        keys: &[K],
        rows: &[u32],
        column: &ArrayRef,
    ) -> Result<()> {
        debug_assert_eq!(keys.len(), rows.len());
        if column.data_type() != &self.data_type {
            return Err(Error::Config(format!(
                "attribute `{}` expects {:?}, got {:?}",
                self.name,
                self.data_type,
                column.data_type()
            )));
        }
        let Self {
            name,
            kind,
            storage,
            null_keys,
            ..
        } = self;
        let name = name.as_str();
        let nulls = null_keys.as_mut().map(|sets| &mut sets[shard]);
        with_shard_tables!(&mut *storage, tables => tables[shard].reserve(keys.len()));

        match (&*kind, &mut *storage) {
            (ValueKind::UInt8, AttributeStorage::U8(t)) => {
                insert_primitive::<K, UInt8Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::UInt16, AttributeStorage::U16(t)) => {
                insert_primitive::<K, UInt16Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::UInt32 | ValueKind::Ipv4, AttributeStorage::U32(t)) => {
                insert_primitive::<K, UInt32Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::UInt64, AttributeStorage::U64(t)) => {
                insert_primitive::<K, UInt64Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Int8, AttributeStorage::I8(t)) => {
                insert_primitive::<K, Int8Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Int16, AttributeStorage::I16(t)) => {
                insert_primitive::<K, Int16Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Int32, AttributeStorage::I32(t)) => {
                insert_primitive::<K, Int32Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Date32, AttributeStorage::I32(t)) => {
                insert_primitive::<K, Date32Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Int64, AttributeStorage::I64(t)) => {
                insert_primitive::<K, Int64Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Date64, AttributeStorage::I64(t)) => {
                insert_primitive::<K, Date64Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::TimestampMicros, AttributeStorage::I64(t)) => {
                insert_primitive::<K, TimestampMicrosecondType>(
                    &mut t[shard],
                    nulls,
                    keys,
                    rows,
                    column,
                    name,
                )
            }
            (ValueKind::Float32, AttributeStorage::F32(t)) => {
                insert_primitive::<K, Float32Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Float64, AttributeStorage::F64(t)) => {
                insert_primitive::<K, Float64Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Decimal128 { .. }, AttributeStorage::I128(t)) => {
                insert_primitive::<K, Decimal128Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Decimal256 { .. }, AttributeStorage::I256(t)) => {
                insert_primitive::<K, Decimal256Type>(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Uuid | ValueKind::Ipv6, AttributeStorage::U128(t)) => {
                insert_fixed16(&mut t[shard], nulls, keys, rows, column, name)
            }
            (ValueKind::Utf8, AttributeStorage::Bytes(t)) => {
                let values = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| downcast_error(name))?;
                insert_bytes_rows(
                    &mut t[shard],
                    nulls,
                    keys,
                    rows,
                    values,
                    |row| values.value(row).as_bytes(),
                    name,
                )
            }
            (ValueKind::Binary, AttributeStorage::Bytes(t)) => {
                let values = column
                    .as_any()
                    .downcast_ref::<BinaryArray>()
                    .ok_or_else(|| downcast_error(name))?;
                insert_bytes_rows(
                    &mut t[shard],
                    nulls,
                    keys,
                    rows,
                    values,
                    |row| values.value(row),
                    name,
                )
            }
            (ValueKind::List(_), AttributeStorage::List(t)) => {
                insert_list(&mut t[shard], nulls, keys, rows, column, name)
            }
            _ => Err(Error::Internal(format!(
                "attribute `{name}` storage does not match its declared kind"
            ))),
        }
    }

    /// Key presence in this attribute: value table or null set.
    pub fn contains(&self, shard: usize, probe: &K::Probe) -> bool {
        if let Some(sets) = &self.null_keys
            && sets[shard].contains(probe)
        {
            return true;
        }
        with_shard_tables!(&self.storage, tables => tables[shard].contains_key(probe))
    }

    /// Keys with a stored value in the shard, excluding null-set keys.
    pub fn stored_len(&self, shard: usize) -> usize {
        with_shard_tables!(&self.storage, tables => tables[shard].len())
    }

    pub fn null_len(&self, shard: usize) -> usize {
        self.null_keys.as_ref().map_or(0, |sets| sets[shard].len())
    }

    /// Distinct keys in the shard. Exact because the table and the null set are
    /// mutually exclusive.
    pub fn element_count(&self, shard: usize) -> usize {
        self.stored_len(shard) + self.null_len(shard)
    }

    pub fn bucket_count(&self, shard: usize) -> usize {
        with_shard_tables!(&self.storage, tables => tables[shard].bucket_count())
    }

    /// Clone every key of the shard into `out`, null-set keys included.
    pub fn collect_keys(&self, shard: usize, out: &mut Vec<K>) {
        with_shard_tables!(
            &self.storage,
            tables => out.extend(tables[shard].iter().map(|(key, _)| key.clone()))
        );
        if let Some(sets) = &self.null_keys {
            out.extend(sets[shard].iter().cloned());
        }
    }

    /// Visit every key of the shard without cloning, null-set keys included.
    pub fn for_each_key(&self, shard: usize, mut f: impl FnMut(&K)) {
        with_shard_tables!(
            &self.storage,
            tables => for (key, _) in tables[shard].iter() {
                f(key);
            }
        );
        if let Some(sets) = &self.null_keys {
            for key in &sets[shard] {
                f(key);
            }
        }
    }

    /// Bytes held by tables, null sets, and owned value payloads. Key payloads are
    /// accounted once at the dictionary level.
    pub fn allocated_bytes(&self) -> usize {
        let mut total = with_shard_tables!(
            &self.storage,
            tables => tables.iter().map(|table| table.allocated_bytes()).sum::<usize>()
        );
        if let Some(sets) = &self.null_keys {
            total += sets
                .iter()
                .map(|set| dense_buckets(set.capacity()) * (mem::size_of::<K>() + 1))
                .sum::<usize>();
        }
        match &self.storage {
            AttributeStorage::Bytes(tables) => {
                total += tables
                    .iter()
                    .flat_map(|table| table.iter())
                    .map(|(_, value)| value.len())
                    .sum::<usize>();
            }
            AttributeStorage::List(tables) => {
                total += tables
                    .iter()
                    .flat_map(|table| table.iter())
                    .map(|(_, value)| value.get_array_memory_size())
                    .sum::<usize>();
            }
            _ => {}
        }
        total
    }

    /// Typed access for hierarchy traversal over a `UInt64` parent attribute.
    pub fn u64_tables(&self) -> Result<&[KeyedTable<K, u64>]> {
        match &self.storage {
            AttributeStorage::U64(tables) => Ok(tables),
            _ => Err(Error::Internal(format!(
                "attribute `{}` is not UInt64-backed",
                self.name
            ))),
        }
    }

    /// Stitch per-worker single-shard attributes into one sharded attribute.
    /// `parts` must be in shard order.
    pub fn merge(parts: Vec<Self>) -> Result<Self> {
        let mut iter = parts.into_iter();
        let Some(mut first) = iter.next() else {
            return Err(Error::Internal("cannot merge zero shard attributes".into()));
        };
        for part in iter {
            match (&mut first.null_keys, part.null_keys) {
                (Some(mine), Some(theirs)) => mine.extend(theirs),
                (None, None) => {}
                _ => {
                    return Err(Error::Internal(
                        "shard null sets diverged during merge".into(),
                    ));
                }
            }
            first.storage = merge_two(first.storage, part.storage)?;
        }
        Ok(first)
    }
}

fn merge_two<K>(a: AttributeStorage<K>, b: AttributeStorage<K>) -> Result<AttributeStorage<K>> {
    Ok(storage_variants!(merge_two_impl!(a, b)))
}

fn downcast_error(name: &str) -> Error {
    Error::Internal(format!(
        "attribute `{name}`: column does not downcast to its declared array type"
    ))
}

fn insert_null<K: DictionaryKey, V>(
    table: &mut KeyedTable<K, V>,
    nulls: &mut Option<&mut FxHashSet<K>>,
    key: &K,
    name: &str,
) -> Result<()> {
    let Some(set) = nulls.as_mut() else {
        return Err(Error::Config(format!(
            "attribute `{name}` is not nullable but the source produced a null value"
        )));
    };
    set.insert(key.clone());
    table.remove(key.borrow());
    Ok(())
}

fn insert_primitive<K, A>(
    table: &mut KeyedTable<K, A::Native>,
    mut nulls: Option<&mut FxHashSet<K>>,
    keys: &[K],
    rows: &[u32],
    column: &ArrayRef,
    name: &str,
) -> Result<()>
where
    K: DictionaryKey,
    A: ArrowPrimitiveType,
{
    let values = column
        .as_any()
        .downcast_ref::<PrimitiveArray<A>>()
        .ok_or_else(|| downcast_error(name))?;
    for (key, &row) in keys.iter().zip(rows) {
        let row = row as usize;
        if values.is_null(row) {
            insert_null(table, &mut nulls, key, name)?;
        } else {
            table.insert(key.clone(), values.value(row));
            if let Some(set) = nulls.as_mut() {
                set.remove(key.borrow());
            }
        }
    }
    Ok(())
}

fn insert_fixed16<K: DictionaryKey>(
    table: &mut KeyedTable<K, u128>,
    mut nulls: Option<&mut FxHashSet<K>>,
    keys: &[K],
    rows: &[u32],
    column: &ArrayRef,
    name: &str,
) -> Result<()> {
    let values = column
        .as_any()
        .downcast_ref::<FixedSizeBinaryArray>()
        .ok_or_else(|| downcast_error(name))?;
    for (key, &row) in keys.iter().zip(rows) {
        let row = row as usize;
        if values.is_null(row) {
            insert_null(table, &mut nulls, key, name)?;
        } else {
            let bytes: [u8; 16] = values.value(row).try_into().map_err(|_| {
                Error::Internal(format!("attribute `{name}`: fixed-size value is not 16 bytes"))
            })?;
            table.insert(key.clone(), u128::from_be_bytes(bytes));
            if let Some(set) = nulls.as_mut() {
                set.remove(key.borrow());
            }
        }
    }
    Ok(())
}

fn insert_bytes_rows<'v, K: DictionaryKey, F: Fn(usize) -> &'v [u8]>(
    table: &mut KeyedTable<K, Arc<[u8]>>,
    mut nulls: Option<&mut FxHashSet<K>>,
    keys: &[K],
    rows: &[u32],
    array: &'v dyn Array,
    value: F,
    name: &str,
) -> Result<()> {
    for (key, &row) in keys.iter().zip(rows) {
        let row = row as usize;
        if array.is_null(row) {
            insert_null(table, &mut nulls, key, name)?;
        } else {
            table.insert(key.clone(), Arc::from(value(row)));
            if let Some(set) = nulls.as_mut() {
                set.remove(key.borrow());
            }
        }
    }
    Ok(())
}

fn insert_list<K: DictionaryKey>(
    table: &mut KeyedTable<K, ArrayRef>,
    mut nulls: Option<&mut FxHashSet<K>>,
    keys: &[K],
    rows: &[u32],
    column: &ArrayRef,
    name: &str,
) -> Result<()> {
    let values = column
        .as_any()
        .downcast_ref::<ListArray>()
        .ok_or_else(|| downcast_error(name))?;
    for (key, &row) in keys.iter().zip(rows) {
        let row = row as usize;
        if values.is_null(row) {
            insert_null(table, &mut nulls, key, name)?;
        } else {
            let row_values = values.value(row);
            // Deep copy detaches the stored row from the source batch's buffers.
            let copied = compute::concat(&[row_values.as_ref()])?;
            table.insert(key.clone(), copied);
            if let Some(set) = nulls.as_mut() {
                set.remove(key.borrow());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{StringArray, UInt32Array};

    fn utf8_attr(nullable: bool) -> DictionaryAttribute<u64> {
        let mut descriptor = AttributeDescriptor::new("name", ValueKind::Utf8);
        if nullable {
            descriptor = descriptor.nullable();
        }
        DictionaryAttribute::new(&descriptor, 1, TableLayout::Dense)
    }

    #[test]
    fn nullable_transitions_keep_exclusivity() {
        let mut attr = utf8_attr(true);
        let keys = vec![1u64, 2];
        let rows = vec![0u32, 1];

        let first: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        attr.insert_column(0, &keys, &rows, &first).unwrap();
        assert_eq!(attr.stored_len(0), 1);
        assert_eq!(attr.null_len(0), 1);
        assert!(attr.contains(0, &1));
        assert!(attr.contains(0, &2));

        // Key 1 flips to null, key 2 flips to a value.
        let second: ArrayRef = Arc::new(StringArray::from(vec![None, Some("b")]));
        attr.insert_column(0, &keys, &rows, &second).unwrap();
        assert_eq!(attr.stored_len(0), 1);
        assert_eq!(attr.null_len(0), 1);
        assert_eq!(attr.element_count(0), 2);
    }

    #[test]
    fn non_nullable_rejects_null_values() {
        let mut attr = utf8_attr(false);
        let column: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        let err = attr
            .insert_column(0, &[1, 2], &[0, 1], &column)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_mistyped_columns() {
        let mut attr = utf8_attr(false);
        let column: ArrayRef = Arc::new(UInt32Array::from(vec![1]));
        let err = attr.insert_column(0, &[1], &[0], &column).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn merge_stitches_shards_in_order() {
        let descriptor = AttributeDescriptor::new("value", ValueKind::UInt32);
        let mut left = DictionaryAttribute::<u64>::new(&descriptor, 1, TableLayout::Dense);
        let mut right = DictionaryAttribute::<u64>::new(&descriptor, 1, TableLayout::Dense);
        let col_left: ArrayRef = Arc::new(UInt32Array::from(vec![10]));
        let col_right: ArrayRef = Arc::new(UInt32Array::from(vec![20]));
        left.insert_column(0, &[1], &[0], &col_left).unwrap();
        right.insert_column(0, &[2], &[0], &col_right).unwrap();

        let merged = DictionaryAttribute::merge(vec![left, right]).unwrap();
        assert_eq!(merged.shard_count(), 2);
        assert!(merged.contains(0, &1));
        assert!(merged.contains(1, &2));
        assert_eq!(merged.element_count(0) + merged.element_count(1), 2);
    }
}
