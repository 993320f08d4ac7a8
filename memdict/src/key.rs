//! Key models for dictionaries.
//!
//! Two key flavors exist: simple keys are plain `u64` values read from a single
//! column, and complex keys are composites of several typed columns folded into one
//! opaque byte string. Complex keys use Arrow's row format for the fold, which is
//! injective and deterministic, so byte equality is exactly logical key equality and
//! the encoded form can be expanded back into the original columns when streaming a
//! dictionary out.
//!
//! Extraction produces a borrowed, batch-scoped view ([`ExtractedKeys`]). Probing a
//! table never allocates; a key is promoted to its owned form once, when the loader
//! actually inserts it.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, UInt64Array};
use arrow::datatypes::{DataType, Field, FieldRef};
use arrow::row::{RowConverter, SortField};
use memdict_result::{Error, Result};
use memdict_schema::{DictionaryStructure, KeyColumn, KeyDeclaration};

use crate::router::ShardRouter;

/// A dictionary key type: owned form, borrowed probe form, and the conversions
/// between Arrow columns and both forms.
pub trait DictionaryKey:
    Sized + Clone + Eq + Hash + Borrow<Self::Probe> + Send + Sync + 'static
{
    /// Borrowed form used to probe tables without promoting to an owned key.
    type Probe: ?Sized + Hash + Eq;
    /// Batch-scoped view over extracted keys.
    type Extracted<'a>: ExtractedKeys<Self>;
    /// Distinguishes the complex-key dictionary flavors in `type_name`.
    const COMPLEX: bool;

    /// Turn key columns into a probe view, validating types and rejecting nulls.
    fn extract<'a>(
        key_columns: &'a [ArrayRef],
        structure: &DictionaryStructure,
    ) -> Result<Self::Extracted<'a>>;

    /// Shard owning this key.
    fn shard(probe: &Self::Probe, router: &ShardRouter) -> usize;

    /// Arrow fields of the key columns, for outgoing batch schemas.
    fn key_fields(structure: &DictionaryStructure) -> Result<Vec<FieldRef>>;

    /// Expand owned keys back into key columns, for streaming contents out.
    fn build_key_columns(keys: &[Self], structure: &DictionaryStructure)
    -> Result<Vec<ArrayRef>>;

    /// Heap bytes owned by this key beyond its inline size, for memory accounting.
    fn heap_size(&self) -> usize;
}

/// Row-addressable view over the keys of one batch.
pub trait ExtractedKeys<K: DictionaryKey> {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrowed key for `row`.
    fn probe(&self, row: usize) -> &K::Probe;

    /// Owned key for `row`. Allocates for complex keys; loaders call this once per
    /// inserted row.
    fn owned(&self, row: usize) -> K;
}

/// Borrowed `u64` keys of one batch.
pub struct SimpleKeyView<'a> {
    values: &'a [u64],
}

impl ExtractedKeys<u64> for SimpleKeyView<'_> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn probe(&self, row: usize) -> &u64 {
        &self.values[row]
    }

    fn owned(&self, row: usize) -> u64 {
        self.values[row]
    }
}

impl DictionaryKey for u64 {
    type Probe = u64;
    type Extracted<'a> = SimpleKeyView<'a>;
    const COMPLEX: bool = false;

    fn extract<'a>(
        key_columns: &'a [ArrayRef],
        structure: &DictionaryStructure,
    ) -> Result<SimpleKeyView<'a>> {
        let KeyDeclaration::Simple { column } = &structure.key else {
            return Err(Error::Internal(
                "simple key extraction on a complex-key dictionary".into(),
            ));
        };
        let [array] = key_columns else {
            return Err(Error::Config(format!(
                "dictionary `{}` expects exactly one key column, got {}",
                structure.name,
                key_columns.len()
            )));
        };
        let keys = array
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| {
                Error::Config(format!(
                    "key column `{column}` must be UInt64, got {:?}",
                    array.data_type()
                ))
            })?;
        if keys.null_count() > 0 {
            return Err(Error::Config(format!(
                "key column `{column}` contains null values"
            )));
        }
        Ok(SimpleKeyView {
            values: keys.values(),
        })
    }

    #[inline]
    fn shard(probe: &u64, router: &ShardRouter) -> usize {
        router.shard_for_u64(*probe)
    }

    fn key_fields(structure: &DictionaryStructure) -> Result<Vec<FieldRef>> {
        let KeyDeclaration::Simple { column } = &structure.key else {
            return Err(Error::Internal(
                "simple key fields requested for a complex-key dictionary".into(),
            ));
        };
        Ok(vec![Arc::new(Field::new(column, DataType::UInt64, false))])
    }

    fn build_key_columns(
        keys: &[Self],
        _structure: &DictionaryStructure,
    ) -> Result<Vec<ArrayRef>> {
        Ok(vec![Arc::new(UInt64Array::from_iter_values(
            keys.iter().copied(),
        ))])
    }

    #[inline]
    fn heap_size(&self) -> usize {
        0
    }
}

/// Owned, arena-packed complex keys of one batch.
///
/// Each row is one row-format encoding; `ends` marks the exclusive end of every row
/// inside `arena`.
pub struct ComplexKeyRows {
    arena: Vec<u8>,
    ends: Vec<usize>,
}

impl ComplexKeyRows {
    #[inline]
    fn range(&self, row: usize) -> (usize, usize) {
        let start = if row == 0 { 0 } else { self.ends[row - 1] };
        (start, self.ends[row])
    }
}

impl ExtractedKeys<Arc<[u8]>> for ComplexKeyRows {
    fn len(&self) -> usize {
        self.ends.len()
    }

    fn probe(&self, row: usize) -> &[u8] {
        let (start, end) = self.range(row);
        &self.arena[start..end]
    }

    fn owned(&self, row: usize) -> Arc<[u8]> {
        Arc::from(self.probe(row))
    }
}

fn complex_columns(structure: &DictionaryStructure) -> Result<&[KeyColumn]> {
    match &structure.key {
        KeyDeclaration::Complex { columns } => Ok(columns),
        KeyDeclaration::Simple { .. } => Err(Error::Internal(
            "complex key handling on a simple-key dictionary".into(),
        )),
    }
}

fn complex_converter(columns: &[KeyColumn]) -> Result<RowConverter> {
    let sort_fields: Vec<SortField> = columns
        .iter()
        .map(|col| SortField::new(col.kind.data_type()))
        .collect();
    Ok(RowConverter::new(sort_fields)?)
}

impl DictionaryKey for Arc<[u8]> {
    type Probe = [u8];
    type Extracted<'a> = ComplexKeyRows;
    const COMPLEX: bool = true;

    fn extract<'a>(
        key_columns: &'a [ArrayRef],
        structure: &DictionaryStructure,
    ) -> Result<ComplexKeyRows> {
        let columns = complex_columns(structure)?;
        if key_columns.len() != columns.len() {
            return Err(Error::Config(format!(
                "dictionary `{}` expects {} key columns, got {}",
                structure.name,
                columns.len(),
                key_columns.len()
            )));
        }
        for (array, col) in key_columns.iter().zip(columns) {
            let declared = col.kind.data_type();
            if array.data_type() != &declared {
                return Err(Error::Config(format!(
                    "key column `{}` must be {declared:?}, got {:?}",
                    col.name,
                    array.data_type()
                )));
            }
            if array.null_count() > 0 {
                return Err(Error::Config(format!(
                    "key column `{}` contains null values",
                    col.name
                )));
            }
        }

        let converter = complex_converter(columns)?;
        let rows = converter.convert_columns(key_columns)?;
        let mut arena = Vec::new();
        let mut ends = Vec::with_capacity(rows.num_rows());
        for row in rows.iter() {
            arena.extend_from_slice(row.as_ref());
            ends.push(arena.len());
        }
        Ok(ComplexKeyRows { arena, ends })
    }

    #[inline]
    fn shard(probe: &[u8], router: &ShardRouter) -> usize {
        router.shard_for_bytes(probe)
    }

    fn key_fields(structure: &DictionaryStructure) -> Result<Vec<FieldRef>> {
        let columns = complex_columns(structure)?;
        Ok(columns
            .iter()
            .map(|col| Arc::new(Field::new(&col.name, col.kind.data_type(), false)))
            .collect())
    }

    fn build_key_columns(
        keys: &[Self],
        structure: &DictionaryStructure,
    ) -> Result<Vec<ArrayRef>> {
        let columns = complex_columns(structure)?;
        let converter = complex_converter(columns)?;
        let parser = converter.parser();
        let rows: Vec<_> = keys.iter().map(|key| parser.parse(key.as_ref())).collect();
        Ok(converter.convert_rows(rows)?)
    }

    #[inline]
    fn heap_size(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{StringArray, UInt32Array};
    use memdict_schema::ValueKind;

    fn simple_structure() -> DictionaryStructure {
        DictionaryStructure::simple("d", "id")
    }

    fn complex_structure() -> DictionaryStructure {
        DictionaryStructure::complex(
            "d",
            vec![
                KeyColumn::new("name", ValueKind::Utf8),
                KeyColumn::new("version", ValueKind::UInt32),
            ],
        )
    }

    #[test]
    fn simple_extraction_checks_shape() {
        let structure = simple_structure();
        let good: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(vec![1, 2, 3]))];
        let view = u64::extract(&good, &structure).unwrap();
        assert_eq!(view.len(), 3);
        assert_eq!(*view.probe(1), 2);
        assert_eq!(view.owned(2), 3);

        let wrong_type: Vec<ArrayRef> = vec![Arc::new(UInt32Array::from(vec![1]))];
        assert!(u64::extract(&wrong_type, &structure).is_err());

        let with_null: Vec<ArrayRef> = vec![Arc::new(UInt64Array::from(vec![
            Some(1),
            None,
        ]))];
        assert!(u64::extract(&with_null, &structure).is_err());

        let two: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from(vec![1])),
            Arc::new(UInt64Array::from(vec![2])),
        ];
        assert!(u64::extract(&two, &structure).is_err());
    }

    #[test]
    fn complex_keys_are_distinct_per_column_boundary() {
        // ("ab", 1) and ("a", 1) must encode differently even though the
        // concatenated raw bytes could collide.
        let structure = complex_structure();
        let cols: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["ab", "a"])),
            Arc::new(UInt32Array::from(vec![1, 1])),
        ];
        let view = <Arc<[u8]>>::extract(&cols, &structure).unwrap();
        assert_eq!(view.len(), 2);
        assert_ne!(view.probe(0), view.probe(1));
    }

    #[test]
    fn complex_keys_round_trip_to_columns() {
        let structure = complex_structure();
        let cols: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec!["alpha", "beta", "alpha"])),
            Arc::new(UInt32Array::from(vec![1, 7, 2])),
        ];
        let view = <Arc<[u8]>>::extract(&cols, &structure).unwrap();
        let keys: Vec<Arc<[u8]>> = (0..view.len()).map(|row| view.owned(row)).collect();

        let rebuilt = <Arc<[u8]>>::build_key_columns(&keys, &structure).unwrap();
        assert_eq!(rebuilt.len(), 2);
        let names = rebuilt[0]
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let versions = rebuilt[1]
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        assert_eq!(names.value(0), "alpha");
        assert_eq!(names.value(1), "beta");
        assert_eq!(names.value(2), "alpha");
        assert_eq!(versions.value(0), 1);
        assert_eq!(versions.value(1), 7);
        assert_eq!(versions.value(2), 2);
    }

    #[test]
    fn complex_extraction_validates_columns() {
        let structure = complex_structure();
        let swapped: Vec<ArrayRef> = vec![
            Arc::new(UInt32Array::from(vec![1])),
            Arc::new(StringArray::from(vec!["a"])),
        ];
        assert!(<Arc<[u8]>>::extract(&swapped, &structure).is_err());

        let missing: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec!["a"]))];
        assert!(<Arc<[u8]>>::extract(&missing, &structure).is_err());
    }
}
