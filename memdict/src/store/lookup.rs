//! Batched key lookups.

use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::datatypes::DataType;
use memdict_result::{Error, Result};

use crate::key::{DictionaryKey, ExtractedKeys};
use crate::store::HashedDictionary;
use crate::store::gather::{DefaultSpec, gather_column};

impl<K: DictionaryKey> HashedDictionary<K> {
    /// Look up one attribute for a batch of keys.
    ///
    /// `key_columns` must match the declared key shape; `result_type` must equal
    /// the attribute's Arrow type and exists so callers fail loudly on schema
    /// drift instead of silently reinterpreting. For keys the dictionary does not
    /// hold, `defaults` (row-aligned with the keys) wins over the attribute's
    /// declared default, which wins over the type's natural zero. Keys stored as
    /// null come back as null.
    pub fn get_column(
        &self,
        attribute: &str,
        result_type: &DataType,
        key_columns: &[ArrayRef],
        defaults: Option<&ArrayRef>,
    ) -> Result<ArrayRef> {
        let attr = self.attribute(attribute)?;
        if result_type != &attr.data_type {
            return Err(Error::Config(format!(
                "attribute `{attribute}` of dictionary `{}` is {:?}, requested {:?}",
                self.structure.name, attr.data_type, result_type
            )));
        }
        let extracted = K::extract(key_columns, &self.structure)?;
        let rows = extracted.len();
        if let Some(column) = defaults {
            if column.len() != rows {
                return Err(Error::Config(format!(
                    "default column has {} rows, key columns have {rows}",
                    column.len()
                )));
            }
            if column.data_type() != &attr.data_type {
                return Err(Error::Config(format!(
                    "default column for attribute `{attribute}` is {:?}, expected {:?}",
                    column.data_type(),
                    attr.data_type
                )));
            }
        }

        let probes: Vec<&K::Probe> = (0..rows).map(|row| extracted.probe(row)).collect();
        let spec = match (defaults, &attr.default) {
            (Some(column), _) => DefaultSpec::Column(column),
            (None, Some(declared)) => DefaultSpec::Declared(declared),
            (None, None) => DefaultSpec::None,
        };
        let (array, found) = gather_column(attr, &probes, &self.router, spec)?;
        self.note_queries(rows as u64, found);
        Ok(array)
    }

    /// Membership test for a batch of keys. A key stored with only null attribute
    /// values still counts as present.
    pub fn has_keys(&self, key_columns: &[ArrayRef]) -> Result<BooleanArray> {
        let extracted = K::extract(key_columns, &self.structure)?;
        let rows = extracted.len();
        let mut found = 0u64;
        let values: BooleanArray = (0..rows)
            .map(|row| {
                let hit = self.contains_probe(extracted.probe(row));
                if hit {
                    found += 1;
                }
                Some(hit)
            })
            .collect();
        self.note_queries(rows as u64, found);
        Ok(values)
    }
}
