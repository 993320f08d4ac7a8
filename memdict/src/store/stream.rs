//! Streaming a dictionary's contents back out as record batches.
//!
//! Streams borrow the dictionary and walk whole shards: each stream owns a
//! contiguous shard range, collects one shard's keys at a time, and emits batches
//! of at most `batch_rows` rows. Together the streams cover every key exactly
//! once. Reading contents does not move the query counters.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use arrow::datatypes::{Field, FieldRef, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use memdict_result::{Error, Result};

use crate::key::DictionaryKey;
use crate::store::HashedDictionary;
use crate::store::gather::{DefaultSpec, gather_column};

#[derive(Clone)]
enum Selected {
    Key(usize),
    Attribute(usize),
}

/// One partition of a dictionary contents read.
pub struct ContentsStream<'a, K: DictionaryKey> {
    dictionary: &'a HashedDictionary<K>,
    schema: SchemaRef,
    selected: Vec<Selected>,
    shards: Range<usize>,
    pending: Vec<K>,
    pos: usize,
    batch_rows: usize,
}

impl<K: DictionaryKey> fmt::Debug for ContentsStream<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentsStream")
            .field("shards", &self.shards)
            .field("batch_rows", &self.batch_rows)
            .finish_non_exhaustive()
    }
}

impl<K: DictionaryKey> HashedDictionary<K> {
    /// Open `num_streams` independent streams over the dictionary's contents.
    ///
    /// `columns` selects key columns and attributes by name in the requested
    /// order; `None` selects key columns first, then every attribute in
    /// declaration order. `num_streams` is clamped to `[1, shard_count]` and the
    /// shards are split contiguously across the streams, so the union of all
    /// streams is the whole dictionary with no key repeated. Batches carry at most
    /// `batch_rows` rows; row order within and across batches is unspecified.
    pub fn stream_contents(
        &self,
        columns: Option<&[&str]>,
        batch_rows: usize,
        num_streams: usize,
    ) -> Result<Vec<ContentsStream<'_, K>>> {
        if batch_rows == 0 {
            return Err(Error::Config("batch_rows must be at least 1".into()));
        }
        let key_fields = K::key_fields(&self.structure)?;
        let key_names = self.structure.key_column_names();

        let mut selected = Vec::new();
        let mut fields: Vec<FieldRef> = Vec::new();
        match columns {
            None => {
                for (idx, field) in key_fields.iter().enumerate() {
                    selected.push(Selected::Key(idx));
                    fields.push(field.clone());
                }
                for (idx, attr) in self.attributes.iter().enumerate() {
                    selected.push(Selected::Attribute(idx));
                    fields.push(Arc::new(Field::new(
                        &attr.name,
                        attr.data_type.clone(),
                        attr.nullable,
                    )));
                }
            }
            Some(names) => {
                for name in names {
                    if let Some(pos) = key_names.iter().position(|key| key == name) {
                        selected.push(Selected::Key(pos));
                        fields.push(key_fields[pos].clone());
                    } else {
                        let index = self.structure.attribute_index(name)?;
                        let attr = &self.attributes[index];
                        selected.push(Selected::Attribute(index));
                        fields.push(Arc::new(Field::new(
                            &attr.name,
                            attr.data_type.clone(),
                            attr.nullable,
                        )));
                    }
                }
            }
        }
        if selected.is_empty() {
            return Err(Error::Config(
                "contents stream needs at least one column".into(),
            ));
        }
        let schema = Arc::new(Schema::new(fields));

        let shard_count = self.options.shard_count;
        let num_streams = num_streams.clamp(1, shard_count);
        let base = shard_count / num_streams;
        let extra = shard_count % num_streams;
        let mut streams = Vec::with_capacity(num_streams);
        let mut start = 0;
        for idx in 0..num_streams {
            let len = base + usize::from(idx < extra);
            streams.push(ContentsStream {
                dictionary: self,
                schema: schema.clone(),
                selected: selected.clone(),
                shards: start..start + len,
                pending: Vec::new(),
                pos: 0,
                batch_rows,
            });
            start += len;
        }
        Ok(streams)
    }
}

impl<K: DictionaryKey> ContentsStream<'_, K> {
    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Next batch, or `None` once this stream's shards are exhausted.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        loop {
            if self.pos < self.pending.len() {
                let end = (self.pos + self.batch_rows).min(self.pending.len());
                let keys = &self.pending[self.pos..end];
                let batch = Self::emit(self.dictionary, &self.schema, &self.selected, keys)?;
                self.pos = end;
                return Ok(Some(batch));
            }
            let Some(shard) = self.shards.next() else {
                return Ok(None);
            };
            self.pending.clear();
            self.pos = 0;
            self.dictionary.collect_shard_keys(shard, &mut self.pending);
        }
    }

    fn emit(
        dictionary: &HashedDictionary<K>,
        schema: &SchemaRef,
        selected: &[Selected],
        keys: &[K],
    ) -> Result<RecordBatch> {
        let key_columns = K::build_key_columns(keys, &dictionary.structure)?;
        let probes: Vec<&K::Probe> = keys.iter().map(|key| key.borrow()).collect();
        let mut arrays = Vec::with_capacity(selected.len());
        for sel in selected {
            match sel {
                Selected::Key(idx) => arrays.push(key_columns[*idx].clone()),
                Selected::Attribute(idx) => {
                    let attr = &dictionary.attributes[*idx];
                    let (array, _) =
                        gather_column(attr, &probes, &dictionary.router, DefaultSpec::None)?;
                    arrays.push(array);
                }
            }
        }
        Ok(RecordBatch::try_new(schema.clone(), arrays)?)
    }
}

impl<K: DictionaryKey> Iterator for ContentsStream<'_, K> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
