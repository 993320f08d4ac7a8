//! Merge-based refresh for sources that track an update field.
//!
//! Such a source streams only the rows changed since the previous refresh. The
//! engine keeps the full row set as one cached record batch: on refresh, cached
//! rows whose key reappears in the new wave are dropped, the wave is appended, and
//! the merged batch both rebuilds the tables and becomes the next cache. The merge
//! keeps old rows first so the loader's last-write-wins order favors the wave.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray};
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use memdict_result::{Error, Result};
use memdict_schema::{DictionaryOptions, DictionaryStructure};
use rustc_hash::FxHashSet;

use crate::key::{DictionaryKey, ExtractedKeys};
use crate::router::ShardRouter;
use crate::source::BatchStream;
use crate::store::loader::{LoadedShards, load_from_stream};

/// Drain an update stream, merge it over the previous cached block, and build
/// fresh tables from the merged rows.
///
/// Returns the loaded shards and the batch to cache for the next refresh. `None`
/// means the source has produced no rows at all yet.
pub(crate) fn load_with_updates<K: DictionaryKey>(
    structure: &Arc<DictionaryStructure>,
    options: &DictionaryOptions,
    router: &ShardRouter,
    stream: BatchStream,
    previous: Option<&RecordBatch>,
) -> Result<(LoadedShards<K>, Option<RecordBatch>)> {
    let mut waves = Vec::new();
    for batch in stream {
        let batch = batch?;
        if batch.num_rows() > 0 {
            waves.push(batch);
        }
    }
    let wave = match waves.first() {
        Some(first) => {
            let schema = first.schema();
            Some(concat_batches(&schema, &waves)?)
        }
        None => None,
    };

    let merged = match (previous, wave) {
        (Some(prev), Some(wave)) => {
            if prev.schema() != wave.schema() {
                return Err(Error::Config(format!(
                    "dictionary `{}`: update stream schema does not match the cached rows",
                    structure.name
                )));
            }
            Some(merge_waves::<K>(structure, prev, &wave)?)
        }
        (Some(prev), None) => Some(prev.clone()),
        (None, Some(wave)) => Some(wave),
        (None, None) => None,
    };

    if let Some(batch) = &merged {
        tracing::debug!(
            dictionary = %structure.name,
            rows = batch.num_rows(),
            "update wave merged over cached rows"
        );
    }
    let stream: BatchStream = match merged.clone() {
        Some(batch) => Box::new(std::iter::once(Ok(batch))),
        None => Box::new(std::iter::empty()),
    };
    let loaded = load_from_stream(structure, options, router, stream)?;
    Ok((loaded, merged))
}

/// Drop cached rows overwritten by the wave, then append the wave.
fn merge_waves<K: DictionaryKey>(
    structure: &DictionaryStructure,
    previous: &RecordBatch,
    wave: &RecordBatch,
) -> Result<RecordBatch> {
    let new_keys: FxHashSet<K> = {
        let columns = key_columns(wave, structure)?;
        let extracted = K::extract(&columns, structure)?;
        (0..extracted.len()).map(|row| extracted.owned(row)).collect()
    };

    let columns = key_columns(previous, structure)?;
    let extracted = K::extract(&columns, structure)?;
    let keep: BooleanArray = (0..extracted.len())
        .map(|row| Some(!new_keys.contains(extracted.probe(row))))
        .collect();
    let kept = filter_record_batch(previous, &keep)?;

    let schema = previous.schema();
    Ok(concat_batches(&schema, &[kept, wave.clone()])?)
}

fn key_columns(batch: &RecordBatch, structure: &DictionaryStructure) -> Result<Vec<ArrayRef>> {
    structure
        .key_column_names()
        .into_iter()
        .map(|name| {
            batch.column_by_name(name).cloned().ok_or_else(|| {
                Error::Config(format!(
                    "dictionary `{}`: update rows are missing key column `{name}`",
                    structure.name
                ))
            })
        })
        .collect()
}
