//! Sharded load pipeline.
//!
//! The calling thread streams source batches, extracts and routes keys, and feeds
//! one bounded channel per shard in fixed-size blocks. A worker thread per shard
//! absorbs its blocks into a single-shard store; the stores are stitched together
//! in shard order once the stream ends. The bounded channels give block-granular
//! backpressure, so a slow shard stalls the reader instead of letting queued rows
//! grow without limit.
//!
//! Rows for one key always route to the same shard and each channel is FIFO, so
//! last-write-wins order inside a shard matches source order.

use std::mem;
use std::sync::Arc;
use std::thread;

use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use crossbeam_channel::{Receiver, bounded};
use memdict_result::{Error, Result};
use memdict_schema::{DictionaryOptions, DictionaryStructure, TableLayout};

use crate::key::{DictionaryKey, ExtractedKeys};
use crate::router::ShardRouter;
use crate::source::BatchStream;
use crate::store::attribute::DictionaryAttribute;
use crate::store::tables::KeySet;

/// Rows per routed block, and the granule of the backlog bound.
pub(crate) const LOAD_BLOCK_ROWS: usize = 1024;

/// One routed slice of a source batch, bound for a single shard.
struct ShardBlock<K> {
    keys: Vec<K>,
    rows: Vec<u32>,
    /// Attribute columns of the originating batch, shared across that batch's
    /// blocks. Empty for dictionaries with no attributes.
    columns: Arc<Vec<ArrayRef>>,
}

/// Store for one shard while its worker is running.
struct ShardStore<K> {
    attributes: Vec<DictionaryAttribute<K>>,
    key_set: Option<KeySet<K>>,
}

impl<K: DictionaryKey> ShardStore<K> {
    fn new(structure: &DictionaryStructure, layout: TableLayout) -> Self {
        if structure.attributes.is_empty() {
            Self {
                attributes: Vec::new(),
                key_set: Some(KeySet::new(layout)),
            }
        } else {
            Self {
                attributes: structure
                    .attributes
                    .iter()
                    .map(|descriptor| DictionaryAttribute::new(descriptor, 1, layout))
                    .collect(),
                key_set: None,
            }
        }
    }

    fn absorb(&mut self, block: &ShardBlock<K>) -> Result<()> {
        if let Some(set) = &mut self.key_set {
            set.reserve(block.keys.len());
            for key in &block.keys {
                set.insert(key.clone());
            }
            return Ok(());
        }
        for (attr, column) in self.attributes.iter_mut().zip(block.columns.iter()) {
            attr.insert_column(0, &block.keys, &block.rows, column)?;
        }
        Ok(())
    }
}

/// Merged result of a load, ready to move into the dictionary.
pub(crate) struct LoadedShards<K> {
    pub attributes: Vec<DictionaryAttribute<K>>,
    /// Per-shard key sets, present only for dictionaries with no attributes.
    pub key_sets: Option<Vec<KeySet<K>>>,
}

impl<K: DictionaryKey> LoadedShards<K> {
    fn from_single(store: ShardStore<K>) -> Self {
        Self {
            attributes: store.attributes,
            key_sets: store.key_set.map(|set| vec![set]),
        }
    }
}

/// Drain `stream` into per-shard stores.
///
/// With `shard_count == 1` everything runs on the calling thread. Otherwise the
/// calling thread routes rows while one worker per shard builds tables; the first
/// worker error wins over a producer-side error, because a failed worker also
/// surfaces as a closed channel on the producer.
pub(crate) fn load_from_stream<K: DictionaryKey>(
    structure: &Arc<DictionaryStructure>,
    options: &DictionaryOptions,
    router: &ShardRouter,
    stream: BatchStream,
) -> Result<LoadedShards<K>> {
    if options.shard_count <= 1 {
        return load_single_shard(structure, options, router, stream);
    }

    let shard_count = options.shard_count;
    let capacity = (options.shard_backlog / LOAD_BLOCK_ROWS).max(1);
    let mut senders = Vec::with_capacity(shard_count);
    let mut handles = Vec::with_capacity(shard_count);
    for _ in 0..shard_count {
        let (tx, rx) = bounded::<ShardBlock<K>>(capacity);
        senders.push(tx);
        let structure = Arc::clone(structure);
        let layout = options.layout;
        handles.push(thread::spawn(move || shard_worker(&structure, layout, rx)));
    }

    let mut producer_error: Option<Error> = None;
    let mut send_failed = false;
    'stream: for batch in stream {
        let batch = match batch {
            Ok(batch) => batch,
            Err(err) => {
                producer_error = Some(err);
                break;
            }
        };
        if batch.num_rows() == 0 {
            continue;
        }
        let blocks = match split_batch::<K>(&batch, structure, router, shard_count) {
            Ok(blocks) => blocks,
            Err(err) => {
                producer_error = Some(err);
                break;
            }
        };
        for (shard, block) in blocks {
            if senders[shard].send(block).is_err() {
                // A worker dropped its receiver; its join below explains why.
                send_failed = true;
                break 'stream;
            }
        }
    }
    drop(senders);

    let mut stores = Vec::with_capacity(shard_count);
    let mut worker_error: Option<Error> = None;
    for handle in handles {
        match handle.join() {
            Ok(Ok(store)) => stores.push(store),
            Ok(Err(err)) => {
                if worker_error.is_none() {
                    worker_error = Some(err);
                }
            }
            Err(_) => {
                if worker_error.is_none() {
                    worker_error = Some(Error::Internal("shard worker panicked during load".into()));
                }
            }
        }
    }
    if let Some(err) = worker_error {
        tracing::warn!(dictionary = %structure.name, "sharded load aborted: {err}");
        return Err(err);
    }
    if let Some(err) = producer_error {
        tracing::warn!(dictionary = %structure.name, "source stream failed mid-load: {err}");
        return Err(err);
    }
    if send_failed {
        return Err(Error::Internal(
            "shard worker exited before the load finished".into(),
        ));
    }
    merge_stores(stores, structure)
}

fn load_single_shard<K: DictionaryKey>(
    structure: &DictionaryStructure,
    options: &DictionaryOptions,
    router: &ShardRouter,
    stream: BatchStream,
) -> Result<LoadedShards<K>> {
    let mut store = ShardStore::new(structure, options.layout);
    for batch in stream {
        let batch = batch?;
        if batch.num_rows() == 0 {
            continue;
        }
        for (_, block) in split_batch::<K>(&batch, structure, router, 1)? {
            store.absorb(&block)?;
        }
    }
    Ok(LoadedShards::from_single(store))
}

fn shard_worker<K: DictionaryKey>(
    structure: &DictionaryStructure,
    layout: TableLayout,
    receiver: Receiver<ShardBlock<K>>,
) -> Result<ShardStore<K>> {
    let mut store = ShardStore::new(structure, layout);
    while let Ok(block) = receiver.recv() {
        store.absorb(&block)?;
    }
    Ok(store)
}

/// Resolve the batch's key and attribute columns, extract keys, and route every
/// row. Per-shard blocks come out in source row order.
fn split_batch<K: DictionaryKey>(
    batch: &RecordBatch,
    structure: &DictionaryStructure,
    router: &ShardRouter,
    shard_count: usize,
) -> Result<Vec<(usize, ShardBlock<K>)>> {
    let mut key_columns = Vec::new();
    for name in structure.key_column_names() {
        let column = batch.column_by_name(name).ok_or_else(|| {
            Error::Config(format!(
                "dictionary `{}`: source batch is missing key column `{name}`",
                structure.name
            ))
        })?;
        key_columns.push(column.clone());
    }
    let mut attr_columns = Vec::with_capacity(structure.attributes.len());
    for descriptor in &structure.attributes {
        let column = batch.column_by_name(&descriptor.name).ok_or_else(|| {
            Error::Config(format!(
                "dictionary `{}`: source batch is missing attribute column `{}`",
                structure.name, descriptor.name
            ))
        })?;
        attr_columns.push(column.clone());
    }
    let columns = Arc::new(attr_columns);

    let extracted = K::extract(&key_columns, structure)?;
    let mut blocks: Vec<(usize, ShardBlock<K>)> = Vec::new();
    let mut pending: Vec<(Vec<K>, Vec<u32>)> = vec![(Vec::new(), Vec::new()); shard_count];
    for row in 0..extracted.len() {
        let shard = K::shard(extracted.probe(row), router);
        let (keys, rows) = &mut pending[shard];
        keys.push(extracted.owned(row));
        rows.push(row as u32);
        if keys.len() >= LOAD_BLOCK_ROWS {
            blocks.push((
                shard,
                ShardBlock {
                    keys: mem::take(keys),
                    rows: mem::take(rows),
                    columns: Arc::clone(&columns),
                },
            ));
        }
    }
    for (shard, (keys, rows)) in pending.into_iter().enumerate() {
        if !keys.is_empty() {
            blocks.push((
                shard,
                ShardBlock {
                    keys,
                    rows,
                    columns: Arc::clone(&columns),
                },
            ));
        }
    }
    Ok(blocks)
}

fn merge_stores<K: DictionaryKey>(
    stores: Vec<ShardStore<K>>,
    structure: &DictionaryStructure,
) -> Result<LoadedShards<K>> {
    if structure.attributes.is_empty() {
        let key_sets = stores
            .into_iter()
            .map(|store| {
                store
                    .key_set
                    .ok_or_else(|| Error::Internal("shard store lost its key set".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(LoadedShards {
            attributes: Vec::new(),
            key_sets: Some(key_sets),
        });
    }

    let mut columns: Vec<Vec<DictionaryAttribute<K>>> = (0..structure.attributes.len())
        .map(|_| Vec::with_capacity(stores.len()))
        .collect();
    for store in stores {
        for (slot, attr) in columns.iter_mut().zip(store.attributes) {
            slot.push(attr);
        }
    }
    let attributes = columns
        .into_iter()
        .map(DictionaryAttribute::merge)
        .collect::<Result<Vec<_>>>()?;
    Ok(LoadedShards {
        attributes,
        key_sets: None,
    })
}
