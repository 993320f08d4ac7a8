//! The hashed dictionary engine.
//!
//! A [`HashedDictionary`] is built once from a [`DictionarySource`], holds every
//! key in per-shard hash tables with one typed table per attribute, and then
//! answers batched lookups without touching the source again. Refreshing is a
//! whole-new-dictionary affair: [`reload`](HashedDictionary::reload) builds a
//! replacement while readers keep using the old instance.

mod attribute;
mod gather;
mod hierarchy;
mod loader;
mod lookup;
mod sparse;
mod stream;
mod tables;
mod update;

pub use stream::ContentsStream;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use memdict_result::{Error, Result};
use memdict_schema::{
    DictionaryLifetime, DictionaryOptions, DictionaryStructure, KeyDeclaration, TableLayout,
};

use crate::key::DictionaryKey;
use crate::router::ShardRouter;
use crate::source::DictionarySource;
use crate::store::attribute::DictionaryAttribute;
use crate::store::hierarchy::ParentChildIndex;
use crate::store::tables::KeySet;

/// Hash-table dictionary over simple `u64` keys.
pub type SimpleHashedDictionary = HashedDictionary<u64>;

/// Hash-table dictionary over composite keys matched as opaque bytes.
pub type ComplexHashedDictionary = HashedDictionary<Arc<[u8]>>;

/// In-memory dictionary: all keys resident, lookups answered from hash tables.
///
/// The two supported key types are aliased as [`SimpleHashedDictionary`] and
/// [`ComplexHashedDictionary`]. Apart from construction and the hierarchy
/// operations, which exist only for simple keys, the two behave identically.
pub struct HashedDictionary<K: DictionaryKey> {
    structure: Arc<DictionaryStructure>,
    options: DictionaryOptions,
    source: Box<dyn DictionarySource>,
    router: ShardRouter,
    attributes: Vec<DictionaryAttribute<K>>,
    /// Per-shard key sets, used only when no attributes are declared.
    key_sets: Option<Vec<KeySet<K>>>,
    hierarchy: Option<ParentChildIndex>,
    /// Cached full row set for sources with an update field.
    update_block: Option<RecordBatch>,
    element_count: usize,
    bucket_count: usize,
    bytes_allocated: usize,
    query_count: AtomicU64,
    found_count: AtomicU64,
}

impl<K: DictionaryKey> fmt::Debug for HashedDictionary<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedDictionary")
            .field("name", &self.structure.name)
            .field("type_name", &self.type_name())
            .field("element_count", &self.element_count)
            .finish_non_exhaustive()
    }
}

impl<K: DictionaryKey> HashedDictionary<K> {
    fn create_inner(
        structure: DictionaryStructure,
        options: DictionaryOptions,
        mut source: Box<dyn DictionarySource>,
        previous: Option<&RecordBatch>,
    ) -> Result<Self> {
        structure.validate()?;
        options.validate()?;
        match (&structure.key, K::COMPLEX) {
            (KeyDeclaration::Simple { .. }, false) | (KeyDeclaration::Complex { .. }, true) => {}
            (KeyDeclaration::Simple { .. }, true) => {
                return Err(Error::Config(format!(
                    "dictionary `{}` declares a simple key but was opened as complex-key",
                    structure.name
                )));
            }
            (KeyDeclaration::Complex { .. }, false) => {
                return Err(Error::Config(format!(
                    "dictionary `{}` declares a complex key but was opened as simple-key",
                    structure.name
                )));
            }
        }
        if options.shard_count > 1 && source.supports_updates() {
            return Err(Error::Config(format!(
                "dictionary `{}`: a sharded load cannot be combined with an update field",
                structure.name
            )));
        }

        let structure = Arc::new(structure);
        let router = ShardRouter::new(options.shard_count);
        let started = Instant::now();
        let (loaded, update_block) = if source.supports_updates() {
            let stream = source.stream_updates()?;
            update::load_with_updates::<K>(&structure, &options, &router, stream, previous)?
        } else {
            let stream = source.stream_all()?;
            let loaded = loader::load_from_stream::<K>(&structure, &options, &router, stream)?;
            (loaded, None)
        };

        let mut dictionary = Self {
            structure,
            options,
            source,
            router,
            attributes: loaded.attributes,
            key_sets: loaded.key_sets,
            hierarchy: None,
            update_block,
            element_count: 0,
            bucket_count: 0,
            bytes_allocated: 0,
            query_count: AtomicU64::new(0),
            found_count: AtomicU64::new(0),
        };
        dictionary.finalize_metrics();
        if dictionary.options.require_nonempty && dictionary.element_count == 0 {
            return Err(Error::EmptySource {
                dictionary: dictionary.structure.name.clone(),
            });
        }
        tracing::debug!(
            dictionary = %dictionary.structure.name,
            keys = dictionary.element_count,
            shards = dictionary.options.shard_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dictionary load finished"
        );
        Ok(dictionary)
    }

    fn finalize_metrics(&mut self) {
        let shard_count = self.options.shard_count;
        let mut elements = 0usize;
        let mut buckets = 0usize;
        let mut bytes = 0usize;
        if let Some(sets) = &self.key_sets {
            for set in sets {
                elements += set.len();
                buckets += set.bucket_count();
                bytes += set.allocated_bytes();
            }
        } else if let Some(first) = self.attributes.first() {
            for shard in 0..shard_count {
                elements += first.element_count(shard);
                buckets += first.bucket_count(shard);
            }
            for attr in &self.attributes {
                bytes += attr.allocated_bytes();
            }
        }
        bytes += self.key_payload_bytes();
        if let Some(block) = &self.update_block {
            bytes += block.get_array_memory_size();
        }
        self.element_count = elements;
        self.bucket_count = buckets;
        self.bytes_allocated = bytes;
    }

    /// Heap bytes owned by the keys themselves. Counted once, against the first
    /// attribute, because every attribute clones the same shared key allocations.
    fn key_payload_bytes(&self) -> usize {
        if !K::COMPLEX {
            return 0;
        }
        let mut bytes = 0usize;
        if let Some(sets) = &self.key_sets {
            for set in sets {
                for key in set.iter() {
                    bytes += key.heap_size();
                }
            }
        } else if let Some(first) = self.attributes.first() {
            for shard in 0..self.options.shard_count {
                first.for_each_key(shard, |key| bytes += key.heap_size());
            }
        }
        bytes
    }

    fn attribute(&self, name: &str) -> Result<&DictionaryAttribute<K>> {
        let index = self.structure.attribute_index(name)?;
        Ok(&self.attributes[index])
    }

    fn contains_probe(&self, probe: &K::Probe) -> bool {
        let shard = K::shard(probe, &self.router);
        if let Some(sets) = &self.key_sets {
            return sets[shard].contains(probe);
        }
        match self.attributes.first() {
            Some(attr) => attr.contains(shard, probe),
            None => false,
        }
    }

    fn note_queries(&self, queried: u64, found: u64) {
        self.query_count.fetch_add(queried, Ordering::Relaxed);
        self.found_count.fetch_add(found, Ordering::Relaxed);
    }

    pub(crate) fn collect_shard_keys(&self, shard: usize, out: &mut Vec<K>) {
        if let Some(sets) = &self.key_sets {
            out.extend(sets[shard].iter().cloned());
            return;
        }
        if let Some(first) = self.attributes.first() {
            first.collect_keys(shard, out);
        }
    }

    pub fn structure(&self) -> &DictionaryStructure {
        &self.structure
    }

    pub fn options(&self) -> &DictionaryOptions {
        &self.options
    }

    /// Engine name in the family's naming scheme, reported for introspection.
    pub fn type_name(&self) -> &'static str {
        match (K::COMPLEX, self.options.layout) {
            (false, TableLayout::Dense) => "Hashed",
            (false, TableLayout::Sparse) => "SparseHashed",
            (true, TableLayout::Dense) => "ComplexKeyHashed",
            (true, TableLayout::Sparse) => "ComplexKeySparseHashed",
        }
    }

    /// Distinct keys held, across all shards and including null-only keys.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Total hash buckets across shards, for capacity introspection.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Estimated resident bytes of tables, payloads, and the cached update block.
    /// The hierarchy index is accounted separately.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Estimated resident bytes of the parent-to-children index. Zero when the
    /// structure declares no hierarchy.
    pub fn hierarchy_bytes_allocated(&self) -> usize {
        self.hierarchy
            .as_ref()
            .map_or(0, ParentChildIndex::allocated_bytes)
    }

    pub fn load_factor(&self) -> f64 {
        if self.bucket_count == 0 {
            0.0
        } else {
            self.element_count as f64 / self.bucket_count as f64
        }
    }

    /// Keys looked up since this instance was built.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Fraction of looked-up keys that were present. Zero before any query.
    pub fn found_rate(&self) -> f64 {
        let queries = self.query_count.load(Ordering::Relaxed);
        if queries == 0 {
            return 0.0;
        }
        self.found_count.load(Ordering::Relaxed) as f64 / queries as f64
    }

    /// Always `1.0`: every lookup is answered from memory, there is no miss path.
    pub fn hit_rate(&self) -> f64 {
        1.0
    }

    /// Declared injectivity of an attribute, as a planner hint.
    pub fn is_injective(&self, attribute: &str) -> Result<bool> {
        let index = self.structure.attribute_index(attribute)?;
        Ok(self.structure.attributes[index].injective)
    }

    pub fn lifetime(&self) -> Option<DictionaryLifetime> {
        self.options.lifetime
    }
}

impl HashedDictionary<u64> {
    /// Build a simple-key dictionary by draining the source.
    ///
    /// When the structure declares a hierarchical attribute, the parent-to-children
    /// index is built eagerly here so descendant scans never walk the raw tables.
    pub fn create(
        structure: DictionaryStructure,
        options: DictionaryOptions,
        source: Box<dyn DictionarySource>,
    ) -> Result<Self> {
        let mut dictionary = Self::create_inner(structure, options, source, None)?;
        dictionary.build_hierarchy()?;
        Ok(dictionary)
    }

    /// Build a replacement instance from a fresh read of the source.
    ///
    /// The current instance is untouched; callers swap the result in under an
    /// `Arc` once it is ready. Query counters start over on the new instance.
    pub fn reload(&self) -> Result<Self> {
        let result = Self::create_inner(
            self.structure.as_ref().clone(),
            self.options.clone(),
            self.source.clone_source(),
            self.update_block.as_ref(),
        )
        .and_then(|mut next| {
            next.build_hierarchy()?;
            Ok(next)
        });
        if let Err(err) = &result {
            tracing::error!(dictionary = %self.structure.name, "reload failed: {err}");
        }
        result
    }
}

impl HashedDictionary<Arc<[u8]>> {
    /// Build a complex-key dictionary by draining the source.
    pub fn create(
        structure: DictionaryStructure,
        options: DictionaryOptions,
        source: Box<dyn DictionarySource>,
    ) -> Result<Self> {
        Self::create_inner(structure, options, source, None)
    }

    /// Build a replacement instance from a fresh read of the source.
    pub fn reload(&self) -> Result<Self> {
        let result = Self::create_inner(
            self.structure.as_ref().clone(),
            self.options.clone(),
            self.source.clone_source(),
            self.update_block.as_ref(),
        );
        if let Err(err) = &result {
            tracing::error!(dictionary = %self.structure.name, "reload failed: {err}");
        }
        result
    }
}
