//! Layout-erased shard tables.
//!
//! Every shard of every attribute holds its keys in one of these tables. The dense
//! layout is a plain `FxHashMap`; the sparse layout is the bitmap-grouped
//! [`SparseTable`]. Call sites pick once at construction and never branch again on
//! layout outside this module.

use std::borrow::Borrow;
use std::collections::{hash_map, hash_set};
use std::hash::Hash;
use std::mem;

use memdict_schema::TableLayout;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::store::sparse::{SparseIter, SparseTable};

/// One shard's key-to-value table.
pub(crate) enum KeyedTable<K, V> {
    Dense(FxHashMap<K, V>),
    Sparse(SparseTable<K, V>),
}

impl<K: Eq + Hash, V> KeyedTable<K, V> {
    pub fn new(layout: TableLayout) -> Self {
        match layout {
            TableLayout::Dense => KeyedTable::Dense(FxHashMap::default()),
            TableLayout::Sparse => KeyedTable::Sparse(SparseTable::new()),
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            KeyedTable::Dense(map) => map.get(key),
            KeyedTable::Sparse(table) => table.get(key),
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            KeyedTable::Dense(map) => map.contains_key(key),
            KeyedTable::Sparse(table) => table.contains_key(key),
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self {
            KeyedTable::Dense(map) => map.insert(key, value),
            KeyedTable::Sparse(table) => table.insert(key, value),
        }
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            KeyedTable::Dense(map) => map.remove(key),
            KeyedTable::Sparse(table) => table.remove(key),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            KeyedTable::Dense(map) => map.len(),
            KeyedTable::Sparse(table) => table.len(),
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        match self {
            KeyedTable::Dense(map) => map.reserve(additional),
            KeyedTable::Sparse(table) => table.reserve(additional),
        }
    }

    pub fn iter(&self) -> TableIter<'_, K, V> {
        match self {
            KeyedTable::Dense(map) => TableIter::Dense(map.iter()),
            KeyedTable::Sparse(table) => TableIter::Sparse(table.iter()),
        }
    }

    /// Slots the table addresses. The dense count is derived from the usable
    /// capacity, so it is an estimate.
    pub fn bucket_count(&self) -> usize {
        match self {
            KeyedTable::Dense(map) => dense_buckets(map.capacity()),
            KeyedTable::Sparse(table) => table.slot_count(),
        }
    }

    /// Bytes held by the table itself, excluding heap payloads behind keys or
    /// values. The dense figure is an estimate.
    pub fn allocated_bytes(&self) -> usize {
        match self {
            KeyedTable::Dense(map) => {
                dense_buckets(map.capacity()) * (mem::size_of::<(K, V)>() + 1)
            }
            KeyedTable::Sparse(table) => table.allocated_bytes(),
        }
    }
}

pub(crate) enum TableIter<'a, K, V> {
    Dense(hash_map::Iter<'a, K, V>),
    Sparse(SparseIter<'a, K, V>),
}

impl<'a, K, V> Iterator for TableIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            TableIter::Dense(iter) => iter.next(),
            TableIter::Sparse(iter) => iter.next(),
        }
    }
}

/// One shard's key set, for dictionaries that declare no attributes.
pub(crate) enum KeySet<K> {
    Dense(FxHashSet<K>),
    Sparse(SparseTable<K, ()>),
}

impl<K: Eq + Hash> KeySet<K> {
    pub fn new(layout: TableLayout) -> Self {
        match layout {
            TableLayout::Dense => KeySet::Dense(FxHashSet::default()),
            TableLayout::Sparse => KeySet::Sparse(SparseTable::new()),
        }
    }

    pub fn insert(&mut self, key: K) -> bool {
        match self {
            KeySet::Dense(set) => set.insert(key),
            KeySet::Sparse(table) => table.insert(key, ()).is_none(),
        }
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self {
            KeySet::Dense(set) => set.contains(key),
            KeySet::Sparse(table) => table.contains_key(key),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            KeySet::Dense(set) => set.len(),
            KeySet::Sparse(table) => table.len(),
        }
    }

    pub fn reserve(&mut self, additional: usize) {
        match self {
            KeySet::Dense(set) => set.reserve(additional),
            KeySet::Sparse(table) => table.reserve(additional),
        }
    }

    pub fn iter(&self) -> KeySetIter<'_, K> {
        match self {
            KeySet::Dense(set) => KeySetIter::Dense(set.iter()),
            KeySet::Sparse(table) => KeySetIter::Sparse(table.iter()),
        }
    }

    pub fn bucket_count(&self) -> usize {
        match self {
            KeySet::Dense(set) => dense_buckets(set.capacity()),
            KeySet::Sparse(table) => table.slot_count(),
        }
    }

    pub fn allocated_bytes(&self) -> usize {
        match self {
            KeySet::Dense(set) => dense_buckets(set.capacity()) * (mem::size_of::<K>() + 1),
            KeySet::Sparse(table) => table.allocated_bytes(),
        }
    }
}

pub(crate) enum KeySetIter<'a, K> {
    Dense(hash_set::Iter<'a, K>),
    Sparse(SparseIter<'a, K, ()>),
}

impl<'a, K> Iterator for KeySetIter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            KeySetIter::Dense(iter) => iter.next(),
            KeySetIter::Sparse(iter) => iter.next().map(|(key, _)| key),
        }
    }
}

/// Usable capacity of a swiss table is about 7/8 of its buckets.
#[inline]
pub(crate) fn dense_buckets(capacity: usize) -> usize {
    capacity * 8 / 7
}
