//! Hierarchy traversal over a parent-key attribute.
//!
//! The hierarchical attribute stores each key's parent. Ancestor walks read those
//! tables directly; descendant walks use a parent-to-children index built once at
//! load time. Both directions detect loops explicitly and fail the whole call
//! rather than returning a truncated chain, because a loop means the source data
//! is broken, not that a key is missing.

use std::sync::Arc;

use arrow::array::{Array, BooleanArray, ListArray, UInt64Array};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field};
use memdict_result::{Error, Result};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::store::HashedDictionary;
use crate::store::attribute::DictionaryAttribute;
use crate::store::tables::{KeyedTable, dense_buckets};

/// Parent-to-children edges of the loaded hierarchy.
pub(crate) struct ParentChildIndex {
    children: FxHashMap<u64, Vec<u64>>,
}

impl ParentChildIndex {
    fn build(attr: &DictionaryAttribute<u64>) -> Result<Self> {
        let tables = attr.u64_tables()?;
        let mut children: FxHashMap<u64, Vec<u64>> = FxHashMap::default();
        for table in tables {
            for (child, parent) in table.iter() {
                children.entry(*parent).or_default().push(*child);
            }
        }
        Ok(Self { children })
    }

    fn children_of(&self, key: u64) -> &[u64] {
        self.children.get(&key).map_or(&[], |list| list.as_slice())
    }

    pub fn allocated_bytes(&self) -> usize {
        let buckets = dense_buckets(self.children.capacity());
        buckets * (size_of::<(u64, Vec<u64>)>() + 1)
            + self
                .children
                .values()
                .map(|list| list.capacity() * size_of::<u64>())
                .sum::<usize>()
    }
}

impl HashedDictionary<u64> {
    /// Build the parent-to-children index if a hierarchical attribute is declared.
    pub(crate) fn build_hierarchy(&mut self) -> Result<()> {
        let Some(index) = self.structure.hierarchical_attribute_index() else {
            return Ok(());
        };
        let built = ParentChildIndex::build(&self.attributes[index])?;
        self.bytes_allocated += built.allocated_bytes();
        self.hierarchy = Some(built);
        Ok(())
    }

    fn hierarchical_attribute(&self) -> Result<&DictionaryAttribute<u64>> {
        let Some(index) = self.structure.hierarchical_attribute_index() else {
            return Err(Error::Config(format!(
                "dictionary `{}` declares no hierarchical attribute",
                self.structure.name
            )));
        };
        Ok(&self.attributes[index])
    }

    /// Ancestor chain for each key: the key itself, then its parent, up to the
    /// first parent that is not in the dictionary. Keys not in the dictionary get
    /// an empty list.
    pub fn get_hierarchy(&self, keys: &UInt64Array) -> Result<ListArray> {
        let attr = self.hierarchical_attribute()?;
        let tables = attr.u64_tables()?;

        let mut flat: Vec<u64> = Vec::new();
        let mut lengths: Vec<usize> = Vec::with_capacity(keys.len());
        let mut visited = FxHashSet::default();
        let mut found = 0u64;
        for row in 0..keys.len() {
            let start = flat.len();
            if !keys.is_null(row) {
                self.walk_chain(tables, keys.value(row), &mut flat, &mut visited)?;
            }
            if flat.len() > start {
                found += 1;
            }
            lengths.push(flat.len() - start);
        }
        self.note_queries(keys.len() as u64, found);
        chains_to_list(flat, lengths)
    }

    /// For each `(key, ancestor)` pair, whether `ancestor` appears in the key's
    /// chain. A key is its own ancestor when it exists in the dictionary.
    pub fn is_in_hierarchy(
        &self,
        keys: &UInt64Array,
        ancestors: &UInt64Array,
    ) -> Result<BooleanArray> {
        if keys.len() != ancestors.len() {
            return Err(Error::Config(format!(
                "key column has {} rows, ancestor column has {}",
                keys.len(),
                ancestors.len()
            )));
        }
        let attr = self.hierarchical_attribute()?;
        let tables = attr.u64_tables()?;

        let mut visited = FxHashSet::default();
        let mut found = 0u64;
        let mut values = Vec::with_capacity(keys.len());
        for row in 0..keys.len() {
            if keys.is_null(row) || ancestors.is_null(row) {
                values.push(Some(false));
                continue;
            }
            let (key_found, hit) =
                self.chain_contains(tables, keys.value(row), ancestors.value(row), &mut visited)?;
            if key_found {
                found += 1;
            }
            values.push(Some(hit));
        }
        self.note_queries(keys.len() as u64, found);
        Ok(values.into_iter().collect())
    }

    /// Descendants of each key. `level == 0` returns all descendants at every
    /// depth; `level == n` returns only keys exactly `n` levels below. The key
    /// itself is never included.
    pub fn get_descendants(&self, keys: &UInt64Array, level: usize) -> Result<ListArray> {
        self.hierarchical_attribute()?;
        let Some(index) = &self.hierarchy else {
            return Err(Error::Internal(
                "hierarchy index missing for a hierarchical dictionary".into(),
            ));
        };

        let mut flat: Vec<u64> = Vec::new();
        let mut lengths: Vec<usize> = Vec::with_capacity(keys.len());
        let mut visited = FxHashSet::default();
        let mut found = 0u64;
        for row in 0..keys.len() {
            let start = flat.len();
            if !keys.is_null(row) {
                collect_descendants(index, keys.value(row), level, &mut flat, &mut visited)?;
            }
            if flat.len() > start {
                found += 1;
            }
            lengths.push(flat.len() - start);
        }
        self.note_queries(keys.len() as u64, found);
        chains_to_list(flat, lengths)
    }

    fn walk_chain(
        &self,
        tables: &[KeyedTable<u64, u64>],
        start: u64,
        out: &mut Vec<u64>,
        visited: &mut FxHashSet<u64>,
    ) -> Result<()> {
        visited.clear();
        let mut current = start;
        loop {
            let shard = self.router.shard_for_u64(current);
            let Some(parent) = tables[shard].get(&current) else {
                return Ok(());
            };
            if !visited.insert(current) {
                return Err(Error::HierarchyCycle { key: start });
            }
            out.push(current);
            current = *parent;
        }
    }

    /// Returns `(key was found, ancestor is in the chain)`.
    fn chain_contains(
        &self,
        tables: &[KeyedTable<u64, u64>],
        start: u64,
        target: u64,
        visited: &mut FxHashSet<u64>,
    ) -> Result<(bool, bool)> {
        visited.clear();
        let mut current = start;
        let mut key_found = false;
        loop {
            let shard = self.router.shard_for_u64(current);
            let Some(parent) = tables[shard].get(&current) else {
                return Ok((key_found, false));
            };
            if !visited.insert(current) {
                return Err(Error::HierarchyCycle { key: start });
            }
            key_found = true;
            if current == target {
                return Ok((key_found, true));
            }
            current = *parent;
        }
    }
}

fn collect_descendants(
    index: &ParentChildIndex,
    root: u64,
    level: usize,
    out: &mut Vec<u64>,
    visited: &mut FxHashSet<u64>,
) -> Result<()> {
    visited.clear();
    visited.insert(root);
    let mut frontier = vec![root];
    let mut depth = 0usize;
    while !frontier.is_empty() {
        depth += 1;
        let mut next = Vec::new();
        for key in &frontier {
            for &child in index.children_of(*key) {
                if !visited.insert(child) {
                    return Err(Error::HierarchyCycle { key: child });
                }
                next.push(child);
            }
        }
        if level == 0 {
            out.extend_from_slice(&next);
        } else if level == depth {
            out.extend_from_slice(&next);
            return Ok(());
        }
        frontier = next;
    }
    Ok(())
}

fn chains_to_list(flat: Vec<u64>, lengths: Vec<usize>) -> Result<ListArray> {
    let field = Arc::new(Field::new_list_field(DataType::UInt64, false));
    let values = UInt64Array::from(flat);
    Ok(ListArray::try_new(
        field,
        OffsetBuffer::from_lengths(lengths),
        Arc::new(values),
        None,
    )?)
}
