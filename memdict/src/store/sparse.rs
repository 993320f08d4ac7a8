//! Memory-lean open-addressing table.
//!
//! Slots are grouped 64 at a time: each group holds a `u64` occupancy bitmap plus a
//! packed vector of only the occupied entries, so empty slots cost one bit instead
//! of a full entry. Position of an entry inside the packed vector is the popcount of
//! the bitmap below its slot bit. Probing is linear over the global slot space and
//! the load factor stays below 90%, so every probe chain terminates at an empty
//! slot. Deletion uses backward-shift fixup instead of tombstones, keeping probe
//! chains contiguous no matter how many null-transition removals the loader makes.
//!
//! Lookups hash with the same unseeded `FxHasher` the dense tables use, which keeps
//! the two layouts behaviorally interchangeable behind one interface.

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::mem;

use rustc_hash::FxHasher;

const GROUP_SLOTS: usize = 64;
const MIN_SLOTS: usize = GROUP_SLOTS;
/// Probe load ceiling, in percent. Growth keeps occupancy under this bound.
const MAX_LOAD_PCT: usize = 90;

#[inline(always)]
fn hash_of<Q: Hash + ?Sized>(value: &Q) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

struct Group<K, V> {
    occupied: u64,
    entries: Vec<(K, V)>,
}

impl<K, V> Group<K, V> {
    fn empty() -> Self {
        Self {
            occupied: 0,
            entries: Vec::new(),
        }
    }

    /// Packed index for the slot bit: entries below it in the bitmap.
    #[inline(always)]
    fn rank(&self, bit: u64) -> usize {
        (self.occupied & (bit - 1)).count_ones() as usize
    }
}

pub struct SparseTable<K, V> {
    groups: Vec<Group<K, V>>,
    len: usize,
}

impl<K: Eq + Hash, V> SparseTable<K, V> {
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total addressable slots. Zero until the first insert.
    pub fn slot_count(&self) -> usize {
        self.groups.len() * GROUP_SLOTS
    }

    #[inline(always)]
    fn mask(&self) -> usize {
        self.slot_count() - 1
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.groups.is_empty() {
            return None;
        }
        let mask = self.mask();
        let mut slot = (hash_of(key) as usize) & mask;
        loop {
            let group = &self.groups[slot / GROUP_SLOTS];
            let bit = 1u64 << (slot % GROUP_SLOTS);
            if group.occupied & bit == 0 {
                return None;
            }
            let (candidate, value) = &group.entries[group.rank(bit)];
            if candidate.borrow() == key {
                return Some(value);
            }
            slot = (slot + 1) & mask;
        }
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Insert or replace. Returns the previous value on replacement; the original
    /// key instance is kept, matching `HashMap` semantics.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.reserve(1);
        let mask = self.mask();
        let mut slot = (hash_of(&key) as usize) & mask;
        loop {
            let group = &mut self.groups[slot / GROUP_SLOTS];
            let bit = 1u64 << (slot % GROUP_SLOTS);
            if group.occupied & bit == 0 {
                let rank = group.rank(bit);
                group.entries.insert(rank, (key, value));
                group.occupied |= bit;
                self.len += 1;
                return None;
            }
            let rank = group.rank(bit);
            if group.entries[rank].0 == key {
                return Some(mem::replace(&mut group.entries[rank].1, value));
            }
            slot = (slot + 1) & mask;
        }
    }

    /// Remove a key, shifting later entries of its probe chain back over the hole.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.groups.is_empty() {
            return None;
        }
        let mask = self.mask();
        let mut slot = (hash_of(key) as usize) & mask;
        loop {
            let group = &self.groups[slot / GROUP_SLOTS];
            let bit = 1u64 << (slot % GROUP_SLOTS);
            if group.occupied & bit == 0 {
                return None;
            }
            if group.entries[group.rank(bit)].0.borrow() == key {
                break;
            }
            slot = (slot + 1) & mask;
        }

        let (_, value) = self.take_slot(slot);
        self.len -= 1;

        // Backward-shift fixup: an entry later in the chain moves into the hole
        // unless its home position lies cyclically within (hole, probe].
        let mut hole = slot;
        let mut probe = (slot + 1) & mask;
        loop {
            let group = &self.groups[probe / GROUP_SLOTS];
            let bit = 1u64 << (probe % GROUP_SLOTS);
            if group.occupied & bit == 0 {
                break;
            }
            let home = (hash_of(&group.entries[group.rank(bit)].0) as usize) & mask;
            let stays = if hole < probe {
                home > hole && home <= probe
            } else {
                home > hole || home <= probe
            };
            if !stays {
                let (k, v) = self.take_slot(probe);
                self.place_slot(hole, k, v);
                hole = probe;
            }
            probe = (probe + 1) & mask;
        }
        Some(value)
    }

    /// Grow ahead of `additional` more entries so bulk inserts rehash at most once.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len + additional;
        let mut slots = self.slot_count().max(MIN_SLOTS);
        while needed * 100 > slots * MAX_LOAD_PCT {
            slots *= 2;
        }
        if slots != self.slot_count() {
            self.rehash(slots);
        }
    }

    pub fn iter(&self) -> SparseIter<'_, K, V> {
        SparseIter {
            groups: self.groups.iter(),
            current: Default::default(),
        }
    }

    /// Bytes held by the table itself, excluding heap payloads behind keys or
    /// values.
    pub fn allocated_bytes(&self) -> usize {
        let groups = self.groups.capacity() * mem::size_of::<Group<K, V>>();
        let entries: usize = self
            .groups
            .iter()
            .map(|group| group.entries.capacity() * mem::size_of::<(K, V)>())
            .sum();
        groups + entries
    }

    fn rehash(&mut self, new_slots: usize) {
        debug_assert!(new_slots.is_power_of_two() && new_slots >= MIN_SLOTS);
        let old = mem::take(&mut self.groups);
        self.groups = (0..new_slots / GROUP_SLOTS).map(|_| Group::empty()).collect();
        let mask = new_slots - 1;
        for group in old {
            for (key, value) in group.entries {
                let mut slot = (hash_of(&key) as usize) & mask;
                loop {
                    let group = &mut self.groups[slot / GROUP_SLOTS];
                    let bit = 1u64 << (slot % GROUP_SLOTS);
                    if group.occupied & bit == 0 {
                        let rank = group.rank(bit);
                        group.entries.insert(rank, (key, value));
                        group.occupied |= bit;
                        break;
                    }
                    slot = (slot + 1) & mask;
                }
            }
        }
    }

    fn take_slot(&mut self, slot: usize) -> (K, V) {
        let group = &mut self.groups[slot / GROUP_SLOTS];
        let bit = 1u64 << (slot % GROUP_SLOTS);
        debug_assert!(group.occupied & bit != 0);
        let rank = group.rank(bit);
        group.occupied &= !bit;
        group.entries.remove(rank)
    }

    fn place_slot(&mut self, slot: usize, key: K, value: V) {
        let group = &mut self.groups[slot / GROUP_SLOTS];
        let bit = 1u64 << (slot % GROUP_SLOTS);
        debug_assert!(group.occupied & bit == 0);
        let rank = group.rank(bit);
        group.entries.insert(rank, (key, value));
        group.occupied |= bit;
    }
}

impl<K: Eq + Hash, V> Default for SparseTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SparseIter<'a, K, V> {
    groups: std::slice::Iter<'a, Group<K, V>>,
    current: std::slice::Iter<'a, (K, V)>,
}

impl<'a, K, V> Iterator for SparseIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.next() {
                return Some((&entry.0, &entry.1));
            }
            match self.groups.next() {
                Some(group) => self.current = group.entries.iter(),
                None => return None,
            }
        }
    }
}
