//! Read-only associative containers backed by sorted arrays.
//!
//! These hold lookup tables that are fixed for the lifetime of the program
//! (punctuation variants, kanji numeral tables, test POS tables). A sorted
//! array plus binary search beats hashing for such tables: queries are
//! allocation-free and the whole container is a single contiguous block.
//!
//! Construction sorts the entries once. `FlatMap` and `FlatSet` additionally
//! verify that no two keys compare equal; a duplicate means the table itself
//! is wrong, so it panics rather than returning an error.

use std::cmp::Ordering;

/// Read-only map over a sorted array of `(K, V)` pairs.
pub struct FlatMap<K, V> {
    entries: Vec<(K, V)>,
    cmp: fn(&K, &K) -> Ordering,
}

impl<K: Ord, V> FlatMap<K, V> {
    /// Build with the natural key order.
    pub fn new(entries: Vec<(K, V)>) -> Self {
        Self::with_cmp(entries, K::cmp)
    }
}

impl<K, V> FlatMap<K, V> {
    /// Build with an explicit comparator defining a strict weak order on keys.
    ///
    /// Panics if two keys compare equal under `cmp`.
    pub fn with_cmp(mut entries: Vec<(K, V)>, cmp: fn(&K, &K) -> Ordering) -> Self {
        entries.sort_by(|a, b| cmp(&a.0, &b.0));
        for w in entries.windows(2) {
            assert!(
                cmp(&w[0].0, &w[1].0) != Ordering::Equal,
                "FlatMap: duplicate keys in table"
            );
        }
        Self { entries, cmp }
    }

    /// Binary-search for `key`; `None` if no entry compares equal.
    pub fn find_or_null(&self, key: &K) -> Option<&V> {
        self.entries
            .binary_search_by(|e| (self.cmp)(&e.0, key))
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-only multimap over a sorted array of `(K, V)` pairs.
///
/// Duplicate keys are permitted; `equal_span` returns all of them as one
/// contiguous slice. The order within that slice is unspecified.
pub struct FlatMultimap<K, V> {
    entries: Vec<(K, V)>,
    cmp: fn(&K, &K) -> Ordering,
}

impl<K: Ord, V> FlatMultimap<K, V> {
    pub fn new(entries: Vec<(K, V)>) -> Self {
        Self::with_cmp(entries, K::cmp)
    }
}

impl<K, V> FlatMultimap<K, V> {
    pub fn with_cmp(mut entries: Vec<(K, V)>, cmp: fn(&K, &K) -> Ordering) -> Self {
        entries.sort_by(|a, b| cmp(&a.0, &b.0));
        Self { entries, cmp }
    }

    /// All entries whose key compares equal to `key`, as a contiguous slice.
    pub fn equal_span(&self, key: &K) -> &[(K, V)] {
        let lo = self.entries.partition_point(|e| (self.cmp)(&e.0, key) == Ordering::Less);
        let hi = self.entries.partition_point(|e| (self.cmp)(&e.0, key) != Ordering::Greater);
        &self.entries[lo..hi]
    }
}

/// Read-only set over a sorted array.
pub struct FlatSet<T> {
    items: Vec<T>,
    cmp: fn(&T, &T) -> Ordering,
}

impl<T: Ord> FlatSet<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self::with_cmp(items, T::cmp)
    }
}

impl<T> FlatSet<T> {
    /// Panics if two items compare equal under `cmp`.
    pub fn with_cmp(mut items: Vec<T>, cmp: fn(&T, &T) -> Ordering) -> Self {
        items.sort_by(|a, b| cmp(a, b));
        for w in items.windows(2) {
            assert!(
                cmp(&w[0], &w[1]) != Ordering::Equal,
                "FlatSet: duplicate items in table"
            );
        }
        Self { items, cmp }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.binary_search_by(|e| (self.cmp)(e, item)).is_ok()
    }
}
