//! Sorted tuple tables.
//!
//! A table is a key-sorted array of (key, value) tuples over one key layout. Lookups
//! binary-search, so [`Table::sort`] must run after any batch of unsorted appends;
//! [`Table::sum_tuple`] inserts in place and never disturbs sortedness. Reads of
//! absent cells return 0.0 rather than erroring, since absence is a normal outcome
//! of sparse data.

use crate::key::{self, KeyBuf, KeySegment};

/// What the tuple values mean, which decides how aggregation combines them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableKind {
    /// Frequencies or probabilities; aggregation adds.
    Frequencies,
    /// 0/1 membership flags; aggregation is logical OR.
    SetMembership,
}

/// One cell: a packed key and its value.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuple {
    key: KeyBuf,
    value: f64,
}

impl Tuple {
    /// The tuple's packed key.
    pub fn key(&self) -> &[KeySegment] {
        &self.key
    }

    /// The tuple's value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// A key-sorted array of tuples.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    kind: TableKind,
    key_size: usize,
    tuples: Vec<Tuple>,
}

impl Table {
    /// Creates an empty table for keys of `key_size` segments.
    pub fn new(kind: TableKind, key_size: usize) -> Self {
        Table {
            kind,
            key_size,
            tuples: Vec::new(),
        }
    }

    /// How this table's values aggregate.
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Number of key segments per tuple.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Number of tuples.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Returns `true` if the table holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// The key at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn key(&self, index: usize) -> &[KeySegment] {
        self.tuples[index].key()
    }

    /// The value at `index`, or 0.0 when `index` is out of range.
    pub fn value(&self, index: usize) -> f64 {
        self.tuples.get(index).map_or(0.0, Tuple::value)
    }

    /// Overwrites the value at `index`; out-of-range writes are ignored.
    pub fn set_value(&mut self, index: usize, value: f64) {
        if let Some(tuple) = self.tuples.get_mut(index) {
            tuple.value = clamp(self.kind, value);
        }
    }

    /// Iterates over the tuples in storage order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.tuples.iter()
    }

    /// Appends a tuple without regard to order; the table is unsorted afterwards
    /// until [`Table::sort`] runs.
    pub fn add_tuple(&mut self, key: KeyBuf, value: f64) {
        debug_assert_eq!(key.len(), self.key_size);
        let value = clamp(self.kind, value);
        self.tuples.push(Tuple { key, value });
    }

    /// Inserts a tuple at `index`, which must be the key's insertion point in an
    /// already sorted table.
    pub fn insert_tuple(&mut self, key: KeyBuf, value: f64, index: usize) {
        debug_assert_eq!(key.len(), self.key_size);
        let value = clamp(self.kind, value);
        self.tuples.insert(index, Tuple { key, value });
    }

    /// Adds `value` into the cell at `key`, inserting the cell if it is absent.
    ///
    /// On a [`TableKind::SetMembership`] table this ORs instead of adding. The table
    /// must already be sorted; sortedness is preserved.
    pub fn sum_tuple(&mut self, key: &[KeySegment], value: f64) {
        match self.find(key) {
            Ok(at) => match self.kind {
                TableKind::Frequencies => self.tuples[at].value += value,
                TableKind::SetMembership => {
                    if value != 0.0 {
                        self.tuples[at].value = 1.0;
                    }
                }
            },
            Err(at) => self.insert_tuple(KeyBuf::from_slice(key), value, at),
        }
    }

    /// Binary-searches a sorted table: `Ok` holds the matching index, `Err` the
    /// insertion point.
    pub fn find(&self, key: &[KeySegment]) -> Result<usize, usize> {
        self.tuples
            .binary_search_by(|tuple| key::compare(tuple.key(), key))
    }

    /// The index holding `key`, or `None` when absent.
    pub fn index_of(&self, key: &[KeySegment]) -> Option<usize> {
        self.find(key).ok()
    }

    /// Sorts the tuples by key. Required after unsorted appends, before any lookup.
    pub fn sort(&mut self) {
        self.tuples
            .sort_unstable_by(|a, b| key::compare(a.key(), b.key()));
    }

    /// Sum of all values.
    pub fn total(&self) -> f64 {
        self.tuples.iter().map(Tuple::value).sum()
    }

    /// The largest value and its index, or `None` for an empty table.
    pub fn max_value(&self) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (at, tuple) in self.tuples.iter().enumerate() {
            match best {
                Some((_, value)) if value >= tuple.value => {}
                _ => best = Some((at, tuple.value)),
            }
        }
        best
    }

    /// Rescales all values to sum to 1.0 and returns the old sum rounded to an
    /// integer sample size.
    ///
    /// A sum that was already ≈1 returns 1, signalling the data was a probability
    /// distribution to begin with; a non-positive sum leaves the table alone and
    /// returns 0.
    pub fn normalize(&mut self) -> usize {
        let total = self.total();
        if total <= 0.0 {
            return 0;
        }
        for tuple in &mut self.tuples {
            tuple.value /= total;
        }
        if total < 1.5 {
            1
        } else {
            total.round() as usize
        }
    }

    /// Clears the table for reuse, possibly with a different key width.
    pub fn reset(&mut self, key_size: usize) {
        self.tuples.clear();
        self.key_size = key_size;
    }
}

fn clamp(kind: TableKind, value: f64) -> f64 {
    match kind {
        TableKind::Frequencies => value,
        TableKind::SetMembership => {
            if value != 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{build_full_key, compare};
    use crate::variable::{CatalogBuilder, VariableCatalog};
    use std::cmp::Ordering;

    fn catalog() -> VariableCatalog {
        let mut builder = CatalogBuilder::new();
        builder.add_variable("a", "A", 2, false);
        builder.add_variable("b", "B", 2, false);
        builder.build()
    }

    fn keys(catalog: &VariableCatalog) -> Vec<KeyBuf> {
        let mut keys = Vec::new();
        for a in 0..2 {
            for b in 0..2 {
                keys.push(build_full_key(catalog, &[a, b]));
            }
        }
        keys
    }

    #[test]
    fn sort_restores_the_lookup_invariant() {
        let catalog = catalog();
        let keys = keys(&catalog);
        let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
        for (at, key) in keys.iter().enumerate().rev() {
            table.add_tuple(key.clone(), (at + 1) as f64);
        }
        table.sort();
        for window in 0..table.len() - 1 {
            assert_ne!(
                compare(table.key(window), table.key(window + 1)),
                Ordering::Greater
            );
        }
        for (at, key) in keys.iter().enumerate() {
            assert_eq!(table.index_of(key), Some(at));
            assert_eq!(table.value(at), (at + 1) as f64);
        }
    }

    #[test]
    fn absent_keys_read_as_zero() {
        let catalog = catalog();
        let table = Table::new(TableKind::Frequencies, catalog.key_size());
        let key = build_full_key(&catalog, &[0, 0]);
        assert_eq!(table.index_of(&key), None);
        assert_eq!(table.find(&key), Err(0));
        assert_eq!(table.value(17), 0.0);
    }

    #[test]
    fn sum_tuple_adds_on_frequency_tables() {
        let catalog = catalog();
        let key = build_full_key(&catalog, &[1, 0]);
        let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
        table.sum_tuple(&key, 2.5);
        table.sum_tuple(&key, 1.5);
        assert_eq!(table.len(), 1);
        assert_eq!(table.value(0), 4.0);
    }

    #[test]
    fn sum_tuple_ors_on_set_tables() {
        let catalog = catalog();
        let key = build_full_key(&catalog, &[1, 0]);
        let mut table = Table::new(TableKind::SetMembership, catalog.key_size());
        table.sum_tuple(&key, 0.3);
        table.sum_tuple(&key, 7.0);
        assert_eq!(table.len(), 1);
        assert_eq!(table.value(0), 1.0);
    }

    #[test]
    fn sum_tuple_keeps_the_table_sorted() {
        let catalog = catalog();
        let keys = keys(&catalog);
        let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
        for key in keys.iter().rev() {
            table.sum_tuple(key, 1.0);
        }
        for (at, key) in keys.iter().enumerate() {
            assert_eq!(table.index_of(key), Some(at));
        }
    }

    #[test]
    fn normalize_reports_the_sample_size() {
        let catalog = catalog();
        let keys = keys(&catalog);
        let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
        for (at, key) in keys.iter().enumerate() {
            table.add_tuple(key.clone(), (at + 1) as f64);
        }
        assert_eq!(table.normalize(), 10);
        assert!((table.total() - 1.0).abs() < 1e-12);

        // already a distribution: sample size collapses to 1
        assert_eq!(table.normalize(), 1);
    }

    #[test]
    fn reset_allows_reuse_with_a_new_key_width() {
        let catalog = catalog();
        let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
        table.add_tuple(build_full_key(&catalog, &[0, 0]), 1.0);
        table.reset(2);
        assert!(table.is_empty());
        assert_eq!(table.key_size(), 2);
    }
}
