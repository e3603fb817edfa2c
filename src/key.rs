//! Packed binary keys.
//!
//! A key identifies one cell of a (possibly partial) state space. Every variable in
//! the catalog owns a fixed-width bit field inside exactly one segment, assigned when
//! the catalog is built; a field holding all one-bits means "don't care", so a key can
//! describe a cell of a sub-statespace by leaving the irrelevant variables unspecified.
//!
//! Keys compare lexicographically by segment, which is what keeps tables sorted and
//! binary-searchable.

use crate::variable::{Variable, VariableCatalog};
use smallvec::{smallvec, SmallVec};
use std::cmp::Ordering;
use std::fmt::Write;

/// One fixed-width unit of a packed key.
pub type KeySegment = u32;

/// Number of bits in a [`KeySegment`].
pub const KEY_SEGMENT_BITS: u32 = 32;

/// The all-ones sentinel: a segment (or field) in this state matches any value.
pub const DONT_CARE: KeySegment = KeySegment::MAX;

/// Backing storage for a key. Small state spaces need only one or two segments, so
/// keys stay inline in the common case.
pub type KeyBuf = SmallVec<[KeySegment; 4]>;

/// Creates a key of `key_size` segments with every field set to don't-care.
pub fn empty_key(key_size: usize) -> KeyBuf {
    smallvec![DONT_CARE; key_size]
}

/// Writes `value` into the bit field that `var` owns, leaving all other fields alone.
///
/// No cardinality check is performed; the value must fit in the field width fixed at
/// catalog build time. Writing a value of all one-bits marks the field don't-care.
pub fn set_value(key: &mut [KeySegment], var: &Variable, value: usize) {
    let mask = var.segment_mask();
    let seg = &mut key[var.segment()];
    *seg = (*seg & !mask) | (((value as KeySegment) << var.shift()) & mask);
}

/// Reads the bit field that `var` owns, or `None` if the field is don't-care.
pub fn value(key: &[KeySegment], var: &Variable) -> Option<usize> {
    let field = (key[var.segment()] & var.segment_mask()) >> var.shift();
    if field == var.segment_mask() >> var.shift() {
        None
    } else {
        Some(field as usize)
    }
}

/// Builds a key with `values[i]` stored in the field of `vars[i]` and don't-care
/// everywhere else.
pub fn build_key(catalog: &VariableCatalog, vars: &[usize], values: &[usize]) -> KeyBuf {
    let mut key = empty_key(catalog.key_size());
    for (&v, &value) in vars.iter().zip(values) {
        set_value(&mut key, catalog.variable(v), value);
    }
    key
}

/// Builds a fully specified key from one value per catalog variable, in catalog order.
pub fn build_full_key(catalog: &VariableCatalog, values: &[usize]) -> KeyBuf {
    let mut key = empty_key(catalog.key_size());
    for (v, &value) in values.iter().enumerate() {
        set_value(&mut key, catalog.variable(v), value);
    }
    key
}

/// Builds a mask with zero bits in the fields of `vars` and one bits everywhere else.
///
/// OR-ing this mask into a key forces every variable outside `vars` to don't-care,
/// which is how projection discards variables.
pub fn build_mask(catalog: &VariableCatalog, vars: &[usize]) -> KeyBuf {
    let mut mask = empty_key(catalog.key_size());
    for &v in vars {
        set_value(&mut mask, catalog.variable(v), 0);
    }
    mask
}

/// ORs `mask` into `key` segment by segment.
pub fn apply_mask(key: &mut [KeySegment], mask: &[KeySegment]) {
    for (k, m) in key.iter_mut().zip(mask) {
        *k |= m;
    }
}

/// Lexicographic comparison by segment. Equal keys are bitwise-identical.
pub fn compare(a: &[KeySegment], b: &[KeySegment]) -> Ordering {
    a.cmp(b)
}

/// Renders a key for diagnostics: one field per catalog variable, `.` for don't-care.
pub fn to_string(catalog: &VariableCatalog, key: &[KeySegment]) -> String {
    let mut out = String::new();
    for var in catalog.variables() {
        match value(key, var) {
            Some(v) => {
                // write! to a String cannot fail
                let _ = write!(out, "{}", v);
            }
            None => out.push('.'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::CatalogBuilder;

    fn three_vars() -> VariableCatalog {
        let mut builder = CatalogBuilder::new();
        builder.add_variable("alpha", "A", 2, false);
        builder.add_variable("beta", "B", 3, false);
        builder.add_variable("gamma", "C", 2, false);
        builder.build()
    }

    #[test]
    fn round_trip_preserves_other_fields() {
        let catalog = three_vars();
        let mut key = empty_key(catalog.key_size());
        for v in 0..catalog.len() {
            let var = catalog.variable(v);
            for value_in in 0..var.cardinality() {
                set_value(&mut key, var, value_in);
                assert_eq!(value(&key, var), Some(value_in));
                for other in 0..catalog.len() {
                    if other != v {
                        assert_eq!(value(&key, catalog.variable(other)), None);
                    }
                }
            }
            set_value(&mut key, var, DONT_CARE as usize);
            assert_eq!(value(&key, var), None);
        }
    }

    #[test]
    fn empty_key_is_all_dont_care() {
        let catalog = three_vars();
        let key = empty_key(catalog.key_size());
        for var in catalog.variables() {
            assert_eq!(value(&key, var), None);
        }
    }

    #[test]
    fn mask_projects_away_excluded_variables() {
        let catalog = three_vars();
        let mut key = build_full_key(&catalog, &[1, 2, 0]);
        let mask = build_mask(&catalog, &[1]);
        apply_mask(&mut key, &mask);
        assert_eq!(value(&key, catalog.variable(0)), None);
        assert_eq!(value(&key, catalog.variable(1)), Some(2));
        assert_eq!(value(&key, catalog.variable(2)), None);
    }

    #[test]
    fn compare_is_lexicographic_by_segment() {
        let catalog = three_vars();
        let a = build_full_key(&catalog, &[0, 1, 1]);
        let b = build_full_key(&catalog, &[1, 0, 0]);
        assert_eq!(compare(&a, &b), Ordering::Less);
        assert_eq!(compare(&b, &a), Ordering::Greater);
        assert_eq!(compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn render_marks_unset_fields() {
        let catalog = three_vars();
        let key = build_key(&catalog, &[1], &[2]);
        assert_eq!(to_string(&catalog, &key), ".2.");
    }
}
