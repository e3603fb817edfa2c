//! Information-theoretic primitives and structural tests.
//!
//! Entropy and transmission are the only statistics the search ranking needs;
//! everything heavier lives outside this crate. The structural tests here decide
//! which fit path a model takes (loop detection) and what a state-based model's
//! degrees of freedom are (structure-matrix rank).

use crate::key::{self, KeyBuf};
use crate::relation::{Relation, VarSet};
use crate::table::Table;
use crate::variable::VariableCatalog;
use std::collections::HashMap;
use std::f64::consts::LN_2;

/// Values at or below this are treated as zero probability.
pub const PROB_MIN: f64 = 1e-36;

/// Shannon entropy of a table's values in bits: −Σ p·log2 p.
///
/// The table is expected to hold probabilities; cells below [`PROB_MIN`] are
/// ignored.
pub fn entropy(table: &Table) -> f64 {
    let mut h = 0.0;
    for tuple in table.iter() {
        let p = tuple.value();
        if p > PROB_MIN {
            h -= p * p.ln() / LN_2;
        }
    }
    h
}

/// Kullback–Leibler transmission of `p` against `q` in bits: Σ p·log2(p/q), matched
/// cell by cell. Cells missing from `q` or below [`PROB_MIN`] in either table are
/// skipped.
pub fn transmission(p: &Table, q: &Table) -> f64 {
    let mut t = 0.0;
    for tuple in p.iter() {
        let pv = tuple.value();
        if pv <= PROB_MIN {
            continue;
        }
        let qv = q.index_of(tuple.key()).map_or(0.0, |at| q.value(at));
        if qv > PROB_MIN {
            t += pv * (pv / qv).ln() / LN_2;
        }
    }
    t
}

/// Returns `true` if any pair of the given variable sets shares a variable.
pub fn has_overlaps(sets: &[VarSet]) -> bool {
    for (at, a) in sets.iter().enumerate() {
        for b in &sets[at + 1..] {
            if !a.intersection(b).is_empty() {
                return true;
            }
        }
    }
    false
}

/// Decides whether the given relation variable sets overlap cyclically.
///
/// Repeatedly strips variables that occur in only one set and discards sets
/// contained in another; the structure has a loop exactly when more than one
/// nonempty set survives this reduction.
pub fn has_loops(sets: &[VarSet]) -> bool {
    let mut sets: Vec<VarSet> = sets.to_vec();
    loop {
        let mut changed = false;

        let mut occurrences: HashMap<usize, usize> = HashMap::new();
        for set in &sets {
            for var in set.iter() {
                *occurrences.entry(var).or_insert(0) += 1;
            }
        }
        for set in &mut sets {
            let kept: VarSet = set.iter().filter(|v| occurrences[v] > 1).collect();
            if kept.len() != set.len() {
                *set = kept;
                changed = true;
            }
        }

        for at in 0..sets.len() {
            if sets[at].is_empty() {
                continue;
            }
            let absorbed = sets.iter().enumerate().any(|(other, candidate)| {
                other != at
                    && !candidate.is_empty()
                    && sets[at].is_subset(candidate)
                    && (sets[at].len() < candidate.len() || other < at)
            });
            if absorbed {
                sets[at] = VarSet::empty();
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
    sets.iter().filter(|set| !set.is_empty()).count() > 1
}

/// Degrees of freedom of a state-based model: the rank of its structure matrix,
/// minus one for the normalization constraint.
///
/// The matrix has one 0/1 row per constraint key across all relations (for a
/// variable-based member relation, one row per cell of its sub-statespace) plus one
/// all-ones row; a column per cell of the full state space; and a 1 wherever the
/// cell matches the row's key with don't-care fields matching anything.
pub fn state_based_df(catalog: &VariableCatalog, relations: &[&Relation]) -> f64 {
    let cells = full_state_space(catalog);
    let mut rows: Vec<Vec<f64>> = vec![vec![1.0; cells.len()]];
    for rel in relations {
        let keys: Vec<KeyBuf> = match rel.constraints() {
            Some(constraints) => constraints.keys().map(KeyBuf::from_slice).collect(),
            None => sub_state_space(catalog, rel.vars()),
        };
        for constraint in keys {
            let row = cells
                .iter()
                .map(|cell| {
                    if matches_with_wildcards(catalog, &constraint, cell) {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            rows.push(row);
        }
    }
    rank(rows) as f64 - 1.0
}

fn matches_with_wildcards(catalog: &VariableCatalog, constraint: &[u32], cell: &[u32]) -> bool {
    catalog.variables().all(|var| match key::value(constraint, var) {
        None => true,
        fixed => fixed == key::value(cell, var),
    })
}

/// Every fully specified key of the catalog's state space, in key order.
pub fn full_state_space(catalog: &VariableCatalog) -> Vec<KeyBuf> {
    sub_state_space(catalog, &catalog.all_variables())
}

/// Every key of the sub-statespace spanned by `vars`, other fields don't-care.
pub fn sub_state_space(catalog: &VariableCatalog, vars: &VarSet) -> Vec<KeyBuf> {
    let mut out = Vec::new();
    let mut scratch = key::empty_key(catalog.key_size());
    fill(catalog, vars.as_slice(), &mut scratch, &mut out);
    out
}

fn fill(catalog: &VariableCatalog, vars: &[usize], scratch: &mut KeyBuf, out: &mut Vec<KeyBuf>) {
    match vars.split_first() {
        None => out.push(scratch.clone()),
        Some((&var, rest)) => {
            for value in 0..catalog.variable(var).cardinality() {
                key::set_value(scratch, catalog.variable(var), value);
                fill(catalog, rest, scratch, out);
            }
            key::set_value(scratch, catalog.variable(var), key::DONT_CARE as usize);
        }
    }
}

/// Rank of a dense matrix by Gaussian elimination with partial pivoting.
pub fn rank(mut rows: Vec<Vec<f64>>) -> usize {
    const TOLERANCE: f64 = 1e-9;
    if rows.is_empty() {
        return 0;
    }
    let cols = rows[0].len();
    let mut rank = 0;
    for col in 0..cols {
        if rank == rows.len() {
            break;
        }
        let pivot = (rank..rows.len())
            .max_by(|&a, &b| {
                rows[a][col]
                    .abs()
                    .partial_cmp(&rows[b][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .filter(|&at| rows[at][col].abs() > TOLERANCE);
        let pivot = match pivot {
            Some(at) => at,
            None => continue,
        };
        rows.swap(rank, pivot);
        let lead = rows[rank][col];
        for below in rank + 1..rows.len() {
            let factor = rows[below][col] / lead;
            if factor != 0.0 {
                for c in col..cols {
                    let delta = factor * rows[rank][c];
                    rows[below][c] -= delta;
                }
            }
        }
        rank += 1;
    }
    rank
}
