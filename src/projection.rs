//! Marginalization and expansion.
//!
//! Projection aggregates a source table into a relation's table by forcing every
//! variable outside the relation to don't-care and summing the collisions. The
//! state-based variant keeps exact mass only at the relation's constraint keys and
//! spreads everything else uniformly over the unconstrained cells. Orthogonal
//! expansion goes the other way: it blows a restricted table up over the variables
//! it is missing.

use crate::key::{self, KeyBuf};
use crate::relation::Relation;
use crate::table::Table;
use crate::variable::VariableCatalog;

/// Projects `source` onto `relation`'s variables.
///
/// Every source tuple's key is masked down to the relation and summed into the
/// result, so total mass is conserved; with state constraints the unmatched mass is
/// redistributed uniformly instead. The result is sorted.
pub fn project(catalog: &VariableCatalog, source: &Table, relation: &Relation) -> Table {
    match relation.constraints() {
        Some(_) => project_state_based(catalog, source, relation),
        None => project_plain(catalog, source, relation),
    }
}

fn project_plain(catalog: &VariableCatalog, source: &Table, relation: &Relation) -> Table {
    let mask = relation.mask(catalog);
    let mut target = Table::new(source.kind(), source.key_size());
    for tuple in source.iter() {
        let mut masked = KeyBuf::from_slice(tuple.key());
        key::apply_mask(&mut masked, mask);
        target.sum_tuple(&masked, tuple.value());
    }
    log::trace!(
        "projected {} tuples onto {} ({} cells)",
        source.len(),
        relation.name(catalog),
        target.len()
    );
    target
}

fn project_state_based(catalog: &VariableCatalog, source: &Table, relation: &Relation) -> Table {
    // pre-seed one zero cell per point of the relation's sub-statespace, so the
    // leftover mass has somewhere to go
    let mut target = state_space_expansion(catalog, relation);
    let constraints = match relation.constraints() {
        Some(constraints) => constraints,
        None => return target,
    };
    let mask = relation.mask(catalog);

    let mut remainder = 0.0;
    for tuple in source.iter() {
        let mut masked = KeyBuf::from_slice(tuple.key());
        key::apply_mask(&mut masked, mask);
        if constraints.matches(&masked) {
            target.sum_tuple(&masked, tuple.value());
        } else {
            remainder += tuple.value();
        }
    }

    let free_cells = target.len() - constraints.len();
    if free_cells > 0 {
        let spread = remainder / free_cells as f64;
        for at in 0..target.len() {
            if !constraints.matches(target.key(at)) {
                target.set_value(at, spread);
            }
        }
    }
    log::trace!(
        "state-based projection onto {}: {} constrained cells, remainder {}",
        relation.name(catalog),
        constraints.len(),
        remainder
    );
    target
}

/// One zero-valued tuple per cell of `relation`'s sub-statespace, sorted; variables
/// outside the relation stay don't-care.
pub fn state_space_expansion(catalog: &VariableCatalog, relation: &Relation) -> Table {
    let mut target = Table::new(crate::table::TableKind::Frequencies, catalog.key_size());
    let mut scratch = key::empty_key(catalog.key_size());
    expand_over(
        catalog,
        relation.vars().as_slice(),
        &mut scratch,
        0.0,
        &mut target,
    );
    target.sort();
    target
}

/// Expands `table`, which is restricted to `relation`'s variables, over every
/// variable the relation is missing: each input tuple yields one output tuple per
/// combination of the missing variables' values, all carrying the input tuple's
/// unmodified value. The result is sorted but not renormalized.
pub fn orthogonal_expansion(catalog: &VariableCatalog, relation: &Relation, table: &Table) -> Table {
    let missing: Vec<usize> = (0..catalog.len())
        .filter(|&v| !relation.vars().contains(v))
        .collect();
    let mut target = Table::new(table.kind(), table.key_size());
    for tuple in table.iter() {
        let mut scratch = KeyBuf::from_slice(tuple.key());
        expand_over(catalog, &missing, &mut scratch, tuple.value(), &mut target);
    }
    target.sort();
    target
}

fn expand_over(
    catalog: &VariableCatalog,
    vars: &[usize],
    scratch: &mut KeyBuf,
    value: f64,
    target: &mut Table,
) {
    match vars.split_first() {
        None => target.add_tuple(scratch.clone(), value),
        Some((&var, rest)) => {
            for state in 0..catalog.variable(var).cardinality() {
                key::set_value(scratch, catalog.variable(var), state);
                expand_over(catalog, rest, scratch, value, target);
            }
            key::set_value(scratch, catalog.variable(var), key::DONT_CARE as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::build_full_key;
    use crate::relation::{StateConstraint, StateSpec, VarSet};
    use crate::table::TableKind;
    use crate::variable::CatalogBuilder;
    use pretty_assertions::assert_eq;

    fn catalog() -> VariableCatalog {
        let mut builder = CatalogBuilder::new();
        builder.add_variable("a", "A", 2, false);
        builder.add_variable("b", "B", 2, false);
        builder.build()
    }

    fn input(catalog: &VariableCatalog) -> Table {
        let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
        table.add_tuple(build_full_key(catalog, &[0, 0]), 0.1);
        table.add_tuple(build_full_key(catalog, &[0, 1]), 0.2);
        table.add_tuple(build_full_key(catalog, &[1, 0]), 0.3);
        table.add_tuple(build_full_key(catalog, &[1, 1]), 0.4);
        table
    }

    #[test]
    fn projection_conserves_mass() {
        let catalog = catalog();
        let source = input(&catalog);
        let rel = Relation::new(VarSet::new(&[0]));
        let marginal = project(&catalog, &source, &rel);
        assert_eq!(marginal.len(), 2);
        assert!((marginal.total() - source.total()).abs() < 1e-12);
        let a0 = key::build_key(&catalog, &[0], &[0]);
        let a1 = key::build_key(&catalog, &[0], &[1]);
        assert!((marginal.value(marginal.index_of(&a0).unwrap()) - 0.3).abs() < 1e-12);
        assert!((marginal.value(marginal.index_of(&a1).unwrap()) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn state_constrained_projection_spreads_the_remainder() {
        let catalog = catalog();
        let source = input(&catalog);
        let states: StateSpec = [Some(0), Some(0)].iter().copied().collect();
        let mut rel = Relation::with_states(VarSet::new(&[0, 1]), states);
        let mut constraints = StateConstraint::new();
        constraints.add(build_full_key(&catalog, &[0, 0]));
        rel.set_constraints(constraints);

        let projected = project(&catalog, &source, &rel);
        assert_eq!(projected.len(), 4);
        let fixed = build_full_key(&catalog, &[0, 0]);
        let fixed_at = projected.index_of(&fixed).unwrap();
        assert!((projected.value(fixed_at) - 0.1).abs() < 1e-12);
        // (total − mass at constraint) / 3 lands on each free cell
        for at in 0..projected.len() {
            if at != fixed_at {
                assert!((projected.value(at) - 0.3).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn orthogonal_expansion_covers_the_missing_variables() {
        let catalog = catalog();
        let rel = Relation::new(VarSet::new(&[0]));
        let source = input(&catalog);
        let marginal = project(&catalog, &source, &rel);
        let expanded = orthogonal_expansion(&catalog, &rel, &marginal);
        assert_eq!(expanded.len(), 4);
        // each expanded cell repeats its source tuple's value
        let k = build_full_key(&catalog, &[1, 0]);
        assert!((expanded.value(expanded.index_of(&k).unwrap()) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn state_space_expansion_is_zero_seeded_and_sorted() {
        let catalog = catalog();
        let rel = Relation::new(VarSet::new(&[0, 1]));
        let expansion = state_space_expansion(&catalog, &rel);
        assert_eq!(expansion.len(), 4);
        assert_eq!(expansion.total(), 0.0);
        for window in 0..expansion.len() - 1 {
            assert!(key::compare(expansion.key(window), expansion.key(window + 1)).is_lt());
        }
    }
}
