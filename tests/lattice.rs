use relattice::*;
use std::collections::HashSet;

macro_rules! check_size {
    ($($name:ident)*) => {
        $(
        #[test]
        fn $name() {
            check((stringify!($name).as_bytes().last().unwrap() - b'0') as usize);
        }
        )*
    }
}

check_size! {
    lattice_over_2
    lattice_over_3
    lattice_over_4
    lattice_over_5
}

fn uniform_manager(variables: usize) -> Manager {
    const NAMES: [&str; 9] = ["A", "B", "C", "D", "E", "F", "G", "H", "I"];
    let mut builder = CatalogBuilder::new();
    for at in 0..variables {
        builder.add_variable(NAMES[at], NAMES[at], 2, false);
    }
    let catalog = builder.build();
    let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
    for cell in 0..(1usize << variables) {
        let values: Vec<usize> = (0..variables).map(|v| (cell >> v) & 1).collect();
        table.add_tuple(build_full_key(&catalog, &values), 1.0);
    }
    Manager::new(catalog, table)
}

fn skewed_manager(variables: usize) -> Manager {
    const NAMES: [&str; 9] = ["A", "B", "C", "D", "E", "F", "G", "H", "I"];
    let mut builder = CatalogBuilder::new();
    for at in 0..variables {
        builder.add_variable(NAMES[at], NAMES[at], 2, false);
    }
    let catalog = builder.build();
    let mut table = Table::new(TableKind::Frequencies, catalog.key_size());
    for cell in 0..(1usize << variables) {
        let values: Vec<usize> = (0..variables).map(|v| (cell >> v) & 1).collect();
        table.add_tuple(build_full_key(&catalog, &values), (cell * cell + 1) as f64);
    }
    Manager::new(catalog, table)
}

/// Walks the whole lattice downward from the saturated model, checking that no
/// search call produces duplicates and that every child offers its parent back
/// through the upward search.
fn check(variables: usize) {
    let mut manager = uniform_manager(variables);
    let down = strategy("full-down").expect("registered");
    let up = strategy("full-up").expect("registered");

    let top = manager.top_model();
    let mut seen: HashSet<ModelId> = HashSet::new();
    seen.insert(top);
    let mut current = vec![top];
    while !current.is_empty() && seen.len() < 1000 {
        let mut next = Vec::new();
        for &model in &current {
            let children = down.search(&mut manager, model);
            let unique: HashSet<ModelId> = children.iter().copied().collect();
            assert_eq!(unique.len(), children.len(), "duplicate children");
            for &child in &children {
                assert_ne!(child, model);
                let parents = up.search(&mut manager, child);
                assert!(
                    parents.contains(&model),
                    "full-up from {} misses {}",
                    manager.model(child).name(manager.catalog(), manager.relation_cache()),
                    manager.model(model).name(manager.catalog(), manager.relation_cache()),
                );
                if seen.insert(child) {
                    next.push(child);
                }
            }
        }
        current = next;
    }

    if seen.len() < 1000 {
        let bottom = manager.bottom_model();
        assert!(seen.contains(&bottom), "walk never reached independence");
    }
}

#[test]
fn degrees_of_freedom_shrink_downward() {
    let mut manager = uniform_manager(4);
    let down = strategy("full-down").expect("registered");
    let mut model = manager.top_model();
    let mut df = manager.compute_df(model);
    loop {
        let children = down.search(&mut manager, model);
        let child = match children.first() {
            Some(&child) => child,
            None => break,
        };
        let child_df = manager.compute_df(child);
        assert!(child_df < df, "df went from {} to {}", df, child_df);
        df = child_df;
        model = child;
    }
}

#[test]
fn transmission_grows_downward() {
    let mut manager = skewed_manager(3);
    let down = strategy("full-down").expect("registered");
    let mut current = vec![manager.top_model()];
    while !current.is_empty() {
        let mut next = Vec::new();
        for &model in &current {
            let parent_t = manager.compute_transmission(model);
            for child in down.search(&mut manager, model) {
                let t = manager.compute_transmission(child);
                assert!(
                    t >= parent_t - 1e-6,
                    "child transmission {} under parent {}",
                    t,
                    parent_t
                );
                if !next.contains(&child) {
                    next.push(child);
                }
            }
        }
        current = next;
    }
}
