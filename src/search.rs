//! Lattice search strategies.
//!
//! Each strategy enumerates the immediate neighbors of a starting model, one step
//! up or down the lattice of structures. Strategies intern every neighbor through
//! the manager's model cache, record the starting model as progenitor of any model
//! seen for the first time, drop the starting model itself and duplicates, and run
//! the manager's acceptance filter on the rest. Strategies are looked up by name
//! through [`strategy`].

use crate::cache::{ModelId, RelationId};
use crate::manager::Manager;
use crate::model::Model;
use crate::relation::VarSet;

/// One way of stepping through the lattice.
pub trait SearchStrategy {
    /// All accepted neighbors of `start`, in generation order.
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId>;
}

/// Looks up a strategy by its registry name.
///
/// The names are `full-down`, `full-up`, `loopless-down`, `loopless-up`,
/// `disjoint-up`, and `chain-up`.
pub fn strategy(name: &str) -> Option<Box<dyn SearchStrategy>> {
    match name {
        "full-down" => Some(Box::new(FullDown)),
        "full-up" => Some(Box::new(FullUp)),
        "loopless-down" => Some(Box::new(LooplessDown)),
        "loopless-up" => Some(Box::new(LooplessUp)),
        "disjoint-up" => Some(Box::new(DisjointUp)),
        "chain-up" => Some(Box::new(ChainUp)),
        _ => None,
    }
}

/// Interns a freshly built neighbor and appends it to the result list if it is
/// new, distinct from the start, and accepted by the filter.
fn offer(manager: &mut Manager, start: ModelId, model: Model, out: &mut Vec<ModelId>) {
    let (id, fresh) = manager.intern_model(model);
    if fresh {
        manager.model_mut(id).set_progenitor(start);
    }
    if id == start || out.contains(&id) {
        return;
    }
    if manager.apply_filter(id) {
        out.push(id);
    }
}

/// Every child: each relation of more than one variable is replaced by the set of
/// its one-variable-smaller projections. For directed systems the
/// independents-only relation is left alone.
pub struct FullDown;

impl SearchStrategy for FullDown {
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
        let rel_ids = manager.model(start).relations().to_vec();
        let directed = manager.catalog().is_directed();
        let mut out = Vec::new();
        for (at, &rid) in rel_ids.iter().enumerate() {
            let skip = {
                let rel = manager.relation(rid);
                rel.vars().len() == 1
                    || (directed && rel.is_independent_only(manager.catalog()))
            };
            if skip {
                continue;
            }
            let model = manager.build_child_model(start, at);
            offer(manager, start, model, &mut out);
        }
        out
    }
}

/// Every parent: each maximal set of variables that can be assembled by picking,
/// per overlapping relation, one variable outside it, yields a new relation ready
/// to add. The enumeration walks a stack of relation frames; each frame splits the
/// previous frame's shared variables by membership in its relation, and the chosen
/// outside variables of the live frames form the candidate.
pub struct FullUp;

struct Frame {
    rel_index: usize,
    next_rel_index: usize,
    var_index: usize,
    inner: Vec<usize>,
    outer: Vec<usize>,
}

fn push_starting(stack: &mut Vec<Frame>, rel_vars: &[VarSet], total_vars: usize, at: usize) -> bool {
    let vars = &rel_vars[at];
    // a full-width relation has no room to grow
    if vars.len() == total_vars {
        return false;
    }
    stack.push(Frame {
        rel_index: at,
        next_rel_index: at + 1,
        var_index: 0,
        inner: vars.iter().collect(),
        outer: (0..total_vars).filter(|&v| !vars.contains(v)).collect(),
    });
    true
}

fn push_frame(stack: &mut Vec<Frame>, rel_vars: &[VarSet], total_vars: usize, at: usize) -> bool {
    let (inner, outer) = match stack.last() {
        None => return push_starting(stack, rel_vars, total_vars, at),
        Some(top) => top
            .inner
            .iter()
            .copied()
            .partition(|&v| rel_vars[at].contains(v)),
    };
    stack.push(Frame {
        rel_index: at,
        next_rel_index: at + 1,
        var_index: 0,
        inner,
        outer,
    });
    true
}

/// Pushes the next relation containing every frame's chosen variable, advancing
/// the cursor past it. Returns false when no relation qualifies.
fn push_matching(stack: &mut Vec<Frame>, rel_vars: &[VarSet], total_vars: usize) -> bool {
    let chosen: Vec<usize> = stack.iter().map(|f| f.outer[f.var_index]).collect();
    loop {
        let next = match stack.last() {
            Some(top) => top.next_rel_index,
            None => return false,
        };
        if next >= rel_vars.len() {
            return false;
        }
        if let Some(top) = stack.last_mut() {
            top.next_rel_index += 1;
        }
        if chosen.iter().all(|&v| rel_vars[next].contains(v)) {
            push_frame(stack, rel_vars, total_vars, next);
            return true;
        }
    }
}

fn grow_candidate(manager: &mut Manager, start: ModelId, stack: &[Frame], out: &mut Vec<ModelId>) {
    let mut vars: Vec<usize> = stack.iter().map(|f| f.outer[f.var_index]).collect();
    vars.sort_unstable();
    let rel = manager.get_relation(&vars);
    let rel_ids = manager.model(start).relations().to_vec();
    let mut model = Model::new();
    for &r in &rel_ids {
        model.add_relation(r, false, manager.relation_cache());
    }
    model.add_relation(rel, true, manager.relation_cache());
    offer(manager, start, model, out);
}

impl SearchStrategy for FullUp {
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
        let rel_ids = manager.model(start).relations().to_vec();
        let rel_vars: Vec<VarSet> = rel_ids
            .iter()
            .map(|&r| manager.relation(r).vars().clone())
            .collect();
        let total_vars = manager.catalog().len();
        let mut out = Vec::new();

        for rel_index in 0..rel_ids.len().saturating_sub(1) {
            let mut stack: Vec<Frame> = Vec::new();
            if !push_frame(&mut stack, &rel_vars, total_vars, rel_index) {
                continue;
            }
            loop {
                let top = stack.len() - 1;
                if stack[top].inner.is_empty() {
                    while stack[top].var_index < stack[top].outer.len() {
                        if stack.len() > 1 {
                            grow_candidate(manager, start, &stack, &mut out);
                        }
                        stack[top].var_index += 1;
                        stack[top].next_rel_index = stack[top].rel_index + 1;
                    }
                    stack.pop();
                    if stack.is_empty() {
                        break;
                    }
                } else {
                    while stack[top].var_index < stack[top].outer.len()
                        && !push_matching(&mut stack, &rel_vars, total_vars)
                    {
                        if stack.len() > 1 {
                            grow_candidate(manager, start, &stack, &mut out);
                        }
                        stack[top].var_index += 1;
                        stack[top].next_rel_index = stack[top].rel_index + 1;
                    }
                    if stack[top].var_index >= stack[top].outer.len() {
                        stack.pop();
                    }
                    if stack.is_empty() {
                        break;
                    }
                }
            }
        }
        out
    }
}

/// Loopless children. For a neutral system, every variable pair appearing in
/// exactly one relation yields the child where that relation is split by dropping
/// either member of the pair. For a directed system the model must be the
/// independents-only relation plus one predicting relation; each child drops one
/// independent variable from the predicting relation.
pub struct LooplessDown;

impl SearchStrategy for LooplessDown {
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
        if manager.catalog().is_directed() {
            directed_loopless_down(manager, start)
        } else {
            neutral_loopless_down(manager, start)
        }
    }
}

fn directed_loopless_down(manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
    let mut out = Vec::new();
    let rel_ids = manager.model(start).relations().to_vec();
    if rel_ids.is_empty() || rel_ids.len() > 2 {
        return out;
    }
    let dv = match manager.catalog().dependent_variable() {
        Some(v) => v,
        None => return out,
    };
    let (rel, iv_rel) = if rel_ids.len() == 1 {
        if start != manager.top_model() {
            return out;
        }
        let rel = rel_ids[0];
        (rel, manager.child_relation(rel, dv))
    } else if manager
        .relation(rel_ids[1])
        .is_independent_only(manager.catalog())
    {
        (rel_ids[0], rel_ids[1])
    } else {
        (rel_ids[1], rel_ids[0])
    };
    if manager.relation(rel).is_independent_only(manager.catalog())
        || !manager
            .relation(iv_rel)
            .is_independent_only(manager.catalog())
    {
        return out;
    }
    let active_ivs: Vec<usize> = manager
        .relation(rel)
        .vars()
        .iter()
        .filter(|&v| v != dv)
        .collect();
    for v in active_ivs {
        let child = manager.child_relation(rel, v);
        let mut model = Model::new();
        model.add_relation(iv_rel, true, manager.relation_cache());
        model.add_relation(child, true, manager.relation_cache());
        offer(manager, start, model, &mut out);
    }
    out
}

fn neutral_loopless_down(manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
    let mut out = Vec::new();
    let rel_ids = manager.model(start).relations().to_vec();
    let varcount = manager.catalog().len();
    for v1 in 0..varcount {
        for v2 in v1 + 1..varcount {
            let mut including = Vec::new();
            for (at, &r) in rel_ids.iter().enumerate() {
                let vars = manager.relation(r).vars();
                if vars.contains(v1) && vars.contains(v2) {
                    including.push(at);
                    if including.len() > 1 {
                        break;
                    }
                }
            }
            // the pair must live in exactly one relation, or splitting it
            // either does nothing or leaves the pair intact elsewhere
            if including.len() != 1 {
                continue;
            }
            let hit = including[0];
            let c1 = manager.child_relation(rel_ids[hit], v1);
            let c2 = manager.child_relation(rel_ids[hit], v2);
            let mut model = Model::new();
            for (at, &r) in rel_ids.iter().enumerate() {
                if at != hit {
                    model.add_relation(r, false, manager.relation_cache());
                }
            }
            model.add_relation(c1, true, manager.relation_cache());
            model.add_relation(c2, true, manager.relation_cache());
            offer(manager, start, model, &mut out);
        }
    }
    out
}

/// Loopless parents. Refuses to start from a model that already has loops. For a
/// neutral system a relation grows by one variable when the grown relation's other
/// minimal extension is already present and the new pair lives nowhere in the
/// model; for a directed system each predicting relation simply grows by each
/// variable it lacks.
pub struct LooplessUp;

impl SearchStrategy for LooplessUp {
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
        if manager.has_loops(start) {
            let name = manager
                .model(start)
                .name(manager.catalog(), manager.relation_cache())
                .to_owned();
            log::warn!("cannot run a loopless search from {}, which has loops", name);
            return Vec::new();
        }
        if manager.catalog().is_directed() {
            directed_loopless_up(manager, start)
        } else {
            neutral_loopless_up(manager, start)
        }
    }
}

fn neutral_loopless_up(manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
    let mut out = Vec::new();
    let rel_ids = manager.model(start).relations().to_vec();
    let varcount = manager.catalog().len();
    for &rid in &rel_ids {
        let rel_vars = manager.relation(rid).vars().clone();
        if rel_vars.len() == varcount {
            continue;
        }
        let missing: Vec<usize> = (0..varcount).filter(|&v| !rel_vars.contains(v)).collect();
        for v1 in rel_vars.iter() {
            for &v2 in &missing {
                let pair = manager.get_relation(&[v1, v2]);
                if manager
                    .model(start)
                    .contains_relation(pair, manager.relation_cache())
                {
                    continue;
                }
                let swapped_vars = rel_vars.without(v1).with(v2);
                let swapped = manager.get_relation(swapped_vars.as_slice());
                if !manager
                    .model(start)
                    .contains_relation(swapped, manager.relation_cache())
                {
                    continue;
                }
                let grown_vars = rel_vars.with(v2);
                let grown = manager.get_relation(grown_vars.as_slice());
                let mut model = Model::new();
                for &r in &rel_ids {
                    model.add_relation(r, false, manager.relation_cache());
                }
                model.add_relation(grown, true, manager.relation_cache());
                offer(manager, start, model, &mut out);
            }
        }
    }
    out
}

fn directed_loopless_up(manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
    let mut out = Vec::new();
    let rel_ids = manager.model(start).relations().to_vec();
    let ind_only = find_independent_only(manager, &rel_ids);
    let ind_only = match ind_only {
        Some(at) => at,
        None => {
            log::warn!("directed search needs an independents-only relation in the start model");
            return out;
        }
    };
    for var in 0..manager.catalog().len() {
        for (at, &rid) in rel_ids.iter().enumerate() {
            if at == ind_only || manager.relation(rid).vars().contains(var) {
                continue;
            }
            let grown_vars = manager.relation(rid).vars().with(var);
            let grown = manager.get_relation(grown_vars.as_slice());
            let mut model = Model::new();
            for (other, &r) in rel_ids.iter().enumerate() {
                if other != at {
                    model.add_relation(r, false, manager.relation_cache());
                }
            }
            model.add_relation(grown, true, manager.relation_cache());
            offer(manager, start, model, &mut out);
        }
    }
    out
}

fn find_independent_only(manager: &Manager, rel_ids: &[RelationId]) -> Option<usize> {
    rel_ids
        .iter()
        .position(|&r| manager.relation(r).is_independent_only(manager.catalog()))
}

/// Disjoint parents: predicting relations never overlap, so a parent either
/// merges two of them or, in a directed system, introduces an absent variable
/// paired with the dependent variable.
pub struct DisjointUp;

impl SearchStrategy for DisjointUp {
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
        let mut out = Vec::new();
        let rel_ids = manager.model(start).relations().to_vec();
        let directed = manager.catalog().is_directed();
        let ind_only = if directed {
            find_independent_only(manager, &rel_ids)
        } else {
            None
        };

        if directed {
            let dv = match manager.catalog().dependent_variable() {
                Some(v) => v,
                None => return out,
            };
            for var in 0..manager.catalog().len() {
                if var == dv {
                    continue;
                }
                let mut present = false;
                for (at, &rid) in rel_ids.iter().enumerate() {
                    if Some(at) == ind_only {
                        continue;
                    }
                    if manager.relation(rid).vars().contains(var) {
                        present = true;
                        break;
                    }
                }
                if present {
                    continue;
                }
                let pair = manager.get_relation(&[var, dv]);
                let mut model = Model::new();
                for &r in &rel_ids {
                    model.add_relation(r, false, manager.relation_cache());
                }
                model.add_relation(pair, true, manager.relation_cache());
                offer(manager, start, model, &mut out);
            }
        }

        for r in 0..rel_ids.len() {
            if Some(r) == ind_only {
                continue;
            }
            for r2 in r + 1..rel_ids.len() {
                if Some(r2) == ind_only {
                    continue;
                }
                let union = manager
                    .relation(rel_ids[r])
                    .vars()
                    .union(manager.relation(rel_ids[r2]).vars());
                let merged = manager.get_relation(union.as_slice());
                let mut model = Model::new();
                for (at, &rel) in rel_ids.iter().enumerate() {
                    if at != r && at != r2 {
                        model.add_relation(rel, false, manager.relation_cache());
                    }
                }
                model.add_relation(merged, true, manager.relation_cache());
                offer(manager, start, model, &mut out);
            }
        }
        out
    }
}

/// Chain models: every ordering of the (independent) variables links adjacent
/// variables pairwise, each pair extended with the dependent variable in a
/// directed system. A forward and backward ordering produce the same model, so
/// each one surfaces once.
pub struct ChainUp;

impl SearchStrategy for ChainUp {
    fn search(&self, manager: &mut Manager, start: ModelId) -> Vec<ModelId> {
        let dv = if manager.catalog().is_directed() {
            manager.catalog().dependent_variable()
        } else {
            None
        };
        let ind_only_rel = if manager.catalog().is_directed() {
            let rel_ids = manager.model(start).relations().to_vec();
            match find_independent_only(manager, &rel_ids) {
                Some(at) => Some(rel_ids[at]),
                None => {
                    log::warn!(
                        "chain search needs an independents-only relation in the start model"
                    );
                    return Vec::new();
                }
            }
        } else {
            None
        };
        let pool: Vec<usize> = (0..manager.catalog().len())
            .filter(|&v| Some(v) != dv)
            .collect();
        let mut order = Vec::with_capacity(pool.len());
        let mut out = Vec::new();
        chain_orderings(manager, start, &pool, &mut order, ind_only_rel, dv, &mut out);
        out
    }
}

fn chain_orderings(
    manager: &mut Manager,
    start: ModelId,
    pool: &[usize],
    order: &mut Vec<usize>,
    ind_only_rel: Option<RelationId>,
    dv: Option<usize>,
    out: &mut Vec<ModelId>,
) {
    if order.len() == pool.len() {
        let mut model = Model::new();
        if let Some(rel) = ind_only_rel {
            model.add_relation(rel, false, manager.relation_cache());
        }
        let links: Vec<(usize, usize)> = order.windows(2).map(|w| (w[0], w[1])).collect();
        for (a, b) in links {
            let rel = match dv {
                Some(d) => manager.get_relation(&[a, b, d]),
                None => manager.get_relation(&[a, b]),
            };
            model.add_relation(rel, true, manager.relation_cache());
        }
        offer(manager, start, model, out);
        return;
    }
    for &v in pool {
        if order.contains(&v) {
            continue;
        }
        order.push(v);
        chain_orderings(manager, start, pool, order, ind_only_rel, dv, out);
        order.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::build_full_key;
    use crate::table::{Table, TableKind};
    use crate::variable::CatalogBuilder;

    fn manager(directed: bool) -> Manager {
        let mut builder = CatalogBuilder::new();
        builder.add_variable("a", "A", 2, false);
        builder.add_variable("b", "B", 2, false);
        builder.add_variable("c", "C", 2, directed);
        let catalog = builder.build();
        let mut input = Table::new(TableKind::Frequencies, catalog.key_size());
        let mut count = 0.0;
        for a in 0..2 {
            for b in 0..2 {
                for c in 0..2 {
                    count += 1.0;
                    input.add_tuple(build_full_key(&catalog, &[a, b, c]), count);
                }
            }
        }
        Manager::new(catalog, input)
    }

    fn names(manager: &Manager, models: &[ModelId]) -> Vec<String> {
        models
            .iter()
            .map(|&m| {
                manager
                    .model(m)
                    .name(manager.catalog(), manager.relation_cache())
                    .to_owned()
            })
            .collect()
    }

    #[test]
    fn registry_knows_every_strategy() {
        for name in &[
            "full-down",
            "full-up",
            "loopless-down",
            "loopless-up",
            "disjoint-up",
            "chain-up",
        ] {
            assert!(strategy(name).is_some(), "{} missing", name);
        }
        assert!(strategy("sideways").is_none());
    }

    #[test]
    fn full_down_from_the_top() {
        let mut manager = manager(false);
        let top = manager.top_model();
        let children = FullDown.search(&mut manager, top);
        assert_eq!(names(&manager, &children), vec!["AB:AC:BC"]);
    }

    #[test]
    fn full_down_stops_at_single_variables() {
        let mut manager = manager(false);
        let bottom = manager.bottom_model();
        assert!(FullDown.search(&mut manager, bottom).is_empty());
    }

    #[test]
    fn full_up_recovers_the_top() {
        let mut manager = manager(false);
        let loopy = manager.make_model("AB:AC:BC").unwrap();
        let parents = FullUp.search(&mut manager, loopy);
        assert_eq!(names(&manager, &parents), vec!["ABC"]);
    }

    #[test]
    fn loopless_down_splits_the_only_pair() {
        let mut manager = manager(false);
        let start = manager.make_model("AB:C").unwrap();
        let children = LooplessDown.search(&mut manager, start);
        assert_eq!(names(&manager, &children), vec!["IVI"]);
    }

    #[test]
    fn loopless_up_from_independence() {
        let mut manager = manager(false);
        let bottom = manager.bottom_model();
        let found = LooplessUp.search(&mut manager, bottom);
        let mut parents = names(&manager, &found);
        parents.sort();
        assert_eq!(parents, vec!["A:BC", "AB:C", "AC:B"]);
    }

    #[test]
    fn loopless_up_refuses_loops() {
        let mut manager = manager(false);
        let loopy = manager.make_model("AB:AC:BC").unwrap();
        assert!(LooplessUp.search(&mut manager, loopy).is_empty());
    }

    #[test]
    fn directed_loopless_down_drops_one_independent() {
        let mut manager = manager(true);
        let top = manager.top_model();
        let found = LooplessDown.search(&mut manager, top);
        let mut children = names(&manager, &found);
        children.sort();
        assert_eq!(children, vec!["IV:AC", "IV:BC"]);
    }

    #[test]
    fn disjoint_up_from_the_directed_bottom() {
        let mut manager = manager(true);
        let bottom = manager.bottom_model();
        let found = DisjointUp.search(&mut manager, bottom);
        let mut parents = names(&manager, &found);
        parents.sort();
        assert_eq!(parents, vec!["IV:AC", "IV:BC"]);
    }

    #[test]
    fn chain_orderings_collapse_reversals() {
        let mut manager = manager(false);
        let bottom = manager.bottom_model();
        let found = ChainUp.search(&mut manager, bottom);
        let mut chains = names(&manager, &found);
        chains.sort();
        assert_eq!(chains, vec!["AB:AC", "AB:BC", "AC:BC"]);
    }

    #[test]
    fn progenitors_point_at_the_start() {
        let mut manager = manager(false);
        let top = manager.top_model();
        let children = FullDown.search(&mut manager, top);
        for &child in &children {
            assert_eq!(manager.model(child).progenitor(), Some(top));
        }
    }
}
