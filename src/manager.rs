//! The problem-instance façade.
//!
//! A [`Manager`] owns everything with problem lifetime: the frozen catalog, the
//! normalized input table (and optional held-out test table), both interning caches,
//! the fit options, and the candidate acceptance filter. Every relation and model is
//! reached through it by id, so there is exactly one live instance per canonical
//! name for the life of the problem.

use crate::attr::attribute;
use crate::cache::{ModelCache, ModelId, RelationCache, RelationId};
use crate::fit::FitOptions;
use crate::key::{self, KeyBuf};
use crate::math;
use crate::model::Model;
use crate::projection;
use crate::relation::{Relation, StateConstraint, StateSpec, VarSet};
use crate::table::Table;
use crate::variable::{ModelSpecError, VariableCatalog};
use std::collections::HashMap;

/// Callback deciding whether a search keeps a candidate model.
pub type ModelFilter = dyn Fn(&Manager, ModelId) -> bool;

/// Owns one reconstructability-analysis problem instance.
pub struct Manager {
    pub(crate) catalog: VariableCatalog,
    pub(crate) input: Table,
    test: Option<Table>,
    pub(crate) sample_size: usize,
    input_h: f64,
    pub(crate) relations: RelationCache,
    pub(crate) models: ModelCache,
    pub(crate) options: FitOptions,
    filter: Option<Box<ModelFilter>>,
    sb_redundant: HashMap<(Vec<RelationId>, RelationId), bool>,
}

impl Manager {
    /// Creates a manager over raw frequency data with default fit options.
    ///
    /// The input table is sorted and normalized; its pre-normalization sum becomes
    /// the sample size used to scale the fit convergence threshold.
    pub fn new(catalog: VariableCatalog, input: Table) -> Manager {
        Manager::with_options(catalog, input, FitOptions::default())
    }

    /// Like [`Manager::new`] with explicit fit options.
    pub fn with_options(catalog: VariableCatalog, mut input: Table, options: FitOptions) -> Manager {
        input.sort();
        let sample_size = input.normalize();
        let input_h = math::entropy(&input);
        log::debug!(
            "manager over {} variables, {} observed cells, sample size {}, input entropy {:.4}",
            catalog.len(),
            input.len(),
            sample_size,
            input_h
        );
        Manager {
            catalog,
            input,
            test: None,
            sample_size,
            input_h,
            relations: RelationCache::new(),
            models: ModelCache::new(),
            options,
            filter: None,
            sb_redundant: HashMap::new(),
        }
    }

    /// The variable catalog.
    pub fn catalog(&self) -> &VariableCatalog {
        &self.catalog
    }

    /// The normalized input distribution.
    pub fn input_table(&self) -> &Table {
        &self.input
    }

    /// The held-out test distribution, if one was supplied.
    pub fn test_table(&self) -> Option<&Table> {
        self.test.as_ref()
    }

    /// Installs a held-out test table in the input schema; it is sorted and
    /// normalized the same way.
    pub fn set_test_table(&mut self, mut table: Table) {
        table.sort();
        table.normalize();
        self.test = Some(table);
    }

    /// The input's pre-normalization sum, rounded; 1 means the input was already a
    /// probability distribution.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Entropy of the input distribution, in bits.
    pub fn input_entropy(&self) -> f64 {
        self.input_h
    }

    /// The fit options in effect.
    pub fn options(&self) -> &FitOptions {
        &self.options
    }

    /// Mutable access to the fit options.
    pub fn options_mut(&mut self) -> &mut FitOptions {
        &mut self.options
    }

    /// The relation arena.
    pub fn relation_cache(&self) -> &RelationCache {
        &self.relations
    }

    /// The model arena.
    pub fn model_cache(&self) -> &ModelCache {
        &self.models
    }

    /// Resolves a relation id.
    pub fn relation(&self, id: RelationId) -> &Relation {
        self.relations.get(id)
    }

    /// Resolves a model id.
    pub fn model(&self, id: ModelId) -> &Model {
        self.models.get(id)
    }

    /// Mutable resolution of a model id.
    pub fn model_mut(&mut self, id: ModelId) -> &mut Model {
        self.models.get_mut(id)
    }

    /// Installs the candidate acceptance filter applied by every search strategy.
    pub fn set_filter(&mut self, filter: impl Fn(&Manager, ModelId) -> bool + 'static) {
        self.filter = Some(Box::new(filter));
    }

    /// Removes the acceptance filter; every candidate passes again.
    pub fn clear_filter(&mut self) {
        self.filter = None;
    }

    /// Runs the acceptance filter; a model passes when no filter is installed.
    pub fn apply_filter(&self, model: ModelId) -> bool {
        match &self.filter {
            Some(filter) => filter(self, model),
            None => true,
        }
    }

    /// Interns the relation over the given variables, returning the existing
    /// instance if one is cached.
    pub fn get_relation(&mut self, vars: &[usize]) -> RelationId {
        self.relations.intern(Relation::new(VarSet::new(vars)))
    }

    /// Interns a state-based relation. `states[i]` fixes `vars[i]` to one value;
    /// `None` leaves the whole variable in play. The relation's constraint keys are
    /// generated once, when it is first interned.
    pub fn get_state_relation(
        &mut self,
        vars: &[usize],
        states: &[Option<usize>],
    ) -> RelationId {
        let mut pairs: Vec<(usize, Option<usize>)> =
            vars.iter().copied().zip(states.iter().copied()).collect();
        pairs.sort_unstable_by_key(|&(v, _)| v);
        pairs.dedup_by_key(|&mut (v, _)| v);

        let var_set: VarSet = pairs.iter().map(|&(v, _)| v).collect();
        let spec: StateSpec = pairs.iter().map(|&(_, s)| s).collect();
        if let Some(id) = self.relations.find(&var_set, Some(&spec)) {
            return id;
        }

        let mut constraints = StateConstraint::new();
        let mut scratch = key::empty_key(self.catalog.key_size());
        build_constraints(&self.catalog, &pairs, &mut scratch, &mut constraints);
        let mut relation = Relation::with_states(var_set, spec);
        relation.set_constraints(constraints);
        self.relations.intern(relation)
    }

    /// The relation equal to `rel` minus one variable.
    pub fn child_relation(&mut self, rel: RelationId, var: usize) -> RelationId {
        let vars = self.relations.get(rel).vars().without(var);
        self.get_relation(vars.as_slice())
    }

    /// Projects the input onto `rel` if that marginal has not been built yet.
    pub fn make_projection(&mut self, rel: RelationId) {
        if self.relations.get(rel).table().is_some() {
            return;
        }
        let table = projection::project(&self.catalog, &self.input, self.relations.get(rel));
        self.relations.get_mut(rel).set_table(table);
    }

    /// Discards a relation's marginal table; it will be projected again on demand.
    pub fn drop_projection(&mut self, rel: RelationId) {
        self.relations.get_mut(rel).drop_table();
    }

    /// Interns a model, returning its id and whether it was new.
    pub fn intern_model(&mut self, model: Model) -> (ModelId, bool) {
        self.models.intern(model, &self.catalog, &self.relations)
    }

    /// The saturated model: one relation over every variable.
    pub fn top_model(&mut self) -> ModelId {
        let all = self.catalog.all_variables();
        let rel = self.get_relation(all.as_slice());
        let mut model = Model::new();
        model.add_relation(rel, false, &self.relations);
        self.intern_model(model).0
    }

    /// The independence model: for a directed system, the independent-variable
    /// relation plus one single-variable relation per dependent variable; for an
    /// undirected system, every single-variable relation.
    pub fn bottom_model(&mut self) -> ModelId {
        let mut model = Model::new();
        if self.catalog.is_directed() {
            let iv = self.catalog.independent_variables();
            let rel = self.get_relation(iv.as_slice());
            model.add_relation(rel, false, &self.relations);
            for v in 0..self.catalog.len() {
                if self.catalog.variable(v).is_dependent() {
                    let rel = self.get_relation(&[v]);
                    model.add_relation(rel, false, &self.relations);
                }
            }
        } else {
            for v in 0..self.catalog.len() {
                let rel = self.get_relation(&[v]);
                model.add_relation(rel, false, &self.relations);
            }
        }
        self.intern_model(model).0
    }

    /// Parses a colon-separated canonical model name and interns the result.
    ///
    /// `IV` expands to the relation over all independent variables (directed
    /// systems only); `IVI` to every single-variable relation; anything else is a
    /// separator-free relation name, with digits fixing states.
    pub fn make_model(&mut self, name: &str) -> Result<ModelId, ModelSpecError> {
        let mut model = Model::new();
        for token in name.split(':') {
            match token {
                "IV" => {
                    if !self.catalog.is_directed() {
                        return Err(ModelSpecError::NotDirected);
                    }
                    let iv = self.catalog.independent_variables();
                    let rel = self.get_relation(iv.as_slice());
                    self.add_relation_checked(&mut model, rel);
                }
                "IVI" => {
                    for v in 0..self.catalog.len() {
                        let rel = self.get_relation(&[v]);
                        self.add_relation_checked(&mut model, rel);
                    }
                }
                _ => {
                    let parsed = self.catalog.parse_name(token)?;
                    let rel = if parsed.is_state_based() {
                        self.get_state_relation(&parsed.variables, &parsed.states)
                    } else {
                        self.get_relation(&parsed.variables)
                    };
                    self.add_relation_checked(&mut model, rel);
                }
            }
        }
        Ok(self.intern_model(model).0)
    }

    /// Adds a relation to a model under construction.
    ///
    /// Variable-based additions normalize syntactically. As soon as state
    /// constraints are involved the subset test is meaningless, so redundancy is
    /// decided semantically instead: the addition is dropped when it leaves the
    /// degrees of freedom unchanged, comparing with a fixed epsilon. The verdict is
    /// memoized per (relation set, candidate) pair since it costs a matrix rank.
    pub fn add_relation_checked(&mut self, model: &mut Model, rel: RelationId) {
        let state_based =
            self.relations.get(rel).is_state_based() || model.is_state_based(&self.relations);
        if !state_based {
            model.add_relation(rel, true, &self.relations);
            return;
        }
        let memo_key = (model.relations().to_vec(), rel);
        let redundant = match self.sb_redundant.get(&memo_key) {
            Some(&verdict) => verdict,
            None => {
                let before = self.sb_df_for(model.relations());
                let mut extended = model.relations().to_vec();
                extended.push(rel);
                let after = self.sb_df_for(&extended);
                let verdict = (after - before).abs() < 1e-6;
                self.sb_redundant.insert(memo_key, verdict);
                verdict
            }
        };
        if !redundant {
            model.add_relation(rel, false, &self.relations);
        }
    }

    fn sb_df_for(&self, rel_ids: &[RelationId]) -> f64 {
        let rels: Vec<&Relation> = rel_ids.iter().map(|&r| self.relations.get(r)).collect();
        math::state_based_df(&self.catalog, &rels)
    }

    /// Builds (without interning) the model obtained from `start` by replacing its
    /// `remove`-th relation with all of that relation's one-variable-smaller
    /// children.
    pub fn build_child_model(&mut self, start: ModelId, remove: usize) -> Model {
        let rel_ids = self.models.get(start).relations().to_vec();
        let mut model = Model::new();
        for (at, &r) in rel_ids.iter().enumerate() {
            if at != remove {
                model.add_relation(r, false, &self.relations);
            }
        }
        let vars = self.relations.get(rel_ids[remove]).vars().clone();
        for &v in vars.as_slice() {
            let child = self.get_relation(vars.without(v).as_slice());
            model.add_relation(child, true, &self.relations);
        }
        model
    }

    /// Whether the model's relations overlap cyclically. Memoized per model.
    pub fn has_loops(&mut self, model: ModelId) -> bool {
        if let Some(memo) = self.models.get(model).attributes().get(attribute::LOOPS) {
            return memo != 0.0;
        }
        let sets: Vec<VarSet> = self
            .models
            .get(model)
            .relations()
            .iter()
            .map(|&r| self.relations.get(r).vars().clone())
            .collect();
        let loops = math::has_loops(&sets);
        self.models
            .get_mut(model)
            .attributes_mut()
            .set(attribute::LOOPS, if loops { 1.0 } else { 0.0 });
        loops
    }

    /// Degrees of freedom of a model: inclusion–exclusion over the intersection
    /// closure of its relations, or structure-matrix rank for state-based models.
    /// Memoized per model.
    pub fn compute_df(&mut self, model: ModelId) -> f64 {
        if let Some(memo) = self.models.get(model).attributes().get(attribute::DF) {
            return memo;
        }
        let df = if self.models.get(model).is_state_based(&self.relations) {
            self.sb_df_for(&self.models.get(model).relations().to_vec())
        } else {
            let levels = self.intersect_levels(model);
            levels
                .iter()
                .map(|&(rid, count)| {
                    count as f64 * self.relations.get(rid).degrees_of_freedom(&self.catalog)
                })
                .sum()
        };
        self.models
            .get_mut(model)
            .attributes_mut()
            .set(attribute::DF, df);
        df
    }

    /// Entropy of the model's maximum-uncertainty distribution, in bits.
    ///
    /// Loopless variable-based models sum their relations' marginal entropies by
    /// inclusion–exclusion; everything else takes the entropy of the fitted table.
    /// Memoized per model.
    pub fn compute_h(&mut self, model: ModelId) -> f64 {
        if let Some(memo) = self.models.get(model).attributes().get(attribute::H) {
            return memo;
        }
        let state_based = self.models.get(model).is_state_based(&self.relations);
        let h = if state_based || self.has_loops(model) {
            self.make_fit_table(model);
            let fit_h = self
                .models
                .get(model)
                .fit_table()
                .map_or(0.0, math::entropy);
            self.models
                .get_mut(model)
                .attributes_mut()
                .set(attribute::FIT_H, fit_h);
            fit_h
        } else {
            let levels = self.intersect_levels(model);
            for &(rid, _) in &levels {
                self.make_projection(rid);
            }
            levels
                .iter()
                .map(|&(rid, count)| count as f64 * self.relation_entropy(rid))
                .sum()
        };
        self.models
            .get_mut(model)
            .attributes_mut()
            .set(attribute::H, h);
        h
    }

    /// Transmission of the model against the input: `compute_h` minus the input
    /// entropy. Memoized per model.
    pub fn compute_transmission(&mut self, model: ModelId) -> f64 {
        if let Some(memo) = self.models.get(model).attributes().get(attribute::T) {
            return memo;
        }
        let t = self.compute_h(model) - self.input_h;
        self.models
            .get_mut(model)
            .attributes_mut()
            .set(attribute::T, t);
        t
    }

    /// Entropy of one relation's marginal, memoized on the relation. The marginal
    /// must already be projected.
    pub fn relation_entropy(&mut self, rel: RelationId) -> f64 {
        if let Some(memo) = self.relations.get(rel).attributes().get(attribute::H) {
            return memo;
        }
        let h = self
            .relations
            .get(rel)
            .table()
            .map_or(0.0, math::entropy);
        self.relations
            .get_mut(rel)
            .attributes_mut()
            .set(attribute::H, h);
        h
    }

    /// The inclusion–exclusion closure of a model's relation intersections, as net
    /// signed counts: level 0 is the relations themselves with count +1; each
    /// deeper level intersects the previous level's entries with every later
    /// relation of the model, flipping sign. Entries cancelling to zero are
    /// dropped.
    pub(crate) fn intersect_levels(&mut self, model: ModelId) -> Vec<(RelationId, i32)> {
        let rel_ids = self.models.get(model).relations().to_vec();
        let mut counts: HashMap<RelationId, i32> = HashMap::new();
        for &r in &rel_ids {
            *counts.entry(r).or_insert(0) += 1;
        }
        let mut level: Vec<(RelationId, usize)> = rel_ids
            .iter()
            .copied()
            .enumerate()
            .map(|(at, r)| (r, at))
            .collect();
        let mut sign = 1;
        while !level.is_empty() {
            sign = -sign;
            let mut next = Vec::new();
            for &(rid, start) in &level {
                let vars = self.relations.get(rid).vars().clone();
                for later in start + 1..rel_ids.len() {
                    let inter = vars.intersection(self.relations.get(rel_ids[later]).vars());
                    if inter.is_empty() {
                        continue;
                    }
                    let inter_rel = self.get_relation(inter.as_slice());
                    *counts.entry(inter_rel).or_insert(0) += sign;
                    next.push((inter_rel, later));
                }
            }
            level = next;
        }
        let mut out: Vec<(RelationId, i32)> = counts
            .into_iter()
            .filter(|&(_, count)| count != 0)
            .collect();
        out.sort_unstable_by_key(|&(rid, _)| rid);
        out
    }
}

fn build_constraints(
    catalog: &VariableCatalog,
    pairs: &[(usize, Option<usize>)],
    scratch: &mut KeyBuf,
    constraints: &mut StateConstraint,
) {
    match pairs.split_first() {
        None => constraints.add(scratch.clone()),
        Some((&(var, fixed), rest)) => {
            let variable = catalog.variable(var);
            let values: Vec<usize> = match fixed {
                Some(state) => vec![state],
                None => (0..variable.cardinality()).collect(),
            };
            for value in values {
                key::set_value(scratch, variable, value);
                build_constraints(catalog, rest, scratch, constraints);
            }
            key::set_value(scratch, variable, key::DONT_CARE as usize);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::build_full_key;
    use crate::table::TableKind;
    use crate::variable::CatalogBuilder;

    fn manager() -> Manager {
        let mut builder = CatalogBuilder::new();
        builder.add_variable("a", "A", 2, false);
        builder.add_variable("b", "B", 2, false);
        builder.add_variable("c", "C", 2, false);
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

    #[test]
    fn relations_are_interned_once() {
        let mut manager = manager();
        let ab = manager.get_relation(&[0, 1]);
        let ba = manager.get_relation(&[1, 0]);
        assert_eq!(ab, ba);
    }

    #[test]
    fn make_model_round_trips_canonical_names() {
        let mut manager = manager();
        let model = manager.make_model("AB:BC").unwrap();
        let name = manager
            .model(model)
            .name(manager.catalog(), manager.relation_cache())
            .to_owned();
        assert_eq!(name, "AB:BC");
        let again = manager.make_model("BC:AB").unwrap();
        assert_eq!(model, again);

        assert!(manager.make_model("AB:QX").is_err());
        assert!(manager.make_model("IV").is_err());
    }

    #[test]
    fn ivi_expands_to_independence() {
        let mut manager = manager();
        let ivi = manager.make_model("IVI").unwrap();
        let bottom = manager.bottom_model();
        assert_eq!(ivi, bottom);
        assert_eq!(manager.model(bottom).relation_count(), 3);
    }

    #[test]
    fn saturated_df_and_entropy() {
        let mut manager = manager();
        let top = manager.top_model();
        assert!((manager.compute_df(top) - 7.0).abs() < 1e-9);
        // the saturated model reproduces the input exactly
        assert!((manager.compute_h(top) - manager.input_entropy()).abs() < 1e-9);
        assert!(manager.compute_transmission(top).abs() < 1e-9);
    }

    #[test]
    fn independence_df_sums_per_variable() {
        let mut manager = manager();
        let bottom = manager.bottom_model();
        // three binary variables contribute one df each
        assert!((manager.compute_df(bottom) - 3.0).abs() < 1e-9);
        assert!(!manager.has_loops(bottom));
    }

    #[test]
    fn chain_df_uses_inclusion_exclusion() {
        let mut manager = manager();
        let chain = manager.make_model("AB:BC").unwrap();
        // df(AB) + df(BC) − df(B) = 3 + 3 − 1
        assert!((manager.compute_df(chain) - 5.0).abs() < 1e-9);
        assert!(!manager.has_loops(chain));

        let cycle = manager.make_model("AB:BC:AC").unwrap();
        assert!(manager.has_loops(cycle));
    }

    #[test]
    fn state_relation_builds_its_constraint_keys() {
        let mut manager = manager();
        let rel = manager.get_state_relation(&[0, 1], &[Some(1), None]);
        let constraints = manager.relation(rel).constraints().unwrap();
        // A fixed to 1, B free over both values
        assert_eq!(constraints.len(), 2);
        let expected = key::build_key(manager.catalog(), &[0, 1], &[1, 0]);
        assert!(constraints.matches(&expected));
    }
}
