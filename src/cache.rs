//! Interning caches for relations and models.
//!
//! Both caches are arenas: they own every instance for the life of a problem and
//! hand out copyable ids, so nothing else ever holds a reference that could dangle.
//! `intern` is first-wins: asking twice for the same canonical content yields the
//! same id, which is what lets searches deduplicate candidates by id comparison.

use crate::model::Model;
use crate::relation::{Relation, StateSpec, VarSet};
use crate::variable::VariableCatalog;
use std::collections::HashMap;

/// Handle to a [`Relation`] owned by a [`RelationCache`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RelationId(u32);

/// Handle to a [`Model`] owned by a [`ModelCache`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ModelId(u32);

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct RelationKey {
    vars: VarSet,
    states: Option<StateSpec>,
}

/// Owns every relation of a problem instance, keyed by variable set (plus state
/// spec for state-based relations).
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: Vec<Relation>,
    index: HashMap<RelationKey, RelationId>,
}

impl RelationCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        RelationCache::default()
    }

    /// Number of interned relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Returns `true` if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Resolves an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this cache.
    pub fn get(&self, id: RelationId) -> &Relation {
        &self.relations[id.0 as usize]
    }

    /// Mutable resolution, for filling in tables and attributes.
    pub fn get_mut(&mut self, id: RelationId) -> &mut Relation {
        &mut self.relations[id.0 as usize]
    }

    /// Looks up an already interned relation by content.
    pub fn find(&self, vars: &VarSet, states: Option<&StateSpec>) -> Option<RelationId> {
        let key = RelationKey {
            vars: vars.clone(),
            states: states.cloned(),
        };
        self.index.get(&key).copied()
    }

    /// Interns a relation, returning the existing id if equal content is already
    /// present (the first-inserted instance always wins).
    pub fn intern(&mut self, relation: Relation) -> RelationId {
        let key = RelationKey {
            vars: relation.vars().clone(),
            states: relation.states().map(|s| s.iter().copied().collect()),
        };
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = RelationId(self.relations.len() as u32);
        self.relations.push(relation);
        self.index.insert(key, id);
        id
    }

    /// Iterates over all interned relations.
    pub fn iter(&self) -> impl Iterator<Item = (RelationId, &Relation)> {
        self.relations
            .iter()
            .enumerate()
            .map(|(at, rel)| (RelationId(at as u32), rel))
    }
}

/// Owns every model of a problem instance, keyed by canonical name.
#[derive(Debug, Default)]
pub struct ModelCache {
    models: Vec<Model>,
    index: HashMap<String, ModelId>,
}

impl ModelCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        ModelCache::default()
    }

    /// Number of interned models.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Resolves an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this cache.
    pub fn get(&self, id: ModelId) -> &Model {
        &self.models[id.0 as usize]
    }

    /// Mutable resolution, for fitted tables, attributes, and progenitor links.
    pub fn get_mut(&mut self, id: ModelId) -> &mut Model {
        &mut self.models[id.0 as usize]
    }

    /// Looks up a model by canonical name.
    pub fn find(&self, name: &str) -> Option<ModelId> {
        self.index.get(name).copied()
    }

    /// Interns a model. The second element is `true` when the model was new; a
    /// model whose canonical name is already present is dropped and the first
    /// instance's id returned.
    pub fn intern(
        &mut self,
        model: Model,
        catalog: &VariableCatalog,
        relations: &RelationCache,
    ) -> (ModelId, bool) {
        let name = model.name(catalog, relations).to_owned();
        if let Some(&id) = self.index.get(&name) {
            return (id, false);
        }
        let id = ModelId(self.models.len() as u32);
        self.models.push(model);
        self.index.insert(name, id);
        (id, true)
    }

    /// Iterates over all interned models.
    pub fn iter(&self) -> impl Iterator<Item = (ModelId, &Model)> {
        self.models
            .iter()
            .enumerate()
            .map(|(at, model)| (ModelId(at as u32), model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::StateConstraint;
    use crate::variable::CatalogBuilder;

    fn catalog() -> VariableCatalog {
        let mut builder = CatalogBuilder::new();
        builder.add_variable("a", "A", 2, false);
        builder.add_variable("b", "B", 2, false);
        builder.build()
    }

    #[test]
    fn relations_intern_to_one_instance() {
        let mut cache = RelationCache::new();
        let first = cache.intern(Relation::new(VarSet::new(&[0, 1])));
        let again = cache.intern(Relation::new(VarSet::new(&[1, 0])));
        assert_eq!(first, again);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.find(&VarSet::new(&[0, 1]), None), Some(first));
        assert_eq!(cache.find(&VarSet::new(&[0]), None), None);
    }

    #[test]
    fn first_interned_relation_wins() {
        let mut cache = RelationCache::new();
        let mut with_constraints = Relation::new(VarSet::new(&[0]));
        with_constraints.set_constraints(StateConstraint::new());
        let first = cache.intern(with_constraints);
        let again = cache.intern(Relation::new(VarSet::new(&[0])));
        assert_eq!(first, again);
        assert!(cache.get(again).constraints().is_some());
    }

    #[test]
    fn state_specs_distinguish_relations() {
        let mut cache = RelationCache::new();
        let plain = cache.intern(Relation::new(VarSet::new(&[0, 1])));
        let states: StateSpec = [Some(0), None].iter().copied().collect();
        let narrowed = cache.intern(Relation::with_states(VarSet::new(&[0, 1]), states));
        assert_ne!(plain, narrowed);
    }

    #[test]
    fn models_intern_by_canonical_name() {
        let catalog = catalog();
        let mut relations = RelationCache::new();
        let ab = relations.intern(Relation::new(VarSet::new(&[0, 1])));

        let mut models = ModelCache::new();
        let mut model = Model::new();
        model.add_relation(ab, true, &relations);
        let (id, fresh) = models.intern(model, &catalog, &relations);
        assert!(fresh);

        let mut copy = Model::new();
        copy.add_relation(ab, true, &relations);
        let (again, fresh) = models.intern(copy, &catalog, &relations);
        assert_eq!(id, again);
        assert!(!fresh);
        assert_eq!(models.find("AB"), Some(id));
    }
}
