//! Candidate models.
//!
//! A model is an ordered set of relations with no relation a proper subset of
//! another (for variable-based models; state-based redundancy is decided
//! semantically by the manager). Models are owned by the
//! [`ModelCache`][crate::cache::ModelCache] and identified by canonical name.

use crate::attr::AttributeMap;
use crate::cache::{ModelId, RelationCache, RelationId};
use crate::table::Table;
use crate::variable::VariableCatalog;
use once_cell::unsync::OnceCell;

/// An ordered set of non-redundant relations plus its lazily computed name, its
/// fitted table once the fit engine has run, and a back-reference to the model the
/// search derived it from.
#[derive(Debug)]
pub struct Model {
    relations: Vec<RelationId>,
    name: OnceCell<String>,
    fit_table: Option<Table>,
    progenitor: Option<ModelId>,
    attributes: AttributeMap,
}

impl Model {
    /// Creates a model with no relations.
    pub fn new() -> Model {
        Model {
            relations: Vec::new(),
            name: OnceCell::new(),
            fit_table: None,
            progenitor: None,
            attributes: AttributeMap::new(),
        }
    }

    /// The relations, in relation-compare order.
    pub fn relations(&self) -> &[RelationId] {
        &self.relations
    }

    /// Number of relations.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Adds a relation, keeping the list in compare order.
    ///
    /// With `normalize` set, redundancy is eliminated first: a new relation already
    /// contained in an existing one is dropped, and existing relations contained in
    /// the new one are evicted. Only the syntactic subset test is applied here;
    /// state-based models go through the manager, which decides redundancy by
    /// degrees of freedom and then adds without normalizing.
    pub fn add_relation(&mut self, rel: RelationId, normalize: bool, cache: &RelationCache) {
        let new = cache.get(rel);
        if normalize {
            if self.relations.iter().any(|&r| cache.get(r).contains(new)) {
                return;
            }
            self.relations.retain(|&r| !new.contains(cache.get(r)));
        }
        match self
            .relations
            .binary_search_by(|&r| cache.get(r).compare(new))
        {
            // an identical relation is already present
            Ok(_) => {}
            Err(at) => self.relations.insert(at, rel),
        }
    }

    /// Returns `true` if `rel`'s variable set is contained in some relation of this
    /// model. Valid because normalized models keep no subset relations.
    pub fn contains_relation(&self, rel: RelationId, cache: &RelationCache) -> bool {
        let candidate = cache.get(rel);
        self.relations.iter().any(|&r| cache.get(r).contains(candidate))
    }

    /// Returns `true` if any relation carries state constraints.
    pub fn is_state_based(&self, cache: &RelationCache) -> bool {
        self.relations.iter().any(|&r| cache.get(r).is_state_based())
    }

    /// The canonical name: relation names joined with `:`. In a directed system the
    /// relation over exactly the independent variables, if it carries no state
    /// constraints, prints first as the literal token `IV`; an
    /// undirected model with more than one single-variable relation collapses them
    /// into one leading `IVI` token.
    ///
    /// The name is a pure function of the relation set, which makes it usable as
    /// the model cache's identity key.
    pub fn name(&self, catalog: &VariableCatalog, cache: &RelationCache) -> &str {
        self.name.get_or_init(|| {
            let mut parts: Vec<&str> = Vec::with_capacity(self.relations.len());
            if catalog.is_directed() {
                // only the plain relation over exactly the independent variables
                // abbreviates to IV; a state-based relation must keep its own
                // name or distinct models would share one
                let iv = catalog.independent_variables();
                for &r in &self.relations {
                    let rel = cache.get(r);
                    if !rel.is_state_based() && rel.vars() == &iv {
                        parts.push("IV");
                    }
                }
                for &r in &self.relations {
                    let rel = cache.get(r);
                    if rel.is_state_based() || rel.vars() != &iv {
                        parts.push(rel.name(catalog));
                    }
                }
            } else {
                let singles = self
                    .relations
                    .iter()
                    .filter(|&&r| cache.get(r).vars().len() == 1)
                    .count();
                if singles > 1 {
                    parts.push("IVI");
                }
                for &r in &self.relations {
                    let rel = cache.get(r);
                    if singles > 1 && rel.vars().len() == 1 {
                        continue;
                    }
                    parts.push(rel.name(catalog));
                }
            }
            parts.join(":")
        })
    }

    /// The fitted joint table, once the fit engine has produced one.
    pub fn fit_table(&self) -> Option<&Table> {
        self.fit_table.as_ref()
    }

    /// Stores the fitted table.
    pub fn set_fit_table(&mut self, table: Table) {
        self.fit_table = Some(table);
    }

    /// Discards the fitted table to reclaim memory.
    pub fn drop_fit_table(&mut self) {
        self.fit_table = None;
    }

    /// The model this one was generated from, if a search produced it.
    pub fn progenitor(&self) -> Option<ModelId> {
        self.progenitor
    }

    /// Records the model this one was generated from. Informational only.
    pub fn set_progenitor(&mut self, progenitor: ModelId) {
        self.progenitor = Some(progenitor);
    }

    /// Memoized derived quantities.
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Mutable access to the memo map.
    pub fn attributes_mut(&mut self) -> &mut AttributeMap {
        &mut self.attributes
    }
}

impl Default for Model {
    fn default() -> Self {
        Model::new()
    }
}
