//! Variable sets and relations.
//!
//! A [`Relation`] is a sorted set of catalog indices, optionally narrowed to fixed
//! states of some of its variables, plus everything derived from it lazily: the
//! exclusion mask used by projection, the canonical name used as a cache key, and the
//! marginal table once it has been projected.

use crate::attr::AttributeMap;
use crate::key::{self, KeyBuf, KeySegment};
use crate::table::Table;
use crate::variable::VariableCatalog;
use once_cell::unsync::OnceCell;
use smallvec::SmallVec;
use sorted_iter::assume::AssumeSortedByItemExt;
use sorted_iter::sorted_iterator::SortedByItem;
use sorted_iter::SortedIterator;
use std::cmp::Ordering;
use std::fmt;
use std::iter::FromIterator;

/// A sorted, deduplicated set of catalog variable indices.
///
/// Most relations touch only a few variables, so sets stay inline while small.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct VarSet(SmallVec<[usize; 2]>);

impl VarSet {
    /// Creates a set from the given indices; duplicates are fine.
    pub fn new(vars: &[usize]) -> Self {
        let mut v = SmallVec::from_slice(vars);
        v.sort_unstable();
        v.dedup();
        VarSet(v)
    }

    /// The empty set.
    pub fn empty() -> Self {
        VarSet(SmallVec::new())
    }

    /// Number of variables in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set holds no variables.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The sorted indices as a slice.
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Iterates over the indices in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + SortedByItem + Clone + '_ {
        self.0.iter().copied().assume_sorted_by_item()
    }

    /// Membership test by binary search.
    pub fn contains(&self, var: usize) -> bool {
        self.0.binary_search(&var).is_ok()
    }

    /// Returns `true` if `other` contains every variable that `self` does.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.len() <= other.len() && self.iter().intersection(other.iter()).eq(self.iter())
    }

    /// Set union.
    pub fn union(&self, other: &Self) -> Self {
        VarSet(self.iter().union(other.iter()).collect())
    }

    /// Set intersection.
    pub fn intersection(&self, other: &Self) -> Self {
        VarSet(self.iter().intersection(other.iter()).collect())
    }

    /// The variables of `self` that are not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        VarSet(self.iter().difference(other.iter()).collect())
    }

    /// A copy of this set with one extra variable.
    pub fn with(&self, var: usize) -> Self {
        let mut copy = self.clone();
        if let Err(at) = copy.0.binary_search(&var) {
            copy.0.insert(at, var);
        }
        copy
    }

    /// A copy of this set with one variable removed.
    pub fn without(&self, var: usize) -> Self {
        let mut copy = self.clone();
        if let Ok(at) = copy.0.binary_search(&var) {
            copy.0.remove(at);
        }
        copy
    }
}

impl fmt::Debug for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

impl FromIterator<usize> for VarSet {
    /// Creates a set from the given indices; duplicates are fine.
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut v = SmallVec::from_iter(iter);
        v.sort_unstable();
        v.dedup();
        VarSet(v)
    }
}

/// The fully specified keys marking the fixed cells of a state-based relation.
///
/// Cells outside this set share whatever mass the fixed cells did not claim.
#[derive(Clone, Debug, Default)]
pub struct StateConstraint {
    keys: Vec<KeyBuf>,
}

impl StateConstraint {
    /// Creates an empty constraint set.
    pub fn new() -> Self {
        StateConstraint::default()
    }

    /// Appends a constraint key.
    pub fn add(&mut self, key: KeyBuf) {
        self.keys.push(key);
    }

    /// Number of constraint keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no constraints are stored.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates over the constraint keys.
    pub fn keys(&self) -> impl Iterator<Item = &[KeySegment]> {
        self.keys.iter().map(|k| k.as_slice())
    }

    /// Returns `true` if `key` is bitwise equal to some constraint key.
    pub fn matches(&self, key: &[KeySegment]) -> bool {
        self.keys.iter().any(|c| c.as_slice() == key)
    }
}

/// Per-variable fixed states of a state-based relation, aligned with the sorted
/// variable set; `None` leaves the whole variable in play.
pub type StateSpec = SmallVec<[Option<usize>; 2]>;

/// A variable subset, its optional state constraints, and its lazily computed
/// derived data.
///
/// Relations are owned by the [`RelationCache`][crate::cache::RelationCache] and only
/// ever referred to by [`RelationId`][crate::cache::RelationId] elsewhere.
#[derive(Debug)]
pub struct Relation {
    vars: VarSet,
    states: Option<StateSpec>,
    constraints: Option<StateConstraint>,
    mask: OnceCell<KeyBuf>,
    name: OnceCell<String>,
    table: Option<Table>,
    attributes: AttributeMap,
}

impl Relation {
    /// Creates a variable-based relation over the given set.
    pub fn new(vars: VarSet) -> Relation {
        Relation {
            vars,
            states: None,
            constraints: None,
            mask: OnceCell::new(),
            name: OnceCell::new(),
            table: None,
            attributes: AttributeMap::new(),
        }
    }

    /// Creates a state-based relation. `states` must be aligned with the sorted
    /// order of `vars`.
    pub fn with_states(vars: VarSet, states: StateSpec) -> Relation {
        debug_assert_eq!(vars.len(), states.len());
        let mut rel = Relation::new(vars);
        rel.states = Some(states);
        rel
    }

    /// The relation's variable set.
    pub fn vars(&self) -> &VarSet {
        &self.vars
    }

    /// Fixed states per variable, if this relation is state-based.
    pub fn states(&self) -> Option<&[Option<usize>]> {
        self.states.as_deref()
    }

    /// Whether this relation narrows any variable to a fixed state.
    pub fn is_state_based(&self) -> bool {
        self.states.is_some()
    }

    /// The constraint keys of a state-based relation.
    pub fn constraints(&self) -> Option<&StateConstraint> {
        self.constraints.as_ref()
    }

    /// Installs the constraint keys; done once by the cache when the relation is
    /// interned.
    pub fn set_constraints(&mut self, constraints: StateConstraint) {
        self.constraints = Some(constraints);
    }

    /// The exclusion mask: one bits everywhere except this relation's fields.
    ///
    /// Built on first use and cached for the relation's lifetime.
    pub fn mask(&self, catalog: &VariableCatalog) -> &[KeySegment] {
        self.mask
            .get_or_init(|| key::build_mask(catalog, self.vars.as_slice()))
    }

    /// The canonical, separator-free name: abbreviations in catalog order, each
    /// followed by its fixed state when one is set.
    pub fn name(&self, catalog: &VariableCatalog) -> &str {
        self.name.get_or_init(|| {
            let mut out = String::new();
            for (at, v) in self.vars.iter().enumerate() {
                out.push_str(catalog.variable(v).abbrev());
                if let Some(Some(state)) = self.states.as_ref().map(|s| s[at]) {
                    out.push_str(&state.to_string());
                }
            }
            out
        })
    }

    /// Returns `true` if `other`'s variable set is a subset of this one's.
    pub fn contains(&self, other: &Relation) -> bool {
        other.vars.is_subset(&self.vars)
    }

    /// Lexicographic order on the sorted index lists, then on the state spec; this
    /// is the order relations keep inside a model.
    pub fn compare(&self, other: &Relation) -> Ordering {
        self.vars
            .cmp(&other.vars)
            .then_with(|| self.states.cmp(&other.states))
    }

    /// Returns `true` if no variable of this relation is dependent.
    pub fn is_independent_only(&self, catalog: &VariableCatalog) -> bool {
        self.vars.iter().all(|v| !catalog.variable(v).is_dependent())
    }

    /// Number of cells in this relation's sub-statespace.
    pub fn state_space_size(&self, catalog: &VariableCatalog) -> f64 {
        self.vars
            .iter()
            .map(|v| catalog.variable(v).cardinality() as f64)
            .product()
    }

    /// Degrees of freedom of a variable-based relation.
    pub fn degrees_of_freedom(&self, catalog: &VariableCatalog) -> f64 {
        self.state_space_size(catalog) - 1.0
    }

    /// Size of the orthogonal expansion of this relation's table: its tuple count
    /// times the cardinalities of every variable it is missing. Used to pick the
    /// cheapest seed for iterative fitting.
    pub fn expansion_size(&self, catalog: &VariableCatalog) -> f64 {
        let tuples = self.table.as_ref().map_or(0, Table::len) as f64;
        let missing: f64 = (0..catalog.len())
            .filter(|&v| !self.vars.contains(v))
            .map(|v| catalog.variable(v).cardinality() as f64)
            .product();
        tuples * missing
    }

    /// This relation's marginal at `key`: the key is first projected onto the
    /// relation's variables. Returns 0.0 when the relation has no table or the cell
    /// is absent.
    pub fn matching_value(&self, catalog: &VariableCatalog, key: &[KeySegment]) -> f64 {
        let table = match &self.table {
            Some(table) => table,
            None => return 0.0,
        };
        let mut masked = KeyBuf::from_slice(key);
        key::apply_mask(&mut masked, self.mask(catalog));
        table.index_of(&masked).map_or(0.0, |at| table.value(at))
    }

    /// The cached marginal table, if it has been projected.
    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    /// Stores the projected marginal table.
    pub fn set_table(&mut self, table: Table) {
        self.table = Some(table);
    }

    /// Discards the marginal table to reclaim memory; the relation itself stays
    /// valid and the table can be projected again later.
    pub fn drop_table(&mut self) {
        self.table = None;
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
