//! The variable catalog.
//!
//! A catalog is the ordered, immutable list of the problem's variables. Building it
//! also fixes the packed key layout: each variable is assigned a bit width large
//! enough to hold its cardinality with the all-ones pattern left over for don't-care,
//! and variables pack greedily into 32-bit segments, never splitting across one.

use crate::key::{KeySegment, KEY_SEGMENT_BITS};
use crate::relation::VarSet;
use thiserror::Error;

/// One categorical variable, frozen once the catalog is built.
#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    abbrev: String,
    cardinality: usize,
    dependent: bool,
    width: u32,
    segment: usize,
    shift: u32,
    mask: KeySegment,
}

impl Variable {
    /// The variable's full name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The short name used in canonical relation and model names.
    pub fn abbrev(&self) -> &str {
        &self.abbrev
    }

    /// Number of values this variable can take; values are `0..cardinality`.
    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    /// Whether this is a dependent variable of a directed system.
    pub fn is_dependent(&self) -> bool {
        self.dependent
    }

    /// Width in bits of this variable's key field.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Index of the key segment holding this variable's field.
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Distance of the field from the low end of its segment.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// The field's bits within its segment, already shifted into place.
    pub fn segment_mask(&self) -> KeySegment {
        self.mask
    }
}

/// Errors from parsing a textual relation or model name.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelSpecError {
    /// A name fragment matched no variable abbreviation.
    #[error("unknown variable abbreviation in `{0}`")]
    UnknownVariable(String),
    /// A state number was not a legal value of its variable.
    #[error("state {state} is out of range for variable `{variable}`")]
    StateOutOfRange {
        /// Abbreviation of the offending variable.
        variable: String,
        /// The state number that was parsed.
        state: usize,
    },
    /// The `IV` token only makes sense when some variable is dependent.
    #[error("`IV` is only meaningful in a directed system")]
    NotDirected,
    /// A model name contained an empty relation name.
    #[error("empty relation name")]
    EmptyRelation,
}

/// One relation name parsed back into catalog indices.
///
/// `states[i]` is the fixed state of `variables[i]`, or `None` when the whole
/// variable participates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRelation {
    /// Catalog indices, in the order they appeared in the name.
    pub variables: Vec<usize>,
    /// Fixed state per variable, aligned with `variables`.
    pub states: Vec<Option<usize>>,
}

impl ParsedRelation {
    /// Whether any variable carries a fixed state.
    pub fn is_state_based(&self) -> bool {
        self.states.iter().any(Option::is_some)
    }
}

/// An ordered, read-only list of variables plus the key layout derived from it.
#[derive(Clone, Debug)]
pub struct VariableCatalog {
    vars: Vec<Variable>,
    key_size: usize,
}

/// Accumulates variables and assigns their key fields; [`CatalogBuilder::build`]
/// freezes the result.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    vars: Vec<Variable>,
}

impl CatalogBuilder {
    /// Creates an empty builder.
    pub fn new() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Adds a variable and returns its catalog index.
    ///
    /// The bit width reserves the all-ones pattern for don't-care, so a binary
    /// variable takes two bits. A variable that does not fit in the remainder of the
    /// current segment starts a new one.
    pub fn add_variable(
        &mut self,
        name: &str,
        abbrev: &str,
        cardinality: usize,
        dependent: bool,
    ) -> usize {
        assert!(cardinality >= 1, "variable must have at least one value");
        let mut width = 0;
        while cardinality >> width != 0 {
            width += 1;
        }
        let (segment, shift) = match self.vars.last() {
            Some(prev) if prev.shift >= width => (prev.segment, prev.shift - width),
            Some(prev) => (prev.segment + 1, KEY_SEGMENT_BITS - width),
            None => (0, KEY_SEGMENT_BITS - width),
        };
        let mask = (((1u64 << width) - 1) as KeySegment) << shift;
        self.vars.push(Variable {
            name: name.to_owned(),
            abbrev: abbrev.to_owned(),
            cardinality,
            dependent,
            width,
            segment,
            shift,
            mask,
        });
        self.vars.len() - 1
    }

    /// Freezes the catalog.
    pub fn build(self) -> VariableCatalog {
        let key_size = self.vars.last().map_or(0, |v| v.segment + 1);
        VariableCatalog {
            vars: self.vars,
            key_size,
        }
    }
}

impl VariableCatalog {
    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` if the catalog holds no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The variable at a catalog index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn variable(&self, index: usize) -> &Variable {
        &self.vars[index]
    }

    /// Iterates over the variables in catalog order.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    /// Number of key segments needed to hold every variable's field.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// A system is directed when any variable is dependent.
    pub fn is_directed(&self) -> bool {
        self.vars.iter().any(|v| v.dependent)
    }

    /// The dependent variable: the highest-index variable flagged dependent.
    pub fn dependent_variable(&self) -> Option<usize> {
        self.vars.iter().rposition(|v| v.dependent)
    }

    /// The set of all independent variables.
    pub fn independent_variables(&self) -> VarSet {
        (0..self.len()).filter(|&v| !self.vars[v].dependent).collect()
    }

    /// The set of every variable in the catalog.
    pub fn all_variables(&self) -> VarSet {
        (0..self.len()).collect()
    }

    /// Total number of cells in the full state space, as a float since it can
    /// overflow any integer width.
    pub fn state_space_size(&self) -> f64 {
        self.vars.iter().map(|v| v.cardinality as f64).product()
    }

    /// Finds a variable by its exact abbreviation.
    pub fn find_abbrev(&self, abbrev: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.abbrev == abbrev)
    }

    /// Parses one separator-free relation name, e.g. `ABC` or `A1C0` with fixed
    /// states, back into catalog indices.
    ///
    /// Abbreviations are matched greedily (longest match wins), then an optional
    /// run of digits fixes the variable's state.
    pub fn parse_name(&self, name: &str) -> Result<ParsedRelation, ModelSpecError> {
        if name.is_empty() {
            return Err(ModelSpecError::EmptyRelation);
        }
        let mut variables = Vec::new();
        let mut states = Vec::new();
        let mut rest = name;
        while !rest.is_empty() {
            let matched = self
                .vars
                .iter()
                .enumerate()
                .filter(|(_, v)| rest.starts_with(&v.abbrev))
                .max_by_key(|(_, v)| v.abbrev.len());
            let (index, var) = match matched {
                Some(hit) => hit,
                None => return Err(ModelSpecError::UnknownVariable(rest.to_owned())),
            };
            rest = &rest[var.abbrev.len()..];
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            let state = if digits > 0 {
                // a digit run always parses: it was built from ascii digits
                let state: usize = rest[..digits].parse().unwrap_or(usize::MAX);
                rest = &rest[digits..];
                if state >= var.cardinality {
                    return Err(ModelSpecError::StateOutOfRange {
                        variable: var.abbrev.clone(),
                        state,
                    });
                }
                Some(state)
            } else {
                None
            };
            variables.push(index);
            states.push(state);
        }
        Ok(ParsedRelation { variables, states })
    }
}
