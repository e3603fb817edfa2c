#![warn(missing_docs)]
#![doc(test(no_crate_inject))]
#![doc(test(attr(deny(unused, future_incompatible))))]

//! Reconstructability Analysis over multivariate frequency tables, as described by
//! these papers:
//!
//! - Zwick, [An Overview of Reconstructability Analysis][overview], 2004
//! - Zwick, [Wholes and Parts in General Systems Methodology][wholes], 2001
//!
//! [overview]: https://pdxscholar.library.pdx.edu/cgi/viewcontent.cgi?article=1022&context=sysc_fac
//! [wholes]: https://pdxscholar.library.pdx.edu/cgi/viewcontent.cgi?article=1026&context=sysc_fac
//!
//! The details those papers leave open follow the conventions of the reference C++
//! implementation, [OCCAM][], and the [OCCAM manual][]: observed data lives in
//! sorted tables keyed by packed binary state keys; relations and models are
//! interned in caches so equal structures share one instance and its memoized
//! statistics; fitted distributions come from iterative proportional fitting, or
//! from a closed form when the model has no loops; and search strategies step
//! neighbor by neighbor through the lattice of structures.
//!
//! [OCCAM]: https://github.com/occam-ra/occam
//! [OCCAM manual]: https://occam.readthedocs.io/en/latest/
//!
//! A session starts by freezing a [`VariableCatalog`], loading observations into a
//! [`Table`], and wrapping both in a [`Manager`]:
//!
//! ```
//! use relattice::{build_full_key, CatalogBuilder, Manager, Table, TableKind};
//!
//! let mut builder = CatalogBuilder::new();
//! builder.add_variable("rain", "R", 2, false);
//! builder.add_variable("sprinkler", "S", 2, false);
//! builder.add_variable("wet", "W", 2, false);
//! let catalog = builder.build();
//!
//! let mut observed = Table::new(TableKind::Frequencies, catalog.key_size());
//! observed.add_tuple(build_full_key(&catalog, &[0, 0, 0]), 40.0);
//! observed.add_tuple(build_full_key(&catalog, &[0, 1, 1]), 18.0);
//! observed.add_tuple(build_full_key(&catalog, &[1, 0, 1]), 27.0);
//! observed.add_tuple(build_full_key(&catalog, &[1, 1, 1]), 15.0);
//!
//! let mut manager = Manager::new(catalog, observed);
//! let model = manager.make_model("RW:SW")?;
//! assert!(manager.compute_transmission(model) >= 0.0);
//! # Ok::<(), relattice::ModelSpecError>(())
//! ```

pub use sorted_iter;

mod attr;
mod cache;
mod fit;
mod key;
mod manager;
mod math;
mod model;
mod projection;
mod relation;
mod search;
mod table;
mod variable;

pub use attr::{attribute, AttributeMap};
pub use cache::{ModelCache, ModelId, RelationCache, RelationId};
pub use fit::FitOptions;
pub use key::{
    apply_mask, build_full_key, build_key, build_mask, compare, empty_key, set_value, to_string,
    value, KeyBuf, KeySegment, DONT_CARE, KEY_SEGMENT_BITS,
};
pub use manager::{Manager, ModelFilter};
pub use math::{entropy, has_loops, has_overlaps, state_based_df, transmission, PROB_MIN};
pub use model::Model;
pub use projection::{orthogonal_expansion, project, state_space_expansion};
pub use relation::{Relation, StateConstraint, StateSpec, VarSet};
pub use search::{
    strategy, ChainUp, DisjointUp, FullDown, FullUp, LooplessDown, LooplessUp, SearchStrategy,
};
pub use table::{Table, TableKind, Tuple};
pub use variable::{CatalogBuilder, ModelSpecError, ParsedRelation, Variable, VariableCatalog};
