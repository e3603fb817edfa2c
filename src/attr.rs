//! Memoized derived quantities.
//!
//! Relations and models both carry a name-to-number map so that expensive values
//! (degrees of freedom, entropy, loop detection, fit diagnostics) are computed once
//! per instance and then read back by anything that asks again.

use std::collections::HashMap;

/// Well-known attribute names.
pub mod attribute {
    /// Degrees of freedom.
    pub const DF: &str = "df";
    /// Entropy in bits.
    pub const H: &str = "h";
    /// Transmission against the input distribution, in bits.
    pub const T: &str = "t";
    /// 1.0 if the model's relations overlap cyclically, else 0.0.
    pub const LOOPS: &str = "loops";
    /// Entropy of the fitted table, when entropy had to go through a fit.
    pub const FIT_H: &str = "fit-h";
    /// Number of proportional-fitting passes actually run.
    pub const IPF_ITERATIONS: &str = "ipf-iterations";
    /// Largest marginal deviation left by the final fitting pass.
    pub const IPF_ERROR: &str = "ipf-error";
}

/// A name-to-`f64` memo attached to each relation and model.
#[derive(Clone, Debug, Default)]
pub struct AttributeMap(HashMap<String, f64>);

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        AttributeMap::default()
    }

    /// Looks up a value by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    /// Stores a value, replacing any previous one under the same name.
    pub fn set(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_owned(), value);
    }

    /// Returns `true` if a value is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Iterates over all stored pairs, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(name, value)| (name.as_str(), *value))
    }
}
