use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Identifier of a variable, an index into the network's variables
/// in the order they were added
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VarId(pub usize);

impl VarId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discrete random variable with a finite ordered set of named states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub(crate) name: String,
    pub(crate) states: Vec<String>,
}

impl Variable {
    /// Name of a variable
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the states in their order
    #[inline]
    pub fn states(&self) -> &[String] {
        &self.states
    }

    /// Number of states
    #[inline]
    pub fn cardinality(&self) -> usize {
        self.states.len()
    }

    /// Index of a state given its name
    #[inline]
    pub fn state_index(&self, state: &str) -> Option<usize> {
        self.states.iter().position(|s| s == state)
    }
}
