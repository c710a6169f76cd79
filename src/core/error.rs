use crate::core::VarId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
/// Errors that could appear while building a network, a junction tree or running inference
pub enum BNError {
    /// A variable with the same name already exists
    #[error("Variable `{0}` is already defined in the network")]
    DuplicateVariable(String),

    /// A variable must have at least two distinct states
    #[error("Variable `{variable}` must have at least 2 distinct states, got {cardinality}")]
    InvalidCardinality {
        /// Name of the offending variable
        variable: String,

        /// Number of (distinct) states that was supplied
        cardinality: usize,
    },

    /// An edge would close a directed cycle
    #[error("Edge `{parent}` -> `{child}` would close a directed cycle")]
    CyclicNetwork {
        /// Tail of the rejected edge
        parent: String,

        /// Head of the rejected edge
        child: String,
    },

    /// A variable is not part of the network
    #[error("Unknown variable {0}")]
    UnknownVariable(String),

    /// A state index is out of range of a variable's states
    #[error("Variable `{variable}` has no state {state}")]
    UnknownState {
        /// Name of the variable
        variable: String,

        /// Requested state
        state: String,
    },

    /// Table dimensions do not match a CPT scope
    #[error("CPT of `{variable}` must have shape {expected:?}, got {found:?}")]
    CptShapeMismatch {
        /// Name of the variable owning the CPT
        variable: String,

        /// Shape implied by the scope: parents first, the variable last
        expected: Vec<usize>,

        /// Shape that was supplied
        found: Vec<usize>,
    },

    /// A CPT entry is negative or not finite
    #[error("CPT of `{variable}` contains an invalid probability {value}")]
    InvalidProbability {
        /// Name of the variable owning the CPT
        variable: String,

        /// Offending entry
        value: f64,
    },

    /// A parent configuration slice does not sum to one
    #[error("CPT of `{variable}` is not normalized: parent configuration {configuration} sums to {sum}")]
    CptNotNormalized {
        /// Name of the variable owning the CPT
        variable: String,

        /// Row-major index of the parent configuration
        configuration: usize,

        /// Actual sum of the slice
        sum: f64,
    },

    /// A table does not fit the scope it is given for: one distinct variable per axis
    #[error("Table of shape {shape:?} does not fit scope {scope:?}")]
    ScopeMismatch {
        /// Requested scope
        scope: Vec<VarId>,

        /// Shape of the supplied table
        shape: Vec<usize>,
    },

    /// Cliques handed to the junction tree builder do not come from a chordal graph
    #[error("Cliques are not derived from a triangulated moral graph: {0}")]
    NonChordalInput(String),

    /// The total clique table size exceeds the configured limit
    #[error("Inference is too complex: estimated table size {estimated} exceeds the limit {limit}")]
    InferenceTooComplex {
        /// Sum over cliques of the clique table sizes
        estimated: usize,

        /// Configured limit
        limit: usize,
    },

    /// Current evidence has zero probability
    #[error("Evidence is contradictory: its probability is zero")]
    ContradictoryEvidence,

    /// A read-only query was issued before a propagation of the current epoch completed
    #[error("No completed propagation for epoch {epoch}")]
    UnpropagatedQuery {
        /// Current epoch of the engine
        epoch: u64,
    },

    /// A variable is given both as an observation and as an intervention
    #[error("Variable `{0}` can not be observed and intervened at the same time")]
    ConflictingFindings(String),

    /// Evidence can not be changed while frozen
    #[error("Cannot change evidence because it is frozen")]
    EvidenceFrozen,

    /// A propagation was cancelled before completion
    #[error("Propagation was cancelled")]
    Cancelled,

    /// Worker pool could not be created
    #[error("Failed to build a worker pool: {0}")]
    ThreadPool(String),
}

/// Result type of all fallible operations of the crate
pub type BNResult<T> = Result<T, BNError>;
