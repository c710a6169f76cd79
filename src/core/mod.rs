mod error;
mod graph;
mod junction_tree;
pub(crate) mod potential;
mod network;
mod triangulation;
mod variable;

pub use error::{BNError, BNResult};
pub use graph::{moralize, UndirectedGraph};
pub use junction_tree::{JunctionTree, JunctionTreeBuilder, Separator};
pub use network::{BayesianNetwork, NetworkSpec, VariableSpec, CPT_TOLERANCE};
pub use potential::{Potential, Reduction};
pub use triangulation::{Triangulation, Triangulator};
pub use variable::{VarId, Variable};
