use crate::core::{BNResult, BayesianNetwork, VarId};
use ndarray::{ArrayD, Axis, IxDyn};
use rand::Rng;
use rand_distr::{Exp1, Uniform};
use serde::{Deserialize, Serialize};

/// Parameters of a random network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomNetworkConfig {
    /// Number of variables
    pub variables_number: usize,

    /// Probability of an edge between two variables
    pub edge_probability: f64,

    /// Upper bound on the number of parents of a variable
    pub max_parents: usize,

    /// Smallest number of states of a variable, at least 2
    pub min_cardinality: usize,

    /// Largest number of states of a variable
    pub max_cardinality: usize,
}

impl Default for RandomNetworkConfig {
    fn default() -> Self {
        Self {
            variables_number: 5,
            edge_probability: 0.5,
            max_parents: 3,
            min_cardinality: 2,
            max_cardinality: 2,
        }
    }
}

/// Generates a random network.
///
/// Variables are named `v0`, `v1`, ... and edges only go from a lower to a higher
/// identifier, so the identifiers form a topological order. Every CPT row is drawn
/// uniformly from the probability simplex.
///
/// # Arguments
///
/// * `rng` - A generator of random numbers
/// * `config` - Parameters of a network
///
/// # Example
///
/// ```
/// use jtree::random::{random_network, RandomNetworkConfig};
///
/// let mut rng = rand::thread_rng();
/// let bn = random_network(&mut rng, &RandomNetworkConfig::default()).unwrap();
/// assert_eq!(bn.len(), 5);
/// ```
pub fn random_network(
    rng: &mut impl Rng,
    config: &RandomNetworkConfig,
) -> BNResult<BayesianNetwork> {
    let min_cardinality = config.min_cardinality.max(2);
    let max_cardinality = config.max_cardinality.max(min_cardinality);
    let cardinalities = Uniform::new_inclusive(min_cardinality, max_cardinality);
    let mut bn = BayesianNetwork::new();
    for i in 0..config.variables_number {
        bn.add_variable(&format!("v{i}"), rng.sample(cardinalities))?;
    }
    for child in 1..config.variables_number {
        for parent in 0..child {
            if bn.parents(VarId(child)).len() < config.max_parents
                && rng.gen_bool(config.edge_probability.clamp(0f64, 1f64))
            {
                bn.add_edge(VarId(parent), VarId(child))?;
            }
        }
    }
    for var in 0..config.variables_number {
        let cpt = random_cpt(rng, &bn.cpt_shape(VarId(var)));
        bn.set_cpt_array(VarId(var), cpt)?;
    }
    Ok(bn)
}

/// A table whose slices along the last axis are uniform samples from the simplex
fn random_cpt(rng: &mut impl Rng, shape: &[usize]) -> ArrayD<f64> {
    let mut table: ArrayD<f64> = ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.sample(Exp1));
    let last = Axis(shape.len() - 1);
    for mut row in table.lanes_mut(last) {
        let total = row.sum();
        row /= total;
    }
    table
}
