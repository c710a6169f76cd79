use crate::core::{BayesianNetwork, VarId};
use crate::inference::CptParameter;
use std::collections::BTreeMap;

/// All joint assignments in row-major order
pub(super) fn joint_assignments(cardinalities: &[usize]) -> Vec<Vec<usize>> {
    let mut assignments = vec![vec![]];
    for card in cardinalities {
        assignments = assignments
            .into_iter()
            .flat_map(|prefix| {
                (0..*card).map(move |s| {
                    let mut next = prefix.clone();
                    next.push(s);
                    next
                })
            })
            .collect();
    }
    assignments
}

#[inline]
pub(super) fn cpt_entry(bn: &BayesianNetwork, var: VarId, assignment: &[usize]) -> f64 {
    let mut index: Vec<usize> = bn.parents(var).iter().map(|p| assignment[p.index()]).collect();
    index.push(assignment[var.index()]);
    bn.cpt(var).unwrap()[index.as_slice()]
}

/// Weight of a joint assignment: product of CPT entries, intervened variables
/// contribute an indicator, assignments inconsistent with observations weigh 0
pub(super) fn weight(
    bn: &BayesianNetwork,
    assignment: &[usize],
    observations: &BTreeMap<VarId, usize>,
    interventions: &BTreeMap<VarId, usize>,
    skip: Option<VarId>,
) -> f64 {
    let consistent = observations
        .iter()
        .chain(interventions.iter())
        .all(|(var, state)| assignment[var.index()] == *state);
    if !consistent {
        return 0f64;
    }
    bn.ids()
        .filter(|var| Some(*var) != skip && !interventions.contains_key(var))
        .map(|var| cpt_entry(bn, var, assignment))
        .product()
}

/// Probability of evidence by enumeration
pub(super) fn brute_force_evidence(bn: &BayesianNetwork, observations: &BTreeMap<VarId, usize>) -> f64 {
    joint_assignments(&bn.cardinalities())
        .iter()
        .map(|a| weight(bn, a, observations, &BTreeMap::new(), None))
        .sum()
}

/// Posterior of a variable by enumeration, `None` for contradictory evidence
pub(super) fn brute_force_marginal(
    bn: &BayesianNetwork,
    observations: &BTreeMap<VarId, usize>,
    interventions: &BTreeMap<VarId, usize>,
    var: VarId,
) -> Option<Vec<f64>> {
    let card = bn.variable(var).unwrap().cardinality();
    let mut marginal = vec![0f64; card];
    for assignment in joint_assignments(&bn.cardinalities()) {
        marginal[assignment[var.index()]] += weight(bn, &assignment, observations, interventions, None);
    }
    let total: f64 = marginal.iter().sum();
    if total == 0f64 {
        return None;
    }
    Some(marginal.into_iter().map(|p| p / total).collect())
}

/// Maximal joint weight with the evidence and the first assignment reaching it
pub(super) fn brute_force_mpe(
    bn: &BayesianNetwork,
    observations: &BTreeMap<VarId, usize>,
) -> (Vec<usize>, f64) {
    let mut best = (vec![], f64::NEG_INFINITY);
    for assignment in joint_assignments(&bn.cardinalities()) {
        let w = weight(bn, &assignment, observations, &BTreeMap::new(), None);
        if w > best.1 {
            best = (assignment, w);
        }
    }
    best
}

/// Derivative of `P(e)` with respect to a CPT entry: the sum over consistent
/// assignments of the product of all the other CPT entries
pub(super) fn brute_force_derivative(
    bn: &BayesianNetwork,
    observations: &BTreeMap<VarId, usize>,
    parameter: &CptParameter,
) -> f64 {
    let var = parameter.variable;
    joint_assignments(&bn.cardinalities())
        .iter()
        .filter(|a| a[var.index()] == parameter.state)
        .filter(|a| {
            bn.parents(var)
                .iter()
                .zip(&parameter.parents)
                .all(|(p, s)| a[p.index()] == *s)
        })
        .map(|a| weight(bn, a, observations, &BTreeMap::new(), Some(var)))
        .sum()
}

/// A binary chain a -> b -> c
pub(super) fn chain_network() -> (BayesianNetwork, [VarId; 3]) {
    let mut bn = BayesianNetwork::new();
    let a = bn.add_variable_with_states("a", &["t", "f"]).unwrap();
    let b = bn.add_variable_with_states("b", &["t", "f"]).unwrap();
    let c = bn.add_variable_with_states("c", &["t", "f"]).unwrap();
    bn.add_edge(a, b).unwrap();
    bn.add_edge(b, c).unwrap();
    bn.set_cpt(a, vec![0.3, 0.7]).unwrap();
    bn.set_cpt(b, vec![0.9, 0.1, 0.2, 0.8]).unwrap();
    bn.set_cpt(c, vec![0.6, 0.4, 0.15, 0.85]).unwrap();
    (bn, [a, b, c])
}

/// The classic cloudy / sprinkler / rain / wet grass network with a three-state wet grass
pub(super) fn sprinkler_network() -> BayesianNetwork {
    let mut bn = BayesianNetwork::new();
    let cloudy = bn.add_variable_with_states("cloudy", &["yes", "no"]).unwrap();
    let sprinkler = bn.add_variable_with_states("sprinkler", &["on", "off"]).unwrap();
    let rain = bn.add_variable_with_states("rain", &["yes", "no"]).unwrap();
    let wet = bn
        .add_variable_with_states("wet_grass", &["yes", "damp", "no"])
        .unwrap();
    bn.add_edge(cloudy, sprinkler).unwrap();
    bn.add_edge(cloudy, rain).unwrap();
    bn.add_edge(sprinkler, wet).unwrap();
    bn.add_edge(rain, wet).unwrap();
    bn.set_cpt(cloudy, vec![0.5, 0.5]).unwrap();
    bn.set_cpt(sprinkler, vec![0.1, 0.9, 0.5, 0.5]).unwrap();
    bn.set_cpt(rain, vec![0.8, 0.2, 0.2, 0.8]).unwrap();
    bn.set_cpt(
        wet,
        vec![
            0.95, 0.04, 0.01, // on, yes
            0.8, 0.15, 0.05, // on, no
            0.7, 0.2, 0.1, // off, yes
            0.0, 0.1, 0.9, // off, no
        ],
    )
    .unwrap();
    bn
}

#[inline]
pub(super) fn assert_close(lhs: &[f64], rhs: &[f64], tolerance: f64) {
    assert_eq!(lhs.len(), rhs.len());
    for (l, r) in lhs.iter().zip(rhs) {
        assert!((l - r).abs() < tolerance, "{:?} != {:?}", lhs, rhs);
    }
}
