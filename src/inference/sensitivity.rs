use crate::core::{BNError, BNResult, BayesianNetwork, JunctionTree, Reduction, VarId};
use crate::inference::engine::{clique_factor, Propagation};
use crate::inference::propagation::Message;
use crate::inference::Finding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

// ------------------------------------------------------------------------------------------

/// An entry `θ(state | parents)` of the CPT of a variable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CptParameter {
    /// Variable owning the CPT
    pub variable: VarId,

    /// States of the parents in the order of the CPT axes
    pub parents: Vec<usize>,

    /// State of the variable
    pub state: usize,
}

impl CptParameter {
    #[inline]
    pub fn new(variable: VarId, parents: &[usize], state: usize) -> Self {
        CptParameter {
            variable,
            parents: parents.to_vec(),
            state,
        }
    }
}

/// Derivatives of a probability with respect to a CPT entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensitivity {
    /// The CPT entry
    pub parameter: CptParameter,

    /// Query `(variable, state)`, `None` for the probability of evidence
    pub query: Option<(VarId, usize)>,

    /// Current value of the CPT entry
    pub value: f64,

    /// Current value of the probability, `P(e)` or `P(query | e)`
    pub probability: f64,

    /// Derivative when only this entry changes
    pub derivative: f64,

    /// Derivative when the other entries of the same CPT row change proportionally
    /// so that the row stays normalized
    pub covaried_derivative: f64,
}

// ------------------------------------------------------------------------------------------

/// Derivatives of the probability of evidence with respect to every entry
/// of one CPT row, the row is selected by the parents' states of `parameter`.
///
/// # Notes
///
/// `P(e)` is linear in every CPT entry, its coefficient is the product of
/// everything else in the family clique (other CPTs, evidence and incoming messages)
/// summed over the entries consistent with the row. No division by the entry is
/// involved so zero entries are handled exactly. Intervened variables do not
/// depend on their CPT and get zero derivatives.
pub(crate) fn row_derivatives(
    network: &BayesianNetwork,
    tree: &JunctionTree,
    propagation: &Propagation,
    parameter: &CptParameter,
) -> BNResult<Vec<f64>> {
    let var = parameter.variable;
    let cardinality = network.require(var)?.cardinality();
    if let Some(Finding::Intervened(_)) = propagation.findings().get(&var) {
        return Ok(vec![0f64; cardinality]);
    }
    let clique = tree
        .family_clique(var)
        .ok_or_else(|| BNError::UnknownVariable(var.to_string()))?;
    let calibrated = propagation.calibrated();
    let factor = clique_factor(network, tree, propagation.findings(), clique, Some(var))?;
    let mut product = Message::new(factor);
    for child in tree.children(clique) {
        if let Some(message) = &calibrated.upward[*child] {
            product = product.multiply(message);
        }
    }
    if let Some(message) = &calibrated.downward[clique] {
        product = product.multiply(message);
    }
    let family = network.family(var);
    let reduced = product.marginalize_onto(&family, Reduction::Sum);
    let mut assignment: BTreeMap<VarId, usize> = network
        .parents(var)
        .iter()
        .copied()
        .zip(parameter.parents.iter().copied())
        .collect();
    let derivatives = (0..cardinality)
        .map(|state| {
            assignment.insert(var, state);
            reduced.value(&assignment).unwrap_or(0f64)
        })
        .collect();
    Ok(derivatives)
}

/// Derivative along the direction that keeps a CPT row normalized.
/// The other entries scale by `(1 - θ') / (1 - θ)`; when `θ = 1` they share
/// the complement equally.
fn covaried(derivatives: &[f64], row: &[f64], state: usize) -> f64 {
    let rest = 1f64 - row[state];
    let others = (row.len() - 1) as f64;
    let shift: f64 = (0..row.len())
        .filter(|s| *s != state)
        .map(|s| {
            let weight = if rest > f64::EPSILON {
                row[s] / rest
            } else {
                1f64 / others
            };
            weight * derivatives[s]
        })
        .sum();
    derivatives[state] - shift
}

fn check_parameter(network: &BayesianNetwork, parameter: &CptParameter) -> BNResult<Vec<f64>> {
    let var = parameter.variable;
    let variable = network.require_state(var, parameter.state)?;
    let parents = network.parents(var);
    if parents.len() != parameter.parents.len() {
        let mut found = vec![0; parameter.parents.len()];
        found.push(variable.cardinality());
        return Err(BNError::CptShapeMismatch {
            variable: variable.name().to_string(),
            expected: network.cpt_shape(var),
            found,
        });
    }
    for (parent, state) in parents.iter().zip(&parameter.parents) {
        network.require_state(*parent, *state)?;
    }
    let table = network
        .cpt(var)
        .ok_or_else(|| BNError::UnknownVariable(var.to_string()))?;
    let row = (0..variable.cardinality())
        .map(|state| {
            let mut index = parameter.parents.clone();
            index.push(state);
            table[index.as_slice()]
        })
        .collect();
    Ok(row)
}

/// Sensitivity of `P(e)`, or of `P(y | e)` when `query` holds `y` together with
/// a propagation with `y` added to the evidence (`None` if `y` contradicts it)
pub(crate) fn analyze(
    network: &BayesianNetwork,
    tree: &JunctionTree,
    base: &Propagation,
    query: Option<((VarId, usize), Option<&Propagation>)>,
    parameter: &CptParameter,
) -> BNResult<Sensitivity> {
    let row = check_parameter(network, parameter)?;
    if base.is_contradictory() {
        return Err(BNError::ContradictoryEvidence);
    }
    let state = parameter.state;
    let evidence = row_derivatives(network, tree, base, parameter)?;
    let p_e = base.probability_of_evidence();
    let sensitivity = match query {
        None => Sensitivity {
            parameter: parameter.clone(),
            query: None,
            value: row[state],
            probability: p_e,
            derivative: evidence[state],
            covaried_derivative: covaried(&evidence, &row, state),
        },
        Some((target, joint)) => {
            let (joint_derivatives, p_ye) = match joint {
                Some(joint) => (
                    row_derivatives(network, tree, joint, parameter)?,
                    joint.probability_of_evidence(),
                ),
                None => (vec![0f64; row.len()], 0f64),
            };
            // quotient rule for P(y, e) / P(e)
            let ratio = |d_ye: f64, d_e: f64| (d_ye * p_e - p_ye * d_e) / (p_e * p_e);
            Sensitivity {
                parameter: parameter.clone(),
                query: Some(target),
                value: row[state],
                probability: p_ye / p_e,
                derivative: ratio(joint_derivatives[state], evidence[state]),
                covaried_derivative: ratio(
                    covaried(&joint_derivatives, &row, state),
                    covaried(&evidence, &row, state),
                ),
            }
        }
    };
    trace!(
        variable = %parameter.variable,
        derivative = sensitivity.derivative,
        "sensitivity computed"
    );
    Ok(sensitivity)
}
