use crate::core::{BNError, BNResult, Potential, VarId, Variable};
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, trace};

/// Tolerance used when checking that CPT slices sum to one
pub const CPT_TOLERANCE: f64 = 1e-6;

// ------------------------------------------------------------------------------------------

/// A serializable description of a network as produced by an external parser.
///
/// CPT values are flat and row-major over the parents (in the listed order)
/// followed by the variable itself, a missing CPT means uniform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub variables: Vec<VariableSpec>,
}

/// A variable entry of [`NetworkSpec`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub states: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub cpt: Option<Vec<f64>>,
}

// ------------------------------------------------------------------------------------------

/// A discrete Bayesian network: variables, a DAG over them and one CPT per variable.
///
/// The CPT of a variable is a table whose axes are the parents
/// (in the order the edges were added) followed by the variable itself.
/// A new variable gets a uniform CPT, adding an edge resets the child's CPT
/// to a uniform one over the enlarged scope.
///
/// # Example
///
/// ```
/// use jtree::core::BayesianNetwork;
///
/// let mut bn = BayesianNetwork::new();
/// let rain = bn.add_variable_with_states("rain", &["yes", "no"]).unwrap();
/// let grass = bn.add_variable_with_states("wet_grass", &["yes", "no"]).unwrap();
/// bn.add_edge(rain, grass).unwrap();
/// bn.set_cpt(rain, vec![0.2, 0.8]).unwrap();
/// bn.set_cpt(grass, vec![0.9, 0.1, 0.05, 0.95]).unwrap();
/// assert_eq!(bn.parents(grass), &[rain]);
/// assert!(bn.add_edge(grass, rain).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BayesianNetwork {
    variables: Vec<Variable>,
    parents: Vec<Vec<VarId>>,
    children: Vec<Vec<VarId>>,
    cpts: Vec<ArrayD<f64>>,
}

impl BayesianNetwork {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a network from a description, nothing is built if any part of it is invalid
    pub fn from_spec(spec: &NetworkSpec) -> BNResult<Self> {
        let mut bn = BayesianNetwork::new();
        for var in &spec.variables {
            bn.add_variable_with_states(&var.name, &var.states)?;
        }
        for var in &spec.variables {
            let child = bn.require_name(&var.name)?;
            for parent in &var.parents {
                let parent = bn.require_name(parent)?;
                bn.add_edge(parent, child)?;
            }
        }
        for var in &spec.variables {
            if let Some(values) = &var.cpt {
                let id = bn.require_name(&var.name)?;
                bn.set_cpt(id, values.clone())?;
            }
        }
        debug!(variables = bn.len(), "network built from a description");
        Ok(bn)
    }

    /// Adds a variable with states named `s0`, `s1`, ...
    ///
    /// # Arguments
    ///
    /// * `name` - A unique name of a variable
    /// * `cardinality` - A number of states, at least 2
    pub fn add_variable(&mut self, name: &str, cardinality: usize) -> BNResult<VarId> {
        let states: Vec<String> = (0..cardinality).map(|i| format!("s{i}")).collect();
        self.add_variable_with_states(name, &states)
    }

    /// Adds a variable with named states
    pub fn add_variable_with_states<S: AsRef<str>>(
        &mut self,
        name: &str,
        states: &[S],
    ) -> BNResult<VarId> {
        if self.variable_id(name).is_some() {
            return Err(BNError::DuplicateVariable(name.to_string()));
        }
        let states: Vec<String> = states.iter().map(|s| s.as_ref().to_string()).collect();
        let distinct: HashSet<&String> = states.iter().collect();
        if states.len() < 2 || distinct.len() != states.len() {
            return Err(BNError::InvalidCardinality {
                variable: name.to_string(),
                cardinality: distinct.len(),
            });
        }
        let id = VarId(self.variables.len());
        let cardinality = states.len();
        self.variables.push(Variable {
            name: name.to_string(),
            states,
        });
        self.parents.push(Vec::new());
        self.children.push(Vec::new());
        self.cpts.push(uniform(&[cardinality]));
        trace!(variable = name, cardinality = cardinality, "variable added");
        Ok(id)
    }

    /// Adds a directed edge `parent -> child`. Adding an existing edge does nothing.
    ///
    /// # Notes
    ///
    /// The CPT of `child` is reset to a uniform table over its new scope
    pub fn add_edge(&mut self, parent: VarId, child: VarId) -> BNResult<()> {
        self.require(parent)?;
        self.require(child)?;
        if self.parents[child.index()].contains(&parent) {
            return Ok(());
        }
        if parent == child || self.reaches(child, parent) {
            return Err(BNError::CyclicNetwork {
                parent: self.variables[parent.index()].name.clone(),
                child: self.variables[child.index()].name.clone(),
            });
        }
        self.parents[child.index()].push(parent);
        self.children[parent.index()].push(child);
        self.cpts[child.index()] = uniform(&self.cpt_shape(child));
        trace!(
            parent = self.variables[parent.index()].name.as_str(),
            child = self.variables[child.index()].name.as_str(),
            "edge added, CPT reset to uniform"
        );
        Ok(())
    }

    /// Sets a CPT from flat row-major values: parents first, the variable last
    pub fn set_cpt(&mut self, variable: VarId, values: Vec<f64>) -> BNResult<()> {
        self.require(variable)?;
        let shape = self.cpt_shape(variable);
        let found = values.len();
        let table = ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
            BNError::CptShapeMismatch {
                variable: self.variables[variable.index()].name.clone(),
                expected: shape.clone(),
                found: vec![found],
            }
        })?;
        self.set_cpt_array(variable, table)
    }

    /// Sets a CPT given as a table with axes: parents first, the variable last
    pub fn set_cpt_array(&mut self, variable: VarId, table: ArrayD<f64>) -> BNResult<()> {
        self.validate_cpt(variable, &table)?;
        self.cpts[variable.index()] = table;
        Ok(())
    }

    /// Checks a candidate CPT of a variable without installing it
    pub fn validate_cpt(&self, variable: VarId, table: &ArrayD<f64>) -> BNResult<()> {
        let var = self.require(variable)?;
        let expected = self.cpt_shape(variable);
        if table.shape() != expected.as_slice() {
            return Err(BNError::CptShapeMismatch {
                variable: var.name.clone(),
                expected,
                found: table.shape().to_vec(),
            });
        }
        if let Some(value) = table.iter().find(|x| !x.is_finite() || **x < 0f64) {
            return Err(BNError::InvalidProbability {
                variable: var.name.clone(),
                value: *value,
            });
        }
        let last = Axis(table.ndim() - 1);
        for (configuration, sum) in table.sum_axis(last).iter().enumerate() {
            if (sum - 1f64).abs() > CPT_TOLERANCE {
                return Err(BNError::CptNotNormalized {
                    variable: var.name.clone(),
                    configuration,
                    sum: *sum,
                });
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------

    /// Number of variables
    #[inline]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Identifiers of all variables in increasing order
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = VarId> {
        (0..self.variables.len()).map(VarId)
    }

    #[inline]
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    #[inline]
    pub fn variable(&self, id: VarId) -> Option<&Variable> {
        self.variables.get(id.index())
    }

    /// Looks a variable up by name
    #[inline]
    pub fn variable_id(&self, name: &str) -> Option<VarId> {
        self.variables.iter().position(|v| v.name == name).map(VarId)
    }

    /// Parents in the order edges were added, empty for an unknown variable
    #[inline]
    pub fn parents(&self, id: VarId) -> &[VarId] {
        self.parents.get(id.index()).map_or(&[][..], Vec::as_slice)
    }

    /// Children in the order edges were added, empty for an unknown variable
    #[inline]
    pub fn children(&self, id: VarId) -> &[VarId] {
        self.children.get(id.index()).map_or(&[][..], Vec::as_slice)
    }

    /// CPT table of a variable, axes are parents first, the variable last
    #[inline]
    pub fn cpt(&self, id: VarId) -> Option<&ArrayD<f64>> {
        self.cpts.get(id.index())
    }

    /// Cardinality of every variable indexed by [`VarId`]
    pub fn cardinalities(&self) -> Vec<usize> {
        self.variables.iter().map(|v| v.cardinality()).collect()
    }

    /// Shape of a CPT implied by the current parents
    pub fn cpt_shape(&self, id: VarId) -> Vec<usize> {
        let mut shape: Vec<usize> = self
            .parents(id)
            .iter()
            .map(|p| self.variables[p.index()].cardinality())
            .collect();
        if let Some(var) = self.variable(id) {
            shape.push(var.cardinality());
        }
        shape
    }

    /// A variable together with its parents, sorted
    pub fn family(&self, id: VarId) -> Vec<VarId> {
        let mut family = self.parents(id).to_vec();
        family.push(id);
        family.sort_unstable();
        family
    }

    /// CPT of a variable as a potential over its family
    pub fn cpt_potential(&self, id: VarId) -> BNResult<Potential> {
        self.require(id)?;
        let mut scope = self.parents(id).to_vec();
        scope.push(id);
        Ok(Potential::from_unsorted(&scope, self.cpts[id.index()].clone()))
    }

    /// A topological order, ties resolved by the lowest identifier
    pub fn topological_order(&self) -> Vec<VarId> {
        let mut in_degree: Vec<usize> = self.parents.iter().map(|p| p.len()).collect();
        let mut ready: BTreeSet<VarId> = self.ids().filter(|v| in_degree[v.index()] == 0).collect();
        let mut order = Vec::with_capacity(self.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for child in &self.children[node.index()] {
                in_degree[child.index()] -= 1;
                if in_degree[child.index()] == 0 {
                    ready.insert(*child);
                }
            }
        }
        order
    }

    // --------------------------------------------------------------------------------------

    pub(crate) fn require(&self, id: VarId) -> BNResult<&Variable> {
        self.variables
            .get(id.index())
            .ok_or_else(|| BNError::UnknownVariable(id.to_string()))
    }

    pub(crate) fn require_name(&self, name: &str) -> BNResult<VarId> {
        self.variable_id(name)
            .ok_or_else(|| BNError::UnknownVariable(format!("`{name}`")))
    }

    pub(crate) fn require_state(&self, id: VarId, state: usize) -> BNResult<&Variable> {
        let var = self.require(id)?;
        if state >= var.cardinality() {
            return Err(BNError::UnknownState {
                variable: var.name.clone(),
                state: state.to_string(),
            });
        }
        Ok(var)
    }

    /// Whether `to` is reachable from `from` following directed edges
    fn reaches(&self, from: VarId, to: VarId) -> bool {
        let mut visited = vec![false; self.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !std::mem::replace(&mut visited[node.index()], true) {
                stack.extend(self.children[node.index()].iter().copied());
            }
        }
        false
    }
}

fn uniform(shape: &[usize]) -> ArrayD<f64> {
    let cardinality = shape.last().copied().unwrap_or(1);
    ArrayD::from_elem(IxDyn(shape), 1f64 / cardinality as f64)
}
