use crate::core::{BNError, BNResult, BayesianNetwork, VarId, Variable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::trace;

// ------------------------------------------------------------------------------------------

/// What is known about a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finding {
    /// The variable was observed in a state
    Observed(usize),

    /// The variable was forced into a state, do(variable = state)
    Intervened(usize),
}

impl Finding {
    #[inline]
    pub fn state(self) -> usize {
        match self {
            Finding::Observed(state) | Finding::Intervened(state) => state,
        }
    }
}

// ------------------------------------------------------------------------------------------

/// Keeps observations and interventions for the variables of one network.
///
/// Every mutating method returns the number of variables whose finding changed,
/// so a caller can tell a no-op apart. Bulk methods validate their whole input
/// before changing anything.
///
/// # Example
///
/// ```
/// use jtree::core::BayesianNetwork;
/// use jtree::inference::EvidenceManager;
///
/// let mut bn = BayesianNetwork::new();
/// let a = bn.add_variable_with_states("a", &["on", "off"]).unwrap();
/// let mut evidence = EvidenceManager::new(&bn);
/// assert_eq!(evidence.observe(a, 1).unwrap(), 1);
/// assert_eq!(evidence.observe(a, 1).unwrap(), 0);
/// assert!(evidence.observe(a, 2).is_err());
/// evidence.freeze(true);
/// assert!(evidence.unobserve(a).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceManager {
    variables: Vec<Variable>,
    findings: BTreeMap<VarId, Finding>,
    frozen: bool,
}

impl EvidenceManager {
    /// Creates an empty evidence set for the variables of a network
    pub fn new(network: &BayesianNetwork) -> Self {
        EvidenceManager {
            variables: network.variables().to_vec(),
            findings: BTreeMap::new(),
            frozen: false,
        }
    }

    /// Records that `variable` is observed in `state`. Overwrites an earlier
    /// observation or intervention on the same variable.
    pub fn observe(&mut self, variable: VarId, state: usize) -> BNResult<usize> {
        self.check_mutable()?;
        self.check_state(variable, state)?;
        Ok(self.put(variable, Finding::Observed(state)))
    }

    /// Same as [`EvidenceManager::observe`] with a variable and a state given by name
    pub fn observe_named(&mut self, variable: &str, state: &str) -> BNResult<usize> {
        let (id, index) = self.resolve(variable, state)?;
        self.observe(id, index)
    }

    /// Records an intervention do(`variable` = `state`): the variable is forced
    /// into the state regardless of its parents
    pub fn intervene(&mut self, variable: VarId, state: usize) -> BNResult<usize> {
        self.check_mutable()?;
        self.check_state(variable, state)?;
        Ok(self.put(variable, Finding::Intervened(state)))
    }

    /// Same as [`EvidenceManager::intervene`] with a variable and a state given by name
    pub fn intervene_named(&mut self, variable: &str, state: &str) -> BNResult<usize> {
        let (id, index) = self.resolve(variable, state)?;
        self.intervene(id, index)
    }

    /// Forgets whatever is known about a variable
    pub fn unobserve(&mut self, variable: VarId) -> BNResult<usize> {
        self.check_mutable()?;
        self.check_variable(variable)?;
        let removed = self.findings.remove(&variable).is_some();
        if removed {
            trace!(%variable, "finding removed");
        }
        Ok(usize::from(removed))
    }

    /// Adds observations to the current ones
    pub fn observe_all(&mut self, observations: &BTreeMap<VarId, usize>) -> BNResult<usize> {
        self.add_all(observations, Finding::Observed)
    }

    /// Adds interventions to the current ones
    pub fn intervene_all(&mut self, interventions: &BTreeMap<VarId, usize>) -> BNResult<usize> {
        self.add_all(interventions, Finding::Intervened)
    }

    /// Replaces all observations, interventions on other variables are kept
    pub fn set_observations(&mut self, observations: &BTreeMap<VarId, usize>) -> BNResult<usize> {
        self.replace_all(observations, Finding::Observed)
    }

    /// Replaces all interventions, observations on other variables are kept
    pub fn set_interventions(&mut self, interventions: &BTreeMap<VarId, usize>) -> BNResult<usize> {
        self.replace_all(interventions, Finding::Intervened)
    }

    /// Replaces all findings at once
    ///
    /// # Arguments
    ///
    /// * `observations` - New observations
    /// * `interventions` - New interventions, a variable can not be both observed and intervened
    pub fn set_findings(
        &mut self,
        observations: &BTreeMap<VarId, usize>,
        interventions: &BTreeMap<VarId, usize>,
    ) -> BNResult<usize> {
        self.check_mutable()?;
        self.check_all(observations)?;
        self.check_all(interventions)?;
        if let Some(variable) = observations.keys().find(|v| interventions.contains_key(*v)) {
            return Err(BNError::ConflictingFindings(
                self.variables[variable.index()].name().to_string(),
            ));
        }
        let findings: BTreeMap<VarId, Finding> = observations
            .iter()
            .map(|(var, state)| (*var, Finding::Observed(*state)))
            .chain(
                interventions
                    .iter()
                    .map(|(var, state)| (*var, Finding::Intervened(*state))),
            )
            .collect();
        let dropped = self
            .findings
            .keys()
            .filter(|var| !findings.contains_key(*var))
            .count();
        let changed = findings
            .iter()
            .filter(|(var, finding)| self.findings.get(*var) != Some(*finding))
            .count();
        self.findings = findings;
        trace!(changes = dropped + changed, "findings replaced");
        Ok(dropped + changed)
    }

    /// Forgets everything
    pub fn reset(&mut self) -> BNResult<usize> {
        self.check_mutable()?;
        let changes = self.findings.len();
        self.findings.clear();
        Ok(changes)
    }

    /// Forbids (or allows again) any change of the evidence
    #[inline]
    pub fn freeze(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // --------------------------------------------------------------------------------------

    /// Observed or forced state of a variable
    #[inline]
    pub fn value(&self, variable: VarId) -> Option<usize> {
        self.findings.get(&variable).map(|f| f.state())
    }

    #[inline]
    pub fn finding(&self, variable: VarId) -> Option<Finding> {
        self.findings.get(&variable).copied()
    }

    #[inline]
    pub fn is_observation(&self, variable: VarId) -> bool {
        matches!(self.findings.get(&variable), Some(Finding::Observed(_)))
    }

    #[inline]
    pub fn is_intervention(&self, variable: VarId) -> bool {
        matches!(self.findings.get(&variable), Some(Finding::Intervened(_)))
    }

    /// All findings ordered by variable
    #[inline]
    pub fn findings(&self) -> &BTreeMap<VarId, Finding> {
        &self.findings
    }

    pub fn observations(&self) -> BTreeMap<VarId, usize> {
        self.findings
            .iter()
            .filter_map(|(var, finding)| match finding {
                Finding::Observed(state) => Some((*var, *state)),
                Finding::Intervened(_) => None,
            })
            .collect()
    }

    pub fn interventions(&self) -> BTreeMap<VarId, usize> {
        self.findings
            .iter()
            .filter_map(|(var, finding)| match finding {
                Finding::Intervened(state) => Some((*var, *state)),
                Finding::Observed(_) => None,
            })
            .collect()
    }

    /// Number of variables with a finding
    #[inline]
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    // --------------------------------------------------------------------------------------

    fn put(&mut self, variable: VarId, finding: Finding) -> usize {
        match self.findings.insert(variable, finding) {
            Some(old) if old == finding => 0,
            _ => {
                trace!(%variable, ?finding, "finding recorded");
                1
            }
        }
    }

    fn add_all(
        &mut self,
        findings: &BTreeMap<VarId, usize>,
        kind: fn(usize) -> Finding,
    ) -> BNResult<usize> {
        self.check_mutable()?;
        self.check_all(findings)?;
        Ok(findings
            .iter()
            .map(|(variable, state)| self.put(*variable, kind(*state)))
            .sum())
    }

    /// Drops findings of the same kind missing from `findings`, then records `findings`
    fn replace_all(
        &mut self,
        findings: &BTreeMap<VarId, usize>,
        kind: fn(usize) -> Finding,
    ) -> BNResult<usize> {
        self.check_mutable()?;
        self.check_all(findings)?;
        let stale: Vec<VarId> = self
            .findings
            .iter()
            .filter(|(var, finding)| {
                std::mem::discriminant(*finding) == std::mem::discriminant(&kind(0))
                    && !findings.contains_key(*var)
            })
            .map(|(var, _)| *var)
            .collect();
        let mut changes = stale.len();
        for var in stale {
            self.findings.remove(&var);
        }
        for (variable, state) in findings {
            changes += self.put(*variable, kind(*state));
        }
        Ok(changes)
    }

    fn check_all(&self, findings: &BTreeMap<VarId, usize>) -> BNResult<()> {
        for (variable, state) in findings {
            self.check_state(*variable, *state)?;
        }
        Ok(())
    }

    fn check_mutable(&self) -> BNResult<()> {
        if self.frozen {
            Err(BNError::EvidenceFrozen)
        } else {
            Ok(())
        }
    }

    fn check_variable(&self, variable: VarId) -> BNResult<&Variable> {
        self.variables
            .get(variable.index())
            .ok_or_else(|| BNError::UnknownVariable(variable.to_string()))
    }

    fn check_state(&self, variable: VarId, state: usize) -> BNResult<()> {
        let var = self.check_variable(variable)?;
        if state >= var.cardinality() {
            return Err(BNError::UnknownState {
                variable: var.name().to_string(),
                state: state.to_string(),
            });
        }
        Ok(())
    }

    fn resolve(&self, variable: &str, state: &str) -> BNResult<(VarId, usize)> {
        let id = self
            .variables
            .iter()
            .position(|v| v.name() == variable)
            .map(VarId)
            .ok_or_else(|| BNError::UnknownVariable(format!("`{variable}`")))?;
        let index = self.variables[id.index()]
            .state_index(state)
            .ok_or_else(|| BNError::UnknownState {
                variable: variable.to_string(),
                state: state.to_string(),
            })?;
        Ok((id, index))
    }
}
