use crate::core::{
    moralize, BNError, BNResult, BayesianNetwork, JunctionTree, JunctionTreeBuilder, Potential,
    Reduction, Triangulation, Triangulator, VarId, Variable,
};
use crate::inference::propagation::{Calibrated, CancellationToken, Message, MessagePropagator};
use crate::inference::sensitivity::{self, CptParameter, Sensitivity};
use crate::inference::{EvidenceManager, Finding, InferenceConfig};
use ndarray::Array1;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

// ------------------------------------------------------------------------------------------

/// Posterior distribution of a single variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marginal {
    /// Name of the variable
    pub variable: String,

    /// Names of the states
    pub states: Vec<String>,

    /// Probability of every state
    pub probabilities: Array1<f64>,
}

impl Marginal {
    /// Probability of a state given by name
    pub fn probability(&self, state: &str) -> Option<f64> {
        self.states
            .iter()
            .position(|s| s == state)
            .map(|i| self.probabilities[i])
    }

    /// Pairs of a state name and its probability
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.states
            .iter()
            .map(|s| s.as_str())
            .zip(self.probabilities.iter().copied())
    }

    /// Index of the most probable state
    pub fn mode(&self) -> usize {
        let mut best = 0;
        for (i, p) in self.probabilities.iter().enumerate() {
            if *p > self.probabilities[best] {
                best = i;
            }
        }
        best
    }
}

impl Display for Marginal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.variable)?;
        for (state, p) in self.iter() {
            write!(f, " {state}={p:.6}")?;
        }
        Ok(())
    }
}

/// Most probable explanation of the evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpeResult {
    /// Maximizing state of every requested variable
    pub assignment: BTreeMap<VarId, usize>,

    /// The same assignment by names
    pub states: BTreeMap<String, String>,

    /// Joint probability of the full maximizing assignment and the evidence
    pub probability: f64,

    /// Natural logarithm of `probability`
    pub log_probability: f64,
}

// ------------------------------------------------------------------------------------------

/// Result of a sum-product propagation for one epoch.
///
/// A snapshot is immutable and may be shared between threads, the engine
/// publishes a new one instead of changing it when evidence or a CPT changes.
#[derive(Debug)]
pub struct Propagation {
    epoch: u64,
    findings: BTreeMap<VarId, Finding>,
    calibrated: Calibrated,
    tree: Arc<JunctionTree>,
    variables: Arc<Vec<Variable>>,
}

impl Propagation {
    /// Epoch the propagation was computed for
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Evidence the propagation was computed with
    #[inline]
    pub fn findings(&self) -> &BTreeMap<VarId, Finding> {
        &self.findings
    }

    /// Natural logarithm of the probability of evidence
    #[inline]
    pub fn log_probability_of_evidence(&self) -> f64 {
        self.calibrated.log_partition
    }

    /// Probability of evidence (the partition function), zero for contradictory evidence
    #[inline]
    pub fn probability_of_evidence(&self) -> f64 {
        self.calibrated.log_partition.exp()
    }

    #[inline]
    pub fn is_contradictory(&self) -> bool {
        self.calibrated.log_partition == f64::NEG_INFINITY
    }

    /// Joint table of a clique and the evidence
    pub fn belief(&self, clique: usize) -> Option<&Message> {
        self.calibrated.beliefs.get(clique)
    }

    pub(crate) fn calibrated(&self) -> &Calibrated {
        &self.calibrated
    }

    /// Posterior distribution of a variable
    pub fn marginal(&self, variable: VarId) -> BNResult<Marginal> {
        let var = self
            .variables
            .get(variable.index())
            .ok_or_else(|| BNError::UnknownVariable(variable.to_string()))?;
        if self.is_contradictory() {
            return Err(BNError::ContradictoryEvidence);
        }
        let clique = self
            .tree
            .home_clique(variable)
            .ok_or_else(|| BNError::UnknownVariable(variable.to_string()))?;
        let mut marginal = self.calibrated.beliefs[clique]
            .potential()
            .marginalize_onto(&[variable], Reduction::Sum);
        marginal.normalize()?;
        let probabilities = marginal
            .table()
            .iter()
            .copied()
            .collect::<Array1<f64>>();
        Ok(Marginal {
            variable: var.name().to_string(),
            states: var.states().to_vec(),
            probabilities,
        })
    }

    /// Posterior distributions of all variables
    pub fn marginals(&self) -> BNResult<Vec<Marginal>> {
        (0..self.variables.len())
            .map(|v| self.marginal(VarId(v)))
            .collect()
    }
}

// ------------------------------------------------------------------------------------------

/// Potential of a clique: the CPTs assigned to it and the evidence of the variables
/// assigned to it. Intervened variables contribute an indicator instead of their CPT.
///
/// # Arguments
///
/// * `exclude` - A variable whose CPT is left out
pub(crate) fn clique_factor(
    network: &BayesianNetwork,
    tree: &JunctionTree,
    findings: &BTreeMap<VarId, Finding>,
    clique: usize,
    exclude: Option<VarId>,
) -> BNResult<Potential> {
    let scope: Vec<(VarId, usize)> = tree
        .clique(clique)
        .iter()
        .map(|v| (*v, network.variables()[v.index()].cardinality()))
        .collect();
    let mut factor = Potential::filled(&scope, 1f64);
    for var in tree.assigned_variables(clique).iter().copied() {
        let cardinality = network.variables()[var.index()].cardinality();
        match findings.get(&var) {
            Some(Finding::Intervened(state)) => {
                if exclude != Some(var) {
                    factor = factor.multiply(&Potential::indicator(var, cardinality, *state));
                }
            }
            Some(Finding::Observed(state)) => {
                if exclude != Some(var) {
                    factor = factor.multiply(&network.cpt_potential(var)?);
                }
                factor.restrict_in_place(var, *state);
            }
            None => {
                if exclude != Some(var) {
                    factor = factor.multiply(&network.cpt_potential(var)?);
                }
            }
        }
    }
    Ok(factor)
}

fn clique_factors(
    network: &BayesianNetwork,
    tree: &JunctionTree,
    findings: &BTreeMap<VarId, Finding>,
) -> BNResult<Vec<Potential>> {
    (0..tree.len())
        .map(|clique| clique_factor(network, tree, findings, clique, None))
        .collect()
}

// ------------------------------------------------------------------------------------------

/// Exact inference on a Bayesian network.
///
/// The junction tree is built once when the engine is created. Every change of
/// evidence or of a CPT advances the epoch, queries propagate lazily and the result
/// is cached until the next change.
///
/// # Example
///
/// ```
/// use jtree::core::BayesianNetwork;
/// use jtree::inference::{InferenceConfig, InferenceEngine};
///
/// let mut bn = BayesianNetwork::new();
/// let rain = bn.add_variable_with_states("rain", &["yes", "no"]).unwrap();
/// let grass = bn.add_variable_with_states("wet_grass", &["yes", "no"]).unwrap();
/// bn.add_edge(rain, grass).unwrap();
/// bn.set_cpt(rain, vec![0.2, 0.8]).unwrap();
/// bn.set_cpt(grass, vec![0.9, 0.1, 0.05, 0.95]).unwrap();
///
/// let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
/// let prior = engine.marginal(grass).unwrap();
/// assert!((prior.probabilities[0] - 0.22).abs() < 1e-12);
///
/// engine.set_evidence(grass, 0).unwrap();
/// let posterior = engine.marginal(rain).unwrap();
/// assert!((posterior.probabilities[0] - 0.18 / 0.22).abs() < 1e-12);
/// assert!((engine.probability_of_evidence().unwrap() - 0.22).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct InferenceEngine {
    network: BayesianNetwork,
    variables: Arc<Vec<Variable>>,
    triangulation: Triangulation,
    tree: Arc<JunctionTree>,
    evidence: EvidenceManager,
    config: InferenceConfig,
    pool: Option<ThreadPool>,
    cancel: CancellationToken,
    epoch: u64,
    current: Option<Arc<Propagation>>,
    auxiliary: HashMap<(VarId, usize), Arc<Propagation>>,
}

impl InferenceEngine {
    /// Compiles a network into a junction tree
    ///
    /// # Arguments
    ///
    /// * `network` - A network, its structure is fixed from now on
    /// * `config` - An inference configuration
    pub fn new(network: BayesianNetwork, config: InferenceConfig) -> BNResult<Self> {
        let cardinalities = network.cardinalities();
        let moral = moralize(&network);
        let triangulation = Triangulator::new(&moral, &cardinalities).triangulate();
        let estimated = triangulation.estimated_table_size();
        if let Some(limit) = config.max_table_size {
            if estimated > limit {
                return Err(BNError::InferenceTooComplex { estimated, limit });
            }
        }
        let mut tree = JunctionTreeBuilder::from_triangulation(&triangulation).build()?;
        tree.assign_families(&network)?;
        let pool = if config.parallel {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build()
                .map_err(|err| BNError::ThreadPool(err.to_string()))?;
            Some(pool)
        } else {
            None
        };
        info!(
            variables = network.len(),
            cliques = tree.len(),
            table_size = estimated,
            parallel = config.parallel,
            "inference engine compiled"
        );
        Ok(InferenceEngine {
            variables: Arc::new(network.variables().to_vec()),
            evidence: EvidenceManager::new(&network),
            network,
            triangulation,
            tree: Arc::new(tree),
            config,
            pool,
            cancel: CancellationToken::new(),
            epoch: 0,
            current: None,
            auxiliary: HashMap::new(),
        })
    }

    #[inline]
    pub fn network(&self) -> &BayesianNetwork {
        &self.network
    }

    #[inline]
    pub fn junction_tree(&self) -> &JunctionTree {
        &self.tree
    }

    #[inline]
    pub fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    #[inline]
    pub fn evidence(&self) -> &EvidenceManager {
        &self.evidence
    }

    #[inline]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Current epoch, it advances with every change of evidence or of a CPT
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// A token that stops a running propagation, it is shared with the engine
    #[inline]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn advance(&mut self, changes: usize, reason: &'static str) {
        if changes > 0 {
            self.epoch += 1;
            self.auxiliary.clear();
            debug!(epoch = self.epoch, reason, "epoch advanced");
        }
    }

    // --------------------------------------------------------------------------------------

    /// Observes a variable in a state, an earlier finding on it is replaced
    pub fn set_evidence(&mut self, variable: VarId, state: usize) -> BNResult<()> {
        let changes = self.evidence.observe(variable, state)?;
        self.advance(changes, "evidence set");
        Ok(())
    }

    /// Observes a variable in a state given by names
    pub fn set_evidence_named(&mut self, variable: &str, state: &str) -> BNResult<()> {
        let changes = self.evidence.observe_named(variable, state)?;
        self.advance(changes, "evidence set");
        Ok(())
    }

    /// Removes an observation or an intervention
    pub fn clear_evidence(&mut self, variable: VarId) -> BNResult<()> {
        let changes = self.evidence.unobserve(variable)?;
        self.advance(changes, "evidence cleared");
        Ok(())
    }

    /// Forces a variable into a state regardless of its parents, do(variable = state)
    pub fn intervene(&mut self, variable: VarId, state: usize) -> BNResult<()> {
        let changes = self.evidence.intervene(variable, state)?;
        self.advance(changes, "intervention set");
        Ok(())
    }

    /// Replaces all observations
    pub fn set_observations(&mut self, observations: &BTreeMap<VarId, usize>) -> BNResult<()> {
        let changes = self.evidence.set_observations(observations)?;
        self.advance(changes, "observations replaced");
        Ok(())
    }

    /// Adds observations to the current ones
    pub fn observe_all(&mut self, observations: &BTreeMap<VarId, usize>) -> BNResult<()> {
        let changes = self.evidence.observe_all(observations)?;
        self.advance(changes, "observations added");
        Ok(())
    }

    /// Adds interventions to the current ones
    pub fn intervene_all(&mut self, interventions: &BTreeMap<VarId, usize>) -> BNResult<()> {
        let changes = self.evidence.intervene_all(interventions)?;
        self.advance(changes, "interventions added");
        Ok(())
    }

    /// Replaces all interventions
    pub fn set_interventions(&mut self, interventions: &BTreeMap<VarId, usize>) -> BNResult<()> {
        let changes = self.evidence.set_interventions(interventions)?;
        self.advance(changes, "interventions replaced");
        Ok(())
    }

    /// Replaces all observations and interventions at once
    pub fn set_findings(
        &mut self,
        observations: &BTreeMap<VarId, usize>,
        interventions: &BTreeMap<VarId, usize>,
    ) -> BNResult<()> {
        let changes = self.evidence.set_findings(observations, interventions)?;
        self.advance(changes, "findings replaced");
        Ok(())
    }

    /// Removes every observation and intervention
    pub fn reset_evidence(&mut self) -> BNResult<()> {
        let changes = self.evidence.reset()?;
        self.advance(changes, "evidence reset");
        Ok(())
    }

    /// Forbids (or allows again) changes of the evidence
    #[inline]
    pub fn freeze_evidence(&mut self, frozen: bool) {
        self.evidence.freeze(frozen);
    }

    /// Replaces the CPT of a variable, the junction tree is kept
    pub fn set_cpt(&mut self, variable: VarId, values: Vec<f64>) -> BNResult<()> {
        self.network.set_cpt(variable, values)?;
        self.advance(1, "CPT replaced");
        Ok(())
    }

    // --------------------------------------------------------------------------------------

    pub(crate) fn run(&self, findings: &BTreeMap<VarId, Finding>) -> BNResult<Propagation> {
        let factors = clique_factors(&self.network, &self.tree, findings)?;
        let calibrated = MessagePropagator::new(&self.tree, &factors)
            .with_pool(self.pool.as_ref())
            .with_cancellation(&self.cancel)
            .calibrate()
            .map_err(|err| {
                if err == BNError::Cancelled {
                    self.cancel.reset();
                    info!(epoch = self.epoch, "propagation cancelled");
                }
                err
            })?;
        Ok(Propagation {
            epoch: self.epoch,
            findings: findings.clone(),
            calibrated,
            tree: self.tree.clone(),
            variables: self.variables.clone(),
        })
    }

    /// Makes a finished propagation the current one. A cancellation requested after
    /// the propagation passed its last check is dropped here.
    pub(crate) fn publish(&mut self, propagation: Propagation) -> Arc<Propagation> {
        self.cancel.reset();
        let propagation = Arc::new(propagation);
        self.current = Some(propagation.clone());
        propagation
    }

    /// Propagates the current evidence unless a propagation of the current epoch exists
    ///
    /// # Notes
    ///
    /// A cancellation applies to the propagation running when it is requested, or to
    /// the next one if none is running. The token is reset whenever a propagation
    /// ends: a cancelled one publishes nothing and returns [`BNError::Cancelled`],
    /// a finished one is published and a request that came too late is dropped.
    pub fn propagate(&mut self) -> BNResult<Arc<Propagation>> {
        if let Some(current) = self.snapshot_of_epoch() {
            return Ok(current);
        }
        let propagation = self.run(self.evidence.findings())?;
        Ok(self.publish(propagation))
    }

    fn snapshot_of_epoch(&self) -> Option<Arc<Propagation>> {
        self.current
            .as_ref()
            .filter(|current| current.epoch == self.epoch)
            .cloned()
    }

    /// The propagation of the current epoch without propagating
    pub fn snapshot(&self) -> BNResult<Arc<Propagation>> {
        self.snapshot_of_epoch()
            .ok_or(BNError::UnpropagatedQuery { epoch: self.epoch })
    }

    /// Posterior distribution of a variable, propagates if needed
    pub fn marginal(&mut self, variable: VarId) -> BNResult<Marginal> {
        self.network.require(variable)?;
        self.propagate()?.marginal(variable)
    }

    /// Posterior distribution of a variable given by name
    pub fn marginal_named(&mut self, variable: &str) -> BNResult<Marginal> {
        let id = self.network.require_name(variable)?;
        self.marginal(id)
    }

    /// Posterior distribution of a variable without propagating
    pub fn cached_marginal(&self, variable: VarId) -> BNResult<Marginal> {
        self.network.require(variable)?;
        self.snapshot()?.marginal(variable)
    }

    /// Posterior distributions of all variables
    pub fn marginals(&mut self) -> BNResult<Vec<Marginal>> {
        self.propagate()?.marginals()
    }

    /// Probability of the current evidence, zero if the evidence is contradictory
    pub fn probability_of_evidence(&mut self) -> BNResult<f64> {
        Ok(self.propagate()?.probability_of_evidence())
    }

    pub fn log_probability_of_evidence(&mut self) -> BNResult<f64> {
        Ok(self.propagate()?.log_probability_of_evidence())
    }

    /// Most probable joint assignment of all variables given the evidence
    ///
    /// # Arguments
    ///
    /// * `subset` - Variables to report, all of them if `None`; the maximization
    ///   is always over the full joint assignment
    pub fn most_probable_explanation(&self, subset: Option<&[VarId]>) -> BNResult<MpeResult> {
        if let Some(subset) = subset {
            for var in subset {
                self.network.require(*var)?;
            }
        }
        let factors = clique_factors(&self.network, &self.tree, self.evidence.findings())?;
        let result = MessagePropagator::new(&self.tree, &factors)
            .with_pool(self.pool.as_ref())
            .with_cancellation(&self.cancel)
            .max_product();
        self.cancel.reset();
        let (assignment, log_probability) = result?.ok_or(BNError::ContradictoryEvidence)?;
        let assignment: BTreeMap<VarId, usize> = match subset {
            Some(subset) => assignment
                .into_iter()
                .filter(|(var, _)| subset.contains(var))
                .collect(),
            None => assignment,
        };
        let states = assignment
            .iter()
            .map(|(var, state)| {
                let var = &self.variables[var.index()];
                (var.name().to_string(), var.states()[*state].clone())
            })
            .collect();
        Ok(MpeResult {
            assignment,
            states,
            probability: log_probability.exp(),
            log_probability,
        })
    }

    /// Derivative of `P(e)`, or of `P(query | e)` when a query `(variable, state)`
    /// is given, with respect to one CPT entry
    pub fn sensitivity(
        &mut self,
        query: Option<(VarId, usize)>,
        parameter: &CptParameter,
    ) -> BNResult<Sensitivity> {
        let base = self.propagate()?;
        let joint = match query {
            Some((variable, state)) => {
                self.network.require_state(variable, state)?;
                self.auxiliary_propagation(variable, state)?
            }
            None => None,
        };
        sensitivity::analyze(
            &self.network,
            &self.tree,
            &base,
            query.map(|q| (q, joint.as_deref())),
            parameter,
        )
    }

    /// A propagation with `variable = state` added to the evidence,
    /// `None` when that contradicts the current finding on the variable
    fn auxiliary_propagation(
        &mut self,
        variable: VarId,
        state: usize,
    ) -> BNResult<Option<Arc<Propagation>>> {
        match self.evidence.finding(variable) {
            Some(finding) if finding.state() != state => return Ok(None),
            Some(_) => return self.propagate().map(Some),
            None => {}
        }
        if let Some(cached) = self.auxiliary.get(&(variable, state)) {
            return Ok(Some(cached.clone()));
        }
        let mut findings = self.evidence.findings().clone();
        findings.insert(variable, Finding::Observed(state));
        let propagation = Arc::new(self.run(&findings)?);
        self.cancel.reset();
        if self.config.sensitivity_cache {
            self.auxiliary.insert((variable, state), propagation.clone());
        }
        Ok(Some(propagation))
    }
}
