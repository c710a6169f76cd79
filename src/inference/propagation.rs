use crate::core::{BNError, BNResult, JunctionTree, Potential, Reduction, VarId};
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

// ------------------------------------------------------------------------------------------

/// A potential kept with unit mass together with the natural logarithm of the mass
/// it stands for, the represented table is `potential · exp(log_scale)`.
///
/// # Notes
///
/// A table without mass (contradictory evidence) is kept as zeros with
/// `log_scale = -inf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    potential: Potential,
    log_scale: f64,
}

impl Message {
    /// Normalizes a potential and moves its mass into the log scale
    pub fn new(potential: Potential) -> Self {
        Self::scaled(potential, 0f64)
    }

    fn scaled(mut potential: Potential, log_scale: f64) -> Self {
        match potential.normalize() {
            Ok(total) if log_scale.is_finite() => Message {
                potential,
                log_scale: log_scale + total.ln(),
            },
            _ => Message {
                potential: zeroed(&potential),
                log_scale: f64::NEG_INFINITY,
            },
        }
    }

    /// Normalized table
    #[inline]
    pub fn potential(&self) -> &Potential {
        &self.potential
    }

    #[inline]
    pub fn log_scale(&self) -> f64 {
        self.log_scale
    }

    /// Whether the message carries no mass
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.log_scale == f64::NEG_INFINITY
    }

    /// Unnormalized entry at an assignment covering the scope
    pub fn value(&self, assignment: &BTreeMap<VarId, usize>) -> Option<f64> {
        if self.is_zero() {
            return self.potential.value(assignment).map(|_| 0f64);
        }
        self.potential
            .value(assignment)
            .map(|v| v * self.log_scale.exp())
    }

    pub(crate) fn multiply(&self, other: &Message) -> Message {
        Message::scaled(
            self.potential.multiply(&other.potential),
            self.log_scale + other.log_scale,
        )
    }

    pub(crate) fn marginalize_onto(&self, keep: &[VarId], reduction: Reduction) -> Message {
        Message::scaled(
            self.potential.marginalize_onto(keep, reduction),
            self.log_scale,
        )
    }
}

fn zeroed(potential: &Potential) -> Potential {
    let variables: Vec<(VarId, usize)> = potential
        .scope()
        .iter()
        .copied()
        .zip(potential.cardinalities().iter().copied())
        .collect();
    Potential::filled(&variables, 0f64)
}

// ------------------------------------------------------------------------------------------

/// A flag shared between an engine and whoever wants to stop its propagation
///
/// # Example
///
/// ```
/// use jtree::inference::CancellationToken;
///
/// let token = CancellationToken::new();
/// let handle = token.clone();
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks a running propagation to stop before its next clique
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

// ------------------------------------------------------------------------------------------

/// Messages produced by the upward pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collected {
    /// Reduction used by the pass
    pub reduction: Reduction,

    /// Message from every clique to its parent, `None` for the root
    pub upward: Vec<Option<Message>>,

    /// Own potential of every clique times the messages of its children,
    /// for max-product these are the back-pointer tables of the traceback
    pub partial: Vec<Message>,
}

impl Collected {
    /// Logarithm of the sum (or maximum) of the root table
    pub fn log_total(&self, root: usize) -> f64 {
        let root = &self.partial[root];
        if root.is_zero() {
            return f64::NEG_INFINITY;
        }
        match self.reduction {
            Reduction::Sum => root.log_scale,
            Reduction::Max => root.log_scale + root.potential.argmax().1.ln(),
        }
    }
}

/// Messages produced by both passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibrated {
    /// Message from every clique to its parent, `None` for the root
    pub upward: Vec<Option<Message>>,

    /// Message from the parent of every clique, `None` for the root
    pub downward: Vec<Option<Message>>,

    /// Joint table of every clique with the evidence
    pub beliefs: Vec<Message>,

    /// Logarithm of the probability of evidence
    pub log_partition: f64,
}

// ------------------------------------------------------------------------------------------

/// Two-pass message passing over a junction tree.
///
/// The upward (collect) pass sends from the leaves to the root, a clique is
/// processed once all its children have sent. The downward (distribute) pass
/// sends from the root to the leaves, a message to a child leaves out what
/// the child sent upward.
/// With a worker pool independent subtrees are processed concurrently,
/// otherwise cliques are visited in post-order and pre-order.
///
/// # Arguments
///
/// * `tree` - A junction tree
/// * `factors` - A potential of every clique, its scope is the clique
pub struct MessagePropagator<'a> {
    tree: &'a JunctionTree,
    factors: &'a [Potential],
    pool: Option<&'a ThreadPool>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> MessagePropagator<'a> {
    #[inline]
    pub fn new(tree: &'a JunctionTree, factors: &'a [Potential]) -> Self {
        MessagePropagator {
            tree,
            factors,
            pool: None,
            cancel: None,
        }
    }

    /// Runs passes on a worker pool
    #[inline]
    pub fn with_pool(mut self, pool: Option<&'a ThreadPool>) -> Self {
        self.pool = pool;
        self
    }

    /// Checks a token before every clique
    #[inline]
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    #[inline(always)]
    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.is_cancelled())
    }

    /// Upward pass
    pub fn collect(&self, reduction: Reduction) -> BNResult<Collected> {
        let pass = CollectPass {
            tree: self.tree,
            factors: self.factors,
            reduction,
            pending: (0..self.tree.len())
                .map(|c| AtomicUsize::new(self.tree.children(c).len()))
                .collect(),
            upward: (0..self.tree.len()).map(|_| OnceLock::new()).collect(),
            partial: (0..self.tree.len()).map(|_| OnceLock::new()).collect(),
            cancel: self.cancel,
        };
        match self.pool {
            Some(pool) => pool.scope(|scope| {
                for leaf in self.tree.leaves() {
                    pass.spawn(scope, leaf);
                }
            }),
            None => {
                for clique in self.tree.postorder() {
                    if self.is_cancelled() {
                        break;
                    }
                    pass.visit(clique);
                }
            }
        }
        if self.is_cancelled() {
            debug!("upward pass cancelled");
            return Err(BNError::Cancelled);
        }
        let upward = pass.upward.into_iter().map(OnceLock::into_inner).collect();
        let partial = pass
            .partial
            .into_iter()
            .map(OnceLock::into_inner)
            .collect::<Option<Vec<_>>>()
            .ok_or(BNError::Cancelled)?;
        Ok(Collected {
            reduction,
            upward,
            partial,
        })
    }

    /// Downward pass, completes a sum-product upward pass
    pub fn distribute(&self, collected: Collected) -> BNResult<Calibrated> {
        let log_partition = collected.log_total(self.tree.root());
        let pass = DistributePass {
            tree: self.tree,
            factors: self.factors,
            collected: &collected,
            downward: (0..self.tree.len()).map(|_| OnceLock::new()).collect(),
            beliefs: (0..self.tree.len()).map(|_| OnceLock::new()).collect(),
            cancel: self.cancel,
        };
        match self.pool {
            Some(pool) => pool.scope(|scope| pass.spawn(scope, self.tree.root())),
            None => {
                for clique in self.tree.preorder() {
                    if self.is_cancelled() {
                        break;
                    }
                    pass.visit(*clique);
                }
            }
        }
        if self.is_cancelled() {
            debug!("downward pass cancelled");
            return Err(BNError::Cancelled);
        }
        let downward = pass.downward.into_iter().map(OnceLock::into_inner).collect();
        let beliefs = pass
            .beliefs
            .into_iter()
            .map(OnceLock::into_inner)
            .collect::<Option<Vec<_>>>()
            .ok_or(BNError::Cancelled)?;
        Ok(Calibrated {
            upward: collected.upward,
            downward,
            beliefs,
            log_partition,
        })
    }

    /// Sum-product upward and downward passes
    pub fn calibrate(&self) -> BNResult<Calibrated> {
        let collected = self.collect(Reduction::Sum)?;
        let calibrated = self.distribute(collected)?;
        debug!(
            cliques = self.tree.len(),
            parallel = self.pool.is_some(),
            log_partition = calibrated.log_partition,
            "junction tree calibrated"
        );
        Ok(calibrated)
    }

    /// Max-product upward pass followed by a traceback.
    ///
    /// Returns the maximizing state of every variable of the tree together with
    /// the logarithm of the maximal value, `None` when every assignment has zero value.
    pub fn max_product(&self) -> BNResult<Option<(BTreeMap<VarId, usize>, f64)>> {
        let collected = self.collect(Reduction::Max)?;
        let log_max = collected.log_total(self.tree.root());
        if log_max == f64::NEG_INFINITY {
            return Ok(None);
        }
        let mut assignment = BTreeMap::new();
        for clique in self.tree.preorder() {
            let mut table = collected.partial[*clique].potential.clone();
            for var in self.tree.parent_separator(*clique) {
                if let Some(state) = assignment.get(var) {
                    table = table.project(*var, *state);
                }
            }
            let (states, _) = table.argmax();
            for (var, state) in table.scope().iter().zip(states) {
                assignment.entry(*var).or_insert(state);
            }
        }
        debug!(log_max, "max-product traceback finished");
        Ok(Some((assignment, log_max)))
    }
}

// ------------------------------------------------------------------------------------------

struct CollectPass<'a> {
    tree: &'a JunctionTree,
    factors: &'a [Potential],
    reduction: Reduction,
    pending: Vec<AtomicUsize>,
    upward: Vec<OnceLock<Message>>,
    partial: Vec<OnceLock<Message>>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> CollectPass<'a> {
    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, clique: usize) {
        scope.spawn(move |scope| {
            if self.cancel.is_some_and(|c| c.is_cancelled()) {
                return;
            }
            self.visit(clique);
            if let Some(parent) = self.tree.parent(clique) {
                // the last child to finish schedules its parent
                if self.pending[parent].fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.spawn(scope, parent);
                }
            }
        });
    }

    fn visit(&self, clique: usize) {
        let mut partial = Message::new(self.factors[clique].clone());
        for child in self.tree.children(clique) {
            if let Some(message) = self.upward[*child].get() {
                partial = partial.multiply(message);
            }
        }
        if self.tree.parent(clique).is_some() {
            let message =
                partial.marginalize_onto(self.tree.parent_separator(clique), self.reduction);
            let _ = self.upward[clique].set(message);
        }
        let _ = self.partial[clique].set(partial);
    }
}

struct DistributePass<'a> {
    tree: &'a JunctionTree,
    factors: &'a [Potential],
    collected: &'a Collected,
    downward: Vec<OnceLock<Message>>,
    beliefs: Vec<OnceLock<Message>>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> DistributePass<'a> {
    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, clique: usize) {
        scope.spawn(move |scope| {
            if self.cancel.is_some_and(|c| c.is_cancelled()) {
                return;
            }
            self.visit(clique);
            for child in self.tree.children(clique) {
                self.spawn(scope, *child);
            }
        });
    }

    /// Computes the belief of a clique and the messages to its children.
    /// The message to a child combines everything the clique knows except
    /// what that child sent, so no division is needed.
    ///
    /// # Notes
    ///
    /// Prefix and suffix products of the children's upward messages keep the
    /// work linear in the number of children.
    fn visit(&self, clique: usize) {
        let from_parent = self.downward[clique].get();
        let partial = &self.collected.partial[clique];
        let belief = match from_parent {
            Some(message) => partial.multiply(message),
            None => partial.clone(),
        };
        let children = self.tree.children(clique);
        if !children.is_empty() {
            let mut base = Message::new(self.factors[clique].clone());
            if let Some(message) = from_parent {
                base = base.multiply(message);
            }
            let upward: Vec<Option<&Message>> = children
                .iter()
                .map(|child| self.collected.upward[*child].as_ref())
                .collect();
            let mut suffixes = Vec::with_capacity(children.len() + 1);
            suffixes.push(Message::new(Potential::unit()));
            for message in upward.iter().rev() {
                let next = match (message, suffixes.last()) {
                    (Some(message), Some(last)) => message.multiply(last),
                    (None, Some(last)) => last.clone(),
                    (_, None) => Message::new(Potential::unit()),
                };
                suffixes.push(next);
            }
            suffixes.reverse();
            let mut prefix = base;
            for (i, child) in children.iter().enumerate() {
                let rest = prefix.multiply(&suffixes[i + 1]);
                let separator = self.tree.parent_separator(*child);
                let message = rest.marginalize_onto(separator, Reduction::Sum);
                let _ = self.downward[*child].set(message);
                if let Some(message) = upward[i] {
                    prefix = prefix.multiply(message);
                }
            }
        }
        let _ = self.beliefs[clique].set(belief);
    }
}
