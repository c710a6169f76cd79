use crate::core::{BNError, BNResult, VarId};
use ndarray::{ArrayD, ArrayViewD, Axis, Dimension, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ------------------------------------------------------------------------------------------

/// The way a variable is eliminated from a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reduction {
    /// Sum over the variable's states (sum-product)
    Sum,

    /// Maximum over the variable's states (max-product)
    Max,
}

// ------------------------------------------------------------------------------------------

/// A non-negative table over a set of discrete variables.
///
/// The scope is always kept sorted by [`VarId`], the i-th axis of the table
/// corresponds to the i-th variable of the scope.
///
/// # Panics
///
/// Binary operations assume that a variable shared by both operands has the
/// same cardinality in both of them. Potentials derived from one network always
/// satisfy this; mixing potentials of different networks is a bug and panics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Potential {
    scope: Vec<VarId>,
    table: ArrayD<f64>,
}

impl Potential {
    /// Creates a potential from a table whose i-th axis corresponds to `scope[i]`.
    /// The scope does not need to be sorted, axes are permuted accordingly.
    ///
    /// # Example
    ///
    /// ```
    /// use jtree::core::{Potential, VarId};
    /// use ndarray::{ArrayD, IxDyn};
    ///
    /// let table = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1., 2., 3., 4., 5., 6.]).unwrap();
    /// let potential = Potential::new(&[VarId(1), VarId(0)], table).unwrap();
    /// assert_eq!(potential.scope(), &[VarId(0), VarId(1)]);
    /// assert_eq!(potential.cardinalities(), &[3, 2]);
    /// assert_eq!(potential.value_at(&[2, 0]), 3.);
    /// ```
    pub fn new(scope: &[VarId], table: ArrayD<f64>) -> BNResult<Self> {
        let mut sorted = scope.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if table.ndim() != scope.len() || sorted.len() != scope.len() {
            return Err(BNError::ScopeMismatch {
                scope: scope.to_vec(),
                shape: table.shape().to_vec(),
            });
        }
        Ok(Self::from_unsorted(scope, table))
    }

    pub(crate) fn from_unsorted(scope: &[VarId], table: ArrayD<f64>) -> Self {
        let mut perm: Vec<usize> = (0..scope.len()).collect();
        perm.sort_by_key(|&axis| scope[axis]);
        let sorted_scope = perm.iter().map(|&axis| scope[axis]).collect();
        let table = table.permuted_axes(perm);
        let table = table.as_standard_layout().into_owned();
        Potential {
            scope: sorted_scope,
            table,
        }
    }

    /// The neutral element of multiplication, a table with an empty scope
    #[inline]
    pub fn unit() -> Self {
        Potential {
            scope: Vec::new(),
            table: ArrayD::from_elem(IxDyn(&[]), 1f64),
        }
    }

    /// A table filled with a constant
    ///
    /// # Arguments
    ///
    /// * `variables` - Pairs of a variable and its cardinality
    /// * `value` - A value of every entry
    pub fn filled(variables: &[(VarId, usize)], value: f64) -> Self {
        let mut variables = variables.to_vec();
        variables.sort_unstable_by_key(|(var, _)| *var);
        variables.dedup_by_key(|(var, _)| *var);
        let shape: Vec<usize> = variables.iter().map(|(_, card)| *card).collect();
        Potential {
            scope: variables.into_iter().map(|(var, _)| var).collect(),
            table: ArrayD::from_elem(IxDyn(&shape), value),
        }
    }

    /// A 0/1 table over a single variable that selects one state
    pub fn indicator(variable: VarId, cardinality: usize, state: usize) -> Self {
        let mut table: ArrayD<f64> = ArrayD::zeros(IxDyn(&[cardinality]));
        if let Some(entry) = table.get_mut(&[state][..]) {
            *entry = 1f64;
        }
        Potential {
            scope: vec![variable],
            table,
        }
    }

    #[inline]
    pub fn scope(&self) -> &[VarId] {
        &self.scope
    }

    #[inline]
    pub fn table(&self) -> &ArrayD<f64> {
        &self.table
    }

    /// Cardinalities of the scope variables
    #[inline]
    pub fn cardinalities(&self) -> &[usize] {
        self.table.shape()
    }

    /// Number of entries
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    pub fn contains(&self, variable: VarId) -> bool {
        self.scope.binary_search(&variable).is_ok()
    }

    /// Cardinality of a scope variable
    #[inline]
    pub fn cardinality_of(&self, variable: VarId) -> Option<usize> {
        self.axis_of(variable).map(|axis| self.table.shape()[axis])
    }

    #[inline(always)]
    fn axis_of(&self, variable: VarId) -> Option<usize> {
        self.scope.binary_search(&variable).ok()
    }

    /// Sum of all entries
    #[inline]
    pub fn total(&self) -> f64 {
        self.table.sum()
    }

    /// Entry at a full index given in scope order
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds
    #[inline]
    pub fn value_at(&self, states: &[usize]) -> f64 {
        self.table[states]
    }

    /// Entry consistent with an assignment, `None` if the assignment
    /// does not cover the scope or is out of bounds
    pub fn value(&self, assignment: &BTreeMap<VarId, usize>) -> Option<f64> {
        let index = self
            .scope
            .iter()
            .map(|var| assignment.get(var).copied())
            .collect::<Option<Vec<_>>>()?;
        self.table.get(index.as_slice()).copied()
    }

    // --------------------------------------------------------------------------------------

    /// A view of the table with unit axes inserted for the variables of `scope`
    /// that are absent in this potential. `scope` must be a sorted superset.
    fn aligned(&self, scope: &[VarId]) -> ArrayViewD<'_, f64> {
        let mut view = self.table.view();
        for (axis, var) in scope.iter().enumerate() {
            if !self.contains(*var) {
                view = view.insert_axis(Axis(axis));
            }
        }
        view
    }

    /// Pointwise product, the scope of the result is the union of scopes
    ///
    /// # Example
    ///
    /// ```
    /// use jtree::core::{Potential, VarId};
    /// use ndarray::{ArrayD, IxDyn};
    ///
    /// let a = Potential::new(&[VarId(0)], ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.3, 0.7]).unwrap()).unwrap();
    /// let b = Potential::new(&[VarId(1)], ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.5, 2.]).unwrap()).unwrap();
    /// let ab = a.multiply(&b);
    /// assert_eq!(ab.scope(), &[VarId(0), VarId(1)]);
    /// assert!((ab.value_at(&[1, 1]) - 1.4).abs() < 1e-12);
    /// ```
    pub fn multiply(&self, other: &Potential) -> Potential {
        let scope = union(&self.scope, &other.scope);
        let shape: Vec<usize> = scope
            .iter()
            .map(|var| {
                self.cardinality_of(*var)
                    .or_else(|| other.cardinality_of(*var))
                    .unwrap_or(1)
            })
            .collect();
        let lhs = self.aligned(&scope);
        let rhs = other.aligned(&scope);
        let mut table: ArrayD<f64> = ArrayD::zeros(IxDyn(&shape));
        match (lhs.broadcast(shape.as_slice()), rhs.broadcast(shape.as_slice())) {
            (Some(lhs), Some(rhs)) => {
                Zip::from(&mut table)
                    .and(lhs)
                    .and(rhs)
                    .for_each(|out, &l, &r| *out = l * r);
            }
            _ => panic!(
                "Cardinalities of shared variables disagree: {:?} vs {:?}. This is a bug, please open an issue",
                self.cardinalities(),
                other.cardinalities()
            ),
        }
        Potential { scope, table }
    }

    /// Pointwise division by a potential whose scope is a subset of this one.
    /// Entries divided by zero become zero (0/0 = 0 convention of junction tree updates).
    pub fn divide(&self, other: &Potential) -> Potential {
        let rhs = other.aligned(&self.scope);
        let mut table = self.table.clone();
        match rhs.broadcast(self.table.shape()) {
            Some(rhs) => {
                Zip::from(&mut table).and(rhs).for_each(|out, &r| {
                    *out = if r == 0f64 { 0f64 } else { *out / r };
                });
            }
            None => panic!(
                "Divisor scope {:?} is not a subset of {:?}. This is a bug, please open an issue",
                other.scope, self.scope
            ),
        }
        Potential {
            scope: self.scope.clone(),
            table,
        }
    }

    /// Eliminates a variable by summation
    #[inline]
    pub fn sum_out(&self, variable: VarId) -> Potential {
        self.reduce(variable, Reduction::Sum)
    }

    /// Eliminates a variable by maximization
    #[inline]
    pub fn max_out(&self, variable: VarId) -> Potential {
        self.reduce(variable, Reduction::Max)
    }

    /// Eliminates a variable, a variable outside of the scope leaves the potential unchanged
    pub fn reduce(&self, variable: VarId, reduction: Reduction) -> Potential {
        let Some(axis) = self.axis_of(variable) else {
            return self.clone();
        };
        let table = match reduction {
            Reduction::Sum => self.table.sum_axis(Axis(axis)),
            Reduction::Max => self
                .table
                .fold_axis(Axis(axis), f64::NEG_INFINITY, |acc, x| acc.max(*x)),
        };
        let mut scope = self.scope.clone();
        scope.remove(axis);
        Potential { scope, table }
    }

    /// Eliminates every variable that is not in `keep`
    pub fn marginalize_onto(&self, keep: &[VarId], reduction: Reduction) -> Potential {
        let mut result = self.clone();
        for var in self.scope.iter().rev() {
            if !keep.contains(var) {
                result = result.reduce(*var, reduction);
            }
        }
        result
    }

    /// Zeroes every entry inconsistent with `variable = state`, the scope is unchanged
    pub fn restrict(&self, variable: VarId, state: usize) -> Potential {
        let mut result = self.clone();
        result.restrict_in_place(variable, state);
        result
    }

    pub(crate) fn restrict_in_place(&mut self, variable: VarId, state: usize) {
        if let Some(axis) = self.axis_of(variable) {
            let cardinality = self.table.shape()[axis];
            for other in (0..cardinality).filter(|s| *s != state) {
                self.table.index_axis_mut(Axis(axis), other).fill(0f64);
            }
        }
    }

    /// Instantiates `variable = state` and drops the variable from the scope
    ///
    /// # Panics
    ///
    /// Panics if `state` is out of range of the variable's states
    pub fn project(&self, variable: VarId, state: usize) -> Potential {
        let Some(axis) = self.axis_of(variable) else {
            return self.clone();
        };
        let table = self.table.index_axis(Axis(axis), state).to_owned();
        let mut scope = self.scope.clone();
        scope.remove(axis);
        Potential { scope, table }
    }

    /// Divides all entries by their total and returns the total
    ///
    /// # Notes
    ///
    /// Zero total means the table carries no mass consistent with the evidence,
    /// the method returns an error and leaves the table unchanged
    pub fn normalize(&mut self) -> BNResult<f64> {
        let total = self.total();
        if total <= 0f64 || !total.is_finite() {
            return Err(BNError::ContradictoryEvidence);
        }
        self.table /= total;
        Ok(total)
    }

    /// Index (in scope order) and value of the first maximal entry in row-major order
    pub fn argmax(&self) -> (Vec<usize>, f64) {
        let mut best_index = vec![0; self.scope.len()];
        let mut best_value = f64::NEG_INFINITY;
        for (index, value) in self.table.indexed_iter() {
            if *value > best_value {
                best_value = *value;
                best_index = index.slice().to_vec();
            }
        }
        (best_index, best_value)
    }
}

/// Sorted union of two sorted scopes
pub(crate) fn union(lhs: &[VarId], rhs: &[VarId]) -> Vec<VarId> {
    let mut scope = Vec::with_capacity(lhs.len() + rhs.len());
    scope.extend_from_slice(lhs);
    scope.extend_from_slice(rhs);
    scope.sort_unstable();
    scope.dedup();
    scope
}

/// Sorted intersection of two sorted scopes
pub(crate) fn intersection(lhs: &[VarId], rhs: &[VarId]) -> Vec<VarId> {
    lhs.iter()
        .filter(|var| rhs.binary_search(var).is_ok())
        .copied()
        .collect()
}
