use crate::core::potential::intersection;
use crate::core::{BNError, BNResult, BayesianNetwork, Triangulation, VarId};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

// ------------------------------------------------------------------------------------------

/// An edge of a junction tree, the shared variables of two adjacent cliques
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Separator {
    /// Indices of the adjacent cliques, `cliques.0 < cliques.1`
    pub cliques: (usize, usize),

    /// Sorted intersection of the cliques
    pub variables: Vec<VarId>,
}

// ------------------------------------------------------------------------------------------

/// A tree of cliques with the running intersection property.
///
/// Cliques live in an arena and are addressed by index; the tree is rooted at
/// clique 0 and keeps the parent/children links used by message passing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionTree {
    cliques: Vec<Vec<VarId>>,
    separators: Vec<Separator>,
    root: usize,
    parents: Vec<Option<usize>>,
    parent_separators: Vec<Vec<VarId>>,
    children: Vec<Vec<usize>>,
    depths: Vec<usize>,
    preorder: Vec<usize>,
    containing: Vec<Vec<usize>>,
    homes: Vec<Option<usize>>,
    families: Vec<Option<usize>>,
    assigned: Vec<Vec<VarId>>,
}

impl JunctionTree {
    /// Number of cliques
    #[inline]
    pub fn len(&self) -> usize {
        self.cliques.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cliques.is_empty()
    }

    #[inline]
    pub fn cliques(&self) -> &[Vec<VarId>] {
        &self.cliques
    }

    #[inline]
    pub fn clique(&self, index: usize) -> &[VarId] {
        &self.cliques[index]
    }

    /// Tree edges
    #[inline]
    pub fn separators(&self) -> &[Separator] {
        &self.separators
    }

    #[inline]
    pub fn root(&self) -> usize {
        self.root
    }

    #[inline]
    pub fn parent(&self, clique: usize) -> Option<usize> {
        self.parents[clique]
    }

    /// Variables shared with the parent, empty for the root
    #[inline]
    pub fn parent_separator(&self, clique: usize) -> &[VarId] {
        &self.parent_separators[clique]
    }

    #[inline]
    pub fn children(&self, clique: usize) -> &[usize] {
        &self.children[clique]
    }

    #[inline]
    pub fn depth(&self, clique: usize) -> usize {
        self.depths[clique]
    }

    /// Cliques in breadth-first order starting from the root, parents precede children
    #[inline]
    pub fn preorder(&self) -> &[usize] {
        &self.preorder
    }

    /// Cliques ordered so that children precede parents
    pub fn postorder(&self) -> Vec<usize> {
        self.preorder.iter().rev().copied().collect()
    }

    /// Cliques without children
    pub fn leaves(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|c| self.children[*c].is_empty())
            .collect()
    }

    /// The smallest clique containing a variable (lowest index among equals)
    #[inline]
    pub fn home_clique(&self, variable: VarId) -> Option<usize> {
        self.homes.get(variable.index()).copied().flatten()
    }

    /// The clique that holds the CPT and the evidence of a variable,
    /// available after [`JunctionTree::assign_families`]
    #[inline]
    pub fn family_clique(&self, variable: VarId) -> Option<usize> {
        self.families.get(variable.index()).copied().flatten()
    }

    /// Cliques containing a variable, in increasing order
    #[inline]
    pub fn cliques_containing(&self, variable: VarId) -> &[usize] {
        self.containing
            .get(variable.index())
            .map_or(&[][..], Vec::as_slice)
    }

    /// Variables whose CPT is assigned to a clique, in increasing order
    #[inline]
    pub fn assigned_variables(&self, clique: usize) -> &[VarId] {
        self.assigned.get(clique).map_or(&[][..], Vec::as_slice)
    }

    /// Assigns every variable of a network to the smallest clique containing
    /// the variable together with its parents
    pub fn assign_families(&mut self, network: &BayesianNetwork) -> BNResult<()> {
        let mut families = Vec::with_capacity(network.len());
        let mut assigned = vec![Vec::new(); self.len()];
        for var in network.ids() {
            let family = network.family(var);
            let clique = self
                .cliques_containing(var)
                .iter()
                .copied()
                .filter(|c| family.iter().all(|v| self.cliques[*c].binary_search(v).is_ok()))
                .min_by_key(|c| (self.cliques[*c].len(), *c));
            match clique {
                Some(clique) => {
                    families.push(Some(clique));
                    assigned[clique].push(var);
                }
                None => {
                    return Err(BNError::NonChordalInput(format!(
                        "no clique covers the family of `{}`",
                        network.variables()[var.index()].name()
                    )))
                }
            }
        }
        self.families = families;
        self.assigned = assigned;
        Ok(())
    }

    /// Total number of entries of all clique tables
    pub fn total_table_size(&self, cardinalities: &[usize]) -> usize {
        self.cliques.iter().fold(0usize, |acc, clique| {
            let size = clique
                .iter()
                .fold(1usize, |acc, v| acc.saturating_mul(cardinalities[v.index()]));
            acc.saturating_add(size)
        })
    }

    /// Checks that the cliques containing any variable form a connected subtree
    ///
    /// # Notes
    ///
    /// In a tree, `k` vertices induce a connected subgraph iff exactly `k - 1`
    /// tree edges join them. An edge joins two cliques containing a variable
    /// iff its separator contains it.
    pub fn has_running_intersection(&self) -> bool {
        self.first_running_intersection_violation().is_none()
    }

    fn first_running_intersection_violation(&self) -> Option<VarId> {
        let variables_number = self
            .cliques
            .iter()
            .flat_map(|c| c.iter())
            .map(|v| v.index() + 1)
            .max()
            .unwrap_or(0);
        let mut containing = vec![0usize; variables_number];
        let mut joining = vec![0usize; variables_number];
        for clique in &self.cliques {
            for var in clique {
                containing[var.index()] += 1;
            }
        }
        for separator in &self.separators {
            for var in &separator.variables {
                joining[var.index()] += 1;
            }
        }
        (0..variables_number)
            .find(|v| containing[*v] > 0 && joining[*v] + 1 != containing[*v])
            .map(VarId)
    }
}

// ------------------------------------------------------------------------------------------

/// A junction tree builder
///
/// # Example
///
/// ```
/// use jtree::core::{JunctionTreeBuilder, VarId};
///
/// let mut builder = JunctionTreeBuilder::new();
/// builder.add_clique(&[VarId(0), VarId(1)]);
/// builder.add_clique(&[VarId(1), VarId(2)]);
/// builder.add_clique(&[VarId(2), VarId(3)]);
/// let tree = builder.build().unwrap();
/// assert_eq!(tree.separators().len(), 2);
/// assert!(tree.has_running_intersection());
///
/// // a 4-cycle of cliques can not be arranged into a junction tree
/// let mut builder = JunctionTreeBuilder::new();
/// builder.add_clique(&[VarId(0), VarId(1)]);
/// builder.add_clique(&[VarId(1), VarId(2)]);
/// builder.add_clique(&[VarId(2), VarId(3)]);
/// builder.add_clique(&[VarId(3), VarId(0)]);
/// assert!(builder.build().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct JunctionTreeBuilder {
    cliques: Vec<Vec<VarId>>,
}

impl JunctionTreeBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder holding the maximal cliques of a triangulation
    pub fn from_triangulation(triangulation: &Triangulation) -> Self {
        JunctionTreeBuilder {
            cliques: triangulation.cliques().to_vec(),
        }
    }

    /// Adds a clique, its variables are sorted and deduplicated
    pub fn add_clique(&mut self, variables: &[VarId]) {
        let mut clique = variables.to_vec();
        clique.sort_unstable();
        clique.dedup();
        self.cliques.push(clique);
    }

    /// Builds a maximum-weight spanning tree over the cliques, the weight of a pair
    /// being the size of its intersection (Kruskal, ties by the lowest pair of indices).
    ///
    /// # Notes
    ///
    /// Only pairs sharing a variable are candidates, they are found through the list
    /// of cliques containing each variable. Components left apart (disconnected parts
    /// of a network) are then chained in the order of their lowest clique with empty
    /// separators. An empty builder yields a tree with a single empty clique.
    pub fn build(self) -> BNResult<JunctionTree> {
        let mut cliques = self.cliques;
        if cliques.is_empty() {
            cliques.push(Vec::new());
        }
        let n = cliques.len();
        let mut containing: BTreeMap<VarId, Vec<usize>> = BTreeMap::new();
        for (index, clique) in cliques.iter().enumerate() {
            for var in clique {
                containing.entry(*var).or_default().push(index);
            }
        }
        let mut pairs = BTreeSet::new();
        for indices in containing.values() {
            for (k, i) in indices.iter().enumerate() {
                for j in &indices[(k + 1)..] {
                    pairs.insert((*i, *j));
                }
            }
        }
        let mut candidates: Vec<(usize, usize, usize)> = pairs
            .into_iter()
            .map(|(i, j)| (intersection(&cliques[i], &cliques[j]).len(), i, j))
            .collect();
        candidates.sort_unstable_by_key(|(weight, i, j)| (Reverse(*weight), *i, *j));
        let mut components = DisjointSets::new(n);
        let mut separators = Vec::with_capacity(n - 1);
        for (_, i, j) in candidates {
            if components.union(i, j) {
                separators.push(Separator {
                    cliques: (i, j),
                    variables: intersection(&cliques[i], &cliques[j]),
                });
                if separators.len() + 1 == n {
                    break;
                }
            }
        }
        // chain the components through their lowest cliques
        let mut linked = vec![false; n];
        let mut previous: Option<usize> = None;
        for clique in 0..n {
            let component = components.find(clique);
            if std::mem::replace(&mut linked[component], true) {
                continue;
            }
            if let Some(last) = previous {
                separators.push(Separator {
                    cliques: (last, clique),
                    variables: Vec::new(),
                });
            }
            previous = Some(clique);
        }
        let tree = root_tree(cliques, separators, 0);
        if let Some(var) = tree.first_running_intersection_violation() {
            return Err(BNError::NonChordalInput(format!(
                "running intersection fails for variable {var}"
            )));
        }
        debug!(
            cliques = tree.len(),
            max_depth = tree.depths.iter().max().copied().unwrap_or(0),
            "junction tree built"
        );
        Ok(tree)
    }
}

fn root_tree(cliques: Vec<Vec<VarId>>, separators: Vec<Separator>, root: usize) -> JunctionTree {
    let n = cliques.len();
    let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
    for (index, separator) in separators.iter().enumerate() {
        let (i, j) = separator.cliques;
        adjacency[i].push((j, index));
        adjacency[j].push((i, index));
    }
    for neighbors in &mut adjacency {
        neighbors.sort_unstable();
    }
    let mut parents = vec![None; n];
    let mut parent_separators = vec![Vec::new(); n];
    let mut children = vec![Vec::new(); n];
    let mut depths = vec![0; n];
    let mut visited = vec![false; n];
    let mut preorder = Vec::with_capacity(n);
    let mut queue = VecDeque::from([root]);
    visited[root] = true;
    while let Some(clique) = queue.pop_front() {
        preorder.push(clique);
        for (neighbor, separator) in &adjacency[clique] {
            if !visited[*neighbor] {
                visited[*neighbor] = true;
                parents[*neighbor] = Some(clique);
                parent_separators[*neighbor] = separators[*separator].variables.clone();
                depths[*neighbor] = depths[clique] + 1;
                children[clique].push(*neighbor);
                queue.push_back(*neighbor);
            }
        }
    }
    let variables_number = cliques
        .iter()
        .flat_map(|c| c.iter())
        .map(|v| v.index() + 1)
        .max()
        .unwrap_or(0);
    let mut containing = vec![Vec::new(); variables_number];
    for (index, clique) in cliques.iter().enumerate() {
        for var in clique {
            containing[var.index()].push(index);
        }
    }
    let homes = containing
        .iter()
        .map(|indices| {
            indices
                .iter()
                .copied()
                .min_by_key(|c| (cliques[*c].len(), *c))
        })
        .collect();
    JunctionTree {
        cliques,
        separators,
        root,
        parents,
        parent_separators,
        children,
        depths,
        preorder,
        containing,
        homes,
        families: Vec::new(),
        assigned: Vec::new(),
    }
}

// ------------------------------------------------------------------------------------------

#[derive(Debug)]
struct DisjointSets {
    parents: Vec<usize>,
    ranks: Vec<u8>,
}

impl DisjointSets {
    fn new(size: usize) -> Self {
        DisjointSets {
            parents: (0..size).collect(),
            ranks: vec![0; size],
        }
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parents[node] != node {
            self.parents[node] = self.parents[self.parents[node]];
            node = self.parents[node];
        }
        node
    }

    /// Joins two sets, returns `false` if they were already joined
    fn union(&mut self, lhs: usize, rhs: usize) -> bool {
        let (lhs, rhs) = (self.find(lhs), self.find(rhs));
        if lhs == rhs {
            return false;
        }
        match self.ranks[lhs].cmp(&self.ranks[rhs]) {
            std::cmp::Ordering::Less => self.parents[lhs] = rhs,
            std::cmp::Ordering::Greater => self.parents[rhs] = lhs,
            std::cmp::Ordering::Equal => {
                self.parents[rhs] = lhs;
                self.ranks[lhs] += 1;
            }
        }
        true
    }
}
