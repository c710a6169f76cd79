use crate::core::{UndirectedGraph, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

// ------------------------------------------------------------------------------------------

/// Result of a triangulation: an elimination order, the maximal cliques
/// it induces and the chordal graph obtained by adding fill-in edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triangulation {
    order: Vec<VarId>,
    cliques: Vec<Vec<VarId>>,
    fill_in: Vec<(VarId, VarId)>,
    chordal: UndirectedGraph,
    cardinalities: Vec<usize>,
}

impl Triangulation {
    /// Elimination order
    #[inline]
    pub fn order(&self) -> &[VarId] {
        &self.order
    }

    /// Maximal cliques in order of creation, each one is sorted
    #[inline]
    pub fn cliques(&self) -> &[Vec<VarId>] {
        &self.cliques
    }

    /// Edges added during elimination
    #[inline]
    pub fn fill_in(&self) -> &[(VarId, VarId)] {
        &self.fill_in
    }

    /// Moral graph together with fill-in edges
    #[inline]
    pub fn chordal_graph(&self) -> &UndirectedGraph {
        &self.chordal
    }

    /// Number of entries of a clique table
    pub fn table_size(&self, clique: &[VarId]) -> usize {
        clique
            .iter()
            .fold(1usize, |acc, v| acc.saturating_mul(self.cardinalities[v.index()]))
    }

    /// Total number of entries of all clique tables. Exact inference is
    /// exponential in the clique sizes, this number lets a caller refuse
    /// a network before any table is allocated.
    pub fn estimated_table_size(&self) -> usize {
        self.cliques
            .iter()
            .fold(0usize, |acc, c| acc.saturating_add(self.table_size(c)))
    }

    /// Size of the largest clique minus one
    pub fn treewidth(&self) -> usize {
        self.cliques
            .iter()
            .map(|c| c.len())
            .max()
            .unwrap_or(1)
            .saturating_sub(1)
    }
}

// ------------------------------------------------------------------------------------------

/// Triangulates an undirected graph by the elimination game with the min-fill heuristic
///
/// # Notes
///
/// At every step the remaining vertex with the fewest fill-in edges is eliminated,
/// ties are broken by the smallest resulting clique (number of vertices) and then
/// by the lowest identifier, so the result is reproducible.
///
/// # Example
///
/// ```
/// use jtree::core::{Triangulator, UndirectedGraph, VarId};
///
/// // a 4-cycle a - b - c - d - a needs one chord
/// let mut graph = UndirectedGraph::new(4);
/// for (lhs, rhs) in [(0, 1), (1, 2), (2, 3), (3, 0)] {
///     graph.add_edge(VarId(lhs), VarId(rhs));
/// }
/// let triangulation = Triangulator::new(&graph, &[2, 2, 2, 2]).triangulate();
/// assert_eq!(triangulation.fill_in().len(), 1);
/// assert_eq!(triangulation.cliques().len(), 2);
/// assert!(triangulation.chordal_graph().is_chordal());
/// assert_eq!(triangulation.estimated_table_size(), 16);
/// ```
#[derive(Debug, Clone)]
pub struct Triangulator<'a> {
    graph: &'a UndirectedGraph,
    cardinalities: &'a [usize],
}

impl<'a> Triangulator<'a> {
    /// # Arguments
    ///
    /// * `graph` - A moral graph
    /// * `cardinalities` - Cardinalities of the vertices indexed by [`VarId`]
    #[inline]
    pub fn new(graph: &'a UndirectedGraph, cardinalities: &'a [usize]) -> Self {
        Triangulator {
            graph,
            cardinalities,
        }
    }

    pub fn triangulate(&self) -> Triangulation {
        let n = self.graph.vertices_number();
        let mut work = self.graph.clone();
        let mut chordal = self.graph.clone();
        let mut keys: Vec<EliminationKey> =
            (0..n).map(|v| elimination_key(&work, VarId(v))).collect();
        let mut queue: BTreeSet<EliminationKey> = keys.iter().copied().collect();
        let mut order = Vec::with_capacity(n);
        let mut fill_in = Vec::new();
        let mut later_neighbors: Vec<Vec<VarId>> = Vec::with_capacity(n);
        while let Some((_, _, vertex)) = queue.pop_first() {
            let neighbors: Vec<VarId> = work.neighbors(vertex).iter().copied().collect();
            for (i, lhs) in neighbors.iter().enumerate() {
                for rhs in &neighbors[(i + 1)..] {
                    if work.add_edge(*lhs, *rhs) {
                        chordal.add_edge(*lhs, *rhs);
                        fill_in.push((*lhs, *rhs));
                    }
                }
            }
            work.isolate(vertex);
            order.push(vertex);
            // only the neighbours and their neighbours see their fill-in or degree change
            let mut touched: BTreeSet<VarId> = neighbors.iter().copied().collect();
            for neighbor in &neighbors {
                touched.extend(work.neighbors(*neighbor).iter().copied());
            }
            for var in touched {
                queue.remove(&keys[var.index()]);
                keys[var.index()] = elimination_key(&work, var);
                queue.insert(keys[var.index()]);
            }
            later_neighbors.push(neighbors);
        }
        let cliques = maximal_cliques(&order, later_neighbors);
        let triangulation = Triangulation {
            order,
            cliques,
            fill_in,
            chordal,
            cardinalities: self.cardinalities.to_vec(),
        };
        debug!(
            vertices = n,
            fill_in = triangulation.fill_in.len(),
            cliques = triangulation.cliques.len(),
            treewidth = triangulation.treewidth(),
            table_size = triangulation.estimated_table_size(),
            "graph triangulated"
        );
        triangulation
    }
}

/// Fill-in, size of the resulting clique and the vertex itself: the smallest key
/// is eliminated next
type EliminationKey = (usize, usize, VarId);

#[inline]
fn elimination_key(graph: &UndirectedGraph, vertex: VarId) -> EliminationKey {
    (fill_in_count(graph, vertex), graph.degree(vertex) + 1, vertex)
}

/// Number of edges needed to make the neighbours of a vertex a clique
fn fill_in_count(graph: &UndirectedGraph, vertex: VarId) -> usize {
    let neighbors: Vec<VarId> = graph.neighbors(vertex).iter().copied().collect();
    let mut count = 0;
    for (i, lhs) in neighbors.iter().enumerate() {
        for rhs in &neighbors[(i + 1)..] {
            if !graph.contains_edge(*lhs, *rhs) {
                count += 1;
            }
        }
    }
    count
}

/// Keeps the cliques `{v} ∪ later neighbours of v` that are maximal, in elimination order.
///
/// # Notes
///
/// The clique of `v` is contained in another one iff some vertex `u` eliminated
/// before `v` has `v` as its first eliminated later neighbour and exactly one later
/// neighbour more than `v` (Rose, Tarjan & Lueker). This needs a single pass
/// instead of pairwise inclusion tests.
fn maximal_cliques(order: &[VarId], later_neighbors: Vec<Vec<VarId>>) -> Vec<Vec<VarId>> {
    let mut position = vec![0usize; order.len()];
    for (step, vertex) in order.iter().enumerate() {
        position[vertex.index()] = step;
    }
    let mut absorbed = vec![false; order.len()];
    for neighbors in &later_neighbors {
        if let Some(first) = neighbors.iter().min_by_key(|v| position[v.index()]) {
            let step = position[first.index()];
            if neighbors.len() == later_neighbors[step].len() + 1 {
                absorbed[step] = true;
            }
        }
    }
    order
        .iter()
        .zip(later_neighbors)
        .zip(absorbed)
        .filter(|(_, dropped)| !dropped)
        .map(|((vertex, mut clique), _)| {
            clique.push(*vertex);
            clique.sort_unstable();
            clique
        })
        .collect()
}
