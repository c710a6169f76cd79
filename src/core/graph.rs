use crate::core::{BayesianNetwork, VarId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A simple undirected graph over variables, vertices are `VarId(0)..VarId(n)`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndirectedGraph {
    adjacency: Vec<BTreeSet<VarId>>,
}

impl UndirectedGraph {
    /// Creates a graph with `vertices_number` isolated vertices
    #[inline]
    pub fn new(vertices_number: usize) -> Self {
        UndirectedGraph {
            adjacency: vec![BTreeSet::new(); vertices_number],
        }
    }

    #[inline]
    pub fn vertices_number(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edges_number(&self) -> usize {
        self.adjacency.iter().map(|n| n.len()).sum::<usize>() / 2
    }

    /// Adds an edge, returns `false` if it was already present or is a loop
    pub fn add_edge(&mut self, lhs: VarId, rhs: VarId) -> bool {
        if lhs == rhs {
            return false;
        }
        let inserted = self.adjacency[lhs.index()].insert(rhs);
        self.adjacency[rhs.index()].insert(lhs);
        inserted
    }

    /// Disconnects a vertex from all its neighbours
    pub(crate) fn isolate(&mut self, vertex: VarId) {
        let neighbors = std::mem::take(&mut self.adjacency[vertex.index()]);
        for neighbor in neighbors {
            self.adjacency[neighbor.index()].remove(&vertex);
        }
    }

    #[inline]
    pub fn contains_edge(&self, lhs: VarId, rhs: VarId) -> bool {
        self.adjacency
            .get(lhs.index())
            .is_some_and(|n| n.contains(&rhs))
    }

    #[inline]
    pub fn neighbors(&self, vertex: VarId) -> &BTreeSet<VarId> {
        &self.adjacency[vertex.index()]
    }

    #[inline]
    pub fn degree(&self, vertex: VarId) -> usize {
        self.adjacency[vertex.index()].len()
    }

    /// All edges as ordered pairs `(lhs, rhs)` with `lhs < rhs`
    pub fn edges(&self) -> Vec<(VarId, VarId)> {
        let mut edges = Vec::with_capacity(self.edges_number());
        for (i, neighbors) in self.adjacency.iter().enumerate() {
            for j in neighbors.range(VarId(i + 1)..) {
                edges.push((VarId(i), *j));
            }
        }
        edges
    }

    /// Checks whether every cycle of length at least 4 has a chord.
    ///
    /// # Notes
    ///
    /// A maximum cardinality search produces an order whose reverse is a perfect
    /// elimination ordering if and only if the graph is chordal (Tarjan & Yannakakis).
    pub fn is_chordal(&self) -> bool {
        let n = self.vertices_number();
        let mut weight = vec![0usize; n];
        let mut numbered = vec![false; n];
        let mut position = vec![0usize; n];
        let mut order = Vec::with_capacity(n);
        for step in 0..n {
            let next = (0..n)
                .filter(|v| !numbered[*v])
                .max_by_key(|v| (weight[*v], std::cmp::Reverse(*v)));
            let Some(vertex) = next else { break };
            numbered[vertex] = true;
            position[vertex] = step;
            order.push(VarId(vertex));
            for neighbor in &self.adjacency[vertex] {
                if !numbered[neighbor.index()] {
                    weight[neighbor.index()] += 1;
                }
            }
        }
        // For every vertex its neighbours numbered earlier must form a clique;
        // it suffices to check them against the latest of them.
        for vertex in &order {
            let earlier: Vec<VarId> = self.adjacency[vertex.index()]
                .iter()
                .filter(|u| position[u.index()] < position[vertex.index()])
                .copied()
                .collect();
            let Some(latest) = earlier.iter().max_by_key(|u| position[u.index()]) else {
                continue;
            };
            for other in earlier.iter().filter(|u| *u != latest) {
                if !self.contains_edge(*latest, *other) {
                    return false;
                }
            }
        }
        true
    }
}

/// Moralizes a network: drops directions of its edges and
/// connects ("marries") every pair of parents sharing a child
///
/// # Example
///
/// ```
/// use jtree::core::{moralize, BayesianNetwork};
///
/// let mut bn = BayesianNetwork::new();
/// let a = bn.add_variable("a", 2).unwrap();
/// let b = bn.add_variable("b", 2).unwrap();
/// let c = bn.add_variable("c", 2).unwrap();
/// bn.add_edge(a, c).unwrap();
/// bn.add_edge(b, c).unwrap();
/// let moral = moralize(&bn);
/// assert!(moral.contains_edge(a, b));
/// assert_eq!(moral.edges_number(), 3);
/// ```
pub fn moralize(network: &BayesianNetwork) -> UndirectedGraph {
    let mut graph = UndirectedGraph::new(network.len());
    for child in network.ids() {
        let parents = network.parents(child);
        for (i, parent) in parents.iter().enumerate() {
            graph.add_edge(*parent, child);
            for other in &parents[(i + 1)..] {
                graph.add_edge(*parent, *other);
            }
        }
    }
    graph
}
