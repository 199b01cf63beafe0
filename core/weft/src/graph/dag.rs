use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;

/// A directed graph whose edges go from a dependency to its dependent.
///
/// Iteration orders follow the insertion order, so that every algorithm on the graph
/// is deterministic.
#[derive(Debug, Clone)]
pub struct Dag<N> {
    nodes: IndexMap<N, Adjacency<N>>,
}

#[derive(Debug, Clone)]
struct Adjacency<N> {
    /// Dependents.
    outgoing: IndexSet<N>,
    /// Dependencies.
    incoming: IndexSet<N>,
}

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self { nodes: IndexMap::new() }
    }
}

impl<N> Default for Adjacency<N> {
    fn default() -> Self {
        Self {
            outgoing: IndexSet::new(),
            incoming: IndexSet::new(),
        }
    }
}

impl<N: Clone + Eq + Hash> Dag<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) {
        self.nodes.entry(node).or_default();
    }

    /// Adds an edge `from → to`, meaning that `to` depends on `from`.
    /// Missing nodes are added. Returns `false` if the edge already existed.
    pub fn add_edge(&mut self, from: N, to: N) -> bool {
        let added = self.nodes.entry(from.clone()).or_default().outgoing.insert(to.clone());
        self.nodes.entry(to).or_default().incoming.insert(from);
        added
    }

    /// Removes a node and its edges.
    pub fn remove_node(&mut self, node: &N) {
        if let Some(adj) = self.nodes.shift_remove(node) {
            for dependent in adj.outgoing {
                if let Some(a) = self.nodes.get_mut(&dependent) {
                    a.incoming.shift_remove(node);
                }
            }
            for dependency in adj.incoming {
                if let Some(a) = self.nodes.get_mut(&dependency) {
                    a.outgoing.shift_remove(node);
                }
            }
        }
    }

    pub fn contains(&self, node: &N) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.nodes.keys()
    }

    /// Iterates on every edge `(from, to)`.
    pub fn edges(&self) -> impl Iterator<Item = (&N, &N)> {
        self.nodes
            .iter()
            .flat_map(|(from, adj)| adj.outgoing.iter().map(move |to| (from, to)))
    }

    /// The nodes that `node` depends on.
    pub fn dependencies(&self, node: &N) -> impl Iterator<Item = &N> {
        self.nodes.get(node).into_iter().flat_map(|a| a.incoming.iter())
    }

    /// The nodes that depend on `node`.
    pub fn dependents(&self, node: &N) -> impl Iterator<Item = &N> {
        self.nodes.get(node).into_iter().flat_map(|a| a.outgoing.iter())
    }

    /// Finds the cycles of the graph, with Tarjan's algorithm.
    ///
    /// Each returned cycle is a strongly connected component with more than one node,
    /// or a single node that depends on itself. The nodes of each cycle are in insertion order.
    pub fn cycles(&self) -> Vec<Vec<N>> {
        struct Tarjan<'g, N> {
            dag: &'g Dag<N>,
            index: usize,
            indices: FxHashMap<&'g N, usize>,
            lowlinks: FxHashMap<&'g N, usize>,
            stack: Vec<&'g N>,
            on_stack: FxHashMap<&'g N, bool>,
            components: Vec<Vec<&'g N>>,
        }

        impl<'g, N: Clone + Eq + Hash> Tarjan<'g, N> {
            fn visit(&mut self, v: &'g N) {
                self.indices.insert(v, self.index);
                self.lowlinks.insert(v, self.index);
                self.index += 1;
                self.stack.push(v);
                self.on_stack.insert(v, true);

                let dag = self.dag;
                for w in dag.dependents(v) {
                    if !self.indices.contains_key(w) {
                        self.visit(w);
                        let low = self.lowlinks[v].min(self.lowlinks[w]);
                        self.lowlinks.insert(v, low);
                    } else if self.on_stack.get(w).copied().unwrap_or(false) {
                        let low = self.lowlinks[v].min(self.indices[w]);
                        self.lowlinks.insert(v, low);
                    }
                }

                if self.lowlinks[v] == self.indices[v] {
                    let mut component = Vec::new();
                    while let Some(w) = self.stack.pop() {
                        self.on_stack.insert(w, false);
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    self.components.push(component);
                }
            }
        }

        let mut tarjan = Tarjan {
            dag: self,
            index: 0,
            indices: FxHashMap::default(),
            lowlinks: FxHashMap::default(),
            stack: Vec::new(),
            on_stack: FxHashMap::default(),
            components: Vec::new(),
        };
        for node in self.nodes.keys() {
            if !tarjan.indices.contains_key(node) {
                tarjan.visit(node);
            }
        }

        let mut cycles: Vec<Vec<N>> = tarjan
            .components
            .into_iter()
            .filter(|c| c.len() > 1 || self.dependents(c[0]).any(|d| d == c[0]))
            .map(|c| {
                let mut c: Vec<N> = c.into_iter().cloned().collect();
                c.sort_by_key(|n| self.nodes.get_index_of(n));
                c
            })
            .collect();
        cycles.sort_by_key(|c| self.nodes.get_index_of(&c[0]));
        cycles
    }

    /// Returns the nodes sorted so that every node comes after its dependencies,
    /// or `None` if the graph has a cycle.
    ///
    /// Among the nodes that are ready at the same time, the insertion order is kept.
    pub fn topological_order(&self) -> Option<Vec<N>> {
        let mut remaining: FxHashMap<&N, usize> =
            self.nodes.iter().map(|(n, adj)| (n, adj.incoming.len())).collect();
        let mut ready: std::collections::VecDeque<&N> = self
            .nodes
            .iter()
            .filter(|(_, adj)| adj.incoming.is_empty())
            .map(|(n, _)| n)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(n) = ready.pop_front() {
            order.push(n.clone());
            for dependent in self.dependents(n) {
                let count = remaining.get_mut(dependent)?;
                *count -= 1;
                if *count == 0 {
                    ready.push_back(dependent);
                }
            }
        }
        (order.len() == self.nodes.len()).then_some(order)
    }
}
