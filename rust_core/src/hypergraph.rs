//! Measurement scenarios as hypergraphs and their Foulis–Randall product.
//!
//! A scenario's vertices are (outcome, setting) pairs and each hyperedge is
//! one measurement context: the outcomes that can occur together. The
//! Foulis–Randall product of two scenarios describes joint measurements on
//! two parties; its hyperedges are exactly the sets on which a no-signalling
//! joint distribution must sum to one.

use std::collections::{BTreeSet, HashMap};

/// An outcome of one party's measurement under a given setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vertex {
    pub outcome: usize,
    pub setting: usize,
}

/// A vertex of the product scenario: outcomes `a`, `b` under settings `x`, `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JointVertex {
    pub a: usize,
    pub b: usize,
    pub x: usize,
    pub y: usize,
}

impl JointVertex {
    pub fn new(a: usize, b: usize, x: usize, y: usize) -> Self {
        Self { a, b, x, y }
    }

    fn from_pair(alice: Vertex, bob: Vertex) -> Self {
        Self {
            a: alice.outcome,
            b: bob.outcome,
            x: alice.setting,
            y: bob.setting,
        }
    }
}

/// One party's measurement scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub edges: Vec<Vec<Vertex>>,
}

impl Scenario {
    /// Two-outcome measurements, one edge per setting.
    pub fn binary(settings: usize) -> Self {
        let edges = (0..settings)
            .map(|setting| {
                (0..2)
                    .map(|outcome| Vertex { outcome, setting })
                    .collect()
            })
            .collect();
        Self { edges }
    }
}

type Edge = BTreeSet<JointVertex>;

/// Hyperedges of a Foulis–Randall product with a vertex incidence index.
#[derive(Debug, Clone)]
pub struct ProductHypergraph {
    edges: Vec<Vec<JointVertex>>,
    incidence: HashMap<JointVertex, Vec<usize>>,
}

impl ProductHypergraph {
    fn from_edges(edges: Vec<Edge>) -> Self {
        let mut incidence: HashMap<JointVertex, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            for v in edge {
                incidence.entry(*v).or_default().push(idx);
            }
        }
        Self {
            edges: edges.into_iter().map(|e| e.into_iter().collect()).collect(),
            incidence,
        }
    }

    pub fn edges(&self) -> &[Vec<JointVertex>] {
        &self.edges
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Indices of the hyperedges containing `v` (empty for unknown vertices).
    pub fn hyperedges_of(&self, v: &JointVertex) -> &[usize] {
        self.incidence.get(v).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn degree(&self, v: &JointVertex) -> usize {
        self.hyperedges_of(v).len()
    }

    /// All vertices, sorted.
    pub fn vertices(&self) -> Vec<JointVertex> {
        let mut vs: Vec<JointVertex> = self.incidence.keys().copied().collect();
        vs.sort();
        vs
    }
}

/// Build the Foulis–Randall product of two scenarios.
///
/// The hyperedges are the products `e_A × e_B`, followed by the edges where
/// one party's outcome decides which context the other party measures:
/// `⋃_{v ∈ e} {v} × f(v)` for every edge `e` of one party and every map `f`
/// from `e` to the other party's edges. Maps that reproduce a product edge,
/// and repeated sets, are skipped.
pub fn foulis_randall_product(alice: &Scenario, bob: &Scenario) -> ProductHypergraph {
    let mut edges: Vec<Edge> = Vec::new();

    for ea in &alice.edges {
        for eb in &bob.edges {
            let edge = ea
                .iter()
                .flat_map(|&va| eb.iter().map(move |&vb| JointVertex::from_pair(va, vb)))
                .collect();
            push_unique(&mut edges, edge);
        }
    }

    // Alice's outcome selects Bob's context.
    for ea in &alice.edges {
        for choice in maps(ea.len(), bob.edges.len()) {
            if is_constant(&choice) {
                continue;
            }
            let edge = ea
                .iter()
                .zip(&choice)
                .flat_map(|(&va, &k)| {
                    bob.edges[k]
                        .iter()
                        .map(move |&vb| JointVertex::from_pair(va, vb))
                })
                .collect();
            push_unique(&mut edges, edge);
        }
    }

    // Bob's outcome selects Alice's context.
    for eb in &bob.edges {
        for choice in maps(eb.len(), alice.edges.len()) {
            if is_constant(&choice) {
                continue;
            }
            let edge = eb
                .iter()
                .zip(&choice)
                .flat_map(|(&vb, &k)| {
                    alice.edges[k]
                        .iter()
                        .map(move |&va| JointVertex::from_pair(va, vb))
                })
                .collect();
            push_unique(&mut edges, edge);
        }
    }

    ProductHypergraph::from_edges(edges)
}

/// The CHSH scenario: two parties, two binary measurements each.
pub fn chsh_product() -> ProductHypergraph {
    foulis_randall_product(&Scenario::binary(2), &Scenario::binary(2))
}

fn push_unique(edges: &mut Vec<Edge>, edge: Edge) {
    if !edges.contains(&edge) {
        edges.push(edge);
    }
}

/// Every map from a domain of size `len` into `0..range`, as index vectors.
fn maps(len: usize, range: usize) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::with_capacity(len)];
    for _ in 0..len {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..range).map(move |k| {
                    let mut next = prefix.clone();
                    next.push(k);
                    next
                })
            })
            .collect();
    }
    out
}

fn is_constant(choice: &[usize]) -> bool {
    choice.windows(2).all(|w| w[0] == w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chsh_product_shape() {
        let h = chsh_product();
        assert_eq!(h.num_edges(), 12);
        assert!(h.edges().iter().all(|e| e.len() == 4));

        let vertices = h.vertices();
        assert_eq!(vertices.len(), 16);
        for v in &vertices {
            assert_eq!(h.degree(v), 3, "vertex {:?}", v);
        }
    }

    #[test]
    fn test_first_edges_are_contexts() {
        let h = chsh_product();
        // Product edges come first, one per (x, y) context.
        for (idx, (x, y)) in [(0, 0), (0, 1), (1, 0), (1, 1)].into_iter().enumerate() {
            let edge = &h.edges()[idx];
            assert!(edge.iter().all(|v| v.x == x && v.y == y));
        }
    }

    #[test]
    fn test_signalling_edges_mix_contexts() {
        let h = chsh_product();
        // Alice measuring x = 0: outcome 0 pairs with Bob's y = 0 context,
        // outcome 1 with y = 1.
        let expected: Vec<JointVertex> = vec![
            JointVertex::new(0, 0, 0, 0),
            JointVertex::new(0, 1, 0, 0),
            JointVertex::new(1, 0, 0, 1),
            JointVertex::new(1, 1, 0, 1),
        ];
        assert!(h.edges().iter().any(|e| *e == expected));
    }

    #[test]
    fn test_unknown_vertex_has_no_edges() {
        let h = chsh_product();
        assert!(h.hyperedges_of(&JointVertex::new(0, 0, 5, 0)).is_empty());
    }

    #[test]
    fn test_three_setting_product() {
        // 2 settings x 3 settings: 6 product edges, 2 * (3^2 - 3) edges from
        // Alice's side and 3 * (2^2 - 2) from Bob's.
        let h = foulis_randall_product(&Scenario::binary(2), &Scenario::binary(3));
        assert_eq!(h.num_edges(), 6 + 12 + 6);
    }
}
