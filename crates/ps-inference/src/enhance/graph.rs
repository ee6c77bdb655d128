//! Element neighbourhood structures used by the enhancers.

use ps_core::{Error, Result};

/// Unweighted element adjacency (voxel / vertex neighbours).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacency {
    neighbours: Vec<Vec<usize>>,
}

impl Adjacency {
    /// Build a symmetric adjacency over `num_elements` from undirected edges.
    pub fn from_edges(num_elements: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let mut neighbours = vec![Vec::new(); num_elements];
        for &(a, b) in edges {
            if a >= num_elements || b >= num_elements {
                return Err(Error::Validation(format!(
                    "adjacency edge ({}, {}) out of range for {} elements",
                    a, b, num_elements
                )));
            }
            if a == b {
                continue;
            }
            neighbours[a].push(b);
            neighbours[b].push(a);
        }
        for n in &mut neighbours {
            n.sort_unstable();
            n.dedup();
        }
        Ok(Self { neighbours })
    }

    /// Elements on a line, each adjacent to its predecessor and successor.
    pub fn chain(num_elements: usize) -> Self {
        let neighbours = (0..num_elements)
            .map(|i| {
                let mut n = Vec::with_capacity(2);
                if i > 0 {
                    n.push(i - 1);
                }
                if i + 1 < num_elements {
                    n.push(i + 1);
                }
                n
            })
            .collect();
        Self { neighbours }
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.neighbours.len()
    }

    /// Neighbours of element `i`, ascending.
    pub fn neighbours(&self, i: usize) -> &[usize] {
        &self.neighbours[i]
    }

    /// Sizes of the connected clusters formed by elements whose value exceeds `threshold`.
    ///
    /// Returns the cluster size for every element, 0 for elements below threshold.
    pub fn cluster_sizes(&self, values: &[f64], threshold: f64) -> Vec<usize> {
        let n = self.neighbours.len();
        let mut sets = DisjointSets::new(n);
        for i in 0..n {
            if values[i] > threshold {
                for &j in &self.neighbours[i] {
                    if j > i && values[j] > threshold {
                        sets.union(i, j);
                    }
                }
            }
        }
        let mut size = vec![0usize; n];
        for i in (0..n).filter(|&i| values[i] > threshold) {
            let root = sets.find(i);
            size[root] += 1;
        }
        (0..n)
            .map(|i| if values[i] > threshold { size[sets.find(i)] } else { 0 })
            .collect()
    }
}

/// Sparse weighted element-to-element connectivity (fixel–fixel).
///
/// Row `i` lists `(j, w(i,j))`; weights are finite and non-negative.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityMatrix {
    rows: Vec<Vec<(usize, f64)>>,
}

impl ConnectivityMatrix {
    /// Validate per-element rows of `(neighbour, weight)`.
    pub fn new(rows: Vec<Vec<(usize, f64)>>) -> Result<Self> {
        let n = rows.len();
        for (i, row) in rows.iter().enumerate() {
            for &(j, w) in row {
                if j >= n {
                    return Err(Error::Validation(format!(
                        "connectivity entry ({}, {}) out of range for {} elements",
                        i, j, n
                    )));
                }
                if !w.is_finite() || w < 0.0 {
                    return Err(Error::Validation(format!(
                        "connectivity weight ({}, {}) = {} must be finite and non-negative",
                        i, j, w
                    )));
                }
            }
        }
        Ok(Self { rows })
    }

    /// Assemble from `(i, j, w)` triplets; each triplet is mirrored.
    pub fn from_triplets(num_elements: usize, triplets: &[(usize, usize, f64)]) -> Result<Self> {
        let mut rows = vec![Vec::new(); num_elements];
        for &(i, j, w) in triplets {
            if i >= num_elements || j >= num_elements {
                return Err(Error::Validation(format!(
                    "connectivity entry ({}, {}) out of range for {} elements",
                    i, j, num_elements
                )));
            }
            rows[i].push((j, w));
            if i != j {
                rows[j].push((i, w));
            }
        }
        Self::new(rows)
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.rows.len()
    }

    /// Weighted neighbours of element `i`.
    pub fn row(&self, i: usize) -> &[(usize, f64)] {
        &self.rows[i]
    }
}

/// Upper-triangular (diagonal included) edge indexing of a connectome.
///
/// Edge `k` connects `nodes(k) = (a, b)` with `a <= b`, enumerated row by row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeIndex {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
}

impl EdgeIndex {
    /// Index every edge of a `num_nodes`-node connectome.
    pub fn new(num_nodes: usize) -> Self {
        let edges = (0..num_nodes).flat_map(|a| (a..num_nodes).map(move |b| (a, b))).collect();
        Self { num_nodes, edges }
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of edges, `n(n+1)/2`.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Endpoints of edge `k`.
    pub fn nodes(&self, k: usize) -> (usize, usize) {
        self.edges[k]
    }

    /// Edge count of the node component each supra-threshold edge belongs to.
    pub fn component_sizes(&self, values: &[f64], threshold: f64) -> Vec<usize> {
        let mut sets = DisjointSets::new(self.num_nodes);
        for (k, &(a, b)) in self.edges.iter().enumerate() {
            if values[k] > threshold {
                sets.union(a, b);
            }
        }
        let mut edge_count = vec![0usize; self.num_nodes];
        for (k, &(a, _)) in self.edges.iter().enumerate() {
            if values[k] > threshold {
                let root = sets.find(a);
                edge_count[root] += 1;
            }
        }
        self.edges
            .iter()
            .enumerate()
            .map(|(k, &(a, _))| if values[k] > threshold { edge_count[sets.find(a)] } else { 0 })
            .collect()
    }
}

/// Union-find with path halving and union by rank.
struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_clusters() {
        let adj = Adjacency::chain(7);
        let v = [1.0, 2.0, 0.0, 3.0, 3.0, 3.0, -1.0];
        assert_eq!(adj.cluster_sizes(&v, 0.5), vec![2, 2, 0, 3, 3, 3, 0]);
        assert_eq!(adj.cluster_sizes(&v, 2.5), vec![0, 0, 0, 3, 3, 3, 0]);
    }

    #[test]
    fn test_from_edges_validation_and_dedup() {
        let adj = Adjacency::from_edges(3, &[(0, 1), (1, 0), (2, 2)]).unwrap();
        assert_eq!(adj.neighbours(0), &[1]);
        assert!(adj.neighbours(2).is_empty());
        assert!(Adjacency::from_edges(2, &[(0, 2)]).is_err());
    }

    #[test]
    fn test_connectivity_validation() {
        assert!(ConnectivityMatrix::from_triplets(2, &[(0, 1, 0.5)]).is_ok());
        assert!(ConnectivityMatrix::from_triplets(2, &[(0, 1, -0.5)]).is_err());
        assert!(ConnectivityMatrix::from_triplets(2, &[(0, 3, 0.5)]).is_err());
        let m = ConnectivityMatrix::from_triplets(2, &[(0, 1, 0.5), (0, 0, 1.0)]).unwrap();
        assert_eq!(m.row(1), &[(0, 0.5)]);
        assert_eq!(m.row(0).len(), 2);
    }

    #[test]
    fn test_edge_index_components() {
        let idx = EdgeIndex::new(4);
        assert_eq!(idx.num_edges(), 10);
        assert_eq!(idx.nodes(0), (0, 0));
        assert_eq!(idx.nodes(1), (0, 1));
        assert_eq!(idx.nodes(4), (1, 1));
        // Edges 0-1 and 1-2 share node 1; 3-3 is isolated.
        let mut v = vec![0.0; 10];
        let k01 = 1;
        let k12 = (0..10).find(|&k| idx.nodes(k) == (1, 2)).unwrap();
        let k33 = 9;
        v[k01] = 5.0;
        v[k12] = 4.0;
        v[k33] = 3.0;
        let sizes = idx.component_sizes(&v, 1.0);
        assert_eq!(sizes[k01], 2);
        assert_eq!(sizes[k12], 2);
        assert_eq!(sizes[k33], 1);
        assert_eq!(sizes.iter().filter(|&&s| s > 0).count(), 3);
    }
}
