//! A cache for the reachability sets of CFG nodes.

/// Packed bit matrix holding the transitive closure of the announced edges.
///
/// Row `i` stores, one bit per node, every node reachable from `i` in the
/// direction edges are announced. The graph layer announces CFG edges
/// reversed, so for the engine a set bit reads "reachable by walking
/// predecessors". Lookups are a single bit test; inserting an edge costs
/// `O(N * N/64)` words.
#[derive(Debug, Default)]
pub(crate) struct ReachabilityMatrix {
    rows: Vec<Vec<u64>>,
    num_nodes: usize,
    row_words: usize,
}

#[inline]
fn node_bit(node: usize) -> u64 {
    1 << (node & 63)
}

impl ReachabilityMatrix {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a single node, growing the matrix by one row and one column,
    /// and returns its index. Every node reaches itself.
    pub(crate) fn add_node(&mut self) -> usize {
        let node = self.num_nodes;
        self.num_nodes += 1;
        self.row_words = self.num_nodes.div_ceil(64);
        for row in &mut self.rows {
            row.resize(self.row_words, 0);
        }
        let mut row = vec![0; self.row_words];
        row[node / 64] = node_bit(node);
        self.rows.push(row);
        node
    }

    /// Records that `src` and `dst` are now connected and updates the
    /// closure: every node already reaching `src` also reaches everything
    /// `dst` reaches.
    pub(crate) fn add_connection(&mut self, src: usize, dst: usize) {
        let src_bit = node_bit(src);
        let src_word = src / 64;
        let dst_row = self.rows[dst].clone();
        for row in &mut self.rows {
            if row[src_word] & src_bit != 0 {
                for (word, dst_word) in row.iter_mut().zip(&dst_row) {
                    *word |= dst_word;
                }
            }
        }
    }

    pub(crate) fn is_reachable(&self, src: usize, dst: usize) -> bool {
        self.rows[src][dst / 64] & node_bit(dst) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_nodes_reach_themselves() {
        let mut matrix = ReachabilityMatrix::new();
        for _ in 0..10 {
            matrix.add_node();
        }
        for i in 0..10 {
            assert!(matrix.is_reachable(i, i));
            for j in 0..10 {
                if i != j {
                    assert!(!matrix.is_reachable(i, j));
                }
            }
        }
    }

    #[test]
    fn test_incremental_closure() {
        // Mirrors the construction order the graph layer uses: connections
        // arrive one at a time and the closure must stay consistent.
        let mut matrix = ReachabilityMatrix::new();
        for _ in 0..201 {
            matrix.add_node();
        }
        assert!(matrix.is_reachable(1, 1));
        matrix.add_connection(1, 1);
        assert!(matrix.is_reachable(1, 1));
        matrix.add_connection(2, 1);
        assert!(matrix.is_reachable(2, 1));
        assert!(!matrix.is_reachable(1, 2));
        matrix.add_connection(1, 4);
        assert!(matrix.is_reachable(1, 4));
        assert!(matrix.is_reachable(2, 4));
        assert!(!matrix.is_reachable(4, 2));
        assert!(!matrix.is_reachable(4, 1));
        // Span several 64-bit words.
        matrix.add_connection(1, 22);
        matrix.add_connection(22, 200);
        assert!(matrix.is_reachable(2, 200));
        assert!(matrix.is_reachable(1, 200));
        assert!(matrix.is_reachable(22, 200));
        assert!(matrix.is_reachable(1, 22));
        assert!(matrix.is_reachable(2, 22));
        assert!(!matrix.is_reachable(1, 5));
        assert!(!matrix.is_reachable(5, 1));
        assert!(!matrix.is_reachable(22, 4));
        assert!(!matrix.is_reachable(4, 22));
        assert!(!matrix.is_reachable(4, 200));
        assert!(!matrix.is_reachable(200, 4));
    }

    #[test]
    fn test_connection_added_before_target_grows() {
        // Nodes added after a connection must not inherit stale bits.
        let mut matrix = ReachabilityMatrix::new();
        matrix.add_node();
        matrix.add_node();
        matrix.add_connection(0, 1);
        let late = matrix.add_node();
        assert!(matrix.is_reachable(0, 1));
        assert!(!matrix.is_reachable(0, late));
        assert!(!matrix.is_reachable(late, 0));
    }

    fn naive_reachable(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<bool>> {
        let mut closure = vec![vec![false; n]; n];
        for (i, row) in closure.iter_mut().enumerate() {
            row[i] = true;
        }
        // Floyd-Warshall over the edge relation.
        let mut adj = vec![vec![false; n]; n];
        for &(src, dst) in edges {
            adj[src][dst] = true;
        }
        for (row, adj_row) in closure.iter_mut().zip(&adj) {
            for (bit, &edge) in row.iter_mut().zip(adj_row) {
                *bit |= edge;
            }
        }
        for k in 0..n {
            for i in 0..n {
                if closure[i][k] {
                    for j in 0..n {
                        if closure[k][j] {
                            closure[i][j] = true;
                        }
                    }
                }
            }
        }
        closure
    }

    proptest! {
        #[test]
        fn matches_naive_closure(
            n in 1usize..24,
            raw_edges in prop::collection::vec((0usize..24, 0usize..24), 0..48),
        ) {
            let edges: Vec<(usize, usize)> =
                raw_edges.iter().map(|&(a, b)| (a % n, b % n)).collect();
            let mut matrix = ReachabilityMatrix::new();
            for _ in 0..n {
                matrix.add_node();
            }
            for &(src, dst) in &edges {
                // Monotonicity: inserting an edge never clears a bit.
                let before: Vec<(usize, usize)> = (0..n)
                    .flat_map(|i| (0..n).map(move |j| (i, j)))
                    .filter(|&(i, j)| matrix.is_reachable(i, j))
                    .collect();
                matrix.add_connection(src, dst);
                for (i, j) in before {
                    prop_assert!(matrix.is_reachable(i, j));
                }
            }
            let expected = naive_reachable(n, &edges);
            for (i, row) in expected.iter().enumerate() {
                for (j, &reachable) in row.iter().enumerate() {
                    prop_assert_eq!(matrix.is_reachable(i, j), reachable);
                }
            }
        }
    }
}
