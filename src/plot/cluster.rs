//! Average-linkage (UPGMA) hierarchical clustering on Euclidean distances

/// One agglomeration step
///
/// Nodes `0..n` are leaves; the merge at step k creates node `n + k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

/// Merge tree with its leaf order
#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
    /// Leaves in drawing order
    pub order: Vec<usize>,
}

impl Dendrogram {
    /// Height of the root merge, 0 for fewer than two leaves
    pub fn max_height(&self) -> f64 {
        self.merges.last().map_or(0.0, |m| m.height)
    }

    /// Position of every node along the leaf axis: leaves at their rank in `order`,
    /// internal nodes midway between their children
    pub fn node_positions(&self) -> Vec<f64> {
        let mut positions = vec![0.0; self.n_leaves + self.merges.len()];
        for (rank, &leaf) in self.order.iter().enumerate() {
            positions[leaf] = rank as f64;
        }
        for (k, merge) in self.merges.iter().enumerate() {
            positions[self.n_leaves + k] = 0.5 * (positions[merge.left] + positions[merge.right]);
        }
        positions
    }

    /// Height of every node; leaves sit at 0
    pub fn node_heights(&self) -> Vec<f64> {
        let mut heights = vec![0.0; self.n_leaves];
        heights.extend(self.merges.iter().map(|m| m.height));
        heights
    }
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

/// Cluster the rows of `data`
///
/// Cluster distances are updated with the Lance-Williams rule for average linkage;
/// ties go to the lowest pair of active cluster indices.
pub fn average_linkage(data: &[Vec<f64>]) -> Dendrogram {
    let n = data.len();
    if n < 2 {
        return Dendrogram {
            n_leaves: n,
            merges: Vec::new(),
            order: (0..n).collect(),
        };
    }

    let mut dist = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = euclidean(&data[i], &data[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    // Slot i holds (node id, size) of an active cluster
    let mut active: Vec<Option<(usize, usize)>> = (0..n).map(|i| Some((i, 1))).collect();
    let mut merges = Vec::with_capacity(n - 1);

    for step in 0..(n - 1) {
        let mut best = (f64::INFINITY, 0, 0);
        for i in 0..n {
            if active[i].is_none() {
                continue;
            }
            for j in (i + 1)..n {
                if active[j].is_some() && dist[i][j] < best.0 {
                    best = (dist[i][j], i, j);
                }
            }
        }
        let (height, i, j) = best;
        let (Some((node_i, size_i)), Some((node_j, size_j))) = (active[i], active[j]) else {
            break;
        };

        for k in 0..n {
            if k != i && k != j && active[k].is_some() {
                let d = (size_i as f64 * dist[k][i] + size_j as f64 * dist[k][j]) / (size_i + size_j) as f64;
                dist[i][k] = d;
                dist[k][i] = d;
            }
        }

        let size = size_i + size_j;
        merges.push(Merge {
            left: node_i,
            right: node_j,
            height: if height.is_finite() { height } else { 0.0 },
            size,
        });
        active[i] = Some((n + step, size));
        active[j] = None;
    }

    let order = leaf_order(n, &merges);
    Dendrogram { n_leaves: n, merges, order }
}

/// Leaves of the tree, left subtree first
fn leaf_order(n_leaves: usize, merges: &[Merge]) -> Vec<usize> {
    let Some(root) = (n_leaves + merges.len()).checked_sub(1) else {
        return Vec::new();
    };
    let mut order = Vec::with_capacity(n_leaves);
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node < n_leaves {
            order.push(node);
        } else {
            let merge = merges[node - n_leaves];
            stack.push(merge.right);
            stack.push(merge.left);
        }
    }
    order
}
