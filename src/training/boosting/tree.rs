//! Regression trees fitted to gradient statistics
//!
//! Two growth policies share one split finder:
//! - depth-wise: recurse until `max_depth` (XGBoost style)
//! - leaf-wise: always expand the leaf with the largest gain until
//!   `max_leaves` is reached (LightGBM style)

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A single node of a boosted tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf { value: f64 },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split { feature, threshold, left, right } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Add one to `counts[feature]` for every split on that feature
    pub fn count_splits(&self, counts: &mut [f64]) {
        if let TreeNode::Split { feature, left, right, .. } = self {
            if let Some(c) = counts.get_mut(*feature) {
                *c += 1.0;
            }
            left.count_splits(counts);
            right.count_splits(counts);
        }
    }
}

/// Regularization and size constraints applied while growing a tree
#[derive(Debug, Clone, Copy)]
pub struct SplitParams {
    /// L2 penalty on leaf weights
    pub reg_lambda: f64,
    /// L1 penalty on leaf weights
    pub reg_alpha: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// Minimum number of rows in each child
    pub min_samples_leaf: usize,
    /// Minimum gain required to split
    pub min_split_gain: f64,
}

/// Gradient statistics of the rows reaching a node
struct GradStats<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
}

impl GradStats<'_> {
    fn sums(&self, indices: &[usize]) -> (f64, f64) {
        indices
            .iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }
}

/// Soft-threshold `g` by the L1 penalty
fn threshold_l1(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

/// Optimal leaf weight `-T(G) / (H + lambda)`
pub fn leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    let denom = h_sum + lambda;
    if denom <= 0.0 {
        return 0.0;
    }
    -threshold_l1(g_sum, alpha) / denom
}

fn structure_score(g: f64, h: f64, params: &SplitParams) -> f64 {
    let g = threshold_l1(g, params.reg_alpha);
    g * g / (h + params.reg_lambda)
}

/// Best split of one node
#[derive(Debug, Clone)]
pub struct SplitCandidate {
    pub feature: usize,
    pub threshold: f64,
    pub gain: f64,
    pub left: Vec<usize>,
    pub right: Vec<usize>,
}

fn best_split_for_feature(
    x: &Array2<f64>,
    stats: &GradStats<'_>,
    indices: &[usize],
    feature: usize,
    params: &SplitParams,
) -> Option<(f64, f64, usize, Vec<usize>)> {
    let mut sorted = indices.to_vec();
    sorted.sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

    let (g_total, h_total) = stats.sums(&sorted);
    let parent = structure_score(g_total, h_total, params);

    let mut g_left = 0.0;
    let mut h_left = 0.0;
    let mut best: Option<(f64, f64, usize)> = None;

    for pos in 0..sorted.len().saturating_sub(1) {
        let idx = sorted[pos];
        g_left += stats.grad[idx];
        h_left += stats.hess[idx];

        let value = x[[idx, feature]];
        let next_value = x[[sorted[pos + 1], feature]];
        // No threshold separates equal values
        if value == next_value {
            continue;
        }

        let n_left = pos + 1;
        if n_left < params.min_samples_leaf || sorted.len() - n_left < params.min_samples_leaf {
            continue;
        }

        let g_right = g_total - g_left;
        let h_right = h_total - h_left;
        if h_left < params.min_child_weight || h_right < params.min_child_weight {
            continue;
        }

        let gain = 0.5 * (structure_score(g_left, h_left, params) + structure_score(g_right, h_right, params) - parent);
        if best.map_or(true, |(g, _, _)| gain > g) {
            best = Some((gain, (value + next_value) / 2.0, n_left));
        }
    }

    best.map(|(gain, threshold, n_left)| (gain, threshold, n_left, sorted))
}

/// Find the best split of `indices` over `features`, searching features in parallel.
pub fn best_split(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    features: &[usize],
    params: &SplitParams,
) -> Option<SplitCandidate> {
    if indices.len() < 2 * params.min_samples_leaf.max(1) {
        return None;
    }
    let stats = GradStats { grad, hess };

    let best = features
        .par_iter()
        .filter_map(|&f| best_split_for_feature(x, &stats, indices, f, params).map(|r| (f, r)))
        // Ties go to the lower feature index so results do not depend on thread scheduling
        .max_by(|(fa, a), (fb, b)| a.0.total_cmp(&b.0).then_with(|| fb.cmp(fa)));

    match best {
        Some((feature, (gain, threshold, n_left, mut sorted))) if gain > params.min_split_gain.max(0.0) => {
            let right = sorted.split_off(n_left);
            Some(SplitCandidate {
                feature,
                threshold,
                gain,
                left: sorted,
                right,
            })
        }
        _ => None,
    }
}

fn make_leaf(stats: &GradStats<'_>, indices: &[usize], params: &SplitParams) -> TreeNode {
    let (g, h) = stats.sums(indices);
    TreeNode::Leaf {
        value: leaf_weight(g, h, params.reg_lambda, params.reg_alpha),
    }
}

/// Grow a tree level by level up to `max_depth`.
pub fn grow_depthwise(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    features: &[usize],
    max_depth: usize,
    params: &SplitParams,
) -> TreeNode {
    let stats = GradStats { grad, hess };
    grow_depthwise_inner(x, &stats, indices, features, 0, max_depth, params)
}

fn grow_depthwise_inner(
    x: &Array2<f64>,
    stats: &GradStats<'_>,
    indices: &[usize],
    features: &[usize],
    depth: usize,
    max_depth: usize,
    params: &SplitParams,
) -> TreeNode {
    if depth >= max_depth {
        return make_leaf(stats, indices, params);
    }
    match best_split(x, stats.grad, stats.hess, indices, features, params) {
        Some(split) => TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(grow_depthwise_inner(x, stats, &split.left, features, depth + 1, max_depth, params)),
            right: Box::new(grow_depthwise_inner(x, stats, &split.right, features, depth + 1, max_depth, params)),
        },
        None => make_leaf(stats, indices, params),
    }
}

struct PendingSplit {
    node_id: usize,
    split: SplitCandidate,
}

impl PartialEq for PendingSplit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PendingSplit {}

impl PartialOrd for PendingSplit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingSplit {
    fn cmp(&self, other: &Self) -> Ordering {
        // Equal gains expand the older node first
        self.split
            .gain
            .total_cmp(&other.split.gain)
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

enum NodeSlot {
    Leaf(Vec<usize>),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Grow a tree best-first until it has `max_leaves` leaves or no split gains.
pub fn grow_leafwise(
    x: &Array2<f64>,
    grad: &[f64],
    hess: &[f64],
    indices: &[usize],
    features: &[usize],
    max_leaves: usize,
    max_depth: Option<usize>,
    params: &SplitParams,
) -> TreeNode {
    let stats = GradStats { grad, hess };
    let depth_limit = max_depth.unwrap_or(usize::MAX);

    let mut nodes = vec![NodeSlot::Leaf(indices.to_vec())];
    let mut depths = vec![0usize];
    let mut heap = BinaryHeap::new();

    if depth_limit > 0 {
        if let Some(split) = best_split(x, grad, hess, indices, features, params) {
            heap.push(PendingSplit { node_id: 0, split });
        }
    }

    let mut n_leaves = 1;
    while n_leaves < max_leaves.max(1) {
        let Some(PendingSplit { node_id, split }) = heap.pop() else {
            break;
        };

        let child_depth = depths[node_id] + 1;
        let left_id = nodes.len();
        let right_id = left_id + 1;

        for (child_id, child_rows) in [(left_id, &split.left), (right_id, &split.right)] {
            if child_depth < depth_limit {
                if let Some(child_split) = best_split(x, grad, hess, child_rows, features, params) {
                    heap.push(PendingSplit {
                        node_id: child_id,
                        split: child_split,
                    });
                }
            }
        }

        nodes.push(NodeSlot::Leaf(split.left));
        nodes.push(NodeSlot::Leaf(split.right));
        depths.push(child_depth);
        depths.push(child_depth);
        nodes[node_id] = NodeSlot::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        n_leaves += 1;
    }

    fn to_node(nodes: &[NodeSlot], idx: usize, stats: &GradStats<'_>, params: &SplitParams) -> TreeNode {
        match &nodes[idx] {
            NodeSlot::Leaf(rows) => make_leaf(stats, rows, params),
            NodeSlot::Split { feature, threshold, left, right } => TreeNode::Split {
                feature: *feature,
                threshold: *threshold,
                left: Box::new(to_node(nodes, *left, stats, params)),
                right: Box::new(to_node(nodes, *right, stats, params)),
            },
        }
    }

    to_node(&nodes, 0, &stats, params)
}
