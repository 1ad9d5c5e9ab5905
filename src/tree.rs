use crate::binning::BinnedFrame;
use crate::histogram::{node_total, PARTIAL_BLOCK_SIZE};
use crate::node::{NodeRecord, NodeSplit, TreeNode};
use crate::sampler::FeatureSampler;
use crate::splitter::{SplitMethod, Splitter};
use crate::stats::StatKernel;
use crate::utils::pivot_on_split;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fitted tree, a flat vector of persisted nodes with the
/// root at index zero.
#[derive(Debug, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    /// Predict one row of binned data, descending left while
    /// `code <= split_bin`.
    pub fn predict_row(&self, frame: &BinnedFrame, row: usize) -> f64 {
        self.predict_row_permuted(frame, row, None)
    }

    /// Predict a row with one feature's code optionally replaced,
    /// used by the permutation importance pass.
    pub fn predict_row_permuted(
        &self,
        frame: &BinnedFrame,
        row: usize,
        permuted: Option<(usize, u16)>,
    ) -> f64 {
        let mut node_idx = 0;
        loop {
            let n = &self.nodes[node_idx];
            if n.is_leaf() {
                return n.response;
            }
            let feature = n.split_feature_.unwrap();
            let code = match permuted {
                Some((f, c)) if f == feature => c,
                _ => *frame.data.get(row, feature),
            };
            if code <= n.split_bin_.unwrap() {
                node_idx = n.left_child_.unwrap();
            } else {
                node_idx = n.right_child_.unwrap();
            }
        }
    }

    pub fn predict(&self, frame: &BinnedFrame, parallel: bool) -> Vec<f64> {
        if parallel {
            (0..frame.rows())
                .into_par_iter()
                .map(|row| self.predict_row(frame, row))
                .collect()
        } else {
            (0..frame.rows())
                .map(|row| self.predict_row(frame, row))
                .collect()
        }
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

impl fmt::Display for Tree {
    // This trait requires `fmt` with this exact signature.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut print_buffer: Vec<usize> = vec![0];
        let mut r = String::new();
        while let Some(idx) = print_buffer.pop() {
            let n = &self.nodes[idx];
            r += format!("{}{}\n", "      ".repeat(n.depth).as_str(), n).as_str();
            if !n.is_leaf() {
                print_buffer.push(n.right_child_.unwrap());
                print_buffer.push(n.left_child_.unwrap());
            }
        }
        write!(f, "{}", r)
    }
}

/// Hyperparameters consumed by the level wise grower.
pub struct GrowerParams {
    /// 0 means unlimited.
    pub max_tree_depth: usize,
    pub min_observations_in_leaf_node: usize,
    pub impurity_threshold: f64,
    pub features_per_node: usize,
    pub split_method: SplitMethod,
}

/// The trees of one block plus the per feature impurity
/// decrease attributed to their splits, consumed by MDI.
pub struct TreeBlockResult {
    pub trees: Vec<Tree>,
    pub feature_imp_dec: Vec<f64>,
}

/// Partition one node's segment of the tree order in place.
/// Small segments use the two pointer pivot; segments spanning
/// several blocks take a two pass route, per chunk left/right
/// gathering in parallel followed by an ordered scatter, so one
/// node split across many concurrent chunks never races.
fn partition_segment(segment: &mut [usize], col: &[u16], bin: u16) -> usize {
    if segment.len() <= PARTIAL_BLOCK_SIZE {
        return pivot_on_split(segment, col, bin);
    }
    let parts: Vec<(Vec<usize>, Vec<usize>)> = segment
        .par_chunks(PARTIAL_BLOCK_SIZE)
        .map(|chunk| chunk.iter().copied().partition(|&r| col[r] <= bin))
        .collect();
    let mut scratch = Vec::with_capacity(segment.len());
    for (left, _) in &parts {
        scratch.extend_from_slice(left);
    }
    let n_left = scratch.len();
    for (_, right) in &parts {
        scratch.extend_from_slice(right);
    }
    segment.copy_from_slice(&scratch);
    n_left
}

/// Carve the disjoint, ascending node ranges out of the shared
/// tree order array so they can be partitioned in parallel.
fn disjoint_segments<'t>(
    mut order: &'t mut [usize],
    ranges: &[(usize, usize)],
) -> Vec<&'t mut [usize]> {
    let mut segments = Vec::with_capacity(ranges.len());
    let mut consumed = 0;
    for &(offset, count) in ranges {
        let (_, rest) = order.split_at_mut(offset - consumed);
        let (seg, rest) = rest.split_at_mut(count);
        segments.push(seg);
        order = rest;
        consumed = offset + count;
    }
    segments
}

/// Grow a block of trees breadth first, level by level. All
/// trees in the block share one node list per level; nodes at a
/// level are fully independent and processed in parallel.
pub fn grow_tree_block<K: StatKernel>(
    kernel: &K,
    frame: &BinnedFrame,
    response: &[f64],
    params: &GrowerParams,
    samples: Vec<Vec<usize>>,
    engines: &mut [ChaCha8Rng],
) -> TreeBlockResult {
    let tree_count = samples.len();
    debug_assert_eq!(engines.len(), tree_count);
    let feature_sampler = FeatureSampler::new(frame.cols(), params.features_per_node);
    let splitter = Splitter {
        kernel,
        min_observations_in_leaf_node: params.min_observations_in_leaf_node,
        impurity_threshold: params.impurity_threshold,
        split_method: params.split_method,
    };
    let mut feature_imp_dec = vec![0.0; frame.cols()];

    // LEVEL_INIT: one root per tree, each owning its full sample
    // range of the shared tree order array.
    let mut tree_order: Vec<usize> = Vec::new();
    let mut trees: Vec<Vec<TreeNode>> = Vec::with_capacity(tree_count);
    let mut level_nodes: Vec<NodeRecord> = Vec::with_capacity(tree_count);
    for (tree, sample) in samples.into_iter().enumerate() {
        let offset = tree_order.len();
        let count = sample.len();
        tree_order.extend(sample);
        level_nodes.push(NodeRecord::new(tree, 0, 0, offset, count));
        trees.push(Vec::new());
    }

    // HISTOGRAM: initial per node aggregates, a parallel
    // reduction over each root's row range.
    let mut level_stats: Vec<K::Stat> = level_nodes
        .par_iter()
        .map(|node| {
            node_total(
                kernel,
                response,
                &tree_order[node.row_offset..node.row_offset + node.row_count],
            )
        })
        .collect();
    for (node, stat) in level_nodes.iter().zip(level_stats.iter()) {
        trees[node.tree].push(TreeNode::new_leaf(
            0,
            0,
            node.row_count,
            kernel.leaf_response(stat),
            kernel.class_histogram(stat),
        ));
    }

    let mut depth = 0;
    while !level_nodes.is_empty()
        && (params.max_tree_depth == 0 || depth < params.max_tree_depth)
    {
        debug!(
            "level {}: {} active nodes across {} trees",
            depth,
            level_nodes.len(),
            tree_count
        );

        // Candidate features and a per node engine seed are drawn
        // sequentially from each tree's engine, so the random
        // stream a tree consumes never depends on how other trees
        // are interleaved or scheduled.
        let node_inputs: Vec<(Vec<usize>, u64)> = level_nodes
            .iter()
            .map(|node| {
                let features = feature_sampler.sample(&mut engines[node.tree]);
                let seed = match params.split_method {
                    SplitMethod::Random => engines[node.tree].gen(),
                    SplitMethod::Best => 0,
                };
                (features, seed)
            })
            .collect();

        // SPLIT_SEARCH: nodes at a level are independent.
        let split_results: Vec<Option<crate::splitter::SplitInfo<K::Stat>>> = level_nodes
            .par_iter()
            .zip(level_stats.par_iter())
            .zip(node_inputs.par_iter())
            .map(|((node, stat), (features, seed))| {
                if node.row_count < 2 * params.min_observations_in_leaf_node {
                    return None;
                }
                let rows = &tree_order[node.row_offset..node.row_offset + node.row_count];
                let mut node_rng = ChaCha8Rng::seed_from_u64(*seed);
                splitter.best_split(frame, response, rows, features, stat, &mut node_rng)
            })
            .collect();

        // SPLIT_APPLY: each split node materializes exactly two
        // children, left at 2k, right at 2k + 1, with k the
        // running count of accepted splits. The left child's
        // statistic comes straight from the split search, the
        // right child is derived by subtraction.
        let mut next_nodes: Vec<NodeRecord> = Vec::new();
        let mut next_stats: Vec<K::Stat> = Vec::new();
        let mut partition_ranges: Vec<(usize, usize)> = Vec::new();
        let mut partition_splits: Vec<(usize, u16)> = Vec::new();
        for (i, node) in level_nodes.iter_mut().enumerate() {
            let info = match &split_results[i] {
                Some(s) => s,
                None => continue,
            };
            let left_stat = info.left_stat.clone();
            let right_stat = kernel.sub(&level_stats[i], &left_stat);
            let split = NodeSplit {
                feature: info.feature,
                bin: info.bin,
                left_count: kernel.count(&left_stat),
                impurity_decrease: info.imp_dec,
            };
            feature_imp_dec[split.feature] += split.impurity_decrease;

            let tree_nodes = &mut trees[node.tree];
            let left_num = tree_nodes.len();
            let right_num = left_num + 1;
            tree_nodes[node.tree_node].update_children(
                left_num,
                right_num,
                split.feature,
                split.bin,
            );
            tree_nodes.push(TreeNode::new_leaf(
                left_num,
                depth + 1,
                split.left_count,
                kernel.leaf_response(&left_stat),
                kernel.class_histogram(&left_stat),
            ));
            tree_nodes.push(TreeNode::new_leaf(
                right_num,
                depth + 1,
                node.row_count - split.left_count,
                kernel.leaf_response(&right_stat),
                kernel.class_histogram(&right_stat),
            ));

            next_nodes.push(NodeRecord::new(
                node.tree,
                left_num,
                depth + 1,
                node.row_offset,
                split.left_count,
            ));
            next_stats.push(left_stat);
            next_nodes.push(NodeRecord::new(
                node.tree,
                right_num,
                depth + 1,
                node.row_offset + split.left_count,
                node.row_count - split.left_count,
            ));
            next_stats.push(right_stat);

            partition_ranges.push((node.row_offset, node.row_count));
            partition_splits.push((split.feature, split.bin));
            node.split = Some(split);
        }

        // PARTITION: reorder each split node's segment in place
        // so its left child's rows occupy the low sub range.
        let segments = disjoint_segments(&mut tree_order, &partition_ranges);
        let left_counts: Vec<usize> = segments
            .into_par_iter()
            .zip(partition_splits.par_iter())
            .map(|(segment, &(feature, bin))| {
                partition_segment(segment, frame.data.get_col(feature), bin)
            })
            .collect();
        // The routed counts must agree with what the split
        // search promised; left children sit at the even slots.
        for (i, &n_left) in left_counts.iter().enumerate() {
            debug_assert_eq!(n_left, next_nodes[2 * i].row_count);
        }

        level_nodes = next_nodes;
        level_stats = next_stats;
        depth += 1;
    }

    TreeBlockResult {
        trees: trees.into_iter().map(|nodes| Tree { nodes }).collect(),
        feature_imp_dec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Matrix;
    use crate::stats::{GiniKernel, MomentKernel};

    fn engines(n: usize, seed: u64) -> Vec<ChaCha8Rng> {
        (0..n)
            .map(|i| ChaCha8Rng::seed_from_u64(seed.wrapping_add(i as u64)))
            .collect()
    }

    fn grower_params(max_depth: usize, features: usize) -> GrowerParams {
        GrowerParams {
            max_tree_depth: max_depth,
            min_observations_in_leaf_node: 1,
            impurity_threshold: 0.0,
            features_per_node: features,
            split_method: SplitMethod::Best,
        }
    }

    #[test]
    fn test_single_tree_perfect_split() {
        let codes: Vec<u16> = vec![0, 0, 0, 1, 1, 1];
        let response = vec![0., 0., 0., 1., 1., 1.];
        let m = Matrix::new(&codes, 6, 1);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let kernel = GiniKernel { class_count: 2 };
        let mut eng = engines(1, 5);
        let result = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &grower_params(0, 1),
            vec![(0..6).collect()],
            &mut eng,
        );
        let tree = &result.trees[0];
        assert_eq!(tree.nodes.len(), 3);
        for row in 0..6 {
            assert_eq!(tree.predict_row(&frame, row), response[row]);
        }
        // All the impurity decrease lands on the only feature.
        assert!(result.feature_imp_dec[0] > 0.0);
    }

    #[test]
    fn test_partition_invariant() {
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let rows_n = 3000;
        let codes: Vec<u16> = (0..rows_n * 2).map(|_| rng.gen_range(0..16u16)).collect();
        let col0: Vec<u16> = codes[..rows_n].to_vec();
        let mut order: Vec<usize> = (0..rows_n).collect();
        let n_left = partition_segment(&mut order, &col0, 7);
        for &r in &order[..n_left] {
            assert!(col0[r] <= 7);
        }
        for &r in &order[n_left..] {
            assert!(col0[r] > 7);
        }
        // Two pass and pivot agree on the count.
        let mut order2: Vec<usize> = (0..rows_n).collect();
        assert_eq!(pivot_on_split(&mut order2, &col0, 7), n_left);
    }

    #[test]
    fn test_depth_limit_bounds_node_count() {
        let mut rng = ChaCha8Rng::seed_from_u64(33);
        let rows_n = 400;
        let codes: Vec<u16> = (0..rows_n * 3).map(|_| rng.gen_range(0..8u16)).collect();
        let response: Vec<f64> = (0..rows_n).map(|_| rng.gen_range(0..2) as f64).collect();
        let m = Matrix::new(&codes, rows_n, 3);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let kernel = GiniKernel { class_count: 2 };
        let max_depth = 3;
        let mut eng = engines(1, 8);
        let result = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &grower_params(max_depth, 3),
            vec![(0..rows_n).collect()],
            &mut eng,
        );
        let tree = &result.trees[0];
        assert!(tree.max_depth() <= max_depth);
        // A binary tree of depth d has at most 2^(d+1) - 1 nodes.
        assert!(tree.nodes.len() <= (1 << (max_depth + 1)) - 1);
    }

    #[test]
    fn test_min_leaf_stopping() {
        // Property 5: no node with fewer than 2 * min_leaf rows
        // may split.
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let rows_n = 200;
        let codes: Vec<u16> = (0..rows_n * 2).map(|_| rng.gen_range(0..8u16)).collect();
        let response: Vec<f64> = (0..rows_n).map(|_| rng.gen_range(0..2) as f64).collect();
        let m = Matrix::new(&codes, rows_n, 2);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let kernel = GiniKernel { class_count: 2 };
        let min_leaf = 10;
        let mut params = grower_params(0, 2);
        params.min_observations_in_leaf_node = min_leaf;
        let mut eng = engines(1, 13);
        let result = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &params,
            vec![(0..rows_n).collect()],
            &mut eng,
        );
        for node in &result.trees[0].nodes {
            if !node.is_leaf() {
                assert!(node.sample_count >= 2 * min_leaf);
                let left = &result.trees[0].nodes[node.left_child_.unwrap()];
                let right = &result.trees[0].nodes[node.right_child_.unwrap()];
                assert!(left.sample_count >= min_leaf);
                assert!(right.sample_count >= min_leaf);
            }
        }
    }

    #[test]
    fn test_block_of_trees_matches_individual_growth() {
        // Growing two trees in one block must give the same trees
        // as growing them in separate blocks, engines equal.
        let mut rng = ChaCha8Rng::seed_from_u64(70);
        let rows_n = 300;
        let codes: Vec<u16> = (0..rows_n * 3).map(|_| rng.gen_range(0..8u16)).collect();
        let response: Vec<f64> = (0..rows_n)
            .map(|i| if codes[i] > 3 { 1.0 } else { 0.0 })
            .collect();
        let m = Matrix::new(&codes, rows_n, 3);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let kernel = GiniKernel { class_count: 2 };
        let params = grower_params(4, 2);
        let sample_a: Vec<usize> = (0..rows_n).collect();
        let sample_b: Vec<usize> = (0..rows_n).rev().collect();

        let mut eng = engines(2, 99);
        let block = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &params,
            vec![sample_a.clone(), sample_b.clone()],
            &mut eng,
        );
        let mut eng_a = engines(1, 99);
        let solo_a = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &params,
            vec![sample_a],
            &mut eng_a,
        );
        let mut eng_b = vec![ChaCha8Rng::seed_from_u64(100)];
        let solo_b = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &params,
            vec![sample_b],
            &mut eng_b,
        );
        let dump = |t: &Tree| format!("{}", t);
        assert_eq!(dump(&block.trees[0]), dump(&solo_a.trees[0]));
        assert_eq!(dump(&block.trees[1]), dump(&solo_b.trees[0]));
    }

    #[test]
    fn test_regression_tree_reduces_error() {
        let mut rng = ChaCha8Rng::seed_from_u64(55);
        let rows_n = 500;
        let codes: Vec<u16> = (0..rows_n * 2).map(|_| rng.gen_range(0..10u16)).collect();
        let response: Vec<f64> = (0..rows_n).map(|i| codes[i] as f64 * 2.0).collect();
        let m = Matrix::new(&codes, rows_n, 2);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let kernel = MomentKernel;
        let mut eng = engines(1, 3);
        let result = grow_tree_block(
            &kernel,
            &frame,
            &response,
            &grower_params(0, 2),
            vec![(0..rows_n).collect()],
            &mut eng,
        );
        let preds = result.trees[0].predict(&frame, false);
        let mse: f64 = preds
            .iter()
            .zip(response.iter())
            .map(|(p, y)| (p - y) * (p - y))
            .sum::<f64>()
            / rows_n as f64;
        // The response is a pure function of feature 0's code, so
        // a fully grown tree fits it exactly.
        assert!(mse < 1e-12);
    }
}
