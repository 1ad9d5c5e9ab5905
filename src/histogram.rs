use crate::binning::BinnedFrame;
use crate::stats::StatKernel;
use rayon::prelude::*;

/// Rows per partial histogram block. Nodes that fit in a single
/// block skip histogram materialization entirely and are handled
/// by the single pass splitter.
pub const PARTIAL_BLOCK_SIZE: usize = 512;

/// Number of partial histogram blocks a node of `row_count` rows
/// requires. This is the cost model input used to pick the
/// histogram strategy per node.
pub fn block_count(row_count: usize) -> usize {
    (row_count + PARTIAL_BLOCK_SIZE - 1) / PARTIAL_BLOCK_SIZE
}

/// Per node histogram over the node's selected features,
/// addressed `feature_idx * max_bin_count + bin`. Features with
/// fewer occupied bins than the stride leave the tail cells at
/// the empty statistic; those cells are never read.
pub struct NodeHistogram<S> {
    pub stats: Vec<S>,
    pub max_bin_count: usize,
}

impl<S> NodeHistogram<S> {
    /// `feature_idx` indexes into the node's selected feature
    /// list, not the full column space.
    pub fn get(&self, feature_idx: usize, bin: usize) -> &S {
        &self.stats[feature_idx * self.max_bin_count + bin]
    }
}

fn accumulate_block<K: StatKernel>(
    kernel: &K,
    frame: &BinnedFrame,
    response: &[f64],
    rows: &[usize],
    features: &[usize],
    max_bin_count: usize,
) -> Vec<K::Stat> {
    let mut stats = vec![kernel.empty(); features.len() * max_bin_count];
    for (f_idx, &feature) in features.iter().enumerate() {
        let col = frame.data.get_col(feature);
        let base = f_idx * max_bin_count;
        for &row in rows {
            let code = col[row] as usize;
            kernel.accumulate(&mut stats[base + code], response[row]);
        }
    }
    stats
}

fn merge_partials<K: StatKernel>(kernel: &K, mut into: Vec<K::Stat>, from: Vec<K::Stat>) -> Vec<K::Stat> {
    if into.is_empty() {
        return from;
    }
    for (i, f) in into.iter_mut().zip(from.iter()) {
        kernel.merge(i, f);
    }
    into
}

/// Build the histogram for one node from its row range. Blocks
/// of rows accumulate disjoint partial histograms in parallel,
/// no atomics needed, and the partials are merged pairwise.
/// Counts are exact; the regression moment cells may differ in
/// the last float places run to run depending on merge order.
pub fn build_node_histogram<K: StatKernel>(
    kernel: &K,
    frame: &BinnedFrame,
    response: &[f64],
    rows: &[usize],
    features: &[usize],
) -> NodeHistogram<K::Stat> {
    let max_bin_count = frame.max_bin_count();
    let stats = if rows.len() > PARTIAL_BLOCK_SIZE {
        rows.par_chunks(PARTIAL_BLOCK_SIZE)
            .map(|block| accumulate_block(kernel, frame, response, block, features, max_bin_count))
            .reduce(Vec::new, |a, b| merge_partials(kernel, a, b))
    } else {
        accumulate_block(kernel, frame, response, rows, features, max_bin_count)
    };
    NodeHistogram {
        stats,
        max_bin_count,
    }
}

/// Aggregate statistic over a node's row range, a parallel
/// reduction in blocks.
pub fn node_total<K: StatKernel>(kernel: &K, response: &[f64], rows: &[usize]) -> K::Stat {
    if rows.len() > PARTIAL_BLOCK_SIZE {
        rows.par_chunks(PARTIAL_BLOCK_SIZE)
            .map(|block| {
                let mut stat = kernel.empty();
                for &row in block {
                    kernel.accumulate(&mut stat, response[row]);
                }
                stat
            })
            .reduce(
                || kernel.empty(),
                |mut a, b| {
                    kernel.merge(&mut a, &b);
                    a
                },
            )
    } else {
        let mut stat = kernel.empty();
        for &row in rows {
            kernel.accumulate(&mut stat, response[row]);
        }
        stat
    }
}
