use crate::binning::BinnedFrame;
use crate::histogram::{block_count, build_node_histogram};
use crate::stats::StatKernel;
use crate::utils::BinSet;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Tolerance used when comparing impurity decreases. Two
/// candidates within this distance are considered equal and fall
/// through to the lexicographic (feature, bin) tie break, which
/// is what makes the search order independent.
pub const IMP_DEC_TOL: f64 = 1e-10;

fn float_gt(a: f64, b: f64) -> bool {
    a - b > IMP_DEC_TOL
}

fn float_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= IMP_DEC_TOL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitMethod {
    /// Scan every occupied threshold of every candidate feature.
    Best,
    /// One random threshold per candidate feature, extra trees
    /// style. Faster, noisier splits.
    Random,
}

/// The winning candidate for one node.
#[derive(Debug, Clone)]
pub struct SplitInfo<S> {
    pub feature: usize,
    pub bin: u16,
    pub imp_dec: f64,
    /// Statistic accumulated over the rows routed left; the
    /// right side is always derived by subtraction from the node
    /// total, never a second pass.
    pub left_stat: S,
}

impl<S> SplitInfo<S> {
    /// Combine two workers' candidates. Max impurity decrease
    /// wins; within tolerance the lower (feature, bin) pair wins.
    /// Order independent, so a parallel reduction lands on the
    /// same winner as a sequential scan.
    pub fn better(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (None, b) => b,
            (a, None) => a,
            (Some(a), Some(b)) => {
                if float_gt(a.imp_dec, b.imp_dec) {
                    Some(a)
                } else if float_gt(b.imp_dec, a.imp_dec) {
                    Some(b)
                } else if (a.feature, a.bin) <= (b.feature, b.bin) {
                    Some(a)
                } else {
                    Some(b)
                }
            }
        }
    }
}

pub struct Splitter<'a, K: StatKernel> {
    pub kernel: &'a K,
    pub min_observations_in_leaf_node: usize,
    pub impurity_threshold: f64,
    pub split_method: SplitMethod,
}

impl<'a, K: StatKernel> Splitter<'a, K> {
    /// The acceptance rule. A candidate replaces the current best
    /// iff the decrease is positive, the node is impure enough to
    /// be worth splitting, both children are large enough, and it
    /// beats the incumbent on decrease or on the lexicographic
    /// tie break.
    #[allow(clippy::too_many_arguments)]
    fn accepts(
        &self,
        best: &Option<SplitInfo<K::Stat>>,
        imp_dec: f64,
        feature: usize,
        bin: u16,
        node_imp: f64,
        left_count: usize,
        right_count: usize,
    ) -> bool {
        if imp_dec <= 0.0 {
            return false;
        }
        if float_eq(node_imp, 0.0) || node_imp < self.impurity_threshold {
            return false;
        }
        if left_count < self.min_observations_in_leaf_node
            || right_count < self.min_observations_in_leaf_node
        {
            return false;
        }
        match best {
            None => true,
            Some(b) => {
                float_gt(imp_dec, b.imp_dec)
                    || (float_eq(imp_dec, b.imp_dec)
                        && (feature < b.feature || (feature == b.feature && bin < b.bin)))
            }
        }
    }

    /// Find the best split for one node, selecting the strategy
    /// from the cost model: nodes that fit in a single partial
    /// histogram block are scanned directly, everything else goes
    /// through the histogram.
    pub fn best_split(
        &self,
        frame: &BinnedFrame,
        response: &[f64],
        rows: &[usize],
        features: &[usize],
        node_stat: &K::Stat,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitInfo<K::Stat>> {
        let node_imp = self.kernel.impurity(node_stat);
        if float_eq(node_imp, 0.0) || node_imp < self.impurity_threshold {
            return None;
        }
        match self.split_method {
            SplitMethod::Random => {
                self.random_split(frame, response, rows, features, node_stat, node_imp, rng)
            }
            SplitMethod::Best => {
                if block_count(rows.len()) <= 1 {
                    self.best_split_single_pass(frame, response, rows, features, node_stat, node_imp)
                } else {
                    self.best_split_histogram(frame, response, rows, features, node_stat, node_imp)
                }
            }
        }
    }

    /// Histogram strategy: build the per (feature, bin) histogram
    /// once, then scan each feature's bins cumulatively. Features
    /// are scanned in parallel and folded with the order
    /// independent combinator.
    fn best_split_histogram(
        &self,
        frame: &BinnedFrame,
        response: &[f64],
        rows: &[usize],
        features: &[usize],
        node_stat: &K::Stat,
        node_imp: f64,
    ) -> Option<SplitInfo<K::Stat>> {
        let hist = build_node_histogram(self.kernel, frame, response, rows, features);
        features
            .par_iter()
            .enumerate()
            .map(|(f_idx, &feature)| {
                let mut best: Option<SplitInfo<K::Stat>> = None;
                let bin_count = frame.bin_count(feature);
                let mut cuml = self.kernel.empty();
                // The last bin can never be a threshold, its right
                // partition is empty by construction.
                for bin in 0..bin_count.saturating_sub(1) {
                    let cell = hist.get(f_idx, bin);
                    let cell_count = self.kernel.count(cell);
                    self.kernel.merge(&mut cuml, cell);
                    if cell_count == 0 {
                        // Same partition as the previous threshold.
                        continue;
                    }
                    let right = self.kernel.sub(node_stat, &cuml);
                    let imp_dec = self.kernel.impurity_decrease(node_stat, &cuml, &right);
                    if self.accepts(
                        &best,
                        imp_dec,
                        feature,
                        bin as u16,
                        node_imp,
                        self.kernel.count(&cuml),
                        self.kernel.count(&right),
                    ) {
                        best = Some(SplitInfo {
                            feature,
                            bin: bin as u16,
                            imp_dec,
                            left_stat: cuml.clone(),
                        });
                    }
                }
                best
            })
            .reduce(|| None, SplitInfo::better)
    }

    /// Single pass strategy for small nodes: no histogram is
    /// materialized. Occupied thresholds are deduplicated with a
    /// bitset, then each one is evaluated by a direct scan of the
    /// node's rows.
    fn best_split_single_pass(
        &self,
        frame: &BinnedFrame,
        response: &[f64],
        rows: &[usize],
        features: &[usize],
        node_stat: &K::Stat,
        node_imp: f64,
    ) -> Option<SplitInfo<K::Stat>> {
        let mut best: Option<SplitInfo<K::Stat>> = None;
        for &feature in features {
            let col = frame.data.get_col(feature);
            let mut seen = BinSet::new(frame.bin_count(feature));
            for &row in rows {
                seen.insert(col[row]);
            }
            for bin in seen.iter() {
                let mut left = self.kernel.empty();
                for &row in rows {
                    if col[row] <= bin {
                        self.kernel.accumulate(&mut left, response[row]);
                    }
                }
                let right = self.kernel.sub(node_stat, &left);
                let imp_dec = self.kernel.impurity_decrease(node_stat, &left, &right);
                if self.accepts(
                    &best,
                    imp_dec,
                    feature,
                    bin,
                    node_imp,
                    self.kernel.count(&left),
                    self.kernel.count(&right),
                ) {
                    best = Some(SplitInfo {
                        feature,
                        bin,
                        imp_dec,
                        left_stat: left,
                    });
                }
            }
        }
        best
    }

    /// Random threshold strategy: for each candidate feature draw
    /// one threshold uniformly inside the feature's occupied code
    /// range and evaluate only that bin.
    #[allow(clippy::too_many_arguments)]
    fn random_split(
        &self,
        frame: &BinnedFrame,
        response: &[f64],
        rows: &[usize],
        features: &[usize],
        node_stat: &K::Stat,
        node_imp: f64,
        rng: &mut ChaCha8Rng,
    ) -> Option<SplitInfo<K::Stat>> {
        let mut best: Option<SplitInfo<K::Stat>> = None;
        for &feature in features {
            let col = frame.data.get_col(feature);
            let mut min_code = u16::MAX;
            let mut max_code = 0u16;
            for &row in rows {
                min_code = min_code.min(col[row]);
                max_code = max_code.max(col[row]);
            }
            if min_code >= max_code {
                // One occupied code, nothing to threshold on.
                continue;
            }
            // Scale a uniform deviate into [min_code, max_code),
            // the top code is excluded so the right side is never
            // empty by construction.
            let span = (max_code - min_code) as f64;
            let bin = min_code + (rng.gen_range(0.0..1.0) * span) as u16;
            let mut left = self.kernel.empty();
            for &row in rows {
                if col[row] <= bin {
                    self.kernel.accumulate(&mut left, response[row]);
                }
            }
            let right = self.kernel.sub(node_stat, &left);
            let imp_dec = self.kernel.impurity_decrease(node_stat, &left, &right);
            if self.accepts(
                &best,
                imp_dec,
                feature,
                bin,
                node_imp,
                self.kernel.count(&left),
                self.kernel.count(&right),
            ) {
                best = Some(SplitInfo {
                    feature,
                    bin,
                    imp_dec,
                    left_stat: left,
                });
            }
        }
        best
    }
}
