use crate::binning::BinnedFrame;
use crate::stats::MomentStat;
use crate::tree::Tree;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableImportanceMode {
    None,
    /// Mean decrease in impurity, summed over splits.
    Mdi,
    /// Permutation based mean decrease in accuracy, raw mean.
    Mda,
    /// MDA divided by its cross tree standard error.
    MdaScaled,
}

/// Per observation error contribution of a single prediction.
pub type ObsErrorFn = fn(f64, f64) -> f64;

pub fn misclassified(y: f64, yhat: f64) -> f64 {
    if y == yhat {
        0.0
    } else {
        1.0
    }
}

pub fn squared_error(y: f64, yhat: f64) -> f64 {
    (y - yhat) * (y - yhat)
}

/// Out of bag error. For every observation the error is the
/// online mean over the trees for which it was out of bag; the
/// scalar is the mean over the covered observations. Rows never
/// out of bag hold NaN in the per observation vector. A plain
/// sequential loop: the work is O(trees x oob rows) of cheap
/// tree walks.
pub fn oob_error(
    trees: &[Tree],
    oob_sets: &[Vec<usize>],
    frame: &BinnedFrame,
    response: &[f64],
    err: ObsErrorFn,
) -> (f64, Vec<f64>) {
    let mut counts = vec![0usize; frame.rows()];
    let mut means = vec![0.0; frame.rows()];
    for (tree, oob) in trees.iter().zip(oob_sets.iter()) {
        for &row in oob {
            let e = err(response[row], tree.predict_row(frame, row));
            counts[row] += 1;
            means[row] += (e - means[row]) / counts[row] as f64;
        }
    }
    let covered = counts.iter().filter(|&&c| c > 0).count();
    let total: f64 = means
        .iter()
        .zip(counts.iter())
        .filter(|(_, &c)| c > 0)
        .map(|(m, _)| m)
        .sum();
    let scalar = if covered > 0 {
        total / covered as f64
    } else {
        0.0
    };
    let per_observation = means
        .iter()
        .zip(counts.iter())
        .map(|(m, &c)| if c > 0 { *m } else { f64::NAN })
        .collect();
    (scalar, per_observation)
}

/// Mean decrease in impurity: the summed impurity decrease each
/// feature's splits achieved, normalized by tree count.
pub fn mean_decrease_impurity(feature_imp_dec: &[f64], tree_count: usize) -> Vec<f64> {
    feature_imp_dec
        .iter()
        .map(|v| v / tree_count as f64)
        .collect()
}

/// Permutation importance. For each tree, the baseline OOB error
/// is compared against the error after permuting one feature's
/// codes among that tree's OOB rows; the per feature differences
/// accumulate into an online mean and variance across trees.
pub fn mean_decrease_accuracy(
    trees: &[Tree],
    oob_sets: &[Vec<usize>],
    engines: &mut [ChaCha8Rng],
    frame: &BinnedFrame,
    response: &[f64],
    err: ObsErrorFn,
    scaled: bool,
) -> Vec<f64> {
    let cols = frame.cols();
    let mut accumulators = vec![MomentStat::default(); cols];
    for ((tree, oob), rng) in trees.iter().zip(oob_sets.iter()).zip(engines.iter_mut()) {
        if oob.is_empty() {
            continue;
        }
        let baseline: f64 = oob
            .iter()
            .map(|&row| err(response[row], tree.predict_row(frame, row)))
            .sum::<f64>()
            / oob.len() as f64;
        for feature in 0..cols {
            let col = frame.data.get_col(feature);
            let mut permuted: Vec<u16> = oob.iter().map(|&row| col[row]).collect();
            permuted.shuffle(rng);
            let permuted_err: f64 = oob
                .iter()
                .zip(permuted.iter())
                .map(|(&row, &code)| {
                    err(
                        response[row],
                        tree.predict_row_permuted(frame, row, Some((feature, code))),
                    )
                })
                .sum::<f64>()
                / oob.len() as f64;
            accumulators[feature].push(permuted_err - baseline);
        }
    }
    accumulators
        .iter()
        .map(|acc| {
            if scaled {
                // Standard error across trees; left unguarded, a
                // zero deviation yields IEEE inf/NaN as the
                // reference engine does.
                let n = acc.count as f64;
                let std = (acc.sum2cent / (n - 1.0)).sqrt();
                acc.mean / (std / n.sqrt())
            } else {
                acc.mean
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Matrix;
    use crate::node::TreeNode;

    fn stump(feature: usize, bin: u16, left: f64, right: f64) -> Tree {
        let mut root = TreeNode::new_leaf(0, 0, 4, 0.0, None);
        root.update_children(1, 2, feature, bin);
        Tree {
            nodes: vec![
                root,
                TreeNode::new_leaf(1, 1, 2, left, None),
                TreeNode::new_leaf(2, 1, 2, right, None),
            ],
        }
    }

    #[test]
    fn test_obs_error_fns() {
        assert_eq!(misclassified(1.0, 1.0), 0.0);
        assert_eq!(misclassified(1.0, 0.0), 1.0);
        assert_eq!(squared_error(3.0, 1.0), 4.0);
    }

    #[test]
    fn test_oob_error_perfect_tree() {
        let codes: Vec<u16> = vec![0, 0, 1, 1];
        let response = vec![0., 0., 1., 1.];
        let m = Matrix::new(&codes, 4, 1);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let tree = stump(0, 0, 0.0, 1.0);
        let (err, per_obs) = oob_error(
            &[tree],
            &[vec![0, 2]],
            &frame,
            &response,
            misclassified,
        );
        assert_eq!(err, 0.0);
        assert_eq!(per_obs[0], 0.0);
        assert!(per_obs[1].is_nan());
        assert_eq!(per_obs[2], 0.0);
        assert!(per_obs[3].is_nan());
    }

    #[test]
    fn test_oob_error_means_across_trees() {
        let codes: Vec<u16> = vec![0, 1];
        let response = vec![0., 1.];
        let m = Matrix::new(&codes, 2, 1);
        let frame = BinnedFrame::from_codes(m).unwrap();
        // One perfect stump, one inverted stump; row 0 is OOB for
        // both, so its error is the mean 0.5.
        let good = stump(0, 0, 0.0, 1.0);
        let bad = stump(0, 0, 1.0, 0.0);
        let (err, per_obs) = oob_error(
            &[good, bad],
            &[vec![0], vec![0]],
            &frame,
            &response,
            misclassified,
        );
        assert_eq!(per_obs[0], 0.5);
        assert_eq!(err, 0.5);
    }

    #[test]
    fn test_mdi_normalization() {
        let mdi = mean_decrease_impurity(&[2.0, 0.0, 1.0], 4);
        assert_eq!(mdi, vec![0.5, 0.0, 0.25]);
    }

    #[test]
    fn test_mda_informative_feature_ranks_first() {
        use rand::Rng;
        use rand::SeedableRng;
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        let rows_n = 400;
        // Feature 0 drives the label, feature 1 is noise.
        let mut codes: Vec<u16> = Vec::with_capacity(rows_n * 2);
        for _ in 0..rows_n {
            codes.push(rng.gen_range(0..2u16));
        }
        for _ in 0..rows_n {
            codes.push(rng.gen_range(0..2u16));
        }
        let response: Vec<f64> = (0..rows_n).map(|i| codes[i] as f64).collect();
        let m = Matrix::new(&codes, rows_n, 2);
        let frame = BinnedFrame::from_codes(m).unwrap();
        let trees: Vec<Tree> = (0..5).map(|_| stump(0, 0, 0.0, 1.0)).collect();
        let oob_sets: Vec<Vec<usize>> = (0..5).map(|_| (0..rows_n).collect()).collect();
        let mut engines: Vec<ChaCha8Rng> =
            (0..5).map(|i| ChaCha8Rng::seed_from_u64(i)).collect();
        let mda = mean_decrease_accuracy(
            &trees,
            &oob_sets,
            &mut engines,
            &frame,
            &response,
            misclassified,
            false,
        );
        assert!(mda[0] > 0.2);
        assert!(mda[1].abs() < 0.05);
    }
}
