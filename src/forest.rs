use crate::binning::BinnedFrame;
use crate::errors::ForestError;
use crate::histogram::block_count;
use crate::importance::{
    mean_decrease_accuracy, mean_decrease_impurity, misclassified, oob_error, squared_error,
    ObsErrorFn, VariableImportanceMode,
};
use crate::sampler::sample_bootstrap;
use crate::splitter::SplitMethod;
use crate::stats::{GiniKernel, MomentKernel, StatKernel};
use crate::tree::{grow_tree_block, GrowerParams, Tree};
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Largest supported row, column, class or tree count. The
/// engine indexes with 32 bit friendly values end to end.
pub const MAX_INDEX: usize = u32::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OobMode {
    None,
    Error,
    ErrorPerObservation,
    All,
}

impl OobMode {
    fn wants_error(&self) -> bool {
        matches!(self, OobMode::Error | OobMode::All)
    }
    fn wants_per_observation(&self) -> bool {
        matches!(self, OobMode::ErrorPerObservation | OobMode::All)
    }
    fn enabled(&self) -> bool {
        !matches!(self, OobMode::None)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub tree_count: usize,
    /// Candidate features drawn per node; 0 selects the task
    /// default, sqrt(cols) for classification, cols / 3 for
    /// regression.
    pub features_per_node: usize,
    pub min_observations_in_leaf_node: usize,
    pub impurity_threshold: f64,
    /// 0 means unlimited.
    pub max_tree_depth: usize,
    pub bootstrap: bool,
    pub observations_per_tree_fraction: f64,
    pub split_method: SplitMethod,
    pub variable_importance: VariableImportanceMode,
    pub oob_mode: OobMode,
    pub seed: u64,
    /// Working memory ceiling used to size tree blocks.
    pub memory_budget_bytes: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        ForestParams {
            tree_count: 100,
            features_per_node: 0,
            min_observations_in_leaf_node: 1,
            impurity_threshold: 0.0,
            max_tree_depth: 0,
            bootstrap: true,
            observations_per_tree_fraction: 1.0,
            split_method: SplitMethod::Best,
            variable_importance: VariableImportanceMode::None,
            oob_mode: OobMode::None,
            seed: 42,
            memory_budget_bytes: 1 << 30,
        }
    }
}

/// Everything the training core hands back to the public API.
pub struct TrainedForest {
    pub trees: Vec<Tree>,
    pub oob_error: Option<f64>,
    pub oob_error_per_observation: Option<Vec<f64>>,
    pub variable_importance: Option<Vec<f64>>,
}

fn validate(
    params: &ForestParams,
    frame: &BinnedFrame,
    response: &[f64],
) -> Result<(), ForestError> {
    let rows = frame.rows();
    let cols = frame.cols();
    if rows == 0 || cols == 0 {
        return Err(ForestError::InvalidParameter(
            "the binned frame is empty".to_string(),
        ));
    }
    if response.len() != rows {
        return Err(ForestError::ShapeMismatch {
            what: "response values",
            expected: rows,
            got: response.len(),
        });
    }
    for (row, &y) in response.iter().enumerate() {
        if !y.is_finite() {
            return Err(ForestError::InvalidParameter(format!(
                "response at row {} is not finite",
                row
            )));
        }
    }
    for (what, value) in [
        ("row count", rows),
        ("column count", cols),
        ("tree count", params.tree_count),
    ] {
        if value > MAX_INDEX {
            return Err(ForestError::DimensionExceeded {
                what,
                value,
                limit: MAX_INDEX,
            });
        }
    }
    if params.tree_count == 0 {
        return Err(ForestError::InvalidParameter(
            "tree_count must be positive".to_string(),
        ));
    }
    if params.features_per_node > cols {
        return Err(ForestError::InvalidParameter(format!(
            "features_per_node of {} exceeds the {} available columns",
            params.features_per_node, cols
        )));
    }
    if params.min_observations_in_leaf_node == 0 {
        return Err(ForestError::InvalidParameter(
            "min_observations_in_leaf_node must be positive".to_string(),
        ));
    }
    if !(params.observations_per_tree_fraction > 0.0
        && params.observations_per_tree_fraction <= 1.0)
    {
        return Err(ForestError::InvalidParameter(format!(
            "observations_per_tree_fraction of {} is outside (0, 1]",
            params.observations_per_tree_fraction
        )));
    }
    if params.impurity_threshold < 0.0 {
        return Err(ForestError::InvalidParameter(
            "impurity_threshold must not be negative".to_string(),
        ));
    }
    let needs_oob = params.oob_mode.enabled()
        || matches!(
            params.variable_importance,
            VariableImportanceMode::Mda | VariableImportanceMode::MdaScaled
        );
    if needs_oob && !params.bootstrap {
        return Err(ForestError::InvalidParameter(
            "out of bag estimates require bootstrap sampling".to_string(),
        ));
    }
    Ok(())
}

fn default_features_per_node<K: StatKernel>(kernel: &K, cols: usize) -> usize {
    // Task defaults: sqrt for classification, a third of the
    // columns for regression.
    let fpn = if kernel.class_histogram(&kernel.empty()).is_some() {
        (cols as f64).sqrt().floor() as usize
    } else {
        cols / 3
    };
    fpn.clamp(1, cols)
}

/// Rough per tree working set, checked against the memory budget
/// before any training work starts. Training a forest whose
/// budget cannot hold even one tree is a configuration error,
/// not something to retry.
fn estimate_tree_bytes(
    sample_count: usize,
    features_per_node: usize,
    max_bin_count: usize,
    stat_bytes: usize,
) -> usize {
    let order = sample_count * std::mem::size_of::<usize>();
    let histograms =
        features_per_node * max_bin_count * stat_bytes * block_count(sample_count).max(1);
    let node_scratch = 2 * sample_count * std::mem::size_of::<usize>();
    order + histograms + node_scratch
}

fn tree_block_size(
    params: &ForestParams,
    sample_count: usize,
    features_per_node: usize,
    max_bin_count: usize,
    stat_bytes: usize,
) -> Result<usize, ForestError> {
    let per_tree =
        estimate_tree_bytes(sample_count, features_per_node, max_bin_count, stat_bytes);
    if per_tree > params.memory_budget_bytes {
        return Err(ForestError::InsufficientMemory {
            required_bytes: per_tree,
            budget_bytes: params.memory_budget_bytes,
        });
    }
    Ok((params.memory_budget_bytes / per_tree)
        .min(params.tree_count)
        .max(1))
}

/// Kernel generic training core shared by the classifier and
/// the regressor.
fn train_forest<K: StatKernel>(
    kernel: &K,
    frame: &BinnedFrame,
    response: &[f64],
    params: &ForestParams,
    stat_bytes: usize,
    err: ObsErrorFn,
) -> Result<TrainedForest, ForestError> {
    validate(params, frame, response)?;
    let rows = frame.rows();
    let cols = frame.cols();
    let features_per_node = if params.features_per_node == 0 {
        default_features_per_node(kernel, cols)
    } else {
        params.features_per_node
    };
    let sample_count = if params.bootstrap {
        ((rows as f64) * params.observations_per_tree_fraction).ceil() as usize
    } else {
        rows
    };
    let block_size = tree_block_size(
        params,
        sample_count,
        features_per_node,
        frame.max_bin_count(),
        stat_bytes,
    )?;

    info!(
        "training forest: {} trees, {} rows, {} columns, {} features per node, blocks of {}",
        params.tree_count, rows, cols, features_per_node, block_size
    );

    // One engine per tree, seeded in tree order from the master
    // seed. A tree's random stream is a function of its index
    // only, so neither thread count nor block partitioning can
    // change the fitted forest.
    let mut master = ChaCha8Rng::seed_from_u64(params.seed);
    let mut engines: Vec<ChaCha8Rng> = (0..params.tree_count)
        .map(|_| ChaCha8Rng::seed_from_u64(master.gen()))
        .collect();

    let grower_params = GrowerParams {
        max_tree_depth: params.max_tree_depth,
        min_observations_in_leaf_node: params.min_observations_in_leaf_node,
        impurity_threshold: params.impurity_threshold,
        features_per_node,
        split_method: params.split_method,
    };

    let mut trees: Vec<Tree> = Vec::with_capacity(params.tree_count);
    let mut oob_sets: Vec<Vec<usize>> = Vec::with_capacity(params.tree_count);
    let mut feature_imp_dec = vec![0.0; cols];
    let mut start = 0;
    while start < params.tree_count {
        let end = (start + block_size).min(params.tree_count);
        let mut samples = Vec::with_capacity(end - start);
        for engine in engines[start..end].iter_mut() {
            if params.bootstrap {
                let (sample, oob) = sample_bootstrap(rows, sample_count, engine);
                samples.push(sample);
                oob_sets.push(oob);
            } else {
                samples.push((0..rows).collect());
                oob_sets.push(Vec::new());
            }
        }
        debug!("tree block [{start}, {end})");
        let result = grow_tree_block(
            kernel,
            frame,
            response,
            &grower_params,
            samples,
            &mut engines[start..end],
        );
        trees.extend(result.trees);
        for (acc, v) in feature_imp_dec.iter_mut().zip(result.feature_imp_dec) {
            *acc += v;
        }
        start = end;
    }

    let (oob_scalar, oob_per_obs) = if params.oob_mode.enabled() {
        let (scalar, per_obs) = oob_error(&trees, &oob_sets, frame, response, err);
        (
            params.oob_mode.wants_error().then_some(scalar),
            params.oob_mode.wants_per_observation().then_some(per_obs),
        )
    } else {
        (None, None)
    };

    let variable_importance = match params.variable_importance {
        VariableImportanceMode::None => None,
        VariableImportanceMode::Mdi => Some(mean_decrease_impurity(
            &feature_imp_dec,
            params.tree_count,
        )),
        VariableImportanceMode::Mda => Some(mean_decrease_accuracy(
            &trees,
            &oob_sets,
            &mut engines,
            frame,
            response,
            err,
            false,
        )),
        VariableImportanceMode::MdaScaled => Some(mean_decrease_accuracy(
            &trees,
            &oob_sets,
            &mut engines,
            frame,
            response,
            err,
            true,
        )),
    };

    info!("trained {} trees", trees.len());
    Ok(TrainedForest {
        trees,
        oob_error: oob_scalar,
        oob_error_per_observation: oob_per_obs,
        variable_importance,
    })
}

#[derive(Serialize, Deserialize)]
pub struct RandomForestClassifier {
    pub params: ForestParams,
    pub class_count: usize,
    pub trees: Vec<Tree>,
    pub oob_error_: Option<f64>,
    pub oob_error_per_observation_: Option<Vec<f64>>,
    pub variable_importance_: Option<Vec<f64>>,
}

impl RandomForestClassifier {
    pub fn new(params: ForestParams, class_count: usize) -> Self {
        RandomForestClassifier {
            params,
            class_count,
            trees: Vec::new(),
            oob_error_: None,
            oob_error_per_observation_: None,
            variable_importance_: None,
        }
    }

    pub fn fit(&mut self, frame: &BinnedFrame, response: &[f64]) -> Result<(), ForestError> {
        if self.class_count < 2 || self.class_count > MAX_INDEX {
            return Err(ForestError::InvalidParameter(format!(
                "class_count of {} is not supported",
                self.class_count
            )));
        }
        for (row, &y) in response.iter().enumerate() {
            if y.fract() != 0.0 || y < 0.0 || y as usize >= self.class_count {
                return Err(ForestError::InvalidParameter(format!(
                    "label {} at row {} is not a class in [0, {})",
                    y, row, self.class_count
                )));
            }
        }
        let kernel = GiniKernel {
            class_count: self.class_count,
        };
        let stat_bytes =
            std::mem::size_of::<u32>() * self.class_count + std::mem::size_of::<Vec<u32>>();
        let fitted = train_forest(
            &kernel,
            frame,
            response,
            &self.params,
            stat_bytes,
            misclassified,
        )?;
        self.trees = fitted.trees;
        self.oob_error_ = fitted.oob_error;
        self.oob_error_per_observation_ = fitted.oob_error_per_observation;
        self.variable_importance_ = fitted.variable_importance;
        Ok(())
    }

    /// Per row class votes, normalized to fractions. Row major,
    /// `rows x class_count`.
    pub fn predict_proba(&self, frame: &BinnedFrame) -> Vec<f64> {
        let class_count = self.class_count;
        (0..frame.rows())
            .into_par_iter()
            .flat_map_iter(|row| {
                let mut votes = vec![0.0; class_count];
                for tree in &self.trees {
                    votes[tree.predict_row(frame, row) as usize] += 1.0;
                }
                let total = self.trees.len() as f64;
                votes.into_iter().map(move |v| v / total)
            })
            .collect()
    }

    /// Majority vote class per row, vote ties resolved to the
    /// lower class index.
    pub fn predict(&self, frame: &BinnedFrame) -> Vec<f64> {
        let proba = self.predict_proba(frame);
        proba
            .chunks(self.class_count)
            .map(|votes| {
                let mut best = 0;
                for (c, v) in votes.iter().enumerate() {
                    if *v > votes[best] {
                        best = c;
                    }
                }
                best as f64
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub params: ForestParams,
    pub trees: Vec<Tree>,
    pub oob_error_: Option<f64>,
    pub oob_error_per_observation_: Option<Vec<f64>>,
    pub variable_importance_: Option<Vec<f64>>,
}

impl RandomForestRegressor {
    pub fn new(params: ForestParams) -> Self {
        RandomForestRegressor {
            params,
            trees: Vec::new(),
            oob_error_: None,
            oob_error_per_observation_: None,
            variable_importance_: None,
        }
    }

    pub fn fit(&mut self, frame: &BinnedFrame, response: &[f64]) -> Result<(), ForestError> {
        let kernel = MomentKernel;
        let stat_bytes = std::mem::size_of::<crate::stats::MomentStat>();
        let fitted = train_forest(
            &kernel,
            frame,
            response,
            &self.params,
            stat_bytes,
            squared_error,
        )?;
        self.trees = fitted.trees;
        self.oob_error_ = fitted.oob_error;
        self.oob_error_per_observation_ = fitted.oob_error_per_observation;
        self.variable_importance_ = fitted.variable_importance;
        Ok(())
    }

    /// Mean of the per tree predictions.
    pub fn predict(&self, frame: &BinnedFrame) -> Vec<f64> {
        (0..frame.rows())
            .into_par_iter()
            .map(|row| {
                self.trees
                    .iter()
                    .map(|tree| tree.predict_row(frame, row))
                    .sum::<f64>()
                    / self.trees.len() as f64
            })
            .collect()
    }
}
