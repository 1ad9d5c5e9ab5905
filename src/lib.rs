pub mod binning;
pub mod data;
pub mod errors;
pub mod forest;
pub mod histogram;
pub mod importance;
pub mod metric;
pub mod node;
pub mod sampler;
pub mod splitter;
pub mod stats;
pub mod tree;
pub mod utils;

pub use binning::BinnedFrame;
pub use errors::ForestError;
pub use forest::{ForestParams, OobMode, RandomForestClassifier, RandomForestRegressor};
pub use importance::VariableImportanceMode;
pub use splitter::SplitMethod;
