use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForestError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("{what} of {value} exceeds the supported limit of {limit}.")]
    DimensionExceeded {
        what: &'static str,
        value: usize,
        limit: usize,
    },
    #[error("Shape mismatch: expected {expected} {what}, got {got}.")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error(
        "Insufficient memory to train a single tree: \
         {required_bytes} bytes required, budget is {budget_bytes} bytes."
    )]
    InsufficientMemory {
        required_bytes: usize,
        budget_bytes: usize,
    },
}
