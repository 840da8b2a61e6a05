use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Invalid input dim: expected a 3D or 4D tensor, got {ndim}D")]
    InvalidInputDim { ndim: usize },

    #[error("Shape mismatch: input {input:?} vs target {target:?}")]
    ShapeMismatch { input: Vec<usize>, target: Vec<usize> },

    #[error("Model output {prediction:?} does not match target {target:?}")]
    PredictionShape { prediction: Vec<usize>, target: Vec<usize> },

    #[error("Dataset yielded no samples")]
    EmptyDataset,

    #[error("Confusion matrix must be square, row {row} has {len} entries for {n_classes} classes")]
    NotSquare { row: usize, len: usize, n_classes: usize },

    #[error("Tensor data conversion failed: {0}")]
    Data(String),

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("Failed to read mask {path}: {source}")]
    Image { path: PathBuf, #[source] source: image::ImageError },

    #[error("Plotting failed: {0}")]
    Plot(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;
