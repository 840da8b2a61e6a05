//! Evaluation of trained segmentation models: pixel-wise cross entropy, Dice,
//! IoU and accuracy over a dataset, plus the confusion matrix rendered as an
//! annotated heatmap.

pub mod config;
pub mod data;
pub mod error;
pub mod eval;
pub mod model;
pub mod utils;

pub use config::{ DeviceSpec, EvalConfig };
pub use error::{ EvalError, Result };
pub use eval::{ evaluate, EvaluationReport, Evaluator, IntoSample, Sample };
pub use model::{ MaskPassthrough, SegmentationModel };
pub use utils::{
    colormap::Colormap,
    confusion::ConfusionMatrix,
    heatmap::{ draw_confusion_matrix, Categories, Figure, HeatmapOptions },
};
