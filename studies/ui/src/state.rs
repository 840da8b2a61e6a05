use std::sync::{ Arc, Mutex };

/// Per-batch series plotted by the dashboard, as `(batch, value)` points.
#[derive(Debug, Default, Clone)]
pub struct MetricHistory {
    pub accuracy: Vec<(f64, f64)>,
    pub dice: Vec<(f64, f64)>,
    pub iou: Vec<(f64, f64)>,
    pub loss: Vec<(f64, f64)>,
}

impl MetricHistory {
    pub fn push(&mut self, batch: f64, metrics: &RunningMetrics) {
        self.accuracy.push((batch, metrics.accuracy));
        self.dice.push((batch, metrics.dice));
        self.iou.push((batch, metrics.iou));
        self.loss.push((batch, metrics.bce));
    }

    pub fn len(&self) -> usize {
        self.accuracy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accuracy.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Progress {
    pub current_batch: u32,
    /// `None` when the dataset does not report its length.
    pub max_batch: Option<u32>,
    pub samples: u64,
    pub finished: bool,
    /// Set when the run stopped on an error; no further snapshots follow.
    pub failed: Option<String>,
}

/// Running means so far. `dice` and `iou` are coefficients, not losses.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct RunningMetrics {
    pub bce: f64,
    pub dice: f64,
    pub iou: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatCell {
    pub text: String,
    pub fill: (u8, u8, u8),
    pub ink: (u8, u8, u8),
}

/// A confusion matrix already laid out for display.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Heatmap {
    pub title: Option<String>,
    /// Empty when tick labels are hidden.
    pub categories: Vec<String>,
    pub cells: Vec<Vec<HeatCell>>,
    pub x_label: String,
    pub y_label: String,
}

#[derive(Debug, Default, Clone)]
pub struct EvalState {
    pub model: String,
    pub progress: Progress,
    pub metrics: RunningMetrics,
    pub history: MetricHistory,
    pub log: Vec<(String, String)>,
    pub heatmap: Option<Heatmap>,
}

pub type StateMutex = Arc<Mutex<EvalState>>;
