//! The evaluation loop: forward every batch, accumulate batch-size weighted
//! metrics and the pixel confusion matrix.

use std::{ fmt, sync::mpsc::Sender };

use burn::{ prelude::Backend, tensor::{ activation::softmax, Int, Tensor, TensorData } };
use serde::{ Deserialize, Serialize };
use ui::state::{ EvalState, Progress, RunningMetrics };

use crate::{
    error::{ EvalError, Result },
    model::SegmentationModel,
    utils::{
        confusion::ConfusionMatrix,
        heatmap::{ draw_confusion_matrix, HeatmapOptions },
        losses::{
            argmax_channels,
            binary_cross_entropy,
            dice_loss,
            iou_loss,
            one_hot_nd,
            pixel_accuracy,
        },
    },
};

/// One `(input, target)` item of a dataset, of rank 3 (single image) or 4 (batch).
#[derive(Debug, Clone)]
pub struct Sample {
    pub input: TensorData,
    pub target: TensorData,
}

/// Anything a dataset iterator may yield.
pub trait IntoSample {
    fn into_sample(self) -> Result<Sample>;
}

impl IntoSample for Sample {
    fn into_sample(self) -> Result<Sample> {
        Ok(self)
    }
}

impl IntoSample for (TensorData, TensorData) {
    fn into_sample(self) -> Result<Sample> {
        Ok(Sample { input: self.0, target: self.1 })
    }
}

impl<T: IntoSample> IntoSample for Result<T> {
    fn into_sample(self) -> Result<Sample> {
        self?.into_sample()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model: String,
    pub samples: usize,
    pub bce: f64,
    pub dice_loss: f64,
    pub iou_loss: f64,
    /// Pixel-wise, in `[0, 1]`.
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
}

impl EvaluationReport {
    pub fn dice_coefficient(&self) -> f64 {
        1.0 - self.dice_loss
    }

    pub fn iou(&self) -> f64 {
        1.0 - self.iou_loss
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EvalError::Data(e.to_string()))
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model Architecture:      {}", self.model)?;
        writeln!(f, "Binary Cross Entropy:    {:7.5}", self.bce)?;
        writeln!(f, "Dice-Coefficient:        {:7.5}", self.dice_coefficient())?;
        writeln!(f, "Intersection over Union: {:7.5}", self.iou())?;
        write!(f, "Pixel-Wise Accuracy:     {:7.4}%", self.accuracy * 100.0)
    }
}

/// Sums weighted by batch size, divided out at the end.
#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    bce: f64,
    dice: f64,
    iou: f64,
    correct: f64,
    total: usize,
}

impl Accumulator {
    fn mean(&self, sum: f64) -> f64 {
        if self.total == 0 { 0.0 } else { sum / (self.total as f64) }
    }

    fn running(&self) -> RunningMetrics {
        RunningMetrics {
            bce: self.mean(self.bce),
            dice: 1.0 - self.mean(self.dice),
            iou: 1.0 - self.mean(self.iou),
            accuracy: self.mean(self.correct),
        }
    }
}

fn labels<B: Backend>(indices: Tensor<B, 3, Int>) -> Result<Vec<i64>> {
    indices
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| EvalError::Data(format!("{e:?}")))
}

pub struct Evaluator<B: Backend> {
    device: B::Device,
    num_classes: Option<usize>,
    verbose: bool,
    progress: Option<(Sender<EvalState>, Option<usize>)>,
    heatmap: HeatmapOptions,
}

impl<B: Backend> Default for Evaluator<B> {
    fn default() -> Self {
        Self {
            device: B::Device::default(),
            num_classes: None,
            verbose: true,
            progress: None,
            heatmap: HeatmapOptions::default(),
        }
    }
}

impl<B: Backend> Evaluator<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: B::Device) -> Self {
        self.device = device;
        self
    }

    /// Fixes the confusion matrix label range to `0..num_classes` instead of the logits' channel count.
    pub fn with_num_classes(mut self, num_classes: usize) -> Self {
        self.num_classes = Some(num_classes);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Streams a dashboard snapshot after every batch. `batches` is the expected count, if known.
    pub fn with_progress(mut self, tx: Sender<EvalState>, batches: Option<usize>) -> Self {
        self.progress = Some((tx, batches));
        self
    }

    /// Layout of the heatmap included in the final dashboard snapshot.
    pub fn with_heatmap(mut self, options: HeatmapOptions) -> Self {
        self.heatmap = options;
        self
    }

    /// Brings an item to `[N, C, H, W]` on the evaluation device, targets clamped to `[0, 1]`.
    fn to_batch(&self, sample: Sample) -> Result<(Tensor<B, 4>, Tensor<B, 4>, usize)> {
        let Sample { input, target } = sample;
        let mismatch = |input: &TensorData, target: &TensorData| EvalError::ShapeMismatch {
            input: input.shape.clone(),
            target: target.shape.clone(),
        };

        let (x, truth) = match input.shape.len() {
            4 => {
                if target.shape.len() != 4 || target.shape[0] != input.shape[0] {
                    return Err(mismatch(&input, &target));
                }
                (
                    Tensor::<B, 4>::from_data(input.convert::<B::FloatElem>(), &self.device),
                    Tensor::<B, 4>::from_data(target.convert::<B::FloatElem>(), &self.device),
                )
            }
            3 => {
                if target.shape.len() != 3 {
                    return Err(mismatch(&input, &target));
                }
                (
                    Tensor::<B, 3>
                        ::from_data(input.convert::<B::FloatElem>(), &self.device)
                        .unsqueeze::<4>(),
                    Tensor::<B, 3>
                        ::from_data(target.convert::<B::FloatElem>(), &self.device)
                        .unsqueeze::<4>(),
                )
            }
            ndim => {
                return Err(EvalError::InvalidInputDim { ndim });
            }
        };

        let size = x.dims()[0];
        Ok((x, truth.clamp(0.0, 1.0), size))
    }

    /// Scores `model` on every item of `dataset`. With a progress sender attached, the last
    /// snapshot either carries the heatmap or the error that stopped the run.
    pub fn evaluate<M, I>(&self, model: &M, dataset: I) -> Result<EvaluationReport>
        where M: SegmentationModel<B> + ?Sized, I: IntoIterator, I::Item: IntoSample
    {
        let model_name = model.name();
        tracing::info!(model = %model_name, device = ?self.device, "starting evaluation");

        let mut state = EvalState {
            model: model_name,
            progress: Progress {
                max_batch: self.progress.as_ref().and_then(|(_, batches)| batches.map(|b| b as u32)),
                ..Progress::default()
            },
            ..EvalState::default()
        };

        let outcome = self
            .run_batches(model, dataset, &mut state)
            .and_then(|report| {
                self.send_final(state.clone(), &report)?;
                Ok(report)
            });
        if let Err(err) = &outcome {
            tracing::error!(error = %err, "evaluation failed");
            self.send_failure(state, err);
        }
        outcome
    }

    fn run_batches<M, I>(&self, model: &M, dataset: I, state: &mut EvalState) -> Result<EvaluationReport>
        where M: SegmentationModel<B> + ?Sized, I: IntoIterator, I::Item: IntoSample
    {
        let mut sums = Accumulator::default();
        let mut confusion: Option<ConfusionMatrix> = None;

        for (batch, item) in dataset.into_iter().enumerate() {
            let (x, truth, size) = self.to_batch(item.into_sample()?)?;

            let pred = model.forward(x);
            if pred.dims() != truth.dims() {
                return Err(EvalError::PredictionShape {
                    prediction: pred.dims().to_vec(),
                    target: truth.dims().to_vec(),
                });
            }
            let channels = pred.dims()[1];
            let weight = size as f64;

            sums.bce += binary_cross_entropy(softmax(pred.clone(), 1), truth.clone()) * weight;

            let true_idx = argmax_channels(truth.clone());
            let pred_idx = argmax_channels(pred);
            confusion
                .get_or_insert_with(|| ConfusionMatrix::new(self.num_classes.unwrap_or(channels)))
                .accumulate(&labels(true_idx.clone())?, &labels(pred_idx.clone())?);

            sums.correct += pixel_accuracy(pred_idx.clone(), true_idx) * weight;

            let pred = one_hot_nd(pred_idx, channels);
            let (mul, add) = (pred.clone().mul(truth.clone()), pred.add(truth));
            sums.dice += dice_loss(mul.clone(), add.clone()) * weight;
            sums.iou += iou_loss(mul, add) * weight;
            sums.total += size;

            tracing::debug!(batch, size, running = ?sums.running(), "evaluated batch");
            self.send_progress(state, batch + 1, &sums);
        }

        let Some(confusion) = confusion else {
            return Err(EvalError::EmptyDataset);
        };

        let report = EvaluationReport {
            model: state.model.clone(),
            samples: sums.total,
            bce: sums.mean(sums.bce),
            dice_loss: sums.mean(sums.dice),
            iou_loss: sums.mean(sums.iou),
            accuracy: sums.mean(sums.correct),
            confusion,
        };

        tracing::info!(
            samples = report.samples,
            bce = report.bce,
            dice = report.dice_coefficient(),
            iou = report.iou(),
            accuracy = report.accuracy,
            "evaluation finished"
        );
        if self.verbose {
            println!("{report}");
        }
        Ok(report)
    }

    fn send_progress(&self, state: &mut EvalState, batch: usize, sums: &Accumulator) {
        let Some((tx, _)) = &self.progress else {
            return;
        };

        let running = sums.running();
        state.progress.current_batch = batch as u32;
        state.progress.samples = sums.total as u64;
        state.metrics = running;
        state.history.push(batch as f64, &running);
        state.log.push((format!("Batch {batch}"), format!("{:.2}%", running.accuracy * 100.0)));

        if tx.send(state.clone()).is_err() {
            tracing::debug!("progress receiver dropped");
        }
    }

    fn send_final(&self, mut state: EvalState, report: &EvaluationReport) -> Result<()> {
        let Some((tx, _)) = &self.progress else {
            return Ok(());
        };

        let figure = draw_confusion_matrix(&report.confusion, &self.heatmap)?;
        state.progress.finished = true;
        state.heatmap = Some(figure.to_heatmap());
        state.log.push(("-> Final".to_string(), format!("{:.4}%", report.accuracy * 100.0)));

        if tx.send(state).is_err() {
            tracing::debug!("progress receiver dropped");
        }
        Ok(())
    }

    fn send_failure(&self, mut state: EvalState, err: &EvalError) {
        let Some((tx, _)) = &self.progress else {
            return;
        };

        state.progress.failed = Some(err.to_string());
        state.log.push(("-> Failed".to_string(), "-".to_string()));

        if tx.send(state).is_err() {
            tracing::debug!("progress receiver dropped");
        }
    }
}

/// Runs `model` over `dataset` on `device` (the backend default when `None`).
pub fn evaluate<B, M, I>(
    model: &M,
    dataset: I,
    device: Option<B::Device>,
    verbose: bool
) -> Result<EvaluationReport>
    where B: Backend, M: SegmentationModel<B> + ?Sized, I: IntoIterator, I::Item: IntoSample
{
    let mut evaluator = Evaluator::<B>::new().with_verbose(verbose);
    if let Some(device) = device {
        evaluator = evaluator.with_device(device);
    }
    evaluator.evaluate(model, dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use burn::backend::NdArray;
    use std::sync::mpsc;

    use crate::model::MaskPassthrough;

    type B = NdArray;

    fn one_hot(classes: &[usize], num_classes: usize, shape: [usize; 2]) -> Vec<f32> {
        let plane = classes.len();
        let mut data = vec![0.0; num_classes * plane];
        for (i, &c) in classes.iter().enumerate() {
            data[c * plane + i] = 1.0;
        }
        assert_eq!(plane, shape[0] * shape[1]);
        data
    }

    fn sample(pred: &[usize], truth: &[usize]) -> (TensorData, TensorData) {
        (
            TensorData::new(one_hot(pred, 2, [2, 2]), [2, 2, 2]),
            TensorData::new(one_hot(truth, 2, [2, 2]), [2, 2, 2]),
        )
    }

    #[test]
    fn perfect_predictions_score_perfectly() {
        let dataset = vec![sample(&[0, 1, 1, 0], &[0, 1, 1, 0])];
        let report = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, dataset)
            .unwrap();

        assert_eq!(report.samples, 1);
        assert_relative_eq!(report.accuracy, 1.0);
        assert_relative_eq!(report.dice_coefficient(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(report.iou(), 1.0, epsilon = 1e-6);
        assert_eq!(report.confusion.rows(), &[vec![2, 0], vec![0, 2]]);
        assert_eq!(report.model, "MaskPassthrough");
    }

    #[test]
    fn metrics_are_weighted_by_batch_size() {
        // a batch of two perfect images, then one image with half its pixels wrong
        let batch = TensorData::new(
            [one_hot(&[0, 0, 1, 1], 2, [2, 2]), one_hot(&[1, 1, 0, 0], 2, [2, 2])].concat(),
            [2, 2, 2, 2]
        );
        let dataset = vec![(batch.clone(), batch), sample(&[0, 0, 0, 0], &[0, 0, 1, 1])];

        let report = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, dataset)
            .unwrap();

        assert_eq!(report.samples, 3);
        assert_relative_eq!(report.accuracy, (2.0 * 1.0 + 0.5) / 3.0, epsilon = 1e-6);
        assert_eq!(report.confusion.rows(), &[vec![6, 0], vec![2, 4]]);
        // third image: class 0 dice 2*2/(4+2), class 1 dice 0 (+smooth)
        let dice_third = 1.0 - (4.0 / 6.0 + 0.0) / 2.0;
        assert_relative_eq!(report.dice_loss, dice_third / 3.0, epsilon = 1e-5);
    }

    #[test]
    fn rank_two_input_is_rejected() {
        let bad = (TensorData::new(vec![0.0_f32; 4], [2, 2]), TensorData::new(vec![0.0_f32; 4], [2, 2]));
        let err = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, vec![bad])
            .unwrap_err();
        assert!(matches!(err, EvalError::InvalidInputDim { ndim: 2 }));
    }

    #[test]
    fn target_rank_must_match() {
        let (input, _) = sample(&[0, 0, 0, 0], &[0, 0, 0, 0]);
        let target = TensorData::new(vec![0.0_f32; 8], [1, 2, 2, 2]);
        let err = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, vec![(input, target)])
            .unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { .. }));
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let err = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, Vec::<(TensorData, TensorData)>::new())
            .unwrap_err();
        assert!(matches!(err, EvalError::EmptyDataset));
    }

    #[test]
    fn loader_errors_propagate() {
        let items: Vec<Result<(TensorData, TensorData)>> = vec![Err(EvalError::Data("broken".into()))];
        let err = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, items)
            .unwrap_err();
        assert!(matches!(err, EvalError::Data(_)));
    }

    #[test]
    fn fixed_label_range_widens_matrix() {
        let report = Evaluator::<B>::new()
            .with_verbose(false)
            .with_num_classes(6)
            .evaluate(&MaskPassthrough, vec![sample(&[0, 1, 1, 1], &[0, 1, 0, 1])])
            .unwrap();
        assert_eq!(report.confusion.n_classes(), 6);
        assert_eq!(report.confusion.get(0, 1), 1);
        assert_eq!(report.confusion.total(), 4);
    }

    #[test]
    fn progress_snapshots_end_with_heatmap() {
        let (tx, rx) = mpsc::channel();
        let dataset = vec![sample(&[0, 1, 1, 0], &[0, 1, 1, 0]), sample(&[1, 1, 1, 1], &[0, 1, 1, 1])];

        Evaluator::<B>::new()
            .with_verbose(false)
            .with_progress(tx, Some(2))
            .evaluate(&MaskPassthrough, dataset)
            .unwrap();

        let states = rx.try_iter().collect::<Vec<_>>();
        assert_eq!(states.len(), 3);
        assert_eq!(states[0].progress.current_batch, 1);
        assert_eq!(states[0].progress.max_batch, Some(2));
        assert_eq!(states[1].history.len(), 2);
        let last = states.last().unwrap();
        assert!(last.progress.finished);
        assert_eq!(last.heatmap.as_ref().unwrap().cells.len(), 2);
    }

    #[test]
    fn failed_run_ends_with_error_snapshot() {
        let (tx, rx) = mpsc::channel();
        let broken = EvalError::ShapeMismatch { input: vec![2, 2, 2], target: vec![2, 3, 1] };
        let dataset: Vec<Result<(TensorData, TensorData)>> = vec![
            Ok(sample(&[0, 1, 1, 0], &[0, 1, 1, 0])),
            Err(broken),
        ];

        let err = Evaluator::<B>::new()
            .with_verbose(false)
            .with_progress(tx, Some(2))
            .evaluate(&MaskPassthrough, dataset)
            .unwrap_err();
        assert!(matches!(err, EvalError::ShapeMismatch { .. }));

        let states = rx.try_iter().collect::<Vec<_>>();
        assert_eq!(states.len(), 2);
        let last = states.last().unwrap();
        assert!(!last.progress.finished);
        assert_eq!(last.progress.current_batch, 1);
        assert!(last.progress.failed.as_ref().unwrap().contains("Shape mismatch"));
        assert!(last.heatmap.is_none());
    }

    #[test]
    fn empty_run_reports_failure_to_dashboard() {
        let (tx, rx) = mpsc::channel();
        let result = Evaluator::<B>::new()
            .with_verbose(false)
            .with_progress(tx, None)
            .evaluate(&MaskPassthrough, Vec::<(TensorData, TensorData)>::new());
        assert!(matches!(result, Err(EvalError::EmptyDataset)));

        let states = rx.try_iter().collect::<Vec<_>>();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].progress.failed.as_deref(), Some("Dataset yielded no samples"));
    }

    #[test]
    fn targets_are_clamped_to_unit_range() {
        let (input, _) = sample(&[0, 1, 1, 0], &[0, 1, 1, 0]);
        let scaled = one_hot(&[0, 1, 1, 0], 2, [2, 2])
            .into_iter()
            .map(|v| v * 3.0)
            .collect::<Vec<_>>();
        let target = TensorData::new(scaled, [2, 2, 2]);

        let report = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, vec![(input, target)])
            .unwrap();

        assert_relative_eq!(report.accuracy, 1.0);
        assert_relative_eq!(report.dice_loss, 0.0, epsilon = 1e-6);
        assert_relative_eq!(report.iou_loss, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn integer_inputs_are_cast_to_float() {
        let bytes = one_hot(&[1, 1, 0, 0], 2, [2, 2])
            .into_iter()
            .map(|v| v as u8)
            .collect::<Vec<_>>();
        let input = TensorData::new(bytes, [2, 2, 2]);
        let (_, target) = sample(&[1, 1, 0, 0], &[1, 1, 0, 0]);

        let report = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&MaskPassthrough, vec![(input, target)])
            .unwrap();

        assert_relative_eq!(report.accuracy, 1.0);
        assert_eq!(report.confusion.rows(), &[vec![2, 0], vec![0, 2]]);
    }

    struct FirstChannel;

    impl<Bk: Backend> SegmentationModel<Bk> for FirstChannel {
        fn forward(&self, input: Tensor<Bk, 4>) -> Tensor<Bk, 4> {
            input.narrow(1, 0, 1)
        }
    }

    #[test]
    fn model_output_must_match_target() {
        let err = Evaluator::<B>::new()
            .with_verbose(false)
            .evaluate(&FirstChannel, vec![sample(&[0, 1, 1, 0], &[0, 1, 1, 0])])
            .unwrap_err();

        match err {
            EvalError::PredictionShape { prediction, target } => {
                assert_eq!(prediction, vec![1, 1, 2, 2]);
                assert_eq!(target, vec![1, 2, 2, 2]);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn summary_matches_fixed_layout() {
        let report = EvaluationReport {
            model: "UNet".to_string(),
            samples: 4,
            bce: 0.123456,
            dice_loss: 0.25,
            iou_loss: 0.5,
            accuracy: 0.98765,
            confusion: ConfusionMatrix::new(2),
        };
        assert_eq!(
            report.to_string(),
            "Model Architecture:      UNet\n\
             Binary Cross Entropy:    0.12346\n\
             Dice-Coefficient:        0.75000\n\
             Intersection over Union: 0.50000\n\
             Pixel-Wise Accuracy:     98.7650%"
        );
    }
}
