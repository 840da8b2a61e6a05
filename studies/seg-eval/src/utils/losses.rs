use burn::{ prelude::Backend, tensor::{ ElementConversion, Int, Tensor } };

/// Added to numerator and denominator of the overlap scores so empty classes score 1.
pub const SMOOTH: f64 = 1e-7;

/// torch-style floor for `ln` terms so a saturated probability cannot produce `inf`.
const LOG_FLOOR: f64 = -100.0;

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    tensor.into_scalar().elem::<f64>()
}

/// Sums over the two spatial axes, keeping them as size-1 dims: `[N, C, 1, 1]`.
fn spatial_sum<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 4> {
    tensor.sum_dim(3).sum_dim(2)
}

/// Index of the highest channel per pixel: `[N, C, H, W]` -> `[N, H, W]`.
pub fn argmax_channels<B: Backend>(tensor: Tensor<B, 4>) -> Tensor<B, 3, Int> {
    tensor.argmax(1).squeeze::<3>(1)
}

/// Class-index map `[N, H, W]` to a one-hot float tensor `[N, C, H, W]`.
pub fn one_hot_nd<B: Backend>(indices: Tensor<B, 3, Int>, num_classes: usize) -> Tensor<B, 4> {
    let planes = (0..num_classes)
        .map(|class| {
            indices
                .clone()
                .equal_elem(class as i64)
                .float()
                .unsqueeze_dim::<4>(1)
        })
        .collect::<Vec<_>>();

    Tensor::cat(planes, 1)
}

/// Mean binary cross entropy between probabilities and (soft) targets of the same shape.
pub fn binary_cross_entropy<B: Backend>(probs: Tensor<B, 4>, targets: Tensor<B, 4>) -> f64 {
    let log_p = probs.clone().log().clamp_min(LOG_FLOOR);
    let log_not_p = probs.neg().add_scalar(1.0).log().clamp_min(LOG_FLOOR);

    let positive = targets.clone().mul(log_p);
    let negative = targets.neg().add_scalar(1.0).mul(log_not_p);

    scalar(positive.add(negative).neg().mean())
}

/// Mean Dice loss over every (sample, class) pair.
///
/// `mul` is `pred * true` and `add` is `pred + true`, both `[N, C, H, W]`.
pub fn dice_loss<B: Backend>(mul: Tensor<B, 4>, add: Tensor<B, 4>) -> f64 {
    let intersection = spatial_sum(mul);
    let total = spatial_sum(add);

    let score = intersection.mul_scalar(2.0).add_scalar(SMOOTH).div(total.add_scalar(SMOOTH));

    scalar(score.neg().add_scalar(1.0).mean())
}

/// Mean IoU (Jaccard) loss over every (sample, class) pair, same inputs as [`dice_loss`].
pub fn iou_loss<B: Backend>(mul: Tensor<B, 4>, add: Tensor<B, 4>) -> f64 {
    let intersection = spatial_sum(mul);
    let union = spatial_sum(add).sub(intersection.clone());

    let score = intersection.add_scalar(SMOOTH).div(union.add_scalar(SMOOTH));

    scalar(score.neg().add_scalar(1.0).mean())
}

/// Fraction of pixels whose predicted class equals the true class.
pub fn pixel_accuracy<B: Backend>(pred: Tensor<B, 3, Int>, truth: Tensor<B, 3, Int>) -> f64 {
    scalar(pred.equal(truth).float().mean())
}
