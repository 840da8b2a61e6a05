use burn::{ prelude::Backend, tensor::Tensor };

/// A trained segmentation network as seen by the evaluator.
pub trait SegmentationModel<B: Backend> {
    /// Maps a `[N, C_in, H, W]` batch to per-class logits `[N, C, H, W]`.
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Shown in the summary as the model architecture.
    fn name(&self) -> String {
        short_type_name::<Self>()
    }
}

/// `my_crate::nets::UNet<Backend>` -> `UNet`.
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics).to_string()
}

/// Treats its input as the logits, for scoring predictions that were saved as masks.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaskPassthrough;

impl<B: Backend> SegmentationModel<B> for MaskPassthrough {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        input
    }
}
