use std::path::Path;

use burn::tensor::TensorData;

use crate::error::{ EvalError, Result };

/// Grayscale mask whose pixel values are class indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

pub fn load_mask<P: AsRef<Path>>(path: P) -> Result<Mask> {
    let path = path.as_ref();
    let img = image::open(path).map_err(|source| EvalError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let luma = img.to_luma8();
    let (width, height) = luma.dimensions();

    Ok(Mask {
        width,
        height,
        pixels: luma.into_raw(),
    })
}

impl Mask {
    /// One-hot `[C, H, W]` planes. Pixels with an index `>= num_classes` stay all-zero.
    pub fn one_hot(&self, num_classes: usize) -> TensorData {
        TensorData::new(self.one_hot_values(num_classes), self.one_hot_shape(num_classes))
    }

    pub fn one_hot_shape(&self, num_classes: usize) -> [usize; 3] {
        [num_classes, self.height as usize, self.width as usize]
    }

    pub fn one_hot_values(&self, num_classes: usize) -> Vec<f32> {
        let plane = self.pixels.len();
        let mut data = vec![0.0_f32; num_classes * plane];

        for (i, &class) in self.pixels.iter().enumerate() {
            let class = class as usize;
            if class < num_classes {
                data[class * plane + i] = 1.0;
            }
        }
        data
    }
}
