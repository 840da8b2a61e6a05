use std::{ collections::BTreeMap, fs::read_dir, path::{ Path, PathBuf } };

use burn::tensor::TensorData;

use crate::{ error::{ EvalError, Result }, utils::images::{ load_mask, Mask } };

const VALID_EXT: [&str; 5] = ["png", "bmp", "tif", "tiff", "pgm"];

/// Saved prediction masks paired with ground-truth masks of the same file stem.
pub struct MaskPairs {
    predictions_root: PathBuf,
    targets_root: PathBuf,
    pairs: Vec<(PathBuf, PathBuf)>,
    num_classes: usize,
}

impl MaskPairs {
    pub fn new<P: AsRef<Path>, T: AsRef<Path>>(
        predictions: P,
        targets: T,
        num_classes: usize
    ) -> Result<MaskPairs> {
        if num_classes == 0 {
            return Err(EvalError::Config("number of classes must be at least 1".to_string()));
        }
        let predictions = predictions.as_ref();
        let targets = targets.as_ref();

        let predicted = Self::get_masks_in_folder(predictions)?;
        let truths = Self::get_masks_in_folder(targets)?;

        let mut pairs = Vec::with_capacity(predicted.len());
        for (stem, prediction) in &predicted {
            match truths.get(stem) {
                Some(target) => pairs.push((prediction.clone(), target.clone())),
                None => tracing::warn!(mask = %stem, "no ground truth for prediction, skipping"),
            }
        }
        for stem in truths.keys().filter(|stem| !predicted.contains_key(*stem)) {
            tracing::warn!(mask = %stem, "no prediction for ground truth, skipping");
        }

        Ok(MaskPairs {
            predictions_root: predictions.to_path_buf(),
            targets_root: targets.to_path_buf(),
            pairs,
            num_classes,
        })
    }

    /// Mask files with a lossless image extension, keyed and sorted by file stem.
    fn get_masks_in_folder(dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
        let io_err = |source| EvalError::Io { path: dir.to_path_buf(), source };
        let mut masks: BTreeMap<String, PathBuf> = BTreeMap::new();

        for entry in read_dir(dir).map_err(io_err)? {
            let file_path = entry.map_err(io_err)?.path();
            let ext = file_path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !file_path.is_file() || !VALID_EXT.contains(&ext.as_str()) {
                continue;
            }
            let Some(stem) = file_path.file_stem() else {
                continue;
            };
            let stem = stem.to_string_lossy().into_owned();
            match masks.get(&stem) {
                // first path in sort order wins
                Some(kept) if *kept <= file_path => {
                    tracing::warn!(mask = %stem, ignored = %file_path.display(), "duplicate mask stem");
                }
                Some(kept) => {
                    tracing::warn!(mask = %stem, ignored = %kept.display(), "duplicate mask stem");
                    masks.insert(stem, file_path);
                }
                None => {
                    masks.insert(stem, file_path);
                }
            }
        }
        Ok(masks)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn print(&self) {
        tracing::info!(
            predictions = %self.predictions_root.display(),
            targets = %self.targets_root.display(),
            pairs = self.pairs.len(),
            classes = self.num_classes,
            "mask dataset"
        );
    }

    fn load_pair(&self, idx: usize) -> Result<(Mask, Mask)> {
        let (prediction_path, target_path) = &self.pairs[idx];
        let prediction = load_mask(prediction_path)?;
        let target = load_mask(target_path)?;

        if (prediction.width, prediction.height) != (target.width, target.height) {
            return Err(EvalError::ShapeMismatch {
                input: prediction.one_hot_shape(self.num_classes).to_vec(),
                target: target.one_hot_shape(self.num_classes).to_vec(),
            });
        }
        Ok((prediction, target))
    }

    /// One `(prediction, target)` pair as one-hot `[C, H, W]` tensors.
    pub fn get_item(&self, idx: usize) -> Result<(TensorData, TensorData)> {
        let (prediction, target) = self.load_pair(idx)?;
        Ok((prediction.one_hot(self.num_classes), target.one_hot(self.num_classes)))
    }
}

/// Walks a [`MaskPairs`] dataset in order, batching same-sized masks.
pub struct MaskLoader {
    dataset: MaskPairs,
    batch_size: usize,
    batch_index: usize,
}

impl MaskLoader {
    pub fn new(dataset: MaskPairs, batch_size: usize) -> MaskLoader {
        MaskLoader {
            dataset,
            batch_size: batch_size.max(1),
            batch_index: 0,
        }
    }

    /// Total number of mask pairs
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Number of batches based on the dataset size and batch size
    pub fn len_batch(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn load_batch(&self, start: usize, end: usize) -> Result<(TensorData, TensorData)> {
        if self.batch_size == 1 {
            return self.dataset.get_item(start);
        }

        let classes = self.dataset.num_classes;
        let mut shape: Option<[usize; 3]> = None;
        let mut predictions = Vec::new();
        let mut targets = Vec::new();

        for idx in start..end {
            let (prediction, target) = self.dataset.load_pair(idx)?;
            let item_shape = prediction.one_hot_shape(classes);
            let batch_shape = *shape.get_or_insert(item_shape);
            if batch_shape != item_shape {
                return Err(EvalError::ShapeMismatch {
                    input: batch_shape.to_vec(),
                    target: item_shape.to_vec(),
                });
            }
            predictions.extend(prediction.one_hot_values(classes));
            targets.extend(target.one_hot_values(classes));
        }

        let [c, h, w] = shape.unwrap_or([classes, 0, 0]);
        let dims = [end - start, c, h, w];
        Ok((TensorData::new(predictions, dims), TensorData::new(targets, dims)))
    }
}

impl Iterator for MaskLoader {
    type Item = Result<(TensorData, TensorData)>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.batch_index * self.batch_size;
        if start >= self.dataset.len() {
            return None;
        }
        let end = (start + self.batch_size).min(self.dataset.len());
        self.batch_index += 1;

        Some(self.load_batch(start, end))
    }
}
