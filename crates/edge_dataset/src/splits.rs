//! Loading, validating and merging dataset splits.

use crate::types::{DatasetError, DatasetResult, ImageRecord, LabelRecord, PixelArray};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Images and labels of one split, keyed by sample id.
///
/// The two maps always hold the same id set; every constructor checks it.
/// Iteration follows the sorted id order, which is the fixed enumeration order
/// used for unshuffled passes.
#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    images: BTreeMap<String, ImageRecord>,
    labels: BTreeMap<String, LabelRecord>,
}

impl DatasetSplit {
    pub fn new(
        images: BTreeMap<String, ImageRecord>,
        labels: BTreeMap<String, LabelRecord>,
    ) -> DatasetResult<Self> {
        check_same_ids(&images, &labels)?;
        for (id, img) in &images {
            // check_same_ids guarantees the label exists.
            if let Some(label) = labels.get(id) {
                validate_pair(id, &img.x, &label.y)?;
            }
        }
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }

    pub fn image(&self, id: &str) -> Option<&ImageRecord> {
        self.images.get(id)
    }

    pub fn label(&self, id: &str) -> Option<&LabelRecord> {
        self.labels.get(id)
    }

    /// Look up both halves of a sample.
    pub fn pair(&self, id: &str) -> DatasetResult<(&ImageRecord, &LabelRecord)> {
        match (self.images.get(id), self.labels.get(id)) {
            (Some(img), Some(label)) => Ok((img, label)),
            _ => Err(DatasetError::Other(format!("unknown sample id {id}"))),
        }
    }

    /// Fold `other` into this split. Ids present in both take `other`'s records.
    pub fn merge(&mut self, other: DatasetSplit) {
        self.images.extend(other.images);
        self.labels.extend(other.labels);
    }
}

fn check_same_ids(
    images: &BTreeMap<String, ImageRecord>,
    labels: &BTreeMap<String, LabelRecord>,
) -> DatasetResult<()> {
    let missing_labels: Vec<String> = images
        .keys()
        .filter(|k| !labels.contains_key(*k))
        .cloned()
        .collect();
    let missing_images: Vec<String> = labels
        .keys()
        .filter(|k| !images.contains_key(*k))
        .cloned()
        .collect();
    if missing_labels.is_empty() && missing_images.is_empty() {
        Ok(())
    } else {
        Err(DatasetError::KeyMismatch {
            missing_labels,
            missing_images,
        })
    }
}

fn validate_pair(id: &str, image: &PixelArray, mask: &PixelArray) -> DatasetResult<()> {
    if !image.is_consistent() {
        return Err(DatasetError::Validation {
            id: id.to_string(),
            msg: format!(
                "image buffer holds {} values for shape {:?}",
                image.data.len(),
                image.shape()
            ),
        });
    }
    if !mask.is_consistent() {
        return Err(DatasetError::Validation {
            id: id.to_string(),
            msg: format!(
                "mask buffer holds {} values for shape {:?}",
                mask.data.len(),
                mask.shape()
            ),
        });
    }
    if mask.channels != 1 {
        return Err(DatasetError::Validation {
            id: id.to_string(),
            msg: format!("mask must be single-channel, got {}", mask.channels),
        });
    }
    if (image.height, image.width) != (mask.height, mask.width) {
        return Err(DatasetError::Validation {
            id: id.to_string(),
            msg: format!(
                "image is {}x{} but mask is {}x{}",
                image.height, image.width, mask.height, mask.width
            ),
        });
    }
    Ok(())
}

/// The two splits consumed by a training run.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub train: DatasetSplit,
    pub valid: DatasetSplit,
}

/// Directory holding `<split>_images.json` / `<split>_labels.json` pairs.
#[derive(Debug, Clone)]
pub struct DatasetFiles {
    pub root: PathBuf,
}

impl DatasetFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn images_path(&self, split: &str) -> PathBuf {
        self.root.join(format!("{split}_images.json"))
    }

    pub fn labels_path(&self, split: &str) -> PathBuf {
        self.root.join(format!("{split}_labels.json"))
    }

    pub fn load_split(&self, split: &str) -> DatasetResult<DatasetSplit> {
        let images = read_json(&self.images_path(split))?;
        let labels = read_json(&self.labels_path(split))?;
        DatasetSplit::new(images, labels)
    }

    /// Load train/valid. With `combine_train_val`, valid is folded into train and
    /// the test split becomes the validation split.
    pub fn load(&self, combine_train_val: bool) -> DatasetResult<TrainingData> {
        let mut train = self.load_split("train")?;
        let mut valid = self.load_split("valid")?;
        if combine_train_val {
            train.merge(valid);
            valid = self.load_split("test")?;
        }
        tracing::info!(
            train = train.len(),
            valid = valid.len(),
            combine_train_val,
            "loaded dataset from {}",
            self.root.display()
        );
        Ok(TrainingData { train, valid })
    }

    /// Serialize a split back to disk in the same layout `load_split` reads.
    pub fn write_split(&self, split: &str, data: &DatasetSplit) -> DatasetResult<()> {
        fs::create_dir_all(&self.root).map_err(|source| DatasetError::Io {
            path: self.root.clone(),
            source,
        })?;
        write_json(&self.images_path(split), &data.images)?;
        write_json(&self.labels_path(split), &data.labels)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> DatasetResult<T> {
    let raw = fs::read(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&raw).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> DatasetResult<()> {
    let raw = serde_json::to_vec(value).map_err(|source| DatasetError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, raw).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}
