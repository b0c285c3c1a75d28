//! Core types, error definitions, and data structures for edge_dataset.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

/// Raw mask values strictly above this are treated as boundary pixels.
pub const BOUNDARY_THRESHOLD: f32 = 2.0;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "images and labels disagree on sample ids (missing labels: {missing_labels:?}, missing images: {missing_images:?})"
    )]
    KeyMismatch {
        missing_labels: Vec<String>,
        missing_images: Vec<String>,
    },
    #[error("sample {id} failed validation: {msg}")]
    Validation { id: String, msg: String },
    #[error("sample {id} is {actual:?} but the batch expects {expected:?} (h, w, c)")]
    ShapeMismatch {
        id: String,
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
    #[error("batch size must be at least 1")]
    EmptyBatchSize,
    #[error("failed to read tensor data: {0}")]
    TensorRead(String),
    #[error("{0}")]
    Other(String),
}

/// Dense row-major H x W x C array of `f32` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelArray {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl PixelArray {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> DatasetResult<Self> {
        let arr = Self {
            height,
            width,
            channels,
            data,
        };
        if !arr.is_consistent() {
            return Err(DatasetError::Other(format!(
                "pixel buffer holds {} values, expected {}x{}x{}",
                arr.data.len(),
                height,
                width,
                channels
            )));
        }
        Ok(arr)
    }

    pub fn filled(height: usize, width: usize, channels: usize, value: f32) -> Self {
        Self {
            height,
            width,
            channels,
            data: vec![value; height * width * channels],
        }
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    pub fn is_consistent(&self) -> bool {
        self.data.len() == self.height * self.width * self.channels
    }

    #[inline]
    fn offset(&self, y: usize, x: usize) -> usize {
        (y * self.width + x) * self.channels
    }

    /// Value at `(y, x, c)`, or `None` outside the array.
    pub fn get(&self, y: usize, x: usize, c: usize) -> Option<f32> {
        if y >= self.height || x >= self.width || c >= self.channels {
            return None;
        }
        self.data.get(self.offset(y, x) + c).copied()
    }

    /// Mirror left-right (reverse the column order of every row).
    pub fn flip_horizontal(&mut self) {
        let c = self.channels;
        for y in 0..self.height {
            for x in 0..self.width / 2 {
                let a = self.offset(y, x);
                let b = self.offset(y, self.width - 1 - x);
                for k in 0..c {
                    self.data.swap(a + k, b + k);
                }
            }
        }
    }

    /// Mirror top-bottom (reverse the row order).
    pub fn flip_vertical(&mut self) {
        let row = self.width * self.channels;
        for y in 0..self.height / 2 {
            let a = y * row;
            let b = (self.height - 1 - y) * row;
            for k in 0..row {
                self.data.swap(a + k, b + k);
            }
        }
    }

    /// Swap the two spatial axes, producing a W x H x C array.
    pub fn transposed(&self) -> Self {
        let c = self.channels;
        let mut data = vec![0.0f32; self.data.len()];
        for y in 0..self.height {
            for x in 0..self.width {
                let src = self.offset(y, x);
                let dst = (x * self.height + y) * c;
                data[dst..dst + c].copy_from_slice(&self.data[src..src + c]);
            }
        }
        Self {
            height: self.width,
            width: self.height,
            channels: c,
            data,
        }
    }

    /// Boundary mask: 1.0 where the raw value exceeds [`BOUNDARY_THRESHOLD`], else 0.0.
    pub fn binarized(&self) -> Self {
        Self {
            height: self.height,
            width: self.width,
            channels: self.channels,
            data: self
                .data
                .iter()
                .map(|v| if *v > BOUNDARY_THRESHOLD { 1.0 } else { 0.0 })
                .collect(),
        }
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}

/// One stored image plus its orientation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub x: PixelArray,
    /// The array axes were swapped relative to the canonical orientation when stored.
    #[serde(default)]
    pub transposed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRecord {
    pub y: PixelArray,
}
