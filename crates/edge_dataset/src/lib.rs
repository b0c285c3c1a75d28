//! Dataset splits, augmentation and Burn-compatible minibatching for boundary detection.
//!
//! This crate provides:
//! - Loading and validating paired image/label splits from disk
//! - Joint image/mask augmentation (mirroring, gamma)
//! - Truncating minibatch iteration over a split
//! - Conversion of stacked batches into Burn tensors

pub mod aug;
pub mod batch;
pub mod splits;
pub mod types;

#[cfg(feature = "burn-runtime")]
pub mod tensors;

pub use aug::{adjust_gamma, apply_decision, AugmentDecision, TransformPipeline};
pub use batch::{Batch, MinibatchSampler, SamplerConfig};
pub use splits::{DatasetFiles, DatasetSplit, TrainingData};
pub use types::*;

#[cfg(feature = "burn-runtime")]
pub use tensors::unstack_maps;
