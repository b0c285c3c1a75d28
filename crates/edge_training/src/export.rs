//! Periodic validation export: one grayscale PNG per validation sample.

use anyhow::{anyhow, bail, Result};
use edge_dataset::{DatasetSplit, MinibatchSampler, PixelArray, SamplerConfig};
use image::GrayImage;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::TrainingEngine;

pub const ARTIFACT_EXTENSION: &str = "png";

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub epoch: usize,
    pub dir: PathBuf,
    pub written: usize,
    /// Tail samples not exported because they did not fill a batch.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ValidationExporter {
    root: PathBuf,
    batch_size: usize,
}

impl ValidationExporter {
    pub fn new(root: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            root: root.into(),
            batch_size,
        }
    }

    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.root.join(format!("T_{epoch}"))
    }

    /// Run the validation split through `engine` in id order and write the fused
    /// probability maps under `T_<epoch>`.
    pub fn export<E: TrainingEngine + ?Sized>(
        &self,
        epoch: usize,
        split: &DatasetSplit,
        engine: &E,
    ) -> Result<ExportSummary> {
        let dir = self.epoch_dir(epoch);
        fs::create_dir_all(&dir).map_err(|e| anyhow!("failed to create {}: {e}", dir.display()))?;

        let sampler = MinibatchSampler::new(split, SamplerConfig::sequential(self.batch_size))?;
        let skipped = sampler.dropped().len();
        let mut written = 0;
        for batch in sampler {
            let batch = batch?;
            let maps = engine.predict_fused(&batch)?;
            if maps.len() != batch.len() {
                bail!(
                    "engine returned {} maps for a batch of {}",
                    maps.len(),
                    batch.len()
                );
            }
            for (id, map) in batch.ids.iter().zip(&maps) {
                let record = split
                    .image(id)
                    .ok_or_else(|| anyhow!("validation id {id} vanished from split"))?;
                let path = dir.join(artifact_name(id));
                probability_to_gray(map, record.transposed)?
                    .save(&path)
                    .map_err(|e| anyhow!("failed to write {}: {e}", path.display()))?;
                written += 1;
            }
        }
        if skipped > 0 {
            tracing::warn!(
                "{skipped} validation samples skipped (split of {} with batch size {})",
                split.len(),
                self.batch_size
            );
        }
        tracing::info!("Saved {written} predictions to: {}", dir.display());
        Ok(ExportSummary {
            epoch,
            dir,
            written,
            skipped,
        })
    }
}

/// Sample id with its extension swapped for `.png`.
pub fn artifact_name(id: &str) -> PathBuf {
    Path::new(id).with_extension(ARTIFACT_EXTENSION)
}

/// Quantize `[0, 1]` probabilities to 8 bits, undoing the stored transpose.
pub fn probability_to_gray(map: &PixelArray, transposed: bool) -> Result<GrayImage> {
    if map.channels != 1 {
        bail!("expected a single-channel map, got {} channels", map.channels);
    }
    let map = if transposed { map.transposed() } else { map.clone() };
    let pixels: Vec<u8> = map.data.iter().map(|p| (255.0 * p) as u8).collect();
    GrayImage::from_raw(map.width as u32, map.height as u32, pixels)
        .ok_or_else(|| anyhow!("map buffer does not match {}x{}", map.height, map.width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_swaps_extension() {
        assert_eq!(artifact_name("100007.jpg"), PathBuf::from("100007.png"));
        assert_eq!(artifact_name("plain"), PathBuf::from("plain.png"));
    }

    #[test]
    fn quantization_truncates_and_saturates() {
        let map = PixelArray::new(1, 4, 1, vec![0.0, 0.5, 1.0, 1.7]).unwrap();
        let img = probability_to_gray(&map, false).unwrap();
        assert_eq!(img.as_raw(), &vec![0u8, 127, 255, 255]);
    }

    #[test]
    fn transposed_map_swaps_dimensions() {
        let map = PixelArray::new(2, 3, 1, vec![0.0, 0.2, 0.4, 0.6, 0.8, 1.0]).unwrap();
        let img = probability_to_gray(&map, true).unwrap();
        assert_eq!(img.dimensions(), (2, 3));
        // (row 0, col 1) of the transpose is (row 1, col 0) of the map
        assert_eq!(img.get_pixel(1, 0).0[0], (255.0f32 * 0.6) as u8);
    }
}
