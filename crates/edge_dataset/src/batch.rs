//! Minibatch sampling for training and validation passes.

use crate::aug::TransformPipeline;
use crate::splits::DatasetSplit;
use crate::types::{DatasetError, DatasetResult};
use rand::{seq::SliceRandom, SeedableRng};

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub batch_size: usize,
    /// Permute the id list once before batching.
    pub shuffle: bool,
    /// Augment samples. Only honored on shuffled (training) passes.
    pub augment: bool,
    /// Seed for reproducible shuffling/augmentation.
    pub seed: Option<u64>,
    pub transform: TransformPipeline,
}

impl SamplerConfig {
    pub fn training(batch_size: usize, augment: bool, seed: Option<u64>) -> Self {
        Self {
            batch_size,
            shuffle: true,
            augment,
            seed,
            transform: TransformPipeline::default(),
        }
    }

    /// Deterministic full pass: fixed order, no augmentation.
    pub fn sequential(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            augment: false,
            seed: None,
            transform: TransformPipeline::default(),
        }
    }

    fn augments(&self) -> bool {
        self.augment && self.shuffle
    }
}

/// Stacked samples. `images` is N x H x W x C, `masks` is N x H x W (binarized).
#[derive(Debug, Clone)]
pub struct Batch {
    pub ids: Vec<String>,
    pub images: Vec<f32>,
    pub masks: Vec<f32>,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Mean of the binarized masks over the whole batch.
    pub fn positive_fraction(&self) -> f32 {
        if self.masks.is_empty() {
            return 0.0;
        }
        self.masks.iter().sum::<f32>() / self.masks.len() as f32
    }
}

/// Finite, single-use sequence of batches over one split.
///
/// Yields exactly `len / batch_size` batches; the `len % batch_size` ids left at
/// the tail of the (possibly shuffled) order are not visited in this pass.
pub struct MinibatchSampler<'a> {
    split: &'a DatasetSplit,
    order: Vec<&'a str>,
    cursor: usize,
    cfg: SamplerConfig,
    rng: rand::rngs::StdRng,
    expected_shape: Option<(usize, usize, usize)>,
}

impl<'a> MinibatchSampler<'a> {
    pub fn new(split: &'a DatasetSplit, cfg: SamplerConfig) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(DatasetError::EmptyBatchSize);
        }
        let mut rng = match cfg.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        let mut order: Vec<&'a str> = split.ids().collect();
        if cfg.shuffle {
            order.shuffle(&mut rng);
        }
        let dropped = order.len() % cfg.batch_size;
        if dropped > 0 {
            tracing::debug!(
                dropped,
                total = order.len(),
                batch_size = cfg.batch_size,
                "tail samples excluded from this pass"
            );
        }
        Ok(Self {
            split,
            order,
            cursor: 0,
            cfg,
            rng,
            expected_shape: None,
        })
    }

    /// Number of batches this pass yields in total.
    pub fn num_batches(&self) -> usize {
        self.order.len() / self.cfg.batch_size
    }

    /// Ids skipped at the tail of this pass.
    pub fn dropped(&self) -> &[&'a str] {
        &self.order[self.num_batches() * self.cfg.batch_size..]
    }

    fn remaining(&self) -> usize {
        self.num_batches() - self.cursor / self.cfg.batch_size
    }

    fn assemble(&mut self, excerpt: &[&'a str]) -> DatasetResult<Batch> {
        let mut ids = Vec::with_capacity(excerpt.len());
        let mut images = Vec::new();
        let mut masks = Vec::new();
        let augments = self.cfg.augments();

        for id in excerpt {
            let (img, label) = self.split.pair(id)?;
            let shape = img.x.shape();
            match self.expected_shape {
                None => {
                    let (h, w, c) = shape;
                    let elems = self.cfg.batch_size * h * w;
                    images.reserve(elems * c);
                    masks.reserve(elems);
                    self.expected_shape = Some(shape);
                }
                Some(expected) if expected != shape => {
                    return Err(DatasetError::ShapeMismatch {
                        id: id.to_string(),
                        expected,
                        actual: shape,
                    });
                }
                _ => {}
            }

            // Binarize before augmenting so flips move boundary labels, not raw values.
            let mut mask = label.y.binarized();
            if augments {
                let mut image = img.x.clone();
                self.cfg.transform.apply(&mut image, &mut mask, &mut self.rng);
                images.extend_from_slice(&image.data);
            } else {
                images.extend_from_slice(&img.x.data);
            }
            masks.extend_from_slice(&mask.data);
            ids.push(id.to_string());
        }

        let (height, width, channels) = self.expected_shape.unwrap_or((0, 0, 0));
        Ok(Batch {
            ids,
            images,
            masks,
            height,
            width,
            channels,
        })
    }
}

impl Iterator for MinibatchSampler<'_> {
    type Item = DatasetResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining() == 0 {
            return None;
        }
        let start = self.cursor;
        let end = start + self.cfg.batch_size;
        self.cursor = end;
        let excerpt: Vec<&str> = self.order[start..end].to_vec();
        Some(self.assemble(&excerpt))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for MinibatchSampler<'_> {}
