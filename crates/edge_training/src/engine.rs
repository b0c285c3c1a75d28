use anyhow::{anyhow, Result};
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use edge_dataset::{unstack_maps, Batch, PixelArray};
use edge_models::{EdgeModel, FUSED_HEAD};
use std::marker::PhantomData;
use std::path::Path;

use crate::loss::LossComposer;

/// What the training loop needs from the numeric engine.
pub trait TrainingEngine {
    /// One forward/backward/update pass; returns the batch loss.
    fn train_step(&mut self, batch: &Batch, learning_rate: f64) -> Result<f32>;
    /// Inference-mode fused-head probabilities, one `H x W x 1` map per sample.
    fn predict_fused(&self, batch: &Batch) -> Result<Vec<PixelArray>>;
    fn save_checkpoint(&self, path: &Path) -> Result<()>;
    fn parameter_count(&self) -> usize;
}

pub struct BurnEngine<B: AutodiffBackend, M, O> {
    model: M,
    optim: O,
    loss: LossComposer,
    device: B::Device,
    _backend: PhantomData<B>,
}

impl<B, M, O> BurnEngine<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + EdgeModel<B>,
    O: Optimizer<M, B>,
{
    pub fn new(model: M, optim: O, loss: LossComposer, device: B::Device) -> Self {
        Self {
            model,
            optim,
            loss,
            device,
            _backend: PhantomData,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }
}

impl<B, M, O> TrainingEngine for BurnEngine<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + EdgeModel<B>,
    M::InnerModule: EdgeModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    fn train_step(&mut self, batch: &Batch, learning_rate: f64) -> Result<f32> {
        let images = batch.images_tensor::<B>(&self.device);
        let masks = batch.masks_tensor::<B>(&self.device);
        let outputs = self.model.forward(images, true);
        let loss = self.loss.compose(masks, &outputs);
        let value = loss.clone().into_scalar().elem::<f32>();
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(learning_rate, self.model.clone(), grads);
        Ok(value)
    }

    fn predict_fused(&self, batch: &Batch) -> Result<Vec<PixelArray>> {
        let model = self.model.valid();
        let images = batch.images_tensor::<B::InnerBackend>(&self.device);
        let mut outputs = model.forward(images, false);
        let fused = outputs
            .remove(FUSED_HEAD)
            .ok_or_else(|| anyhow!("model produced no `{FUSED_HEAD}` head"))?;
        Ok(unstack_maps(sigmoid(fused))?)
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| anyhow!("failed to save checkpoint {}: {e}", path.display()))
    }

    fn parameter_count(&self) -> usize {
        self.model.num_params()
    }
}
