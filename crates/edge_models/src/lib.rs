//! Burn boundary-detection networks.
//!
//! Every network maps an N x C x H x W image batch to a set of named N x 1 x H x W
//! logit maps: one side head per stage (`side_1`, `side_2`, ...) and a fused head
//! (`fuse`) combining them. Heads are returned in a `BTreeMap`, so iteration order
//! is stable.
//!
//! - `BaselineEdgeNet`: VGG-style stages with 2x2 max-pooling between them.
//! - `DilatedEdgeNet`: full-resolution stages with growing dilation.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};
use burn::tensor::Tensor;
use std::collections::BTreeMap;

/// Raw (pre-sigmoid) prediction per head name.
pub type ModelOutputs<B> = BTreeMap<String, Tensor<B, 4>>;

/// Head whose sigmoid is the exported probability map.
pub const FUSED_HEAD: &str = "fuse";

/// Capability shared by every architecture: images plus a training flag in,
/// named logit maps out.
pub trait EdgeModel<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>, train: bool) -> ModelOutputs<B>;
}

#[derive(Debug, Clone)]
pub struct EdgeNetConfig {
    pub in_channels: usize,
    /// Filters in the first stage; the baseline doubles them per stage.
    pub n_filters: usize,
    /// Odd square kernel size.
    pub filter_size: usize,
    pub stages: usize,
    /// Dropout before each side head, training passes only.
    pub dropout: f64,
}

impl Default for EdgeNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            n_filters: 8,
            filter_size: 3,
            stages: 3,
            dropout: 0.1,
        }
    }
}

/// Two convolutions with ReLU.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
}

impl<B: Backend> ConvStage<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        dilation: usize,
        device: &B::Device,
    ) -> Self {
        let pad = dilation * (kernel.max(1) - 1) / 2;
        let conv = |c_in: usize| {
            Conv2dConfig::new([c_in, out_channels], [kernel, kernel])
                .with_dilation([dilation, dilation])
                .with_padding(PaddingConfig2d::Explicit(pad, pad))
                .init(device)
        };
        Self {
            conv1: conv(in_channels),
            conv2: conv(out_channels),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv1.forward(x));
        relu(self.conv2.forward(x))
    }
}

/// 1x1 side heads plus the 1x1 fusion over their concatenation.
#[derive(Module, Debug)]
pub struct SideOutputs<B: Backend> {
    heads: Vec<Conv2d<B>>,
    fuse: Conv2d<B>,
    dropout: nn::Dropout,
}

impl<B: Backend> SideOutputs<B> {
    pub fn new(stage_channels: &[usize], dropout: f64, device: &B::Device) -> Self {
        let heads = stage_channels
            .iter()
            .map(|c| Conv2dConfig::new([*c, 1], [1, 1]).init(device))
            .collect();
        let fuse = Conv2dConfig::new([stage_channels.len().max(1), 1], [1, 1]).init(device);
        Self {
            heads,
            fuse,
            dropout: nn::DropoutConfig::new(dropout).init(),
        }
    }

    /// Map per-stage features to `side_i` logits at `size` and fuse them.
    pub fn forward(
        &self,
        features: Vec<Tensor<B, 4>>,
        size: [usize; 2],
        train: bool,
    ) -> ModelOutputs<B> {
        let mut outputs = ModelOutputs::new();
        let mut sides = Vec::with_capacity(features.len());
        for (i, (feat, head)) in features.into_iter().zip(&self.heads).enumerate() {
            let feat = if train {
                self.dropout.forward(feat)
            } else {
                feat
            };
            let mut side = head.forward(feat);
            let [_, _, h, w] = side.dims();
            if [h, w] != size {
                // pooled stages: back to input resolution
                side = interpolate(
                    side,
                    size,
                    InterpolateOptions::new(InterpolateMode::Nearest),
                );
            }
            outputs.insert(format!("side_{}", i + 1), side.clone());
            sides.push(side);
        }
        let fused = self.fuse.forward(Tensor::cat(sides, 1));
        outputs.insert(FUSED_HEAD.to_string(), fused);
        outputs
    }
}

#[derive(Module, Debug)]
pub struct BaselineEdgeNet<B: Backend> {
    stages: Vec<ConvStage<B>>,
    pool: MaxPool2d,
    sides: SideOutputs<B>,
}

impl<B: Backend> BaselineEdgeNet<B> {
    pub fn new(cfg: &EdgeNetConfig, device: &B::Device) -> Self {
        let stages_n = cfg.stages.max(1);
        let widths: Vec<usize> = (0..stages_n).map(|i| cfg.n_filters << i).collect();
        let mut stages = Vec::with_capacity(stages_n);
        let mut in_ch = cfg.in_channels;
        for out_ch in &widths {
            stages.push(ConvStage::new(in_ch, *out_ch, cfg.filter_size, 1, device));
            in_ch = *out_ch;
        }
        Self {
            stages,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            sides: SideOutputs::new(&widths, cfg.dropout, device),
        }
    }
}

impl<B: Backend> EdgeModel<B> for BaselineEdgeNet<B> {
    fn forward(&self, images: Tensor<B, 4>, train: bool) -> ModelOutputs<B> {
        let [_, _, h, w] = images.dims();
        let mut x = images;
        let mut features = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                x = self.pool.forward(x);
            }
            x = stage.forward(x);
            features.push(x.clone());
        }
        self.sides.forward(features, [h, w], train)
    }
}

#[derive(Module, Debug)]
pub struct DilatedEdgeNet<B: Backend> {
    stages: Vec<ConvStage<B>>,
    sides: SideOutputs<B>,
}

impl<B: Backend> DilatedEdgeNet<B> {
    pub fn new(cfg: &EdgeNetConfig, device: &B::Device) -> Self {
        let stages_n = cfg.stages.max(1);
        let widths = vec![cfg.n_filters; stages_n];
        let mut stages = Vec::with_capacity(stages_n);
        let mut in_ch = cfg.in_channels;
        for i in 0..stages_n {
            stages.push(ConvStage::new(
                in_ch,
                cfg.n_filters,
                cfg.filter_size,
                1 << i,
                device,
            ));
            in_ch = cfg.n_filters;
        }
        Self {
            stages,
            sides: SideOutputs::new(&widths, cfg.dropout, device),
        }
    }
}

impl<B: Backend> EdgeModel<B> for DilatedEdgeNet<B> {
    fn forward(&self, images: Tensor<B, 4>, train: bool) -> ModelOutputs<B> {
        let [_, _, h, w] = images.dims();
        let mut x = images;
        let mut features = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward(x);
            features.push(x.clone());
        }
        self.sides.forward(features, [h, w], train)
    }
}

pub mod prelude {
    pub use super::{
        BaselineEdgeNet, DilatedEdgeNet, EdgeModel, EdgeNetConfig, ModelOutputs, FUSED_HEAD,
    };
}
