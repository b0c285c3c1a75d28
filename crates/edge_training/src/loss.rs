//! Class-balanced, sparsity-regularized loss over every model head.

use burn::tensor::activation::sigmoid;
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Tensor};
use edge_models::ModelOutputs;

/// Lower/upper guard for `beta` and the mean activation `q`. Keeps `pos_weight`
/// and the sparsity log terms finite on all-background or all-boundary batches.
pub const PROB_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassBalance {
    /// Approximate negative-class fraction, `1 - mean(Y)`.
    pub beta: f32,
    /// `beta / (1 - beta)`, multiplies the positive term of the cross-entropy.
    pub pos_weight: f32,
}

impl ClassBalance {
    pub fn from_positive_fraction(mean_y: f32) -> Self {
        let beta = (1.0 - mean_y).clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
        Self {
            beta,
            pos_weight: beta / (1.0 - beta),
        }
    }
}

/// Mean weighted binary cross-entropy on logits, in the overflow-safe form
/// `(1 - y) x + (1 + (pw - 1) y) (log1p(exp(-|x|)) + max(-x, 0))`.
pub fn weighted_cross_entropy_with_logits<B: Backend>(
    targets: Tensor<B, 4>,
    logits: Tensor<B, 4>,
    pos_weight: f32,
) -> Tensor<B, 1> {
    let log_weight = targets.clone().mul_scalar(pos_weight - 1.0).add_scalar(1.0);
    let softplus_neg = logits.clone().abs().neg().exp().log1p() + logits.clone().neg().clamp_min(0.0);
    let negatives = targets.neg().add_scalar(1.0) * logits;
    (negatives + log_weight * softplus_neg).mean()
}

/// Cross-entropy between a Bernoulli(`target`) and the batch-mean activation of `logits`.
pub fn sparsity_penalty<B: Backend>(logits: Tensor<B, 4>, target: f32) -> Tensor<B, 1> {
    let q = sigmoid(logits)
        .mean()
        .clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
    let one_minus_q = q.clone().neg().add_scalar(1.0);
    q.log().mul_scalar(-target) - one_minus_q.log().mul_scalar(1.0 - target)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossComposer {
    /// Sparsity coefficient; 0 disables the regularizer.
    pub sparsity: f32,
}

impl LossComposer {
    pub fn new(sparsity: f32) -> Self {
        Self { sparsity }
    }

    pub fn class_balance<B: Backend>(&self, targets: &Tensor<B, 4>) -> ClassBalance {
        let mean_y = targets.clone().mean().into_scalar().elem::<f32>();
        ClassBalance::from_positive_fraction(mean_y)
    }

    /// Sum over heads of weighted cross-entropy plus the scaled sparsity term.
    pub fn compose<B: Backend>(&self, targets: Tensor<B, 4>, outputs: &ModelOutputs<B>) -> Tensor<B, 1> {
        let balance = self.class_balance(&targets);
        let mut total = Tensor::<B, 1>::zeros([1], &targets.device());
        for logits in outputs.values() {
            total = total
                + weighted_cross_entropy_with_logits(
                    targets.clone(),
                    logits.clone(),
                    balance.pos_weight,
                );
            if self.sparsity > 0.0 {
                total = total
                    + sparsity_penalty(logits.clone(), 1.0 - balance.beta).mul_scalar(self.sparsity);
            }
        }
        total
    }
}
