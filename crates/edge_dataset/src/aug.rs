//! Joint image/mask augmentation: random mirroring plus gamma correction.

use crate::types::PixelArray;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformPipeline {
    /// Probability of mirroring left-right.
    pub flip_horizontal_prob: f32,
    /// Probability of mirroring top-bottom.
    pub flip_vertical_prob: f32,
    /// Gamma is drawn from N(1, gamma_std^2) and clamped to `gamma_range`.
    pub gamma_std: f32,
    pub gamma_range: (f32, f32),
}

impl Default for TransformPipeline {
    fn default() -> Self {
        Self {
            flip_horizontal_prob: 0.5,
            flip_vertical_prob: 0.5,
            gamma_std: 1.0,
            gamma_range: (0.5, 1.5),
        }
    }
}

/// The random draws made for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AugmentDecision {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub gamma: f32,
}

impl TransformPipeline {
    pub fn describe(&self) -> String {
        format!(
            "flip_lr_p={:.2} flip_ud_p={:.2} gamma~N(1,{:.2}) clamped to [{:.2},{:.2}]",
            self.flip_horizontal_prob,
            self.flip_vertical_prob,
            self.gamma_std,
            self.gamma_range.0,
            self.gamma_range.1
        )
    }

    pub fn draw(&self, rng: &mut dyn rand::RngCore) -> AugmentDecision {
        let flip_horizontal = rng.random_range(0.0..1.0) < self.flip_horizontal_prob;
        let flip_vertical = rng.random_range(0.0..1.0) < self.flip_vertical_prob;
        let z: f32 = StandardNormal.sample(rng);
        let (lo, hi) = self.gamma_range;
        let gamma = (1.0 + self.gamma_std * z).clamp(lo, hi);
        AugmentDecision {
            flip_horizontal,
            flip_vertical,
            gamma,
        }
    }

    /// Draw a decision and apply it in place. Image and mask get the same flips;
    /// only the image is gamma corrected.
    pub fn apply(
        &self,
        image: &mut PixelArray,
        mask: &mut PixelArray,
        rng: &mut dyn rand::RngCore,
    ) -> AugmentDecision {
        let decision = self.draw(rng);
        apply_decision(&decision, image, mask);
        decision
    }
}

pub fn apply_decision(decision: &AugmentDecision, image: &mut PixelArray, mask: &mut PixelArray) {
    if decision.flip_horizontal {
        image.flip_horizontal();
        mask.flip_horizontal();
    }
    if decision.flip_vertical {
        image.flip_vertical();
        mask.flip_vertical();
    }
    adjust_gamma(image, decision.gamma);
}

/// Power-law correction `v -> v^gamma`. Values are expected in [0, 1]; negative
/// inputs (e.g. whitened data) keep their sign and use the magnitude.
pub fn adjust_gamma(image: &mut PixelArray, gamma: f32) {
    if gamma == 1.0 {
        return;
    }
    for v in image.data.iter_mut() {
        *v = v.signum() * v.abs().powf(gamma);
    }
}
