//! Learning-rate policies applied once per epoch.

use serde::{Deserialize, Serialize};

/// Which rule drives the learning rate between epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrPolicy {
    /// Divide by `divisor` whenever `epoch % interval == interval - 1`.
    #[serde(rename = "fixed")]
    FixedInterval { interval: usize, divisor: f64 },
    /// Divide by `divisor` once the metric has not improved for more than `delay` epochs.
    Plateau { delay: usize, divisor: f64 },
}

impl Default for LrPolicy {
    fn default() -> Self {
        LrPolicy::FixedInterval {
            interval: 40,
            divisor: 10.0,
        }
    }
}

/// Mutable run state shared by the training loop and the LR controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub learning_rate: f64,
    pub best_metric: f64,
    pub plateau_counter: usize,
}

impl TrainingState {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            epoch: 0,
            learning_rate,
            best_metric: f64::NEG_INFINITY,
            plateau_counter: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrDecision {
    Kept,
    Improved,
    Decayed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedIntervalDecay {
    pub interval: usize,
    pub divisor: f64,
}

impl FixedIntervalDecay {
    pub fn step(&self, state: &mut TrainingState) -> LrDecision {
        let interval = self.interval.max(1);
        if state.epoch % interval == interval - 1 {
            state.learning_rate /= self.divisor;
            LrDecision::Decayed
        } else {
            LrDecision::Kept
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateauDecay {
    pub delay: usize,
    pub divisor: f64,
}

impl PlateauDecay {
    /// `metric` is higher-is-better.
    pub fn step(&self, state: &mut TrainingState, metric: f64) -> LrDecision {
        if metric > state.best_metric {
            state.best_metric = metric;
            state.plateau_counter = 0;
            LrDecision::Improved
        } else if state.plateau_counter > self.delay {
            state.learning_rate /= self.divisor;
            state.plateau_counter = 0;
            LrDecision::Decayed
        } else {
            state.plateau_counter += 1;
            LrDecision::Kept
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearningRateController {
    policy: LrPolicy,
}

impl LearningRateController {
    pub fn new(policy: LrPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LrPolicy {
        self.policy
    }

    /// Apply the configured policy for the epoch recorded in `state`.
    /// The fixed-interval policy ignores `metric`.
    pub fn update(&self, state: &mut TrainingState, metric: f64) -> LrDecision {
        match self.policy {
            LrPolicy::FixedInterval { interval, divisor } => {
                FixedIntervalDecay { interval, divisor }.step(state)
            }
            LrPolicy::Plateau { delay, divisor } => PlateauDecay { delay, divisor }.step(state, metric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn fixed_interval_divides_on_last_epoch_of_each_window() {
        let ctrl = LearningRateController::new(LrPolicy::default());
        let mut state = TrainingState::new(3e-2);
        let mut rate_at = Vec::new();
        for epoch in 0..100 {
            state.epoch = epoch;
            rate_at.push(state.learning_rate);
            let decision = ctrl.update(&mut state, 0.0);
            let expected = if epoch % 40 == 39 {
                LrDecision::Decayed
            } else {
                LrDecision::Kept
            };
            assert_eq!(decision, expected, "epoch {epoch}");
        }
        assert!(close(rate_at[39], 3e-2));
        assert!(close(rate_at[40], 3e-3));
        assert!(close(rate_at[79], 3e-3));
        assert!(close(rate_at[80], 3e-4));
    }

    #[test]
    fn plateau_resets_on_improvement() {
        let rule = PlateauDecay {
            delay: 2,
            divisor: 10.0,
        };
        let mut state = TrainingState::new(1.0);
        assert_eq!(rule.step(&mut state, -5.0), LrDecision::Improved);
        assert_eq!(rule.step(&mut state, -6.0), LrDecision::Kept);
        assert_eq!(state.plateau_counter, 1);
        assert_eq!(rule.step(&mut state, -4.0), LrDecision::Improved);
        assert_eq!(state.plateau_counter, 0);
        assert_eq!(state.best_metric, -4.0);
        assert_eq!(state.learning_rate, 1.0);
    }

    #[test]
    fn plateau_decays_after_counter_exceeds_delay() {
        let rule = PlateauDecay {
            delay: 2,
            divisor: 10.0,
        };
        let mut state = TrainingState::new(1.0);
        rule.step(&mut state, 0.0);
        // counter goes 1, 2, 3 before the decay fires
        for _ in 0..3 {
            assert_eq!(rule.step(&mut state, 0.0), LrDecision::Kept);
        }
        assert_eq!(rule.step(&mut state, 0.0), LrDecision::Decayed);
        assert!(close(state.learning_rate, 0.1));
        assert_eq!(state.plateau_counter, 0);
    }

    #[test]
    fn policy_reads_from_toml_table() {
        let policy: LrPolicy = toml::from_str("kind = \"plateau\"\ndelay = 8\ndivisor = 10.0\n").unwrap();
        assert_eq!(
            policy,
            LrPolicy::Plateau {
                delay: 8,
                divisor: 10.0
            }
        );
    }
}
