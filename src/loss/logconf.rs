//! Confidence-annealed blend loss ("logconf")
//!
//! Early in training the target is the weak supervisor's soft label; as the
//! run progresses, an increasing share of the target is replaced by the
//! strong model's own hardened prediction. The mixing coefficient ramps
//! linearly over a warm-up fraction of the expected run length, then holds.

use candle_core::{Tensor, D};
use candle_nn::ops;
use serde::{Deserialize, Serialize};

use super::{check_pair, soft_cross_entropy, LossFn};
use crate::error::{Error, Result};

/// Schedule and balancing options for [`LogConfLoss`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfConfig {
    /// Mixing coefficient at step 0
    pub coef_min: f64,
    /// Mixing coefficient after warm-up
    pub coef_max: f64,
    /// Fraction of the run over which the coefficient ramps
    pub warmup_frac: f64,
    /// Expected total number of training steps
    pub total_steps: usize,
    /// Reweight the confident term by inverse per-batch class frequency.
    /// Only supported for binary label spaces.
    pub balance_batch: bool,
}

impl LogConfConfig {
    /// Default schedule for a run of `total_steps` steps.
    pub fn new(total_steps: usize) -> Self {
        Self {
            coef_min: 0.0,
            coef_max: 0.5,
            warmup_frac: 0.2,
            total_steps,
            balance_batch: false,
        }
    }

    /// Validate schedule bounds.
    pub fn validate(&self) -> Result<()> {
        if self.coef_min < 0.0 || self.coef_max > 1.0 || self.coef_min > self.coef_max {
            return Err(Error::invalid_input(format!(
                "logconf coefficient bounds must satisfy 0 <= min <= max <= 1, got [{}, {}]",
                self.coef_min, self.coef_max
            )));
        }
        if !(0.0..=1.0).contains(&self.warmup_frac) {
            return Err(Error::invalid_input(format!(
                "logconf warmup fraction must lie in [0, 1], got {}",
                self.warmup_frac
            )));
        }
        if self.total_steps == 0 {
            return Err(Error::invalid_input(
                "logconf requires a positive total-step estimate",
            ));
        }
        Ok(())
    }
}

/// Confidence-annealed blend loss.
///
/// The strong predictions feeding the confident target are detached: no
/// gradient flows through the target construction, only through the logits
/// inside the final cross-entropy.
#[derive(Debug, Clone)]
pub struct LogConfLoss {
    config: LogConfConfig,
}

impl LogConfLoss {
    /// Build with the default schedule for a run of `total_steps` steps.
    pub fn new(total_steps: usize) -> Result<Self> {
        Self::with_config(LogConfConfig::new(total_steps))
    }

    /// Build with an explicit schedule.
    pub fn with_config(config: LogConfConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The mixing coefficient at `step`: linear ramp from `coef_min` to
    /// `coef_max` over `warmup_frac * total_steps`, constant afterwards.
    pub fn coef_at(&self, step: usize) -> f64 {
        let frac = (step as f64 / self.config.total_steps as f64).min(1.0);
        let ramp = if self.config.warmup_frac > 0.0 {
            (frac / self.config.warmup_frac).min(1.0)
        } else {
            1.0
        };
        self.config.coef_min + (self.config.coef_max - self.config.coef_min) * ramp
    }

    /// One-hot (or class-reweighted) confident target from the strong
    /// model's argmax. Built from detached predictions on the host, so the
    /// resulting tensor carries no gradient graph.
    fn confident_target(&self, logits: &Tensor, batch: usize, choices: usize) -> Result<Tensor> {
        let preds = ops::softmax(&logits.detach(), D::Minus1)?;
        let hard = preds.argmax(D::Minus1)?.to_vec1::<u32>()?;

        let weights = if self.config.balance_batch {
            if choices != 2 {
                return Err(Error::invalid_input(format!(
                    "per-batch class balancing is only supported for binary label spaces, \
                     got {choices} choices"
                )));
            }
            let mut counts = [0usize; 2];
            for &k in &hard {
                counts[k as usize] += 1;
            }
            // inverse empirical frequency; an absent class contributes no
            // confident mass, so its weight never gets used
            let mut weights = [0f32; 2];
            for k in 0..2 {
                if counts[k] > 0 {
                    weights[k] = batch as f32 / (choices as f32 * counts[k] as f32);
                }
            }
            Some(weights)
        } else {
            None
        };

        let mut data = vec![0f32; batch * choices];
        for (i, &k) in hard.iter().enumerate() {
            data[i * choices + k as usize] = match &weights {
                Some(w) => w[k as usize],
                None => 1.0,
            };
        }
        let target = Tensor::from_vec(data, (batch, choices), logits.device())?;
        Ok(target.to_dtype(logits.dtype())?)
    }
}

impl LossFn for LogConfLoss {
    fn compute(&self, logits: &Tensor, weak_labels: &Tensor, step: usize) -> Result<Tensor> {
        let (batch, choices) = check_pair(logits, weak_labels)?;
        let coef = self.coef_at(step);

        let confident = self.confident_target(logits, batch, choices)?;
        let weak_term = weak_labels.affine(1.0 - coef, 0.0)?;
        let confident_term = confident.affine(coef, 0.0)?;
        let mut target = (weak_term + confident_term)?;

        if self.config.balance_batch {
            // class reweighting can push row mass away from 1
            let row_mass = target.sum_keepdim(D::Minus1)?;
            target = target.broadcast_div(&row_mass)?;
        }

        soft_cross_entropy(logits, &target.detach())
    }

    fn name(&self) -> &'static str {
        "logconf"
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::loss::test_support::{scalar, tensor2};
    use crate::loss::XentLoss;

    fn batch() -> (Tensor, Tensor) {
        let logits = tensor2(&[&[1.2, -0.3], &[-0.8, 0.4], &[2.0, 1.0]]);
        let weak = tensor2(&[&[0.9, 0.1], &[0.35, 0.65], &[0.5, 0.5]]);
        (logits, weak)
    }

    #[test]
    fn test_coef_monotone_and_bounded() {
        let loss = LogConfLoss::new(1000).unwrap();
        let mut prev = f64::NEG_INFINITY;
        for step in [0, 1, 50, 100, 199, 200, 500, 1000, 5000] {
            let coef = loss.coef_at(step);
            assert!(coef >= prev, "coef decreased at step {step}");
            assert!((0.0..=0.5).contains(&coef));
            prev = coef;
        }
        assert_eq!(loss.coef_at(0), 0.0);
        assert_relative_eq!(loss.coef_at(200), 0.5);
        assert_relative_eq!(loss.coef_at(1000), 0.5);
    }

    #[test]
    fn test_step_zero_matches_plain_xent() {
        let (logits, weak) = batch();
        let logconf = LogConfLoss::new(100).unwrap();
        let a = scalar(&logconf.compute(&logits, &weak, 0).unwrap());
        let b = scalar(&XentLoss.compute(&logits, &weak, 0).unwrap());
        assert_relative_eq!(a, b, epsilon = 1e-6);
    }

    #[test]
    fn test_after_warmup_blend_is_half_confident() {
        let (logits, weak) = batch();
        let logconf = LogConfLoss::new(100).unwrap();
        // past warm-up the target is 0.5*weak + 0.5*onehot(argmax); row 0
        // argmax is class 0, so its target is [0.95, 0.05]
        let loss = scalar(&logconf.compute(&logits, &weak, 100).unwrap());
        let blended = tensor2(&[&[0.95, 0.05], &[0.175, 0.825], &[0.75, 0.25]]);
        let expected = scalar(&XentLoss.compute(&logits, &blended, 0).unwrap());
        assert_relative_eq!(loss, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_balance_rejects_multiclass() {
        let logits = tensor2(&[&[0.1, 0.2, 0.3]]);
        let weak = tensor2(&[&[0.3, 0.3, 0.4]]);
        let mut config = LogConfConfig::new(10);
        config.balance_batch = true;
        let loss = LogConfLoss::with_config(config).unwrap();
        let err = loss.compute(&logits, &weak, 5).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_balance_keeps_rows_normalized() {
        // argmax picks class 0 twice, class 1 once: frequencies differ
        let logits = tensor2(&[&[2.0, 0.0], &[1.5, 0.2], &[0.1, 1.9]]);
        let weak = tensor2(&[&[0.8, 0.2], &[0.6, 0.4], &[0.3, 0.7]]);
        let mut config = LogConfConfig::new(10);
        config.balance_batch = true;
        let loss = LogConfLoss::with_config(config).unwrap();
        let value = scalar(&loss.compute(&logits, &weak, 10).unwrap());
        assert!(value.is_finite());
        assert!(value > 0.0);
    }

    #[test]
    fn test_zero_total_steps_rejected() {
        assert!(LogConfLoss::new(0).is_err());
    }
}
