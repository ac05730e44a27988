//! Product-of-experts loss
//!
//! Combines the weak supervisor and the strong model as independent experts:
//! the target is the renormalized elementwise geometric mean of their
//! predicted distributions, which is the softmax of the summed
//! log-probabilities.

use candle_core::{Tensor, D};
use candle_nn::ops;

use super::{check_pair, soft_cross_entropy, LossFn, LOG_FLOOR};
use crate::error::Result;

/// Geometric-mean product loss.
///
/// `alpha` and `beta` exponentiate the strong and weak distributions before
/// the product; both default to 1.0, the plain geometric mean after
/// renormalization. The product target is detached, so gradient reaches the
/// logits only through the final cross-entropy. No step dependence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProductLoss {
    /// Exponent on the strong model's distribution
    pub alpha: f64,
    /// Exponent on the weak labels
    pub beta: f64,
}

impl Default for ProductLoss {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
        }
    }
}

impl LossFn for ProductLoss {
    fn compute(&self, logits: &Tensor, weak_labels: &Tensor, _step: usize) -> Result<Tensor> {
        check_pair(logits, weak_labels)?;
        let log_strong = ops::log_softmax(&logits.detach(), D::Minus1)?;
        let log_weak = weak_labels.maximum(LOG_FLOOR)?.log()?;
        let combined = (log_strong.affine(self.alpha, 0.0)? + log_weak.affine(self.beta, 0.0)?)?;
        // re-softmaxing the summed log-probabilities renormalizes the product
        let target = ops::softmax(&combined, D::Minus1)?;
        soft_cross_entropy(logits, &target)
    }

    fn name(&self) -> &'static str {
        "product"
    }
}
