//! Cross-entropy and KL-divergence losses

use candle_core::{Tensor, D};
use candle_nn::ops;

use super::{check_pair, soft_cross_entropy, LossFn, LOG_FLOOR};
use crate::error::Result;

/// Plain cross-entropy against the weak soft labels.
///
/// `-mean(sum(weak * log_softmax(logits)))`, with no step dependence. This
/// is the baseline of the family: the strong model purely imitates the weak
/// supervisor.
#[derive(Debug, Clone, Copy, Default)]
pub struct XentLoss;

impl LossFn for XentLoss {
    fn compute(&self, logits: &Tensor, weak_labels: &Tensor, _step: usize) -> Result<Tensor> {
        check_pair(logits, weak_labels)?;
        soft_cross_entropy(logits, weak_labels)
    }

    fn name(&self) -> &'static str {
        "xent"
    }
}

/// KL divergence from the weak labels to the strong predictions.
///
/// `mean(sum(weak * (log(weak) - log_softmax(logits))))`. Zero-probability
/// weak entries follow the `0 * log(0) = 0` convention: the label is clamped
/// away from zero inside the log only, so the term vanishes with the label
/// instead of producing NaN.
#[derive(Debug, Clone, Copy, Default)]
pub struct KlLoss;

impl LossFn for KlLoss {
    fn compute(&self, logits: &Tensor, weak_labels: &Tensor, _step: usize) -> Result<Tensor> {
        check_pair(logits, weak_labels)?;
        let log_weak = weak_labels.maximum(LOG_FLOOR)?.log()?;
        let log_probs = ops::log_softmax(logits, D::Minus1)?;
        let per_example = weak_labels
            .mul(&log_weak.sub(&log_probs)?)?
            .sum(D::Minus1)?;
        Ok(per_example.mean_all()?)
    }

    fn name(&self) -> &'static str {
        "kl"
    }
}
