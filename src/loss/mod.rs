//! Confidence-aware loss family for weak-to-strong training
//!
//! Each loss maps (strong logits, weak soft labels, training-step index) to
//! a scalar training loss. The family interpolates between imitating the
//! weak supervisor and trusting the strong model's own confident
//! predictions:
//!
//! - **xent**: plain cross-entropy against the weak soft labels
//! - **logconf**: cross-entropy against a confidence-annealed blend of the
//!   weak labels and the strong model's hardened predictions
//! - **product**: cross-entropy against the renormalized geometric mean of
//!   weak and strong predicted distributions
//! - **kl**: KL divergence from the weak labels to the strong predictions
//!
//! All functors are pure and stateless; the only step dependence is the
//! logconf mixing coefficient, a pure function of the step index.
//!
//! # Usage
//! ```rust,ignore
//! use w2s::loss::{LossKind, LogConfLoss};
//!
//! let loss = "logconf".parse::<LossKind>()?.build(total_steps)?;
//! let value = loss.compute(&logits, &weak_labels, step)?;
//! ```

pub mod logconf;
pub mod product;
pub mod xent;

use std::str::FromStr;

use candle_core::{Tensor, D};
use candle_nn::ops;

use crate::error::{Error, Result};

pub use logconf::{LogConfConfig, LogConfLoss};
pub use product::ProductLoss;
pub use xent::{KlLoss, XentLoss};

/// A loss functor over (strong logits, weak soft labels, step index).
///
/// Implementations must be pure: two calls with the same arguments return
/// the same value, and nothing is mutated across calls.
pub trait LossFn: Send + Sync {
    /// Compute the batch-mean scalar loss.
    ///
    /// `logits` and `weak_labels` are both `[batch, choices]`; each row of
    /// `weak_labels` is a probability distribution over the choices.
    fn compute(&self, logits: &Tensor, weak_labels: &Tensor, step: usize) -> Result<Tensor>;

    /// Stable identifier of this loss.
    fn name(&self) -> &'static str;
}

/// The fixed set of supported loss identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LossKind {
    /// Plain cross-entropy against the weak labels
    Xent,
    /// Confidence-annealed logit blend
    LogConf,
    /// Geometric-mean product of experts
    Product,
    /// KL divergence
    Kl,
}

impl LossKind {
    /// Every supported loss kind, in declaration order.
    pub const ALL: [LossKind; 4] = [Self::Xent, Self::LogConf, Self::Product, Self::Kl];

    /// The identifier string for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xent => "xent",
            Self::LogConf => "logconf",
            Self::Product => "product",
            Self::Kl => "kl",
        }
    }

    /// Build the functor for this kind with its default configuration.
    ///
    /// `total_steps` is the expected length of the training run; only the
    /// logconf schedule consumes it.
    pub fn build(&self, total_steps: usize) -> Result<Box<dyn LossFn>> {
        Ok(match self {
            Self::Xent => Box::new(XentLoss),
            Self::LogConf => Box::new(LogConfLoss::new(total_steps)?),
            Self::Product => Box::new(ProductLoss::default()),
            Self::Kl => Box::new(KlLoss),
        })
    }
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xent" => Ok(Self::Xent),
            "logconf" => Ok(Self::LogConf),
            "product" => Ok(Self::Product),
            "kl" => Ok(Self::Kl),
            other => Err(Error::unknown_loss(other)),
        }
    }
}

/// Floor used inside logarithms so that zero-probability labels contribute
/// exactly zero instead of NaN.
pub(crate) const LOG_FLOOR: f64 = 1e-12;

/// Batch-mean cross-entropy of `logits` against a soft `target`
/// distribution: `-mean(sum(target * log_softmax(logits)))`.
pub(crate) fn soft_cross_entropy(logits: &Tensor, target: &Tensor) -> Result<Tensor> {
    let log_probs = ops::log_softmax(logits, D::Minus1)?;
    let per_example = target.mul(&log_probs)?.sum(D::Minus1)?;
    Ok(per_example.mean_all()?.neg()?)
}

/// Validate that logits and labels form a `[batch, choices]` pair.
pub(crate) fn check_pair(logits: &Tensor, weak_labels: &Tensor) -> Result<(usize, usize)> {
    let (batch, choices) = logits.dims2().map_err(|_| {
        Error::invalid_input(format!(
            "expected [batch, choices] logits, got shape {:?}",
            logits.dims()
        ))
    })?;
    if weak_labels.dims() != logits.dims() {
        return Err(Error::invalid_input(format!(
            "weak labels shape {:?} does not match logits shape {:?}",
            weak_labels.dims(),
            logits.dims()
        )));
    }
    Ok((batch, choices))
}
