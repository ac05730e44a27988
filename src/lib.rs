//! w2s - weak-to-strong generalization fine-tuning core
//!
//! This crate implements the engineering core of weak-to-strong supervised
//! fine-tuning: a weak model's soft labels supervise a strong pretrained
//! model through a family of confidence-aware losses, while a per-
//! architecture adaptation layer wraps heterogeneous causal-LM backbones
//! into a uniform classification-head interface with optional low-rank
//! adapters and selective checkpointing.
//!
//! The training-loop driver, dataset pipeline, and pretrained-weight hub
//! are external collaborators; the seams to them are [`loss::LossFn`],
//! [`registry::ModelRegistry`], and [`model::BackboneProvider`].

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod loss;
pub mod model;
pub mod naming;
pub mod registry;

// Re-exports
pub use config::{AdapterConfig, ClassifierConfig, ClassifierConfigBuilder};
pub use error::{Error, Result};
pub use loss::{KlLoss, LogConfConfig, LogConfLoss, LossFn, LossKind, ProductLoss, XentLoss};
pub use model::{
    AdaptedClassifier, AdapterSet, BackboneConfig, BackboneProvider, CausalBackbone,
    CheckpointScope, Family, Sharded, StateBlock,
};
pub use naming::{encode_config, ConfigValue};
pub use registry::{ModelDescriptor, ModelRegistry, OptimizerFamily, RuntimeEnv};
