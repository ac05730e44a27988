//! Per-architecture model adaptation
//!
//! This module turns heterogeneous pretrained causal-LM backbones into a
//! uniform classification interface:
//!
//! - [`arch`]: per-family capability table (adapter targets, hidden-width
//!   field), resolved as data instead of runtime attribute probing
//! - [`backbone`]: the provider/backbone seam to the external pretrained
//!   model source
//! - [`adapter`]: low-rank adapter injection with an explicit ordered
//!   module registry
//! - [`classifier`]: the adapted classifier itself — head attachment,
//!   pooled forward pass, selective persistence

pub mod adapter;
pub mod arch;
pub mod backbone;
pub mod classifier;

pub use adapter::{AdaptedLinear, AdapterInjector, AdapterSet, LoraAdapter, StateBlock};
pub use arch::{Family, FamilyCaps, HiddenWidthField};
pub use backbone::{BackboneConfig, BackboneProvider, CausalBackbone, CheckpointScope, Sharded};
pub use classifier::{AdaptedClassifier, LinearHead};
