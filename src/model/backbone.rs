//! Pretrained causal-LM backbone seam
//!
//! The core never downloads or constructs pretrained networks itself; a
//! [`BackboneProvider`] hands it a weight-bearing [`CausalBackbone`] keyed
//! by registry descriptor, or fails. Backbones expose exactly the surface
//! the adaptation layer needs: hidden states, vocabulary logits, adapter
//! traversal, a checkpointing toggle, and whole-model state exchange.

use candle_core::{DType, Device, Tensor};

use super::adapter::{AdapterInjector, StateBlock};
use super::arch::Family;
use crate::error::{Error, Result};
use crate::registry::ModelDescriptor;

/// Architecture facts the adaptation layer reads off a loaded backbone.
///
/// The width fields mirror the config conventions of the covered families;
/// each family populates the ones its original configuration carries.
#[derive(Debug, Clone)]
pub struct BackboneConfig {
    /// Architecture family
    pub family: Family,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Decoupled embedding projection width (OPT lineage)
    pub word_embed_proj_dim: Option<usize>,
    /// Embedding width (GPT-2 lineage)
    pub n_embd: Option<usize>,
    /// Hidden width (everything else)
    pub hidden_size: Option<usize>,
    /// Parameter dtype of the loaded weights
    pub dtype: DType,
    /// Device the weights live on
    pub device: Device,
}

impl BackboneConfig {
    /// The input width of a classification head over this backbone.
    ///
    /// Tries `word_embed_proj_dim`, then `n_embd`, then `hidden_size`, in
    /// that priority order.
    pub fn head_width(&self) -> Result<usize> {
        self.word_embed_proj_dim
            .or(self.n_embd)
            .or(self.hidden_size)
            .ok_or_else(|| Error::HiddenSizeUndetermined(format!("{:?}", self.family)))
    }
}

/// Which part of the backbone a gradient-checkpointing toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointScope {
    /// Only the transformer trunk below a separately managed head
    Trunk,
    /// The whole backbone including its own output head
    Full,
}

/// A loaded pretrained causal language model.
pub trait CausalBackbone: Send {
    /// Architecture facts of this backbone.
    fn config(&self) -> &BackboneConfig;

    /// Final-layer hidden states, `[batch, seq, hidden]`.
    fn forward_hidden(&self, input_ids: &Tensor) -> Result<Tensor>;

    /// Per-position vocabulary logits, `[batch, seq, vocab]`.
    fn forward_logits(&self, input_ids: &Tensor) -> Result<Tensor>;

    /// Offer every adaptable linear sublayer to the injector, in a fixed
    /// deterministic order.
    fn visit_adaptable(&mut self, injector: &mut AdapterInjector) -> Result<()>;

    /// Toggle gradient checkpointing on the module that performs the
    /// forward compute for `scope`.
    fn set_gradient_checkpointing(&mut self, enabled: bool, scope: CheckpointScope);

    /// Export the full (frozen) parameter state as one block.
    fn export_state(&self) -> Result<StateBlock>;

    /// Replace the full parameter state from one block.
    fn import_state(&mut self, block: &StateBlock) -> Result<()>;
}

/// Source of pretrained backbones, keyed by registry descriptor.
///
/// Implementations load weights synchronously and fail with
/// [`Error::WeightsNotFound`] or [`Error::IncompatibleArchitecture`];
/// failures are fatal to the calling step, never retried here.
pub trait BackboneProvider {
    /// Load the backbone described by `descriptor`, honoring its
    /// constructor overrides.
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn CausalBackbone>>;
}

/// Model-parallel placement wrapper.
///
/// Layer placement across the devices is performed by the tensor-compute
/// runtime; this wrapper only records the target devices and forwards every
/// call, so toggles and traversals pass through transparently.
pub struct Sharded<B> {
    inner: B,
    devices: Vec<Device>,
}

impl<B: CausalBackbone> Sharded<B> {
    /// Wrap `inner` for sharded execution across `devices`.
    pub fn new(inner: B, devices: Vec<Device>) -> Self {
        Self { inner, devices }
    }

    /// The devices this backbone is sharded over.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }
}

impl<B: CausalBackbone> CausalBackbone for Sharded<B> {
    fn config(&self) -> &BackboneConfig {
        self.inner.config()
    }

    fn forward_hidden(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.inner.forward_hidden(input_ids)
    }

    fn forward_logits(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.inner.forward_logits(input_ids)
    }

    fn visit_adaptable(&mut self, injector: &mut AdapterInjector) -> Result<()> {
        self.inner.visit_adaptable(injector)
    }

    fn set_gradient_checkpointing(&mut self, enabled: bool, scope: CheckpointScope) {
        self.inner.set_gradient_checkpointing(enabled, scope);
    }

    fn export_state(&self) -> Result<StateBlock> {
        self.inner.export_state()
    }

    fn import_state(&mut self, block: &StateBlock) -> Result<()> {
        self.inner.import_state(block)
    }
}
