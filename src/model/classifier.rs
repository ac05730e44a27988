//! Classifier adaptation layer
//!
//! [`AdaptedClassifier`] wraps one pretrained causal-LM backbone with a
//! classification surface: either a learned linear head over pooled hidden
//! states, or the backbone's own LM head restricted to per-example
//! candidate-choice tokens. Construction runs through a fixed sequence of
//! phases (load backbone, optionally inject adapters, attach head); a
//! constructed value is always ready for forward passes.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, IndexOp, Tensor, Var, D};
use tracing::{debug, info};

use super::adapter::{AdapterInjector, AdapterSet, StateBlock};
use super::backbone::{BackboneProvider, CausalBackbone, CheckpointScope};
use crate::config::ClassifierConfig;
use crate::error::{Error, Result};
use crate::registry::ModelDescriptor;

/// Learned classification head, zero-initialized.
///
/// Zero weights make the head a constant-zero function at step 0: the
/// starting point is deterministic and label-agnostic, and everything the
/// head knows is learned from data.
pub struct LinearHead {
    weight: Var,
}

impl LinearHead {
    fn zeros(width: usize, num_labels: usize, dtype: DType, device: &Device) -> Result<Self> {
        let weight = Var::zeros((num_labels, width), dtype, device)?;
        Ok(Self { weight })
    }

    /// Apply the head to pooled hidden states `[batch, width]`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(xs.matmul(&self.weight.t()?)?)
    }

    /// The head's trainable parameter.
    pub fn var(&self) -> Var {
        self.weight.clone()
    }

    fn state(&self) -> StateBlock {
        HashMap::from([("weight".to_string(), self.weight.as_tensor().clone())])
    }

    fn load(&self, block: &StateBlock) -> Result<()> {
        let tensor = block
            .get("weight")
            .ok_or_else(|| Error::invalid_input("head block is missing weight"))?;
        self.weight.set(tensor)?;
        Ok(())
    }
}

/// A pretrained backbone adapted for weak-to-strong classification.
pub struct AdaptedClassifier {
    backbone: Box<dyn CausalBackbone>,
    adapters: Option<AdapterSet>,
    head: Option<LinearHead>,
    linear_probe: bool,
    pad_token_id: u32,
    num_labels: usize,
}

impl std::fmt::Debug for AdaptedClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptedClassifier")
            .field("adapters", &self.adapters)
            .field("has_head", &self.head.is_some())
            .field("linear_probe", &self.linear_probe)
            .field("pad_token_id", &self.pad_token_id)
            .field("num_labels", &self.num_labels)
            .finish_non_exhaustive()
    }
}

impl AdaptedClassifier {
    /// Construct from a registry descriptor and a pretrained-weight source.
    ///
    /// Phases, in order: load the backbone through `provider`; inject
    /// low-rank adapters into the descriptor's target modules (when any are
    /// declared); attach the classification head per `config`. Descriptor
    /// defaults such as gradient checkpointing are applied at the end.
    pub fn new(
        descriptor: &ModelDescriptor,
        provider: &dyn BackboneProvider,
        config: &ClassifierConfig,
    ) -> Result<Self> {
        config.validate()?;

        info!(model = %descriptor.name, "loading pretrained backbone");
        let mut backbone = if config.overrides.is_empty() {
            provider.load(descriptor)?
        } else {
            // caller overrides win over the descriptor's own
            let mut merged = descriptor.clone();
            merged
                .overrides
                .extend(config.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            provider.load(&merged)?
        };

        let adapters = match &descriptor.lora_modules {
            Some(targets) if !targets.is_empty() => {
                let mut injector = AdapterInjector::new(targets, &config.adapter)?;
                backbone.visit_adaptable(&mut injector)?;
                let set = injector.into_set();
                info!(
                    count = set.len(),
                    targets = ?targets,
                    "injected low-rank adapters; freezing remaining backbone parameters"
                );
                Some(set)
            }
            _ => None,
        };

        let head = if config.use_lm_head {
            debug!("using backbone LM head; candidate choices will be scored directly");
            None
        } else {
            let arch = backbone.config();
            let width = arch.head_width()?;
            let head = LinearHead::zeros(width, config.num_labels, arch.dtype, &arch.device)?;
            debug!(width, num_labels = config.num_labels, "attached zero-initialized head");
            Some(head)
        };

        let mut classifier = Self {
            backbone,
            adapters,
            head,
            linear_probe: config.linear_probe,
            pad_token_id: config.pad_token_id,
            num_labels: config.num_labels,
        };
        if descriptor.gradient_checkpointing {
            classifier.set_gradient_checkpointing(true);
        }
        Ok(classifier)
    }

    /// Number of output labels of the learned head.
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// The injected adapters, if any.
    pub fn adapters(&self) -> Option<&AdapterSet> {
        self.adapters.as_ref()
    }

    /// Whether this classifier scores through the backbone LM head.
    pub fn uses_lm_head(&self) -> bool {
        self.head.is_none()
    }

    /// True length of each sequence: the count of non-pad tokens.
    fn sequence_lengths(&self, input_ids: &Tensor) -> Result<Vec<usize>> {
        let mask = input_ids.ne(self.pad_token_id)?;
        let lens = mask.to_dtype(DType::U32)?.sum(D::Minus1)?.to_vec1::<u32>()?;
        for (i, &len) in lens.iter().enumerate() {
            if len == 0 {
                return Err(Error::invalid_input(format!(
                    "sequence {i} contains only padding"
                )));
            }
        }
        Ok(lens.into_iter().map(|l| l as usize).collect())
    }

    /// Forward pass over a padded `[batch, seq]` token-id batch.
    ///
    /// In LM-head mode `choice_input_ids` must carry each example's
    /// candidate-choice token ids, `[batch, num_choices]`, and the result is
    /// the vocabulary logits gathered at those ids from each sequence's last
    /// real position. In learned-head mode no choices are accepted and the
    /// result is the head applied to the pooled hidden state. Either way the
    /// output is logits; callers apply their own normalization.
    pub fn forward(&self, input_ids: &Tensor, choice_input_ids: Option<&Tensor>) -> Result<Tensor> {
        let lengths = self.sequence_lengths(input_ids)?;

        match (&self.head, choice_input_ids) {
            (None, None) => Err(Error::invalid_head(
                "LM-head scoring requires candidate choice ids",
            )),
            (Some(_), Some(_)) => Err(Error::invalid_head(
                "learned-head scoring takes no candidate choice ids",
            )),
            (None, Some(choices)) => {
                let all_logits = self.backbone.forward_logits(input_ids)?;
                let mut rows = Vec::with_capacity(lengths.len());
                for (i, &len) in lengths.iter().enumerate() {
                    // gather this example's own candidates at its own final
                    // real position
                    let at_last = all_logits.i((i, len - 1))?;
                    rows.push(at_last.index_select(&choices.i(i)?, 0)?);
                }
                Ok(Tensor::stack(&rows, 0)?)
            }
            (Some(head), None) => {
                let hidden = self.backbone.forward_hidden(input_ids)?;
                let mut rows = Vec::with_capacity(lengths.len());
                for (i, &len) in lengths.iter().enumerate() {
                    rows.push(hidden.i((i, len - 1))?);
                }
                let pooled = Tensor::stack(&rows, 0)?;
                let pooled = if self.linear_probe {
                    pooled.detach()
                } else {
                    pooled
                };
                head.forward(&pooled)
            }
        }
    }

    /// Toggle gradient checkpointing on whichever module performs the
    /// forward compute: the trunk below a learned head, or the full
    /// backbone when scoring through its own LM head.
    pub fn set_gradient_checkpointing(&mut self, enabled: bool) {
        let scope = if self.head.is_some() {
            CheckpointScope::Trunk
        } else {
            CheckpointScope::Full
        };
        self.backbone.set_gradient_checkpointing(enabled, scope);
    }

    /// Trainable parameters, grouped per module: one group per adapter in
    /// injection order, plus one for the learned head. Without adapters the
    /// backbone is fully frozen here and only the head group remains.
    pub fn trainable_parameter_groups(&self) -> Vec<Vec<Var>> {
        let mut groups = match &self.adapters {
            Some(set) => set.var_groups(),
            None => Vec::new(),
        };
        if let Some(head) = &self.head {
            groups.push(vec![head.var()]);
        }
        groups
    }

    /// Flat list of all trainable parameters, for handing to an optimizer.
    pub fn trainable_parameters(&self) -> Vec<Var> {
        self.trainable_parameter_groups().into_iter().flatten().collect()
    }

    /// Number of state blocks [`save_state`](Self::save_state) produces.
    pub fn state_block_count(&self) -> usize {
        match &self.adapters {
            Some(set) => set.len() + usize::from(self.head.is_some()),
            None => 1,
        }
    }

    /// Snapshot persistent state as an ordered sequence of blocks.
    ///
    /// With adapters active, only the adapter sublayers and the head are
    /// serialized — never the frozen base. Without adapters, the whole
    /// model is one block.
    pub fn save_state(&self) -> Result<Vec<StateBlock>> {
        match &self.adapters {
            Some(set) => {
                let mut blocks = set.state_blocks();
                if let Some(head) = &self.head {
                    blocks.push(head.state());
                }
                Ok(blocks)
            }
            None => {
                let mut block = self.backbone.export_state()?;
                if let Some(head) = &self.head {
                    for (key, tensor) in head.state() {
                        block.insert(format!("score.{key}"), tensor);
                    }
                }
                Ok(vec![block])
            }
        }
    }

    /// Replay a previously saved state sequence onto this instance.
    ///
    /// The sequence must line up block-for-block with the current ordered
    /// module list; a length mismatch fails with
    /// [`Error::StateShapeMismatch`].
    pub fn load_state(&mut self, blocks: &[StateBlock]) -> Result<()> {
        let expected = self.state_block_count();
        if blocks.len() != expected {
            return Err(Error::StateShapeMismatch {
                expected,
                actual: blocks.len(),
            });
        }
        match &self.adapters {
            Some(set) => {
                for (adapter, block) in set.iter().zip(blocks) {
                    adapter.load(block)?;
                }
                if let Some(head) = &self.head {
                    head.load(&blocks[set.len()])?;
                }
                Ok(())
            }
            None => {
                let block = &blocks[0];
                let mut backbone_block = StateBlock::new();
                let mut head_block = StateBlock::new();
                for (key, tensor) in block {
                    match key.strip_prefix("score.") {
                        Some(head_key) => {
                            head_block.insert(head_key.to_string(), tensor.clone());
                        }
                        None => {
                            backbone_block.insert(key.clone(), tensor.clone());
                        }
                    }
                }
                self.backbone.import_state(&backbone_block)?;
                if let Some(head) = &self.head {
                    head.load(&head_block)?;
                }
                Ok(())
            }
        }
    }

    /// Serialize the state sequence to a safetensors file.
    ///
    /// Blocks keep their order through an ordinal key prefix, so the file
    /// round-trips through [`read_state`](Self::read_state) onto an
    /// identically configured instance.
    pub fn write_state(&self, path: impl AsRef<Path>) -> Result<()> {
        let blocks = self.save_state()?;
        let mut flat = HashMap::new();
        for (index, block) in blocks.iter().enumerate() {
            for (key, tensor) in block {
                flat.insert(format!("m{index}.{key}"), tensor.clone());
            }
        }
        candle_core::safetensors::save(&flat, path.as_ref())?;
        debug!(blocks = blocks.len(), path = %path.as_ref().display(), "wrote state");
        Ok(())
    }

    /// Load a state sequence written by [`write_state`](Self::write_state).
    pub fn read_state(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let device = self.backbone.config().device.clone();
        let flat = candle_core::safetensors::load(path.as_ref(), &device)?;

        let mut blocks: Vec<StateBlock> = Vec::new();
        for (key, tensor) in flat {
            let (prefix, rest) = key.split_once('.').ok_or_else(|| {
                Error::invalid_input(format!("malformed state key: {key}"))
            })?;
            let index: usize = prefix
                .strip_prefix('m')
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::invalid_input(format!("malformed state key: {key}")))?;
            if index >= blocks.len() {
                blocks.resize_with(index + 1, StateBlock::new);
            }
            blocks[index].insert(rest.to_string(), tensor);
        }
        self.load_state(&blocks)
    }
}
