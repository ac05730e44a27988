//! Model registry: static hyperparameter and architecture metadata
//!
//! The registry maps model identifiers to immutable [`ModelDescriptor`]
//! records: default learning rate, batch sizes, adapter target modules,
//! constructor overrides, and parallelism flags. It is populated exactly
//! once from explicit [`RuntimeEnv`] facts and is read-only afterwards, so
//! unsynchronized concurrent reads are safe.

mod entries;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::arch::Family;
use crate::naming::ConfigValue;

/// Optimizer family a model trains best with by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerFamily {
    /// Adam / AdamW
    #[default]
    Adam,
    /// Adafactor, for models whose optimizer state would not fit otherwise
    Adafactor,
}

/// Environment facts the registry derives per-model flags from.
///
/// Taken as explicit constructor parameters, evaluated once at process
/// start; the registry never queries accelerator state after population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeEnv {
    /// Number of available accelerators
    pub accelerator_count: usize,
    /// Memory per accelerator, in bytes
    pub per_device_memory_bytes: u64,
    /// Whether the accelerators support bfloat16 arithmetic
    pub bf16_supported: bool,
}

impl RuntimeEnv {
    /// A single large-memory accelerator; convenient for tests and CPU runs.
    pub fn single_device() -> Self {
        Self {
            accelerator_count: 1,
            per_device_memory_bytes: 80_000_000_000,
            bf16_supported: false,
        }
    }
}

/// Immutable per-model metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Globally unique model identifier
    pub name: String,
    /// Architecture family of the backbone
    pub family: Family,
    /// Default learning rate
    pub default_lr: f64,
    /// Evaluation batch size
    pub eval_batch_size: usize,
    /// Per-device training minibatch size, when it needs pinning
    pub minibatch_size_per_device: Option<usize>,
    /// Sublayer name patterns eligible for low-rank adaptation
    pub lora_modules: Option<Vec<String>>,
    /// Free-form constructor overrides forwarded to the weight provider
    pub overrides: BTreeMap<String, ConfigValue>,
    /// Whether to enable gradient checkpointing by default
    pub gradient_checkpointing: bool,
    /// Whether the model must be sharded across accelerators
    pub model_parallel: bool,
    /// Optimizer family to train with by default
    pub default_optimizer: OptimizerFamily,
}

impl ModelDescriptor {
    fn new(name: &str, family: Family, default_lr: f64, eval_batch_size: usize) -> Self {
        Self {
            name: name.to_string(),
            family,
            default_lr,
            eval_batch_size,
            minibatch_size_per_device: None,
            lora_modules: None,
            overrides: BTreeMap::new(),
            gradient_checkpointing: false,
            model_parallel: false,
            default_optimizer: OptimizerFamily::Adam,
        }
    }

    fn family_lora(mut self) -> Self {
        self.lora_modules = Some(self.family.lora_targets());
        self
    }

    fn minibatch(mut self, size: usize) -> Self {
        self.minibatch_size_per_device = Some(size);
        self
    }

    fn checkpointing(mut self) -> Self {
        self.gradient_checkpointing = true;
        self
    }

    fn parallel(mut self, on: bool) -> Self {
        self.model_parallel = on;
        self
    }

    fn overrides(mut self, overrides: BTreeMap<String, ConfigValue>) -> Self {
        self.overrides = overrides;
        self
    }

    fn optimizer(mut self, optimizer: OptimizerFamily) -> Self {
        self.default_optimizer = optimizer;
        self
    }
}

/// Read-only mapping from model identifier to descriptor.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    descriptors: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Populate the registry from explicit environment facts.
    pub fn with_env(env: &RuntimeEnv) -> Self {
        let mut descriptors = HashMap::new();
        for descriptor in entries::build_entries(env) {
            let prev = descriptors.insert(descriptor.name.clone(), descriptor);
            debug_assert!(prev.is_none(), "duplicate registry identifier");
        }
        debug!(count = descriptors.len(), "model registry populated");
        Self { descriptors }
    }

    /// Look up a descriptor by identifier.
    ///
    /// Unknown identifiers fail with [`Error::DescriptorNotFound`]; there is
    /// no fallback default descriptor.
    pub fn get_descriptor(&self, name: &str) -> Result<&ModelDescriptor> {
        self.descriptors
            .get(name)
            .ok_or_else(|| Error::descriptor_not_found(name))
    }

    /// All registered identifiers, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered models.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
