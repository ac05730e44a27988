//! Low-rank adapter injection
//!
//! An adapter is a trainable bypass around a frozen linear sublayer:
//! `y = W x + (alpha / rank) * B A x`, with `A` and `B` held in f32 even
//! when the frozen base is reduced-precision. Injection walks the
//! backbone's adaptable sublayers through a visitor and records every
//! wrapped module in an [`AdapterSet`] — a concrete ordered list that
//! later drives selective save/restore, with no module-tree scanning.

use std::collections::HashMap;

use candle_core::{DType, Tensor, Var};
use candle_nn::{ops, Linear, Module};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::AdapterConfig;
use crate::error::{Error, Result};

/// Opaque per-module state: tensor name to value.
pub type StateBlock = HashMap<String, Tensor>;

/// Trainable low-rank bypass for a single linear sublayer.
#[derive(Clone)]
pub struct LoraAdapter {
    name: String,
    /// Down projection, `[rank, in_features]`, f32
    a: Var,
    /// Up projection, `[out_features, rank]`, f32, zero-initialized
    b: Var,
    scaling: f64,
    dropout: f32,
}

impl LoraAdapter {
    fn init(
        name: &str,
        in_features: usize,
        out_features: usize,
        config: &AdapterConfig,
        rng: &mut StdRng,
        device: &candle_core::Device,
    ) -> Result<Self> {
        // Xavier-uniform A so the bypass starts well-scaled; zero B so the
        // adapted layer initially computes exactly the frozen base
        let bound = (6.0 / (in_features + config.rank) as f64).sqrt();
        let mut data = vec![0f32; config.rank * in_features];
        for value in &mut data {
            *value = rng.random_range(-bound..bound) as f32;
        }
        let a = Var::from_tensor(&Tensor::from_vec(
            data,
            (config.rank, in_features),
            device,
        )?)?;
        let b = Var::zeros((out_features, config.rank), DType::F32, device)?;

        Ok(Self {
            name: name.to_string(),
            a,
            b,
            scaling: config.scaling(),
            dropout: config.dropout,
        })
    }

    /// Name of the sublayer this adapter is attached to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The trainable parameters of this adapter.
    pub fn vars(&self) -> Vec<Var> {
        vec![self.a.clone(), self.b.clone()]
    }

    /// Bypass contribution for `xs`, computed in f32.
    fn delta(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs32 = xs.to_dtype(DType::F32)?;
        let xs32 = if self.dropout > 0.0 {
            ops::dropout(&xs32, self.dropout)?
        } else {
            xs32
        };
        let down = xs32.broadcast_matmul(&self.a.t()?)?;
        let up = down.broadcast_matmul(&self.b.t()?)?;
        up.affine(self.scaling, 0.0)
    }

    /// Snapshot this adapter's parameters as a state block.
    pub fn state(&self) -> StateBlock {
        HashMap::from([
            ("lora_a".to_string(), self.a.as_tensor().clone()),
            ("lora_b".to_string(), self.b.as_tensor().clone()),
        ])
    }

    /// Replay a previously saved state block onto this adapter.
    pub fn load(&self, block: &StateBlock) -> Result<()> {
        for (key, var) in [("lora_a", &self.a), ("lora_b", &self.b)] {
            let tensor = block.get(key).ok_or_else(|| {
                Error::invalid_input(format!("adapter block for {} is missing {key}", self.name))
            })?;
            var.set(tensor)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoraAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoraAdapter")
            .field("name", &self.name)
            .field("a", &self.a.shape())
            .field("b", &self.b.shape())
            .field("scaling", &self.scaling)
            .finish()
    }
}

/// A linear sublayer that may carry an adapter.
///
/// The inner weights stay frozen plain tensors; only the optional adapter
/// contributes trainable parameters.
#[derive(Debug)]
pub struct AdaptedLinear {
    inner: Linear,
    adapter: Option<LoraAdapter>,
}

impl AdaptedLinear {
    /// Wrap a frozen linear layer with no adapter attached.
    pub fn frozen(inner: Linear) -> Self {
        Self {
            inner,
            adapter: None,
        }
    }

    /// The adapter attached to this layer, if any.
    pub fn adapter(&self) -> Option<&LoraAdapter> {
        self.adapter.as_ref()
    }

    /// The frozen base layer.
    pub fn base(&self) -> &Linear {
        &self.inner
    }
}

impl Module for AdaptedLinear {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let base = self.inner.forward(xs)?;
        match &self.adapter {
            Some(adapter) => {
                let delta = adapter.delta(xs)?.to_dtype(base.dtype())?;
                base + delta
            }
            None => Ok(base),
        }
    }
}

/// Ordered collection of injected adapters.
///
/// The order is the injection order, which is also the persistence order of
/// the per-module state blocks.
#[derive(Debug, Clone, Default)]
pub struct AdapterSet {
    adapters: Vec<LoraAdapter>,
}

impl AdapterSet {
    /// Number of adapter-bearing sublayers.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Whether no adapters were injected.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Iterate over adapters in injection order.
    pub fn iter(&self) -> impl Iterator<Item = &LoraAdapter> {
        self.adapters.iter()
    }

    /// Names of the adapted sublayers, in injection order.
    pub fn names(&self) -> Vec<&str> {
        self.adapters.iter().map(LoraAdapter::name).collect()
    }

    /// Snapshot every adapter as an ordered sequence of state blocks.
    pub fn state_blocks(&self) -> Vec<StateBlock> {
        self.adapters.iter().map(LoraAdapter::state).collect()
    }

    /// All trainable adapter parameters, grouped per sublayer.
    pub fn var_groups(&self) -> Vec<Vec<Var>> {
        self.adapters.iter().map(LoraAdapter::vars).collect()
    }
}

/// Visitor that wraps matching sublayers during backbone traversal.
///
/// Backbones pass each adaptable linear to [`AdapterInjector::visit`]; the
/// injector decides from the target patterns whether to attach an adapter,
/// and keeps the ordered record of everything it attached.
pub struct AdapterInjector {
    targets: Vec<String>,
    config: AdapterConfig,
    rng: StdRng,
    injected: Vec<LoraAdapter>,
}

impl AdapterInjector {
    /// Create an injector for the given target-module name patterns.
    pub fn new(targets: &[String], config: &AdapterConfig) -> Result<Self> {
        config.validate()?;
        if targets.is_empty() {
            return Err(Error::invalid_input(
                "adapter injection requires at least one target module pattern",
            ));
        }
        Ok(Self {
            targets: targets.to_vec(),
            config: config.clone(),
            rng: StdRng::seed_from_u64(config.seed),
            injected: Vec::new(),
        })
    }

    /// Whether `name` matches any target pattern. Patterns name the final
    /// path segment of a sublayer, e.g. `c_attn` matches `h.3.attn.c_attn`.
    fn matches(&self, name: &str) -> bool {
        let segment = name.rsplit('.').next().unwrap_or(name);
        self.targets.iter().any(|t| t == segment)
    }

    /// Offer one named sublayer to the injector. Matching layers get an
    /// adapter attached in place; the rest are left untouched.
    pub fn visit(&mut self, name: &str, layer: &mut AdaptedLinear) -> Result<()> {
        if !self.matches(name) || layer.adapter.is_some() {
            return Ok(());
        }
        let (out_features, in_features) = layer.inner.weight().dims2()?;
        let adapter = LoraAdapter::init(
            name,
            in_features,
            out_features,
            &self.config,
            &mut self.rng,
            layer.inner.weight().device(),
        )?;
        debug!(name, in_features, out_features, "attached low-rank adapter");
        self.injected.push(adapter.clone());
        layer.adapter = Some(adapter);
        Ok(())
    }

    /// Finish injection, yielding the ordered adapter record.
    pub fn into_set(self) -> AdapterSet {
        AdapterSet {
            adapters: self.injected,
        }
    }
}
