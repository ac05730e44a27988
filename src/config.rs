//! Configuration structures for classifier adaptation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::naming::ConfigValue;

/// Low-rank adapter hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Adapter rank (size of the low-rank matrices)
    pub rank: usize,
    /// Scaling numerator; the effective scale is `alpha / rank`
    pub alpha: f64,
    /// Dropout probability on the adapter bypass path
    pub dropout: f32,
    /// Seed for the A-matrix initialization
    pub seed: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            rank: 8,
            alpha: 8.0,
            dropout: 0.0,
            seed: 0,
        }
    }
}

impl AdapterConfig {
    /// Effective scaling factor applied to the adapter bypass.
    pub fn scaling(&self) -> f64 {
        self.alpha / self.rank as f64
    }

    /// Validate hyperparameter ranges.
    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(Error::invalid_input("adapter rank must be greater than 0"));
        }
        if self.alpha <= 0.0 {
            return Err(Error::invalid_input("adapter alpha must be positive"));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::invalid_input(
                "adapter dropout must lie in [0.0, 1.0)",
            ));
        }
        Ok(())
    }
}

/// Options for wrapping a pretrained backbone into a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Number of output labels for the learned head
    pub num_labels: usize,
    /// Score candidate choices with the backbone's own LM head instead of
    /// allocating a learned head
    pub use_lm_head: bool,
    /// Detach hidden states before the head, training the head on frozen
    /// backbone features
    pub linear_probe: bool,
    /// Adapter hyperparameters, used when the descriptor names target
    /// modules
    pub adapter: AdapterConfig,
    /// Token id treated as padding when measuring true sequence lengths
    pub pad_token_id: u32,
    /// Extra backbone constructor overrides, merged over the descriptor's
    /// own before the weight provider runs
    pub overrides: BTreeMap<String, ConfigValue>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            num_labels: 2,
            use_lm_head: false,
            linear_probe: false,
            adapter: AdapterConfig::default(),
            pad_token_id: 0,
            overrides: BTreeMap::new(),
        }
    }
}

impl ClassifierConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate option consistency.
    pub fn validate(&self) -> Result<()> {
        if self.num_labels < 2 {
            return Err(Error::invalid_input("num_labels must be at least 2"));
        }
        if self.use_lm_head && self.linear_probe {
            // probing trains a separate head on frozen features; there is no
            // such head in LM-head mode
            return Err(Error::invalid_head(
                "linear_probe requires a learned head, not the backbone LM head",
            ));
        }
        self.adapter.validate()
    }
}

/// Builder for [`ClassifierConfig`].
pub struct ClassifierConfigBuilder {
    config: ClassifierConfig,
}

impl ClassifierConfigBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            config: ClassifierConfig::default(),
        }
    }

    /// Set the label count.
    pub fn num_labels(mut self, n: usize) -> Self {
        self.config.num_labels = n;
        self
    }

    /// Score provided candidate choices through the backbone LM head.
    pub fn use_lm_head(mut self, on: bool) -> Self {
        self.config.use_lm_head = on;
        self
    }

    /// Train only the head on detached backbone features.
    pub fn linear_probe(mut self, on: bool) -> Self {
        self.config.linear_probe = on;
        self
    }

    /// Set adapter hyperparameters.
    pub fn adapter(mut self, adapter: AdapterConfig) -> Self {
        self.config.adapter = adapter;
        self
    }

    /// Set the padding token id.
    pub fn pad_token_id(mut self, id: u32) -> Self {
        self.config.pad_token_id = id;
        self
    }

    /// Add a backbone constructor override.
    pub fn override_option(mut self, key: &str, value: impl Into<ConfigValue>) -> Self {
        self.config.overrides.insert(key.to_string(), value.into());
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ClassifierConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ClassifierConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ClassifierConfig::default().validate().is_ok());
    }

    #[test]
    fn test_probe_with_lm_head_rejected() {
        let err = ClassifierConfigBuilder::new()
            .use_lm_head(true)
            .linear_probe(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeadConfiguration(_)));
    }

    #[test]
    fn test_zero_rank_rejected() {
        let adapter = AdapterConfig {
            rank: 0,
            ..Default::default()
        };
        assert!(adapter.validate().is_err());
    }

    #[test]
    fn test_scaling_factor() {
        let adapter = AdapterConfig {
            rank: 8,
            alpha: 16.0,
            ..Default::default()
        };
        assert_eq!(adapter.scaling(), 2.0);
    }
}
