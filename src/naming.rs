//! Deterministic shorthand encoding of configuration mappings
//!
//! Experiment drivers name output folders after the configuration that
//! produced them. The encoding here is order-independent (entries are sorted
//! by key), filesystem-safe, and short enough to stay under path-length
//! limits even for sweeps with many options.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single configuration value, as used in descriptor overrides and
/// experiment-folder naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(f64),
    /// String value
    Str(String),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<usize> for ConfigValue {
    fn from(v: usize) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Encode a configuration mapping into a single folder-name string.
///
/// Keys are abbreviated to the initials of their underscore-separated words
/// and values are shortened (`true`/`false` become `1`/`0`, path-like strings
/// keep only their final segment). Entries are sorted by the original key, so
/// two mappings with the same contents always encode identically regardless
/// of insertion order.
pub fn encode_config(config: &BTreeMap<String, ConfigValue>) -> String {
    config
        .iter()
        .map(|(k, v)| format!("{}={}", shorten_key(k), shorten_value(v)))
        .collect::<Vec<_>>()
        .join("-")
}

fn shorten_key(key: &str) -> String {
    key.split('_')
        .filter_map(|word| word.chars().next())
        .collect()
}

fn shorten_value(value: &ConfigValue) -> String {
    match value {
        ConfigValue::Bool(true) => "1".to_string(),
        ConfigValue::Bool(false) => "0".to_string(),
        ConfigValue::Str(s) => {
            // model identifiers look like "org/name"; keep the name
            let tail = s.rsplit('/').next().unwrap_or(s);
            if tail.contains('_') {
                tail.split('_')
                    .map(|word| word.chars().take(4).collect::<String>())
                    .collect::<Vec<_>>()
                    .join("_")
            } else {
                tail.to_string()
            }
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(entries: &[(&str, ConfigValue)]) -> BTreeMap<String, ConfigValue> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_keys_become_initials_and_sorted() {
        let cfg = config(&[
            ("use_lm_head", ConfigValue::Bool(true)),
            ("model_parallel", ConfigValue::Bool(false)),
            ("default_lr", ConfigValue::Float(5e-5)),
        ]);
        let encoded = encode_config(&cfg);
        // BTreeMap iteration is sorted by original key name
        assert_eq!(encoded, "dl=0.00005-mp=0-ulh=1");
    }

    #[test]
    fn test_order_independence() {
        let a = config(&[
            ("loss", ConfigValue::from("logconf")),
            ("epochs", ConfigValue::Int(3)),
        ]);
        let b = config(&[
            ("epochs", ConfigValue::Int(3)),
            ("loss", ConfigValue::from("logconf")),
        ]);
        assert_eq!(encode_config(&a), encode_config(&b));
    }

    #[test]
    fn test_path_values_keep_final_segment() {
        let cfg = config(&[("model_size", ConfigValue::from("EleutherAI/pythia-70m"))]);
        assert_eq!(encode_config(&cfg), "ms=pythia-70m");
    }

    #[test]
    fn test_underscore_values_truncate_words() {
        let cfg = config(&[("weak_model", ConfigValue::from("results/weak_labels_final"))]);
        assert_eq!(encode_config(&cfg), "wm=weak_labe_fina");
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(encode_config(&BTreeMap::new()), "");
    }
}
