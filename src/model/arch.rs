//! Per-family architecture capability table
//!
//! Each supported causal-LM family declares, as data, the sublayer names
//! eligible for low-rank adaptation and which config field carries its
//! hidden width. Registry population and the adaptation layer resolve
//! capabilities from this table instead of probing module attributes at
//! runtime.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Causal-LM architecture families covered by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// GPT-2 (fused conv1d-style projections)
    Gpt2,
    /// GPT-NeoX / Pythia / BLOOM / StableLM-alpha (fused QKV)
    GptNeoX,
    /// GPT-Neo
    GptNeo,
    /// GPT-J
    GptJ,
    /// OPT (decoupled embedding projection)
    Opt,
    /// Mistral / Mixtral / Llama-style split projections
    Mistral,
    /// Llama-2 and derivatives (adapted with NeoX-style fused targets)
    Llama,
    /// Qwen (remote-code architecture)
    Qwen,
    /// BLOOM
    Bloom,
    /// StableLM-alpha
    StableLm,
}

/// Which architecture config field carries the hidden width feeding the
/// classification head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenWidthField {
    /// `word_embed_proj_dim` (OPT decouples embedding and hidden widths)
    WordEmbedProjDim,
    /// `n_embd` (GPT-2 lineage)
    NEmbd,
    /// `hidden_size` (everything else)
    HiddenSize,
}

/// Static capabilities of one architecture family.
#[derive(Debug, Clone)]
pub struct FamilyCaps {
    /// Sublayer name patterns eligible for low-rank adaptation
    pub lora_targets: &'static [&'static str],
    /// Config field carrying the head input width
    pub hidden_width_field: HiddenWidthField,
}

const GPT2_LORA_MODULES: &[&str] = &["c_fc", "c_proj", "c_attn"];
const GPT_NEOX_LORA_MODULES: &[&str] = &["dense_h_to_4h", "dense_4h_to_h", "query_key_value"];
const GPT_NEO_LORA_MODULES: &[&str] = &["q_proj", "k_proj", "v_proj", "c_fc", "c_proj"];
const GPT_J_LORA_MODULES: &[&str] = &["q_proj", "k_proj", "v_proj", "fc_in", "fc_out"];
const OPT_LORA_MODULES: &[&str] = &["fc1", "fc2", "k_proj", "q_proj", "v_proj"];
const MISTRAL_LORA_MODULES: &[&str] = &[
    "up_proj",
    "down_proj",
    "gate_proj",
    "k_proj",
    "q_proj",
    "v_proj",
];

static FAMILY_CAPS: Lazy<HashMap<Family, FamilyCaps>> = Lazy::new(|| {
    use HiddenWidthField::*;
    HashMap::from([
        (
            Family::Gpt2,
            FamilyCaps {
                lora_targets: GPT2_LORA_MODULES,
                hidden_width_field: NEmbd,
            },
        ),
        (
            Family::GptNeoX,
            FamilyCaps {
                lora_targets: GPT_NEOX_LORA_MODULES,
                hidden_width_field: HiddenSize,
            },
        ),
        (
            Family::GptNeo,
            FamilyCaps {
                lora_targets: GPT_NEO_LORA_MODULES,
                hidden_width_field: HiddenSize,
            },
        ),
        (
            Family::GptJ,
            FamilyCaps {
                lora_targets: GPT_J_LORA_MODULES,
                hidden_width_field: NEmbd,
            },
        ),
        (
            Family::Opt,
            FamilyCaps {
                lora_targets: OPT_LORA_MODULES,
                hidden_width_field: WordEmbedProjDim,
            },
        ),
        (
            Family::Mistral,
            FamilyCaps {
                lora_targets: MISTRAL_LORA_MODULES,
                hidden_width_field: HiddenSize,
            },
        ),
        // Llama runs fine with the NeoX-style fused target set
        (
            Family::Llama,
            FamilyCaps {
                lora_targets: GPT_NEOX_LORA_MODULES,
                hidden_width_field: HiddenSize,
            },
        ),
        // Qwen ships remote code; adapters are skipped for it upstream
        (
            Family::Qwen,
            FamilyCaps {
                lora_targets: &[],
                hidden_width_field: HiddenSize,
            },
        ),
        (
            Family::Bloom,
            FamilyCaps {
                lora_targets: GPT_NEOX_LORA_MODULES,
                hidden_width_field: HiddenSize,
            },
        ),
        (
            Family::StableLm,
            FamilyCaps {
                lora_targets: GPT_NEOX_LORA_MODULES,
                hidden_width_field: HiddenSize,
            },
        ),
    ])
});

impl Family {
    /// The static capability record for this family.
    pub fn caps(&self) -> &'static FamilyCaps {
        &FAMILY_CAPS[self]
    }

    /// Default adapter target sublayer names for this family.
    pub fn lora_targets(&self) -> Vec<String> {
        self.caps()
            .lora_targets
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_family_has_caps() {
        for family in [
            Family::Gpt2,
            Family::GptNeoX,
            Family::GptNeo,
            Family::GptJ,
            Family::Opt,
            Family::Mistral,
            Family::Llama,
            Family::Qwen,
            Family::Bloom,
            Family::StableLm,
        ] {
            let _ = family.caps();
        }
    }

    #[test]
    fn test_gpt2_targets() {
        assert_eq!(Family::Gpt2.lora_targets(), vec!["c_fc", "c_proj", "c_attn"]);
    }

    #[test]
    fn test_opt_uses_decoupled_embed_width() {
        assert_eq!(
            Family::Opt.caps().hidden_width_field,
            HiddenWidthField::WordEmbedProjDim
        );
    }
}
