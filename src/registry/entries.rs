//! Declarative descriptor table
//!
//! Learning rates are not particularly tuned; they work reasonably at train
//! batch size 32. Per-device minibatch sizes assume a roughly 40GB card and
//! need adjusting for other hardware.

use std::collections::BTreeMap;

use super::{ModelDescriptor, OptimizerFamily, RuntimeEnv};
use crate::model::arch::Family;
use crate::naming::ConfigValue;

const DEFAULT_LR: f64 = 1e-5;
const GPT2_LR: f64 = 5e-5;
const OPT_LR: f64 = 1e-3;

const SMALL_BATCH: usize = 2;
const LARGE_BATCH: usize = 32;

/// Cards below this size cannot hold the larger single-device models, so
/// their descriptors flip to model-parallel when several cards are present.
const MODEL_PARALLEL_RAM_CUTOFF: u64 = 35_000_000_000;

const QWEN_REVISION: &str = "5fde88dff770a7d036847211f5d9d9705f0caa69";

fn bf16_overrides(env: &RuntimeEnv) -> BTreeMap<String, ConfigValue> {
    // reduced precision is fine here because the trainable adapter and head
    // parameters are held in f32
    let dtype = if env.bf16_supported { "bf16" } else { "f32" };
    BTreeMap::from([("dtype".to_string(), ConfigValue::from(dtype))])
}

fn qwen_overrides(env: &RuntimeEnv) -> BTreeMap<String, ConfigValue> {
    BTreeMap::from([
        ("trust_remote_code".to_string(), ConfigValue::Bool(true)),
        ("bf16".to_string(), ConfigValue::Bool(env.bf16_supported)),
        ("fp32".to_string(), ConfigValue::Bool(!env.bf16_supported)),
        ("revision".to_string(), ConfigValue::from(QWEN_REVISION)),
    ])
}

pub(super) fn build_entries(env: &RuntimeEnv) -> Vec<ModelDescriptor> {
    // small cards need sharding for the borderline single-device models
    let cramped_multi_gpu =
        env.per_device_memory_bytes < MODEL_PARALLEL_RAM_CUTOFF && env.accelerator_count > 1;

    let mut entries = vec![
        ModelDescriptor::new("gpt2", Family::Gpt2, GPT2_LR, LARGE_BATCH).family_lora(),
        ModelDescriptor::new("gpt2-medium", Family::Gpt2, GPT2_LR, LARGE_BATCH).family_lora(),
        ModelDescriptor::new("gpt2-large", Family::Gpt2, DEFAULT_LR, LARGE_BATCH).family_lora(),
        ModelDescriptor::new("gpt2-xl", Family::Gpt2, DEFAULT_LR, SMALL_BATCH)
            .family_lora()
            .checkpointing()
            .parallel(cramped_multi_gpu),
    ];

    for size in ["14m", "70m", "160m", "410m", "2.8b"] {
        entries.push(
            ModelDescriptor::new(
                &format!("EleutherAI/pythia-{size}"),
                Family::GptNeoX,
                DEFAULT_LR,
                LARGE_BATCH,
            )
            .family_lora()
            .minibatch(LARGE_BATCH),
        );
    }
    for size in ["6.9b", "12b"] {
        entries.push(
            ModelDescriptor::new(
                &format!("EleutherAI/pythia-{size}"),
                Family::GptNeoX,
                DEFAULT_LR,
                SMALL_BATCH,
            )
            .family_lora()
            .minibatch(SMALL_BATCH)
            .overrides(bf16_overrides(env)),
        );
    }

    entries.extend([
        ModelDescriptor::new(
            "mistralai/Mistral-7B-v0.1",
            Family::Mistral,
            DEFAULT_LR,
            SMALL_BATCH,
        )
        .family_lora()
        .minibatch(SMALL_BATCH)
        .checkpointing()
        .overrides(bf16_overrides(env)),
        ModelDescriptor::new("mistralai/Mixtral-8x7B-v0.1", Family::Mistral, DEFAULT_LR, 1)
            .family_lora()
            .minibatch(1)
            .checkpointing()
            .parallel(true)
            .overrides(bf16_overrides(env))
            .optimizer(OptimizerFamily::Adafactor),
        ModelDescriptor::new("Qwen/Qwen-1_8B", Family::Qwen, DEFAULT_LR, SMALL_BATCH)
            .minibatch(SMALL_BATCH)
            .checkpointing()
            .parallel(cramped_multi_gpu)
            .overrides(qwen_overrides(env)),
        // you will probably not be able to run these without many gpus
        ModelDescriptor::new("Qwen/Qwen-7B", Family::Qwen, DEFAULT_LR, SMALL_BATCH)
            .minibatch(SMALL_BATCH)
            .checkpointing()
            .parallel(true)
            .overrides(qwen_overrides(env)),
        ModelDescriptor::new("Qwen/Qwen-14B", Family::Qwen, DEFAULT_LR, SMALL_BATCH)
            .minibatch(SMALL_BATCH)
            .checkpointing()
            .parallel(true)
            .overrides(qwen_overrides(env)),
        // big enough that adafactor's smaller optimizer state matters; even
        // then it takes ~60GB per GPU on an 8-GPU machine
        ModelDescriptor::new("Qwen/Qwen-72B", Family::Qwen, DEFAULT_LR, 1)
            .checkpointing()
            .parallel(true)
            .overrides(qwen_overrides(env))
            .optimizer(OptimizerFamily::Adafactor),
    ]);

    for size in ["125m", "350m", "2.7b"] {
        entries.push(
            ModelDescriptor::new(
                &format!("facebook/opt-{size}"),
                Family::Opt,
                OPT_LR,
                LARGE_BATCH,
            )
            .family_lora()
            .minibatch(LARGE_BATCH),
        );
    }
    entries.extend([
        ModelDescriptor::new("facebook/opt-6.7b", Family::Opt, OPT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .overrides(bf16_overrides(env)),
        ModelDescriptor::new("facebook/opt-13b", Family::Opt, OPT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .parallel(true)
            .overrides(bf16_overrides(env)),
        ModelDescriptor::new("facebook/opt-30b", Family::Opt, OPT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .parallel(true)
            .overrides(bf16_overrides(env)),
    ]);

    entries.extend([
        ModelDescriptor::new("bigscience/bloom-560m", Family::Bloom, DEFAULT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH),
        ModelDescriptor::new("bigscience/bloom-3b", Family::Bloom, DEFAULT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .overrides(bf16_overrides(env)),
        ModelDescriptor::new("bigscience/bloom-7b1", Family::Bloom, DEFAULT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .overrides(bf16_overrides(env)),
        // 176B parameters
        ModelDescriptor::new("bigscience/bloom", Family::Bloom, DEFAULT_LR, 1)
            .family_lora()
            .minibatch(1)
            .checkpointing()
            .parallel(true)
            .overrides(bf16_overrides(env))
            .optimizer(OptimizerFamily::Adafactor),
        ModelDescriptor::new(
            "stabilityai/stablelm-base-alpha-3b",
            Family::StableLm,
            DEFAULT_LR,
            LARGE_BATCH,
        )
        .family_lora()
        .minibatch(LARGE_BATCH),
        ModelDescriptor::new(
            "stabilityai/stablelm-base-alpha-7b",
            Family::StableLm,
            DEFAULT_LR,
            LARGE_BATCH,
        )
        .family_lora()
        .minibatch(LARGE_BATCH)
        .checkpointing()
        .overrides(bf16_overrides(env)),
        ModelDescriptor::new("EleutherAI/gpt-neo-2.7B", Family::GptNeo, DEFAULT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH),
        ModelDescriptor::new("EleutherAI/gpt-j-6b", Family::GptJ, DEFAULT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .overrides(bf16_overrides(env)),
        ModelDescriptor::new("EleutherAI/gpt-neox-20b", Family::GptNeoX, DEFAULT_LR, LARGE_BATCH)
            .family_lora()
            .minibatch(LARGE_BATCH)
            .checkpointing()
            .parallel(true)
            .overrides(bf16_overrides(env)),
    ]);

    for (name, parallel) in [
        ("meta-llama/Llama-2-7b-hf", false),
        ("meta-llama/Llama-2-13b-hf", true),
        ("meta-llama/Llama-2-70b-hf", true),
        ("huggyllama/llama-7b", false),
        ("huggyllama/llama-13b", true),
        ("huggyllama/llama-30b", true),
        ("huggyllama/llama-65b", true),
    ] {
        entries.push(
            ModelDescriptor::new(name, Family::Llama, DEFAULT_LR, LARGE_BATCH)
                .family_lora()
                .minibatch(LARGE_BATCH)
                .checkpointing()
                .parallel(parallel)
                .overrides(bf16_overrides(env)),
        );
    }

    entries
}
