//! End-to-end tests of the classifier adaptation layer over a tiny
//! deterministic backbone.

use candle_core::{DType, Device, Tensor};
use candle_nn::{Embedding, Linear, Module};

use w2s::model::adapter::AdaptedLinear;
use w2s::model::{AdapterInjector, BackboneConfig, CheckpointScope, StateBlock};
use w2s::{
    AdaptedClassifier, BackboneProvider, CausalBackbone, ClassifierConfig,
    ClassifierConfigBuilder, Error, Family, ModelDescriptor, ModelRegistry, Result, RuntimeEnv,
    Sharded,
};

const VOCAB: usize = 11;
const HIDDEN: usize = 8;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deterministic pseudo-weights so every load reproduces the same backbone.
fn det_tensor(rows: usize, cols: usize, phase: usize) -> Tensor {
    let data: Vec<f32> = (0..rows * cols)
        .map(|i| (((i * 7 + phase * 13) % 23) as f32) * 0.04 - 0.4)
        .collect();
    Tensor::from_vec(data, (rows, cols), &Device::Cpu).unwrap()
}

/// Two-layer positionwise toy network behind the `CausalBackbone` seam.
/// Not a transformer; just enough structure to exercise pooling, adapter
/// injection, and state exchange.
struct TinyBackbone {
    config: BackboneConfig,
    wte: Embedding,
    c_attn: AdaptedLinear,
    c_fc: AdaptedLinear,
    lm_head: Linear,
    #[allow(dead_code)]
    checkpointing: Option<CheckpointScope>,
}

impl TinyBackbone {
    fn new() -> Self {
        Self {
            config: BackboneConfig {
                family: Family::Gpt2,
                vocab_size: VOCAB,
                word_embed_proj_dim: None,
                n_embd: Some(HIDDEN),
                hidden_size: None,
                dtype: DType::F32,
                device: Device::Cpu,
            },
            wte: Embedding::new(det_tensor(VOCAB, HIDDEN, 1), HIDDEN),
            c_attn: AdaptedLinear::frozen(Linear::new(det_tensor(HIDDEN, HIDDEN, 2), None)),
            c_fc: AdaptedLinear::frozen(Linear::new(det_tensor(HIDDEN, HIDDEN, 3), None)),
            lm_head: Linear::new(det_tensor(VOCAB, HIDDEN, 4), None),
            checkpointing: None,
        }
    }
}

impl CausalBackbone for TinyBackbone {
    fn config(&self) -> &BackboneConfig {
        &self.config
    }

    fn forward_hidden(&self, input_ids: &Tensor) -> Result<Tensor> {
        let xs = self.wte.forward(input_ids).map_err(Error::from)?;
        let xs = self.c_attn.forward(&xs).map_err(Error::from)?;
        let xs = xs.tanh().map_err(Error::from)?;
        Ok(self.c_fc.forward(&xs)?)
    }

    fn forward_logits(&self, input_ids: &Tensor) -> Result<Tensor> {
        let hidden = self.forward_hidden(input_ids)?;
        Ok(self.lm_head.forward(&hidden)?)
    }

    fn visit_adaptable(&mut self, injector: &mut AdapterInjector) -> Result<()> {
        injector.visit("h.0.attn.c_attn", &mut self.c_attn)?;
        injector.visit("h.0.mlp.c_fc", &mut self.c_fc)?;
        Ok(())
    }

    fn set_gradient_checkpointing(&mut self, enabled: bool, scope: CheckpointScope) {
        self.checkpointing = enabled.then_some(scope);
    }

    fn export_state(&self) -> Result<StateBlock> {
        Ok(StateBlock::from([
            ("wte.weight".to_string(), self.wte.embeddings().clone()),
            (
                "h.0.attn.c_attn.weight".to_string(),
                self.c_attn.base().weight().clone(),
            ),
            (
                "h.0.mlp.c_fc.weight".to_string(),
                self.c_fc.base().weight().clone(),
            ),
            ("lm_head.weight".to_string(), self.lm_head.weight().clone()),
        ]))
    }

    fn import_state(&mut self, block: &StateBlock) -> Result<()> {
        let get = |key: &str| -> Result<Tensor> {
            block
                .get(key)
                .cloned()
                .ok_or_else(|| Error::invalid_input(format!("missing state key {key}")))
        };
        self.wte = Embedding::new(get("wte.weight")?, HIDDEN);
        self.c_attn = AdaptedLinear::frozen(Linear::new(get("h.0.attn.c_attn.weight")?, None));
        self.c_fc = AdaptedLinear::frozen(Linear::new(get("h.0.mlp.c_fc.weight")?, None));
        self.lm_head = Linear::new(get("lm_head.weight")?, None);
        Ok(())
    }
}

/// Provider returning the deterministic tiny backbone, optionally sharded.
struct TinyProvider {
    sharded: bool,
}

impl TinyProvider {
    fn new() -> Self {
        Self { sharded: false }
    }
}

impl BackboneProvider for TinyProvider {
    fn load(&self, descriptor: &ModelDescriptor) -> Result<Box<dyn CausalBackbone>> {
        if descriptor.name.starts_with("missing/") {
            return Err(Error::weights_not_found(descriptor.name.clone()));
        }
        if self.sharded {
            Ok(Box::new(Sharded::new(
                TinyBackbone::new(),
                vec![Device::Cpu, Device::Cpu],
            )))
        } else {
            Ok(Box::new(TinyBackbone::new()))
        }
    }
}

fn gpt2_descriptor() -> ModelDescriptor {
    ModelRegistry::with_env(&RuntimeEnv::single_device())
        .get_descriptor("gpt2")
        .unwrap()
        .clone()
}

/// A descriptor with no adapter targets, for the full-state path.
fn plain_descriptor() -> ModelDescriptor {
    let mut descriptor = gpt2_descriptor();
    descriptor.lora_modules = None;
    descriptor
}

fn ids(rows: &[&[u32]]) -> Tensor {
    let cols = rows[0].len();
    let data: Vec<u32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::from_vec(data, (rows.len(), cols), &Device::Cpu).unwrap()
}

fn to_rows(t: &Tensor) -> Vec<Vec<f32>> {
    t.to_vec2::<f32>().unwrap()
}

#[test]
fn lm_head_pooling_reads_each_rows_last_real_position() {
    init_tracing();
    let classifier = AdaptedClassifier::new(
        &plain_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfigBuilder::new().use_lm_head(true).build().unwrap(),
    )
    .unwrap();

    // same prefix, different true lengths under right-padding
    let padded = ids(&[&[5, 3, 0, 0], &[5, 3, 7, 2]]);
    let choices = ids(&[&[1, 4], &[1, 4]]);
    let logits = classifier.forward(&padded, Some(&choices)).unwrap();
    assert_eq!(logits.dims(), &[2, 2]);
    let rows = to_rows(&logits);
    assert_ne!(rows[0], rows[1], "rows must pool at their own positions");

    // the padded short row must match the same sequence without padding
    let unpadded = ids(&[&[5, 3]]);
    let choices1 = ids(&[&[1, 4]]);
    let expected = to_rows(&classifier.forward(&unpadded, Some(&choices1)).unwrap());
    assert_eq!(rows[0], expected[0]);
}

#[test]
fn learned_head_starts_as_constant_zero() {
    let classifier = AdaptedClassifier::new(
        &gpt2_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();
    let logits = classifier
        .forward(&ids(&[&[5, 3, 0], &[2, 8, 6]]), None)
        .unwrap();
    assert_eq!(logits.dims(), &[2, 2]);
    for row in to_rows(&logits) {
        assert!(row.iter().all(|&v| v == 0.0));
    }
}

#[test]
fn learned_head_pooling_distinguishes_lengths_once_trained() {
    let classifier = AdaptedClassifier::new(
        &gpt2_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();

    // give the zero head some weights, as an optimizer step would
    let groups = classifier.trainable_parameter_groups();
    let head = &groups.last().unwrap()[0];
    head.set(&det_tensor(2, HIDDEN, 9)).unwrap();

    let logits = classifier
        .forward(&ids(&[&[5, 3, 0, 0], &[5, 3, 7, 2]]), None)
        .unwrap();
    let rows = to_rows(&logits);
    assert_ne!(rows[0], rows[1]);
}

#[test]
fn adapter_state_sequence_counts_adapters_plus_head() {
    // gpt2 targets c_fc/c_proj/c_attn; the tiny backbone exposes c_attn and
    // c_fc, so two sublayers carry adapters
    let classifier = AdaptedClassifier::new(
        &gpt2_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();

    let set = classifier.adapters().unwrap();
    assert_eq!(set.len(), 2);
    assert_eq!(set.names(), vec!["h.0.attn.c_attn", "h.0.mlp.c_fc"]);
    assert_eq!(classifier.save_state().unwrap().len(), 3);
    assert_eq!(classifier.trainable_parameter_groups().len(), 3);
}

#[test]
fn adapter_round_trip_reproduces_forward_outputs() {
    let descriptor = gpt2_descriptor();
    let config = ClassifierConfig::default();

    let trained = AdaptedClassifier::new(&descriptor, &TinyProvider::new(), &config).unwrap();
    // perturb every trainable group so the state is distinguishable from a
    // fresh initialization
    for (i, group) in trained.trainable_parameter_groups().iter().enumerate() {
        for var in group {
            let nudged = var
                .as_tensor()
                .ones_like()
                .unwrap()
                .affine(0.03 * (i + 1) as f64, 0.0)
                .unwrap();
            var.set(&nudged).unwrap();
        }
    }

    let batch = ids(&[&[5, 3, 7, 0], &[1, 2, 3, 4]]);
    let expected = to_rows(&trained.forward(&batch, None).unwrap());

    let file = tempfile::NamedTempFile::new().unwrap();
    trained.write_state(file.path()).unwrap();

    let mut fresh = AdaptedClassifier::new(&descriptor, &TinyProvider::new(), &config).unwrap();
    fresh.read_state(file.path()).unwrap();
    let reloaded = to_rows(&fresh.forward(&batch, None).unwrap());
    assert_eq!(expected, reloaded);
}

#[test]
fn state_length_mismatch_is_rejected() {
    let mut classifier = AdaptedClassifier::new(
        &gpt2_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();
    let mut blocks = classifier.save_state().unwrap();
    blocks.pop();
    let err = classifier.load_state(&blocks).unwrap_err();
    assert!(matches!(
        err,
        Error::StateShapeMismatch {
            expected: 3,
            actual: 2
        }
    ));
}

#[test]
fn no_adapters_means_single_full_block() {
    let mut classifier = AdaptedClassifier::new(
        &plain_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();
    assert!(classifier.adapters().is_none());
    // only the head is trainable; the frozen backbone contributes nothing
    assert_eq!(classifier.trainable_parameter_groups().len(), 1);

    let blocks = classifier.save_state().unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].contains_key("score.weight"));
    classifier.load_state(&blocks).unwrap();
}

#[test]
fn head_mode_and_choice_inputs_must_agree() {
    let learned = AdaptedClassifier::new(
        &plain_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();
    let choices = ids(&[&[1, 4]]);
    let err = learned.forward(&ids(&[&[5, 3]]), Some(&choices)).unwrap_err();
    assert!(matches!(err, Error::InvalidHeadConfiguration(_)));

    let lm = AdaptedClassifier::new(
        &plain_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfigBuilder::new().use_lm_head(true).build().unwrap(),
    )
    .unwrap();
    let err = lm.forward(&ids(&[&[5, 3]]), None).unwrap_err();
    assert!(matches!(err, Error::InvalidHeadConfiguration(_)));
}

#[test]
fn all_padding_row_is_rejected() {
    let classifier = AdaptedClassifier::new(
        &plain_descriptor(),
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap();
    let err = classifier.forward(&ids(&[&[0, 0, 0]]), None).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn missing_weights_propagate_from_provider() {
    let mut descriptor = plain_descriptor();
    descriptor.name = "missing/model".to_string();
    let err = AdaptedClassifier::new(
        &descriptor,
        &TinyProvider::new(),
        &ClassifierConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::WeightsNotFound(_)));
}

#[test]
fn sharded_wrapper_is_transparent() {
    let provider = TinyProvider { sharded: true };
    let classifier =
        AdaptedClassifier::new(&gpt2_descriptor(), &provider, &ClassifierConfig::default())
            .unwrap();
    assert_eq!(classifier.adapters().unwrap().len(), 2);
    let logits = classifier.forward(&ids(&[&[5, 3, 7]]), None).unwrap();
    assert_eq!(logits.dims(), &[1, 2]);
}
