use crate::config::*;
use crate::trainer::TrainedTrial;

use candle_util::candle_core::{DType, Device};
use candle_util::candle_model_topic::*;
use candle_util::candle_nn::{VarBuilder, VarMap};
use candle_util::candle_noise::NoiseSource;
use log::info;
use matrix_util::common_io::*;
use matrix_util::vocab::Vocabulary;
use std::path::Path;
use std::sync::Arc;

pub const PARAMS_FILE: &str = "model.params";
pub const SPECS_FILE: &str = "model.specs";
pub const VOCAB_FILE: &str = "vocab.json";

pub const TRAINING_EPOCHS_KEY: &str = "training_epochs";
pub const N_COVARS_KEY: &str = "n_covars";

fn path_in(dir: &str, file: &str) -> anyhow::Result<Box<str>> {
    Path::new(dir)
        .join(file)
        .to_str()
        .map(|s| s.into())
        .ok_or(anyhow::anyhow!("invalid path under {}", dir))
}

///
/// Configuration written next to the parameters: the searched
/// values plus the resolved embedding size, epoch count and number
/// of covariates
///
pub fn model_specs(cfg: &Configuration, trained: &TrainedTrial) -> Configuration {
    let mut specs = cfg.clone();
    specs.insert(
        "embedding_size".into(),
        HpValue::Int(trained.config.embedding_size as i64),
    );
    specs.insert(
        TRAINING_EPOCHS_KEY.into(),
        HpValue::Int(trained.epochs as i64),
    );
    specs.insert(
        N_COVARS_KEY.into(),
        HpValue::Int(trained.model.config().n_covars as i64),
    );
    specs
}

///
/// Write `model.params`, `model.specs` and `vocab.json` under `model_dir`
///
pub fn write_model(
    model_dir: &str,
    cfg: &Configuration,
    trained: &TrainedTrial,
    vocab: &Vocabulary,
) -> anyhow::Result<()> {
    let params_file = path_in(model_dir, PARAMS_FILE)?;
    mkdir(&params_file)?;
    trained.varmap.save(&*params_file)?;

    let specs_file = path_in(model_dir, SPECS_FILE)?;
    let specs = model_specs(cfg, trained);
    with_buf_writer(&specs_file, |writer| Ok(serde_json::to_writer_pretty(writer, &specs)?))?;

    vocab.to_json(&path_in(model_dir, VOCAB_FILE)?)?;

    info!("saved the model in {}", model_dir);
    Ok(())
}

/// A model restored from a model directory
pub struct SavedModel {
    pub model: TopicModel,
    pub varmap: VarMap,
    pub vocab: Vocabulary,
    pub specs: Configuration,
}

///
/// Rebuild the network described by `model.specs` and load its
/// parameters
///
/// * `model_dir` - directory written by `write_model`
/// * `device` - where to place the parameters
///
pub fn read_model(model_dir: &str, device: &Device) -> anyhow::Result<SavedModel> {
    let specs = read_configuration(&path_in(model_dir, SPECS_FILE)?)?;
    let vocab = Vocabulary::from_json(&path_in(model_dir, VOCAB_FILE)?)?;
    let config = TrialConfig::from_configuration(&specs, None)?;

    let n_covars = specs
        .get(N_COVARS_KEY)
        .and_then(|x| x.as_usize())
        .unwrap_or(0);

    let model_config = TopicModelConfig {
        n_features: vocab.len(),
        n_topics: config.n_latent,
        embedding_size: config.embedding_size,
        hidden_dims: vec![config.enc_hidden_dim],
        n_covars,
        latent: config.latent.clone(),
        coherence_penalty: config.coherence_reg_penalty,
        fixed_embedding: false,
    };

    let noise = Arc::new(NoiseSource::seed_from_u64(RunOptions::default().seed));
    let mut varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let mut model = TopicModel::new(model_config, None, None, noise, vb)?;
    varmap.load(&*path_in(model_dir, PARAMS_FILE)?)?;
    model.post_init()?;

    info!(
        "loaded a {}-topic model over {} terms from {}",
        config.n_latent,
        vocab.len(),
        model_dir
    );

    Ok(SavedModel {
        model,
        varmap,
        vocab,
        specs,
    })
}
