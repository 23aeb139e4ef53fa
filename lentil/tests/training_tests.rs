mod common;

use candle_util::candle_core::{DType, Device};
use candle_util::candle_model_topic::*;
use candle_util::candle_nn::{VarBuilder, VarMap};
use candle_util::candle_noise::NoiseSource;
use common::*;
use lentil::config::*;
use lentil::evaluation::*;
use lentil::lentil_input::CorpusData;
use lentil::trainer::*;
use matrix_util::coherence::NpmiEvaluator;
use matrix_util::common_io::read_lines;
use matrix_util::sparse_bow::BowMatrix;
use matrix_util::vocab::Vocabulary;
use std::sync::Arc;

fn untrained_model(corpus: &CorpusData, cfg: &Configuration, seed: u64) -> anyhow::Result<TopicModel> {
    let trial = TrialConfig::from_configuration(cfg, None)?;
    let noise = Arc::new(NoiseSource::seed_from_u64(seed));
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let mut model = TopicModel::new(
        TopicModelConfig {
            n_features: corpus.vocab.len(),
            n_topics: trial.n_latent,
            embedding_size: trial.embedding_size,
            hidden_dims: vec![trial.enc_hidden_dim],
            n_covars: 0,
            latent: trial.latent.clone(),
            coherence_penalty: 0.0,
            fixed_embedding: false,
        },
        None,
        None,
        noise.clone(),
        vb,
    )?;
    model.initialize(&varmap, &noise, &corpus.word_freqs)?;
    model.post_init()?;
    Ok(model)
}

#[test]
fn training_improves_coherence() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(200, 60)?;
    let cfg = config("gaussian", 0.02);
    let opts = small_options();

    let npmi = NpmiEvaluator::new(corpus.eval_bow());
    let before = coherence(&untrained_model(&corpus, &cfg, opts.seed)?, &npmi, 10)?;

    let trained = Trainer::new(&corpus, &opts).train_model(&cfg, 5)?;
    let after = trained.result.info.coherence;

    assert!(trained.result.is_ok());
    assert!(after > before, "npmi {} -> {}", before, after);
    approx::assert_relative_eq!(trained.result.loss, 1.0 - after);
    assert!(trained.result.info.test_perplexity.is_finite());
    assert!(trained.result.info.test_perplexity > 1.0);
    Ok(())
}

#[test]
fn same_seed_same_trial() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(60, 20)?;
    let opts = small_options();

    for latent in ["gaussian", "logistic_gaussian", "vmf"] {
        let cfg = config(latent, 0.01);
        let a = Trainer::new(&corpus, &opts).train_trial(&cfg, 2)?;
        let b = Trainer::new(&corpus, &opts).train_trial(&cfg, 2)?;
        approx::assert_relative_eq!(a.loss, b.loss, max_relative = 1e-6);
        approx::assert_relative_eq!(
            a.info.test_perplexity,
            b.info.test_perplexity,
            max_relative = 1e-5
        );
        approx::assert_relative_eq!(a.info.train_loss, b.info.train_loss, max_relative = 1e-5);
    }
    Ok(())
}

#[test]
fn configuration_errors_are_fatal() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(20, 0)?;
    let opts = small_options();
    let trainer = Trainer::new(&corpus, &opts);

    assert!(trainer.train_trial(&config("gaussian", 0.01), 0).is_err());

    let mut cfg = config("gaussian", 0.01);
    cfg.remove("n_latent");
    assert!(trainer.train_trial(&cfg, 1).is_err());

    let mut cfg = config("logistic_gaussian", 0.01);
    cfg.insert("alpha".into(), HpValue::Float(50.0));
    assert!(trainer.train_trial(&cfg, 1).is_err());
    Ok(())
}

#[test]
fn empty_inputs_are_rejected() -> anyhow::Result<()> {
    let train = BowMatrix::from_token_ids(&synthetic_docs(10, 1), N_TERMS)?;
    let no_docs = BowMatrix::from_token_ids(&[], N_TERMS)?;

    assert!(CorpusData::from_parts(synthetic_vocab(), no_docs.clone(), None, false).is_err());
    assert!(CorpusData::from_parts(synthetic_vocab(), train.clone(), Some(no_docs), false).is_err());

    let empty_vocab = Vocabulary::from_tokens::<&str>(&[])?;
    let zero_terms = BowMatrix::from_token_ids(&[vec![], vec![]], 0)?;
    assert!(CorpusData::from_parts(empty_vocab, zero_terms, None, false).is_err());

    assert!(CorpusData::from_parts(synthetic_vocab(), train, None, false).is_ok());
    Ok(())
}

#[test]
fn overflowing_counts_give_the_sentinel() -> anyhow::Result<()> {
    let mut triplets: Vec<(usize, usize, f32)> = synthetic_docs(30, 11)
        .iter()
        .enumerate()
        .flat_map(|(i, doc)| doc.iter().map(move |&j| (i, j, 1_f32)))
        .collect();
    triplets.extend((0..3).map(|j| (0, j, f32::MAX)));
    let train = BowMatrix::from_triplets(30, N_TERMS, &triplets, None)?;
    let corpus = CorpusData::from_parts(synthetic_vocab(), train, None, false)?;

    let trainer_opts = small_options();
    let trainer = Trainer::new(&corpus, &trainer_opts);

    let err = trainer
        .train_model(&config("gaussian", 0.01), 2)
        .err()
        .expect("training cannot finish");
    assert!(err.downcast_ref::<NumericalError>().is_some(), "{}", err);

    let res = trainer.train_trial(&config("gaussian", 0.01), 2)?;
    assert!(!res.is_ok());
    assert_eq!(res.info.status, TrialStatus::Diverged);
    assert_eq!(res.loss, SENTINEL_LOSS);
    Ok(())
}

#[test]
fn no_held_out_data_uses_training_set() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(40, 0)?;
    assert!(!corpus.has_test());
    let res = Trainer::new(&corpus, &small_options()).train_trial(&config("gaussian", 0.01), 1)?;
    assert!(res.is_ok());
    assert!(res.info.test_perplexity.is_finite());
    assert!((-1.0..=1.0).contains(&res.info.coherence));
    Ok(())
}

#[test]
fn empty_documents_keep_perplexity_finite() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(30, 0)?;
    let model = untrained_model(&corpus, &config("gaussian", 0.01), 1)?;

    let empty = BowMatrix::from_token_ids(&[vec![], vec![]], N_TERMS)?;
    assert_eq!(perplexity(&model, &empty, 0, 16)?, 1.0);

    let mixed = BowMatrix::from_token_ids(&[vec![], vec![0, 1, 2], vec![]], N_TERMS)?;
    let ppl = perplexity(&model, &mixed, 0, 2)?;
    assert!(ppl.is_finite() && ppl > 1.0, "{}", ppl);
    Ok(())
}

#[test]
fn sparsity_target_and_trace_file() -> anyhow::Result<()> {
    let corpus = synthetic_corpus(40, 20)?;
    let dir = tempfile::tempdir()?;
    let trace = dir.path().join("trace.csv");

    let opts = RunOptions {
        init_sparsity_pen: 1e-3,
        eval_freq: 2,
        trace_file: Some(trace.to_str().unwrap().into()),
        ..small_options()
    };

    let mut cfg = config("gaussian", 0.01);
    cfg.insert("target_sparsity".into(), HpValue::Float(0.5));

    let res = Trainer::new(&corpus, &opts).train_trial(&cfg, 4)?;
    assert!(res.is_ok());

    let lines = read_lines(trace.to_str().unwrap())?;
    assert_eq!(lines[0].as_ref(), TRACE_HEADER);
    assert_eq!(lines.len(), 3, "epochs 1 and 3: {:?}", lines);
    let fields: Vec<&str> = lines[1].split(',').map(|x| x.trim()).collect();
    assert_eq!(fields[0], "1");
    assert!(fields[1].parse::<f64>()?.is_finite());
    Ok(())
}
