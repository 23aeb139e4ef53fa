use crate::config::*;
use crate::evaluation::*;
use crate::lentil_input::CorpusData;
use crate::sparsity::SparsityAnnealer;

use candle_util::candle_core::{DType, Device, Tensor, Var};
use candle_util::candle_data_loader::*;
use candle_util::candle_model_topic::*;
use candle_util::candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap, SGD};
use candle_util::candle_noise::NoiseSource;
use candle_util::candle_vmf_sampler::VmfSamplerStalled;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{info, warn};
use matrix_util::coherence::NpmiEvaluator;
use matrix_util::common_io::write_lines;
use std::sync::Arc;

pub const TRACE_HEADER: &str = "Epoch,PPL,NPMI";

/// A model after its last epoch, with everything needed to save it
pub struct TrainedTrial {
    pub model: TopicModel,
    pub varmap: VarMap,
    pub config: TrialConfig,
    pub result: TrialResult,
    pub epochs: usize,
}

enum TrialOptimizer {
    Adam(AdamW),
    Sgd(SGD),
}

impl TrialOptimizer {
    fn new(kind: OptimizerKind, vars: Vec<Var>, lr: f64) -> anyhow::Result<Self> {
        Ok(match kind {
            OptimizerKind::Adam => TrialOptimizer::Adam(AdamW::new(
                vars,
                ParamsAdamW {
                    lr,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => TrialOptimizer::Sgd(SGD::new(vars, lr)?),
        })
    }

    fn backward_step(&mut self, loss: &Tensor) -> anyhow::Result<()> {
        match self {
            TrialOptimizer::Adam(opt) => opt.backward_step(loss)?,
            TrialOptimizer::Sgd(opt) => opt.backward_step(loss)?,
        }
        Ok(())
    }
}

#[derive(Default)]
struct EpochTotals {
    elbo: f64,
    reconstruction: f64,
    kl: f64,
    l1: f64,
    entropy: f64,
    coherence: f64,
    ndocs: usize,
}

impl EpochTotals {
    fn add(&mut self, parts: &ElboParts) -> anyhow::Result<()> {
        self.elbo += scalar_sum(&parts.elbo)?;
        self.reconstruction += scalar_sum(&parts.reconstruction)?;
        self.kl += scalar_sum(&parts.kl)?;
        self.l1 += scalar_sum(&parts.l1)?;
        if let Some(ent) = parts.entropy.as_ref() {
            self.entropy += scalar_sum(ent)?;
        }
        if let Some(coh) = parts.coherence.as_ref() {
            self.coherence += scalar_sum(coh)?;
        }
        self.ndocs += parts.elbo.dim(0)?;
        Ok(())
    }

    fn per_doc(&self, x: f64) -> f64 {
        x / self.ndocs.max(1) as f64
    }
}

fn scalar_sum(x: &Tensor) -> anyhow::Result<f64> {
    Ok(x.sum_all()?
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?
        .to_scalar::<f64>()?)
}

fn check_finite(x: f64, what: &str, epoch: usize) -> anyhow::Result<f64> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(NumericalError {
            what: format!("non-finite {}", what).into(),
            epoch,
        }
        .into())
    }
}

/// a rejection-sampling stall belongs to this trial only
fn trial_local(err: anyhow::Error, epoch: usize) -> anyhow::Error {
    match err.downcast_ref::<VmfSamplerStalled>() {
        Some(stall) => NumericalError {
            what: stall.to_string().into(),
            epoch,
        }
        .into(),
        None => err,
    }
}

///
/// Trains one configuration for a given number of epochs over a
/// shared corpus
///
pub struct Trainer<'a> {
    corpus: &'a CorpusData,
    opts: &'a RunOptions,
}

impl<'a> Trainer<'a> {
    pub fn new(corpus: &'a CorpusData, opts: &'a RunOptions) -> Self {
        Self { corpus, opts }
    }

    ///
    /// Train and score a configuration. A diverged trial is reported
    /// with the sentinel objective instead of an error.
    ///
    /// * `cfg` - hyperparameter configuration
    /// * `budget` - number of epochs
    ///
    pub fn train_trial(&self, cfg: &Configuration, budget: usize) -> anyhow::Result<TrialResult> {
        match self.train_model(cfg, budget) {
            Ok(trained) => Ok(trained.result),
            Err(e) => match e.downcast_ref::<NumericalError>() {
                Some(num) => {
                    warn!("trial diverged: {}", num);
                    Ok(TrialResult::diverged())
                }
                None => Err(e),
            },
        }
    }

    ///
    /// Train a configuration and keep the model. Numerical failures
    /// come back as `NumericalError`.
    ///
    /// * `cfg` - hyperparameter configuration
    /// * `budget` - number of epochs
    ///
    pub fn train_model(&self, cfg: &Configuration, budget: usize) -> anyhow::Result<TrainedTrial> {
        if budget == 0 {
            anyhow::bail!("epoch budget must be positive");
        }
        if self.opts.batch_size == 0 || self.opts.eval_freq == 0 {
            anyhow::bail!("batch size and evaluation frequency must be positive");
        }
        if self.corpus.train.num_docs() == 0 || self.corpus.vocab.is_empty() {
            anyhow::bail!("no training documents or an empty vocabulary");
        }

        let config = TrialConfig::from_configuration(cfg, self.corpus.embedding_size())?;
        info!("training for {} epochs: {:?}", budget, cfg);

        let corpus = self.corpus;
        let opts = self.opts;
        let dev = opts.device.device(opts.device_no)?;
        let noise = Arc::new(NoiseSource::seed_from_u64(opts.seed));

        let model_config = TopicModelConfig {
            n_features: corpus.vocab.len(),
            n_topics: config.n_latent,
            embedding_size: config.embedding_size,
            hidden_dims: vec![config.enc_hidden_dim],
            n_covars: corpus.n_covars,
            latent: config.latent.clone(),
            coherence_penalty: config.coherence_reg_penalty,
            fixed_embedding: opts.fixed_embedding && corpus.embedding.is_some(),
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let mut model = TopicModel::new(
            model_config,
            corpus.seeds.as_ref(),
            corpus.embedding.as_ref(),
            noise.clone(),
            vb,
        )?;
        model.initialize(&varmap, &noise, &corpus.word_freqs)?;
        model.post_init().map_err(|e| trial_local(e, 0))?;

        let mut optimizer =
            TrialOptimizer::new(config.optimizer, model.trainable_vars(&varmap)?, config.lr)?;

        let mut train_data = BowData::new(&corpus.train, corpus.n_covars)?.with_noise(noise.clone());
        let npmi = NpmiEvaluator::new(corpus.eval_bow());

        let mut annealer = SparsityAnnealer::new(
            opts.init_sparsity_pen,
            config.target_sparsity,
            opts.sparsity_threshold,
        );

        let pb = ProgressBar::new(budget as u64);
        if !opts.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut trace: Vec<Box<str>> = vec![TRACE_HEADER.into()];
        let mut train_loss = f64::NAN;

        for epoch in 0..budget {
            train_data.shuffle_minibatch(opts.batch_size)?;
            let penalty = Penalty {
                l1_coef: annealer.coef(),
            };

            let mut totals = EpochTotals::default();
            for b in 0..train_data.num_minibatch() {
                let mb = train_data.minibatch_data(b, &dev)?;
                let parts = model.forward_t(&mb.input, mb.covariates.as_ref(), &penalty, true)?;
                let loss = parts.elbo.mean_all()?;
                check_finite(scalar_sum(&loss)?, "training loss", epoch)?;
                optimizer.backward_step(&loss)?;
                totals.add(&parts)?;
            }

            train_loss = check_finite(totals.per_doc(totals.elbo), "training loss", epoch)?;
            info!(
                "[{}] loss = {:.4} [kl {:.4}] [l1 {:.4}] [rec {:.4}] [coherence {:.4}] [entropy {:.4}]",
                epoch,
                train_loss,
                totals.per_doc(totals.kl),
                totals.per_doc(totals.l1),
                totals.per_doc(totals.reconstruction),
                totals.per_doc(totals.coherence),
                totals.per_doc(totals.entropy),
            );

            if annealer.is_active() {
                let coef = annealer.update_from_weights(&model.topic_term_weights()?)?;
                info!("[{}] l1 coefficient = {}", epoch, coef);
            }

            if let Some(test) = corpus.test.as_ref() {
                if (epoch + 1) % opts.eval_freq == 0 {
                    let ppl = perplexity(&model, test, corpus.n_covars, opts.batch_size)?;
                    check_finite(ppl, "perplexity", epoch)?;
                    if let Some(trace_file) = opts.trace_file.as_deref() {
                        let score = coherence(&model, &npmi, opts.top_k)?;
                        trace.push(format!("{:3},{:10.2},{:8.4}", epoch, ppl, score).into());
                        write_lines(&trace, trace_file)?;
                    }
                }
            }

            pb.inc(1);
        }
        pb.finish_and_clear();

        let ppl = perplexity(&model, corpus.eval_bow(), corpus.n_covars, opts.batch_size)?;
        check_finite(ppl, "perplexity", budget)?;
        let score = check_finite(coherence(&model, &npmi, opts.top_k)?, "coherence", budget)?;
        info!("npmi = {:.4}, perplexity = {:.2}", score, ppl);

        Ok(TrainedTrial {
            model,
            varmap,
            config,
            result: TrialResult::from_scores(score, ppl, train_loss),
            epochs: budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_util::candle_vmf_sampler::VmfWeightSampler;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sampler_stall_becomes_numerical() -> anyhow::Result<()> {
        let stall = VmfWeightSampler::new(50.0, 4)?
            .with_max_rounds(0)
            .sample(8, &mut StdRng::seed_from_u64(0))
            .expect_err("no rounds allowed");
        let err = trial_local(stall, 0);
        let num = err.downcast_ref::<NumericalError>().expect("numerical");
        assert_eq!(num.epoch, 0);
        assert!(num.what.contains("still rejected"));

        let other = trial_local(anyhow::anyhow!("bad file"), 0);
        assert!(other.downcast_ref::<NumericalError>().is_none());
        Ok(())
    }
}
