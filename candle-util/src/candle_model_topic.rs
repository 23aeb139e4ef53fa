use crate::candle_decoder_topic::*;
use crate::candle_encoder_bow::*;
use crate::candle_latent_distribution::*;
use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;
use crate::candle_noise::NoiseSource;
use candle_core::{DType, Device, Result, Tensor, Var};
use candle_nn::{ops, VarBuilder, VarMap};
use std::sync::Arc;

/// added to a seed term's weight in its topic at initialization
pub const SEED_BOOST: f64 = 5.0;

pub const ENCODER_PREFIX: &str = "encoder";
pub const DECODER_PREFIX: &str = "decoder";

/// Shape and regularization of a topic model
#[derive(Clone, Debug)]
pub struct TopicModelConfig {
    pub n_features: usize,
    pub n_topics: usize,
    pub embedding_size: usize,
    pub hidden_dims: Vec<usize>,
    pub n_covars: usize,
    pub latent: LatentKind,
    pub coherence_penalty: f64,
    pub fixed_embedding: bool,
}

/// Seed terms, grouped by the topic they should anchor
#[derive(Clone, Debug, Default)]
pub struct SeedTopics {
    pub groups: Vec<(usize, Vec<usize>)>,
}

/// Regularization weights supplied with every forward pass
#[derive(Clone, Copy, Debug, Default)]
pub struct Penalty {
    pub l1_coef: f64,
}

/// Per-example terms of the negative ELBO (each of length n)
pub struct ElboParts {
    pub elbo: Tensor,
    pub reconstruction: Tensor,
    pub kl: Tensor,
    pub l1: Tensor,
    pub entropy: Option<Tensor>,
    pub coherence: Option<Tensor>,
}

///
/// Bag-of-words variational topic model: encoder -> latent
/// distribution -> linear decoder over word logits.
///
pub struct TopicModel {
    config: TopicModelConfig,
    encoder: BowEncoder,
    decoder: TopicDecoder,
    seed_groups: Vec<(usize, Tensor)>,
    word_vectors: Option<Tensor>,
    device: Device,
}

impl TopicModel {
    /// # Arguments
    /// * `config` - model shape
    /// * `seeds` - optional seed-topic constraint
    /// * `pretrained` - optional word vectors (n_features x embedding_size)
    /// * `noise` - the trial's random stream
    /// * `vb` - variable builder
    pub fn new(
        config: TopicModelConfig,
        seeds: Option<&SeedTopics>,
        pretrained: Option<&Tensor>,
        noise: Arc<NoiseSource>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let device = vb.device().clone();

        let encoder = BowEncoder::new(
            config.n_features,
            config.embedding_size,
            &config.hidden_dims,
            config.n_topics,
            &config.latent,
            noise,
            vb.pp(ENCODER_PREFIX),
        )?;

        let decoder = TopicDecoder::new(
            config.n_features,
            config.n_topics,
            config.n_covars,
            vb.pp(DECODER_PREFIX),
        )?;

        let mut seed_groups = vec![];
        if let Some(seeds) = seeds {
            for (topic, terms) in seeds.groups.iter() {
                if *topic >= config.n_topics {
                    candle_core::bail!("seed topic {} >= {} topics", topic, config.n_topics);
                }
                if terms.is_empty() {
                    continue;
                }
                if let Some(t) = terms.iter().find(|&&t| t >= config.n_features) {
                    candle_core::bail!("seed term {} outside the vocabulary", t);
                }
                let ids: Vec<u32> = terms.iter().map(|&t| t as u32).collect();
                seed_groups.push((*topic, Tensor::from_vec(ids, terms.len(), &device)?));
            }
        }

        let word_vectors = match pretrained {
            Some(emb) => {
                let (v, e) = emb.dims2()?;
                if v != config.n_features || e != config.embedding_size {
                    candle_core::bail!(
                        "pretrained embedding is {} x {}, expected {} x {}",
                        v,
                        e,
                        config.n_features,
                        config.embedding_size
                    );
                }
                let emb = emb.to_device(&device)?.to_dtype(DType::F32)?;
                Some(l2_normalize_dim(&emb, 1)?)
            }
            None => None,
        };

        Ok(Self {
            config,
            encoder,
            decoder,
            seed_groups,
            word_vectors,
            device,
        })
    }

    ///
    /// Draw all parameters from `noise`, then apply data-driven
    /// initialization: decoder bias from word frequencies, pretrained
    /// embedding, seed-term boost.
    ///
    /// * `varmap` - variables this model was built with
    /// * `noise` - random stream
    /// * `word_freqs` - term counts used for the decoder bias
    ///
    pub fn initialize(&self, varmap: &VarMap, noise: &NoiseSource, word_freqs: &[f32]) -> Result<()> {
        noise.reinit_varmap(varmap)?;

        let n_features = self.config.n_features;
        if word_freqs.len() != n_features {
            candle_core::bail!(
                "{} word frequencies for {} terms",
                word_freqs.len(),
                n_features
            );
        }

        // log of normalized (add-one) word frequencies
        let tot: f64 = word_freqs.iter().map(|&x| x as f64 + 1.0).sum();
        let log_freq: Vec<f32> = word_freqs
            .iter()
            .map(|&x| ((x as f64 + 1.0) / tot).ln() as f32)
            .collect();
        let bias = Tensor::from_vec(log_freq, n_features, &self.device)?;
        set_var(varmap, &format!("{}.dictionary.bias", DECODER_PREFIX), &bias)?;

        if let Some(emb_ve) = self.word_vectors.as_ref() {
            let name = format!("{}.{}.weight", ENCODER_PREFIX, EMBEDDING_PREFIX);
            set_var(varmap, &name, &emb_ve.t()?.contiguous()?)?;
        }

        if !self.seed_groups.is_empty() {
            let name = format!("{}.dictionary.weight", DECODER_PREFIX);
            let w = get_var(varmap, &name)?;
            let mut w_rows = w.as_tensor().to_device(&Device::Cpu)?.to_vec2::<f32>()?;
            for (topic, ids) in self.seed_groups.iter() {
                for t in ids.to_vec1::<u32>()? {
                    w_rows[t as usize][*topic] += SEED_BOOST as f32;
                }
            }
            let (nr, nc) = (w_rows.len(), w_rows[0].len());
            let flat: Vec<f32> = w_rows.into_iter().flatten().collect();
            w.set(&Tensor::from_vec(flat, (nr, nc), &self.device)?)?;
        }
        Ok(())
    }

    /// fills the vMF pool; a no-op for other families. A sampler that
    /// runs out of rounds fails with `VmfSamplerStalled`.
    pub fn post_init(&mut self) -> anyhow::Result<()> {
        self.encoder.post_init()
    }

    ///
    /// Variables the optimizer should update: everything except a
    /// frozen embedding layer
    ///
    pub fn trainable_vars(&self, varmap: &VarMap) -> Result<Vec<Var>> {
        let frozen = format!("{}.{}.", ENCODER_PREFIX, EMBEDDING_PREFIX);
        let data = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("varmap: {}", e)))?;
        let mut named: Vec<(&String, &Var)> = data
            .iter()
            .filter(|(name, _)| !(self.config.fixed_embedding && name.starts_with(&frozen)))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, v)| v.clone()).collect())
    }

    ///
    /// Evaluate the negative ELBO and its parts
    ///
    /// * `x_nd` - word counts (n x d)
    /// * `cov_nc` - one-hot covariates (n x c), if the model has them
    /// * `penalty` - L1 coefficient of this step
    /// * `train` - sample with noise or use the means
    ///
    pub fn forward_t(
        &self,
        x_nd: &Tensor,
        cov_nc: Option<&Tensor>,
        penalty: &Penalty,
        train: bool,
    ) -> Result<ElboParts> {
        let n = x_nd.dim(0)?;

        let (z_nk, kl) = self.encoder.forward_t(x_nd, train)?;
        let logits_nd = self.decoder.forward_with_covariates(&z_nk, cov_nc)?;
        let reconstruction = reconstruction_loss(x_nd, &logits_nd)?;

        let w_dk = self.decoder.get_dictionary()?;
        let l1 = (w_dk.abs()?.sum_all()? * penalty.l1_coef)?.broadcast_as(n)?;

        let mut elbo = ((&reconstruction + &kl)? + &l1)?;

        let entropy = if self.seed_groups.is_empty() {
            None
        } else {
            let ent = self.seed_entropy(&w_dk)?.broadcast_as(n)?;
            elbo = (elbo + &ent)?;
            Some(ent)
        };

        let coherence = if self.config.coherence_penalty > 0.0 {
            let coh = (self.coherence_loss(&w_dk)? * self.config.coherence_penalty)?
                .broadcast_as(n)?;
            elbo = (elbo + &coh)?;
            Some(coh)
        } else {
            None
        };

        Ok(ElboParts {
            elbo,
            reconstruction,
            kl,
            l1,
            entropy,
            coherence,
        })
    }

    ///
    /// Seed-topic constraint: entropy of each seed group's mean
    /// topic weights plus how far the group falls below the average
    /// word of its own topic
    ///
    fn seed_entropy(&self, w_dk: &Tensor) -> Result<Tensor> {
        let mut terms = vec![];
        for (topic, ids) in self.seed_groups.iter() {
            let seed_mean_k = w_dk.index_select(ids, 0)?.mean(0)?;
            terms.push(row_entropy(&seed_mean_k)?);

            let col_mean = w_dk.narrow(1, *topic, 1)?.mean_all()?;
            let seed_at = seed_mean_k.narrow(0, *topic, 1)?.squeeze(0)?;
            terms.push((col_mean - seed_at)?.relu()?);
        }
        Tensor::stack(&terms, 0)?.sum_all()
    }

    ///
    /// Σ_k (1 - ‖Eᵀ β_k‖²) with β_k the word distribution of topic k
    /// and E unit-norm word vectors
    ///
    fn coherence_loss(&self, w_dk: &Tensor) -> Result<Tensor> {
        let beta_dk = ops::softmax(w_dk, 0)?;
        let emb_de = match self.word_vectors.as_ref() {
            Some(emb) => emb.clone(),
            None => {
                let emb = self.encoder.embedding_weight().t()?.contiguous()?.detach();
                l2_normalize_dim(&emb, 1)?
            }
        };
        let proj_ek = emb_de.t()?.contiguous()?.matmul(&beta_dk)?;
        proj_ek.sqr()?.sum(0)?.affine(-1.0, 1.0)?.sum_all()
    }

    ///
    /// Batch-normalized mean encoding (no sampling)
    ///
    /// * `use_probs` - map onto the simplex with softmax(e / ‖e‖)
    ///
    pub fn encode(&self, x_nd: &Tensor, use_probs: bool) -> Result<Tensor> {
        let enc_nk = self.encoder.mu_encoding(x_nd, true)?;
        if use_probs {
            ops::softmax(&l2_normalize_dim(&enc_nk, 1)?, 1)
        } else {
            Ok(enc_nk)
        }
    }

    /// topic-term weights (n_features x n_topics)
    pub fn topic_term_weights(&self) -> Result<Tensor> {
        self.decoder.get_dictionary()
    }

    ///
    /// Indexes of the `k` largest-weight terms of each topic
    ///
    pub fn top_terms(&self, k: usize) -> Result<Vec<Vec<usize>>> {
        let w_kd = self
            .topic_term_weights()?
            .t()?
            .contiguous()?
            .to_device(&Device::Cpu)?
            .to_vec2::<f32>()?;

        Ok(w_kd
            .iter()
            .map(|w_d| {
                let mut order: Vec<usize> = (0..w_d.len()).collect();
                order.sort_by(|&a, &b| w_d[b].total_cmp(&w_d[a]));
                order.truncate(k);
                order
            })
            .collect())
    }

    pub fn config(&self) -> &TopicModelConfig {
        &self.config
    }

    pub fn encoder(&self) -> &BowEncoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &TopicDecoder {
        &self.decoder
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn get_var(varmap: &VarMap, name: &str) -> Result<Var> {
    let data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("varmap: {}", e)))?;
    match data.get(name) {
        Some(var) => Ok(var.clone()),
        None => candle_core::bail!("no variable named {}", name),
    }
}

fn set_var(varmap: &VarMap, name: &str, value: &Tensor) -> Result<()> {
    let var = get_var(varmap, name)?;
    var.set(&value.to_dtype(var.dtype())?)
}
