use crate::candle_aux_layers::*;
use crate::candle_latent_distribution::*;
use crate::candle_model_traits::*;
use crate::candle_noise::NoiseSource;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use std::sync::Arc;

/// variable prefix of the word embedding layer
pub const EMBEDDING_PREFIX: &str = "embedding";

pub struct BowEncoder {
    n_features: usize,
    n_topics: usize,
    embedding: Linear,
    fc: StackLayers<Linear>,
    latent: LatentDistribution,
}

impl EncoderModuleT for BowEncoder {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let h_nh = self.hidden(x_nd)?;
        self.latent.forward_t(&h_nh, train)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_topics
    }
}

impl BowEncoder {
    /// word counts -> tanh(embedding)
    pub fn embed(&self, x_nd: &Tensor) -> Result<Tensor> {
        LayerAct::Tanh.forward(&self.embedding.forward(x_nd)?)
    }

    /// word counts -> softplus(fc(embedding))
    pub fn hidden(&self, x_nd: &Tensor) -> Result<Tensor> {
        self.fc.forward(&self.embed(x_nd)?)
    }

    /// batch-normalized mean encoding of the documents
    pub fn mu_encoding(&self, x_nd: &Tensor, include_bn: bool) -> Result<Tensor> {
        let h_nh = self.hidden(x_nd)?;
        self.latent.mu_encoding(&h_nh, include_bn)
    }

    /// embedding matrix (embedding_size x n_features)
    pub fn embedding_weight(&self) -> &Tensor {
        self.embedding.weight()
    }

    pub fn latent(&self) -> &LatentDistribution {
        &self.latent
    }

    pub fn post_init(&mut self) -> anyhow::Result<()> {
        self.latent.post_init()
    }

    /// Will create a bag-of-words encoder with these variables:
    ///
    /// * `embedding.weight`, `embedding.bias`
    /// * `fc.{}.weight` where {} is the layer index
    /// * `latent.*` parameters of the latent distribution
    ///
    /// # Arguments
    /// * `n_features` - vocabulary size
    /// * `embedding_size` - word embedding dim
    /// * `layers` - fully connected layers, each with the dim
    /// * `n_topics` - the number of topics (latent factors)
    /// * `kind` - latent distribution family
    /// * `noise` - random stream shared with the latent distribution
    /// * `vs` - variable builder
    pub fn new(
        n_features: usize,
        embedding_size: usize,
        layers: &[usize],
        n_topics: usize,
        kind: &LatentKind,
        noise: Arc<NoiseSource>,
        vs: VarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("encoder needs at least one hidden layer");
        }

        // (1) data -> embedding
        let embedding = candle_nn::linear(n_features, embedding_size, vs.pp(EMBEDDING_PREFIX))?;

        // (2) embedding -> fc
        let mut fc = StackLayers::<Linear>::new();
        let mut prev_dim = embedding_size;
        for (j, &next_dim) in layers.iter().enumerate() {
            let _name = format!("fc.{}", j);
            fc.push_with_act(
                candle_nn::linear(prev_dim, next_dim, vs.pp(_name))?,
                LayerAct::Softplus,
            );
            prev_dim = next_dim;
        }

        // (3) fc -> K
        let latent = LatentDistribution::new(kind, prev_dim, n_topics, noise, vs.pp("latent"))?;

        Ok(Self {
            n_features,
            n_topics,
            embedding,
            fc,
            latent,
        })
    }
}
