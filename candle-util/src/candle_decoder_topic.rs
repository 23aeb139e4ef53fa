use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

/////////////////////////
// Topic Model Decoder //
/////////////////////////

///
/// Linear map from topic proportions (plus optional one-hot
/// covariates) to word logits. The first `n_topics` columns of the
/// weight matrix are the topic-term dictionary.
///
pub struct TopicDecoder {
    n_features: usize,
    n_topics: usize,
    n_covars: usize,
    dictionary: Linear,
}

impl TopicDecoder {
    /// Will create a new topic model decoder with the following parameters:
    /// * `dictionary.weight` (n_features x (n_topics + n_covars))
    /// * `dictionary.bias` (n_features)
    pub fn new(n_features: usize, n_topics: usize, n_covars: usize, vs: VarBuilder) -> Result<Self> {
        let dictionary = candle_nn::linear(n_topics + n_covars, n_features, vs.pp("dictionary"))?;

        Ok(Self {
            n_features,
            n_topics,
            n_covars,
            dictionary,
        })
    }

    pub fn n_covars(&self) -> usize {
        self.n_covars
    }

    /// Word logits given topic proportions and covariates
    /// * `z_nk` - latent states (n x k)
    /// * `cov_nc` - one-hot covariates (n x c), required iff `n_covars > 0`
    pub fn forward_with_covariates(&self, z_nk: &Tensor, cov_nc: Option<&Tensor>) -> Result<Tensor> {
        match (cov_nc, self.n_covars) {
            (None, 0) => self.dictionary.forward(z_nk),
            (Some(cov_nc), c) if c > 0 => {
                let zc = Tensor::cat(&[z_nk, &cov_nc.to_dtype(z_nk.dtype())?], 1)?;
                self.dictionary.forward(&zc)
            }
            (None, c) => candle_core::bail!("decoder expects {} covariates", c),
            (Some(_), _) => candle_core::bail!("decoder was built without covariates"),
        }
    }
}

impl DecoderModuleT for TopicDecoder {
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor> {
        self.forward_with_covariates(z_nk, None)
    }

    /// topic-term weights (n_features x n_topics)
    fn get_dictionary(&self) -> Result<Tensor> {
        self.dictionary.weight().narrow(1, 0, self.n_topics)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_topics
    }
}
