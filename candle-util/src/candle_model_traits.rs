use candle_core::{Result, Tensor};

pub trait LatentDistributionT {
    /// Reparameterized sample and its KL term
    ///
    /// # Arguments
    /// * `h_nh` - encoder hidden states (n x h)
    /// * `train` - sample with noise and dropout, or return the mean
    ///
    /// # Returns `(z_nk, kl_n)`
    /// * `z_nk` - latent sample (n x k)
    /// * `kl_n` - KL divergence per example (n)
    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    /// Mean projection of the hidden states
    /// * `include_bn` - pass the mean through its (frozen) batch norm
    fn mu_encoding(&self, h_nh: &Tensor, include_bn: bool) -> Result<Tensor>;

    fn dim_latent(&self) -> usize;

    /// Anything that must run once after construction and before
    /// the first `forward_t`
    fn post_init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub trait EncoderModuleT {
    /// An encoder that spits out two results (latent inference, KL loss)
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - whether to use dropout/batchnorm or not
    ///
    /// # Returns `(z_nk, kl_loss_n)`
    /// * `z_nk` - latent inference (n x k)
    /// * `kl_loss_n` - KL loss (n)
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out unnormalized log-rates (logits)
    fn forward(&self, z_nk: &Tensor) -> Result<Tensor>;

    /// Get a representative dictionary matrix (d x k)
    fn get_dictionary(&self) -> Result<Tensor>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
