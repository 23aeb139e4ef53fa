//! Variational latent distributions of the topic encoder.
//!
//! Each variant maps encoder hidden states `h` to a reparameterized
//! latent sample and a per-example KL term:
//!
//! | variant | sample | KL |
//! |---|---|---|
//! | Gaussian | μ + exp(lv/2) ε | -½ Σ(1 + lv - μ² - exp lv) |
//! | GaussianUnitVar | μ + sqrt(v) ε | -½ Σ(1 + log v - μ² - v) |
//! | LogisticGaussian | softmax(μ + exp(lv/2) ε) | Laplace approx. of Dirichlet(α) |
//! | Vmf | softmax(w μ̂ + sqrt(1 - w²) v) | constant in (κ, K) |
//!
//! The mean projection is always batch-normalized (no affine
//! parameters). With `train = false` every variant returns its mean.

use crate::candle_loss_functions::*;
use crate::candle_model_traits::LatentDistributionT;
use crate::candle_noise::NoiseSource;
use crate::candle_vmf_sampler::*;
use candle_core::{Result, Tensor};
use candle_nn::{ops, BatchNorm, Linear, Module, ModuleT, VarBuilder};
use std::sync::Arc;

const MIN_LNVAR: f64 = -8.;
const MAX_LNVAR: f64 = 8.;

/// Which family to build, with its fixed hyperparameters
#[derive(Clone, Debug, PartialEq)]
pub enum LatentKind {
    Gaussian {
        dropout: f64,
    },
    GaussianUnitVar {
        var: f64,
        dropout: f64,
    },
    LogisticGaussian {
        alpha: f64,
        dropout: f64,
    },
    Vmf {
        kappa: f64,
        pool_size: usize,
        max_rounds: usize,
        proposal: VmfProposal,
    },
}

impl LatentKind {
    pub fn gaussian() -> Self {
        LatentKind::Gaussian { dropout: 0.2 }
    }

    pub fn gaussian_unit_var() -> Self {
        LatentKind::GaussianUnitVar {
            var: 1.0,
            dropout: 0.2,
        }
    }

    pub fn logistic_gaussian(alpha: f64) -> Self {
        LatentKind::LogisticGaussian {
            alpha,
            dropout: 0.1,
        }
    }

    pub fn vmf(kappa: f64) -> Self {
        LatentKind::Vmf {
            kappa,
            pool_size: DEFAULT_POOL_SIZE,
            max_rounds: DEFAULT_MAX_ROUNDS,
            proposal: VmfProposal::NormalApprox,
        }
    }

    /// override the dropout rate where the family has one
    pub fn with_dropout(self, rate: f64) -> Self {
        match self {
            LatentKind::Gaussian { .. } => LatentKind::Gaussian { dropout: rate },
            LatentKind::GaussianUnitVar { var, .. } => {
                LatentKind::GaussianUnitVar { var, dropout: rate }
            }
            LatentKind::LogisticGaussian { alpha, .. } => LatentKind::LogisticGaussian {
                alpha,
                dropout: rate,
            },
            vmf => vmf,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LatentKind::Gaussian { .. } => "gaussian",
            LatentKind::GaussianUnitVar { .. } => "gaussian_unitvar",
            LatentKind::LogisticGaussian { .. } => "logistic_gaussian",
            LatentKind::Vmf { .. } => "vmf",
        }
    }
}

fn bn_config() -> candle_nn::BatchNormConfig {
    candle_nn::BatchNormConfig {
        eps: 1e-4,
        remove_mean: true,
        affine: false,
        momentum: 0.1,
    }
}

/// L2 normalize a tensor along the specified dimension.
pub fn l2_normalize_dim(x: &Tensor, dim: usize) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(dim)?.sqrt()?;
    let norm_safe = (norm + 1e-8)?;
    x.broadcast_div(&norm_safe)
}

/// linear projection followed by a batch norm
struct NormedLinear {
    linear: Linear,
    bn: BatchNorm,
}

impl NormedLinear {
    fn new(n_input: usize, n_output: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            linear: candle_nn::linear(n_input, n_output, vb.clone())?,
            bn: candle_nn::batch_norm(n_output, bn_config(), vb.pp("bn"))?,
        })
    }

    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<Tensor> {
        self.bn.forward_t(&self.linear.forward(h_nh)?, train)
    }

    fn forward_without_bn(&self, h_nh: &Tensor) -> Result<Tensor> {
        self.linear.forward(h_nh)
    }
}

fn reparameterize(
    z_mean: &Tensor,
    z_lnvar: &Tensor,
    noise: &NoiseSource,
) -> Result<Tensor> {
    let (n, k) = z_mean.dims2()?;
    let eps = noise.randn(n, k, z_mean.device())?;
    z_mean + (z_lnvar * 0.5)?.exp()?.mul(&eps)?
}

//////////////////////////////
// Diagonal Gaussian latent //
//////////////////////////////

pub struct GaussianLatent {
    n_latent: usize,
    dropout: f64,
    mu: NormedLinear,
    lnvar: NormedLinear,
    noise: Arc<NoiseSource>,
}

impl GaussianLatent {
    /// variables: `mu.{weight,bias}`, `mu.bn.*`, `lnvar.{weight,bias}`, `lnvar.bn.*`
    pub fn new(
        n_input: usize,
        n_latent: usize,
        dropout: f64,
        noise: Arc<NoiseSource>,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            n_latent,
            dropout,
            mu: NormedLinear::new(n_input, n_latent, vb.pp("mu"))?,
            lnvar: NormedLinear::new(n_input, n_latent, vb.pp("lnvar"))?,
            noise,
        })
    }
}

impl LatentDistributionT for GaussianLatent {
    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let z_mean = self.mu.forward_t(h_nh, train)?;
        let z_lnvar = self
            .lnvar
            .forward_t(h_nh, train)?
            .clamp(MIN_LNVAR, MAX_LNVAR)?;
        let kl = gaussian_kl_loss(&z_mean, &z_lnvar)?;

        if train {
            let z = reparameterize(&z_mean, &z_lnvar, &self.noise)?;
            Ok((self.noise.dropout(&z, self.dropout)?, kl))
        } else {
            Ok((z_mean, kl))
        }
    }

    fn mu_encoding(&self, h_nh: &Tensor, include_bn: bool) -> Result<Tensor> {
        if include_bn {
            self.mu.forward_t(h_nh, false)
        } else {
            self.mu.forward_without_bn(h_nh)
        }
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

///////////////////////////////////
// Fixed-variance Gaussian latent //
///////////////////////////////////

pub struct GaussianUnitVarLatent {
    n_latent: usize,
    var: f64,
    dropout: f64,
    mu: NormedLinear,
    noise: Arc<NoiseSource>,
}

impl GaussianUnitVarLatent {
    pub fn new(
        n_input: usize,
        n_latent: usize,
        var: f64,
        dropout: f64,
        noise: Arc<NoiseSource>,
        vb: VarBuilder,
    ) -> Result<Self> {
        if !(var > 0.0) {
            candle_core::bail!("latent variance must be positive, got {}", var);
        }
        Ok(Self {
            n_latent,
            var,
            dropout,
            mu: NormedLinear::new(n_input, n_latent, vb.pp("mu"))?,
            noise,
        })
    }
}

impl LatentDistributionT for GaussianUnitVarLatent {
    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let z_mean = self.mu.forward_t(h_nh, train)?;
        let kl = fixed_var_gaussian_kl_loss(&z_mean, self.var)?;

        if train {
            let (n, k) = z_mean.dims2()?;
            let eps = self.noise.randn(n, k, z_mean.device())?;
            let z = (&z_mean + (eps * self.var.sqrt())?)?;
            Ok((self.noise.dropout(&z, self.dropout)?, kl))
        } else {
            Ok((z_mean, kl))
        }
    }

    fn mu_encoding(&self, h_nh: &Tensor, include_bn: bool) -> Result<Tensor> {
        if include_bn {
            self.mu.forward_t(h_nh, false)
        } else {
            self.mu.forward_without_bn(h_nh)
        }
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

/////////////////////////////
// Logistic Gaussian latent //
/////////////////////////////

pub struct LogisticGaussianLatent {
    n_latent: usize,
    prior_var: f64,
    dropout: f64,
    mu: NormedLinear,
    lnvar: NormedLinear,
    noise: Arc<NoiseSource>,
}

impl LogisticGaussianLatent {
    ///
    /// Laplace approximation of a symmetric Dirichlet(α) prior in
    /// the softmax basis: prior variance 1/α - 2/K + 1/K²
    ///
    pub fn prior_variance(alpha: f64, n_latent: usize) -> Result<f64> {
        let kk = n_latent as f64;
        let prior_var = 1.0 / alpha - 2.0 / kk + 1.0 / (kk * kk);
        if !(prior_var > 0.0 && prior_var.is_finite()) {
            candle_core::bail!(
                "alpha = {} with {} topics gives a non-positive prior variance {}",
                alpha,
                n_latent,
                prior_var
            );
        }
        Ok(prior_var)
    }

    pub fn new(
        n_input: usize,
        n_latent: usize,
        alpha: f64,
        dropout: f64,
        noise: Arc<NoiseSource>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let prior_var = Self::prior_variance(alpha, n_latent)?;
        Ok(Self {
            n_latent,
            prior_var,
            dropout,
            mu: NormedLinear::new(n_input, n_latent, vb.pp("mu"))?,
            lnvar: NormedLinear::new(n_input, n_latent, vb.pp("lnvar"))?,
            noise,
        })
    }
}

impl LatentDistributionT for LogisticGaussianLatent {
    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let z_mean = self.mu.forward_t(h_nh, train)?;
        let z_lnvar = self
            .lnvar
            .forward_t(h_nh, train)?
            .clamp(MIN_LNVAR, MAX_LNVAR)?;
        let kl = logistic_gaussian_kl_loss(&z_mean, &z_lnvar, self.prior_var)?;

        let z = if train {
            let z = reparameterize(&z_mean, &z_lnvar, &self.noise)?;
            self.noise.dropout(&z, self.dropout)?
        } else {
            z_mean
        };
        Ok((ops::softmax(&z, 1)?, kl))
    }

    fn mu_encoding(&self, h_nh: &Tensor, include_bn: bool) -> Result<Tensor> {
        if include_bn {
            self.mu.forward_t(h_nh, false)
        } else {
            self.mu.forward_without_bn(h_nh)
        }
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

//////////////////////////////
// Hyperspherical vMF latent //
//////////////////////////////

pub struct VmfLatent {
    n_latent: usize,
    kappa: f64,
    kl_value: f64,
    pool_size: usize,
    sampler: VmfWeightSampler,
    pool: Option<Vec<f32>>,
    mu: NormedLinear,
    noise: Arc<NoiseSource>,
}

impl VmfLatent {
    pub fn new(
        n_input: usize,
        n_latent: usize,
        kappa: f64,
        pool_size: usize,
        max_rounds: usize,
        proposal: VmfProposal,
        noise: Arc<NoiseSource>,
        vb: VarBuilder,
    ) -> Result<Self> {
        if pool_size == 0 {
            candle_core::bail!("vMF sample pool must not be empty");
        }
        let sampler = VmfWeightSampler::new(kappa, n_latent)?
            .with_proposal(proposal)
            .with_max_rounds(max_rounds);
        Ok(Self {
            n_latent,
            kappa,
            kl_value: vmf_kl_divergence(kappa, n_latent),
            pool_size,
            sampler,
            pool: None,
            mu: NormedLinear::new(n_input, n_latent, vb.pp("mu"))?,
            noise,
        })
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn kl_value(&self) -> f64 {
        self.kl_value
    }

    pub fn pool(&self) -> Option<&[f32]> {
        self.pool.as_deref()
    }

    fn sample_direction(&self, mu_hat: &Tensor, pool: &[f32]) -> Result<Tensor> {
        let (n, k) = mu_hat.dims2()?;
        let device = mu_hat.device();

        let idx = self.noise.random_indices(n, pool.len())?;
        let w: Vec<f32> = idx.iter().map(|&i| pool[i]).collect();
        let w_n1 = Tensor::from_vec(w, (n, 1), device)?;
        let sqrt_n1 = w_n1.sqr()?.affine(-1.0, 1.0)?.clamp(0.0, 1.0)?.sqrt()?;

        // random direction orthogonal to mu_hat
        let eps = self.noise.randn(n, k, device)?;
        let proj = (&eps * mu_hat)?.sum_keepdim(1)?;
        let v = (eps - mu_hat.broadcast_mul(&proj)?)?;
        let v = l2_normalize_dim(&v, 1)?;

        v.broadcast_mul(&sqrt_n1)? + mu_hat.broadcast_mul(&w_n1)?
    }
}

impl LatentDistributionT for VmfLatent {
    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let Some(pool) = self.pool.as_ref() else {
            candle_core::bail!("vMF latent distribution used before post_init");
        };

        let z_mean = self.mu.forward_t(h_nh, train)?;
        let mu_hat = l2_normalize_dim(&z_mean, 1)?;
        let n = mu_hat.dim(0)?;
        let kl = Tensor::full(self.kl_value as f32, n, mu_hat.device())?;

        let z = if train {
            self.sample_direction(&mu_hat, pool)?
        } else {
            mu_hat
        };
        Ok((ops::softmax(&z, 1)?, kl))
    }

    fn mu_encoding(&self, h_nh: &Tensor, include_bn: bool) -> Result<Tensor> {
        if include_bn {
            self.mu.forward_t(h_nh, false)
        } else {
            self.mu.forward_without_bn(h_nh)
        }
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }

    /// fill the weight pool once; never resized afterwards
    fn post_init(&mut self) -> anyhow::Result<()> {
        if self.pool.is_none() {
            let ww = self
                .noise
                .with_rng(|rng| self.sampler.sample(self.pool_size, rng))??;
            self.pool = Some(ww.into_iter().map(|w| w as f32).collect());
        }
        Ok(())
    }
}

/////////////////////
// Tagged variants //
/////////////////////

pub enum LatentDistribution {
    Gaussian(GaussianLatent),
    GaussianUnitVar(GaussianUnitVarLatent),
    LogisticGaussian(LogisticGaussianLatent),
    Vmf(VmfLatent),
}

impl LatentDistribution {
    /// * `kind` - family and its fixed hyperparameters
    /// * `n_input` - encoder hidden dimension
    /// * `n_latent` - number of topics
    /// * `noise` - the trial's random stream
    /// * `vb` - variable builder
    pub fn new(
        kind: &LatentKind,
        n_input: usize,
        n_latent: usize,
        noise: Arc<NoiseSource>,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(match *kind {
            LatentKind::Gaussian { dropout } => {
                Self::Gaussian(GaussianLatent::new(n_input, n_latent, dropout, noise, vb)?)
            }
            LatentKind::GaussianUnitVar { var, dropout } => Self::GaussianUnitVar(
                GaussianUnitVarLatent::new(n_input, n_latent, var, dropout, noise, vb)?,
            ),
            LatentKind::LogisticGaussian { alpha, dropout } => Self::LogisticGaussian(
                LogisticGaussianLatent::new(n_input, n_latent, alpha, dropout, noise, vb)?,
            ),
            LatentKind::Vmf {
                kappa,
                pool_size,
                max_rounds,
                proposal,
            } => Self::Vmf(VmfLatent::new(
                n_input, n_latent, kappa, pool_size, max_rounds, proposal, noise, vb,
            )?),
        })
    }

    fn inner(&self) -> &dyn LatentDistributionT {
        match self {
            Self::Gaussian(x) => x,
            Self::GaussianUnitVar(x) => x,
            Self::LogisticGaussian(x) => x,
            Self::Vmf(x) => x,
        }
    }
}

impl LatentDistributionT for LatentDistribution {
    fn forward_t(&self, h_nh: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        self.inner().forward_t(h_nh, train)
    }

    fn mu_encoding(&self, h_nh: &Tensor, include_bn: bool) -> Result<Tensor> {
        self.inner().mu_encoding(h_nh, include_bn)
    }

    fn dim_latent(&self) -> usize {
        self.inner().dim_latent()
    }

    fn post_init(&mut self) -> anyhow::Result<()> {
        match self {
            Self::Vmf(x) => x.post_init(),
            _ => Ok(()),
        }
    }
}
