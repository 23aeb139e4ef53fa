use candle_core::{Result, Tensor};
use candle_nn::ops;

/// KL divergence loss between two Gaussian distributions
///
/// -0.5 * (1 + log(sigma^2) - mu^2 - sigma^2)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// KL divergence of a Gaussian with fixed variance from N(0, 1)
///
/// -0.5 * (1 + log(var) - mu^2 - var)
///
/// * `z_mean` - mean of Gaussian distribution
/// * `var` - fixed variance
///
pub fn fixed_var_gaussian_kl_loss(z_mean: &Tensor, var: f64) -> Result<Tensor> {
    ((z_mean.sqr()? + (var - 1. - var.ln()))?.sum(z_mean.rank() - 1)? * 0.5)
}

/// KL divergence from the Laplace approximation of a symmetric
/// Dirichlet prior, N(0, prior_var I), in logistic-normal space
///
/// 0.5 * ( sum( var/prior_var + mu^2/prior_var + log(prior_var) - lnvar ) - K )
///
/// * `z_mean` - mean (n x k)
/// * `z_lnvar` - log variance (n x k)
/// * `prior_var` - prior variance
///
pub fn logistic_gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor, prior_var: f64) -> Result<Tensor> {
    let kk = z_mean.dim(z_mean.rank() - 1)? as f64;
    let term = ((z_lnvar.exp()? + z_mean.sqr()?)? / prior_var)?;
    let term = ((term + prior_var.ln())? - z_lnvar)?;
    (term.sum(z_mean.rank() - 1)? - kk)? * 0.5
}

/// Topic model log-likelihood of multinomial data
///
/// llik(i) = sum_w x(i,w) * log pr(i,w)
///
/// * `x_nd` - data tensor (observed data)
/// * `log_recon_nd` - log-probability tensor (reconstruction)
///
pub fn topic_likelihood(x_nd: &Tensor, log_recon_nd: &Tensor) -> Result<Tensor> {
    x_nd.clamp(0.0, f64::INFINITY)?
        .mul(log_recon_nd)?
        .sum(x_nd.rank() - 1)
}

/// Negative multinomial log-likelihood from unnormalized logits;
/// rows without words give zero
///
/// rec(i) = - sum_w x(i,w) * log softmax(logits(i,.))_w
///
pub fn reconstruction_loss(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    let log_recon_nd = ops::log_softmax(logits_nd, logits_nd.rank() - 1)?;
    topic_likelihood(x_nd, &log_recon_nd)?.neg()
}

/// Entropy of each row of a probability matrix
///
/// H(i) = - sum_k p(i,k) log p(i,k)
///
pub fn row_entropy(logits_gk: &Tensor) -> Result<Tensor> {
    let dim = logits_gk.rank() - 1;
    let log_p = ops::log_softmax(logits_gk, dim)?;
    (log_p.exp()? * &log_p)?.sum(dim)?.neg()
}

/// Softplus: log(1 + exp(x)) = max(x, 0) + log(1 + exp(-|x|))
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.relu()? + tail
}
