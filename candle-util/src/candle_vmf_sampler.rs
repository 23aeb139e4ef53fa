//! Von Mises-Fisher auxiliary weights on the unit hypersphere.
//!
//! A sample from vMF(μ, κ) in `m` dimensions decomposes as
//! ```text
//! z = w μ + sqrt(1 - w²) v,    v ⟂ μ uniform on the sphere
//! ```
//! where only the scalar `w` depends on κ. `w` is drawn with Wood's
//! (1994) acceptance-rejection scheme. Because the distribution of
//! `w` is fixed for a given (κ, m), a large pool of accepted weights
//! is built once and reused.
//!
//! # References
//! - Wood (1994) "Simulation of the von Mises Fisher distribution"
//! - Xu & Durrett (2018) "Spherical Latent Spaces for Stable Variational Autoencoders"

use candle_core::Result;
use rand::Rng;
use std::fmt;
use rand_distr::{Beta, Distribution, Normal};
use special::Gamma;

pub const DEFAULT_POOL_SIZE: usize = 100_000;
pub const DEFAULT_MAX_ROUNDS: usize = 1000;

/// Largest concentration the sampler and the Bessel series accept
pub const MAX_KAPPA: f64 = 1e5;

/// The rejection loop ran out of rounds with weights still pending
#[derive(Clone, Debug, PartialEq)]
pub struct VmfSamplerStalled {
    pub pending: usize,
    pub rounds: usize,
    pub kappa: f64,
    pub dim: usize,
}

impl fmt::Display for VmfSamplerStalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "vMF sampler: {} weights still rejected after {} rounds (kappa={}, dim={})",
            self.pending, self.rounds, self.kappa, self.dim
        )
    }
}

impl std::error::Error for VmfSamplerStalled {}

/// How to draw the proposal `z` in Wood's scheme
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmfProposal {
    /// Normal with the mean and variance of Beta(d/2, d/2)
    NormalApprox,
    /// exact Beta(d/2, d/2)
    ExactBeta,
}

#[inline]
fn ln_gamma(x: f64) -> f64 {
    Gamma::ln_gamma(x).0
}

/// Log-sum-exp over a slice
fn log_sum_exp(log_terms: &[f64]) -> f64 {
    let max = log_terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + log_terms.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

/// Compute log I_p(x) - logarithm of modified Bessel function of first kind.
///
/// log I_p(x) = p * log(x/2) + log(Σ_j f(x,j))
/// where log f(x,j) = 2j * log(x/2) - lgamma(j+1) - lgamma(p+j+1)
///
/// The terms peak at j* = (sqrt(p² + x²) - p) / 2 with a spread of
/// order sqrt(j*), so the sum runs well past the peak.
pub fn log_bessel_i(p: f64, x: f64) -> f64 {
    if x < 1e-10 {
        return if p == 0.0 { 0.0 } else { f64::NEG_INFINITY };
    }

    let log_x_half = (x * 0.5).ln();
    let peak = ((p * p + x * x).sqrt() - p) * 0.5;
    let n_terms = (peak + 12.0 * (peak + 1.0).sqrt() + 50.0).ceil() as usize;

    let log_terms: Vec<f64> = (0..n_terms)
        .map(|j| {
            let jf = j as f64;
            2.0 * jf * log_x_half - ln_gamma(jf + 1.0) - ln_gamma(p + jf + 1.0)
        })
        .collect();

    log_sum_exp(&log_terms) + p * log_x_half
}

///
/// KL divergence between vMF(·, κ) on the `dim`-dimensional sphere
/// and the uniform distribution, with d = `dim`:
///
/// ```text
/// κ I_{d/2+1}(κ) / I_{d/2}(κ) + (d/2) log κ - log I_{d/2}(κ)
///   - lnΓ(d/2 + 1) - (d/2) log 2
/// ```
///
/// Depends on (κ, dim) only.
pub fn vmf_kl_divergence(kappa: f64, dim: usize) -> f64 {
    let h = dim as f64 / 2.0;
    let log_i_h = log_bessel_i(h, kappa);
    let log_i_h1 = log_bessel_i(h + 1.0, kappa);

    kappa * (log_i_h1 - log_i_h).exp() + h * kappa.ln()
        - log_i_h
        - ln_gamma(h + 1.0)
        - h * std::f64::consts::LN_2
}

/// Mean of `w` under vMF(κ) on the `dim`-dimensional sphere,
/// A(κ) = I_{m/2}(κ) / I_{m/2-1}(κ)
pub fn vmf_mean_weight(kappa: f64, dim: usize) -> f64 {
    let h = dim as f64 / 2.0;
    (log_bessel_i(h, kappa) - log_bessel_i(h - 1.0, kappa)).exp()
}

/// Variance of `w`: 1 - A² - (m - 1) A / κ
pub fn vmf_weight_variance(kappa: f64, dim: usize) -> f64 {
    let a = vmf_mean_weight(kappa, dim);
    1.0 - a * a - (dim as f64 - 1.0) * a / kappa
}

///
/// Wood's rejection sampler for the vMF weight `w`.
///
pub struct VmfWeightSampler {
    kappa: f64,
    dim: usize,
    proposal: VmfProposal,
    max_rounds: usize,
}

impl VmfWeightSampler {
    /// * `kappa` - concentration in (0, `MAX_KAPPA`]
    /// * `dim` - dimension of the sphere's ambient space (≥ 2)
    pub fn new(kappa: f64, dim: usize) -> Result<Self> {
        if !(kappa > 0.0 && kappa <= MAX_KAPPA) {
            candle_core::bail!(
                "vMF concentration must be in (0, {}], got {}",
                MAX_KAPPA,
                kappa
            );
        }
        if dim < 2 {
            candle_core::bail!("vMF needs at least 2 latent dimensions, got {}", dim);
        }
        Ok(Self {
            kappa,
            dim,
            proposal: VmfProposal::NormalApprox,
            max_rounds: DEFAULT_MAX_ROUNDS,
        })
    }

    pub fn with_proposal(mut self, proposal: VmfProposal) -> Self {
        self.proposal = proposal;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// (b, x, c) constants of Wood's scheme with d = dim - 1
    fn constants(&self) -> (f64, f64, f64, f64) {
        let kappa = self.kappa;
        let d = (self.dim - 1) as f64;
        let b = d / ((4.0 * kappa * kappa + d * d).sqrt() + 2.0 * kappa);
        let x = (1.0 - b) / (1.0 + b);
        let c = kappa * x + d * (1.0 - x * x).ln();
        (d, b, x, c)
    }

    ///
    /// Draw `n` accepted weights. Each round redraws only the slots
    /// that are still unresolved. Running out of rounds fails with
    /// `VmfSamplerStalled`.
    ///
    pub fn sample<R: Rng>(&self, n: usize, rng: &mut R) -> anyhow::Result<Vec<f64>> {
        let (d, b, x, c) = self.constants();
        let kappa = self.kappa;

        let a = d / 2.0;
        let normal = Normal::new(0.5, (1.0 / (4.0 * (2.0 * a + 1.0))).sqrt())
            .map_err(|e| anyhow::anyhow!("normal proposal: {}", e))?;
        let beta = Beta::new(a, a).map_err(|e| anyhow::anyhow!("beta proposal: {}", e))?;

        let eps = 1e-6;
        let mut out = vec![0_f64; n];
        let mut pending: Vec<usize> = (0..n).collect();
        let mut rounds = 0;

        while !pending.is_empty() {
            if rounds >= self.max_rounds {
                return Err(VmfSamplerStalled {
                    pending: pending.len(),
                    rounds,
                    kappa,
                    dim: self.dim,
                }
                .into());
            }
            rounds += 1;

            let mut rejected = Vec::with_capacity(pending.len());
            for &i in pending.iter() {
                let z: f64 = match self.proposal {
                    VmfProposal::NormalApprox => normal.sample(rng),
                    VmfProposal::ExactBeta => beta.sample(rng),
                };
                let z = z.clamp(eps, 1.0 - eps);
                let w = (1.0 - (1.0 + b) * z) / (1.0 - (1.0 - b) * z);
                let u: f64 = rng.random();
                if kappa * w + d * (1.0 - x * w).ln() - c >= u.ln() {
                    out[i] = w;
                } else {
                    rejected.push(i);
                }
            }
            pending = rejected;
        }
        Ok(out)
    }

    /// acceptance test of a given weight and uniform draw
    pub fn accepts(&self, w: f64, u: f64) -> bool {
        let (d, _, x, c) = self.constants();
        self.kappa * w + d * (1.0 - x * w).ln() - c >= u.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn moments(xx: &[f64]) -> (f64, f64) {
        let n = xx.len() as f64;
        let mean = xx.iter().sum::<f64>() / n;
        let var = xx.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn test_log_bessel_small_order() {
        // I_{1/2}(x) = sqrt(2 / (pi x)) sinh(x)
        for &x in &[0.5_f64, 1.0, 10.0, 100.0] {
            let expected = (2.0 / (std::f64::consts::PI * x)).sqrt().ln() + x.sinh().ln();
            let got = log_bessel_i(0.5, x);
            approx::assert_relative_eq!(got, expected, max_relative = 1e-8);
        }
    }

    #[test]
    fn test_kl_pure_and_nonnegative() {
        for &k in &[1.0, 10.0, 50.0, 100.0] {
            for &dim in &[2, 5, 20, 50] {
                let kl = vmf_kl_divergence(k, dim);
                assert!(kl.is_finite() && kl >= 0.0, "kappa={} dim={} kl={}", k, dim, kl);
                assert_eq!(kl, vmf_kl_divergence(k, dim));
            }
        }
        assert!(vmf_kl_divergence(100.0, 20) > vmf_kl_divergence(10.0, 20));
    }

    #[test]
    fn test_exact_beta_moments() -> anyhow::Result<()> {
        let dim = 20;
        let mut rng = StdRng::seed_from_u64(7);
        for &kappa in &[1.0, 10.0, 100.0] {
            let sampler =
                VmfWeightSampler::new(kappa, dim)?.with_proposal(VmfProposal::ExactBeta);
            let ww = sampler.sample(100_000, &mut rng)?;
            assert!(ww.iter().all(|&w| (-1.0..=1.0).contains(&w)));

            let (mean, var) = moments(&ww);
            let mean_true = vmf_mean_weight(kappa, dim);
            let var_true = vmf_weight_variance(kappa, dim);
            println!(
                "kappa={}: mean {:.4} vs {:.4}, var {:.5} vs {:.5}",
                kappa, mean, mean_true, var, var_true
            );
            assert!((mean - mean_true).abs() < 0.1 * mean_true.abs().max(0.05));
            assert!((var - var_true).abs() < 0.1 * var_true);
        }
        Ok(())
    }

    #[test]
    fn test_normal_approx_pool() -> anyhow::Result<()> {
        let dim = 20;
        let mut rng = StdRng::seed_from_u64(11);
        for &kappa in &[1.0, 10.0, 100.0] {
            let sampler = VmfWeightSampler::new(kappa, dim)?;
            let ww = sampler.sample(DEFAULT_POOL_SIZE, &mut rng)?;
            assert_eq!(ww.len(), DEFAULT_POOL_SIZE);

            let (mean, _) = moments(&ww);
            let mean_true = vmf_mean_weight(kappa, dim);
            println!("kappa={}: mean {:.4} vs {:.4}", kappa, mean, mean_true);
            assert!((mean - mean_true).abs() < 0.03);
        }
        Ok(())
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(VmfWeightSampler::new(0.0, 10).is_err());
        assert!(VmfWeightSampler::new(10.0, 1).is_err());
        assert!(VmfWeightSampler::new(MAX_KAPPA * 2.0, 10).is_err());
        assert!(VmfWeightSampler::new(f64::INFINITY, 10).is_err());
        assert!(VmfWeightSampler::new(f64::NAN, 10).is_err());
    }

    #[test]
    fn test_log_bessel_large_argument() {
        // large-argument expansion of I_p(x), two correction terms
        for &x in &[5_000.0_f64, 20_000.0, MAX_KAPPA] {
            for &p in &[0.5_f64, 4.0, 5.0] {
                let mu = 4.0 * p * p;
                let expected = x - 0.5 * (2.0 * std::f64::consts::PI * x).ln()
                    + (1.0 - (mu - 1.0) / (8.0 * x)
                        + (mu - 1.0) * (mu - 9.0) / (2.0 * (8.0 * x).powi(2)))
                    .ln();
                let got = log_bessel_i(p, x);
                approx::assert_relative_eq!(got, expected, max_relative = 1e-9);
            }
        }
    }

    #[test]
    fn test_moments_and_kl_at_large_kappa() {
        let dim = 10;
        let mut prev_kl = vmf_kl_divergence(3000.0, dim);
        for &kappa in &[5000.0, 20_000.0, MAX_KAPPA] {
            let a = vmf_mean_weight(kappa, dim);
            // A(κ) ≈ 1 - (m - 1) / (2κ)
            let a_asym = 1.0 - (dim as f64 - 1.0) / (2.0 * kappa);
            assert!(a < 1.0, "kappa={} mean weight {}", kappa, a);
            approx::assert_abs_diff_eq!(a, a_asym, epsilon = 1e-6);

            let kl = vmf_kl_divergence(kappa, dim);
            assert!(kl.is_finite() && kl > prev_kl, "kappa={} kl={}", kappa, kl);
            // grows like (m/2 - 1/2) log κ, far below κ itself
            assert!(kl < 10.0 * kappa.ln() * dim as f64);
            prev_kl = kl;
        }
    }

    #[test]
    fn test_pool_satisfies_acceptance() -> anyhow::Result<()> {
        let dim = 12;
        for &kappa in &[1.0, 10.0, 100.0] {
            let sampler = VmfWeightSampler::new(kappa, dim)?;
            let (_, b, _, _) = sampler.constants();
            let n = 500;

            // the same (z, u) stream checked one pair at a time: the
            // sampler must accept exactly the pairs `accepts` lets through
            let mut rng = StdRng::seed_from_u64(23);
            let normal = Normal::new(0.5, (1.0 / (4.0 * dim as f64)).sqrt())?;
            let mut accepted = vec![];
            let mut n_rejected = 0;
            while accepted.len() < n {
                let z: f64 = normal.sample(&mut rng);
                let z = z.clamp(1e-6, 1.0 - 1e-6);
                let w = (1.0 - (1.0 + b) * z) / (1.0 - (1.0 - b) * z);
                let u: f64 = rng.random();
                if sampler.accepts(w, u) {
                    accepted.push(w);
                } else {
                    n_rejected += 1;
                }
            }
            println!("kappa={}: {} rejected", kappa, n_rejected);

            let mut pool = sampler.sample(n, &mut StdRng::seed_from_u64(23))?;
            pool.sort_by(f64::total_cmp);
            accepted.sort_by(f64::total_cmp);
            assert_eq!(pool, accepted);
            assert!(pool.iter().all(|&w| (-1.0..=1.0).contains(&w)));
        }
        Ok(())
    }

    #[test]
    fn test_round_cap_is_a_typed_error() -> anyhow::Result<()> {
        let sampler = VmfWeightSampler::new(10.0, 5)?.with_max_rounds(0);
        let err = sampler
            .sample(10, &mut StdRng::seed_from_u64(1))
            .expect_err("no rounds allowed");
        let stalled = err
            .downcast_ref::<VmfSamplerStalled>()
            .expect("typed stall error");
        assert_eq!(stalled.pending, 10);
        assert_eq!(stalled.dim, 5);
        Ok(())
    }
}
