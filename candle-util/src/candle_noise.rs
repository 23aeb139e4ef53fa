use candle_core::{Device, Result, Tensor};
use candle_nn::VarMap;
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::sync::{Mutex, MutexGuard};

///
/// One seeded random stream per trial. Every stochastic step of a
/// model (parameter initialization, reparameterization noise,
/// dropout masks, minibatch shuffles, vMF pool draws) pulls from
/// here, so two runs with the same seed see the same numbers.
///
pub struct NoiseSource {
    rng: Mutex<StdRng>,
}

impl NoiseSource {
    pub fn seed_from_u64(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StdRng>> {
        self.rng
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("noise source: {}", e)))
    }

    /// run `f` with exclusive access to the underlying generator
    pub fn with_rng<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StdRng) -> T,
    {
        let mut rng = self.lock()?;
        Ok(f(&mut rng))
    }

    /// standard normal draws `(n, k)` on the target device
    pub fn randn(&self, n: usize, k: usize, device: &Device) -> Result<Tensor> {
        let data: Vec<f32> =
            self.with_rng(|rng| (0..(n * k)).map(|_| rng.sample(StandardNormal)).collect())?;
        Tensor::from_vec(data, (n, k), device)
    }

    /// inverted dropout: zero each entry with probability `p`,
    /// scale the survivors by `1 / (1 - p)`
    pub fn dropout(&self, x: &Tensor, p: f64) -> Result<Tensor> {
        if p <= 0.0 {
            return Ok(x.clone());
        }
        if p >= 1.0 {
            return x.zeros_like();
        }
        let scale = (1.0 / (1.0 - p)) as f32;
        let mask: Vec<f32> = self.with_rng(|rng| {
            (0..x.elem_count())
                .map(|_| {
                    if rng.random::<f64>() < p {
                        0.0
                    } else {
                        scale
                    }
                })
                .collect()
        })?;
        let mask = Tensor::from_vec(mask, x.shape(), x.device())?.to_dtype(x.dtype())?;
        x.mul(&mask)
    }

    /// `n` indexes drawn uniformly from `[0, upper)`
    pub fn random_indices(&self, n: usize, upper: usize) -> Result<Vec<usize>> {
        if upper == 0 {
            candle_core::bail!("cannot draw indexes from an empty range");
        }
        self.with_rng(|rng| (0..n).map(|_| rng.random_range(0..upper)).collect())
    }

    pub fn shuffle(&self, samples: &mut [usize]) -> Result<()> {
        self.with_rng(|rng| samples.shuffle(rng))
    }

    ///
    /// Re-draw every parameter of `varmap` from this stream, visiting
    /// variables in name order: matrices (`*.weight`) get Kaiming
    /// normal values, biases get zeros, and batch-norm running
    /// statistics are left alone.
    ///
    pub fn reinit_varmap(&self, varmap: &VarMap) -> Result<()> {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("varmap: {}", e)))?;

        let mut names: Vec<&String> = data.keys().collect();
        names.sort();

        for name in names {
            let var = &data[name];
            if name.contains("running_") {
                continue;
            }
            let dims = var.dims().to_vec();
            if name.ends_with("weight") && dims.len() == 2 {
                let (dout, din) = (dims[0], dims[1]);
                let std = (2.0 / din as f64).sqrt();
                let w = (self.randn(dout, din, var.device())? * std)?.to_dtype(var.dtype())?;
                var.set(&w)?;
            } else if name.ends_with("bias") {
                var.set(&var.zeros_like()?)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_draws() -> Result<()> {
        let dev = Device::Cpu;
        let a = NoiseSource::seed_from_u64(42);
        let b = NoiseSource::seed_from_u64(42);
        let xa = a.randn(3, 4, &dev)?.to_vec2::<f32>()?;
        let xb = b.randn(3, 4, &dev)?.to_vec2::<f32>()?;
        assert_eq!(xa, xb);

        let c = NoiseSource::seed_from_u64(43);
        let xc = c.randn(3, 4, &dev)?.to_vec2::<f32>()?;
        assert_ne!(xa, xc);
        Ok(())
    }

    #[test]
    fn test_dropout_scaling() -> Result<()> {
        let dev = Device::Cpu;
        let noise = NoiseSource::seed_from_u64(1);
        let x = Tensor::ones((100, 50), candle_core::DType::F32, &dev)?;
        let y = noise.dropout(&x, 0.2)?.flatten_all()?.to_vec1::<f32>()?;
        let nzero = y.iter().filter(|&&v| v == 0.0).count();
        assert!(nzero > 800 && nzero < 1200, "dropped {}", nzero);
        assert!(y.iter().all(|&v| v == 0.0 || (v - 1.25).abs() < 1e-6));
        Ok(())
    }
}
