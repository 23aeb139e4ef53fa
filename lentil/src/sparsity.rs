use candle_util::candle_core::{Device, Tensor};

///
/// L1 coefficient steered toward a target fraction of near-zero
/// topic-term weights. Doubles per unit shortfall, halves per unit
/// excess: `coef <- coef * 2^(target - observed)`.
///
#[derive(Clone, Copy, Debug)]
pub struct SparsityAnnealer {
    coef: f64,
    target: f64,
    threshold: f64,
}

impl SparsityAnnealer {
    ///
    /// * `init_coef` - starting L1 coefficient (ignored when target is 0)
    /// * `target` - desired fraction of weights below `threshold`
    /// * `threshold` - magnitude under which a weight counts as zero
    ///
    pub fn new(init_coef: f64, target: f64, threshold: f64) -> Self {
        let coef = if target > 0.0 { init_coef } else { 0.0 };
        Self {
            coef,
            target,
            threshold,
        }
    }

    pub fn coef(&self) -> f64 {
        self.coef
    }

    pub fn is_active(&self) -> bool {
        self.target > 0.0
    }

    ///
    /// Adjust the coefficient from the observed ratio; returns the
    /// new coefficient
    ///
    pub fn update(&mut self, observed_ratio: f64) -> f64 {
        if self.is_active() {
            self.coef *= 2_f64.powf(self.target - observed_ratio);
        }
        self.coef
    }

    /// observe the weights and adjust
    pub fn update_from_weights(&mut self, w: &Tensor) -> anyhow::Result<f64> {
        if !self.is_active() {
            return Ok(self.coef);
        }
        let ratio = sparsity_ratio(w, self.threshold)?;
        Ok(self.update(ratio))
    }
}

/// fraction of entries with |w| < threshold
pub fn sparsity_ratio(w: &Tensor, threshold: f64) -> anyhow::Result<f64> {
    let values = w
        .to_device(&Device::Cpu)?
        .flatten_all()?
        .to_dtype(candle_util::candle_core::DType::F32)?
        .to_vec1::<f32>()?;
    if values.is_empty() {
        return Ok(0.0);
    }
    let nzero = values
        .iter()
        .filter(|&&x| (x.abs() as f64) < threshold)
        .count();
    Ok(nzero as f64 / values.len() as f64)
}
