use crate::candle_data_loader_util::*;
use crate::candle_noise::NoiseSource;
use candle_core::{Device, Tensor};
use matrix_util::sparse_bow::BowMatrix;
use std::sync::Arc;

pub struct MinibatchData {
    pub input: Tensor,
    pub covariates: Option<Tensor>,
    pub rows: Vec<usize>,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// Minibatches of a sparse document-term matrix. Rows are densified
/// one batch at a time; document labels become one-hot covariates
/// when `n_covars > 0`.
///
pub struct BowData<'a> {
    bow: &'a BowMatrix,
    n_covars: usize,
    noise: Option<Arc<NoiseSource>>,
    minibatches: Minibatches,
}

impl<'a> BowData<'a> {
    ///
    /// * `bow` - document-term counts
    /// * `n_covars` - number of label categories (0 for none)
    ///
    pub fn new(bow: &'a BowMatrix, n_covars: usize) -> anyhow::Result<Self> {
        if n_covars > 0 {
            let labels = bow
                .labels()
                .ok_or(anyhow::anyhow!("covariates requested but documents carry no labels"))?;
            if let Some(l) = labels.iter().find(|&&l| l < 0 || l as usize >= n_covars) {
                return Err(anyhow::anyhow!(
                    "label {} outside [0, {}) covariate range",
                    l,
                    n_covars
                ));
            }
        }
        Ok(Self {
            bow,
            n_covars,
            noise: None,
            minibatches: Minibatches::new(bow.num_docs()),
        })
    }

    /// shuffle batches with this random stream
    pub fn with_noise(mut self, noise: Arc<NoiseSource>) -> Self {
        self.noise = Some(noise);
        self
    }

    /// partition rows in their original order
    pub fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.minibatches.ordered_minibatch(batch_size)
    }

    pub fn num_docs(&self) -> usize {
        self.bow.num_docs()
    }

    fn one_hot(&self, rows: &[usize], target_device: &Device) -> anyhow::Result<Option<Tensor>> {
        if self.n_covars == 0 {
            return Ok(None);
        }
        let labels = self
            .bow
            .labels()
            .ok_or(anyhow::anyhow!("documents carry no labels"))?;
        let mut cov = vec![0_f32; rows.len() * self.n_covars];
        for (r, &i) in rows.iter().enumerate() {
            cov[r * self.n_covars + labels[i] as usize] = 1.0;
        }
        Ok(Some(Tensor::from_vec(
            cov,
            (rows.len(), self.n_covars),
            target_device,
        )?))
    }
}

impl DataLoader for BowData<'_> {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let rows = self.minibatches.chunks.get(batch_idx).ok_or(anyhow::anyhow!(
            "invalid index = {} vs. total # = {}",
            batch_idx,
            self.num_minibatch()
        ))?;

        let x = self.bow.rows_dense(rows);
        let input = Tensor::from_vec(x, (rows.len(), self.bow.num_terms()), target_device)?;

        Ok(MinibatchData {
            input,
            covariates: self.one_hot(rows, target_device)?,
            rows: rows.clone(),
        })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        match self.noise.as_ref() {
            Some(noise) => self.minibatches.shuffle_minibatch(batch_size, noise),
            None => self.minibatches.ordered_minibatch(batch_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bow_minibatches_with_covariates() -> anyhow::Result<()> {
        let triplets = vec![(0, 0, 1.0), (1, 1, 2.0), (2, 2, 3.0)];
        let bow = BowMatrix::from_triplets(3, 3, &triplets, Some(vec![1, 0, 1]))?;

        let mut data = BowData::new(&bow, 2)?;
        data.ordered_minibatch(2)?;
        assert_eq!(data.num_minibatch(), 2);

        let mb = data.minibatch_data(1, &Device::Cpu)?;
        assert_eq!(mb.rows, vec![2]);
        assert_eq!(mb.input.to_vec2::<f32>()?, vec![vec![0.0, 0.0, 3.0]]);
        let cov = mb.covariates.unwrap().to_vec2::<f32>()?;
        assert_eq!(cov, vec![vec![0.0, 1.0]]);

        assert!(BowData::new(&bow, 1).is_err());
        Ok(())
    }
}
