use crate::candle_noise::NoiseSource;

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` or `ordered_minibatch` is called,
/// `chunks` partition the sample indexes. The last chunk may be
/// shorter than the batch size; no sample is dropped.
///
pub struct Minibatches {
    pub samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn new(size: usize) -> Self {
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
        }
    }

    pub fn shuffle_minibatch(&mut self, batch_size: usize, noise: &NoiseSource) -> anyhow::Result<()> {
        self.samples.sort_unstable();
        noise.shuffle(&mut self.samples)?;
        self.partition(batch_size)
    }

    pub fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        self.samples.sort_unstable();
        self.partition(batch_size)
    }

    fn partition(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_final_batch() -> anyhow::Result<()> {
        let noise = NoiseSource::seed_from_u64(3);
        let mut mb = Minibatches::new(10);
        assert_eq!(mb.size(), 10);
        mb.shuffle_minibatch(4, &noise)?;
        let sizes: Vec<usize> = mb.chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let mut seen: Vec<usize> = mb.chunks.concat();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());

        mb.ordered_minibatch(5)?;
        assert_eq!(mb.chunks, vec![vec![0, 1, 2, 3, 4], vec![5, 6, 7, 8, 9]]);
        Ok(())
    }
}
