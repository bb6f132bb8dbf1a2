use anyhow::anyhow;
use candle_core::{Device, Tensor};
use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    pub samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
    rng: StdRng,
}

impl Minibatches {
    /// * `size` - number of samples
    /// * `seed` - shuffling seed (`None` seeds from the OS)
    pub fn new(size: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            samples: (0..size).collect(),
            chunks: vec![],
            rng,
        }
    }

    /// Shuffle the samples and cut them into chunks of `batch_size`;
    /// the last chunk may be smaller
    pub fn shuffle_minibatch(&mut self, batch_size: usize) {
        let batch_size = batch_size.max(1);
        self.samples.shuffle(&mut self.rng);

        self.chunks = self
            .samples
            .par_chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }
}

/// Stack the selected per-sample tensors along a new leading axis
pub fn take_stacked(
    indexes: &[usize],
    target_device: &Device,
    data_vec: Option<&Vec<Tensor>>,
) -> anyhow::Result<Option<Tensor>> {
    if let Some(data_vec) = data_vec {
        if let Some(&bad) = indexes.iter().find(|&&i| i >= data_vec.len()) {
            return Err(anyhow!(
                "invalid index = {} vs. total # = {}",
                bad,
                data_vec.len()
            ));
        }
        let chunk = indexes.iter().map(|&i| data_vec[i].clone()).collect::<Vec<_>>();
        Ok(Some(Tensor::stack(&chunk, 0)?.to_device(target_device)?))
    } else {
        // if the data vector doesn't exist
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_partition_the_samples() {
        let mut mb = Minibatches::new(10, Some(1));
        mb.shuffle_minibatch(4);
        assert_eq!(mb.num_chunks(), 3);
        assert_eq!(mb.chunks[2].len(), 2);

        let mut all = mb.chunks.concat();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn take_stacked_checks_bounds() -> anyhow::Result<()> {
        let data = (0..3)
            .map(|i| Tensor::full(i as f32, (2, 2), &Device::Cpu))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let x = take_stacked(&[2, 0], &Device::Cpu, Some(&data))?;
        assert_eq!(x.map(|x| x.dims().to_vec()), Some(vec![2, 2, 2]));
        assert!(take_stacked(&[3], &Device::Cpu, Some(&data)).is_err());
        assert!(take_stacked(&[0], &Device::Cpu, None)?.is_none());
        Ok(())
    }
}
