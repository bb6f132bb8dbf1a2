use crate::candle_data_loader_util::*;

use anyhow::anyhow;
use candle_core::{Device, Tensor};
use rayon::prelude::*;

/// One minibatch of sliding windows
pub struct WindowBatch {
    /// `[b, tau, d, d_x]`
    pub x: Tensor,
    /// `[b, d, d_x]`
    pub y: Tensor,
    /// `[b, tau + 1, d, d_z]`, only if latents were supplied
    pub gt_z: Option<Tensor>,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(&self, batch_idx: usize, target_device: &Device)
        -> anyhow::Result<WindowBatch>;

    fn num_minibatch(&self) -> usize;

    fn num_samples(&self) -> usize;

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// Sliding windows over an in-memory series `[T, d, d_x]`. Sample `s`
/// is the past `x = series[s .. s + tau]` and the next step
/// `y = series[s + tau]`, so there are `T - tau` samples.
///
pub struct TimeSeriesWindows {
    tau: usize,
    x_data: Vec<Tensor>,
    y_data: Vec<Tensor>,
    z_data: Option<Vec<Tensor>>,
    minibatches: Minibatches,
}

impl TimeSeriesWindows {
    /// * `series` - observations `[T, d, d_x]`
    /// * `latents` - optional ground-truth latents `[T, d, d_z]`
    /// * `tau` - window length (>= 1)
    /// * `seed` - shuffling seed
    pub fn new(
        series: &Tensor,
        latents: Option<&Tensor>,
        tau: usize,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        let (ntime, _, _) = series.dims3()?;
        if tau == 0 || ntime <= tau {
            return Err(anyhow!(
                "need tau >= 1 and more than tau = {} time points, got {}",
                tau,
                ntime
            ));
        }
        if let Some(z) = latents {
            if z.dim(0)? != ntime {
                return Err(anyhow!(
                    "latents have {} time points vs. {} observed",
                    z.dim(0)?,
                    ntime
                ));
            }
        }

        let nsamples = ntime - tau;

        let x_data = (0..nsamples)
            .into_par_iter()
            .map(|s| series.narrow(0, s, tau)?.contiguous())
            .collect::<candle_core::Result<Vec<_>>>()?;

        let y_data = (0..nsamples)
            .into_par_iter()
            .map(|s| series.get(s + tau)?.contiguous())
            .collect::<candle_core::Result<Vec<_>>>()?;

        let z_data = latents
            .map(|z| {
                (0..nsamples)
                    .into_par_iter()
                    .map(|s| z.narrow(0, s, tau + 1)?.contiguous())
                    .collect::<candle_core::Result<Vec<_>>>()
            })
            .transpose()?;

        Ok(Self {
            tau,
            x_data,
            y_data,
            z_data,
            minibatches: Minibatches::new(nsamples, seed),
        })
    }

    pub fn tau(&self) -> usize {
        self.tau
    }

    pub fn has_latents(&self) -> bool {
        self.z_data.is_some()
    }
}

impl DataLoader for TimeSeriesWindows {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<WindowBatch> {
        let indexes = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow!(
                "invalid minibatch = {} vs. total # = {}; need to shuffle first",
                batch_idx,
                self.minibatches.num_chunks()
            )
        })?;

        let x = take_stacked(indexes, target_device, Some(&self.x_data))?
            .ok_or_else(|| anyhow!("empty x"))?;
        let y = take_stacked(indexes, target_device, Some(&self.y_data))?
            .ok_or_else(|| anyhow!("empty y"))?;
        let gt_z = take_stacked(indexes, target_device, self.z_data.as_ref())?;

        Ok(WindowBatch { x, y, gt_z })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.num_chunks()
    }

    fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    fn shuffle_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow!("batch size must be >= 1"));
        }
        self.minibatches.shuffle_minibatch(batch_size);
        Ok(())
    }
}
