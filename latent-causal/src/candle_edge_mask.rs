use crate::candle_gumbel::gumbel_sigmoid_with_noise;
use crate::candle_noise::NoiseSource;
use crate::error::{LatentCausalError, Result};
use candle_core::Tensor;
use candle_nn::{ops, VarBuilder};

/// Initial log-odds of every candidate edge
pub const EDGE_LOGIT_INIT: f64 = 5.0;

/// Where the sampled adjacency comes from
pub enum EdgeMaskState {
    /// Gumbel-sigmoid draws from the learned logits
    Learned,
    /// Deterministic broadcast of an externally supplied adjacency
    FixedOverride(Tensor),
}

/// Differentiable adjacency over (lag, feature, latent) triples.
///
/// Masks are indexed `[lag, target, source]` with `target` and
/// `source` running over `d * d_z` latent nodes. When instantaneous
/// connections are modelled the last lag is the same-time-step slice
/// and its diagonal is always zero (no self-loop at lag 0).
pub struct EdgeMaskSampler {
    total_tau: usize,
    num_nodes: usize,
    instantaneous: bool,
    hard: bool,
    logits: Tensor,
    fixed_mask: Tensor,
    state: EdgeMaskState,
    noise: NoiseSource,
}

impl EdgeMaskSampler {
    /// Will create a new edge mask sampler with this variable:
    /// * `logits` (total_tau x num_nodes x num_nodes)
    ///
    /// # Arguments
    /// * `total_tau` - number of lags (including lag 0 if instantaneous)
    /// * `num_nodes` - number of latent nodes `d * d_z`
    /// * `instantaneous` - model same-time-step edges
    /// * `hard` - straight-through hard samples
    /// * `noise` - this sampler's own random stream
    /// * `vb` - variable builder
    pub fn new(
        total_tau: usize,
        num_nodes: usize,
        instantaneous: bool,
        hard: bool,
        noise: NoiseSource,
        vb: VarBuilder,
    ) -> Result<Self> {
        let logits = vb.get_with_hints(
            (total_tau, num_nodes, num_nodes),
            "logits",
            candle_nn::Init::Const(EDGE_LOGIT_INIT),
        )?;

        let fixed_mask = structural_mask(&logits, instantaneous)?;

        Ok(Self {
            total_tau,
            num_nodes,
            instantaneous,
            hard,
            logits,
            fixed_mask,
            state: EdgeMaskState::Learned,
            noise,
        })
    }

    /// Draw `batch_size` masks, `[batch, total_tau, nodes, nodes]`
    ///
    /// * `batch_size` - number of masks (>= 1)
    /// * `temperature` - Gumbel-sigmoid temperature (> 0)
    pub fn sample(&self, batch_size: usize, temperature: f64) -> Result<Tensor> {
        if batch_size == 0 {
            return Err(candle_core::Error::msg("edge mask batch size must be >= 1").into());
        }

        let shape = (batch_size, self.total_tau, self.num_nodes, self.num_nodes);

        match &self.state {
            EdgeMaskState::FixedOverride(adj) => {
                Ok(adj.unsqueeze(0)?.broadcast_as(shape)?.contiguous()?)
            }
            EdgeMaskState::Learned => {
                if temperature.is_nan() || temperature <= 0.0 {
                    return Err(LatentCausalError::InvalidTemperature(temperature));
                }
                let noise = self
                    .noise
                    .logistic(shape, self.logits.dtype(), self.logits.device())?;
                let adj = gumbel_sigmoid_with_noise(&self.logits, &noise, temperature, self.hard)?;
                Ok(adj.broadcast_mul(&self.fixed_mask)?)
            }
        }
    }

    /// Expected edge probabilities `sigmoid(logits) * fixed_mask`, or
    /// the fixed adjacency once `fix` has been called
    pub fn get_proba(&self) -> Result<Tensor> {
        match &self.state {
            EdgeMaskState::FixedOverride(adj) => Ok(adj.clone()),
            EdgeMaskState::Learned => Ok(ops::sigmoid(&self.logits)?.mul(&self.fixed_mask)?),
        }
    }

    /// Permanently replace sampling by `adj` broadcast over the batch
    ///
    /// * `adj` - adjacency `[total_tau, nodes, nodes]`
    pub fn fix(&mut self, adj: &Tensor) -> Result<()> {
        let expected = vec![self.total_tau, self.num_nodes, self.num_nodes];
        if adj.dims() != expected.as_slice() {
            return Err(LatentCausalError::ShapeMismatch {
                what: "fixed adjacency",
                expected,
                actual: adj.dims().to_vec(),
            });
        }
        let adj = adj
            .detach()
            .to_dtype(self.logits.dtype())?
            .to_device(self.logits.device())?;
        self.state = EdgeMaskState::FixedOverride(adj);
        Ok(())
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.state, EdgeMaskState::FixedOverride(_))
    }

    pub fn logits(&self) -> &Tensor {
        &self.logits
    }

    pub fn fixed_mask(&self) -> &Tensor {
        &self.fixed_mask
    }

    pub fn total_tau(&self) -> usize {
        self.total_tau
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn instantaneous(&self) -> bool {
        self.instantaneous
    }
}

/// ones everywhere except the lag-0 (last) diagonal when `instantaneous`
fn structural_mask(logits: &Tensor, instantaneous: bool) -> candle_core::Result<Tensor> {
    let ones = logits.ones_like()?;
    if !instantaneous {
        return Ok(ones);
    }

    let (total_tau, n, _) = logits.dims3()?;
    let eye = Tensor::eye(n, logits.dtype(), logits.device())?;
    let lag0 = (1.0 - eye)?.unsqueeze(0)?;

    if total_tau > 1 {
        Tensor::cat(&[ones.narrow(0, 0, total_tau - 1)?, lag0], 0)
    } else {
        Ok(lag0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};
    use candle_nn::VarMap;

    fn sampler(varmap: &VarMap, instantaneous: bool, hard: bool) -> Result<EdgeMaskSampler> {
        let vb = VarBuilder::from_varmap(varmap, DType::F64, &Device::Cpu);
        let noise = NoiseSource::new(Some(11), 1);
        EdgeMaskSampler::new(3, 4, instantaneous, hard, noise, vb.pp("edge"))
    }

    #[test]
    fn soft_and_hard_sample_ranges() -> Result<()> {
        let varmap = VarMap::new();
        let soft = sampler(&varmap, false, false)?;
        // pull the logits to zero so both outcomes appear
        let soft = EdgeMaskSampler {
            logits: soft.logits().zeros_like()?,
            ..soft
        };
        let y = soft.sample(6, 1.0)?;
        assert_eq!(y.dims(), &[6, 3, 4, 4]);
        let v = y.flatten_all()?.to_vec1::<f64>()?;
        assert!(v.iter().all(|&x| x > 0.0 && x < 1.0));

        let varmap = VarMap::new();
        let hard = sampler(&varmap, false, true)?;
        let v = hard.sample(6, 0.5)?.flatten_all()?.to_vec1::<f64>()?;
        assert!(v.iter().all(|&x| x == 0.0 || x == 1.0));
        Ok(())
    }

    #[test]
    fn lag0_diagonal_is_zero() -> Result<()> {
        for hard in [false, true] {
            let varmap = VarMap::new();
            let s = sampler(&varmap, true, hard)?;
            for _ in 0..5 {
                let y = s.sample(4, 1.0)?;
                let eye = Tensor::eye(4, DType::F64, &Device::Cpu)?;
                let diag = y.i((.., 2))?.broadcast_mul(&eye)?;
                assert_eq!(diag.abs()?.sum_all()?.to_scalar::<f64>()?, 0.0);
            }
            let proba = s.get_proba()?;
            for k in 0..4 {
                assert_eq!(proba.i((2, k, k))?.to_scalar::<f64>()?, 0.0);
                assert!(proba.i((1, k, k))?.to_scalar::<f64>()? > 0.0);
            }
        }
        Ok(())
    }

    #[test]
    fn proba_is_deterministic() -> Result<()> {
        let varmap = VarMap::new();
        let s = sampler(&varmap, true, false)?;
        let p1 = s.get_proba()?;
        let _ = s.sample(1, 1.0)?;
        let _ = s.sample(9, 1.0)?;
        let p2 = s.get_proba()?;
        assert_eq!(p1.dims(), &[3, 4, 4]);
        let diff = (&p1 - &p2)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert_eq!(diff, 0.0);
        let v = p1.flatten_all()?.to_vec1::<f64>()?;
        assert!(v.iter().all(|&x| (0.0..=1.0).contains(&x)));
        Ok(())
    }

    #[test]
    fn fixed_sampler_broadcasts_override() -> Result<()> {
        let varmap = VarMap::new();
        let mut s = sampler(&varmap, false, true)?;
        let adj = Tensor::rand(0f64, 1f64, (3, 4, 4), &Device::Cpu)?.gt(0.5)?.to_dtype(DType::F64)?;
        s.fix(&adj)?;
        assert!(s.is_fixed());

        for (b, temperature) in [(1, 1.0), (5, 0.1), (2, 10.0)] {
            let y = s.sample(b, temperature)?;
            assert_eq!(y.dims(), &[b, 3, 4, 4]);
            for i in 0..b {
                let diff = (y.i(i)? - &adj)?.abs()?.max_all()?.to_scalar::<f64>()?;
                assert_eq!(diff, 0.0);
            }
        }
        let diff = (s.get_proba()? - &adj)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn rejects_bad_temperature_and_shape() -> Result<()> {
        let varmap = VarMap::new();
        let mut s = sampler(&varmap, false, false)?;
        assert!(matches!(
            s.sample(2, 0.0),
            Err(LatentCausalError::InvalidTemperature(_))
        ));
        let wrong = Tensor::zeros((2, 4, 4), DType::F64, &Device::Cpu)?;
        assert!(matches!(
            s.fix(&wrong),
            Err(LatentCausalError::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
