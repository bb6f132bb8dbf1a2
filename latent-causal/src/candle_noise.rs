use candle_core::{DType, Device, Result, Shape, Tensor};
use rand::distr::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::cell::RefCell;

/// Random number stream owned by a single stochastic component.
///
/// Every sampler keeps its own generator so that draws stay
/// reproducible per component under a fixed seed, no matter how many
/// other components sample in between.
pub struct NoiseSource {
    rng: RefCell<StdRng>,
}

impl NoiseSource {
    /// * `seed` - base seed (`None` seeds from the OS)
    /// * `stream` - component offset added to the base seed
    pub fn new(seed: Option<u64>, stream: u64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng: RefCell::new(rng),
        }
    }

    /// Uniform draws on the open interval (0, 1)
    pub fn uniform<S: Into<Shape>>(
        &self,
        shape: S,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        self.transformed(shape.into(), |u| u, dtype, device)
    }

    /// Standard normal draws ε ~ N(0, 1)
    pub fn standard_normal<S: Into<Shape>>(
        &self,
        shape: S,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let mut rng = self.rng.borrow_mut();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| rng.sample::<f64, _>(StandardNormal))
            .collect();
        to_target(Tensor::from_vec(data, shape, &Device::Cpu)?, dtype, device)
    }

    /// Standard logistic noise: log(u) - log(1 - u), u ~ U(0, 1)
    pub fn logistic<S: Into<Shape>>(
        &self,
        shape: S,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        self.transformed(shape.into(), |u| u.ln() - (1.0 - u).ln(), dtype, device)
    }

    /// Standard Gumbel noise: -log(-log(u)), u ~ U(0, 1)
    pub fn gumbel<S: Into<Shape>>(
        &self,
        shape: S,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        self.transformed(shape.into(), |u| -(-u.ln()).ln(), dtype, device)
    }

    /// f(u) for u ~ U(0, 1), evaluated in f64 so that both tails stay
    /// finite before narrowing to `dtype`
    fn transformed<F>(&self, shape: Shape, f: F, dtype: DType, device: &Device) -> Result<Tensor>
    where
        F: Fn(f64) -> f64,
    {
        let mut rng = self.rng.borrow_mut();
        let data: Vec<f64> = (0..shape.elem_count())
            .map(|_| f(rng.sample::<f64, _>(Open01)))
            .collect();
        to_target(Tensor::from_vec(data, shape, &Device::Cpu)?, dtype, device)
    }
}

// Convert on CPU first (Metal doesn't support f64)
fn to_target(x: Tensor, dtype: DType, device: &Device) -> Result<Tensor> {
    x.to_dtype(dtype)?.to_device(device)
}
