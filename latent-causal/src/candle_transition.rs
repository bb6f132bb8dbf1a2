use crate::candle_aux_layers::FeatureMlp;
use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

/// Initial log-variance of every transition
pub const TRANSITION_LOGVAR_INIT: f64 = -4.0;

/// Nonlinear autoregressive prior `p(z_t | z_{<t})`, one network per
/// (feature, latent) target, each seeing only the parents its edge
/// mask row lets through.
pub struct TransitionModel {
    d: usize,
    d_z: usize,
    total_tau: usize,
    nets: Vec<FeatureMlp>,
    logvar: Tensor,
}

impl TransitionModel {
    /// Will create these variables:
    /// * `nn.{u}` for `u = i * d_z + k`, input `total_tau * d * d_z`, output 1
    /// * `logvar` (d x d_z)
    pub fn new(
        d: usize,
        d_z: usize,
        total_tau: usize,
        num_layers: usize,
        num_hidden: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let num_input = total_tau * d * d_z;
        let nets = (0..(d * d_z))
            .map(|u| {
                let vb_u = vb.pp(format!("nn.{}", u));
                FeatureMlp::new(num_layers, num_hidden, num_input, 1, vb_u)
            })
            .collect::<Result<Vec<_>>>()?;

        let logvar = vb.get_with_hints(
            (d, d_z),
            "logvar",
            candle_nn::Init::Const(TRANSITION_LOGVAR_INIT),
        )?;

        Ok(Self {
            d,
            d_z,
            total_tau,
            nets,
            logvar,
        })
    }

    /// Mean of latent `k` of feature `i` given its masked history
    ///
    /// # Arguments
    /// * `z_window` - `[b, total_tau, d, d_z]` latent history
    /// * `mask_slice` - `[b, total_tau, d * d_z]` parents of target `(i, k)`
    /// * `i` - feature index
    /// * `k` - latent index
    ///
    /// # Returns `[b, 1]`
    pub fn forward(
        &self,
        z_window: &Tensor,
        mask_slice: &Tensor,
        i: usize,
        k: usize,
    ) -> Result<Tensor> {
        let b = z_window.dim(0)?;
        let z = z_window.reshape(mask_slice.shape())?;
        let masked = (z * mask_slice)?.reshape((b, self.total_tau * self.d * self.d_z))?;
        self.nets[i * self.d_z + k].forward(&masked)
    }

    /// `[d, d_z]` free log-variance
    pub fn logvar(&self) -> &Tensor {
        &self.logvar
    }

    /// `[d_z]` standard deviation `exp(0.5 logvar[i])` of feature `i`
    pub fn std(&self, i: usize) -> Result<Tensor> {
        (self.logvar.get(i)? * 0.5)?.exp()
    }

    pub fn total_tau(&self) -> usize {
        self.total_tau
    }
}
