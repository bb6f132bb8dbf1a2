use crate::candle_model_traits::AutoEncoderModuleT;
use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

/// Initial log-variance of encoder and decoder
pub const LOGVAR_INIT: f64 = -1.0;

/// Decoder weight, either learned or pinned to a ground truth
pub enum MixingWeight {
    Learned(Tensor),
    GroundTruth(Tensor),
}

impl MixingWeight {
    pub fn tensor(&self) -> &Tensor {
        match self {
            MixingWeight::Learned(w) => w,
            MixingWeight::GroundTruth(w) => w,
        }
    }
}

/// Per-feature linear auto-encoder
///
/// decode: mu = z[n, k] * W[i, k, x]
/// encode: mu = x[n, x] * W[i]ᵀ (tied) or x[n, x] * W_enc[i, x, k]
pub struct LinearAutoEncoder {
    d: usize,
    d_x: usize,
    d_z: usize,
    tied: bool,
    w_ikx: MixingWeight,
    w_encoder_ixk: Option<Tensor>,
    logvar_encoder: Tensor,
    logvar_decoder: Tensor,
}

impl LinearAutoEncoder {
    /// Will create these variables:
    /// * `w` (d x d_z x d_x), unless a ground-truth mixing is given
    /// * `w.encoder` (d x d_x x d_z), only if not `tied`
    /// * `logvar.encoder` (d), `logvar.decoder` (d)
    ///
    /// # Arguments
    /// * `d` - number of features
    /// * `d_x` - grid locations per feature
    /// * `d_z` - latents per feature
    /// * `tied` - encoder uses the transposed decoder weight
    /// * `ground_truth_w` - optional mixing `[d, d_x, d_z]` to pin the decoder
    /// * `vb` - variable builder
    pub fn new(
        d: usize,
        d_x: usize,
        d_z: usize,
        tied: bool,
        ground_truth_w: Option<&Tensor>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let w_ikx = match ground_truth_w {
            Some(w_ixk) => MixingWeight::GroundTruth(
                w_ixk
                    .transpose(1, 2)?
                    .contiguous()?
                    .to_dtype(vb.dtype())?
                    .to_device(vb.device())?,
            ),
            None => MixingWeight::Learned(vb.get_with_hints(
                (d, d_z, d_x),
                "w",
                uniform_init(d_x),
            )?),
        };

        let w_encoder_ixk = if tied {
            None
        } else {
            Some(vb.get_with_hints((d, d_x, d_z), "w.encoder", uniform_init(d_z))?)
        };

        let logvar_encoder =
            vb.get_with_hints(d, "logvar.encoder", candle_nn::Init::Const(LOGVAR_INIT))?;
        let logvar_decoder =
            vb.get_with_hints(d, "logvar.decoder", candle_nn::Init::Const(LOGVAR_INIT))?;

        Ok(Self {
            d,
            d_x,
            d_z,
            tied,
            w_ikx,
            w_encoder_ixk,
            logvar_encoder,
            logvar_decoder,
        })
    }

    pub fn is_tied(&self) -> bool {
        self.tied
    }

    pub fn num_features(&self) -> usize {
        self.d
    }

    fn encoder_map(&self, feature: usize) -> Result<Tensor> {
        match &self.w_encoder_ixk {
            Some(w_ixk) => w_ixk.get(feature),
            None => self.w_ikx.tensor().get(feature)?.t(),
        }
    }
}

/// U[0.1, 1) / fan_in
pub(crate) fn uniform_init(fan_in: usize) -> candle_nn::Init {
    let n = fan_in as f64;
    candle_nn::Init::Uniform {
        lo: 0.1 / n,
        up: 1.0 / n,
    }
}

/// one scalar per feature, broadcast to the shape of `mu`
pub(crate) fn feature_logvar(logvar: &Tensor, feature: usize, mu: &Tensor) -> Result<Tensor> {
    logvar.narrow(0, feature, 1)?.broadcast_as(mu.shape())
}

impl AutoEncoderModuleT for LinearAutoEncoder {
    fn encode(&self, x_nd: &Tensor, feature: usize) -> Result<(Tensor, Tensor)> {
        let mu_nk = x_nd.matmul(&self.encoder_map(feature)?)?;
        let logvar_nk = feature_logvar(&self.logvar_encoder, feature, &mu_nk)?;
        Ok((mu_nk, logvar_nk))
    }

    fn decode(&self, z_nk: &Tensor, feature: usize) -> Result<(Tensor, Tensor)> {
        let mu_nd = z_nk.matmul(&self.w_ikx.tensor().get(feature)?)?;
        let logvar_nd = feature_logvar(&self.logvar_decoder, feature, &mu_nd)?;
        Ok((mu_nd, logvar_nd))
    }

    /// `[d, d_x, d_z]` map applied by `encode`
    fn encoder_weight(&self) -> Result<Tensor> {
        match &self.w_encoder_ixk {
            Some(w_ixk) => Ok(w_ixk.clone()),
            None => self.w_ikx.tensor().transpose(1, 2),
        }
    }

    /// `[d, d_z, d_x]` map applied by `decode`
    fn decoder_weight(&self) -> Result<Tensor> {
        Ok(self.w_ikx.tensor().clone())
    }

    fn dim_obs(&self) -> usize {
        self.d_x
    }

    fn dim_latent(&self) -> usize {
        self.d_z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Optimizer, VarMap};

    #[test]
    fn shapes_and_shared_logvar() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ae = LinearAutoEncoder::new(3, 6, 2, false, None, vb)?;

        let x = Tensor::randn(0f32, 1f32, (5, 6), &Device::Cpu)?;
        let (mu, logvar) = ae.encode(&x, 1)?;
        assert_eq!(mu.dims(), &[5, 2]);
        assert_eq!(logvar.dims(), &[5, 2]);
        let lv = logvar.flatten_all()?.to_vec1::<f32>()?;
        assert!(lv.iter().all(|&v| v == LOGVAR_INIT as f32));

        let (mu, logvar) = ae.decode(&mu, 1)?;
        assert_eq!(mu.dims(), &[5, 6]);
        assert_eq!(logvar.dims(), &[5, 6]);

        assert_eq!(ae.encoder_weight()?.dims(), &[3, 6, 2]);
        assert_eq!(ae.decoder_weight()?.dims(), &[3, 2, 6]);
        Ok(())
    }

    #[test]
    fn ground_truth_decoder_is_not_learned() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &dev);
        let gt_w = Tensor::rand(0f64, 1f64, (2, 4, 3), &dev)?;
        let ae = LinearAutoEncoder::new(2, 4, 3, true, Some(&gt_w), vb)?;

        // only the two log-variances remain trainable
        assert_eq!(varmap.all_vars().len(), 2);
        let diff = (ae.encoder_weight()? - &gt_w)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn tied_round_trip_recovers_low_rank_data() -> Result<()> {
        let dev = Device::Cpu;
        let (n, d_x, d_z) = (256, 6, 2);

        // x = z * W_true with a known rank-2 mixing
        let w_true = Tensor::rand(0.2f64, 1.0f64, (d_z, d_x), &dev)?;
        let z_true = Tensor::randn(0f64, 1f64, (n, d_z), &dev)?;
        let x = z_true.matmul(&w_true)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &dev);
        let ae = LinearAutoEncoder::new(1, d_x, d_z, true, None, vb)?;

        let mse = |ae: &LinearAutoEncoder| -> Result<Tensor> {
            let (z_mu, _) = ae.encode(&x, 0)?;
            let (x_mu, _) = ae.decode(&z_mu, 0)?;
            (x_mu - &x)?.sqr()?.mean_all()
        };

        let initial = mse(&ae)?.to_scalar::<f64>()?;
        let mut adam = candle_nn::AdamW::new_lr(varmap.all_vars(), 0.02)?;
        for _ in 0..1500 {
            adam.backward_step(&mse(&ae)?)?;
        }
        let last = mse(&ae)?.to_scalar::<f64>()?;

        assert!(
            last < 0.1 * initial,
            "mse {} -> {} did not shrink enough",
            initial,
            last
        );
        Ok(())
    }
}
