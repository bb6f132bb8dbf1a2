use crate::candle_autoencoder_linear::{feature_logvar, uniform_init, LOGVAR_INIT};
use crate::candle_aux_layers::FeatureMlp;
use crate::candle_mixing_mask::MixingMaskSampler;
use crate::candle_model_traits::AutoEncoderModuleT;
use crate::candle_noise::NoiseSource;
use crate::error::Result;
use candle_core::{IndexOp, Tensor};
use candle_nn::{Module, VarBuilder};

/// How each per-unit network sees its inputs
pub enum MixingGate {
    /// fresh Gumbel-softmax masks per call; `encoder` is `None` when
    /// the encoder shares the decoder's sampler
    Gumbel {
        decoder: MixingMaskSampler,
        encoder: Option<MixingMaskSampler>,
    },
    /// learned non-stochastic weights `[d, d_x, d_z]`
    Static {
        w_ixk: Tensor,
        w_encoder_ixk: Option<Tensor>,
    },
}

/// Noise streams of the two mixing samplers
pub struct MixingStreams {
    pub decoder: NoiseSource,
    pub encoder: NoiseSource,
}

pub struct NonLinearAutoEncoderArgs<'a> {
    pub d: usize,
    pub d_x: usize,
    pub d_z: usize,
    pub num_hidden: usize,
    pub num_layers: usize,
    pub gumbel_mask: bool,
    pub tied: bool,
    pub ground_truth_w: Option<&'a Tensor>,
}

/// Per-unit nonlinear auto-encoder
///
/// Latent `j` of feature `i` is `enc_j(x ⊙ m[i, :, j])` and grid
/// location `j` is `dec_j(z ⊙ m[i, j, :])`. The networks are shared
/// across features; the gate `m` is feature specific.
pub struct NonLinearAutoEncoder {
    d_x: usize,
    d_z: usize,
    gate: MixingGate,
    encoders: Vec<FeatureMlp>,
    decoders: Vec<FeatureMlp>,
    logvar_encoder: Tensor,
    logvar_decoder: Tensor,
}

impl NonLinearAutoEncoder {
    /// Will create these variables:
    /// * `mixing.logits`, `mixing.encoder.logits` (d x d_x x d_z) with Gumbel gates
    /// * `w`, `w.encoder` (d x d_x x d_z) with static gates
    /// * `enc.{j}` for `j < d_z` and `dec.{j}` for `j < d_x`
    /// * `logvar.encoder` (d), `logvar.decoder` (d)
    ///
    /// The `.encoder` variables only exist if not `tied`.
    pub fn new(
        args: &NonLinearAutoEncoderArgs,
        streams: MixingStreams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (d, d_x, d_z) = (args.d, args.d_x, args.d_z);

        let gate = if args.gumbel_mask {
            let decoder = MixingMaskSampler::new(
                d,
                d_x,
                d_z,
                args.ground_truth_w,
                streams.decoder,
                vb.pp("mixing"),
            )?;
            let encoder = if args.tied {
                None
            } else {
                Some(MixingMaskSampler::new(
                    d,
                    d_x,
                    d_z,
                    args.ground_truth_w,
                    streams.encoder,
                    vb.pp("mixing.encoder"),
                )?)
            };
            MixingGate::Gumbel { decoder, encoder }
        } else {
            let w_ixk = vb.get_with_hints((d, d_x, d_z), "w", uniform_init(d_z))?;
            let w_encoder_ixk = if args.tied {
                None
            } else {
                Some(vb.get_with_hints((d, d_x, d_z), "w.encoder", uniform_init(d_x))?)
            };
            MixingGate::Static {
                w_ixk,
                w_encoder_ixk,
            }
        };

        let encoders = (0..d_z)
            .map(|j| {
                let vb_j = vb.pp(format!("enc.{}", j));
                FeatureMlp::new(args.num_layers, args.num_hidden, d_x, 1, vb_j)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let decoders = (0..d_x)
            .map(|j| {
                let vb_j = vb.pp(format!("dec.{}", j));
                FeatureMlp::new(args.num_layers, args.num_hidden, d_z, 1, vb_j)
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        let logvar_encoder =
            vb.get_with_hints(d, "logvar.encoder", candle_nn::Init::Const(LOGVAR_INIT))?;
        let logvar_decoder =
            vb.get_with_hints(d, "logvar.decoder", candle_nn::Init::Const(LOGVAR_INIT))?;

        Ok(Self {
            d_x,
            d_z,
            gate,
            encoders,
            decoders,
            logvar_encoder,
            logvar_decoder,
        })
    }

    pub fn gate(&self) -> &MixingGate {
        &self.gate
    }

    /// `[n, d_x, d_z]` gate of feature `i` seen by the encoder
    fn encoder_gate(&self, n: usize, feature: usize) -> candle_core::Result<Tensor> {
        match &self.gate {
            MixingGate::Gumbel { decoder, encoder } => {
                let sampler = encoder.as_ref().unwrap_or(decoder);
                sampler.sample(n)?.i((.., feature))
            }
            MixingGate::Static {
                w_ixk,
                w_encoder_ixk,
            } => {
                let w = w_encoder_ixk.as_ref().unwrap_or(w_ixk).get(feature)?;
                w.unsqueeze(0)?.broadcast_as((n, self.d_x, self.d_z))
            }
        }
    }

    /// `[n, d_x, d_z]` gate of feature `i` seen by the decoder
    fn decoder_gate(&self, n: usize, feature: usize) -> candle_core::Result<Tensor> {
        match &self.gate {
            MixingGate::Gumbel { decoder, .. } => decoder.sample(n)?.i((.., feature)),
            MixingGate::Static { w_ixk, .. } => w_ixk
                .get(feature)?
                .unsqueeze(0)?
                .broadcast_as((n, self.d_x, self.d_z)),
        }
    }
}

impl AutoEncoderModuleT for NonLinearAutoEncoder {
    fn encode(&self, x_nd: &Tensor, feature: usize) -> candle_core::Result<(Tensor, Tensor)> {
        let n = x_nd.dim(0)?;
        let gate_ndk = self.encoder_gate(n, feature)?;

        let mut mu_cols = Vec::with_capacity(self.d_z);
        for (j, enc) in self.encoders.iter().enumerate() {
            let gate_nd = gate_ndk.i((.., .., j))?;
            mu_cols.push(enc.forward(&(x_nd * gate_nd)?)?);
        }
        let mu_nk = Tensor::cat(&mu_cols, 1)?;
        let logvar_nk = feature_logvar(&self.logvar_encoder, feature, &mu_nk)?;
        Ok((mu_nk, logvar_nk))
    }

    fn decode(&self, z_nk: &Tensor, feature: usize) -> candle_core::Result<(Tensor, Tensor)> {
        let n = z_nk.dim(0)?;
        let gate_ndk = self.decoder_gate(n, feature)?;

        let mut mu_cols = Vec::with_capacity(self.d_x);
        for (j, dec) in self.decoders.iter().enumerate() {
            let gate_nk = gate_ndk.i((.., j, ..))?;
            mu_cols.push(dec.forward(&(z_nk * gate_nk)?)?);
        }
        let mu_nd = Tensor::cat(&mu_cols, 1)?;
        let logvar_nd = feature_logvar(&self.logvar_decoder, feature, &mu_nd)?;
        Ok((mu_nd, logvar_nd))
    }

    /// `[d, d_z, d_x]` encoder logits or weights
    fn encoder_weight(&self) -> candle_core::Result<Tensor> {
        match &self.gate {
            MixingGate::Gumbel { decoder, encoder } => {
                encoder.as_ref().unwrap_or(decoder).logits().transpose(1, 2)
            }
            MixingGate::Static {
                w_ixk,
                w_encoder_ixk,
            } => w_encoder_ixk.as_ref().unwrap_or(w_ixk).transpose(1, 2),
        }
    }

    /// `[d, d_x, d_z]` decoder logits or weights
    fn decoder_weight(&self) -> candle_core::Result<Tensor> {
        match &self.gate {
            MixingGate::Gumbel { decoder, .. } => Ok(decoder.logits().clone()),
            MixingGate::Static { w_ixk, .. } => Ok(w_ixk.clone()),
        }
    }

    fn dim_obs(&self) -> usize {
        self.d_x
    }

    fn dim_latent(&self) -> usize {
        self.d_z
    }
}
