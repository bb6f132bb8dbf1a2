use crate::candle_autoencoder_linear::LinearAutoEncoder;
use crate::candle_autoencoder_nonlinear::{
    MixingStreams, NonLinearAutoEncoder, NonLinearAutoEncoderArgs,
};
use crate::candle_edge_mask::EdgeMaskSampler;
use crate::candle_loss_functions::{gaussian_kl_divergence, gaussian_log_density};
use crate::candle_model_traits::AutoEncoderModuleT;
use crate::candle_noise::NoiseSource;
use crate::candle_transition::TransitionModel;
use crate::config::LatentCausalConfig;
use crate::error::{LatentCausalError, Result};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use log::{debug, info};

/// Numerical slack before a negative KL counts as a fault
pub const KL_TOLERANCE: f64 = 1e-5;

/// Random stream offsets added to the model seed
pub const ENCODER_NOISE_STREAM: u64 = 0;
pub const EDGE_MASK_STREAM: u64 = 1;
pub const MIXING_DECODER_STREAM: u64 = 2;
pub const MIXING_ENCODER_STREAM: u64 = 3;

/// Ground-truth structure of a simulated data set
pub struct GroundTruth {
    /// `[tau + 1, d * d_z, d * d_z]`, last lag is the same-time-step slice
    pub graph: Tensor,
    /// `[d, d_x, d_z]` mixing
    pub w: Tensor,
}

/// Output of one forward pass; all but `px_mu` are scalars
pub struct ElboTerms {
    pub elbo: Tensor,
    pub recons: Tensor,
    pub kl: Tensor,
    /// `[b, d, d_x]` decoder mean of the current step
    pub px_mu: Tensor,
}

/// Latent causal discovery model for gridded time series.
///
/// Each window `x[b, tau, d, d_x]` and its next step `y[b, d, d_x]` are
/// encoded to latents `z[b, tau + 1, d, d_z]`; a sampled adjacency over
/// the `d * d_z` latent nodes gates an autoregressive Gaussian prior on
/// the last step; the last step is decoded back to `y`.
pub struct LatentCausalModel {
    config: LatentCausalConfig,
    autoencoder: Box<dyn AutoEncoderModuleT>,
    transition: TransitionModel,
    edge_mask: EdgeMaskSampler,
    encoder_noise: NoiseSource,
}

impl LatentCausalModel {
    /// Will create these variable groups:
    /// * `autoencoder.*` - linear or nonlinear auto-encoder
    /// * `transition.*` - per-latent transition networks and log-variance
    /// * `edge_mask.logits` - `[total_tau, d * d_z, d * d_z]`
    ///
    /// # Arguments
    /// * `config` - hyper-parameters
    /// * `ground_truth` - ignored under `no_gt`; seeds nonlinear mixing gates when given;
    ///   required by `debug_gt_graph` and `debug_gt_w`
    /// * `vb` - variable builder
    pub fn new(
        config: LatentCausalConfig,
        ground_truth: Option<GroundTruth>,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;

        let ground_truth = if config.no_gt { None } else { ground_truth };

        let (d, d_x, d_z) = (config.d, config.d_x, config.d_z);
        let total_tau = config.total_tau();
        let num_nodes = config.num_nodes();

        if config.debug_gt_w && ground_truth.is_none() {
            return Err(LatentCausalError::MissingGroundTruth("mixing"));
        }

        // ground-truth mixing seeds the nonlinear gates; debug_gt_w pins the linear decoder
        let gt_w = match ground_truth.as_ref() {
            Some(gt) => {
                check_dims("ground-truth mixing", &gt.w, &[d, d_x, d_z])?;
                Some(&gt.w)
            }
            None => None,
        };

        let autoencoder: Box<dyn AutoEncoderModuleT> = if config.nonlinear_mixing {
            let args = NonLinearAutoEncoderArgs {
                d,
                d_x,
                d_z,
                num_hidden: config.num_hidden_mixing,
                num_layers: config.num_layers_mixing,
                gumbel_mask: config.gumbel_mixing,
                tied: config.tied_w,
                ground_truth_w: gt_w,
            };
            let streams = MixingStreams {
                decoder: NoiseSource::new(config.seed, MIXING_DECODER_STREAM),
                encoder: NoiseSource::new(config.seed, MIXING_ENCODER_STREAM),
            };
            Box::new(NonLinearAutoEncoder::new(&args, streams, vb.pp("autoencoder"))?)
        } else {
            Box::new(LinearAutoEncoder::new(
                d,
                d_x,
                d_z,
                config.tied_w,
                gt_w.filter(|_| config.debug_gt_w),
                vb.pp("autoencoder"),
            )?)
        };

        let transition = TransitionModel::new(
            d,
            d_z,
            total_tau,
            config.num_layers,
            config.num_hidden,
            vb.pp("transition"),
        )?;

        let mut edge_mask = EdgeMaskSampler::new(
            total_tau,
            num_nodes,
            config.instantaneous,
            config.hard_gumbel,
            NoiseSource::new(config.seed, EDGE_MASK_STREAM),
            vb.pp("edge_mask"),
        )?;

        if config.debug_gt_graph {
            let graph = &ground_truth
                .as_ref()
                .ok_or(LatentCausalError::MissingGroundTruth("graph"))?
                .graph;
            check_dims("ground-truth graph", graph, &[config.tau + 1, num_nodes, num_nodes])?;
            edge_mask.fix(&graph.narrow(0, 0, total_tau)?)?;
            info!("edge mask fixed to the ground-truth graph");
        }

        info!(
            "latent causal model: d={}, d_x={}, d_z={}, tau={}, instantaneous={}, {} mixing",
            d,
            d_x,
            d_z,
            config.tau,
            config.instantaneous,
            if config.nonlinear_mixing { "nonlinear" } else { "linear" }
        );

        Ok(Self {
            encoder_noise: NoiseSource::new(config.seed, ENCODER_NOISE_STREAM),
            config,
            autoencoder,
            transition,
            edge_mask,
        })
    }

    /// Edge probabilities `[total_tau, d * d_z, d * d_z]`
    pub fn get_adj(&self) -> Result<Tensor> {
        self.edge_mask.get_proba()
    }

    /// Replace edge sampling by a fixed adjacency
    pub fn fix_graph(&mut self, adj: &Tensor) -> Result<()> {
        self.edge_mask.fix(adj)
    }

    pub fn config(&self) -> &LatentCausalConfig {
        &self.config
    }

    pub fn autoencoder(&self) -> &dyn AutoEncoderModuleT {
        self.autoencoder.as_ref()
    }

    pub fn edge_mask(&self) -> &EdgeMaskSampler {
        &self.edge_mask
    }

    pub fn transition_model(&self) -> &TransitionModel {
        &self.transition
    }

    /// Sample latents from q(z | x, y) with the reparameterization trick
    ///
    /// # Arguments
    /// * `x` - `[b, tau, d, d_x]` past window
    /// * `y` - `[b, d, d_x]` current step
    ///
    /// # Returns `(z, q_mu, q_std)`
    /// * `z` - `[b, tau + 1, d, d_z]`
    /// * `q_mu`, `q_std` - `[b, d, d_z]` posterior of the current step
    pub fn encode(&self, x: &Tensor, y: &Tensor) -> Result<(Tensor, Tensor, Tensor)> {
        let tau = self.config.tau;

        let mut z_features = Vec::with_capacity(self.config.d);
        let mut mu_features = Vec::with_capacity(self.config.d);
        let mut std_features = Vec::with_capacity(self.config.d);

        for i in 0..self.config.d {
            let mut z_steps = Vec::with_capacity(tau + 1);
            for t in 0..tau {
                let x_t = x.i((.., t, i))?.contiguous()?;
                let (z_t, _, _) = self.sample_posterior(&x_t, i)?;
                z_steps.push(z_t);
            }
            let y_i = y.i((.., i))?.contiguous()?;
            let (z_y, mu_y, std_y) = self.sample_posterior(&y_i, i)?;
            z_steps.push(z_y);

            z_features.push(Tensor::stack(&z_steps, 1)?);
            mu_features.push(mu_y);
            std_features.push(std_y);
        }

        Ok((
            Tensor::stack(&z_features, 2)?,
            Tensor::stack(&mu_features, 1)?,
            Tensor::stack(&std_features, 1)?,
        ))
    }

    /// z = mu + std * eps for one feature at one step
    fn sample_posterior(&self, x_nd: &Tensor, i: usize) -> Result<(Tensor, Tensor, Tensor)> {
        let (mu, logvar) = self.autoencoder.encode(x_nd, i)?;
        let std = (logvar * 0.5)?.exp()?;
        let eps = self
            .encoder_noise
            .standard_normal(mu.shape(), mu.dtype(), mu.device())?;
        let z = (&mu + (&std * eps)?)?;
        Ok((z, mu, std))
    }

    /// Prior `p(z_t | z_{<t})` of every latent node
    ///
    /// # Arguments
    /// * `z_window` - `[b, total_tau, d, d_z]`
    /// * `mask` - `[b, total_tau, d * d_z, d * d_z]` sampled adjacency
    ///
    /// # Returns `(pz_mu, pz_std)`, both `[b, d, d_z]`
    pub fn transition(&self, z_window: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor)> {
        let (d, d_z) = (self.config.d, self.config.d_z);
        let b = z_window.dim(0)?;

        let mut mu_features = Vec::with_capacity(d);
        for i in 0..d {
            let mut mu_latents = Vec::with_capacity(d_z);
            for k in 0..d_z {
                let parents = mask.i((.., .., i * d_z + k))?.contiguous()?;
                mu_latents.push(self.transition.forward(z_window, &parents, i, k)?);
            }
            mu_features.push(Tensor::cat(&mu_latents, 1)?);
        }
        let pz_mu = Tensor::stack(&mu_features, 1)?;

        let pz_std = (self.transition.logvar() * 0.5)?
            .exp()?
            .unsqueeze(0)?
            .broadcast_as((b, d, d_z))?;

        Ok((pz_mu, pz_std))
    }

    /// Observation model `p(y | z_t)`
    ///
    /// # Arguments
    /// * `z_now` - `[b, d, d_z]`
    ///
    /// # Returns `(px_mu, px_std)`, both `[b, d, d_x]`
    pub fn decode(&self, z_now: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut mu_features = Vec::with_capacity(self.config.d);
        let mut std_features = Vec::with_capacity(self.config.d);

        for i in 0..self.config.d {
            let z_i = z_now.i((.., i))?.contiguous()?;
            let (mu, logvar) = self.autoencoder.decode(&z_i, i)?;
            std_features.push((logvar * 0.5)?.exp()?);
            mu_features.push(mu);
        }

        Ok((
            Tensor::stack(&mu_features, 1)?,
            Tensor::stack(&std_features, 1)?,
        ))
    }

    /// Evidence lower bound of a minibatch
    ///
    /// # Arguments
    /// * `x` - `[b, tau, d, d_x]`
    /// * `y` - `[b, d, d_x]`
    /// * `gt_z` - `[b, tau + 1, d, d_z]` ground-truth latents, used with `debug_gt_z`
    /// * `iteration` - reported with a negative KL
    pub fn forward(
        &self,
        x: &Tensor,
        y: &Tensor,
        gt_z: Option<&Tensor>,
        iteration: usize,
    ) -> Result<ElboTerms> {
        let cfg = &self.config;
        let b = x.dim(0)?;
        check_dims("x", x, &[b, cfg.tau, cfg.d, cfg.d_x])?;
        check_dims("y", y, &[b, cfg.d, cfg.d_x])?;

        let (z, q_mu, q_std) = self.encode(x, y)?;

        let z = if cfg.debug_gt_z {
            let gt_z = gt_z.ok_or(LatentCausalError::MissingGroundTruth("latents"))?;
            check_dims("ground-truth latents", gt_z, &[b, cfg.tau + 1, cfg.d, cfg.d_z])?;
            gt_z.to_dtype(z.dtype())?.to_device(z.device())?
        } else {
            z
        };

        let mask = self.edge_mask.sample(b, cfg.temperature)?;

        let z_window = if cfg.instantaneous {
            z.clone()
        } else {
            z.narrow(1, 0, cfg.tau)?
        };
        let (pz_mu, pz_std) = self.transition(&z_window, &mask)?;

        let z_now = z.i((.., cfg.tau))?.contiguous()?;
        let (px_mu, px_std) = self.decode(&z_now)?;

        let kl = gaussian_kl_divergence(&q_mu, &q_std, &pz_mu, &pz_std)?
            .sum(2)?
            .mean_all()?;

        let kl_value = kl
            .to_dtype(DType::F64)?
            .to_device(&Device::Cpu)?
            .to_scalar::<f64>()?;

        if kl_value.is_nan() || kl_value < -KL_TOLERANCE {
            return Err(LatentCausalError::NegativeKl {
                kl: kl_value,
                iteration,
            });
        }

        let recons = gaussian_log_density(y, &px_mu, &px_std)?
            .flatten_from(1)?
            .sum(1)?
            .mean_all()?;

        let elbo = (&recons - (&kl * cfg.coeff_kl)?)?;
        debug!("[{}] kl = {:.4}", iteration, kl_value);

        Ok(ElboTerms {
            elbo,
            recons,
            kl,
            px_mu,
        })
    }
}

fn check_dims(what: &'static str, x: &Tensor, expected: &[usize]) -> Result<()> {
    if x.dims() != expected {
        return Err(LatentCausalError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: x.dims().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_config() -> LatentCausalConfig {
        LatentCausalConfig {
            d: 2,
            d_x: 3,
            d_z: 1,
            tau: 2,
            num_layers: 1,
            num_hidden: 4,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn random_batch(config: &LatentCausalConfig, b: usize) -> Result<(Tensor, Tensor)> {
        let dev = Device::Cpu;
        let x = Tensor::randn(0f32, 1f32, (b, config.tau, config.d, config.d_x), &dev)?;
        let y = Tensor::randn(0f32, 1f32, (b, config.d, config.d_x), &dev)?;
        Ok((x, y))
    }

    #[test]
    fn small_model_forward() -> Result<()> {
        let config = small_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config.clone(), None, vb)?;

        let (x, y) = random_batch(&config, 4)?;
        let out = model.forward(&x, &y, None, 0)?;

        let elbo = out.elbo.to_scalar::<f32>()?;
        let kl = out.kl.to_scalar::<f32>()?;
        assert!(elbo.is_finite());
        assert!(kl >= 0.0);
        assert_eq!(out.px_mu.dims(), &[4, 2, 3]);
        assert_eq!(model.get_adj()?.dims(), &[2, 2, 2]);
        Ok(())
    }

    #[test]
    fn elbo_gradient_reaches_edge_logits() -> Result<()> {
        let config = LatentCausalConfig {
            instantaneous: true,
            hard_gumbel: true,
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config.clone(), None, vb)?;
        assert_eq!(model.get_adj()?.dims(), &[3, 2, 2]);

        let (x, y) = random_batch(&config, 3)?;
        let out = model.forward(&x, &y, None, 0)?;
        let grads = out.elbo.backward()?;
        assert!(grads.get(model.edge_mask().logits()).is_some());
        Ok(())
    }

    #[test]
    fn nonlinear_model_forward() -> Result<()> {
        let config = LatentCausalConfig {
            nonlinear_mixing: true,
            d_z: 2,
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config.clone(), None, vb)?;

        let (x, y) = random_batch(&config, 5)?;
        let out = model.forward(&x, &y, None, 3)?;
        assert!(out.elbo.to_scalar::<f32>()?.is_finite());
        assert_eq!(out.px_mu.dims(), &[5, 2, 3]);
        Ok(())
    }

    #[test]
    fn rejects_unknown_distribution() {
        let config = LatentCausalConfig {
            distr_decoder: "poisson".to_string(),
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(matches!(
            LatentCausalModel::new(config, None, vb),
            Err(LatentCausalError::UnsupportedDistribution { role: "decoder", .. })
        ));
    }

    #[test]
    fn ground_truth_latents_must_be_given() -> Result<()> {
        let config = LatentCausalConfig {
            no_gt: false,
            debug_gt_z: true,
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config.clone(), None, vb)?;

        let (x, y) = random_batch(&config, 2)?;
        assert!(matches!(
            model.forward(&x, &y, None, 0),
            Err(LatentCausalError::MissingGroundTruth("latents"))
        ));

        let gt_z = Tensor::zeros((2, 3, 2, 1), DType::F32, &Device::Cpu)?;
        assert!(model.forward(&x, &y, Some(&gt_z), 0).is_ok());
        Ok(())
    }

    #[test]
    fn rejects_wrong_input_shape() -> Result<()> {
        let config = small_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config.clone(), None, vb)?;

        let (x, _) = random_batch(&config, 2)?;
        let y = Tensor::zeros((2, 2, 4), DType::F32, &Device::Cpu)?;
        assert!(matches!(
            model.forward(&x, &y, None, 0),
            Err(LatentCausalError::ShapeMismatch { what: "y", .. })
        ));
        Ok(())
    }

    #[test]
    fn nan_kl_reports_the_iteration() -> Result<()> {
        let config = small_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config, None, vb)?;

        let x = Tensor::full(f32::NAN, (2, 2, 2, 3), &Device::Cpu)?;
        let y = Tensor::zeros((2, 2, 3), DType::F32, &Device::Cpu)?;
        match model.forward(&x, &y, None, 7) {
            Err(LatentCausalError::NegativeKl { kl, iteration }) => {
                assert!(kl.is_nan());
                assert_eq!(iteration, 7);
            }
            _ => panic!("expected a KL fault"),
        }
        Ok(())
    }

    #[test]
    fn instantaneous_prior_ignores_own_current_value() -> Result<()> {
        let config = LatentCausalConfig {
            instantaneous: true,
            ..small_config()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = LatentCausalModel::new(config.clone(), None, vb)?;

        let (b, total_tau, num_nodes) = (4, config.total_tau(), config.num_nodes());
        let mask = model
            .get_adj()?
            .unsqueeze(0)?
            .broadcast_as((b, total_tau, num_nodes, num_nodes))?
            .contiguous()?;

        // shift node 0 at the same time step; d_z = 1 so node 0 is (feature 0, latent 0)
        let shape = (b, total_tau, config.d, config.d_z);
        let z = Tensor::randn(0f32, 1f32, shape, &Device::Cpu)?;
        let step = config.d * config.d_z;
        let mut delta = vec![0f32; b * total_tau * step];
        for n in 0..b {
            delta[(n * total_tau + total_tau - 1) * step] = 1.0;
        }
        let z_shifted = (&z + Tensor::from_vec(delta, shape, &Device::Cpu)?)?;

        let (mu, _) = model.transition(&z, &mask)?;
        let (mu_shifted, _) = model.transition(&z_shifted, &mask)?;
        let diff = (mu_shifted - mu)?.abs()?;

        let self_diff = diff.i((.., 0, 0))?.max_all()?.to_scalar::<f32>()?;
        let cross_diff = diff.i((.., 1, 0))?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(self_diff, 0.0);
        assert!(cross_diff > 0.0);
        Ok(())
    }
}
