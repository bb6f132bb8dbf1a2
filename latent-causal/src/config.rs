use crate::error::{LatentCausalError, Result};
use serde::{Deserialize, Serialize};

/// Distribution families the model knows how to parameterize
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistributionFamily {
    Gaussian,
}

impl DistributionFamily {
    /// * `role` - which part of the model asks (for the error message)
    /// * `name` - family name, case-insensitive
    pub fn parse(role: &'static str, name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "gaussian" => Ok(DistributionFamily::Gaussian),
            _ => Err(LatentCausalError::UnsupportedDistribution {
                role,
                family: name.to_string(),
            }),
        }
    }
}

/// Hyper-parameters of `LatentCausalModel`
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LatentCausalConfig {
    /// hidden layers of each transition network
    pub num_layers: usize,
    /// hidden units of each transition network
    pub num_hidden: usize,
    /// weight of the KL term in the ELBO
    pub coeff_kl: f64,

    pub distr_z0: String,
    pub distr_encoder: String,
    pub distr_transition: String,
    pub distr_decoder: String,

    /// number of features
    pub d: usize,
    /// grid locations per feature
    pub d_x: usize,
    /// latents per feature
    pub d_z: usize,
    /// window length
    pub tau: usize,
    /// model same-time-step edges
    pub instantaneous: bool,

    pub nonlinear_mixing: bool,
    /// Gumbel-softmax gates in the nonlinear auto-encoder
    pub gumbel_mixing: bool,
    pub hard_gumbel: bool,
    pub tied_w: bool,

    /// never touch ground-truth tensors
    pub no_gt: bool,
    pub debug_gt_graph: bool,
    pub debug_gt_z: bool,
    pub debug_gt_w: bool,

    pub num_hidden_mixing: usize,
    pub num_layers_mixing: usize,

    /// edge-mask Gumbel-sigmoid temperature
    pub temperature: f64,
    pub seed: Option<u64>,
}

impl Default for LatentCausalConfig {
    fn default() -> Self {
        Self {
            num_layers: 2,
            num_hidden: 16,
            coeff_kl: 1.0,
            distr_z0: "gaussian".to_string(),
            distr_encoder: "gaussian".to_string(),
            distr_transition: "gaussian".to_string(),
            distr_decoder: "gaussian".to_string(),
            d: 1,
            d_x: 1,
            d_z: 1,
            tau: 1,
            instantaneous: false,
            nonlinear_mixing: false,
            gumbel_mixing: true,
            hard_gumbel: false,
            tied_w: false,
            no_gt: true,
            debug_gt_graph: false,
            debug_gt_z: false,
            debug_gt_w: false,
            num_hidden_mixing: 8,
            num_layers_mixing: 2,
            temperature: 1.0,
            seed: None,
        }
    }
}

impl LatentCausalConfig {
    /// `tau + 1` with instantaneous edges, `tau` otherwise
    pub fn total_tau(&self) -> usize {
        if self.instantaneous {
            self.tau + 1
        } else {
            self.tau
        }
    }

    /// latent nodes of the causal graph, `d * d_z`
    pub fn num_nodes(&self) -> usize {
        self.d * self.d_z
    }

    /// Check distribution families, temperature and ground-truth toggles
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("d", self.d),
            ("d_x", self.d_x),
            ("d_z", self.d_z),
            ("tau", self.tau),
        ];
        for (name, dim) in dims {
            if dim == 0 {
                return Err(LatentCausalError::InvalidDimension(name));
            }
        }

        DistributionFamily::parse("z0", &self.distr_z0)?;
        DistributionFamily::parse("encoder", &self.distr_encoder)?;
        DistributionFamily::parse("transition", &self.distr_transition)?;
        DistributionFamily::parse("decoder", &self.distr_decoder)?;

        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(LatentCausalError::InvalidTemperature(self.temperature));
        }

        if self.no_gt {
            if self.debug_gt_graph {
                return Err(LatentCausalError::MissingGroundTruth("graph"));
            }
            if self.debug_gt_w {
                return Err(LatentCausalError::MissingGroundTruth("mixing"));
            }
            if self.debug_gt_z {
                return Err(LatentCausalError::MissingGroundTruth("latents"));
            }
        }
        Ok(())
    }
}
