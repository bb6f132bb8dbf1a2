use crate::candle_data_loader::DataLoader;
use crate::candle_latent_causal_model::LatentCausalModel;

use candle_core::Device;
use candle_nn::{AdamW, Optimizer, VarMap};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub device: Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            batch_size: 64,
            num_epochs: 100,
            device: Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Per-epoch averages over minibatches
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct TrainTrace {
    pub elbo: Vec<f32>,
    pub recons: Vec<f32>,
    pub kl: Vec<f32>,
}

/// Maximize the ELBO of `model` with AdamW over all variables in `variable_map`
///
/// * `model` - latent causal model built on `variable_map`
/// * `variable_map` - trainable variables
/// * `data` - sliding-window data loader
/// * `train_config` - training configuration
///
/// Ground-truth latents are passed along whenever the loader has them.
pub fn train_latent_causal<DataL>(
    model: &LatentCausalModel,
    variable_map: &VarMap,
    data: &mut DataL,
    train_config: &TrainConfig,
) -> anyhow::Result<TrainTrace>
where
    DataL: DataLoader,
{
    let device = &train_config.device;
    let mut adam = AdamW::new_lr(variable_map.all_vars(), train_config.learning_rate.into())?;

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut trace = TrainTrace::default();
    let mut iteration = 0;

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size)?;
        let num_minibatch = data.num_minibatch();

        let (mut elbo_tot, mut recons_tot, mut kl_tot) = (0f32, 0f32, 0f32);

        for b in 0..num_minibatch {
            let mb = data.minibatch_data(b, device)?;
            let out = model.forward(&mb.x, &mb.y, mb.gt_z.as_ref(), iteration)?;

            let loss = out.elbo.neg()?;
            adam.backward_step(&loss)?;
            iteration += 1;

            elbo_tot += out.elbo.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;
            recons_tot += out.recons.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;
            kl_tot += out.kl.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?;
        }

        let denom = num_minibatch.max(1) as f32;
        trace.elbo.push(elbo_tot / denom);
        trace.recons.push(recons_tot / denom);
        trace.kl.push(kl_tot / denom);

        pb.inc(1);
        if train_config.verbose {
            info!(
                "[{}] elbo: {}, recons: {}, kl: {}",
                epoch + 1,
                elbo_tot / denom,
                recons_tot / denom,
                kl_tot / denom
            );
        }
    }
    pb.finish_and_clear();
    info!("done model training after {} iterations", iteration);
    Ok(trace)
}
