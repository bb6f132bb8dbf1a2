use crate::candle_data_loader::TimeSeriesWindows;
use crate::candle_inference::{train_latent_causal, TrainConfig};
use crate::candle_latent_causal_model::LatentCausalModel;
use crate::cli::ComputeDevice;
use crate::config::LatentCausalConfig;
use crate::simulate::{edge_recovery, simulate_latent_var, SimulationArgs};

use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Args;
use log::info;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct FitSyntheticArgs {
    /// output JSON report
    #[arg(short, long, required = true)]
    pub output: PathBuf,

    /// model configuration (`.json`); command-line sizes override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// number of features
    #[arg(long, default_value_t = 2)]
    pub d: usize,

    /// grid locations per feature
    #[arg(long, default_value_t = 6)]
    pub d_x: usize,

    /// latents per feature
    #[arg(long, default_value_t = 2)]
    pub d_z: usize,

    /// window length
    #[arg(long, default_value_t = 2)]
    pub tau: usize,

    /// number of simulated time points
    #[arg(long, default_value_t = 500)]
    pub ntime: usize,

    /// probability of each lagged cross edge
    #[arg(long, default_value_t = 0.2)]
    pub edge_prob: f64,

    /// model instantaneous edges
    #[arg(long, default_value_t = false)]
    pub instantaneous: bool,

    /// nonlinear auto-encoder
    #[arg(long, default_value_t = false)]
    pub nonlinear: bool,

    /// fix the edge mask to the simulated graph
    #[arg(long, default_value_t = false)]
    pub debug_gt_graph: bool,

    /// fix the mixing to the simulated one
    #[arg(long, default_value_t = false)]
    pub debug_gt_w: bool,

    /// use the simulated latents
    #[arg(long, default_value_t = false)]
    pub debug_gt_z: bool,

    /// edge probability threshold for the recovery summary
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,

    #[arg(long, default_value_t = 1e-3)]
    pub learning_rate: f32,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(short = 'i', long, default_value_t = 200)]
    pub epochs: usize,

    #[arg(long, value_enum, default_value = "cpu")]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0)]
    pub device_no: usize,

    /// random seed
    #[arg(short, long, default_value_t = 42)]
    pub seed: u64,

    /// Verbosity
    #[arg(short, long)]
    pub verbose: bool,
}

impl FitSyntheticArgs {
    /// Model configuration from the optional JSON file, with the
    /// command-line dimensions and toggles on top
    pub fn model_config(&self) -> anyhow::Result<LatentCausalConfig> {
        let base = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                info!("read model configuration from {:?}", path);
                serde_json::from_str::<LatentCausalConfig>(&text)?
            }
            None => LatentCausalConfig::default(),
        };

        let debug_gt = self.debug_gt_graph || self.debug_gt_w || self.debug_gt_z;

        Ok(LatentCausalConfig {
            d: self.d,
            d_x: self.d_x,
            d_z: self.d_z,
            tau: self.tau,
            instantaneous: self.instantaneous || base.instantaneous,
            nonlinear_mixing: self.nonlinear || base.nonlinear_mixing,
            no_gt: !debug_gt,
            debug_gt_graph: self.debug_gt_graph,
            debug_gt_w: self.debug_gt_w,
            debug_gt_z: self.debug_gt_z,
            seed: Some(self.seed),
            ..base
        })
    }

    pub fn simulation_args(&self) -> SimulationArgs {
        SimulationArgs {
            d: self.d,
            d_x: self.d_x,
            d_z: self.d_z,
            tau: self.tau,
            ntime: self.ntime,
            edge_prob: self.edge_prob,
            seed: self.seed,
            ..Default::default()
        }
    }
}

pub fn fit_synthetic(args: &FitSyntheticArgs) -> anyhow::Result<()> {
    // 1. simulate
    let sim_args = args.simulation_args();
    let sim = simulate_latent_var(&sim_args)?;
    info!(
        "simulated {} time points, {} true lagged edges",
        sim_args.ntime,
        sim.graph.sum_all()?.to_scalar::<f32>()?
    );

    // 2. build the model
    let config = args.model_config()?;
    let device = args.device.to_device(args.device_no)?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = LatentCausalModel::new(config.clone(), Some(sim.ground_truth()), vb)?;

    // 3. train
    let latents = config.debug_gt_z.then_some(&sim.z);
    let mut data = TimeSeriesWindows::new(&sim.x, latents, config.tau, Some(args.seed))?;

    let train_config = TrainConfig {
        learning_rate: args.learning_rate,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };
    let trace = train_latent_causal(&model, &varmap, &mut data, &train_config)?;

    // 4. compare the learned lags with the simulated ones
    let total_tau = config.total_tau();
    let adj = model.get_adj()?.to_device(&candle_core::Device::Cpu)?;
    let truth = sim.graph.narrow(0, 0, total_tau)?;
    let recovery = edge_recovery(&adj, &truth, args.threshold)?;
    info!(
        "edge recovery: precision {:.3}, recall {:.3}",
        recovery.precision, recovery.recall
    );

    let report = serde_json::json!({
        "command": "fit-synthetic",
        "config": config,
        "simulation": sim_args,
        "trace": trace,
        "recovery": recovery,
        "threshold": args.threshold,
        "adjacency": nested_vec3(&adj)?,
        "ground_truth_graph": nested_vec3(&truth)?,
    });

    if let Some(dir) = args.output.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    std::fs::write(&args.output, serde_json::to_string_pretty(&report)?)?;
    info!("wrote report: {:?}", args.output);
    Ok(())
}

fn nested_vec3(x: &Tensor) -> anyhow::Result<Vec<Vec<Vec<f32>>>> {
    Ok(x.to_dtype(DType::F32)?.to_vec3::<f32>()?)
}
