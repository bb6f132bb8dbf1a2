use crate::candle_latent_causal_model::GroundTruth;

use anyhow::anyhow;
use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use serde::{Deserialize, Serialize};

/// Row sum of |coefficients| per target, below one keeps the VAR stable
const MAX_ROW_ABS_SUM: f64 = 0.9;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationArgs {
    pub d: usize,
    pub d_x: usize,
    pub d_z: usize,
    pub tau: usize,
    /// number of time points
    pub ntime: usize,
    /// probability of each lagged cross edge
    pub edge_prob: f64,
    /// std of the latent innovations
    pub latent_noise: f64,
    /// std of the observation noise
    pub obs_noise: f64,
    pub seed: u64,
}

impl Default for SimulationArgs {
    fn default() -> Self {
        Self {
            d: 2,
            d_x: 6,
            d_z: 2,
            tau: 2,
            ntime: 500,
            edge_prob: 0.2,
            latent_noise: 0.5,
            obs_noise: 0.1,
            seed: 42,
        }
    }
}

pub struct SimulatedData {
    /// `[T, d, d_x]` observations
    pub x: Tensor,
    /// `[T, d, d_z]` latents
    pub z: Tensor,
    /// `[tau + 1, d * d_z, d * d_z]` binary graph, last lag is empty
    pub graph: Tensor,
    /// `[tau + 1, d * d_z, d * d_z]` VAR coefficients
    pub coefficients: Tensor,
    /// `[d, d_x, d_z]` non-negative one-hot mixing
    pub w: Tensor,
}

impl SimulatedData {
    pub fn ground_truth(&self) -> GroundTruth {
        GroundTruth {
            graph: self.graph.clone(),
            w: self.w.clone(),
        }
    }
}

///
/// Simulate a lagged sparse VAR over `d * d_z` latent nodes and mix
/// each feature's latents into its `d_x` grid locations.
///
/// Node `i * d_z + k` is latent `k` of feature `i`. Graph index `l`
/// of `0..tau` refers to `z[t - tau + l]`; every node keeps an
/// autoregressive edge at the most recent lag.
///
pub fn simulate_latent_var(args: &SimulationArgs) -> anyhow::Result<SimulatedData> {
    let (d, d_x, d_z, tau) = (args.d, args.d_x, args.d_z, args.tau);
    if d == 0 || d_x == 0 || d_z == 0 || tau == 0 {
        return Err(anyhow!("dimensions and tau must be positive"));
    }
    if args.ntime <= tau {
        return Err(anyhow!("need more than tau = {} time points", tau));
    }

    let nn = d * d_z;
    let ntime = args.ntime;
    let mut rng = StdRng::seed_from_u64(args.seed);

    // 1. sparse lagged coefficients [tau + 1, target, source]
    let coef_size = Uniform::new(0.2, 0.6)?;
    let mut coef = vec![0f64; (tau + 1) * nn * nn];
    let idx = |l: usize, tgt: usize, src: usize| (l * nn + tgt) * nn + src;

    for tgt in 0..nn {
        for l in 0..tau {
            for src in 0..nn {
                let is_ar = l == tau - 1 && src == tgt;
                if is_ar || rng.random::<f64>() < args.edge_prob {
                    let sign = if is_ar || rng.random::<bool>() { 1.0 } else { -1.0 };
                    coef[idx(l, tgt, src)] = sign * coef_size.sample(&mut rng);
                }
            }
        }

        let row_sum: f64 = (0..tau)
            .flat_map(|l| (0..nn).map(move |src| (l, src)))
            .map(|(l, src)| coef[idx(l, tgt, src)].abs())
            .sum();

        if row_sum > MAX_ROW_ABS_SUM {
            let scale = MAX_ROW_ABS_SUM / row_sum;
            for l in 0..tau {
                for src in 0..nn {
                    coef[idx(l, tgt, src)] *= scale;
                }
            }
        }
    }

    let graph: Vec<f32> = coef
        .iter()
        .map(|&c| if c != 0.0 { 1.0 } else { 0.0 })
        .collect();

    // 2. one-hot positive mixing
    let weight = Uniform::new(0.5, 1.5)?;
    let mut w = vec![0f64; d * d_x * d_z];
    for i in 0..d {
        for j in 0..d_x {
            let k = if j < d_z { j } else { rng.random_range(0..d_z) };
            w[(i * d_x + j) * d_z + k] = weight.sample(&mut rng);
        }
    }

    // 3. latent trajectories
    let innovation = Normal::new(0.0, args.latent_noise)?;
    let mut z = vec![0f64; ntime * nn];
    for t in 0..ntime {
        for tgt in 0..nn {
            let mut mean = 0.0;
            if t >= tau {
                for l in 0..tau {
                    let past = (t - tau + l) * nn;
                    for src in 0..nn {
                        mean += coef[idx(l, tgt, src)] * z[past + src];
                    }
                }
            }
            z[t * nn + tgt] = mean + innovation.sample(&mut rng);
        }
    }

    // 4. observations
    let obs = Normal::new(0.0, args.obs_noise)?;
    let mut x = vec![0f64; ntime * d * d_x];
    for t in 0..ntime {
        for i in 0..d {
            for j in 0..d_x {
                let signal: f64 = (0..d_z)
                    .map(|k| w[(i * d_x + j) * d_z + k] * z[t * nn + i * d_z + k])
                    .sum();
                x[(t * d + i) * d_x + j] = signal + obs.sample(&mut rng);
            }
        }
    }

    let dev = Device::Cpu;
    let to_f32 = |v: Vec<f64>| v.into_iter().map(|x| x as f32).collect::<Vec<_>>();

    Ok(SimulatedData {
        x: Tensor::from_vec(to_f32(x), (ntime, d, d_x), &dev)?,
        z: Tensor::from_vec(to_f32(z), (ntime, d, d_z), &dev)?,
        graph: Tensor::from_vec(graph, (tau + 1, nn, nn), &dev)?,
        coefficients: Tensor::from_vec(to_f32(coef), (tau + 1, nn, nn), &dev)?,
        w: Tensor::from_vec(to_f32(w), (d, d_x, d_z), &dev)?,
    })
}

#[derive(Clone, Debug, Serialize)]
pub struct EdgeRecovery {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub precision: f64,
    pub recall: f64,
}

/// Compare thresholded edge probabilities against a binary graph
///
/// * `proba` - estimated edge probabilities
/// * `truth` - binary graph of the same shape
/// * `threshold` - call an edge when `proba > threshold`
pub fn edge_recovery(
    proba: &Tensor,
    truth: &Tensor,
    threshold: f64,
) -> anyhow::Result<EdgeRecovery> {
    if proba.dims() != truth.dims() {
        return Err(anyhow!(
            "edge probabilities {:?} vs. graph {:?}",
            proba.dims(),
            truth.dims()
        ));
    }

    let called = proba.flatten_all()?.to_dtype(candle_core::DType::F64)?.to_vec1::<f64>()?;
    let actual = truth.flatten_all()?.to_dtype(candle_core::DType::F64)?.to_vec1::<f64>()?;

    let (mut tp, mut fp, mut fn_) = (0, 0, 0);
    for (&p, &g) in called.iter().zip(actual.iter()) {
        match (p > threshold, g != 0.0) {
            (true, true) => tp += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => {}
        }
    }

    let ratio = |a: usize, b: usize| if a + b > 0 { a as f64 / (a + b) as f64 } else { 0.0 };

    Ok(EdgeRecovery {
        true_positive: tp,
        false_positive: fp,
        false_negative: fn_,
        precision: ratio(tp, fp),
        recall: ratio(tp, fn_),
    })
}
